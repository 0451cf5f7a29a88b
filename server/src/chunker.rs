//! Splits file content into indexable chunks.
//!
//! Two modes: plain overlapping line windows, and symbol-aligned chunks
//! (one per symbol span, padded, with plain windows filling the gaps).
//! Lines are 1-indexed throughout.

use chrono::Utc;

use crate::types::{chunk_id, content_digest, Chunk, Symbol};

/// Chunking parameters. `overlap` must stay below `window`; a degenerate
/// config is clamped rather than rejected.
#[derive(Clone, Copy, Debug)]
pub struct ChunkParams {
    pub window: usize,
    pub overlap: usize,
}

impl ChunkParams {
    pub fn new(window: usize, overlap: usize) -> Self {
        let window = window.max(1);
        let overlap = overlap.min(window - 1);
        Self { window, overlap }
    }
}

/// Chunk a file. When `symbols` is non-empty the output is
/// symbol-aligned; otherwise plain windows.
pub fn build_chunks(
    file_path: &str,
    content: &str,
    symbols: &[Symbol],
    branch: &str,
    params: ChunkParams,
) -> Vec<Chunk> {
    let lines: Vec<&str> = content.lines().collect();

    if lines.is_empty() {
        // Empty input yields exactly one empty chunk.
        return vec![make_chunk(file_path, &lines, 1, 1, None, branch)];
    }

    if symbols.is_empty() {
        return plain_windows(file_path, &lines, 1, lines.len(), branch, params);
    }

    symbol_aligned(file_path, &lines, symbols, branch, params)
}

/// Plain mode: windows of `window` lines advancing by `window - overlap`.
fn plain_windows(
    file_path: &str,
    lines: &[&str],
    from: usize,
    to: usize,
    branch: &str,
    params: ChunkParams,
) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let step = params.window - params.overlap;
    let mut start = from;
    loop {
        let end = (start + params.window - 1).min(to);
        chunks.push(make_chunk(file_path, lines, start, end, None, branch));
        if end >= to {
            break;
        }
        start += step;
    }
    chunks
}

/// Symbol-aligned mode: one padded chunk per symbol span, then plain
/// windows over any uncovered gaps. Padding stops at neighboring symbol
/// boundaries so short files still yield one chunk per symbol with a
/// distinct (start, end) span.
fn symbol_aligned(
    file_path: &str,
    lines: &[&str],
    symbols: &[Symbol],
    branch: &str,
    params: ChunkParams,
) -> Vec<Chunk> {
    let total = lines.len();
    let mut chunks: Vec<Chunk> = Vec::new();
    let mut covered = vec![false; total + 1]; // 1-indexed
    let mut seen_spans: Vec<(usize, usize)> = Vec::new();

    let mut ordered: Vec<&Symbol> = symbols.iter().filter(|s| s.line >= 1).collect();
    ordered.sort_by_key(|s| (s.line, s.end_line));

    for (i, sym) in ordered.iter().copied().enumerate() {
        if sym.line > total {
            continue;
        }
        let sym_start = sym.line;
        let sym_end = sym.end_line.clamp(sym_start, total);

        let mut start = sym_start.saturating_sub(params.overlap).max(1);
        let mut end = (sym_end + params.overlap).min(total);
        if i > 0 {
            let prev_end = ordered[i - 1].end_line.min(total);
            start = start.max((prev_end + 1).min(sym_start));
        }
        if let Some(next) = ordered.get(i + 1) {
            end = end.min(next.line.saturating_sub(1).max(sym_end));
        }

        // Identical spans would collide on id; keep the first symbol.
        if seen_spans.contains(&(start, end)) {
            continue;
        }
        seen_spans.push((start, end));

        for flag in covered.iter_mut().take(end + 1).skip(start) {
            *flag = true;
        }
        chunks.push(make_chunk(file_path, lines, start, end, Some(sym), branch));
    }

    // Gap fill: maximal uncovered runs, chunked with plain windows.
    let mut gap_start: Option<usize> = None;
    for line in 1..=total + 1 {
        let is_covered = line > total || covered[line];
        match (gap_start, is_covered) {
            (None, false) => gap_start = Some(line),
            (Some(gs), true) => {
                chunks.extend(plain_windows(file_path, lines, gs, line - 1, branch, params));
                gap_start = None;
            }
            _ => {}
        }
    }

    chunks.sort_by_key(|c| (c.start_line, c.end_line));
    chunks
}

fn make_chunk(
    file_path: &str,
    lines: &[&str],
    start: usize,
    end: usize,
    symbol: Option<&Symbol>,
    branch: &str,
) -> Chunk {
    let content: String = if lines.is_empty() {
        String::new()
    } else {
        lines[start - 1..end.min(lines.len())].join("\n")
    };

    Chunk {
        id: chunk_id(file_path, start, end),
        file_path: file_path.to_string(),
        symbol_name: symbol.map(|s| s.name.clone()).unwrap_or_default(),
        symbol_kind: symbol.map(|s| s.kind),
        signature: symbol.map(|s| s.signature.clone()).unwrap_or_default(),
        doc_comment: symbol.map(|s| s.doc.clone()).unwrap_or_default(),
        content_hash: content_digest(&content),
        content,
        start_line: start,
        end_line: end,
        branch: branch.to_string(),
        indexed_at: Utc::now(),
    }
}

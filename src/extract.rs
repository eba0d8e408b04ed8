use std::collections::VecDeque;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

use crate::patterns::PatternSet;

pub const MAX_LINE_CHARS: usize = 500;
pub const MAX_EXCERPT_CHARS: usize = 1000;
pub const DEFAULT_CONTEXT_RADIUS: usize = 3;

/// Bytes of one line kept for matching. The remainder of a longer line
/// (minified or binary files) is skipped without being buffered.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Where a file first matched, with the surrounding lines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extract {
    pub line_number: u64,
    pub line: String,
    pub excerpt: String,
}

/// Number (1-based) and text of the first line any pattern matches, or
/// `(0, "")` when none does. The text is the whole line, not the match.
pub fn first_match<S: AsRef<str>>(lines: &[S], patterns: &PatternSet) -> (u64, String) {
    lines
        .iter()
        .map(|l| strip_newline(l.as_ref()))
        .enumerate()
        .find(|(_, line)| patterns.is_match(line))
        .map(|(idx, line)| (idx as u64 + 1, truncate_chars(line, MAX_LINE_CHARS)))
        .unwrap_or((0, String::new()))
}

/// Lines `radius` either side of `line_number`, joined and trimmed.
pub fn context_window<S: AsRef<str>>(lines: &[S], line_number: u64, radius: usize) -> String {
    if line_number == 0 || lines.is_empty() {
        return String::new();
    }
    let center = (line_number - 1) as usize;
    let start = center.saturating_sub(radius).min(lines.len());
    let end = center.saturating_add(radius).saturating_add(1).min(lines.len());
    join_excerpt(lines[start..end].iter().map(|l| strip_newline(l.as_ref())))
}

/// Streaming version of [`first_match`] + [`context_window`] over a file.
///
/// Holds at most `2 * radius + 1` lines at a time, each cut to
/// [`MAX_LINE_BYTES`]. Bytes that are not valid UTF-8 are replaced rather
/// than failing the scan.
pub async fn scan_file(
    path: &Path,
    patterns: &PatternSet,
    radius: usize,
) -> std::io::Result<Extract> {
    let mut reader = BufReader::new(File::open(path).await?);
    let mut behind: VecDeque<String> = VecDeque::with_capacity(radius + 1);
    let mut buf = Vec::new();
    let mut number: u64 = 0;

    loop {
        if read_line_capped(&mut reader, &mut buf, MAX_LINE_BYTES).await? == 0 {
            return Ok(Extract::default());
        }
        number += 1;
        let line = strip_newline(&String::from_utf8_lossy(&buf)).to_string();

        if patterns.is_match(&line) {
            let matched = truncate_chars(&line, MAX_LINE_CHARS);
            let mut window: Vec<String> = behind.into_iter().collect();
            window.push(line);

            for _ in 0..radius {
                if read_line_capped(&mut reader, &mut buf, MAX_LINE_BYTES).await? == 0 {
                    break;
                }
                window.push(strip_newline(&String::from_utf8_lossy(&buf)).to_string());
            }

            return Ok(Extract {
                line_number: number,
                line: matched,
                excerpt: join_excerpt(window.iter().map(String::as_str)),
            });
        }

        if radius > 0 {
            if behind.len() == radius {
                behind.pop_front();
            }
            behind.push_back(line);
        }
    }
}

/// Read one line into `buf`, keeping at most `cap` bytes of it. Returns the
/// number of bytes consumed from `reader`, 0 at end of input.
async fn read_line_capped<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    cap: usize,
) -> std::io::Result<usize> {
    buf.clear();
    let mut consumed = 0;
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(consumed);
        }
        let (chunk, line_done) = match available.iter().position(|&b| b == b'\n') {
            Some(idx) => (&available[..=idx], true),
            None => (available, false),
        };
        let room = cap.saturating_sub(buf.len());
        buf.extend_from_slice(&chunk[..chunk.len().min(room)]);
        let used = chunk.len();
        reader.consume(used);
        consumed += used;
        if line_done {
            return Ok(consumed);
        }
    }
}

fn join_excerpt<'a>(lines: impl Iterator<Item = &'a str>) -> String {
    let joined = lines.collect::<Vec<_>>().join("\n");
    truncate_chars(joined.trim(), MAX_EXCERPT_CHARS)
}

fn strip_newline(line: &str) -> &str {
    line.trim_end_matches(['\n', '\r'])
}

/// Cut `s` to at most `max` characters without splitting a code point.
pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

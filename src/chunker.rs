//! Boundary-aware text chunker.
//!
//! Splits parsed document text into spans that respect a configurable size
//! limit. Splitting prefers the configured boundary (paragraph or sentence)
//! within a tolerance window below the limit, then falls back to a word
//! boundary, then to a hard split. Each span carries byte offsets into the
//! source text, and every span except the last is extended with trailing
//! overlap context so adjacent chunks share a margin.
//!
//! Chunking is deterministic: the same text and configuration always produce
//! identical boundaries. This is what makes re-ingestion idempotent and the
//! pipeline testable.

use crate::config::ChunkingConfig;

/// Approximate chars-per-token ratio used to convert the configured token
/// budget into a character budget.
const CHARS_PER_TOKEN: usize = 4;

/// Preferred split boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boundary {
    Paragraph,
    Sentence,
}

/// Resolved chunker parameters (character units).
#[derive(Debug, Clone)]
pub struct ChunkerParams {
    pub max_chars: usize,
    pub overlap_chars: usize,
    pub boundary: Boundary,
    /// Fraction of `max_chars` the splitter may undershoot while looking
    /// for a clean boundary.
    pub tolerance: f64,
}

impl ChunkerParams {
    pub fn from_config(cfg: &ChunkingConfig) -> Self {
        Self {
            max_chars: cfg.max_tokens * CHARS_PER_TOKEN,
            overlap_chars: cfg.overlap_tokens * CHARS_PER_TOKEN,
            boundary: match cfg.boundary.as_str() {
                "sentence" => Boundary::Sentence,
                _ => Boundary::Paragraph,
            },
            tolerance: cfg.tolerance,
        }
    }
}

/// A chunk candidate: text plus byte offsets into the source.
///
/// `text` is always exactly `&source[start..end]`. Starts are strictly
/// increasing across the returned sequence; `end` may reach past the next
/// span's start by up to the configured overlap.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkSpan {
    pub text: String,
    pub start: usize,
    pub end: usize,
}

/// Split text into chunk spans.
///
/// Returns an empty vector only for text that is empty or all whitespace;
/// otherwise every returned span is non-empty.
pub fn chunk_text(text: &str, params: &ChunkerParams) -> Vec<ChunkSpan> {
    let max = params.max_chars.max(1);
    let mut cores: Vec<(usize, usize)> = Vec::new();
    let mut pos = skip_whitespace(text, 0);

    while pos < text.len() {
        let limit = floor_char_boundary(text, pos + max);
        if limit >= text.len() && text[pos..].trim_end().len() <= max {
            cores.push((pos, pos + text[pos..].trim_end().len()));
            break;
        }

        let split = find_split(text, pos, limit, params);
        let core_text = text[pos..split].trim_end();
        if !core_text.is_empty() {
            cores.push((pos, pos + core_text.len()));
        }
        pos = skip_whitespace(text, split);
    }

    let mut spans = Vec::with_capacity(cores.len());
    for (i, &(start, core_end)) in cores.iter().enumerate() {
        let end = if i + 1 < cores.len() && params.overlap_chars > 0 {
            extend_with_overlap(text, core_end, params.overlap_chars)
        } else {
            core_end
        };
        spans.push(ChunkSpan {
            text: text[start..end].to_string(),
            start,
            end,
        });
    }

    spans
}

/// Pick a split point in `(pos, limit]`, honoring the boundary preference
/// within the tolerance window and falling back to word, then hard split.
fn find_split(text: &str, pos: usize, limit: usize, params: &ChunkerParams) -> usize {
    let region = &text[pos..limit];
    let window = region.len().saturating_sub(
        (params.max_chars as f64 * params.tolerance).round() as usize,
    );
    let min_rel = window.max(1);

    let boundary_split = match params.boundary {
        Boundary::Paragraph => {
            find_paragraph_split(region, min_rel).or_else(|| find_sentence_split(region, min_rel))
        }
        Boundary::Sentence => find_sentence_split(region, min_rel),
    };

    let rel = boundary_split
        .or_else(|| find_word_split(region, min_rel))
        .unwrap_or(region.len());

    let split = pos + rel;
    if split <= pos {
        // Degenerate limit (multi-byte char wider than the budget): force
        // progress to the next char boundary.
        ceil_char_boundary(text, pos + 1)
    } else {
        split
    }
}

/// Last paragraph break (`\n\n`) at or past `min_rel`; split lands after it.
fn find_paragraph_split(region: &str, min_rel: usize) -> Option<usize> {
    let idx = region.rfind("\n\n")?;
    let rel = idx + 2;
    (rel >= min_rel && rel < region.len()).then_some(rel)
}

/// Last sentence end (`.`, `!`, `?` followed by whitespace) at or past
/// `min_rel`; split lands after the punctuation.
fn find_sentence_split(region: &str, min_rel: usize) -> Option<usize> {
    let mut best = None;
    let mut prev: Option<(usize, char)> = None;
    for (idx, ch) in region.char_indices() {
        if let Some((pidx, pch)) = prev {
            if matches!(pch, '.' | '!' | '?') && ch.is_whitespace() {
                let rel = pidx + pch.len_utf8();
                if rel >= min_rel && rel < region.len() {
                    best = Some(rel);
                }
            }
        }
        prev = Some((idx, ch));
    }
    best
}

/// Last whitespace at or past `min_rel`; split lands before it so no word
/// is broken.
fn find_word_split(region: &str, min_rel: usize) -> Option<usize> {
    region
        .char_indices()
        .filter(|(idx, ch)| ch.is_whitespace() && *idx >= min_rel && *idx < region.len())
        .map(|(idx, _)| idx)
        .next_back()
}

/// Extend a core span end by up to `overlap` bytes of trailing context,
/// cut back to the last word boundary in the extension.
fn extend_with_overlap(text: &str, core_end: usize, overlap: usize) -> usize {
    let ext_limit = floor_char_boundary(text, core_end + overlap);
    if ext_limit <= core_end {
        return core_end;
    }
    let extension = &text[core_end..ext_limit];
    let cut = if ext_limit == text.len() {
        extension.len()
    } else {
        extension
            .char_indices()
            .filter(|(_, ch)| ch.is_whitespace())
            .map(|(idx, _)| idx)
            .next_back()
            .unwrap_or(0)
    };
    core_end + extension[..cut].trim_end().len()
}

fn skip_whitespace(text: &str, mut pos: usize) -> usize {
    while pos < text.len() {
        let ch = match text[pos..].chars().next() {
            Some(c) => c,
            None => break,
        };
        if !ch.is_whitespace() {
            break;
        }
        pos += ch.len_utf8();
    }
    pos
}

fn floor_char_boundary(s: &str, mut i: usize) -> usize {
    if i >= s.len() {
        return s.len();
    }
    while !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn ceil_char_boundary(s: &str, mut i: usize) -> usize {
    if i >= s.len() {
        return s.len();
    }
    while !s.is_char_boundary(i) {
        i += 1;
    }
    i
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(max_chars: usize, overlap: usize, boundary: Boundary) -> ChunkerParams {
        ChunkerParams {
            max_chars,
            overlap_chars: overlap,
            boundary,
            tolerance: 0.25,
        }
    }

    #[test]
    fn test_small_text_single_chunk() {
        let spans = chunk_text("Hello, world!", &params(2000, 100, Boundary::Paragraph));
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].text, "Hello, world!");
        assert_eq!(spans[0].start, 0);
    }

    #[test]
    fn test_empty_and_whitespace_input() {
        assert!(chunk_text("", &params(100, 0, Boundary::Paragraph)).is_empty());
        assert!(chunk_text("   \n\n  ", &params(100, 0, Boundary::Paragraph)).is_empty());
    }

    #[test]
    fn test_offsets_match_source() {
        let text = "First paragraph with several words.\n\nSecond paragraph, also with words.\n\nThird paragraph closes the document.";
        let p = params(40, 10, Boundary::Paragraph);
        let spans = chunk_text(text, &p);
        assert!(spans.len() > 1);
        for s in &spans {
            assert_eq!(s.text, &text[s.start..s.end], "span text must equal source slice");
            assert!(!s.text.trim().is_empty());
        }
    }

    #[test]
    fn test_starts_strictly_increasing() {
        let text = (0..30)
            .map(|i| format!("Paragraph number {i} with some padding words."))
            .collect::<Vec<_>>()
            .join("\n\n");
        let spans = chunk_text(&text, &params(80, 20, Boundary::Paragraph));
        for pair in spans.windows(2) {
            assert!(pair[1].start > pair[0].start);
        }
    }

    #[test]
    fn test_paragraph_boundary_preferred() {
        let text = "Alpha beta gamma delta epsilon.\n\nZeta eta theta iota kappa lambda.";
        let spans = chunk_text(text, &params(40, 0, Boundary::Paragraph));
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].text, "Alpha beta gamma delta epsilon.");
        assert_eq!(spans[1].text, "Zeta eta theta iota kappa lambda.");
    }

    #[test]
    fn test_sentence_boundary_preferred() {
        let text = "The quick brown fox jumps. The lazy dog sleeps. A third sentence here.";
        let spans = chunk_text(text, &params(32, 0, Boundary::Sentence));
        assert!(spans.len() >= 2);
        assert!(spans[0].text.ends_with('.'), "split should land after a sentence end: {:?}", spans[0].text);
    }

    #[test]
    fn test_no_mid_word_split_when_spaces_exist() {
        let text = "alpha beta gamma delta epsilon zeta eta theta iota kappa";
        let spans = chunk_text(text, &params(24, 0, Boundary::Paragraph));
        for s in &spans {
            assert!(!s.text.starts_with(char::is_whitespace));
            assert!(!s.text.ends_with(char::is_whitespace));
            // Every span boundary must coincide with a word boundary.
            if s.end < text.len() {
                let next = text[s.end..].chars().next().unwrap();
                let last = s.text.chars().last().unwrap();
                assert!(
                    next.is_whitespace() || last.is_whitespace() || next.is_ascii_punctuation(),
                    "split inside a word: {:?} | {:?}",
                    s.text,
                    &text[s.end..]
                );
            }
        }
    }

    #[test]
    fn test_hard_split_on_unbroken_text() {
        let text = "x".repeat(100);
        let spans = chunk_text(&text, &params(30, 0, Boundary::Paragraph));
        assert!(spans.len() >= 4);
        for s in &spans {
            assert!(s.text.len() <= 30);
            assert!(!s.text.is_empty());
        }
    }

    #[test]
    fn test_trailing_overlap_extends_end() {
        let text = "One two three four five six.\n\nSeven eight nine ten eleven twelve.";
        let spans = chunk_text(text, &params(40, 16, Boundary::Paragraph));
        assert_eq!(spans.len(), 2);
        // The first span's end reaches into the second span's territory.
        assert!(spans[0].end > spans[1].start);
        assert!(spans[0].text.contains("Seven"));
        // The last span never carries overlap.
        assert_eq!(spans[1].end, text.len());
    }

    #[test]
    fn test_deterministic() {
        let text = "Alpha alpha alpha.\n\nBeta beta beta.\n\nGamma gamma gamma.\n\nDelta delta delta.";
        let p = params(30, 8, Boundary::Paragraph);
        let a = chunk_text(text, &p);
        let b = chunk_text(text, &p);
        assert_eq!(a, b);
    }

    #[test]
    fn test_multibyte_safety() {
        let text = "日本語のテキストです。これは二つ目の文です。さらに三つ目の文が続きます。";
        let spans = chunk_text(text, &params(30, 10, Boundary::Sentence));
        for s in &spans {
            assert_eq!(s.text, &text[s.start..s.end]);
            assert!(!s.text.is_empty());
        }
    }

    #[test]
    fn test_params_from_config() {
        let cfg = ChunkingConfig {
            max_tokens: 512,
            overlap_tokens: 64,
            boundary: "sentence".to_string(),
            tolerance: 0.2,
        };
        let p = ChunkerParams::from_config(&cfg);
        assert_eq!(p.max_chars, 2048);
        assert_eq!(p.overlap_chars, 256);
        assert_eq!(p.boundary, Boundary::Sentence);
    }
}

//! Overlapping fixed-window text chunker.
//!
//! Splits document text into windows of `chunk_size` characters that
//! advance by `chunk_size - overlap`, so consecutive chunks share `overlap`
//! characters of context. Sizes are counted in Unicode scalar values and
//! windows never split a UTF-8 sequence.
//!
//! For content of length `L > C` with overlap `O < C`, the chunker emits
//! `ceil((L - C) / (C - O)) + 1` chunks: windowing stops at the first
//! window that reaches the end of the content.

use sha2::{Digest, Sha256};

use crate::error::{KbError, KbResult};

/// Split `content` into overlapping windows.
///
/// Returns an empty vector when the trimmed content is empty; callers treat
/// that as an ingestion failure. Rejects `chunk_size == 0` and
/// `overlap >= chunk_size`, which would never advance.
pub fn chunk_text(content: &str, chunk_size: usize, overlap: usize) -> KbResult<Vec<String>> {
    if chunk_size == 0 {
        return Err(KbError::invalid_input("chunk_size must be > 0"));
    }
    if overlap >= chunk_size {
        return Err(KbError::invalid_input(format!(
            "overlap ({}) must be smaller than chunk_size ({})",
            overlap, chunk_size
        )));
    }

    let text = content.trim();
    if text.is_empty() {
        return Ok(Vec::new());
    }

    // Byte offset of every char boundary, including the end of the text.
    let bounds: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let len = bounds.len() - 1;

    if len <= chunk_size {
        return Ok(vec![text.to_string()]);
    }

    let step = chunk_size - overlap;
    let mut chunks = Vec::with_capacity(expected_chunk_count(len, chunk_size, overlap));
    let mut start = 0;

    while start < len {
        let end = (start + chunk_size).min(len);
        chunks.push(text[bounds[start]..bounds[end]].to_string());
        if end == len {
            break;
        }
        start += step;
    }

    Ok(chunks)
}

/// Number of chunks [`chunk_text`] produces for a text of `len` chars.
pub fn expected_chunk_count(len: usize, chunk_size: usize, overlap: usize) -> usize {
    if len == 0 {
        0
    } else if len <= chunk_size {
        1
    } else {
        let step = chunk_size - overlap;
        (len - chunk_size).div_ceil(step) + 1
    }
}

/// Stable identity of a document: SHA-256 hex of title followed by content.
pub fn content_id(title: &str, content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(title.as_bytes());
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_text_single_chunk() {
        let chunks = chunk_text("Hello, world!", 1000, 200).unwrap();
        assert_eq!(chunks, vec!["Hello, world!".to_string()]);
    }

    #[test]
    fn test_exact_size_single_chunk() {
        let text = "a".repeat(50);
        let chunks = chunk_text(&text, 50, 10).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0], text);
    }

    #[test]
    fn test_empty_and_whitespace_produce_nothing() {
        assert!(chunk_text("", 100, 10).unwrap().is_empty());
        assert!(chunk_text("  \n\t ", 100, 10).unwrap().is_empty());
    }

    #[test]
    fn test_overlap_must_be_smaller() {
        assert!(chunk_text("abc", 10, 10).is_err());
        assert!(chunk_text("abc", 10, 11).is_err());
        assert!(chunk_text("abc", 0, 0).is_err());
    }

    #[test]
    fn test_chunk_count_formula() {
        for (len, size, overlap) in [
            (25, 10, 2),
            (11, 10, 0),
            (100, 10, 9),
            (1001, 1000, 200),
            (5000, 1000, 200),
            (37, 7, 3),
        ] {
            let text = "x".repeat(len);
            let chunks = chunk_text(&text, size, overlap).unwrap();
            let expected = (len - size).div_ceil(size - overlap) + 1;
            assert_eq!(
                chunks.len(),
                expected,
                "len={} size={} overlap={}",
                len,
                size,
                overlap
            );
            assert_eq!(chunks.len(), expected_chunk_count(len, size, overlap));
        }
    }

    #[test]
    fn test_windows_overlap_and_cover_text() {
        let text: String = ('a'..='z').collect();
        let chunks = chunk_text(&text, 10, 3).unwrap();
        assert_eq!(chunks[0], "abcdefghij");
        assert_eq!(chunks[1], "hijklmnopq");
        assert!(chunks.last().unwrap().ends_with('z'));
        for c in &chunks {
            assert!(c.chars().count() <= 10);
        }
    }

    #[test]
    fn test_multibyte_boundaries() {
        let text = "héllo wörld ünïcode ßtraße".repeat(3);
        let chunks = chunk_text(&text, 8, 2).unwrap();
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.chars().count() <= 8);
        }
    }

    #[test]
    fn test_content_id_deterministic() {
        let a = content_id("About", "We sell coffee.");
        let b = content_id("About", "We sell coffee.");
        let c = content_id("About", "We sell tea.");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }
}

//! Token positioning: locating a focus word inside a tokenized sentence
//!
//! Tokenizers split words differently, so the focus word is located in two
//! ways:
//!
//! - **Token match**: the focus word equals one token string exactly
//!   (`"pool"` in `[CLS] i had a good swim at the pool . [SEP]`)
//! - **Span match**: the focus word covers several pieces (`"swims"` as
//!   `swim ##s`), found either as a contiguous piece sequence or through the
//!   character offset map
//!
//! Both produce a [`TokenSpan`] into the encoding.

use serde::{Deserialize, Serialize};

/// Half-open range of token indices `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSpan {
    pub start: usize,
    pub end: usize,
}

impl TokenSpan {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Span covering a single token
    pub fn single(index: usize) -> Self {
        Self {
            start: index,
            end: index + 1,
        }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Token indices covered by the span
    pub fn positions(&self) -> Vec<usize> {
        (self.start..self.end).collect()
    }
}

/// Encoding result with tokens, offsets and special-token flags
#[derive(Debug, Clone)]
pub struct EncodingWithOffsets {
    /// Token IDs
    pub ids: Vec<u32>,
    /// Token strings as produced by the tokenizer (`"##s"` keeps its prefix)
    pub tokens: Vec<String>,
    /// Character offset for each token: (start, end)
    pub offsets: Vec<(usize, usize)>,
    /// True for tokens added by the tokenizer (`[CLS]`, `[SEP]`, ...)
    pub special: Vec<bool>,
}

impl EncodingWithOffsets {
    /// Create a new encoding with offsets
    pub fn new(
        ids: Vec<u32>,
        tokens: Vec<String>,
        offsets: Vec<(usize, usize)>,
        special: Vec<bool>,
    ) -> Self {
        Self {
            ids,
            tokens,
            offsets,
            special,
        }
    }

    /// Index of the first token whose string equals `token` exactly
    pub fn find_token(&self, token: &str) -> Option<usize> {
        self.tokens.iter().position(|t| t == token)
    }

    /// First occurrence of `pieces` as a contiguous run of token strings
    pub fn find_token_sequence(&self, pieces: &[String]) -> Option<TokenSpan> {
        if pieces.is_empty() || pieces.len() > self.tokens.len() {
            return None;
        }
        self.tokens
            .windows(pieces.len())
            .position(|window| window == pieces)
            .map(|start| TokenSpan::new(start, start + pieces.len()))
    }

    /// Find all non-special token indices that overlap with the given character range
    pub fn char_range_to_tokens(&self, start_char: usize, end_char: usize) -> Vec<usize> {
        self.offsets
            .iter()
            .enumerate()
            .filter_map(|(idx, (start, end))| {
                if !self.is_special(idx) && *end > start_char && *start < end_char {
                    Some(idx)
                } else {
                    None
                }
            })
            .collect()
    }

    /// Whether the token at `idx` was added by the tokenizer
    pub fn is_special(&self, idx: usize) -> bool {
        self.special.get(idx).copied().unwrap_or(false)
    }

    /// Indices of the tokens that come from the input text
    pub fn content_positions(&self) -> Vec<usize> {
        (0..self.len()).filter(|&idx| !self.is_special(idx)).collect()
    }

    /// Token strings that come from the input text
    pub fn content_tokens(&self) -> Vec<String> {
        self.content_positions()
            .into_iter()
            .map(|idx| self.tokens[idx].clone())
            .collect()
    }

    /// Copy of this encoding with `span` collapsed into one replacement token
    ///
    /// The replacement covers the character range of the whole span. Used to
    /// put a mask token where the focus word was.
    pub fn with_span_replaced(&self, span: TokenSpan, id: u32, token: &str) -> Self {
        let start_char = self.offsets.get(span.start).map_or(0, |o| o.0);
        let end_char = span
            .end
            .checked_sub(1)
            .and_then(|last| self.offsets.get(last))
            .map_or(start_char, |o| o.1);

        let mut out = Self::new(
            Vec::with_capacity(self.len()),
            Vec::with_capacity(self.len()),
            Vec::with_capacity(self.len()),
            Vec::with_capacity(self.len()),
        );
        for idx in 0..self.len() {
            if idx == span.start {
                out.ids.push(id);
                out.tokens.push(token.to_string());
                out.offsets.push((start_char, end_char));
                out.special.push(false);
            }
            if idx >= span.start && idx < span.end {
                continue;
            }
            out.ids.push(self.ids[idx]);
            out.tokens.push(self.tokens[idx].clone());
            out.offsets.push(self.offsets[idx]);
            out.special.push(self.is_special(idx));
        }
        out
    }

    /// Get the number of tokens
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

/// Character range of the first word-bounded, case-insensitive occurrence of `word`
pub fn find_word_char_range(text: &str, word: &str) -> Option<(usize, usize)> {
    if word.is_empty() {
        return None;
    }
    let haystack = text.to_lowercase();
    let needle = word.to_lowercase();
    // Lowercasing may change byte lengths outside ASCII; offsets are only
    // reliable when it does not.
    if haystack.len() != text.len() {
        return text.find(word).map(|start| (start, start + word.len()));
    }

    let is_word_char = |c: char| c.is_alphanumeric() || c == '_';
    let mut from = 0;
    while let Some(rel) = haystack[from..].find(&needle) {
        let start = from + rel;
        let end = start + needle.len();
        let before_ok = haystack[..start]
            .chars()
            .next_back()
            .map_or(true, |c| !is_word_char(c));
        let after_ok = haystack[end..]
            .chars()
            .next()
            .map_or(true, |c| !is_word_char(c));
        if before_ok && after_ok {
            return Some((start, end));
        }
        from = start + haystack[start..].chars().next().map_or(1, char::len_utf8);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    /// "[CLS] i had a swim at the pool . [SEP]"
    fn pool_encoding() -> EncodingWithOffsets {
        EncodingWithOffsets::new(
            vec![101, 1045, 2018, 1037, 9880, 2012, 1996, 4770, 1012, 102],
            vec![
                "[CLS]".into(),
                "i".into(),
                "had".into(),
                "a".into(),
                "swim".into(),
                "at".into(),
                "the".into(),
                "pool".into(),
                ".".into(),
                "[SEP]".into(),
            ],
            vec![
                (0, 0),
                (0, 1),
                (2, 5),
                (6, 7),
                (8, 12),
                (13, 15),
                (16, 19),
                (20, 24),
                (24, 25),
                (0, 0),
            ],
            vec![
                true, false, false, false, false, false, false, false, false, true,
            ],
        )
    }

    #[test]
    fn test_find_token() {
        let encoding = pool_encoding();
        assert_eq!(encoding.find_token("pool"), Some(7));
        assert_eq!(encoding.find_token("Pool"), None);
    }

    #[test]
    fn test_char_range_skips_special() {
        let encoding = pool_encoding();
        // [CLS] has an empty (0, 0) range and never matches
        assert_eq!(encoding.char_range_to_tokens(0, 1), vec![1]);
        assert_eq!(encoding.char_range_to_tokens(20, 24), vec![7]);
        assert_eq!(encoding.char_range_to_tokens(16, 25), vec![6, 7, 8]);
    }

    #[test]
    fn test_find_token_sequence() {
        let encoding = EncodingWithOffsets::new(
            vec![101, 1045, 9880, 2015, 102],
            vec![
                "[CLS]".into(),
                "i".into(),
                "swim".into(),
                "##s".into(),
                "[SEP]".into(),
            ],
            vec![(0, 0), (0, 1), (2, 6), (6, 7), (0, 0)],
            vec![true, false, false, false, true],
        );
        let span = encoding
            .find_token_sequence(&["swim".to_string(), "##s".to_string()])
            .unwrap();
        assert_eq!(span, TokenSpan::new(2, 4));
        assert_eq!(span.positions(), vec![2, 3]);
        assert!(encoding.find_token_sequence(&[]).is_none());
    }

    #[test]
    fn test_with_span_replaced() {
        let encoding = pool_encoding();
        let masked = encoding.with_span_replaced(TokenSpan::single(7), 103, "[MASK]");
        assert_eq!(masked.len(), encoding.len());
        assert_eq!(masked.ids[7], 103);
        assert_eq!(masked.tokens[7], "[MASK]");
        assert!(masked.is_special(0));
        assert!(!masked.is_special(7));

        let collapsed = encoding.with_span_replaced(TokenSpan::new(4, 8), 103, "[MASK]");
        assert_eq!(collapsed.len(), encoding.len() - 3);
        assert_eq!(collapsed.tokens[4], "[MASK]");
        assert_eq!(collapsed.offsets[4], (8, 24));
        assert_eq!(collapsed.tokens[5], ".");
    }

    #[test]
    fn test_find_word_char_range() {
        let text = "The whirlpool near the Pool.";
        assert_eq!(find_word_char_range(text, "pool"), Some((23, 27)));
        assert_eq!(find_word_char_range("no match here", "pool"), None);
        assert_eq!(find_word_char_range("pool", "pool"), Some((0, 4)));
    }
}

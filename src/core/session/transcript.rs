//! Token merge state for a transcription session.
//!
//! The service delivers tokens in batches; each token is either final
//! (committed, never revised) or non-final (the current best guess for
//! not-yet-committed audio). [`TranscriptState`] maintains the two
//! resulting sequences:
//!
//! - `final_tokens` grows append-only, in arrival order
//! - `non_final_tokens` is replaced wholesale by every token-bearing batch
//!
//! Non-final tokens never persist across a batch boundary. Batches with an
//! empty token list are keep-alives and leave both sequences untouched.

use crate::core::stt::Token;

/// Outcome of merging one batch into the transcript.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    /// Final tokens appended by this batch, in arrival order
    pub appended: Vec<Token>,
    /// The full non-final sequence after the batch was applied
    pub non_final: Vec<Token>,
}

/// Committed and in-flight token sequences for one session.
#[derive(Debug, Default, Clone)]
pub struct TranscriptState {
    final_tokens: Vec<Token>,
    non_final_tokens: Vec<Token>,
}

impl TranscriptState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one inbound batch.
    ///
    /// Final tokens are appended in arrival order; the non-final sequence is
    /// replaced with the batch's non-final subset. Returns `None` for empty
    /// (keep-alive) batches, which are no-ops.
    pub fn apply_batch(&mut self, batch: Vec<Token>) -> Option<BatchOutcome> {
        if batch.is_empty() {
            return None;
        }

        let mut appended = Vec::new();
        let mut non_final = Vec::new();

        for token in batch {
            if token.is_final {
                appended.push(token);
            } else {
                non_final.push(token);
            }
        }

        self.final_tokens.extend(appended.iter().cloned());
        self.non_final_tokens = non_final.clone();

        Some(BatchOutcome {
            appended,
            non_final,
        })
    }

    /// Committed tokens, in arrival order.
    pub fn final_tokens(&self) -> &[Token] {
        &self.final_tokens
    }

    /// The service's current guess for not-yet-committed audio.
    pub fn non_final_tokens(&self) -> &[Token] {
        &self.non_final_tokens
    }

    /// Committed text. Token text carries its own leading whitespace, so
    /// this is a plain concatenation.
    pub fn final_text(&self) -> String {
        self.final_tokens.iter().map(|t| t.text.as_str()).collect()
    }

    /// In-flight text for the current best guess.
    pub fn interim_text(&self) -> String {
        self.non_final_tokens
            .iter()
            .map(|t| t.text.as_str())
            .collect()
    }

    /// The full displayed transcript: committed text followed by the
    /// in-flight guess.
    pub fn display_text(&self) -> String {
        let mut text = self.final_text();
        text.push_str(&self.interim_text());
        text
    }

    /// Drop both sequences.
    pub fn clear(&mut self) {
        self.final_tokens.clear();
        self.non_final_tokens.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.final_tokens.is_empty() && self.non_final_tokens.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(text: &str, is_final: bool) -> Token {
        Token {
            text: text.to_string(),
            start_ms: 0,
            end_ms: 0,
            confidence: 0.9,
            is_final,
            speaker: None,
        }
    }

    #[test]
    fn test_interim_then_commit_then_new_interim() {
        let mut state = TranscriptState::new();

        state.apply_batch(vec![token("Hel", false)]);
        assert_eq!(state.final_text(), "");
        assert_eq!(state.interim_text(), "Hel");

        state.apply_batch(vec![token("Hello", true)]);
        assert_eq!(state.final_text(), "Hello");
        // A finals-only batch empties the non-final sequence.
        assert_eq!(state.interim_text(), "");

        state.apply_batch(vec![token(" world", false)]);
        assert_eq!(state.final_tokens().len(), 1);
        assert_eq!(state.final_tokens()[0].text, "Hello");
        assert_eq!(state.non_final_tokens().len(), 1);
        assert_eq!(state.non_final_tokens()[0].text, " world");
        assert_eq!(state.display_text(), "Hello world");
    }

    #[test]
    fn test_final_sequence_is_monotonic_concatenation() {
        let mut state = TranscriptState::new();

        let batches = vec![
            vec![token("a", true), token("b", false)],
            vec![token(" c", true), token(" d", true)],
            vec![token(" e", false)],
            vec![token(" f", true)],
        ];

        let mut expected_finals: Vec<String> = Vec::new();
        for batch in batches {
            for t in &batch {
                if t.is_final {
                    expected_finals.push(t.text.clone());
                }
            }
            state.apply_batch(batch);

            let actual: Vec<String> = state
                .final_tokens()
                .iter()
                .map(|t| t.text.clone())
                .collect();
            assert_eq!(actual, expected_finals);
        }
    }

    #[test]
    fn test_non_final_replaced_every_batch() {
        let mut state = TranscriptState::new();

        state.apply_batch(vec![token("one", false), token("two", false)]);
        assert_eq!(state.non_final_tokens().len(), 2);

        state.apply_batch(vec![token("three", false)]);
        assert_eq!(state.non_final_tokens().len(), 1);
        assert_eq!(state.non_final_tokens()[0].text, "three");
    }

    #[test]
    fn test_empty_batch_is_keepalive_noop() {
        let mut state = TranscriptState::new();
        state.apply_batch(vec![token("Hello", true), token(" wor", false)]);

        let outcome = state.apply_batch(vec![]);
        assert!(outcome.is_none());
        assert_eq!(state.final_text(), "Hello");
        assert_eq!(state.interim_text(), " wor");
    }

    #[test]
    fn test_non_final_only_batch_keeps_finals() {
        let mut state = TranscriptState::new();
        state.apply_batch(vec![token("Hello", true)]);

        state.apply_batch(vec![token(" maybe", false)]);
        assert_eq!(state.final_text(), "Hello");
        assert_eq!(state.interim_text(), " maybe");
    }

    #[test]
    fn test_batch_outcome_reports_delta() {
        let mut state = TranscriptState::new();

        let outcome = state
            .apply_batch(vec![token("Hi", true), token(" the", false)])
            .unwrap();
        assert_eq!(outcome.appended.len(), 1);
        assert_eq!(outcome.appended[0].text, "Hi");
        assert_eq!(outcome.non_final.len(), 1);
        assert_eq!(outcome.non_final[0].text, " the");
    }

    #[test]
    fn test_clear() {
        let mut state = TranscriptState::new();
        state.apply_batch(vec![token("Hello", true), token(" wor", false)]);
        assert!(!state.is_empty());

        state.clear();
        assert!(state.is_empty());
        assert_eq!(state.display_text(), "");
    }
}

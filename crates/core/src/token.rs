//! Token estimation.
//!
//! A character heuristic of ~4 characters per token, rounded up. Budgets only
//! need to be conservative, not exact, so no tokenizer is loaded.

use crate::message::Message;

/// Per-message cost of role name and delimiters in a chat prompt.
pub const MESSAGE_OVERHEAD: usize = 4;

/// Estimated token count of `text`.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

/// Estimated size of a chat prompt, overhead included.
pub fn prompt_tokens(messages: &[Message]) -> usize {
    messages
        .iter()
        .map(|m| MESSAGE_OVERHEAD + estimate_tokens(&m.content))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimates_round_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("Alex"), 1);
        assert_eq!(estimate_tokens("Sully"), 2);
        assert_eq!(estimate_tokens(&"x".repeat(400)), 100);
    }

    #[test]
    fn prompt_counts_overhead_per_message() {
        let prompt = vec![
            Message::system("Curate."),  // 7 chars -> 2 + 4
            Message::user("Who is he?"), // 10 chars -> 3 + 4
        ];
        assert_eq!(prompt_tokens(&prompt), 13);
        assert_eq!(prompt_tokens(&[]), 0);
    }
}

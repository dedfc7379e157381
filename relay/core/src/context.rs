//! Context Trimming
//!
//! Enforces an approximate token budget on a message chain by evicting
//! the oldest surviving history pair until the estimate fits. The system
//! message (index 0) and the newest user message (last) are anchors and
//! are never removed; eviction always takes the two messages right after
//! the system message, keeping roles alternating.

use crate::chain::Message;

/// Estimate the token cost of a content string
///
/// `ceil(codepoint_length * 0.75)` — a deliberate approximation, not a
/// tokenizer. Must stay exactly this formula for parity between the
/// relay and the client.
#[must_use]
pub fn token_estimate(content: &str) -> u64 {
    (content.chars().count() as u64 * 3).div_ceil(4)
}

/// Estimate the total token cost of a chain
#[must_use]
pub fn chain_estimate(chain: &[Message]) -> u64 {
    chain.iter().map(|m| token_estimate(&m.content)).sum()
}

/// Trim a chain to fit a token budget
///
/// While the running total exceeds `budget` and at least one full pair
/// remains between the anchors, the pair at indices 1..=2 is removed and
/// its cost subtracted. Stops once fewer than two evictable messages
/// remain, even if the budget is still exceeded; the minimal result is
/// `[system, newest-user]`.
///
/// Returns the number of messages removed.
pub fn trim_to_budget(chain: &mut Vec<Message>, budget: u64) -> usize {
    let mut total = chain_estimate(chain);
    let mut removed = 0;

    while total > budget && chain.len() > 3 {
        for msg in chain.drain(1..3) {
            total -= token_estimate(&msg.content);
            removed += 1;
        }
    }

    if removed > 0 {
        tracing::debug!(
            removed = removed,
            remaining = chain.len(),
            total_estimate = total,
            budget = budget,
            "Trimmed chain to token budget"
        );
    }

    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{Message, Role};

    #[test]
    fn test_token_estimate_formula() {
        assert_eq!(token_estimate(""), 0);
        assert_eq!(token_estimate("a"), 1); // ceil(0.75)
        assert_eq!(token_estimate("ab"), 2); // ceil(1.5)
        assert_eq!(token_estimate("abc"), 3); // ceil(2.25)
        assert_eq!(token_estimate("abcd"), 3); // exact 3.0
        assert_eq!(token_estimate("abcde"), 4); // ceil(3.75)
    }

    #[test]
    fn test_token_estimate_counts_code_points() {
        // 4 code points regardless of encoded byte length
        assert_eq!(token_estimate("日本語だ"), 3);
        assert_eq!(token_estimate("ab日本"), 3);
    }

    #[test]
    fn test_chain_estimate_sums() {
        let chain = vec![
            Message::system("abcd"), // 3
            Message::user("ab"),     // 2
            Message::user("a"),      // 1
        ];
        assert_eq!(chain_estimate(&chain), 6);
    }

    fn pair(q: &str, a: &str) -> [Message; 2] {
        [Message::user(q), Message::assistant(a)]
    }

    #[test]
    fn test_trim_noop_within_budget() {
        let mut chain = vec![Message::system("s"), Message::user("hello")];
        let before = chain.clone();
        assert_eq!(trim_to_budget(&mut chain, 1000), 0);
        assert_eq!(chain, before);
    }

    #[test]
    fn test_trim_removes_oldest_pairs_first() {
        let mut chain = vec![Message::system("sys")];
        chain.extend(pair("old question aaaaaaaa", "old answer bbbbbbbb"));
        chain.extend(pair("new question", "new answer"));
        chain.push(Message::user("latest"));

        let total = chain_estimate(&chain);
        // Budget forces exactly one pair out
        let budget = total - 1;
        let removed = trim_to_budget(&mut chain, budget);

        assert_eq!(removed, 2);
        assert_eq!(chain[0].role, Role::System);
        assert_eq!(chain[1].content, "new question");
        assert_eq!(chain.last().unwrap().content, "latest");
        assert!(chain_estimate(&chain) <= budget);
    }

    #[test]
    fn test_trim_to_minimal_chain() {
        let mut chain = vec![Message::system("sys")];
        for i in 0..4 {
            chain.extend(pair(&format!("q{i}").repeat(50), &format!("a{i}").repeat(50)));
        }
        chain.push(Message::user("final"));

        // Budget nothing can satisfy: everything evictable goes
        trim_to_budget(&mut chain, 0);

        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0].role, Role::System);
        assert_eq!(chain[1].content, "final");
    }

    #[test]
    fn test_trim_preserves_alternation() {
        let mut chain = vec![Message::system("sys")];
        for i in 0..3 {
            chain.extend(pair(&format!("question {i} padding"), &format!("answer {i} padding")));
        }
        chain.push(Message::user("latest"));

        let budget = chain_estimate(&chain) - 1;
        trim_to_budget(&mut chain, budget);

        // History between the anchors still alternates user/assistant
        for w in chain[1..chain.len() - 1].chunks(2) {
            assert_eq!(w[0].role, Role::User);
            assert_eq!(w[1].role, Role::Assistant);
        }
    }

    #[test]
    fn test_trim_stops_with_single_evictable() {
        // Odd history: one lone entry between the anchors. The loop must
        // not remove a partial pair.
        let mut chain = vec![
            Message::system("sys"),
            Message::user("x".repeat(100)),
            Message::user("latest"),
        ];
        let removed = trim_to_budget(&mut chain, 1);
        assert_eq!(removed, 0);
        assert_eq!(chain.len(), 3);
    }
}

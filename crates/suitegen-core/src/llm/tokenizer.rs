//! Token estimation helpers.

/// Rough token count for backends that do not report usage counters.
pub fn estimate_tokens(text: &str) -> u64 {
    if text.is_empty() {
        return 0;
    }
    (text.len() as f64 / 3.5).max(1.0) as u64
}

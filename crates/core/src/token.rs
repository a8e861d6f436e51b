//! Change-token generation
//!
//! Change tokens are globally unique, lexicographically time-ordered
//! strings, regenerated on every successful write. They double as
//! auto-generated identifiers and as the sort key of every token-sorted
//! index, so ordering by token is ordering by write time.
//!
//! [`UlidSource`] keeps the previous ULID behind a mutex and increments
//! within the same millisecond, so tokens from one source never repeat
//! and never decrease even under clock stalls.

use parking_lot::Mutex;
use ulid::Ulid;

/// Change-token generator collaborator
pub trait TokenSource: Send + Sync {
    /// Produce the next token; strictly greater than every earlier one
    fn next_token(&self) -> String;
}

/// Monotonic ULID-based token source
#[derive(Debug, Default)]
pub struct UlidSource {
    previous: Mutex<Ulid>,
}

impl UlidSource {
    /// Create a new source
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenSource for UlidSource {
    fn next_token(&self) -> String {
        let mut previous = self.previous.lock();
        let candidate = Ulid::new();
        // Same millisecond (or clock went backward): increment instead
        // of re-randomizing so the order stays monotonic
        let next = if candidate <= *previous {
            previous.increment().unwrap_or(candidate)
        } else {
            candidate
        };
        *previous = next;
        next.to_string()
    }
}

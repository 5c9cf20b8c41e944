//! Authenticated browsing session handed out by the session gate.
//!
//! The gate owns the session; workers hold an `Arc` only for the duration
//! of a fetch and never persist it.

use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct Session<C> {
    context: C,
    generation: u64,
    gate_passed: bool,
    created_at: Instant,
    opened_at: DateTime<Utc>,
    max_age: Duration,
}

impl<C> Session<C> {
    #[must_use]
    pub fn new(context: C, generation: u64, max_age: Duration) -> Self {
        Self {
            context,
            generation,
            gate_passed: true,
            created_at: Instant::now(),
            opened_at: Utc::now(),
            max_age,
        }
    }

    /// Root browsing context; page contexts are derived from it
    pub const fn context(&self) -> &C {
        &self.context
    }

    /// Monotonic counter distinguishing re-acquired sessions
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    pub const fn gate_passed(&self) -> bool {
        self.gate_passed
    }

    pub const fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    /// Past its staleness threshold; the gate re-acquires before reuse
    #[must_use]
    pub fn is_stale(&self) -> bool {
        self.created_at.elapsed() >= self.max_age
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_session_is_not_stale() {
        let session = Session::new((), 1, Duration::from_secs(60));
        assert!(!session.is_stale());
        assert!(session.gate_passed());
        assert_eq!(session.generation(), 1);
    }

    #[test]
    fn zero_max_age_is_immediately_stale() {
        let session = Session::new((), 2, Duration::ZERO);
        assert!(session.is_stale());
    }
}

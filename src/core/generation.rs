use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic request generation shared between a consumer and its workers.
///
/// Each new user request calls [`Generation::advance`]; results tagged with an
/// older value are stale and must be dropped by the consumer.
#[derive(Debug, Clone, Default)]
pub struct Generation {
    current: Arc<AtomicU64>,
}

impl Generation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self) -> u64 {
        self.current.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn current(&self) -> u64 {
        self.current.load(Ordering::SeqCst)
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.current() == generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance_supersedes_older_generations() {
        let generation = Generation::new();
        let first = generation.advance();
        assert!(generation.is_current(first));

        let shared = generation.clone();
        let second = shared.advance();
        assert!(second > first);
        assert!(!generation.is_current(first));
        assert!(generation.is_current(second));
    }
}

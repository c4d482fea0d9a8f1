//! Handshake seed generation

use rand::Rng;
use std::sync::atomic::{self, AtomicU32};

/// Thread-safe seed generator
///
/// Starts at a random value and hands out monotonically increasing seeds,
/// so two sessions opened by the same process never share a seed.
pub struct SeedGenerator {
    next_seed: AtomicU32,
}

impl SeedGenerator {
    pub fn new() -> Self {
        Self::starting_at(rand::thread_rng().gen())
    }

    /// Create a generator with a fixed first seed
    pub fn starting_at(first: u32) -> Self {
        Self {
            next_seed: AtomicU32::new(first),
        }
    }

    /// Get the next seed
    pub fn next_seed(&self) -> u32 {
        self.next_seed.fetch_add(1, atomic::Ordering::Relaxed)
    }
}

impl Default for SeedGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_generation() {
        let gen = SeedGenerator::starting_at(41);
        assert_eq!(gen.next_seed(), 41);
        assert_eq!(gen.next_seed(), 42);
    }

    #[test]
    fn test_seed_wraps() {
        let gen = SeedGenerator::starting_at(u32::MAX);
        assert_eq!(gen.next_seed(), u32::MAX);
        assert_eq!(gen.next_seed(), 0);
    }

    #[test]
    fn test_random_start_is_distinct() {
        let gen = SeedGenerator::new();
        let a = gen.next_seed();
        let b = gen.next_seed();
        assert_ne!(a, b);
    }
}

// Process-wide download totals, shared by every worker.

use std::sync::atomic::{AtomicU64, Ordering};

/// Aggregate counters across all workers and all attempts. Increment-only;
/// nothing ever resets or decrements them.
#[derive(Debug, Default)]
pub struct Totals {
    bytes_total: AtomicU64,
    ops_total: AtomicU64,
}

impl Totals {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record bytes received from one chunk.
    pub fn add_bytes(&self, bytes: u64) {
        self.bytes_total.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Record one completed operation and return the new running count.
    pub fn complete_op(&self) -> u64 {
        self.ops_total.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn bytes(&self) -> u64 {
        self.bytes_total.load(Ordering::Relaxed)
    }

    pub fn ops(&self) -> u64 {
        self.ops_total.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_totals_basic() {
        let totals = Totals::new();
        totals.add_bytes(1000);
        totals.add_bytes(500);
        assert_eq!(totals.bytes(), 1500);

        assert_eq!(totals.complete_op(), 1);
        assert_eq!(totals.complete_op(), 2);
        assert_eq!(totals.ops(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_totals_no_lost_updates() {
        let totals = Arc::new(Totals::new());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let totals = Arc::clone(&totals);
            handles.push(tokio::spawn(async move {
                for _ in 0..1000 {
                    totals.add_bytes(3);
                    totals.complete_op();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(totals.bytes(), 8 * 1000 * 3);
        assert_eq!(totals.ops(), 8 * 1000);
    }
}

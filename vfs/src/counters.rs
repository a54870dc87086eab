use std::sync::atomic::{AtomicU64, Ordering};

/// Transfer totals shared by every handle that was given the same instance.
#[derive(Debug, Default)]
pub struct IoCounters {
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
    read_calls: AtomicU64,
    write_calls: AtomicU64,
}

impl IoCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_read(&self, bytes: u64) {
        self.bytes_read.fetch_add(bytes, Ordering::Relaxed);
        self.read_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_write(&self, bytes: u64) {
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
        self.write_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read.load(Ordering::Relaxed)
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }

    pub fn read_calls(&self) -> u64 {
        self.read_calls.load(Ordering::Relaxed)
    }

    pub fn write_calls(&self) -> u64 {
        self.write_calls.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_concurrent_updates() {
        let counters = Arc::new(IoCounters::new());
        let mut tasks = Vec::new();
        for _ in 0..8 {
            let counters = counters.clone();
            tasks.push(tokio::spawn(async move {
                for _ in 0..100 {
                    counters.record_read(10);
                    counters.record_write(3);
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(counters.bytes_read(), 8000);
        assert_eq!(counters.read_calls(), 800);
        assert_eq!(counters.bytes_written(), 2400);
        assert_eq!(counters.write_calls(), 800);
    }
}

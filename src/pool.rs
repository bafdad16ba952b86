//! Bounded pool of stream identifiers.
//!
//! The protocol multiplexes up to 128 in-flight requests over one socket,
//! each tagged with a stream id in `0..=127`. The pool is the admission
//! throttle of the whole connection: the write pump blocks in
//! [`StreamIdPool::acquire`] when all ids are outstanding, and every id
//! returns through [`StreamIdPool::release`] when its response header has
//! been consumed (before user decoding, so slow decoders do not starve
//! admission).
//!
//! Ids are interchangeable, so the pool hands them out in LIFO order; no
//! fairness between waiters is needed because the write pump is the only
//! consumer.

use std::sync::Mutex;

use tokio::sync::Notify;

use crate::error::{DriverError, Result};
use crate::frame::STREAM_ID_COUNT;

struct PoolState {
    free: Vec<i8>,
    closed: bool,
}

/// Pool of the 128 usable stream ids.
pub struct StreamIdPool {
    state: Mutex<PoolState>,
    available: Notify,
}

impl StreamIdPool {
    /// Create a full pool.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PoolState {
                free: (0..STREAM_ID_COUNT as i8).collect(),
                closed: false,
            }),
            available: Notify::new(),
        }
    }

    /// Remove and return an id, waiting while the pool is empty.
    ///
    /// Returns `Err(Cancelled)` once the pool is closed; closing also
    /// wakes every waiter currently parked here.
    pub async fn acquire(&self) -> Result<i8> {
        loop {
            // Register interest before checking state so a release
            // between the check and the await cannot be missed.
            let notified = self.available.notified();
            {
                let mut state = self.state.lock().unwrap();
                if state.closed {
                    return Err(DriverError::Cancelled);
                }
                if let Some(id) = state.free.pop() {
                    return Ok(id);
                }
            }
            notified.await;
        }
    }

    /// Return an id to the pool and wake one waiter.
    ///
    /// Releasing an id that is already free is a programming error.
    pub fn release(&self, id: i8) {
        let mut state = self.state.lock().unwrap();
        debug_assert!(
            !state.free.contains(&id),
            "stream id {id} released while free"
        );
        if state.closed {
            return;
        }
        state.free.push(id);
        drop(state);
        self.available.notify_one();
    }

    /// Permanently close the pool, waking all waiters with cancellation.
    pub fn close(&self) {
        let mut state = self.state.lock().unwrap();
        state.closed = true;
        drop(state);
        self.available.notify_waiters();
    }

    /// Number of ids currently free.
    pub fn available(&self) -> usize {
        self.state.lock().unwrap().free.len()
    }
}

impl Default for StreamIdPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_pool_starts_full() {
        let pool = StreamIdPool::new();
        assert_eq!(pool.available(), 128);
    }

    #[tokio::test]
    async fn test_acquire_release_conservation() {
        let pool = StreamIdPool::new();

        let mut held = Vec::new();
        for _ in 0..128 {
            held.push(pool.acquire().await.unwrap());
        }
        assert_eq!(pool.available(), 0);

        // All 128 ids distinct.
        let mut sorted = held.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), 128);

        for id in held {
            pool.release(id);
        }
        assert_eq!(pool.available(), 128);
    }

    #[tokio::test]
    async fn test_acquire_blocks_when_empty() {
        let pool = StreamIdPool::new();
        for _ in 0..128 {
            pool.acquire().await.unwrap();
        }

        tokio::select! {
            _ = pool.acquire() => panic!("acquire on empty pool should block"),
            _ = tokio::time::sleep(Duration::from_millis(20)) => {}
        }
    }

    #[tokio::test]
    async fn test_release_wakes_waiter() {
        let pool = Arc::new(StreamIdPool::new());
        let mut held = Vec::new();
        for _ in 0..128 {
            held.push(pool.acquire().await.unwrap());
        }

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let released = held.pop().unwrap();
        pool.release(released);

        let got = waiter.await.unwrap().unwrap();
        assert_eq!(got, released);
    }

    #[tokio::test]
    async fn test_close_wakes_waiter_with_cancellation() {
        let pool = Arc::new(StreamIdPool::new());
        for _ in 0..128 {
            pool.acquire().await.unwrap();
        }

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        pool.close();

        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(DriverError::Cancelled)));
    }

    #[tokio::test]
    async fn test_acquire_after_close_fails() {
        let pool = StreamIdPool::new();
        pool.close();
        assert!(matches!(pool.acquire().await, Err(DriverError::Cancelled)));
    }

    #[tokio::test]
    async fn test_lifo_reuse() {
        let pool = StreamIdPool::new();
        let id = pool.acquire().await.unwrap();
        pool.release(id);
        assert_eq!(pool.acquire().await.unwrap(), id);
    }

    #[cfg(debug_assertions)]
    #[tokio::test]
    #[should_panic(expected = "released while free")]
    async fn test_double_release_asserts() {
        let pool = StreamIdPool::new();
        let id = pool.acquire().await.unwrap();
        pool.release(id);
        pool.release(id);
    }
}

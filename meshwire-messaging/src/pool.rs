//! Per-peer channel pool.
//!
//! Each destination address owns a fixed array of slots, each holding a
//! shared future that resolves to a connected channel. Requests for one
//! subject always hash to the same slot, so a subject's traffic rides one
//! connection while distinct subjects spread across up to eight.

use crate::channel::Channel;
use crate::error::MessagingError;
use futures::future::{BoxFuture, Shared};
use meshwire_protocol::hash32;
use parking_lot::RwLock;
use std::sync::Arc;

/// Channels kept per peer address.
pub(crate) const POOL_SIZE: usize = 8;

/// A slot's connect attempt, shared by every caller that hits the slot
/// while it is in flight. Errors are `Arc`ed so late awaiters see them too.
pub(crate) type ChannelFuture =
    Shared<BoxFuture<'static, Result<Arc<Channel>, Arc<MessagingError>>>>;

pub(crate) struct ChannelPool {
    slots: RwLock<Vec<Option<ChannelFuture>>>,
}

impl ChannelPool {
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(vec![None; POOL_SIZE]),
        }
    }

    /// Slot index for a subject.
    pub fn offset(subject: &str) -> usize {
        (hash32(subject) % POOL_SIZE as i32).unsigned_abs() as usize
    }

    /// Returns the slot's connect future, starting `connect` when the slot
    /// is empty or holds a failed attempt.
    pub fn get_or_connect(
        &self,
        offset: usize,
        connect: impl FnOnce() -> ChannelFuture,
    ) -> ChannelFuture {
        if let Some(future) = self.live_slot(offset) {
            return future;
        }
        let mut slots = self.slots.write();
        // Re-check under the write lock; another sender may have started a
        // connect for this slot in the meantime.
        let stale = match &slots[offset] {
            None => true,
            Some(future) => matches!(future.peek(), Some(Err(_))),
        };
        if stale {
            slots[offset] = Some(connect());
        }
        slots[offset].clone().expect("slot populated above")
    }

    /// Handles a slot whose future resolved to a channel that is no longer
    /// active.
    ///
    /// If the slot still holds `stale`, it is cleared and `None` is
    /// returned: the caller re-enters the pool from scratch. If another
    /// sender already emptied the slot, a fresh connect is installed and
    /// returned; if a replacement is already in place, that replacement is
    /// returned.
    pub fn replace_stale(
        &self,
        offset: usize,
        stale: &ChannelFuture,
        connect: impl FnOnce() -> ChannelFuture,
    ) -> Option<ChannelFuture> {
        let mut slots = self.slots.write();
        match &slots[offset] {
            Some(current) if current.ptr_eq(stale) => {
                slots[offset] = None;
                None
            }
            Some(current) => Some(current.clone()),
            None => {
                let future = connect();
                slots[offset] = Some(future.clone());
                Some(future)
            }
        }
    }

    fn live_slot(&self, offset: usize) -> Option<ChannelFuture> {
        let slots = self.slots.read();
        let future = slots[offset].as_ref()?;
        if matches!(future.peek(), Some(Err(_))) {
            return None;
        }
        Some(future.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;

    fn failed() -> ChannelFuture {
        async { Err(Arc::new(MessagingError::ConnectionClosed)) }
            .boxed()
            .shared()
    }

    fn pending() -> ChannelFuture {
        futures::future::pending().boxed().shared()
    }

    #[test]
    fn test_offset_is_deterministic_and_bounded() {
        for subject in ["echo", "election", "append-entries", ""] {
            let offset = ChannelPool::offset(subject);
            assert!(offset < POOL_SIZE);
            assert_eq!(offset, ChannelPool::offset(subject));
        }
    }

    #[test]
    fn test_distinct_subjects_spread_across_slots() {
        let offsets: std::collections::HashSet<usize> = ["a", "b", "c", "d", "e", "f", "g", "h"]
            .iter()
            .map(|s| ChannelPool::offset(s))
            .collect();
        assert_eq!(offsets.len(), POOL_SIZE);
    }

    #[tokio::test]
    async fn test_slot_is_shared_while_in_flight() {
        let pool = ChannelPool::new();
        let first = pool.get_or_connect(0, pending);
        let second = pool.get_or_connect(0, || panic!("slot was live, no connect expected"));
        assert!(first.ptr_eq(&second));
    }

    #[tokio::test]
    async fn test_failed_slot_is_replaced() {
        let pool = ChannelPool::new();
        let first = pool.get_or_connect(3, failed);
        first.clone().await.unwrap_err();

        let second = pool.get_or_connect(3, pending);
        assert!(!first.ptr_eq(&second));
    }

    #[tokio::test]
    async fn test_replace_stale_clears_own_future() {
        let pool = ChannelPool::new();
        let stale = pool.get_or_connect(1, pending);
        assert!(pool
            .replace_stale(1, &stale, || panic!("cleared, not replaced"))
            .is_none());

        // The slot is empty now; a second stale holder installs a fresh
        // connect instead of recursing.
        let fresh = pool.replace_stale(1, &stale, pending).unwrap();
        assert!(!fresh.ptr_eq(&stale));
    }

    #[tokio::test]
    async fn test_replace_stale_adopts_existing_replacement() {
        let pool = ChannelPool::new();
        let stale = pool.get_or_connect(2, pending);
        pool.replace_stale(2, &stale, || unreachable!());
        let replacement = pool.get_or_connect(2, pending);

        let adopted = pool
            .replace_stale(2, &stale, || panic!("replacement already present"))
            .unwrap();
        assert!(adopted.ptr_eq(&replacement));
    }

    #[tokio::test]
    async fn test_slots_are_independent() {
        let pool = ChannelPool::new();
        let a = pool.get_or_connect(0, pending);
        let b = pool.get_or_connect(1, pending);
        assert!(!a.ptr_eq(&b));
    }
}

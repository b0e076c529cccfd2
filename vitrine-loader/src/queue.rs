//! The pending-request queue.
//!
//! Ordering, most urgent first:
//!
//! 1. priority ordinal, ascending
//! 2. requests whose id is in the viewport
//! 3. higher retry count
//! 4. arrival order
//!
//! The queue is re-sorted on every push and on every viewport change, so
//! the head is always the next request to dispatch.

use std::cmp::Reverse;
use std::time::Duration;

use vitrine_core::{EpochMillis, LoadParams, LoadPriority};

use crate::request::{RequestId, Subscriber};

/// A request waiting for (or retrying) dispatch.
#[derive(Debug)]
pub(crate) struct QueuedRequest {
    pub(crate) id: RequestId,
    pub(crate) params: LoadParams,
    pub(crate) priority: LoadPriority,
    pub(crate) retry_count: u32,
    pub(crate) timeout: Duration,
    pub(crate) ttl: Duration,
    pub(crate) created_at: EpochMillis,
    pub(crate) subscribers: Vec<Subscriber>,
    seq: u64,
}

impl QueuedRequest {
    pub(crate) fn new(
        id: RequestId,
        params: LoadParams,
        priority: LoadPriority,
        timeout: Duration,
        ttl: Duration,
        created_at: EpochMillis,
    ) -> Self {
        Self {
            id,
            params,
            priority,
            retry_count: 0,
            timeout,
            ttl,
            created_at,
            subscribers: Vec::new(),
            seq: 0,
        }
    }
}

/// Sort key for one request. Smaller runs first.
type OrderKey = (LoadPriority, bool, Reverse<u32>, u64);

fn order_key(request: &QueuedRequest, in_viewport: bool) -> OrderKey {
    (
        request.priority,
        !in_viewport,
        Reverse(request.retry_count),
        request.seq,
    )
}

#[derive(Debug, Default)]
pub(crate) struct RequestQueue {
    items: Vec<QueuedRequest>,
    next_seq: u64,
}

impl RequestQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Append a request. Call [`RequestQueue::sort`] afterwards.
    pub(crate) fn push(&mut self, mut request: QueuedRequest) {
        request.seq = self.next_seq;
        self.next_seq += 1;
        self.items.push(request);
    }

    pub(crate) fn sort<F>(&mut self, in_viewport: F)
    where
        F: Fn(&RequestId) -> bool,
    {
        self.items
            .sort_by_cached_key(|request| order_key(request, in_viewport(&request.id)));
    }

    pub(crate) fn pop_front(&mut self) -> Option<QueuedRequest> {
        if self.items.is_empty() {
            None
        } else {
            Some(self.items.remove(0))
        }
    }

    pub(crate) fn get_mut(&mut self, id: &RequestId) -> Option<&mut QueuedRequest> {
        self.items.iter_mut().find(|request| &request.id == id)
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, id: &RequestId) -> bool {
        self.items.iter().any(|request| &request.id == id)
    }

    pub(crate) fn remove(&mut self, id: &RequestId) -> Option<QueuedRequest> {
        let index = self.items.iter().position(|request| &request.id == id)?;
        Some(self.items.remove(index))
    }

    /// Raise a queued request to at least `floor`. Returns whether it was found.
    pub(crate) fn promote(&mut self, id: &RequestId, floor: LoadPriority) -> bool {
        match self.get_mut(id) {
            Some(request) => {
                request.priority = request.priority.at_least(floor);
                true
            }
            None => false,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Queued ids, head first.
    pub(crate) fn ids(&self) -> Vec<RequestId> {
        self.items.iter().map(|request| request.id.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn request(key: &str, priority: LoadPriority, retry_count: u32) -> QueuedRequest {
        let params = LoadParams::product(key);
        let mut request = QueuedRequest::new(
            RequestId::for_params(&params),
            params,
            priority,
            Duration::from_secs(1),
            Duration::from_secs(1),
            0,
        );
        request.retry_count = retry_count;
        request
    }

    fn id(key: &str) -> RequestId {
        RequestId::for_params(&LoadParams::product(key))
    }

    #[test]
    fn test_priority_first() {
        let mut queue = RequestQueue::new();
        queue.push(request("lazy", LoadPriority::Lazy, 0));
        queue.push(request("critical", LoadPriority::Critical, 0));
        queue.push(request("medium", LoadPriority::Medium, 0));
        queue.sort(|_| false);
        assert_eq!(queue.ids(), vec![id("critical"), id("medium"), id("lazy")]);
    }

    #[test]
    fn test_viewport_breaks_priority_ties() {
        let mut queue = RequestQueue::new();
        queue.push(request("offscreen", LoadPriority::High, 0));
        queue.push(request("visible", LoadPriority::High, 0));
        let visible = id("visible");
        queue.sort(|candidate| candidate == &visible);
        assert_eq!(queue.pop_front().unwrap().id, visible);
    }

    #[test]
    fn test_retries_preempt_fresh_work_of_same_priority() {
        let mut queue = RequestQueue::new();
        queue.push(request("fresh", LoadPriority::High, 0));
        queue.push(request("retried", LoadPriority::High, 2));
        queue.sort(|_| false);
        assert_eq!(queue.pop_front().unwrap().id, id("retried"));
    }

    #[test]
    fn test_arrival_order_is_kept_otherwise() {
        let mut queue = RequestQueue::new();
        for key in ["a", "b", "c"] {
            queue.push(request(key, LoadPriority::Low, 0));
        }
        queue.sort(|_| false);
        assert_eq!(queue.ids(), vec![id("a"), id("b"), id("c")]);
    }

    #[test]
    fn test_promote_never_lowers() {
        let mut queue = RequestQueue::new();
        queue.push(request("a", LoadPriority::Critical, 0));
        queue.push(request("b", LoadPriority::Lazy, 0));
        assert!(queue.promote(&id("a"), LoadPriority::High));
        assert!(queue.promote(&id("b"), LoadPriority::High));
        assert!(!queue.promote(&id("missing"), LoadPriority::High));
        assert_eq!(queue.get_mut(&id("a")).unwrap().priority, LoadPriority::Critical);
        assert_eq!(queue.get_mut(&id("b")).unwrap().priority, LoadPriority::High);
    }

    #[test]
    fn test_remove() {
        let mut queue = RequestQueue::new();
        queue.push(request("a", LoadPriority::Low, 0));
        assert!(queue.contains(&id("a")));
        assert!(queue.remove(&id("a")).is_some());
        assert!(queue.remove(&id("a")).is_none());
        assert!(queue.is_empty());
    }

    fn arb_priority() -> impl Strategy<Value = LoadPriority> {
        prop_oneof![
            Just(LoadPriority::Critical),
            Just(LoadPriority::High),
            Just(LoadPriority::Medium),
            Just(LoadPriority::Low),
            Just(LoadPriority::Lazy),
        ]
    }

    proptest! {
        #[test]
        fn prop_dequeue_order_is_sorted(
            specs in prop::collection::vec((arb_priority(), 0u32..4, any::<bool>()), 1..40)
        ) {
            let mut queue = RequestQueue::new();
            let mut visible = HashSet::new();
            for (i, (priority, retries, in_viewport)) in specs.iter().enumerate() {
                let key = format!("k{}", i);
                if *in_viewport {
                    visible.insert(id(&key));
                }
                queue.push(request(&key, *priority, *retries));
            }
            queue.sort(|candidate| visible.contains(candidate));

            let mut previous: Option<OrderKey> = None;
            while let Some(next) = queue.pop_front() {
                let key = order_key(&next, visible.contains(&next.id));
                if let Some(prev) = previous {
                    prop_assert!(prev < key);
                }
                previous = Some(key);
            }
        }
    }
}

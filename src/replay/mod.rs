//! Replay subsystem (component H): a concurrent registry of in-flight
//! `ResponseReplay` duplicates, keyed by `message_id`, drained by a
//! private loopback HTTP server (`replay::server`).
//!
//! The registry uses `dashmap` for the lock-free concurrent map the
//! concurrency model calls for (§5: "Replays map: lock-free concurrent
//! map keyed by message_id"); this is new relative to the teacher, which
//! has no replay concept at all, and is grounded in the same crate the
//! `cursor-proxy` reference example already depends on for its connection
//! registries.

pub mod server;

use bytes::Bytes;
use dashmap::DashMap;
use hyper::{HeaderMap, StatusCode};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// A real-time duplicate of an upstream response, served from the
/// loopback replay endpoint.
pub struct ResponseReplay {
    pub message_id: u32,
    pub status: StatusCode,
    pub headers: HeaderMap,
    queue: Mutex<VecDeque<Bytes>>,
    queued_bytes: AtomicUsize,
    pub body_complete: AtomicBool,
    pub replay_aborted: AtomicBool,
    pub source_aborted: AtomicBool,
    max_buffer_bytes: usize,
}

impl ResponseReplay {
    pub fn new(message_id: u32, status: StatusCode, headers: HeaderMap, max_buffer_bytes: usize) -> Self {
        Self {
            message_id,
            status,
            headers,
            queue: Mutex::new(VecDeque::new()),
            queued_bytes: AtomicUsize::new(0),
            body_complete: AtomicBool::new(false),
            replay_aborted: AtomicBool::new(false),
            source_aborted: AtomicBool::new(false),
            max_buffer_bytes,
        }
    }

    /// Enqueues a chunk duplicated from the live upstream response.
    /// Returns `false` (the spec's `WriteBodyBytes` failure) when doing
    /// so would exceed `max_buffer_bytes`; the caller is expected to
    /// abandon the replay in that case.
    pub fn push_chunk(&self, chunk: Bytes) -> bool {
        let mut queue = self.queue.lock().unwrap();
        let projected = self.queued_bytes.load(Ordering::Acquire) + chunk.len();
        if projected > self.max_buffer_bytes {
            return false;
        }
        self.queued_bytes.store(projected, Ordering::Release);
        queue.push_back(chunk);
        true
    }

    pub fn pop_chunk(&self) -> Option<Bytes> {
        let mut queue = self.queue.lock().unwrap();
        let chunk = queue.pop_front();
        if let Some(ref c) = chunk {
            self.queued_bytes.fetch_sub(c.len(), Ordering::AcqRel);
        }
        chunk
    }

    pub fn queue_is_empty(&self) -> bool {
        self.queue.lock().unwrap().is_empty()
    }

    pub fn queued_byte_count(&self) -> usize {
        self.queued_bytes.load(Ordering::Acquire)
    }

    pub fn mark_body_complete(&self) {
        self.body_complete.store(true, Ordering::Release);
    }

    pub fn abort_replay(&self) {
        self.replay_aborted.store(true, Ordering::Release);
    }

    pub fn abort_source(&self) {
        self.source_aborted.store(true, Ordering::Release);
    }

    /// The per-request serving condition: stop immediately on
    /// `replay_aborted`, or once the source is complete/aborted and the
    /// queue has been drained.
    pub fn should_stop_serving(&self) -> bool {
        self.replay_aborted.load(Ordering::Acquire)
            || ((self.body_complete.load(Ordering::Acquire) || self.source_aborted.load(Ordering::Acquire))
                && self.queue_is_empty())
    }

    /// The orphan-pruner condition: any terminal flag plus a drained
    /// queue means this entry can be removed from the registry.
    pub fn is_prunable(&self) -> bool {
        (self.body_complete.load(Ordering::Acquire)
            || self.replay_aborted.load(Ordering::Acquire)
            || self.source_aborted.load(Ordering::Acquire))
            && self.queue_is_empty()
    }
}

/// Lock-free concurrent registry of in-flight replays, and the private
/// port they are served from.
pub struct ReplayRegistry {
    map: DashMap<u32, Arc<ResponseReplay>>,
    max_buffer_bytes: usize,
    private_addr: std::sync::OnceLock<std::net::SocketAddr>,
}

impl ReplayRegistry {
    pub fn new(max_buffer_bytes: usize) -> Arc<Self> {
        Arc::new(Self {
            map: DashMap::new(),
            max_buffer_bytes,
            private_addr: std::sync::OnceLock::new(),
        })
    }

    pub fn set_private_addr(&self, addr: std::net::SocketAddr) {
        let _ = self.private_addr.set(addr);
    }

    pub fn max_buffer_bytes(&self) -> usize {
        self.max_buffer_bytes
    }

    pub fn create(&self, message_id: u32, status: StatusCode, headers: HeaderMap) -> Arc<ResponseReplay> {
        let replay = Arc::new(ResponseReplay::new(message_id, status, headers, self.max_buffer_bytes));
        self.map.insert(message_id, replay.clone());
        replay
    }

    /// Atomically removes and returns the replay matching `message_id`,
    /// as the replay handler factory does on request arrival.
    pub fn take(&self, message_id: u32) -> Option<Arc<ResponseReplay>> {
        self.map.remove(&message_id).map(|(_, v)| v)
    }

    pub fn remove(&self, message_id: u32) {
        self.map.remove(&message_id);
    }

    /// Removes every prunable entry. Intended to run on a fixed interval
    /// (default one minute) from the lifecycle controller.
    pub fn sweep_once(&self) -> usize {
        let prunable: Vec<u32> = self
            .map
            .iter()
            .filter(|entry| entry.value().is_prunable())
            .map(|entry| *entry.key())
            .collect();
        for id in &prunable {
            self.map.remove(id);
        }
        prunable.len()
    }

    pub fn replay_url(&self, message_id: u32) -> Option<String> {
        self.private_addr
            .get()
            .map(|addr| format!("http://{addr}/replay/{message_id}"))
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn replay(max: usize) -> ResponseReplay {
        ResponseReplay::new(1, StatusCode::OK, HeaderMap::new(), max)
    }

    #[test]
    fn push_chunk_rejects_once_over_budget() {
        let replay = replay(10);
        assert!(replay.push_chunk(Bytes::from_static(b"12345")));
        assert!(replay.push_chunk(Bytes::from_static(b"12345")));
        assert!(!replay.push_chunk(Bytes::from_static(b"1")));
        assert_eq!(replay.queued_byte_count(), 10);
    }

    #[test]
    fn prunable_only_once_a_terminal_flag_is_set_and_queue_drained() {
        let replay = replay(100);
        replay.push_chunk(Bytes::from_static(b"x"));
        assert!(!replay.is_prunable());

        replay.mark_body_complete();
        assert!(!replay.is_prunable(), "queue still has data");

        replay.pop_chunk();
        assert!(replay.is_prunable());
    }

    #[test]
    fn replay_aborted_stops_serving_even_with_queued_bytes() {
        let replay = replay(100);
        replay.push_chunk(Bytes::from_static(b"still here"));
        replay.abort_replay();
        assert!(replay.should_stop_serving());
    }

    #[test]
    fn registry_take_removes_entry_exactly_once() {
        let registry = ReplayRegistry::new(100);
        registry.create(42, StatusCode::OK, HeaderMap::new());
        assert_eq!(registry.len(), 1);
        assert!(registry.take(42).is_some());
        assert!(registry.take(42).is_none());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn sweep_removes_only_prunable_entries() {
        let registry = ReplayRegistry::new(100);
        let live = registry.create(1, StatusCode::OK, HeaderMap::new());
        live.push_chunk(Bytes::from_static(b"still streaming"));
        let done = registry.create(2, StatusCode::OK, HeaderMap::new());
        done.mark_body_complete();

        let removed = registry.sweep_once();
        assert_eq!(removed, 1);
        assert_eq!(registry.len(), 1);
        assert!(registry.take(1).is_some());
    }

    #[test]
    fn replay_url_uses_configured_private_addr() {
        let registry = ReplayRegistry::new(100);
        registry.set_private_addr("127.0.0.1:9999".parse().unwrap());
        registry.create(7, StatusCode::OK, HeaderMap::new());
        assert_eq!(
            registry.replay_url(7).unwrap(),
            "http://127.0.0.1:9999/replay/7"
        );
    }
}

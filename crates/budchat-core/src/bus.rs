// Streaming bus
//
// High-frequency deltas (hundreds per second per turn) must not force a
// durable-state commit each. The bus buffers them in memory, keyed by
// (event id, segment kind), and tells writers how often to flush based on
// accumulated size. It is an explicitly created, injectable registry scoped
// to the orchestrator that owns it - never ambient global state.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::watch;
use uuid::Uuid;

/// Which stream of deltas a buffer holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferKind {
    /// Plain answer text
    Text,
    /// Reasoning-part text
    Reasoning,
    /// Raw tool-argument text
    ToolArgs,
    /// Generated code from the code interpreter
    Code,
}

/// Key of one delta buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferKey {
    pub event_id: Uuid,
    pub kind: BufferKind,
}

impl BufferKey {
    pub fn new(event_id: Uuid, kind: BufferKind) -> Self {
        Self { event_id, kind }
    }
}

struct DeltaBuffer {
    content: String,
    /// Offset of the last drained byte; writers and the finalizer agree on
    /// this single offset so finalization never double-appends
    consumed: usize,
    committed: watch::Sender<usize>,
}

impl DeltaBuffer {
    fn new() -> Self {
        let (committed, _) = watch::channel(0);
        Self {
            content: String::new(),
            consumed: 0,
            committed,
        }
    }
}

/// In-memory, per-event delta buffering with adaptive flush throttling
#[derive(Default)]
pub struct StreamBus {
    buffers: Mutex<HashMap<BufferKey, DeltaBuffer>>,
}

impl StreamBus {
    pub fn new() -> Self {
        Self {
            buffers: Mutex::new(HashMap::new()),
        }
    }

    /// Append a delta, creating the buffer implicitly on first write
    pub fn append(&self, key: BufferKey, delta: &str) {
        let mut buffers = self.buffers.lock().expect("bus lock poisoned");
        let buffer = buffers.entry(key).or_insert_with(DeltaBuffer::new);
        buffer.content.push_str(delta);
        let len = buffer.content.len();
        let _ = buffer.committed.send(len);
    }

    /// Consistent snapshot of the full buffered content
    pub fn snapshot(&self, key: BufferKey) -> String {
        let buffers = self.buffers.lock().expect("bus lock poisoned");
        buffers
            .get(&key)
            .map(|b| b.content.clone())
            .unwrap_or_default()
    }

    /// Text appended since the last drain, advancing the consumed offset
    ///
    /// A second drain with no intervening write yields an empty delta.
    pub fn drain(&self, key: BufferKey) -> String {
        let mut buffers = self.buffers.lock().expect("bus lock poisoned");
        match buffers.get_mut(&key) {
            Some(buffer) => {
                let delta = buffer.content[buffer.consumed..].to_string();
                buffer.consumed = buffer.content.len();
                delta
            }
            None => String::new(),
        }
    }

    /// Watch the committed length of a buffer; any number of observers
    pub fn subscribe(&self, key: BufferKey) -> watch::Receiver<usize> {
        let mut buffers = self.buffers.lock().expect("bus lock poisoned");
        buffers
            .entry(key)
            .or_insert_with(DeltaBuffer::new)
            .committed
            .subscribe()
    }

    /// Accumulated length of a buffer
    pub fn len(&self, key: BufferKey) -> usize {
        let buffers = self.buffers.lock().expect("bus lock poisoned");
        buffers.get(&key).map(|b| b.content.len()).unwrap_or(0)
    }

    pub fn is_empty(&self, key: BufferKey) -> bool {
        self.len(key) == 0
    }

    /// Number of live buffers across every event
    pub fn buffer_count(&self) -> usize {
        self.buffers.lock().expect("bus lock poisoned").len()
    }

    /// Flush interval for a buffer, adapting to accumulated size
    ///
    /// ~60 notifications/sec while output is short, stepping down to ~5/sec
    /// once accumulated text passes tens of kilobytes - perceived latency
    /// traded against rendering cost as output grows.
    pub fn flush_interval(&self, key: BufferKey) -> Duration {
        match self.len(key) {
            0..=16_383 => Duration::from_millis(16),
            16_384..=49_151 => Duration::from_millis(50),
            49_152..=98_303 => Duration::from_millis(100),
            _ => Duration::from_millis(200),
        }
    }

    /// Release every buffer owned by an event
    ///
    /// Called only after the draft event is finalized and merged into
    /// durable state.
    pub fn clear_event(&self, event_id: Uuid) {
        let mut buffers = self.buffers.lock().expect("bus lock poisoned");
        buffers.retain(|key, _| key.event_id != event_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> BufferKey {
        BufferKey::new(Uuid::now_v7(), BufferKind::Text)
    }

    #[test]
    fn drain_twice_yields_empty_second_delta() {
        let bus = StreamBus::new();
        let key = key();
        bus.append(key, "hello ");
        bus.append(key, "world");

        assert_eq!(bus.drain(key), "hello world");
        assert_eq!(bus.drain(key), "");

        bus.append(key, "!");
        assert_eq!(bus.drain(key), "!");
    }

    #[test]
    fn snapshot_does_not_advance_the_offset() {
        let bus = StreamBus::new();
        let key = key();
        bus.append(key, "abc");
        assert_eq!(bus.snapshot(key), "abc");
        assert_eq!(bus.drain(key), "abc");
        assert_eq!(bus.snapshot(key), "abc");
    }

    #[test]
    fn buffers_are_isolated_by_kind() {
        let bus = StreamBus::new();
        let event_id = Uuid::now_v7();
        bus.append(BufferKey::new(event_id, BufferKind::Text), "answer");
        bus.append(BufferKey::new(event_id, BufferKind::Reasoning), "thought");

        assert_eq!(bus.drain(BufferKey::new(event_id, BufferKind::Text)), "answer");
        assert_eq!(
            bus.drain(BufferKey::new(event_id, BufferKind::Reasoning)),
            "thought"
        );
    }

    #[test]
    fn flush_interval_degrades_with_size() {
        let bus = StreamBus::new();
        let key = key();
        bus.append(key, "short");
        let fast = bus.flush_interval(key);

        bus.append(key, &"x".repeat(120_000));
        let slow = bus.flush_interval(key);

        assert_eq!(fast, Duration::from_millis(16));
        assert_eq!(slow, Duration::from_millis(200));
    }

    #[test]
    fn clear_event_releases_all_kinds() {
        let bus = StreamBus::new();
        let event_id = Uuid::now_v7();
        bus.append(BufferKey::new(event_id, BufferKind::Text), "a");
        bus.append(BufferKey::new(event_id, BufferKind::ToolArgs), "b");

        bus.clear_event(event_id);
        assert!(bus.is_empty(BufferKey::new(event_id, BufferKind::Text)));
        assert!(bus.is_empty(BufferKey::new(event_id, BufferKind::ToolArgs)));
        assert_eq!(bus.buffer_count(), 0);
    }

    #[tokio::test]
    async fn subscribers_observe_committed_length() {
        let bus = StreamBus::new();
        let key = key();
        let mut rx = bus.subscribe(key);
        assert_eq!(*rx.borrow(), 0);

        bus.append(key, "12345");
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), 5);
    }
}

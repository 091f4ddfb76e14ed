//! Shared relay state joining one ingest stream to at most one egress
//! consumer.
//!
//! The two sides meet only here: a single-slot handoff channel for live
//! video tags, three cached bootstrap buffers (file header, metadata tag,
//! initial video tag), and the admission guards. Each admission guard is a
//! single compare-and-swap, so exactly one stream per side can ever be
//! active.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use tokio::sync::mpsc;

/// Consumer slot states.
const CONSUMER_FREE: i32 = 0;
const CONSUMER_ATTACHED: i32 = 1;
const CONSUMER_DRAINING: i32 = -1;

pub struct RelaySession {
    producer: AtomicBool,
    consumer: AtomicI32,
    need_keyframe: AtomicBool,
    header: Mutex<Option<Vec<u8>>>,
    metadata: Mutex<Option<Vec<u8>>>,
    first_video: Mutex<Option<Vec<u8>>>,
    tx: mpsc::Sender<Vec<u8>>,
    rx: tokio::sync::Mutex<mpsc::Receiver<Vec<u8>>>,
}

impl RelaySession {
    pub fn new() -> Self {
        // Capacity one: the slot is the backpressure mechanism. A fast
        // encoder blocks here until the egress side drains it.
        let (tx, rx) = mpsc::channel(1);
        Self {
            producer: AtomicBool::new(false),
            consumer: AtomicI32::new(CONSUMER_FREE),
            need_keyframe: AtomicBool::new(false),
            header: Mutex::new(None),
            metadata: Mutex::new(None),
            first_video: Mutex::new(None),
            tx,
            rx: tokio::sync::Mutex::new(rx),
        }
    }

    // ---- admission guards -------------------------------------------------

    pub fn try_acquire_producer(&self) -> bool {
        self.producer
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn release_producer(&self) {
        self.producer.store(false, Ordering::Release);
    }

    pub fn producer_active(&self) -> bool {
        self.producer.load(Ordering::Acquire)
    }

    pub fn try_acquire_consumer(&self) -> bool {
        self.consumer
            .compare_exchange(
                CONSUMER_FREE,
                CONSUMER_ATTACHED,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Marks the consumer as detaching; sends targeting it stop, but the
    /// slot is not yet reusable until [`release_consumer`](Self::release_consumer).
    pub fn begin_drain(&self) {
        self.consumer.store(CONSUMER_DRAINING, Ordering::Release);
    }

    pub fn release_consumer(&self) {
        self.consumer.store(CONSUMER_FREE, Ordering::Release);
    }

    pub fn consumer_attached(&self) -> bool {
        self.consumer.load(Ordering::Acquire) == CONSUMER_ATTACHED
    }

    // ---- keyframe gating --------------------------------------------------

    /// Requests that the next forwarded live tag be a keyframe.
    pub fn request_keyframe(&self) {
        self.need_keyframe.store(true, Ordering::Release);
    }

    pub fn keyframe_needed(&self) -> bool {
        self.need_keyframe.load(Ordering::Acquire)
    }

    pub fn clear_keyframe_needed(&self) {
        self.need_keyframe.store(false, Ordering::Release);
    }

    // ---- bootstrap caches -------------------------------------------------

    pub fn store_header(&self, header: Vec<u8>) {
        *self.header.lock().unwrap() = Some(header);
    }

    pub fn store_metadata(&self, tag: Vec<u8>) {
        *self.metadata.lock().unwrap() = Some(tag);
    }

    pub fn store_first_video(&self, tag: Vec<u8>) {
        *self.first_video.lock().unwrap() = Some(tag);
    }

    pub fn cached_header(&self) -> Option<Vec<u8>> {
        self.header.lock().unwrap().clone()
    }

    pub fn cached_metadata(&self) -> Option<Vec<u8>> {
        self.metadata.lock().unwrap().clone()
    }

    pub fn cached_first_video(&self) -> Option<Vec<u8>> {
        self.first_video.lock().unwrap().clone()
    }

    /// True once the ingest side has cached all three bootstrap buffers.
    pub fn is_bootstrapped(&self) -> bool {
        self.cached_header().is_some()
            && self.cached_metadata().is_some()
            && self.cached_first_video().is_some()
    }

    // ---- handoff ----------------------------------------------------------

    /// Hands a live tag to the egress side.
    ///
    /// Blocks while the slot is full; this is the intended backpressure on
    /// the upstream encoder. The receiver lives as long as the session, so
    /// the send itself cannot fail.
    pub(crate) async fn offer(&self, tag: Vec<u8>) {
        let _ = self.tx.send(tag).await;
    }

    /// Exclusive access to the receiving side of the handoff slot.
    ///
    /// The egress consumer holds this guard for its whole session,
    /// including the final drain.
    pub(crate) async fn lock_receiver(&self) -> tokio::sync::MutexGuard<'_, mpsc::Receiver<Vec<u8>>> {
        self.rx.lock().await
    }
}

impl Default for RelaySession {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn producer_admission_is_exclusive() {
        let session = RelaySession::new();
        assert!(session.try_acquire_producer());
        assert!(!session.try_acquire_producer());
        session.release_producer();
        assert!(session.try_acquire_producer());
    }

    #[test]
    fn consumer_admission_is_exclusive_and_draining_blocks_reuse() {
        let session = RelaySession::new();
        assert!(session.try_acquire_consumer());
        assert!(!session.try_acquire_consumer());

        // Draining is not "free": a new consumer must wait for the release
        session.begin_drain();
        assert!(!session.try_acquire_consumer());
        assert!(!session.consumer_attached());

        session.release_consumer();
        assert!(session.try_acquire_consumer());
    }

    #[test]
    fn bootstrap_requires_all_three_buffers() {
        let session = RelaySession::new();
        assert!(!session.is_bootstrapped());
        session.store_header(vec![0; 9]);
        session.store_metadata(vec![18]);
        assert!(!session.is_bootstrapped());
        session.store_first_video(vec![9]);
        assert!(session.is_bootstrapped());
    }
}

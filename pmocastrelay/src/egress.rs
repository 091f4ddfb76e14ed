//! Egress side of the relay: replays the bootstrap buffers to a newly
//! attached consumer, then forwards live tags with rebased timestamps.

use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::errors::RelayError;
use crate::flv::{set_tag_timestamp, tag_timestamp};
use crate::session::RelaySession;

/// Wait applied when draining the handoff slot after a disconnect.
///
/// The slot has no slack; a producer can be parked mid-send when the
/// consumer goes away, and this drain is what unblocks it.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Claims the single consumer slot.
///
/// On success the caller *must* follow up with
/// [`run_attached`] (typically spawned), which releases the slot when the
/// session ends.
pub fn try_attach(session: &RelaySession) -> Result<(), RelayError> {
    if !session.producer_active() {
        warn!("Rejecting egress consumer: no ingest stream active");
        return Err(RelayError::NoIngest);
    }
    if !session.try_acquire_consumer() {
        warn!("Rejecting egress consumer: a consumer is already attached");
        return Err(RelayError::EgressBusy);
    }
    Ok(())
}

/// Runs one egress session, writing FLV chunks into `sink` until the
/// consumer disconnects (observed as the sink closing).
///
/// Only one consumer may be attached at a time; a second concurrent call is
/// rejected. The admission slot is freed after the disconnect drain.
pub async fn run_egress(
    session: &RelaySession,
    sink: mpsc::Sender<Bytes>,
) -> Result<(), RelayError> {
    try_attach(session)?;
    run_attached(session, sink).await
}

/// Egress session body; the consumer slot must already be held via
/// [`try_attach`].
pub async fn run_attached(
    session: &RelaySession,
    sink: mpsc::Sender<Bytes>,
) -> Result<(), RelayError> {
    let mut rx = session.lock_receiver().await;

    // A tag can be left in the slot by the drain race of a previous
    // session; it belongs to no one now.
    while rx.try_recv().is_ok() {}

    let result = pump(session, &mut rx, &sink).await;

    // Disconnect cycle: stop accepting handoffs, unblock a producer that
    // may be parked mid-send, then free the slot.
    session.begin_drain();
    let _ = timeout(DRAIN_TIMEOUT, rx.recv()).await;
    drop(rx);
    session.release_consumer();

    debug!("Egress consumer detached");
    result
}

async fn pump(
    session: &RelaySession,
    rx: &mut mpsc::Receiver<Vec<u8>>,
    sink: &mpsc::Sender<Bytes>,
) -> Result<(), RelayError> {
    let header = session.cached_header().ok_or(RelayError::NoIngest)?;
    let metadata = session.cached_metadata().ok_or(RelayError::NoIngest)?;
    let mut first_video = session.cached_first_video().ok_or(RelayError::NoIngest)?;

    // Bootstrap: file header, zero previous-tag-size, metadata tag, then
    // the cached initial video tag pinned to timestamp zero.
    if !forward(sink, header).await {
        return Ok(());
    }
    let mut prev_tag_size = 0u32;
    if !forward(sink, prev_tag_size.to_be_bytes().to_vec()).await {
        return Ok(());
    }
    prev_tag_size = metadata.len() as u32;
    if !forward(sink, metadata).await {
        return Ok(());
    }
    if !forward(sink, prev_tag_size.to_be_bytes().to_vec()).await {
        return Ok(());
    }
    set_tag_timestamp(&mut first_video, 0);
    prev_tag_size = first_video.len() as u32;
    if !forward(sink, first_video).await {
        return Ok(());
    }

    // The consumer starts decoding from the bootstrap tag; the first live
    // tag it sees must be a keyframe.
    session.request_keyframe();

    let mut base_timestamp: Option<u32> = None;

    loop {
        tokio::select! {
            received = rx.recv() => {
                let Some(mut tag) = received else {
                    return Ok(());
                };

                if !forward(sink, prev_tag_size.to_be_bytes().to_vec()).await {
                    return Ok(());
                }

                // Rebase so the egress clock starts at zero regardless of
                // the ingest stream's absolute clock. The rewrite happens
                // on this side's owned copy of the tag.
                let timestamp = tag_timestamp(&tag);
                let base = *base_timestamp.get_or_insert(timestamp);
                set_tag_timestamp(&mut tag, timestamp.saturating_sub(base));

                prev_tag_size = tag.len() as u32;
                if !forward(sink, tag).await {
                    return Ok(());
                }
            }
            _ = sink.closed() => {
                return Ok(());
            }
        }
    }
}

/// Sends one chunk downstream; false means the consumer disconnected.
///
/// Each chunk is flushed to the transport as its own frame, so a live
/// consumer never waits on output buffering.
async fn forward(sink: &mpsc::Sender<Bytes>, data: Vec<u8>) -> bool {
    sink.send(Bytes::from(data)).await.is_ok()
}

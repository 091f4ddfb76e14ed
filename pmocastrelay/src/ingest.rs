//! Ingest side of the relay: parses the incoming FLV byte stream and feeds
//! the handoff slot.

use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, warn};

use crate::errors::RelayError;
use crate::flv::{
    FILE_HEADER_LEN, PREV_TAG_SIZE_LEN, TAG_HEADER_LEN, TAG_TYPE_SCRIPT, TAG_TYPE_VIDEO,
    is_keyframe, read_u24_be,
};
use crate::session::RelaySession;

/// Parser states, in stream order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IngestState {
    /// Expecting the 9-byte FLV file header.
    FileHeader,
    /// Expecting the script (metadata) tag.
    MetadataTag,
    /// Expecting the first video tag, cached as the bootstrap keyframe
    /// reference.
    FirstVideoTag,
    /// Relaying live video tags.
    Streaming,
}

/// Releases the producer slot even when the ingest future is dropped
/// mid-read (the transport side can drop it on client disconnect).
struct ProducerGuard<'a>(&'a RelaySession);

impl Drop for ProducerGuard<'_> {
    fn drop(&mut self) {
        self.0.release_producer();
    }
}

/// Runs one ingest stream to completion.
///
/// Only one ingest stream may be active: a concurrent call is rejected with
/// `IngestBusy` without disturbing the active one. The admission slot is
/// released when the stream ends, normally or not.
pub async fn run_ingest<R>(session: &RelaySession, reader: R) -> Result<(), RelayError>
where
    R: AsyncRead + Unpin,
{
    if !session.try_acquire_producer() {
        warn!("Rejecting ingest stream: a producer is already connected");
        return Err(RelayError::IngestBusy);
    }
    let _guard = ProducerGuard(session);

    let result = pump(session, reader).await;

    if let Err(e) = &result {
        warn!("Ingest stream terminated: {}", e);
    } else {
        debug!("Ingest stream ended");
    }
    result
}

async fn pump<R>(session: &RelaySession, mut reader: R) -> Result<(), RelayError>
where
    R: AsyncRead + Unpin,
{
    let mut state = IngestState::FileHeader;

    loop {
        match state {
            IngestState::FileHeader => {
                let mut header = [0u8; FILE_HEADER_LEN];
                reader.read_exact(&mut header).await?;
                session.store_header(header.to_vec());
                state = IngestState::MetadataTag;
            }
            IngestState::MetadataTag => {
                let tag = read_tag(&mut reader, TAG_TYPE_SCRIPT, "script").await?;
                session.store_metadata(tag);
                state = IngestState::FirstVideoTag;
            }
            IngestState::FirstVideoTag => {
                let tag = read_tag(&mut reader, TAG_TYPE_VIDEO, "video").await?;
                session.store_first_video(tag);
                state = IngestState::Streaming;
            }
            IngestState::Streaming => {
                let tag = match read_tag(&mut reader, TAG_TYPE_VIDEO, "video").await {
                    Ok(tag) => tag,
                    // The encoder closing the stream between tags is the
                    // normal way an ingest session ends.
                    Err(e) if e.is_eof() => return Ok(()),
                    Err(e) => return Err(e),
                };

                if session.consumer_attached() {
                    let keyframe = is_keyframe(&tag);
                    if session.keyframe_needed() && !keyframe {
                        // Withheld: the consumer cannot decode mid-GOP
                        continue;
                    }
                    session.clear_keyframe_needed();
                    session.offer(tag).await;
                }
                // No consumer attached: the tag is dropped, never buffered
            }
        }
    }
}

/// Reads one framed tag (previous-tag-size prefix + tag header + payload)
/// and returns the assembled tag without the prefix.
async fn read_tag<R>(
    reader: &mut R,
    expected_type: u8,
    expected_name: &'static str,
) -> Result<Vec<u8>, RelayError>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; PREV_TAG_SIZE_LEN + TAG_HEADER_LEN];
    reader.read_exact(&mut prefix).await?;

    let header = &prefix[PREV_TAG_SIZE_LEN..];
    if header[0] != expected_type {
        return Err(RelayError::UnexpectedTagType {
            expected: expected_name,
            actual: header[0],
        });
    }

    let payload_len = read_u24_be(&header[1..4]) as usize;
    let mut tag = vec![0u8; TAG_HEADER_LEN + payload_len];
    tag[..TAG_HEADER_LEN].copy_from_slice(header);
    reader.read_exact(&mut tag[TAG_HEADER_LEN..]).await?;

    Ok(tag)
}

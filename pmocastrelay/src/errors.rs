use std::io;

#[derive(thiserror::Error, Debug)]
pub enum RelayError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("expected {expected} tag, got tag type {actual}")]
    UnexpectedTagType { expected: &'static str, actual: u8 },
    #[error("an ingest stream is already connected")]
    IngestBusy,
    #[error("no ingest stream is active")]
    NoIngest,
    #[error("an egress consumer is already attached")]
    EgressBusy,
}

impl RelayError {
    /// True when the underlying cause is the stream simply ending.
    pub fn is_eof(&self) -> bool {
        matches!(self, RelayError::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof)
    }
}

use thiserror::Error;

use crate::status::CastStatus;

#[derive(Error, Debug)]
pub enum CastError {
    #[error("operation not allowed in state {0:?}")]
    StateConflict(CastStatus),
    #[error("no such device: {0}")]
    DeviceNotFound(String),
    #[error("no device selected")]
    NoDeviceSelected,
    #[error("control call failed: {0}")]
    Control(#[from] pmocastupnp::UpnpError),
    #[error("failed to start encoder '{0}': {1}")]
    EncoderSpawn(String, String),
    #[error("screen capture is not supported on this platform ({0})")]
    UnsupportedPlatform(&'static str),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{role} task failed: {details}")]
    TaskJoin { role: &'static str, details: String },
}

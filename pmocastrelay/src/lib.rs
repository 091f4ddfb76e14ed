//! # pmocastrelay — live FLV relay for PMOCast
//!
//! Repackages an incoming FLV byte stream (the screen-capture encoder's
//! output) into an outgoing FLV stream a renderer can start playing
//! mid-session:
//!
//! - [`flv`] : framing primitives (tag layout, 24-bit fields, keyframe probe)
//! - [`session`] : the shared single-producer/single-consumer state
//! - [`ingest`] : strict parser state machine over the incoming stream
//! - [`egress`] : bootstrap replay + timestamp-rebased live forwarding
//!
//! The handoff between the two sides is a single slot: a fast encoder
//! cannot run ahead of a slow consumer, and an absent consumer costs
//! nothing (tags are dropped, not buffered).

pub mod egress;
pub mod errors;
pub mod flv;
pub mod ingest;
pub mod session;

pub use egress::{DRAIN_TIMEOUT, run_attached, run_egress, try_attach};
pub use errors::RelayError;
pub use ingest::run_ingest;
pub use session::RelaySession;

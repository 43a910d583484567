//! Partial-I/O buffering core for a non-blocking MQTT client transport.
//!
//! A non-blocking socket read or write can return having moved fewer bytes
//! than asked for at any point, including in the middle of a fixed header.
//! The types in this crate let a protocol layer built on top of such a
//! socket treat every read and write as if it always completed in full, by
//! caching whatever partial progress was made and handing it back on the
//! next call for the same socket.
//!
//! - [`inbound::InboundBuffer`] caches partially read inbound data.
//! - [`outbound::OutboundBuffer`] queues partially written outbound data as
//!   scatter/gather segments.
//! - [`trace::CallStackTrace`] is an unrelated diagnostic utility used to
//!   recover a thread's call stack in a crash or hang report without
//!   depending on platform unwind support.
//!
//! Neither `InboundBuffer` nor `OutboundBuffer` is internally synchronized:
//! both assume the caller already serializes access per socket through
//! whatever mutex protects its entry in the surrounding socket table.
//! `CallStackTrace` is the exception -- it's designed to be queried from a
//! different thread than the one whose stack it's recording, so it
//! synchronizes itself.

pub mod mqttbuf;

pub use crate::mqttbuf::common::{Error, ErrorKind, Result};
pub use crate::mqttbuf::config::BufferConfig;
pub use crate::mqttbuf::inbound::{CharStatus, InboundBuffer, SocketId};
pub use crate::mqttbuf::outbound::OutboundBuffer;
pub use crate::mqttbuf::trace::CallStackTrace;
pub use crate::mqttbuf::SocketBuffers;

use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Installs a global `tracing` subscriber that writes to stdout at `max_level`.
///
/// Host applications embedding this crate are free to install their own
/// subscriber instead; this is provided for binaries and examples that have
/// no tracing setup of their own yet.
pub fn init_tracing(max_level: Level) {
    let subscriber = FmtSubscriber::builder().with_max_level(max_level).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");
}

use std::io;
use thiserror::Error;

/// The errors this crate surfaces to callers.
///
/// Construction failures are fatal to the component they occur in. Runtime
///  per-fragment conditions (malformed headers, duplicates, a full reassembly
///  table, transient send errors) are absorbed to keep the stream alive and
///  never appear here - the end-user failure mode of this transport is silent
///  frame loss, detectable through frame-id gaps or payload verification.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to set up UDP socket")]
    SocketInit(#[source] io::Error),

    #[error("failed to bind UDP port {port}")]
    BindFailed {
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("invalid destination address '{addr}'")]
    InvalidAddress { addr: String },

    #[error("frame of {size} bytes exceeds the protocol limit")]
    FrameTooLarge { size: u64 },

    #[error("fatal socket error while sending frame {frame_id}")]
    SendFailed {
        frame_id: u32,
        #[source]
        source: io::Error,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

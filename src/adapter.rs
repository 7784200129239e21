//! Fixed-size frame adapters for dataflow runtimes.
//!
//! Dataflow runtimes move buffers of a size fixed per task instance, once
//!  per invocation. These adapters bridge that calling convention to the
//!  variable-length [`UdpSink`]/[`UdpSource`] pair: the sink side forwards
//!  exactly the task's buffer, the source side fits whatever arrived into
//!  the task's buffer, zero-padding or truncating as needed.
//!
//! Neither adapter is `Clone`: a cloned sink would interleave two frame-id
//!  sequences towards one destination, and a cloned source would have to
//!  bind an already-bound port.

use std::net::SocketAddr;
use std::time::Duration;

use tracing::warn;

use crate::config::{SinkConfig, SourceConfig};
use crate::error::TransportError;
use crate::sink::UdpSink;
use crate::source::UdpSource;

pub struct SinkAdapter {
    sink: UdpSink,
    frame_size: usize,
}

impl SinkAdapter {
    pub fn new(frame_size: usize, config: SinkConfig) -> Result<SinkAdapter, TransportError> {
        Ok(SinkAdapter { sink: UdpSink::new(config)?, frame_size })
    }

    /// Sends the task's buffer as one frame. The runtime hands over buffers
    ///  of at least `frame_size` bytes; exactly that many go on the wire.
    pub fn send(&mut self, in_data: &[u8]) -> Result<(), TransportError> {
        self.sink.send_frame(&in_data[..self.frame_size])
    }
}

pub struct SourceAdapter {
    source: UdpSource,
    frame_size: usize,
    pop_timeout: Option<Duration>,
}

impl SourceAdapter {
    /// Binds the port and starts the receive thread; `Drop` stops it.
    ///
    /// `pop_timeout_ms` follows the runtime's convention: negative waits
    ///  indefinitely, zero polls, positive bounds the wait.
    pub fn new(
        frame_size: usize,
        config: SourceConfig,
        pop_timeout_ms: i32,
    ) -> Result<SourceAdapter, TransportError> {
        let source = UdpSource::new(config)?;
        source.start();
        Ok(SourceAdapter {
            source,
            frame_size,
            pop_timeout: pop_timeout(pop_timeout_ms),
        })
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.source.local_addr()
    }

    /// Fills the task's buffer with the next received frame.
    ///
    /// On timeout (or after shutdown) the buffer is zero-filled so the
    ///  downstream task never sees stale data. A received frame smaller than
    ///  `frame_size` is zero-padded; a larger one is truncated, which loses
    ///  data and is therefore logged.
    pub fn generate(&mut self, out_data: &mut [u8]) {
        let out = &mut out_data[..self.frame_size];
        match self.source.pop_frame(self.pop_timeout) {
            None => out.fill(0),
            Some(frame) => {
                if frame.len() > out.len() {
                    warn!(
                        "received frame of {} bytes does not fit the task buffer of {} bytes - truncating",
                        frame.len(),
                        out.len()
                    );
                }
                let copied = frame.len().min(out.len());
                out[..copied].copy_from_slice(&frame[..copied]);
                out[copied..].fill(0);
            }
        }
    }
}

impl Drop for SourceAdapter {
    fn drop(&mut self) {
        self.source.stop();
    }
}

fn pop_timeout(timeout_ms: i32) -> Option<Duration> {
    if timeout_ms < 0 {
        None
    } else {
        Some(Duration::from_millis(timeout_ms as u64))
    }
}

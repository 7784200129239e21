use std::time::Duration;

use crate::error::TransportError;
use crate::fragment_header::MAX_PAYLOAD;
use crate::mmsg;

/// Kernel socket buffer request for both roles. Large bursts of fragments
///  (a multi-megabyte frame is thousands of back-to-back datagrams) are
///  absorbed by the kernel buffer or dropped, so this errs on the large side.
///  The OS caps the request silently; on Linux the cap is
///  `net.core.rmem_max` / `net.core.wmem_max`.
const SOCKET_BUFFER_BYTES_DEFAULT: usize = 32 * 1024 * 1024;

/// Tuning for the receive-side reassembly table.
#[derive(Debug, Clone)]
pub struct ReassemblyConfig {
    /// Maximum number of frames that may be partially received at the same
    ///  time. One well-behaved sender needs very few (fragments of frame N
    ///  and N+1 interleave only at frame boundaries); the bound exists so a
    ///  lossy network or a misbehaving sender cannot grow the table without
    ///  limit.
    pub max_pending_frames: usize,

    /// A pending frame whose last fragment arrived longer ago than this is
    ///  considered dead and is evicted when the table needs room. Lost
    ///  fragments surface as frame loss through this timeout.
    pub frame_timeout: Duration,

    /// Ceiling on the reassembly buffer pre-allocated per admitted frame.
    ///
    /// The buffer is sized `total_frags * MAX_PAYLOAD` from the first
    ///  fragment's header, i.e. from attacker-controlled input; without a
    ///  ceiling a single forged datagram could request an allocation near
    ///  6 TB. Frames declaring more than this are dropped.
    pub max_frame_bytes: u64,
}

impl Default for ReassemblyConfig {
    fn default() -> ReassemblyConfig {
        ReassemblyConfig {
            max_pending_frames: 10,
            frame_timeout: Duration::from_millis(1000),
            max_frame_bytes: 1024 * 1024 * 1024,
        }
    }
}

impl ReassemblyConfig {
    pub fn validate(&self) -> Result<(), TransportError> {
        if self.max_pending_frames == 0 {
            return Err(TransportError::InvalidConfig(
                "max_pending_frames must be at least 1".to_owned(),
            ));
        }
        if self.max_frame_bytes < MAX_PAYLOAD as u64 {
            return Err(TransportError::InvalidConfig(format!(
                "max_frame_bytes must be at least one payload ({MAX_PAYLOAD} bytes)"
            )));
        }
        Ok(())
    }
}

/// Configuration of the transmit side.
#[derive(Debug, Clone)]
pub struct SinkConfig {
    /// IPv4 destination of every frame this sink sends.
    pub dest_ip: String,
    pub dest_port: u16,

    /// Kernel send buffer request, see [`SOCKET_BUFFER_BYTES_DEFAULT`].
    pub socket_buffer_bytes: usize,
}

impl SinkConfig {
    pub fn to(ip: &str, port: u16) -> SinkConfig {
        SinkConfig {
            dest_ip: ip.to_owned(),
            dest_port: port,
            socket_buffer_bytes: SOCKET_BUFFER_BYTES_DEFAULT,
        }
    }

    pub fn validate(&self) -> Result<(), TransportError> {
        if self.dest_port == 0 {
            return Err(TransportError::InvalidConfig(
                "destination port 0 is not routable".to_owned(),
            ));
        }
        Ok(())
    }
}

/// Configuration of the receive side.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    /// UDP port to listen on, on all interfaces. Port 0 lets the OS pick a
    ///  free port (query it through `local_addr`).
    pub listen_port: u16,

    /// Kernel receive buffer request, see [`SOCKET_BUFFER_BYTES_DEFAULT`].
    pub socket_buffer_bytes: usize,

    /// Datagrams read per batched receive syscall. 64 is a reasonable
    ///  latency/throughput trade-off; raising it mostly grows the
    ///  pre-allocated receive pool.
    pub recv_batch_size: usize,

    /// Socket-level receive timeout. A blocked read wakes at this interval
    ///  so the receive loop can recheck its running flag; it bounds how long
    ///  `stop()` may take.
    pub flag_recheck_interval: Duration,

    pub reassembly: ReassemblyConfig,
}

impl SourceConfig {
    pub fn on_port(port: u16) -> SourceConfig {
        SourceConfig {
            listen_port: port,
            socket_buffer_bytes: SOCKET_BUFFER_BYTES_DEFAULT,
            recv_batch_size: 64,
            flag_recheck_interval: Duration::from_millis(100),
            reassembly: ReassemblyConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<(), TransportError> {
        if self.recv_batch_size == 0 || self.recv_batch_size > mmsg::RECV_BATCH_MAX {
            return Err(TransportError::InvalidConfig(format!(
                "recv_batch_size must be between 1 and {}",
                mmsg::RECV_BATCH_MAX
            )));
        }
        if self.flag_recheck_interval.is_zero() {
            return Err(TransportError::InvalidConfig(
                "flag_recheck_interval must be non-zero (zero disables the socket timeout)"
                    .to_owned(),
            ));
        }
        self.reassembly.validate()
    }
}

use std::os::unix::io::AsRawFd;

use socket2::SockAddr;
use tracing::{error, trace};

use crate::config::SinkConfig;
use crate::error::TransportError;
use crate::mmsg;
use crate::packetizer::Packetizer;
use crate::socket::UdpEndpoint;

/// The transmit side: fragments one frame per call and pushes the fragments
///  to a preset destination through batched, vectored sends.
///
/// Frame ids are assigned from a monotonically increasing counter that wraps
///  after `u32::MAX` frames; receivers treat ids as opaque keys, so the wrap
///  is invisible to them.
///
/// A sink is single-owner by design: a clone would share the destination and
///  contend for the id sequence, so there is no `Clone`.
pub struct UdpSink {
    socket: UdpEndpoint,
    dest: SockAddr,
    packetizer: Packetizer,
    frame_counter: u32,
}

impl UdpSink {
    pub fn new(config: SinkConfig) -> Result<UdpSink, TransportError> {
        config.validate()?;

        let mut socket = UdpEndpoint::new(config.socket_buffer_bytes)?;
        socket.set_destination(&config.dest_ip, config.dest_port)?;
        let dest = SockAddr::from(
            socket
                .destination()
                .expect("this is a bug: the destination was just set"),
        );

        Ok(UdpSink {
            socket,
            dest,
            packetizer: Packetizer::new(),
            frame_counter: 0,
        })
    }

    /// Sends `frame` as one fragmented datagram burst. Synchronous: when the
    ///  call returns, every fragment has been handed to the kernel (the call
    ///  blocks while the kernel buffer is full). The borrow on `frame` keeps
    ///  the buffer stable for exactly as long as the scatter/gather
    ///  descriptors reference it.
    ///
    /// Transient send errors are retried internally; any other socket error
    ///  abandons the rest of the frame - there is no per-fragment recovery.
    pub fn send_frame(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        let frame_id = self.frame_counter;
        self.frame_counter = self.frame_counter.wrapping_add(1);

        let count = self.packetizer.prepare_frame(frame, frame_id)?;
        trace!("sending frame {} as {} fragments ({} bytes)", frame_id, count, frame.len());

        mmsg::send_fragments(
            self.socket.as_raw_fd(),
            &self.dest,
            self.packetizer.fragments(),
            frame,
        )
        .map_err(|source| {
            error!("abandoning frame {}: {}", frame_id, source);
            TransportError::SendFailed { frame_id, source }
        })
    }
}

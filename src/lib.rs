//! Transport for large application frames (images, tensors, signal-processing
//!  buffers - up to several megabytes each) over commodity IP networks, as a
//!  stream of fragmented UDP datagrams.
//!
//! The crate provides a pair of building blocks meant to be plugged into a
//!  dataflow runtime that moves one frame per task invocation:
//!
//! * [`sink::UdpSink`] fragments a frame into MTU-sized datagrams and
//!   submits them through batched, vectored sends - the payload is never
//!   copied on the transmit path
//! * [`source::UdpSource`] runs a background receive thread that reads
//!   datagram batches, reassembles frames that may arrive fragment-by-fragment
//!   in any order, and hands completed frames to consumers through a blocking
//!   queue
//!
//! ## Design goals
//!
//! * Maximise throughput for multi-megabyte frames on fast local networks
//!   * zero-copy scatter/gather on the transmit path: the kernel gathers
//!     each datagram from the locally-owned header and a slice of the
//!     caller's buffer
//!   * batched syscalls (`sendmmsg`/`recvmmsg`) amortise kernel entry over
//!     up to 64 datagrams
//!   * pre-allocated descriptor pools and receive slots - the steady-state
//!     hot path does not allocate
//! * Frames are self-contained; the protocol is strictly one-way
//!   * no retransmission, no ACKs, no flow control, no encryption
//!   * packet loss manifests as frame loss: a frame with a missing fragment
//!     is discarded by timeout, never delivered partially
//! * Bounded receiver state no matter how hostile the traffic
//!   * at most `max_pending_frames` frames under reassembly, stale frames
//!     evicted by timeout, per-frame allocation capped
//!
//! ## Wire format
//!
//! Each datagram is a 12-byte header followed by 0 to 1400 payload bytes
//!  (see [`fragment_header`]):
//!
//! ```ascii
//! 0:  frame_id    (u32 LE) - id of the frame this fragment belongs to
//! 4:  frag_index  (u32 LE) - position of the fragment within its frame
//! 8:  total_frags (u32 LE) - number of fragments in the frame
//! 12: payload     (0..=1400 bytes)
//! ```
//!
//! A frame of L bytes travels as `max(1, ceil(L / 1400))` datagrams; all
//!  fragments carry exactly 1400 payload bytes except the last, which
//!  carries the remainder - that short length is how the receiver learns the
//!  frame's exact size. There is no checksum beyond UDP's own.
//!
//! ## Ordering and delivery
//!
//! Within a frame, fragments may arrive in any order; the reassembler writes
//!  each one to its offset in a contiguous buffer. Across frames, completed
//!  frames surface in *completion* order, not frame-id order - consumers
//!  that need id order must sort, treating the 32-bit id as wrapping.
//!
//! ## Concurrency model
//!
//! One background OS thread per source; the output queue (mutex + condvar)
//!  and an atomic running flag are the only cross-thread state. The
//!  reassembler is owned by the receive thread, the packetizer by the sink's
//!  caller - neither is locked. Sinks and sources are deliberately
//!  single-instance (no `Clone`); scaling out means more ports.

pub mod adapter;
pub mod config;
pub mod error;
pub mod fragment_header;
mod mmsg;
pub mod packetizer;
pub mod reassembler;
pub mod sink;
pub mod socket;
pub mod source;

pub use error::TransportError;

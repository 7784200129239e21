use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::os::unix::io::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, trace, warn};

use crate::config::SourceConfig;
use crate::error::TransportError;
use crate::fragment_header::{FragmentHeader, HEADER_LEN, MAX_PAYLOAD};
use crate::mmsg;
use crate::reassembler::Reassembler;
use crate::socket::UdpEndpoint;

/// Per-slot padding beyond the largest legal datagram, so a slightly
///  oversized datagram is received (and then rejected by the payload check)
///  instead of being truncated into a seemingly valid one.
const SLOT_PADDING: usize = 64;

/// recvmmsg timeout per receive-loop iteration.
const RECV_BATCH_TIMEOUT: Duration = Duration::from_secs(1);

/// The only state shared between the receive thread and consumers.
struct SharedState {
    completed_frames: Mutex<VecDeque<Vec<u8>>>,
    frames_available: Condvar,
    running: AtomicBool,
}

/// The receive side: a background thread reads fragment batches from a bound
///  socket, feeds them to a thread-owned [`Reassembler`] and queues completed
///  frames for consumers to pop.
///
/// Frames surface in *completion* order, not frame-id order: a later frame
///  whose fragments all arrived can overtake an earlier frame that is still
///  missing one. Consumers that need id order must buffer and sort
///  themselves (minding 32-bit id wrap-around).
///
/// Not `Clone` - two receivers cannot share one bound port.
pub struct UdpSource {
    socket: Arc<UdpEndpoint>,
    config: SourceConfig,
    shared: Arc<SharedState>,
    // taken by &self so consumers can block in pop_frame on one thread while
    //  another stops the source
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl UdpSource {
    /// Binds the listen port; the receive thread is not started yet.
    pub fn new(config: SourceConfig) -> Result<UdpSource, TransportError> {
        config.validate()?;

        let socket = UdpEndpoint::new(config.socket_buffer_bytes)?;
        socket.bind(config.listen_port)?;
        socket.set_recv_timeout(config.flag_recheck_interval)?;

        Ok(UdpSource {
            socket: Arc::new(socket),
            config,
            shared: Arc::new(SharedState {
                completed_frames: Mutex::new(VecDeque::new()),
                frames_available: Condvar::new(),
                running: AtomicBool::new(false),
            }),
            worker: Mutex::new(None),
        })
    }

    /// The bound address - useful when the config asked for port 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.local_addr()
    }

    /// Launches the receive loop. Idempotent.
    pub fn start(&self) {
        let mut worker = self.worker.lock().unwrap();
        if worker.is_some() {
            warn!("receive loop already running");
            return;
        }
        self.shared.running.store(true, Ordering::SeqCst);

        let socket = self.socket.clone();
        let shared = self.shared.clone();
        let config = self.config.clone();
        *worker = Some(
            thread::Builder::new()
                .name("framelink-source".to_owned())
                .spawn(move || receive_loop(socket, shared, config))
                .expect("spawning the receive thread failed"),
        );
    }

    /// Stops the receive loop and joins the thread; completes within one
    ///  receive-timeout interval. Idempotent. Frames already queued remain
    ///  poppable; pending incomplete frames are dropped with the thread's
    ///  reassembler.
    pub fn stop(&self) {
        let handle = match self.worker.lock().unwrap().take() {
            Some(handle) => handle,
            None => return,
        };
        self.shared.running.store(false, Ordering::SeqCst);
        self.shared.frames_available.notify_all();
        if handle.join().is_err() {
            error!("receive thread panicked");
        }
    }

    /// Pops the next completed frame.
    ///
    /// * `None` - block until a frame arrives or the source stops
    /// * `Some(Duration::ZERO)` - non-blocking check
    /// * `Some(timeout)` - bounded wait
    ///
    /// Returns `None` on timeout or after `stop()` once the queue is
    ///  drained; cancellation is observed as an ordinary empty return.
    pub fn pop_frame(&self, timeout: Option<Duration>) -> Option<Vec<u8>> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);

        let mut queue = self.shared.completed_frames.lock().unwrap();
        loop {
            if let Some(frame) = queue.pop_front() {
                return Some(frame);
            }
            if !self.shared.running.load(Ordering::SeqCst) {
                return None;
            }
            match deadline {
                None => {
                    queue = self.shared.frames_available.wait(queue).unwrap();
                }
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return None;
                    }
                    // the deadline guards against spurious wakeups; the loop
                    //  re-evaluates the predicate either way
                    let (guard, _) = self
                        .shared
                        .frames_available
                        .wait_timeout(queue, remaining)
                        .unwrap();
                    queue = guard;
                }
            }
        }
    }
}

impl Drop for UdpSource {
    fn drop(&mut self) {
        self.stop();
    }
}

fn receive_loop(socket: Arc<UdpEndpoint>, shared: Arc<SharedState>, config: SourceConfig) {
    info!("receive loop starting on port {}", config.listen_port);

    let mut reassembler = Reassembler::new(config.reassembly.clone());

    // one contiguous pool holding all batch slots
    let slot_len = HEADER_LEN + MAX_PAYLOAD + SLOT_PADDING;
    let mut pool = vec![0u8; config.recv_batch_size * slot_len];
    let mut lens = vec![0usize; config.recv_batch_size];
    let fd = socket.as_raw_fd();

    while shared.running.load(Ordering::SeqCst) {
        let received = match mmsg::recv_batch(fd, &mut pool, slot_len, &mut lens, RECV_BATCH_TIMEOUT)
        {
            Ok(received) => received,
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                ) =>
            {
                continue;
            }
            Err(e) => {
                error!("receive loop terminating on socket error: {}", e);
                break;
            }
        };

        for i in 0..received {
            let len = lens[i];
            lens[i] = 0; // reset the slot length for the next batch

            if len < HEADER_LEN {
                debug!("datagram of {} bytes is shorter than a fragment header - dropping", len);
                continue;
            }

            let mut datagram = &pool[i * slot_len..i * slot_len + len];
            let header = match FragmentHeader::deser(&mut datagram) {
                Some(header) => header,
                None => continue, // unreachable, the length was checked above
            };

            if let Some(completed) = reassembler.add_fragment(&header, datagram) {
                trace!("queueing frame {} ({} bytes)", completed.frame_id, completed.data.len());
                {
                    let mut queue = shared.completed_frames.lock().unwrap();
                    queue.push_back(completed.data);
                }
                shared.frames_available.notify_one();
            }
        }
    }

    info!("receive loop stopped");

    // if the loop died on an error the flag is still set; clear it and wake
    //  consumers so pop_frame observes the shutdown instead of blocking
    shared.running.store(false, Ordering::SeqCst);
    shared.frames_available.notify_all();
}

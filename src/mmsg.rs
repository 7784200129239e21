//! Batched, vectored UDP syscalls.
//!
//! The transmit path assembles each datagram from two non-contiguous regions
//!  (the fragment header and a slice of the caller's frame buffer) and
//!  submits them in `sendmmsg` batches; the receive path fills a contiguous
//!  slot pool through `recvmmsg`. Neither batching nor scatter/gather is
//!  required for correctness, so targets without `sendmmsg`/`recvmmsg` fall
//!  back to per-datagram `sendmsg`/`recv` loops.

use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

use socket2::SockAddr;

use crate::fragment_header::HEADER_LEN;
use crate::packetizer::FragmentDescriptor;

#[cfg(target_os = "linux")]
use std::mem;

/// Fragments staged per sendmmsg call. The syscall structs live on the
///  stack, so this also bounds the staging footprint.
#[cfg(target_os = "linux")]
const SEND_BATCH: usize = 64;

/// Upper bound for `SourceConfig::recv_batch_size`; the recvmmsg bookkeeping
///  arrays are sized for this many slots.
pub(crate) const RECV_BATCH_MAX: usize = 64;

/// Submits every fragment of a prepared frame to the socket, headers and
///  payload slices gathered per datagram.
///
/// Retries transparently on `EINTR`; yields and retries when the kernel
///  buffer is full (`EAGAIN`/`EWOULDBLOCK`); a partial batch advances and
///  resubmits the remainder. Any other errno aborts the frame.
#[cfg(target_os = "linux")]
pub(crate) fn send_fragments(
    fd: RawFd,
    to: &SockAddr,
    fragments: &[FragmentDescriptor],
    frame: &[u8],
) -> io::Result<()> {
    let mut sent = 0;
    while sent < fragments.len() {
        let chunk = &fragments[sent..(sent + SEND_BATCH).min(fragments.len())];

        let mut iovecs: [[libc::iovec; 2]; SEND_BATCH] = unsafe { mem::zeroed() };
        let mut msgs: [libc::mmsghdr; SEND_BATCH] = unsafe { mem::zeroed() };
        for (i, fragment) in chunk.iter().enumerate() {
            let payload = fragment.payload_in(frame);
            // the kernel only reads through these pointers; the *mut casts
            //  satisfy the msghdr type that recvmsg shares
            iovecs[i][0] = libc::iovec {
                iov_base: fragment.header_bytes().as_ptr() as *mut libc::c_void,
                iov_len: HEADER_LEN,
            };
            iovecs[i][1] = libc::iovec {
                iov_base: payload.as_ptr() as *mut libc::c_void,
                iov_len: payload.len(),
            };
            msgs[i].msg_hdr.msg_iov = iovecs[i].as_mut_ptr();
            msgs[i].msg_hdr.msg_iovlen = 2;
            msgs[i].msg_hdr.msg_name = to.as_ptr() as *mut libc::c_void;
            msgs[i].msg_hdr.msg_namelen = to.len();
        }

        let n = unsafe { libc::sendmmsg(fd, msgs.as_mut_ptr(), chunk.len() as libc::c_uint, 0) };
        if n < 0 {
            let e = io::Error::last_os_error();
            match e.kind() {
                io::ErrorKind::Interrupted => continue,
                io::ErrorKind::WouldBlock => {
                    std::thread::yield_now();
                    continue;
                }
                _ => return Err(e),
            }
        }
        sent += n as usize;
    }
    Ok(())
}

/// Per-datagram fallback: same gather layout and errno handling, one
///  `sendmsg` per fragment.
#[cfg(not(target_os = "linux"))]
pub(crate) fn send_fragments(
    fd: RawFd,
    to: &SockAddr,
    fragments: &[FragmentDescriptor],
    frame: &[u8],
) -> io::Result<()> {
    for fragment in fragments {
        let payload = fragment.payload_in(frame);
        let mut iov = [
            libc::iovec {
                iov_base: fragment.header_bytes().as_ptr() as *mut libc::c_void,
                iov_len: HEADER_LEN,
            },
            libc::iovec {
                iov_base: payload.as_ptr() as *mut libc::c_void,
                iov_len: payload.len(),
            },
        ];
        let mut hdr: libc::msghdr = unsafe { std::mem::zeroed() };
        hdr.msg_name = to.as_ptr() as *mut libc::c_void;
        hdr.msg_namelen = to.len();
        hdr.msg_iov = iov.as_mut_ptr();
        hdr.msg_iovlen = 2;

        loop {
            let n = unsafe { libc::sendmsg(fd, &hdr, 0) };
            if n >= 0 {
                break;
            }
            let e = io::Error::last_os_error();
            match e.kind() {
                io::ErrorKind::Interrupted => continue,
                io::ErrorKind::WouldBlock => {
                    std::thread::yield_now();
                    continue;
                }
                _ => return Err(e),
            }
        }
    }
    Ok(())
}

/// One batched receive into `pool`, which is divided into consecutive slots
///  of `slot_len` bytes. Returns the number of datagrams received and writes
///  each datagram's length into `lens`; waits up to `timeout` (additionally
///  bounded by the socket's own receive timeout).
///
/// Transient errnos (`EINTR`, `EAGAIN`) surface as errors for the caller's
///  retry loop.
#[cfg(target_os = "linux")]
pub(crate) fn recv_batch(
    fd: RawFd,
    pool: &mut [u8],
    slot_len: usize,
    lens: &mut [usize],
    timeout: Duration,
) -> io::Result<usize> {
    let batch = lens.len().min(pool.len() / slot_len).min(RECV_BATCH_MAX);

    let mut iovecs: [libc::iovec; RECV_BATCH_MAX] = unsafe { mem::zeroed() };
    let mut msgs: [libc::mmsghdr; RECV_BATCH_MAX] = unsafe { mem::zeroed() };
    for (i, slot) in pool.chunks_exact_mut(slot_len).take(batch).enumerate() {
        iovecs[i].iov_base = slot.as_mut_ptr() as *mut libc::c_void;
        iovecs[i].iov_len = slot_len;
        msgs[i].msg_hdr.msg_iov = &mut iovecs[i];
        msgs[i].msg_hdr.msg_iovlen = 1;
    }

    let mut ts = libc::timespec {
        tv_sec: timeout.as_secs() as libc::time_t,
        tv_nsec: timeout.subsec_nanos() as libc::c_long,
    };
    let n = unsafe { libc::recvmmsg(fd, msgs.as_mut_ptr(), batch as libc::c_uint, 0, &mut ts) };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }
    for i in 0..n as usize {
        lens[i] = msgs[i].msg_len as usize;
    }
    Ok(n as usize)
}

/// Per-datagram fallback: a single blocking `recv` into the first slot; the
///  socket's receive timeout provides the wakeup.
#[cfg(not(target_os = "linux"))]
pub(crate) fn recv_batch(
    fd: RawFd,
    pool: &mut [u8],
    slot_len: usize,
    lens: &mut [usize],
    _timeout: Duration,
) -> io::Result<usize> {
    debug_assert!(pool.len() >= slot_len && !lens.is_empty());

    let n = unsafe { libc::recv(fd, pool.as_mut_ptr() as *mut libc::c_void, slot_len, 0) };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }
    lens[0] = n as usize;
    Ok(1)
}

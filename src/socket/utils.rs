//! Utility functions for socket operations

use std::io;
use std::mem::MaybeUninit;
use std::net::Ipv4Addr;

// Common POSIX error codes
const EPERM: i32 = 1; // Operation not permitted
const EBADF: i32 = 9; // Bad file descriptor
const EACCES: i32 = 13; // Permission denied

/// Check if running as root
pub fn is_root() -> bool {
    #[cfg(unix)]
    {
        // SAFETY: geteuid has no preconditions and cannot fail
        unsafe { libc::geteuid() == 0 }
    }
    #[cfg(not(unix))]
    {
        false
    }
}

/// Check whether an I/O error means the process lacks socket privileges
pub fn is_permission_error(err: &io::Error) -> bool {
    matches!(err.kind(), io::ErrorKind::PermissionDenied)
        || err
            .raw_os_error()
            .map(|code| code == EPERM || code == EACCES)
            .unwrap_or(false)
}

/// Receive one packet and return the initialised bytes with the sender
pub fn recv_from_v4<'a>(
    socket: &socket2::Socket,
    buf: &'a mut [MaybeUninit<u8>],
) -> io::Result<(&'a [u8], Option<Ipv4Addr>)> {
    let (size, addr) = socket.recv_from(buf)?;
    // SAFETY: recv_from initialised the first `size` bytes of `buf`
    let data = unsafe { std::slice::from_raw_parts(buf.as_ptr().cast::<u8>(), size) };
    Ok((data, addr.as_socket_ipv4().map(|a| *a.ip())))
}

/// Check whether a receive error only means "nothing arrived yet"
pub fn is_receive_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}

/// Decide whether a transport error must abort the whole run
///
/// Permission problems and a dead descriptor cannot be fixed by retrying.
/// Everything else (unreachable networks, interrupted calls, buffer
/// pressure) only costs the current attempt.
pub fn is_fatal_transport_error(err: &anyhow::Error) -> bool {
    err.chain()
        .filter_map(|cause| cause.downcast_ref::<io::Error>())
        .any(|io_err| {
            is_permission_error(io_err) || io_err.raw_os_error() == Some(EBADF)
        })
}

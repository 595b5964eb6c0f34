//! The single-waiter wait/dispatch primitive: a `poll(2)` multiplexer over
//! every active device fd plus a self-pipe used to wake it from another
//! thread.

use std::io;
use std::os::unix::io::RawFd;

use crate::types::{DeviceId, INVALID_DEV_NUM};

macro_rules! syscall {
    ($fn:ident ( $($arg:expr),* $(,)* ) ) => {{
        let res = unsafe { libc::$fn($($arg, )*) };
        if res == -1 {
            Err(io::Error::last_os_error())
        } else {
            Ok(res)
        }
    }};
}

fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = syscall!(fcntl(fd, libc::F_GETFL))?;
    syscall!(fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK))?;
    Ok(())
}

/// One fd the waiter is watching, tagged with a [DeviceId] or
/// [INVALID_DEV_NUM] for the wakeup pipe.
struct Watched {
    fd: RawFd,
    tag: usize,
}

/// Multiplexes device character devices plus a self-pipe wakeup onto one
/// blocking `poll(2)` call.
pub struct Waiter {
    watched: Vec<Watched>,
    wake_read: RawFd,
    wake_write: RawFd,
}

impl Waiter {
    pub fn new() -> io::Result<Self> {
        let mut fds = [0 as RawFd; 2];
        syscall!(pipe(fds.as_mut_ptr()))?;
        let (wake_read, wake_write) = (fds[0], fds[1]);
        set_nonblocking(wake_read)?;
        set_nonblocking(wake_write)?;

        Ok(Self {
            watched: vec![Watched {
                fd: wake_read,
                tag: INVALID_DEV_NUM,
            }],
            wake_read,
            wake_write,
        })
    }

    /// Start watching `fd` for readability, tagged with `device`.
    pub fn register(&mut self, device: DeviceId, fd: RawFd) {
        if self.watched.iter().any(|w| w.tag == device.0) {
            return;
        }
        self.watched.push(Watched { fd, tag: device.0 });
    }

    /// Stop watching the fd tagged with `device`, if any.
    pub fn deregister(&mut self, device: DeviceId) {
        self.watched.retain(|w| w.tag != device.0);
    }

    /// Whether `device`'s fd is currently in the watch set.
    pub(crate) fn is_registered(&self, device: DeviceId) -> bool {
        self.watched.iter().any(|w| w.tag == device.0)
    }

    /// Wake any in-flight [Waiter::wait] promptly. Safe to call from a
    /// different thread than the one driving the wait loop.
    pub fn wake(&self) {
        let byte = 1u8;
        let _ = syscall!(write(
            self.wake_write,
            &byte as *const u8 as *const libc::c_void,
            1
        ));
    }

    /// Wait up to `timeout_ms` milliseconds (`-1` for infinite, `0` for a
    /// non-blocking poll) for any watched fd to become readable. Returns
    /// the tags (device ids, or [INVALID_DEV_NUM] for the wakeup pipe) that
    /// are ready. The wakeup pipe, if ready, is drained before returning.
    pub fn wait(&mut self, timeout_ms: i32) -> io::Result<Vec<usize>> {
        let mut pollfds: Vec<libc::pollfd> = self
            .watched
            .iter()
            .map(|w| libc::pollfd {
                fd: w.fd,
                events: libc::POLLIN,
                revents: 0,
            })
            .collect();

        loop {
            match syscall!(poll(
                pollfds.as_mut_ptr(),
                pollfds.len() as libc::nfds_t,
                timeout_ms
            )) {
                Ok(_) => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        let mut ready = Vec::new();
        for (watched, pfd) in self.watched.iter().zip(pollfds.iter()) {
            if pfd.revents & (libc::POLLIN | libc::POLLHUP | libc::POLLERR) != 0 {
                ready.push(watched.tag);
            }
        }

        if ready.contains(&INVALID_DEV_NUM) {
            self.drain_wakeup();
        }

        Ok(ready)
    }

    fn drain_wakeup(&self) {
        let mut buf = [0u8; 64];
        loop {
            let res = syscall!(read(
                self.wake_read,
                buf.as_mut_ptr() as *mut libc::c_void,
                buf.len()
            ));
            match res {
                Ok(n) if n > 0 => continue,
                _ => break,
            }
        }
    }
}

impl Drop for Waiter {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.wake_read);
            libc::close(self.wake_write);
        }
    }
}

//! Shared test-only helpers used by this crate's own unit tests.

use std::os::unix::io::RawFd;

use crate::error::{CoreError, CoreResult};
use crate::types::DeviceId;

/// A device-open hook that stands in for a real `/dev/iio:deviceN`, so
/// activation/fd-lifecycle tests can run without root or a real kernel
/// device present. Opens `/dev/null`, which every Linux test environment
/// has; the returned fd is never actually read in these tests.
pub(crate) fn fake_device_opener() -> Box<dyn Fn(DeviceId) -> CoreResult<RawFd> + Send> {
    Box::new(|device: DeviceId| {
        let path = std::ffi::CString::new("/dev/null").expect("no NUL bytes in a literal path");
        let fd = unsafe { libc::open(path.as_ptr(), libc::O_RDONLY | libc::O_NONBLOCK) };
        if fd < 0 {
            Err(CoreError::Io {
                device,
                source: std::io::Error::last_os_error(),
            })
        } else {
            Ok(fd)
        }
    })
}

//! Sysfs gateway: reads and writes the small set of file types the rest of
//! the core cares about (integers, floats, strings), and builds the IIO
//! attribute paths so call sites never hand-format them inline.

use std::path::{Path, PathBuf};

use crate::error::CoreError;
use crate::types::DeviceId;

/// Everything the core needs from the filesystem, abstracted so tests can
/// run against an in-memory fake instead of a real `/sys`.
pub trait SysfsIo {
    fn read_string(&self, path: &Path) -> Result<String, CoreError>;
    fn write_string(&self, path: &Path, value: &str) -> Result<(), CoreError>;

    fn read_int(&self, path: &Path) -> Result<i64, CoreError> {
        self.read_string(path)?
            .trim()
            .parse()
            .map_err(|_| sysfs_unavailable(path))
    }

    fn write_int(&self, path: &Path, value: i64) -> Result<(), CoreError> {
        self.write_string(path, &value.to_string())
    }

    fn read_float(&self, path: &Path) -> Result<f64, CoreError> {
        self.read_string(path)?
            .trim()
            .parse()
            .map_err(|_| sysfs_unavailable(path))
    }
}

fn sysfs_unavailable(path: &Path) -> CoreError {
    CoreError::SysfsUnavailable {
        path: path.to_path_buf(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidData, "unparsable attribute"),
    }
}

/// A [SysfsIo] backed by the real filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealSysfs;

impl SysfsIo for RealSysfs {
    fn read_string(&self, path: &Path) -> Result<String, CoreError> {
        std::fs::read_to_string(path).map_err(|source| CoreError::SysfsUnavailable {
            path: path.to_path_buf(),
            source,
        })
    }

    fn write_string(&self, path: &Path, value: &str) -> Result<(), CoreError> {
        std::fs::write(path, value).map_err(|source| CoreError::SysfsUnavailable {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Root of the IIO sysfs tree.
const IIO_SYSFS_ROOT: &str = "/sys/bus/iio/devices";

pub fn device_dir(device: DeviceId) -> PathBuf {
    PathBuf::from(IIO_SYSFS_ROOT).join(format!("iio:device{}", device.0))
}

pub fn device_node(device: DeviceId) -> PathBuf {
    PathBuf::from("/dev").join(format!("iio:device{}", device.0))
}

pub fn buffer_enable_path(device: DeviceId) -> PathBuf {
    device_dir(device).join("buffer/enable")
}

pub fn current_trigger_path(device: DeviceId) -> PathBuf {
    device_dir(device).join("trigger/current_trigger")
}

pub fn sampling_frequency_path(device: DeviceId, tag: &str) -> PathBuf {
    device_dir(device).join(format!("{}_sampling_frequency", tag))
}

pub fn channel_en_path(device: DeviceId, channel_tag: &str) -> PathBuf {
    device_dir(device).join(format!("scan_elements/{}_en", channel_tag))
}

pub fn channel_type_path(device: DeviceId, channel_tag: &str) -> PathBuf {
    device_dir(device).join(format!("scan_elements/{}_type", channel_tag))
}

pub fn channel_index_path(device: DeviceId, channel_tag: &str) -> PathBuf {
    device_dir(device).join(format!("scan_elements/{}_index", channel_tag))
}

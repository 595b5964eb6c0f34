use std::path::PathBuf;

use crate::types::{DeviceId, SensorId};

/// Errors produced by the control core.
///
/// [CoreError::Invalid] and [CoreError::InvalidState] are synchronous
/// argument/usage errors: the call that produced them had no side effects.
/// [CoreError::Io] means a kernel resource (a device node, mostly) did not
/// cooperate. [CoreError::SysfsUnavailable] is non-fatal: callers that see
/// it for a single attribute or channel should treat that one thing as
/// absent and carry on, not abort the whole operation.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("invalid argument: {0}")]
    Invalid(&'static str),

    #[error("sensor {0:?} is not in the expected state for this call")]
    InvalidState(SensorId),

    #[error("i/o error on device {device:?}: {source}")]
    Io {
        device: DeviceId,
        #[source]
        source: std::io::Error,
    },

    #[error("sysfs attribute unavailable at {path:?}: {source}")]
    SysfsUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type CoreResult<T> = Result<T, CoreError>;

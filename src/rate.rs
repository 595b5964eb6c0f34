//! Rate controller: translates a requested sample period into a sysfs
//! frequency write, and computes the next timer deadline for poll-mode
//! sensors.

use crate::controller::Controller;
use crate::error::{CoreError, CoreResult};
use crate::sysfs::{self, SysfsIo};
use crate::types::{now_ns, SensorId};

impl<S: SysfsIo> Controller<S> {
    /// Set `sensor`'s sampling interval, in nanoseconds. `ns` must be
    /// positive; intervals longer than one second clamp to 1 Hz rather
    /// than rounding down to 0 Hz.
    pub fn sampling_interval(&mut self, id: SensorId, ns: i64) -> CoreResult<()> {
        if ns <= 0 {
            return Err(CoreError::Invalid("sampling interval must be positive"));
        }
        let new_rate = (1_000_000_000i64 / ns).max(1) as u32;

        let device = self.sensor(id)?.device;
        let rate_tag = self.sensor(id)?.rate_tag.clone();
        let path = sysfs::sampling_frequency_path(device, &rate_tag);

        let current = self.sysfs.read_int(&path).ok();
        if current != Some(new_rate as i64) {
            let bracket = self.device_mut(device).trig_refcount > 0;
            if bracket {
                self.sysfs.write_int(&sysfs::buffer_enable_path(device), 0)?;
            }
            self.sysfs.write_int(&path, new_rate as i64)?;
            if bracket {
                self.sysfs.write_int(&sysfs::buffer_enable_path(device), 1)?;
            }
        }

        self.sensor_mut(id)?.sampling_rate_hz = new_rate;
        self.waiter.wake();
        Ok(())
    }

    /// Milliseconds until the next poll-mode sensor's deadline, `0` if one
    /// is already due, or `-1` if no poll-mode sensor is enabled.
    pub(crate) fn next_timeout(&self) -> i32 {
        let now = now_ns();

        let min_deadline = self
            .sensors
            .iter()
            .filter(|s| s.enable_count > 0 && s.is_poll_mode() && s.sampling_rate_hz > 0)
            .map(|s| s.last_integration_ts_ns + 1_000_000_000i64 / s.sampling_rate_hz as i64)
            .min();

        match min_deadline {
            None => -1,
            Some(deadline) => {
                let remaining_ns = (deadline - now).max(0);
                let remaining_ms = remaining_ns / 1_000_000;
                remaining_ms.min(i32::MAX as i64) as i32
            }
        }
    }
}

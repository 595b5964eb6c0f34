//! Activation manager: reference-counted enable/disable of logical
//! sensors, with the sysfs write ordering contract and device fd lifecycle
//! that trigger-mode sensors require.

use std::ffi::CString;
use std::os::unix::io::RawFd;

use crate::controller::Controller;
use crate::error::{CoreError, CoreResult};
use crate::layout;
use crate::sysfs::{self, SysfsIo};
use crate::types::{DeviceId, SensorId};

/// Opens the real kernel character device, non-blocking read-only. The
/// default `open_device` hook on a fresh [Controller]; swappable (see
/// [Controller::with_device_opener]) so tests can exercise the activation
/// and wait/dispatch paths without a real `/dev/iio:deviceN`.
pub(crate) fn open_device_node(device: DeviceId) -> CoreResult<RawFd> {
    let path = sysfs::device_node(device);
    let c_path = CString::new(path.as_os_str().to_string_lossy().as_bytes())
        .map_err(|_| CoreError::Invalid("device path contains a NUL byte"))?;

    let fd = unsafe { libc::open(c_path.as_ptr(), libc::O_RDONLY | libc::O_NONBLOCK) };
    if fd < 0 {
        Err(CoreError::Io {
            device,
            source: std::io::Error::last_os_error(),
        })
    } else {
        Ok(fd)
    }
}

fn close_device_node(fd: RawFd) {
    unsafe {
        libc::close(fd);
    }
}

impl<S: SysfsIo> Controller<S> {
    /// Enable or disable a logical sensor. Stacks: `n` enables require `n`
    /// disables. Disabling an already-disabled sensor returns
    /// [CoreError::InvalidState] and has no side effects.
    pub fn activate(&mut self, id: SensorId, on: bool) -> CoreResult<()> {
        let was_enabled = self.sensor(id)?.enable_count > 0;

        let edge = if on {
            let sensor = self.sensor_mut(id)?;
            sensor.enable_count += 1;
            !was_enabled
        } else {
            let sensor = self.sensor_mut(id)?;
            if sensor.enable_count == 0 {
                return Err(CoreError::InvalidState(id));
            }
            sensor.enable_count -= 1;
            was_enabled && sensor.enable_count == 0
        };

        if !edge {
            self.waiter.wake();
            return Ok(());
        }

        self.adjust_device_counters(id, on);
        let result = self.apply_edge(id, on);
        if result.is_err() {
            // counter step (both the sensor's and the device's) rolls back
            // together so a failed enable leaves no trace
            self.adjust_device_counters(id, !on);
            if let Ok(sensor) = self.sensor_mut(id) {
                if on {
                    sensor.enable_count -= 1;
                } else {
                    sensor.enable_count += 1;
                }
            }
        }
        self.waiter.wake();
        result
    }

    fn adjust_device_counters(&mut self, id: SensorId, on: bool) {
        let device = match self.sensor(id) {
            Ok(sensor) => sensor.device,
            Err(_) => return,
        };
        let is_poll_mode = self.sensor(id).map(|s| s.is_poll_mode()).unwrap_or(false);

        let dev = self.device_mut(device);
        if is_poll_mode {
            if on {
                dev.poll_refcount += 1;
            } else {
                dev.poll_refcount = dev.poll_refcount.saturating_sub(1);
            }
        } else if on {
            dev.trig_refcount += 1;
        } else {
            dev.trig_refcount = dev.trig_refcount.saturating_sub(1);
        }

        if is_poll_mode {
            if on {
                self.active_poll_sensors += 1;
            } else {
                self.active_poll_sensors = self.active_poll_sensors.saturating_sub(1);
            }
        }
    }

    fn apply_edge(&mut self, id: SensorId, on: bool) -> CoreResult<()> {
        let device = self.sensor(id)?.device;
        let is_poll_mode = self.sensor(id)?.is_poll_mode();

        if !is_poll_mode {
            self.reconfigure_trigger_mode(id, device, on)?;
        }
        if !on {
            let sensor = self.sensor_mut(id)?;
            sensor.report_buffer.clear();
            sensor.report_pending = false;
        }

        self.sync_device_fd(device)
    }

    fn reconfigure_trigger_mode(
        &mut self,
        id: SensorId,
        device: DeviceId,
        on: bool,
    ) -> CoreResult<()> {
        self.sysfs.write_int(&sysfs::buffer_enable_path(device), 0)?;

        let trig_refcount = self.device_mut(device).trig_refcount;
        match trig_refcount {
            0 => {
                self.sysfs
                    .write_string(&sysfs::current_trigger_path(device), "none")?;
            }
            1 => {
                let rate_tag = self.sensor(id)?.rate_tag.clone();
                self.sysfs.write_string(
                    &sysfs::current_trigger_path(device),
                    &format!("{}-dev{}", rate_tag, device.0),
                )?;
            }
            _ => {
                // more than one trigger-mode sensor already active: leave
                // the existing trigger alone
            }
        }

        let channel_tags: Vec<String> = self
            .sensor(id)?
            .channels
            .iter()
            .map(|c| c.tag.clone())
            .collect();
        for tag in &channel_tags {
            self.sysfs
                .write_int(&sysfs::channel_en_path(device, tag), on as i64)?;
        }

        if self.device_mut(device).trig_refcount > 0 {
            layout::refresh(&self.sysfs, device, &mut self.sensors)?;
            self.sysfs.write_int(&sysfs::buffer_enable_path(device), 1)?;
        }

        Ok(())
    }

    /// Open or close `device`'s fd to match its refcounts, and bring its
    /// waiter registration in line with `trig_refcount` independently of
    /// when the fd itself was opened — a device's fd can already be open
    /// because of a poll-mode sensor when its first trigger-mode sensor
    /// activates, and the reverse on disable, so registration can't simply
    /// be decided at open/close time.
    fn sync_device_fd(&mut self, device: DeviceId) -> CoreResult<()> {
        let active = self.device_mut(device).active();
        let has_fd = self.device_mut(device).fd.is_some();

        if active && !has_fd {
            let fd = (self.open_device)(device)?;
            self.device_mut(device).fd = Some(fd);
        } else if !active && has_fd {
            self.waiter.deregister(device);
            if let Some(fd) = self.device_mut(device).fd.take() {
                close_device_node(fd);
            }
        }

        if let Some(fd) = self.device_mut(device).fd {
            if self.device_mut(device).trig_refcount > 0 {
                self.waiter.register(device, fd);
            } else {
                self.waiter.deregister(device);
            }
        }

        Ok(())
    }
}

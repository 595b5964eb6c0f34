//! Event shaper and report demultiplexer: splits one packed device report
//! into per-sensor buffers, and turns a pending sensor into one output
//! event via its injected [crate::types::SensorOps].

use crate::controller::Controller;
use crate::error::{CoreError, CoreResult};
use crate::sysfs::SysfsIo;
use crate::types::{now_ns, DeviceId, Event, SensorId};

impl<S: SysfsIo> Controller<S> {
    /// Read one report from `device`'s character device and distribute it
    /// across the sensors bound to it. A short or failed read discards the
    /// pass rather than applying it partially.
    pub(crate) fn integrate(&mut self, device: DeviceId) -> CoreResult<()> {
        let fd = match self.devices[device.0].fd {
            Some(fd) => fd,
            None => return Ok(()),
        };

        let expected_size: usize = self
            .sensors
            .iter()
            .filter(|s| s.device == device && !s.is_poll_mode())
            .map(|s| s.report_size())
            .sum();
        if expected_size == 0 {
            return Ok(());
        }

        let mut scratch = vec![0u8; expected_size];
        let n = unsafe {
            libc::read(
                fd,
                scratch.as_mut_ptr() as *mut libc::c_void,
                scratch.len(),
            )
        };

        if n < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::WouldBlock {
                return Ok(());
            }
            return Err(CoreError::Io { device, source: err });
        }

        if n as usize != expected_size {
            log::warn!(
                "device {:?}: short read ({} of {} expected bytes), discarding pass",
                device,
                n,
                expected_size
            );
            return Ok(());
        }

        for sensor in self
            .sensors
            .iter_mut()
            .filter(|s| s.device == device && !s.is_poll_mode())
        {
            sensor.report_buffer.clear();
            for channel in &sensor.channels {
                if !channel.enabled {
                    continue;
                }
                sensor
                    .report_buffer
                    .extend_from_slice(&scratch[channel.offset..channel.offset + channel.size]);
            }
            if sensor.enable_count > 0 {
                sensor.report_pending = true;
            }
        }

        Ok(())
    }

    /// Materialize `id`'s pending report (or live sysfs read, for a
    /// poll-mode sensor) into `out`, and clear its pending flag.
    pub(crate) fn shape_into(&mut self, id: SensorId, out: &mut Event) -> CoreResult<()> {
        let sensor = self.sensor_mut(id)?;
        *out = Event::zeroed(id, sensor.sensor_type);

        let num_fields = sensor.sensor_type.num_fields();
        if num_fields == 0 {
            log::warn!("sensor {:?}: unrecognized type, emitting zeroed event", id);
        }

        if sensor.is_poll_mode() {
            for c in 0..num_fields {
                match sensor.ops.acquire_immediate_value(c) {
                    Ok(v) => out.data[c] = v,
                    Err(e) => log::warn!("sensor {:?} channel {}: {}", id, c, e),
                }
            }
        } else {
            let mut offset = 0usize;
            for c in 0..num_fields.min(sensor.channels.len()) {
                let size = sensor.channels[c].size;
                if offset + size > sensor.report_buffer.len() {
                    break;
                }
                let raw = &sensor.report_buffer[offset..offset + size];
                out.data[c] = sensor.ops.transform(c, raw);
                offset += size;
            }
        }

        out.timestamp_ns = now_ns();
        sensor.last_integration_ts_ns = out.timestamp_ns;
        sensor.report_pending = false;
        sensor.ops.finalize(out);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::SensorSlot;
    use crate::layout::Channel;
    use crate::sysfs::fake::FakeSysfs;
    use crate::types::{SensorOps, SensorType};

    struct DoublingOps;
    impl SensorOps for DoublingOps {
        fn transform(&self, _channel: usize, raw: &[u8]) -> f32 {
            raw[0] as f32 * 2.0
        }
        fn finalize(&self, _event: &mut Event) {}
        fn acquire_immediate_value(&self, _channel: usize) -> CoreResult<f32> {
            Ok(7.0)
        }
    }

    #[test]
    fn shape_poll_mode_uses_acquire_immediate_value() {
        let fs = FakeSysfs::new();
        let mut c = Controller::new(fs).unwrap();
        let id = c.register_sensor(SensorSlot::new(
            DeviceId(0),
            SensorType::Light,
            "light",
            Vec::new(),
            Box::new(DoublingOps),
        ));

        let mut event = Event::zeroed(id, SensorType::Light);
        c.shape_into(id, &mut event).unwrap();
        assert_eq!(event.data[0], 7.0);
        assert!(!c.sensor(id).unwrap().report_pending);
    }

    #[test]
    fn shape_trigger_mode_uses_transform_over_report_buffer() {
        let fs = FakeSysfs::new();
        let mut c = Controller::new(fs).unwrap();
        let mut ch = Channel::new("x");
        ch.enabled = true;
        ch.size = 1;
        ch.offset = 0;
        let id = c.register_sensor(SensorSlot::new(
            DeviceId(0),
            SensorType::Temperature,
            "temp",
            vec![ch],
            Box::new(DoublingOps),
        ));
        c.sensor_mut(id).unwrap().report_buffer = vec![21];

        let mut event = Event::zeroed(id, SensorType::Temperature);
        c.shape_into(id, &mut event).unwrap();
        assert_eq!(event.data[0], 42.0);
    }

    #[test]
    fn unknown_sensor_type_yields_no_fields() {
        let fs = FakeSysfs::new();
        let mut c = Controller::new(fs).unwrap();
        let id = c.register_sensor(SensorSlot::new(
            DeviceId(0),
            SensorType::Unknown,
            "unk",
            Vec::new(),
            Box::new(DoublingOps),
        ));

        let mut event = Event::zeroed(id, SensorType::Unknown);
        c.shape_into(id, &mut event).unwrap();
        assert_eq!(event.data, [0.0; 16]);
    }

    #[test]
    fn integrate_with_no_fd_is_a_no_op() {
        let fs = FakeSysfs::new();
        let mut c = Controller::new(fs).unwrap();
        assert!(c.integrate(DeviceId(0)).is_ok());
    }

    #[test]
    fn integrate_splits_one_device_report_across_two_sensors() {
        // two trigger-mode sensors on one device (gyro: 3 x int16, temp:
        // 1 x int16), as in the gyro+temperature end-to-end scenario:
        // one packed 8-byte report demuxes into a 6-byte and a 2-byte
        // per-sensor buffer.
        use std::os::unix::io::RawFd;

        let fs = FakeSysfs::new();
        let device = DeviceId(1);

        let mut fds = [0 as RawFd; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        let (read_fd, write_fd) = (fds[0], fds[1]);

        let opener: Box<dyn Fn(DeviceId) -> CoreResult<RawFd> + Send> =
            Box::new(move |_device: DeviceId| Ok(read_fd));
        let mut c = Controller::with_device_opener(fs, opener).unwrap();

        let mut gyro_channels: Vec<Channel> = ["gyro_x", "gyro_y", "gyro_z"]
            .iter()
            .map(|t| Channel::new(*t))
            .collect();
        for (i, ch) in gyro_channels.iter_mut().enumerate() {
            ch.enabled = true;
            ch.size = 2;
            ch.offset = i * 2;
        }
        let mut temp_channel = Channel::new("temp");
        temp_channel.enabled = true;
        temp_channel.size = 2;
        temp_channel.offset = 6;

        let gyro = c.register_sensor(SensorSlot::new(
            device,
            SensorType::Gyroscope,
            "gyro",
            gyro_channels,
            Box::new(DoublingOps),
        ));
        let temp = c.register_sensor(SensorSlot::new(
            device,
            SensorType::Temperature,
            "temp",
            vec![temp_channel],
            Box::new(DoublingOps),
        ));
        c.sensor_mut(gyro).unwrap().enable_count = 1;
        c.sensor_mut(temp).unwrap().enable_count = 1;
        c.devices[1].fd = Some(read_fd);

        let report = [1u8, 0, 2, 0, 3, 0, 9, 0];
        let written = unsafe {
            libc::write(
                write_fd,
                report.as_ptr() as *const libc::c_void,
                report.len(),
            )
        };
        assert_eq!(written as usize, report.len());

        c.integrate(device).unwrap();

        assert_eq!(c.sensor(gyro).unwrap().report_buffer, vec![1, 0, 2, 0, 3, 0]);
        assert_eq!(c.sensor(temp).unwrap().report_buffer, vec![9, 0]);
        assert!(c.sensor(gyro).unwrap().report_pending);
        assert!(c.sensor(temp).unwrap().report_pending);

        unsafe {
            libc::close(read_fd);
            libc::close(write_fd);
        }
    }

    #[test]
    fn integrate_discards_a_short_read_without_touching_buffers() {
        use std::os::unix::io::RawFd;

        let fs = FakeSysfs::new();
        let device = DeviceId(2);

        let mut fds = [0 as RawFd; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        let (read_fd, write_fd) = (fds[0], fds[1]);

        let opener: Box<dyn Fn(DeviceId) -> CoreResult<RawFd> + Send> =
            Box::new(move |_device: DeviceId| Ok(read_fd));
        let mut c = Controller::with_device_opener(fs, opener).unwrap();

        let mut ch = Channel::new("x");
        ch.enabled = true;
        ch.size = 2;
        ch.offset = 0;
        let id = c.register_sensor(SensorSlot::new(
            device,
            SensorType::Temperature,
            "temp",
            vec![ch],
            Box::new(DoublingOps),
        ));
        c.sensor_mut(id).unwrap().enable_count = 1;
        c.devices[2].fd = Some(read_fd);

        // only one byte written, but the sensor expects two
        let one_byte = [5u8];
        unsafe {
            libc::write(write_fd, one_byte.as_ptr() as *const libc::c_void, 1);
        }

        c.integrate(device).unwrap();

        assert!(c.sensor(id).unwrap().report_buffer.is_empty());
        assert!(!c.sensor(id).unwrap().report_pending);

        unsafe {
            libc::close(read_fd);
            libc::close(write_fd);
        }
    }
}

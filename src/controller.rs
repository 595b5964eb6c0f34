//! The process-wide control core.
//!
//! [Controller] owns everything the original implementation kept in global
//! mutable tables: the sensor table, the per-device fd/refcount table, and
//! the waiter. A caller that needs multi-threaded access wraps it in its
//! own `Mutex` — the core itself stays single-threaded and lock-free, and
//! relies on the waiter's self-pipe to notice control-plane changes
//! promptly rather than on any internal synchronization.

use std::os::unix::io::RawFd;
use std::time::Instant;

use crate::error::{CoreError, CoreResult};
use crate::layout::{Channel, LayoutSensor};
use crate::sysfs::SysfsIo;
use crate::types::{DeviceId, Event, SensorId, SensorOps, SensorType, MAX_DEVICES};
use crate::waiter::Waiter;

/// One logical sensor's static catalog entry plus live state.
pub struct SensorSlot {
    pub device: DeviceId,
    pub sensor_type: SensorType,
    /// Sysfs tag prefix used for this sensor's `<tag>_sampling_frequency`
    /// attribute.
    pub rate_tag: String,
    /// Empty for a poll-mode sensor; one entry per trigger-mode channel.
    pub channels: Vec<Channel>,
    pub enable_count: u32,
    pub sampling_rate_hz: u32,
    pub last_integration_ts_ns: i64,
    pub report_buffer: Vec<u8>,
    pub report_pending: bool,
    pub ops: Box<dyn SensorOps>,
}

impl SensorSlot {
    pub fn new(
        device: DeviceId,
        sensor_type: SensorType,
        rate_tag: impl Into<String>,
        channels: Vec<Channel>,
        ops: Box<dyn SensorOps>,
    ) -> Self {
        Self {
            device,
            sensor_type,
            rate_tag: rate_tag.into(),
            channels,
            enable_count: 0,
            sampling_rate_hz: 0,
            last_integration_ts_ns: 0,
            report_buffer: Vec::new(),
            report_pending: false,
            ops,
        }
    }

    pub fn is_poll_mode(&self) -> bool {
        self.channels.is_empty()
    }

    /// Total bytes this sensor consumes from its device's packed report.
    pub fn report_size(&self) -> usize {
        self.channels.iter().map(|c| c.size).sum()
    }
}

impl LayoutSensor for SensorSlot {
    fn device(&self) -> DeviceId {
        self.device
    }

    fn channels_mut(&mut self) -> &mut [Channel] {
        &mut self.channels
    }
}

/// Per-device fd and refcount bookkeeping.
#[derive(Default)]
pub struct DeviceState {
    pub fd: Option<RawFd>,
    pub poll_refcount: u32,
    pub trig_refcount: u32,
}

impl DeviceState {
    pub fn active(&self) -> bool {
        self.poll_refcount + self.trig_refcount > 0
    }
}

pub struct Controller<S: SysfsIo> {
    pub(crate) sysfs: S,
    pub(crate) sensors: Vec<SensorSlot>,
    pub(crate) devices: Vec<DeviceState>,
    pub(crate) waiter: Waiter,
    pub(crate) active_poll_sensors: u32,
    pub(crate) last_poll_exit: Option<Instant>,
    /// Opens a device's character node on first activation. Real kernel
    /// open by default; swappable via [Controller::with_device_opener] so
    /// tests don't need a real `/dev/iio:deviceN`.
    pub(crate) open_device: Box<dyn Fn(DeviceId) -> CoreResult<RawFd> + Send>,
}

impl<S: SysfsIo> Controller<S> {
    pub fn new(sysfs: S) -> std::io::Result<Self> {
        let mut devices = Vec::with_capacity(MAX_DEVICES);
        devices.resize_with(MAX_DEVICES, DeviceState::default);

        Ok(Self {
            sysfs,
            sensors: Vec::new(),
            devices,
            waiter: Waiter::new()?,
            active_poll_sensors: 0,
            last_poll_exit: None,
            open_device: Box::new(crate::activation::open_device_node),
        })
    }

    /// Build a [Controller] with a custom device-open hook, bypassing the
    /// real kernel character device. Used by this crate's own tests to
    /// exercise fd lifecycle and waiter registration without root or a
    /// real IIO device present.
    #[cfg(test)]
    pub(crate) fn with_device_opener(
        sysfs: S,
        open_device: Box<dyn Fn(DeviceId) -> CoreResult<RawFd> + Send>,
    ) -> std::io::Result<Self> {
        let mut controller = Self::new(sysfs)?;
        controller.open_device = open_device;
        Ok(controller)
    }

    /// Register a logical sensor from the catalog. Returns the id used in
    /// all subsequent calls.
    pub fn register_sensor(&mut self, slot: SensorSlot) -> SensorId {
        self.sensors.push(slot);
        SensorId(self.sensors.len() - 1)
    }

    pub(crate) fn sensor(&self, id: SensorId) -> CoreResult<&SensorSlot> {
        self.sensors
            .get(id.0)
            .ok_or(CoreError::Invalid("unknown sensor id"))
    }

    pub(crate) fn sensor_mut(&mut self, id: SensorId) -> CoreResult<&mut SensorSlot> {
        self.sensors
            .get_mut(id.0)
            .ok_or(CoreError::Invalid("unknown sensor id"))
    }

    pub(crate) fn device_mut(&mut self, id: DeviceId) -> &mut DeviceState {
        &mut self.devices[id.0]
    }

    /// Block until one event is ready, shape it into `out`, and return.
    /// Always delivers exactly one event per call.
    pub fn poll_once(&mut self, out: &mut Event) -> CoreResult<()> {
        loop {
            if let Some(id) = self.first_pending() {
                self.shape_into(id, out)?;
                return Ok(());
            }

            self.rate_limit();

            let timeout_ms = self.next_timeout();
            let ready = self
                .waiter
                .wait(timeout_ms)
                .map_err(|source| CoreError::Io {
                    device: DeviceId(crate::types::INVALID_DEV_NUM),
                    source,
                });
            self.last_poll_exit = Some(Instant::now());

            let ready = match ready {
                Ok(ready) => ready,
                Err(e) => {
                    log::warn!("wait primitive failed, retrying: {}", e);
                    continue;
                }
            };

            for tag in ready {
                if tag == crate::types::INVALID_DEV_NUM {
                    continue; // drained inside Waiter::wait already
                }
                if let Err(e) = self.integrate(DeviceId(tag)) {
                    log::warn!("device {} integration failed: {}", tag, e);
                }
            }

            self.fan_out_poll_timers();
        }
    }

    fn first_pending(&self) -> Option<SensorId> {
        self.sensors
            .iter()
            .position(|s| s.report_pending)
            .map(SensorId)
    }

    fn rate_limit(&self) {
        if let Some(last) = self.last_poll_exit {
            let elapsed = last.elapsed();
            if elapsed < crate::types::POLL_MIN_INTERVAL {
                std::thread::sleep(crate::types::POLL_MIN_INTERVAL - elapsed);
            }
        }
    }

    fn fan_out_poll_timers(&mut self) {
        if self.active_poll_sensors == 0 {
            return;
        }
        for sensor in self.sensors.iter_mut() {
            if sensor.is_poll_mode() && sensor.enable_count > 0 {
                sensor.report_pending = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreResult;
    use crate::sysfs::fake::FakeSysfs;
    use crate::types::SensorType;
    use quickcheck_macros::quickcheck;

    struct NoopOps;
    impl crate::types::SensorOps for NoopOps {
        fn transform(&self, _channel: usize, _raw: &[u8]) -> f32 {
            0.0
        }
        fn finalize(&self, _event: &mut Event) {}
        fn acquire_immediate_value(&self, _channel: usize) -> CoreResult<f32> {
            Ok(0.0)
        }
    }

    fn fresh_controller_with_one_poll_sensor() -> (Controller<FakeSysfs>, SensorId) {
        let fs = FakeSysfs::new();
        let mut c = Controller::with_device_opener(fs, crate::test_support::fake_device_opener())
            .unwrap();
        let id = c.register_sensor(SensorSlot::new(
            DeviceId(0),
            SensorType::Light,
            "light",
            Vec::new(),
            Box::new(NoopOps),
        ));
        (c, id)
    }

    /// Refcount monotonicity: `n` enables followed by `n` disables leave
    /// the sensor and device counters exactly where they started.
    #[quickcheck]
    fn refcount_returns_to_zero_after_matched_activations(n: u8) -> bool {
        let n = (n % 8) as u32; // keep quickcheck runs fast
        let (mut c, id) = fresh_controller_with_one_poll_sensor();

        for _ in 0..n {
            c.activate(id, true).unwrap();
        }
        for _ in 0..n {
            c.activate(id, false).unwrap();
        }

        c.sensor(id).unwrap().enable_count == 0 && c.active_poll_sensors == 0
    }

    #[test]
    fn enabling_an_already_enabled_sensor_is_idempotent_beyond_the_counter() {
        let (mut c, id) = fresh_controller_with_one_poll_sensor();
        c.activate(id, true).unwrap();
        let active_before = c.active_poll_sensors;
        c.activate(id, true).unwrap();
        assert_eq!(c.active_poll_sensors, active_before);
        assert_eq!(c.sensor(id).unwrap().enable_count, 2);
    }

    #[test]
    fn poll_once_delivers_exactly_one_pending_event() {
        let (mut c, id) = fresh_controller_with_one_poll_sensor();
        c.sensor_mut(id).unwrap().enable_count = 1;
        c.sensor_mut(id).unwrap().report_pending = true;

        let mut event = Event::zeroed(id, SensorType::Light);
        c.poll_once(&mut event).unwrap();
        assert_eq!(event.sensor, id);
        assert!(!c.sensor(id).unwrap().report_pending);
    }

    /// `POLL_MIN_INTERVAL` floor: when the wait keeps returning immediately
    /// (a device fd that is always readable), two successive `poll_once`
    /// returns must still be separated by at least `POLL_MIN_INTERVAL` of
    /// real time.
    #[test]
    fn poll_once_enforces_poll_min_interval_between_returns() {
        use std::os::unix::io::RawFd;
        use std::time::Instant;

        let fs = FakeSysfs::new();
        let device = DeviceId(0);

        let mut fds = [0 as RawFd; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        let (read_fd, write_fd) = (fds[0], fds[1]);

        let opener: Box<dyn Fn(DeviceId) -> CoreResult<RawFd> + Send> =
            Box::new(move |_device: DeviceId| Ok(read_fd));
        let mut c = Controller::with_device_opener(fs, opener).unwrap();

        let mut ch = crate::layout::Channel::new("x");
        ch.enabled = true;
        ch.size = 1;
        ch.offset = 0;
        let id = c.register_sensor(SensorSlot::new(
            device,
            SensorType::Temperature,
            "temp",
            vec![ch],
            Box::new(NoopOps),
        ));
        c.sensor_mut(id).unwrap().enable_count = 1;
        c.devices[0].fd = Some(read_fd);
        c.devices[0].trig_refcount = 1;
        c.waiter.register(device, read_fd);

        // Two bytes in the pipe up front: one per `poll_once` call's single
        // one-byte report, so the fd stays readable across both calls
        // without either blocking on a real device.
        let payload = [7u8; 2];
        let written = unsafe {
            libc::write(write_fd, payload.as_ptr() as *const libc::c_void, payload.len())
        };
        assert_eq!(written as usize, payload.len());

        let mut event = Event::zeroed(id, SensorType::Temperature);
        c.poll_once(&mut event).unwrap();
        let after_first = Instant::now();
        c.poll_once(&mut event).unwrap();
        let after_second = Instant::now();

        assert!(after_second.duration_since(after_first) >= crate::types::POLL_MIN_INTERVAL);

        unsafe {
            libc::close(read_fd);
            libc::close(write_fd);
        }
    }
}

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::CoreResult;

/// Current time in nanoseconds, for event timestamps and deadline math.
pub fn now_ns() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

/// Largest number of logical sensors the core can track.
pub const MAX_SENSORS: usize = 64;

/// Largest number of channels a single logical sensor can have.
pub const MAX_CHANNELS: usize = 16;

/// Largest number of IIO devices the core can track.
pub const MAX_DEVICES: usize = 16;

/// Largest raw report the shaper will assemble for one sensor.
pub const MAX_SENSOR_REPORT_SIZE: usize = 64;

/// Minimum spacing enforced between two returns from [crate::Controller::poll_once].
pub const POLL_MIN_INTERVAL: Duration = Duration::from_millis(10);

/// Sentinel device id used to tag the wakeup fd in the waiter.
pub const INVALID_DEV_NUM: usize = usize::MAX;

/// Identifier of a logical sensor, stable for the process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SensorId(pub usize);

/// Identifier of a backing IIO device, stable for the process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceId(pub usize);

/// Sensor type, used to decide how many fields an event carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorType {
    Accelerometer,
    MagneticField,
    Orientation,
    Gyroscope,
    Light,
    Temperature,
    AmbientTemperature,
    Proximity,
    Pressure,
    Humidity,
    RotationVector,
    Unknown,
}

impl SensorType {
    /// Number of `data[]` fields this sensor type fills in an [Event].
    pub fn num_fields(&self) -> usize {
        match self {
            SensorType::Accelerometer
            | SensorType::MagneticField
            | SensorType::Orientation
            | SensorType::Gyroscope => 3,
            SensorType::Light
            | SensorType::Temperature
            | SensorType::AmbientTemperature
            | SensorType::Proximity
            | SensorType::Pressure
            | SensorType::Humidity => 1,
            SensorType::RotationVector => 4,
            SensorType::Unknown => 0,
        }
    }
}

/// One event as delivered to the caller of [crate::Controller::poll_once].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Event {
    pub version: u32,
    pub sensor: SensorId,
    pub sensor_type: SensorType,
    pub timestamp_ns: i64,
    pub data: [f32; 16],
}

impl Event {
    pub fn zeroed(sensor: SensorId, sensor_type: SensorType) -> Self {
        Self {
            version: 1,
            sensor,
            sensor_type,
            timestamp_ns: 0,
            data: [0.0; 16],
        }
    }
}

/// Capability set a sensor's catalog entry injects at enumeration time.
///
/// Trait object rather than three raw function pointers, so a catalog can
/// close over whatever per-sensor state (calibration tables, filters) it
/// needs without an extra context argument.
pub trait SensorOps: Send {
    /// Extract field `channel` from one trigger-mode report, starting at
    /// `raw[0]` (the caller has already sliced to this channel's bytes).
    fn transform(&self, channel: usize, raw: &[u8]) -> f32;

    /// Post-process a freshly shaped event (e.g. calibration, unit
    /// conversion, quaternion completion).
    fn finalize(&self, event: &mut Event);

    /// Read field `channel` directly, for a poll-mode sensor.
    fn acquire_immediate_value(&self, channel: usize) -> CoreResult<f32>;
}

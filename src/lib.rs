//! Control core of a Linux IIO-backed sensor multiplexer: activation and
//! refcounting of kernel IIO channels, report-layout planning, a
//! single-threaded wait/dispatch loop multiplexing device character
//! devices and a timer deadline, a rate controller, and an event shaper.
//!
//! The crate exposes no CLI and reads no environment variables; it is
//! meant to be driven by a caller that owns a [Controller] and calls
//! [Controller::poll_once] in a loop on one thread, while serializing
//! [Controller::activate] and [Controller::sampling_interval] calls from
//! other threads against that loop (e.g. behind a `Mutex<Controller<_>>`).

pub mod controller;
pub mod error;
pub mod layout;
pub mod sysfs;
pub mod types;
pub mod typespec;

mod activation;
mod rate;
mod shaper;
mod waiter;

#[cfg(test)]
mod test_support;

pub use controller::{Controller, DeviceState, SensorSlot};
pub use error::{CoreError, CoreResult};
pub use types::{
    now_ns, DeviceId, Event, SensorId, SensorOps, SensorType, INVALID_DEV_NUM, MAX_CHANNELS,
    MAX_DEVICES, MAX_SENSORS, MAX_SENSOR_REPORT_SIZE, POLL_MIN_INTERVAL,
};

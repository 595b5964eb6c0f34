//! Report-layout planner: recomputes each enabled channel's byte offset
//! within its device's packed report, from the kernel's current
//! `scan_elements/*` sysfs attributes.

use std::collections::HashMap;

use crate::error::CoreResult;
use crate::sysfs::{self, SysfsIo};
use crate::types::{DeviceId, MAX_CHANNELS, MAX_SENSORS};
use crate::typespec::decode_type_spec;

/// One channel of a logical sensor, as tracked by the planner.
#[derive(Debug, Clone)]
pub struct Channel {
    /// Sysfs tag, e.g. `accel_x`, used to build `scan_elements/<tag>_*` paths.
    pub tag: String,
    pub enabled: bool,
    pub scan_index: usize,
    /// Storage size in bytes. Zero when disabled or unreadable.
    pub size: usize,
    /// Byte offset within the device's packed report. Meaningful only when
    /// `enabled`.
    pub offset: usize,
}

impl Channel {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            enabled: false,
            scan_index: 0,
            size: 0,
            offset: 0,
        }
    }
}

/// Anything the planner needs from a logical sensor bound to one device.
pub trait LayoutSensor {
    fn device(&self) -> DeviceId;
    fn channels_mut(&mut self) -> &mut [Channel];
}

/// Recompute byte offsets for every enabled channel of every sensor bound
/// to `device`, from the kernel's live `scan_elements/*` attributes.
///
/// Channels whose `_en` reads zero, or whose `_type`/`_index` are
/// unreadable or malformed, are treated as absent. Scan indices that
/// collide are resolved last-writer-wins (in catalog order), with a
/// warning — this mirrors the layout planner's original behavior rather
/// than rejecting the configuration outright.
pub fn refresh<S, T>(sysfs: &S, device: DeviceId, sensors: &mut [T]) -> CoreResult<()>
where
    S: SysfsIo,
    T: LayoutSensor,
{
    // scan_index -> (sensor position, channel position, size)
    let mut by_index: HashMap<usize, (usize, usize, usize)> = HashMap::new();

    for (sensor_pos, sensor) in sensors.iter_mut().enumerate() {
        if sensor.device() != device {
            continue;
        }
        for (channel_pos, channel) in sensor.channels_mut().iter_mut().enumerate() {
            channel.enabled = false;
            channel.size = 0;
            channel.offset = 0;

            let en_path = sysfs::channel_en_path(device, &channel.tag);
            let en = match sysfs.read_int(&en_path) {
                Ok(v) => v != 0,
                Err(_) => continue,
            };
            if !en {
                continue;
            }

            let index_path = sysfs::channel_index_path(device, &channel.tag);
            let scan_index = match sysfs.read_int(&index_path) {
                Ok(v) if v >= 0 => v as usize,
                _ => {
                    log::warn!(
                        "device {:?} channel {:?}: unreadable scan index, treating as absent",
                        device,
                        channel.tag
                    );
                    continue;
                }
            };
            if scan_index >= MAX_SENSORS * MAX_CHANNELS {
                log::warn!(
                    "device {:?} channel {:?}: scan index {} out of range, skipping",
                    device,
                    channel.tag,
                    scan_index
                );
                continue;
            }

            let type_path = sysfs::channel_type_path(device, &channel.tag);
            let type_info = match sysfs
                .read_string(&type_path)
                .ok()
                .and_then(|s| decode_type_spec(&type_path, &s).ok())
            {
                Some(info) => info,
                None => {
                    log::warn!(
                        "device {:?} channel {:?}: malformed type descriptor, treating as absent",
                        device,
                        channel.tag
                    );
                    continue;
                }
            };

            channel.scan_index = scan_index;

            if let Some((prev_sensor, prev_channel, _)) =
                by_index.insert(scan_index, (sensor_pos, channel_pos, type_info.size))
            {
                log::warn!(
                    "device {:?}: scan index {} shared between two channels (sensor {}, channel {}) and (sensor {}, channel {}); last writer wins",
                    device,
                    scan_index,
                    prev_sensor,
                    prev_channel,
                    sensor_pos,
                    channel_pos,
                );
            }
        }
    }

    let mut ordered: Vec<(usize, usize, usize, usize)> = by_index
        .into_iter()
        .map(|(scan_index, (sensor_pos, channel_pos, size))| {
            (scan_index, sensor_pos, channel_pos, size)
        })
        .collect();
    ordered.sort_by_key(|(scan_index, ..)| *scan_index);

    let mut offset = 0usize;
    for (_, sensor_pos, channel_pos, size) in ordered {
        let sensor = &mut sensors[sensor_pos];
        let channel = &mut sensor.channels_mut()[channel_pos];
        channel.enabled = true;
        channel.size = size;
        channel.offset = offset;
        offset += size;
    }

    Ok(())
}

use std::{
    fs,
    path::{Path, PathBuf},
    thread,
    time::Duration,
};

use log::warn;

use super::{round2, SensorSource, CHANNELS};
use crate::error::SensorError;

pub const DEFAULT_W1_DEVICES_DIR: &str = "/sys/bus/w1/devices";

/// DS18B20 family code; device directories are named `28-<serial>`.
const DEVICE_PREFIX: &str = "28";
const SLAVE_FILE: &str = "w1_slave";
const RETRY_DELAY: Duration = Duration::from_millis(200);
const DEFAULT_MAX_ATTEMPTS: u32 = 50;

/// Reads DS18B20 sensors through the kernel's w1 sysfs interface.
///
/// `w1_slave` looks like:
///
/// ```text
/// 72 01 4b 46 7f ff 0e 10 57 : crc=57 YES
/// 72 01 4b 46 7f ff 0e 10 57 t=23125
/// ```
pub struct W1Source {
    devices_dir: PathBuf,
    retry_delay: Duration,
    max_attempts: u32,
    warned_extra: bool,
}

impl W1Source {
    pub fn new(devices_dir: impl Into<PathBuf>) -> Self {
        Self {
            devices_dir: devices_dir.into(),
            retry_delay: RETRY_DELAY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            warned_extra: false,
        }
    }

    pub fn with_retry(mut self, delay: Duration, max_attempts: u32) -> Self {
        self.retry_delay = delay;
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Sensor directories, sorted so channel order is stable between polls.
    pub fn discover(&self) -> Result<Vec<PathBuf>, SensorError> {
        let entries = fs::read_dir(&self.devices_dir).map_err(|_| SensorError::NoDevices {
            dir: self.devices_dir.clone(),
        })?;

        let mut devices: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| {
                entry
                    .file_name()
                    .to_str()
                    .is_some_and(|name| name.starts_with(DEVICE_PREFIX))
            })
            .map(|entry| entry.path())
            .collect();
        devices.sort();

        if devices.is_empty() {
            return Err(SensorError::NoDevices {
                dir: self.devices_dir.clone(),
            });
        }
        Ok(devices)
    }

    /// Blocks until the device reports a valid conversion or the attempts run out.
    pub fn read_device(&self, device: &Path) -> Result<f64, SensorError> {
        let name = device_name(device);
        let slave = device.join(SLAVE_FILE);

        for attempt in 1..=self.max_attempts {
            let raw = fs::read_to_string(&slave).map_err(|source| SensorError::Io {
                device: name.clone(),
                source,
            })?;

            if let Some(celsius) = parse_w1_slave(&raw, &name)? {
                return Ok(celsius);
            }
            if attempt < self.max_attempts {
                thread::sleep(self.retry_delay);
            }
        }

        Err(SensorError::NotReady {
            device: name,
            attempts: self.max_attempts,
        })
    }
}

impl SensorSource for W1Source {
    fn poll(&mut self) -> Result<[f64; CHANNELS], SensorError> {
        let devices = self.discover()?;
        if devices.len() < CHANNELS {
            return Err(SensorError::TooFewDevices {
                found: devices.len(),
                required: CHANNELS,
            });
        }
        if devices.len() > CHANNELS && !self.warned_extra {
            warn!(
                "{} sensors found, only the first {CHANNELS} are recorded",
                devices.len()
            );
            self.warned_extra = true;
        }

        let mut values = [0.0; CHANNELS];
        for (value, device) in values.iter_mut().zip(&devices) {
            *value = self.read_device(device)?;
        }
        Ok(values)
    }

    fn describe(&self) -> String {
        format!("1-wire sensors in {}", self.devices_dir.display())
    }
}

fn device_name(device: &Path) -> String {
    device
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| device.display().to_string())
}

/// `Ok(None)` while the CRC line does not end in `YES`.
fn parse_w1_slave(raw: &str, device: &str) -> Result<Option<f64>, SensorError> {
    let malformed = |reason: &str| SensorError::Malformed {
        device: device.to_string(),
        reason: reason.to_string(),
    };

    let mut lines = raw.lines();
    let status = lines.next().ok_or_else(|| malformed("empty status file"))?;
    if !status.trim_end().ends_with("YES") {
        return Ok(None);
    }

    let data = lines.next().ok_or_else(|| malformed("missing data line"))?;
    let Some(pos) = data.find("t=") else {
        return Ok(None);
    };
    let millidegrees: f64 = data[pos + 2..]
        .trim()
        .parse()
        .map_err(|_| malformed("temperature is not a number"))?;

    Ok(Some(round2(millidegrees / 1000.0)))
}

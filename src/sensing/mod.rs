//! Temperature sources polled by the acquisition loop.

mod simulated;
mod w1;

pub use simulated::SimulatedSource;
pub use w1::{W1Source, DEFAULT_W1_DEVICES_DIR};

use std::sync::{Arc, Mutex};

use crate::error::SensorError;
use crate::settings::Settings;

/// Number of channels every source reports.
pub const CHANNELS: usize = 3;

/// Something that yields one reading per channel, in °C.
///
/// `poll` may block (the 1-wire driver waits for conversions), so async
/// callers run it on a blocking worker.
pub trait SensorSource: Send {
    fn poll(&mut self) -> Result<[f64; CHANNELS], SensorError>;

    fn describe(&self) -> String;
}

/// A source shared between the loop and the blocking worker that polls it.
pub type SharedSource = Arc<Mutex<Box<dyn SensorSource>>>;

/// Picks the source the settings ask for: simulated in debug mode, the
/// 1-wire bus otherwise.
pub fn source_for(settings: &Settings) -> SharedSource {
    let source: Box<dyn SensorSource> = if settings.debug_mode {
        Box::new(SimulatedSource::new())
    } else {
        Box::new(W1Source::new(DEFAULT_W1_DEVICES_DIR))
    };
    Arc::new(Mutex::new(source))
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

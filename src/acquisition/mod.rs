pub(crate) mod commands;
pub mod controller;
pub mod loop_worker;
pub mod state;
pub mod view;

pub use controller::AcquisitionController;
pub use loop_worker::{AcquisitionLoop, TickReport};
pub use state::{LiveHistory, LiveReading, LiveStatus, RecordingState, StoreState};
pub use view::{LiveFrame, LiveView, TerminalLiveView};

pub mod reading;

pub use reading::{DateRange, Reading};

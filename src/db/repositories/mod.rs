pub mod export;
pub mod readings;

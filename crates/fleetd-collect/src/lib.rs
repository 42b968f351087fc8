pub mod collector;
pub mod cpu;
pub mod disk;
pub mod error;
pub mod memory;
pub mod os_info;
pub mod software;

pub use collector::{capabilities, default_collectors, Collector};
pub use error::CollectError;

pub mod expirer;
pub mod metrics;
pub mod partitions;
pub mod writer;

pub use expirer::CommandExpirer;
pub use metrics::PipelineMetrics;
pub use partitions::PartitionManager;
pub use writer::TelemetryWriter;

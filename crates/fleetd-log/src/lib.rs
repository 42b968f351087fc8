pub mod error;
pub mod jetstream;
pub mod memory;
pub mod seam;

pub use error::LogError;
pub use jetstream::JetStreamLog;
pub use memory::InMemoryLog;
pub use seam::{EnvelopeConsumer, EnvelopePublisher, MessageAck, PulledMessage};

/// Stream holding every accepted envelope until the writer acknowledges it.
pub const STREAM_NAME: &str = "TELEMETRY";

/// The one subject the ingest endpoint publishes to.
pub const SUBJECT: &str = "telemetry.ingest";

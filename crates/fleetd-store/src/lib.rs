pub mod error;
pub mod memory;
pub mod partition;
pub mod postgres;
pub mod store;

pub use error::StoreError;
pub use memory::InMemoryStore;
pub use partition::{partition_day, partition_name, partition_window};
pub use postgres::PostgresStore;
pub use store::{DeviceAuth, Store};

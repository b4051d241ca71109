pub mod context;
pub mod producer;


pub use context::RelayContext;
pub use producer::{KafkaConnector, KafkaSession};

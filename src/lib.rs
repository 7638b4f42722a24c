pub mod loader;
pub mod pipeline;
pub mod table;
pub mod transform;
pub mod utils;

pub use simfake_config as conf;

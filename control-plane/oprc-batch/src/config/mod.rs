mod types;

pub use types::HealthConfig;

pub mod config;
pub mod errors;
pub mod kernel;
pub mod message;
pub mod router;
pub mod traits;
pub mod types;

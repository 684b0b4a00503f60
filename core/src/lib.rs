pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod nutrients;
pub mod openfoodfacts;
pub mod orchestrator;
pub mod quantize;
pub mod remote;
pub mod service;
pub mod store;
pub mod wire;

pub use error::{SyncError, SyncResult};

pub mod abs_client;
pub mod config;
pub mod connections;
pub mod domain;
pub mod error;
pub mod events;
pub mod storage;
pub mod sync;

pub use error::{Result, SyncError};

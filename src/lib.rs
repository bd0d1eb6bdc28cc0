pub mod adapter;
pub mod config;
pub mod error;
pub mod progress;
pub mod remote;
pub mod services;
pub mod snapshot;
pub mod util;

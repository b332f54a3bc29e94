pub mod config;
pub mod error;
pub mod media;
pub mod metrics;
pub mod report;
pub mod state;

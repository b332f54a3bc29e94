pub mod orchestrator;
pub mod sinks;

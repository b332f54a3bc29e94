pub mod clock_model;
pub mod engine;

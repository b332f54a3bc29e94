pub mod buffer_pool;
pub mod drift_history;
pub mod exchange_queue;

pub mod consumers;
pub mod session_delegate;
pub mod sources;

pub mod capability;
pub mod console;
pub mod executor;
pub mod orchestrator;
pub mod session;

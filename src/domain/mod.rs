pub mod capability;
pub mod plan;
pub mod report;
pub mod types;

mod process;

pub use process::McpProcess;

pub mod mcp;
pub mod model;

pub mod definitions;
pub mod executor;

pub use definitions::{tool_definitions, ToolName};
pub use executor::{ToolExecutor, ToolOutput};

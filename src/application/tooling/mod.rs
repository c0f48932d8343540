mod catalog;
mod manager;

pub use catalog::{AggregateCatalog, AggregatedTool, fold_server_tools, glob_match, safe_key};
pub use manager::{ConnectFailure, DEBUG_ENV, ServerHealth, ToolManager};

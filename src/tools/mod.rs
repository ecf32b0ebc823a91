pub mod document;
pub mod executor;
pub mod fetch;
pub mod filesystem;
pub mod registry;
pub mod schema;
pub mod search;

pub use document::{CompileDocumentTool, CreateDocumentTool};
pub use executor::{ToolExecutor, ToolResult};
pub use fetch::{FetchPageTool, FetchedPage, HttpFetcher, PageFetcher};
pub use filesystem::{DirectoryEntry, ListDirectoryTool, ReadFileTool, WriteFileTool};
pub use registry::{Tool, ToolKind, ToolRegistry};
pub use schema::{parameters_schema, parse_args, tool_call_schema_json};
pub use search::{DuckDuckGoSearch, SearchHit, SearchProvider, WebSearchTool};

pub mod credential;
pub mod drive;
pub mod graph_client;
pub mod logger;
pub mod paginator;
pub mod projection;
pub mod resources;
pub mod token_cache;
pub mod tool_executor;
pub mod transport;
pub mod validation;

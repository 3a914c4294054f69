pub mod client;
pub mod error;
pub mod fanout;
pub mod feed;
pub mod graph;
pub mod likes;
pub mod loader;
pub mod memory;
pub mod posts;
mod record;
pub mod reindex;
pub mod store;
pub mod timeline;

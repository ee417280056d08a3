pub mod config;
pub mod error;
pub mod extractor;
pub mod http;
pub mod ledger;
pub mod pool;
pub mod publisher;
pub mod reporter;
pub mod scheduler;
pub mod session;
pub mod store;
pub mod timing;
pub mod types;
pub mod watermark;

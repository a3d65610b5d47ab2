pub mod ingest;
pub mod notify;
pub mod report;
pub mod server;
pub mod storage;

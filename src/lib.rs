pub mod api;
pub mod config;
pub mod dashboard;
pub mod db;
pub mod frame;
pub mod ingest;
pub mod link_status;
pub mod serial;
pub mod store;

pub mod analytics;
pub mod api;
pub mod config;
pub mod error;
pub mod idgen;
pub mod models;
pub mod realtime;
pub mod redirect;
pub mod shortener;
pub mod storage;

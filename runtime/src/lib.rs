pub mod ai;
pub mod config;
pub mod pipeline;
pub mod query;
pub mod storage;

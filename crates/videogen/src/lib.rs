pub mod api;
pub mod billing;
pub mod config;
pub mod db;
pub mod engines;
pub mod error;
pub mod notify;
pub mod storage;
pub mod videos;

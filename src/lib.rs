pub mod app;
pub mod assay;
pub mod config;
pub mod domain;
pub mod download;
pub mod encode;
pub mod error;
pub mod flatten;
pub mod manifest;
pub mod output;
pub mod pairs;
pub mod pool;
pub mod progress;
pub mod resolve;
pub mod sheet;

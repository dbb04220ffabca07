pub mod api;
pub mod cache;
pub mod config;
pub mod console;
pub mod models;
pub mod progress;
pub mod run;
pub mod sse;
pub mod wizard;

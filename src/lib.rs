// Kagami image loading service library

pub mod cache;
pub mod config;
pub mod error;
pub mod fetch;
pub mod geometry;
pub mod logging;
pub mod raw;
pub mod request;
pub mod scheduler;
pub mod service;
pub mod task;

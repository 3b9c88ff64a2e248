pub mod app;
pub mod cache;
pub mod cli;
pub mod compass;
pub mod config;
pub mod fmt;
pub mod logging;
pub mod persist;
pub mod scraper;
pub mod utils;

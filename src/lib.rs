//! Library crate for subscan-rs: wordlist-driven subdomain discovery over the platform resolver.
pub mod config;
pub mod error;
pub mod export;
pub mod logging;
pub mod resolver;
pub mod scanner;
pub mod server;
pub mod types;
pub mod wordlist;

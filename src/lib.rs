pub mod app;
pub mod config;
pub mod files;
pub mod notify;
pub mod session;
pub mod shared;
pub mod tree;

pub mod app;
pub mod catalog;
pub mod config;
pub mod credentials;
pub mod disk;
pub mod dogapi;
pub mod domain;
pub mod error;
pub mod manifest;
pub mod output;
pub mod resolver;
pub mod transfer;
pub mod tui;

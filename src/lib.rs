#![allow(clippy::uninlined_format_args)]

pub mod admin;
pub mod app;
pub mod board;
pub mod config;
pub mod content;
pub mod data;
pub mod form;
pub mod logging;
pub mod media;
pub mod model;
pub mod moderation;
pub mod navigator;
pub mod render;
pub mod session;
pub mod storage;
pub mod ui;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use app::{run, RunOptions};

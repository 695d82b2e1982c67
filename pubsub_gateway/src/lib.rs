#![warn(clippy::all, rust_2018_idioms)]

pub mod app;
pub mod config;
pub mod error;
mod handlers;
mod pages;
mod params;
pub mod status;

pub use app::router;
pub use config::Args;

pub mod bot;
pub mod config;
pub mod error;
pub mod gate;
pub mod web;

pub use config::AppConfig;
pub use error::{AppError, AppResult};

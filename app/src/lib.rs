pub mod app;
pub mod config;
pub mod ui;

pub use app::MagicApp;
pub use config::AppPaths;

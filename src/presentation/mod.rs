// Presentation layer - HTTP surface over the tile synchronizer
pub mod app_state;
pub mod handlers;
pub mod live_monitor;

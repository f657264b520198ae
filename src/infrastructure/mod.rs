// Infrastructure layer - External dependencies and adapters
pub mod config;
pub mod logging;
pub mod template_api;
pub mod websocket_connector;

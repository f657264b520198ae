// Application state for HTTP handlers
use crate::application::template_directory::TemplateDirectory;
use crate::application::tile_synchronizer::TileSynchronizer;
use crate::presentation::live_monitor::LiveMonitor;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub synchronizer: Arc<TileSynchronizer>,
    pub directory: Arc<TemplateDirectory>,
    pub monitor: Arc<LiveMonitor>,
}

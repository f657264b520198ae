// Channel and tile board activity, kept for the status endpoints
use crate::application::event_hub::ListenerId;
use crate::application::live_channel::ChannelError;
use crate::application::tile_synchronizer::{TileEvent, TileSynchronizer};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LiveActivity {
    pub connects: u64,
    pub disconnects: u64,
    pub last_error: Option<String>,
    /// Set when the channel stops retrying, cleared by the next successful connect
    pub gave_up: bool,
    /// Bumped on every tile insert, update or removal
    pub board_version: u64,
    pub last_tile_change: Option<DateTime<Utc>>,
}

pub struct LiveMonitor {
    synchronizer: Arc<TileSynchronizer>,
    activity: Arc<Mutex<LiveActivity>>,
    connected: ListenerId,
    disconnected: ListenerId,
    error: ListenerId,
    tiles: ListenerId,
}

impl LiveMonitor {
    /// Start recording; attach before mounting to count the initial tiles
    pub fn attach(synchronizer: Arc<TileSynchronizer>) -> Self {
        let activity = Arc::new(Mutex::new(LiveActivity::default()));
        let channel = synchronizer.channel();

        let sink = activity.clone();
        let connected = channel.on_connected(move |_| {
            let mut activity = lock(&sink);
            activity.connects += 1;
            activity.gave_up = false;
        });

        let sink = activity.clone();
        let disconnected = channel.on_disconnected(move |_| lock(&sink).disconnects += 1);

        let sink = activity.clone();
        let error = channel.on_error(move |error: &ChannelError| {
            if error.is_terminal() {
                tracing::error!("Tiles stop updating until the live channel is reconnected: {}", error);
            }
            let mut activity = lock(&sink);
            activity.last_error = Some(error.to_string());
            activity.gave_up |= error.is_terminal();
        });

        let sink = activity.clone();
        let tiles = synchronizer.events().on(move |_: &TileEvent| {
            let mut activity = lock(&sink);
            activity.board_version += 1;
            activity.last_tile_change = Some(Utc::now());
        });

        Self {
            synchronizer,
            activity,
            connected,
            disconnected,
            error,
            tiles,
        }
    }

    pub fn activity(&self) -> LiveActivity {
        lock(&self.activity).clone()
    }
}

impl Drop for LiveMonitor {
    fn drop(&mut self) {
        let channel = self.synchronizer.channel();
        channel.off_connected(self.connected);
        channel.off_disconnected(self.disconnected);
        channel.off_error(self.error);
        self.synchronizer.events().off(self.tiles);
    }
}

fn lock(activity: &Mutex<LiveActivity>) -> MutexGuard<'_, LiveActivity> {
    activity.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::live_channel::{ChannelSettings, ChannelStatus, LiveChannelClient};
    use crate::application::template_directory::TemplateDirectory;
    use crate::application::test_support::{FakeConnector, FakeTemplateRepository};
    use crate::domain::template::sample_template;
    use std::time::Duration;

    fn synchronizer(connector: Arc<FakeConnector>) -> (Arc<TemplateDirectory>, Arc<TileSynchronizer>) {
        let repository = Arc::new(FakeTemplateRepository::new(vec![
            sample_template(1, "Revenue"),
            sample_template(2, "Costs"),
        ]));
        let directory = Arc::new(TemplateDirectory::new(repository));
        let channel = LiveChannelClient::new(ChannelSettings::new("ws://test/api/live"), connector);
        (directory.clone(), Arc::new(TileSynchronizer::new(directory, channel)))
    }

    #[tokio::test(start_paused = true)]
    async fn test_records_connects_and_tile_changes() {
        let connector = Arc::new(FakeConnector::default());
        let (directory, sync) = synchronizer(connector.clone());
        let monitor = LiveMonitor::attach(sync.clone());

        sync.mount().await.unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
        directory.delete(2).await.unwrap();

        let activity = monitor.activity();
        assert_eq!(activity.connects, 1);
        assert_eq!(activity.disconnects, 0);
        assert_eq!(activity.board_version, 3);
        assert!(activity.last_tile_change.is_some());
        assert!(!activity.gave_up);

        drop(monitor);
        assert_eq!(sync.events().listener_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flags_exhausted_channel_until_reconnect() {
        let connector = Arc::new(FakeConnector::default());
        connector.refuse(100);
        let (_directory, sync) = synchronizer(connector.clone());
        let monitor = LiveMonitor::attach(sync.clone());

        sync.mount().await.unwrap();
        // 1 + 2 + 4 + 8 + 16 seconds of retries
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(sync.channel().status(), ChannelStatus::Exhausted);

        let activity = monitor.activity();
        assert!(activity.gave_up);
        assert_eq!(
            activity.last_error.as_deref(),
            Some("live channel gave up after 5 reconnect attempts")
        );
        assert_eq!(activity.connects, 0);

        connector.refuse(0);
        sync.channel().connect();
        tokio::time::sleep(Duration::from_millis(1)).await;

        let activity = monitor.activity();
        assert!(!activity.gave_up);
        assert_eq!(activity.connects, 1);
    }
}

// Tile synchronizer - Merges directory state and live updates into tile view models
use crate::application::event_hub::{EventHub, ListenerId};
use crate::application::live_channel::LiveChannelClient;
use crate::application::template_directory::{FetchOutcome, TemplateDirectory};
use crate::application::template_repository::DirectoryError;
use crate::domain::live_update::LiveUpdate;
use crate::domain::template::{Template, TemplateId};
use crate::domain::tile::TileViewModel;
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileEvent {
    Inserted(TemplateId),
    Updated(TemplateId),
    Removed(TemplateId),
}

/// The tile map plus its change notifications. Shared with the listeners
/// registered on the directory and the channel.
struct TileBoard {
    tiles: Mutex<BTreeMap<TemplateId, TileViewModel>>,
    events: EventHub<TileEvent>,
}

impl TileBoard {
    fn lock(&self) -> MutexGuard<'_, BTreeMap<TemplateId, TileViewModel>> {
        self.tiles.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Align with a full directory snapshot: add missing tiles, refresh
    /// definitions, and drop tiles whose template is gone.
    fn sync(&self, templates: &[Template]) {
        let now = Utc::now();
        let mut changes = Vec::new();
        {
            let mut tiles = self.lock();
            let known: BTreeSet<TemplateId> = templates.iter().map(|t| t.id).collect();
            tiles.retain(|id, _| {
                let keep = known.contains(id);
                if !keep {
                    changes.push(TileEvent::Removed(*id));
                }
                keep
            });

            for template in templates {
                match tiles.get_mut(&template.id) {
                    Some(tile) if tile.template != *template => {
                        tile.replace_template(template.clone());
                        changes.push(TileEvent::Updated(template.id));
                    }
                    Some(_) => {}
                    None => {
                        tiles.insert(template.id, TileViewModel::new(template.clone(), now));
                        changes.push(TileEvent::Inserted(template.id));
                    }
                }
            }
        }

        for change in &changes {
            self.events.emit(change);
        }
    }

    fn insert(&self, template: &Template) {
        let inserted = {
            let mut tiles = self.lock();
            if tiles.contains_key(&template.id) {
                false
            } else {
                tiles.insert(template.id, TileViewModel::new(template.clone(), Utc::now()));
                true
            }
        };
        if inserted {
            self.events.emit(&TileEvent::Inserted(template.id));
        } else {
            self.replace_template(template);
        }
    }

    fn replace_template(&self, template: &Template) {
        let replaced = match self.lock().get_mut(&template.id) {
            Some(tile) => {
                tile.replace_template(template.clone());
                true
            }
            None => false,
        };
        if replaced {
            self.events.emit(&TileEvent::Updated(template.id));
        } else {
            self.insert(template);
        }
    }

    fn remove(&self, id: TemplateId) {
        let removed = self.lock().remove(&id).is_some();
        if removed {
            self.events.emit(&TileEvent::Removed(id));
        }
    }

    fn apply_live_update(&self, update: &LiveUpdate) {
        let applied = match self.lock().get_mut(&update.template_id) {
            None => {
                tracing::warn!(
                    template_id = update.template_id,
                    "Dropping live update for unknown template"
                );
                false
            }
            Some(tile) if tile.is_stale(update) => {
                tracing::debug!(template_id = update.template_id, "Dropping out-of-order live update");
                false
            }
            Some(tile) => {
                tile.apply(update);
                true
            }
        };
        if applied {
            self.events.emit(&TileEvent::Updated(update.template_id));
        }
    }
}

struct Subscriptions {
    changed: ListenerId,
    created: ListenerId,
    updated: ListenerId,
    deleted: ListenerId,
    live_update: ListenerId,
}

pub struct TileSynchronizer {
    directory: Arc<TemplateDirectory>,
    channel: LiveChannelClient,
    board: Arc<TileBoard>,
    subscriptions: Mutex<Option<Subscriptions>>,
}

impl TileSynchronizer {
    pub fn new(directory: Arc<TemplateDirectory>, channel: LiveChannelClient) -> Self {
        Self {
            directory,
            channel,
            board: Arc::new(TileBoard {
                tiles: Mutex::new(BTreeMap::new()),
                events: EventHub::new("tiles"),
            }),
            subscriptions: Mutex::new(None),
        }
    }

    pub fn events(&self) -> &EventHub<TileEvent> {
        &self.board.events
    }

    pub fn channel(&self) -> &LiveChannelClient {
        &self.channel
    }

    pub fn is_mounted(&self) -> bool {
        self.lock_subscriptions().is_some()
    }

    /// Start following the directory and the live channel, then load templates.
    /// A failed fetch is returned; the channel stays connected either way.
    pub async fn mount(&self) -> Result<FetchOutcome, DirectoryError> {
        {
            let mut subscriptions = self.lock_subscriptions();
            if subscriptions.is_none() {
                *subscriptions = Some(self.subscribe());
                self.channel.connect();
            }
        }

        let outcome = self.directory.fetch_all().await;
        self.board.sync(&self.directory.get_all());
        outcome
    }

    /// Stop following updates and release this synchronizer's hold on the channel
    pub fn unmount(&self) {
        let Some(subscriptions) = self.lock_subscriptions().take() else {
            return;
        };
        let events = self.directory.events();
        events.changed.off(subscriptions.changed);
        events.created.off(subscriptions.created);
        events.updated.off(subscriptions.updated);
        events.deleted.off(subscriptions.deleted);
        self.channel.off_live_update(subscriptions.live_update);
        self.channel.disconnect();
    }

    /// Copies of every tile, ordered by template id
    pub fn snapshot(&self) -> Vec<TileViewModel> {
        self.board.lock().values().cloned().collect()
    }

    pub fn tile(&self, id: TemplateId) -> Option<TileViewModel> {
        self.board.lock().get(&id).cloned()
    }

    fn subscribe(&self) -> Subscriptions {
        let events = self.directory.events();

        let board = self.board.clone();
        let changed = events.changed.on(move |templates: &Vec<Template>| board.sync(templates));

        let board = self.board.clone();
        let created = events.created.on(move |template: &Template| board.insert(template));

        let board = self.board.clone();
        let updated = events.updated.on(move |template: &Template| board.replace_template(template));

        let board = self.board.clone();
        let deleted = events.deleted.on(move |id: &TemplateId| board.remove(*id));

        let board = self.board.clone();
        let live_update = self
            .channel
            .on_live_update(move |update: &LiveUpdate| board.apply_live_update(update));

        Subscriptions {
            changed,
            created,
            updated,
            deleted,
            live_update,
        }
    }

    fn lock_subscriptions(&self) -> MutexGuard<'_, Option<Subscriptions>> {
        self.subscriptions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for TileSynchronizer {
    fn drop(&mut self) {
        self.unmount();
    }
}

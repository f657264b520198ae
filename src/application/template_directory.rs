// Template directory - Client-side cache of the remote template collection
use crate::application::event_hub::EventHub;
use crate::application::template_repository::{DirectoryError, TemplateRepository};
use crate::domain::template::{Template, TemplateDraft, TemplateId, TemplatePatch};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Cache replaced with this many templates
    Refreshed(usize),
    /// Another fetch was already in flight; nothing was requested
    Coalesced,
}

#[derive(Debug)]
pub struct DirectoryEvents {
    pub changed: EventHub<Vec<Template>>,
    pub created: EventHub<Template>,
    pub updated: EventHub<Template>,
    pub deleted: EventHub<TemplateId>,
    pub error: EventHub<DirectoryError>,
}

impl Default for DirectoryEvents {
    fn default() -> Self {
        Self {
            changed: EventHub::new("directory-changed"),
            created: EventHub::new("template-created"),
            updated: EventHub::new("template-updated"),
            deleted: EventHub::new("template-deleted"),
            error: EventHub::new("directory-error"),
        }
    }
}

pub struct TemplateDirectory {
    repository: Arc<dyn TemplateRepository>,
    cache: RwLock<BTreeMap<TemplateId, Template>>,
    loading: AtomicBool,
    events: DirectoryEvents,
}

/// Clears the in-flight flag even if the fetch future is dropped
struct LoadingGuard<'a>(&'a AtomicBool);

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl TemplateDirectory {
    pub fn new(repository: Arc<dyn TemplateRepository>) -> Self {
        Self {
            repository,
            cache: RwLock::new(BTreeMap::new()),
            loading: AtomicBool::new(false),
            events: DirectoryEvents::default(),
        }
    }

    pub fn events(&self) -> &DirectoryEvents {
        &self.events
    }

    /// All cached templates, ordered by id. Never touches the network.
    pub fn get_all(&self) -> Vec<Template> {
        self.read_cache().values().cloned().collect()
    }

    pub fn get(&self, id: TemplateId) -> Option<Template> {
        self.read_cache().get(&id).cloned()
    }

    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::Acquire)
    }

    /// Replace the cache with the server's collection.
    /// Concurrent calls while one is in flight return `Coalesced`.
    pub async fn fetch_all(&self) -> Result<FetchOutcome, DirectoryError> {
        if self
            .loading
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Template fetch already in flight, skipping");
            return Ok(FetchOutcome::Coalesced);
        }
        let guard = LoadingGuard(&self.loading);
        let result = self.repository.list().await.map(|templates| {
            let snapshot: BTreeMap<TemplateId, Template> =
                templates.into_iter().map(|t| (t.id, t)).collect();
            let all: Vec<Template> = snapshot.values().cloned().collect();
            *self.write_cache() = snapshot;
            all
        });
        // the next fetch may start only once this snapshot is in place
        drop(guard);

        match result {
            Ok(all) => {
                tracing::info!("Loaded {} templates", all.len());
                self.events.changed.emit(&all);
                Ok(FetchOutcome::Refreshed(all.len()))
            }
            Err(e) => {
                tracing::error!("Error fetching templates: {}", e);
                self.events.error.emit(&e);
                Err(e)
            }
        }
    }

    pub async fn create(&self, draft: &TemplateDraft) -> Result<Template, DirectoryError> {
        match self.repository.create(draft).await {
            Ok(template) => {
                self.write_cache().insert(template.id, template.clone());
                tracing::info!(template_id = template.id, "Created template {}", template.name);
                self.events.created.emit(&template);
                Ok(template)
            }
            Err(e) => Err(self.report("creating", e)),
        }
    }

    pub async fn update(&self, id: TemplateId, patch: &TemplatePatch) -> Result<Template, DirectoryError> {
        match self.repository.update(id, patch).await {
            Ok(template) => {
                self.write_cache().insert(template.id, template.clone());
                tracing::info!(template_id = template.id, "Updated template");
                self.events.updated.emit(&template);
                Ok(template)
            }
            Err(e) => Err(self.report("updating", e)),
        }
    }

    /// Remove a template. The cache entry goes only after the server confirms.
    pub async fn delete(&self, id: TemplateId) -> Result<(), DirectoryError> {
        match self.repository.delete(id).await {
            Ok(()) => {
                self.write_cache().remove(&id);
                tracing::info!(template_id = id, "Deleted template");
                self.events.deleted.emit(&id);
                Ok(())
            }
            Err(e) => Err(self.report("deleting", e)),
        }
    }

    fn report(&self, action: &str, error: DirectoryError) -> DirectoryError {
        tracing::error!("Error {} template: {}", action, error);
        self.events.error.emit(&error);
        error
    }

    fn read_cache(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<TemplateId, Template>> {
        self.cache.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_cache(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<TemplateId, Template>> {
        self.cache.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::test_support::FakeTemplateRepository;
    use crate::domain::template::{WidgetType, sample_template};
    use std::sync::Mutex;

    fn directory_with(templates: Vec<Template>) -> (Arc<FakeTemplateRepository>, Arc<TemplateDirectory>) {
        let repository = Arc::new(FakeTemplateRepository::new(templates));
        let directory = Arc::new(TemplateDirectory::new(repository.clone()));
        (repository, directory)
    }

    fn draft(name: &str) -> TemplateDraft {
        TemplateDraft {
            name: name.to_string(),
            description: None,
            query: "SELECT 1".to_string(),
            source_question: Some(format!("How much {}?", name)),
            widget_type: WidgetType::Number,
            refresh_rate: 10,
        }
    }

    #[tokio::test]
    async fn test_fetch_all_replaces_cache_and_emits() {
        let (repository, directory) = directory_with(vec![sample_template(1, "Revenue")]);
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = seen.clone();
            directory.events().changed.on(move |all: &Vec<Template>| {
                seen.lock().unwrap().push(all.iter().map(|t| t.id).collect::<Vec<_>>());
            });
        }

        assert_eq!(directory.fetch_all().await, Ok(FetchOutcome::Refreshed(1)));
        repository.set_templates(vec![sample_template(2, "Costs"), sample_template(3, "Margin")]);
        assert_eq!(directory.fetch_all().await, Ok(FetchOutcome::Refreshed(2)));

        assert!(directory.get(1).is_none());
        assert_eq!(directory.get_all().iter().map(|t| t.id).collect::<Vec<_>>(), vec![2, 3]);
        assert_eq!(*seen.lock().unwrap(), vec![vec![1], vec![2, 3]]);
    }

    #[tokio::test]
    async fn test_failed_fetch_keeps_previous_snapshot() {
        let (repository, directory) = directory_with(vec![sample_template(1, "Revenue")]);
        directory.fetch_all().await.unwrap();
        let before = directory.get_all();

        let errors = Arc::new(Mutex::new(Vec::new()));
        {
            let errors = errors.clone();
            directory.events().error.on(move |e: &DirectoryError| errors.lock().unwrap().push(e.clone()));
        }
        repository.fail_with(DirectoryError::Http {
            status: 500,
            detail: Some("database locked".to_string()),
        });

        let result = directory.fetch_all().await;
        assert!(matches!(result, Err(DirectoryError::Http { status: 500, .. })));
        assert_eq!(directory.get_all(), before);
        assert_eq!(errors.lock().unwrap().len(), 1);
        assert!(!directory.is_loading());
    }

    #[tokio::test]
    async fn test_concurrent_fetch_is_coalesced() {
        let (repository, directory) = directory_with(vec![sample_template(1, "Revenue")]);
        repository.hold_list();

        let first = {
            let directory = directory.clone();
            tokio::spawn(async move { directory.fetch_all().await })
        };
        tokio::task::yield_now().await;
        assert!(directory.is_loading());

        assert_eq!(directory.fetch_all().await, Ok(FetchOutcome::Coalesced));

        repository.release_list();
        assert_eq!(first.await.unwrap(), Ok(FetchOutcome::Refreshed(1)));
        assert_eq!(repository.list_calls(), 1);
        assert!(!directory.is_loading());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cache_is_written_before_loading_clears() {
        let (repository, directory) = directory_with(vec![sample_template(1, "Revenue"), sample_template(2, "Costs")]);
        repository.hold_list();

        let saw_loading = Arc::new(AtomicBool::new(false));
        let observer = {
            let directory = directory.clone();
            let saw_loading = saw_loading.clone();
            std::thread::spawn(move || {
                while !directory.is_loading() {
                    std::hint::spin_loop();
                }
                saw_loading.store(true, Ordering::SeqCst);
                while directory.is_loading() {
                    std::hint::spin_loop();
                }
                directory.get_all().len()
            })
        };

        let fetch = {
            let directory = directory.clone();
            tokio::spawn(async move { directory.fetch_all().await })
        };
        while !saw_loading.load(Ordering::SeqCst) {
            tokio::task::yield_now().await;
        }

        repository.release_list();
        assert_eq!(fetch.await.unwrap(), Ok(FetchOutcome::Refreshed(2)));
        assert_eq!(observer.join().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_create_update_delete_flow() {
        let (_repository, directory) = directory_with(Vec::new());
        let deleted = Arc::new(Mutex::new(Vec::new()));
        {
            let deleted = deleted.clone();
            directory.events().deleted.on(move |id: &TemplateId| deleted.lock().unwrap().push(*id));
        }

        let created = directory.create(&draft("Revenue")).await.unwrap();
        assert_eq!(directory.get(created.id), Some(created.clone()));

        let patch = TemplatePatch {
            name: Some("Net revenue".to_string()),
            ..TemplatePatch::default()
        };
        let updated = directory.update(created.id, &patch).await.unwrap();
        assert_eq!(updated.name, "Net revenue");
        assert_eq!(directory.get(created.id).unwrap().name, "Net revenue");

        directory.delete(created.id).await.unwrap();
        assert!(directory.get(created.id).is_none());
        assert_eq!(*deleted.lock().unwrap(), vec![created.id]);
    }

    #[tokio::test]
    async fn test_failed_delete_keeps_entry_and_surfaces_error() {
        let (repository, directory) = directory_with(vec![sample_template(1, "Revenue")]);
        directory.fetch_all().await.unwrap();
        repository.fail_with(DirectoryError::Transport("connection refused".to_string()));

        let err = directory.delete(1).await.unwrap_err();
        assert_eq!(err, DirectoryError::Transport("connection refused".to_string()));
        assert!(directory.get(1).is_some());

        let err = directory.create(&draft("Costs")).await.unwrap_err();
        assert!(matches!(err, DirectoryError::Transport(_)));
        assert_eq!(directory.get_all().len(), 1);
    }
}

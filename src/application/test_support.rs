// In-memory stand-ins for the template service and the live channel transport
use crate::application::channel_connector::{ChannelConnector, ChannelTransport, TransportEvent};
use crate::application::template_repository::{DirectoryError, TemplateRepository};
use crate::domain::template::{Template, TemplateDraft, TemplateId, TemplatePatch};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::{Notify, mpsc};
use tokio::time::Instant;

pub struct FakeTemplateRepository {
    templates: Mutex<BTreeMap<TemplateId, Template>>,
    failure: Mutex<Option<DirectoryError>>,
    list_calls: AtomicUsize,
    held: AtomicBool,
    release: Notify,
}

impl FakeTemplateRepository {
    pub fn new(templates: Vec<Template>) -> Self {
        Self {
            templates: Mutex::new(templates.into_iter().map(|t| (t.id, t)).collect()),
            failure: Mutex::new(None),
            list_calls: AtomicUsize::new(0),
            held: AtomicBool::new(false),
            release: Notify::new(),
        }
    }

    pub fn set_templates(&self, templates: Vec<Template>) {
        *self.templates.lock().unwrap() = templates.into_iter().map(|t| (t.id, t)).collect();
    }

    /// Every call fails with `error` until `recover`
    pub fn fail_with(&self, error: DirectoryError) {
        *self.failure.lock().unwrap() = Some(error);
    }

    pub fn recover(&self) {
        *self.failure.lock().unwrap() = None;
    }

    /// Park `list` calls until `release_list`
    pub fn hold_list(&self) {
        self.held.store(true, Ordering::SeqCst);
    }

    pub fn release_list(&self) {
        self.held.store(false, Ordering::SeqCst);
        self.release.notify_one();
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), DirectoryError> {
        match self.failure.lock().unwrap().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn not_found() -> DirectoryError {
        DirectoryError::Http {
            status: 404,
            detail: Some("Template not found".to_string()),
        }
    }
}

#[async_trait]
impl TemplateRepository for FakeTemplateRepository {
    async fn list(&self) -> Result<Vec<Template>, DirectoryError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.held.load(Ordering::SeqCst) {
            self.release.notified().await;
        }
        self.check()?;
        Ok(self.templates.lock().unwrap().values().cloned().collect())
    }

    async fn create(&self, draft: &TemplateDraft) -> Result<Template, DirectoryError> {
        self.check()?;
        let mut templates = self.templates.lock().unwrap();
        let id = templates.keys().next_back().copied().unwrap_or(0) + 1;
        let template = Template {
            id,
            name: draft.name.clone(),
            description: draft.description.clone(),
            query: draft.query.clone(),
            source_question: draft.source_question.clone(),
            widget_type: draft.widget_type,
            refresh_rate: draft.refresh_rate,
            created_at: Utc::now(),
            updated_at: None,
            last_execution: None,
        };
        templates.insert(id, template.clone());
        Ok(template)
    }

    async fn update(&self, id: TemplateId, patch: &TemplatePatch) -> Result<Template, DirectoryError> {
        self.check()?;
        let mut templates = self.templates.lock().unwrap();
        let template = templates.get_mut(&id).ok_or_else(Self::not_found)?;
        if let Some(name) = &patch.name {
            template.name = name.clone();
        }
        if let Some(description) = &patch.description {
            template.description = Some(description.clone());
        }
        if let Some(query) = &patch.query {
            template.query = query.clone();
        }
        if let Some(question) = &patch.source_question {
            template.source_question = Some(question.clone());
        }
        if let Some(widget_type) = patch.widget_type {
            template.widget_type = widget_type;
        }
        if let Some(refresh_rate) = patch.refresh_rate {
            template.refresh_rate = refresh_rate;
        }
        template.updated_at = Some(Utc::now());
        Ok(template.clone())
    }

    async fn delete(&self, id: TemplateId) -> Result<(), DirectoryError> {
        self.check()?;
        self.templates
            .lock()
            .unwrap()
            .remove(&id)
            .map(|_| ())
            .ok_or_else(Self::not_found)
    }
}

struct FakePeer {
    inbound: mpsc::UnboundedSender<TransportEvent>,
    outbound: mpsc::UnboundedReceiver<String>,
    sent: Vec<String>,
    closed: bool,
}

impl FakePeer {
    fn drain(&mut self) {
        loop {
            match self.outbound.try_recv() {
                Ok(frame) => self.sent.push(frame),
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    self.closed = true;
                    break;
                }
            }
        }
    }
}

/// Connector whose transports are driven by the test through peer indices
/// (0 for the first successful open, 1 for the next, ...)
#[derive(Default)]
pub struct FakeConnector {
    peers: Mutex<Vec<FakePeer>>,
    open_times: Mutex<Vec<Instant>>,
    refusals: AtomicUsize,
}

impl FakeConnector {
    /// Refuse the next `count` opens
    pub fn refuse(&self, count: usize) {
        self.refusals.store(count, Ordering::SeqCst);
    }

    pub fn open_calls(&self) -> usize {
        self.open_times.lock().unwrap().len()
    }

    pub fn open_times(&self) -> Vec<Instant> {
        self.open_times.lock().unwrap().clone()
    }

    pub fn push(&self, peer: usize, text: impl Into<String>) {
        let peers = self.peers.lock().unwrap();
        let _ = peers[peer].inbound.send(TransportEvent::Message(text.into()));
    }

    /// Simulate the server closing the connection
    pub fn close(&self, peer: usize) {
        let peers = self.peers.lock().unwrap();
        let _ = peers[peer].inbound.send(TransportEvent::Closed);
    }

    /// Frames the client has sent on `peer` since the last call
    pub fn sent(&self, peer: usize) -> Vec<String> {
        let mut peers = self.peers.lock().unwrap();
        peers[peer].drain();
        std::mem::take(&mut peers[peer].sent)
    }

    /// Whether the client dropped its end of `peer`
    pub fn is_closed(&self, peer: usize) -> bool {
        let mut peers = self.peers.lock().unwrap();
        peers[peer].drain();
        peers[peer].closed
    }
}

#[async_trait]
impl ChannelConnector for FakeConnector {
    async fn open(&self, _endpoint: &str) -> anyhow::Result<ChannelTransport> {
        self.open_times.lock().unwrap().push(Instant::now());
        if self.refusals.load(Ordering::SeqCst) > 0 {
            self.refusals.fetch_sub(1, Ordering::SeqCst);
            anyhow::bail!("connection refused");
        }

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        self.peers.lock().unwrap().push(FakePeer {
            inbound: inbound_tx,
            outbound: outbound_rx,
            sent: Vec::new(),
            closed: false,
        });
        Ok(ChannelTransport {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}

// Repository trait for the remote template collection
use crate::domain::template::{Template, TemplateDraft, TemplateId, TemplatePatch};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum DirectoryError {
    #[error("template service returned {status}{}", detail_suffix(.detail))]
    Http { status: u16, detail: Option<String> },
    #[error("template service unreachable: {0}")]
    Transport(String),
    #[error("invalid response from template service: {0}")]
    Decode(String),
}

impl DirectoryError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, DirectoryError::Http { status: 404, .. })
    }
}

fn detail_suffix(detail: &Option<String>) -> String {
    detail
        .as_ref()
        .map(|detail| format!(": {}", detail))
        .unwrap_or_default()
}

#[async_trait]
pub trait TemplateRepository: Send + Sync {
    /// Read the whole collection
    async fn list(&self) -> Result<Vec<Template>, DirectoryError>;

    /// Create a template; the returned record carries the assigned id
    async fn create(&self, draft: &TemplateDraft) -> Result<Template, DirectoryError>;

    async fn update(&self, id: TemplateId, patch: &TemplatePatch) -> Result<Template, DirectoryError>;

    async fn delete(&self, id: TemplateId) -> Result<(), DirectoryError>;
}

// HTTP repository for the remote template collection
use crate::application::template_repository::{DirectoryError, TemplateRepository};
use crate::domain::template::{Template, TemplateDraft, TemplateId, TemplatePatch};
use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

#[derive(Debug, Clone)]
pub struct HttpTemplateRepository {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    detail: Option<Value>,
}

impl HttpTemplateRepository {
    pub fn new(base_url: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn collection_url(&self) -> String {
        format!("{}/api/templates", self.base_url)
    }

    fn item_url(&self, id: TemplateId) -> String {
        format!("{}/api/templates/{}", self.base_url, id)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, DirectoryError> {
        let response = request
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| DirectoryError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        tracing::debug!("Template service returned {}: {}", status, body);
        Err(DirectoryError::Http {
            status: status.as_u16(),
            detail: extract_detail(&body),
        })
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, DirectoryError> {
        response
            .json::<T>()
            .await
            .map_err(|e| DirectoryError::Decode(e.to_string()))
    }
}

/// `{"detail": ...}` as text; strings verbatim, anything else as JSON
fn extract_detail(body: &str) -> Option<String> {
    let parsed: ErrorBody = serde_json::from_str(body).ok()?;
    match parsed.detail? {
        Value::Null => None,
        Value::String(detail) => Some(detail),
        other => Some(other.to_string()),
    }
}

#[async_trait]
impl TemplateRepository for HttpTemplateRepository {
    async fn list(&self) -> Result<Vec<Template>, DirectoryError> {
        let response = self.send(self.client.get(self.collection_url())).await?;
        Self::decode(response).await
    }

    async fn create(&self, draft: &TemplateDraft) -> Result<Template, DirectoryError> {
        let response = self
            .send(self.client.post(self.collection_url()).json(draft))
            .await?;
        Self::decode(response).await
    }

    async fn update(&self, id: TemplateId, patch: &TemplatePatch) -> Result<Template, DirectoryError> {
        let response = self.send(self.client.put(self.item_url(id)).json(patch)).await?;
        Self::decode(response).await
    }

    async fn delete(&self, id: TemplateId) -> Result<(), DirectoryError> {
        self.send(self.client.delete(self.item_url(id))).await?;
        Ok(())
    }
}

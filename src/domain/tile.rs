// Tile view model - a template plus its most recent live result
use super::live_update::LiveUpdate;
use super::template::Template;
use super::widget::{WidgetData, WidgetDataError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TileViewModel {
    pub template: Template,
    /// `None` until the first live result arrives
    pub data: Option<Value>,
    pub error: Option<String>,
    pub last_update: DateTime<Utc>,
    #[serde(skip)]
    live: bool,
}

impl TileViewModel {
    pub fn new(template: Template, now: DateTime<Utc>) -> Self {
        let last_update = template.last_execution.unwrap_or(now);
        Self {
            template,
            data: None,
            error: None,
            last_update,
            live: false,
        }
    }

    pub fn is_awaiting_data(&self) -> bool {
        !self.live
    }

    /// Whether `update` is older than the live result already shown
    pub fn is_stale(&self, update: &LiveUpdate) -> bool {
        self.live && update.generated_at() < self.last_update
    }

    /// Replace data, error and timestamp together from one update
    pub fn apply(&mut self, update: &LiveUpdate) {
        self.data = Some(update.result.data.clone());
        self.error = update.result.error.clone();
        self.last_update = update.generated_at();
        self.live = true;
    }

    /// Swap the template definition, keeping live data. Until the first push
    /// the placeholder timestamp follows the newer of itself and `last_execution`.
    pub fn replace_template(&mut self, template: Template) {
        if !self.live {
            if let Some(executed) = template.last_execution {
                self.last_update = self.last_update.max(executed);
            }
        }
        self.template = template;
    }

    /// Resolve the payload for rendering; `None` while awaiting the first push
    pub fn widget_data(&self) -> Option<Result<WidgetData, WidgetDataError>> {
        self.data
            .as_ref()
            .map(|data| WidgetData::resolve(self.template.widget_type, data))
    }
}

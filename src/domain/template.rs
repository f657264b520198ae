// Template domain model - persisted query definitions plus display metadata
use super::timestamp;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type TemplateId = i64;

/// Display kind a template's results are rendered with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WidgetType {
    #[default]
    #[serde(alias = "table")]
    Table,
    #[serde(alias = "line_chart")]
    LineChart,
    #[serde(alias = "bar_chart")]
    BarChart,
    #[serde(alias = "pie_chart")]
    PieChart,
    #[serde(alias = "number")]
    Number,
    #[serde(alias = "text")]
    Text,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub id: TemplateId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub query: String,
    #[serde(default)]
    pub source_question: Option<String>,
    #[serde(default)]
    pub widget_type: WidgetType,
    /// Refresh interval in seconds
    #[serde(default)]
    pub refresh_rate: u32,
    #[serde(deserialize_with = "timestamp::required")]
    pub created_at: DateTime<Utc>,
    #[serde(default, deserialize_with = "timestamp::optional")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "timestamp::optional")]
    pub last_execution: Option<DateTime<Utc>>,
}

impl Template {
    /// Title shown on a tile: the originating question when there is one
    pub fn title(&self) -> &str {
        self.source_question.as_deref().unwrap_or(&self.name)
    }
}

/// Body for creating a template; the server assigns id and timestamps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateDraft {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_question: Option<String>,
    #[serde(default)]
    pub widget_type: WidgetType,
    #[serde(default)]
    pub refresh_rate: u32,
}

/// Partial update body; only fields that are set go on the wire
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemplatePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_question: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub widget_type: Option<WidgetType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_rate: Option<u32>,
}

#[cfg(test)]
pub(crate) fn sample_template(id: TemplateId, name: &str) -> Template {
    Template {
        id,
        name: name.to_string(),
        description: None,
        query: format!("SELECT * FROM {}", name.to_lowercase()),
        source_question: None,
        widget_type: WidgetType::Table,
        refresh_rate: 60,
        created_at: DateTime::from_timestamp(1_700_000_000, 0).unwrap_or_default(),
        updated_at: None,
        last_execution: None,
    }
}

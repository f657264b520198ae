// HTTP request handlers
use crate::application::channel_messages::OutboundMessage;
use crate::application::live_channel::ChannelStatus;
use crate::application::template_repository::DirectoryError;
use crate::domain::template::{Template, TemplateDraft, TemplateId, TemplatePatch};
use crate::domain::tile::TileViewModel;
use crate::domain::widget::WidgetData;
use crate::presentation::app_state::AppState;
use crate::presentation::live_monitor::LiveActivity;
use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

/// A tile as served over HTTP, with its payload already resolved for the widget
#[derive(Debug, Serialize)]
pub struct TileResponse {
    #[serde(flatten)]
    pub tile: TileViewModel,
    pub title: String,
    pub awaiting_data: bool,
    pub widget: Option<WidgetData>,
    pub widget_error: Option<String>,
    /// Resolved, but nothing to draw
    pub empty: bool,
}

impl From<TileViewModel> for TileResponse {
    fn from(tile: TileViewModel) -> Self {
        let (widget, widget_error) = match tile.widget_data() {
            Some(Ok(widget)) => (Some(widget), None),
            Some(Err(e)) => (None, Some(e.to_string())),
            None => (None, None),
        };
        Self {
            title: tile.template.title().to_string(),
            awaiting_data: tile.is_awaiting_data(),
            empty: widget.as_ref().is_some_and(WidgetData::is_empty),
            tile,
            widget,
            widget_error,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ChannelResponse {
    pub status: ChannelStatus,
    pub subscribers: usize,
    pub reconnect_attempts: u32,
    pub transports_opened: u64,
    #[serde(flatten)]
    pub activity: LiveActivity,
}

#[derive(Debug, Serialize)]
pub struct TemplatesResponse {
    pub loading: bool,
    pub templates: Vec<Template>,
}

#[derive(Debug, Deserialize)]
pub struct ResultsRequest {
    pub query: String,
}

pub fn routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(health_check))
        .route("/tiles", get(list_tiles))
        .route("/tiles/:id", get(get_tile))
        .route("/channel", get(channel_status))
        .route("/channel/results", post(request_results))
        .route("/templates", get(list_templates).post(create_template))
        .route(
            "/templates/:id",
            get(get_template).put(update_template).delete(delete_template),
        )
        .with_state(state)
}

/// Health check endpoint; unavailable once the board stops following updates
pub async fn health_check(State(state): State<Arc<AppState>>) -> (StatusCode, &'static str) {
    if state.synchronizer.is_mounted() {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "unmounted")
    }
}

/// All tiles; `x-board-version` changes whenever any tile does
pub async fn list_tiles(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let version = state.monitor.activity().board_version;
    let tiles: Vec<TileResponse> = state
        .synchronizer
        .snapshot()
        .into_iter()
        .map(TileResponse::from)
        .collect();
    ([("x-board-version", version.to_string())], Json(tiles))
}

pub async fn get_tile(Path(id): Path<TemplateId>, State(state): State<Arc<AppState>>) -> Response {
    match state.synchronizer.tile(id) {
        Some(tile) => Json(TileResponse::from(tile)).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("no tile for template {}", id) })),
        )
            .into_response(),
    }
}

pub async fn channel_status(State(state): State<Arc<AppState>>) -> Json<ChannelResponse> {
    let channel = state.synchronizer.channel();
    Json(ChannelResponse {
        status: channel.status(),
        subscribers: channel.subscriber_count(),
        reconnect_attempts: channel.reconnect_attempts(),
        transports_opened: channel.transports_opened(),
        activity: state.monitor.activity(),
    })
}

/// Ask the server to push results for `query` over the live channel
pub async fn request_results(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ResultsRequest>,
) -> Response {
    let channel = state.synchronizer.channel();
    if channel.status() != ChannelStatus::Connected {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "live channel is not connected" })),
        )
            .into_response();
    }
    channel.send_message(&OutboundMessage::GetResults { query: request.query });
    StatusCode::ACCEPTED.into_response()
}

/// Cached templates; never calls the template service
pub async fn list_templates(State(state): State<Arc<AppState>>) -> Json<TemplatesResponse> {
    Json(TemplatesResponse {
        loading: state.directory.is_loading(),
        templates: state.directory.get_all(),
    })
}

pub async fn get_template(Path(id): Path<TemplateId>, State(state): State<Arc<AppState>>) -> Response {
    match state.directory.get(id) {
        Some(template) => Json(template).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("no template {}", id) })),
        )
            .into_response(),
    }
}

pub async fn create_template(
    State(state): State<Arc<AppState>>,
    Json(draft): Json<TemplateDraft>,
) -> Response {
    match state.directory.create(&draft).await {
        Ok(template) => (StatusCode::CREATED, Json(template)).into_response(),
        Err(e) => directory_error(e),
    }
}

pub async fn update_template(
    Path(id): Path<TemplateId>,
    State(state): State<Arc<AppState>>,
    Json(patch): Json<TemplatePatch>,
) -> Response {
    match state.directory.update(id, &patch).await {
        Ok(template) => Json(template).into_response(),
        Err(e) => directory_error(e),
    }
}

pub async fn delete_template(Path(id): Path<TemplateId>, State(state): State<Arc<AppState>>) -> Response {
    match state.directory.delete(id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => directory_error(e),
    }
}

fn directory_error(error: DirectoryError) -> Response {
    let status = if error.is_not_found() {
        StatusCode::NOT_FOUND
    } else {
        StatusCode::BAD_GATEWAY
    };
    (status, Json(json!({ "error": error.to_string() }))).into_response()
}

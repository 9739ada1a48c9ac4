use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use axum::{
    extract::{Path, RawQuery, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{Mutex, RwLock};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::HttpBackend;
use crate::config::{resolve, QueryParams, WidgetConfig};
use crate::error::ConfigError;
use crate::html::Markup;
use crate::render::Patch;
use crate::session::ChatSession;
use crate::settings::Settings;
use crate::storage::FileStorage;

pub type WidgetSession = ChatSession<HttpBackend, FileStorage>;

/// A live session plus the last time any route touched it.
pub struct HostedSession {
    session: Mutex<WidgetSession>,
    last_seen: std::sync::Mutex<Instant>,
}

impl HostedSession {
    fn new(session: WidgetSession) -> Self {
        Self {
            session: Mutex::new(session),
            last_seen: std::sync::Mutex::new(Instant::now()),
        }
    }

    fn touch(&self) {
        if let Ok(mut last_seen) = self.last_seen.lock() {
            *last_seen = Instant::now();
        }
    }

    fn idle_since(&self) -> Instant {
        self.last_seen
            .lock()
            .map(|last_seen| *last_seen)
            .unwrap_or_else(|_| Instant::now())
    }
}

pub struct HostState {
    pub settings: Settings,
    pub backend: HttpBackend,
    pub markup: Markup,
    pub sessions: RwLock<HashMap<String, Arc<HostedSession>>>,
}

impl HostState {
    pub fn new(settings: Settings, backend: HttpBackend, markup: Markup) -> Self {
        Self {
            settings,
            backend,
            markup,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    fn resolve_config(&self, query: &str) -> Result<WidgetConfig, ConfigError> {
        let query = QueryParams::parse(query)?;
        resolve(
            &WidgetConfig::default(),
            self.settings.page_config.as_ref(),
            &query,
        )
    }

    async fn session(&self, session_id: &str) -> Option<Arc<HostedSession>> {
        let hosted = self.sessions.read().await.get(session_id).cloned()?;
        hosted.touch();
        Some(hosted)
    }

    /// Drops sessions idle for longer than the configured TTL that no request
    /// is using. Their storage stays on disk, so the page can resume them.
    pub async fn sweep_idle(&self, now: Instant) -> usize {
        let ttl = self.settings.session_ttl;
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, hosted| {
            Arc::strong_count(hosted) > 1
                || now.saturating_duration_since(hosted.idle_since()) <= ttl
        });
        before - sessions.len()
    }
}

/// Sweeps idle sessions every `every` until the process exits.
pub fn spawn_sweeper(state: Arc<HostState>, every: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            let removed = state.sweep_idle(Instant::now()).await;
            if removed > 0 {
                info!(removed, "dropped idle widget sessions");
            }
        }
    });
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionBody {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub query: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MessageBody {
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct QuickReplyBody {
    pub value: String,
}

#[derive(Debug, Deserialize)]
pub struct LinkBody {
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct OpenBody {
    pub open: bool,
}

#[derive(Debug, Deserialize)]
pub struct ThemeBody {
    pub color: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

fn session_not_found() -> Response {
    error_response(StatusCode::NOT_FOUND, "session_not_found")
}

fn patch_payload(markup: &Markup, config: &WidgetConfig, patch: &Patch) -> Value {
    let mut value =
        serde_json::to_value(patch).unwrap_or_else(|_| json!({ "event": patch.event() }));
    match markup.patch_html(patch, config) {
        Ok(Some(html)) => value["html"] = Value::String(html),
        Ok(None) => {}
        Err(err) => warn!(event = patch.event(), error = %err, "failed to render patch"),
    }
    value
}

fn session_payload(markup: &Markup, session_id: &str, session: &mut WidgetSession) -> Value {
    let patches = session
        .drain_patches()
        .iter()
        .map(|patch| patch_payload(markup, session.config(), patch))
        .collect::<Vec<_>>();
    json!({
        "sessionId": session_id,
        "visitorId": session.visitor_id(),
        "step": session.step(),
        "inputEnabled": session.input_enabled(),
        "patches": patches,
    })
}

async fn health() -> impl IntoResponse {
    "ok"
}

async fn get_widget(
    State(state): State<Arc<HostState>>,
    RawQuery(query): RawQuery,
) -> Response {
    let config = match state.resolve_config(query.as_deref().unwrap_or_default()) {
        Ok(config) => config,
        Err(err) => return error_response(StatusCode::BAD_REQUEST, err.to_string()),
    };
    match state.markup.widget_page(&config) {
        Ok(page) => Html(page).into_response(),
        Err(err) => {
            warn!(error = %err, "failed to render widget page");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "render_failed")
        }
    }
}

/// Creates a session, replays a live one, or rebuilds a known one from its
/// persisted storage.
async fn post_session(
    State(state): State<Arc<HostState>>,
    Json(body): Json<CreateSessionBody>,
) -> Response {
    let config = match state.resolve_config(body.query.as_deref().unwrap_or_default()) {
        Ok(config) => config,
        Err(err) => return error_response(StatusCode::BAD_REQUEST, err.to_string()),
    };

    // Session ids must be UUIDs; they double as storage directory names.
    let session_id = body
        .session_id
        .as_deref()
        .and_then(|id| Uuid::parse_str(id).ok())
        .map(|id| id.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    if let Some(hosted) = state.session(&session_id).await {
        let mut session = hosted.session.lock().await;
        session.replay();
        return Json(session_payload(&state.markup, &session_id, &mut session)).into_response();
    }

    state.sweep_idle(Instant::now()).await;

    let storage = FileStorage::new(state.settings.storage_dir.join(&session_id));
    let mut session = ChatSession::new(config, state.backend.clone(), storage);
    session.start().await;

    let (hosted, fresh) = {
        let mut sessions = state.sessions.write().await;
        match sessions.get(&session_id) {
            Some(existing) => (Arc::clone(existing), false),
            None => {
                let hosted = Arc::new(HostedSession::new(session));
                sessions.insert(session_id.clone(), Arc::clone(&hosted));
                (hosted, true)
            }
        }
    };
    let mut session = hosted.session.lock().await;
    if !fresh {
        // Another request resumed the same id while this one was starting.
        session.replay();
    }
    Json(session_payload(&state.markup, &session_id, &mut session)).into_response()
}

async fn post_message(
    State(state): State<Arc<HostState>>,
    Path(session_id): Path<String>,
    Json(body): Json<MessageBody>,
) -> Response {
    let Some(handle) = state.session(&session_id).await else {
        return session_not_found();
    };
    let mut session = handle.session.lock().await;
    let outcome = session.submit(&body.text).await;
    debug!(%session_id, ?outcome, "message handled");
    Json(session_payload(&state.markup, &session_id, &mut session)).into_response()
}

async fn post_quick_reply(
    State(state): State<Arc<HostState>>,
    Path(session_id): Path<String>,
    Json(body): Json<QuickReplyBody>,
) -> Response {
    let Some(handle) = state.session(&session_id).await else {
        return session_not_found();
    };
    let mut session = handle.session.lock().await;
    let outcome = session.click_quick_reply(&body.value).await;
    debug!(%session_id, ?outcome, "quick reply handled");
    Json(session_payload(&state.markup, &session_id, &mut session)).into_response()
}

async fn post_link(
    State(state): State<Arc<HostState>>,
    Path(session_id): Path<String>,
    Json(body): Json<LinkBody>,
) -> Response {
    let Some(handle) = state.session(&session_id).await else {
        return session_not_found();
    };
    let mut session = handle.session.lock().await;
    session.click_link(&body.url);
    Json(session_payload(&state.markup, &session_id, &mut session)).into_response()
}

async fn post_poll(
    State(state): State<Arc<HostState>>,
    Path(session_id): Path<String>,
) -> Response {
    let Some(handle) = state.session(&session_id).await else {
        return session_not_found();
    };
    let mut session = handle.session.lock().await;
    let fired = session.fire_due_timers(Instant::now());
    if fired > 0 {
        debug!(%session_id, fired, "timers fired");
    }
    Json(session_payload(&state.markup, &session_id, &mut session)).into_response()
}

async fn post_open(
    State(state): State<Arc<HostState>>,
    Path(session_id): Path<String>,
    Json(body): Json<OpenBody>,
) -> Response {
    let Some(handle) = state.session(&session_id).await else {
        return session_not_found();
    };
    let mut session = handle.session.lock().await;
    session.set_open(body.open);
    Json(session_payload(&state.markup, &session_id, &mut session)).into_response()
}

async fn post_theme(
    State(state): State<Arc<HostState>>,
    Path(session_id): Path<String>,
    Json(body): Json<ThemeBody>,
) -> Response {
    let Some(handle) = state.session(&session_id).await else {
        return session_not_found();
    };
    let mut session = handle.session.lock().await;
    if let Err(err) = session.set_theme(&body.color) {
        return error_response(StatusCode::BAD_REQUEST, err.to_string());
    }
    Json(session_payload(&state.markup, &session_id, &mut session)).into_response()
}

async fn post_reset(
    State(state): State<Arc<HostState>>,
    Path(session_id): Path<String>,
) -> Response {
    let Some(handle) = state.session(&session_id).await else {
        return session_not_found();
    };
    let mut session = handle.session.lock().await;
    session.reset();
    Json(session_payload(&state.markup, &session_id, &mut session)).into_response()
}

pub fn router(state: Arc<HostState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/widget", get(get_widget))
        .route("/widget/session", post(post_session))
        .route("/widget/session/{session_id}/message", post(post_message))
        .route(
            "/widget/session/{session_id}/quick-reply",
            post(post_quick_reply),
        )
        .route("/widget/session/{session_id}/link", post(post_link))
        .route("/widget/session/{session_id}/poll", post(post_poll))
        .route("/widget/session/{session_id}/open", post(post_open))
        .route("/widget/session/{session_id}/theme", post(post_theme))
        .route("/widget/session/{session_id}/reset", post(post_reset))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

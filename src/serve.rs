//! Purpose: Provide the HTTP/JSON inventory server for stocktake.
//! Exports: `ServeConfig`, `serve`, `init_tracing`.
//! Role: Axum-based loopback server that exposes one `ItemStore` to remote clients.
//! Invariants: JSON envelopes match `api::remote` (`items`, `item`, `applied`, `error`).
//! Invariants: Loopback-only unless explicitly allowed; non-loopback also needs a token.
//! Invariants: Read-modify-write runs server-side through `ItemStore::apply`.

use axum::extract::{Path as AxumPath, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::future::IntoFuture;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use stocktake::api::{Change, Error, ErrorKind, FileStore, Item, ItemStore, MemoryStore};

#[derive(Clone, Debug)]
pub struct ServeConfig {
    pub bind: SocketAddr,
    pub data: Option<PathBuf>,
    pub token: Option<String>,
    pub allow_non_loopback: bool,
}

struct AppState {
    store: Arc<dyn ItemStore>,
    token: Option<String>,
}

#[derive(Deserialize)]
struct PutRequest {
    quantity: i64,
}

#[derive(Debug, Serialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    kind: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    item: Option<String>,
}

pub async fn serve(config: ServeConfig) -> Result<(), Error> {
    validate_config(&config)?;

    let store: Arc<dyn ItemStore> = match &config.data {
        Some(path) => Arc::new(FileStore::open(path)?),
        None => Arc::new(MemoryStore::new()),
    };
    let state = Arc::new(AppState {
        store,
        token: config.token.clone(),
    });

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/v0/items", get(list_items))
        .route(
            "/v0/items/:name",
            get(get_item).put(put_item).delete(delete_item),
        )
        .route("/v0/items/:name/apply", post(apply_change))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to bind server")
                .with_source(err)
        })?;
    info!(
        bind = %config.bind,
        data = ?config.data,
        auth = config.token_required(),
        "serving inventory"
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        })
        .into_future();
    tokio::pin!(server);

    tokio::select! {
        result = &mut server => {
            result.map_err(|err| {
                Error::new(ErrorKind::Io)
                    .with_message("server failed")
                    .with_source(err)
            })?;
        }
        _ = shutdown_signal() => {
            let _ = shutdown_tx.send(());
            match tokio::time::timeout(Duration::from_secs(10), &mut server).await {
                Ok(result) => result.map_err(|err| {
                    Error::new(ErrorKind::Io)
                        .with_message("server failed")
                        .with_source(err)
                })?,
                Err(_) => {
                    return Err(Error::new(ErrorKind::Io).with_message("server shutdown timed out"));
                }
            }
        }
    };
    info!("server stopped");
    Ok(())
}

impl ServeConfig {
    fn token_required(&self) -> bool {
        self.token.is_some()
    }
}

fn is_loopback(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(addr) => addr.is_loopback(),
        IpAddr::V6(addr) => addr.is_loopback(),
    }
}

fn validate_config(config: &ServeConfig) -> Result<(), Error> {
    let is_loopback_bind = is_loopback(config.bind.ip());
    if !is_loopback_bind && !config.allow_non_loopback {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("non-loopback bind requires explicit opt-in")
            .with_hint("Re-run with --allow-non-loopback or use a loopback address."));
    }
    if !is_loopback_bind && config.token.is_none() {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("non-loopback bind requires --token")
            .with_hint("Set --token (or STOCKTAKE_TOKEN) so remote writes are authenticated."));
    }
    if config.token.as_deref() == Some("") {
        return Err(Error::new(ErrorKind::Usage).with_message("--token must not be empty"));
    }
    if let Some(path) = &config.data {
        if path.is_dir() {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("--data must be a file, not a directory")
                .with_path(path));
        }
    }
    Ok(())
}

pub fn init_tracing(default_directive: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(unix)]
    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    #[cfg(not(unix))]
    ctrl_c.await;
}

fn authorize(headers: &HeaderMap, state: &AppState) -> Result<(), Error> {
    let Some(token) = state.token.as_ref() else {
        return Ok(());
    };
    let Some(value) = headers.get(axum::http::header::AUTHORIZATION) else {
        return Err(Error::new(ErrorKind::Permission).with_message("missing bearer token"));
    };
    let value = value.to_str().unwrap_or_default();
    let expected = format!("Bearer {token}");
    if value != expected {
        return Err(Error::new(ErrorKind::Permission).with_message("invalid bearer token"));
    }
    Ok(())
}

// Store backends block (file locks, fsync), so keep them off the async workers.
async fn with_store<T, F>(state: &Arc<AppState>, op: F) -> Result<T, Error>
where
    T: Send + 'static,
    F: FnOnce(&dyn ItemStore) -> Result<T, Error> + Send + 'static,
{
    let store = Arc::clone(&state.store);
    tokio::task::spawn_blocking(move || op(store.as_ref()))
        .await
        .map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("store task failed")
                .with_source(err)
        })?
}

async fn healthz() -> Response {
    json_response(json!({ "ok": true }))
}

async fn list_items(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if let Err(err) = authorize(&headers, &state) {
        return error_response(err);
    }
    match with_store(&state, |store| store.list()).await {
        Ok(items) => json_response(json!({ "items": items })),
        Err(err) => error_response(err),
    }
}

async fn get_item(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    AxumPath(name): AxumPath<String>,
) -> Response {
    if let Err(err) = authorize(&headers, &state) {
        return error_response(err);
    }
    let lookup = name.clone();
    match with_store(&state, move |store| store.get(&lookup)).await {
        Ok(Some(quantity)) => json_response(json!({ "item": Item::new(name, quantity) })),
        Ok(None) => error_response(
            Error::new(ErrorKind::NotFound)
                .with_message("item not found")
                .with_item(name),
        ),
        Err(err) => error_response(err),
    }
}

async fn put_item(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    AxumPath(name): AxumPath<String>,
    Json(payload): Json<PutRequest>,
) -> Response {
    if let Err(err) = authorize(&headers, &state) {
        return error_response(err);
    }
    let key = name.clone();
    let quantity = payload.quantity;
    match with_store(&state, move |store| store.put(&key, quantity)).await {
        Ok(()) => json_response(json!({ "item": Item::new(name, quantity) })),
        Err(err) => error_response(err),
    }
}

async fn delete_item(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    AxumPath(name): AxumPath<String>,
) -> Response {
    if let Err(err) = authorize(&headers, &state) {
        return error_response(err);
    }
    match with_store(&state, move |store| store.delete(&name)).await {
        Ok(()) => json_response(json!({ "ok": true })),
        Err(err) => error_response(err),
    }
}

async fn apply_change(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    AxumPath(name): AxumPath<String>,
    Json(change): Json<Change>,
) -> Response {
    if let Err(err) = authorize(&headers, &state) {
        return error_response(err);
    }
    match with_store(&state, move |store| store.apply(&name, change)).await {
        Ok(applied) => json_response(json!({ "applied": applied })),
        Err(err) => error_response(err),
    }
}

fn json_response(payload: serde_json::Value) -> Response {
    let mut response = Json(payload).into_response();
    response
        .headers_mut()
        .insert("stocktake-version", HeaderValue::from_static("0"));
    response
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Usage => StatusCode::BAD_REQUEST,
        ErrorKind::Permission => StatusCode::UNAUTHORIZED,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Busy => StatusCode::LOCKED,
        ErrorKind::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Corrupt | ErrorKind::Io | ErrorKind::Internal => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn error_response(err: Error) -> Response {
    let status = status_for(err.kind());
    let body = ErrorEnvelope {
        error: ErrorBody {
            kind: format!("{:?}", err.kind()),
            message: err.message().unwrap_or("error").to_string(),
            hint: err.hint().map(str::to_string),
            item: err.item().map(str::to_string),
        },
    };
    let mut response = (status, Json(body)).into_response();
    response
        .headers_mut()
        .insert("stocktake-version", HeaderValue::from_static("0"));
    response
}

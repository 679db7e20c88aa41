//! Purpose: Provide an HTTP client store for the `stocktake serve` v0 protocol.
//! Exports: `RemoteStore`.
//! Role: `ItemStore` backend that forwards every call to a remote server.
//! Invariants: Envelopes mirror `serve.rs` (`items`, `item`, `applied`, `error`).
//! Invariants: Transport failures surface as `Unavailable`; no call is retried.
//! Invariants: `apply` runs server-side, so concurrent clients do not lose updates.
#![allow(clippy::result_large_err)]

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::core::error::{Error, ErrorKind};
use crate::core::item::Item;
use crate::core::store::{Applied, Change, ItemStore, StoreResult};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct RemoteStore {
    inner: Arc<RemoteStoreInner>,
}

struct RemoteStoreInner {
    base_url: Url,
    token: Option<String>,
    agent: ureq::Agent,
}

#[derive(Deserialize)]
struct ItemsEnvelope {
    items: Vec<Item>,
}

#[derive(Deserialize)]
struct ItemEnvelope {
    item: Item,
}

#[derive(Deserialize)]
struct AppliedEnvelope {
    applied: Applied,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: RemoteError,
}

#[derive(Deserialize)]
struct RemoteError {
    kind: String,
    message: Option<String>,
    hint: Option<String>,
    item: Option<String>,
}

#[derive(Serialize)]
struct PutRequest {
    quantity: i64,
}

impl RemoteStore {
    pub fn new(base_url: impl Into<String>) -> StoreResult<Self> {
        let base_url = normalize_base_url(base_url.into())?;
        Ok(Self {
            inner: Arc::new(RemoteStoreInner {
                base_url,
                token: None,
                agent: build_agent(DEFAULT_TIMEOUT),
            }),
        })
    }

    pub fn with_token(self, token: impl Into<String>) -> Self {
        self.rebuild(Some(token.into()), None)
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        let token = self.inner.token.clone();
        self.rebuild(token, Some(build_agent(timeout)))
    }

    fn rebuild(mut self, token: Option<String>, agent: Option<ureq::Agent>) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.token = token;
            if let Some(agent) = agent {
                inner.agent = agent;
            }
            return self;
        }
        self.inner = Arc::new(RemoteStoreInner {
            base_url: self.inner.base_url.clone(),
            token,
            agent: agent.unwrap_or_else(|| self.inner.agent.clone()),
        });
        self
    }

    fn item_url(&self, name: &str) -> StoreResult<Url> {
        ensure_item_name(name)?;
        build_url(&self.inner.base_url, &["v0", "items", name])
    }

    fn request_json<T, R>(&self, method: &str, url: &Url, body: Option<&T>) -> StoreResult<R>
    where
        T: Serialize,
        R: DeserializeOwned,
    {
        let request = self.request(method, url).set("Accept", "application/json");
        let response = match body {
            None => request.call(),
            Some(body) => {
                let payload = serde_json::to_string(body).map_err(|err| {
                    Error::new(ErrorKind::Internal)
                        .with_message("failed to encode request json")
                        .with_source(err)
                })?;
                request
                    .set("Content-Type", "application/json")
                    .send_string(&payload)
            }
        };

        match response {
            Ok(resp) => read_json_response(resp),
            Err(ureq::Error::Status(code, resp)) => Err(parse_error_response(code, resp)),
            Err(ureq::Error::Transport(err)) => Err(Error::new(ErrorKind::Unavailable)
                .with_message("store request failed")
                .with_hint("Check that `stocktake serve` is running and reachable.")
                .with_source(err)),
        }
    }

    fn request(&self, method: &str, url: &Url) -> ureq::Request {
        let mut request = self.inner.agent.request(method, url.as_str());
        if let Some(token) = &self.inner.token {
            request = request.set("Authorization", &format!("Bearer {token}"));
        }
        request
    }
}

impl ItemStore for RemoteStore {
    fn list(&self) -> StoreResult<Vec<Item>> {
        let url = build_url(&self.inner.base_url, &["v0", "items"])?;
        let envelope: ItemsEnvelope = self.request_json::<(), _>("GET", &url, None)?;
        Ok(envelope.items)
    }

    fn get(&self, name: &str) -> StoreResult<Option<i64>> {
        let url = self.item_url(name)?;
        match self.request_json::<(), ItemEnvelope>("GET", &url, None) {
            Ok(envelope) => Ok(Some(envelope.item.quantity)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.with_item(name)),
        }
    }

    fn put(&self, name: &str, quantity: i64) -> StoreResult<()> {
        let url = self.item_url(name)?;
        let _envelope: ItemEnvelope = self
            .request_json("PUT", &url, Some(&PutRequest { quantity }))
            .map_err(|err| err.with_item(name))?;
        Ok(())
    }

    fn delete(&self, name: &str) -> StoreResult<()> {
        let url = self.item_url(name)?;
        let _value: serde_json::Value = self
            .request_json::<(), _>("DELETE", &url, None)
            .map_err(|err| err.with_item(name))?;
        Ok(())
    }

    fn apply(&self, name: &str, change: Change) -> StoreResult<Applied> {
        ensure_item_name(name)?;
        let url = build_url(&self.inner.base_url, &["v0", "items", name, "apply"])?;
        let envelope: AppliedEnvelope = self
            .request_json("POST", &url, Some(&change))
            .map_err(|err| err.with_item(name))?;
        Ok(envelope.applied)
    }
}

fn build_agent(timeout: Duration) -> ureq::Agent {
    ureq::AgentBuilder::new().timeout(timeout).build()
}

fn normalize_base_url(raw: String) -> StoreResult<Url> {
    let mut url = Url::parse(&raw).map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message("invalid remote store url")
            .with_source(err)
    })?;
    let scheme = url.scheme();
    if scheme != "http" && scheme != "https" {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("remote store url must use http or https scheme"));
    }
    if url.path() != "/" && !url.path().is_empty() {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("remote store url must not include a path")
            .with_hint("Use the server root, e.g. http://127.0.0.1:9800."));
    }
    url.set_path("/");
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

pub(crate) fn build_url(base_url: &Url, segments: &[&str]) -> StoreResult<Url> {
    let mut url = base_url.clone();
    {
        let mut path = url.path_segments_mut().map_err(|_| {
            Error::new(ErrorKind::Usage).with_message("store url cannot be a base")
        })?;
        path.clear();
        for segment in segments {
            path.push(segment);
        }
    }
    Ok(url)
}

// `.` and `..` would be swallowed as dot segments and address another route.
fn ensure_item_name(name: &str) -> StoreResult<()> {
    if name.is_empty() {
        return Err(Error::new(ErrorKind::Usage).with_message("item name must not be empty"));
    }
    if name == "." || name == ".." {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("remote item names cannot be '.' or '..'")
            .with_item(name));
    }
    Ok(())
}

fn read_json_response<R>(response: ureq::Response) -> StoreResult<R>
where
    R: DeserializeOwned,
{
    let body = response.into_string().map_err(|err| {
        Error::new(ErrorKind::Io)
            .with_message("failed to read response body")
            .with_source(err)
    })?;
    serde_json::from_str(&body).map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("invalid response json")
            .with_source(err)
    })
}

fn parse_error_response(status: u16, response: ureq::Response) -> Error {
    let body = response.into_string().unwrap_or_default();
    if let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(&body) {
        return error_from_remote(envelope.error);
    }
    let kind = error_kind_from_status(status);
    Error::new(kind).with_message(format!("remote error status {status}"))
}

fn error_from_remote(remote: RemoteError) -> Error {
    let kind = parse_error_kind(&remote.kind);
    let mut err = Error::new(kind);
    if let Some(message) = remote.message {
        err = err.with_message(message);
    }
    if let Some(hint) = remote.hint {
        err = err.with_hint(hint);
    }
    if let Some(item) = remote.item {
        err = err.with_item(item);
    }
    err
}

fn parse_error_kind(kind: &str) -> ErrorKind {
    match kind {
        "Internal" => ErrorKind::Internal,
        "Usage" => ErrorKind::Usage,
        "NotFound" => ErrorKind::NotFound,
        "Unavailable" => ErrorKind::Unavailable,
        "Permission" => ErrorKind::Permission,
        "Busy" => ErrorKind::Busy,
        "Corrupt" => ErrorKind::Corrupt,
        "Io" => ErrorKind::Io,
        _ => ErrorKind::Internal,
    }
}

fn error_kind_from_status(status: u16) -> ErrorKind {
    match status {
        400 | 413 | 422 => ErrorKind::Usage,
        401 | 403 => ErrorKind::Permission,
        404 => ErrorKind::NotFound,
        409 | 423 | 429 => ErrorKind::Busy,
        502..=504 => ErrorKind::Unavailable,
        500..=599 => ErrorKind::Internal,
        _ => ErrorKind::Io,
    }
}

//! Purpose: `ItemStore` backend for a Cloud Firestore collection over the REST v1 API.
//! Exports: `FirestoreConfig`, `FirestoreStore`.
//! Role: Hosted document database backend; one document per item, keyed by name.
//! Invariants: Documents hold a single integer field `quantity`.
//! Invariants: `put` is a full-document PATCH without an update mask (replace, not merge).
//! Invariants: `apply` uses the trait's read-modify-write default and is NOT atomic here.
#![allow(clippy::result_large_err)]

use std::collections::BTreeMap;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

use super::remote::{DEFAULT_TIMEOUT, build_url};
use crate::core::error::{Error, ErrorKind};
use crate::core::item::Item;
use crate::core::store::{ItemStore, StoreResult};

pub const DEFAULT_COLLECTION: &str = "inventory";
const FIRESTORE_ENDPOINT: &str = "https://firestore.googleapis.com/";
const LIST_PAGE_SIZE: &str = "300";

pub const ENV_PROJECT_ID: &str = "FIREBASE_PROJECT_ID";
pub const ENV_API_KEY: &str = "FIREBASE_API_KEY";
pub const ENV_COLLECTION: &str = "STOCKTAKE_COLLECTION";
pub const ENV_EMULATOR_HOST: &str = "FIRESTORE_EMULATOR_HOST";

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FirestoreConfig {
    pub project_id: String,
    pub api_key: Option<String>,
    pub collection: String,
    pub emulator_host: Option<String>,
    pub timeout: Duration,
}

impl FirestoreConfig {
    /// Read connection settings through `lookup` (normally the process environment).
    pub fn from_lookup<F>(lookup: F) -> StoreResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let project_id = non_empty(ENV_PROJECT_ID).ok_or_else(|| missing_env(ENV_PROJECT_ID))?;
        let emulator_host = non_empty(ENV_EMULATOR_HOST);
        let api_key = non_empty(ENV_API_KEY);
        if api_key.is_none() && emulator_host.is_none() {
            return Err(missing_env(ENV_API_KEY));
        }
        let collection =
            non_empty(ENV_COLLECTION).unwrap_or_else(|| DEFAULT_COLLECTION.to_string());
        if collection.contains('/') {
            return Err(Error::new(ErrorKind::Usage)
                .with_message(format!("{ENV_COLLECTION} must name a top-level collection")));
        }
        Ok(Self {
            project_id,
            api_key,
            collection,
            emulator_host,
            timeout: DEFAULT_TIMEOUT,
        })
    }

    fn endpoint(&self) -> StoreResult<Url> {
        let raw = match &self.emulator_host {
            Some(host) => format!("http://{host}/"),
            None => FIRESTORE_ENDPOINT.to_string(),
        };
        Url::parse(&raw).map_err(|err| {
            Error::new(ErrorKind::Usage)
                .with_message("invalid Firestore endpoint")
                .with_hint(format!("Check {ENV_EMULATOR_HOST} (expected host:port)."))
                .with_source(err)
        })
    }
}

fn missing_env(key: &str) -> Error {
    Error::new(ErrorKind::Usage)
        .with_message(format!("missing required environment variable {key}"))
        .with_hint(format!("Export {key} before using --store firestore."))
}

#[derive(Clone)]
pub struct FirestoreStore {
    endpoint: Url,
    project_id: String,
    collection: String,
    api_key: Option<String>,
    agent: ureq::Agent,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(default)]
    documents: Vec<Document>,
    next_page_token: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Document {
    #[serde(default, skip_serializing)]
    name: String,
    #[serde(default)]
    fields: BTreeMap<String, FieldValue>,
}

// Firestore wraps every value in a one-key object naming its type; only the
// numeric variants matter for `quantity`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FieldValue {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    integer_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    double_value: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: GoogleError,
}

#[derive(Debug, Deserialize)]
struct GoogleError {
    message: Option<String>,
    status: Option<String>,
}

impl FirestoreStore {
    pub fn new(config: &FirestoreConfig) -> StoreResult<Self> {
        Ok(Self {
            endpoint: config.endpoint()?,
            project_id: config.project_id.clone(),
            collection: config.collection.clone(),
            api_key: config.api_key.clone(),
            agent: ureq::AgentBuilder::new().timeout(config.timeout).build(),
        })
    }

    fn collection_url(&self) -> StoreResult<Url> {
        let mut url = build_url(
            &self.endpoint,
            &[
                "v1",
                "projects",
                &self.project_id,
                "databases",
                "(default)",
                "documents",
                &self.collection,
            ],
        )?;
        self.append_key(&mut url);
        Ok(url)
    }

    fn document_url(&self, name: &str) -> StoreResult<Url> {
        ensure_document_id(name)?;
        let mut url = build_url(
            &self.endpoint,
            &[
                "v1",
                "projects",
                &self.project_id,
                "databases",
                "(default)",
                "documents",
                &self.collection,
                name,
            ],
        )?;
        self.append_key(&mut url);
        Ok(url)
    }

    fn append_key(&self, url: &mut Url) {
        if let Some(key) = &self.api_key {
            url.query_pairs_mut().append_pair("key", key);
        }
    }

    fn send<R>(&self, method: &str, url: &Url, body: Option<&Document>) -> StoreResult<R>
    where
        R: DeserializeOwned,
    {
        let request = self
            .agent
            .request(method, url.as_str())
            .set("Accept", "application/json");
        let response = match body {
            None => request.call(),
            Some(document) => {
                let payload = serde_json::to_string(document).map_err(|err| {
                    Error::new(ErrorKind::Internal)
                        .with_message("failed to encode Firestore document")
                        .with_source(err)
                })?;
                request
                    .set("Content-Type", "application/json")
                    .send_string(&payload)
            }
        };
        match response {
            Ok(resp) => {
                let body = resp.into_string().map_err(|err| {
                    Error::new(ErrorKind::Io)
                        .with_message("failed to read Firestore response")
                        .with_source(err)
                })?;
                serde_json::from_str(&body).map_err(|err| {
                    Error::new(ErrorKind::Internal)
                        .with_message("invalid Firestore response")
                        .with_source(err)
                })
            }
            Err(ureq::Error::Status(code, resp)) => Err(parse_google_error(code, resp)),
            Err(ureq::Error::Transport(err)) => Err(Error::new(ErrorKind::Unavailable)
                .with_message("Firestore request failed")
                .with_source(err)),
        }
    }
}

impl ItemStore for FirestoreStore {
    fn list(&self) -> StoreResult<Vec<Item>> {
        let mut items = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut url = self.collection_url()?;
            {
                let mut pairs = url.query_pairs_mut();
                pairs.append_pair("pageSize", LIST_PAGE_SIZE);
                if let Some(token) = &page_token {
                    pairs.append_pair("pageToken", token);
                }
            }
            let page: ListResponse = self.send("GET", &url, None)?;
            for document in page.documents {
                let name = document_id(&document.name).to_string();
                let quantity = decode_quantity(&document).map_err(|err| err.with_item(&name))?;
                items.push(Item::new(name, quantity));
            }
            match page.next_page_token.filter(|token| !token.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        Ok(items)
    }

    fn get(&self, name: &str) -> StoreResult<Option<i64>> {
        let url = self.document_url(name)?;
        match self.send::<Document>("GET", &url, None) {
            Ok(document) => decode_quantity(&document)
                .map(Some)
                .map_err(|err| err.with_item(name)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.with_item(name)),
        }
    }

    fn put(&self, name: &str, quantity: i64) -> StoreResult<()> {
        let url = self.document_url(name)?;
        let document = encode_document(quantity);
        let _written: Document = self
            .send("PATCH", &url, Some(&document))
            .map_err(|err| err.with_item(name))?;
        Ok(())
    }

    fn delete(&self, name: &str) -> StoreResult<()> {
        let url = self.document_url(name)?;
        let _empty: serde_json::Value = self
            .send("DELETE", &url, None)
            .map_err(|err| err.with_item(name))?;
        Ok(())
    }
}

fn ensure_document_id(name: &str) -> StoreResult<()> {
    if name.is_empty() {
        return Err(Error::new(ErrorKind::Usage).with_message("item name must not be empty"));
    }
    if name.contains('/') || name == "." || name == ".." {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("Firestore document ids cannot contain '/' or be '.' or '..'")
            .with_item(name));
    }
    Ok(())
}

fn document_id(resource_name: &str) -> &str {
    resource_name
        .rsplit_once('/')
        .map(|(_, id)| id)
        .unwrap_or(resource_name)
}

fn encode_document(quantity: i64) -> Document {
    let mut fields = BTreeMap::new();
    fields.insert(
        "quantity".to_string(),
        FieldValue {
            integer_value: Some(quantity.to_string()),
            double_value: None,
        },
    );
    Document {
        name: String::new(),
        fields,
    }
}

fn decode_quantity(document: &Document) -> StoreResult<i64> {
    let corrupt = |detail: &str| {
        Error::new(ErrorKind::Corrupt).with_message(format!("document quantity {detail}"))
    };
    let Some(field) = document.fields.get("quantity") else {
        return Err(corrupt("is missing"));
    };
    match (&field.integer_value, field.double_value) {
        (Some(raw), _) => raw
            .parse::<i64>()
            .map_err(|err| corrupt("is not a 64-bit integer").with_source(err)),
        (None, Some(value)) if value.is_finite() => Ok(value.trunc() as i64),
        _ => Err(corrupt("has a non-integer type")),
    }
}

fn parse_google_error(status: u16, response: ureq::Response) -> Error {
    let body = response.into_string().unwrap_or_default();
    let parsed = serde_json::from_str::<ErrorEnvelope>(&body).ok();
    let kind = parsed
        .as_ref()
        .and_then(|envelope| envelope.error.status.as_deref())
        .map(error_kind_from_status_name)
        .unwrap_or_else(|| error_kind_from_http(status));
    let message = parsed
        .and_then(|envelope| envelope.error.message)
        .unwrap_or_else(|| format!("Firestore error status {status}"));
    Error::new(kind).with_message(message)
}

fn error_kind_from_status_name(status: &str) -> ErrorKind {
    match status {
        "NOT_FOUND" => ErrorKind::NotFound,
        "INVALID_ARGUMENT" | "FAILED_PRECONDITION" | "OUT_OF_RANGE" => ErrorKind::Usage,
        "PERMISSION_DENIED" | "UNAUTHENTICATED" => ErrorKind::Permission,
        "UNAVAILABLE" | "DEADLINE_EXCEEDED" => ErrorKind::Unavailable,
        "ABORTED" | "RESOURCE_EXHAUSTED" | "ALREADY_EXISTS" => ErrorKind::Busy,
        _ => ErrorKind::Internal,
    }
}

fn error_kind_from_http(status: u16) -> ErrorKind {
    match status {
        400 => ErrorKind::Usage,
        401 | 403 => ErrorKind::Permission,
        404 => ErrorKind::NotFound,
        409 | 429 => ErrorKind::Busy,
        502..=504 => ErrorKind::Unavailable,
        _ => ErrorKind::Internal,
    }
}

#[cfg(test)]
mod tests {
    use super::{
        Document, FirestoreConfig, FirestoreStore, ListResponse, decode_quantity, document_id,
        encode_document, ensure_document_id, error_kind_from_status_name,
    };
    use crate::core::error::ErrorKind;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn config_requires_project_and_key() {
        let err = FirestoreConfig::from_lookup(lookup(&[])).expect_err("missing");
        assert_eq!(err.kind(), ErrorKind::Usage);
        assert!(err.message().unwrap_or_default().contains("FIREBASE_PROJECT_ID"));

        let err = FirestoreConfig::from_lookup(lookup(&[("FIREBASE_PROJECT_ID", "demo")]))
            .expect_err("missing key");
        assert!(err.message().unwrap_or_default().contains("FIREBASE_API_KEY"));
    }

    #[test]
    fn emulator_host_waives_api_key() {
        let config = FirestoreConfig::from_lookup(lookup(&[
            ("FIREBASE_PROJECT_ID", "demo"),
            ("FIRESTORE_EMULATOR_HOST", "127.0.0.1:8080"),
        ]))
        .expect("config");
        assert_eq!(config.collection, "inventory");
        assert!(config.api_key.is_none());
    }

    #[test]
    fn document_urls_carry_collection_and_key() {
        let config = FirestoreConfig::from_lookup(lookup(&[
            ("FIREBASE_PROJECT_ID", "demo"),
            ("FIREBASE_API_KEY", "k123"),
        ]))
        .expect("config");
        let store = FirestoreStore::new(&config).expect("store");
        let url = store.document_url("Blue Widget").expect("url");
        assert_eq!(
            url.as_str(),
            "https://firestore.googleapis.com/v1/projects/demo/databases/(default)/documents/inventory/Blue%20Widget?key=k123"
        );
    }

    #[test]
    fn slash_names_are_rejected() {
        let err = ensure_document_id("nuts/bolts").expect_err("slash");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[test]
    fn decodes_list_page() {
        let body = r#"{
            "documents": [
                {"name": "projects/demo/databases/(default)/documents/inventory/Widget",
                 "fields": {"quantity": {"integerValue": "8"}},
                 "createTime": "2024-01-01T00:00:00Z"},
                {"name": "projects/demo/databases/(default)/documents/inventory/Gadget",
                 "fields": {"quantity": {"doubleValue": 2.0}}}
            ],
            "nextPageToken": "abc"
        }"#;
        let page: ListResponse = serde_json::from_str(body).expect("decode");
        assert_eq!(page.next_page_token.as_deref(), Some("abc"));
        assert_eq!(document_id(&page.documents[0].name), "Widget");
        assert_eq!(decode_quantity(&page.documents[0]).expect("qty"), 8);
        assert_eq!(decode_quantity(&page.documents[1]).expect("qty"), 2);

        let empty: ListResponse = serde_json::from_str("{}").expect("decode");
        assert!(empty.documents.is_empty());
    }

    #[test]
    fn missing_or_odd_quantity_is_corrupt() {
        let doc: Document =
            serde_json::from_str(r#"{"fields": {"quantity": {"stringValue": "five"}}}"#)
                .expect("decode");
        assert_eq!(decode_quantity(&doc).expect_err("odd").kind(), ErrorKind::Corrupt);
        let doc: Document = serde_json::from_str(r#"{"fields": {}}"#).expect("decode");
        assert_eq!(decode_quantity(&doc).expect_err("missing").kind(), ErrorKind::Corrupt);
    }

    #[test]
    fn encodes_integer_value_as_string() {
        let value = serde_json::to_value(encode_document(5)).expect("encode");
        assert_eq!(
            value,
            serde_json::json!({"fields": {"quantity": {"integerValue": "5"}}})
        );
    }

    #[test]
    fn google_status_names_map_to_kinds() {
        assert_eq!(error_kind_from_status_name("NOT_FOUND"), ErrorKind::NotFound);
        assert_eq!(
            error_kind_from_status_name("PERMISSION_DENIED"),
            ErrorKind::Permission
        );
        assert_eq!(
            error_kind_from_status_name("UNAVAILABLE"),
            ErrorKind::Unavailable
        );
    }
}

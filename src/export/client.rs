//! DSpace 7+ REST client for pushing exported items into a collection.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument, warn};

use super::dspace::{DSpaceExporter, DSpaceItem};
use crate::model::Record;

const XSRF_COOKIE: &str = "DSPACE-XSRF-TOKEN";

/// Destination repository credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DSpaceConfig {
    /// Server root, without the `/api` suffix
    pub base_url: String,
    pub email: String,
    pub password: String,

    #[serde(default = "default_verify_tls")]
    pub verify_tls: bool,
}

fn default_verify_tls() -> bool {
    true
}

impl DSpaceConfig {
    pub fn new(
        base_url: impl Into<String>,
        email: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            email: email.into(),
            password: password.into(),
            verify_tls: true,
        }
    }

    pub fn with_verify_tls(mut self, verify_tls: bool) -> Self {
        self.verify_tls = verify_tls;
        self
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/api/{}", self.base_url.trim_end_matches('/'), path)
    }
}

/// Errors talking to the destination repository.
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Request to {url} failed: {message}")]
    Request { url: String, message: String },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("Invalid response from {url}: {message}")]
    Decode { url: String, message: String },
}

/// Summary of a collection or community.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionInfo {
    pub uuid: String,
    pub name: String,
    pub handle: String,
}

/// One record that could not be created.
#[derive(Debug)]
pub struct UploadFailure {
    pub identifier: String,
    pub error: UploadError,
}

/// Outcome of a bulk upload; failures do not stop the batch.
#[derive(Debug, Default)]
pub struct UploadReport {
    pub created: Vec<Value>,
    pub failures: Vec<UploadFailure>,
}

impl UploadReport {
    pub fn total(&self) -> usize {
        self.created.len() + self.failures.len()
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

// ============================================================================
// Item Sink
// ============================================================================

/// Destination that accepts exported items.
#[async_trait]
pub trait ItemSink: Send + Sync {
    /// Creates one item in `collection_id`, returning the server's JSON.
    async fn submit_item(
        &self,
        item: &DSpaceItem,
        collection_id: &str,
    ) -> Result<Value, UploadError>;

    /// Exports and submits each record in order.
    ///
    /// `on_progress` is called with `(done, total)` after every record,
    /// whether it succeeded or not.
    async fn upload_records(
        &self,
        exporter: &DSpaceExporter,
        records: &[Record],
        collection_id: &str,
        on_progress: Option<&(dyn Fn(usize, usize) + Send + Sync)>,
    ) -> UploadReport {
        let total = records.len();
        let mut report = UploadReport::default();

        for (i, record) in records.iter().enumerate() {
            let item = exporter.export_record(record);
            match self.submit_item(&item, collection_id).await {
                Ok(created) => report.created.push(created),
                Err(error) => {
                    warn!(identifier = record.identifier(), error = %error, "Item upload failed");
                    report.failures.push(UploadFailure {
                        identifier: record.identifier().to_string(),
                        error,
                    });
                }
            }
            if let Some(callback) = on_progress {
                callback(i + 1, total);
            }
        }

        info!(
            created = report.created.len(),
            failed = report.failures.len(),
            "Upload finished"
        );
        report
    }
}

// ============================================================================
// REST Client
// ============================================================================

#[derive(Debug, Clone, Default)]
struct Session {
    authorization: Option<String>,
    xsrf_token: Option<String>,
}

/// Authenticated DSpace REST client. Logs in on first use.
pub struct DSpaceClient {
    config: DSpaceConfig,
    client: reqwest::Client,
    session: OnceCell<Session>,
    exporter: DSpaceExporter,
}

impl DSpaceClient {
    pub fn new(config: DSpaceConfig) -> Result<Self, UploadError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("oai-harvester/", env!("CARGO_PKG_VERSION")))
            .cookie_store(true)
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()
            .map_err(|e| UploadError::Request {
                url: config.base_url.clone(),
                message: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            config,
            client,
            session: OnceCell::new(),
            exporter: DSpaceExporter::default(),
        })
    }

    pub fn with_exporter(mut self, exporter: DSpaceExporter) -> Self {
        self.exporter = exporter;
        self
    }

    pub fn exporter(&self) -> &DSpaceExporter {
        &self.exporter
    }

    async fn session(&self) -> Result<&Session, UploadError> {
        self.session.get_or_try_init(|| self.login()).await
    }

    #[instrument(skip(self), fields(user = %self.config.email))]
    async fn login(&self) -> Result<Session, UploadError> {
        let url = self.config.api_url("authn/login");
        let response = self
            .client
            .post(&url)
            .form(&[
                ("user", self.config.email.as_str()),
                ("password", self.config.password.as_str()),
            ])
            .send()
            .await
            .map_err(|e| UploadError::Auth(e.to_string()))?;

        if !response.status().is_success() {
            return Err(UploadError::Auth(format!("HTTP {}", response.status().as_u16())));
        }

        let authorization = response
            .headers()
            .get(reqwest::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let xsrf_token = match authorization {
            Some(_) => None,
            None => response
                .cookies()
                .find(|c| c.name() == XSRF_COOKIE)
                .map(|c| c.value().to_string()),
        };

        debug!(bearer = authorization.is_some(), xsrf = xsrf_token.is_some(), "Logged in");
        Ok(Session {
            authorization,
            xsrf_token,
        })
    }

    async fn request(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<reqwest::RequestBuilder, UploadError> {
        let session = self.session().await?;
        let mut builder = builder.header(reqwest::header::ACCEPT, "application/json");
        if let Some(token) = &session.authorization {
            builder = builder.header(reqwest::header::AUTHORIZATION, token);
        }
        if let Some(token) = &session.xsrf_token {
            builder = builder.header("X-XSRF-TOKEN", token);
        }
        Ok(builder)
    }

    async fn send_json(
        &self,
        url: &str,
        builder: reqwest::RequestBuilder,
    ) -> Result<Value, UploadError> {
        let response = self
            .request(builder)
            .await?
            .send()
            .await
            .map_err(|e| UploadError::Request {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(UploadError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        response.json::<Value>().await.map_err(|e| UploadError::Decode {
            url: url.to_string(),
            message: e.to_string(),
        })
    }

    async fn list_embedded(
        &self,
        kind: &str,
        page: u32,
        size: u32,
    ) -> Result<Vec<CollectionInfo>, UploadError> {
        let url = self.config.api_url(&format!("core/{kind}"));
        let builder = self
            .client
            .get(&url)
            .query(&[("page", page), ("size", size)]);
        let body = self.send_json(&url, builder).await?;
        Ok(parse_embedded(&body, kind))
    }

    pub async fn list_collections(
        &self,
        page: u32,
        size: u32,
    ) -> Result<Vec<CollectionInfo>, UploadError> {
        self.list_embedded("collections", page, size).await
    }

    pub async fn list_communities(
        &self,
        page: u32,
        size: u32,
    ) -> Result<Vec<CollectionInfo>, UploadError> {
        self.list_embedded("communities", page, size).await
    }

    /// Exports `record` (with `exporter`, or the client's own) and creates it.
    pub async fn create_item(
        &self,
        record: &Record,
        collection_id: &str,
        exporter: Option<&DSpaceExporter>,
    ) -> Result<Value, UploadError> {
        let item = exporter.unwrap_or(&self.exporter).export_record(record);
        self.submit_item(&item, collection_id).await
    }
}

#[async_trait]
impl ItemSink for DSpaceClient {
    #[instrument(skip(self, item), fields(name = %item.name))]
    async fn submit_item(
        &self,
        item: &DSpaceItem,
        collection_id: &str,
    ) -> Result<Value, UploadError> {
        let url = self
            .config
            .api_url(&format!("core/collections/{collection_id}/items"));
        let builder = self.client.post(&url).json(item);
        self.send_json(&url, builder).await
    }
}

/// Reads `_embedded.<kind>` from a HAL listing; entries without a uuid are skipped.
fn parse_embedded(body: &Value, kind: &str) -> Vec<CollectionInfo> {
    let text = |entry: &Value, key: &str| {
        entry
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };

    body.get("_embedded")
        .and_then(|e| e.get(kind))
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| {
                    let uuid = entry.get("uuid")?.as_str()?.to_string();
                    Some(CollectionInfo {
                        uuid,
                        name: text(entry, "name"),
                        handle: text(entry, "handle"),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{HeaderInfo, Metadata, MetadataValue};
    use serde_json::json;
    use std::sync::Mutex;

    struct RecordingSink {
        reject: &'static str,
        submitted: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl ItemSink for RecordingSink {
        async fn submit_item(
            &self,
            item: &DSpaceItem,
            collection_id: &str,
        ) -> Result<Value, UploadError> {
            self.submitted
                .lock()
                .unwrap()
                .push((item.name.clone(), collection_id.to_string()));
            if item.name == self.reject {
                return Err(UploadError::Status {
                    url: "https://dspace.example.org/api/core/collections/c1/items".to_string(),
                    status: 422,
                });
            }
            Ok(json!({ "uuid": format!("uuid-{}", item.name) }))
        }
    }

    fn record(id: &str, title: &str) -> Record {
        let mut metadata = Metadata::new();
        metadata.add("dc:title", MetadataValue::plain(title));
        Record::new(
            HeaderInfo {
                identifier: id.to_string(),
                datestamp: "2024-01-01".to_string(),
                ..HeaderInfo::default()
            },
            metadata,
        )
    }

    #[tokio::test]
    async fn test_upload_continues_past_failures() {
        let sink = RecordingSink {
            reject: "Bad",
            submitted: Mutex::new(Vec::new()),
        };
        let records = vec![
            record("oai:x:1", "Good"),
            record("oai:x:2", "Bad"),
            record("oai:x:3", "Fine"),
        ];
        let progress = Mutex::new(Vec::new());
        let on_progress = |done: usize, total: usize| progress.lock().unwrap().push((done, total));

        let report = sink
            .upload_records(&DSpaceExporter::default(), &records, "c1", Some(&on_progress))
            .await;

        assert_eq!(report.total(), 3);
        assert!(!report.is_complete());
        assert_eq!(report.created.len(), 2);
        assert_eq!(report.created[1]["uuid"], "uuid-Fine");
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].identifier, "oai:x:2");
        assert!(matches!(report.failures[0].error, UploadError::Status { status: 422, .. }));

        assert_eq!(*progress.lock().unwrap(), vec![(1, 3), (2, 3), (3, 3)]);
        let submitted = sink.submitted.lock().unwrap();
        assert_eq!(submitted.len(), 3);
        assert!(submitted.iter().all(|(_, c)| c == "c1"));
    }

    #[tokio::test]
    async fn test_upload_without_progress_callback() {
        let sink = RecordingSink {
            reject: "",
            submitted: Mutex::new(Vec::new()),
        };
        let report = sink
            .upload_records(&DSpaceExporter::default(), &[record("oai:x:1", "One")], "c9", None)
            .await;
        assert!(report.is_complete());
        assert_eq!(report.total(), 1);
    }

    #[test]
    fn test_parse_embedded_listing() {
        let body = json!({
            "_embedded": {
                "collections": [
                    { "uuid": "c1", "name": "Theses", "handle": "123/1" },
                    { "uuid": "c2" },
                    { "name": "no uuid" }
                ]
            }
        });

        let parsed = parse_embedded(&body, "collections");
        assert_eq!(parsed.len(), 2);
        assert_eq!(
            parsed[0],
            CollectionInfo {
                uuid: "c1".to_string(),
                name: "Theses".to_string(),
                handle: "123/1".to_string(),
            }
        );
        assert_eq!(parsed[1].name, "");
        assert!(parse_embedded(&body, "communities").is_empty());
        assert!(parse_embedded(&json!({}), "collections").is_empty());
    }

    #[test]
    fn test_config_urls_and_defaults() {
        let config =
            DSpaceConfig::new("https://dspace.example.org/", "admin@example.org", "secret");
        assert_eq!(config.api_url("authn/login"), "https://dspace.example.org/api/authn/login");

        let parsed: DSpaceConfig = serde_json::from_str(
            r#"{"base_url": "https://d.example.org", "email": "a@b", "password": "p"}"#,
        )
        .unwrap();
        assert!(parsed.verify_tls);
        assert!(!parsed.with_verify_tls(false).verify_tls);
    }

    #[test]
    fn test_client_builds_without_network() {
        let client =
            DSpaceClient::new(DSpaceConfig::new("https://d.example.org", "a@b", "p")).unwrap();
        assert!(client.session.get().is_none());
        assert_eq!(client.exporter().mapping().get("dc:title"), Some("dc.title"));
    }
}

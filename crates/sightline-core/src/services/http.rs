//! HTTP implementations of the collaborator capabilities.
//!
//! Thin reqwest clients with finite timeouts. The recognition calls on the
//! per-image hot path retry transient failures with exponential backoff;
//! everything else surfaces the failure and lets the caller's own retry
//! mechanism (queue redelivery) deal with it.

use std::time::Duration;

use async_trait::async_trait;
use backoff::{future::retry_notify, ExponentialBackoff};
use base64::Engine;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{DocumentService, ObjectStore, QueueMessage, RecognitionService, WorkQueue};
use crate::config::Config;
use crate::error::{PipelineError, Result};
use crate::types::{BlobRef, DocumentInfo, FaceRegion, IdentityMatch, MediaType, ModelStatus, Rendition};

/// Check if a reqwest error is transient and worth retrying.
fn is_transient_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request()
}

/// Check if an HTTP status code indicates a transient condition.
fn is_transient_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::TOO_MANY_REQUESTS
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
            | StatusCode::BAD_GATEWAY
    )
}

fn base64_image(image: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(image)
}

fn build_client(timeout: Duration) -> std::result::Result<Client, reqwest::Error> {
    Client::builder().timeout(timeout).build()
}

// =============================================================================
// Recognition gateway
// =============================================================================

const RECOGNITION_MAX_RETRIES: u32 = 3;

/// Client for the face recognition gateway (detection, identity search, and
/// model lifecycle), authenticated with a bearer token.
pub struct HttpRecognitionClient {
    client: Client,
    base_url: String,
    api_key: String,
    timeout: Duration,
}

#[derive(Serialize)]
struct DetectRequest<'a> {
    image: &'a str,
    attributes: &'a str,
}

#[derive(Deserialize)]
struct DetectResponse {
    faces: Vec<WireFace>,
}

#[derive(Deserialize)]
struct WireFace {
    left: f32,
    top: f32,
    width: f32,
    height: f32,
    confidence: f32,
}

#[derive(Serialize)]
struct SearchRequest<'a> {
    collection_id: &'a str,
    image: &'a str,
    max_results: u32,
    threshold: f32,
}

#[derive(Deserialize)]
struct SearchResponse {
    matches: Vec<WireMatch>,
}

#[derive(Deserialize)]
struct WireMatch {
    identity_id: String,
    confidence: f32,
}

#[derive(Deserialize)]
struct ModelResponse {
    status: String,
}

impl HttpRecognitionClient {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self> {
        let client = build_client(timeout)
            .map_err(|e| PipelineError::Recognition(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            timeout,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(&config.recognition_endpoint, &config.recognition_api_key, config.http_timeout())
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(2),
            max_elapsed_time: Some(self.timeout * RECOGNITION_MAX_RETRIES),
            ..Default::default()
        }
    }

    async fn post_json_once<B, R>(
        &self,
        url: &str,
        body: &B,
    ) -> std::result::Result<R, backoff::Error<PipelineError>>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                let err = PipelineError::Recognition(format!("request failed: {e}"));
                if is_transient_error(&e) {
                    backoff::Error::transient(err)
                } else {
                    backoff::Error::permanent(err)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let err = PipelineError::Recognition(format!("{url} returned status {status}"));
            return if is_transient_status(status) {
                Err(backoff::Error::transient(err))
            } else {
                Err(backoff::Error::permanent(err))
            };
        }

        response.json().await.map_err(|e| {
            backoff::Error::permanent(PipelineError::Recognition(format!(
                "failed to parse response: {e}"
            )))
        })
    }

    async fn post_json<B, R>(&self, url: &str, body: &B) -> Result<R>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        retry_notify(
            self.backoff(),
            || async move { self.post_json_once(url, body).await },
            |err: PipelineError, after: Duration| {
                warn!(error = %err, retry_after_ms = after.as_millis() as u64, "retry scheduled");
            },
        )
        .await
    }
}

#[async_trait]
impl RecognitionService for HttpRecognitionClient {
    async fn detect_faces(&self, image: &[u8]) -> Result<Vec<FaceRegion>> {
        let url = format!("{}/v1/faces/detect", self.base_url);
        let encoded = base64_image(image);
        let body = DetectRequest { image: &encoded, attributes: "ALL" };
        let response: DetectResponse = self.post_json(&url, &body).await?;
        debug!(faces = response.faces.len(), "face detection response");
        Ok(response
            .faces
            .into_iter()
            .map(|f| FaceRegion {
                left: f.left,
                top: f.top,
                width: f.width,
                height: f.height,
                confidence: f.confidence,
            })
            .collect())
    }

    async fn search_by_image(
        &self,
        collection_id: &str,
        image: &[u8],
        max_results: u32,
        threshold: f32,
    ) -> Result<Vec<IdentityMatch>> {
        let url = format!("{}/v1/identities/search", self.base_url);
        let encoded = base64_image(image);
        let body = SearchRequest { collection_id, image: &encoded, max_results, threshold };
        let response: SearchResponse = self.post_json(&url, &body).await?;
        Ok(response
            .matches
            .into_iter()
            .map(|m| IdentityMatch { identity_id: m.identity_id, confidence: m.confidence })
            .collect())
    }

    async fn start_model(&self, model_id: &str) -> Result<()> {
        let url = format!("{}/v1/models/{model_id}/start", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| PipelineError::Recognition(format!("model start request failed: {e}")))?;
        if !response.status().is_success() {
            return Err(PipelineError::Recognition(format!(
                "model start returned status {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn stop_model(&self, model_id: &str) -> Result<()> {
        let url = format!("{}/v1/models/{model_id}/stop", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| PipelineError::Recognition(format!("model stop request failed: {e}")))?;
        if !response.status().is_success() {
            return Err(PipelineError::Recognition(format!(
                "model stop returned status {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn describe_model(&self, model_id: &str) -> Result<ModelStatus> {
        let url = format!("{}/v1/models/{model_id}", self.base_url);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| PipelineError::Recognition(format!("model describe request failed: {e}")))?;
        if !response.status().is_success() {
            return Err(PipelineError::Recognition(format!(
                "model describe returned status {}",
                response.status()
            )));
        }
        let model: ModelResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::Recognition(format!("failed to parse model status: {e}")))?;
        Ok(ModelStatus::parse(&model.status))
    }
}

// =============================================================================
// Object storage
// =============================================================================

/// Client for the object storage HTTP gateway.
pub struct HttpObjectStore {
    client: Client,
    base_url: String,
    api_key: String,
}

#[derive(Deserialize)]
struct ListResponse {
    keys: Vec<String>,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    tags: std::collections::HashMap<String, String>,
}

#[derive(Serialize)]
struct TagRequest<'a> {
    value: &'a str,
}

impl HttpObjectStore {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self> {
        let client = build_client(timeout)
            .map_err(|e| PipelineError::Storage(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(&config.storage_endpoint, &config.recognition_api_key, config.http_timeout())
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        let url = format!("{}/{bucket}/{key}", self.base_url);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| PipelineError::Storage(format!("get {bucket}/{key} failed: {e}")))?;
        if !response.status().is_success() {
            return Err(PipelineError::Storage(format!(
                "get {bucket}/{key} returned status {}",
                response.status()
            )));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| PipelineError::Storage(format!("get {bucket}/{key} body read failed: {e}")))?;
        Ok(bytes.to_vec())
    }

    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>> {
        let url = format!("{}/{bucket}", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("prefix", prefix)])
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| PipelineError::Storage(format!("list {bucket} failed: {e}")))?;
        if !response.status().is_success() {
            return Err(PipelineError::Storage(format!(
                "list {bucket} returned status {}",
                response.status()
            )));
        }
        let listing: ListResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::Storage(format!("list {bucket} parse failed: {e}")))?;
        Ok(listing.keys)
    }

    async fn get_tag(&self, bucket: &str, key: &str, name: &str) -> Result<Option<String>> {
        let url = format!("{}/{bucket}/{key}/tags", self.base_url);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| PipelineError::Storage(format!("tags {bucket}/{key} failed: {e}")))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(PipelineError::Storage(format!(
                "tags {bucket}/{key} returned status {}",
                response.status()
            )));
        }
        let tags: TagsResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::Storage(format!("tags {bucket}/{key} parse failed: {e}")))?;
        Ok(tags.tags.get(name).cloned())
    }

    async fn put_tag(&self, bucket: &str, key: &str, name: &str, value: &str) -> Result<()> {
        let url = format!("{}/{bucket}/{key}/tags/{name}", self.base_url);
        let response = self
            .client
            .put(&url)
            .bearer_auth(&self.api_key)
            .json(&TagRequest { value })
            .send()
            .await
            .map_err(|e| PipelineError::Storage(format!("tag {bucket}/{key} failed: {e}")))?;
        if !response.status().is_success() {
            return Err(PipelineError::Storage(format!(
                "tag {bucket}/{key} returned status {}",
                response.status()
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Work queue
// =============================================================================

/// Extra slack on top of the long-poll wait before the HTTP call itself
/// times out.
const RECEIVE_TIMEOUT_MARGIN: Duration = Duration::from_secs(5);

/// Client for the work queue HTTP API.
pub struct HttpWorkQueue {
    client: Client,
    queue_url: String,
    api_key: String,
    timeout: Duration,
}

#[derive(Serialize)]
struct SendRequest<'a> {
    body: &'a str,
}

#[derive(Serialize)]
struct ReceiveRequest {
    max_messages: u32,
    wait_seconds: u64,
}

#[derive(Deserialize)]
struct ReceiveResponse {
    #[serde(default)]
    messages: Vec<WireMessage>,
}

#[derive(Deserialize)]
struct WireMessage {
    body: String,
    receipt_handle: String,
}

#[derive(Serialize)]
struct DeleteRequest<'a> {
    receipt_handle: &'a str,
}

impl HttpWorkQueue {
    pub fn new(queue_url: &str, api_key: &str, timeout: Duration) -> Result<Self> {
        // No client-wide timeout: the receive call waits longer than every
        // other request and sets its own per-request deadline.
        let client = Client::builder()
            .build()
            .map_err(|e| PipelineError::Queue(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            queue_url: queue_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            timeout,
        })
    }
}

#[async_trait]
impl WorkQueue for HttpWorkQueue {
    async fn send(&self, body: &str) -> Result<()> {
        let url = format!("{}/messages", self.queue_url);
        let response = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .bearer_auth(&self.api_key)
            .json(&SendRequest { body })
            .send()
            .await
            .map_err(|e| PipelineError::Queue(format!("send failed: {e}")))?;
        if !response.status().is_success() {
            return Err(PipelineError::Queue(format!(
                "send returned status {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn receive(&self, max_messages: u32, wait: Duration) -> Result<Vec<QueueMessage>> {
        let url = format!("{}/messages/receive", self.queue_url);
        let response = self
            .client
            .post(&url)
            .timeout(wait + RECEIVE_TIMEOUT_MARGIN)
            .bearer_auth(&self.api_key)
            .json(&ReceiveRequest { max_messages, wait_seconds: wait.as_secs() })
            .send()
            .await
            .map_err(|e| PipelineError::Queue(format!("receive failed: {e}")))?;
        if !response.status().is_success() {
            return Err(PipelineError::Queue(format!(
                "receive returned status {}",
                response.status()
            )));
        }
        let received: ReceiveResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::Queue(format!("receive parse failed: {e}")))?;
        Ok(received
            .messages
            .into_iter()
            .map(|m| QueueMessage { body: m.body, receipt_handle: m.receipt_handle })
            .collect())
    }

    async fn delete(&self, receipt_handle: &str) -> Result<()> {
        let url = format!("{}/messages/delete", self.queue_url);
        let response = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .bearer_auth(&self.api_key)
            .json(&DeleteRequest { receipt_handle })
            .send()
            .await
            .map_err(|e| PipelineError::Queue(format!("delete failed: {e}")))?;
        if !response.status().is_success() {
            return Err(PipelineError::Queue(format!(
                "delete returned status {}",
                response.status()
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Document repository
// =============================================================================

/// Client for the document repository's REST + automation API, authenticated
/// with basic credentials. Property writes go through the automation endpoint
/// with `save` set, so the repository applies them in its own per-document
/// transaction.
pub struct HttpDocumentService {
    client: Client,
    base_url: String,
    user: String,
    password: String,
    identities_field: String,
    notify_from: String,
}

#[derive(Deserialize)]
struct WireDocument {
    uid: String,
    #[serde(default)]
    properties: WireProperties,
}

#[derive(Deserialize, Default)]
struct WireProperties {
    #[serde(rename = "file:content")]
    content: Option<WireBlob>,
    #[serde(rename = "picture:views", default)]
    views: Vec<WireView>,
}

#[derive(Deserialize)]
struct WireBlob {
    digest: String,
    #[serde(rename = "mime-type")]
    mime_type: String,
}

#[derive(Deserialize)]
struct WireView {
    title: String,
    content: WireBlob,
}

#[derive(Deserialize)]
struct EntriesResponse {
    #[serde(default)]
    entries: Vec<WireDocument>,
}

#[derive(Serialize)]
struct AutomationRequest<'a, P: Serialize> {
    params: P,
    input: &'a str,
    context: serde_json::Value,
}

#[derive(Serialize)]
struct SetPropertyParams<'a> {
    xpath: &'a str,
    save: &'a str,
    value: &'a [String],
}

#[derive(Serialize)]
struct NoticeParams<'a> {
    from: &'a str,
    to: &'a str,
    #[serde(rename = "HTML")]
    html: bool,
}

impl WireDocument {
    fn into_info(self) -> DocumentInfo {
        DocumentInfo {
            id: self.uid,
            content: self.properties.content.map(|b| b.into_ref()),
            renditions: self
                .properties
                .views
                .into_iter()
                .map(|v| Rendition { title: v.title, content: v.content.into_ref() })
                .collect(),
        }
    }
}

impl WireBlob {
    fn into_ref(self) -> BlobRef {
        BlobRef { digest: self.digest, media_type: MediaType::from_mime(&self.mime_type) }
    }
}

impl HttpDocumentService {
    pub fn new(
        base_url: &str,
        user: &str,
        password: &str,
        identities_field: &str,
        notify_from: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PipelineError::Persistence(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            user: user.to_string(),
            password: password.to_string(),
            identities_field: identities_field.to_string(),
            notify_from: notify_from.to_string(),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            &config.document_endpoint,
            &config.document_user,
            &config.document_password,
            &config.identities_field,
            &config.notify_from,
            config.http_timeout(),
        )
    }

    async fn automation<P: Serialize + Sync>(
        &self,
        operation: &str,
        input: &str,
        params: P,
    ) -> Result<reqwest::Response> {
        let url = format!("{}/automation/{operation}", self.base_url);
        let request = AutomationRequest { params, input, context: serde_json::json!({}) };
        let response = self
            .client
            .post(&url)
            .basic_auth(&self.user, Some(&self.password))
            .json(&request)
            .send()
            .await
            .map_err(|e| PipelineError::Persistence(format!("{operation} request failed: {e}")))?;
        if !response.status().is_success() {
            return Err(PipelineError::Persistence(format!(
                "{operation} returned status {}",
                response.status()
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl DocumentService for HttpDocumentService {
    async fn fetch(&self, doc_id: &str) -> Result<DocumentInfo> {
        let url = format!("{}/id/{doc_id}", self.base_url);
        let response = self
            .client
            .get(&url)
            .basic_auth(&self.user, Some(&self.password))
            .header("X-NXproperties", "*")
            .send()
            .await
            .map_err(|e| PipelineError::Persistence(format!("fetch {doc_id} failed: {e}")))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(PipelineError::NotFound(doc_id.to_string()));
        }
        if !response.status().is_success() {
            return Err(PipelineError::Persistence(format!(
                "fetch {doc_id} returned status {}",
                response.status()
            )));
        }
        let document: WireDocument = response
            .json()
            .await
            .map_err(|e| PipelineError::Persistence(format!("fetch {doc_id} parse failed: {e}")))?;
        Ok(document.into_info())
    }

    async fn list_collection(&self, collection_id: &str) -> Result<Vec<DocumentInfo>> {
        let response = self
            .automation("Collection.GetDocuments", collection_id, serde_json::json!({}))
            .await?;
        let entries: EntriesResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::Persistence(format!("collection listing parse failed: {e}")))?;
        Ok(entries.entries.into_iter().map(WireDocument::into_info).collect())
    }

    async fn save_identities(&self, doc_id: &str, identities: &[String]) -> Result<()> {
        let params = SetPropertyParams {
            xpath: &self.identities_field,
            save: "true",
            value: identities,
        };
        self.automation("Document.SetProperty", doc_id, params).await?;
        Ok(())
    }

    async fn send_completion_notice(&self, recipient: &str, collection_id: &str) -> Result<()> {
        let params = NoticeParams { from: &self.notify_from, to: recipient, html: true };
        self.automation("Notification.SendMail", collection_id, params).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_status_codes() {
        assert!(is_transient_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_transient_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(is_transient_status(StatusCode::GATEWAY_TIMEOUT));
        assert!(is_transient_status(StatusCode::BAD_GATEWAY));
        assert!(!is_transient_status(StatusCode::NOT_FOUND));
        assert!(!is_transient_status(StatusCode::BAD_REQUEST));
    }

    #[test]
    fn test_detect_response_shape() {
        let raw = r#"{"faces":[{"left":0.1,"top":0.2,"width":0.3,"height":0.4,"confidence":0.97}]}"#;
        let parsed: DetectResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.faces.len(), 1);
        assert!((parsed.faces[0].left - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_search_request_shape() {
        let body = SearchRequest {
            collection_id: "identities",
            image: "aGVsbG8=",
            max_results: 1,
            threshold: 80.0,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["collection_id"], "identities");
        assert_eq!(json["max_results"], 1);
        assert_eq!(json["threshold"], 80.0);
    }

    #[test]
    fn test_document_wire_parsing() {
        let raw = r#"{
            "uid": "doc-1",
            "properties": {
                "file:content": {"digest": "abc", "mime-type": "image/tiff"},
                "picture:views": [
                    {"title": "FullHD", "content": {"digest": "def", "mime-type": "image/jpeg"}}
                ]
            }
        }"#;
        let parsed: WireDocument = serde_json::from_str(raw).unwrap();
        let info = parsed.into_info();
        assert_eq!(info.id, "doc-1");
        let content = info.content.unwrap();
        assert_eq!(content.digest, "abc");
        assert!(!content.media_type.is_allowed());
        assert_eq!(info.renditions.len(), 1);
        assert_eq!(info.renditions[0].title, "FullHD");
        assert_eq!(info.renditions[0].content.media_type, MediaType::Jpeg);
    }

    #[test]
    fn test_document_without_content() {
        let parsed: WireDocument = serde_json::from_str(r#"{"uid": "doc-2"}"#).unwrap();
        let info = parsed.into_info();
        assert!(info.content.is_none());
        assert!(info.renditions.is_empty());
    }

    #[test]
    fn test_set_property_params_shape() {
        let identities = vec!["id-1".to_string(), "id-2".to_string()];
        let params = SetPropertyParams { xpath: "recognition:identities", save: "true", value: &identities };
        let json = serde_json::to_value(&params).unwrap();
        assert_eq!(json["xpath"], "recognition:identities");
        assert_eq!(json["value"].as_array().unwrap().len(), 2);
    }
}

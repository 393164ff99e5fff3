//! Bridge between converted spans and the CozeLoop API.
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use cozeloop::trace::ExportError;
use cozeloop_http::{ApiClient, FilePart, HttpError};
use serde::{Deserialize, Serialize};

use crate::export::model::{UploadFile, UploadSpan};

/// Endpoint receiving span batches.
pub const TRACE_INGEST_PATH: &str = "/v1/loop/traces/ingest";
/// Endpoint receiving offloaded payloads.
pub const FILE_UPLOAD_PATH: &str = "/v1/loop/files/upload";

/// Errors of [`TraceClient`] calls.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum TraceClientError {
    /// The request body could not be serialized.
    #[error("failed to serialize request: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The transport failed or the server answered with a non-2xx status.
    #[error("request failed: {0}")]
    Http(#[source] HttpError),

    /// The server answered with a non-zero status code in the body.
    #[error("CozeLoop API error {code}: {msg}")]
    Api {
        /// Status code of the response envelope
        code: i64,
        /// Message of the response envelope
        msg: String,
    },

    /// The response body was not a valid envelope.
    #[error("failed to decode response: {0}")]
    Decode(#[source] serde_json::Error),
}

impl ExportError for TraceClientError {
    fn exporter_name(&self) -> &'static str {
        "cozeloop"
    }
}

#[derive(Serialize)]
struct ReportRequest<'a> {
    spans: &'a [UploadSpan],
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    msg: String,
}

fn check_envelope(body: &[u8]) -> Result<(), TraceClientError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(());
    }
    let envelope: Envelope = serde_json::from_slice(body).map_err(TraceClientError::Decode)?;
    if envelope.code == 0 {
        Ok(())
    } else {
        Err(TraceClientError::Api {
            code: envelope.code,
            msg: envelope.msg,
        })
    }
}

/// Reports spans and uploads files of one workspace.
#[derive(Clone)]
pub struct TraceClient {
    api: Arc<dyn ApiClient>,
    workspace_id: String,
}

impl fmt::Debug for TraceClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TraceClient")
            .field("api", &self.api)
            .field("workspace_id", &self.workspace_id)
            .finish()
    }
}

impl TraceClient {
    /// Creates a client reporting through `api`.
    pub fn new(api: Arc<dyn ApiClient>, workspace_id: impl Into<String>) -> Self {
        TraceClient {
            api,
            workspace_id: workspace_id.into(),
        }
    }

    /// Workspace the client reports to.
    pub fn workspace_id(&self) -> &str {
        &self.workspace_id
    }

    /// Posts `{"spans": [...]}` to the ingest endpoint. An empty slice sends
    /// nothing.
    pub async fn report(&self, spans: &[UploadSpan]) -> Result<(), TraceClientError> {
        if spans.is_empty() {
            return Ok(());
        }
        let body = serde_json::to_vec(&ReportRequest { spans })?;
        let response = self
            .api
            .post_json(TRACE_INGEST_PATH, Bytes::from(body))
            .await
            .map_err(TraceClientError::Http)?;
        check_envelope(&response)
    }

    /// Uploads one offloaded payload as a multipart form. The storage key is
    /// the file name.
    pub async fn upload_file(&self, file: &UploadFile) -> Result<(), TraceClientError> {
        let part = FilePart::new(
            file.tos_key.clone(),
            file.content_type.clone(),
            file.data.clone(),
        )
        .with_field("workspace_id", self.workspace_id.clone());
        let response = self
            .api
            .upload_file(FILE_UPLOAD_PATH, part)
            .await
            .map_err(TraceClientError::Http)?;
        check_envelope(&response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingApiClient;

    fn upload_span(name: &str) -> UploadSpan {
        UploadSpan {
            span_name: name.to_string(),
            parent_id: "0".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn report_posts_spans_envelope() {
        let api = Arc::new(RecordingApiClient::default());
        let client = TraceClient::new(api.clone(), "ws");

        client
            .report(&[upload_span("a"), upload_span("b")])
            .await
            .unwrap();

        let reports = api.reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].0, TRACE_INGEST_PATH);
        let spans = reports[0].1["spans"].as_array().unwrap();
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0]["span_name"], "a");
        assert_eq!(spans[1]["parent_id"], "0");
    }

    #[tokio::test]
    async fn empty_report_is_skipped() {
        let api = Arc::new(RecordingApiClient::default());
        TraceClient::new(api.clone(), "ws").report(&[]).await.unwrap();
        assert!(api.reports().is_empty());
    }

    #[tokio::test]
    async fn non_zero_code_is_an_error() {
        let api = Arc::new(RecordingApiClient::default());
        api.respond_to_reports_with(r#"{"code":600903,"msg":"workspace not found"}"#);
        let err = TraceClient::new(api, "ws")
            .report(&[upload_span("a")])
            .await
            .unwrap_err();
        assert!(matches!(err, TraceClientError::Api { code: 600903, .. }));
        assert_eq!(err.exporter_name(), "cozeloop");
    }

    #[tokio::test]
    async fn transport_failure_is_an_error() {
        let api = Arc::new(RecordingApiClient::default());
        api.fail_reports_with("connection refused");
        let err = TraceClient::new(api, "ws")
            .report(&[upload_span("a")])
            .await
            .unwrap_err();
        assert!(matches!(err, TraceClientError::Http(_)));
        assert!(err.to_string().contains("connection refused"));
    }

    #[tokio::test]
    async fn upload_sends_multipart_with_workspace() {
        let api = Arc::new(RecordingApiClient::default());
        let client = TraceClient::new(api.clone(), "ws");
        let file = UploadFile {
            tos_key: "t_s_input_image_0123456789ab".to_string(),
            data: Bytes::from_static(b"png"),
            content_type: "image/png".to_string(),
        };
        client.upload_file(&file).await.unwrap();

        let uploads = api.uploads();
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].0, FILE_UPLOAD_PATH);
        assert_eq!(uploads[0].1.file_name, file.tos_key);
        assert_eq!(uploads[0].1.content_type, "image/png");
        assert_eq!(
            uploads[0].1.fields,
            vec![("workspace_id".to_string(), "ws".to_string())]
        );
    }

    #[test]
    fn envelope_rules() {
        assert!(check_envelope(b"").is_ok());
        assert!(check_envelope(b"{}").is_ok());
        assert!(check_envelope(br#"{"code":0,"msg":"ok"}"#).is_ok());
        assert!(matches!(
            check_envelope(b"<html>"),
            Err(TraceClientError::Decode(_))
        ));
    }
}

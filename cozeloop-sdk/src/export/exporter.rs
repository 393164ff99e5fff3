//! The CozeLoop span exporter.
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use cozeloop::global;
use cozeloop::trace::TraceError;
use cozeloop::{loop_debug, loop_warn};
use futures_util::future::{join_all, BoxFuture};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::error::LoopSdkError;
use crate::export::client::TraceClient;
use crate::export::converter::SpanConverter;
use crate::export::model::UploadFile;
use crate::export::{ExportResult, SpanExporter};
use crate::retry::{retry_with_exponential_backoff, RetryPolicy};
use crate::trace::SpanData;

/// Exports spans to CozeLoop.
///
/// Each batch is converted with the [`SpanConverter`]. Offloaded payloads are
/// uploaded on background tasks, each retried according to the exporter's
/// [`RetryPolicy`]; an upload that still fails is handed to
/// [`global::handle_error`] and does not fail the batch. The batch itself is
/// reported once, without retries, and fails with
/// [`TraceError::ExportTimedOut`] when a report timeout is set and exceeded.
pub struct LoopSpanExporter {
    client: Arc<TraceClient>,
    converter: SpanConverter,
    handle: Handle,
    uploads: Arc<Mutex<Vec<JoinHandle<()>>>>,
    retry: RetryPolicy,
    report_timeout: Option<Duration>,
}

impl fmt::Debug for LoopSpanExporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopSpanExporter")
            .field("client", &self.client)
            .field("converter", &self.converter)
            .field("retry", &self.retry)
            .field("report_timeout", &self.report_timeout)
            .finish()
    }
}

impl LoopSpanExporter {
    /// Creates an exporter reporting through `client`.
    ///
    /// Uploads are spawned on the current Tokio runtime, so this fails with
    /// [`LoopSdkError::RuntimeUnavailable`] outside of one.
    pub fn new(client: TraceClient, converter: SpanConverter) -> Result<Self, LoopSdkError> {
        Ok(LoopSpanExporter {
            client: Arc::new(client),
            converter,
            handle: Handle::try_current()?,
            uploads: Arc::new(Mutex::new(Vec::new())),
            retry: RetryPolicy::default(),
            report_timeout: None,
        })
    }

    /// Sets the retry policy of file uploads.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Bounds how long a single report may take.
    pub fn with_report_timeout(mut self, timeout: Duration) -> Self {
        self.report_timeout = Some(timeout);
        self
    }

    fn spawn_upload(&self, file: UploadFile) {
        let client = self.client.clone();
        let policy = self.retry.clone();
        let task = self.handle.spawn(async move {
            let (api, payload) = (&client, &file);
            let result =
                retry_with_exponential_backoff(policy, "UploadFile", move || api.upload_file(payload))
                    .await;
            match result {
                Ok(()) => {
                    loop_debug!(name: "LoopSpanExporter.Uploaded", key = file.tos_key.as_str());
                }
                Err(err) => global::handle_error(TraceError::UploadFailed {
                    key: file.tos_key.clone(),
                    reason: err.to_string(),
                }),
            }
        });

        let mut uploads = self.uploads.lock().unwrap_or_else(PoisonError::into_inner);
        uploads.retain(|upload| !upload.is_finished());
        uploads.push(task);
    }

    fn wait_for_uploads(&self) -> BoxFuture<'static, ExportResult> {
        let pending = std::mem::take(&mut *self.uploads.lock().unwrap_or_else(PoisonError::into_inner));
        Box::pin(async move {
            for result in join_all(pending).await {
                if let Err(err) = result {
                    loop_warn!(name: "LoopSpanExporter.UploadTaskFailed", reason = format!("{err}"));
                }
            }
            Ok(())
        })
    }
}

impl SpanExporter for LoopSpanExporter {
    fn export(&self, batch: Vec<SpanData>) -> BoxFuture<'static, ExportResult> {
        let mut spans = Vec::with_capacity(batch.len());
        for data in &batch {
            let converted = self.converter.convert(data);
            for file in converted.files {
                self.spawn_upload(file);
            }
            spans.push(converted.span);
        }

        let client = self.client.clone();
        let report_timeout = self.report_timeout;
        Box::pin(async move {
            let reported = match report_timeout {
                Some(limit) => match tokio::time::timeout(limit, client.report(&spans)).await {
                    Ok(reported) => reported,
                    Err(_) => {
                        global::handle_error(TraceError::ExportTimedOut(limit));
                        return Err(TraceError::ExportTimedOut(limit));
                    }
                },
                None => client.report(&spans).await,
            };
            match reported {
                Ok(()) => {
                    loop_debug!(name: "LoopSpanExporter.Reported", count = spans.len());
                    Ok(())
                }
                Err(err) => {
                    let message = err.to_string();
                    global::handle_error(TraceError::from(err));
                    Err(TraceError::from(message))
                }
            }
        })
    }

    fn force_flush(&self) -> BoxFuture<'static, ExportResult> {
        self.wait_for_uploads()
    }

    fn shutdown(&self) -> BoxFuture<'static, ExportResult> {
        self.wait_for_uploads()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::FILE_UPLOAD_PATH;
    use crate::testing::RecordingApiClient;
    use cozeloop::trace::{SpanContext, SpanId, SpanType, Status, TraceFlags, TraceId};
    use serde_json::json;
    use std::borrow::Cow;
    use std::time::SystemTime;

    fn span_data(span_id: u64, name: &'static str) -> SpanData {
        let start = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        SpanData {
            span_context: SpanContext::new(
                TraceId::from(0x4bf9_2f35_77b3_4da6_a3ce_929d_0e0e_4736),
                SpanId::from(span_id),
                TraceFlags::SAMPLED,
                false,
            ),
            parent_span_id: None,
            name: Cow::Borrowed(name),
            span_type: SpanType::Tool,
            start_time: start,
            end_time: start + Duration::from_millis(10),
            input: None,
            output: None,
            tags: Vec::new(),
            system_tags: Vec::new(),
            status: Status::Unset,
            ultra_large_report: false,
            service_name: None,
            log_id: None,
        }
    }

    fn with_image(mut data: SpanData) -> SpanData {
        data.input = Some(json!({
            "messages": [{
                "role": "user",
                "parts": [{"type": "image_url", "image_url": {"url": "data:image/png;base64,aGVsbG8="}}]
            }]
        }));
        data
    }

    fn exporter(api: &Arc<RecordingApiClient>) -> LoopSpanExporter {
        let client = TraceClient::new(api.clone(), "ws");
        LoopSpanExporter::new(client, SpanConverter::new("ws")).unwrap()
    }

    #[tokio::test]
    async fn reports_batch_once_in_order() {
        let api = Arc::new(RecordingApiClient::default());
        let exporter = exporter(&api);

        exporter
            .export(vec![span_data(1, "first"), span_data(2, "second")])
            .await
            .unwrap();

        let reports = api.reports();
        assert_eq!(reports.len(), 1);
        let spans = reports[0].1["spans"].as_array().unwrap();
        assert_eq!(spans[0]["span_name"], "first");
        assert_eq!(spans[1]["span_name"], "second");
        assert_eq!(spans[0]["workspace_id"], "ws");
    }

    #[tokio::test]
    async fn empty_batch_reports_nothing() {
        let api = Arc::new(RecordingApiClient::default());
        exporter(&api).export(Vec::new()).await.unwrap();
        assert!(api.reports().is_empty());
    }

    #[tokio::test]
    async fn uploads_files_before_flush_returns() {
        let api = Arc::new(RecordingApiClient::default());
        let exporter = exporter(&api);

        exporter.export(vec![with_image(span_data(1, "chat"))]).await.unwrap();
        exporter.force_flush().await.unwrap();

        let uploads = api.uploads();
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].0, FILE_UPLOAD_PATH);
        assert!(uploads[0]
            .1
            .file_name
            .starts_with("4bf92f3577b34da6a3ce929d0e0e4736_0000000000000001_input_image_"));
        assert_eq!(uploads[0].1.data.as_ref(), b"hello");

        let spans = api.reports()[0].1["spans"].clone();
        let object_storage = spans[0]["object_storage"].as_str().unwrap();
        assert!(object_storage.contains(&uploads[0].1.file_name));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_uploads_are_retried() {
        let api = Arc::new(RecordingApiClient::default());
        api.fail_next_uploads(2);
        let exporter = exporter(&api);

        exporter.export(vec![with_image(span_data(1, "chat"))]).await.unwrap();
        exporter.shutdown().await.unwrap();

        assert_eq!(api.upload_attempts(), 3);
        assert_eq!(api.uploads().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_upload_retries_do_not_fail_the_batch() {
        let api = Arc::new(RecordingApiClient::default());
        api.fail_next_uploads(10);
        let exporter = exporter(&api).with_retry_policy(RetryPolicy {
            max_retries: 1,
            ..RetryPolicy::default()
        });

        exporter.export(vec![with_image(span_data(1, "chat"))]).await.unwrap();
        exporter.force_flush().await.unwrap();

        assert_eq!(api.upload_attempts(), 2);
        assert!(api.uploads().is_empty());
        assert_eq!(api.reports().len(), 1);
    }

    #[tokio::test]
    async fn report_failure_is_returned() {
        let api = Arc::new(RecordingApiClient::default());
        api.respond_to_reports_with(r#"{"code":401,"msg":"bad token"}"#);

        let err = exporter(&api)
            .export(vec![span_data(1, "chat")])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("bad token"));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_report_times_out() {
        let api = Arc::new(RecordingApiClient::default());
        api.stall_reports();
        let exporter = exporter(&api).with_report_timeout(Duration::from_secs(3));

        let err = exporter
            .export(vec![span_data(1, "chat")])
            .await
            .unwrap_err();
        assert!(matches!(err, TraceError::ExportTimedOut(d) if d == Duration::from_secs(3)));
        assert!(api.reports().is_empty());
    }

    #[test]
    fn requires_runtime() {
        let api = Arc::new(RecordingApiClient::default());
        let client = TraceClient::new(api, "ws");
        let err = LoopSpanExporter::new(client, SpanConverter::new("ws")).unwrap_err();
        assert!(matches!(err, LoopSdkError::RuntimeUnavailable(_)));
    }
}

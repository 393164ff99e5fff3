//! Test doubles for the collaborators of the export pipeline.
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use cozeloop_http::{ApiClient, FilePart, HttpError};

/// An [`ApiClient`] that records every call and answers from canned
/// responses.
///
/// Reports succeed with an empty body unless configured otherwise; uploads
/// succeed unless [`RecordingApiClient::fail_next_uploads`] was called.
#[derive(Debug, Default)]
pub struct RecordingApiClient {
    reports: Mutex<Vec<(String, serde_json::Value)>>,
    uploads: Mutex<Vec<(String, FilePart)>>,
    report_response: Mutex<Option<Result<Bytes, String>>>,
    failing_uploads: AtomicUsize,
    upload_attempts: AtomicUsize,
    stalled_reports: AtomicBool,
}

impl RecordingApiClient {
    /// JSON bodies posted so far, with their paths.
    pub fn reports(&self) -> Vec<(String, serde_json::Value)> {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Files uploaded successfully so far, with their paths.
    pub fn uploads(&self) -> Vec<(String, FilePart)> {
        self.uploads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of upload calls, failed ones included.
    pub fn upload_attempts(&self) -> usize {
        self.upload_attempts.load(Ordering::SeqCst)
    }

    /// Answer report calls with `body`.
    pub fn respond_to_reports_with(&self, body: &str) {
        *self
            .report_response
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Ok(Bytes::from(body.to_string())));
    }

    /// Fail report calls with a transport error carrying `message`.
    pub fn fail_reports_with(&self, message: &str) {
        *self
            .report_response
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Err(message.to_string()));
    }

    /// Make report calls hang until they are cancelled.
    pub fn stall_reports(&self) {
        self.stalled_reports.store(true, Ordering::SeqCst);
    }

    /// Fail the next `count` upload calls with a transport error.
    pub fn fail_next_uploads(&self, count: usize) {
        self.failing_uploads.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl ApiClient for RecordingApiClient {
    async fn post_json(&self, path: &str, body: Bytes) -> Result<Bytes, HttpError> {
        if self.stalled_reports.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let json = serde_json::from_slice(&body)?;
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((path.to_string(), json));
        let response = self
            .report_response
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match response {
            None => Ok(Bytes::new()),
            Some(Ok(body)) => Ok(body),
            Some(Err(message)) => Err(message.into()),
        }
    }

    async fn upload_file(&self, path: &str, file: FilePart) -> Result<Bytes, HttpError> {
        self.upload_attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failing_uploads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err("upload rejected".into());
        }
        self.uploads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((path.to_string(), file));
        Ok(Bytes::from_static(br#"{"code":0,"msg":"success"}"#))
    }
}

use std::time::Duration;

use cozeloop::loop_debug;
use http::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};

use super::{async_trait, ApiClient, Bytes, FilePart, HttpError};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);
const DEFAULT_UPLOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// [`ApiClient`] backed by a [`reqwest::Client`].
///
/// Every request carries `Authorization: Bearer <token>` plus the configured
/// custom headers.
#[derive(Debug, Clone)]
pub struct ReqwestApiClient {
    client: reqwest::Client,
    headers: HeaderMap,
    base_url: String,
    timeout: Duration,
    upload_timeout: Duration,
}

impl ReqwestApiClient {
    /// Create a builder for a client talking to `base_url`.
    pub fn builder(base_url: impl Into<String>, token: impl Into<String>) -> ReqwestApiClientBuilder {
        ReqwestApiClientBuilder {
            base_url: base_url.into(),
            token: token.into(),
            headers: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
            upload_timeout: DEFAULT_UPLOAD_TIMEOUT,
            client: None,
        }
    }

    fn url_for(&self, path: &str) -> String {
        join_url(&self.base_url, path)
    }
}

/// Builder for [`ReqwestApiClient`].
#[derive(Debug)]
pub struct ReqwestApiClientBuilder {
    base_url: String,
    token: String,
    headers: Vec<(String, String)>,
    timeout: Duration,
    upload_timeout: Duration,
    client: Option<reqwest::Client>,
}

impl ReqwestApiClientBuilder {
    /// Add a header sent with every request.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Timeout of JSON requests.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Timeout of file uploads.
    pub fn with_upload_timeout(mut self, timeout: Duration) -> Self {
        self.upload_timeout = timeout;
        self
    }

    /// Use a preconfigured [`reqwest::Client`].
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Build the client. Fails when the token or a custom header is not a
    /// valid header value.
    pub fn build(self) -> Result<ReqwestApiClient, HttpError> {
        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", self.token))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);
        for (name, value) in self.headers {
            headers.insert(
                HeaderName::from_bytes(name.as_bytes())?,
                HeaderValue::from_str(&value)?,
            );
        }

        let client = match self.client {
            Some(client) => client,
            None => reqwest::Client::builder().build()?,
        };

        Ok(ReqwestApiClient {
            client,
            headers,
            base_url: self.base_url,
            timeout: self.timeout,
            upload_timeout: self.upload_timeout,
        })
    }
}

fn join_url(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[async_trait]
impl ApiClient for ReqwestApiClient {
    async fn post_json(&self, path: &str, body: Bytes) -> Result<Bytes, HttpError> {
        loop_debug!(name: "ReqwestApiClient.PostJson", path = path);
        let response = self
            .client
            .post(self.url_for(path))
            .headers(self.headers.clone())
            .header(CONTENT_TYPE, "application/json")
            .timeout(self.timeout)
            .body(body)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.bytes().await?)
    }

    async fn upload_file(&self, path: &str, file: FilePart) -> Result<Bytes, HttpError> {
        loop_debug!(
            name: "ReqwestApiClient.UploadFile",
            path = path,
            file_name = file.file_name.as_str(),
            size = file.data.len()
        );
        let part = reqwest::multipart::Part::bytes(file.data.to_vec())
            .file_name(file.file_name)
            .mime_str(&file.content_type)?;
        let mut form = reqwest::multipart::Form::new().part("file", part);
        for (name, value) in file.fields {
            form = form.text(name, value);
        }
        let response = self
            .client
            .post(self.url_for(path))
            .headers(self.headers.clone())
            .timeout(self.upload_timeout)
            .multipart(form)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.bytes().await?)
    }
}

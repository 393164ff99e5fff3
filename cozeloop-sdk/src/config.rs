//! Client configuration for the CozeLoop tracer.
//!
//! Values set on [`LoopConfigBuilder`] win. Unset required values fall back to
//! environment variables; a value missing from both fails [`build`] with
//! [`ConfigError::PropertyUnprovided`].
//!
//! | property       | environment variable     | default                 |
//! |----------------|--------------------------|-------------------------|
//! | workspace id   | `COZELOOP_WORKSPACE_ID`  | required                |
//! | API token      | `COZELOOP_API_TOKEN`     | required                |
//! | API base URL   | `COZELOOP_API_BASE_URL`  | `https://api.coze.cn`   |
//!
//! [`build`]: LoopConfigBuilder::build
use std::env;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use cozeloop_http::ApiClient;

use crate::trace::{BatchConfig, SpanProcessor};

/// Workspace the spans are reported to.
pub const COZELOOP_WORKSPACE_ID: &str = "COZELOOP_WORKSPACE_ID";
/// Personal access token used as bearer token.
pub const COZELOOP_API_TOKEN: &str = "COZELOOP_API_TOKEN";
/// Base URL of the CozeLoop API.
pub const COZELOOP_API_BASE_URL: &str = "COZELOOP_API_BASE_URL";
/// Default base URL of the CozeLoop API.
pub const COZELOOP_API_BASE_URL_DEFAULT: &str = "https://api.coze.cn";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);
const DEFAULT_UPLOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors raised while resolving a [`LoopConfig`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    /// A required property was neither set nor found in the environment.
    #[error("property `{property}` is not provided; set it explicitly or through the `{env}` environment variable")]
    PropertyUnprovided {
        /// Name of the missing property.
        property: &'static str,
        /// Environment variable consulted as fallback.
        env: &'static str,
    },
}

/// Resolved configuration of the tracer.
pub struct LoopConfig {
    pub(crate) workspace_id: String,
    pub(crate) api_token: String,
    pub(crate) api_base_url: String,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) timeout: Duration,
    pub(crate) upload_timeout: Duration,
    pub(crate) batch_config: BatchConfig,
    pub(crate) service_name: Option<String>,
    pub(crate) ultra_large_report: bool,
    pub(crate) record_inputs: bool,
    pub(crate) record_outputs: bool,
    pub(crate) api_client: Option<Arc<dyn ApiClient>>,
    pub(crate) span_processor: Option<Box<dyn SpanProcessor>>,
}

impl fmt::Debug for LoopConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopConfig")
            .field("workspace_id", &self.workspace_id)
            .field("api_base_url", &self.api_base_url)
            .field("headers", &self.headers.iter().map(|(k, _)| k).collect::<Vec<_>>())
            .field("timeout", &self.timeout)
            .field("upload_timeout", &self.upload_timeout)
            .field("batch_config", &self.batch_config)
            .field("service_name", &self.service_name)
            .field("ultra_large_report", &self.ultra_large_report)
            .field("record_inputs", &self.record_inputs)
            .field("record_outputs", &self.record_outputs)
            .field("api_client", &self.api_client)
            .field("span_processor", &self.span_processor)
            .finish()
    }
}

impl LoopConfig {
    /// Create a new [`LoopConfigBuilder`].
    pub fn builder() -> LoopConfigBuilder {
        LoopConfigBuilder::default()
    }

    /// Workspace the spans are reported to.
    pub fn workspace_id(&self) -> &str {
        &self.workspace_id
    }

    /// Base URL of the CozeLoop API.
    pub fn api_base_url(&self) -> &str {
        &self.api_base_url
    }

    /// Batching parameters of the default span processor.
    pub fn batch_config(&self) -> &BatchConfig {
        &self.batch_config
    }
}

/// Builder for [`LoopConfig`].
#[derive(Default)]
pub struct LoopConfigBuilder {
    workspace_id: Option<String>,
    api_token: Option<String>,
    api_base_url: Option<String>,
    headers: Vec<(String, String)>,
    timeout: Option<Duration>,
    upload_timeout: Option<Duration>,
    batch_config: Option<BatchConfig>,
    service_name: Option<String>,
    ultra_large_report: bool,
    record_inputs: Option<bool>,
    record_outputs: Option<bool>,
    api_client: Option<Arc<dyn ApiClient>>,
    span_processor: Option<Box<dyn SpanProcessor>>,
}

impl fmt::Debug for LoopConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopConfigBuilder")
            .field("workspace_id", &self.workspace_id)
            .field("api_base_url", &self.api_base_url)
            .field("service_name", &self.service_name)
            .finish_non_exhaustive()
    }
}

impl LoopConfigBuilder {
    /// Workspace the spans are reported to.
    pub fn with_workspace_id(mut self, workspace_id: impl Into<String>) -> Self {
        self.workspace_id = Some(workspace_id.into());
        self
    }

    /// Token sent as `Authorization: Bearer <token>`.
    pub fn with_api_token(mut self, api_token: impl Into<String>) -> Self {
        self.api_token = Some(api_token.into());
        self
    }

    /// Base URL of the CozeLoop API.
    pub fn with_api_base_url(mut self, api_base_url: impl Into<String>) -> Self {
        self.api_base_url = Some(api_base_url.into());
        self
    }

    /// Header sent with every API request.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Timeout of trace report requests. Defaults to 3 seconds.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Timeout of file uploads. Defaults to 30 seconds.
    pub fn with_upload_timeout(mut self, timeout: Duration) -> Self {
        self.upload_timeout = Some(timeout);
        self
    }

    /// Batching parameters. Defaults to [`BatchConfig::default`].
    pub fn with_batch_config(mut self, batch_config: BatchConfig) -> Self {
        self.batch_config = Some(batch_config);
        self
    }

    /// Service name reported on every span that does not set its own.
    pub fn with_service_name(mut self, service_name: impl Into<String>) -> Self {
        self.service_name = Some(service_name.into());
        self
    }

    /// Offload oversized inputs and outputs instead of truncating them.
    pub fn with_ultra_large_report(mut self, enabled: bool) -> Self {
        self.ultra_large_report = enabled;
        self
    }

    /// Record the arguments of traced calls as span input. Defaults to `true`.
    pub fn with_record_inputs(mut self, enabled: bool) -> Self {
        self.record_inputs = Some(enabled);
        self
    }

    /// Record the results of traced calls as span output. Defaults to `true`.
    pub fn with_record_outputs(mut self, enabled: bool) -> Self {
        self.record_outputs = Some(enabled);
        self
    }

    /// Report through `client` instead of the built-in HTTP client.
    pub fn with_api_client(mut self, client: Arc<dyn ApiClient>) -> Self {
        self.api_client = Some(client);
        self
    }

    /// Replace the default batching processor. The workspace, token and
    /// endpoint are still validated.
    pub fn with_span_processor<T: SpanProcessor + 'static>(mut self, processor: T) -> Self {
        self.span_processor = Some(Box::new(processor));
        self
    }

    /// Resolve the configuration against the environment.
    pub fn build(self) -> Result<LoopConfig, ConfigError> {
        let workspace_id = resolve(self.workspace_id, "workspace_id", COZELOOP_WORKSPACE_ID)?;
        let api_token = resolve(self.api_token, "api_token", COZELOOP_API_TOKEN)?;
        let api_base_url = match self
            .api_base_url
            .or_else(|| env::var(COZELOOP_API_BASE_URL).ok())
        {
            Some(url) if url.trim().is_empty() => {
                return Err(ConfigError::PropertyUnprovided {
                    property: "api_base_url",
                    env: COZELOOP_API_BASE_URL,
                })
            }
            Some(url) => url,
            None => COZELOOP_API_BASE_URL_DEFAULT.to_string(),
        };

        Ok(LoopConfig {
            workspace_id,
            api_token,
            api_base_url,
            headers: self.headers,
            timeout: self.timeout.unwrap_or(DEFAULT_TIMEOUT),
            upload_timeout: self.upload_timeout.unwrap_or(DEFAULT_UPLOAD_TIMEOUT),
            batch_config: self.batch_config.unwrap_or_default(),
            service_name: self.service_name,
            ultra_large_report: self.ultra_large_report,
            record_inputs: self.record_inputs.unwrap_or(true),
            record_outputs: self.record_outputs.unwrap_or(true),
            api_client: self.api_client,
            span_processor: self.span_processor,
        })
    }
}

fn resolve(
    value: Option<String>,
    property: &'static str,
    env_name: &'static str,
) -> Result<String, ConfigError> {
    value
        .or_else(|| env::var(env_name).ok())
        .filter(|v| !v.trim().is_empty())
        .ok_or(ConfigError::PropertyUnprovided {
            property,
            env: env_name,
        })
}

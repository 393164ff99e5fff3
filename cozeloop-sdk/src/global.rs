//! # Process-wide tracer registry
//!
//! Applications that can thread a [`TracerProvider`] through their code
//! should do so. For the others, [`TracerRegistry`] is an explicit
//! initialize-once holder of the export pipeline, and the free functions of
//! this module wrap one registry shared by the whole process.
//!
//! ```no_run
//! use cozeloop::Context;
//! use cozeloop_sdk::config::LoopConfig;
//! use cozeloop_sdk::global;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! // Workspace and token come from COZELOOP_WORKSPACE_ID / COZELOOP_API_TOKEN.
//! global::initialize(LoopConfig::builder().build()?)?;
//!
//! global::tracer()
//!     .start_with_context("startup", &Context::new())
//!     .end();
//!
//! global::shutdown().await?;
//! # Ok(())
//! # }
//! ```
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use cozeloop::loop_debug;
use cozeloop_http::{ApiClient, HttpError};

use crate::config::{ConfigError, LoopConfig};
use crate::error::{LoopSdkError, LoopSdkResult};
use crate::export::{LoopSpanExporter, SpanConverter, TraceClient};
use crate::propagation::LoopPropagator;
use crate::trace::{BatchSpanProcessor, SpanProcessor, Tracer, TracerProvider};

/// Errors raised while starting the export pipeline.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum InitError {
    /// The HTTP client could not be created.
    #[error("failed to create the API client: {0}")]
    ApiClient(#[source] HttpError),

    /// A required configuration property is missing.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// No API client was configured and the `reqwest` feature is disabled.
    #[error("no API client configured; enable the `reqwest` feature or call `with_api_client`")]
    MissingApiClient,

    /// A pipeline component could not be started.
    #[error(transparent)]
    Sdk(#[from] LoopSdkError),
}

/// Holds the tracer provider of an application once it was initialized.
///
/// [`TracerRegistry::initialize`] configures the pipeline on its first
/// successful call and ignores later calls. Flushing and shutting down a
/// registry that was never initialized does nothing.
#[derive(Debug, Default)]
pub struct TracerRegistry {
    provider: RwLock<Option<TracerProvider>>,
    propagator: LoopPropagator,
}

impl TracerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        TracerRegistry::default()
    }

    /// Starts the export pipeline described by `config`.
    ///
    /// Unless `config` carries its own span processor, spans are batched by a
    /// [`BatchSpanProcessor`] and exported by a [`LoopSpanExporter`], which
    /// requires a Tokio runtime. Returns `Ok` without side effects when the
    /// registry was already initialized.
    pub fn initialize(&self, config: LoopConfig) -> Result<(), InitError> {
        let mut slot = self.provider.write().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            loop_debug!(name: "TracerRegistry.AlreadyInitialized");
            return Ok(());
        }
        *slot = Some(build_provider(config)?);
        loop_debug!(name: "TracerRegistry.Initialized");
        Ok(())
    }

    /// Resolves the configuration from the `COZELOOP_*` environment
    /// variables and starts the export pipeline with it.
    ///
    /// Fails with [`InitError::Config`] when the workspace id or the API
    /// token is not set. Does nothing when the registry was already
    /// initialized.
    pub fn initialize_from_env(&self) -> Result<(), InitError> {
        if self.is_initialized() {
            return Ok(());
        }
        self.initialize(LoopConfig::builder().build()?)
    }

    /// Returns `true` once [`TracerRegistry::initialize`] succeeded.
    pub fn is_initialized(&self) -> bool {
        self.provider
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// The provider, if initialized.
    pub fn provider(&self) -> Option<TracerProvider> {
        self.provider
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// A tracer of the registered provider. Before initialization the tracer
    /// creates spans that are never exported.
    pub fn tracer(&self) -> Tracer {
        match self.provider() {
            Some(provider) => provider.tracer(),
            None => noop_provider().tracer(),
        }
    }

    /// The propagator to inject and extract trace headers with.
    pub fn propagator(&self) -> &LoopPropagator {
        &self.propagator
    }

    /// Exports every buffered span without stopping the pipeline.
    pub async fn force_flush(&self) -> LoopSdkResult {
        match self.provider() {
            Some(provider) => provider.force_flush().await,
            None => Ok(()),
        }
    }

    /// Flushes and stops the pipeline. Later calls do nothing.
    pub async fn shutdown(&self) -> LoopSdkResult {
        let Some(provider) = self.provider() else {
            return Ok(());
        };
        match provider.shutdown().await {
            Err(LoopSdkError::AlreadyShutdown) => Ok(()),
            result => result,
        }
    }
}

fn noop_provider() -> &'static TracerProvider {
    static NOOP_PROVIDER: OnceLock<TracerProvider> = OnceLock::new();
    NOOP_PROVIDER.get_or_init(TracerProvider::default)
}

fn build_provider(mut config: LoopConfig) -> Result<TracerProvider, InitError> {
    let processor: Box<dyn SpanProcessor> = match config.span_processor.take() {
        Some(processor) => processor,
        None => {
            let api = match config.api_client.take() {
                Some(api) => api,
                None => default_api_client(&config)?,
            };
            let client = TraceClient::new(api, config.workspace_id.clone());
            let exporter =
                LoopSpanExporter::new(client, SpanConverter::new(config.workspace_id.clone()))?
                    .with_report_timeout(config.timeout);
            Box::new(
                BatchSpanProcessor::builder(exporter)
                    .with_batch_config(config.batch_config.clone())
                    .build()?,
            )
        }
    };

    let mut builder = TracerProvider::builder()
        .with_boxed_span_processor(processor)
        .with_ultra_large_report(config.ultra_large_report)
        .with_record_inputs(config.record_inputs)
        .with_record_outputs(config.record_outputs);
    if let Some(service_name) = config.service_name.take() {
        builder = builder.with_service_name(service_name);
    }
    Ok(builder.build())
}

#[cfg(feature = "reqwest")]
fn default_api_client(config: &LoopConfig) -> Result<Arc<dyn ApiClient>, InitError> {
    let mut builder = cozeloop_http::ReqwestApiClient::builder(&config.api_base_url, &config.api_token)
        .with_timeout(config.timeout)
        .with_upload_timeout(config.upload_timeout);
    for (name, value) in &config.headers {
        builder = builder.with_header(name, value);
    }
    let client = builder.build().map_err(InitError::ApiClient)?;
    Ok(Arc::new(client))
}

#[cfg(not(feature = "reqwest"))]
fn default_api_client(_config: &LoopConfig) -> Result<Arc<dyn ApiClient>, InitError> {
    Err(InitError::MissingApiClient)
}

fn global_registry() -> &'static TracerRegistry {
    static GLOBAL_REGISTRY: OnceLock<TracerRegistry> = OnceLock::new();
    GLOBAL_REGISTRY.get_or_init(TracerRegistry::new)
}

/// Initializes the process-wide registry. See [`TracerRegistry::initialize`].
pub fn initialize(config: LoopConfig) -> Result<(), InitError> {
    global_registry().initialize(config)
}

/// Initializes the process-wide registry from the environment. See
/// [`TracerRegistry::initialize_from_env`].
pub fn initialize_from_env() -> Result<(), InitError> {
    global_registry().initialize_from_env()
}

/// A tracer of the process-wide registry.
pub fn tracer() -> Tracer {
    global_registry().tracer()
}

/// The propagator of the process-wide registry.
pub fn propagator() -> &'static LoopPropagator {
    global_registry().propagator()
}

/// Flushes the process-wide registry.
pub async fn force_flush() -> LoopSdkResult {
    global_registry().force_flush().await
}

/// Shuts the process-wide registry down.
pub async fn shutdown() -> LoopSdkResult {
    global_registry().shutdown().await
}

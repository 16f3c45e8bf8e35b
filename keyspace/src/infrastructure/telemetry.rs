use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use opentelemetry::trace::TracerProvider;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{propagation::TraceContextPropagator, trace::Sampler, Resource};
use opentelemetry_semantic_conventions::resource;
use std::net::SocketAddr;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

use super::config::TelemetrySettings;

/// Builder for setting up telemetry (Logging, Tracing, Metrics).
pub struct TelemetryBuilder {
    service_name: String,
    service_version: String,
    otlp_endpoint: Option<String>,
    metrics_addr: Option<String>,
    log_level: String,
    json: bool,
    sampling_ratio: f64,
}

impl TelemetryBuilder {
    /// Starts a builder that only installs a JSON log layer at `info`.
    pub fn new(service_name: impl Into<String>, service_version: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            service_version: service_version.into(),
            otlp_endpoint: None,
            metrics_addr: None,
            log_level: "info".to_string(),
            json: true,
            sampling_ratio: 1.0,
        }
    }

    /// Builder preloaded from configuration.
    #[must_use]
    pub fn from_settings(settings: &TelemetrySettings) -> Self {
        let mut builder = Self::new(settings.service_name.clone(), env!("CARGO_PKG_VERSION"))
            .with_log_level(settings.log_level.clone())
            .with_json(settings.json)
            .with_sampling_ratio(settings.sampling_ratio);
        if let Some(endpoint) = &settings.otlp_endpoint {
            builder = builder.with_tracing(endpoint.clone());
        }
        if let Some(addr) = &settings.metrics_addr {
            builder = builder.with_metrics(addr.clone());
        }
        builder
    }

    /// Exports spans to an OTLP collector.
    #[must_use]
    pub fn with_tracing(mut self, endpoint: impl Into<String>) -> Self {
        self.otlp_endpoint = Some(endpoint.into());
        self
    }

    /// Serves Prometheus metrics on `addr`.
    #[must_use]
    pub fn with_metrics(mut self, addr: impl Into<String>) -> Self {
        self.metrics_addr = Some(addr.into());
        self
    }

    /// Default filter when `RUST_LOG` is unset.
    #[must_use]
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Chooses between JSON and human-readable log lines.
    #[must_use]
    pub fn with_json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }

    /// Trace sampling ratio, between 0.0 and 1.0.
    #[must_use]
    pub fn with_sampling_ratio(mut self, ratio: f64) -> Self {
        self.sampling_ratio = ratio;
        self
    }

    /// Initializes the telemetry system with configured exporters.
    ///
    /// The Prometheus listener needs a running Tokio runtime when enabled.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The metrics address is invalid or the recorder cannot be installed
    /// - The OTLP span exporter cannot be built
    /// - The tracing subscriber cannot be initialized
    pub fn init(self) -> Result<()> {
        if let Some(addr) = &self.metrics_addr {
            let addr: SocketAddr = addr
                .parse()
                .with_context(|| format!("Invalid metrics address '{addr}'"))?;
            PrometheusBuilder::new()
                .with_http_listener(addr)
                .install()
                .context("Failed to install Prometheus recorder")?;
        }

        opentelemetry::global::set_text_map_propagator(TraceContextPropagator::new());

        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.log_level));

        let fmt_layer = if self.json {
            fmt::layer().json().with_span_events(FmtSpan::CLOSE).boxed()
        } else {
            fmt::layer().with_span_events(FmtSpan::CLOSE).boxed()
        };

        let registry = Registry::default().with(env_filter).with(fmt_layer);

        let Some(endpoint) = self.otlp_endpoint else {
            return registry.try_init().context("Failed to init subscriber");
        };

        let resource = Resource::builder()
            .with_attributes(vec![
                opentelemetry::KeyValue::new(resource::SERVICE_NAME, self.service_name.clone()),
                opentelemetry::KeyValue::new(resource::SERVICE_VERSION, self.service_version),
            ])
            .build();

        let exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint)
            .build()
            .context("Failed to build OTLP span exporter")?;

        let processor = opentelemetry_sdk::trace::BatchSpanProcessor::builder(exporter).build();

        let provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
            .with_span_processor(processor)
            .with_resource(resource)
            .with_sampler(Sampler::ParentBased(Box::new(Sampler::TraceIdRatioBased(
                self.sampling_ratio,
            ))))
            .build();

        opentelemetry::global::set_tracer_provider(provider.clone());

        let tracer = provider.tracer(self.service_name);
        let telemetry_layer = tracing_opentelemetry::layer().with_tracer(tracer);

        registry
            .with(telemetry_layer)
            .try_init()
            .context("Failed to init subscriber")
    }
}

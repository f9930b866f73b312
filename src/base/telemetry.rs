//! Tracing, log, and metric export setup.
//!
//! Installs the global `tracing` subscriber (stdout fmt layer, OpenTelemetry span layer,
//! and an OpenTelemetry log bridge), and the global meter provider used by
//! [`crate::base::metrics::Metrics`]. All three OTLP signals go over HTTP/protobuf to
//! `{OTEL_EXPORTER_OTLP_ENDPOINT}/v1/{traces,metrics,logs}`.

use std::{
    collections::{BTreeMap, HashMap},
    time::Duration,
};

use opentelemetry::{KeyValue, global, trace::TracerProvider};
use opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge;
use opentelemetry_otlp::{LogExporter, MetricExporter, Protocol, SpanExporter, WithExportConfig, WithHttpConfig};
use opentelemetry_sdk::{Resource, logs::SdkLoggerProvider, metrics::PeriodicReader, metrics::SdkMeterProvider, trace::SdkTracerProvider};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, Layer, fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt};

use crate::base::{
    config::{Config, LogFormat},
    types::{Res, Void},
};

/// Header naming the backend package a signal is routed to.
const TARGET_PACKAGE_HEADER: &str = "x-observe-target-package";

/// Crates whose own logs must never reach the OTLP log exporter (they would feed back into it).
const EXPORTER_CRATES: [&str; 5] = ["hyper", "hyper_util", "reqwest", "h2", "opentelemetry"];

/// Handles to the installed providers, flushed and shut down on exit.
#[derive(Default)]
pub struct TelemetryGuard {
    tracer_provider: Option<SdkTracerProvider>,
    meter_provider: Option<SdkMeterProvider>,
    logger_provider: Option<SdkLoggerProvider>,
}

impl TelemetryGuard {
    /// Flush and shut down every provider.
    ///
    /// Blocks until the exporters are drained, so call it off the async executor.
    pub fn shutdown(self) -> Void {
        let mut errors = Vec::new();

        if let Some(provider) = self.tracer_provider
            && let Err(e) = provider.shutdown()
        {
            errors.push(format!("tracer: {e}"));
        }

        if let Some(provider) = self.meter_provider
            && let Err(e) = provider.shutdown()
        {
            errors.push(format!("meter: {e}"));
        }

        if let Some(provider) = self.logger_provider
            && let Err(e) = provider.shutdown()
        {
            errors.push(format!("logger: {e}"));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(anyhow::anyhow!("Failed to shut down telemetry: {}", errors.join("; ")))
        }
    }
}

/// Install the global subscriber and meter provider.
///
/// `verbose` raises the log filter the same way `-v`/`-vv` do on the command line.
pub fn init(config: &Config, verbose: u8) -> Res<TelemetryGuard> {
    // Construct the level filter.

    let level_filter = match verbose {
        0 => EnvFilter::try_new(&config.log_level)?,
        1 => EnvFilter::try_new("debug")?,
        _ => EnvFilter::try_new("trace")?,
    };

    // Prepare the log layer.

    let stdout = match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt::layer().json().with_current_span(true).with_span_list(false).with_target(true).boxed(),
        LogFormat::Pretty => tracing_subscriber::fmt::layer()
            .with_ansi(true)
            .with_level(true)
            .with_file(false)
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
            .boxed(),
    };

    // Prepare the otlp providers.

    let mut guard = TelemetryGuard::default();
    let mut exporter_headers = Vec::new();

    if !config.otel_sdk_disabled {
        let resource = resource(config);
        let endpoint = config.otel_exporter_otlp_endpoint.trim_end_matches('/');

        let headers = otlp_headers(config, "Tracing")?;
        let span_exporter = SpanExporter::builder()
            .with_http()
            .with_protocol(Protocol::HttpBinary)
            .with_endpoint(format!("{endpoint}/v1/traces"))
            .with_headers(headers.clone())
            .build()?;
        guard.tracer_provider = Some(SdkTracerProvider::builder().with_batch_exporter(span_exporter).with_resource(resource.clone()).build());
        exporter_headers.push((format!("{endpoint}/v1/traces"), masked(&headers)));

        let headers = otlp_headers(config, "Metrics")?;
        let metric_exporter = MetricExporter::builder()
            .with_http()
            .with_protocol(Protocol::HttpBinary)
            .with_endpoint(format!("{endpoint}/v1/metrics"))
            .with_headers(headers.clone())
            .build()?;
        let reader = PeriodicReader::builder(metric_exporter)
            .with_interval(Duration::from_secs(config.otel_metric_export_interval_secs.max(1)))
            .build();
        guard.meter_provider = Some(SdkMeterProvider::builder().with_reader(reader).with_resource(resource.clone()).build());
        exporter_headers.push((format!("{endpoint}/v1/metrics"), masked(&headers)));

        let headers = otlp_headers(config, "Host Explorer")?;
        let log_exporter = LogExporter::builder()
            .with_http()
            .with_protocol(Protocol::HttpBinary)
            .with_endpoint(format!("{endpoint}/v1/logs"))
            .with_headers(headers.clone())
            .build()?;
        guard.logger_provider = Some(SdkLoggerProvider::builder().with_batch_exporter(log_exporter).with_resource(resource).build());
        exporter_headers.push((format!("{endpoint}/v1/logs"), masked(&headers)));
    }

    let otel = guard
        .tracer_provider
        .as_ref()
        .map(|provider| tracing_opentelemetry::layer().with_tracer(provider.tracer("aisdr-bot")));

    let logs = match guard.logger_provider.as_ref() {
        Some(provider) => Some(OpenTelemetryTracingBridge::new(provider).with_filter(bridge_filter(&config.log_level)?)),
        None => None,
    };

    if let Some(provider) = &guard.tracer_provider {
        global::set_tracer_provider(provider.clone());
    }

    if let Some(provider) = &guard.meter_provider {
        global::set_meter_provider(provider.clone());
    }

    tracing_subscriber::registry().with(level_filter).with(stdout).with(otel).with(logs).try_init()?;

    if exporter_headers.is_empty() {
        warn!("OTLP export is disabled; only stdout logs and the /metrics endpoint are available.");
    }

    for (url, headers) in exporter_headers {
        info!(url = %url, headers = ?headers, "OTLP exporter configured");
    }

    Ok(guard)
}

/// Resource attributes attached to every signal.
fn resource(config: &Config) -> Resource {
    Resource::builder()
        .with_service_name(config.otel_service_name.clone())
        .with_attributes([
            KeyValue::new("service.version", config.otel_service_version.clone()),
            KeyValue::new("deployment.environment", config.otel_environment.clone()),
            KeyValue::new("service.instance.id", config.hostname.clone()),
            KeyValue::new("service.team", "observability"),
            KeyValue::new("service.component", "slack-bot"),
        ])
        .build()
}

/// The log bridge filter: the configured level, minus the exporter's own transport crates.
fn bridge_filter(log_level: &str) -> Res<EnvFilter> {
    let mut filter = EnvFilter::try_new(log_level)?;

    for name in EXPORTER_CRATES {
        filter = filter.add_directive(format!("{name}=off").parse()?);
    }

    Ok(filter)
}

/// Resolve the OTLP headers for one signal.
///
/// In order of precedence (later wins):
/// - `OTEL_EXPORTER_OTLP_HEADERS`, a JSON object of header names to values,
/// - `OTEL_EXPORTER_OTLP_AUTH_HEADER`, a single `key=value` pair (the key is title-cased),
/// - `OBSERVE_INGEST_TOKEN`, which replaces any `Authorization` header with a bearer token.
///
/// The `x-observe-target-package` header is always set to `package`.
pub fn otlp_headers(config: &Config, package: &str) -> Res<HashMap<String, String>> {
    let mut headers = HashMap::new();

    if let Some(json) = config.otel_exporter_otlp_headers.as_deref().filter(|s| !s.trim().is_empty()) {
        let parsed: HashMap<String, String> =
            serde_json::from_str(json).map_err(|e| anyhow::anyhow!("Invalid OTEL_EXPORTER_OTLP_HEADERS (expected a JSON object of strings): {e}"))?;
        headers.extend(parsed);
    }

    if let Some(auth) = config.otel_exporter_otlp_auth_header.as_deref().filter(|s| !s.trim().is_empty()) {
        let (key, value) = auth
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("Invalid OTEL_EXPORTER_OTLP_AUTH_HEADER format, expected `key=value`."))?;
        headers.insert(title_case(key.trim()), value.trim().to_string());
    }

    if let Some(token) = config.observe_ingest_token.as_deref().filter(|s| !s.trim().is_empty()) {
        headers.retain(|k, _| !k.eq_ignore_ascii_case("authorization"));
        headers.insert("Authorization".to_string(), format!("Bearer {}", token.trim()));
    }

    headers.insert(TARGET_PACKAGE_HEADER.to_string(), package.to_string());

    Ok(headers)
}

/// A copy of `headers` that is safe to log.
pub fn masked(headers: &HashMap<String, String>) -> BTreeMap<String, String> {
    headers
        .iter()
        .map(|(k, v)| {
            let v = if k.eq_ignore_ascii_case("authorization") { "<masked>".to_string() } else { v.clone() };
            (k.clone(), v)
        })
        .collect()
}

/// Capitalize the first letter of every alphabetic run (`x-api-key` -> `X-Api-Key`).
fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_alpha = false;

    for c in s.chars() {
        if c.is_alphabetic() {
            if prev_alpha {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            prev_alpha = true;
        } else {
            out.push(c);
            prev_alpha = false;
        }
    }

    out
}

// Tests.

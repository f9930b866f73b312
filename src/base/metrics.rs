//! Business metrics for the bot.
//!
//! Every measurement is recorded twice: into OpenTelemetry instruments taken from the
//! global meter (pushed over OTLP when an exporter is installed), and into a local
//! Prometheus registry that backs the `/metrics` scrape endpoint.

use std::{sync::Arc, time::Duration};

use opentelemetry::{
    KeyValue, global,
    metrics::{Counter, Histogram},
};
use prometheus::{HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

use crate::base::types::Res;

/// Name of the OpenTelemetry meter.
const METER_NAME: &str = "aisdr-bot";

/// Buckets for completion calls and background tasks, in seconds.
const DURATION_BUCKETS: [f64; 10] = [0.25, 0.5, 1.0, 2.0, 4.0, 8.0, 15.0, 30.0, 60.0, 120.0];

/// Kinds of processing errors, used as the `error_type` label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The inbound webhook could not be parsed.
    InvalidPayload,
    /// The completion API call failed or returned nothing usable.
    CompletionFailed,
    /// Posting the generated email failed.
    MessageFailed,
    /// Posting the failure notice failed as well.
    FallbackFailed,
    /// The inbound request signature did not verify.
    Unauthorized,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidPayload => "invalid_payload",
            ErrorKind::CompletionFailed => "completion_failed",
            ErrorKind::MessageFailed => "message_failed",
            ErrorKind::FallbackFailed => "fallback_failed",
            ErrorKind::Unauthorized => "unauthorized",
        }
    }
}

/// Metrics handle for the application.
///
/// This is trivially cloneable and can be passed around without the need for `Arc` or `Mutex`.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    registry: Registry,
    prom: PromInstruments,
    otel: OtelInstruments,
}

struct PromInstruments {
    slack_events: IntCounter,
    slash_commands: IntCounter,
    openai_requests: IntCounterVec,
    openai_request_duration: prometheus::Histogram,
    slack_messages: IntCounter,
    emails_generated: IntCounter,
    processing_errors: IntCounterVec,
    background_tasks: IntCounter,
    background_task_duration: prometheus::Histogram,
}

struct OtelInstruments {
    slack_events: Counter<u64>,
    slash_commands: Counter<u64>,
    openai_requests: Counter<u64>,
    openai_request_duration: Histogram<f64>,
    slack_messages: Counter<u64>,
    emails_generated: Counter<u64>,
    processing_errors: Counter<u64>,
    background_tasks: Counter<u64>,
    background_task_duration: Histogram<f64>,
}

impl Metrics {
    /// Create the instruments and register them.
    pub fn new() -> Res<Self> {
        let registry = Registry::new();

        let prom = PromInstruments {
            slack_events: register(&registry, IntCounter::with_opts(Opts::new("aisdr_slack_events_total", "Total number of Slack events processed"))?)?,
            slash_commands: register(&registry, IntCounter::with_opts(Opts::new("aisdr_slash_commands_total", "Total number of slash commands processed"))?)?,
            openai_requests: register(
                &registry,
                IntCounterVec::new(Opts::new("aisdr_openai_requests_total", "Total number of OpenAI API requests"), &["status"])?,
            )?,
            openai_request_duration: register(
                &registry,
                prometheus::Histogram::with_opts(HistogramOpts::new("aisdr_openai_request_duration_seconds", "Duration of OpenAI API requests").buckets(DURATION_BUCKETS.to_vec()))?,
            )?,
            slack_messages: register(&registry, IntCounter::with_opts(Opts::new("aisdr_slack_messages_sent_total", "Total number of messages sent to Slack"))?)?,
            emails_generated: register(&registry, IntCounter::with_opts(Opts::new("aisdr_emails_generated_total", "Total number of emails successfully generated"))?)?,
            processing_errors: register(
                &registry,
                IntCounterVec::new(Opts::new("aisdr_processing_errors_total", "Total number of processing errors"), &["error_type"])?,
            )?,
            background_tasks: register(&registry, IntCounter::with_opts(Opts::new("aisdr_background_tasks_total", "Total number of background tasks started"))?)?,
            background_task_duration: register(
                &registry,
                prometheus::Histogram::with_opts(
                    HistogramOpts::new("aisdr_background_task_duration_seconds", "Duration of background task processing").buckets(DURATION_BUCKETS.to_vec()),
                )?,
            )?,
        };

        let meter = global::meter(METER_NAME);

        let otel = OtelInstruments {
            slack_events: meter.u64_counter("aisdr_slack_events_total").with_description("Total number of Slack events processed").with_unit("1").build(),
            slash_commands: meter.u64_counter("aisdr_slash_commands_total").with_description("Total number of slash commands processed").with_unit("1").build(),
            openai_requests: meter.u64_counter("aisdr_openai_requests_total").with_description("Total number of OpenAI API requests").with_unit("1").build(),
            openai_request_duration: meter
                .f64_histogram("aisdr_openai_request_duration_seconds")
                .with_description("Duration of OpenAI API requests")
                .with_unit("s")
                .with_boundaries(DURATION_BUCKETS.to_vec())
                .build(),
            slack_messages: meter.u64_counter("aisdr_slack_messages_sent_total").with_description("Total number of messages sent to Slack").with_unit("1").build(),
            emails_generated: meter.u64_counter("aisdr_emails_generated_total").with_description("Total number of emails successfully generated").with_unit("1").build(),
            processing_errors: meter.u64_counter("aisdr_processing_errors_total").with_description("Total number of processing errors").with_unit("1").build(),
            background_tasks: meter.u64_counter("aisdr_background_tasks_total").with_description("Total number of background tasks started").with_unit("1").build(),
            background_task_duration: meter
                .f64_histogram("aisdr_background_task_duration_seconds")
                .with_description("Duration of background task processing")
                .with_unit("s")
                .with_boundaries(DURATION_BUCKETS.to_vec())
                .build(),
        };

        Ok(Self {
            inner: Arc::new(MetricsInner { registry, prom, otel }),
        })
    }

    pub fn record_slack_event(&self) {
        self.inner.prom.slack_events.inc();
        self.inner.otel.slack_events.add(1, &[]);
    }

    pub fn record_slash_command(&self) {
        self.inner.prom.slash_commands.inc();
        self.inner.otel.slash_commands.add(1, &[]);
    }

    /// Record one completion API call and how long it took.
    pub fn record_openai_request(&self, elapsed: Duration, success: bool) {
        let status = if success { "success" } else { "error" };

        self.inner.prom.openai_requests.with_label_values(&[status]).inc();
        self.inner.prom.openai_request_duration.observe(elapsed.as_secs_f64());

        self.inner.otel.openai_requests.add(1, &[KeyValue::new("status", status)]);
        self.inner.otel.openai_request_duration.record(elapsed.as_secs_f64(), &[KeyValue::new("status", status)]);
    }

    pub fn record_slack_message_sent(&self) {
        self.inner.prom.slack_messages.inc();
        self.inner.otel.slack_messages.add(1, &[]);
    }

    pub fn record_email_generated(&self) {
        self.inner.prom.emails_generated.inc();
        self.inner.otel.emails_generated.add(1, &[]);
    }

    pub fn record_error(&self, kind: ErrorKind) {
        self.inner.prom.processing_errors.with_label_values(&[kind.as_str()]).inc();
        self.inner.otel.processing_errors.add(1, &[KeyValue::new("error_type", kind.as_str())]);
    }

    pub fn record_background_task_started(&self) {
        self.inner.prom.background_tasks.inc();
        self.inner.otel.background_tasks.add(1, &[]);
    }

    pub fn record_background_task_duration(&self, elapsed: Duration) {
        self.inner.prom.background_task_duration.observe(elapsed.as_secs_f64());
        self.inner.otel.background_task_duration.record(elapsed.as_secs_f64(), &[]);
    }

    /// Render the Prometheus text exposition of all metrics.
    pub fn render(&self) -> Res<String> {
        Ok(TextEncoder::new().encode_to_string(&self.inner.registry.gather())?)
    }
}

fn register<C>(registry: &Registry, collector: C) -> Res<C>
where
    C: prometheus::core::Collector + Clone + 'static,
{
    registry.register(Box::new(collector.clone()))?;
    Ok(collector)
}

// Tests.

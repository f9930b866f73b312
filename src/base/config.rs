//! Load configuration via `config` crate with env-override support.

use std::{
    ops::Deref,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Context;
use serde::Deserialize;

use crate::base::prompts;

use super::types::Res;

/// Default OpenAI model to use
fn default_openai_model() -> String {
    "gpt-4o".to_string()
}

/// Default sampling temperature for the OpenAI model
fn default_openai_temperature() -> f32 {
    0.7
}

/// Default max output tokens for the OpenAI model
fn default_openai_max_tokens() -> u32 {
    1024
}

/// Default timeout for a single completion call, in seconds
fn default_openai_timeout_secs() -> u64 {
    60
}

/// Default system prompt template.
fn default_prompt_template() -> String {
    prompts::SYSTEM_PROMPT_TEMPLATE.to_string()
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_event_dedup_capacity() -> usize {
    1024
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_otel_service_name() -> String {
    "aisdr-bot".to_string()
}

fn default_otel_service_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_otel_environment() -> String {
    "production".to_string()
}

fn default_hostname() -> String {
    "unknown".to_string()
}

fn default_otel_exporter_otlp_endpoint() -> String {
    "https://api.observe.inc/v2/otel".to_string()
}

fn default_otel_metric_export_interval_secs() -> u64 {
    5
}

/// Output format of the stdout log layer.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per line.
    #[default]
    Json,
    /// Human readable, with colors.
    Pretty,
}

/// Configuration for the aisdr-bot application.
#[derive(Debug, Clone)]
pub struct Config {
    pub inner: Arc<ConfigInner>,
}

impl Deref for Config {
    type Target = ConfigInner;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl From<ConfigInner> for Config {
    fn from(inner: ConfigInner) -> Self {
        Self { inner: Arc::new(inner) }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ConfigInner {
    /// OpenAI API key (`OPENAI_API_KEY`).
    pub openai_api_key: String,
    /// OpenAI model to use (`OPENAI_MODEL`).
    #[serde(default = "default_openai_model")]
    pub openai_model: String,
    /// Sampling temperature to use for the OpenAI model (`OPENAI_TEMPERATURE`).
    /// Value between 0 and 2. Higher values like 0.8 make output more random,
    /// while lower values like 0.2 make it more focused and deterministic.
    #[serde(default = "default_openai_temperature")]
    pub openai_temperature: f32,
    /// Max output tokens for OpenAI model (`OPENAI_MAX_TOKENS`).
    #[serde(default = "default_openai_max_tokens")]
    pub openai_max_tokens: u32,
    /// Timeout for one completion call, in seconds (`OPENAI_TIMEOUT_SECS`).
    #[serde(default = "default_openai_timeout_secs")]
    pub openai_timeout_secs: u64,
    /// Optional override of the OpenAI API base URL (`OPENAI_API_BASE`).
    #[serde(default)]
    pub openai_api_base: Option<String>,
    /// System prompt template (`PROMPT_TEMPLATE`).
    /// Must contain `{name}`, `{position}`, and `{competitor_tool}`.
    #[serde(default = "default_prompt_template")]
    pub prompt_template: String,
    /// Optional file to read the system prompt template from (`PROMPT_TEMPLATE_PATH`).
    /// Takes precedence over `prompt_template`.
    #[serde(default)]
    pub prompt_template_path: Option<PathBuf>,
    /// Slack bot token (`SLACK_BOT_TOKEN`).
    pub slack_bot_token: String,
    /// Slack signing secret (`SLACK_SIGNING_SECRET`).
    /// When unset, inbound request signatures are not verified.
    #[serde(default)]
    pub slack_signing_secret: Option<String>,
    /// Address to bind the HTTP server to (`BIND_ADDRESS`).
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Port to bind the HTTP server to (`PORT`).
    #[serde(default = "default_port")]
    pub port: u16,
    /// How many recent Slack event ids to remember for duplicate suppression (`EVENT_DEDUP_CAPACITY`).
    #[serde(default = "default_event_dedup_capacity")]
    pub event_dedup_capacity: usize,
    /// Base log filter, e.g. `info` or `aisdr_bot=debug` (`LOG_LEVEL`).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Stdout log format (`LOG_FORMAT`).
    #[serde(default)]
    pub log_format: LogFormat,
    /// Disable all OTLP exporters (`OTEL_SDK_DISABLED`).
    #[serde(default)]
    pub otel_sdk_disabled: bool,
    /// Service name reported to the telemetry backend (`OTEL_SERVICE_NAME`).
    #[serde(default = "default_otel_service_name")]
    pub otel_service_name: String,
    /// Service version reported to the telemetry backend (`OTEL_SERVICE_VERSION`).
    #[serde(default = "default_otel_service_version")]
    pub otel_service_version: String,
    /// Deployment environment (`OTEL_ENVIRONMENT`).
    #[serde(default = "default_otel_environment")]
    pub otel_environment: String,
    /// Instance id reported to the telemetry backend (`HOSTNAME`).
    #[serde(default = "default_hostname")]
    pub hostname: String,
    /// Base OTLP/HTTP endpoint; `/v1/{traces,metrics,logs}` is appended (`OTEL_EXPORTER_OTLP_ENDPOINT`).
    #[serde(default = "default_otel_exporter_otlp_endpoint")]
    pub otel_exporter_otlp_endpoint: String,
    /// Extra OTLP headers, as a JSON object (`OTEL_EXPORTER_OTLP_HEADERS`).
    #[serde(default)]
    pub otel_exporter_otlp_headers: Option<String>,
    /// A single OTLP auth header as `key=value` (`OTEL_EXPORTER_OTLP_AUTH_HEADER`).
    #[serde(default)]
    pub otel_exporter_otlp_auth_header: Option<String>,
    /// Ingest token; overrides any `Authorization` header (`OBSERVE_INGEST_TOKEN`).
    #[serde(default)]
    pub observe_ingest_token: Option<String>,
    /// Interval between OTLP metric pushes, in seconds (`OTEL_METRIC_EXPORT_INTERVAL_SECS`).
    #[serde(default = "default_otel_metric_export_interval_secs")]
    pub otel_metric_export_interval_secs: u64,
}

impl Default for ConfigInner {
    fn default() -> Self {
        Self {
            openai_api_key: String::new(),
            openai_model: default_openai_model(),
            openai_temperature: default_openai_temperature(),
            openai_max_tokens: default_openai_max_tokens(),
            openai_timeout_secs: default_openai_timeout_secs(),
            openai_api_base: None,
            prompt_template: default_prompt_template(),
            prompt_template_path: None,
            slack_bot_token: String::new(),
            slack_signing_secret: None,
            bind_address: default_bind_address(),
            port: default_port(),
            event_dedup_capacity: default_event_dedup_capacity(),
            log_level: default_log_level(),
            log_format: LogFormat::default(),
            otel_sdk_disabled: false,
            otel_service_name: default_otel_service_name(),
            otel_service_version: default_otel_service_version(),
            otel_environment: default_otel_environment(),
            hostname: default_hostname(),
            otel_exporter_otlp_endpoint: default_otel_exporter_otlp_endpoint(),
            otel_exporter_otlp_headers: None,
            otel_exporter_otlp_auth_header: None,
            observe_ingest_token: None,
            otel_metric_export_interval_secs: default_otel_metric_export_interval_secs(),
        }
    }
}

impl Config {
    pub fn load(explicit_path: Option<&Path>) -> Res<Self> {
        let mut cfg = config::Config::builder().add_source(config::Environment::default());

        if let Some(p) = explicit_path {
            cfg = cfg.add_source(config::File::from(p.to_path_buf()));
        } else if Path::new(".hidden/config.toml").exists() {
            cfg = cfg.add_source(config::File::with_name(".hidden/config.toml"));
        }

        let inner: ConfigInner = cfg.build()?.try_deserialize()?;

        Ok(Self::from(inner.validated()?))
    }
}

impl ConfigInner {
    /// Resolve file-backed settings and check ranges.
    pub fn validated(mut self) -> Res<Self> {
        if self.openai_api_key.trim().is_empty() {
            return Err(anyhow::anyhow!("OPENAI_API_KEY must be set."));
        }

        if self.slack_bot_token.trim().is_empty() {
            return Err(anyhow::anyhow!("SLACK_BOT_TOKEN must be set."));
        }

        if self.openai_temperature < 0.0 || self.openai_temperature > 2.0 {
            return Err(anyhow::anyhow!("OpenAI temperature must be between 0 and 2."));
        }

        if self.openai_max_tokens < 1 || self.openai_max_tokens > 128000 {
            return Err(anyhow::anyhow!("OpenAI max tokens must be between 1 and 128000."));
        }

        if self.openai_timeout_secs == 0 {
            return Err(anyhow::anyhow!("OpenAI timeout must be at least one second."));
        }

        if self.event_dedup_capacity == 0 {
            return Err(anyhow::anyhow!("Event dedup capacity must be at least 1."));
        }

        if let Some(path) = &self.prompt_template_path {
            self.prompt_template = std::fs::read_to_string(path).with_context(|| format!("Failed to read prompt template from `{}`.", path.display()))?;
        }

        let missing = prompts::missing_placeholders(&self.prompt_template);
        if !missing.is_empty() {
            return Err(anyhow::anyhow!("Prompt template is missing placeholders: {}.", missing.join(", ")));
        }

        Ok(self)
    }
}

// Tests.

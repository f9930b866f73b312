//! HTTP surface of the bot.
//!
//! Slack delivers events (`POST /slack/events`, JSON) and slash commands
//! (`POST /slack/slash`, form-encoded). Both are acknowledged right away; the
//! generation work runs in the background so Slack never waits on the LLM.

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};
use slack_morphism::{SlackMessageContent, SlackMessageResponseType, events::SlackCommandEventResponse, signature_verifier::SlackEventSignatureVerifier};
use tracing::{debug, error, info, instrument, warn};

use crate::{
    base::{metrics::ErrorKind, types::ReplyTarget},
    interaction::{generate, prospect},
    runtime::Runtime,
};

// Payloads.

/// Events API envelope.
///
/// Only the fields the bot acts on; everything is optional so that unexpected
/// shapes are acknowledged rather than rejected.
#[derive(Debug, Deserialize)]
struct EventEnvelope {
    challenge: Option<Value>,
    event_id: Option<String>,
    event: Option<EventBody>,
}

#[derive(Debug, Deserialize)]
struct EventBody {
    #[serde(rename = "type")]
    kind: Option<String>,
    text: Option<String>,
    channel: Option<String>,
    channel_type: Option<String>,
    user: Option<String>,
    bot_id: Option<String>,
    subtype: Option<String>,
}

/// Slash command form fields.
#[derive(Debug, Default)]
struct SlashCommandForm {
    command: String,
    text: String,
    channel_id: String,
    user_id: String,
    response_url: String,
}

impl SlashCommandForm {
    fn parse(body: &[u8]) -> Self {
        let mut form = Self::default();

        for (key, value) in form_urlencoded::parse(body) {
            let slot = match key.as_ref() {
                "command" => &mut form.command,
                "text" => &mut form.text,
                "channel_id" => &mut form.channel_id,
                "user_id" => &mut form.user_id,
                "response_url" => &mut form.response_url,
                _ => continue,
            };
            *slot = value.trim().to_string();
        }

        form
    }

    /// Prefer the response URL; fall back to posting in the channel.
    fn reply_target(&self) -> Option<ReplyTarget> {
        if !self.response_url.is_empty() {
            Some(ReplyTarget::ResponseUrl(self.response_url.clone()))
        } else if !self.channel_id.is_empty() {
            Some(ReplyTarget::Channel(self.channel_id.clone()))
        } else {
            None
        }
    }
}

// Router.

/// Build the HTTP router over a runtime.
pub fn router(runtime: Runtime) -> Router {
    Router::new()
        .route("/slack/events", post(handle_event))
        .route("/slack/slash", post(handle_slash_command))
        .route("/metrics", get(metrics))
        .route("/health", get(health))
        .with_state(runtime)
}

// Handlers.

#[instrument(name = "slack.event", skip_all)]
async fn handle_event(State(runtime): State<Runtime>, headers: HeaderMap, body: Bytes) -> Response {
    if let Err(response) = authorize(&runtime, &headers, &body) {
        return response;
    }

    runtime.metrics.record_slack_event();

    let envelope: EventEnvelope = match serde_json::from_slice(&body) {
        Ok(envelope) => envelope,
        Err(err) => {
            warn!("Ignoring malformed event payload: {}", err);
            runtime.metrics.record_error(ErrorKind::InvalidPayload);
            return StatusCode::OK.into_response();
        }
    };

    // URL verification.
    if let Some(challenge) = envelope.challenge {
        info!("Answering URL verification challenge");
        return Json(json!({ "challenge": challenge })).into_response();
    }

    if let Some(event_id) = &envelope.event_id
        && !runtime.recent_events.insert(event_id)
    {
        debug!(event_id = %event_id, "Ignoring redelivered event");
        return StatusCode::OK.into_response();
    }

    if let Some(event) = envelope.event {
        dispatch_event(&runtime, event);
    }

    StatusCode::OK.into_response()
}

fn dispatch_event(runtime: &Runtime, event: EventBody) {
    // Channel mentions also arrive as `app_mention`, so plain messages only count in DMs.
    let addressed = match event.kind.as_deref() {
        Some("app_mention") => true,
        Some("message") => event.channel_type.as_deref() == Some("im"),
        _ => false,
    };

    if !addressed {
        debug!(kind = ?event.kind, channel_type = ?event.channel_type, "Ignoring event not addressed to the bot");
        return;
    }

    // Our own posts, edits, joins, and the like.
    if event.bot_id.is_some() || event.subtype.is_some() {
        debug!(bot_id = ?event.bot_id, subtype = ?event.subtype, "Ignoring bot or subtyped message");
        return;
    }

    let Some(channel) = event.channel.filter(|c| !c.is_empty()) else {
        warn!(user = ?event.user, "Ignoring event without a channel");
        return;
    };

    let text = prospect::strip_mentions(event.text.as_deref().unwrap_or_default());
    let target = ReplyTarget::Channel(channel);

    match prospect::parse(text) {
        Ok(descriptor) => {
            info!(user = ?event.user, target = %target, "Scheduling email generation for event");
            generate::generate_and_reply(runtime, descriptor, target);
        }
        Err(err) => {
            info!(user = ?event.user, "Event text is not a prospect: {}", err);
            runtime.metrics.record_error(ErrorKind::InvalidPayload);
            generate::post_notice(runtime, target, prospect::USAGE);
        }
    }
}

#[instrument(name = "slack.slash_command", skip_all)]
async fn handle_slash_command(State(runtime): State<Runtime>, headers: HeaderMap, body: Bytes) -> Response {
    if let Err(response) = authorize(&runtime, &headers, &body) {
        return response;
    }

    runtime.metrics.record_slash_command();

    let form = SlashCommandForm::parse(&body);
    let command = if form.command.is_empty() { "/aisdr" } else { form.command.as_str() };

    let Some(target) = form.reply_target() else {
        warn!(user = %form.user_id, "Slash command has neither a response URL nor a channel");
        runtime.metrics.record_error(ErrorKind::InvalidPayload);
        return in_channel("Sorry, I couldn't tell where to reply to this command.".to_string());
    };

    match prospect::parse(&form.text) {
        Ok(descriptor) => {
            info!(user = %form.user_id, target = %target, "Scheduling email generation for slash command");
            generate::generate_and_reply(&runtime, descriptor, target);
            in_channel(format!("Received: `{} {}`\n\nProcessing your request, please wait...", command, form.text))
        }
        Err(err) => {
            info!(user = %form.user_id, "Slash command text is not a prospect: {}", err);
            runtime.metrics.record_error(ErrorKind::InvalidPayload);
            in_channel(format!("Sorry, {err}.\n\n{}", prospect::USAGE))
        }
    }
}

async fn metrics(State(runtime): State<Runtime>) -> Response {
    match runtime.metrics.render() {
        Ok(text) => ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], text).into_response(),
        Err(err) => {
            error!("Failed to render metrics: {}", err);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn health() -> &'static str {
    "ok"
}

// Helpers.

/// Check the Slack request signature, if a signing secret is configured.
fn authorize(runtime: &Runtime, headers: &HeaderMap, body: &[u8]) -> Result<(), Response> {
    let Some(verifier) = &runtime.verifier else {
        return Ok(());
    };

    let hash = header_value(headers, SlackEventSignatureVerifier::SLACK_SIGNED_HASH_HEADER);
    let timestamp = header_value(headers, SlackEventSignatureVerifier::SLACK_SIGNED_TIMESTAMP);

    let verified = match std::str::from_utf8(body) {
        Ok(body) => verifier.verify(hash, body, timestamp).map_err(|e| e.to_string()),
        Err(_) => Err("body is not UTF-8".to_string()),
    };

    if let Err(reason) = verified {
        warn!("Rejected request with a bad signature: {}", reason);
        runtime.metrics.record_error(ErrorKind::Unauthorized);
        return Err(StatusCode::UNAUTHORIZED.into_response());
    }

    Ok(())
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers.get(name).and_then(|v| v.to_str().ok()).unwrap_or_default()
}

/// A slash command reply that the whole channel can see.
fn in_channel(text: String) -> Response {
    let response = SlackCommandEventResponse::new(SlackMessageContent::new().with_text(text)).with_response_type(SlackMessageResponseType::InChannel);

    Json(response).into_response()
}

// Tests.

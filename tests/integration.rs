#![cfg(test)]

use std::{
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use aisdr_bot::{
    base::{
        config::{Config, ConfigInner},
        metrics::Metrics,
        types::{ReplyTarget, Res, Void},
    },
    interaction::{generate::FAILURE_NOTICE, webhook},
    runtime::Runtime,
    service::{
        chat::{ChatClient, GenericChatClient},
        llm::{GenericLlmClient, LlmClient},
    },
};
use async_trait::async_trait;
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode},
};
use hmac::{Hmac, Mac};
use mockall::mock;
use serde_json::Value;
use sha2::Sha256;
use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};
use tower::ServiceExt;

type HmacSha256 = Hmac<Sha256>;

// Mocks.

mock! {
    pub Chat {}

    #[async_trait]
    impl GenericChatClient for Chat {
        async fn post_message(&self, target: &ReplyTarget, text: &str) -> Void;
    }
}

mock! {
    pub Llm {}

    #[async_trait]
    impl GenericLlmClient for Llm {
        async fn generate_email(&self, system_prompt: &str, user_prompt: &str) -> Res<String>;
    }
}

// Harness.

/// Everything the background tasks did, observed through channels.
struct Harness {
    app: Router,
    posts: UnboundedReceiver<(ReplyTarget, String)>,
    prompts: UnboundedReceiver<(String, String)>,
}

/// How the mocked LLM behaves.
#[derive(Clone, Copy)]
enum Completion {
    /// Echo the prospect name back in a subject and body.
    Echo,
    /// Fail every call.
    Fail,
}

/// How the mocked chat client answers each post, in order; posts past the end succeed.
#[derive(Clone, Copy, Debug)]
enum Delivery {
    Delivered,
    Rejected,
}

fn test_config(signing_secret: Option<&str>) -> Config {
    Config {
        inner: Arc::new(ConfigInner {
            openai_api_key: "sk-test".to_string(),
            slack_bot_token: "xoxb-test".to_string(),
            slack_signing_secret: signing_secret.map(str::to_string),
            event_dedup_capacity: 16,
            ..Default::default()
        }),
    }
}

/// Name of the prospect, as found on the first line of the user prompt.
fn prospect_name(user_prompt: &str) -> String {
    user_prompt.lines().next().unwrap_or_default().trim_start_matches("Name: ").to_string()
}

fn setup(completion: Completion, signing_secret: Option<&str>) -> Harness {
    setup_with_deliveries(completion, signing_secret, Vec::new())
}

fn setup_with_deliveries(completion: Completion, signing_secret: Option<&str>, deliveries: Vec<Delivery>) -> Harness {
    let (post_tx, posts) = unbounded_channel();
    let (prompt_tx, prompts) = unbounded_channel();

    let mut deliveries = deliveries.into_iter();
    let mut chat = MockChat::new();
    chat.expect_post_message().returning(move |target, text| {
        post_tx.send((target.clone(), text.to_string())).unwrap();

        match deliveries.next().unwrap_or(Delivery::Delivered) {
            Delivery::Delivered => Ok(()),
            Delivery::Rejected => Err(anyhow::anyhow!("channel_not_found")),
        }
    });

    let mut llm = MockLlm::new();
    llm.expect_generate_email().returning(move |system_prompt, user_prompt| {
        prompt_tx.send((system_prompt.to_string(), user_prompt.to_string())).unwrap();

        match completion {
            Completion::Echo => {
                let name = prospect_name(user_prompt);
                Ok(format!("Subject: A note for {name}\n\nHi {name},\n\nShort pitch.\n\nThe Observe Team"))
            }
            Completion::Fail => Err(anyhow::anyhow!("rate limited")),
        }
    });

    let runtime = Runtime::with_clients(
        test_config(signing_secret),
        LlmClient::new(Arc::new(llm)),
        ChatClient::new(Arc::new(chat)),
        Metrics::new().unwrap(),
    );

    Harness {
        app: webhook::router(runtime),
        posts,
        prompts,
    }
}

impl Harness {
    async fn send(&self, request: Request<Body>) -> (StatusCode, String) {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();

        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    async fn next_post(&mut self) -> (ReplyTarget, String) {
        tokio::time::timeout(Duration::from_secs(5), self.posts.recv())
            .await
            .expect("timed out waiting for a post")
            .expect("post channel closed")
    }

    /// Scrape `/metrics` until `needle` shows up; counters are bumped after the post lands.
    async fn metrics_containing(&self, needle: &str) -> String {
        for _ in 0..100 {
            let (_, metrics) = self.send(get("/metrics")).await;
            if metrics.contains(needle) {
                return metrics;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        panic!("metrics never contained `{needle}`");
    }

    async fn assert_no_more_posts(&mut self) {
        let extra = tokio::time::timeout(Duration::from_millis(200), self.posts.recv()).await;
        assert!(extra.is_err(), "unexpected extra post: {:?}", extra);
    }
}

fn slash(form: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/slack/slash")
        .header("content-type", "application/x-www-form-urlencoded")
        .body(Body::from(form.to_string()))
        .unwrap()
}

fn event(json: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/slack/events")
        .header("content-type", "application/json")
        .body(Body::from(json.to_string()))
        .unwrap()
}

/// Sign a request the way Slack does: `v0=` + hex HMAC-SHA256 of `v0:{timestamp}:{body}`.
fn signed(mut request: Request<Body>, body: &str, secret: &str) -> Request<Body> {
    let timestamp = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs().to_string();

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(format!("v0:{timestamp}:{body}").as_bytes());
    let digest = mac.finalize().into_bytes();
    let signature = format!("v0={}", digest.iter().map(|b| format!("{b:02x}")).collect::<String>());

    request.headers_mut().insert("x-slack-signature", signature.parse().unwrap());
    request.headers_mut().insert("x-slack-request-timestamp", timestamp.parse().unwrap());
    request
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().method("GET").uri(uri).body(Body::empty()).unwrap()
}

const JANE_SLASH: &str = "command=%2Faisdr&text=Jane%2C+VP+Sales%2C+Datadog&channel_id=C1&user_id=U1&response_url=https%3A%2F%2Fhooks.example%2Fjane";

// Tests.

#[tokio::test]
async fn url_verification_echoes_challenge() {
    let harness = setup(Completion::Echo, None);

    let (status, body) = harness
        .send(event(r#"{"token":"t","challenge":"3eZbrw1aBm2rZgRNFdxV2595E9CY3gmdALWMmHkvFXO7tYXAYM8P","type":"url_verification"}"#))
        .await;

    assert_eq!(status, StatusCode::OK);
    let body: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(body, serde_json::json!({ "challenge": "3eZbrw1aBm2rZgRNFdxV2595E9CY3gmdALWMmHkvFXO7tYXAYM8P" }));
}

#[tokio::test]
async fn slash_command_posts_one_email_to_response_url() {
    let mut harness = setup(Completion::Echo, None);

    let (status, body) = harness.send(slash(JANE_SLASH)).await;

    assert_eq!(status, StatusCode::OK);
    let ack: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(ack["response_type"], "in_channel");
    assert_eq!(ack["text"], "Received: `/aisdr Jane, VP Sales, Datadog`\n\nProcessing your request, please wait...");

    let (system_prompt, user_prompt) = harness.prompts.recv().await.unwrap();
    assert!(system_prompt.contains("Jane"));
    assert!(system_prompt.contains("VP Sales"));
    assert!(system_prompt.contains("Datadog"));
    assert!(user_prompt.starts_with("Name: Jane\nPosition: VP Sales\nCompetitor Tool: Datadog"));

    let (target, text) = harness.next_post().await;
    assert_eq!(target, ReplyTarget::ResponseUrl("https://hooks.example/jane".to_string()));
    assert!(text.starts_with("*Subject:* A note for Jane\n\n"));
    assert!(text.contains("Hi Jane,"));

    harness.assert_no_more_posts().await;
}

#[tokio::test]
async fn completion_failure_posts_exactly_one_notice() {
    let mut harness = setup(Completion::Fail, None);

    let (status, _) = harness.send(slash(JANE_SLASH)).await;
    assert_eq!(status, StatusCode::OK);

    let (target, text) = harness.next_post().await;
    assert_eq!(target, ReplyTarget::ResponseUrl("https://hooks.example/jane".to_string()));
    assert_eq!(text, FAILURE_NOTICE);

    harness.assert_no_more_posts().await;

    let metrics = harness.metrics_containing("aisdr_slack_messages_sent_total 1").await;
    assert!(metrics.contains(r#"aisdr_openai_requests_total{status="error"} 1"#));
    assert!(metrics.contains(r#"aisdr_processing_errors_total{error_type="completion_failed"} 1"#));
}

#[tokio::test]
async fn malformed_slash_command_returns_usage() {
    let mut harness = setup(Completion::Echo, None);

    let (status, body) = harness.send(slash("command=%2Faisdr&text=just+a+name&channel_id=C1&response_url=https%3A%2F%2Fhooks.example%2Fx")).await;

    assert_eq!(status, StatusCode::OK);
    let reply: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(reply["response_type"], "in_channel");
    assert!(reply["text"].as_str().unwrap().contains("/aisdr Jane, VP Sales, Datadog"));

    assert!(harness.prompts.try_recv().is_err());
    harness.assert_no_more_posts().await;
}

#[tokio::test]
async fn empty_slash_body_is_still_ok() {
    let mut harness = setup(Completion::Echo, None);

    let (status, body) = harness.send(slash("")).await;

    assert_eq!(status, StatusCode::OK);
    let reply: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(reply["response_type"], "in_channel");

    harness.assert_no_more_posts().await;
}

#[tokio::test]
async fn mention_event_posts_email_to_channel() {
    let mut harness = setup(Completion::Echo, None);

    let (status, body) = harness
        .send(event(r#"{"type":"event_callback","event_id":"Ev1","event":{"type":"app_mention","user":"U1","text":"<@UBOT> Name: Bob, Position: CTO, Competitor: Splunk","channel":"C9"}}"#))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert!(body.is_empty());

    let (target, text) = harness.next_post().await;
    assert_eq!(target, ReplyTarget::Channel("C9".to_string()));
    assert!(text.contains("A note for Bob"));

    harness.assert_no_more_posts().await;
}

#[tokio::test]
async fn duplicate_event_is_processed_once() {
    let mut harness = setup(Completion::Echo, None);
    let payload = r#"{"type":"event_callback","event_id":"EvDup","event":{"type":"message","channel_type":"im","user":"U1","text":"Jane, VP Sales, Datadog","channel":"D1"}}"#;

    assert_eq!(harness.send(event(payload)).await.0, StatusCode::OK);
    assert_eq!(harness.send(event(payload)).await.0, StatusCode::OK);

    let (target, _) = harness.next_post().await;
    assert_eq!(target, ReplyTarget::Channel("D1".to_string()));

    harness.assert_no_more_posts().await;
}

#[tokio::test]
async fn bot_and_subtyped_events_are_ignored() {
    let mut harness = setup(Completion::Echo, None);

    harness
        .send(event(r#"{"type":"event_callback","event_id":"Ev2","event":{"type":"message","bot_id":"B1","text":"Jane, VP Sales, Datadog","channel":"C1"}}"#))
        .await;
    harness
        .send(event(r#"{"type":"event_callback","event_id":"Ev3","event":{"type":"message","subtype":"message_changed","channel":"C1"}}"#))
        .await;
    harness
        .send(event(r#"{"type":"event_callback","event_id":"Ev4","event":{"type":"reaction_added","user":"U1","channel":"C1"}}"#))
        .await;

    harness.assert_no_more_posts().await;
    assert!(harness.prompts.try_recv().is_err());
}

#[tokio::test]
async fn unparseable_direct_message_gets_usage() {
    let mut harness = setup(Completion::Echo, None);

    harness
        .send(event(r#"{"type":"event_callback","event_id":"Ev5","event":{"type":"message","channel_type":"im","user":"U1","text":"hello there","channel":"D7"}}"#))
        .await;

    let (target, text) = harness.next_post().await;
    assert_eq!(target, ReplyTarget::Channel("D7".to_string()));
    assert!(text.contains("/aisdr Jane, VP Sales, Datadog"));
    assert!(harness.prompts.try_recv().is_err());
}

#[tokio::test]
async fn plain_channel_messages_are_ignored() {
    let mut harness = setup(Completion::Echo, None);

    let (status, _) = harness
        .send(event(r#"{"type":"event_callback","event_id":"Ev6","event":{"type":"message","channel_type":"channel","user":"U1","text":"lunch anyone?","channel":"C1"}}"#))
        .await;
    assert_eq!(status, StatusCode::OK);

    harness
        .send(event(r#"{"type":"event_callback","event_id":"Ev7","event":{"type":"message","channel_type":"channel","user":"U1","text":"Jane, VP Sales, Datadog","channel":"C1"}}"#))
        .await;

    harness.assert_no_more_posts().await;
    assert!(harness.prompts.try_recv().is_err());
}

#[tokio::test]
async fn mention_delivered_as_message_and_app_mention_posts_once() {
    let mut harness = setup(Completion::Echo, None);

    harness
        .send(event(r#"{"type":"event_callback","event_id":"Ev8","event":{"type":"message","channel_type":"channel","user":"U1","text":"<@UBOT> Jane, VP Sales, Datadog","channel":"C1"}}"#))
        .await;
    harness
        .send(event(r#"{"type":"event_callback","event_id":"Ev9","event":{"type":"app_mention","user":"U1","text":"<@UBOT> Jane, VP Sales, Datadog","channel":"C1"}}"#))
        .await;

    let (target, text) = harness.next_post().await;
    assert_eq!(target, ReplyTarget::Channel("C1".to_string()));
    assert!(text.contains("A note for Jane"));

    harness.assert_no_more_posts().await;
}

#[tokio::test]
async fn failed_email_post_is_followed_by_one_notice() {
    let mut harness = setup_with_deliveries(Completion::Echo, None, vec![Delivery::Rejected]);

    harness.send(slash(JANE_SLASH)).await;

    let (_, text) = harness.next_post().await;
    assert!(text.contains("A note for Jane"));

    let (target, text) = harness.next_post().await;
    assert_eq!(target, ReplyTarget::ResponseUrl("https://hooks.example/jane".to_string()));
    assert_eq!(text, FAILURE_NOTICE);

    harness.assert_no_more_posts().await;

    let metrics = harness.metrics_containing("aisdr_slack_messages_sent_total 1").await;
    assert!(metrics.contains(r#"aisdr_processing_errors_total{error_type="message_failed"} 1"#));
}

#[tokio::test]
async fn failed_notice_is_only_counted() {
    let mut harness = setup_with_deliveries(Completion::Echo, None, vec![Delivery::Rejected, Delivery::Rejected]);

    harness.send(slash(JANE_SLASH)).await;

    let (_, text) = harness.next_post().await;
    assert!(text.contains("A note for Jane"));
    let (_, text) = harness.next_post().await;
    assert_eq!(text, FAILURE_NOTICE);

    harness.assert_no_more_posts().await;

    let metrics = harness.metrics_containing(r#"aisdr_processing_errors_total{error_type="fallback_failed"} 1"#).await;
    assert!(metrics.contains(r#"aisdr_processing_errors_total{error_type="message_failed"} 1"#));
    assert!(!metrics.contains("aisdr_slack_messages_sent_total 1"));
}

#[tokio::test]
async fn invalid_json_event_is_acknowledged() {
    let harness = setup(Completion::Echo, None);

    let (status, body) = harness.send(event("{not json")).await;

    assert_eq!(status, StatusCode::OK);
    assert!(body.is_empty());
}

#[tokio::test]
async fn bad_signature_is_rejected_when_secret_is_set() {
    let mut harness = setup(Completion::Echo, Some("shhh"));

    let mut request = slash(JANE_SLASH);
    request.headers_mut().insert("x-slack-signature", "v0=deadbeef".parse().unwrap());
    request.headers_mut().insert("x-slack-request-timestamp", "1700000000".parse().unwrap());

    let (status, _) = harness.send(request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = harness.send(event(r#"{"challenge":"abc"}"#)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    harness.assert_no_more_posts().await;
}

#[tokio::test]
async fn correctly_signed_requests_are_accepted() {
    let mut harness = setup(Completion::Echo, Some("shhh"));

    let (status, body) = harness.send(signed(slash(JANE_SLASH), JANE_SLASH, "shhh")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("Processing your request"));

    let (_, text) = harness.next_post().await;
    assert!(text.contains("A note for Jane"));

    let challenge = r#"{"challenge":"abc"}"#;
    let (status, body) = harness.send(signed(event(challenge), challenge, "shhh")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, r#"{"challenge":"abc"}"#);

    harness.assert_no_more_posts().await;
}

#[tokio::test]
async fn metrics_and_health_are_served() {
    let mut harness = setup(Completion::Echo, None);

    harness.send(slash(JANE_SLASH)).await;
    harness.next_post().await;

    let (status, body) = harness.send(get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "ok");

    let metrics = harness.metrics_containing("aisdr_slack_messages_sent_total 1").await;
    assert!(metrics.contains("aisdr_slash_commands_total 1"));
    assert!(metrics.contains("aisdr_emails_generated_total 1"));
    assert!(metrics.contains(r#"aisdr_openai_requests_total{status="success"} 1"#));
    assert!(metrics.contains("aisdr_background_tasks_total 1"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_slash_commands_stay_isolated() {
    const N: usize = 8;

    let mut harness = setup(Completion::Echo, None);

    let handles = (0..N)
        .map(|i| {
            let app = harness.app.clone();
            let form = format!("command=%2Faisdr&text=Person{i}%2C+CTO%2C+Datadog&channel_id=C1&response_url=https%3A%2F%2Fhooks.example%2F{i}");
            tokio::spawn(async move { app.oneshot(slash(&form)).await.unwrap().status() })
        })
        .collect::<Vec<_>>();

    for handle in handles {
        assert_eq!(handle.await.unwrap(), StatusCode::OK);
    }

    let mut seen = Vec::new();
    for _ in 0..N {
        let (target, text) = harness.next_post().await;
        let ReplyTarget::ResponseUrl(url) = target else {
            panic!("expected a response URL target");
        };

        let i = url.rsplit('/').next().unwrap();
        assert!(text.contains(&format!("A note for Person{i}")), "post for {url} leaked another prospect: {text}");
        seen.push(i.to_string());
    }

    seen.sort();
    seen.dedup();
    assert_eq!(seen.len(), N);

    harness.assert_no_more_posts().await;
}


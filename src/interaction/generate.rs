//! Background email generation.
//!
//! Each accepted webhook spawns one task that renders the prompt, makes a single
//! completion call, and posts either the email or a failure notice to the reply target.

use std::time::Instant;

use tracing::{Instrument, error, info, instrument, warn};

use crate::{
    base::{
        metrics::ErrorKind,
        prompts,
        types::{GeneratedEmail, ProspectDescriptor, ReplyTarget, Void},
    },
    runtime::Runtime,
};

/// Posted in place of the email when generation or delivery fails.
pub const FAILURE_NOTICE: &str = "Sorry, I couldn't process your request at the moment.";

/// Draft an email for `prospect` and post it to `target`, in the background.
#[instrument(skip_all, fields(target = %target))]
pub fn generate_and_reply(runtime: &Runtime, prospect: ProspectDescriptor, target: ReplyTarget) {
    let runtime = runtime.clone();
    runtime.metrics.record_background_task_started();

    tokio::spawn(
        async move {
            let started = Instant::now();

            // Process the request.
            let result = generate_and_reply_internal(&runtime, &prospect, &target).await;

            runtime.metrics.record_background_task_duration(started.elapsed());

            // Log any errors.
            if let Err(err) = &result {
                error!("Error while generating: {}", err);
            }
        }
        .in_current_span(),
    );
}

/// Post a fixed notice to `target`, in the background.
#[instrument(skip_all, fields(target = %target))]
pub fn post_notice(runtime: &Runtime, target: ReplyTarget, text: &'static str) {
    let runtime = runtime.clone();

    tokio::spawn(
        async move {
            match runtime.chat.post_message(&target, text).await {
                Ok(()) => runtime.metrics.record_slack_message_sent(),
                Err(err) => {
                    runtime.metrics.record_error(ErrorKind::MessageFailed);
                    error!("Error while posting notice: {}", err);
                }
            }
        }
        .in_current_span(),
    );
}

async fn generate_and_reply_internal(runtime: &Runtime, prospect: &ProspectDescriptor, target: &ReplyTarget) -> Void {
    let system_prompt = prompts::render(&runtime.config.prompt_template, prospect);
    let user_prompt = prompts::user_prompt(prospect);

    // Call the LLM exactly once.

    let started = Instant::now();
    let completion = runtime.llm.generate_email(&system_prompt, &user_prompt).await;
    runtime.metrics.record_openai_request(started.elapsed(), completion.is_ok());

    let text = match completion {
        Ok(text) => text,
        Err(err) => {
            warn!("Completion failed: {}", err);
            runtime.metrics.record_error(ErrorKind::CompletionFailed);
            return post_failure_notice(runtime, target).await;
        }
    };

    let email = GeneratedEmail::from_completion(&text);
    runtime.metrics.record_email_generated();

    // Deliver it.

    match runtime.chat.post_message(target, &email.to_slack_text()).await {
        Ok(()) => {
            runtime.metrics.record_slack_message_sent();
            info!(has_subject = email.subject.is_some(), "Email posted");
            Ok(())
        }
        Err(err) => {
            warn!("Posting email failed: {}", err);
            runtime.metrics.record_error(ErrorKind::MessageFailed);
            post_failure_notice(runtime, target).await
        }
    }
}

async fn post_failure_notice(runtime: &Runtime, target: &ReplyTarget) -> Void {
    match runtime.chat.post_message(target, FAILURE_NOTICE).await {
        Ok(()) => {
            runtime.metrics.record_slack_message_sent();
            Ok(())
        }
        Err(err) => {
            runtime.metrics.record_error(ErrorKind::FallbackFailed);
            Err(anyhow::anyhow!("Failed to post failure notice: {}", err))
        }
    }
}

use std::fmt;

use serde::{Deserialize, Serialize};

pub type Err = anyhow::Error;
pub type Res<T> = Result<T, Err>;
pub type Void = Res<()>;

/// The prospect an email is drafted for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProspectDescriptor {
    pub name: String,
    pub position: String,
    pub competitor_tool: String,
}

/// Where the generated reply (or the failure notice) should be posted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum ReplyTarget {
    /// A channel id, posted to with the bot token.
    Channel(String),
    /// A slash command `response_url`.
    ResponseUrl(String),
}

impl fmt::Display for ReplyTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplyTarget::Channel(channel) => write!(f, "channel:{channel}"),
            // Response URLs embed a one-time token, so keep them out of the logs.
            ReplyTarget::ResponseUrl(_) => write!(f, "response_url"),
        }
    }
}

/// An email split out of the completion text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedEmail {
    pub subject: Option<String>,
    pub body: String,
}

impl GeneratedEmail {
    /// Split completion text into a subject and body.
    ///
    /// The subject is taken from the first non-empty line when it starts with `Subject:`.
    pub fn from_completion(text: &str) -> Self {
        let text = text.trim();
        let mut lines = text.lines();

        let first = lines.by_ref().find(|line| !line.trim().is_empty()).unwrap_or_default().trim().trim_start_matches('*');
        let subject = strip_prefix_ignore_case(first, "subject:")
            .map(|s| s.trim().trim_matches('*').trim().to_string())
            .filter(|s| !s.is_empty());

        match subject {
            Some(subject) => Self {
                subject: Some(subject),
                body: lines.collect::<Vec<_>>().join("\n").trim().to_string(),
            },
            None => Self { subject: None, body: text.to_string() },
        }
    }

    /// Render the email as Slack `mrkdwn`.
    pub fn to_slack_text(&self) -> String {
        match &self.subject {
            Some(subject) => format!("*Subject:* {}\n\n{}", subject, self.body),
            None => self.body.clone(),
        }
    }
}

fn strip_prefix_ignore_case<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    let head = s.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix).then(|| &s[prefix.len()..])
}

// Tests.

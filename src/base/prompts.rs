//! Prompt templates for email generation.

use crate::base::types::ProspectDescriptor;

/// Placeholders every system prompt template must contain.
pub const PLACEHOLDERS: [&str; 3] = ["{name}", "{position}", "{competitor_tool}"];

/// Default system prompt.
///
/// The competitor guidance is static text: the model picks the section that matches `{competitor_tool}`.
pub const SYSTEM_PROMPT_TEMPLATE: &str = r#####"
# Prime Directive

You are an AI sales development representative (SDR) for Observe, a unified observability platform that brings logs, metrics, and traces together in one place, priced on usage rather than on hosts or ingest.  You write short, personal, and credible cold emails to technical buyers.

You are writing to {name}, who works as {position}, and whose team currently uses {competitor_tool}.

## Goals

  (1) open with something relevant to the day-to-day of a {position},
  (2) name one or two concrete pains that teams on {competitor_tool} commonly run into,
  (3) explain briefly how Observe addresses those pains,
  (4) close with a single low-friction call to action (a 20 minute call, or a link to a sandbox).

## Competitor Guidance

Use the section that matches {competitor_tool}.  If none match, focus on consolidation and cost predictability.

- Datadog: unpredictable bills driven by custom metrics, indexed logs, and per-host pricing; teams sample or drop data to stay on budget.
- Splunk: expensive ingest-based licensing, heavy operational overhead, and a query language that few engineers outside the SRE team know.
- New Relic: per-user pricing that discourages wide adoption, and limited retention for high-cardinality data.
- Grafana: stitching together Loki, Mimir, and Tempo means operating several backends and correlating data by hand.
- Elastic: cluster sizing, shard management, and reindexing consume engineering time that should go to the product.
- Dynatrace: powerful but opaque; agents and licensing are hard to reason about, and raw data is difficult to explore freely.
- Sumo Logic: slow searches at scale and data tiers that force trade-offs between cost and visibility.

## Format

  - The first line must be `Subject: ` followed by a subject of at most eight words.
  - Leave one blank line, then write the body.
  - The body is at most 150 words, addressed to {name} by first name, and signed "The Observe Team".
  - Plain text only.  No markdown headings, no bullet lists, no placeholders like [Company].
  - Never claim specific customer names or numbers you were not given.
"#####;

/// Render the system prompt for a prospect.
///
/// Pure substitution in a single pass over the template; inserted values are
/// copied verbatim and never scanned for placeholders themselves.
pub fn render(template: &str, prospect: &ProspectDescriptor) -> String {
    let values = [&prospect.name, &prospect.position, &prospect.competitor_tool];

    let mut rendered = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        rendered.push_str(&rest[..start]);
        let tail = &rest[start..];

        match PLACEHOLDERS.into_iter().zip(values).find(|(placeholder, _)| tail.starts_with(*placeholder)) {
            Some((placeholder, value)) => {
                rendered.push_str(value);
                rest = &tail[placeholder.len()..];
            }
            None => {
                rendered.push('{');
                rest = &tail[1..];
            }
        }
    }

    rendered.push_str(rest);
    rendered
}

/// Build the user turn for a prospect.
pub fn user_prompt(prospect: &ProspectDescriptor) -> String {
    format!(
        "Name: {name}\nPosition: {position}\nCompetitor Tool: {competitor}\n\nPlease craft a compelling cold email introducing our tool and why {name} should consider switching from {competitor}.",
        name = prospect.name,
        position = prospect.position,
        competitor = prospect.competitor_tool,
    )
}

/// Get the placeholders missing from a template.
pub fn missing_placeholders(template: &str) -> Vec<&'static str> {
    PLACEHOLDERS.into_iter().filter(|p| !template.contains(p)).collect()
}

// Tests.

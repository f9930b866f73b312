//! Parsing of free-text prospect details.
//!
//! Text is three comma-separated segments. A segment is either labelled
//! (`Name:`, `Position:`, `Competitor:` / `Competitor Tool:`) or positional;
//! positional segments fill whichever fields are still empty, in the order
//! name, position, competitor.

use thiserror::Error;

use crate::base::types::ProspectDescriptor;

/// Shown to users whenever their input cannot be parsed.
pub const USAGE: &str = "Please provide the prospect's name, position, and current tool, separated by commas.\n\
    Example: `/aisdr Jane, VP Sales, Datadog`\n\
    Labels are also accepted: `/aisdr Name: Jane, Position: VP Sales, Competitor: Datadog`";

/// Why a piece of text is not a prospect.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProspectParseError {
    #[error("no prospect details were given")]
    Empty,
    #[error("expected 3 comma-separated values, got {0}")]
    TooManySegments(usize),
    #[error("the {0} is missing")]
    MissingField(&'static str),
    #[error("the {0} was given more than once")]
    DuplicateLabel(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Name,
    Position,
    Competitor,
}

impl Field {
    const ORDER: [Field; 3] = [Field::Name, Field::Position, Field::Competitor];

    fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "name" => Some(Field::Name),
            "position" => Some(Field::Position),
            "competitor" | "competitor tool" => Some(Field::Competitor),
            _ => None,
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            Field::Name => "name",
            Field::Position => "position",
            Field::Competitor => "competitor tool",
        }
    }

    fn index(&self) -> usize {
        match self {
            Field::Name => 0,
            Field::Position => 1,
            Field::Competitor => 2,
        }
    }
}

/// Parse prospect details out of slash command or message text.
pub fn parse(text: &str) -> Result<ProspectDescriptor, ProspectParseError> {
    let text = text.trim();

    if text.is_empty() {
        return Err(ProspectParseError::Empty);
    }

    let segments = text.split(',').map(str::trim).collect::<Vec<_>>();

    if segments.len() > Field::ORDER.len() {
        return Err(ProspectParseError::TooManySegments(segments.len()));
    }

    let mut fields: [Option<&str>; 3] = [None; 3];
    let mut positional = Vec::new();

    for segment in segments {
        let labelled = segment.split_once(':').and_then(|(label, value)| Field::from_label(label).map(|field| (field, value.trim())));

        match labelled {
            Some((field, value)) => {
                let slot = &mut fields[field.index()];
                if slot.is_some() {
                    return Err(ProspectParseError::DuplicateLabel(field.describe()));
                }
                *slot = Some(value);
            }
            None => positional.push(segment),
        }
    }

    let mut positional = positional.into_iter();
    for field in Field::ORDER {
        let slot = &mut fields[field.index()];
        if slot.is_none() {
            *slot = positional.next();
        }
    }

    let [name, position, competitor] = fields;

    Ok(ProspectDescriptor {
        name: required(name, Field::Name)?,
        position: required(position, Field::Position)?,
        competitor_tool: required(competitor, Field::Competitor)?,
    })
}

fn required(value: Option<&str>, field: Field) -> Result<String, ProspectParseError> {
    value
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or(ProspectParseError::MissingField(field.describe()))
}

/// Drop leading user mentions (`<@U123>`) from message text.
pub fn strip_mentions(text: &str) -> &str {
    let mut rest = text.trim_start();

    while let Some(after) = rest.strip_prefix("<@") {
        match after.find('>') {
            Some(end) => rest = after[end + 1..].trim_start(),
            None => break,
        }
    }

    rest
}

// Tests.

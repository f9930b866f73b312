//! Webhook handling and user interactions for aisdr-bot.
//!
//! This module provides functionality for handling Slack deliveries:
//! - Receiving events and slash commands over HTTP
//! - Parsing prospect details out of free text
//! - Generating and posting emails in the background

pub mod dedup;
pub mod generate;
pub mod prospect;
pub mod webhook;

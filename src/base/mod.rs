//! Core components, types, and utilities for the aisdr-bot.
//!
//! This module contains fundamental building blocks used throughout the application:
//! - Configuration handling and environment variables.
//! - Prompt templates for email generation.
//! - Metrics and telemetry setup.
//! - Common types and result handling.

pub mod config;
pub mod metrics;
pub mod prompts;
pub mod telemetry;
pub mod types;

//! Guided math-discussion facilitation for team chat channels.
//!
//! A session walks a lesson's question stages in one channel: the
//! facilitator prompts, students discuss, an insight oracle scores
//! contributions against the stage's expected insights, and an experience
//! ledger accumulates points across sessions. Stages complete on full
//! insight coverage or on deadline; a concluded session produces an
//! out-of-band instructor report.
//!
//! Module map:
//! - [`platform`] — chat-platform boundary types and the [`platform::ChatSink`] trait
//! - [`lessons`] — lesson definitions loaded from JSON
//! - [`session`] / [`scheduler`] — per-channel state machine and deadlines
//! - [`engine`] / [`registry`] — session workers and channel routing
//! - [`oracle`] / [`generation`] / [`deepseek`] — reasoning-endpoint collaborators
//! - [`ledger`] — persistent experience points
//! - [`commands`] — the operator command gateway
//! - [`report`] — participation statistics and instructor reporting

pub mod commands;
pub mod config;
pub mod deepseek;
pub mod engine;
pub mod generation;
pub mod ledger;
pub mod lessons;
pub mod oracle;
pub mod platform;
pub mod prompts;
pub mod registry;
pub mod report;
pub mod scheduler;
pub mod session;

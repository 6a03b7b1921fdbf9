//! snag-cli
//!
//! Operator-facing wiring for the pipeline in `snag-core`: configuration,
//! logging, HTTP-backed collaborator clients, and command dispatch.

pub mod cli;
pub mod collaborators;
pub mod commands;
pub mod config;
pub mod logging;
pub mod wiring;

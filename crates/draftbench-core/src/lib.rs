//! Core Draftbench library (auth session controller, config).

pub mod auth;
pub mod config;

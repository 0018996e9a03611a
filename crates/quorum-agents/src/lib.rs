//! quorum-agents: command-line front end for fleet consensus.
//!
//! Loads [`config::AppConfig`], bootstraps the verified fleet, builds one
//! session per allow-listed model and hands them to the consensus engine.

pub mod cli;
pub mod config;
pub mod operator;
pub mod runner;

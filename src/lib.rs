//! Labchat is a terminal-first chat front-end for streaming lab-assistant
//! personas.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`core`] owns the conversation state machine, the streaming response
//!   accumulator, inline directive extraction, persona handling,
//!   configuration, and transcript export.
//! - [`api`] defines the wire payloads and request plumbing for the
//!   generation service (streaming chat plus unary image generation).
//! - [`cli`] parses arguments and runs the line-based front-end that drives
//!   the core: the interactive chat loop, one-shot `say`, persona listing,
//!   and `imagine`.
//!
//! Runtime entrypoints live in the binary crate (`src/main.rs`) and route
//! through [`crate::cli::main`].

pub mod api;
pub mod cli;
pub mod core;

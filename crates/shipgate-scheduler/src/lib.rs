//! Change-gated build orchestration for Shipgate.
//!
//! Classifies a change set against the build plan, then builds and pushes
//! affected targets one after another and relays upstream images.

pub mod orchestrator;

pub use orchestrator::{Orchestrator, RunEvent, RunOptions};

//! # coplan core
//!
//! Domain types, collaborator traits, and error definitions for the coplan
//! planning-and-memory runtime. This crate has **no async runtime dependency**; it only
//! needs serde, thiserror and async-trait. It defines the seams every
//! other crate builds against.
//!
//! ## Collaborators
//!
//! The planning core drives two external systems it does not implement:
//! - [`Model`]: the language-model backend (`generate(prompt, image)`)
//! - [`Environment`]: the simulated world (missions, renders, action parsing)
//!
//! Both are traits so runs can swap real backends for scripted doubles.

pub mod environment;
pub mod error;
pub mod info;
pub mod model;

// Re-export key types at crate root for ergonomics
pub use environment::{ActionId, Briefing, Environment, Frame};
pub use error::{Error, ModelError, PolicyError, ReplayError, Result};
pub use info::{AchievementRecord, MessageRecord, QueryRecord, StepInfo};
pub use model::{Generation, Model, DEFAULT_IMAGE_TOKEN};

//! Per-agent memory for coplan.
//!
//! - [`History`]: the labeled transcript of one episode, rebuilt at every reset
//! - [`ReflectionMemory`]: bounded reflection notes that survive resets

pub mod history;
pub mod reflection;

pub use history::{History, HistoryEntry, HistoryView};
pub use reflection::ReflectionMemory;

//! revgate-core: suggestion analysis and merge gating.
//!
//! Changed files are selected, sent to a chat model one at a time, and the
//! model's reply is parsed into ranked [`types::Suggestion`]s stored in SQLite.
//! The merge gate reads the stored unresolved criticals back out.

pub mod analysis;
pub mod config;
pub mod db;
pub mod error;
pub mod gate;
pub mod language;
pub mod llm;
pub mod parse;
pub mod prompt;
pub mod rank;
pub mod schema;
pub mod select;
pub mod trigger;
pub mod types;

//! Civic intake engine.
//!
//! Takes a citizen's free-text report and a `"lat,lon"` location, screens it
//! for spam, classifies it, routes it to the responsible authority, and
//! either files it as a new issue or folds it into an overlapping one as an
//! upvote. The HTTP surface lives in [`api`]; the pipeline in [`intake`].

pub mod api;
pub mod circuit_breaker;
pub mod classifier;
pub mod config;
pub mod dedup;
pub mod error;
pub mod geo;
pub mod intake;
pub mod lifecycle;
pub mod metrics;
pub mod models;
pub mod notifier;
pub mod store;
pub mod text_scanner;
pub mod votes;

//! dispatchlite core: configuration and observability shared by the dispatch engine.

pub mod config;
pub mod observability;

//! Versioned redirect history built from wiki dump INSERT statements.
//!
//! Each ingestion batch runs a redirect pass and then a page pass. Redirect
//! records get a new version per batch; page records are bound to the
//! redirect version they were resolved against.

pub mod config;
pub mod dump;
pub mod ingest;
pub mod query;
pub mod resolve;
pub mod store;

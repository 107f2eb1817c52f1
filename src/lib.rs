//! Mall Ingest - catalog ingestion pipeline for regional shopping malls
//!
//! Crawls product listings of many independent mall sites, each described
//! by a declarative site profile, and merges them into one deduplicated
//! product catalog with a snapshot backup before every write.

pub mod application;
pub mod domain;
pub mod infrastructure;

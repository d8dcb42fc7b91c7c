//! Wayback relay library.
//!
//! Archives URLs, given directly or picked out of chat messages, to several
//! web archives at once and reports one result per (URL, archive).

#![allow(clippy::needless_raw_string_hashes)]

pub mod archive_today;
pub mod backends;
pub mod bundle;
pub mod collect;
pub mod config;
pub mod constants;
pub mod dispatch;
pub mod google_cache;
pub mod inflight;
pub mod ingest;
pub mod ipfs;
pub mod publish;
pub mod telegraph;
pub mod timetravel;
pub mod wayback;

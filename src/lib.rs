//! Client-side data synchronization for a personal feed reader.
//!
//! The backend ingests RSS, Reddit and YouTube feeds; this crate keeps a
//! local, normalized view of its articles and feeds coherent while the user
//! scrolls, filters, marks articles and adds or removes feeds.
//!
//! - [`api`] - HTTP client and wire types for the backend
//! - [`cache`] - Id-keyed entity cache with change notifications
//! - [`sync`] - Pagination, filtering, optimistic mutations, invalidation
//! - [`ingest`] - Normalizing user input into feed-creation payloads
//! - [`session`] - Everything above wired together
//! - [`config`] - TOML configuration

pub mod api;
pub mod cache;
pub mod config;
pub mod ingest;
pub mod session;
pub mod sync;
pub mod util;

pub use session::Session;

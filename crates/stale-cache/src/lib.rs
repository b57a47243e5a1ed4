//! # A self-loading cache facade
//!
//! This crate layers load-on-miss, stale-while-refresh and request coalescing on top of any
//! key/value [`CacheStore`]. The primary entry point is [`SelfLoadingCache::get`], which is given a
//! key along with a loader for it.
//!
//! ## Lookups
//!
//! A lookup goes through the following steps:
//! - First, the entry is read from the store.
//! - If it is fresh, it is returned as-is.
//! - If it is expired, it is returned as a stale value, and a refresh is spawned in the background
//!   which overwrites the entry once the loader completes.
//! - If it is missing, the loader is run on the current task, and the result is written to the
//!   store before it is returned.
//!
//! ## Request coalescing
//!
//! Each cache keeps a registry of running loads which makes sure that at most one load per key is
//! running at any time. Lookups that miss while a load for the same key is running wait for it to
//! complete and then read its result from the store. A refresh is skipped if one for the same key
//! is already running. The number of concurrently running background refreshes can additionally
//! be limited with [`CacheBuilder::max_lazy_refreshes`].
//!
//! ## Errors
//!
//! Errors of the store ([`StoreError`]) are never returned to the caller. They are handed to the
//! configured [`ErrorHandler`], which by default logs them, and the operation is treated as if it
//! had not happened: a failing read is a miss, and a failing write is dropped.
//!
//! Errors of the loader are returned to the caller only when there is no value to fall back to,
//! which is the case when loading a missing key. A failing background refresh is reported to the
//! [`ErrorHandler`], and the stale entry remains in place until the next expired read tries again.
//!
//! ## Configuration
//!
//! Caches are assembled using the [`CacheBuilder`]. The [`Config`] can be read from a YAML file and
//! contains defaults for caches, the [`GlobalSwitch`] which turns all caches into pass-throughs
//! for debugging, and settings for [`logging`] and [`metrics`], which are applied with
//! [`logging::init_logging`] and [`metrics::init`].
//!
//! ### Metrics
//!
//! All metrics are tagged with a `cache` field that corresponds to the cache name. Here is a list
//! of metrics that are collected:
//!
//! - `caches.access`: All accesses.
//! - `caches.hit`: Accesses served by a fresh entry.
//! - `caches.stale`: Accesses served by an expired entry.
//! - `caches.miss`: Accesses that had to load the value.
//! - `caches.coalesced`: Accesses that waited for a load which was already running.
//! - `caches.computation`: Actual loader invocations, tagged with `is_refresh`.
//! - `caches.refresh`: Completed background refreshes, tagged with `status`.
//! - `caches.lazy_limit_hit`: Refreshes skipped because too many were running.
//! - `caches.no_runtime`: Refreshes skipped because there was no runtime to spawn them on.
//! - `caches.store.error`: Absorbed store errors, tagged with `op`.
//! - `caches.disabled`: Accesses of a disabled cache.

#[macro_use]
pub mod metrics;

mod builder;
pub mod config;
mod coordinator;
mod error;
mod facade;
mod guard;
pub mod logging;
pub mod store;
mod utils;

pub use builder::{CacheBuilder, FacadeConfig};
pub use config::{CacheConfig, Config, GlobalSwitch};
pub use error::{ErrorHandler, Fault, StoreError, StoreOp, log_fault};
pub use facade::SelfLoadingCache;
pub use store::{CacheEntry, CacheKey, CacheStore, MemoryStore};

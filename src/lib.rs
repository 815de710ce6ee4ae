#![deny(
    missing_debug_implementations,
    nonstandard_style,
    unused_qualifications,
    unused_import_braces,
    unused_extern_crates,
    trivial_casts,
    trivial_numeric_casts
)]
#![allow(clippy::doc_lazy_continuation)]
#![cfg_attr(docsrs, feature(doc_cfg))]
//! A cache-coherent HTTP request engine: RFC 7234 cache semantics, a
//! byte-bounded LRU file cache, and a keep-alive connection pool,
//! orchestrated behind one synchronous `execute()` call.
//!
//! The wire codec, TLS handshake, and socket I/O are intentionally out of
//! scope: callers implement [`pool::Session`]/[`pool::SessionFactory`] for
//! their transport of choice and hand it to a [`pool::ConnectionPool`].
//! Everything above that line — whether a request is servable from cache,
//! how long it stays fresh, when a connection is reused versus recreated,
//! how a response is classified and possibly cached on the way back to the
//! caller — lives here.
//!
//! ## Basic usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use http_cache_engine::engine::{HttpEngine, HttpEngineOptions, RequestBody, RequestContext};
//! use http_cache_engine::pool::{ConnectionPool, ConnectionPoolConfig};
//! use http_cache_engine::store::{FileCache, FileCacheConfig, TwoTierCacheManager};
//!
//! # fn build(factory: Arc<dyn http_cache_engine::pool::SessionFactory>) -> http_cache_engine::error::Result<()> {
//! let cache = FileCache::open(FileCacheConfig {
//!     root: "./cache".into(),
//!     max_size_bytes: 256 * 1024 * 1024,
//! })?;
//! let cache = Arc::new(TwoTierCacheManager::file_only(Arc::new(cache)));
//!
//! let pool = Arc::new(ConnectionPool::new(
//!     ConnectionPoolConfig {
//!         keep_alive_timeout: Duration::from_secs(90),
//!         keep_alive_idle_count_max: 64,
//!     },
//!     factory,
//! ));
//!
//! let engine = HttpEngine::new(pool, Some(cache), HttpEngineOptions::default());
//!
//! let request = http::Request::get("https://example.com/").body(RequestBody::empty()).unwrap();
//! let url = url::Url::parse("https://example.com/").unwrap();
//! let response = engine.execute(request, url, RequestContext::default())?;
//! # let _ = response;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod engine;
pub mod error;
pub mod pool;
pub mod store;

pub use engine::{HttpEngine, HttpEngineOptions, RequestBody, RequestContext, ResponseBody};
pub use error::{EngineError, Result};

//! `Cache-Control` directive parsing, shared between requests and
//! responses, trimmed to the directives the cache strategy actually
//! consults.

use http::HeaderMap;

/// The subset of `Cache-Control` directives the strategy needs, parsed once
/// per request or response.
#[derive(Debug, Clone, Default)]
pub struct CacheControl {
    pub no_cache: bool,
    pub no_store: bool,
    pub only_if_cached: bool,
    pub must_revalidate: bool,
    pub public: bool,
    pub private: bool,
    pub max_age: Option<u64>,
    pub min_fresh: Option<u64>,
    /// `max-stale` with no value is "accept any staleness"; represented as
    /// `Some(u64::MAX)` so it composes with the arithmetic in
    /// [`crate::cache::strategy`] without a separate branch.
    pub max_stale: Option<u64>,
}

impl CacheControl {
    /// Parses every `Cache-Control` header value present in `headers`.
    /// Multiple header lines are treated as one comma-joined list, per
    /// RFC 7230 §3.2.2.
    pub fn parse(headers: &HeaderMap) -> Self {
        let mut cc = CacheControl::default();
        for value in headers.get_all(http::header::CACHE_CONTROL) {
            let Ok(value) = value.to_str() else { continue };
            for part in value.split(',') {
                let part = part.trim();
                if part.is_empty() {
                    continue;
                }
                let mut kv = part.splitn(2, '=');
                let directive = kv.next().unwrap_or("").trim().to_ascii_lowercase();
                let arg = kv.next().map(|v| v.trim().trim_matches('"'));
                match directive.as_str() {
                    "no-cache" => cc.no_cache = true,
                    "no-store" => cc.no_store = true,
                    "only-if-cached" => cc.only_if_cached = true,
                    "must-revalidate" | "proxy-revalidate" => {
                        cc.must_revalidate = true
                    }
                    "public" => cc.public = true,
                    "private" => cc.private = true,
                    "max-age" => cc.max_age = arg.and_then(|a| a.parse().ok()),
                    "min-fresh" => {
                        cc.min_fresh = arg.and_then(|a| a.parse().ok())
                    }
                    "max-stale" => {
                        cc.max_stale =
                            Some(arg.and_then(|a| a.parse().ok()).unwrap_or(u64::MAX))
                    }
                    _ => {}
                }
            }
        }
        cc
    }
}

//! Cache key derivation.
//!
//! A cache key is a deterministic string derived from `(method, url)`. Two
//! requests collide in the cache iff their keys collide; only `GET` is
//! cache-eligible (see [`crate::cache::strategy`]).

use http::Method;
use url::Url;

/// Builds the cache key for `(method, url)`.
///
/// The key is stable across runs: it does not depend on header order,
/// process-local state, or anything beyond the method and the URL's
/// normalized string form.
pub fn cache_key(method: &Method, url: &Url) -> String {
    format!("{}:{}", method.as_str(), url)
}

/// Builds the cache key that a GET for `url` would use, regardless of the
/// method actually being invalidated. Used by [`crate::cache::strategy`]'s
/// `is_invalid_cache_method` handling in the engine: a successful POST to a
/// URL invalidates the cache entry that a GET to the same URL would have
/// populated.
pub fn get_cache_key(url: &Url) -> String {
    cache_key(&Method::GET, url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_method_and_url_collide() {
        let url = Url::parse("https://example.com/a?b=1").unwrap();
        assert_eq!(
            cache_key(&Method::GET, &url),
            cache_key(&Method::GET, &url)
        );
    }

    #[test]
    fn different_methods_do_not_collide() {
        let url = Url::parse("https://example.com/a").unwrap();
        assert_ne!(
            cache_key(&Method::GET, &url),
            cache_key(&Method::POST, &url)
        );
    }

    #[test]
    fn get_cache_key_matches_plain_get() {
        let url = Url::parse("https://example.com/a").unwrap();
        assert_eq!(get_cache_key(&url), cache_key(&Method::GET, &url));
    }
}

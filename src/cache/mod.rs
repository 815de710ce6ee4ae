//! Cache Strategy (component E) and its supporting types: cache keys,
//! persisted metadata, and `Cache-Control` directive parsing.

pub mod directives;
pub mod key;
pub mod metadata;
pub mod strategy;

pub use directives::CacheControl;
pub use key::{cache_key, get_cache_key};
pub use metadata::{CacheMetadata, HeaderList};
pub use strategy::{
    combine_cache_and_network_headers, is_available_to_cache, is_cacheable,
    is_invalid_cache_method, is_valid_cache_response, CacheStrategy,
};

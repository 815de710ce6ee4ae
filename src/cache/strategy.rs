//! Cache Strategy (component E): a stateless decision function over
//! `(request, cached response?, now)` plus the predicates the engine
//! consults after a network round trip.

use http::{header, request, HeaderMap, Method, StatusCode};
use std::time::{SystemTime, UNIX_EPOCH};

use super::directives::CacheControl;
use crate::cache::metadata::{CacheMetadata, HeaderList};

const ONE_DAY_SECS: i64 = 24 * 60 * 60;

const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

const CACHEABLE_UNCONDITIONALLY: &[u16] =
    &[200, 203, 204, 300, 301, 404, 405, 410, 414, 501];
const CACHEABLE_WITH_EXPIRATION: &[u16] = &[302, 307, 308];

fn epoch_secs(t: SystemTime) -> i64 {
    t.duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0)
}

fn parse_http_date_secs(s: &str) -> Option<i64> {
    httpdate::parse_http_date(s).ok().map(epoch_secs)
}

/// Request admissibility for caching at all: GET only, no `Authorization`,
/// no `no-cache` directive, no `If-Modified-Since`, no `If-None-Match`.
pub fn is_available_to_cache(request: &request::Parts) -> bool {
    if request.method != Method::GET {
        return false;
    }
    if request.headers.contains_key(header::AUTHORIZATION) {
        return false;
    }
    if request.headers.contains_key(header::IF_MODIFIED_SINCE) {
        return false;
    }
    if request.headers.contains_key(header::IF_NONE_MATCH) {
        return false;
    }
    if CacheControl::parse(&request.headers).no_cache {
        return false;
    }
    true
}

/// RFC 7234 §4.2.3 age computation.
fn cache_response_age(cached: &CacheMetadata, now_epoch: i64) -> i64 {
    let sent_at = cached.sent_request_sec as i64;
    let received_at = cached.received_response_sec as i64;

    let apparent_age = match cached.headers.get("date").and_then(parse_http_date_secs)
    {
        Some(date) => (received_at - date).max(0),
        None => 0,
    };

    let age_header: i64 = cached
        .headers
        .get("age")
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(-1);
    let received_age =
        if age_header >= 0 { apparent_age.max(age_header) } else { apparent_age };

    let response_dur = (received_at - sent_at).max(0);
    let resident_dur = (now_epoch - received_at).max(0);
    received_age + response_dur + resident_dur
}

/// Freshness lifetime, first of: response `max-age`, `Expires - Date`, the
/// `Last-Modified` heuristic (no-query URLs only), or zero.
fn freshness_lifetime(cached: &CacheMetadata, res_cc: &CacheControl) -> i64 {
    if let Some(max_age) = res_cc.max_age {
        return max_age as i64;
    }

    if let Some(expires) = cached.headers.get("expires").and_then(parse_http_date_secs)
    {
        let date = cached
            .headers
            .get("date")
            .and_then(parse_http_date_secs)
            .unwrap_or(cached.received_response_sec as i64);
        return (expires - date).max(0);
    }

    if cached.url.query().is_none() {
        if let Some(last_modified) =
            cached.headers.get("last-modified").and_then(parse_http_date_secs)
        {
            let response_sec = cached
                .headers
                .get("date")
                .and_then(parse_http_date_secs)
                .unwrap_or(cached.sent_request_sec as i64);
            return ((response_sec - last_modified) / 10).max(0);
        }
    }

    0
}

fn warning_code(value: &str) -> Option<u16> {
    value.get(0..3)?.parse().ok()
}

fn add_warning(metadata: &mut CacheMetadata, code: u16, text: &str) {
    metadata.headers.append(
        "warning",
        format!(
            "{code} - \"{text}\" \"{}\"",
            httpdate::fmt_http_date(SystemTime::now())
        ),
    );
}

/// The outcome of consulting the cache before deciding whether to hit the
/// network.
#[derive(Debug, Clone)]
pub struct CacheStrategy {
    /// The request to send over the network, if any network round trip is
    /// needed. `None` means serve from cache or synthesize a 504.
    pub network_request: Option<request::Parts>,
    /// The cached response to fall back to or serve directly, if the cache
    /// had an entry applicable to this request.
    pub cache_response: Option<CacheMetadata>,
}

impl CacheStrategy {
    /// Builds the decision for `request` given an optional cached response
    /// and the current time.
    pub fn new(
        request: &request::Parts,
        cached: Option<&CacheMetadata>,
        now: SystemTime,
    ) -> Self {
        let Some(cached) = cached else {
            let req_cc = CacheControl::parse(&request.headers);
            return if req_cc.only_if_cached {
                CacheStrategy { network_request: None, cache_response: None }
            } else {
                CacheStrategy {
                    network_request: Some(request.clone()),
                    cache_response: None,
                }
            };
        };

        let now_epoch = epoch_secs(now);
        let age = cache_response_age(cached, now_epoch);
        let res_cc = CacheControl::parse(&cached.headers.to_header_map());
        let req_cc = CacheControl::parse(&request.headers);

        let max_age_req = req_cc.max_age.map(|v| v as i64).unwrap_or(i64::MAX);
        let min_fresh = req_cc.min_fresh.unwrap_or(0) as i64;
        let max_stale = if res_cc.must_revalidate {
            0
        } else {
            req_cc.max_stale.map(|v| v.min(i64::MAX as u64) as i64).unwrap_or(0)
        };
        let fresh = freshness_lifetime(cached, &res_cc).min(max_age_req);

        if !res_cc.no_cache && age + min_fresh < fresh + max_stale {
            let mut served = cached.clone();
            if age + min_fresh >= fresh {
                add_warning(&mut served, 110, "Response is stale");
            }
            if age > ONE_DAY_SECS
                && res_cc.max_age.is_none()
                && served.headers.get("expires").is_none()
            {
                add_warning(&mut served, 113, "Heuristic expiration");
            }
            return CacheStrategy {
                network_request: None,
                cache_response: Some(served),
            };
        }

        if req_cc.only_if_cached {
            return CacheStrategy { network_request: None, cache_response: None };
        }

        let mut conditional = request.clone();
        let mut carry = Some(cached.clone());
        if let Some(etag) = cached.headers.get("etag") {
            if let Ok(value) = http::HeaderValue::from_str(etag) {
                conditional.headers.insert(header::IF_NONE_MATCH, value);
            }
        } else if let Some(last_modified) = cached.headers.get("last-modified") {
            if let Ok(value) = http::HeaderValue::from_str(last_modified) {
                conditional.headers.insert(header::IF_MODIFIED_SINCE, value);
            }
        } else if let Some(date) = cached.headers.get("date") {
            if let Ok(value) = http::HeaderValue::from_str(date) {
                conditional.headers.insert(header::IF_MODIFIED_SINCE, value);
            }
        } else {
            carry = None;
        }

        CacheStrategy {
            network_request: Some(conditional),
            cache_response: carry,
        }
    }
}

/// `is_valid_cache_response`: true iff the network response is `304 Not
/// Modified`, or both responses carry a parseable `Last-Modified` and the
/// cached one is strictly newer.
pub fn is_valid_cache_response(
    cached: &CacheMetadata,
    network_status: StatusCode,
    network_headers: &HeaderMap,
) -> bool {
    if network_status == StatusCode::NOT_MODIFIED {
        return true;
    }
    let cached_lm = cached.headers.get("last-modified").and_then(parse_http_date_secs);
    let network_lm = network_headers
        .get(header::LAST_MODIFIED)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_http_date_secs);
    matches!((cached_lm, network_lm), (Some(c), Some(n)) if c > n)
}

/// `is_cacheable`: whether a fresh network response may be stored.
pub fn is_cacheable(
    request_method: &Method,
    request_headers: &HeaderMap,
    response_status: StatusCode,
    response_headers: &HeaderMap,
) -> bool {
    if *request_method != Method::GET {
        return false;
    }

    let status = response_status.as_u16();
    let status_ok = CACHEABLE_UNCONDITIONALLY.contains(&status)
        || (CACHEABLE_WITH_EXPIRATION.contains(&status) && {
            let res_cc = CacheControl::parse(response_headers);
            response_headers.contains_key(header::EXPIRES)
                || res_cc.max_age.is_some()
                || res_cc.public
                || res_cc.private
        });
    if !status_ok {
        return false;
    }

    if CacheControl::parse(request_headers).no_store
        || CacheControl::parse(response_headers).no_store
    {
        return false;
    }

    if request_headers.contains_key(header::AUTHORIZATION) {
        return false;
    }

    let known_length = response_headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<i64>().ok())
        .is_some_and(|len| len >= 0);
    let chunked = response_headers
        .get(header::TRANSFER_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("chunked"));

    known_length || chunked
}

/// `is_invalid_cache_method`: true iff a 2xx response answers a POST,
/// PATCH, PUT or DELETE, meaning any cached GET for the same URL must be
/// invalidated.
pub fn is_invalid_cache_method(
    response_status: StatusCode,
    request_method: &Method,
) -> bool {
    response_status.is_success()
        && matches!(
            *request_method,
            Method::POST | Method::PATCH | Method::PUT | Method::DELETE
        )
}

/// RFC 7234 §4.3.4 header combination after a successful revalidation.
pub fn combine_cache_and_network_headers(
    cached: &HeaderList,
    network: &HeaderMap,
) -> HeaderList {
    let is_hop_by_hop = |name: &str| {
        HOP_BY_HOP_HEADERS.iter().any(|h| h.eq_ignore_ascii_case(name))
    };

    let mut combined = HeaderList::default();
    for (name, value) in &cached.0 {
        if name.eq_ignore_ascii_case("warning") {
            if warning_code(value).is_some_and(|c| (100..200).contains(&c)) {
                continue;
            }
        }
        if name.eq_ignore_ascii_case("content-length") {
            combined.append(name, value.clone());
            continue;
        }
        let end_to_end = !is_hop_by_hop(name);
        let network_has_it = network.get_all(name.as_str()).iter().next().is_some();
        if end_to_end && network_has_it {
            continue;
        }
        combined.append(name, value.clone());
    }

    for (name, value) in network.iter() {
        let name = name.as_str();
        if name.eq_ignore_ascii_case("content-length") || is_hop_by_hop(name) {
            continue;
        }
        combined.append(name, value.to_str().unwrap_or_default().to_string());
    }

    combined
}

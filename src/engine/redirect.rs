//! Redirect retry: a stateless helper the engine calls after each round
//! trip, re-entering with the request this returns and carrying the prior
//! response in the chain.

use http::{header, request, response, Method, StatusCode};
use url::Url;

const REDIRECT_STATUSES: &[StatusCode] = &[
    StatusCode::MOVED_PERMANENTLY,
    StatusCode::FOUND,
    StatusCode::SEE_OTHER,
    StatusCode::TEMPORARY_REDIRECT,
    StatusCode::PERMANENT_REDIRECT,
];

/// Builds the next request in a redirect chain, or `None` if `response`
/// does not call for one. https→http downgrades are never followed; this
/// is a fixed policy, not a configuration knob.
pub fn get_retry_request(
    original_request: &request::Parts,
    original_url: &Url,
    response: &response::Parts,
) -> Option<(request::Parts, Url)> {
    if !REDIRECT_STATUSES.contains(&response.status) {
        return None;
    }
    if original_request.method != Method::GET && original_request.method != Method::HEAD {
        return None;
    }

    let location = response.headers.get(header::LOCATION)?;
    let location = location.to_str().ok()?;
    if location.is_empty() {
        return None;
    }

    let new_url = original_url.join(location).ok()?;

    if original_url.scheme() == "https" && new_url.scheme() == "http" {
        return None;
    }

    let origin_changed = original_url.scheme() != new_url.scheme()
        || original_url.host_str() != new_url.host_str()
        || original_url.port_or_known_default() != new_url.port_or_known_default();

    let uri: http::Uri = new_url.as_str().parse().ok()?;

    let mut builder = http::Request::builder().method(original_request.method.clone()).uri(uri);
    for (name, value) in original_request.headers.iter() {
        if origin_changed && name == header::AUTHORIZATION {
            continue;
        }
        builder = builder.header(name, value);
    }

    let new_request = builder.body(()).ok()?.into_parts().0;
    Some((new_request, new_url))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parts(method: Method, headers: &[(&str, &str)]) -> request::Parts {
        let mut builder = http::Request::builder().method(method).uri("/x");
        for (n, v) in headers {
            builder = builder.header(*n, *v);
        }
        builder.body(()).unwrap().into_parts().0
    }

    fn response_parts(status: StatusCode, location: &str) -> response::Parts {
        http::Response::builder()
            .status(status)
            .header(header::LOCATION, location)
            .body(())
            .unwrap()
            .into_parts()
            .0
    }

    #[test]
    fn follows_same_origin_redirect() {
        let original = parts(Method::GET, &[]);
        let url = Url::parse("https://example.com/a").unwrap();
        let response = response_parts(StatusCode::FOUND, "/b");
        let (next, next_url) = get_retry_request(&original, &url, &response).unwrap();
        assert_eq!(next.method, Method::GET);
        assert_eq!(next_url.as_str(), "https://example.com/b");
    }

    #[test]
    fn refuses_https_to_http_downgrade() {
        let original = parts(Method::GET, &[]);
        let url = Url::parse("https://example.com/a").unwrap();
        let response = response_parts(StatusCode::FOUND, "http://example.com/b");
        assert!(get_retry_request(&original, &url, &response).is_none());
    }

    #[test]
    fn strips_authorization_on_cross_origin_redirect() {
        let original = parts(Method::GET, &[("authorization", "Bearer x")]);
        let url = Url::parse("https://example.com/a").unwrap();
        let response = response_parts(StatusCode::FOUND, "https://other.example.com/b");
        let (next, _) = get_retry_request(&original, &url, &response).unwrap();
        assert!(next.headers.get(header::AUTHORIZATION).is_none());
    }

    #[test]
    fn keeps_authorization_on_same_origin_redirect() {
        let original = parts(Method::GET, &[("authorization", "Bearer x")]);
        let url = Url::parse("https://example.com/a").unwrap();
        let response = response_parts(StatusCode::FOUND, "/b");
        let (next, _) = get_retry_request(&original, &url, &response).unwrap();
        assert_eq!(next.headers.get(header::AUTHORIZATION).unwrap(), "Bearer x");
    }

    #[test]
    fn non_redirect_status_yields_none() {
        let original = parts(Method::GET, &[]);
        let url = Url::parse("https://example.com/a").unwrap();
        let response = response_parts(StatusCode::OK, "/b");
        assert!(get_retry_request(&original, &url, &response).is_none());
    }

    #[test]
    fn post_is_never_redirected() {
        let original = parts(Method::POST, &[]);
        let url = Url::parse("https://example.com/a").unwrap();
        let response = response_parts(StatusCode::FOUND, "/b");
        assert!(get_retry_request(&original, &url, &response).is_none());
    }
}

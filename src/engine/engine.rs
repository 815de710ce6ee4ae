//! HTTP Engine (component H): orchestrates cache lookup, connection
//! acquisition, send/receive with one connection-reuse retry, response
//! classification, and redirect retries.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use http::{request, response, Request, Response, StatusCode};
use log::{debug, warn};
use url::Url;

use super::body::{CacheServedBody, CachingBody, NetworkBody, RequestBody, ResponseBody};
use super::redirect::get_retry_request;
use crate::cache::{self, CacheMetadata, CacheStrategy};
use crate::error::{EngineError, Result};
use crate::pool::{CancelToken, Connection, ConnectionPool, Endpoint};
use crate::store::Cache;

/// Construction knobs for an [`HttpEngine`].
#[derive(Debug, Clone)]
pub struct HttpEngineOptions {
    pub follow_redirects: bool,
    /// The maximum number of redirects to follow before giving up and
    /// returning the redirect response itself.
    pub max_redirects: u32,
}

impl Default for HttpEngineOptions {
    fn default() -> Self {
        HttpEngineOptions { follow_redirects: true, max_redirects: 20 }
    }
}

/// Per-request connection and TLS/proxy parameters the caller supplies
/// alongside the request, since the wire codec and TLS provider are out of
/// scope for this crate.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub proxy: Option<(String, u16)>,
    pub root_ca_dir: Option<String>,
    pub root_ca_file: Option<String>,
    pub timeout: Duration,
}

fn now_sec() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

/// Shared engine configuration: the connection pool, the optional cache,
/// and redirect policy. Create one [`Execution`] per request via
/// [`HttpEngine::new_execution`] or just call [`HttpEngine::execute`].
#[derive(Debug)]
pub struct HttpEngine {
    pool: Arc<ConnectionPool>,
    cache: Option<Arc<dyn Cache>>,
    options: HttpEngineOptions,
}

impl HttpEngine {
    pub fn new(
        pool: Arc<ConnectionPool>,
        cache: Option<Arc<dyn Cache>>,
        options: HttpEngineOptions,
    ) -> Arc<Self> {
        Arc::new(HttpEngine { pool, cache, options })
    }

    /// Runs `request` to completion, following redirects up to
    /// `options.max_redirects` when `options.follow_redirects` is set.
    pub fn execute(
        self: &Arc<Self>,
        request: Request<RequestBody>,
        url: Url,
        context: RequestContext,
    ) -> Result<Response<ResponseBody>> {
        self.new_execution().run(request, url, context)
    }

    /// Creates a handle representing one in-flight request, which can be
    /// cancelled from another thread while `run` blocks on a worker thread.
    pub fn new_execution(self: &Arc<Self>) -> Arc<Execution> {
        Arc::new(Execution {
            engine: self.clone(),
            cancel_token: Mutex::new(None),
            cancelled: AtomicBool::new(false),
        })
    }
}

/// Per-request state: the currently-held connection's cancel handle and a
/// cancelled flag. The mutex guards only the handle, never the connection
/// itself, so an external `cancel()` never blocks on in-flight I/O.
pub struct Execution {
    engine: Arc<HttpEngine>,
    cancel_token: Mutex<Option<CancelToken>>,
    cancelled: AtomicBool,
}

impl Execution {
    /// Cooperative cancellation: marks this execution cancelled and, if a
    /// connection is currently held, sets its cancel flag too.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if let Some(token) = self.cancel_token.lock().unwrap().as_ref() {
            token.cancel();
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn set_current_connection(&self, token: Option<CancelToken>) {
        *self.cancel_token.lock().unwrap() = token;
    }

    /// Runs `request`, following redirects per the engine's options. Each
    /// redirect drops the prior response body and replaces it with an empty
    /// one, since only `GET`/`HEAD` are ever redirected.
    pub fn run(
        &self,
        request: Request<RequestBody>,
        mut url: Url,
        context: RequestContext,
    ) -> Result<Response<ResponseBody>> {
        let (mut req_parts, mut body) = request.into_parts();
        let mut redirects = 0u32;

        loop {
            let response = self.run_once(&req_parts, &mut body, &url, &context)?;
            if !self.engine.options.follow_redirects {
                return Ok(response);
            }

            let (resp_parts, resp_body) = response.into_parts();
            if redirects >= self.engine.options.max_redirects {
                return Ok(Response::from_parts(resp_parts, resp_body));
            }

            match get_retry_request(&req_parts, &url, &resp_parts) {
                Some((next_parts, next_url)) => {
                    drop(resp_body);
                    redirects += 1;
                    debug!("following redirect {redirects} to {next_url}");
                    req_parts = next_parts;
                    body = RequestBody::empty();
                    url = next_url;
                }
                None => return Ok(Response::from_parts(resp_parts, resp_body)),
            }
        }
    }

    /// A single request/response round trip, with no redirect handling.
    fn run_once(
        &self,
        req_parts: &request::Parts,
        body: &mut RequestBody,
        url: &Url,
        context: &RequestContext,
    ) -> Result<Response<ResponseBody>> {
        let key = cache::cache_key(&req_parts.method, url);

        // 1. Pre-flight cache consult.
        let mut outgoing_request = req_parts.clone();
        let mut cache_response: Option<CacheMetadata> = None;

        if let Some(cache) = &self.engine.cache {
            if cache::is_available_to_cache(req_parts) {
                let cached = cache.get_metadata(&key)?;
                let decision = CacheStrategy::new(req_parts, cached.as_ref(), SystemTime::now());

                match decision.network_request {
                    None => match decision.cache_response {
                        Some(served) => {
                            debug!("serving fresh cache hit for {key}");
                            return self.serve_from_cache(cache.clone(), &key, served);
                        }
                        None => {
                            debug!("only-if-cached miss for {key}");
                            return Ok(synthesize_gateway_timeout());
                        }
                    },
                    Some(network_request) => {
                        outgoing_request = network_request;
                        cache_response = decision.cache_response;
                    }
                }
            }
        }

        // 2-4. Network interceptor chain / retry-by-connection wrapper.
        let (resp_parts, reader, connection, keep_alive) =
            self.send_and_receive_with_retry(&outgoing_request, body, url, context)?;

        // 5. Post-receive classification.
        let Some(cache) = self.engine.cache.clone() else {
            let network_body =
                NetworkBody::new(reader, self.engine.pool.clone(), connection, keep_alive);
            return Ok(Response::from_parts(resp_parts, ResponseBody::Network(network_body)));
        };

        if let Some(cached) = cache_response {
            if cache::is_valid_cache_response(&cached, resp_parts.status, &resp_parts.headers) {
                debug!("conditional revalidation hit for {key}");
                drop(NetworkBody::new(reader, self.engine.pool.clone(), connection, keep_alive));
                return self.serve_revalidated(cache, &key, cached, resp_parts);
            }
        }

        if cache::is_cacheable(
            &outgoing_request.method,
            &outgoing_request.headers,
            resp_parts.status,
            &resp_parts.headers,
        ) {
            debug!("caching response for {key}");
            let network_body =
                NetworkBody::new(reader, self.engine.pool.clone(), connection, keep_alive);
            return self.wrap_with_caching_stream(
                cache,
                &key,
                url,
                &outgoing_request,
                resp_parts,
                network_body,
            );
        }

        if cache::is_invalid_cache_method(resp_parts.status, &outgoing_request.method) {
            let get_key = cache::get_cache_key(url);
            debug!("invalidating cache entry for {get_key} after {}", outgoing_request.method);
            if let Err(e) = cache.remove(&get_key) {
                warn!("cache invalidation failed for {get_key}: {e}");
            }
        }

        let network_body =
            NetworkBody::new(reader, self.engine.pool.clone(), connection, keep_alive);
        Ok(Response::from_parts(resp_parts, ResponseBody::Network(network_body)))
    }

    fn serve_from_cache(
        &self,
        cache: Arc<dyn Cache>,
        key: &str,
        served: CacheMetadata,
    ) -> Result<Response<ResponseBody>> {
        let Some(reader) = cache.get_data(key)? else {
            debug!("cache entry for {key} vanished before body open, falling back to miss");
            return Ok(synthesize_gateway_timeout());
        };
        let mut builder = Response::builder().status(served.status);
        for (name, value) in &served.headers.0 {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let response_body = CacheServedBody::new(reader, cache, key.to_string());
        Ok(builder.body(ResponseBody::Cache(response_body)).expect("well-formed cached response"))
    }

    fn serve_revalidated(
        &self,
        cache: Arc<dyn Cache>,
        key: &str,
        mut cached: CacheMetadata,
        network: response::Parts,
    ) -> Result<Response<ResponseBody>> {
        cached.headers = cache::combine_cache_and_network_headers(&cached.headers, &network.headers);
        let now = now_sec();
        cached.sent_request_sec = now;
        cached.received_response_sec = now;
        cached.created_at_sec = now;
        cached.last_accessed_sec = now;
        if let Err(e) = cache.put_metadata(key, cached.clone()) {
            warn!("updating revalidated metadata failed for {key}: {e}");
        }

        let Some(reader) = cache.get_data(key)? else {
            debug!("cache entry for {key} vanished during revalidation");
            return Ok(synthesize_gateway_timeout());
        };
        let mut builder = Response::builder().status(cached.status);
        for (name, value) in &cached.headers.0 {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let response_body = CacheServedBody::new(reader, cache, key.to_string());
        Ok(builder
            .body(ResponseBody::Cache(response_body))
            .expect("well-formed revalidated response"))
    }

    fn wrap_with_caching_stream(
        &self,
        cache: Arc<dyn Cache>,
        key: &str,
        url: &Url,
        req_parts: &request::Parts,
        resp_parts: response::Parts,
        network_body: NetworkBody,
    ) -> Result<Response<ResponseBody>> {
        let expected_len = resp_parts
            .headers
            .get(http::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());

        let (temp_path, temp_file) = match cache.temp_dir().and_then(|dir| new_temp_file(&dir)) {
            Some(pair) => pair,
            None => {
                warn!("no temp directory available, skipping write-through cache for {key}");
                return Ok(Response::from_parts(resp_parts, ResponseBody::Network(network_body)));
            }
        };

        let now = now_sec();
        let metadata = CacheMetadata {
            key: key.to_string(),
            url: url.clone(),
            method: req_parts.method.clone(),
            status: resp_parts.status,
            reason_phrase: None,
            headers: crate::cache::HeaderList::from_header_map(&resp_parts.headers),
            response_body_size: expected_len.unwrap_or(0),
            sent_request_sec: now,
            received_response_sec: now,
            created_at_sec: now,
            last_accessed_sec: now,
        };

        let caching_body = CachingBody::new(
            network_body,
            temp_path,
            temp_file,
            expected_len,
            cache,
            key.to_string(),
            metadata,
        );
        Ok(Response::from_parts(resp_parts, ResponseBody::Caching(caching_body)))
    }

    /// Retry-by-connection wrapper around the send/receive inner step. A
    /// request that fails on a *reused* connection is retried once, on a
    /// freshly created one, provided its body can be reset.
    fn send_and_receive_with_retry(
        &self,
        request: &request::Parts,
        body: &mut RequestBody,
        url: &Url,
        context: &RequestContext,
    ) -> Result<(response::Parts, Box<dyn std::io::Read + Send>, Connection, bool)> {
        let mut force_create = false;
        loop {
            match self.send_and_receive(request, body, url, context, force_create) {
                Ok(outcome) => return Ok(outcome),
                Err((e, connection, was_reused)) => {
                    if let Some(connection) = &connection {
                        self.engine.pool.remove_connection(connection.id());
                    }
                    if self.is_cancelled() || !was_reused || !e.is_execution() {
                        return Err(e);
                    }
                    if !body.reset() {
                        return Err(EngineError::ConnectionRetry);
                    }
                    debug!("retrying request on a fresh connection after reuse failure");
                    force_create = true;
                }
            }
        }
    }

    /// The send/receive inner step.
    #[allow(clippy::type_complexity)]
    fn send_and_receive(
        &self,
        request: &request::Parts,
        body: &mut RequestBody,
        url: &Url,
        context: &RequestContext,
        force_create: bool,
    ) -> std::result::Result<
        (response::Parts, Box<dyn std::io::Read + Send>, Connection, bool),
        (EngineError, Option<Connection>, bool),
    > {
        if self.is_cancelled() {
            return Err((EngineError::Execution("request cancelled".into()), None, false));
        }

        let endpoint = Endpoint::from_url(
            url,
            context.proxy.clone(),
            context.root_ca_dir.clone(),
            context.root_ca_file.clone(),
            context.timeout,
        )
        .ok_or_else(|| {
            (EngineError::Execution("url parse error: invalid endpoint".into()), None, false)
        })?;

        let (mut connection, reused) = self
            .engine
            .pool
            .get_connection(&endpoint, force_create)
            .map_err(|e| (e, None, false))?;

        self.set_current_connection(Some(connection.cancel_token()));

        if self.is_cancelled() {
            return Err((EngineError::Execution("request cancelled".into()), Some(connection), reused));
        }

        let payload = match body.read_all() {
            Ok(p) => p,
            Err(e) => return Err((EngineError::Execution(e.to_string()), Some(connection), reused)),
        };

        if let Err(e) = connection.send_request(request, payload.as_deref()) {
            return Err((e, Some(connection), reused));
        }

        if self.is_cancelled() {
            return Err((EngineError::Execution("request cancelled".into()), Some(connection), reused));
        }

        let (resp_parts, reader) = match connection.receive_response() {
            Ok(pair) => pair,
            Err(e) => return Err((e, Some(connection), reused)),
        };

        let keep_alive = !connection.peer_closing();
        if !keep_alive {
            self.engine.pool.remove_connection(connection.id());
        }

        self.set_current_connection(None);
        Ok((resp_parts, reader, connection, keep_alive))
    }
}

fn synthesize_gateway_timeout() -> Response<ResponseBody> {
    Response::builder()
        .status(StatusCode::GATEWAY_TIMEOUT)
        .body(ResponseBody::Empty)
        .expect("well-formed synthetic response")
}

fn new_temp_file(dir: &std::path::Path) -> Option<(PathBuf, std::fs::File)> {
    let file = tempfile::NamedTempFile::new_in(dir).ok()?;
    let (f, path) = file.keep().ok()?;
    Some((path, f))
}

//! End-to-end scenarios for the HTTP Engine against a scripted transport.

use std::collections::VecDeque;
use std::io::{Cursor, Read};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use http::{request, response, Method, Request};
use url::Url;

use http_cache_engine::cache::HeaderList;
use http_cache_engine::engine::{HttpEngine, HttpEngineOptions, RequestBody, RequestContext};
use http_cache_engine::error::{EngineError, Result};
use http_cache_engine::pool::{ConnectionPool, ConnectionPoolConfig, Endpoint, Session, SessionFactory};
use http_cache_engine::store::{Cache, FileCache, FileCacheConfig, TwoTierCacheManager};
use tempfile::TempDir;

type ScriptedBody = (u16, Vec<(String, String)>, Vec<u8>);

#[derive(Debug)]
struct ScriptedSession {
    responses: Arc<Mutex<VecDeque<ScriptedBody>>>,
    block_before_receive: Option<Arc<(Mutex<bool>, Condvar)>>,
}

impl Session for ScriptedSession {
    fn send_request(&mut self, _request: &request::Parts, _body: Option<&[u8]>) -> Result<()> {
        if let Some(latch) = &self.block_before_receive {
            let (lock, cvar) = &**latch;
            let mut released = lock.lock().unwrap();
            while !*released {
                released = cvar.wait(released).unwrap();
            }
        }
        Ok(())
    }

    fn receive_response(&mut self) -> Result<(response::Parts, Box<dyn Read + Send>)> {
        let (status, headers, body) = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .expect("a scripted response is queued");
        let mut builder = http::Response::builder().status(status);
        for (name, value) in &headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let parts = builder.body(()).unwrap().into_parts().0;
        Ok((parts, Box::new(Cursor::new(body))))
    }

    fn peer_closing(&self) -> bool {
        false
    }
}

#[derive(Debug, Default)]
struct ScriptedFactory {
    responses: Arc<Mutex<VecDeque<ScriptedBody>>>,
    block_before_receive: Option<Arc<(Mutex<bool>, Condvar)>>,
    connections_created: AtomicUsize,
}

impl SessionFactory for ScriptedFactory {
    fn create(&self, _endpoint: &Endpoint, _keep_alive_timeout: Duration) -> Result<Box<dyn Session>> {
        self.connections_created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedSession {
            responses: self.responses.clone(),
            block_before_receive: self.block_before_receive.clone(),
        }))
    }
}

fn now_sec() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

fn engine_with(
    factory: Arc<ScriptedFactory>,
) -> (TempDir, Arc<dyn Cache>, Arc<HttpEngine>) {
    let dir = TempDir::new().unwrap();
    let file_cache =
        Arc::new(FileCache::open(FileCacheConfig { root: dir.path().to_path_buf(), max_size_bytes: 1 << 20 }).unwrap());
    let cache: Arc<dyn Cache> = Arc::new(TwoTierCacheManager::file_only(file_cache));

    let pool = Arc::new(ConnectionPool::new(
        ConnectionPoolConfig { keep_alive_timeout: Duration::from_secs(30), keep_alive_idle_count_max: 10 },
        factory,
    ));

    let engine = HttpEngine::new(pool, Some(cache.clone()), HttpEngineOptions::default());
    (dir, cache, engine)
}

fn seed_cache(cache: &Arc<dyn Cache>, url: &Url, status: u16, headers: &[(&str, &str)], body: &[u8], age_secs: u64) {
    let temp_path = cache.temp_dir().unwrap().join("seed");
    std::fs::write(&temp_path, body).unwrap();

    let mut header_list = HeaderList::default();
    for (name, value) in headers {
        header_list.append(name, value.to_string());
    }

    let then = now_sec() - age_secs;
    let key = http_cache_engine::cache::cache_key(&Method::GET, url);
    let metadata = http_cache_engine::cache::CacheMetadata {
        key: key.clone(),
        url: url.clone(),
        method: Method::GET,
        status: http::StatusCode::from_u16(status).unwrap(),
        reason_phrase: None,
        headers: header_list,
        response_body_size: body.len() as u64,
        sent_request_sec: then,
        received_response_sec: then,
        created_at_sec: then,
        last_accessed_sec: then,
    };
    assert!(cache.put(&key, metadata, &temp_path).unwrap());
}

#[test]
fn fresh_cache_hit_serves_without_network_io() {
    let factory = Arc::new(ScriptedFactory::default());
    let (_dir, cache, engine) = engine_with(factory.clone());
    let url = Url::parse("https://example.com/a").unwrap();
    seed_cache(&cache, &url, 200, &[("cache-control", "max-age=3600")], b"cached body", 30 * 60);

    let request = Request::get(url.as_str()).body(RequestBody::empty()).unwrap();
    let mut response = engine.execute(request, url, RequestContext::default()).unwrap();

    assert_eq!(response.status(), 200);
    let mut body = Vec::new();
    response.body_mut().read_to_end(&mut body).unwrap();
    assert_eq!(body, b"cached body");
    assert_eq!(factory.connections_created.load(Ordering::SeqCst), 0);
}

#[test]
fn conditional_revalidation_304_serves_cached_body_and_refreshes_times() {
    let responses = Arc::new(Mutex::new(VecDeque::from([(304u16, Vec::new(), Vec::new())])));
    let factory = Arc::new(ScriptedFactory { responses, ..Default::default() });
    let (_dir, cache, engine) = engine_with(factory.clone());
    let url = Url::parse("https://example.com/b").unwrap();
    seed_cache(
        &cache,
        &url,
        200,
        &[("cache-control", "max-age=60"), ("last-modified", "Tue, 15 Nov 1994 12:45:26 GMT")],
        b"stale but valid",
        7200,
    );

    let request = Request::get(url.as_str()).body(RequestBody::empty()).unwrap();
    let mut response = engine.execute(request, url.clone(), RequestContext::default()).unwrap();

    assert_eq!(response.status(), 200);
    let mut body = Vec::new();
    response.body_mut().read_to_end(&mut body).unwrap();
    assert_eq!(body, b"stale but valid");
    assert_eq!(factory.connections_created.load(Ordering::SeqCst), 1);

    let key = http_cache_engine::cache::cache_key(&Method::GET, &url);
    let refreshed = cache.get_metadata(&key).unwrap().unwrap();
    let now = now_sec();
    assert!(now - refreshed.sent_request_sec <= 2);
    assert!(now - refreshed.received_response_sec <= 2);
}

#[test]
fn only_if_cached_miss_synthesizes_gateway_timeout() {
    let factory = Arc::new(ScriptedFactory::default());
    let (_dir, _cache, engine) = engine_with(factory.clone());
    let url = Url::parse("https://example.com/missing").unwrap();

    let request = Request::get(url.as_str())
        .header("cache-control", "only-if-cached")
        .body(RequestBody::empty())
        .unwrap();
    let response = engine.execute(request, url, RequestContext::default()).unwrap();

    assert_eq!(response.status(), 504);
    assert_eq!(factory.connections_created.load(Ordering::SeqCst), 0);
}

#[test]
fn cancel_during_send_raises_execution_error_without_retry() {
    let latch = Arc::new((Mutex::new(false), Condvar::new()));
    let factory = Arc::new(ScriptedFactory {
        block_before_receive: Some(latch.clone()),
        ..Default::default()
    });
    let (_dir, _cache, engine) = engine_with(factory.clone());
    let url = Url::parse("https://example.com/slow").unwrap();

    // Pre-populate the pool with an idle, equivalent connection so the
    // upcoming request reuses it.
    let warm_request = Request::get(url.as_str()).body(RequestBody::empty()).unwrap();
    {
        let (lock, cvar) = &*latch;
        *lock.lock().unwrap() = true;
        cvar.notify_all();
    }
    factory.responses.lock().unwrap().push_back((200, Vec::new(), b"warm".to_vec()));
    engine.execute(warm_request, url.clone(), RequestContext::default()).unwrap();
    {
        let (lock, _) = &*latch;
        *lock.lock().unwrap() = false;
    }
    assert_eq!(factory.connections_created.load(Ordering::SeqCst), 1);

    let execution = engine.new_execution();
    let url_for_thread = url.clone();
    let exec_for_thread = execution.clone();
    let handle = std::thread::spawn(move || {
        let request = Request::get(url_for_thread.as_str()).body(RequestBody::empty()).unwrap();
        exec_for_thread.run(request, url_for_thread, RequestContext::default())
    });

    std::thread::sleep(Duration::from_millis(100));
    execution.cancel();
    {
        let (lock, cvar) = &*latch;
        *lock.lock().unwrap() = true;
        cvar.notify_all();
    }

    let result = handle.join().unwrap();
    assert!(matches!(result, Err(EngineError::Execution(_))));
    assert_eq!(factory.connections_created.load(Ordering::SeqCst), 1);
}

#[test]
fn post_invalidates_cached_get() {
    let responses = Arc::new(Mutex::new(VecDeque::from([(201u16, Vec::new(), Vec::new())])));
    let factory = Arc::new(ScriptedFactory { responses, ..Default::default() });
    let (_dir, cache, engine) = engine_with(factory.clone());
    let url = Url::parse("https://example.com/resource").unwrap();
    seed_cache(&cache, &url, 200, &[("cache-control", "max-age=3600")], b"old body", 10);

    let get_key = http_cache_engine::cache::get_cache_key(&url);
    assert!(cache.get_metadata(&get_key).unwrap().is_some());

    let request = Request::builder()
        .method(Method::POST)
        .uri(url.as_str())
        .body(RequestBody::empty())
        .unwrap();
    let response = engine.execute(request, url, RequestContext::default()).unwrap();
    assert_eq!(response.status(), 201);

    assert!(cache.get_metadata(&get_key).unwrap().is_none());
}

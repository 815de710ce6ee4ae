//! Connection (component F): one reusable HTTP session plus its endpoint
//! signature, status and cancel flag.

use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use http::{request, response};

use crate::error::Result;

/// The tuple two connections must agree on to be endpoint-equivalent.
/// `root_ca_dir`/`root_ca_file` only matter under `https`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub proxy: Option<(String, u16)>,
    pub root_ca_dir: Option<String>,
    pub root_ca_file: Option<String>,
    pub timeout: Duration,
}

impl Endpoint {
    /// Parses the (scheme, host, port) portion of `url`; fails (`None`)
    /// for URLs the transport can't connect with (e.g. unparseable host).
    pub fn from_url(
        url: &url::Url,
        proxy: Option<(String, u16)>,
        root_ca_dir: Option<String>,
        root_ca_file: Option<String>,
        timeout: Duration,
    ) -> Option<Self> {
        let scheme = url.scheme().to_string();
        let host = url.host_str()?.to_string();
        let port = url.port_or_known_default()?;
        let (root_ca_dir, root_ca_file) = if scheme == "https" {
            (root_ca_dir, root_ca_file)
        } else {
            (None, None)
        };
        Some(Endpoint { scheme, host, port, proxy, root_ca_dir, root_ca_file, timeout })
    }
}

/// A transport session: the low-level HTTP codec, TLS handshake and wire
/// socket are out of scope here and implemented by the embedding
/// application behind this trait.
pub trait Session: Send + std::fmt::Debug {
    /// Writes the request line, headers, and body (if any) to the wire.
    fn send_request(
        &mut self,
        request: &request::Parts,
        body: Option<&[u8]>,
    ) -> Result<()>;

    /// Reads the response status line and headers, returning a forward-only
    /// reader for the body.
    fn receive_response(
        &mut self,
    ) -> Result<(response::Parts, Box<dyn Read + Send>)>;

    /// True once the most recently received response signalled the server
    /// will not keep this connection alive (e.g. `Connection: close`, or an
    /// HTTP/1.0 response without `Connection: keep-alive`).
    fn peer_closing(&self) -> bool;
}

/// Constructs [`Session`]s for a given endpoint. Supplied by the caller so
/// the pool never depends on a concrete TLS/socket implementation.
pub trait SessionFactory: Send + Sync {
    /// Builds and connects a session for `endpoint`, with a keep-alive hint
    /// strictly greater than `keep_alive_timeout` so the transport never
    /// times out the socket before the pool does.
    fn create(
        &self,
        endpoint: &Endpoint,
        keep_alive_timeout: Duration,
    ) -> Result<Box<dyn Session>>;
}

/// Idle or checked out for the duration of one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Idle,
    InUse,
}

/// A lightweight, cloneable handle to a connection's cancelled flag.
///
/// The engine holds this (not the connection itself) under its own
/// dedicated mutex, so an external `cancel()` call never has to wait on
/// in-flight I/O: setting the flag is enough, since the connection checks
/// it at each send/receive checkpoint.
#[derive(Debug, Clone)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One pooled session. Owned by the pool while idle; moved out to the
/// caller (and back) while in use, so I/O never happens under the pool's
/// lock.
#[derive(Debug)]
pub struct Connection {
    pub(crate) id: u64,
    pub(crate) endpoint: Endpoint,
    pub(crate) session: Box<dyn Session>,
    status: ConnectionStatus,
    cancelled: Arc<AtomicBool>,
}

impl Connection {
    pub(crate) fn new(id: u64, endpoint: Endpoint, session: Box<dyn Session>) -> Self {
        Connection {
            id,
            endpoint,
            session,
            status: ConnectionStatus::InUse,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub(crate) fn set_status(&mut self, status: ConnectionStatus) {
        self.status = status;
    }

    /// Two connections are endpoint-equivalent to `target` iff their
    /// tuples match exactly.
    pub fn is_equivalent_to(&self, target: &Endpoint) -> bool {
        &self.endpoint == target
    }

    /// A handle the engine can use to cancel this connection from another
    /// thread without needing to reacquire ownership of it.
    pub fn cancel_token(&self) -> CancelToken {
        CancelToken(self.cancelled.clone())
    }

    /// Sets the cancelled flag directly. Idempotent; any later I/O on this
    /// connection raises `Execution`.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn send_request(
        &mut self,
        request: &request::Parts,
        body: Option<&[u8]>,
    ) -> Result<()> {
        if self.is_cancelled() {
            return Err(crate::error::EngineError::Execution(
                "connection cancelled".into(),
            ));
        }
        self.session.send_request(request, body)
    }

    pub fn receive_response(&mut self) -> Result<(response::Parts, Box<dyn Read + Send>)> {
        if self.is_cancelled() {
            return Err(crate::error::EngineError::Execution(
                "connection cancelled".into(),
            ));
        }
        self.session.receive_response()
    }

    pub fn peer_closing(&self) -> bool {
        self.session.peer_closing()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    #[derive(Debug, Default)]
    pub struct NullSession {
        pub closing: bool,
    }

    impl Session for NullSession {
        fn send_request(&mut self, _: &request::Parts, _: Option<&[u8]>) -> Result<()> {
            Ok(())
        }

        fn receive_response(&mut self) -> Result<(response::Parts, Box<dyn Read + Send>)> {
            let response = http::Response::builder()
                .status(200)
                .body(())
                .unwrap()
                .into_parts()
                .0;
            Ok((response, Box::new(std::io::empty())))
        }

        fn peer_closing(&self) -> bool {
            self.closing
        }
    }

    #[derive(Debug, Default)]
    pub struct NullSessionFactory;

    impl SessionFactory for NullSessionFactory {
        fn create(&self, _: &Endpoint, _: Duration) -> Result<Box<dyn Session>> {
            Ok(Box::new(NullSession::default()))
        }
    }

    pub fn endpoint(host: &str) -> Endpoint {
        Endpoint {
            scheme: "https".into(),
            host: host.into(),
            port: 443,
            proxy: None,
            root_ca_dir: None,
            root_ca_file: None,
            timeout: Duration::from_secs(30),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn equivalence_requires_full_tuple_match() {
        let a = endpoint("example.com");
        let mut b = endpoint("example.com");
        b.port = 8443;

        let factory = NullSessionFactory;
        let session = factory.create(&a, Duration::from_secs(60)).unwrap();
        let conn = Connection::new(1, a.clone(), session);

        assert!(conn.is_equivalent_to(&a));
        assert!(!conn.is_equivalent_to(&b));
    }

    #[test]
    fn cancel_marks_connection_and_future_io_fails() {
        let ep = endpoint("example.com");
        let factory = NullSessionFactory;
        let session = factory.create(&ep, Duration::from_secs(60)).unwrap();
        let mut conn = Connection::new(1, ep, session);

        conn.cancel();
        assert!(conn.is_cancelled());
        let request = http::Request::builder().body(()).unwrap().into_parts().0;
        assert!(conn.send_request(&request, None).is_err());
    }
}

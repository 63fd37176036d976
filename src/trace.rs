use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use http::StatusCode;

use crate::pool::ConnectionKey;

#[derive(Clone, Debug)]
pub struct DnsInfo {
    pub host: String,
    pub addrs: Vec<SocketAddr>,
    pub error: Option<String>,
}

#[derive(Clone, Debug)]
pub struct ConnectInfo {
    pub addr: SocketAddr,
    pub error: Option<String>,
}

#[derive(Clone, Debug)]
pub struct HandshakeInfo {
    pub host: String,
    pub error: Option<String>,
}

#[derive(Clone, Debug)]
pub struct GotConnInfo {
    pub key: ConnectionKey,
    pub connection_id: u64,
    pub reused: bool,
    pub was_idle: bool,
    pub idle_time: Duration,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IdleRejection {
    ReuseDisabled,
    PerKeyLimit,
    TotalLimit,
    ConnectionClosed,
    BodyNotDrained,
    Tainted,
}

impl fmt::Display for IdleRejection {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::ReuseDisabled => "idle reuse disabled",
            Self::PerKeyLimit => "too many idle connections for key",
            Self::TotalLimit => "too many idle connections",
            Self::ConnectionClosed => "connection closed",
            Self::BodyNotDrained => "response body not drained",
            Self::Tainted => "connection failed mid-exchange",
        };
        formatter.write_str(text)
    }
}

#[derive(Clone, Debug)]
pub struct PutIdleInfo {
    pub key: ConnectionKey,
    pub connection_id: u64,
    pub rejected: Option<IdleRejection>,
}

pub trait TraceSink: Send + Sync {
    fn dns_start(&self, _host: &str) {}

    fn dns_done(&self, _info: &DnsInfo) {}

    fn connect_start(&self, _addr: SocketAddr) {}

    fn connect_done(&self, _info: &ConnectInfo) {}

    fn tls_handshake_start(&self, _host: &str) {}

    fn tls_handshake_done(&self, _info: &HandshakeInfo) {}

    fn got_conn(&self, _info: &GotConnInfo) {}

    fn got_response_headers(&self, _status: StatusCode) {}

    fn put_idle_conn(&self, _info: &PutIdleInfo) {}
}

type Hook<T> = Option<Arc<dyn Fn(&T) + Send + Sync>>;
type HostHook = Option<Arc<dyn Fn(&str) + Send + Sync>>;

#[derive(Clone, Default)]
pub struct ClientTrace {
    dns_start: HostHook,
    dns_done: Hook<DnsInfo>,
    connect_start: Hook<SocketAddr>,
    connect_done: Hook<ConnectInfo>,
    tls_handshake_start: HostHook,
    tls_handshake_done: Hook<HandshakeInfo>,
    got_conn: Hook<GotConnInfo>,
    got_response_headers: Hook<StatusCode>,
    put_idle_conn: Hook<PutIdleInfo>,
}

impl ClientTrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_dns_start(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.dns_start = Some(Arc::new(hook));
        self
    }

    pub fn on_dns_done(mut self, hook: impl Fn(&DnsInfo) + Send + Sync + 'static) -> Self {
        self.dns_done = Some(Arc::new(hook));
        self
    }

    pub fn on_connect_start(mut self, hook: impl Fn(&SocketAddr) + Send + Sync + 'static) -> Self {
        self.connect_start = Some(Arc::new(hook));
        self
    }

    pub fn on_connect_done(mut self, hook: impl Fn(&ConnectInfo) + Send + Sync + 'static) -> Self {
        self.connect_done = Some(Arc::new(hook));
        self
    }

    pub fn on_tls_handshake_start(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.tls_handshake_start = Some(Arc::new(hook));
        self
    }

    pub fn on_tls_handshake_done(
        mut self,
        hook: impl Fn(&HandshakeInfo) + Send + Sync + 'static,
    ) -> Self {
        self.tls_handshake_done = Some(Arc::new(hook));
        self
    }

    pub fn on_got_conn(mut self, hook: impl Fn(&GotConnInfo) + Send + Sync + 'static) -> Self {
        self.got_conn = Some(Arc::new(hook));
        self
    }

    pub fn on_got_response_headers(
        mut self,
        hook: impl Fn(&StatusCode) + Send + Sync + 'static,
    ) -> Self {
        self.got_response_headers = Some(Arc::new(hook));
        self
    }

    pub fn on_put_idle_conn(mut self, hook: impl Fn(&PutIdleInfo) + Send + Sync + 'static) -> Self {
        self.put_idle_conn = Some(Arc::new(hook));
        self
    }
}

impl fmt::Debug for ClientTrace {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ClientTrace")
            .field("dns_start", &self.dns_start.is_some())
            .field("dns_done", &self.dns_done.is_some())
            .field("connect_start", &self.connect_start.is_some())
            .field("connect_done", &self.connect_done.is_some())
            .field("tls_handshake_start", &self.tls_handshake_start.is_some())
            .field("tls_handshake_done", &self.tls_handshake_done.is_some())
            .field("got_conn", &self.got_conn.is_some())
            .field("got_response_headers", &self.got_response_headers.is_some())
            .field("put_idle_conn", &self.put_idle_conn.is_some())
            .finish()
    }
}

impl TraceSink for ClientTrace {
    fn dns_start(&self, host: &str) {
        if let Some(hook) = &self.dns_start {
            hook(host);
        }
    }

    fn dns_done(&self, info: &DnsInfo) {
        if let Some(hook) = &self.dns_done {
            hook(info);
        }
    }

    fn connect_start(&self, addr: SocketAddr) {
        if let Some(hook) = &self.connect_start {
            hook(&addr);
        }
    }

    fn connect_done(&self, info: &ConnectInfo) {
        if let Some(hook) = &self.connect_done {
            hook(info);
        }
    }

    fn tls_handshake_start(&self, host: &str) {
        if let Some(hook) = &self.tls_handshake_start {
            hook(host);
        }
    }

    fn tls_handshake_done(&self, info: &HandshakeInfo) {
        if let Some(hook) = &self.tls_handshake_done {
            hook(info);
        }
    }

    fn got_conn(&self, info: &GotConnInfo) {
        if let Some(hook) = &self.got_conn {
            hook(info);
        }
    }

    fn got_response_headers(&self, status: StatusCode) {
        if let Some(hook) = &self.got_response_headers {
            hook(&status);
        }
    }

    fn put_idle_conn(&self, info: &PutIdleInfo) {
        if let Some(hook) = &self.put_idle_conn {
            hook(info);
        }
    }
}

#[derive(Clone, Default)]
pub(crate) struct Tracers {
    client: Option<Arc<dyn TraceSink>>,
    request: Option<Arc<dyn TraceSink>>,
}

impl Tracers {
    pub(crate) fn new(
        client: Option<Arc<dyn TraceSink>>,
        request: Option<Arc<dyn TraceSink>>,
    ) -> Self {
        Self { client, request }
    }

    pub(crate) fn emit(&self, event: impl Fn(&dyn TraceSink)) {
        if let Some(sink) = &self.client {
            event(sink.as_ref());
        }
        if let Some(sink) = &self.request {
            event(sink.as_ref());
        }
    }
}

use std::sync::Arc;
use std::time::Duration;

use http::{Method, StatusCode, Uri};
use tracing::{Instrument, debug, info_span};

use crate::connect::{Connector, GaiResolver, Resolve, SecureChannel};
use crate::executor::PoolExecutor;
use crate::extensions::{Clock, SystemClock};
use crate::pool::{Pool, PoolConfig, PoolStats};
use crate::redirect::{RedirectDecision, RedirectPolicy};
use crate::request::{Request, RequestBuilder};
use crate::response::Response;
use crate::round_trip::{BoxRoundTrip, Chain, Layer};
use crate::trace::TraceSink;
use crate::util::{redact_uri_for_logs, redirect_method, same_origin, sanitize_headers_for_redirect};

const DEFAULT_CLIENT_NAME: &str = "hopwire";
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

pub struct ClientBuilder {
    client_name: String,
    request_timeout: Option<Duration>,
    connect_timeout: Option<Duration>,
    pool_config: PoolConfig,
    redirect_policy: RedirectPolicy,
    trace: Option<Arc<dyn TraceSink>>,
    resolver: Arc<dyn Resolve>,
    secure_channel: Option<Arc<dyn SecureChannel>>,
    clock: Arc<dyn Clock>,
    chain: Chain,
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self {
            client_name: DEFAULT_CLIENT_NAME.to_owned(),
            request_timeout: None,
            connect_timeout: Some(DEFAULT_CONNECT_TIMEOUT),
            pool_config: PoolConfig::default(),
            redirect_policy: RedirectPolicy::default(),
            trace: None,
            resolver: Arc::new(GaiResolver),
            secure_channel: None,
            clock: Arc::new(SystemClock),
            chain: Chain::new(),
        }
    }

    pub fn client_name(mut self, client_name: impl Into<String>) -> Self {
        self.client_name = client_name.into();
        self
    }

    pub fn request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = Some(request_timeout.max(Duration::from_millis(1)));
        self
    }

    pub fn connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = Some(connect_timeout.max(Duration::from_millis(1)));
        self
    }

    pub fn pool_config(mut self, pool_config: PoolConfig) -> Self {
        self.pool_config = pool_config;
        self
    }

    pub fn pool_max_idle_per_key(mut self, max_idle_per_key: usize) -> Self {
        self.pool_config.max_idle_per_key = max_idle_per_key;
        self
    }

    pub fn pool_max_idle_total(mut self, max_idle_total: usize) -> Self {
        self.pool_config.max_idle_total = max_idle_total;
        self
    }

    pub fn pool_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.pool_config.idle_timeout = idle_timeout;
        self
    }

    pub fn max_drain_bytes(mut self, max_drain_bytes: usize) -> Self {
        self.pool_config.max_drain_bytes = max_drain_bytes;
        self
    }

    pub fn redirect_policy(mut self, redirect_policy: RedirectPolicy) -> Self {
        self.redirect_policy = redirect_policy;
        self
    }

    pub fn trace(mut self, trace: impl TraceSink + 'static) -> Self {
        self.trace = Some(Arc::new(trace));
        self
    }

    pub fn resolver(mut self, resolver: impl Resolve + 'static) -> Self {
        self.resolver = Arc::new(resolver);
        self
    }

    pub fn secure_channel(mut self, secure_channel: impl SecureChannel + 'static) -> Self {
        self.secure_channel = Some(Arc::new(secure_channel));
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn layer(mut self, layer: impl Layer + 'static) -> Self {
        self.chain = self.chain.layer(layer);
        self
    }

    pub fn build(self) -> Client {
        let pool = Pool::new(self.pool_config, self.clock);
        let connector = Connector::new(self.resolver, self.secure_channel, self.connect_timeout);
        let executor = PoolExecutor::new(pool, connector, self.trace);
        let chain = self.chain.wrap(executor.clone());
        Client {
            inner: Arc::new(ClientInner {
                chain,
                executor,
                redirect_policy: self.redirect_policy,
                request_timeout: self.request_timeout,
                client_name: self.client_name,
            }),
        }
    }
}

struct ClientInner {
    chain: BoxRoundTrip,
    executor: PoolExecutor,
    redirect_policy: RedirectPolicy,
    request_timeout: Option<Duration>,
    client_name: String,
}

#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

impl Client {
    pub fn new() -> Self {
        ClientBuilder::new().build()
    }

    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    pub fn request(&self, method: Method, target: impl Into<String>) -> RequestBuilder<'_> {
        RequestBuilder::new(self, method, target.into())
    }

    pub fn get(&self, target: impl Into<String>) -> RequestBuilder<'_> {
        self.request(Method::GET, target)
    }

    pub fn post(&self, target: impl Into<String>) -> RequestBuilder<'_> {
        self.request(Method::POST, target)
    }

    pub fn put(&self, target: impl Into<String>) -> RequestBuilder<'_> {
        self.request(Method::PUT, target)
    }

    pub fn patch(&self, target: impl Into<String>) -> RequestBuilder<'_> {
        self.request(Method::PATCH, target)
    }

    pub fn delete(&self, target: impl Into<String>) -> RequestBuilder<'_> {
        self.request(Method::DELETE, target)
    }

    pub async fn issue(&self, request: &Request, timeout: Duration) -> crate::Result<Response> {
        let deadline = request.deadline().child(timeout);
        let request = request.clone().with_deadline(deadline);
        self.execute(request).await
    }

    pub async fn send(&self, request: &Request) -> crate::Result<Response> {
        match self.inner.request_timeout {
            Some(timeout) => self.issue(request, timeout).await,
            None => self.execute(request.clone()).await,
        }
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.inner.executor.pool_stats()
    }

    pub fn close_idle_connections(&self) -> usize {
        self.inner.executor.close_idle_connections()
    }

    async fn execute(&self, request: Request) -> crate::Result<Response> {
        let span = info_span!(
            "hopwire.request",
            client = %self.inner.client_name,
            method = %request.method(),
            uri = %redact_uri_for_logs(&request.uri().to_string()),
        );
        self.follow_redirects(request).instrument(span).await
    }

    async fn follow_redirects(&self, request: Request) -> crate::Result<Response> {
        let policy = &self.inner.redirect_policy;
        let mut current = request;
        let mut history: Vec<Uri> = Vec::new();
        loop {
            history.push(current.uri().clone());
            let response = self.inner.chain.round_trip(&current).await?;
            let status = response.status();
            let decision =
                match policy.evaluate(status, response.headers(), current.method(), &history) {
                    Ok(decision) => decision,
                    Err(error) => {
                        response.release().await;
                        return Err(error);
                    }
                };
            let next = match decision {
                RedirectDecision::Stop(_) => return Ok(response),
                RedirectDecision::FollowTo(next) => next,
            };

            response.release().await;
            debug!(
                status = status.as_u16(),
                hop = history.len(),
                next = %redact_uri_for_logs(&next.to_string()),
                "following redirect"
            );
            current = redirected_request(&current, status, next);
        }
    }
}

fn redirected_request(previous: &Request, status: StatusCode, next: Uri) -> Request {
    let next_method = redirect_method(previous.method(), status);
    let method_changed_to_get = next_method == Method::GET && previous.method() != Method::GET;
    let same_origin_redirect = same_origin(previous.uri(), &next);

    let mut request = previous.clone();
    sanitize_headers_for_redirect(
        request.headers_mut(),
        method_changed_to_get,
        same_origin_redirect,
    );
    if method_changed_to_get {
        request.set_body(None);
    }
    request.set_method(next_method);
    request.set_uri(next);
    request
}

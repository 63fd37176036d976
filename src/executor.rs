use std::sync::Arc;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use http::header::{HOST, HeaderValue};
use http::uri::PathAndQuery;
use http::{Method, Uri, Version};
use http_body_util::Full;
use tracing::debug;

use crate::connect::{Connection, Connector};
use crate::error::{Error, TimeoutPhase};
use crate::pool::{ConnectionKey, IdleCheckout, Pool, PoolStats, PooledConnection};
use crate::request::Request;
use crate::response::{Response, ResponseBody};
use crate::round_trip::RoundTrip;
use crate::trace::{GotConnInfo, TraceSink, Tracers};
use crate::util::redact_uri_for_logs;

#[derive(Clone)]
pub struct PoolExecutor {
    pool: Pool,
    connector: Connector,
    trace: Option<Arc<dyn TraceSink>>,
}

struct Acquired {
    connection: Connection,
    reused: bool,
}

struct ExchangeFailure {
    error: Error,
    stale: bool,
}

impl PoolExecutor {
    pub(crate) fn new(
        pool: Pool,
        connector: Connector,
        trace: Option<Arc<dyn TraceSink>>,
    ) -> Self {
        Self {
            pool,
            connector,
            trace,
        }
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub fn close_idle_connections(&self) -> usize {
        self.pool.clear()
    }

    async fn execute(&self, request: &Request) -> crate::Result<Response> {
        let uri_text = redact_uri_for_logs(&request.uri().to_string());
        let key = ConnectionKey::from_uri(request.uri()).ok_or_else(|| Error::InvalidUri {
            uri: uri_text.clone(),
        })?;
        let tracers = Tracers::new(self.trace.clone(), request.trace().cloned());

        let mut allow_idle = true;
        loop {
            let wire = wire_request(request, &uri_text)?;
            let acquired = self
                .acquire(&key, request, &uri_text, &tracers, allow_idle)
                .await?;
            let reused = acquired.reused;
            match self
                .exchange(acquired.connection, wire, request, &uri_text, &tracers)
                .await
            {
                Ok(response) => return Ok(response),
                Err(failure)
                    if failure.stale
                        && reused
                        && allow_idle
                        && is_idempotent(request.method()) =>
                {
                    debug!(
                        key = %key,
                        error = %failure.error,
                        "reused connection was stale; retrying on a new connection"
                    );
                    allow_idle = false;
                }
                Err(failure) => return Err(failure.error),
            }
        }
    }

    async fn acquire(
        &self,
        key: &ConnectionKey,
        request: &Request,
        uri_text: &str,
        tracers: &Tracers,
        allow_idle: bool,
    ) -> crate::Result<Acquired> {
        let deadline = request.deadline();
        let method = request.method();
        deadline.check(TimeoutPhase::Acquire, method, uri_text)?;

        while allow_idle {
            let Some(IdleCheckout {
                mut connection,
                idle_time,
            }) = self.pool.checkout(key)
            else {
                break;
            };
            let ready = deadline
                .run(TimeoutPhase::Acquire, method, uri_text, connection.ready())
                .await;
            match ready {
                Ok(Ok(())) => {
                    self.pool.record_reused();
                    debug!(key = %key, id = connection.id(), ?idle_time, "reusing idle connection");
                    let info = GotConnInfo {
                        key: key.clone(),
                        connection_id: connection.id(),
                        reused: true,
                        was_idle: true,
                        idle_time,
                    };
                    tracers.emit(|sink| sink.got_conn(&info));
                    return Ok(Acquired {
                        connection,
                        reused: true,
                    });
                }
                Ok(Err(error)) => {
                    debug!(
                        key = %key,
                        id = connection.id(),
                        error = %error,
                        "idle connection unusable"
                    );
                    self.pool.discard(connection);
                }
                Err(error) => {
                    self.pool.discard(connection);
                    return Err(error);
                }
            }
        }

        let connection = self
            .connector
            .connect(key, method, uri_text, deadline, tracers)
            .await?;
        self.pool.record_created();
        let info = GotConnInfo {
            key: key.clone(),
            connection_id: connection.id(),
            reused: false,
            was_idle: false,
            idle_time: std::time::Duration::ZERO,
        };
        tracers.emit(|sink| sink.got_conn(&info));
        Ok(Acquired {
            connection,
            reused: false,
        })
    }

    async fn exchange(
        &self,
        mut connection: Connection,
        wire: http::Request<Full<Bytes>>,
        request: &Request,
        uri_text: &str,
        tracers: &Tracers,
    ) -> Result<Response, ExchangeFailure> {
        let method = request.method();
        let deadline = request.deadline();
        let sent = deadline
            .run(
                TimeoutPhase::ResponseHeaders,
                method,
                uri_text,
                connection.send(wire),
            )
            .await;
        let response = match sent {
            Ok(Ok(response)) => response,
            Ok(Err(source)) => {
                let stale =
                    source.is_canceled() || source.is_incomplete_message() || source.is_closed();
                self.pool.discard(connection);
                return Err(ExchangeFailure {
                    error: Error::Protocol {
                        method: method.clone(),
                        uri: uri_text.to_owned(),
                        source: Box::new(source),
                    },
                    stale,
                });
            }
            Err(error) => {
                self.pool.discard(connection);
                return Err(ExchangeFailure {
                    error,
                    stale: false,
                });
            }
        };

        let status = response.status();
        tracers.emit(|sink| sink.got_response_headers(status));
        let (parts, incoming) = response.into_parts();
        let pooled = PooledConnection::new(connection, self.pool.clone(), tracers.clone());
        let body = ResponseBody::wire(
            incoming,
            pooled,
            deadline.clone(),
            method.clone(),
            uri_text.to_owned(),
            self.pool.config().max_drain_bytes,
        );
        Ok(Response::from_wire(
            status,
            parts.version,
            parts.headers,
            request.uri().clone(),
            body,
        ))
    }
}

impl RoundTrip for PoolExecutor {
    fn round_trip<'a>(&'a self, request: &'a Request) -> BoxFuture<'a, crate::Result<Response>> {
        Box::pin(self.execute(request))
    }
}

fn is_idempotent(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::OPTIONS | Method::TRACE | Method::PUT | Method::DELETE
    )
}

fn wire_request(request: &Request, uri_text: &str) -> crate::Result<http::Request<Full<Bytes>>> {
    let invalid = || Error::InvalidUri {
        uri: uri_text.to_owned(),
    };
    let uri = request.uri();
    let path = uri.path_and_query().map_or("/", PathAndQuery::as_str);
    let target: Uri = path.parse().map_err(|_| invalid())?;

    let mut headers = request.headers().clone();
    if !headers.contains_key(HOST) {
        let host = uri.host().ok_or_else(invalid)?;
        let authority = match uri.port_u16() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_owned(),
        };
        let value = HeaderValue::from_str(&authority).map_err(|_| invalid())?;
        headers.insert(HOST, value);
    }

    let version = match request.version() {
        Version::HTTP_10 => Version::HTTP_10,
        _ => Version::HTTP_11,
    };
    let body = request.body().cloned().unwrap_or_default();
    let mut wire = http::Request::new(Full::new(body));
    *wire.method_mut() = request.method().clone();
    *wire.uri_mut() = target;
    *wire.version_mut() = version;
    *wire.headers_mut() = headers;
    Ok(wire)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_request_uses_origin_form_and_sets_host() {
        let request = Request::parse(Method::GET, "http://example.test:8080/a/b?c=d")
            .expect("valid uri");
        let wire = wire_request(&request, "http://example.test:8080/a/b").expect("wire request");
        assert_eq!(wire.uri(), "/a/b?c=d");
        assert_eq!(wire.headers()[HOST], "example.test:8080");
        assert_eq!(wire.version(), Version::HTTP_11);
    }

    #[test]
    fn wire_request_keeps_explicit_host_header() {
        let request = Request::parse(Method::GET, "http://example.test/")
            .expect("valid uri")
            .with_header(HOST, HeaderValue::from_static("override.test"));
        let wire = wire_request(&request, "http://example.test/").expect("wire request");
        assert_eq!(wire.headers().get_all(HOST).iter().count(), 1);
        assert_eq!(wire.headers()[HOST], "override.test");
    }

    #[test]
    fn only_safe_methods_are_retried_on_stale_connections() {
        assert!(is_idempotent(&Method::GET));
        assert!(is_idempotent(&Method::PUT));
        assert!(!is_idempotent(&Method::POST));
        assert!(!is_idempotent(&Method::PATCH));
    }
}

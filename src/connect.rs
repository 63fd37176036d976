use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use http::Method;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::client::conn::http1::{self, SendRequest};
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::task::AbortHandle;
use tracing::debug;

use crate::deadline::Deadline;
use crate::error::{BoxError, ConnectPhase, Error, TimeoutPhase};
use crate::pool::ConnectionKey;
use crate::trace::{ConnectInfo, DnsInfo, HandshakeInfo, Tracers};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

pub trait Io: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Io for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

pub type BoxedIo = Box<dyn Io>;

pub trait Resolve: Send + Sync {
    fn resolve<'a>(&'a self, host: &'a str, port: u16)
    -> BoxFuture<'a, io::Result<Vec<SocketAddr>>>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct GaiResolver;

impl Resolve for GaiResolver {
    fn resolve<'a>(
        &'a self,
        host: &'a str,
        port: u16,
    ) -> BoxFuture<'a, io::Result<Vec<SocketAddr>>> {
        Box::pin(async move {
            let addrs = tokio::net::lookup_host((host, port)).await?;
            Ok(addrs.collect())
        })
    }
}

pub trait SecureChannel: Send + Sync {
    fn handshake<'a>(
        &'a self,
        host: &'a str,
        stream: TcpStream,
    ) -> BoxFuture<'a, io::Result<BoxedIo>>;
}

pub(crate) struct Connection {
    id: u64,
    key: ConnectionKey,
    sender: SendRequest<Full<Bytes>>,
    driver: AbortHandle,
}

impl Connection {
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn key(&self) -> &ConnectionKey {
        &self.key
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    pub(crate) async fn ready(&mut self) -> hyper::Result<()> {
        self.sender.ready().await
    }

    pub(crate) async fn send(
        &mut self,
        request: http::Request<Full<Bytes>>,
    ) -> hyper::Result<http::Response<Incoming>> {
        self.sender.send_request(request).await
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

pub(crate) async fn establish<I>(key: ConnectionKey, io: I) -> hyper::Result<Connection>
where
    I: Io,
{
    let (sender, driver) = http1::handshake::<_, Full<Bytes>>(TokioIo::new(io)).await?;
    let id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
    let task = tokio::spawn(async move {
        if let Err(error) = driver.await {
            debug!(id, error = %error, "connection driver exited with error");
        }
    });
    Ok(Connection {
        id,
        key,
        sender,
        driver: task.abort_handle(),
    })
}

#[derive(Clone)]
pub(crate) struct Connector {
    resolver: Arc<dyn Resolve>,
    secure_channel: Option<Arc<dyn SecureChannel>>,
    connect_timeout: Option<Duration>,
}

impl Connector {
    pub(crate) fn new(
        resolver: Arc<dyn Resolve>,
        secure_channel: Option<Arc<dyn SecureChannel>>,
        connect_timeout: Option<Duration>,
    ) -> Self {
        Self {
            resolver,
            secure_channel,
            connect_timeout,
        }
    }

    pub(crate) async fn connect(
        &self,
        key: &ConnectionKey,
        method: &Method,
        uri_text: &str,
        deadline: &Deadline,
        tracers: &Tracers,
    ) -> crate::Result<Connection> {
        let scoped;
        let deadline = match self.connect_timeout {
            Some(timeout) => {
                scoped = deadline.child(timeout);
                &scoped
            }
            None => deadline,
        };
        let step = Step {
            method,
            uri_text,
            deadline,
        };

        let addrs = self.resolve(key, &step, tracers).await?;
        let stream = self.connect_tcp(&addrs, &step, tracers).await?;
        let io = self.secure(key, stream, &step, tracers).await?;

        let connection = step
            .run(TimeoutPhase::Handshake, establish(key.clone(), io))
            .await?
            .map_err(|source| step.connect_error(ConnectPhase::Handshake, source))?;
        debug!(key = %key, id = connection.id(), "established new connection");
        Ok(connection)
    }

    async fn resolve(
        &self,
        key: &ConnectionKey,
        step: &Step<'_>,
        tracers: &Tracers,
    ) -> crate::Result<Vec<SocketAddr>> {
        let host = key.host();
        tracers.emit(|sink| sink.dns_start(host));
        let lookup_host = host.trim_start_matches('[').trim_end_matches(']');
        let resolved = step
            .run(
                TimeoutPhase::Resolve,
                self.resolver.resolve(lookup_host, key.port()),
            )
            .await?;
        let result = match resolved {
            Ok(addrs) if addrs.is_empty() => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no addresses found for {host}"),
            )),
            other => other,
        };
        let info = DnsInfo {
            host: host.to_owned(),
            addrs: result.as_ref().ok().cloned().unwrap_or_default(),
            error: result.as_ref().err().map(ToString::to_string),
        };
        tracers.emit(|sink| sink.dns_done(&info));
        result.map_err(|source| step.connect_error(ConnectPhase::Resolve, source))
    }

    async fn connect_tcp(
        &self,
        addrs: &[SocketAddr],
        step: &Step<'_>,
        tracers: &Tracers,
    ) -> crate::Result<TcpStream> {
        let mut last_error = None;
        for &addr in addrs {
            tracers.emit(|sink| sink.connect_start(addr));
            let attempt = step
                .run(TimeoutPhase::Connect, TcpStream::connect(addr))
                .await?;
            let info = ConnectInfo {
                addr,
                error: attempt.as_ref().err().map(ToString::to_string),
            };
            tracers.emit(|sink| sink.connect_done(&info));
            match attempt {
                Ok(stream) => {
                    if let Err(error) = stream.set_nodelay(true) {
                        debug!(addr = %addr, error = %error, "failed to set TCP_NODELAY");
                    }
                    return Ok(stream);
                }
                Err(error) => {
                    debug!(addr = %addr, error = %error, "tcp connect attempt failed");
                    last_error = Some(error);
                }
            }
        }
        let source = last_error.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "no addresses to connect to")
        });
        Err(step.connect_error(ConnectPhase::Connect, source))
    }

    async fn secure(
        &self,
        key: &ConnectionKey,
        stream: TcpStream,
        step: &Step<'_>,
        tracers: &Tracers,
    ) -> crate::Result<BoxedIo> {
        if key.scheme() != "https" {
            return Ok(Box::new(stream));
        }
        let host = key.host();
        tracers.emit(|sink| sink.tls_handshake_start(host));
        let result = match &self.secure_channel {
            Some(channel) => {
                step.run(TimeoutPhase::Handshake, channel.handshake(host, stream))
                    .await?
            }
            None => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "https target but no secure channel is configured",
            )),
        };
        let info = HandshakeInfo {
            host: host.to_owned(),
            error: result.as_ref().err().map(ToString::to_string),
        };
        tracers.emit(|sink| sink.tls_handshake_done(&info));
        result.map_err(|source| step.connect_error(ConnectPhase::Handshake, source))
    }
}

struct Step<'a> {
    method: &'a Method,
    uri_text: &'a str,
    deadline: &'a Deadline,
}

impl Step<'_> {
    async fn run<F>(&self, phase: TimeoutPhase, future: F) -> crate::Result<F::Output>
    where
        F: std::future::Future,
    {
        self.deadline
            .run(phase, self.method, self.uri_text, future)
            .await
    }

    fn connect_error(&self, phase: ConnectPhase, source: impl Into<BoxError>) -> Error {
        Error::Connect {
            phase,
            uri: self.uri_text.to_owned(),
            source: source.into(),
        }
    }
}

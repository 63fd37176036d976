use std::time::Instant;

use futures_util::future::BoxFuture;
use http::header::{HeaderName, HeaderValue};
use http::HeaderMap;
use tracing::{info, warn};

use crate::request::Request;
use crate::response::Response;
use crate::round_trip::{BoxRoundTrip, Layer, RoundTrip};
use crate::util::{parse_header_name, parse_header_value, redact_uri_for_logs};

pub struct HeaderInjection {
    headers: HeaderMap,
    inner: BoxRoundTrip,
}

impl HeaderInjection {
    pub fn new(headers: HeaderMap, inner: BoxRoundTrip) -> Self {
        Self { headers, inner }
    }
}

impl RoundTrip for HeaderInjection {
    fn round_trip<'a>(&'a self, request: &'a Request) -> BoxFuture<'a, crate::Result<Response>> {
        Box::pin(async move {
            if self.headers.is_empty() {
                return self.inner.round_trip(request).await;
            }
            let mut request = request.clone();
            let target = request.headers_mut();
            for (name, value) in &self.headers {
                target.append(name.clone(), value.clone());
            }
            self.inner.round_trip(&request).await
        })
    }
}

#[derive(Clone, Debug, Default)]
pub struct HeaderInjectionLayer {
    headers: HeaderMap,
}

impl HeaderInjectionLayer {
    pub fn new(headers: HeaderMap) -> Self {
        Self { headers }
    }

    pub fn try_from_pairs<I, K, V>(pairs: I) -> crate::Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            let name = parse_header_name(name.as_ref())?;
            let value = parse_header_value(name.as_str(), value.as_ref())?;
            headers.append(name, value);
        }
        Ok(Self { headers })
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }
}

impl Layer for HeaderInjectionLayer {
    fn layer(&self, inner: BoxRoundTrip) -> BoxRoundTrip {
        Box::new(HeaderInjection::new(self.headers.clone(), inner))
    }
}

pub struct Logging {
    inner: BoxRoundTrip,
}

impl Logging {
    pub fn new(inner: BoxRoundTrip) -> Self {
        Self { inner }
    }
}

impl RoundTrip for Logging {
    fn round_trip<'a>(&'a self, request: &'a Request) -> BoxFuture<'a, crate::Result<Response>> {
        Box::pin(async move {
            let method = request.method();
            let uri = redact_uri_for_logs(&request.uri().to_string());
            info!(
                method = %method,
                uri = %uri,
                version = ?request.version(),
                "sending http request"
            );

            let started = Instant::now();
            let result = self.inner.round_trip(request).await;
            let elapsed_ms = started.elapsed().as_millis() as u64;
            match &result {
                Ok(response) => info!(
                    method = %method,
                    uri = %uri,
                    status = response.status().as_u16(),
                    version = ?response.version(),
                    elapsed_ms,
                    "received http response"
                ),
                Err(error) => warn!(
                    method = %method,
                    uri = %uri,
                    error_kind = error.kind().as_str(),
                    error = %error,
                    elapsed_ms,
                    "http request failed"
                ),
            }
            result
        })
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct LoggingLayer;

impl LoggingLayer {
    pub fn new() -> Self {
        Self
    }
}

impl Layer for LoggingLayer {
    fn layer(&self, inner: BoxRoundTrip) -> BoxRoundTrip {
        Box::new(Logging::new(inner))
    }
}

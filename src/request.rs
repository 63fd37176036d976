use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderName, HeaderValue};
use http::{HeaderMap, Method, Uri, Version};
use serde::Serialize;

use crate::client::Client;
use crate::deadline::Deadline;
use crate::error::Error;
use crate::response::Response;
use crate::trace::TraceSink;
use crate::util::{parse_header_name, parse_header_value, parse_target};

#[derive(Clone)]
pub struct Request {
    method: Method,
    uri: Uri,
    version: Version,
    headers: HeaderMap,
    body: Option<Bytes>,
    deadline: Deadline,
    trace: Option<Arc<dyn TraceSink>>,
}

impl Request {
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            method,
            uri,
            version: Version::HTTP_11,
            headers: HeaderMap::new(),
            body: None,
            deadline: Deadline::none(),
            trace: None,
        }
    }

    pub fn parse(method: Method, target: &str) -> crate::Result<Self> {
        Ok(Self::new(method, parse_target(target)?))
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    pub fn deadline(&self) -> &Deadline {
        &self.deadline
    }

    pub fn trace(&self) -> Option<&Arc<dyn TraceSink>> {
        self.trace.as_ref()
    }

    pub fn set_method(&mut self, method: Method) {
        self.method = method;
    }

    pub fn set_uri(&mut self, uri: Uri) {
        self.uri = uri;
    }

    pub fn set_body(&mut self, body: Option<Bytes>) {
        self.body = body;
    }

    pub fn set_deadline(&mut self, deadline: Deadline) {
        self.deadline = deadline;
    }

    pub fn with_version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_trace(mut self, trace: impl TraceSink + 'static) -> Self {
        self.trace = Some(Arc::new(trace));
        self
    }

    pub(crate) fn with_shared_trace(mut self, trace: Option<Arc<dyn TraceSink>>) -> Self {
        self.trace = trace;
        self
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Request")
            .field("method", &self.method)
            .field("uri", &self.uri)
            .field("version", &self.version)
            .field("headers", &self.headers)
            .field("body_len", &self.body.as_ref().map(Bytes::len))
            .field("deadline", &self.deadline)
            .field("trace", &self.trace.is_some())
            .finish()
    }
}

pub struct RequestBuilder<'a> {
    client: &'a Client,
    method: Method,
    target: String,
    headers: HeaderMap,
    body: Option<Bytes>,
    timeout: Option<Duration>,
    deadline: Option<Deadline>,
    trace: Option<Arc<dyn TraceSink>>,
}

impl<'a> RequestBuilder<'a> {
    pub(crate) fn new(client: &'a Client, method: Method, target: String) -> Self {
        Self {
            client,
            method,
            target,
            headers: HeaderMap::new(),
            body: None,
            timeout: None,
            deadline: None,
            trace: None,
        }
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn try_header(self, name: &str, value: &str) -> crate::Result<Self> {
        let name = parse_header_name(name)?;
        let value = parse_header_value(name.as_str(), value)?;
        Ok(self.header(name, value))
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn json<T>(mut self, payload: &T) -> crate::Result<Self>
    where
        T: Serialize + ?Sized,
    {
        let body = serde_json::to_vec(payload).map_err(|source| Error::Serialize { source })?;
        self.body = Some(Bytes::from(body));
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(self)
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout.max(Duration::from_millis(1)));
        self
    }

    pub fn deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn trace(mut self, trace: impl TraceSink + 'static) -> Self {
        self.trace = Some(Arc::new(trace));
        self
    }

    pub fn build(self) -> crate::Result<Request> {
        let mut request = Request::parse(self.method, &self.target)?
            .with_shared_trace(self.trace);
        request.headers = self.headers;
        request.body = self.body;
        if let Some(deadline) = self.deadline {
            request.deadline = deadline;
        }
        Ok(request)
    }

    pub async fn send(self) -> crate::Result<Response> {
        let client = self.client;
        let timeout = self.timeout;
        let request = self.build()?;
        match timeout {
            Some(timeout) => client.issue(&request, timeout).await,
            None => client.send(&request).await,
        }
    }
}

use std::fmt;

use bytes::{Bytes, BytesMut};
use http::{HeaderMap, Method, StatusCode, Uri, Version};
use http_body_util::BodyExt;
use hyper::body::{Body, Incoming};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::deadline::Deadline;
use crate::error::{Error, TimeoutPhase};
use crate::pool::PooledConnection;
use crate::trace::IdleRejection;
use crate::util::truncate_body;

pub struct Response {
    status: StatusCode,
    version: Version,
    headers: HeaderMap,
    uri: Uri,
    body: ResponseBody,
}

impl Response {
    pub fn new(status: StatusCode, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            version: Version::HTTP_11,
            headers,
            uri: Uri::default(),
            body: ResponseBody::buffered(body.into()),
        }
    }

    pub(crate) fn from_wire(
        status: StatusCode,
        version: Version,
        headers: HeaderMap,
        uri: Uri,
        body: ResponseBody,
    ) -> Self {
        Self {
            status,
            version,
            headers,
            uri,
            body,
        }
    }

    pub fn with_uri(mut self, uri: Uri) -> Self {
        self.uri = uri;
        self
    }

    pub fn with_version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
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

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn body_mut(&mut self) -> &mut ResponseBody {
        &mut self.body
    }

    pub fn into_body(self) -> ResponseBody {
        self.body
    }

    pub async fn bytes(self) -> crate::Result<Bytes> {
        self.body.bytes().await
    }

    pub async fn text(self) -> crate::Result<String> {
        let body = self.body.bytes().await?;
        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    pub async fn json<T>(self) -> crate::Result<T>
    where
        T: DeserializeOwned,
    {
        let body = self.body.bytes().await?;
        serde_json::from_slice(&body).map_err(|source| Error::Deserialize {
            source,
            body: truncate_body(&body),
        })
    }

    pub async fn release(self) {
        self.body.release().await;
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Response")
            .field("status", &self.status)
            .field("version", &self.version)
            .field("headers", &self.headers)
            .field("uri", &self.uri)
            .field("body", &self.body)
            .finish()
    }
}

enum BodyState {
    Buffered(Bytes),
    Wire {
        incoming: Incoming,
        connection: PooledConnection,
    },
    Done,
}

pub struct ResponseBody {
    state: BodyState,
    deadline: Deadline,
    method: Method,
    uri_text: String,
    max_drain_bytes: usize,
}

impl ResponseBody {
    fn buffered(bytes: Bytes) -> Self {
        Self {
            state: BodyState::Buffered(bytes),
            deadline: Deadline::none(),
            method: Method::GET,
            uri_text: String::new(),
            max_drain_bytes: 0,
        }
    }

    pub(crate) fn wire(
        incoming: Incoming,
        connection: PooledConnection,
        deadline: Deadline,
        method: Method,
        uri_text: String,
        max_drain_bytes: usize,
    ) -> Self {
        let mut body = Self {
            state: BodyState::Wire {
                incoming,
                connection,
            },
            deadline,
            method,
            uri_text,
            max_drain_bytes,
        };
        body.finish_if_ended();
        body
    }

    pub async fn chunk(&mut self) -> crate::Result<Option<Bytes>> {
        loop {
            match &mut self.state {
                BodyState::Done => return Ok(None),
                BodyState::Buffered(bytes) => {
                    let bytes = std::mem::take(bytes);
                    self.state = BodyState::Done;
                    return Ok(Some(bytes).filter(|bytes| !bytes.is_empty()));
                }
                BodyState::Wire { .. } => {}
            }

            let Self {
                state,
                deadline,
                method,
                uri_text,
                ..
            } = self;
            let BodyState::Wire { incoming, .. } = state else {
                return Ok(None);
            };

            let frame = match deadline
                .run(TimeoutPhase::ResponseBody, method, uri_text, incoming.frame())
                .await
            {
                Ok(frame) => frame,
                Err(error) => {
                    self.abandon(IdleRejection::Tainted);
                    return Err(error);
                }
            };
            match frame {
                None => {
                    self.finish();
                    return Ok(None);
                }
                Some(Err(source)) => {
                    let error = Error::ReadBody {
                        uri: self.uri_text.clone(),
                        source: Box::new(source),
                    };
                    self.abandon(IdleRejection::Tainted);
                    return Err(error);
                }
                Some(Ok(frame)) => {
                    let Ok(data) = frame.into_data() else {
                        continue;
                    };
                    self.finish_if_ended();
                    if data.is_empty() {
                        continue;
                    }
                    return Ok(Some(data));
                }
            }
        }
    }

    pub async fn bytes(mut self) -> crate::Result<Bytes> {
        if let BodyState::Buffered(bytes) = &mut self.state {
            let bytes = std::mem::take(bytes);
            self.state = BodyState::Done;
            return Ok(bytes);
        }
        let mut collected = BytesMut::new();
        while let Some(chunk) = self.chunk().await? {
            collected.extend_from_slice(&chunk);
        }
        Ok(collected.freeze())
    }

    pub async fn release(mut self) {
        if let BodyState::Wire { incoming, .. } = &self.state {
            let remaining = incoming.size_hint().lower();
            if remaining > self.max_drain_bytes as u64 {
                debug!(
                    remaining,
                    limit = self.max_drain_bytes,
                    "declared body length exceeds drain limit; closing connection"
                );
                self.abandon(IdleRejection::BodyNotDrained);
            }
        }
        let mut drained = 0usize;
        while matches!(self.state, BodyState::Wire { .. }) {
            match self.chunk().await {
                Ok(Some(chunk)) => {
                    drained += chunk.len();
                    if drained > self.max_drain_bytes {
                        debug!(
                            drained,
                            limit = self.max_drain_bytes,
                            "response body exceeds drain limit; closing connection"
                        );
                        self.abandon(IdleRejection::BodyNotDrained);
                    }
                }
                Ok(None) => break,
                Err(error) => {
                    debug!(error = %error, "failed to drain response body");
                    break;
                }
            }
        }
        self.state = BodyState::Done;
    }

    pub fn is_end_stream(&self) -> bool {
        match &self.state {
            BodyState::Buffered(bytes) => bytes.is_empty(),
            BodyState::Wire { incoming, .. } => incoming.is_end_stream(),
            BodyState::Done => true,
        }
    }

    fn finish_if_ended(&mut self) {
        if let BodyState::Wire { incoming, .. } = &self.state {
            if incoming.is_end_stream() {
                self.finish();
            }
        }
    }

    fn finish(&mut self) {
        if let BodyState::Wire { connection, .. } =
            std::mem::replace(&mut self.state, BodyState::Done)
        {
            connection.give_back();
        }
    }

    fn abandon(&mut self, reason: IdleRejection) {
        if let BodyState::Wire { connection, .. } =
            std::mem::replace(&mut self.state, BodyState::Done)
        {
            connection.discard(reason);
        }
    }
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.state {
            BodyState::Buffered(bytes) => format!("buffered({} bytes)", bytes.len()),
            BodyState::Wire { .. } => "streaming".to_owned(),
            BodyState::Done => "done".to_owned(),
        };
        formatter
            .debug_struct("ResponseBody")
            .field("state", &state)
            .finish()
    }
}

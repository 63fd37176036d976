use http::Method;
use thiserror::Error as ThisError;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConnectPhase {
    Resolve,
    Connect,
    Handshake,
}

impl std::fmt::Display for ConnectPhase {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Resolve => "resolve",
            Self::Connect => "connect",
            Self::Handshake => "handshake",
        };
        formatter.write_str(text)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum TimeoutPhase {
    Resolve,
    Connect,
    Handshake,
    Acquire,
    ResponseHeaders,
    ResponseBody,
}

impl std::fmt::Display for TimeoutPhase {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Resolve => "resolve",
            Self::Connect => "connect",
            Self::Handshake => "handshake",
            Self::Acquire => "acquire",
            Self::ResponseHeaders => "response_headers",
            Self::ResponseBody => "response_body",
        };
        formatter.write_str(text)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorKind {
    ConnectFailure,
    Timeout,
    ProtocolError,
    PolicyError,
    MiddlewareError,
    InvalidRequest,
    Decode,
}

impl ErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ConnectFailure => "connect_failure",
            Self::Timeout => "timeout",
            Self::ProtocolError => "protocol_error",
            Self::PolicyError => "policy_error",
            Self::MiddlewareError => "middleware_error",
            Self::InvalidRequest => "invalid_request",
            Self::Decode => "decode",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_str())
    }
}

#[derive(Debug, ThisError)]
#[non_exhaustive]
pub enum Error {
    #[error("invalid request uri: {uri}")]
    InvalidUri { uri: String },
    #[error("invalid header name {name}: {source}")]
    InvalidHeaderName {
        name: String,
        #[source]
        source: http::header::InvalidHeaderName,
    },
    #[error("invalid header value for {name}: {source}")]
    InvalidHeaderValue {
        name: String,
        #[source]
        source: http::header::InvalidHeaderValue,
    },
    #[error("failed to serialize request json: {source}")]
    Serialize {
        #[source]
        source: serde_json::Error,
    },
    #[error("connect failure ({phase}) for {uri}: {source}")]
    Connect {
        phase: ConnectPhase,
        uri: String,
        #[source]
        source: BoxError,
    },
    #[error("http request {} in {phase} for {method} {uri}", timeout_verb(.cancelled))]
    Timeout {
        phase: TimeoutPhase,
        cancelled: bool,
        method: Method,
        uri: String,
    },
    #[error("http protocol error for {method} {uri}: {source}")]
    Protocol {
        method: Method,
        uri: String,
        #[source]
        source: BoxError,
    },
    #[error("failed to read response body for {uri}: {source}")]
    ReadBody {
        uri: String,
        #[source]
        source: BoxError,
    },
    #[error("invalid redirect location {location} for {method} {uri}")]
    InvalidRedirectLocation {
        location: String,
        method: Method,
        uri: String,
    },
    #[error("redirect limit exceeded ({max_hops}) for {method} {uri}")]
    RedirectLimitExceeded {
        max_hops: usize,
        method: Method,
        uri: String,
    },
    #[error("redirect to {location} rejected by policy: {source}")]
    RedirectRejected {
        location: String,
        #[source]
        source: BoxError,
    },
    #[error("middleware {layer} failed: {source}")]
    Middleware {
        layer: &'static str,
        #[source]
        source: BoxError,
    },
    #[error("failed to decode response json: {source}; body={body}")]
    Deserialize {
        #[source]
        source: serde_json::Error,
        body: String,
    },
}

fn timeout_verb(cancelled: &bool) -> &'static str {
    if *cancelled { "cancelled" } else { "timed out" }
}

impl Error {
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidUri { .. }
            | Self::InvalidHeaderName { .. }
            | Self::InvalidHeaderValue { .. }
            | Self::Serialize { .. } => ErrorKind::InvalidRequest,
            Self::Connect { .. } => ErrorKind::ConnectFailure,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Protocol { .. }
            | Self::ReadBody { .. }
            | Self::InvalidRedirectLocation { .. } => ErrorKind::ProtocolError,
            Self::RedirectLimitExceeded { .. } | Self::RedirectRejected { .. } => {
                ErrorKind::PolicyError
            }
            Self::Middleware { .. } => ErrorKind::MiddlewareError,
            Self::Deserialize { .. } => ErrorKind::Decode,
        }
    }

    pub fn middleware<E>(layer: &'static str, source: E) -> Self
    where
        E: Into<BoxError>,
    {
        Self::Middleware {
            layer,
            source: source.into(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            Self::Timeout {
                cancelled: true,
                ..
            }
        )
    }
}

use std::fmt;
use std::sync::Arc;

use http::{HeaderMap, Method, StatusCode, Uri};

use crate::error::{BoxError, Error};
use crate::util::{is_redirect_status, redact_uri_for_logs, redirect_location, resolve_redirect_uri};

const DEFAULT_MAX_HOPS: usize = 10;

type Evaluator = Arc<dyn Fn(&RedirectAttempt<'_>) -> RedirectAction + Send + Sync>;

#[derive(Debug)]
pub struct RedirectAttempt<'a> {
    pub status: StatusCode,
    pub method: &'a Method,
    pub next: &'a Uri,
    pub history: &'a [Uri],
}

impl RedirectAttempt<'_> {
    pub fn hops(&self) -> usize {
        self.history.len().saturating_sub(1)
    }
}

pub enum RedirectAction {
    Follow,
    Stop,
    Error(BoxError),
}

impl fmt::Debug for RedirectAction {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Follow => formatter.write_str("Follow"),
            Self::Stop => formatter.write_str("Stop"),
            Self::Error(error) => formatter.debug_tuple("Error").field(error).finish(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    NotRedirect,
    Disabled,
    MissingLocation,
    Policy,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RedirectDecision {
    FollowTo(Uri),
    Stop(StopReason),
}

#[derive(Clone)]
pub struct RedirectPolicy {
    enabled: bool,
    max_hops: usize,
    evaluator: Option<Evaluator>,
}

impl RedirectPolicy {
    pub fn none() -> Self {
        Self {
            enabled: false,
            max_hops: 0,
            evaluator: None,
        }
    }

    pub fn limited(max_hops: usize) -> Self {
        Self {
            enabled: true,
            max_hops,
            evaluator: None,
        }
    }

    pub fn custom<F>(max_hops: usize, evaluator: F) -> Self
    where
        F: Fn(&RedirectAttempt<'_>) -> RedirectAction + Send + Sync + 'static,
    {
        Self {
            enabled: true,
            max_hops,
            evaluator: Some(Arc::new(evaluator)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn max_hops(&self) -> usize {
        self.max_hops
    }

    pub fn evaluate(
        &self,
        status: StatusCode,
        headers: &HeaderMap,
        method: &Method,
        history: &[Uri],
    ) -> crate::Result<RedirectDecision> {
        if !is_redirect_status(status) {
            return Ok(RedirectDecision::Stop(StopReason::NotRedirect));
        }
        if !self.enabled {
            return Ok(RedirectDecision::Stop(StopReason::Disabled));
        }
        let Some(location) = redirect_location(headers) else {
            return Ok(RedirectDecision::Stop(StopReason::MissingLocation));
        };
        let Some(current) = history.last() else {
            return Ok(RedirectDecision::Stop(StopReason::NotRedirect));
        };
        let current_text = redact_uri_for_logs(&current.to_string());

        let Some(next) = resolve_redirect_uri(current, &location) else {
            return Err(Error::InvalidRedirectLocation {
                location,
                method: method.clone(),
                uri: current_text,
            });
        };

        let hops = history.len() - 1;
        if hops >= self.max_hops {
            return Err(Error::RedirectLimitExceeded {
                max_hops: self.max_hops,
                method: method.clone(),
                uri: current_text,
            });
        }

        let Some(evaluator) = &self.evaluator else {
            return Ok(RedirectDecision::FollowTo(next));
        };
        let attempt = RedirectAttempt {
            status,
            method,
            next: &next,
            history,
        };
        match evaluator(&attempt) {
            RedirectAction::Follow => Ok(RedirectDecision::FollowTo(next)),
            RedirectAction::Stop => Ok(RedirectDecision::Stop(StopReason::Policy)),
            RedirectAction::Error(source) => Err(Error::RedirectRejected {
                location: redact_uri_for_logs(&next.to_string()),
                source,
            }),
        }
    }
}

impl Default for RedirectPolicy {
    fn default() -> Self {
        Self::limited(DEFAULT_MAX_HOPS)
    }
}

impl fmt::Debug for RedirectPolicy {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("RedirectPolicy")
            .field("enabled", &self.enabled)
            .field("max_hops", &self.max_hops)
            .field("custom", &self.evaluator.is_some())
            .finish()
    }
}

use std::future::Future;
use std::time::Duration;

use http::Method;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, TimeoutPhase};

#[derive(Clone, Debug)]
pub struct Deadline {
    expires_at: Option<Instant>,
    cancel: CancellationToken,
}

impl Deadline {
    pub fn none() -> Self {
        Self {
            expires_at: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn after(budget: Duration) -> Self {
        Self {
            expires_at: Instant::now().checked_add(budget),
            cancel: CancellationToken::new(),
        }
    }

    pub fn at(expires_at: Instant) -> Self {
        Self {
            expires_at: Some(expires_at),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn child(&self, budget: Duration) -> Self {
        let proposed = Instant::now().checked_add(budget);
        let expires_at = match (self.expires_at, proposed) {
            (Some(parent), Some(child)) => Some(parent.min(child)),
            (Some(parent), None) => Some(parent),
            (None, child) => child,
        };
        Self {
            expires_at,
            cancel: self.cancel.child_token(),
        }
    }

    pub fn expires_at(&self) -> Option<Instant> {
        self.expires_at
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.expires_at
            .map(|expires_at| expires_at.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at
            .is_some_and(|expires_at| Instant::now() >= expires_at)
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub(crate) fn check(
        &self,
        phase: TimeoutPhase,
        method: &Method,
        uri: &str,
    ) -> crate::Result<()> {
        if self.is_cancelled() {
            return Err(timeout_error(phase, true, method, uri));
        }
        if self.is_expired() {
            return Err(timeout_error(phase, false, method, uri));
        }
        Ok(())
    }

    pub(crate) async fn run<F>(
        &self,
        phase: TimeoutPhase,
        method: &Method,
        uri: &str,
        future: F,
    ) -> crate::Result<F::Output>
    where
        F: Future,
    {
        self.check(phase, method, uri)?;
        let expiry = async {
            match self.expires_at {
                Some(expires_at) => sleep_until(expires_at).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(timeout_error(phase, true, method, uri)),
            _ = expiry => Err(timeout_error(phase, false, method, uri)),
            output = future => Ok(output),
        }
    }
}

impl Default for Deadline {
    fn default() -> Self {
        Self::none()
    }
}

fn timeout_error(phase: TimeoutPhase, cancelled: bool, method: &Method, uri: &str) -> Error {
    Error::Timeout {
        phase,
        cancelled,
        method: method.clone(),
        uri: uri.to_owned(),
    }
}

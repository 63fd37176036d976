//! `hopwire` is a composable HTTP/1.1 client core.
//!
//! A request travels through a chain of round-trip behaviors to a pooled
//! connection executor. The [`Client`] entry point follows redirects outside
//! the chain, and every network wait is bounded by the request's
//! [`Deadline`].
//!
//! # Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//! use hopwire::prelude::{Client, HeaderInjectionLayer, LoggingLayer, RedirectPolicy};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::builder()
//!         .client_name("inventory-sync")
//!         .request_timeout(Duration::from_secs(3))
//!         .redirect_policy(RedirectPolicy::limited(5))
//!         .layer(LoggingLayer::new())
//!         .layer(HeaderInjectionLayer::try_from_pairs([("x-api-key", "secret")])?)
//!         .build();
//!
//!     let body = client
//!         .get("http://127.0.0.1:8080/v1/items")
//!         .timeout(Duration::from_secs(1))
//!         .send()
//!         .await?
//!         .text()
//!         .await?;
//!
//!     println!("{body}");
//!     Ok(())
//! }
//! ```

mod client;
mod connect;
mod deadline;
mod error;
mod executor;
mod extensions;
mod middleware;
mod pool;
mod redirect;
mod request;
mod response;
mod round_trip;
mod trace;
mod util;

pub use crate::client::{Client, ClientBuilder};
pub use crate::connect::{BoxedIo, GaiResolver, Io, Resolve, SecureChannel};
pub use crate::deadline::Deadline;
pub use crate::error::{BoxError, ConnectPhase, Error, ErrorKind, TimeoutPhase};
pub use crate::executor::PoolExecutor;
pub use crate::extensions::{Clock, SystemClock};
pub use crate::middleware::{HeaderInjection, HeaderInjectionLayer, Logging, LoggingLayer};
pub use crate::pool::{ConnectionKey, PoolConfig, PoolStats};
pub use crate::redirect::{
    RedirectAction, RedirectAttempt, RedirectDecision, RedirectPolicy, StopReason,
};
pub use crate::request::{Request, RequestBuilder};
pub use crate::response::{Response, ResponseBody};
pub use crate::round_trip::{BoxRoundTrip, Chain, Layer, RoundTrip, RoundTripFn, round_trip_fn};
pub use crate::trace::{
    ClientTrace, ConnectInfo, DnsInfo, GotConnInfo, HandshakeInfo, IdleRejection, PutIdleInfo,
    TraceSink,
};

pub type Result<T> = std::result::Result<T, Error>;

pub mod prelude {
    pub use crate::{
        Client, ClientBuilder, ClientTrace, Deadline, Error, ErrorKind, HeaderInjectionLayer,
        LoggingLayer, PoolConfig, RedirectAction, RedirectPolicy, Request, Response, Result,
        RoundTrip, TraceSink,
    };
}

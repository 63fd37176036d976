use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;

use crate::request::Request;
use crate::response::Response;

pub trait RoundTrip: Send + Sync {
    fn round_trip<'a>(&'a self, request: &'a Request) -> BoxFuture<'a, crate::Result<Response>>;
}

pub type BoxRoundTrip = Box<dyn RoundTrip>;

impl<T> RoundTrip for Box<T>
where
    T: RoundTrip + ?Sized,
{
    fn round_trip<'a>(&'a self, request: &'a Request) -> BoxFuture<'a, crate::Result<Response>> {
        (**self).round_trip(request)
    }
}

impl<T> RoundTrip for Arc<T>
where
    T: RoundTrip + ?Sized,
{
    fn round_trip<'a>(&'a self, request: &'a Request) -> BoxFuture<'a, crate::Result<Response>> {
        (**self).round_trip(request)
    }
}

pub trait Layer: Send + Sync {
    fn layer(&self, inner: BoxRoundTrip) -> BoxRoundTrip;
}

impl<F> Layer for F
where
    F: Fn(BoxRoundTrip) -> BoxRoundTrip + Send + Sync,
{
    fn layer(&self, inner: BoxRoundTrip) -> BoxRoundTrip {
        self(inner)
    }
}

#[derive(Clone, Default)]
pub struct Chain {
    layers: Vec<Arc<dyn Layer>>,
}

impl Chain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn layer(mut self, layer: impl Layer + 'static) -> Self {
        self.layers.push(Arc::new(layer));
        self
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn wrap(&self, terminal: impl RoundTrip + 'static) -> BoxRoundTrip {
        self.layers
            .iter()
            .rev()
            .fold(Box::new(terminal) as BoxRoundTrip, |inner, layer| {
                layer.layer(inner)
            })
    }
}

impl std::fmt::Debug for Chain {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Chain")
            .field("layers", &self.layers.len())
            .finish()
    }
}

pub struct RoundTripFn<F> {
    handler: F,
}

pub fn round_trip_fn<F, Fut>(handler: F) -> RoundTripFn<F>
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = crate::Result<Response>> + Send + 'static,
{
    RoundTripFn { handler }
}

impl<F, Fut> RoundTrip for RoundTripFn<F>
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = crate::Result<Response>> + Send + 'static,
{
    fn round_trip<'a>(&'a self, request: &'a Request) -> BoxFuture<'a, crate::Result<Response>> {
        Box::pin((self.handler)(request.clone()))
    }
}

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::BoxFuture;
use hopwire::prelude::{
    Client, ClientTrace, Error, ErrorKind, HeaderInjectionLayer, LoggingLayer, Request, Response,
    RoundTrip,
};
use hopwire::{BoxRoundTrip, PutIdleInfo};
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method, StatusCode};
use serde::{Deserialize, Serialize};

use common::{CapturedRequest, MockResponse, MockServer};

fn echo_header(
    name: &'static str,
) -> impl Fn(&CapturedRequest) -> MockResponse + Send + Sync + 'static {
    move |request| MockResponse::ok(request.header_values(name).join(","))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn get_returns_status_headers_and_body() {
    let server = MockServer::fixed(MockResponse::ok("hello").header("X-Served-By", "mock"));
    let client = Client::new();

    let response = client
        .get(server.url("/greeting?lang=en"))
        .send()
        .await
        .expect("request should succeed");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-served-by"], "mock");
    assert_eq!(response.uri(), server.url("/greeting?lang=en").as_str());
    assert_eq!(response.text().await.expect("read body"), "hello");

    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, "GET");
    assert_eq!(requests[0].path, "/greeting?lang=en");
    assert_eq!(
        requests[0].header_values("host"),
        vec![format!("127.0.0.1:{}", server.port())]
    );
}

#[derive(Debug, Deserialize, Serialize, PartialEq)]
struct Item {
    id: u32,
    name: String,
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn json_helpers_encode_request_and_decode_response() {
    let server = MockServer::start(|request| {
        MockResponse::ok(request.body.clone()).header("Content-Type", "application/json")
    });
    let client = Client::new();
    let item = Item {
        id: 7,
        name: "widget".to_owned(),
    };

    let echoed: Item = client
        .post(server.url("/items"))
        .json(&item)
        .expect("serialize payload")
        .send()
        .await
        .expect("request should succeed")
        .json()
        .await
        .expect("decode response");
    assert_eq!(echoed, item);

    let requests = server.requests();
    assert_eq!(requests[0].method, "POST");
    assert_eq!(
        requests[0].header_values("content-type"),
        vec!["application/json"]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stacked_injection_layers_reach_the_wire_and_leave_the_request_untouched() {
    let server = MockServer::fixed(MockResponse::ok("ok"));
    let injector = |name: &str, value: &str| {
        HeaderInjectionLayer::try_from_pairs([(name, value)]).expect("valid pair")
    };
    let client = Client::builder()
        .layer(injector("x-one", "1"))
        .layer(injector("x-two", "2"))
        .layer(injector("x-three", "3"))
        .build();
    let request = Request::parse(Method::GET, &server.url("/"))
        .expect("valid uri")
        .with_header(
            HeaderName::from_static("x-caller"),
            HeaderValue::from_static("me"),
        );

    for _ in 0..3 {
        client
            .issue(&request, Duration::from_secs(2))
            .await
            .expect("request should succeed")
            .release()
            .await;
    }

    assert_eq!(request.headers().len(), 1);
    let requests = server.requests();
    assert_eq!(requests.len(), 3);
    for captured in &requests {
        assert_eq!(captured.header_values("x-one"), vec!["1"]);
        assert_eq!(captured.header_values("x-two"), vec!["2"]);
        assert_eq!(captured.header_values("x-three"), vec!["3"]);
        assert_eq!(captured.header_values("x-caller"), vec!["me"]);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn injected_auth_header_is_echoed_exactly_once() {
    let server = MockServer::start(echo_header("x-auth"));
    let client = Client::builder()
        .layer(HeaderInjectionLayer::try_from_pairs([("X-Auth", "abc")]).expect("valid pair"))
        .build();

    for _ in 0..2 {
        let echoed = client
            .get(server.url("/whoami"))
            .send()
            .await
            .expect("request should succeed")
            .text()
            .await
            .expect("read body");
        assert_eq!(echoed, "abc");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn injection_appends_to_existing_values() {
    let server = MockServer::start(echo_header("x-tag"));
    let client = Client::builder()
        .layer(HeaderInjectionLayer::try_from_pairs([("x-tag", "injected")]).expect("valid pair"))
        .build();

    let echoed = client
        .get(server.url("/"))
        .try_header("x-tag", "caller")
        .expect("valid header")
        .send()
        .await
        .expect("request should succeed")
        .text()
        .await
        .expect("read body");
    assert_eq!(echoed, "caller,injected");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn logging_layer_passes_responses_through() {
    let server = MockServer::fixed(MockResponse::new(404, "missing"));
    let client = Client::builder().layer(LoggingLayer::new()).build();

    let response = client
        .get(server.url("/absent?token=secret"))
        .send()
        .await
        .expect("non-2xx is still a response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(response.text().await.expect("read body"), "missing");
}

struct ShortCircuit {
    inner: BoxRoundTrip,
}

impl RoundTrip for ShortCircuit {
    fn round_trip<'a>(&'a self, request: &'a Request) -> BoxFuture<'a, hopwire::Result<Response>> {
        Box::pin(async move {
            if request.uri().path() == "/local" {
                return Ok(Response::new(
                    StatusCode::IM_A_TEAPOT,
                    HeaderMap::new(),
                    "brewed locally",
                ));
            }
            if request.uri().path() == "/forbidden" {
                return Err(Error::middleware("short_circuit", "path is blocked"));
            }
            self.inner.round_trip(request).await
        })
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn behavior_can_answer_locally_or_fail_without_touching_the_network() {
    let server = MockServer::fixed(MockResponse::ok("remote"));
    let client = Client::builder()
        .layer(|inner: BoxRoundTrip| -> BoxRoundTrip { Box::new(ShortCircuit { inner }) })
        .build();

    let local = client
        .get(server.url("/local"))
        .send()
        .await
        .expect("local response");
    assert_eq!(local.status(), StatusCode::IM_A_TEAPOT);
    assert_eq!(local.text().await.expect("read body"), "brewed locally");

    let error = client
        .get(server.url("/forbidden"))
        .send()
        .await
        .expect_err("blocked path should fail");
    assert_eq!(error.kind(), ErrorKind::MiddlewareError);

    let remote = client
        .get(server.url("/remote"))
        .send()
        .await
        .expect("remote response");
    assert_eq!(remote.text().await.expect("read body"), "remote");

    assert_eq!(server.requests().len(), 1);
    assert_eq!(client.pool_stats().connections_created, 1);
}

fn recording_trace(events: Arc<Mutex<Vec<String>>>) -> ClientTrace {
    let push = move |event: String| events.lock().expect("events lock").push(event);
    let push = Arc::new(push);
    let dns_start = Arc::clone(&push);
    let dns_done = Arc::clone(&push);
    let connect_start = Arc::clone(&push);
    let connect_done = Arc::clone(&push);
    let got_conn = Arc::clone(&push);
    let headers = Arc::clone(&push);
    let put_idle = push;
    ClientTrace::new()
        .on_dns_start(move |_| dns_start("dns_start".to_owned()))
        .on_dns_done(move |info| {
            assert!(info.error.is_none());
            dns_done("dns_done".to_owned());
        })
        .on_connect_start(move |_| connect_start("connect_start".to_owned()))
        .on_connect_done(move |info| {
            assert!(info.error.is_none());
            connect_done("connect_done".to_owned());
        })
        .on_got_conn(move |info| {
            let label = if info.reused { "reused" } else { "new" };
            got_conn(format!("got_conn:{label}"));
        })
        .on_got_response_headers(move |status| headers(format!("headers:{}", status.as_u16())))
        .on_put_idle_conn(move |info: &PutIdleInfo| {
            let outcome = match info.rejected {
                None => "pooled".to_owned(),
                Some(reason) => format!("{reason:?}"),
            };
            put_idle(format!("put_idle:{outcome}"));
        })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn trace_hooks_observe_connection_lifecycle() {
    let server = MockServer::fixed(MockResponse::ok("traced"));
    let events = Arc::new(Mutex::new(Vec::new()));
    let client = Client::builder()
        .trace(recording_trace(Arc::clone(&events)))
        .build();

    for _ in 0..2 {
        let body = client
            .get(server.url("/"))
            .send()
            .await
            .expect("request should succeed")
            .text()
            .await
            .expect("read body");
        assert_eq!(body, "traced");
    }

    let events = events.lock().expect("events lock").clone();
    assert_eq!(
        events,
        vec![
            "dns_start",
            "dns_done",
            "connect_start",
            "connect_done",
            "got_conn:new",
            "headers:200",
            "put_idle:pooled",
            "got_conn:reused",
            "headers:200",
            "put_idle:pooled",
        ]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn request_trace_receives_events_alongside_client_trace() {
    let server = MockServer::fixed(MockResponse::ok("traced"));
    let client_events = Arc::new(Mutex::new(Vec::new()));
    let request_events = Arc::new(Mutex::new(Vec::new()));
    let client = Client::builder()
        .trace(recording_trace(Arc::clone(&client_events)))
        .build();

    client
        .get(server.url("/"))
        .trace(recording_trace(Arc::clone(&request_events)))
        .send()
        .await
        .expect("request should succeed")
        .release()
        .await;
    client
        .get(server.url("/"))
        .send()
        .await
        .expect("request should succeed")
        .release()
        .await;

    assert_eq!(client_events.lock().expect("events lock").len(), 10);
    let request_events = request_events.lock().expect("events lock").clone();
    assert_eq!(request_events.len(), 7);
    assert_eq!(request_events.last().map(String::as_str), Some("put_idle:pooled"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn invalid_targets_are_rejected_before_any_io() {
    let client = Client::new();
    let error = client
        .get("ftp://files.example.test/archive")
        .send()
        .await
        .expect_err("non-http target should fail");
    assert_eq!(error.kind(), ErrorKind::InvalidRequest);

    let error = client
        .get("http://example.test/")
        .try_header("bad header", "value")
        .err()
        .expect("invalid header name should fail");
    assert_eq!(error.kind(), ErrorKind::InvalidRequest);
}

//! End-to-end tests against an in-process WebSocket server
//!
//! Each test binds a server to `127.0.0.1:0` that records every
//! connection it sees (path, text frames, close) and runs real sessions
//! against it through the public engine and CLI entry points.

use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::{json, Map, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message as WsMessage;

use wsbench::common::config::Config;
use wsbench::engine::{ChannelEmitter, NullEmitter, StepSpec};
use wsbench::template::Functions;
use wsbench::transport::{Connection, Connector, WsConnector};
use wsbench::{compile, EngineConfig, EngineEvent, Error, SessionContext};

/// What the test server observed
#[derive(Debug, Clone, PartialEq, Eq)]
enum Seen {
    Opened(String),
    Text(String, String),
    Closed(String),
}

/// Start a recording server; returns its base URL and the observation stream
async fn start_server() -> (String, mpsc::UnboundedReceiver<Seen>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut path = String::new();
                let callback = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                    path = req.uri().path().to_string();
                    Ok(resp)
                };
                let Ok(mut ws) = tokio_tungstenite::accept_hdr_async(stream, callback).await
                else {
                    return;
                };
                let _ = tx.send(Seen::Opened(path.clone()));

                while let Some(Ok(frame)) = ws.next().await {
                    match frame {
                        WsMessage::Text(text) => {
                            let _ = tx.send(Seen::Text(path.clone(), text));
                        }
                        WsMessage::Close(_) => break,
                        _ => {}
                    }
                }
                let _ = tx.send(Seen::Closed(path));
            });
        }
    });

    (format!("ws://{}", addr), rx)
}

/// Collect exactly `count` observations, failing after a timeout
async fn collect(rx: &mut mpsc::UnboundedReceiver<Seen>, count: usize) -> Vec<Seen> {
    let mut seen = Vec::with_capacity(count);
    while seen.len() < count {
        match tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
            Ok(Some(item)) => seen.push(item),
            other => panic!("Server observations stopped after {:?}: {:?}", seen, other),
        }
    }
    seen
}

/// A port with nothing listening on it
async fn closed_port_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("ws://{}", addr)
}

fn steps(value: Value) -> Vec<StepSpec> {
    serde_json::from_value(value).unwrap()
}

fn vars(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("Expected object, got {}", other),
    }
}

fn drain(rx: &mut mpsc::UnboundedReceiver<EngineEvent>) -> Vec<EngineEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn names(events: &[EngineEvent]) -> Vec<&'static str> {
    events.iter().map(EngineEvent::name).collect()
}

/// Counts connect calls and delegates to the real connector
#[derive(Default)]
struct CountingConnector {
    calls: AtomicUsize,
}

#[async_trait]
impl Connector for CountingConnector {
    async fn connect(&self, url: &str) -> wsbench::Result<Box<dyn Connection>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        WsConnector.connect(url).await
    }
}

// ============== Engine against a live server ==============

#[tokio::test]
async fn test_connect_then_send_resolves_json_payload() {
    let (base, mut server) = start_server().await;
    let (emitter, mut events) = ChannelEmitter::new();

    let factory = compile(
        &steps(json!([
            { "connect": { "url": "/" } },
            { "send": { "json": { "msg": "{{m}}" } } }
        ])),
        EngineConfig {
            target: base,
            defer_connection: false,
        },
        Arc::new(WsConnector),
        Arc::new(emitter),
    )
    .unwrap();

    let outcome = factory
        .run(SessionContext::new(
            vars(json!({ "m": "hi" })),
            Arc::new(Functions::new()),
        ))
        .await;
    assert!(outcome.is_success(), "{:?}", outcome.error);

    let events = drain(&mut events);
    assert_eq!(names(&events), vec!["started", "request", "response"]);
    assert!(matches!(
        events[2],
        EngineEvent::Response { status_code: 0, .. }
    ));

    // Initial connection, replaced by the connect step, then the step's own
    let seen = collect(&mut server, 5).await;
    let opened = seen.iter().filter(|s| matches!(s, Seen::Opened(_))).count();
    let closed = seen.iter().filter(|s| matches!(s, Seen::Closed(_))).count();
    assert_eq!(opened, 2);
    assert_eq!(closed, 2);
    assert!(seen.contains(&Seen::Text("/".to_string(), r#"{"msg":"hi"}"#.to_string())));
    assert!(!outcome.context.is_connected());
}

#[tokio::test]
async fn test_failed_connect_step_emits_single_error_and_skips_send() {
    let (base, mut server) = start_server().await;
    let unreachable = closed_port_url().await;
    let (emitter, mut events) = ChannelEmitter::new();

    let factory = compile(
        &steps(json!([
            { "connect": { "url": unreachable } },
            { "send": "never sent" }
        ])),
        EngineConfig {
            target: base,
            defer_connection: false,
        },
        Arc::new(WsConnector),
        Arc::new(emitter),
    )
    .unwrap();

    let outcome = factory.run(SessionContext::default()).await;
    assert!(matches!(outcome.error, Some(Error::Connect { .. })));

    let events = drain(&mut events);
    assert_eq!(
        events,
        vec![
            EngineEvent::Started,
            EngineEvent::Error("ECONNREFUSED".to_string())
        ]
    );

    // The initial connection is still closed on the error path
    let seen = collect(&mut server, 2).await;
    assert_eq!(
        seen,
        vec![Seen::Opened("/".to_string()), Seen::Closed("/".to_string())]
    );
}

#[tokio::test]
async fn test_unreachable_target_fails_before_started() {
    let target = closed_port_url().await;
    let (emitter, mut events) = ChannelEmitter::new();

    let factory = compile(
        &steps(json!([{ "send": "x" }])),
        EngineConfig {
            target,
            defer_connection: false,
        },
        Arc::new(WsConnector),
        Arc::new(emitter),
    )
    .unwrap();

    let outcome = factory.run(SessionContext::default()).await;
    assert_eq!(outcome.error.as_ref().map(Error::code), Some("ECONNREFUSED"));
    assert_eq!(names(&drain(&mut events)), vec!["error"]);
}

#[tokio::test]
async fn test_deferred_connection_uses_supplied_connection() {
    let (base, mut server) = start_server().await;
    let connector = Arc::new(CountingConnector::default());
    let (emitter, mut events) = ChannelEmitter::new();

    let factory = compile(
        &steps(json!([{ "send": "hello {{who}}" }])),
        EngineConfig {
            target: base.clone(),
            defer_connection: true,
        },
        connector.clone(),
        Arc::new(emitter),
    )
    .unwrap();

    let supplied = WsConnector.connect(&format!("{}/external", base)).await.unwrap();
    let ctx = SessionContext::new(vars(json!({ "who": "there" })), Arc::new(Functions::new()))
        .with_connection(supplied);

    let outcome = factory.run(ctx).await;
    assert!(outcome.is_success(), "{:?}", outcome.error);
    assert_eq!(connector.calls.load(Ordering::SeqCst), 0);
    assert_eq!(names(&drain(&mut events)), vec!["started", "request", "response"]);

    let seen = collect(&mut server, 3).await;
    assert_eq!(
        seen,
        vec![
            Seen::Opened("/external".to_string()),
            Seen::Text("/external".to_string(), "hello there".to_string()),
            Seen::Closed("/external".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_think_delays_the_next_step() {
    let (base, mut server) = start_server().await;

    let factory = compile(
        &steps(json!([{ "think": 0.2 }, { "send": "late" }])),
        EngineConfig {
            target: base,
            defer_connection: false,
        },
        Arc::new(WsConnector),
        Arc::new(NullEmitter),
    )
    .unwrap();

    let started = Instant::now();
    let outcome = factory.run(SessionContext::default()).await;
    assert!(outcome.is_success());
    assert!(started.elapsed() >= Duration::from_millis(200));

    let seen = collect(&mut server, 3).await;
    assert_eq!(seen[1], Seen::Text("/".to_string(), "late".to_string()));
}

#[tokio::test]
async fn test_concurrent_sessions_have_independent_contexts() {
    let (base, mut server) = start_server().await;

    let factory = compile(
        &steps(json!([{ "send": "{{ $randomString(24) }}" }])),
        EngineConfig {
            target: base,
            defer_connection: false,
        },
        Arc::new(WsConnector),
        Arc::new(NullEmitter),
    )
    .unwrap();

    let funcs = Arc::new(Functions::with_builtins());
    let runs = (0..4).map(|i| {
        let ctx = SessionContext::new(vars(json!({ "i": i })), funcs.clone());
        factory.run(ctx)
    });
    let outcomes = futures_util::future::join_all(runs).await;

    for (i, outcome) in outcomes.iter().enumerate() {
        assert!(outcome.is_success());
        assert_eq!(outcome.context.vars()["i"], json!(i));
        assert_eq!(outcome.context.success_count(), 1);
    }

    let texts: std::collections::HashSet<String> = collect(&mut server, 12)
        .await
        .into_iter()
        .filter_map(|s| match s {
            Seen::Text(_, text) => Some(text),
            _ => None,
        })
        .collect();
    assert_eq!(texts.len(), 4);
    assert!(texts.iter().all(|t| t.len() == 24));
}

// ============== CLI runner ==============

fn script_file(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[tokio::test]
async fn test_cli_run_aggregates_sessions() {
    let (base, mut server) = start_server().await;
    let script = script_file(
        r#"
config:
  variables:
    room: lobby
  functions:
    twice: "args[0] * 2"
scenario:
  - connect: { url: "/rooms/{{room}}" }
  - send: { json: { n: "{{ $twice(21) }}" } }
"#,
    );

    let report = wsbench::cli::run(
        script.path(),
        Some(3),
        Some(base.as_str()),
        &Config::default(),
        Arc::new(WsConnector),
    )
    .await
    .unwrap();

    assert_eq!(report.completed, 3);
    assert_eq!(report.failed, 0);
    assert_eq!(report.started, 3);
    assert_eq!(report.requests, 3);
    assert_eq!(report.responses, 3);
    assert!(report.errors.is_empty());

    let seen = collect(&mut server, 15).await;
    let texts: Vec<_> = seen
        .iter()
        .filter_map(|s| match s {
            Seen::Text(path, text) => Some((path.as_str(), text.as_str())),
            _ => None,
        })
        .collect();
    assert_eq!(texts, vec![("/rooms/lobby", r#"{"n":"42"}"#); 3]);
}

#[tokio::test]
async fn test_cli_run_deferred_preconnects_each_session() {
    let (base, mut server) = start_server().await;
    let connector = Arc::new(CountingConnector::default());
    let script = script_file(
        r#"
config:
  deferConnection: true
scenario:
  - send: ping
"#,
    );

    let report = wsbench::cli::run(
        script.path(),
        Some(2),
        Some(base.as_str()),
        &Config::default(),
        connector.clone(),
    )
    .await
    .unwrap();

    assert_eq!(report.completed, 2);
    assert_eq!(report.responses, 2);
    // Exactly one connection per session, opened by the runner
    assert_eq!(connector.calls.load(Ordering::SeqCst), 2);
    let seen = collect(&mut server, 6).await;
    assert_eq!(
        seen.iter().filter(|s| matches!(s, Seen::Text(_, t) if t == "ping")).count(),
        2
    );
}

#[tokio::test]
async fn test_cli_run_reports_failures() {
    let target = closed_port_url().await;
    let script = script_file("scenario:\n  - send: x\n");

    let report = wsbench::cli::run(
        script.path(),
        Some(2),
        Some(target.as_str()),
        &Config::default(),
        Arc::new(WsConnector),
    )
    .await
    .unwrap();

    assert_eq!(report.completed, 0);
    assert_eq!(report.failed, 2);
    assert_eq!(report.started, 0);
    assert_eq!(report.errors.get("ECONNREFUSED"), Some(&2));
}

#[tokio::test]
async fn test_cli_run_deferred_preconnect_failure_records_error_code() {
    let target = closed_port_url().await;
    let script = script_file("config:\n  deferConnection: true\nscenario:\n  - send: x\n");

    let report = wsbench::cli::run(
        script.path(),
        Some(2),
        Some(target.as_str()),
        &Config::default(),
        Arc::new(WsConnector),
    )
    .await
    .unwrap();

    assert_eq!(report.failed, 2);
    assert_eq!(report.started, 0);
    assert_eq!(report.requests, 0);
    assert_eq!(report.errors.get("ECONNREFUSED"), Some(&2));
}

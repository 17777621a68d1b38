use echo_service::spawn_server;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedReceiver;
use uprpc_core::codec::{Direction, MetadataPair};
use uprpc_core::descriptor::StreamingMode;
use uprpc_core::{
    ChannelSink, Engine, EngineConfig, Event, EventSink, RequestEnvelope, ResponseEnvelope,
};

const ECHO: &str = "echo.EchoService";

fn setup_engine() -> (Engine, UnboundedReceiver<Event>) {
    setup_engine_with(EngineConfig::default())
}

fn setup_engine_with(config: EngineConfig) -> (Engine, UnboundedReceiver<Event>) {
    let (sink, events) = ChannelSink::new();
    (Engine::new(sink, config), events)
}

fn mode_of(method: &str) -> StreamingMode {
    match method {
        "ServerStreamingEcho" | "EndlessEcho" => StreamingMode::ServerStreaming,
        "ClientStreamingEcho" => StreamingMode::ClientStreaming,
        "BidirectionalEcho" | "StubbornEcho" => StreamingMode::Bidirectional,
        _ => StreamingMode::Unary,
    }
}

/// An envelope for `method` of the echo service, in the mode the method is declared with.
fn echo(id: &str, host: &str, method: &str, body: &str) -> RequestEnvelope {
    RequestEnvelope {
        id: id.to_string(),
        proto_path: echo_service::echo_proto(),
        include_dirs: vec![],
        service_full_name: ECHO.to_string(),
        method_name: method.to_string(),
        mode: mode_of(method),
        host: host.to_string(),
        body: body.to_string(),
        metadata: vec![],
    }
}

async fn next_event(events: &mut UnboundedReceiver<Event>) -> Event {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("event channel closed")
}

/// Collects events up to and including the first `end`.
async fn events_until_end(events: &mut UnboundedReceiver<Event>) -> Vec<Event> {
    let mut collected = Vec::new();
    loop {
        let event = next_event(events).await;
        let done = event.is_end();
        collected.push(event);
        if done {
            return collected;
        }
    }
}

/// Asserts nothing else arrives for a short while.
async fn assert_quiet(events: &mut UnboundedReceiver<Event>) {
    let extra = tokio::time::timeout(Duration::from_millis(200), events.recv()).await;
    assert!(extra.is_err(), "unexpected event: {extra:?}");
}

fn data(event: &Event) -> &ResponseEnvelope {
    match event {
        Event::Data(envelope) => envelope,
        Event::End { id } => panic!("expected data, got end for '{id}'"),
    }
}

fn message_of(event: &Event) -> String {
    let body: serde_json::Value = serde_json::from_str(&data(event).body).unwrap();
    body["message"].as_str().unwrap().to_string()
}

/// A listener that never accepts, with its backlog already full, so dials to it hang.
fn unresponsive_listener() -> (tokio::net::TcpListener, Vec<std::net::TcpStream>) {
    let socket = tokio::net::TcpSocket::new_v4().unwrap();
    socket.bind("127.0.0.1:0".parse().unwrap()).unwrap();
    let listener = socket.listen(1).unwrap();
    let addr = listener.local_addr().unwrap();

    let backlog = (0..8)
        .filter_map(|_| {
            std::net::TcpStream::connect_timeout(&addr, Duration::from_millis(100)).ok()
        })
        .collect();

    (listener, backlog)
}

/// Forwards to a [`ChannelSink`] but panics on any `data` body containing `trigger`.
struct TrippingSink {
    inner: ChannelSink,
    trigger: &'static str,
}

impl EventSink for TrippingSink {
    fn data(&self, envelope: ResponseEnvelope) {
        if envelope.body.contains(self.trigger) {
            panic!("sink refused the message");
        }
        self.inner.data(envelope);
    }

    fn end(&self, id: &str) {
        self.inner.end(id);
    }
}

#[tokio::test]
async fn test_unary_greeter_round_trip() {
    let host = spawn_server().await;
    let (engine, mut events) = setup_engine();

    engine
        .send(RequestEnvelope {
            id: "r1".to_string(),
            proto_path: echo_service::greeter_proto(),
            include_dirs: vec![],
            service_full_name: "Greeter".to_string(),
            method_name: "SayHello".to_string(),
            mode: StreamingMode::Unary,
            host,
            body: r#"{"name":"world"}"#.to_string(),
            metadata: vec![],
        })
        .await;

    let collected = events_until_end(&mut events).await;
    assert_eq!(collected.len(), 2);
    assert_eq!(data(&collected[0]).id, "r1");
    assert_eq!(data(&collected[0]).body, r#"{"message":"Hello world"}"#);
    assert_eq!(collected[1], Event::End { id: "r1".into() });
    assert!(engine.registry().is_empty());
}

#[tokio::test]
async fn test_unary_metadata_travels_both_ways() {
    let host = spawn_server().await;
    let (engine, mut events) = setup_engine();

    let mut envelope = echo("meta", &host, "UnaryEcho", r#"{"message":"hi"}"#);
    envelope.metadata = vec![
        MetadataPair::new("x-user", "alice"),
        MetadataPair::new("trace-bin", vec![0u8, 1, 254, 255]),
    ];
    engine.send(envelope).await;

    let collected = events_until_end(&mut events).await;
    let metadata = &data(&collected[0]).metadata;

    let find = |key: &str| metadata.iter().find(|pair| pair.key == key).unwrap();
    assert_eq!(find("x-user").value, b"alice");
    assert_eq!(find("x-user").id, "x-user_0");
    assert_eq!(find("trace-bin").value, vec![0u8, 1, 254, 255]);
    assert_eq!(find("x-served-by").value, b"echo");
    assert!(metadata.iter().all(|pair| pair.direction == Direction::Response));
}

#[tokio::test]
async fn test_unary_rpc_error_reports_status_and_trailer() {
    let host = spawn_server().await;
    let (engine, mut events) = setup_engine();

    engine.send(echo("fail", &host, "FailingEcho", r#"{"message":"x"}"#)).await;

    let collected = events_until_end(&mut events).await;
    assert_eq!(collected.len(), 2);

    let error = data(&collected[0]);
    assert!(error.body.contains("InvalidArgument"), "{}", error.body);
    assert!(error.body.contains("refusing 'x'"), "{}", error.body);
    assert!(
        error
            .metadata
            .iter()
            .any(|pair| pair.key == "x-error-detail" && pair.value == b"echo refused")
    );
    assert!(engine.registry().is_empty());
}

#[tokio::test]
async fn test_resolution_failures_end_the_session() {
    let host = spawn_server().await;
    let (engine, mut events) = setup_engine();

    engine.send(echo("no-method", &host, "Nope", "")).await;
    let collected = events_until_end(&mut events).await;
    assert_eq!(collected.len(), 2);
    assert!(data(&collected[0]).body.contains("Method 'Nope' not found"));

    let mut envelope = echo("no-service", &host, "UnaryEcho", "");
    envelope.service_full_name = "echo.Ghost".to_string();
    engine.send(envelope).await;
    let collected = events_until_end(&mut events).await;
    assert!(data(&collected[0]).body.contains("Service 'echo.Ghost' not found"));

    let mut envelope = echo("broken", &host, "UnaryEcho", "");
    envelope.proto_path =
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/protos/broken.proto");
    engine.send(envelope).await;
    let collected = events_until_end(&mut events).await;
    assert!(data(&collected[0]).body.contains("Failed to parse proto file"));

    let mut envelope = echo("wrong-mode", &host, "UnaryEcho", "");
    envelope.mode = StreamingMode::Bidirectional;
    engine.send(envelope).await;
    let collected = events_until_end(&mut events).await;
    assert!(data(&collected[0]).body.contains("is unary"));

    assert!(engine.registry().is_empty());
}

#[tokio::test]
async fn test_resolution_failures_never_dial() {
    let (listener, _backlog) = unresponsive_listener();
    let host = listener.local_addr().unwrap().to_string();
    let (engine, mut events) = setup_engine();

    // The host would hang the dial; resolution fails first.
    let started = Instant::now();
    engine.send(echo("early", &host, "Nope", "")).await;

    assert!(started.elapsed() < Duration::from_millis(500));
    let collected = events_until_end(&mut events).await;
    assert_eq!(collected.len(), 2);
    assert!(data(&collected[0]).body.contains("Method 'Nope' not found"));
}

#[tokio::test]
async fn test_malformed_body_is_a_codec_error() {
    let host = spawn_server().await;
    let (engine, mut events) = setup_engine();

    engine.send(echo("bad-json", &host, "UnaryEcho", "{not json")).await;

    let collected = events_until_end(&mut events).await;
    assert_eq!(collected.len(), 2);
    assert!(data(&collected[0]).body.contains("Invalid JSON body for 'echo.EchoRequest'"));
}

#[tokio::test]
async fn test_unreachable_host_is_a_connection_error() {
    let (engine, mut events) = setup_engine();

    engine.send(echo("down", "127.0.0.1:1", "UnaryEcho", "")).await;

    let collected = events_until_end(&mut events).await;
    assert_eq!(collected.len(), 2);
    assert_eq!(data(&collected[0]).id, "down");
    assert!(engine.registry().is_empty());
}

#[tokio::test]
async fn test_dial_timeout_is_reported() {
    let (listener, _backlog) = unresponsive_listener();
    let host = listener.local_addr().unwrap().to_string();
    let (engine, mut events) = setup_engine_with(EngineConfig {
        connect_timeout: Duration::from_millis(200),
        ..EngineConfig::default()
    });

    engine.send(echo("hang", &host, "UnaryEcho", "")).await;

    let collected = events_until_end(&mut events).await;
    assert_eq!(collected.len(), 2);
    let error = data(&collected[0]);
    assert!(error.body.contains("Timed out after 200ms"), "{}", error.body);
    assert!(engine.registry().is_empty());
}

#[tokio::test]
async fn test_send_while_the_same_id_is_dialing_ends_once() {
    let (listener, _backlog) = unresponsive_listener();
    let host = listener.local_addr().unwrap().to_string();
    let (engine, mut events) = setup_engine_with(EngineConfig {
        connect_timeout: Duration::from_millis(300),
        ..EngineConfig::default()
    });

    let first = tokio::spawn({
        let engine = engine.clone();
        async move {
            engine.send(echo("dup", &host, "BidirectionalEcho", "")).await;
        }
    });

    // Wait until the first send has registered its session and is dialing.
    let started = Instant::now();
    while engine.registry().get("dup").is_none() {
        assert!(started.elapsed() < Duration::from_secs(2), "session never registered");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    // Would fail at once with its own host; the id is already taken, so it is absorbed.
    engine
        .send(echo("dup", "https://bad:1", "UnaryEcho", r#"{"message":"x"}"#))
        .await;
    engine.stop("dup");
    first.await.unwrap();

    let collected = events_until_end(&mut events).await;
    assert_eq!(collected.len(), 2);
    assert!(data(&collected[0]).body.contains("Timed out"), "{:?}", collected[0]);
    assert!(!data(&collected[0]).body.contains("TLS"));
    assert_eq!(collected[1], Event::End { id: "dup".into() });

    assert_quiet(&mut events).await;
    assert!(engine.registry().is_empty());
}

#[tokio::test]
async fn test_client_streaming_pushes_then_stop() {
    let host = spawn_server().await;
    let (engine, mut events) = setup_engine();

    engine
        .send(echo("cs", &host, "ClientStreamingEcho", r#"{"message":"A"}"#))
        .await;
    engine.push("cs", r#"{"message":"B"}"#).await;
    engine.push("cs", r#"{"message":"C"}"#).await;
    engine.stop("cs");

    // Pushes after stop are dropped.
    engine.push("cs", r#"{"message":"D"}"#).await;
    engine.stop("cs");

    let collected = events_until_end(&mut events).await;
    assert_eq!(collected.len(), 2);
    assert_eq!(message_of(&collected[0]), "ABC");
    assert_eq!(collected[1], Event::End { id: "cs".into() });

    assert_quiet(&mut events).await;
    assert!(engine.registry().is_empty());
}

#[tokio::test]
async fn test_send_on_open_client_stream_acts_as_push() {
    let host = spawn_server().await;
    let (engine, mut events) = setup_engine();

    let open = echo("dup", &host, "ClientStreamingEcho", "");
    engine.send(open.clone()).await;
    engine
        .send(RequestEnvelope {
            body: r#"{"message":"again"}"#.to_string(),
            ..open
        })
        .await;
    engine.stop("dup");

    let collected = events_until_end(&mut events).await;
    assert_eq!(collected.len(), 2);
    assert_eq!(message_of(&collected[0]), "again");
}

#[tokio::test]
async fn test_bad_push_reports_without_ending() {
    let host = spawn_server().await;
    let (engine, mut events) = setup_engine();

    engine.send(echo("bad-push", &host, "ClientStreamingEcho", "")).await;
    engine.push("bad-push", r#"{"message": 12"#).await;

    let error = next_event(&mut events).await;
    assert!(data(&error).body.contains("Invalid JSON body"));
    assert!(engine.registry().get("bad-push").is_some());

    engine.push("bad-push", r#"{"message":"ok"}"#).await;
    engine.stop("bad-push");

    let collected = events_until_end(&mut events).await;
    assert_eq!(collected.len(), 2);
    assert_eq!(message_of(&collected[0]), "ok");
}

#[tokio::test]
async fn test_server_streaming_reports_messages_then_trailer() {
    let host = spawn_server().await;
    let (engine, mut events) = setup_engine();

    engine
        .send(echo("ss", &host, "ServerStreamingEcho", r#"{"message":"hey"}"#))
        .await;

    let collected = events_until_end(&mut events).await;
    assert_eq!(collected.len(), 5);

    let messages: Vec<_> = collected[..3].iter().map(message_of).collect();
    assert_eq!(messages, ["hey - seq 0", "hey - seq 1", "hey - seq 2"]);

    let trailer = data(&collected[3]);
    assert!(trailer.body.is_empty());
    assert!(trailer.metadata.iter().all(|pair| pair.direction == Direction::Response));

    assert_eq!(collected[4], Event::End { id: "ss".into() });
    assert!(engine.registry().is_empty());
}

#[tokio::test]
async fn test_server_streaming_stop_ends_exactly_once() {
    let host = spawn_server().await;
    let (engine, mut events) = setup_engine();

    engine
        .send(echo("endless", &host, "EndlessEcho", r#"{"message":"t"}"#))
        .await;

    let first = next_event(&mut events).await;
    assert_eq!(message_of(&first), "t - tick 0");

    engine.stop("endless");
    engine.stop("endless");

    let rest = events_until_end(&mut events).await;
    let (end, in_flight) = rest.split_last().unwrap();
    assert_eq!(*end, Event::End { id: "endless".into() });
    // Nothing but messages already in flight, and no trailer event.
    assert!(in_flight.iter().all(|event| !data(event).body.is_empty()));

    assert_quiet(&mut events).await;
    assert!(engine.registry().is_empty());
}

#[tokio::test]
async fn test_server_streaming_past_its_deadline_fails() {
    let host = spawn_server().await;
    let (engine, mut events) = setup_engine_with(EngineConfig {
        call_timeout: Some(Duration::from_millis(150)),
        ..EngineConfig::default()
    });

    let started = Instant::now();
    engine
        .send(echo("late", &host, "EndlessEcho", r#"{"message":"t"}"#))
        .await;

    let collected = events_until_end(&mut events).await;
    assert!(started.elapsed() < Duration::from_secs(2));

    let (end, reported) = collected.split_last().unwrap();
    assert_eq!(*end, Event::End { id: "late".into() });
    let (error, messages) = reported.split_last().unwrap();
    assert!(data(error).body.contains("DeadlineExceeded"), "{}", data(error).body);
    assert!(messages.iter().all(|event| message_of(event).starts_with("t - tick")));

    assert_quiet(&mut events).await;
    assert!(engine.registry().is_empty());
}

#[tokio::test]
async fn test_bidirectional_past_its_deadline_fails() {
    let host = spawn_server().await;
    let (engine, mut events) = setup_engine_with(EngineConfig {
        call_timeout: Some(Duration::from_millis(150)),
        ..EngineConfig::default()
    });

    engine
        .send(echo("late-bidi", &host, "StubbornEcho", r#"{"message":"Ping"}"#))
        .await;

    let collected = events_until_end(&mut events).await;
    assert_eq!(collected.len(), 3);
    assert_eq!(message_of(&collected[0]), "echo: Ping");
    assert!(data(&collected[1]).body.contains("DeadlineExceeded"));
    assert!(engine.registry().is_empty());
}

#[tokio::test]
async fn test_bidirectional_push_stop_drains() {
    let host = spawn_server().await;
    let (engine, mut events) = setup_engine();

    engine
        .send(echo("bidi", &host, "BidirectionalEcho", r#"{"message":"Ping"}"#))
        .await;

    let first = next_event(&mut events).await;
    assert_eq!(message_of(&first), "echo: Ping");

    engine.push("bidi", r#"{"message":"Pong"}"#).await;
    engine.stop("bidi");

    let rest = events_until_end(&mut events).await;
    assert_eq!(rest.len(), 3);
    assert_eq!(message_of(&rest[0]), "echo: Pong");
    assert!(data(&rest[1]).body.is_empty());
    assert_eq!(rest[2], Event::End { id: "bidi".into() });

    assert!(engine.registry().is_empty());
}

#[tokio::test]
async fn test_bidirectional_drain_gives_up_on_a_peer_that_never_ends() {
    let host = spawn_server().await;
    let (engine, mut events) = setup_engine_with(EngineConfig {
        drain_timeout: Duration::from_millis(300),
        ..EngineConfig::default()
    });

    engine
        .send(echo("stubborn", &host, "StubbornEcho", r#"{"message":"Ping"}"#))
        .await;
    let first = next_event(&mut events).await;
    assert_eq!(message_of(&first), "echo: Ping");

    engine.push("stubborn", r#"{"message":"Pong"}"#).await;
    let second = next_event(&mut events).await;
    assert_eq!(message_of(&second), "echo: Pong");

    let stopped = Instant::now();
    engine.stop("stubborn");

    // No trailer ever comes: just the end, once the drain timeout passes.
    let rest = events_until_end(&mut events).await;
    assert_eq!(rest, [Event::End { id: "stubborn".into() }]);
    assert!(stopped.elapsed() >= Duration::from_millis(250));

    assert_quiet(&mut events).await;
    assert!(engine.registry().is_empty());
}

#[tokio::test]
async fn test_worker_panic_reports_and_ends() {
    let host = spawn_server().await;
    let (inner, mut events) = ChannelSink::new();
    let sink = TrippingSink {
        inner,
        trigger: "seq 1",
    };
    let engine = Engine::new(sink, EngineConfig::default());

    engine
        .send(echo("boom", &host, "ServerStreamingEcho", r#"{"message":"b"}"#))
        .await;

    let collected = events_until_end(&mut events).await;
    assert_eq!(collected.len(), 3);
    assert_eq!(message_of(&collected[0]), "b - seq 0");
    let error = data(&collected[1]);
    assert!(error.body.contains("sink refused the message"), "{}", error.body);
    assert_eq!(collected[2], Event::End { id: "boom".into() });

    assert_quiet(&mut events).await;
    assert!(engine.registry().is_empty());
}

#[tokio::test]
async fn test_bidirectional_concurrent_push_and_stop_close_once() {
    let host = spawn_server().await;
    let (engine, mut events) = setup_engine();

    engine.send(echo("race", &host, "BidirectionalEcho", "")).await;

    let mut tasks = Vec::new();
    for i in 0..8 {
        let engine = engine.clone();
        tasks.push(tokio::spawn(async move {
            engine.push("race", &format!(r#"{{"message":"{i}"}}"#)).await;
            engine.stop("race");
            engine.push("race", r#"{"message":"late"}"#).await;
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let collected = events_until_end(&mut events).await;
    assert_eq!(collected.iter().filter(|event| event.is_end()).count(), 1);
    assert!(
        collected
            .iter()
            .filter(|event| !event.is_end())
            .all(|event| !data(event).body.contains("late"))
    );

    // Once closed, further operations are no-ops.
    engine.stop("race");
    engine.push("race", r#"{"message":"after"}"#).await;
    assert_quiet(&mut events).await;
    assert!(engine.registry().is_empty());
}

#[tokio::test]
async fn test_stop_on_unknown_session_is_silent() {
    let (engine, mut events) = setup_engine();

    engine.stop("nobody");
    engine.push("nobody", "{}").await;

    assert_quiet(&mut events).await;
}

#[tokio::test]
async fn test_shutdown_stops_every_stream() {
    let host = spawn_server().await;
    let (engine, mut events) = setup_engine();

    engine.send(echo("a", &host, "EndlessEcho", "")).await;
    engine.send(echo("b", &host, "BidirectionalEcho", "")).await;

    engine.shutdown();

    let mut ended = Vec::new();
    while ended.len() < 2 {
        if let Event::End { id } = next_event(&mut events).await {
            ended.push(id);
        }
    }
    ended.sort();
    assert_eq!(ended, ["a", "b"]);
    assert!(engine.registry().is_empty());
}

//! Integration tests
//!
//! Drive the router the way the console does and watch real sockets.

mod common;

use std::fs;
use std::time::Duration;

use tempfile::tempdir;
use tokio::io::AsyncWriteExt;

use hotswap_proxy::command::RouterOptions;
use hotswap_proxy::store::Value;
use hotswap_proxy::ProxyError;

use common::{connect, console_lines, echo_server, eventually, is_closed, read_n, router, wait_for_session, Upstream};

#[tokio::test]
async fn test_relay_round_trip() {
    let echo = echo_server().await;
    let (mut router, _rx) = router(None, RouterOptions::default());
    let port = router.registry_mut().create("p1", 0, "127.0.0.1", echo).unwrap().local_port();

    let mut client = connect(port).await;
    client.write_all(b"hello proxy").await.unwrap();
    assert_eq!(read_n(&mut client, 11).await, b"hello proxy");

    let output = router.dispatch("list").await.unwrap();
    assert_eq!(output.lines.len(), 1);
    assert!(output.lines[0].starts_with("* "));
    assert!(output.lines[0].contains("p1"));

    router.shutdown().await;
}

#[tokio::test]
async fn test_new_client_replaces_previous() {
    let mut upstream = Upstream::start().await;
    let (mut router, _rx) = router(None, RouterOptions::default());
    let port = router
        .registry_mut()
        .create("p1", 0, "127.0.0.1", upstream.port)
        .unwrap()
        .local_port();

    let mut first = connect(port).await;
    wait_for_session(&router, "p1").await;
    upstream.accepted.recv().await.unwrap();
    let first_peer = router.registry().get("p1").unwrap().client_peer();

    let mut second = connect(port).await;
    assert!(is_closed(&mut first).await, "previous client should be closed");
    let replaced = eventually(|| {
        let peer = router.registry().get("p1").unwrap().client_peer();
        peer.is_some() && peer != first_peer
    })
    .await;
    assert!(replaced);

    // The server link survives the client swap
    second.write_all(b"from second").await.unwrap();
    assert_eq!(upstream.read_exact(11).await, b"from second");
    assert!(upstream.accepted.try_recv().is_err());

    router.shutdown().await;
}

#[tokio::test]
async fn test_send_and_sendhex() {
    let echo = echo_server().await;
    let (mut router, _rx) = router(None, RouterOptions::default());
    let port = router.registry_mut().create("p1", 0, "127.0.0.1", echo).unwrap().local_port();

    let err = router.dispatch("send client early").await.unwrap_err();
    assert!(matches!(err, ProxyError::NotConnected(_)));

    let mut client = connect(port).await;
    wait_for_session(&router, "p1").await;

    let output = router.dispatch("send client hi there\\r\\n").await.unwrap();
    assert_eq!(output.lines, vec!["[p1] sent 10 bytes to client".to_string()]);
    assert_eq!(read_n(&mut client, 10).await, b"hi there\r\n");

    // Injected towards the echo server, so it comes back to the client
    router.dispatch("sendhex server 50 49 4e 47").await.unwrap();
    assert_eq!(read_n(&mut client, 4).await, b"PING");

    let err = router.dispatch("sendhex server 5").await.unwrap_err();
    assert!(matches!(err, ProxyError::Argument { ref argument, .. } if argument == "hex"));

    router.shutdown().await;
}

#[tokio::test]
async fn test_expanded_variables_keep_control_bytes() {
    let mut upstream = Upstream::start().await;
    let (mut router, _rx) = router(None, RouterOptions::default());
    let port = router.registry_mut().create("p1", 0, "127.0.0.1", upstream.port).unwrap().local_port();

    let _client = connect(port).await;
    wait_for_session(&router, "p1").await;

    router.dispatch("set crlf \\r\\n").await.unwrap();
    router.dispatch("send server $crlf").await.unwrap();
    assert_eq!(upstream.read_exact(2).await, b"\r\n");

    router.dispatch("set request GET / HTTP/1.0\\r\\n\\r\\n").await.unwrap();
    router.dispatch("send server $(request)").await.unwrap();
    assert_eq!(upstream.read_exact(18).await, b"GET / HTTP/1.0\r\n\r\n");

    router.registry().store().set("blob", Value::Bytes(vec![0x00, 0xff, b'\\'])).unwrap();
    let output = router.dispatch("send server $blob").await.unwrap();
    assert_eq!(output.lines, vec!["[p1] sent 3 bytes to server".to_string()]);
    assert_eq!(upstream.read_exact(3).await, vec![0x00, 0xff, b'\\']);

    router.shutdown().await;
}

#[tokio::test]
async fn test_sendfile() {
    let dir = tempdir().unwrap();
    let file = dir.path().join("payload.bin");
    fs::write(&file, [0x00, 0x01, 0xfe, 0xff, b'\n']).unwrap();

    let echo = echo_server().await;
    let (mut router, _rx) = router(None, RouterOptions::default());
    let port = router.registry_mut().create("p1", 0, "127.0.0.1", echo).unwrap().local_port();

    let err = router.dispatch(&format!("sendfile server {}", file.display())).await.unwrap_err();
    assert!(matches!(err, ProxyError::NotConnected(_)));

    let mut client = connect(port).await;
    wait_for_session(&router, "p1").await;

    let output = router.dispatch(&format!("sendfile client {}", file.display())).await.unwrap();
    assert!(output.lines[0].starts_with("[p1] sent 5 bytes from"));
    assert_eq!(read_n(&mut client, 5).await, [0x00, 0x01, 0xfe, 0xff, b'\n']);

    // Towards the echo server and back
    router.dispatch(&format!("sendfile server {}", file.display())).await.unwrap();
    assert_eq!(read_n(&mut client, 5).await, [0x00, 0x01, 0xfe, 0xff, b'\n']);

    let missing = dir.path().join("missing.bin");
    assert!(router.dispatch(&format!("sendfile server {}", missing.display())).await.is_err());

    router.shutdown().await;
}

#[tokio::test]
async fn test_display_overrides_survive_reload() {
    let dir = tempdir().unwrap();
    let module = dir.path().join("watch.json");
    fs::write(&module, r#"{ "name": "watch", "display": { "format": "hexdump" } }"#).unwrap();

    let echo = echo_server().await;
    let (mut router, mut rx) = router(Some(module.clone()), RouterOptions::default());
    let port = router.registry_mut().create("p1", 0, "127.0.0.1", echo).unwrap().local_port();
    let mut client = connect(port).await;
    wait_for_session(&router, "p1").await;

    let is_notify = |line: &String| line.contains("[PKT# ");
    let is_hexdump = |line: &String| line.starts_with("0000  ");

    client.write_all(b"ping").await.unwrap();
    assert_eq!(read_n(&mut client, 4).await, b"ping");
    let mut lines = Vec::new();
    assert!(eventually(|| {
        lines.extend(console_lines(&mut rx));
        lines.iter().filter(|&line| is_notify(line)).count() >= 2
    })
    .await);
    assert!(lines.iter().any(is_hexdump));

    let output = router.dispatch("notify no").await.unwrap();
    assert_eq!(output.lines, vec!["Chunk notifications of 'p1' are off".to_string()]);
    let output = router.dispatch("dump none").await.unwrap();
    assert_eq!(output.lines, vec!["Dump format of 'p1': none, 16 bytes per line (override)".to_string()]);

    // A reload keeps the overrides
    fs::write(&module, r#"{ "name": "watch", "description": "edited", "display": { "format": "hexdump" } }"#).unwrap();
    router.dispatch("list").await.unwrap();
    assert_eq!(router.registry().selected().unwrap().module().version(), 2);
    console_lines(&mut rx);

    client.write_all(b"pong").await.unwrap();
    assert_eq!(read_n(&mut client, 4).await, b"pong");
    tokio::time::sleep(Duration::from_millis(100)).await;
    let quiet = console_lines(&mut rx);
    assert!(!quiet.iter().any(is_notify), "unexpected output: {:?}", quiet);
    assert!(!quiet.iter().any(is_hexdump), "unexpected output: {:?}", quiet);

    // Toggling and restoring the module's own settings
    let output = router.dispatch("notify").await.unwrap();
    assert_eq!(output.lines, vec!["Chunk notifications of 'p1' are on".to_string()]);
    let output = router.dispatch("dump plain 8").await.unwrap();
    assert_eq!(output.lines, vec!["Dump format of 'p1': plain, 8 bytes per line (override)".to_string()]);
    let output = router.dispatch("dump module").await.unwrap();
    assert_eq!(output.lines, vec!["Dump format of 'p1': hexdump, 16 bytes per line (module)".to_string()]);

    client.write_all(b"back").await.unwrap();
    assert_eq!(read_n(&mut client, 4).await, b"back");
    let mut lines = Vec::new();
    assert!(eventually(|| {
        lines.extend(console_lines(&mut rx));
        lines.iter().filter(|&line| is_notify(line)).count() >= 2
    })
    .await);

    let err = router.dispatch("dump plain 0").await.unwrap_err();
    assert!(matches!(err, ProxyError::Argument { ref argument, .. } if argument == "bytesPerLine"));

    router.shutdown().await;
}

#[tokio::test]
async fn test_pack_unpack_and_convert() {
    let (mut router, _rx) = router(None, RouterOptions::default());

    let output = router.dispatch("pack int little_endian 255 0377 0xFF").await.unwrap();
    assert_eq!(output.lines[1], "Hex: FF000000FF000000FF000000");
    let output = router.dispatch("pack uchar big_endian x41 x42").await.unwrap();
    assert_eq!(output.lines, vec!["Packed: AB".to_string(), "Hex: 4142".to_string()]);

    let output = router.dispatch("unpack short network ff fe 00 01").await.unwrap();
    assert_eq!(output.lines, vec!["Unpacked: -2, 1".to_string()]);
    let err = router.dispatch("unpack int little_endian 010203").await.unwrap_err();
    assert!(matches!(err, ProxyError::Argument { ref argument, .. } if argument == "hex"));
    let err = router.dispatch("pack size_t big_endian 1").await.unwrap_err();
    assert!(matches!(err, ProxyError::Argument { ref argument, .. } if argument == "byteOrder"));

    let output = router.dispatch("convert 0x41").await.unwrap();
    assert_eq!(output.lines[0], "DEC: 65");
    assert_eq!(output.lines[3], "BIN: 0b1000001");
    let output = router.dispatch("convert 101 oct").await.unwrap();
    assert_eq!(output.lines[0], "DEC: 65");

    // Values from the store go through expansion like any other argument
    router.dispatch("set n 16").await.unwrap();
    let output = router.dispatch("convert $n").await.unwrap();
    assert_eq!(output.lines[1], "HEX: 0x10");
}

#[tokio::test]
async fn test_disconnect_keeps_listening() {
    let echo = echo_server().await;
    let (mut router, _rx) = router(None, RouterOptions::default());
    let port = router.registry_mut().create("p1", 0, "127.0.0.1", echo).unwrap().local_port();

    let mut client = connect(port).await;
    wait_for_session(&router, "p1").await;

    let output = router.dispatch("disconnect").await.unwrap();
    assert_eq!(output.lines, vec!["Disconnected session of 'p1'".to_string()]);
    assert!(is_closed(&mut client).await);

    let output = router.dispatch("disconnect p1").await.unwrap();
    assert_eq!(output.lines, vec!["Proxy 'p1' has no client connected".to_string()]);

    let mut again = connect(port).await;
    again.write_all(b"back").await.unwrap();
    assert_eq!(read_n(&mut again, 4).await, b"back");

    router.shutdown().await;
}

#[tokio::test]
async fn test_kill_selects_most_recent_survivor() {
    let echo = echo_server().await;
    let (mut router, _rx) = router(None, RouterOptions::default());
    for name in ["a", "b", "c"] {
        router.registry_mut().create(name, 0, "127.0.0.1", echo).unwrap();
    }

    router.dispatch("select a").await.unwrap();
    let output = router.dispatch("kill").await.unwrap();
    assert_eq!(output.lines, vec!["Killed proxy 'a'".to_string(), "Selected proxy 'c'".to_string()]);

    let output = router.dispatch("kill b").await.unwrap();
    assert_eq!(output.lines[1], "Selected proxy 'c'");

    let output = router.dispatch("kill").await.unwrap();
    assert_eq!(output.lines, vec!["Killed proxy 'c'".to_string(), "No proxies remaining".to_string()]);

    assert_eq!(router.dispatch("list").await.unwrap().lines, vec!["No proxies".to_string()]);
    let err = router.dispatch("select c").await.unwrap_err();
    assert!(matches!(err, ProxyError::NoActiveProxy));
    let err = router.dispatch("kill").await.unwrap_err();
    assert!(matches!(err, ProxyError::NoActiveProxy));
}

#[tokio::test]
async fn test_select_by_port_and_rename() {
    let echo = echo_server().await;
    let (mut router, _rx) = router(None, RouterOptions::default());
    let port = router.registry_mut().create("a", 0, "127.0.0.1", echo).unwrap().local_port();
    router.registry_mut().create("b", 0, "127.0.0.1", echo).unwrap();

    let output = router.dispatch(&format!("select {}", port)).await.unwrap();
    assert_eq!(output.lines, vec!["Selected proxy 'a'".to_string()]);

    let err = router.dispatch("rename b").await.unwrap_err();
    assert!(matches!(err, ProxyError::NameCollision(ref name) if name == "b"));
    let err = router.dispatch("select nope").await.unwrap_err();
    assert!(matches!(err, ProxyError::UnknownProxy(_)));

    router.dispatch("rename alpha").await.unwrap();
    assert!(router.registry().get("alpha").is_some());
    assert!(router.registry().get("a").is_none());

    router.shutdown().await;
}

#[tokio::test]
async fn test_create_rejects_name_collision_before_binding() {
    let echo = echo_server().await;
    let (mut router, _rx) = router(None, RouterOptions::default());
    let port = router.registry_mut().create("p1", 0, "127.0.0.1", echo).unwrap().local_port();

    // Port 1 would fail to bind; the name check comes first
    let err = router.dispatch("create p1 127.0.0.1 1 80").await.unwrap_err();
    assert!(matches!(err, ProxyError::NameCollision(ref name) if name == "p1"));

    let err = router.dispatch(&format!("create p2 127.0.0.1 {} 80", port)).await.unwrap_err();
    assert!(matches!(err, ProxyError::Bind { .. }));

    let err = router.dispatch("create 9lives 127.0.0.1 2000 80").await.unwrap_err();
    assert!(matches!(err, ProxyError::InvalidName { .. }));

    assert_eq!(router.registry().len(), 1);
    assert_eq!(router.registry().selected().unwrap().name(), "p1");

    router.shutdown().await;
}

#[tokio::test]
async fn test_run_script() {
    let dir = tempdir().unwrap();
    let script = dir.path().join("setup.txt");
    fs::write(&script, "set a 1\n# comment\n\nset b $(a)2\n").unwrap();

    let (mut router, _rx) = router(None, RouterOptions::default());
    let output = router.dispatch(&format!("run {}", script.display())).await.unwrap();
    assert!(output.lines[0].ends_with("done, 4 lines run"));

    let store = router.registry().store().clone();
    assert_eq!(store.get("b"), Some(Value::Int(12)));

    // Only the run command itself is recorded
    assert_eq!(router.history().len(), 1);

    // Start at line 4
    store.clear();
    store.set("a", 7i64).unwrap();
    router.dispatch(&format!("run {} 4", script.display())).await.unwrap();
    assert_eq!(store.get("b"), Some(Value::Int(72)));
}

#[tokio::test]
async fn test_run_script_stops_at_failing_line() {
    let dir = tempdir().unwrap();
    let script = dir.path().join("broken.txt");
    fs::write(&script, "set x 1\nbogus command\nset y 2\n").unwrap();

    let (mut router, _rx) = router(None, RouterOptions::default());
    let err = router.dispatch(&format!("run {}", script.display())).await.unwrap_err();
    match &err {
        ProxyError::Script { path, line, source } => {
            assert_eq!(path, &script);
            assert_eq!(*line, 2);
            assert!(matches!(**source, ProxyError::UnknownCommand(ref name) if name == "bogus"));
        }
        other => panic!("unexpected error: {}", other),
    }
    assert!(err.to_string().contains("line 2"), "unexpected error: {}", err);

    let store = router.registry().store();
    assert!(store.contains("x"));
    assert!(!store.contains("y"));
}

#[tokio::test]
async fn test_script_nesting_is_bounded() {
    let dir = tempdir().unwrap();
    let script = dir.path().join("loop.txt");
    fs::write(&script, format!("run {}\n", script.display())).unwrap();

    let (mut router, _rx) = router(None, RouterOptions::default());
    let err = router.dispatch(&format!("run {}", script.display())).await.unwrap_err();
    assert!(err.to_string().contains("nesting"), "unexpected error: {}", err);
}

#[tokio::test]
async fn test_savevars_and_loadvars() {
    let dir = tempdir().unwrap();
    let vars_file = dir.path().join("vars.json");
    let options = RouterOptions {
        vars_file: Some(vars_file.clone()),
    };
    let (mut router, _rx) = router(None, options);

    router.dispatch("set count 3").await.unwrap();
    router.dispatch("set greeting hello\\r\\n").await.unwrap();
    router.dispatch("savevars").await.unwrap();
    assert!(vars_file.exists());

    router.dispatch("clearvars").await.unwrap();
    assert!(router.registry().store().is_empty());

    let output = router.dispatch("loadvars").await.unwrap();
    assert!(output.lines[0].starts_with("Loaded 2 variables"));
    let store = router.registry().store();
    assert_eq!(store.get("count"), Some(Value::Int(3)));
    assert_eq!(store.get("greeting"), Some(Value::Text("hello\r\n".into())));
}

#[tokio::test]
async fn test_loadvars_is_all_or_nothing() {
    let dir = tempdir().unwrap();
    let bad = dir.path().join("bad.json");
    fs::write(&bad, r#"{"fine": 1, "not fine": 2}"#).unwrap();

    let (mut router, _rx) = router(None, RouterOptions::default());
    router.dispatch("set keep yes").await.unwrap();

    let err = router.dispatch(&format!("loadvars {}", bad.display())).await.unwrap_err();
    assert!(matches!(err, ProxyError::Variable(_)));

    let store = router.registry().store();
    assert!(!store.contains("fine"));
    assert_eq!(store.get("keep"), Some(Value::Text("yes".into())));
}

#[tokio::test]
async fn test_history_listing_and_references() {
    let (mut router, _rx) = router(None, RouterOptions::default());
    router.dispatch("set n 1").await.unwrap();
    router.dispatch("vars n").await.unwrap();

    let output = router.dispatch("!!").await.unwrap();
    assert_eq!(output.lines, vec!["n = 1 (int)".to_string()]);

    let output = router.dispatch("history").await.unwrap();
    assert_eq!(output.lines.len(), 4);
    assert!(output.lines[0].ends_with("set n 1"));
    assert!(output.lines[3].ends_with("history"));

    let err = router.dispatch("!42").await.unwrap_err();
    assert!(matches!(err, ProxyError::History(_)));

    router.dispatch("history 1").await.unwrap();
    assert_eq!(router.history().get(1), Some("vars n"));
}

#[tokio::test]
async fn test_module_command_with_arguments() {
    let dir = tempdir().unwrap();
    let module = dir.path().join("greeter.json");
    fs::write(
        &module,
        r#"{
            "name": "greeter",
            "commands": {
                "greet": {
                    "help": "Greet the client",
                    "args": [
                        { "name": "who", "type": "word" },
                        { "name": "times", "type": "int", "min": 1, "max": 3, "optional": true }
                    ],
                    "actions": [
                        { "send_to_client": { "text": "hello $(who)\n" } },
                        { "print": "greeted $(who)" }
                    ]
                }
            }
        }"#,
    )
    .unwrap();

    let echo = echo_server().await;
    let (mut router, _rx) = router(Some(module), RouterOptions::default());
    let port = router.registry_mut().create("p1", 0, "127.0.0.1", echo).unwrap().local_port();

    let mut client = connect(port).await;
    wait_for_session(&router, "p1").await;

    let output = router.dispatch("greet bob").await.unwrap();
    assert_eq!(output.lines, vec!["greeted bob".to_string()]);
    assert_eq!(read_n(&mut client, 10).await, b"hello bob\n");

    let err = router.dispatch("greet bob 9").await.unwrap_err();
    assert!(matches!(err, ProxyError::Argument { ref argument, .. } if argument == "times"));

    let output = router.dispatch("help greet").await.unwrap();
    assert!(output.lines[0].starts_with("greet <who> [times]"));

    // Core commands take precedence and unknown words still fail
    let err = router.dispatch("wave").await.unwrap_err();
    assert!(matches!(err, ProxyError::UnknownCommand(_)));

    router.shutdown().await;
}

#[tokio::test]
async fn test_module_timer_runs_without_session() {
    let dir = tempdir().unwrap();
    let module = dir.path().join("ticker.json");
    fs::write(
        &module,
        r#"{ "name": "ticker", "timers": [ { "every_ms": 20, "actions": [ { "increment": "ticks" } ] } ] }"#,
    )
    .unwrap();

    let echo = echo_server().await;
    let (mut router, _rx) = router(Some(module), RouterOptions::default());
    router.registry_mut().create("p1", 0, "127.0.0.1", echo).unwrap();

    let store = router.registry().store().clone();
    let ticked = eventually(|| store.get("ticks").and_then(|v| v.as_int()).unwrap_or(0) >= 3).await;
    assert!(ticked);

    // Timers stop with the instance
    router.dispatch("kill").await.unwrap();
    let before = store.get("ticks");
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(store.get("ticks"), before);
}

const TAGGER: &str = r#"{
    "name": "tagger",
    "display": { "notify": false, "format": "none" },
    "parse": {
        "client": [ { "then": [ { "increment": "chunks" }, { "set_payload": { "text": "$(payload)|" } } ] } ]
    }
}"#;

/// Collect from `upstream` until `done` holds for everything received
async fn collect_until(upstream: &mut Upstream, done: impl Fn(&[u8]) -> bool) -> Vec<u8> {
    let mut received = Vec::new();
    while !done(&received) {
        let more = upstream.read_exact(1).await;
        if more.is_empty() {
            break;
        }
        received.extend(more);
    }
    received
}

#[tokio::test]
async fn test_chunks_are_parsed_once_in_order() {
    let dir = tempdir().unwrap();
    let module = dir.path().join("tagger.json");
    fs::write(&module, TAGGER).unwrap();

    let mut upstream = Upstream::start().await;
    let (mut router, _rx) = router(Some(module), RouterOptions::default());
    let port = router.registry_mut().create("p1", 0, "127.0.0.1", upstream.port).unwrap().local_port();
    let mut client = connect(port).await;
    wait_for_session(&router, "p1").await;
    let store = router.registry().store().clone();

    // One chunk at a time: every chunk is tagged exactly once
    for i in 0..20 {
        let chunk = format!("{},", i);
        client.write_all(chunk.as_bytes()).await.unwrap();
        let expected = format!("{}|", chunk);
        assert_eq!(upstream.read_exact(expected.len()).await, expected.as_bytes());
    }
    assert_eq!(store.get("chunks"), Some(Value::Int(20)));
    store.clear();

    // Back to back: however the reads split the stream, order is kept and
    // every parsed chunk adds one tag
    let mut expected = Vec::new();
    for i in 0..500 {
        let chunk = format!("{},", i);
        expected.extend_from_slice(chunk.as_bytes());
        client.write_all(chunk.as_bytes()).await.unwrap();
    }
    let payload_len = expected.len();
    let received = collect_until(&mut upstream, |data| data.iter().filter(|&&b| b != b'|').count() >= payload_len).await;
    assert!(upstream.stays_silent(Duration::from_millis(100)).await);

    let stripped: Vec<u8> = received.iter().copied().filter(|&b| b != b'|').collect();
    assert_eq!(stripped, expected);
    assert_eq!(received.last(), Some(&b'|'));
    assert!(!received.windows(2).any(|pair| pair == b"||"));
    let tags = received.iter().filter(|&&b| b == b'|').count() as i64;
    assert_eq!(store.get("chunks"), Some(Value::Int(tags)));

    router.shutdown().await;
}

#[tokio::test]
async fn test_kill_flushes_queued_injection() {
    let dir = tempdir().unwrap();
    let file = dir.path().join("bulk.bin");
    let payload: Vec<u8> = (0..1024 * 1024).map(|i| (i % 251) as u8).collect();
    fs::write(&file, &payload).unwrap();

    let mut upstream = Upstream::start().await;
    let (mut router, _rx) = router(None, RouterOptions::default());
    let port = router.registry_mut().create("p1", 0, "127.0.0.1", upstream.port).unwrap().local_port();
    let mut client = connect(port).await;
    wait_for_session(&router, "p1").await;

    router.dispatch(&format!("sendfile server {}", file.display())).await.unwrap();
    router.dispatch("kill").await.unwrap();

    let received = upstream.read_exact(payload.len()).await;
    assert_eq!(received.len(), payload.len());
    assert!(received == payload, "queued bytes arrived out of order");
    assert!(is_closed(&mut client).await);
}

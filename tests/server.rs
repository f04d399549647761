//! End-to-end tests over real sockets.
//!
//! Each test spawns its own server on an ephemeral port. The server is built
//! inside its thread because it is deliberately single-threaded state; only
//! the bound address crosses back.

use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use maison::{Handler, Payload, Server, ServerConfig};

fn spawn_server<F>(config: ServerConfig, setup: F) -> SocketAddr
where
    F: FnOnce(&mut Server) + Send + 'static,
{
    let _ = env_logger::builder().is_test(true).try_init();

    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut server = Server::with_config(config);
        setup(&mut server);
        let bound = server.bind("127.0.0.1:0").expect("bind failed");
        tx.send(bound.local_addr()).unwrap();
        let _ = bound.run();
    });
    rx.recv().expect("server did not start")
}

/// Sends one request and reads until the server closes. Read errors after the
/// first bytes are tolerated; a reset can race the tail of a response.
fn send_request(addr: SocketAddr, request: &str) -> String {
    let mut stream = TcpStream::connect(addr).unwrap();
    stream.write_all(request.as_bytes()).unwrap();
    read_to_close(&mut stream)
}

fn read_to_close(stream: &mut TcpStream) -> String {
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    let mut out = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => out.extend_from_slice(&chunk[..n]),
            Err(_) => break,
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Keeps reading a long-lived stream until `needle` shows up.
fn read_until(stream: &mut TcpStream, needle: &str) -> String {
    stream
        .set_read_timeout(Some(Duration::from_millis(100)))
        .unwrap();
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut collected = Vec::new();
    let mut chunk = [0u8; 512];
    while Instant::now() < deadline {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                collected.extend_from_slice(&chunk[..n]);
                let text = String::from_utf8_lossy(&collected);
                if text.contains(needle) {
                    return text.into_owned();
                }
            }
            Err(ref e)
                if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut =>
            {
                continue
            }
            Err(e) => panic!("read failed: {}", e),
        }
    }
    panic!(
        "timed out waiting for {:?}; got {:?}",
        needle,
        String::from_utf8_lossy(&collected)
    );
}

fn body_of(response: &str) -> &str {
    response
        .split_once("\r\n\r\n")
        .map(|(_, body)| body)
        .unwrap_or("")
}

#[test]
fn hello_world() {
    let addr = spawn_server(ServerConfig::default(), |server| {
        server.install(Handler::new("hello-world").body(|_| Ok(Payload::from("Hello"))));
    });

    let response = send_request(addr, "GET /hello-world HTTP/1.1\r\n\r\n");

    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(response.contains("Content-Type: text/html; charset=utf-8\r\n"));
    assert!(response.contains("Content-Length: 5\r\n"));
    assert_eq!(body_of(&response), "Hello");
}

#[test]
fn typed_integer_parameters_add_up() {
    let addr = spawn_server(ServerConfig::default(), |server| {
        server.install(
            Handler::new("add")
                .typed("a", "integer")
                .typed("b", "integer")
                .body(|env| Ok(Payload::from(env.int("a").unwrap() + env.int("b").unwrap()))),
        );
    });

    let response = send_request(addr, "GET /add?a=3&b=4 HTTP/1.1\r\n\r\n");
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
    assert_eq!(body_of(&response), "7");

    // a missing parameter rejects before the body runs
    let response = send_request(addr, "GET /add?a=3 HTTP/1.1\r\n\r\n");
    assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"));
}

#[test]
fn body_parameters_merge_with_query() {
    let addr = spawn_server(ServerConfig::default(), |server| {
        server.install(
            Handler::new("echo")
                .param("word")
                .body(|env| Ok(Payload::from(env.str("word").unwrap().to_owned()))),
        );
    });

    let response = send_request(
        addr,
        "POST /echo?word=query HTTP/1.1\r\nContent-Length: 9\r\n\r\nword=body",
    );
    // the body value was inserted last, so it wins
    assert_eq!(body_of(&response), "body");
}

#[test]
fn predicate_violation_is_rejected() {
    let addr = spawn_server(ServerConfig::default(), |server| {
        server.install(
            Handler::new("even-small")
                .typed("n", "integer")
                .check(|b| b.int("n").map_or(false, |n| (2..=64).contains(&n)))
                .check(|b| b.int("n").map_or(false, |n| n % 2 == 0))
                .body(|env| Ok(Payload::from(env.int("n").unwrap()))),
        );
    });

    let ok = send_request(addr, "GET /even-small?n=8 HTTP/1.1\r\n\r\n");
    assert!(ok.starts_with("HTTP/1.1 200 OK\r\n"));
    assert_eq!(body_of(&ok), "8");

    let rejected = send_request(addr, "GET /even-small?n=3 HTTP/1.1\r\n\r\n");
    assert!(rejected.starts_with("HTTP/1.1 400 Bad Request\r\n"));
}

#[test]
fn json_handlers_encode_their_payload() {
    let addr = spawn_server(ServerConfig::default(), |server| {
        server.install(
            Handler::new("pair")
                .json()
                .body(|_| Ok(Payload::Json(serde_json::json!({"a": 1})))),
        );
    });

    let response = send_request(addr, "GET /pair HTTP/1.1\r\n\r\n");
    assert!(response.contains("Content-Type: application/json; charset=utf-8\r\n"));
    assert_eq!(body_of(&response), "{\"a\":1}");
}

#[test]
fn redirect_handler() {
    let addr = spawn_server(ServerConfig::default(), |server| {
        server.install(Handler::redirect("old", "/new", false));
    });

    let response = send_request(addr, "GET /old HTTP/1.1\r\n\r\n");
    assert!(response.starts_with("HTTP/1.1 307 Temporary Redirect\r\n"));
    assert!(response.contains("Location: /new\r\n"));
    assert_eq!(body_of(&response), "Resource moved...");
}

#[test]
fn unknown_resource_is_404() {
    let addr = spawn_server(ServerConfig::default(), |_| {});
    let response = send_request(addr, "GET /nowhere HTTP/1.1\r\n\r\n");
    assert!(response.starts_with("HTTP/1.1 404 Not Found\r\n"));
}

#[test]
fn wrong_http_version_is_400() {
    let addr = spawn_server(ServerConfig::default(), |_| {});
    let response = send_request(addr, "GET / HTTP/1.0\r\n\r\n");
    assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"));
}

#[test]
fn handler_errors_become_500() {
    let addr = spawn_server(ServerConfig::default(), |server| {
        server.install(
            Handler::new("boom").body(|_| Err(maison::HandlerError::from("it broke"))),
        );
        server.install(
            Handler::new("panic")
                .body(|_| -> Result<Payload, maison::HandlerError> { panic!("unexpected") }),
        );
    });

    let response = send_request(addr, "GET /boom HTTP/1.1\r\n\r\n");
    assert!(response.starts_with("HTTP/1.1 500 Internal Server Error\r\n"));

    let response = send_request(addr, "GET /panic HTTP/1.1\r\n\r\n");
    assert!(response.starts_with("HTTP/1.1 500 Internal Server Error\r\n"));

    // the loop survives both
    let response = send_request(addr, "GET /boom HTTP/1.1\r\n\r\n");
    assert!(response.starts_with("HTTP/1.1 500 Internal Server Error\r\n"));
}

#[test]
fn oversize_request_gets_413() {
    let config = ServerConfig {
        max_request_size: 128,
        ..ServerConfig::default()
    };
    let addr = spawn_server(config, |_| {});

    let mut stream = TcpStream::connect(addr).unwrap();
    // twice the bound and no terminator in sight
    stream.write_all(&[b'a'; 600]).unwrap();
    let response = read_to_close(&mut stream);
    assert!(response.starts_with("HTTP/1.1 413 Payload Too Large\r\n"));
}

#[test]
fn sessions_set_a_cookie_exactly_once() {
    let addr = spawn_server(ServerConfig::default(), |server| {
        server.install(Handler::new("hello-world").body(|_| Ok(Payload::from("Hello"))));
    });

    let first = send_request(addr, "GET /hello-world HTTP/1.1\r\n\r\n");
    let token = first
        .lines()
        .find_map(|line| line.strip_prefix("Set-Cookie: "))
        .expect("first response must set a cookie")
        .trim()
        .to_owned();
    assert_eq!(token.len(), 64);

    // replaying the token: same session, no new cookie
    let second = send_request(
        addr,
        &format!("GET /hello-world HTTP/1.1\r\nCookie: {}\r\n\r\n", token),
    );
    assert!(second.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(!second.contains("Set-Cookie:"));

    // an unknown token is replaced with a fresh one
    let third = send_request(
        addr,
        "GET /hello-world HTTP/1.1\r\nCookie: bogus\r\n\r\n",
    );
    assert!(third.contains("Set-Cookie:"));
}

#[test]
fn sse_subscribe_publish_and_reap() {
    let addr = spawn_server(ServerConfig::default(), |server| {
        server.install(Handler::new("listen").stream().body(|env| {
            env.subscribe("chat");
            Ok(Payload::Empty)
        }));
        server.install(Handler::new("say").param("message").body(|env| {
            let message = env.str("message").unwrap().to_owned();
            let delivered = env.publish("chat", &message);
            Ok(Payload::from(delivered as i64))
        }));
    });

    let mut listener = TcpStream::connect(addr).unwrap();
    listener.write_all(b"GET /listen HTTP/1.1\r\n\r\n").unwrap();

    let opening = read_until(&mut listener, "data: Listening...\n\n");
    assert!(opening.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(opening.contains("Content-Type: text/event-stream; charset=utf-8\r\n"));
    assert!(opening.contains("Connection: keep-alive\r\n"));

    // another request's handler publishes to the channel
    let response = send_request(addr, "GET /say?message=hi HTTP/1.1\r\n\r\n");
    assert_eq!(body_of(&response), "1");
    read_until(&mut listener, "data: hi\n\n");

    // closing the subscriber makes a later publish reap it, without error
    drop(listener);
    let mut delivered = String::new();
    for _ in 0..20 {
        let response = send_request(addr, "GET /say?message=bye HTTP/1.1\r\n\r\n");
        delivered = body_of(&response).to_owned();
        if delivered == "0" {
            break;
        }
        thread::sleep(Duration::from_millis(20));
    }
    assert_eq!(delivered, "0");
}

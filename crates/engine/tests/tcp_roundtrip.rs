//! End-to-end exchanges over real loopback sockets.

use std::error::Error;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::time::{Duration, Instant};

use bytes::Bytes;
use http::{Response, StatusCode};

use h1_engine::connection::Step;
use h1_engine::handler::{BodyEvent, Dispatch, ResponseBody, make_handler};
use h1_engine::protocol::RequestHeader;
use h1_engine::send::FileRegion;
use h1_engine::transport::PlainTransport;
use h1_engine::{Engine, EngineConfig, TerminationReason};

const DEADLINE: Duration = Duration::from_secs(10);

fn socket_pair() -> (PlainTransport, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
    let (server, _) = listener.accept().unwrap();
    client.set_read_timeout(Some(Duration::from_millis(20))).unwrap();
    (PlainTransport::new(server).unwrap(), client)
}

fn hello(
    request: &RequestHeader,
    event: BodyEvent<'_>,
    _ctx: &mut (),
) -> Result<Dispatch, Box<dyn Error + Send + Sync>> {
    match event {
        BodyEvent::Headers => {
            let body = format!("hello from {}", request.uri().path());
            let response = Response::builder().status(StatusCode::OK).body(ResponseBody::Full(Bytes::from(body)))?;
            Ok(Dispatch::Respond(response))
        }
        _ => Ok(Dispatch::NeedBody),
    }
}

/// Drains whatever the client can read right now.
fn read_available(client: &mut TcpStream, into: &mut Vec<u8>) {
    let mut chunk = [0u8; 4096];
    loop {
        match client.read(&mut chunk) {
            Ok(0) => return,
            Ok(n) => into.extend_from_slice(&chunk[..n]),
            Err(_) => return,
        }
    }
}

#[test]
fn close_roundtrip_over_tcp() {
    let engine = Engine::new(EngineConfig::default());
    let (transport, mut client) = socket_pair();
    let mut connection = engine.admit(transport, make_handler(hello)).unwrap();

    client.write_all(b"GET /greeting HTTP/1.1\r\nConnection: close\r\n\r\n").unwrap();

    let start = Instant::now();
    let reason = loop {
        assert!(start.elapsed() < DEADLINE, "connection never closed");
        match connection.advance(Instant::now()) {
            Step::Closed(reason) => break reason,
            Step::Continue(_) => std::thread::yield_now(),
        }
    };
    assert_eq!(reason, TerminationReason::Completed);

    let mut received = Vec::new();
    read_available(&mut client, &mut received);
    let text = String::from_utf8(received).unwrap();
    assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(text.ends_with("hello from /greeting"));
}

#[test]
fn keep_alive_pipelining_over_tcp() {
    let engine = Engine::new(EngineConfig::default());
    let (transport, mut client) = socket_pair();
    let mut connection = engine.admit(transport, make_handler(hello)).unwrap();

    client.write_all(b"GET /one HTTP/1.1\r\n\r\nGET /two HTTP/1.1\r\n\r\n").unwrap();

    let start = Instant::now();
    let mut received = Vec::new();
    loop {
        assert!(start.elapsed() < DEADLINE, "responses never arrived");
        match connection.advance(Instant::now()) {
            Step::Closed(reason) => panic!("closed unexpectedly: {reason:?}"),
            Step::Continue(_) => {}
        }
        read_available(&mut client, &mut received);
        if received.windows(b"/two".len()).any(|w| w == b"/two") {
            break;
        }
    }

    let text = String::from_utf8(received).unwrap();
    assert_eq!(text.matches("HTTP/1.1 200 OK").count(), 2);
    let one = text.find("hello from /one").unwrap();
    let two = text.find("hello from /two").unwrap();
    assert!(one < two);
    assert_eq!(engine.active_connections(), 1);
}

#[test]
fn file_region_served_over_tcp() {
    let mut path = std::env::temp_dir();
    path.push(format!("h1-engine-tcp-test-{}", std::process::id()));
    let payload: Vec<u8> = (0..64 * 1024).map(|i| (i % 251) as u8).collect();
    let mut file = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(&path)
        .unwrap();
    file.write_all(&payload).unwrap();
    std::fs::remove_file(&path).ok();

    let len = payload.len() as u64;
    let serve_file = move |_req: &RequestHeader,
                           event: BodyEvent<'_>,
                           _ctx: &mut ()|
          -> Result<Dispatch, Box<dyn Error + Send + Sync>> {
        match event {
            BodyEvent::Headers => {
                let region = FileRegion::new(file.try_clone()?, 0, len);
                let response = Response::builder()
                    .status(StatusCode::OK)
                    .header(http::header::CONNECTION, "close")
                    .body(ResponseBody::File(region))?;
                Ok(Dispatch::Respond(response))
            }
            _ => Ok(Dispatch::NeedBody),
        }
    };

    let engine = Engine::new(EngineConfig::default());
    let (transport, mut client) = socket_pair();
    let mut connection = engine.admit(transport, make_handler(serve_file)).unwrap();

    client.write_all(b"GET /download HTTP/1.1\r\n\r\n").unwrap();

    let start = Instant::now();
    let mut received = Vec::new();
    loop {
        assert!(start.elapsed() < DEADLINE, "download never finished");
        let step = connection.advance(Instant::now());
        read_available(&mut client, &mut received);
        if let Step::Closed(reason) = step {
            assert_eq!(reason, TerminationReason::Completed);
            read_available(&mut client, &mut received);
            break;
        }
    }

    let header_end = received.windows(4).position(|w| w == b"\r\n\r\n").unwrap() + 4;
    let header = String::from_utf8(received[..header_end].to_vec()).unwrap();
    assert!(header.contains(&format!("content-length: {len}\r\n")));
    assert_eq!(&received[header_end..], &payload[..]);
}

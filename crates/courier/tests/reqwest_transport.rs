#![cfg(feature = "reqwest")]

use std::io::Write;
use std::sync::Arc;

use courier::data::SessionConfig;
use courier::effects::ReqwestTransport;
use courier::{Request, Session};
use flate2::Compression;
use flate2::write::GzEncoder;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

fn gzip(body: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(body).unwrap();
    encoder.finish().unwrap()
}

/// Serve one gzip-encoded response and hand back the raw request head.
async fn serve_gzip_once(body: &'static [u8]) -> (String, tokio::task::JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut head = Vec::new();
        let mut buf = [0u8; 1024];
        while !head.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = stream.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            head.extend_from_slice(&buf[..n]);
        }

        let encoded = gzip(body);
        let reply = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Encoding: gzip\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            encoded.len()
        );
        stream.write_all(reply.as_bytes()).await.unwrap();
        stream.write_all(&encoded).await.unwrap();
        stream.shutdown().await.unwrap();
        String::from_utf8_lossy(&head).to_lowercase()
    });

    (format!("http://{address}/compressed"), server)
}

#[tokio::test]
async fn test_gzip_response_is_decoded() {
    let (url, server) = serve_gzip_once(b"hello plaintext").await;
    let session = Session::new(Arc::new(ReqwestTransport::new().unwrap()), SessionConfig::default()).unwrap();

    let response = session.data(Request::get(url).no_retry()).send().await.unwrap();
    let head = server.await.unwrap();

    assert!(head.contains("accept-encoding: br;q=1.0, gzip;q=0.9, deflate;q=0.8"));
    assert_eq!(response.status_code(), 200);
    assert_eq!(response.value().map(|b| &b[..]), Some(&b"hello plaintext"[..]));
}

#[test]
fn test_shared_session_outlives_first_runtime() {
    let first = tokio::runtime::Runtime::new().unwrap();
    first.block_on(async {
        Session::shared().unwrap();
    });
    drop(first);

    let second = tokio::runtime::Runtime::new().unwrap();
    second.block_on(async {
        let (url, server) = serve_gzip_once(b"still dispatching").await;
        let response = Session::shared().unwrap().data(Request::get(url).no_retry()).send().await.unwrap();
        server.await.unwrap();
        assert_eq!(response.value().map(|b| &b[..]), Some(&b"still dispatching"[..]));
    });
}

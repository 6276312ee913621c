//! End-to-end tests: real sockets on both sides, a canned origin site and
//! the full proxy pipeline in between.

use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use bofang::config::Config;

/// Canned origin site. Serves a direct m3u8, a JSON parser response, a raw
/// mp4 and an empty page; everything else is 404.
async fn spawn_origin() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        loop {
            let (mut stream, _) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(_) => break,
            };
            tokio::spawn(async move {
                let mut raw = Vec::new();
                let mut buffer = [0u8; 1024];
                loop {
                    match stream.read(&mut buffer).await {
                        Ok(0) => break,
                        Ok(n) => {
                            raw.extend_from_slice(&buffer[..n]);
                            if raw.windows(4).any(|w| w == b"\r\n\r\n") {
                                break;
                            }
                        }
                        Err(_) => return,
                    }
                }
                let request = String::from_utf8_lossy(&raw);
                let path = request
                    .split_whitespace()
                    .nth(1)
                    .unwrap_or("/")
                    .to_string();

                let (status, content_type, body) = if path.starts_with("/a.m3u8") {
                    (
                        "200 OK",
                        "application/vnd.apple.mpegurl",
                        "#EXTM3U\n#EXT-X-ENDLIST\n".to_string(),
                    )
                } else if path.starts_with("/json") {
                    (
                        "200 OK",
                        "application/json",
                        format!(r#"{{"data":{{"url":"http://127.0.0.1:{}/x.mp4"}}}}"#, port),
                    )
                } else if path.starts_with("/x.mp4") {
                    ("200 OK", "video/mp4", "MP4DATA".to_string())
                } else if path.starts_with("/empty") {
                    (
                        "200 OK",
                        "text/html",
                        "<html><body>nothing to play here</body></html>".to_string(),
                    )
                } else {
                    ("404 Not Found", "text/plain", "gone".to_string())
                };

                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    content_type,
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            });
        }
    });

    port
}

fn test_config(tmp: &std::path::Path) -> Config {
    let mut config = Config::default();
    config.resolver.attempt_timeout = 5;
    config.cache.directory = tmp.join("cache").to_string_lossy().into_owned();
    config.hosts.file = tmp.join("hosts.json").to_string_lossy().into_owned();
    config
}

async fn http_get(port: u16, path_and_query: &str) -> String {
    let mut stream = tokio::net::TcpStream::connect(("127.0.0.1", port))
        .await
        .unwrap();
    let request = format!(
        "GET {} HTTP/1.1\r\nHost: 127.0.0.1:{}\r\n\r\n",
        path_and_query, port
    );
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    response
}

#[tokio::test]
async fn test_player_serves_direct_m3u8_via_sniff() {
    let _ = tokio::time::timeout(Duration::from_secs(20), async {
        let origin = spawn_origin().await;
        let tmp = tempfile::tempdir().unwrap();
        let server = bofang::build_server(&test_config(tmp.path())).await.unwrap();
        let port = server.start(0).await.unwrap();

        let target = format!("http://127.0.0.1:{}/a.m3u8", origin);
        let started = Instant::now();
        let response = http_get(
            port,
            &format!("/player?url={}", urlencoding::encode(&target)),
        )
        .await;

        // The sniff strategy answers well inside the attempt timeout
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(response.starts_with("HTTP/1.1 200 OK"), "{}", response);
        assert!(response.contains("Connection: close"));
        assert!(response.contains("#EXTM3U"));

        server.stop().await;
    })
    .await
    .expect("test_player_serves_direct_m3u8_via_sniff timed out");
}

#[tokio::test]
async fn test_player_resolves_json_endpoint() {
    let _ = tokio::time::timeout(Duration::from_secs(20), async {
        let origin = spawn_origin().await;
        let tmp = tempfile::tempdir().unwrap();
        let server = bofang::build_server(&test_config(tmp.path())).await.unwrap();
        let port = server.start(0).await.unwrap();

        let target = format!("http://127.0.0.1:{}/json", origin);
        let response = http_get(
            port,
            &format!("/player?url={}", urlencoding::encode(&target)),
        )
        .await;

        // data.url led to the mp4, which is what the player receives
        assert!(response.starts_with("HTTP/1.1 200 OK"), "{}", response);
        assert!(response.contains("MP4DATA"));

        server.stop().await;
    })
    .await
    .expect("test_player_resolves_json_endpoint timed out");
}

#[tokio::test]
async fn test_player_uses_cached_resolution_on_repeat() {
    let _ = tokio::time::timeout(Duration::from_secs(20), async {
        let origin = spawn_origin().await;
        let tmp = tempfile::tempdir().unwrap();
        let server = bofang::build_server(&test_config(tmp.path())).await.unwrap();
        let port = server.start(0).await.unwrap();

        let target = format!("http://127.0.0.1:{}/json", origin);
        let path = format!("/player?url={}", urlencoding::encode(&target));

        let first = http_get(port, &path).await;
        assert!(first.contains("MP4DATA"));

        let second = http_get(port, &path).await;
        assert!(second.contains("MP4DATA"));

        server.stop().await;
    })
    .await
    .expect("test_player_uses_cached_resolution_on_repeat timed out");
}

#[tokio::test]
async fn test_unresolvable_page_returns_bad_gateway() {
    let _ = tokio::time::timeout(Duration::from_secs(30), async {
        let origin = spawn_origin().await;
        let tmp = tempfile::tempdir().unwrap();
        let server = bofang::build_server(&test_config(tmp.path())).await.unwrap();
        let port = server.start(0).await.unwrap();

        let target = format!("http://127.0.0.1:{}/empty", origin);
        let response = http_get(
            port,
            &format!("/player?url={}", urlencoding::encode(&target)),
        )
        .await;

        assert!(response.starts_with("HTTP/1.1 502 Bad Gateway"), "{}", response);
        assert!(response.contains("no strategy resolved the url"));

        server.stop().await;
    })
    .await
    .expect("test_unresolvable_page_returns_bad_gateway timed out");
}

#[tokio::test]
async fn test_raw_proxy_passthrough() {
    let _ = tokio::time::timeout(Duration::from_secs(20), async {
        let origin = spawn_origin().await;
        let tmp = tempfile::tempdir().unwrap();
        let server = bofang::build_server(&test_config(tmp.path())).await.unwrap();
        let port = server.start(0).await.unwrap();

        let target = format!("http://127.0.0.1:{}/x.mp4", origin);
        let response = http_get(
            port,
            &format!("/proxy?url={}", urlencoding::encode(&target)),
        )
        .await;

        assert!(response.starts_with("HTTP/1.1 200 OK"), "{}", response);
        // Origin status, headers and body come back as-is
        assert!(response.to_lowercase().contains("content-type: video/mp4"));
        assert!(response.ends_with("MP4DATA"));

        server.stop().await;
    })
    .await
    .expect("test_raw_proxy_passthrough timed out");
}

#[tokio::test]
async fn test_proxy_forwards_origin_errors() {
    let _ = tokio::time::timeout(Duration::from_secs(20), async {
        let origin = spawn_origin().await;
        let tmp = tempfile::tempdir().unwrap();
        let server = bofang::build_server(&test_config(tmp.path())).await.unwrap();
        let port = server.start(0).await.unwrap();

        let target = format!("http://127.0.0.1:{}/missing", origin);
        let response = http_get(
            port,
            &format!("/proxy?url={}", urlencoding::encode(&target)),
        )
        .await;

        assert!(response.starts_with("HTTP/1.1 404 Not Found"), "{}", response);

        server.stop().await;
    })
    .await
    .expect("test_proxy_forwards_origin_errors timed out");
}

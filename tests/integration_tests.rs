//! Cross-module integration tests: configuration to running server.

use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use bofang::config::Config;

/// Minimal origin serving a playlist and a large body
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
                let path = request.split_whitespace().nth(1).unwrap_or("/");

                let (content_type, body) = if path.starts_with("/a.m3u8") {
                    (
                        "application/vnd.apple.mpegurl",
                        "#EXTM3U\n#EXT-X-ENDLIST\n".to_string(),
                    )
                } else if path.starts_with("/big.mp4") {
                    ("video/mp4", "x".repeat(8 * 1024))
                } else {
                    ("text/plain", "ok".to_string())
                };

                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
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

fn base_config(tmp: &std::path::Path) -> Config {
    let mut config = Config::default();
    config.resolver.attempt_timeout = 5;
    config.cache.directory = tmp.join("cache").to_string_lossy().into_owned();
    config.hosts.file = tmp.join("hosts.json").to_string_lossy().into_owned();
    config
}

async fn http_get(port: u16, path_and_query: &str) -> String {
    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
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
async fn test_config_file_to_running_server() {
    let _ = tokio::time::timeout(Duration::from_secs(20), async {
        let tmp = tempfile::tempdir().unwrap();
        let config_path = tmp.path().join("config.toml");
        std::fs::write(
            &config_path,
            format!(
                r#"
                [server]
                port = 0
                max_connections = 16
                resources_dir = "{}"

                [logging]
                level = "debug"

                [cache]
                directory = "{}"

                [resolver]
                attempt_timeout = 5

                [[rules.rules]]
                id = "swap"
                pattern = "slow-cdn"
                match_kind = "url_pattern"
                target = "fast-cdn"
                priority = 10
                "#,
                tmp.path().join("www").display(),
                tmp.path().join("cache").display(),
            ),
        )
        .unwrap();

        let config = Config::from_file_with_env(&config_path).await.unwrap();
        assert_eq!(config.server.max_connections, 16);
        assert_eq!(config.rules.as_ref().unwrap().rules.len(), 1);

        let server = bofang::build_server(&config).await.unwrap();
        let port = server.start(config.server.port).await.unwrap();
        assert!(port > 0);

        server.stop().await;
    })
    .await
    .expect("test_config_file_to_running_server timed out");
}

#[tokio::test]
async fn test_rule_rewrite_feeds_the_resolver() {
    let _ = tokio::time::timeout(Duration::from_secs(20), async {
        let origin = spawn_origin().await;
        let tmp = tempfile::tempdir().unwrap();

        // The rule rewrites /page into /a.m3u8 before resolution
        let mut config = base_config(tmp.path());
        config.rules = Some(
            toml::from_str(
                r#"
                [[rules]]
                id = "page-to-playlist"
                pattern = "/page"
                match_kind = "url_pattern"
                target = "/a.m3u8"
                priority = 10
                "#,
            )
            .unwrap(),
        );

        let server = bofang::build_server(&config).await.unwrap();
        let port = server.start(0).await.unwrap();

        let target = format!("http://127.0.0.1:{}/page", origin);
        let response = http_get(
            port,
            &format!("/player?url={}", urlencoding::encode(&target)),
        )
        .await;

        assert!(response.starts_with("HTTP/1.1 200 OK"), "{}", response);
        assert!(response.contains("#EXTM3U"));

        server.stop().await;
    })
    .await
    .expect("test_rule_rewrite_feeds_the_resolver timed out");
}

#[tokio::test]
async fn test_connection_limit_sheds_load() {
    let _ = tokio::time::timeout(Duration::from_secs(20), async {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = base_config(tmp.path());
        config.server.max_connections = 1;

        let server = bofang::build_server(&config).await.unwrap();
        let port = server.start(0).await.unwrap();

        // Occupy the single slot with an idle connection
        let holder = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        // The next socket is accepted and immediately closed, no response
        let mut shed = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        shed.write_all(b"GET /stats HTTP/1.1\r\nHost: x\r\n\r\n")
            .await
            .ok();
        let mut response = String::new();
        shed.read_to_string(&mut response).await.ok();
        assert!(response.is_empty());
        assert!(server.stats().rejected >= 1);

        drop(holder);
        server.stop().await;
    })
    .await
    .expect("test_connection_limit_sheds_load timed out");
}

#[tokio::test]
async fn test_static_resources_and_traversal_guard() {
    let _ = tokio::time::timeout(Duration::from_secs(20), async {
        let tmp = tempfile::tempdir().unwrap();
        let www = tmp.path().join("www");
        std::fs::create_dir_all(&www).unwrap();
        std::fs::write(www.join("index.html"), "<html>bofang</html>").unwrap();

        let mut config = base_config(tmp.path());
        config.server.resources_dir = www.to_string_lossy().into_owned();

        let server = bofang::build_server(&config).await.unwrap();
        let port = server.start(0).await.unwrap();

        // "/" falls back to index.html
        let response = http_get(port, "/").await;
        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.to_lowercase().contains("content-type: text/html"));
        assert!(response.contains("<html>bofang</html>"));

        // Traversal out of the resource root is refused
        let response = http_get(port, "/../config.toml").await;
        assert!(response.starts_with("HTTP/1.1 400 Bad Request"));

        let response = http_get(port, "/missing.css").await;
        assert!(response.starts_with("HTTP/1.1 404 Not Found"));

        server.stop().await;
    })
    .await
    .expect("test_static_resources_and_traversal_guard timed out");
}

#[tokio::test]
async fn test_bandwidth_budget_throttles_transfer() {
    let _ = tokio::time::timeout(Duration::from_secs(30), async {
        let origin = spawn_origin().await;
        let tmp = tempfile::tempdir().unwrap();

        // 4KB per 100ms window against an 8KB body: at least one delay
        let mut config = base_config(tmp.path());
        config.bandwidth.enabled = true;
        config.bandwidth.max_bytes_per_window = 4 * 1024;
        config.bandwidth.window_ms = 100;

        let server = bofang::build_server(&config).await.unwrap();
        let port = server.start(0).await.unwrap();

        let target = format!("http://127.0.0.1:{}/big.mp4", origin);
        let started = std::time::Instant::now();
        let response = http_get(
            port,
            &format!("/proxy?url={}", urlencoding::encode(&target)),
        )
        .await;

        assert!(response.starts_with("HTTP/1.1 200 OK"), "{}", response);
        assert_eq!(response.matches('x').count(), 8 * 1024);
        // The transfer was paced, never refused
        assert!(started.elapsed() >= Duration::from_millis(90));

        server.stop().await;
    })
    .await
    .expect("test_bandwidth_budget_throttles_transfer timed out");
}

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::sync::{Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::connection::ProxyConnection;
use super::{ServerContext, ServerCounters, ServerStats};
use crate::error::{BofangError, BofangResult};
use crate::net::AccessGuard;

/// Registry entry for one live connection; removing it is the only way a
/// connection is forgotten.
pub struct ConnectionHandle {
    pub peer: SocketAddr,
    pub opened_at: Instant,
    handle: JoinHandle<()>,
}

/// Owns the listening socket, admission-controls the connection count and
/// spawns one task per accepted connection.
pub struct ProxyServer {
    ctx: Arc<ServerContext>,
    access: AccessGuard,
    connections: Arc<RwLock<HashMap<u64, ConnectionHandle>>>,
    counters: Arc<ServerCounters>,
    next_id: Arc<AtomicU64>,
    port: AtomicU16,
    running: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
    accept_handle: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl ProxyServer {
    pub fn new(ctx: Arc<ServerContext>, access: AccessGuard) -> Self {
        Self {
            counters: Arc::clone(&ctx.counters),
            ctx,
            access,
            connections: Arc::new(RwLock::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
            port: AtomicU16::new(0),
            running: Arc::new(AtomicBool::new(false)),
            shutdown: Arc::new(Notify::new()),
            accept_handle: std::sync::Mutex::new(None),
        }
    }

    /// Bind the loopback listener and start accepting. `preferred_port` 0
    /// picks any free port; the actual port is returned.
    pub async fn start(&self, preferred_port: u16) -> BofangResult<u16> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(self.port.load(Ordering::SeqCst));
        }

        let bind_addr: SocketAddr = ([127, 0, 0, 1], preferred_port).into();
        let listener = TcpListener::bind(bind_addr).await.map_err(|e| {
            self.running.store(false, Ordering::SeqCst);
            BofangError::io(format!("bind {}: {}", bind_addr, e))
        })?;
        let actual_port = listener
            .local_addr()
            .map_err(|e| BofangError::io(format!("local addr: {}", e)))?
            .port();
        self.port.store(actual_port, Ordering::SeqCst);

        info!("proxy server listening on 127.0.0.1:{}", actual_port);

        let ctx = Arc::clone(&self.ctx);
        let access = self.access.clone();
        let connections = Arc::clone(&self.connections);
        let counters = Arc::clone(&self.counters);
        let running = Arc::clone(&self.running);
        let shutdown = Arc::clone(&self.shutdown);
        let max_connections = self.ctx.config.max_connections;
        let next_id = Arc::clone(&self.next_id);

        let handle = tokio::spawn(async move {
            loop {
                let accepted = tokio::select! {
                    _ = shutdown.notified() => break,
                    accepted = listener.accept() => accepted,
                };

                let (stream, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!("accept failed: {}", e);
                        continue;
                    }
                };
                counters.accepted.fetch_add(1, Ordering::Relaxed);

                // Load shedding: over the cap the socket closes immediately
                let active = connections.read().await.len();
                if active >= max_connections {
                    counters.rejected.fetch_add(1, Ordering::Relaxed);
                    debug!("rejected connection from {} (at capacity)", peer);
                    drop(stream);
                    continue;
                }

                // Peers off the allow-list are closed silently
                if !access.is_allowed(peer.ip()) {
                    counters.denied.fetch_add(1, Ordering::Relaxed);
                    debug!("denied connection from {}", peer);
                    drop(stream);
                    continue;
                }

                let id = next_id.fetch_add(1, Ordering::SeqCst);
                let connection = ProxyConnection::new(id, peer, Arc::clone(&ctx));
                let connections_for_task = Arc::clone(&connections);
                let counters_for_task = Arc::clone(&counters);

                let task = tokio::spawn(async move {
                    connection.handle(stream).await;
                    // The registry entry goes away no matter how handling ended
                    connections_for_task.write().await.remove(&id);
                    counters_for_task.handled.fetch_add(1, Ordering::Relaxed);
                    counters_for_task.active.store(
                        connections_for_task.read().await.len() as u64,
                        Ordering::Relaxed,
                    );
                });

                {
                    let mut registry = connections.write().await;
                    let finished = task.is_finished();
                    registry.insert(
                        id,
                        ConnectionHandle {
                            peer,
                            opened_at: Instant::now(),
                            handle: task,
                        },
                    );
                    if finished {
                        registry.remove(&id);
                    }
                    counters.active.store(registry.len() as u64, Ordering::Relaxed);
                }
            }

            running.store(false, Ordering::SeqCst);
            debug!("accept loop stopped");
        });

        if let Ok(mut guard) = self.accept_handle.lock() {
            *guard = Some(handle);
        }

        Ok(actual_port)
    }

    /// Close the listener and every open connection. Idempotent.
    pub async fn stop(&self) {
        self.shutdown.notify_waiters();

        let handle = self
            .accept_handle
            .lock()
            .ok()
            .and_then(|mut guard| guard.take());
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
        }

        let mut registry = self.connections.write().await;
        let open = registry.len();
        for (_, connection) in registry.drain() {
            // Force-close: unblocks tasks stuck in a read/write
            connection.handle.abort();
        }
        self.counters.active.store(0, Ordering::Relaxed);
        self.running.store(false, Ordering::SeqCst);

        if open > 0 {
            info!("closed {} open connections", open);
        }
        info!("proxy server stopped");
    }

    /// Whether the accept loop is live
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Actual listening port (0 before start)
    pub fn port(&self) -> u16 {
        self.port.load(Ordering::SeqCst)
    }

    /// Externally dialable player URL for an original URL
    pub fn get_proxy_url(&self, original_url: &str) -> String {
        self.get_proxy_url_with(original_url, &[])
    }

    /// Player URL with extra query options (`cache`, `range`, `ua`, ...)
    pub fn get_proxy_url_with(&self, original_url: &str, options: &[(&str, &str)]) -> String {
        let mut url = format!(
            "http://127.0.0.1:{}/player?url={}",
            self.port(),
            urlencoding::encode(original_url)
        );
        for (key, value) in options {
            url.push('&');
            url.push_str(key);
            url.push('=');
            url.push_str(&urlencoding::encode(value));
        }
        url
    }

    /// Connection counter snapshot
    pub fn stats(&self) -> ServerStats {
        self.counters.snapshot()
    }

    /// Shared rule engine, for config hot-reload to swap rule lists into
    pub fn rules_handle(&self) -> Arc<crate::rules::RuleEngine> {
        Arc::clone(&self.ctx.rules)
    }

    /// Number of live connections in the registry
    pub async fn active_connections(&self) -> usize {
        self.connections.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheStore, CacheStoreConfig};
    use crate::config::{CacheTier, ServerConfig};
    use crate::net::{AccessConfig, BandwidthConfig, BandwidthLimiter, HostsResolver, HttpClient};
    use crate::resolver::ResolverChain;
    use crate::rules::{RuleEngine, RulesConfig};
    use crate::spider::NullSpider;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn test_context(max_connections: usize) -> Arc<ServerContext> {
        let hosts = Arc::new(HostsResolver::new(Default::default()));
        let client = HttpClient::new(Arc::clone(&hosts));
        let chain = Arc::new(ResolverChain::with_strategies(
            vec![],
            Duration::from_secs(1),
        ));
        let memory_store = |name: &str| CacheStoreConfig {
            name: name.to_string(),
            enabled: true,
            max_size: 1024 * 1024,
            default_ttl: 60,
            sweep_interval: Duration::from_secs(3600),
            tier: CacheTier::MemoryOnly,
            disk_dir: None,
        };
        let content_cache = CacheStore::new(memory_store("content"));
        let play_history = CacheStore::new(memory_store("history"));
        Arc::new(ServerContext {
            config: ServerConfig {
                max_connections,
                ..Default::default()
            },
            rules: Arc::new(RuleEngine::new(RulesConfig::default()).unwrap()),
            chain,
            content_cache,
            play_history,
            client,
            bandwidth: Arc::new(BandwidthLimiter::new(BandwidthConfig::default())),
            spider: Arc::new(NullSpider),
            counters: Arc::new(ServerCounters::default()),
        })
    }

    fn test_server(max_connections: usize) -> ProxyServer {
        ProxyServer::new(
            test_context(max_connections),
            AccessGuard::new(AccessConfig::default()),
        )
    }

    async fn raw_request(port: u16, raw: &str) -> String {
        let mut stream = tokio::net::TcpStream::connect(("127.0.0.1", port))
            .await
            .unwrap();
        stream.write_all(raw.as_bytes()).await.unwrap();
        let mut response = String::new();
        match stream.read_to_string(&mut response).await {
            Ok(_) => {}
            // A silently-closed peer (denied / load-shed) is dropped with
            // unread inbound data, so the kernel answers with an RST rather
            // than a graceful EOF. No response bytes were delivered either way.
            Err(e) if e.kind() == std::io::ErrorKind::ConnectionReset => {}
            Err(e) => panic!("read failed: {}", e),
        }
        response
    }

    #[tokio::test]
    async fn test_start_picks_free_port_and_stop_is_idempotent() {
        let _ = tokio::time::timeout(Duration::from_secs(10), async {
            let server = test_server(8);
            let port = server.start(0).await.unwrap();
            assert!(port > 0);
            assert!(server.is_running());
            assert_eq!(server.port(), port);

            server.stop().await;
            assert!(!server.is_running());
            // Second stop is a no-op
            server.stop().await;
        })
        .await
        .expect("test_start_picks_free_port_and_stop_is_idempotent timed out");
    }

    #[tokio::test]
    async fn test_get_proxy_url_encodes_original() {
        let _ = tokio::time::timeout(Duration::from_secs(10), async {
            let server = test_server(8);
            let port = server.start(0).await.unwrap();

            let url = server.get_proxy_url("http://site/v?ep=1");
            assert_eq!(
                url,
                format!(
                    "http://127.0.0.1:{}/player?url=http%3A%2F%2Fsite%2Fv%3Fep%3D1",
                    port
                )
            );

            let url = server.get_proxy_url_with("http://site/v", &[("range", "1")]);
            assert!(url.ends_with("&range=1"));

            server.stop().await;
        })
        .await
        .expect("test_get_proxy_url_encodes_original timed out");
    }

    #[tokio::test]
    async fn test_unknown_resource_is_404() {
        let _ = tokio::time::timeout(Duration::from_secs(10), async {
            let server = test_server(8);
            let port = server.start(0).await.unwrap();

            let response = raw_request(port, "GET /no/such/file HTTP/1.1\r\nHost: x\r\n\r\n").await;
            assert!(response.starts_with("HTTP/1.1 404 Not Found"));
            assert!(response.contains("Connection: close"));

            server.stop().await;
        })
        .await
        .expect("test_unknown_resource_is_404 timed out");
    }

    #[tokio::test]
    async fn test_player_without_url_is_400() {
        let _ = tokio::time::timeout(Duration::from_secs(10), async {
            let server = test_server(8);
            let port = server.start(0).await.unwrap();

            let response = raw_request(port, "GET /player HTTP/1.1\r\nHost: x\r\n\r\n").await;
            assert!(response.starts_with("HTTP/1.1 400 Bad Request"));

            server.stop().await;
        })
        .await
        .expect("test_player_without_url_is_400 timed out");
    }

    #[tokio::test]
    async fn test_malformed_request_gets_no_response() {
        let _ = tokio::time::timeout(Duration::from_secs(10), async {
            let server = test_server(8);
            let port = server.start(0).await.unwrap();

            let response = raw_request(port, "NONSENSE\r\n\r\n").await;
            assert!(response.is_empty());

            server.stop().await;
        })
        .await
        .expect("test_malformed_request_gets_no_response timed out");
    }

    #[tokio::test]
    async fn test_stats_route_reports_counters() {
        let _ = tokio::time::timeout(Duration::from_secs(10), async {
            let server = test_server(8);
            let port = server.start(0).await.unwrap();

            let response = raw_request(port, "GET /stats HTTP/1.1\r\nHost: x\r\n\r\n").await;
            assert!(response.starts_with("HTTP/1.1 200 OK"));
            let body = response.split("\r\n\r\n").nth(1).unwrap();
            let parsed: serde_json::Value = serde_json::from_str(body).unwrap();
            assert!(parsed["server"]["accepted"].as_u64().unwrap() >= 1);

            server.stop().await;
        })
        .await
        .expect("test_stats_route_reports_counters timed out");
    }

    #[tokio::test]
    async fn test_denied_peer_is_closed_silently() {
        let _ = tokio::time::timeout(Duration::from_secs(10), async {
            // Allow-list without 127.0.0.1: the loopback peer is denied
            let server = ProxyServer::new(
                test_context(8),
                AccessGuard::new(AccessConfig {
                    allowed_ips: vec!["10.0.0.1".to_string()],
                }),
            );
            let port = server.start(0).await.unwrap();

            let response = raw_request(port, "GET /stats HTTP/1.1\r\nHost: x\r\n\r\n").await;
            assert!(response.is_empty());
            assert!(server.stats().denied >= 1);

            server.stop().await;
        })
        .await
        .expect("test_denied_peer_is_closed_silently timed out");
    }
}

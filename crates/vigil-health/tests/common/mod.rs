//! Test doubles shared by the engine integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use vigil_core::CheckerConfig;

// ── MockHealthServer ─────────────────────────────────────────────────

type RequestHook = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Clone)]
struct Route {
    status: u16,
    body: String,
}

/// A minimal HTTP/1.1 server with per-path hit counters.
///
/// Unrouted paths answer 404. Every response carries `connection: close`
/// so each request arrives on a fresh connection.
pub struct MockHealthServer {
    addr: SocketAddr,
    routes: Arc<Mutex<HashMap<String, Route>>>,
    hits: Arc<Mutex<HashMap<String, u32>>>,
    hook: Arc<Mutex<Option<RequestHook>>>,
}

impl MockHealthServer {
    pub fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind to random port");
        let addr = listener.local_addr().expect("local addr");
        let routes: Arc<Mutex<HashMap<String, Route>>> = Arc::default();
        let hits: Arc<Mutex<HashMap<String, u32>>> = Arc::default();
        let hook: Arc<Mutex<Option<RequestHook>>> = Arc::default();

        let (r, h, k) = (Arc::clone(&routes), Arc::clone(&hits), Arc::clone(&hook));
        std::thread::spawn(move || {
            while let Ok((stream, _)) = listener.accept() {
                let (r, h, k) = (Arc::clone(&r), Arc::clone(&h), Arc::clone(&k));
                std::thread::spawn(move || Self::handle_connection(stream, &r, &h, &k));
            }
        });

        Self {
            addr,
            routes,
            hits,
            hook,
        }
    }

    pub fn route(&self, path: &str, status: u16, body: &str) -> &Self {
        self.routes.lock().unwrap().insert(
            path.to_string(),
            Route {
                status,
                body: body.to_string(),
            },
        );
        self
    }

    pub fn unroute(&self, path: &str) {
        self.routes.lock().unwrap().remove(path);
    }

    /// Run `hook` with the request path before each response is written.
    pub fn on_request(&self, hook: impl Fn(&str) + Send + Sync + 'static) {
        let hook: RequestHook = Arc::new(hook);
        *self.hook.lock().unwrap() = Some(hook);
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn hits(&self, path: &str) -> u32 {
        self.hits.lock().unwrap().get(path).copied().unwrap_or(0)
    }

    pub fn total_hits(&self) -> u32 {
        self.hits.lock().unwrap().values().sum()
    }

    fn handle_connection(
        stream: TcpStream,
        routes: &Mutex<HashMap<String, Route>>,
        hits: &Mutex<HashMap<String, u32>>,
        hook: &Mutex<Option<RequestHook>>,
    ) {
        let mut reader = BufReader::new(stream.try_clone().expect("clone stream"));
        let mut request_line = String::new();
        match reader.read_line(&mut request_line) {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
        // Drain headers.
        loop {
            let mut line = String::new();
            match reader.read_line(&mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) if line == "\r\n" || line == "\n" => break,
                Ok(_) => {}
            }
        }

        let path = request_line
            .split_whitespace()
            .nth(1)
            .unwrap_or("/")
            .to_string();
        *hits.lock().unwrap().entry(path.clone()).or_insert(0) += 1;
        let hook = hook.lock().unwrap().clone();
        if let Some(hook) = hook {
            hook(&path);
        }

        let route = routes.lock().unwrap().get(&path).cloned().unwrap_or(Route {
            status: 404,
            body: String::new(),
        });
        let response = format!(
            "HTTP/1.1 {} Status\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
            route.status,
            route.body.len(),
            route.body
        );
        let mut stream = stream;
        let _ = stream.write_all(response.as_bytes());
        let _ = stream.flush();
    }
}

/// A server that answers every connection with bytes that are not HTTP.
pub fn start_garbage_server() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind to random port");
    let port = listener.local_addr().expect("local addr").port();
    std::thread::spawn(move || {
        while let Ok((mut stream, _)) = listener.accept() {
            let _ = stream.write_all(b"SSH-2.0-OpenSSH_9.6\r\n");
            std::thread::sleep(Duration::from_millis(50));
        }
    });
    port
}

/// A port with nothing listening on it.
pub fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind to random port");
    listener.local_addr().expect("local addr").port()
}

/// Profile with short timeouts for fast tests.
pub fn test_config() -> CheckerConfig {
    CheckerConfig {
        timeout: Duration::from_secs(2),
        ..CheckerConfig::default()
    }
}

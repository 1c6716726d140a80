//! Shared test-only HTTP stub: a minimal single-purpose server standing in for a real
//! docs site, so the six §8 scenario tests exercise `Crawler::fetch_page` against a real
//! socket instead of pre-seeding the page cache. Each test binds its own `127.0.0.1:0`
//! listener, so tests never collide on a port.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

#[derive(Clone)]
struct Route {
    status: &'static str,
    content_type: &'static str,
    body: String,
}

pub struct StubServer {
    addr: SocketAddr,
    routes: Arc<Mutex<HashMap<String, Route>>>,
}

impl StubServer {
    /// Starts the server with an empty route table; every path 404s until `set_page`
    /// (or a variant) is called. A request for an unmapped path — notably `/robots.txt`
    /// — gets a 404, leaving the crawler's robots policy unloaded (allow-all).
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let routes: Arc<Mutex<HashMap<String, Route>>> = Arc::new(Mutex::new(HashMap::new()));
        let routes_for_loop = Arc::clone(&routes);

        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    break;
                };
                let routes = Arc::clone(&routes_for_loop);
                tokio::spawn(async move {
                    let mut buf = [0u8; 4096];
                    let n = stream.read(&mut buf).await.unwrap_or(0);
                    let request = String::from_utf8_lossy(&buf[..n]);
                    let path = request
                        .lines()
                        .next()
                        .unwrap_or("")
                        .split_whitespace()
                        .nth(1)
                        .unwrap_or("/")
                        .to_string();

                    let route = routes.lock().unwrap().get(&path).cloned();
                    let response = match route {
                        Some(r) => format!(
                            "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            r.status,
                            r.content_type,
                            r.body.len(),
                            r.body,
                        ),
                        None => "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                            .to_string(),
                    };
                    let _ = stream.write_all(response.as_bytes()).await;
                    let _ = stream.shutdown().await;
                });
            }
        });

        Self { addr, routes }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url(), path)
    }

    /// Serves `html` with a 200 and `text/html` at `path`, replacing whatever was there.
    pub fn set_page(&self, path: &str, html: impl Into<String>) {
        self.routes.lock().unwrap().insert(
            path.to_string(),
            Route {
                status: "200 OK",
                content_type: "text/html",
                body: html.into(),
            },
        );
    }

    /// Serves `xml` with a 200 and `application/xml` at `path` — for sitemap bodies.
    pub fn set_xml(&self, path: &str, xml: impl Into<String>) {
        self.routes.lock().unwrap().insert(
            path.to_string(),
            Route {
                status: "200 OK",
                content_type: "application/xml",
                body: xml.into(),
            },
        );
    }

    /// Removes a path from the route table, so it 404s on the next request.
    pub fn remove_page(&self, path: &str) {
        self.routes.lock().unwrap().remove(path);
    }
}

/// Documentation-shaped HTML with enough extractable text to clear the extractor's
/// emptiness floor, built around `keyword` so a search for it is unambiguous.
pub fn doc_html(heading: &str, keyword: &str) -> String {
    format!(
        "<html><body><main><h1>{heading}</h1><p>This page explains {keyword} in the context \
         of a documentation retrieval pipeline, covering crawling, chunking, and search so \
         that readers understand how {keyword} fits into the overall system end to end.</p>\
         </main></body></html>"
    )
}

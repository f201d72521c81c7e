//! Shared fixtures: in-memory release archives and a loopback HTTP server.

#![allow(dead_code)]

use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

/// Build a `.tar.gz` whose regular files all carry mode 0644.
pub fn tar_gz(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for (path, data) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, path, *data).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

/// Serves fixed bodies by request path and counts incoming requests.
pub struct TestServer {
    base: String,
    hits: Arc<AtomicUsize>,
}

#[derive(Clone)]
struct Route {
    status: u16,
    body: Vec<u8>,
    /// Advertised length; `None` sends no header and ends the body by closing.
    content_length: Option<usize>,
}

impl TestServer {
    pub fn start(routes: Vec<(&str, u16, Vec<u8>)>) -> Self {
        let routes = routes
            .into_iter()
            .map(|(path, status, body)| {
                let content_length = Some(body.len());
                (
                    path.to_string(),
                    Route {
                        status,
                        body,
                        content_length,
                    },
                )
            })
            .collect();
        Self::serve(routes)
    }

    /// Serve only the first `sent` bytes of `body` at `path`, then hang up.
    pub fn start_truncated(path: &str, body: Vec<u8>, sent: usize, with_length: bool) -> Self {
        let route = Route {
            status: 200,
            content_length: with_length.then_some(body.len()),
            body: body[..sent].to_vec(),
        };
        Self::serve([(path.to_string(), route)].into())
    }

    fn serve(routes: HashMap<String, Route>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();

        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { continue };
                counter.fetch_add(1, Ordering::SeqCst);
                respond(stream, &routes);
            }
        });

        Self { base, hits }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

fn respond(mut stream: TcpStream, routes: &HashMap<String, Route>) {
    let Some(path) = request_path(&stream) else {
        return;
    };
    let route = routes.get(&path).cloned().unwrap_or_else(|| Route {
        status: 404,
        body: b"not found".to_vec(),
        content_length: Some(9),
    });
    let status = route.status;
    let reason = match status {
        200 => "OK",
        404 => "Not Found",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Unknown",
    };
    let length = route
        .content_length
        .map(|len| format!("Content-Length: {len}\r\n"))
        .unwrap_or_default();
    let head = format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Type: application/gzip\r\n{length}Connection: close\r\n\r\n"
    );
    let _ = stream.write_all(head.as_bytes());
    let _ = stream.write_all(&route.body);
    let _ = stream.flush();
}

fn request_path(stream: &TcpStream) -> Option<String> {
    let mut reader = BufReader::new(stream.try_clone().ok()?);
    let mut request_line = String::new();
    reader.read_line(&mut request_line).ok()?;
    loop {
        let mut line = String::new();
        match reader.read_line(&mut line) {
            Ok(0) => break,
            Ok(_) if line == "\r\n" || line == "\n" => break,
            Ok(_) => continue,
            Err(_) => return None,
        }
    }
    request_line.split_whitespace().nth(1).map(str::to_string)
}

/// Deterministic bytes that do not compress.
pub fn noise(len: usize) -> Vec<u8> {
    let mut state: u32 = 0x2545_f491;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            state as u8
        })
        .collect()
}

/// A client that ignores proxy settings from the environment.
pub fn direct_client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

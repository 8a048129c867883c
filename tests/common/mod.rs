//! Scripted mock of the InfluxDB `/query` endpoint.
//!
//! Accepts one connection, records the request head, then plays a script of
//! HTTP/1.1 chunks, pauses and hangs so tests control exactly when bytes
//! arrive and can observe when the client drops the connection.
//!
//! Raw TCP rather than an axum router: a router hides the chunk framing and
//! never reports that the peer closed the socket mid-response.

#![allow(dead_code, clippy::unwrap_used)]

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// How long `AwaitClose` waits for the client before giving up.
const CLOSE_WAIT: Duration = Duration::from_secs(10);

pub enum Step {
    /// Write one HTTP chunk.
    Chunk(Vec<u8>),
    /// Sleep before the next step.
    Pause(Duration),
    /// Write the terminating zero-length chunk.
    End,
    /// Keep the connection open until the client closes it.
    AwaitClose,
}

pub fn chunk(data: &str) -> Step {
    Step::Chunk(data.as_bytes().to_vec())
}

/// What the server saw.
#[derive(Debug)]
pub struct Recorded {
    pub request_line: String,
    pub headers: Vec<(String, String)>,
    pub client_closed: bool,
}

impl Recorded {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Request target decoded into query pairs.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        let target = self.request_line.split(' ').nth(1).unwrap_or_default();
        let url = reqwest::Url::parse(&format!("http://mock{}", target)).unwrap();
        url.query_pairs().into_owned().collect()
    }

    pub fn query_param(&self, name: &str) -> Option<String> {
        self.query_pairs()
            .into_iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v)
    }
}

pub struct MockServer {
    pub url: String,
    handle: JoinHandle<Recorded>,
}

impl MockServer {
    /// Wait for the script to finish and return what was recorded.
    pub async fn recorded(self) -> Recorded {
        self.handle.await.unwrap()
    }
}

/// Serve one request with the given status and script.
pub async fn serve(status: u16, steps: Vec<Step>) -> MockServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let head = read_head(&mut socket).await;
        let mut lines = head.split("\r\n");
        let request_line = lines.next().unwrap_or_default().to_string();
        let headers = lines
            .filter_map(|line| line.split_once(':'))
            .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
            .collect();

        let mut client_closed = false;
        let response_head = format!(
            "HTTP/1.1 {} {}\r\ncontent-type: application/json\r\ntransfer-encoding: chunked\r\n\r\n",
            status,
            reason(status)
        );
        let mut open = socket.write_all(response_head.as_bytes()).await.is_ok();

        for step in steps {
            if !open {
                client_closed = true;
                break;
            }
            match step {
                Step::Chunk(data) => {
                    let mut frame = format!("{:x}\r\n", data.len()).into_bytes();
                    frame.extend_from_slice(&data);
                    frame.extend_from_slice(b"\r\n");
                    open = socket.write_all(&frame).await.is_ok() && socket.flush().await.is_ok();
                }
                Step::Pause(d) => tokio::time::sleep(d).await,
                Step::End => {
                    open = socket.write_all(b"0\r\n\r\n").await.is_ok();
                }
                Step::AwaitClose => {
                    client_closed = wait_for_close(&mut socket).await;
                }
            }
        }

        Recorded {
            request_line,
            headers,
            client_closed,
        }
    });

    MockServer {
        url: format!("http://{}", addr),
        handle,
    }
}

async fn read_head(socket: &mut TcpStream) -> String {
    let mut head = Vec::new();
    let mut buf = [0u8; 1024];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = socket.read(&mut buf).await.unwrap();
        if n == 0 {
            break;
        }
        head.extend_from_slice(&buf[..n]);
    }
    String::from_utf8_lossy(&head).into_owned()
}

async fn wait_for_close(socket: &mut TcpStream) -> bool {
    let mut buf = [0u8; 1024];
    let closed = async {
        loop {
            match socket.read(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(_) => continue,
            }
        }
    };
    tokio::time::timeout(CLOSE_WAIT, closed).await.is_ok()
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        401 => "Unauthorized",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}

/// A response document with one series holding `rows`.
pub fn document(name: &str, rows: &str) -> String {
    format!(
        r#"{{"results":[{{"statement_id":0,"series":[{{"name":"{}","columns":["id","label"],"values":{}}}],"partial":true}}]}}"#,
        name, rows
    ) + "\n"
}

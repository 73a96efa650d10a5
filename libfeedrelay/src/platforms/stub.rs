//! Scripted HTTP/1.1 server for adapter tests
//!
//! Answers one connection per scripted response, in order, and records each
//! request it saw. Runs on a plain thread so it works under any tokio runtime.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

#[derive(Debug, Clone)]
pub struct StubRequest {
    /// Method and target, e.g. `GET /2/users/1/tweets?max_results=5`
    pub line: String,
    /// Header lines, lowercased
    pub headers: Vec<String>,
    pub body: String,
}

impl StubRequest {
    /// Value of a query parameter in the request target
    pub fn query(&self, name: &str) -> Option<String> {
        let (_, query) = self.line.split_once('?')?;
        query.split('&').find_map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (key == name).then(|| value.to_string())
        })
    }

    pub fn has_header(&self, header: &str) -> bool {
        let header = header.to_lowercase();
        self.headers.iter().any(|h| *h == header)
    }
}

#[derive(Debug, Clone)]
pub struct StubResponse {
    status: u16,
    headers: Vec<(String, String)>,
    body: String,
}

impl StubResponse {
    pub fn json(status: u16, body: &str) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.to_string(),
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

pub struct StubServer {
    base_url: String,
    requests: Arc<Mutex<Vec<StubRequest>>>,
    handle: Option<JoinHandle<()>>,
}

impl StubServer {
    pub fn start(responses: Vec<StubResponse>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let requests = Arc::new(Mutex::new(Vec::new()));

        let recorded = requests.clone();
        let handle = std::thread::spawn(move || {
            for response in responses {
                let Ok((stream, _)) = listener.accept() else {
                    return;
                };
                let mut reader = BufReader::new(stream);
                let request = read_request(&mut reader);
                recorded.lock().unwrap().push(request);

                let mut stream = reader.into_inner();
                let _ = stream.write_all(render(&response).as_bytes());
                let _ = stream.flush();
            }
        });

        Self {
            base_url,
            requests,
            handle: Some(handle),
        }
    }

    pub fn base_url(&self) -> String {
        self.base_url.clone()
    }

    /// Requests seen so far, in arrival order
    pub fn requests(&self) -> Vec<StubRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl Drop for StubServer {
    fn drop(&mut self) {
        // An unanswered script would block in accept, so only join a finished thread
        if let Some(handle) = self.handle.take() {
            if handle.is_finished() {
                let _ = handle.join();
            }
        }
    }
}

fn read_request(reader: &mut BufReader<std::net::TcpStream>) -> StubRequest {
    let mut request_line = String::new();
    reader.read_line(&mut request_line).unwrap();
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default();
    let target = parts.next().unwrap_or_default();

    let mut headers = Vec::new();
    let mut content_length = 0;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).unwrap() == 0 {
            break;
        }
        let line = line.trim_end().to_lowercase();
        if line.is_empty() {
            break;
        }
        if let Some(value) = line.strip_prefix("content-length:") {
            content_length = value.trim().parse().unwrap_or(0);
        }
        headers.push(line);
    }

    let mut body = vec![0; content_length];
    reader.read_exact(&mut body).unwrap();

    StubRequest {
        line: format!("{} {}", method, target),
        headers,
        body: String::from_utf8_lossy(&body).into_owned(),
    }
}

fn render(response: &StubResponse) -> String {
    let mut out = format!(
        "HTTP/1.1 {} Stub\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n",
        response.status,
        response.body.len()
    );
    for (name, value) in &response.headers {
        out.push_str(&format!("{}: {}\r\n", name, value));
    }
    out.push_str("\r\n");
    out.push_str(&response.body);
    out
}

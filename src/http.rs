use rustc_hash::FxHashMap;

use crate::SERVER_IDENT;

/// HTTP versions the server speaks. Anything else is rejected at parse time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HttpVersion {
    Http10,
    Http11,
}

impl HttpVersion {
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "HTTP/1.0" => Some(HttpVersion::Http10),
            "HTTP/1.1" => Some(HttpVersion::Http11),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HttpVersion::Http10 => "HTTP/1.0",
            HttpVersion::Http11 => "HTTP/1.1",
        }
    }

    /// Keep-alive default when the request carries no Connection header.
    pub fn default_keep_alive(self) -> bool {
        matches!(self, HttpVersion::Http11)
    }
}

/// A parsed request. Header names are stored lowercased; lookups go through
/// [`Request::header`] so callers never re-case them.
#[derive(Clone, Debug)]
pub struct Request {
    pub method: String,
    pub target: String,
    pub version: HttpVersion,
    pub headers: FxHashMap<String, String>,
    pub body: String,
    pub keep_alive: bool,
}

impl Request {
    pub fn new(method: &str, target: &str, version: HttpVersion) -> Self {
        Request {
            method: method.to_string(),
            target: target.to_string(),
            version,
            headers: FxHashMap::default(),
            body: String::new(),
            keep_alive: version.default_keep_alive(),
        }
    }

    /// Look up a header by its lowercase name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.to_string());
        self
    }

    pub fn with_body(mut self, body: &str) -> Self {
        self.body = body.to_string();
        self
    }
}

/// Response payload shapes. File bodies are streamed by the connection
/// writer in fixed-size chunks, never buffered whole.
#[derive(Debug)]
pub enum Body {
    Text(String),
    File { file: tokio::fs::File, len: u64 },
    Empty,
}

impl Body {
    /// Content-Length the writer advertises; Empty bodies advertise none.
    pub fn content_length(&self) -> Option<u64> {
        match self {
            Body::Text(text) => Some(text.len() as u64),
            Body::File { len, .. } => Some(*len),
            Body::Empty => None,
        }
    }
}

#[derive(Debug)]
pub struct Response {
    pub status: u16,
    pub version: HttpVersion,
    pub headers: Vec<(String, String)>,
    pub body: Body,
    pub keep_alive: bool,
}

impl Response {
    /// Every response carries the server identity header.
    pub fn new(status: u16, version: HttpVersion) -> Self {
        Response {
            status,
            version,
            headers: vec![("Server".to_string(), SERVER_IDENT.clone())],
            body: Body::Empty,
            keep_alive: false,
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_text(mut self, body: &str) -> Self {
        self.body = Body::Text(body.to_string());
        self
    }

    pub fn with_body(mut self, body: Body) -> Self {
        self.body = body;
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        206 => "Partial Content",
        304 => "Not Modified",
        307 => "Temporary Redirect",
        400 => "Bad Request",
        404 => "Not Found",
        413 => "Payload Too Large",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        _ => "Unknown",
    }
}

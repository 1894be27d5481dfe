use axum::{
    body::Body,
    response::{IntoResponse, Response},
};
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};

/// The outgoing side of a request as seen by the downstream pipeline.
///
/// Status and body may be written in any order; the body may arrive in several chunks.
pub trait ResponseWriter: Send {
    fn set_status(&mut self, status: StatusCode);

    fn status(&self) -> StatusCode;

    fn insert_header(&mut self, name: HeaderName, value: HeaderValue);

    fn write(&mut self, chunk: &[u8]);
}

/// In-memory response, turned into an axum response once the pipeline is done.
#[derive(Debug, Clone)]
pub struct BufferedResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Vec<u8>,
}

impl Default for BufferedResponse {
    fn default() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Vec::new(),
        }
    }
}

impl BufferedResponse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

impl ResponseWriter for BufferedResponse {
    fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    fn status(&self) -> StatusCode {
        self.status
    }

    fn insert_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.headers.append(name, value);
    }

    fn write(&mut self, chunk: &[u8]) {
        self.body.extend_from_slice(chunk);
    }
}

impl IntoResponse for BufferedResponse {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

/// Write-through tee: everything goes to the wrapped writer, and a copy of the status and body
/// is kept for storage after the pipeline returns.
///
/// The copy is capped at `limit` bytes. Past the cap the copy is discarded and
/// [`overflowed`](Self::overflowed) reports true; the wrapped writer still receives every byte.
pub struct ResponseCapture<'a> {
    inner: &'a mut dyn ResponseWriter,
    status: StatusCode,
    body: Vec<u8>,
    limit: usize,
    overflowed: bool,
}

impl<'a> ResponseCapture<'a> {
    pub fn new(inner: &'a mut dyn ResponseWriter, limit: usize) -> Self {
        let status = inner.status();
        Self {
            inner,
            status,
            body: Vec::new(),
            limit,
            overflowed: false,
        }
    }

    pub fn capture_status(&self) -> StatusCode {
        self.status
    }

    pub fn capture_body(&self) -> &[u8] {
        &self.body
    }

    pub fn overflowed(&self) -> bool {
        self.overflowed
    }
}

impl ResponseWriter for ResponseCapture<'_> {
    fn set_status(&mut self, status: StatusCode) {
        self.status = status;
        self.inner.set_status(status);
    }

    fn status(&self) -> StatusCode {
        self.status
    }

    fn insert_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.inner.insert_header(name, value);
    }

    fn write(&mut self, chunk: &[u8]) {
        self.inner.write(chunk);
        if self.overflowed {
            return;
        }
        if self.body.len() + chunk.len() > self.limit {
            self.overflowed = true;
            self.body = Vec::new();
        } else {
            self.body.extend_from_slice(chunk);
        }
    }
}

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::runtime::Runtime;

/// A canned response of [`MockSeer`].
#[derive(Clone, Debug)]
pub struct MockResponse {
    /// HTTP status code.
    pub status: u16,
    /// Raw response body.
    pub body: String,
    /// Time to wait before responding.
    pub delay: Duration,
}

impl MockResponse {
    /// A `200 OK` response with a JSON body.
    pub fn json(body: Value) -> Self {
        Self {
            status: 200,
            body: body.to_string(),
            delay: Duration::ZERO,
        }
    }

    /// A response with the given status and an empty JSON object as body.
    pub fn status(status: u16) -> Self {
        Self {
            status,
            body: "{}".to_owned(),
            delay: Duration::ZERO,
        }
    }

    /// A `200 OK` response with a raw body, which may not be valid JSON.
    pub fn raw(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
            delay: Duration::ZERO,
        }
    }

    /// Delays the response.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Overrides the status code.
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }
}

impl Default for MockResponse {
    fn default() -> Self {
        Self::json(serde_json::json!({"success": true}))
    }
}

/// A request received by [`MockSeer`].
#[derive(Clone, Debug)]
pub struct RecordedRequest {
    /// The HTTP method.
    pub method: String,
    /// The request path.
    pub path: String,
    /// Headers with lowercase names.
    pub headers: BTreeMap<String, String>,
    /// The raw body.
    pub body: Vec<u8>,
}

impl RecordedRequest {
    /// Returns the value of a header.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Parses the body as JSON.
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap()
    }
}

#[derive(Debug, Default)]
struct Shared {
    responses: Mutex<HashMap<String, MockResponse>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

async fn handle(
    State(shared): State<Arc<Shared>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let path = uri.path().to_owned();

    let headers = headers
        .iter()
        .filter_map(|(name, value)| {
            let value = value.to_str().ok()?;
            Some((name.as_str().to_owned(), value.to_owned()))
        })
        .collect();

    shared.requests.lock().push(RecordedRequest {
        method: method.to_string(),
        path: path.clone(),
        headers,
        body: body.to_vec(),
    });

    let response = shared
        .responses
        .lock()
        .get(&path)
        .cloned()
        .unwrap_or_default();

    if !response.delay.is_zero() {
        tokio::time::sleep(response.delay).await;
    }

    let status =
        StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (
        status,
        [(header::CONTENT_TYPE, "application/json")],
        response.body,
    )
        .into_response()
}

/// A mock similarity service listening on a random local port.
///
/// Every request is recorded. Responses are configured per path with [`respond`](Self::respond);
/// unconfigured paths answer `200 OK` with `{"success": true}`. The server runs on its own
/// runtime and shuts down when dropped.
pub struct MockSeer {
    addr: SocketAddr,
    shared: Arc<Shared>,
    // Dropped last, which stops the server.
    _runtime: Runtime,
}

impl MockSeer {
    /// Starts the server.
    pub fn start() -> Self {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap();

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let addr = listener.local_addr().unwrap();

        let shared = Arc::new(Shared::default());
        let router = Router::new()
            .fallback(handle)
            .with_state(Arc::clone(&shared));

        runtime.spawn(async move {
            let listener = tokio::net::TcpListener::from_std(listener).unwrap();
            axum::serve(listener, router).await.unwrap();
        });

        beacon_log::debug!(%addr, "mock similarity service listening");

        Self {
            addr,
            shared,
            _runtime: runtime,
        }
    }

    /// Returns the base URL of the server.
    pub fn url(&self) -> String {
        format!("http://{}/", self.addr)
    }

    /// Configures the response for an exact request path.
    pub fn respond(&self, path: &str, response: MockResponse) -> &Self {
        self.shared
            .responses
            .lock()
            .insert(path.to_owned(), response);
        self
    }

    /// Returns all requests received so far.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.shared.requests.lock().clone()
    }

    /// Returns the number of requests received so far.
    pub fn hits(&self) -> usize {
        self.shared.requests.lock().len()
    }
}

impl Default for MockSeer {
    fn default() -> Self {
        Self::start()
    }
}

//! Integration tests for the AfrikRaga cart engine.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p afrikraga-integration-tests
//! ```
//!
//! No external services are needed: [`MockBackend`] serves the backend cart
//! REST API in-process on an ephemeral port, with the same envelope, session
//! header and status codes as the real backend.

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use afrikraga_cart::{ApiConfig, RestCartClient};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, put};
use axum::{Json, Router};
use rust_decimal::Decimal;
use secrecy::SecretString;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use url::Url;

/// Session header the mock reads and the test clients send.
pub const SESSION_HEADER: &str = "X-Session-ID";

/// One request as the mock saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub session: Option<String>,
    pub authorization: Option<String>,
    pub request_id: Option<String>,
}

/// A row of a server cart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredLine {
    pub id: i64,
    pub product_id: i64,
    pub variant_id: Option<i64>,
    pub quantity: i64,
}

#[derive(Default)]
struct BackendState {
    carts: HashMap<String, Vec<StoredLine>>,
    requests: Vec<RecordedRequest>,
    prices: HashMap<i64, Decimal>,
    next_line: i64,
    next_session: u32,
    failing: bool,
    empty_updates: bool,
}

type Shared = Arc<Mutex<BackendState>>;

fn lock(state: &Shared) -> MutexGuard<'_, BackendState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-process stand-in for the backend cart API.
pub struct MockBackend {
    addr: SocketAddr,
    state: Shared,
}

impl MockBackend {
    /// Bind to an ephemeral local port and start serving.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot bind.
    pub async fn start() -> std::io::Result<Self> {
        let state: Shared = Arc::new(Mutex::new(BackendState {
            next_line: 100,
            next_session: 1,
            ..BackendState::default()
        }));

        let app = Router::new()
            .route("/api/cart", get(get_cart).delete(clear_cart))
            .route("/api/cart/items", axum::routing::post(add_item))
            .route("/api/cart/items/{id}", put(update_item).delete(remove_item))
            .with_state(Arc::clone(&state));

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Ok(Self { addr, state })
    }

    /// Base URL clients should be configured with.
    #[must_use]
    pub fn base_url(&self) -> String {
        format!("http://{}/api/", self.addr)
    }

    /// Client configuration pointing at this backend.
    ///
    /// # Panics
    ///
    /// Never in practice: the base URL is always well-formed.
    #[must_use]
    #[allow(clippy::unwrap_used)]
    pub fn api_config(&self, token: Option<&str>) -> ApiConfig {
        ApiConfig {
            base_url: Url::parse(&self.base_url()).unwrap(),
            token: token.map(SecretString::from),
            session_header: SESSION_HEADER.to_string(),
            request_timeout: Duration::from_secs(5),
        }
    }

    /// REST client pointing at this backend.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client cannot be built.
    #[must_use]
    #[allow(clippy::unwrap_used)]
    pub fn client(&self) -> RestCartClient {
        RestCartClient::new(&self.api_config(None)).unwrap()
    }

    /// Catalog price reported for a product.
    pub fn set_price(&self, product_id: i64, price: Decimal) {
        lock(&self.state).prices.insert(product_id, price);
    }

    /// Answer every request with `503 Service Unavailable`.
    pub fn set_failing(&self, failing: bool) {
        lock(&self.state).failing = failing;
    }

    /// Answer successful quantity updates with `204 No Content`.
    pub fn set_empty_updates(&self, empty: bool) {
        lock(&self.state).empty_updates = empty;
    }

    /// Create a server cart as if another device had filled it.
    pub fn seed_cart(&self, session: &str, lines: &[(i64, Option<i64>, i64)]) {
        let mut state = lock(&self.state);
        let mut rows = Vec::with_capacity(lines.len());
        for &(product_id, variant_id, quantity) in lines {
            rows.push(StoredLine {
                id: state.next_line,
                product_id,
                variant_id,
                quantity,
            });
            state.next_line += 1;
        }
        state.carts.insert(session.to_string(), rows);
    }

    /// Rows of a server cart.
    #[must_use]
    pub fn cart(&self, session: &str) -> Vec<StoredLine> {
        lock(&self.state)
            .carts
            .get(session)
            .cloned()
            .unwrap_or_default()
    }

    /// Every session the backend has a cart for.
    #[must_use]
    pub fn sessions(&self) -> Vec<String> {
        let mut sessions: Vec<String> = lock(&self.state).carts.keys().cloned().collect();
        sessions.sort();
        sessions
    }

    /// Requests received so far, oldest first.
    #[must_use]
    pub fn requests(&self) -> Vec<RecordedRequest> {
        lock(&self.state).requests.clone()
    }

    /// `"METHOD path"` for every request received so far.
    #[must_use]
    pub fn request_lines(&self) -> Vec<String> {
        self.requests()
            .into_iter()
            .map(|r| format!("{} {}", r.method, r.path))
            .collect()
    }
}

// =============================================================================
// Handlers
// =============================================================================

type Reply = (StatusCode, Json<Value>);

#[derive(Debug, Deserialize)]
struct AddBody {
    product_id: i64,
    variant_id: Option<i64>,
    quantity: i64,
}

#[derive(Debug, Deserialize)]
struct UpdateBody {
    quantity: i64,
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

/// Record the request; `Err` carries the reply when the backend is failing.
fn record(
    state: &mut BackendState,
    method: &Method,
    path: String,
    headers: &HeaderMap,
) -> Result<Option<String>, Reply> {
    let session = header(headers, SESSION_HEADER);
    state.requests.push(RecordedRequest {
        method: method.to_string(),
        path,
        session: session.clone(),
        authorization: header(headers, "authorization"),
        request_id: header(headers, "x-request-id"),
    });

    if state.failing {
        return Err(error(StatusCode::SERVICE_UNAVAILABLE, "Service unavailable"));
    }
    Ok(session)
}

fn ok(data: Value) -> Reply {
    (
        StatusCode::OK,
        Json(json!({ "success": true, "data": data, "message": "OK" })),
    )
}

fn error(status: StatusCode, message: &str) -> Reply {
    (
        status,
        Json(json!({ "success": false, "data": null, "message": message })),
    )
}

fn line_json(state: &BackendState, line: &StoredLine) -> Value {
    let price = state
        .prices
        .get(&line.product_id)
        .copied()
        .unwrap_or_else(|| Decimal::new(1200, 2));
    json!({
        "id": line.id,
        "product_id": line.product_id,
        "variant_id": line.variant_id,
        "quantity": line.quantity,
        "product": {
            "name": format!("Catalog product {}", line.product_id),
            "image": format!("https://cdn.afrikraga.test/{}.jpg", line.product_id),
            "price": price.to_string(),
        },
    })
}

async fn get_cart(State(state): State<Shared>, method: Method, headers: HeaderMap) -> Reply {
    let mut state = lock(&state);
    let session = match record(&mut state, &method, "/api/cart".to_string(), &headers) {
        Ok(session) => session,
        Err(reply) => return reply,
    };

    let lines = session
        .as_ref()
        .and_then(|s| state.carts.get(s))
        .cloned()
        .unwrap_or_default();
    let items: Vec<Value> = lines.iter().map(|line| line_json(&state, line)).collect();
    ok(json!({ "session_id": session, "items": items }))
}

async fn add_item(
    State(state): State<Shared>,
    method: Method,
    headers: HeaderMap,
    Json(body): Json<AddBody>,
) -> Reply {
    let mut state = lock(&state);
    let session = match record(&mut state, &method, "/api/cart/items".to_string(), &headers) {
        Ok(session) => session,
        Err(reply) => return reply,
    };
    if body.quantity < 1 {
        return error(StatusCode::UNPROCESSABLE_ENTITY, "Quantity must be at least 1");
    }

    let (session, created) = match session {
        Some(session) => (session, false),
        None => {
            let session = format!("sess-{}", state.next_session);
            state.next_session += 1;
            (session, true)
        }
    };

    let next_line = state.next_line;
    let cart = state.carts.entry(session.clone()).or_default();
    let line = if let Some(line) = cart
        .iter_mut()
        .find(|l| l.product_id == body.product_id && l.variant_id == body.variant_id)
    {
        line.quantity += body.quantity;
        line.clone()
    } else {
        let line = StoredLine {
            id: next_line,
            product_id: body.product_id,
            variant_id: body.variant_id,
            quantity: body.quantity,
        };
        cart.push(line.clone());
        state.next_line += 1;
        line
    };

    let item = line_json(&state, &line);
    let session_id = created.then_some(session);
    ok(json!({ "session_id": session_id, "item": item }))
}

async fn update_item(
    State(state): State<Shared>,
    Path(id): Path<i64>,
    method: Method,
    headers: HeaderMap,
    Json(body): Json<UpdateBody>,
) -> Response {
    let mut state = lock(&state);
    let path = format!("/api/cart/items/{id}");
    let session = match record(&mut state, &method, path, &headers) {
        Ok(session) => session,
        Err(reply) => return reply.into_response(),
    };

    let cart = match session {
        Some(session) => state.carts.get_mut(&session),
        None => None,
    };
    let line = cart
        .and_then(|cart| cart.iter_mut().find(|l| l.id == id))
        .map(|line| {
            line.quantity = body.quantity;
            line.clone()
        });

    match line {
        Some(_) if state.empty_updates => StatusCode::NO_CONTENT.into_response(),
        Some(line) => {
            let item = line_json(&state, &line);
            ok(json!({ "item": item })).into_response()
        }
        None => error(StatusCode::NOT_FOUND, "Cart item not found").into_response(),
    }
}

async fn remove_item(
    State(state): State<Shared>,
    Path(id): Path<i64>,
    method: Method,
    headers: HeaderMap,
) -> Reply {
    let mut state = lock(&state);
    let path = format!("/api/cart/items/{id}");
    let session = match record(&mut state, &method, path, &headers) {
        Ok(session) => session,
        Err(reply) => return reply,
    };

    let cart = match session {
        Some(session) => state.carts.get_mut(&session),
        None => None,
    };
    let removed = cart.is_some_and(|cart| {
        let before = cart.len();
        cart.retain(|l| l.id != id);
        cart.len() < before
    });

    if removed {
        ok(Value::Null)
    } else {
        error(StatusCode::NOT_FOUND, "Cart item not found")
    }
}

async fn clear_cart(State(state): State<Shared>, method: Method, headers: HeaderMap) -> Reply {
    let mut state = lock(&state);
    let session = match record(&mut state, &method, "/api/cart".to_string(), &headers) {
        Ok(session) => session,
        Err(reply) => return reply,
    };

    if let Some(session) = session {
        if let Some(cart) = state.carts.get_mut(&session) {
            cart.clear();
        }
    }
    ok(Value::Null)
}

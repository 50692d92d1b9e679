//! In-process fake store API for integration tests
//!
//! Mirrors the shape of the public demo stores the harness is pointed at:
//! a product catalog with CRUD, a login route that starts rate limiting
//! after a few wrong passwords, payments keyed by `Idempotency-Key` (a key
//! reused with a different body is refused with 422), a slow route and a
//! plain-text route.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

pub const USERNAME: &str = "mor_2314";
pub const PASSWORD: &str = "83r5^_";

/// Wrong passwords accepted before the login route answers 429
pub const LOGIN_LIMIT: usize = 3;

#[derive(Default)]
struct Store {
    products: BTreeMap<u64, Value>,
    next_id: u64,
    /// Idempotency key to (request body, stored payment)
    payments: HashMap<String, (Value, Value)>,
    failed_logins: usize,
}

type Shared = Arc<Mutex<Store>>;

pub struct FakeStore {
    pub base_url: String,
    handle: JoinHandle<()>,
}

impl Drop for FakeStore {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub async fn spawn() -> FakeStore {
    let mut store = Store::default();
    for (title, price, category) in [
        ("Fjallraven Backpack", 109.95, "men's clothing"),
        ("WD 2TB Elements Portable Drive", 64.0, "electronics"),
        ("SanDisk SSD PLUS 1TB", 109.0, "electronics"),
        ("John Hardy Bracelet", 695.0, "jewelery"),
        ("Samsung 49-Inch Monitor", 999.99, "electronics"),
        ("Rain Jacket", 39.99, "women's clothing"),
    ] {
        store.next_id += 1;
        let id = store.next_id;
        store.products.insert(
            id,
            json!({"id": id, "title": title, "price": price, "category": category}),
        );
    }

    let app = Router::new()
        .route("/products", get(list_products).post(create_product))
        .route(
            "/products/:id",
            get(get_product).put(update_product).delete(delete_product),
        )
        .route("/auth/login", post(login))
        .route("/payments", post(pay))
        .route("/slow", get(slow))
        .route("/health", get(health))
        .with_state(Arc::new(Mutex::new(store)));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    FakeStore {
        base_url: format!("http://{}", addr),
        handle,
    }
}

fn not_found() -> Response {
    (StatusCode::NOT_FOUND, Json(json!({"message": "Product not found"}))).into_response()
}

async fn list_products(State(store): State<Shared>, Query(query): Query<HashMap<String, String>>) -> Json<Value> {
    let store = store.lock().unwrap();
    let limit = query
        .get("limit")
        .and_then(|l| l.parse::<usize>().ok())
        .unwrap_or(usize::MAX);
    let items = store
        .products
        .values()
        .filter(|p| query.get("category").map_or(true, |c| p["category"] == c.as_str()))
        .take(limit)
        .cloned()
        .collect();
    Json(Value::Array(items))
}

async fn create_product(State(store): State<Shared>, Json(body): Json<Value>) -> Response {
    let mut store = store.lock().unwrap();
    store.next_id += 1;
    let id = store.next_id;
    let mut product = body;
    product["id"] = json!(id);
    store.products.insert(id, product.clone());
    (StatusCode::CREATED, Json(product)).into_response()
}

async fn get_product(State(store): State<Shared>, Path(id): Path<u64>) -> Response {
    match store.lock().unwrap().products.get(&id) {
        Some(product) => Json(product.clone()).into_response(),
        None => not_found(),
    }
}

async fn update_product(State(store): State<Shared>, Path(id): Path<u64>, Json(body): Json<Value>) -> Response {
    let mut store = store.lock().unwrap();
    let Some(product) = store.products.get_mut(&id) else {
        return not_found();
    };
    if let (Some(target), Some(changes)) = (product.as_object_mut(), body.as_object()) {
        for (key, value) in changes {
            target.insert(key.clone(), value.clone());
        }
    }
    Json(product.clone()).into_response()
}

async fn delete_product(State(store): State<Shared>, Path(id): Path<u64>) -> Response {
    match store.lock().unwrap().products.remove(&id) {
        Some(product) => Json(product).into_response(),
        None => not_found(),
    }
}

async fn login(State(store): State<Shared>, Json(body): Json<Value>) -> Response {
    let mut store = store.lock().unwrap();
    if store.failed_logins >= LOGIN_LIMIT {
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({"error": "Too many login attempts"})),
        )
            .into_response();
    }

    let username = body.get("username").and_then(Value::as_str);
    let password = body.get("password").and_then(Value::as_str);
    match (username, password) {
        (_, None) => (StatusCode::BAD_REQUEST, Json(json!({"error": "Missing password"}))).into_response(),
        (Some(USERNAME), Some(PASSWORD)) => {
            Json(json!({"token": "eyJhbGciOiJIUzI1NiIsInR5cCI6IkpXVCJ9.fake-session"})).into_response()
        }
        _ => {
            store.failed_logins += 1;
            (
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": "username or password is incorrect"})),
            )
                .into_response()
        }
    }
}

async fn pay(State(store): State<Shared>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    let key = headers
        .get("idempotency-key")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let mut store = store.lock().unwrap();

    if let Some((sent, existing)) = key.as_ref().and_then(|k| store.payments.get(k)) {
        if *sent != body {
            return (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({"error": "Idempotency-Key reused with different parameters"})),
            )
                .into_response();
        }
        return Json(existing.clone()).into_response();
    }

    let payment = json!({
        "id": format!("pay_{}", uuid::Uuid::new_v4().simple()),
        "amount": body["amount"].clone(),
        "status": "captured",
    });
    if let Some(key) = key {
        store.payments.insert(key, (body, payment.clone()));
    }
    (StatusCode::CREATED, Json(payment)).into_response()
}

async fn slow() -> Json<Value> {
    tokio::time::sleep(Duration::from_secs(5)).await;
    Json(json!({"ok": true}))
}

async fn health() -> &'static str {
    "ok"
}

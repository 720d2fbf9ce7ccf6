use axum::{
    body::{Body, Bytes},
    http::{header, request::Builder, Method, Request, StatusCode},
    response::Response,
    Router,
};
use http_body_util::BodyExt;
use serde_json::Value;
use sqlx::sqlite::SqlitePoolOptions;
use tempfile::TempDir;
use tower::ServiceExt;

use crate::config::AppConfig;
use crate::db;
use crate::middleware::auth::USER_HEADER;
use crate::model::user::{EnvironmentAccess, Role, User};
use crate::routes;
use crate::state::AppState;

/// A fully wired application over a fresh database, with one user per role.
pub struct TestApp {
    pub state: AppState,
    pub admin: User,
    pub power_user: User,
    pub user: User,
    pub uploader: User,
    _dir: TempDir,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(configure: impl FnOnce(&mut AppConfig)) -> Self {
        let dir = TempDir::new().unwrap();
        let db_url = format!("sqlite://{}?mode=rwc", dir.path().join("bhapi.db").display());
        let pool = SqlitePoolOptions::new().max_connections(1).connect(&db_url).await.unwrap();
        db::init_db(&pool).await.unwrap();

        let mut config = AppConfig::default();
        config.database.url = db_url;
        config.ingest.temp_dir = dir.path().join("ingest").display().to_string();
        config.auth.bootstrap_admin_email = None;
        config.auth.api_token = None;
        configure(&mut config);

        let admin = db::users::create_user(&pool, "admin@bhapi.test", "admin", Role::Administrator).await.unwrap();
        let power_user = db::users::create_user(&pool, "power@bhapi.test", "power", Role::PowerUser).await.unwrap();
        let user = db::users::create_user(&pool, "user@bhapi.test", "user", Role::User).await.unwrap();
        let uploader = db::users::create_user(&pool, "upload@bhapi.test", "upload", Role::UploadOnly).await.unwrap();

        let state = AppState::new(pool, config);
        Self { state, admin, power_user, user, uploader, _dir: dir }
    }

    pub fn router(&self) -> Router {
        routes::router(self.state.clone())
    }

    pub async fn send(&self, req: Request<Body>) -> Response {
        self.router().oneshot(req).await.unwrap()
    }

    /// Sends a request with an optional JSON body and returns the status and decoded body
    /// (`Value::Null` when the body is empty or not JSON).
    pub async fn call(&self, method: Method, uri: &str, user: Option<&User>, body: Option<Value>) -> (StatusCode, Value) {
        let builder = request(method, uri, user);
        let req = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let resp = self.send(req).await;
        let status = resp.status();
        (status, json_body(resp).await)
    }

    pub async fn get(&self, uri: &str, user: &User) -> (StatusCode, Value) {
        self.call(Method::GET, uri, Some(user), None).await
    }

    /// Limits `user` to `environments` and returns the reloaded user.
    pub async fn restrict(&self, user: &User, environments: &[&str]) -> User {
        let access = EnvironmentAccess {
            all_environments: false,
            environments: environments.iter().map(|e| e.to_string()).collect(),
        };
        db::users::set_environment_access(&self.state.db, &user.id, &access).await.unwrap();
        db::users::get_user(&self.state.db, &user.id).await.unwrap().unwrap()
    }

    /// Writes a node straight into the graph store.
    pub async fn add_node(&self, object_id: &str, kinds: &[&str], properties: Value) -> i64 {
        let kinds: Vec<String> = kinds.iter().map(|k| k.to_string()).collect();
        let properties = properties.as_object().cloned().unwrap_or_default();
        self.state.graph.upsert_node(object_id, &kinds, properties).await.unwrap()
    }

    pub async fn add_edge(&self, source: i64, target: i64, kind: &str) {
        self.state.graph.create_edge(source, target, kind).await.unwrap();
    }
}

/// Request builder carrying the acting user header.
pub fn request(method: Method, uri: &str, user: Option<&User>) -> Builder {
    let builder = Request::builder().method(method).uri(uri);
    match user {
        Some(user) => builder.header(USER_HEADER, user.id.as_str()),
        None => builder,
    }
}

pub async fn body_bytes(resp: Response) -> Bytes {
    resp.into_body().collect().await.unwrap().to_bytes()
}

pub async fn json_body(resp: Response) -> Value {
    let bytes = body_bytes(resp).await;
    serde_json::from_slice(&bytes).unwrap_or(Value::Null)
}

/// First message of an error envelope.
pub fn error_message(body: &Value) -> &str {
    body["errors"][0]["message"].as_str().unwrap_or_default()
}

//! Common test utilities and helpers for integration tests

#![allow(dead_code)]

use std::sync::Arc;

use api_guard::auth::AuthManager;
use api_guard::config::{AuthConfig, ServerConfig};
use api_guard::database::{Database, SqliteDatabase};
use api_guard::models::{CreateIdentityRequest, CreatedIdentity, RateSettings, SessionUser};
use api_guard::server::{AppState, Server};
use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;

/// Create an in-memory database for testing
pub async fn create_test_database() -> Arc<SqliteDatabase> {
    Arc::new(
        SqliteDatabase::new(":memory:")
            .await
            .expect("Failed to create test database"),
    )
}

/// Create a token-only manager with the given default quota
pub fn create_test_auth_manager<D: Database + 'static>(
    db: Arc<D>,
    default_quota_per_minute: i64,
) -> Arc<AuthManager<D>> {
    let config = AuthConfig {
        token_only: true,
        default_quota_per_minute,
    };
    Arc::new(AuthManager::new(db, config))
}

/// Create a test application state over a fresh database
pub async fn create_test_state(default_quota_per_minute: i64) -> AppState<SqliteDatabase> {
    let database = create_test_database().await;
    let auth_manager = create_test_auth_manager(Arc::clone(&database), default_quota_per_minute);

    AppState {
        auth_manager,
        database,
    }
}

/// Store settings and create an identity, returning its one-time token
pub async fn seed_identity(
    state: &AppState<SqliteDatabase>,
    settings: RateSettings,
    name: &str,
    quota_per_minute: i64,
) -> CreatedIdentity {
    state
        .auth_manager
        .update_rate_settings(settings)
        .await
        .expect("Failed to store settings");
    state
        .auth_manager
        .create_identity(CreateIdentityRequest::new(name).with_quota(quota_per_minute))
        .await
        .expect("Failed to create identity")
}

/// Create a test server configuration with a random port
pub fn create_test_server_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0, // Let OS assign a free port
    }
}

/// Stand-in for an upstream session layer: every request is a logged-in admin
async fn inject_admin_session(mut request: Request, next: Next) -> Response {
    request.extensions_mut().insert(SessionUser {
        id: 1,
        username: "admin".to_string(),
    });
    next.run(request).await
}

/// Run a test server in the background and return the address
/// The server will be shut down when the returned shutdown sender is dropped or sent
pub async fn run_test_server(
    state: AppState<SqliteDatabase>,
) -> (std::net::SocketAddr, tokio::sync::oneshot::Sender<()>) {
    serve_app(Server::new(create_test_server_config(), state).app()).await
}

/// Run a test server whose requests all carry an admin session
pub async fn run_test_server_with_session(
    state: AppState<SqliteDatabase>,
) -> (std::net::SocketAddr, tokio::sync::oneshot::Sender<()>) {
    let app = Server::new(create_test_server_config(), state)
        .app()
        .layer(axum::middleware::from_fn(inject_admin_session));
    serve_app(app).await
}

async fn serve_app(
    app: axum::Router,
) -> (std::net::SocketAddr, tokio::sync::oneshot::Sender<()>) {
    use tokio::net::TcpListener;

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind test server");
    let addr = listener.local_addr().expect("Failed to get local address");

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

    tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
            .expect("Server error");
    });

    // Give the server a moment to start (100ms is sufficient for slow CI systems)
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    (addr, shutdown_tx)
}

/// Poll until `check` passes or a second elapses
pub async fn wait_until<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..50 {
        if check().await {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    false
}

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{header, Method};
use axum::middleware::{self, from_fn_with_state};
use axum::routing::{get, post};
use axum::Router;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::client_ip::ClientIpResolver;
use crate::config::{Config, StoreBackend};
use crate::error::StoreError;
use crate::handlers::{get_note, health_check, post_note, verify_note, AppState};
use crate::health::HealthChecker;
use crate::middleware::{admission, logging_middleware, security_headers, AdmissionGate};
use crate::notes::NoteService;
use crate::rate_limiter::RateLimiter;
use crate::store::{MemoryRecordStore, RecordStore, RedisRecordStore};

impl AppState {
    /// Wire up services around `store`. Limiter sweepers are not started.
    pub fn new(config: &Config, store: Arc<dyn RecordStore>) -> Self {
        Self {
            notes: Arc::new(NoteService::new(store.clone())),
            health: Arc::new(HealthChecker::new(store)),
            read_limiter: RateLimiter::new(config.read_limits()),
            write_limiter: RateLimiter::new(config.write_limits()),
            resolver: Arc::new(ClientIpResolver::new(config.trusted_proxies.clone())),
        }
    }

    fn gate(&self, limiter: &RateLimiter) -> AdmissionGate {
        AdmissionGate {
            limiter: limiter.clone(),
            resolver: self.resolver.clone(),
        }
    }
}

/// Build the router. Reads and writes each pass their own admission gate;
/// the health probe is not rate limited.
pub fn create_app(state: AppState, static_dir: Option<&Path>) -> Router {
    let reads = Router::new()
        .route("/api/note/:id", get(get_note))
        .route("/api/note/:id/verify", post(verify_note))
        .route_layer(from_fn_with_state(state.gate(&state.read_limiter), admission));

    let writes = Router::new()
        .route("/api/note", post(post_note))
        .route_layer(from_fn_with_state(state.gate(&state.write_limiter), admission));

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::mirror_request())
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
        .max_age(Duration::from_secs(3600));

    let mut app = Router::new()
        .merge(reads)
        .merge(writes)
        .route("/api/health", get(health_check))
        .with_state(state);

    if let Some(dir) = static_dir {
        app = app.fallback_service(ServeDir::new(dir));
    }

    app.layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(middleware::from_fn(security_headers))
            .layer(cors)
            .layer(middleware::from_fn(logging_middleware)),
    )
}

pub async fn connect_store(config: &Config) -> Result<Arc<dyn RecordStore>, StoreError> {
    match config.store_backend {
        StoreBackend::Redis => {
            let store = RedisRecordStore::connect(
                &config.redis_url,
                config.redis_password.as_deref(),
                config.store_timeout(),
            )
            .await?;
            Ok(Arc::new(store))
        }
        StoreBackend::Memory => {
            tracing::warn!("using in-memory record store; notes are lost on restart");
            Ok(Arc::new(MemoryRecordStore::new()))
        }
    }
}

pub struct Server {
    app: Router,
    bind_addr: SocketAddr,
    limiters: [RateLimiter; 2],
}

impl Server {
    pub async fn new(config: Config) -> Result<Self, StoreError> {
        let store = connect_store(&config).await?;
        let state = AppState::new(&config, store);

        state.read_limiter.start_sweeper();
        state.write_limiter.start_sweeper();
        let limiters = [state.read_limiter.clone(), state.write_limiter.clone()];

        let static_dir = config.static_dir.is_dir().then_some(config.static_dir.as_path());
        if static_dir.is_none() {
            tracing::warn!(dir = %config.static_dir.display(), "static directory not found, serving API only");
        }
        let app = create_app(state, static_dir);

        Ok(Self {
            app,
            bind_addr: config.bind_addr,
            limiters,
        })
    }

    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        let listener = tokio::net::TcpListener::bind(self.bind_addr).await?;

        tracing::info!("burnnote server listening on {}", self.bind_addr);
        tracing::info!("Health check available at /api/health");

        // Run server with graceful shutdown
        axum::serve(
            listener,
            self.app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await?;

        for limiter in &self.limiters {
            limiter.shutdown();
        }
        tracing::info!("burnnote server stopped");

        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        },
    }
}

//! DID-WBA Agent Binary
//!
//! Hosts the local agents found in the credentials directory, serves their
//! DID documents and authenticates every other request.

use actix_web::middleware::{from_fn, Logger};
use actix_web::{web, App, HttpResponse, HttpServer, Responder};
use anyhow::{Context, Result};
use didwba_auth::{
    did_wba_guard, AuthConfig, AuthMiddleware, AuthenticatedIdentity, AuthenticationServer,
    CachingResolver, DidCredentials, HttpDidResolver, InMemoryAgentRegistry, InMemoryNonceStore,
    KeyStore, WbaDid,
};
use std::sync::Arc;
use tracing::info;

/// Main entry point
#[actix_web::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("DIDWBA_CONFIG").ok())
        .unwrap_or_else(|| "didwba.toml".to_string());
    let config = AuthConfig::load(&config_path)?;

    let store = Arc::new(open_keystore(&config)?);
    let registry = Arc::new(InMemoryAgentRegistry::from_keystore(&store));

    let remote = Arc::new(HttpDidResolver::from_config(&config.resolver)?);
    let resolver = Arc::new(CachingResolver::new(
        store.clone(),
        remote,
        config.resolver.cache_ttl,
    ));

    let server = Arc::new(AuthenticationServer::new(
        &config,
        resolver,
        Arc::new(InMemoryNonceStore::new(config.nonce_replay_window)),
        registry,
    ));
    let middleware = web::Data::new(AuthMiddleware::new(&config, server)?);
    let store = web::Data::from(store);

    let bind_address = config.server.bind_address.clone();
    info!("Starting DID-WBA agent on http://{}", bind_address);

    HttpServer::new(move || {
        App::new()
            .app_data(middleware.clone())
            .app_data(store.clone())
            .wrap(from_fn(did_wba_guard))
            .wrap(Logger::default())
            .route("/", web::get().to(index))
            .route("/health", web::get().to(health_check))
            .route("/wba/user/{id}/did.json", web::get().to(did_document))
            .route("/wba/auth", web::get().to(auth))
            .route("/wba/auth", web::post().to(auth))
    })
    .bind(&bind_address)
    .with_context(|| format!("failed to bind {}", bind_address))?
    .run()
    .await?;

    Ok(())
}

/// Load the credential bundles, creating one agent on first start
fn open_keystore(config: &AuthConfig) -> Result<KeyStore> {
    let dir = &config.server.credentials_dir;
    if dir.is_dir() {
        let store = KeyStore::load_dir(dir)?;
        if !store.is_empty() {
            return Ok(store);
        }
    }

    let (host, port) = match config.server.bind_address.rsplit_once(':') {
        Some((host, port)) => (host.to_string(), port.parse::<u16>().ok()),
        None => (config.server.bind_address.clone(), None),
    };
    let id = hex::encode(&uuid::Uuid::new_v4().as_bytes()[..8]);
    let credentials = DidCredentials::generate(&host, port, &["wba", "user", &id])?;
    credentials.save_to_dir(dir.join(&id))?;
    info!(did = %credentials.did(), "created agent credentials");

    let store = KeyStore::new();
    store.insert(credentials);
    Ok(store)
}

/// Health check endpoint
async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Root endpoint
async fn index(store: web::Data<KeyStore>) -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "protocol": didwba_auth::DIDWBA_PROTOCOL,
        "agents": store.dids(),
    }))
}

/// DID document of a hosted agent
async fn did_document(store: web::Data<KeyStore>, path: web::Path<String>) -> impl Responder {
    let id = path.into_inner();
    let found = store.dids().into_iter().find(|did| {
        WbaDid::parse(did)
            .map(|wba| wba.path_segments == ["wba", "user", id.as_str()])
            .unwrap_or(false)
    });

    match found.and_then(|did| store.document(&did)) {
        Some(document) => HttpResponse::Ok().json(document.raw_document),
        None => HttpResponse::NotFound().json(serde_json::json!({
            "detail": format!("no DID document for user {}", id),
        })),
    }
}

/// Handshake endpoint; the middleware has already authenticated the caller
async fn auth(identity: web::ReqData<AuthenticatedIdentity>) -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "authenticated": true,
        "did": identity.did,
        "agent": identity.agent_did,
    }))
}

//! End-to-end mutual authentication between two agents over HTTP

use actix_web::dev::ServerHandle;
use actix_web::middleware::from_fn;
use actix_web::{web, App, HttpResponse, HttpServer, Responder};
use didwba_auth::{did_wba_guard, AuthConfig, AuthMiddleware, AuthenticatedIdentity};
use didwba_tests::{introduce, setup_test_logging, Peer};
use std::net::TcpListener;

async fn whoami(identity: web::ReqData<AuthenticatedIdentity>) -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "authenticated": true,
        "did": identity.did,
    }))
}

async fn echo(
    identity: web::ReqData<AuthenticatedIdentity>,
    body: web::Json<serde_json::Value>,
) -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "from": identity.did,
        "echo": body.into_inner(),
    }))
}

async fn index() -> impl Responder {
    HttpResponse::Ok().body("agent")
}

/// Agent B listening on an ephemeral port, with A introduced to it
struct Harness {
    a: Peer,
    b: Peer,
    base_url: String,
    handle: ServerHandle,
}

fn start(config: &AuthConfig) -> Harness {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind");
    let port = listener.local_addr().expect("No local address").port();

    // B's DID names the address it is served from
    let a = Peer::generate("a.example", 9000, "1111");
    let b = Peer::generate("127.0.0.1", port, "2222");
    introduce(&a, &b);

    let middleware = web::Data::new(AuthMiddleware::new(config, b.server(config)).unwrap());
    let server = HttpServer::new(move || {
        App::new()
            .app_data(middleware.clone())
            .wrap(from_fn(did_wba_guard))
            .route("/", web::get().to(index))
            .route("/wba/auth", web::get().to(whoami))
            .route("/api/echo", web::post().to(echo))
    })
    .workers(1)
    .listen(listener)
    .expect("Failed to listen")
    .run();

    let handle = server.handle();
    actix_web::rt::spawn(server);

    Harness {
        a,
        b,
        base_url: format!("http://127.0.0.1:{}", port),
        handle,
    }
}

#[actix_web::test]
async fn test_handshake_then_bearer_then_reauth() {
    setup_test_logging();
    let config = AuthConfig::default();
    let h = start(&config);
    let client = h.a.client(&config);
    let auth_url = format!("{}/wba/auth", h.base_url);

    // First call signs with the DID and verifies B's proof
    let first = client
        .send("GET", &auth_url, h.b.did(), None)
        .await
        .unwrap();
    assert_eq!(first.status, 200);
    assert!(!first.used_bearer);
    assert_eq!(first.json().unwrap()["did"], h.a.did());

    let token = first.stored_token.expect("token stored after handshake");
    assert_eq!(token.issuer_did, h.b.did());
    assert!(h.b.agent.tokens().verify(&token.token, h.a.did()).is_ok());

    // Second call reuses the token
    let echo_url = format!("{}/api/echo", h.base_url);
    let payload = serde_json::json!({"message": "hello"});
    let second = client
        .send("POST", &echo_url, h.b.did(), Some(&payload))
        .await
        .unwrap();
    assert_eq!(second.status, 200);
    assert!(second.used_bearer);
    let body = second.json().unwrap();
    assert_eq!(body["from"], h.a.did());
    assert_eq!(body["echo"]["message"], "hello");

    // B revokes; the next call falls back to a fresh handshake
    assert!(h.b.agent.tokens().revoke(h.a.did()));
    let third = client
        .send("GET", &auth_url, h.b.did(), None)
        .await
        .unwrap();
    assert_eq!(third.status, 200);
    assert!(!third.used_bearer);

    let renewed = third.stored_token.expect("token stored after re-authentication");
    assert_ne!(renewed.token, token.token);
    assert!(h.b.agent.tokens().verify(&renewed.token, h.a.did()).is_ok());

    h.handle.stop(true).await;
}

#[actix_web::test]
async fn test_one_way_client() {
    let config = AuthConfig::default();
    let h = start(&config);
    let client = h.a.client(&config).with_two_way_auth(false);

    let response = client
        .send("GET", &format!("{}/wba/auth", h.base_url), h.b.did(), None)
        .await
        .unwrap();
    assert_eq!(response.status, 200);
    assert!(response.stored_token.is_some());
    assert!(h.a.agent.tokens().received_token(h.b.did()).is_some());

    h.handle.stop(true).await;
}

#[actix_web::test]
async fn test_plain_requests() {
    let config = AuthConfig::default();
    let h = start(&config);
    let http = reqwest::Client::new();

    let root = http.get(format!("{}/", h.base_url)).send().await.unwrap();
    assert_eq!(root.status().as_u16(), 200);

    let rejected = http
        .get(format!("{}/wba/auth", h.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(rejected.status().as_u16(), 401);
    let body: serde_json::Value = rejected.json().await.unwrap();
    assert_eq!(body["code"], "missing_header");

    let forged = http
        .get(format!("{}/wba/auth", h.base_url))
        .header("authorization", "Bearer not-a-token")
        .send()
        .await
        .unwrap();
    assert_eq!(forged.status().as_u16(), 401);

    h.handle.stop(true).await;
}

#[actix_web::test]
async fn test_unknown_target_rejected() {
    let config = AuthConfig::default();
    let h = start(&config);
    let client = h.a.client(&config);

    // B does not host this DID, so the handshake cannot complete
    let stranger = Peer::generate("127.0.0.1", 1, "9999");
    h.a.store.deposit_document(stranger.agent.document().clone());

    let response = client
        .send(
            "GET",
            &format!("{}/wba/auth", h.base_url),
            stranger.did(),
            None,
        )
        .await
        .unwrap();
    assert_eq!(response.status, 401);
    assert!(response.stored_token.is_none());
    assert_eq!(response.json().unwrap()["code"], "unresolvable_did");

    h.handle.stop(true).await;
}

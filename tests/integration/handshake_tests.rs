//! Handshake tests driving client and server in-process

use didwba_auth::config::RemoteScheme;
use didwba_auth::server::AuthMethod;
use didwba_auth::{
    AuthConfig, AuthError, AuthRequest, CachingResolver, DidCredentials, HttpDidResolver,
    KeyStore, LocalAgent, OutgoingAuth,
};
use didwba_tests::{introduce, setup_test_logging, Peer};
use std::sync::Arc;
use std::time::Duration;

const TARGET_URL: &str = "http://b.example:9001/wba/auth";

fn peers() -> (Peer, Peer) {
    let a = Peer::generate("a.example", 9000, "1111");
    let b = Peer::generate("b.example", 9001, "2222");
    introduce(&a, &b);
    (a, b)
}

fn request(auth: &OutgoingAuth, caller: &str, target: &str) -> AuthRequest {
    AuthRequest {
        path: "/wba/auth".to_string(),
        host: "b.example:9001".to_string(),
        authorization: Some(auth.header_value().to_string()),
        req_did: Some(caller.to_string()),
        resp_did: Some(target.to_string()),
    }
}

#[tokio::test]
async fn test_two_way_handshake_then_bearer() {
    setup_test_logging();
    let config = AuthConfig::default();
    let (a, b) = peers();
    let client = a.client(&config);
    let server = b.server(&config);

    let auth = client.authorization(b.did(), TARGET_URL, "GET").unwrap();
    assert!(!auth.is_bearer());

    let outcome = server
        .authenticate(&request(&auth, a.did(), b.did()))
        .await
        .unwrap();
    assert_eq!(outcome.caller_did, a.did());
    assert_eq!(outcome.method, AuthMethod::DidSignature);

    let token = client
        .handle_response(b.did(), outcome.response_header.as_deref().unwrap())
        .await
        .unwrap();
    assert_eq!(token.token, outcome.issued_token.unwrap().token);

    // Next call reuses the token
    let auth = client.authorization(b.did(), TARGET_URL, "GET").unwrap();
    assert_eq!(auth, OutgoingAuth::Bearer(format!("Bearer {}", token.token)));

    let outcome = server
        .authenticate(&request(&auth, a.did(), b.did()))
        .await
        .unwrap();
    assert_eq!(outcome.method, AuthMethod::Bearer);
    assert_eq!(outcome.caller_did, a.did());
    assert!(outcome.response_header.is_none());
}

#[tokio::test]
async fn test_one_way_handshake() {
    let config = AuthConfig::default();
    let (a, b) = peers();
    let client = a.client(&config).with_two_way_auth(false);

    let auth = client.authorization(b.did(), TARGET_URL, "POST").unwrap();
    let outcome = b
        .server(&config)
        .authenticate(&request(&auth, a.did(), b.did()))
        .await
        .unwrap();

    let header = outcome.response_header.unwrap();
    assert!(header.starts_with("Bearer "));

    let token = client.handle_response(b.did(), &header).await.unwrap();
    assert!(b.agent.tokens().verify(&token.token, a.did()).is_ok());
}

#[tokio::test]
async fn test_revoked_token_forces_new_handshake() {
    let config = AuthConfig::default();
    let (a, b) = peers();
    let client = a.client(&config);
    let server = b.server(&config);

    let auth = client.authorization(b.did(), TARGET_URL, "GET").unwrap();
    let outcome = server
        .authenticate(&request(&auth, a.did(), b.did()))
        .await
        .unwrap();
    client
        .handle_response(b.did(), outcome.response_header.as_deref().unwrap())
        .await
        .unwrap();

    assert!(b.agent.tokens().revoke(a.did()));

    let auth = client.authorization(b.did(), TARGET_URL, "GET").unwrap();
    let rejected = server
        .authenticate(&request(&auth, a.did(), b.did()))
        .await
        .unwrap_err();
    assert!(matches!(rejected, AuthError::TokenRevoked(_)));
    assert!(rejected.is_token_rejection());

    client.clear_token(b.did());
    let auth = client.authorization(b.did(), TARGET_URL, "GET").unwrap();
    assert!(!auth.is_bearer());
    assert!(server
        .authenticate(&request(&auth, a.did(), b.did()))
        .await
        .is_ok());
}

#[tokio::test]
async fn test_replayed_header_rejected() {
    let config = AuthConfig::default();
    let (a, b) = peers();
    let server = b.server(&config);

    let auth = a.client(&config).did_authorization(b.did(), TARGET_URL, "GET").unwrap();
    let req = request(&auth, a.did(), b.did());

    assert!(server.authenticate(&req).await.is_ok());
    assert!(matches!(
        server.authenticate(&req).await,
        Err(AuthError::ReplayedNonce(_))
    ));
}

#[tokio::test]
async fn test_signature_bound_to_target_domain() {
    let config = AuthConfig::default();
    let (a, b) = peers();

    // Signed for a different host than the one receiving it
    let auth = a
        .client(&config)
        .did_authorization(b.did(), "http://c.example:9001/wba/auth", "GET")
        .unwrap();
    assert!(matches!(
        b.server(&config)
            .authenticate(&request(&auth, a.did(), b.did()))
            .await,
        Err(AuthError::InvalidSignature(_))
    ));
}

#[tokio::test]
async fn test_resp_did_selects_hosted_agent() {
    let config = AuthConfig::default();
    let (a, b) = peers();

    // Second agent on the same host
    let second = b.registry.register(LocalAgent::new(b.store.insert(
        DidCredentials::generate("b.example", Some(9001), &["wba", "user", "3333"]).unwrap(),
    )));
    a.store.deposit_document(second.document().clone());

    let client = a.client(&config);
    let auth = client.authorization(second.did(), TARGET_URL, "GET").unwrap();
    let outcome = b
        .server(&config)
        .authenticate(&request(&auth, a.did(), second.did()))
        .await
        .unwrap();
    assert_eq!(outcome.agent_did, second.did());

    // The reciprocal proof comes from the addressed agent
    let token = client
        .handle_response(second.did(), outcome.response_header.as_deref().unwrap())
        .await
        .unwrap();
    assert!(second.tokens().verify(&token.token, a.did()).is_ok());
    assert!(b.agent.tokens().issued_token(a.did()).is_none());
}

#[tokio::test]
async fn test_agent_loaded_from_credentials_dir() {
    let config = AuthConfig::default();
    let dir = tempfile::tempdir().unwrap();

    let generated =
        DidCredentials::generate("a.example", Some(9000), &["wba", "user", "1111"]).unwrap();
    let did = generated.did().to_string();
    generated.save_to_dir(dir.path().join("1111")).unwrap();

    let store = KeyStore::load_dir(dir.path()).unwrap();
    let a = Peer::hosting((*store.credentials(&did).unwrap()).clone());
    let b = Peer::generate("b.example", 9001, "2222");
    introduce(&a, &b);

    let auth = a.client(&config).authorization(b.did(), TARGET_URL, "GET").unwrap();
    let outcome = b
        .server(&config)
        .authenticate(&request(&auth, &did, b.did()))
        .await
        .unwrap();
    assert_eq!(outcome.caller_did, did);
}

#[tokio::test]
async fn test_rotated_key_picked_up_from_origin() {
    let config = AuthConfig::default();
    let mut origin = mockito::Server::new_async().await;
    let host_with_port = origin.host_with_port();
    let (host, port) = host_with_port.split_once(':').unwrap();
    let port: u16 = port.parse().unwrap();

    let b = Peer::generate("b.example", 9001, "2222");
    let before = Peer::generate(host, port, "1111");
    before.store.deposit_document(b.agent.document().clone());

    let published = origin
        .mock("GET", "/wba/user/1111/did.json")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(before.agent.document().raw_document.to_string())
        .create_async()
        .await;

    let remote =
        Arc::new(HttpDidResolver::new(RemoteScheme::Http, Duration::from_secs(5)).unwrap());
    let resolver = Arc::new(CachingResolver::new(
        b.store.clone(),
        remote,
        Duration::from_secs(300),
    ));
    let server = b.server_with(&config, resolver);

    let auth = before.client(&config).authorization(b.did(), TARGET_URL, "GET").unwrap();
    server
        .authenticate(&request(&auth, before.did(), b.did()))
        .await
        .unwrap();
    published.assert_async().await;

    // Same DID, new key; the cached document is stale
    let after = Peer::generate(host, port, "1111");
    assert_eq!(after.did(), before.did());
    after.store.deposit_document(b.agent.document().clone());

    published.remove_async().await;
    let rotated = origin
        .mock("GET", "/wba/user/1111/did.json")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(after.agent.document().raw_document.to_string())
        .expect(1)
        .create_async()
        .await;

    let auth = after.client(&config).authorization(b.did(), TARGET_URL, "GET").unwrap();
    let outcome = server
        .authenticate(&request(&auth, after.did(), b.did()))
        .await
        .unwrap();
    assert_eq!(outcome.caller_did, after.did());
    rotated.assert_async().await;
}

//! actix-web middleware tests

use actix_web::body::{to_bytes, MessageBody};
use actix_web::dev::ServiceResponse;
use actix_web::http::StatusCode;
use actix_web::middleware::from_fn;
use actix_web::{test, web, App, HttpResponse, Responder};
use didwba_auth::{did_wba_guard, AuthConfig, AuthMiddleware, AuthenticatedIdentity};
use didwba_tests::{introduce, Peer};
use serde_json::Value;

const TARGET_URL: &str = "http://b.example:9001/wba/auth";
const TARGET_HOST: &str = "b.example:9001";

async fn whoami(identity: web::ReqData<AuthenticatedIdentity>) -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "did": identity.did,
        "agent": identity.agent_did,
    }))
}

async fn open() -> impl Responder {
    HttpResponse::Ok().body("open")
}

fn middleware(peer: &Peer, config: &AuthConfig) -> web::Data<AuthMiddleware> {
    web::Data::new(AuthMiddleware::new(config, peer.server(config)).unwrap())
}

/// Status, `Authorization` header and JSON body, turning middleware errors into responses
async fn read<B>(
    result: Result<ServiceResponse<B>, actix_web::Error>,
) -> (StatusCode, Option<String>, Value)
where
    B: MessageBody + 'static,
{
    let response = match result {
        Ok(response) => response.into_parts().1.map_into_boxed_body(),
        Err(err) => err.error_response(),
    };

    let status = response.status();
    let authorization = response
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let bytes = to_bytes(response.into_body()).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);

    (status, authorization, body)
}

#[actix_web::test]
async fn test_protected_path_requires_authorization() {
    let config = AuthConfig::default();
    let b = Peer::generate("b.example", 9001, "2222");

    let app = test::init_service(
        App::new()
            .app_data(middleware(&b, &config))
            .wrap(from_fn(did_wba_guard))
            .route("/api/data", web::get().to(whoami)),
    )
    .await;

    let req = test::TestRequest::get()
        .uri("/api/data")
        .insert_header(("host", TARGET_HOST))
        .to_request();
    let (status, _, body) = read(test::try_call_service(&app, req).await).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "missing_header");
    assert_eq!(body["detail"], "Missing authorization header");

    let req = test::TestRequest::get()
        .uri("/api/data")
        .insert_header(("host", TARGET_HOST))
        .insert_header(("authorization", "Basic dXNlcjpwYXNz"))
        .to_request();
    let (status, _, body) = read(test::try_call_service(&app, req).await).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "malformed_header");
}

#[actix_web::test]
async fn test_exempt_paths_skip_authentication() {
    let config = AuthConfig::default();
    let b = Peer::generate("b.example", 9001, "2222");

    let app = test::init_service(
        App::new()
            .app_data(middleware(&b, &config))
            .wrap(from_fn(did_wba_guard))
            .route("/", web::get().to(open))
            .route("/health", web::get().to(open))
            .route("/wba/user/{id}/did.json", web::get().to(open))
            .route("/wba/auth", web::get().to(whoami))
            .route("/api/data", web::get().to(open)),
    )
    .await;

    for path in ["/", "/health", "/wba/user/2222/did.json"] {
        let req = test::TestRequest::get().uri(path).to_request();
        let (status, _, _) = read(test::try_call_service(&app, req).await).await;
        assert_eq!(status, StatusCode::OK, "{} should be exempt", path);
    }

    for path in ["/wba/auth", "/api/data"] {
        let req = test::TestRequest::get().uri(path).to_request();
        let (status, _, _) = read(test::try_call_service(&app, req).await).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "{} should be protected", path);
    }
}

#[actix_web::test]
async fn test_handshake_through_middleware() {
    let config = AuthConfig::default();
    let a = Peer::generate("a.example", 9000, "1111");
    let b = Peer::generate("b.example", 9001, "2222");
    introduce(&a, &b);
    let client = a.client(&config);

    let app = test::init_service(
        App::new()
            .app_data(middleware(&b, &config))
            .wrap(from_fn(did_wba_guard))
            .route("/wba/auth", web::get().to(whoami)),
    )
    .await;

    let auth = client.authorization(b.did(), TARGET_URL, "GET").unwrap();
    let req = test::TestRequest::get()
        .uri("/wba/auth")
        .insert_header(("host", TARGET_HOST))
        .insert_header(("authorization", auth.header_value()))
        .insert_header(("req_did", a.did()))
        .insert_header(("resp_did", b.did()))
        .to_request();
    let (status, authorization, body) = read(test::try_call_service(&app, req).await).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["did"], a.did());
    assert_eq!(body["agent"], b.did());

    let token = client
        .handle_response(b.did(), &authorization.unwrap())
        .await
        .unwrap();

    // Bearer call: identity available, no new token
    let req = test::TestRequest::get()
        .uri("/wba/auth")
        .insert_header(("host", TARGET_HOST))
        .insert_header(("authorization", format!("Bearer {}", token.token)))
        .insert_header(("req_did", a.did()))
        .insert_header(("resp_did", b.did()))
        .to_request();
    let (status, authorization, body) = read(test::try_call_service(&app, req).await).await;

    assert_eq!(status, StatusCode::OK);
    assert!(authorization.is_none());
    assert_eq!(body["did"], a.did());

    b.agent.tokens().revoke(a.did());
    let req = test::TestRequest::get()
        .uri("/wba/auth")
        .insert_header(("host", TARGET_HOST))
        .insert_header(("authorization", format!("Bearer {}", token.token)))
        .to_request();
    let (status, _, body) = read(test::try_call_service(&app, req).await).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "token_revoked");
}

#[actix_web::test]
async fn test_custom_exempt_paths_from_config() {
    let config = AuthConfig::from_toml(
        r#"
exempt_paths = ["/health", "/static/*"]
auth_path = "/wba/auth"
"#,
    )
    .unwrap();
    let b = Peer::generate("b.example", 9001, "2222");

    let app = test::init_service(
        App::new()
            .app_data(middleware(&b, &config))
            .wrap(from_fn(did_wba_guard))
            .route("/", web::get().to(open))
            .route("/health", web::get().to(open))
            .route("/static/{file}", web::get().to(open)),
    )
    .await;

    let req = test::TestRequest::get().uri("/health").to_request();
    assert_eq!(read(test::try_call_service(&app, req).await).await.0, StatusCode::OK);

    let req = test::TestRequest::get().uri("/static/app.js").to_request();
    assert_eq!(read(test::try_call_service(&app, req).await).await.0, StatusCode::OK);

    // Root is no longer in the list
    let req = test::TestRequest::get().uri("/").to_request();
    assert_eq!(
        read(test::try_call_service(&app, req).await).await.0,
        StatusCode::UNAUTHORIZED
    );
}

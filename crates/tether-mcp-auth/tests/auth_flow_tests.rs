//! End-to-end authorization flow tests against an in-process fake
//! authorization server.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tether_mcp_auth::{
    authorize, derive_challenge, handle_authorization_callback, AuthError, AuthEventBus,
    AuthFlowOutcome, CallbackOptions, CallbackParams, KeyValueStorage, MemoryStorage, NoPopup,
    OAuthProvider, PopupHandle, PopupLauncher, ProviderOptions, TokenBodyFormat, TokenSet,
};
use url::Url;

/// Launcher that records every URL and reports a live popup.
#[derive(Default)]
struct RecordingPopup {
    opened: Mutex<Vec<String>>,
}

impl RecordingPopup {
    fn last_url(&self) -> Option<String> {
        self.opened
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .last()
            .cloned()
    }
}

impl PopupLauncher for RecordingPopup {
    fn open(&self, url: &str, _features: &str) -> Option<PopupHandle> {
        self.opened
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(url.to_string());
        Some(PopupHandle { closed: false })
    }
}

#[derive(Clone, Default)]
struct FakeAuthServer {
    /// Body formats seen at the token endpoint.
    token_bodies: Arc<Mutex<Vec<String>>>,
}

async fn spawn_fake_auth_server(state: FakeAuthServer) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let base = format!("http://{addr}");

    let metadata_base = base.clone();
    let app = Router::new()
        .route(
            "/.well-known/oauth-authorization-server",
            get(move || {
                let base = metadata_base.clone();
                async move {
                    Json(serde_json::json!({
                        "issuer": base,
                        "authorization_endpoint": format!("{base}/authorize"),
                        "token_endpoint": format!("{base}/token"),
                        "registration_endpoint": format!("{base}/register"),
                        "response_types_supported": ["code"],
                        "code_challenge_methods_supported": ["S256"],
                    }))
                }
            }),
        )
        .route(
            "/register",
            post(|Json(body): Json<serde_json::Value>| async move {
                Json(serde_json::json!({
                    "client_id": "client-123",
                    "redirect_uris": body["redirect_uris"],
                    "client_name": body["client_name"],
                    "token_endpoint_auth_method": "none",
                }))
            }),
        )
        .route("/token", post(token_endpoint))
        .with_state(state);

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    base
}

async fn token_endpoint(
    State(state): State<FakeAuthServer>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<serde_json::Value>, (axum::http::StatusCode, String)> {
    state
        .token_bodies
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .push(body.clone());

    let content_type = headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let fields: HashMap<String, String> = if content_type.starts_with("application/json") {
        serde_json::from_str(&body).map_err(|e| {
            (axum::http::StatusCode::BAD_REQUEST, format!("bad json: {e}"))
        })?
    } else {
        url::form_urlencoded::parse(body.as_bytes())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    };

    match fields.get("grant_type").map(String::as_str) {
        Some("authorization_code") => {
            if fields.get("code").map(String::as_str) == Some("bad-code") {
                return Err((
                    axum::http::StatusCode::BAD_REQUEST,
                    r#"{"error":"invalid_grant","error_description":"code replayed"}"#.to_string(),
                ));
            }
            if fields.get("code_verifier").map_or(true, String::is_empty) {
                return Err((
                    axum::http::StatusCode::BAD_REQUEST,
                    r#"{"error":"invalid_request","error_description":"missing verifier"}"#
                        .to_string(),
                ));
            }
            Ok(Json(serde_json::json!({
                "access_token": "access-1",
                "token_type": "Bearer",
                "expires_in": 3600,
                "refresh_token": "refresh-1",
            })))
        }
        Some("refresh_token") => Ok(Json(serde_json::json!({
            "access_token": "access-refreshed",
            "token_type": "Bearer",
            "expires_in": 3600,
        }))),
        other => Err((
            axum::http::StatusCode::BAD_REQUEST,
            format!("unsupported grant type {other:?}"),
        )),
    }
}

fn provider_for(
    server_url: &str,
    storage: &Arc<dyn KeyValueStorage>,
    launcher: Arc<dyn PopupLauncher>,
    scopes: &[&str],
) -> OAuthProvider {
    let options = ProviderOptions {
        client_name: Some("Tether Test Host".to_string()),
        scopes: scopes.iter().map(|s| s.to_string()).collect(),
        ..ProviderOptions::default()
    };
    OAuthProvider::new(server_url, options, Arc::clone(storage), launcher)
}

fn query_param(url: &str, name: &str) -> Option<String> {
    Url::parse(url)
        .ok()?
        .query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}

#[tokio::test]
async fn cold_flow_builds_authorize_url_and_callback_stores_tokens() {
    let base = spawn_fake_auth_server(FakeAuthServer::default()).await;
    let server_url = format!("{base}/mcp/v1");

    let storage: Arc<dyn KeyValueStorage> = Arc::new(MemoryStorage::new());
    let popup = Arc::new(RecordingPopup::default());
    let provider = provider_for(
        &server_url,
        &storage,
        popup.clone(),
        &["file-ops", "web-search"],
    );

    let outcome = authorize(&provider).await.unwrap();
    let auth_url = match outcome {
        AuthFlowOutcome::Redirect { url, popup_blocked } => {
            assert!(!popup_blocked);
            url
        }
        other => panic!("expected redirect, got {other:?}"),
    };
    assert_eq!(popup.last_url().as_deref(), Some(auth_url.as_str()));

    // Authorize URL carries the configured scopes in order, PKCE, and state.
    assert_eq!(
        query_param(&auth_url, "scope").as_deref(),
        Some("file-ops web-search")
    );
    assert_eq!(query_param(&auth_url, "response_type").as_deref(), Some("code"));
    assert_eq!(
        query_param(&auth_url, "code_challenge_method").as_deref(),
        Some("S256")
    );
    let state = query_param(&auth_url, "state").unwrap();
    assert_eq!(state.len(), 32);

    // The challenge on the URL re-derives from the persisted verifier.
    let verifier = provider.code_verifier().unwrap();
    assert_eq!(
        query_param(&auth_url, "code_challenge").unwrap(),
        derive_challenge(&verifier)
    );

    // Registration happened and was persisted.
    assert_eq!(
        provider.client_information().unwrap().client_id,
        "client-123"
    );

    // Simulate the redirect landing on the callback page.
    let bus = AuthEventBus::new();
    let mut receiver = bus.subscribe();
    let params = CallbackParams::from_query(&format!("code=good-code&state={state}"));
    let outcome = handle_authorization_callback(
        &params,
        Arc::clone(&storage),
        &bus,
        &CallbackOptions::default(),
    )
    .await
    .unwrap();

    assert!(outcome.opener_notified);
    assert_eq!(outcome.server_url_hash, provider.server_url_hash());
    let message = receiver.recv().await.unwrap();
    assert!(message.success);

    // Tokens stored, single-use flow state gone.
    let tokens = provider.tokens().unwrap();
    assert_eq!(tokens.access_token, "access-1");
    assert!(tokens.expires_at.is_some());
    assert!(provider.code_verifier().is_err());
    assert!(provider.last_attempted_auth_url().is_none());

    // Replaying the same callback fails without clobbering tokens.
    let replay = handle_authorization_callback(
        &params,
        Arc::clone(&storage),
        &bus,
        &CallbackOptions::default(),
    )
    .await;
    assert!(matches!(replay, Err(AuthError::InvalidOrExpiredState)));
    assert_eq!(provider.tokens().unwrap().access_token, "access-1");
}

#[tokio::test]
async fn expired_tokens_refresh_silently_when_possible() {
    let base = spawn_fake_auth_server(FakeAuthServer::default()).await;
    let server_url = format!("{base}/mcp/v1");

    let storage: Arc<dyn KeyValueStorage> = Arc::new(MemoryStorage::new());
    let provider = provider_for(&server_url, &storage, Arc::new(NoPopup), &["openid"]);

    provider
        .save_client_information(&serde_json::from_value(serde_json::json!({
            "client_id": "client-123"
        })).unwrap())
        .unwrap();
    provider
        .save_tokens(&TokenSet {
            access_token: "stale".into(),
            token_type: "Bearer".into(),
            expires_in: None,
            expires_at: Some(1),
            refresh_token: Some("refresh-1".into()),
            scope: None,
        })
        .unwrap();
    assert!(provider.tokens().is_none());

    let outcome = authorize(&provider).await.unwrap();
    assert!(matches!(outcome, AuthFlowOutcome::Authorized));
    assert_eq!(provider.tokens().unwrap().access_token, "access-refreshed");
}

#[tokio::test]
async fn valid_tokens_short_circuit_authorization() {
    // No fake server at all: with valid tokens, authorize never goes on the
    // wire.
    let storage: Arc<dyn KeyValueStorage> = Arc::new(MemoryStorage::new());
    let provider = provider_for(
        "http://127.0.0.1:1/mcp",
        &storage,
        Arc::new(NoPopup),
        &["openid"],
    );
    provider
        .save_tokens(&TokenSet {
            access_token: "warm".into(),
            token_type: "Bearer".into(),
            expires_in: Some(600),
            expires_at: None,
            refresh_token: None,
            scope: None,
        })
        .unwrap();

    let outcome = authorize(&provider).await.unwrap();
    assert!(matches!(outcome, AuthFlowOutcome::Authorized));
}

#[tokio::test]
async fn callback_race_loser_fails_cleanly() {
    let base = spawn_fake_auth_server(FakeAuthServer::default()).await;
    let server_url = format!("{base}/mcp/v1");

    let storage: Arc<dyn KeyValueStorage> = Arc::new(MemoryStorage::new());
    let popup = Arc::new(RecordingPopup::default());

    // Two tabs start independent flows for the same server.
    let tab_a = provider_for(&server_url, &storage, popup.clone(), &["openid"]);
    let url_a = match authorize(&tab_a).await.unwrap() {
        AuthFlowOutcome::Redirect { url, .. } => url,
        other => panic!("expected redirect, got {other:?}"),
    };
    let tab_b = provider_for(&server_url, &storage, popup.clone(), &["openid"]);
    let url_b = match authorize(&tab_b).await.unwrap() {
        AuthFlowOutcome::Redirect { url, .. } => url,
        other => panic!("expected redirect, got {other:?}"),
    };

    let state_a = query_param(&url_a, "state").unwrap();
    let state_b = query_param(&url_b, "state").unwrap();
    assert_ne!(state_a, state_b);

    let bus = AuthEventBus::new();
    let winner = CallbackParams::from_query(&format!("code=good-code&state={state_b}"));
    handle_authorization_callback(&winner, Arc::clone(&storage), &bus, &CallbackOptions::default())
        .await
        .unwrap();
    let stored = tab_a.tokens().unwrap();

    // Tab A's flow shares the per-server verifier slot, which the winning
    // exchange consumed; its callback must fail on its own record or the
    // missing verifier, never corrupt the stored tokens.
    let loser = CallbackParams::from_query(&format!("code=good-code&state={state_a}"));
    let result = handle_authorization_callback(
        &loser,
        Arc::clone(&storage),
        &bus,
        &CallbackOptions::default(),
    )
    .await;
    assert!(matches!(
        result,
        Err(AuthError::CorruptFlow(_)) | Err(AuthError::InvalidOrExpiredState)
    ));
    assert_eq!(tab_a.tokens().unwrap(), stored);
}

#[tokio::test]
async fn token_endpoint_error_body_is_preserved_verbatim() {
    let base = spawn_fake_auth_server(FakeAuthServer::default()).await;
    let server_url = format!("{base}/mcp/v1");

    let storage: Arc<dyn KeyValueStorage> = Arc::new(MemoryStorage::new());
    let popup = Arc::new(RecordingPopup::default());
    let provider = provider_for(&server_url, &storage, popup.clone(), &["openid"]);

    let url = match authorize(&provider).await.unwrap() {
        AuthFlowOutcome::Redirect { url, .. } => url,
        other => panic!("expected redirect, got {other:?}"),
    };
    let state = query_param(&url, "state").unwrap();

    let bus = AuthEventBus::new();
    let params = CallbackParams::from_query(&format!("code=bad-code&state={state}"));
    let result = handle_authorization_callback(
        &params,
        Arc::clone(&storage),
        &bus,
        &CallbackOptions::default(),
    )
    .await;

    match result {
        Err(AuthError::TokenExchangeFailed(body)) => {
            assert!(body.contains("code replayed"), "unexpected body: {body}");
        }
        other => panic!("expected TokenExchangeFailed, got {other:?}"),
    }
    // No tokens were written on failure.
    assert!(provider.tokens().is_none());
}

#[tokio::test]
async fn json_token_body_format_posts_json() {
    let fake = FakeAuthServer::default();
    let base = spawn_fake_auth_server(fake.clone()).await;
    let server_url = format!("{base}/mcp/v1");

    let storage: Arc<dyn KeyValueStorage> = Arc::new(MemoryStorage::new());
    let popup = Arc::new(RecordingPopup::default());
    let options = ProviderOptions {
        token_body_format: TokenBodyFormat::Json,
        ..ProviderOptions::default()
    };
    let provider = OAuthProvider::new(&server_url, options, Arc::clone(&storage), popup);

    let url = match authorize(&provider).await.unwrap() {
        AuthFlowOutcome::Redirect { url, .. } => url,
        other => panic!("expected redirect, got {other:?}"),
    };
    let state = query_param(&url, "state").unwrap();

    let bus = AuthEventBus::new();
    let params = CallbackParams::from_query(&format!("code=good-code&state={state}"));
    handle_authorization_callback(&params, Arc::clone(&storage), &bus, &CallbackOptions::default())
        .await
        .unwrap();

    let bodies = fake
        .token_bodies
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .clone();
    let last = bodies.last().unwrap();
    assert!(last.trim_start().starts_with('{'), "not JSON: {last}");
    assert_eq!(provider.tokens().unwrap().access_token, "access-1");
}

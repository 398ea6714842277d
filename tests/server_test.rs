mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{routing::get, routing::post, Json, Router};
use serde_json::json;
use tokio::net::TcpListener;

use app_bootstrap::config::{
    HttpClientConfig, IdentityConfig, LoggerConfig, SchedulerConfig, ServerConfig,
};
use app_bootstrap::subsystem::{HttpClient, IdentityClient, Scheduler, Server};
use app_bootstrap::{Bootstrap, BoxError, Context, Phase, SubsystemKind};
use common::{test_lifecycle, wait_for_phase};

fn local_logger() -> LoggerConfig {
    LoggerConfig {
        install_global: false,
        ..LoggerConfig::default()
    }
}

fn ephemeral_server() -> ServerConfig {
    ServerConfig {
        bind_address: "127.0.0.1:0".into(),
        release_mode: true,
        request_timeout_secs: 5,
    }
}

/// Serve a minimal OpenID provider under `/realms/test`; returns the issuer URL.
async fn start_mock_identity_provider() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let issuer = format!("{base}/realms/test");

    let discovery = json!({
        "issuer": issuer,
        "authorization_endpoint": format!("{issuer}/protocol/openid-connect/auth"),
        "token_endpoint": format!("{issuer}/protocol/openid-connect/token"),
        "jwks_uri": format!("{issuer}/protocol/openid-connect/certs"),
    });

    let app = Router::new()
        .route(
            "/realms/test/.well-known/openid-configuration",
            get(move || {
                let discovery = discovery.clone();
                async move { Json(discovery) }
            }),
        )
        .route(
            "/realms/test/protocol/openid-connect/token",
            post(|| async {
                Json(json!({
                    "access_token": "service-token",
                    "token_type": "Bearer",
                    "expires_in": 300
                }))
            }),
        );

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    issuer
}

#[tokio::test]
async fn test_routes_mounted_in_hooks_are_served_until_shutdown() {
    let bootstrap = Arc::new(
        Bootstrap::builder()
            .logger(local_logger())
            .http_client(HttpClientConfig::default())
            .server(ephemeral_server())
            .lifecycle(test_lifecycle(2000))
            .build(),
    );

    bootstrap.after_init(|hctx| async move {
        let server = hctx
            .handles()
            .get::<Server>(SubsystemKind::Server)
            .ok_or("server missing")?;
        server.merge(Router::new().route("/hello", get(|| async { "hello" })));
        Ok::<(), BoxError>(())
    });

    let runner = bootstrap.clone();
    let run = tokio::spawn(async move { runner.run(&Context::background()).await });
    wait_for_phase(&bootstrap, Phase::Started).await;

    let addr = bootstrap
        .subsystem::<Server>(SubsystemKind::Server)
        .unwrap()
        .local_addr();
    let client = bootstrap
        .subsystem::<HttpClient>(SubsystemKind::HttpClient)
        .unwrap();

    let url = format!("http://{addr}/hello");
    let response = client.send(client.get(&url).unwrap()).await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "hello");

    let report = bootstrap.health(&Context::background()).await;
    assert!(report.is_healthy(), "{:?}", report.to_json());

    bootstrap.shutdown();
    run.await.unwrap().unwrap();
    assert_eq!(bootstrap.phase(), Phase::Stopped);
    assert!(reqwest::get(&url).await.is_err());
}

#[tokio::test]
async fn test_port_conflict_fails_init() {
    let occupied = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let bootstrap = Bootstrap::builder()
        .logger(local_logger())
        .server(ServerConfig {
            bind_address: occupied.local_addr().unwrap().to_string(),
            ..ephemeral_server()
        })
        .lifecycle(test_lifecycle(1000))
        .build();

    let err = bootstrap.init(&Context::background()).await.unwrap_err();
    assert_eq!(err.subsystem(), Some(SubsystemKind::Server));
    assert_eq!(bootstrap.phase(), Phase::Uninitialized);
}

#[tokio::test]
async fn test_identity_client_discovers_provider() {
    let issuer = start_mock_identity_provider().await;
    let bootstrap = Bootstrap::builder()
        .identity_client(IdentityConfig {
            issuer_url: issuer.clone(),
            client_id: "bootstrapd".into(),
            client_secret: Some("secret".into()),
            timeout_secs: 5,
        })
        .lifecycle(test_lifecycle(1000))
        .build();

    bootstrap.init(&Context::background()).await.unwrap();
    let identity = bootstrap
        .subsystem::<IdentityClient>(SubsystemKind::IdentityClient)
        .unwrap();

    assert_eq!(identity.metadata().issuer, issuer);
    let token = identity.client_credentials_token(&["profile"]).await.unwrap();
    assert_eq!(token.access_token, "service-token");
    assert_eq!(token.expires_in, Some(300));

    let report = bootstrap.health(&Context::background()).await;
    assert!(report.is_healthy());
}

#[tokio::test]
async fn test_unreachable_identity_provider_fails_init() {
    let bootstrap = Bootstrap::builder()
        .identity_client(IdentityConfig {
            issuer_url: "http://127.0.0.1:1/realms/none".into(),
            client_id: "bootstrapd".into(),
            client_secret: None,
            timeout_secs: 1,
        })
        .lifecycle(test_lifecycle(1000))
        .build();

    let err = bootstrap.init(&Context::background()).await.unwrap_err();
    assert_eq!(err.subsystem(), Some(SubsystemKind::IdentityClient));
}

#[tokio::test]
async fn test_scheduler_jobs_registered_in_hooks_run_while_started() {
    let runs = Arc::new(AtomicU32::new(0));
    let bootstrap = Arc::new(
        Bootstrap::builder()
            .scheduler(SchedulerConfig {
                stop_grace_secs: 1,
                fire_immediately: true,
            })
            .lifecycle(test_lifecycle(1000))
            .build(),
    );

    {
        let runs = runs.clone();
        bootstrap.after_init(move |hctx| {
            let runs = runs.clone();
            async move {
                let scheduler = hctx
                    .handles()
                    .get::<Scheduler>(SubsystemKind::Scheduler)
                    .ok_or("scheduler missing")?;
                scheduler.every("count", Duration::from_millis(10), move || {
                    let runs = runs.clone();
                    async move {
                        runs.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                });
                Ok::<(), BoxError>(())
            }
        });
    }

    let runner = bootstrap.clone();
    let run = tokio::spawn(async move { runner.run(&Context::background()).await });
    wait_for_phase(&bootstrap, Phase::Started).await;
    tokio::time::sleep(Duration::from_millis(60)).await;
    bootstrap.shutdown();
    run.await.unwrap().unwrap();

    let seen = runs.load(Ordering::SeqCst);
    assert!(seen >= 2, "expected several runs, got {seen}");
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(runs.load(Ordering::SeqCst), seen);
}

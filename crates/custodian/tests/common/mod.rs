//! Shared fixtures for custodian HTTP tests
#![allow(dead_code)]

use std::sync::Arc;

use axum::extract::{Json, Path, State as AxumState};
use axum::http::StatusCode;
use axum::routing::post;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;
use url::Url;

use common::crypto::GroupKeypair;
use common::delivery::run_worker;
use common::protocol::{RelyingParty, Wallet};
use common::session::MemorySessionStore;
use common::vault::EncryptedVault;
use custodian::http_server::api::user::{RegisterRequest, SetDataRequest};
use custodian::{http_server, Config, CustodianClient, HttpDeliverer, State};

pub type TestApp = RelyingParty<MemorySessionStore>;

pub struct TestCustodian {
    pub url: Url,
    pub client: CustodianClient,
    pub state: State,
    shutdown_tx: watch::Sender<()>,
}

impl Drop for TestCustodian {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
    }
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.delivery.max_attempts = 3;
    config.delivery.initial_backoff_ms = 10;
    config.delivery.max_backoff_ms = 50;
    config.delivery.attempt_timeout_ms = 1000;
    config
}

/// A custodian API on an ephemeral loopback port, with an HTTP delivery
/// worker running
pub async fn spawn_custodian() -> TestCustodian {
    let config = test_config();
    let (state, receiver) = State::from_config(&config).unwrap();
    let deliverer = Arc::new(HttpDeliverer::new(config.attempt_timeout()).unwrap());
    tokio::spawn(run_worker(deliverer, config.retry_policy(), receiver));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (shutdown_tx, shutdown_rx) = watch::channel(());
    let api_config = http_server::Config::new(addr);
    let api_state = state.clone();
    tokio::spawn(async move {
        http_server::serve(listener, api_config, api_state, shutdown_rx)
            .await
            .unwrap();
    });

    let url = Url::parse(&format!("http://{}/", addr)).unwrap();
    TestCustodian {
        client: CustodianClient::new(&url).unwrap(),
        url,
        state,
        shutdown_tx,
    }
}

async fn decrypt(
    AxumState(app): AxumState<TestApp>,
    Path(token): Path<String>,
    Json(bundle): Json<EncryptedVault>,
) -> StatusCode {
    match app.consume(&token, &bundle).await {
        Ok(_) => StatusCode::OK,
        Err(_) => StatusCode::UNPROCESSABLE_ENTITY,
    }
}

/// A relying party that only serves its decrypt callback
pub async fn spawn_callback(requested: &[&str]) -> TestApp {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = RelyingParty::new(
        GroupKeypair::generate(),
        requested.iter().map(|s| s.to_string()).collect(),
        Url::parse(&format!("http://{}/", addr)).unwrap(),
        MemorySessionStore::new(),
    );

    let router = Router::new()
        .route("/decrypt/:token", post(decrypt))
        .with_state(app.clone());
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    app
}

/// Register `id` and upload `fields` as `(key, value, tag)` over HTTP
pub async fn registered_wallet(
    client: &CustodianClient,
    id: &str,
    fields: &[(&str, &str, &str)],
) -> Wallet {
    let mut wallet = Wallet::new(id);
    client
        .call(RegisterRequest {
            id: id.to_string(),
            envelope: wallet.registration().unwrap(),
        })
        .await
        .unwrap();
    for (key, value, tag) in fields {
        wallet.set_field(*key, *value, *tag);
    }
    if !fields.is_empty() {
        client
            .call(SetDataRequest {
                id: id.to_string(),
                envelope: wallet.upload().unwrap(),
            })
            .await
            .unwrap();
    }
    wallet
}

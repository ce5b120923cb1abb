//! Custodian and relying party on loopback sockets
#![allow(dead_code)]

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::watch;
use url::Url;

use common::delivery::run_worker;
use custodian::{CustodianClient, HttpDeliverer};
use relying_party::{http_server, Config, State};

pub struct TestEnv {
    pub custodian: CustodianClient,
    pub app_url: Url,
    pub app: State,
    pub http: reqwest::Client,
    shutdown_tx: watch::Sender<()>,
}

impl Drop for TestEnv {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
    }
}

impl TestEnv {
    pub async fn get_json(&self, path: &str) -> serde_json::Value {
        self.http
            .get(self.app_url.join(path).unwrap())
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap()
    }
}

pub async fn setup_test_env() -> TestEnv {
    let (shutdown_tx, shutdown_rx) = watch::channel(());

    let mut custodian_config = custodian::Config::default();
    custodian_config.delivery.max_attempts = 3;
    custodian_config.delivery.initial_backoff_ms = 10;
    custodian_config.delivery.max_backoff_ms = 50;
    let (custodian_state, receiver) = custodian::State::from_config(&custodian_config).unwrap();
    let deliverer = Arc::new(HttpDeliverer::new(custodian_config.attempt_timeout()).unwrap());
    tokio::spawn(run_worker(
        deliverer,
        custodian_config.retry_policy(),
        receiver,
    ));
    let custodian_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let custodian_addr = custodian_listener.local_addr().unwrap();
    let rx = shutdown_rx.clone();
    tokio::spawn(async move {
        custodian::http_server::serve(
            custodian_listener,
            custodian::http_server::Config::new(custodian_addr),
            custodian_state,
            rx,
        )
        .await
        .unwrap();
    });

    let app_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let app_addr = app_listener.local_addr().unwrap();
    let app_url = Url::parse(&format!("http://{}/", app_addr)).unwrap();
    let app_config = Config {
        listen_addr: app_addr,
        public_url: Some(app_url.clone()),
        requested: vec!["city".to_string(), "email".to_string()],
        ..Default::default()
    };
    let app = State::from_config(&app_config).unwrap();
    let app_state = app.clone();
    tokio::spawn(async move {
        http_server::serve(
            app_listener,
            custodian::http_server::Config::new(app_addr),
            app_state,
            shutdown_rx,
        )
        .await
        .unwrap();
    });

    let custodian_url = Url::parse(&format!("http://{}/", custodian_addr)).unwrap();
    TestEnv {
        custodian: CustodianClient::new(&custodian_url).unwrap(),
        app_url,
        app,
        http: reqwest::Client::new(),
        shutdown_tx,
    }
}

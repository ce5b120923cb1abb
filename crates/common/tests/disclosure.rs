//! Integration tests for the get and set flows between wallet, custodian and
//! relying party

mod common;

use std::collections::BTreeSet;
use std::time::Duration;

use ::common::protocol::{DisclosureState, ProtocolError, DEFAULT_TAG};
use ::common::request::{AuthorizationRequest, SetRequest};
use ::common::vault::{self, FieldMap};
use url::Url;

fn fields(pairs: &[(&str, &str)]) -> FieldMap {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[tokio::test]
async fn test_end_to_end_disclosure() {
    let env = common::setup_test_env(1);
    let wallet = common::registered_wallet(&env.custodian, "alice", &[("city", "Beijing", "city")]).await;

    let info = env.app.app_info().await.unwrap();
    // polling before delivery is empty, not an error
    assert_eq!(env.app.data(&info.session).await.unwrap(), None);

    let request = info
        .clone()
        .into_request("app1", Url::parse("http://127.0.0.1:4001/").unwrap());
    let AuthorizationRequest::Get(get) = request else {
        panic!("app info should produce a get request");
    };
    let disclosed = env
        .custodian
        .re_encrypt("alice", get.callback.clone(), wallet.authorize_get(&get).unwrap())
        .await
        .unwrap();
    assert_eq!(disclosed, vec!["city".to_string()]);

    let data = env
        .app
        .wait(&info.session, Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(data, Some(fields(&[("city", "Beijing")])));
    assert_eq!(
        env.app.state(&info.session).await.unwrap(),
        DisclosureState::Consumed
    );

    // reads after consumption replay the same map
    assert_eq!(
        env.app.data(&info.session).await.unwrap(),
        Some(fields(&[("city", "Beijing")]))
    );
}

#[tokio::test]
async fn test_partial_disclosure() {
    let env = common::setup_test_env(1);
    let wallet = common::registered_wallet(
        &env.custodian,
        "alice",
        &[("city", "Beijing", "city"), ("name", "Alice", "name")],
    )
    .await;

    let mut info = env.app.app_info().await.unwrap();
    info.data = vec!["city".into(), "avatar".into()];
    let AuthorizationRequest::Get(get) =
        info.clone().into_request("app1", Url::parse("http://127.0.0.1:4001/").unwrap())
    else {
        panic!("app info should produce a get request");
    };

    let envelope = wallet.authorize_get(&get).unwrap();
    assert_eq!(envelope.payload.len(), 1);
    env.custodian
        .re_encrypt("alice", get.callback.clone(), envelope)
        .await
        .unwrap();

    let data = env
        .app
        .wait(&info.session, Duration::from_secs(5))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(data, fields(&[("city", "Beijing")]));
}

#[tokio::test]
async fn test_sessions_do_not_leak() {
    let env = common::setup_test_env(1);
    let wallet = common::registered_wallet(&env.custodian, "alice", &[("city", "Beijing", "city")]).await;

    let first = env.app.app_info().await.unwrap();
    let second = env.app.app_info().await.unwrap();

    let AuthorizationRequest::Get(get) =
        second.clone().into_request("app1", Url::parse("http://127.0.0.1:4001/").unwrap())
    else {
        panic!("app info should produce a get request");
    };
    env.custodian
        .re_encrypt("alice", get.callback.clone(), wallet.authorize_get(&get).unwrap())
        .await
        .unwrap();

    assert!(env
        .app
        .wait(&second.session, Duration::from_secs(5))
        .await
        .unwrap()
        .is_some());
    assert_eq!(env.app.data(&first.session).await.unwrap(), None);
    assert!(!env.app.status(&first.session).await.unwrap());
}

#[tokio::test]
async fn test_replayed_submission_is_rejected() {
    let env = common::setup_test_env(1);
    let wallet = common::registered_wallet(&env.custodian, "alice", &[("city", "Beijing", "city")]).await;

    let info = env.app.app_info().await.unwrap();
    let AuthorizationRequest::Get(get) =
        info.into_request("app1", Url::parse("http://127.0.0.1:4001/").unwrap())
    else {
        panic!("app info should produce a get request");
    };
    let envelope = wallet.authorize_get(&get).unwrap();

    env.custodian
        .re_encrypt("alice", get.callback.clone(), envelope.clone())
        .await
        .unwrap();
    assert!(matches!(
        env.custodian
            .re_encrypt("alice", get.callback.clone(), envelope)
            .await,
        Err(ProtocolError::Unauthorized(_))
    ));
}

#[tokio::test]
async fn test_set_flow_round_trip() {
    let env = common::setup_test_env(1);
    let mut wallet =
        common::registered_wallet(&env.custodian, "alice", &[("city", "Beijing", "address")]).await;

    let request = SetRequest {
        id: "app1".into(),
        pk: *env.app.public_key(),
        callback: Url::parse("http://127.0.0.1:4001/decrypt/unused").unwrap(),
        redirect: Url::parse("http://127.0.0.1:4001/").unwrap(),
        data: fields(&[("city", "Shanghai"), ("bio", "hello")]),
    };
    let tags = env
        .custodian
        .set_data("alice", wallet.authorize_set(&request).unwrap())
        .await
        .unwrap();
    assert_eq!(tags, vec!["address".to_string(), DEFAULT_TAG.to_string()]);

    // a fresh wallet holding the same keys sees the merged view
    let stored = env.custodian.data("alice").await.unwrap();
    let mut restored = ::common::protocol::Wallet::with_identity("alice", wallet.identity().clone());
    for tag in ["address", DEFAULT_TAG] {
        restored.add_tag(tag, wallet.tag_key(tag).unwrap().clone());
    }
    assert_eq!(restored.load(&stored).unwrap(), 2);
    assert_eq!(restored.fields()["city"].value, "Shanghai");
    assert_eq!(restored.fields()["bio"].tag, DEFAULT_TAG);
}

#[tokio::test]
async fn test_concurrent_sets_never_mix_units() {
    let env = common::setup_test_env(1);
    let wallet = common::registered_wallet(&env.custodian, "alice", &[("city", "Beijing", "city")]).await;
    let tag = wallet.tag_key("city").unwrap().clone();

    let mut handles = Vec::new();
    let mut written = BTreeSet::new();
    for i in 0..16 {
        let value = format!("city-{}", i);
        written.insert(value.clone());
        let mut writer = wallet.clone();
        writer.set_field("city", value, "city");
        let envelope = writer.upload().unwrap();
        let custodian = env.custodian.clone();
        handles.push(tokio::spawn(async move {
            custodian.set_data("alice", envelope).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    // whichever write won, its payload and key belong together
    let stored = env.custodian.data("alice").await.unwrap();
    let recovered = vault::decrypt(tag.secret(), &stored["city"]).unwrap();
    assert!(written.contains(&recovered["city"]));
}

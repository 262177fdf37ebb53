use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mockito::{self, Matcher};

use super::tests::FakeEphemeral;
use crate::config::ScalewayConfig;
use crate::errors::SourceError;
use crate::network::interfaces::StaticNic;
use crate::providers::scaleway::ScalewayDatasource;
use crate::providers::DataSource;
use crate::util::StaticEvidence;

const METADATA: &str = r#"{
    "id": "00000000-0000-0000-0000-000000000000",
    "hostname": "scaleway.host",
    "tags": [
        "AUTHORIZED_KEY=ssh-rsa_AAAAB3NzaC1yc2EAAAADAQABDDDDD"
    ],
    "ssh_public_keys": [
        {
            "key": "ssh-rsa AAAAB3NzaC1yc2EAAAADAQABAAABA",
            "fingerprint": "2048 06:ae:...  login (RSA)"
        },
        {
            "key": "ssh-rsa AAAAB3NzaC1yc2EAAAADAQABCCCCC",
            "fingerprint": "2048 06:ff:...  login2 (RSA)"
        }
    ]
}"#;

const USER_DATA: &str = "#!/bin/bash\necho \"user-data\"";

const METADATA_PATH: &str = "/conf?format=json";
const USERDATA_PATH: &str = "/user_data/cloud-init";
const VENDORDATA_PATH: &str = "/vendor_data/cloud-init";

fn scaleway_evidence() -> StaticEvidence {
    StaticEvidence {
        cmdline: Some("scaleway".to_string()),
        ..Default::default()
    }
}

/// Datasource pointed at the mock server, counting retry delays.
fn datasource(
    server: &mockito::ServerGuard,
    evidence: StaticEvidence,
    network_ok: bool,
) -> (ScalewayDatasource, Arc<AtomicUsize>) {
    let sleeps = Arc::new(AtomicUsize::new(0));
    let counter = sleeps.clone();
    let sleeper: crate::retry::Sleeper = Arc::new(move |_: Duration| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let mut ds = ScalewayDatasource::with_collaborators(
        ScalewayConfig::default(),
        Box::new(evidence),
        Box::new(FakeEphemeral(network_ok)),
        Box::new(StaticNic(Some("scalewaynic0".to_string()))),
    )
    .unwrap();
    ds.client = ds
        .client
        .mock_base_url(server.url())
        .sleeper(sleeper.clone());
    ds.data_client = ds.data_client.mock_base_url(server.url()).sleeper(sleeper);
    (ds, sleeps)
}

#[test]
fn test_metadata_ok() {
    let mut server = mockito::Server::new();
    server
        .mock("GET", METADATA_PATH)
        .with_status(200)
        .with_body(METADATA)
        .create();
    server
        .mock("GET", USERDATA_PATH)
        .with_status(200)
        .with_body(USER_DATA)
        .create();
    server
        .mock("GET", VENDORDATA_PATH)
        .with_status(200)
        .with_body(USER_DATA)
        .create();

    let (mut ds, sleeps) = datasource(&server, scaleway_evidence(), true);
    assert!(ds.get_data().unwrap());

    assert_eq!(
        ds.instance_id().as_deref(),
        Some("00000000-0000-0000-0000-000000000000")
    );
    assert_eq!(ds.hostname().as_deref(), Some("scaleway.host"));
    let mut keys = ds.public_ssh_keys();
    keys.sort();
    assert_eq!(
        keys,
        vec![
            "ssh-rsa AAAAB3NzaC1yc2EAAAADAQABAAABA",
            "ssh-rsa AAAAB3NzaC1yc2EAAAADAQABCCCCC",
            "ssh-rsa AAAAB3NzaC1yc2EAAAADAQABDDDDD",
        ]
    );
    assert_eq!(ds.userdata_raw(), Some(USER_DATA.as_bytes()));
    assert_eq!(ds.vendordata_raw(), Some(USER_DATA.as_bytes()));
    assert_eq!(ds.availability_zone(), None);
    assert_eq!(ds.region(), None);
    assert_eq!(sleeps.load(Ordering::SeqCst), 0);

    server.reset();
}

#[test]
fn test_metadata_404() {
    let mut server = mockito::Server::new();
    server
        .mock("GET", METADATA_PATH)
        .with_status(200)
        .with_body(METADATA)
        .create();
    server.mock("GET", USERDATA_PATH).with_status(404).create();
    server.mock("GET", VENDORDATA_PATH).with_status(404).create();

    let (mut ds, sleeps) = datasource(&server, scaleway_evidence(), true);
    assert!(ds.get_data().unwrap());
    assert_eq!(ds.userdata_raw(), None);
    assert_eq!(ds.vendordata_raw(), None);
    assert_eq!(sleeps.load(Ordering::SeqCst), 0);

    server.reset();
}

#[test]
fn test_metadata_rate_limit() {
    let mut server = mockito::Server::new();
    server
        .mock("GET", METADATA_PATH)
        .with_status(200)
        .with_body(METADATA)
        .create();
    server.mock("GET", VENDORDATA_PATH).with_status(404).create();
    let limited = server
        .mock("GET", USERDATA_PATH)
        .with_status(429)
        .expect(2)
        .create();
    let ok = server
        .mock("GET", USERDATA_PATH)
        .with_status(200)
        .with_body(USER_DATA)
        .expect(1)
        .create();

    let (mut ds, sleeps) = datasource(&server, scaleway_evidence(), true);
    assert!(ds.get_data().unwrap());
    assert_eq!(ds.userdata_raw(), Some(USER_DATA.as_bytes()));
    assert_eq!(sleeps.load(Ordering::SeqCst), 2);
    limited.assert();
    ok.assert();

    server.reset();
}

#[test]
fn test_userdata_failure_is_absence() {
    let mut server = mockito::Server::new();
    server
        .mock("GET", METADATA_PATH)
        .with_status(200)
        .with_body(METADATA)
        .create();
    server.mock("GET", USERDATA_PATH).with_status(403).create();
    // Exhausts the retry budget: 1 attempt + 5 retries.
    server
        .mock("GET", VENDORDATA_PATH)
        .with_status(503)
        .expect(6)
        .create();

    let (mut ds, sleeps) = datasource(&server, scaleway_evidence(), true);
    assert!(ds.get_data().unwrap());
    assert_eq!(ds.userdata_raw(), None);
    assert_eq!(ds.vendordata_raw(), None);
    assert_eq!(sleeps.load(Ordering::SeqCst), 5);

    server.reset();
}

#[test]
fn test_metadata_broken_json() {
    let mut server = mockito::Server::new();
    server
        .mock("GET", METADATA_PATH)
        .with_status(200)
        .with_body("{\"id\": ")
        .create();

    let (mut ds, _) = datasource(&server, scaleway_evidence(), true);
    let err = ds.get_data().unwrap_err();
    assert!(matches!(
        err.downcast_ref::<SourceError>(),
        Some(SourceError::BrokenMetadata { .. })
    ));
    assert_eq!(ds.instance_id(), None);

    server.reset();
}

#[test]
fn test_metadata_missing_fields() {
    let mut server = mockito::Server::new();
    server
        .mock("GET", METADATA_PATH)
        .with_status(200)
        .with_body(r#"{"hostname": "scaleway.host"}"#)
        .create();

    let (mut ds, _) = datasource(&server, scaleway_evidence(), true);
    ds.get_data().unwrap_err();

    server.reset();
}

#[test]
fn test_metadata_not_found() {
    let mut server = mockito::Server::new();
    server.mock("GET", METADATA_PATH).with_status(404).create();

    let (mut ds, sleeps) = datasource(&server, scaleway_evidence(), true);
    ds.get_data().unwrap_err();
    assert_eq!(sleeps.load(Ordering::SeqCst), 0);

    server.reset();
}

#[test]
fn test_not_detected() {
    let mut server = mockito::Server::new();
    let mock = server.mock("GET", Matcher::Any).expect(0).create();

    let (mut ds, _) = datasource(&server, StaticEvidence::default(), true);
    assert!(!ds.get_data().unwrap());
    assert_eq!(ds.instance_id(), None);
    mock.assert();

    server.reset();
}

#[test]
fn test_network_unavailable() {
    let mut server = mockito::Server::new();
    let mock = server.mock("GET", Matcher::Any).expect(0).create();

    let (mut ds, _) = datasource(&server, scaleway_evidence(), false);
    assert!(!ds.get_data().unwrap());
    mock.assert();

    server.reset();
}

#[test]
fn test_boot_checkin() {
    let mut server = mockito::Server::new();
    let mock = server
        .mock("PATCH", "/state")
        .match_header(
            "content-type",
            Matcher::Regex("application/json".to_string()),
        )
        .match_body(r#"{"state_detail":"booted"}"#)
        .with_status(200)
        .create();

    let (ds, _) = datasource(&server, scaleway_evidence(), true);
    ds.boot_checkin().unwrap();
    mock.assert();

    server.reset();
}

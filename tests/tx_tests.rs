//! Transaction pipeline: check, deliver, genesis, commit, query

mod common;

use std::sync::Arc;

use common::{csr_for, root_ca, sign, ALESH_CSR_PEM};
use dpki::ca::{CaService, RpcClient};
use dpki::chain::{
    Application, ChainApp, RequestBeginBlock, RequestCheckTx, RequestCommit, RequestDeliverTx,
    RequestQuery,
};
use dpki::config::{CaConfig, RpcConfig};
use dpki::store::Store;
use dpki::x509::{Template, TemplateArgs};

fn app() -> Application {
    common::init_tracing();
    let store = Arc::new(Store::open_in_memory().unwrap());
    let ca = Arc::new(CaService::with_parts(
        Arc::clone(&store),
        CaConfig::default(),
        RpcClient::new(&RpcConfig::default()),
        None,
    ));
    Application::with_parts(store, ca).unwrap()
}

fn genesis_doc(certificates: &[&str]) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({ "certificates": certificates })).unwrap()
}

async fn run_block(app: &Application, height: i64, txs: &[&str]) -> Vec<u32> {
    app.begin_block(RequestBeginBlock { height }).await.unwrap();
    let mut codes = Vec::new();
    for tx in txs {
        let resp = app
            .deliver_tx(RequestDeliverTx { tx: tx.as_bytes().to_vec() })
            .await;
        codes.push(resp.code);
    }
    app.commit(RequestCommit { data: format!("hash-{height}").into_bytes() })
        .await
        .unwrap();
    codes
}

#[tokio::test]
async fn test_unknown_tx_rejected() {
    let app = app();
    let resp = app
        .check_tx(RequestCheckTx {
            tx: b"mkemckermcvklwefjckmkwpcmwecierjmnoiitvoimc2iop2emr".to_vec(),
        })
        .await;
    assert!(resp.code > 0);
    assert!(resp.log.is_some());
}

#[tokio::test]
async fn test_valid_csr_accepted() {
    let app = app();
    let resp = app
        .check_tx(RequestCheckTx { tx: ALESH_CSR_PEM.as_bytes().to_vec() })
        .await;
    assert_eq!(resp.code, 0, "log: {:?}", resp.log);
}

#[tokio::test]
async fn test_corrupted_csr_rejected() {
    let app = app();
    // flip payload bytes inside the base64 body
    let corrupted = ALESH_CSR_PEM.replace("MIH5", "MIH6");
    let resp = app
        .check_tx(RequestCheckTx { tx: corrupted.into_bytes() })
        .await;
    assert!(resp.code > 0);
}

#[tokio::test]
async fn test_genesis_hash_is_deterministic() {
    let (_, root_pem) = root_ca(common::ROOT_SUBJECT);
    let (_, other_pem) = root_ca("CN=Second root, C=WN");
    let doc = genesis_doc(&[&root_pem, &other_pem]);

    let first = app().load_genesis(&doc).await.unwrap();
    let second = app().load_genesis(&doc).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first.len(), 32);

    // ordering is part of the digest
    let swapped = app()
        .load_genesis(&genesis_doc(&[&other_pem, &root_pem]))
        .await
        .unwrap();
    assert_ne!(first, swapped);
}

#[tokio::test]
async fn test_genesis_failure_is_fatal() {
    let app = app();
    assert!(app.load_genesis(b"{\"certificates\": [\"garbage\"]}").await.is_err());
    assert!(app.load_genesis(b"not even json").await.is_err());
}

#[tokio::test]
async fn test_cert_flow_and_duplicate_delivery() {
    let app = app();
    let (ca_key, ca_pem) = root_ca(common::ROOT_SUBJECT);
    app.load_genesis(&genesis_doc(&[&ca_pem])).await.unwrap();
    app.commit(RequestCommit { data: b"genesis".to_vec() }).await.unwrap();

    let (_, csr_pem) = csr_for(
        "CN=Workshop Node, O=Workshop, C=WN",
        Template::Host,
        &TemplateArgs::default(),
    );
    let cert_pem = sign(&csr_pem, &ca_pem, &ca_key);

    // first delivery applies, second is refused
    let codes = run_block(&app, 1, &[&cert_pem]).await;
    assert_eq!(codes, vec![0]);
    let codes = run_block(&app, 2, &[&cert_pem]).await;
    assert_eq!(codes.len(), 1);
    assert!(codes[0] > 0);
}

#[tokio::test]
async fn test_cert_with_unknown_issuer_rejected() {
    let app = app();
    let (_, trusted_pem) = root_ca(common::ROOT_SUBJECT);
    app.load_genesis(&genesis_doc(&[&trusted_pem])).await.unwrap();
    app.commit(RequestCommit { data: b"genesis".to_vec() }).await.unwrap();

    // signed by a CA the chain never admitted
    let (rogue_key, rogue_pem) = root_ca("CN=Rogue CA, C=WN");
    let (_, csr_pem) = csr_for(
        "CN=Workshop Node, O=Workshop, C=WN",
        Template::Host,
        &TemplateArgs::default(),
    );
    let cert_pem = sign(&csr_pem, &rogue_pem, &rogue_key);

    let codes = run_block(&app, 1, &[&cert_pem]).await;
    assert!(codes[0] > 0);
}

#[tokio::test]
async fn test_csr_for_existing_subject() {
    let app = app();
    let (ca_key, ca_pem) = root_ca(common::ROOT_SUBJECT);
    app.load_genesis(&genesis_doc(&[&ca_pem])).await.unwrap();
    app.commit(RequestCommit { data: b"genesis".to_vec() }).await.unwrap();

    let subject = "CN=Workshop Node, O=Workshop, C=WN";
    let (_, csr_pem) = csr_for(subject, Template::Host, &TemplateArgs::default());
    let cert_pem = sign(&csr_pem, &ca_pem, &ca_key);
    run_block(&app, 1, &[&cert_pem]).await;

    // same subject, same key: non-fatal dedupe advisory
    let resp = app
        .check_tx(RequestCheckTx { tx: csr_pem.as_bytes().to_vec() })
        .await;
    assert_eq!(resp.code, 100, "log: {:?}", resp.log);

    // same subject, different key: fatal conflict
    let (_, conflicting_csr) = csr_for(subject, Template::Host, &TemplateArgs::default());
    let resp = app
        .check_tx(RequestCheckTx { tx: conflicting_csr.as_bytes().to_vec() })
        .await;
    assert_eq!(resp.code, 1, "log: {:?}", resp.log);
}

#[tokio::test]
async fn test_commit_persists_app_state() {
    let app = app();
    let (_, ca_pem) = root_ca(common::ROOT_SUBJECT);
    app.load_genesis(&genesis_doc(&[&ca_pem])).await.unwrap();
    app.commit(RequestCommit { data: b"genesis".to_vec() }).await.unwrap();
    run_block(&app, 1, &[]).await;
    run_block(&app, 2, &[]).await;

    let (height, hash) = app.initial_app_state().await.unwrap();
    assert_eq!(height, 2);
    assert_eq!(hash, b"hash-2");
}

#[tokio::test]
async fn test_query_ca_list() {
    let app = app();
    let (_, ca_pem) = root_ca(common::ROOT_SUBJECT);
    app.load_genesis(&genesis_doc(&[&ca_pem])).await.unwrap();
    app.commit(RequestCommit { data: b"genesis".to_vec() }).await.unwrap();

    let resp = app
        .query(RequestQuery { path: "ca/list".to_string(), data: Vec::new() })
        .await;
    assert_eq!(resp.code, 0);
    let listed: serde_json::Value = serde_json::from_slice(&resp.value).unwrap();
    assert_eq!(listed[0]["subject"], "CN=Root Wonderland CA,C=WN");
    assert_eq!(listed[0]["issuer"], "CN=Root Wonderland CA,C=WN");
    assert_eq!(listed[0]["path_length"], 7);

    let resp = app
        .query(RequestQuery { path: "nope".to_string(), data: Vec::new() })
        .await;
    assert!(resp.code > 0);
}

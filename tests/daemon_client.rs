use std::collections::BTreeSet;

use httpmock::Method::{GET, POST};
use httpmock::MockServer;
use serde_json::json;
use tempfile::tempdir;

use message_ledger::domains::message::{MessageEntry, PartyId};
use message_ledger::domains::transition::{
    FinalizedTransition, SignedTransition, Transition, TransitionId,
};
use message_ledger::error::LedgerError;
use message_ledger::services::daemon_client::{
    ConsumeRequest, CreateMessagesRequest, DaemonClient,
};
use message_ledger::services::exporter;

fn finalized() -> FinalizedTransition {
    let a = PartyId::new("O=PartyA, L=Berlin, C=DE");
    let b = PartyId::new("O=PartyB, L=Berlin, C=DE");
    let signers: BTreeSet<PartyId> = [a.clone(), b.clone()].into_iter().collect();
    let tx = Transition::send(a.clone(), vec![MessageEntry::new(a, b, "hi")], signers.clone());
    let mut signed = SignedTransition::new(tx);
    for signer in signers {
        signed.add_signature(signer);
    }
    FinalizedTransition::new(signed, 1_700_000_000)
}

#[tokio::test]
async fn client_posts_with_token_and_party() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/messages")
                .header("authorization", "Bearer secret")
                .header("x-party", "PartyB")
                .json_body(json!({
                    "contents": "hi",
                    "recipient": "PartyC",
                    "numberOfStatesToCreate": 1
                }));
            then.status(200).body("ABC123");
        })
        .await;

    let client = DaemonClient::new(server.base_url(), "secret".to_string())
        .unwrap()
        .acting_as(Some("PartyB".to_string()));
    let tx_id = client
        .create_messages(&CreateMessagesRequest {
            contents: "hi".to_string(),
            recipient: "PartyC".to_string(),
            number_of_states_to_create: 1,
        })
        .await
        .unwrap();
    assert_eq!(tx_id, "ABC123");
    mock.assert_async().await;
}

#[tokio::test]
async fn client_maps_error_statuses() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/messages/consume");
            then.status(409)
                .json_body(json!({"error": "sender of new message cannot match my identity"}));
        })
        .await;

    let client = DaemonClient::new(server.base_url(), String::new()).unwrap();
    let err = client
        .consume(&ConsumeRequest {
            tx_id: "A".repeat(64),
            index_to_consume: 0,
        })
        .await
        .unwrap_err();
    match err {
        LedgerError::CounterpartyRejected(reason) => {
            assert_eq!(reason, "sender of new message cannot match my identity")
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn client_keeps_bad_request_kinds_apart() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/messages");
            then.status(400).json_body(json!({
                "error": "the recipient party PartyZ does not exist",
                "kind": "unknown_party"
            }));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/messages/consume");
            then.status(400).json_body(json!({
                "error": "reply must consume exactly one entry",
                "kind": "malformed_transition"
            }));
        })
        .await;

    let client = DaemonClient::new(server.base_url(), String::new()).unwrap();
    let err = client
        .create_messages(&CreateMessagesRequest {
            contents: "hi".to_string(),
            recipient: "PartyZ".to_string(),
            number_of_states_to_create: 1,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::UnknownParty(_)));
    assert_eq!(err.reason(), "the recipient party PartyZ does not exist");

    let err = client
        .consume(&ConsumeRequest {
            tx_id: "A".repeat(64),
            index_to_consume: 0,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::MalformedTransition(_)));
}

#[tokio::test]
async fn fetched_transaction_exports_to_disk() {
    let finalized = finalized();
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET)
                .path(format!("/transactions/{}", finalized.id));
            then.status(200)
                .json_body(serde_json::to_value(&finalized).unwrap());
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path(format!("/transactions/{}", "B".repeat(64)));
            then.status(404).json_body(json!({"error": "no transaction"}));
        })
        .await;

    let client = DaemonClient::new(server.base_url(), String::new()).unwrap();
    let fetched = client.transaction(&finalized.id).await.unwrap().unwrap();
    assert_eq!(fetched, finalized);
    let missing: TransitionId = "B".repeat(64).parse().unwrap();
    assert!(client.transaction(&missing).await.unwrap().is_none());

    let dir = tempdir().unwrap();
    let path = exporter::export_transaction(&fetched, dir.path()).unwrap();
    let name = format!("transaction-{}", finalized.id);
    assert_eq!(path, dir.path().join(&name).join(format!("{name}.json")));

    // A second export replaces the first.
    exporter::export_transaction(&fetched, dir.path()).unwrap();
    let written: FinalizedTransition =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(written, finalized);
}

//! Request envelope, authenticatorGetInfo, ClientPIN, Reset and Selection

mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;

use common::*;
use wearauthn_ctap::cbor::{self, MapBuilder, MapParser, Value};
use wearauthn_ctap::credential::MAX_CREDENTIAL_ID_LEN;
use wearauthn_ctap::{
    AuthenticatorConfig, AuthenticatorStatus, CredentialStore, RequestInfo, SpecialStatus,
    StatusCode, Transport, UpResult,
};

fn status(code: StatusCode) -> Vec<u8> {
    vec![code.to_u8()]
}

fn client_pin(protocol: i64, sub_command: i64) -> Value {
    MapBuilder::new()
        .insert(1, cbor::int(protocol))
        .insert(2, cbor::int(sub_command))
        .build_value()
}

fn text_list(value: &Value) -> Vec<String> {
    cbor::as_array(value)
        .unwrap()
        .iter()
        .map(|v| cbor::as_text(v).unwrap().to_string())
        .collect()
}

fn option_value(options: &Value, name: &str) -> Option<bool> {
    let entries = cbor::as_map(options).unwrap();
    cbor::text_map_get(entries, name).map(|v| cbor::as_bool(v).unwrap())
}

#[tokio::test]
async fn test_empty_request() {
    let mut h = Harness::new(Transport::Hid);
    assert_eq!(
        h.dispatcher.handle(&[]).await,
        status(StatusCode::InvalidLength)
    );
}

#[tokio::test]
async fn test_unknown_command() {
    let mut h = Harness::new(Transport::Hid);
    for command in [0x03, 0x09, 0x0A, 0x40, 0xFF] {
        assert_eq!(
            h.send(command, None).await,
            status(StatusCode::InvalidCommand),
            "command {command:#04x}"
        );
    }
}

#[tokio::test]
async fn test_parameterless_commands_reject_trailing_bytes() {
    let mut h = Harness::new(Transport::Hid);
    for command in [
        cmd::GET_INFO,
        cmd::GET_NEXT_ASSERTION,
        cmd::RESET,
        cmd::SELECTION,
    ] {
        assert_eq!(
            h.dispatcher.handle(&[command, 0xA0]).await,
            status(StatusCode::InvalidLength),
            "command {command:#04x}"
        );
    }
    assert!(h.ui.confirmations().is_empty());
}

#[tokio::test]
async fn test_oversized_request() {
    let mut h = Harness::build(
        Transport::Hid,
        AuthenticatorConfig::new().with_max_msg_size(1024),
        Arc::new(SoftwareKeyStore::new()),
        Arc::new(CredentialStore::in_memory()),
    );

    let mut request = vec![cmd::MAKE_CREDENTIAL];
    request.extend_from_slice(&[0u8; 1025]);
    assert_eq!(
        h.dispatcher.handle(&request).await,
        status(StatusCode::RequestTooLarge)
    );
    assert_eq!(h.key_store.key_count(), 0);
}

#[tokio::test]
async fn test_malformed_parameters() {
    let mut h = Harness::new(Transport::Hid);

    // Truncated map
    assert_eq!(
        h.dispatcher.handle(&[cmd::MAKE_CREDENTIAL, 0xA2, 0x01]).await,
        status(StatusCode::InvalidCbor)
    );
    // An array where the parameter map belongs
    assert_eq!(
        h.dispatcher.handle(&[cmd::GET_ASSERTION, 0x80]).await,
        status(StatusCode::CborUnexpectedType)
    );
    // No parameters at all
    assert_eq!(
        h.send(cmd::CLIENT_PIN, None).await,
        status(StatusCode::InvalidCbor)
    );
}

#[tokio::test]
async fn test_get_info_over_hid() {
    let mut h = Harness::new(Transport::Hid);

    let info = success(&h.send(cmd::GET_INFO, None).await);

    assert_eq!(text_list(info.get(1).unwrap()), ["FIDO_2_0", "U2F_V2"]);
    assert_eq!(
        text_list(info.get(2).unwrap()),
        ["hmac-secret", "supportedExtensions", "txAuthSimple", "uvm"]
    );
    assert_eq!(info.bytes(3).unwrap(), [0u8; 16]);

    let options = info.get(4).unwrap();
    assert_eq!(option_value(options, "rk"), Some(true));
    assert_eq!(option_value(options, "up"), Some(true));
    assert_eq!(option_value(options, "plat"), Some(false));
    assert_eq!(option_value(options, "uv"), None);
    assert_eq!(option_value(options, "clientPin"), None);

    assert_eq!(info.int(5).unwrap(), 7609);
    assert_eq!(info.int(7).unwrap(), 5);
    assert_eq!(info.int(8).unwrap(), MAX_CREDENTIAL_ID_LEN as i64);
    assert_eq!(text_list(info.get(9).unwrap()), ["nfc", "usb"]);
    assert!(!info.contains_key(6));

    let algorithms = cbor::as_array(info.get(10).unwrap()).unwrap();
    assert_eq!(algorithms.len(), 1);
    let entry = cbor::as_map(&algorithms[0]).unwrap();
    assert_eq!(cbor::as_int(cbor::text_map_get(entry, "alg").unwrap()).unwrap(), -7);

    // Never prompts
    assert!(h.ui.confirmations().is_empty());
}

#[tokio::test]
async fn test_get_info_over_nfc() {
    let mut h = Harness::new(Transport::Nfc);

    let info = success(&h.send(cmd::GET_INFO, None).await);

    assert_eq!(
        text_list(info.get(2).unwrap()),
        ["hmac-secret", "supportedExtensions", "uvm"]
    );
}

#[tokio::test]
async fn test_get_info_reports_verification_state() {
    for (state, expected) in [(Some(true), Some(true)), (Some(false), Some(false)), (None, None)] {
        let mut h = Harness::with_key_store(
            Transport::Hid,
            SoftwareKeyStore::with_verification(state),
        );
        let info = success(&h.send(cmd::GET_INFO, None).await);
        assert_eq!(option_value(info.get(4).unwrap(), "uv"), expected);
    }
}

#[tokio::test]
async fn test_get_info_reports_basic_aaguid() {
    let aaguid = *b"wearauthn-basic!";
    let mut h = Harness::build(
        Transport::Hid,
        AuthenticatorConfig::new().with_aaguid_basic(aaguid),
        Arc::new(SoftwareKeyStore::new()),
        Arc::new(CredentialStore::in_memory()),
    );

    let info = success(&h.send(cmd::GET_INFO, None).await);
    assert_eq!(info.bytes(3).unwrap(), aaguid);
}

#[tokio::test]
async fn test_client_pin_key_agreement() {
    let mut h = Harness::new(Transport::Hid);

    let response = success(&h.send(cmd::CLIENT_PIN, Some(client_pin(1, 2))).await);
    let key = MapParser::from_value(response.get(1).unwrap().clone()).unwrap();

    assert_eq!(key.int(1).unwrap(), 2);
    assert_eq!(key.int(3).unwrap(), -25);
    assert_eq!(key.int(-1).unwrap(), 1);
    assert_eq!(key.bytes(-2).unwrap().len(), 32);
    assert_eq!(key.bytes(-3).unwrap().len(), 32);

    // Stable for the lifetime of the connection
    let again = success(&h.send(cmd::CLIENT_PIN, Some(client_pin(1, 2))).await);
    assert_eq!(again.get(1).unwrap(), response.get(1).unwrap());
}

#[tokio::test]
async fn test_client_pin_rejections() {
    let mut h = Harness::new(Transport::Hid);

    assert_eq!(
        h.send(cmd::CLIENT_PIN, Some(client_pin(2, 2))).await,
        status(StatusCode::InvalidParameter)
    );
    for sub_command in [1, 3, 4, 5, 9] {
        assert_eq!(
            h.send(cmd::CLIENT_PIN, Some(client_pin(1, sub_command))).await,
            status(StatusCode::InvalidCommand),
            "subcommand {sub_command}"
        );
    }
    assert_eq!(
        h.send(
            cmd::CLIENT_PIN,
            Some(MapBuilder::new().insert(1, cbor::int(1)).build_value())
        )
        .await,
        status(StatusCode::MissingParameter)
    );
}

#[tokio::test]
async fn test_reset_is_hid_only() {
    let mut h = Harness::new(Transport::Nfc);

    assert_eq!(h.send(cmd::RESET, None).await, status(StatusCode::NotAllowed));
    assert!(h.ui.special_statuses().is_empty());
}

#[tokio::test]
async fn test_declined_reset_keeps_credentials() {
    let mut h = Harness::new(Transport::Hid);
    register(&mut h, MakeCredentialRequest::new(b"user-1", "alice")).await;
    h.ui.reset_answer.store(false, Ordering::SeqCst);

    assert_eq!(
        h.send(cmd::RESET, None).await,
        status(StatusCode::OperationDenied)
    );
    assert_eq!(h.ui.special_statuses(), [SpecialStatus::Reset]);
    assert_eq!(h.key_store.key_count(), 1);
}

#[tokio::test]
async fn test_reset_wipes_everything() {
    let mut h = Harness::new(Transport::Hid);
    let id = register(&mut h, MakeCredentialRequest::new(b"user-1", "alice")).await;
    register(
        &mut h,
        MakeCredentialRequest::new(b"user-2", "bob").options(&[("rk", true)]),
    )
    .await;
    let key_agreement = success(&h.send(cmd::CLIENT_PIN, Some(client_pin(1, 2))).await)
        .get(1)
        .unwrap()
        .clone();

    assert_eq!(h.send(cmd::RESET, None).await, vec![0x00]);

    assert_eq!(h.key_store.key_count(), 0);
    assert_eq!(h.key_store.deleted.lock().unwrap().len(), 2);
    assert!(h.store.counters.aliases().is_empty());
    assert!(!h.store.resident.is_registered(&rp_id_hash(RP_ID)));

    let fresh = success(&h.send(cmd::CLIENT_PIN, Some(client_pin(1, 2))).await)
        .get(1)
        .unwrap()
        .clone();
    assert_ne!(fresh, key_agreement);

    // Old key handles no longer resolve
    let response = h
        .send(
            cmd::GET_ASSERTION,
            Some(
                GetAssertionRequest::new()
                    .allow(&[&id])
                    .options(&[("up", false)])
                    .build(),
            ),
        )
        .await;
    assert_eq!(response, status(StatusCode::NoCredentials));
}

#[tokio::test]
async fn test_selection() {
    let mut h = Harness::new(Transport::Hid);
    h.ui.answer_next([UpResult::Accepted, UpResult::Denied, UpResult::Timeout]);

    assert_eq!(h.send(cmd::SELECTION, None).await, vec![0x00]);
    assert_eq!(
        h.send(cmd::SELECTION, None).await,
        status(StatusCode::OperationDenied)
    );
    assert_eq!(
        h.send(cmd::SELECTION, None).await,
        status(StatusCode::UserActionTimeout)
    );

    let touch = RequestInfo::PlatformGetTouch {
        rp_id: String::new(),
    };
    assert_eq!(h.ui.confirmations(), vec![touch; 3]);
}

#[tokio::test]
async fn test_status_returns_to_idle() {
    let mut h = Harness::new(Transport::Hid);
    let status_handle = h.dispatcher.authenticator().status().clone();
    let updates = status_handle.subscribe();

    register(&mut h, MakeCredentialRequest::new(b"user-1", "alice")).await;
    assert!(updates.has_changed().unwrap());
    assert_eq!(status_handle.get(), AuthenticatorStatus::Idle);

    // Failures restore the status too
    h.ui.answer_next([UpResult::Denied]);
    h.send(cmd::SELECTION, None).await;
    assert_eq!(status_handle.get(), AuthenticatorStatus::Idle);
}

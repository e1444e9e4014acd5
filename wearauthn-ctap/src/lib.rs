//! CTAP2 protocol core of the wearauthn roaming authenticator
//!
//! This crate turns CTAP 2.0 requests arriving over HID or NFC into
//! responses. Key material lives in a [`SecureKeyStore`] and every decision
//! that needs the wearer goes through [`UserInteraction`]; the crate itself
//! keeps only counters, resident credential records and per-connection
//! session state.
//!
//! Implements the FIDO2 specification:
//! <https://fidoalliance.org/specs/fido-v2.0-ps-20190130/fido-client-to-authenticator-protocol-v2.0-ps-20190130.html>

pub mod authenticator;
pub mod callbacks;
pub mod cbor;
pub mod commands;
pub mod credential;
pub mod dispatcher;
pub mod extensions;
pub mod request_info;
pub mod session;
pub mod status;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use authenticator::{Authenticator, AuthenticatorConfig, BatchAttestation};
pub use callbacks::{KeyStoreError, SecureKeyStore, SpecialStatus, UpResult, UserInteraction};
pub use credential::{Credential, UserInfo, WebAuthnCredential};
pub use dispatcher::CommandDispatcher;
pub use request_info::{Prompt, RequestInfo};
pub use session::{AuthenticatorStatus, StatusHandle};
pub use status::{Result, StatusCode};
pub use store::{CredentialStore, KeyValueStore, MemoryStore};
pub use types::{AttestationType, Transport};

//! authenticatorReset command
//!
//! Spec: <https://fidoalliance.org/specs/fido-v2.0-ps-20190130/fido-client-to-authenticator-protocol-v2.0-ps-20190130.html#authenticatorReset>

use crate::authenticator::Authenticator;
use crate::callbacks::{SecureKeyStore, SpecialStatus, UserInteraction};
use crate::status::{Result, StatusCode};

/// Handle authenticatorReset command
///
/// Only offered over HID, where the user can confirm on the device. A
/// declined reset is reported to the transport as [`SpecialStatus::Reset`].
pub async fn handle<K, U>(auth: &mut Authenticator<K, U>) -> Result<Vec<u8>>
where
    K: SecureKeyStore + ?Sized,
    U: UserInteraction + ?Sized,
{
    if !auth.transport().is_hid() {
        return Err(StatusCode::NotAllowed);
    }

    if !auth.request_reset().await {
        tracing::info!("reset declined");
        auth.handle_special_status(SpecialStatus::Reset);
        return Err(StatusCode::OperationDenied);
    }

    auth.wipe().await?;
    Ok(Vec::new())
}

//! authenticatorGetNextAssertion command
//!
//! Continues an assertion operation when there are multiple credentials
//! for a given RP. Must be called after authenticatorGetAssertion.
//!
//! Spec: <https://fidoalliance.org/specs/fido-v2.0-ps-20190130/fido-client-to-authenticator-protocol-v2.0-ps-20190130.html#authenticatorGetNextAssertion>

use crate::authenticator::Authenticator;
use crate::callbacks::{SecureKeyStore, UserInteraction};
use crate::status::{Result, StatusCode};

/// Handle authenticatorGetNextAssertion command
///
/// Returns the next assertion computed by the preceding
/// authenticatorGetAssertion. The success notification for the original
/// request fires once the last assertion has been handed out.
pub fn handle<K, U>(auth: &mut Authenticator<K, U>) -> Result<Vec<u8>>
where
    K: SecureKeyStore + ?Sized,
    U: UserInteraction + ?Sized,
{
    let Some(cursor) = auth.cursor_mut() else {
        return Err(StatusCode::NotAllowed);
    };
    let Some(assertion) = cursor.next_assertion() else {
        return Err(StatusCode::NotAllowed);
    };

    if cursor.is_exhausted() {
        let info = cursor.request_info().clone();
        auth.clear_cursor();
        auth.notify(&info);
    } else {
        tracing::debug!(remaining = cursor.remaining(), "assertions left");
    }
    Ok(assertion)
}

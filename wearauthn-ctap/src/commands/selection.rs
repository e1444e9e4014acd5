//! authenticatorSelection command
//!
//! Lets the user pick this authenticator when several are present.
//!
//! Spec: <https://fidoalliance.org/specs/fido-v2.1-ps-20210615/fido-client-to-authenticator-protocol-v2.1-ps-20210615.html#authenticatorSelection>

use crate::authenticator::Authenticator;
use crate::callbacks::{SecureKeyStore, UpResult, UserInteraction};
use crate::request_info::RequestInfo;
use crate::status::{Result, StatusCode};

/// Handle authenticatorSelection command
///
/// Succeeds with an empty payload once the user touches the device.
pub async fn handle<K, U>(auth: &mut Authenticator<K, U>) -> Result<Vec<u8>>
where
    K: SecureKeyStore + ?Sized,
    U: UserInteraction + ?Sized,
{
    let info = RequestInfo::PlatformGetTouch {
        rp_id: String::new(),
    };
    match auth.confirm_with_user(&info).await {
        UpResult::Accepted => Ok(Vec::new()),
        UpResult::Denied => Err(StatusCode::OperationDenied),
        UpResult::Timeout => Err(StatusCode::UserActionTimeout),
    }
}

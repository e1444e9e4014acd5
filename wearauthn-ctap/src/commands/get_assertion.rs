//! authenticatorGetAssertion command
//!
//! Produces assertions for credentials scoped to one relying party. Over an
//! interactive transport the user picks one credential; otherwise every
//! assertion is computed up front and the remainder is handed out by
//! authenticatorGetNextAssertion.
//!
//! Spec: <https://fidoalliance.org/specs/fido-v2.0-ps-20190130/fido-client-to-authenticator-protocol-v2.0-ps-20190130.html#authenticatorGetAssertion>

use crate::{
    authenticator::{self, Authenticator},
    callbacks::{SecureKeyStore, UserInteraction},
    cbor::{self, MapBuilder, MapParser, Value},
    commands::{authenticator_data, flags},
    credential::Credential,
    extensions::{Action, ExtensionInputs, OutputContext},
    request_info::RequestInfo,
    session::AssertionCursor,
    status::{Result, StatusCode},
    types::PublicKeyCredentialDescriptor,
};

/// GetAssertion request parameter keys
mod req_keys {
    pub const RP_ID: i32 = 0x01;
    pub const CLIENT_DATA_HASH: i32 = 0x02;
    pub const ALLOW_LIST: i32 = 0x03;
    pub const EXTENSIONS: i32 = 0x04;
    pub const OPTIONS: i32 = 0x05;
    pub const PIN_AUTH: i32 = 0x06;
}

/// GetAssertion response keys
pub(crate) mod resp_keys {
    pub const CREDENTIAL: i32 = 0x01;
    pub const AUTH_DATA: i32 = 0x02;
    pub const SIGNATURE: i32 = 0x03;
    pub const USER: i32 = 0x04;
    pub const NUMBER_OF_CREDENTIALS: i32 = 0x05;
    pub const USER_SELECTED: i32 = 0x06;
}

/// Options in the request
#[derive(Debug, PartialEq, Eq)]
struct GetAssertionOptions {
    up: bool,
    uv: bool,
}

impl Default for GetAssertionOptions {
    fn default() -> Self {
        Self { up: true, uv: false }
    }
}

/// Parse options from the request
///
/// `rk` has no meaning for assertions and is rejected.
fn parse_options(parser: &MapParser) -> Result<GetAssertionOptions> {
    let mut options = GetAssertionOptions::default();
    let Some(entries) = parser.map_opt(req_keys::OPTIONS)? else {
        return Ok(options);
    };

    if cbor::text_map_get(entries, "rk").is_some() {
        tracing::debug!("option 'rk' specified for GetAssertion");
        return Err(StatusCode::InvalidOption);
    }
    if let Some(up) = cbor::text_map_get(entries, "up") {
        options.up = cbor::as_bool(up)?;
    }
    if let Some(uv) = cbor::text_map_get(entries, "uv") {
        options.uv = cbor::as_bool(uv)?;
    }
    Ok(options)
}

/// Request-wide inputs shared by every assertion of one call
struct AssertionRequest<'a> {
    rp_id_hash: [u8; 32],
    client_data_hash: &'a [u8],
    extensions: &'a ExtensionInputs,
    user_present: bool,
    user_verified: bool,
    /// The client passed exactly one allow-list entry and already knows the id
    omit_credential: bool,
}

/// Handle authenticatorGetAssertion command
pub async fn handle<K, U>(auth: &mut Authenticator<K, U>, params: &Value) -> Result<Vec<u8>>
where
    K: SecureKeyStore + ?Sized,
    U: UserInteraction + ?Sized,
{
    auth.clear_cursor();
    let parser = MapParser::from_value(params.clone())?;

    let rp_id = parser.text(req_keys::RP_ID)?.to_string();
    let rp_id_hash = authenticator::rp_id_hash(&rp_id);
    let client_data_hash = parser.bytes(req_keys::CLIENT_DATA_HASH)?;
    if client_data_hash.len() != 32 {
        return Err(StatusCode::InvalidParameter);
    }
    let allow_list = parser
        .get_opt(req_keys::ALLOW_LIST)
        .map(PublicKeyCredentialDescriptor::list_from_value)
        .transpose()?;

    // Step 1: PIN protocols are not implemented
    if parser.contains_key(req_keys::PIN_AUTH) {
        return Err(StatusCode::PinAuthInvalid);
    }

    // Step 2
    let options = parse_options(&parser)?;
    let mut require_up = options.up;

    // Step 3
    let mut extensions = match parser.map_opt(req_keys::EXTENSIONS)? {
        Some(entries) => {
            ExtensionInputs::parse(entries, Action::Authenticate, auth.can_use_display())?
        }
        None => ExtensionInputs::default(),
    };
    if extensions.wants_hmac_secret() {
        require_up = true;
    }
    if extensions.tx_auth_simple().is_some() && !require_up && !options.uv {
        require_up = true;
    }

    // Step 4
    if options.uv && auth.verification_available() != Some(true) {
        return Err(StatusCode::UnsupportedOption);
    }
    if options.uv && !auth.verify_user().await {
        return Err(StatusCode::OperationDenied);
    }
    let user_verified = options.uv;

    // Step 5
    let use_resident = allow_list.is_none();
    let mut candidates = match &allow_list {
        Some(allow_list) => {
            let mut resolved = Vec::with_capacity(allow_list.len());
            for descriptor in allow_list {
                if let Some(credential) = auth.resolve_credential(&rp_id_hash, descriptor).await {
                    resolved.push(auth.lookup_and_replace_with_resident(credential));
                }
            }
            resolved
        }
        None => auth.resident_credentials(&rp_id_hash),
    };
    if extensions.wants_hmac_secret() {
        candidates.retain(Credential::has_hmac_secret);
    }

    // Step 6
    if !use_resident {
        candidates.truncate(1);
    }
    tracing::debug!(count = candidates.len(), use_resident, "candidate credentials");

    // Step 7
    if let Some(prompt) = extensions.tx_auth_simple()
        && !candidates.is_empty()
    {
        let shown = {
            let _waiting = auth.status().waiting_for_user();
            auth.ui().confirm_transaction(&rp_id, prompt).await
        };
        let Some(shown) = shown else {
            return Err(StatusCode::OperationDenied);
        };
        extensions.set_tx_auth_simple_prompt(shown);
        tokio::time::sleep(auth.config().transaction_prompt_delay).await;
    }

    // Step 8
    if user_verified {
        require_up = true;
        unlock_user_info(auth, &mut candidates).await;
    }

    // Step 9
    let info = match candidates.as_slice() {
        [] => RequestInfo::AuthenticateNoCredentials {
            rp_id: rp_id.clone(),
            rp_name: None,
        },
        [first, rest @ ..] => {
            let single = rest.is_empty();
            RequestInfo::Authenticate {
                rp_id: rp_id.clone(),
                rp_name: match first {
                    Credential::WebAuthn(c) => c.rp_name.clone(),
                    Credential::U2f(_) => None,
                },
                user_name: single.then(|| first.user_name().map(str::to_string)).flatten(),
                user_display_name: single
                    .then(|| first.user_display_name().map(str::to_string))
                    .flatten(),
                requires_user_verification: user_verified,
                uses_resident_key: !single,
            }
        }
    };
    if require_up && !auth.confirm_with_user(&info).await.is_accepted() {
        return Err(StatusCode::OperationDenied);
    }

    // Step 10: only after the prompt, so no-credentials is not revealed silently
    if candidates.is_empty() {
        auth.notify(&info);
        return Err(StatusCode::NoCredentials);
    }

    let request = AssertionRequest {
        rp_id_hash,
        client_data_hash,
        extensions: &extensions,
        user_present: require_up,
        user_verified,
        omit_credential: allow_list.as_ref().is_some_and(|list| list.len() == 1),
    };

    // Step 11
    if !auth.can_use_display() || !require_up {
        let count = candidates.len();
        let mut assertions = Vec::with_capacity(count);
        for (index, credential) in candidates.iter().enumerate() {
            let number_of_credentials = (index == 0).then_some(count);
            assertions.push(
                build_assertion(auth, &request, credential, number_of_credentials, None).await?,
            );
        }

        let mut assertions = assertions.into_iter();
        let first = assertions.next().ok_or(StatusCode::Other)?;
        if count > 1 {
            auth.set_cursor(Some(AssertionCursor::new(assertions.collect(), info)));
        } else {
            auth.notify(&info);
        }
        return Ok(first);
    }

    let chosen = auth
        .choose_credential(&candidates)
        .await
        .ok_or(StatusCode::OperationDenied)?;
    build_assertion(auth, &request, chosen, Some(1), Some(candidates.len() > 1)).await
}

/// Decrypt sealed user names so that they can be shown and returned
///
/// A credential whose names stay sealed is still usable.
async fn unlock_user_info<K, U>(auth: &Authenticator<K, U>, candidates: &mut [Credential])
where
    K: SecureKeyStore + ?Sized,
    U: UserInteraction + ?Sized,
{
    let key_store: &K = auth.key_store();
    for candidate in candidates.iter_mut() {
        let Credential::WebAuthn(credential) = candidate else {
            continue;
        };
        let unlocked = auth
            .with_reauthentication(|| {
                let mut unlocked = credential.clone();
                async move {
                    unlocked.unlock_user_info(key_store).await?;
                    Ok(unlocked)
                }
            })
            .await;
        match unlocked {
            Ok(unlocked) => *credential = unlocked,
            Err(err) => tracing::warn!(?err, "failed to unlock user info"),
        }
    }
}

/// Sign one assertion and encode its response map
async fn build_assertion<K, U>(
    auth: &Authenticator<K, U>,
    request: &AssertionRequest<'_>,
    credential: &Credential,
    number_of_credentials: Option<usize>,
    user_selected: Option<bool>,
) -> Result<Vec<u8>>
where
    K: SecureKeyStore + ?Sized,
    U: UserInteraction + ?Sized,
{
    let extension_outputs = request
        .extensions
        .outputs(&OutputContext {
            key_store: auth.key_store(),
            key_agreement: auth.key_agreement(),
            credential,
            user_present: request.user_present,
            user_verified: request.user_verified,
        })
        .await?;

    let counter = auth
        .store()
        .counters
        .atomically_increment(credential.key_alias())?
        .ok_or_else(|| {
            tracing::error!("credential without counter");
            StatusCode::Other
        })?;

    let mut flag_bits = 0;
    if request.user_present {
        flag_bits |= flags::USER_PRESENT;
    }
    if request.user_verified {
        flag_bits |= flags::USER_VERIFIED;
    }
    let auth_data = authenticator_data(
        &request.rp_id_hash,
        flag_bits,
        counter,
        None,
        extension_outputs.as_ref(),
    )?;
    let signature = auth
        .sign(credential.key_alias(), &[auth_data.as_slice(), request.client_data_hash])
        .await?;

    let credential_value = (!request.omit_credential).then(|| credential.descriptor().to_value());
    let user = match credential {
        Credential::WebAuthn(c) if c.is_resident => c.user_id.as_ref().map(|id| {
            let mut entries = vec![("id", cbor::bytes(id.clone()))];
            if request.user_verified {
                if let Some(name) = c.user_name() {
                    entries.push(("name", cbor::text(name)));
                }
                if let Some(display_name) = c.user_display_name() {
                    entries.push(("displayName", cbor::text(display_name)));
                }
            }
            cbor::canonical_text_map(entries)
        }),
        _ => None,
    };

    MapBuilder::new()
        .insert_opt(resp_keys::CREDENTIAL, credential_value)
        .insert_bytes(resp_keys::AUTH_DATA, &auth_data)
        .insert_bytes(resp_keys::SIGNATURE, &signature)
        .insert_opt(resp_keys::USER, user)
        .insert_opt(
            resp_keys::NUMBER_OF_CREDENTIALS,
            number_of_credentials.map(|n| cbor::int(n as i64)),
        )
        .insert_opt(resp_keys::USER_SELECTED, user_selected.map(Value::Bool))
        .build()
}

//! authenticatorMakeCredential command
//!
//! Creates a new credential for a relying party. The steps run in a fixed
//! order: every policy denial is raised only after the user interaction that
//! justifies it, so the response never reveals more than the user agreed to.
//!
//! Spec: <https://fidoalliance.org/specs/fido-v2.0-ps-20190130/fido-client-to-authenticator-protocol-v2.0-ps-20190130.html#authenticatorMakeCredential>

use crate::{
    authenticator::{self, Authenticator},
    callbacks::{SecureKeyStore, UpResult, UserInteraction},
    cbor::{self, MapBuilder, MapParser, Value},
    commands::{authenticator_data, flags},
    credential::{self, Credential, UserInfo, WebAuthnCredential},
    extensions::{Action, ExtensionInputs, OutputContext},
    request_info::RequestInfo,
    status::{Result, StatusCode},
    types::{
        AttestationType, PublicKeyCredentialDescriptor, PublicKeyCredentialParameters,
        RelyingParty, User, cose_alg, cose_key_from_sec1,
    },
};

/// MakeCredential request parameter keys
mod req_keys {
    pub const CLIENT_DATA_HASH: i32 = 0x01;
    pub const RP: i32 = 0x02;
    pub const USER: i32 = 0x03;
    pub const PUB_KEY_CRED_PARAMS: i32 = 0x04;
    pub const EXCLUDE_LIST: i32 = 0x05;
    pub const EXTENSIONS: i32 = 0x06;
    pub const OPTIONS: i32 = 0x07;
    pub const PIN_AUTH: i32 = 0x08;
}

/// MakeCredential response keys
mod resp_keys {
    pub const FMT: i32 = 0x01;
    pub const AUTH_DATA: i32 = 0x02;
    pub const ATT_STMT: i32 = 0x03;
}

/// Options in the request
#[derive(Debug, Default, PartialEq, Eq)]
struct MakeCredentialOptions {
    rk: bool,
    uv: bool,
}

/// Chrome (`.dummy`) and Windows Hello (`SelectDevice`) register dummy
/// credentials to make the user touch a specific authenticator
fn is_touch_probe(rp_id: &str, user_name: &str) -> bool {
    (rp_id == ".dummy" && user_name == "dummy")
        || (rp_id == "SelectDevice" && user_name == "SelectDevice")
}

/// Response to a touch probe; never parsed by the platform
fn dummy_response() -> Result<Vec<u8>> {
    MapBuilder::new()
        .insert_text(resp_keys::FMT, "none")
        .insert_bytes(resp_keys::AUTH_DATA, &[0u8; 37])
        .insert(resp_keys::ATT_STMT, Value::Map(Vec::new()))
        .build()
}

/// Parse options from the request
///
/// `up` must not be sent at all: registration always requires presence.
fn parse_options(parser: &MapParser) -> Result<MakeCredentialOptions> {
    let mut options = MakeCredentialOptions::default();
    let Some(entries) = parser.map_opt(req_keys::OPTIONS)? else {
        return Ok(options);
    };

    if let Some(rk) = cbor::text_map_get(entries, "rk") {
        options.rk = cbor::as_bool(rk)?;
    }
    if cbor::text_map_get(entries, "up").is_some() {
        tracing::debug!("option 'up' specified for MakeCredential");
        return Err(StatusCode::InvalidOption);
    }
    if let Some(uv) = cbor::text_map_get(entries, "uv") {
        options.uv = cbor::as_bool(uv)?;
    }
    Ok(options)
}

/// Handle authenticatorMakeCredential command
pub async fn handle<K, U>(auth: &mut Authenticator<K, U>, params: &Value) -> Result<Vec<u8>>
where
    K: SecureKeyStore + ?Sized,
    U: UserInteraction + ?Sized,
{
    auth.clear_cursor();
    let parser = MapParser::from_value(params.clone())?;

    let client_data_hash = parser.bytes(req_keys::CLIENT_DATA_HASH)?;
    if client_data_hash.len() != 32 {
        return Err(StatusCode::InvalidParameter);
    }
    let rp = RelyingParty::from_value(parser.get(req_keys::RP)?)?;
    let rp_id_hash = authenticator::rp_id_hash(&rp.id);
    let user = User::from_value(parser.get(req_keys::USER)?)?;
    let pub_key_cred_params =
        PublicKeyCredentialParameters::list_from_value(parser.get(req_keys::PUB_KEY_CRED_PARAMS)?)?;
    let exclude_list = parser
        .get_opt(req_keys::EXCLUDE_LIST)
        .map(PublicKeyCredentialDescriptor::list_from_value)
        .transpose()?;

    if is_touch_probe(&rp.id, &user.name) {
        tracing::info!(rp_id = %rp.id, "touch probe received");
        let info = RequestInfo::PlatformGetTouch { rp_id: rp.id };
        return match auth.confirm_with_user(&info).await {
            UpResult::Accepted => dummy_response(),
            _ => Err(StatusCode::OperationDenied),
        };
    }

    // PIN protocols are not implemented
    if parser.contains_key(req_keys::PIN_AUTH) {
        return Err(StatusCode::PinAuthInvalid);
    }

    if !pub_key_cred_params.iter().any(PublicKeyCredentialParameters::is_es256) {
        return Err(StatusCode::UnsupportedAlgorithm);
    }

    let options = parse_options(&parser)?;

    // Inputs are validated now and processed once the credential exists
    let extensions = match parser.map_opt(req_keys::EXTENSIONS)? {
        Some(entries) => ExtensionInputs::parse(entries, Action::Register, auth.can_use_display())?,
        None => ExtensionInputs::default(),
    };

    // Stop at the first entry that resolves
    if let Some(exclude_list) = &exclude_list {
        for descriptor in exclude_list {
            if auth.resolve_credential(&rp_id_hash, descriptor).await.is_none() {
                continue;
            }
            let info = RequestInfo::RegisterCredentialExcluded {
                rp_id: rp.id.clone(),
                rp_name: rp.name.clone(),
            };
            return match auth.confirm_with_user(&info).await {
                UpResult::Accepted => Err(StatusCode::CredentialExcluded),
                _ => Err(StatusCode::OperationDenied),
            };
        }
    }

    let verification_available = auth.verification_available();
    if options.uv && verification_available != Some(true) {
        return Err(StatusCode::InvalidOption);
    }
    if options.uv && !auth.verify_user().await {
        return Err(StatusCode::OperationDenied);
    }
    let user_verified = options.uv;

    // Resident credentials must be protected by verification whenever the device offers it
    if options.rk && verification_available == Some(true) && !user_verified {
        return Err(StatusCode::PinRequired);
    }

    let info = RequestInfo::Register {
        rp_id: rp.id.clone(),
        rp_name: rp.name.clone(),
        user_name: Some(user.name.clone()),
        user_display_name: user.display_name.clone(),
        requires_user_verification: user_verified,
        uses_resident_key: options.rk,
    };
    if !auth.confirm_with_user(&info).await.is_accepted() {
        return Err(StatusCode::OperationDenied);
    }

    let has_hmac_secret = extensions.wants_hmac_secret();
    let (key_alias, attestation) = auth
        .get_or_create_fresh_credential(options.rk, has_hmac_secret, client_data_hash)
        .await?
        .ok_or(StatusCode::KeyStoreFull)?;

    let result = register(
        auth,
        Registration {
            key_alias: &key_alias,
            attestation,
            rp: &rp,
            rp_id_hash,
            user,
            client_data_hash,
            options: &options,
            extensions: &extensions,
            has_hmac_secret,
            user_verified,
        },
    )
    .await;

    match result {
        Ok(response) => {
            auth.notify(&info);
            Ok(response)
        }
        Err(err) => {
            tracing::debug!(?err, "registration failed after key creation, deleting key");
            auth.delete_credential(&key_alias).await;
            Err(err)
        }
    }
}

/// Everything known once the key exists
struct Registration<'a> {
    key_alias: &'a str,
    attestation: AttestationType,
    rp: &'a RelyingParty,
    rp_id_hash: [u8; 32],
    user: User,
    client_data_hash: &'a [u8],
    options: &'a MakeCredentialOptions,
    extensions: &'a ExtensionInputs,
    has_hmac_secret: bool,
    user_verified: bool,
}

/// Persist the credential and build the response
async fn register<K, U>(auth: &Authenticator<K, U>, reg: Registration<'_>) -> Result<Vec<u8>>
where
    K: SecureKeyStore + ?Sized,
    U: UserInteraction + ?Sized,
{
    let key_handle = credential::encode_key_handle(
        &auth.config().key_handle_secret,
        &reg.rp_id_hash,
        false,
        reg.has_hmac_secret,
        reg.key_alias,
        reg.rp.name.as_deref(),
    )?;

    let webauthn = WebAuthnCredential {
        key_alias: reg.key_alias.to_string(),
        rp_id_hash: reg.rp_id_hash,
        key_handle,
        rp_name: reg.rp.name.clone(),
        user_id: Some(reg.user.id),
        user_info: UserInfo::Plain {
            name: Some(reg.user.name),
            display_name: reg.user.display_name,
        },
        is_resident: reg.options.rk,
        has_hmac_secret: reg.has_hmac_secret,
        creation_date: credential::now_millis(),
    };
    let credential = Credential::WebAuthn(webauthn);

    let extension_outputs = reg
        .extensions
        .outputs(&OutputContext {
            key_store: auth.key_store(),
            key_agreement: auth.key_agreement(),
            credential: &credential,
            user_present: true,
            user_verified: reg.user_verified,
        })
        .await?;

    let public_key = auth
        .key_store()
        .public_key(reg.key_alias)
        .await
        .and_then(|point| cose_key_from_sec1(&point, cose_alg::ES256))
        .ok_or_else(|| {
            tracing::error!("failed to get public key of new credential");
            StatusCode::Other
        })?;

    let key_handle = credential.key_handle();
    let mut attested_credential_data = Vec::with_capacity(18 + key_handle.len() + 77);
    attested_credential_data.extend_from_slice(&auth.config().aaguid_for(reg.attestation));
    attested_credential_data.extend_from_slice(&(key_handle.len() as u16).to_be_bytes());
    attested_credential_data.extend_from_slice(key_handle);
    attested_credential_data.extend_from_slice(&cbor::encode(&public_key)?);

    let mut flag_bits = flags::USER_PRESENT;
    if reg.user_verified {
        flag_bits |= flags::USER_VERIFIED;
    }
    let auth_data = authenticator_data(
        &reg.rp_id_hash,
        flag_bits,
        0,
        Some(&attested_credential_data),
        extension_outputs.as_ref(),
    )?;

    auth.store().counters.init(reg.key_alias)?;

    let att_stmt = attestation_statement(
        auth,
        reg.attestation,
        reg.key_alias,
        &auth_data,
        reg.client_data_hash,
    )
    .await?;

    let response = MapBuilder::new()
        .insert_text(resp_keys::FMT, reg.attestation.format())
        .insert_bytes(resp_keys::AUTH_DATA, &auth_data)
        .insert(resp_keys::ATT_STMT, att_stmt)
        .build()?;

    // Persisted last so that an earlier failure cannot leave a record behind
    // or cost the user a credential it replaces
    if reg.options.rk
        && let Credential::WebAuthn(webauthn) = &credential
    {
        auth.set_resident_credential(webauthn, reg.user_verified).await?;
    }

    Ok(response)
}

/// `{alg, sig[, x5c]}` over `authData | clientDataHash`
async fn attestation_statement<K, U>(
    auth: &Authenticator<K, U>,
    attestation: AttestationType,
    key_alias: &str,
    auth_data: &[u8],
    client_data_hash: &[u8],
) -> Result<Value>
where
    K: SecureKeyStore + ?Sized,
    U: UserInteraction + ?Sized,
{
    let (signature, chain) = match attestation {
        AttestationType::SelfAttestation => {
            (auth.sign(key_alias, &[auth_data, client_data_hash]).await?, None)
        }
        AttestationType::Basic => {
            let batch = auth.config().batch_attestation.as_ref().ok_or_else(|| {
                tracing::error!("basic attestation requested without a batch key");
                StatusCode::Other
            })?;
            let signature = batch.sign(&[auth_data, client_data_hash].concat())?;
            (signature, Some(vec![batch.certificate().to_vec()]))
        }
        AttestationType::Platform => {
            let signature = auth.sign(key_alias, &[auth_data, client_data_hash]).await?;
            let chain = auth.key_store().attestation_chain(key_alias).await?;
            (signature, Some(chain))
        }
    };

    let mut statement = vec![
        ("alg", cbor::int(cose_alg::ES256)),
        ("sig", cbor::bytes(signature)),
    ];
    if let Some(chain) = chain {
        statement.push(("x5c", Value::Array(chain.into_iter().map(cbor::bytes).collect())));
    }
    Ok(cbor::canonical_text_map(statement))
}

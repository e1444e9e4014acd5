//! CTAP Command Dispatcher
//!
//! Routes CTAP commands to their handlers and frames the result. One
//! dispatcher serves one transport connection and processes one request at a
//! time.

use crate::authenticator::Authenticator;
use crate::callbacks::{SecureKeyStore, UserInteraction};
use crate::cbor::{self, Value};
use crate::commands::{self, CommandCode};
use crate::status::{Result, StatusCode};

/// Decode the CBOR parameter map of a command
fn parameters(body: &[u8]) -> Result<Value> {
    cbor::decode(body)
}

/// Commands without parameters reject trailing bytes
fn no_parameters(body: &[u8]) -> Result<()> {
    if body.is_empty() {
        Ok(())
    } else {
        Err(StatusCode::InvalidLength)
    }
}

/// CTAP command dispatcher
///
/// Receives raw CTAP command bytes and dispatches to the appropriate
/// command handler. Owns the authenticator and its session state.
pub struct CommandDispatcher<K: SecureKeyStore + ?Sized, U: UserInteraction + ?Sized> {
    authenticator: Authenticator<K, U>,
}

impl<K: SecureKeyStore + ?Sized, U: UserInteraction + ?Sized> CommandDispatcher<K, U> {
    pub fn new(authenticator: Authenticator<K, U>) -> Self {
        Self { authenticator }
    }

    /// Process one request and produce the framed response
    ///
    /// A success is `0x00` followed by the CBOR payload, if any. A failure is
    /// the single status byte.
    pub async fn handle(&mut self, request: &[u8]) -> Vec<u8> {
        match self.dispatch(request).await {
            Ok(payload) => {
                let mut response = Vec::with_capacity(1 + payload.len());
                response.push(StatusCode::Success.to_u8());
                response.extend_from_slice(&payload);
                response
            }
            Err(status) => vec![status.to_u8()],
        }
    }

    /// Dispatch a CTAP command
    ///
    /// The input data format is:
    /// - First byte: command code
    /// - Remaining bytes: CBOR-encoded command parameters
    ///
    /// Returns the CBOR-encoded response payload, or a status code on error.
    pub async fn dispatch(&mut self, request: &[u8]) -> Result<Vec<u8>> {
        let _processing = self.authenticator.status().processing();

        let result = self.dispatch_inner(request).await;
        match &result {
            Err(StatusCode::Other) => tracing::error!("command failed with an internal error"),
            Err(status) => tracing::debug!(?status, "command failed"),
            Ok(payload) => tracing::trace!(len = payload.len(), "command succeeded"),
        }
        result
    }

    async fn dispatch_inner(&mut self, request: &[u8]) -> Result<Vec<u8>> {
        let Some((&command_byte, body)) = request.split_first() else {
            return Err(StatusCode::InvalidLength);
        };
        if body.len() > self.authenticator.config().max_msg_size {
            return Err(StatusCode::RequestTooLarge);
        }

        let Some(command) = CommandCode::from_u8(command_byte) else {
            tracing::debug!(command = command_byte, "unknown command");
            return Err(StatusCode::InvalidCommand);
        };
        tracing::debug!(?command, "dispatching command");

        let auth = &mut self.authenticator;
        match command {
            CommandCode::MakeCredential => {
                commands::make_credential::handle(auth, &parameters(body)?).await
            }
            CommandCode::GetAssertion => {
                commands::get_assertion::handle(auth, &parameters(body)?).await
            }
            CommandCode::ClientPin => commands::client_pin::handle(auth, &parameters(body)?),
            CommandCode::GetInfo => {
                no_parameters(body)?;
                commands::get_info::handle(auth)
            }
            CommandCode::GetNextAssertion => {
                no_parameters(body)?;
                commands::get_next_assertion::handle(auth)
            }
            CommandCode::Reset => {
                no_parameters(body)?;
                commands::reset::handle(auth).await
            }
            CommandCode::Selection => {
                no_parameters(body)?;
                commands::selection::handle(auth).await
            }
        }
    }

    /// Get a reference to the authenticator
    pub fn authenticator(&self) -> &Authenticator<K, U> {
        &self.authenticator
    }

    /// Get a mutable reference to the authenticator
    pub fn authenticator_mut(&mut self) -> &mut Authenticator<K, U> {
        &mut self.authenticator
    }

    /// Consume the dispatcher and return the authenticator
    pub fn into_authenticator(self) -> Authenticator<K, U> {
        self.authenticator
    }
}

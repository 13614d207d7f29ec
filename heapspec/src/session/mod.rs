//! Protocol client
//!
//! A [`Session`] is one channel to the verification server plus the session
//! token the server handed out on connect. Every operation takes `&mut self`,
//! so a session never has more than one request in flight.
//!
//! Transport failures poison the session: later calls fail with
//! `ProtocolError::Disconnected` and the caller should connect again. Server
//! error objects (e.g. a module that does not exist) leave it usable.
//!
//! A pending call is cancelled from another thread through
//! [`Session::cancel_handle`]: the channel is shut down, the blocked call
//! returns `ProtocolError::Disconnected` and the session is poisoned.

use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::config::{ConnectOptions, Endpoint};
use crate::contract::{Contract, Specification};
use crate::error::{ProtocolError, Result};
use crate::protocol::transport::{CancelHandle, HttpTransport, ProcessTransport, Transport};
use crate::protocol::{
    ConnectParams, ConnectResult, DisconnectParams, LoadModuleParams, LoadModuleResult,
    ModuleHandle, RpcRequest, RpcResponse, VerifyParams, VerifyRequest, METHOD_CONNECT,
    METHOD_DISCONNECT, METHOD_LOAD_MODULE, METHOD_VERIFY,
};
use crate::result::VerificationResult;

/// Open a session as described by `options`
pub fn connect(options: &ConnectOptions) -> Result<Session> {
    let transport: Box<dyn Transport> = match options.endpoint()? {
        Endpoint::Http { url, timeout } => Box::new(HttpTransport::new(url, timeout)?),
        Endpoint::Process { program, args } => Box::new(ProcessTransport::spawn(&program, &args)?),
    };
    Ok(Session::open(transport, options.reset_server)?)
}

/// Close a session
pub fn disconnect(session: Session) -> Result<()> {
    Ok(session.disconnect()?)
}

/// Build a fresh contract from `spec` and verify it
///
/// Construction errors are returned before anything is sent.
pub fn verify<S: Specification + ?Sized>(
    session: &mut Session,
    module: &ModuleHandle,
    function: &str,
    spec: &S,
) -> Result<VerificationResult> {
    let contract = Contract::build(spec)?;
    Ok(session.verify(module, function, &contract)?)
}

/// Live channel to the verification server
pub struct Session {
    transport: Box<dyn Transport>,
    token: String,
    next_id: u64,
    poisoned: bool,
    closed: bool,
    cancel: CancelHandle,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("next_id", &self.next_id)
            .field("poisoned", &self.poisoned)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Handshake over an already-open transport
    pub fn open(mut transport: Box<dyn Transport>, reset: bool) -> std::result::Result<Self, ProtocolError> {
        let cancel = CancelHandle::new();
        transport.attach_cancel(&cancel);
        let mut session = Self {
            transport,
            token: String::new(),
            next_id: 1,
            poisoned: false,
            closed: false,
            cancel,
        };
        let result: ConnectResult = session.call(METHOD_CONNECT, ConnectParams { reset })?;
        info!(session = %result.session, reset, "connected to verification server");
        session.token = result.session;
        Ok(session)
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Whether the session can still be used
    pub fn is_usable(&self) -> bool {
        !self.poisoned && !self.closed && !self.cancel.is_cancelled()
    }

    /// Handle that aborts this session from another thread
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Load a module into server state
    pub fn load_module(&mut self, path: impl AsRef<Path>) -> std::result::Result<ModuleHandle, ProtocolError> {
        let path = path.as_ref().display().to_string();
        let params = LoadModuleParams {
            session: self.token.clone(),
            path: path.clone(),
        };
        let result: LoadModuleResult = self.call(METHOD_LOAD_MODULE, params)?;
        debug!(path = %path, module = %result.module, "module loaded");
        Ok(result.module)
    }

    /// Submit `contract` against `function` in `module` and wait for the verdict
    ///
    /// The contract is only read; after a `ProtocolError` it can be submitted
    /// again on a new session.
    pub fn verify(
        &mut self,
        module: &ModuleHandle,
        function: &str,
        contract: &Contract,
    ) -> std::result::Result<VerificationResult, ProtocolError> {
        let params = VerifyParams {
            session: self.token.clone(),
            request: VerifyRequest::new(module, function, contract),
        };
        debug!(function, module = %module, "submitting contract\n{contract}");

        let result: VerificationResult = self.call(METHOD_VERIFY, params)?;
        info!(function, result = %result, "verification finished");
        Ok(result)
    }

    /// Tell the server the session is over and close the channel
    pub fn disconnect(mut self) -> std::result::Result<(), ProtocolError> {
        let said_goodbye = if self.poisoned || self.cancel.is_cancelled() {
            Ok(())
        } else {
            let params = DisconnectParams {
                session: self.token.clone(),
            };
            self.call::<_, serde_json::Value>(METHOD_DISCONNECT, params)
                .map(|_| ())
        };
        self.closed = true;
        let closed = self.transport.close();
        said_goodbye.and(closed)
    }

    fn call<P: Serialize, R: DeserializeOwned>(
        &mut self,
        method: &str,
        params: P,
    ) -> std::result::Result<R, ProtocolError> {
        if !self.is_usable() {
            return Err(ProtocolError::Disconnected);
        }

        let id = self.next_id;
        self.next_id += 1;
        let text = RpcRequest::new(id, method, params).to_json()?;
        debug!(method, id, bytes = text.len(), "sending request");

        let outcome = self
            .transport
            .exchange(&text)
            .and_then(|reply| RpcResponse::decode(&reply, id));
        if self.cancel.is_cancelled() {
            debug!(method, id, "request cancelled");
            self.poisoned = true;
            return Err(ProtocolError::Disconnected);
        }
        if let Err(e) = &outcome {
            if !matches!(e, ProtocolError::Server { .. }) {
                self.poisoned = true;
            }
        }
        outcome
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.closed {
            let _ = self.transport.close();
        }
    }
}

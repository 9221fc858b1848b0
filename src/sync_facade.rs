//! A blocking front end over [`crate::engine::Engine`].
//!
//! Every call here parks the calling thread on a small owned current-thread
//! `tokio::runtime::Runtime` — the idiomatic Rust stand-in for the
//! original's hand-rolled non-blocking-dial-plus-poll loop (see spec.md's
//! REDESIGN FLAGS: that loop never re-reads `O_NONBLOCK` before OR-ing it
//! in; `tokio::time::timeout` around `TcpStream::connect` has no such bug
//! because tokio arms the socket non-blocking itself).

use std::time::Duration;

use tokio::runtime::Runtime;
use tokio::sync::oneshot;

use crate::buffer::Buffer;
use crate::command::Command;
use crate::engine::endpoint::Endpoint;
use crate::engine::{ConnState, Engine, ErrorHandler};
use crate::error::ClientError;
use crate::frame::{encode_command, encode_pipeline};
use crate::value::Value;

/// Connection and per-call timing knobs, mirroring
/// `RedisSyncClient::setConnectTimeout`/`setCommandTimeout`/`setTcpNoDelay`.
#[derive(Clone, Debug)]
pub struct SyncConfig {
    pub connect_timeout: Duration,
    pub command_timeout: Duration,
    pub tcp_no_delay: bool,
    pub tcp_keep_alive: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            connect_timeout: Duration::from_secs(5),
            command_timeout: Duration::from_secs(5),
            tcp_no_delay: true,
            tcp_keep_alive: true,
        }
    }
}

/// Blocking connect/command/pipelined API. One `SyncFacade` owns one
/// connection (one `Engine` lane, one runtime).
pub struct SyncFacade {
    config: SyncConfig,
    engine: Engine,
    runtime: Runtime,
}

impl SyncFacade {
    pub fn new(config: SyncConfig) -> SyncFacade {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("failed to start the sync facade's runtime");
        let engine = runtime.block_on(async { Engine::new() });
        SyncFacade { config, engine, runtime }
    }

    pub fn state(&self) -> ConnState {
        self.engine.state()
    }

    pub fn is_connected(&self) -> bool {
        self.engine.is_connected()
    }

    pub fn install_error_handler(&self, handler: ErrorHandler) {
        self.engine.install_error_handler(handler);
    }

    pub fn disconnect(&self) {
        self.engine.disconnect();
    }

    /// Connects with the configured `connect_timeout`, raising on failure.
    pub fn connect(&mut self, endpoint: Endpoint) -> Result<(), ClientError> {
        let engine = self.engine.clone();
        let timeout = self.config.connect_timeout;
        let no_delay = self.config.tcp_no_delay;
        let keep_alive = self.config.tcp_keep_alive;
        self.runtime.block_on(async move {
            match tokio::time::timeout(timeout, engine.connect(endpoint, no_delay, keep_alive)).await {
                Ok(result) => result,
                Err(_) => {
                    engine.disconnect();
                    Err(ClientError::Timeout)
                }
            }
        })
    }

    /// Connects, storing any failure in `error_out` instead of raising.
    pub fn connect_with(&mut self, endpoint: Endpoint, error_out: &mut Option<ClientError>) {
        match self.connect(endpoint) {
            Ok(()) => *error_out = None,
            Err(e) => *error_out = Some(e),
        }
    }

    /// Issues one command with the configured `command_timeout`, raising on
    /// failure (transport, protocol, state, or timeout — never a
    /// `ServerError`, which arrives as `Ok(Value::Error(..))`).
    pub fn command(&self, name: impl Into<Buffer>, args: Vec<Buffer>) -> Result<Value, ClientError> {
        self.check_state("command")?;
        let cmd = Command::new(name, args);
        let bytes = encode_command(&cmd);
        self.call(bytes, 1)
    }

    /// Issues one command, storing any failure in `error_out` and returning
    /// `Value::Null` instead of raising.
    pub fn command_with(
        &self,
        name: impl Into<Buffer>,
        args: Vec<Buffer>,
        error_out: &mut Option<ClientError>,
    ) -> Value {
        match self.command(name, args) {
            Ok(v) => {
                *error_out = None;
                v
            }
            Err(e) => {
                *error_out = Some(e);
                Value::Null
            }
        }
    }

    /// Frames `batch` into one write and collects `batch.len()` replies
    /// into a single `Value::Array`, in submission order.
    pub fn pipelined(&self, batch: Vec<Command>) -> Result<Value, ClientError> {
        if batch.is_empty() {
            return Ok(Value::Array(Vec::new()));
        }
        self.check_state("pipelined")?;
        let n = batch.len();
        let bytes = encode_pipeline(&batch);
        self.call(bytes, n)
    }

    /// Rejects a call up front, with the typed `ClientError::State`, when the
    /// connection isn't in a state that accepts commands — rather than
    /// relying solely on the Engine's fire-and-forget `ErrorHandler` report
    /// plus a broken-pipe transport error from the dropped reply slot.
    fn check_state(&self, attempted: &'static str) -> Result<(), ClientError> {
        let current = self.engine.state();
        if matches!(current, ConnState::Connected | ConnState::Subscribed) {
            Ok(())
        } else {
            Err(ClientError::State { attempted, current })
        }
    }

    /// Starts a [`PipelineBuilder`] — an ergonomic alternative to building a
    /// `Vec<Command>` by hand before calling `pipelined`, modeled on the
    /// original's separate `PipeLine::command(...).commit()` builder.
    pub fn pipeline(&self) -> PipelineBuilder<'_> {
        PipelineBuilder { facade: self, commands: Vec::new() }
    }

    fn call(&self, bytes: Vec<u8>, replies_expected: usize) -> Result<Value, ClientError> {
        let (tx, rx) = oneshot::channel();
        if replies_expected == 1 {
            self.engine.send_command(bytes, Box::new(move |v| { let _ = tx.send(v); }));
        } else {
            self.engine.send_pipeline(bytes, replies_expected, Box::new(move |v| { let _ = tx.send(v); }));
        }
        let timeout = self.config.command_timeout;
        let engine = self.engine.clone();
        self.runtime.block_on(async move {
            match tokio::time::timeout(timeout, rx).await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(_)) => Err(ClientError::Transport(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "connection closed before a reply arrived",
                ))),
                Err(_) => {
                    engine.disconnect();
                    Err(ClientError::Timeout)
                }
            }
        })
    }
}

/// Accumulates commands for one pipelined round trip, mirroring the
/// original's `PipeLine` builder.
pub struct PipelineBuilder<'a> {
    facade: &'a SyncFacade,
    commands: Vec<Command>,
}

impl<'a> PipelineBuilder<'a> {
    pub fn command(mut self, name: impl Into<Buffer>, args: Vec<Buffer>) -> Self {
        self.commands.push(Command::new(name, args));
        self
    }

    pub fn commit(self) -> Result<Value, ClientError> {
        self.facade.pipelined(self.commands)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_before_connect_is_rejected_without_queuing() {
        // The facade checks state up front and never reaches the engine at
        // all, so this returns the typed `ClientError::State` immediately
        // instead of waiting on a dropped oneshot sender.
        let facade = SyncFacade::new(SyncConfig::default());
        let err = facade.command("PING", Vec::new()).unwrap_err();
        assert!(matches!(
            err,
            ClientError::State { attempted: "command", current: ConnState::Unconnected }
        ));
    }

    #[test]
    fn pipeline_builder_accumulates_commands() {
        let facade = SyncFacade::new(SyncConfig::default());
        let builder = facade
            .pipeline()
            .command("PING", Vec::new())
            .command("GET", vec![Buffer::from_str("key")]);
        assert_eq!(builder.commands.len(), 2);
    }
}

//! A non-blocking front end over [`crate::engine::Engine`].
//!
//! No call here blocks the calling task: `connect` takes a completion
//! callback, `command` takes a reply callback, and subscription deliveries
//! fire a message callback — all invoked on the Engine's lane task, the
//! concrete form of the spec's "serialization lane".

use crate::buffer::Buffer;
use crate::command::Command;
use crate::engine::endpoint::Endpoint;
use crate::engine::{ConnState, Engine, ErrorHandler, MsgHandler, ReplyFn, SubKind};
use crate::error::ClientError;
use crate::frame::encode_command;
use crate::value::Value;

/// An opaque subscription handle, returned by `subscribe`/`psubscribe` and
/// consumed by `unsubscribe`/`punsubscribe` — mirrors the original's
/// `Handle{id, channel}` so one registration can be torn down without
/// disturbing siblings on the same channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Handle {
    pub id: u64,
    pub channel: String,
    kind: SubKind,
}

/// Non-blocking connect/command/subscribe/publish API.
#[derive(Clone)]
pub struct AsyncFacade {
    engine: Engine,
    tcp_no_delay: bool,
    tcp_keep_alive: bool,
}

impl AsyncFacade {
    pub fn new() -> AsyncFacade {
        AsyncFacade { engine: Engine::new(), tcp_no_delay: true, tcp_keep_alive: true }
    }

    pub fn with_tcp_options(tcp_no_delay: bool, tcp_keep_alive: bool) -> AsyncFacade {
        AsyncFacade { engine: Engine::new(), tcp_no_delay, tcp_keep_alive }
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

    /// Dials `endpoint` and invokes `completion` exactly once with the
    /// outcome, on the Engine's lane.
    pub fn connect(&self, endpoint: Endpoint, completion: impl FnOnce(Result<(), ClientError>) + Send + 'static) {
        let engine = self.engine.clone();
        let tcp_no_delay = self.tcp_no_delay;
        let tcp_keep_alive = self.tcp_keep_alive;
        tokio::spawn(async move {
            let result = engine.connect(endpoint, tcp_no_delay, tcp_keep_alive).await;
            completion(result);
        });
    }

    /// Sends one command, invoking `reply_cb` exactly once with the decoded
    /// `Value` (never, if the connection closes first without a reply).
    pub fn command(&self, name: impl Into<Buffer>, args: Vec<Buffer>, reply_cb: ReplyFn) {
        let cmd = Command::new(name, args);
        self.engine.send_command(encode_command(&cmd), reply_cb);
    }

    /// Publishes `message` on `channel`; `reply_cb` receives the
    /// server's integer receiver count.
    pub fn publish(&self, channel: impl Into<Buffer>, message: impl Into<Buffer>, reply_cb: ReplyFn) {
        let cmd = Command::new("PUBLISH", vec![channel.into(), message.into()]);
        self.engine.send_command(encode_command(&cmd), reply_cb);
    }

    pub fn subscribe(&self, channel: impl Into<String>, msg_cb: MsgHandler, reply_cb: ReplyFn) -> Handle {
        let channel = channel.into();
        let id = self.engine.subscribe(SubKind::Channel, channel.clone(), msg_cb, reply_cb);
        Handle { id, channel, kind: SubKind::Channel }
    }

    pub fn psubscribe(&self, pattern: impl Into<String>, msg_cb: MsgHandler, reply_cb: ReplyFn) -> Handle {
        let pattern = pattern.into();
        let id = self.engine.subscribe(SubKind::Pattern, pattern.clone(), msg_cb, reply_cb);
        Handle { id, channel: pattern, kind: SubKind::Pattern }
    }

    /// Registers a handler that fires on the first matching delivery, then
    /// is removed before any subsequent delivery is dispatched.
    pub fn single_shot_subscribe(&self, channel: impl Into<String>, msg_cb: MsgHandler, reply_cb: ReplyFn) -> Handle {
        let channel = channel.into();
        let id = self.engine.single_shot_subscribe(SubKind::Channel, channel.clone(), msg_cb, reply_cb);
        Handle { id, channel, kind: SubKind::Channel }
    }

    /// Pattern-matching variant of `single_shot_subscribe` (the original's
    /// `singleShotPSubscribe`).
    pub fn single_shot_psubscribe(&self, pattern: impl Into<String>, msg_cb: MsgHandler, reply_cb: ReplyFn) -> Handle {
        let pattern = pattern.into();
        let id = self.engine.single_shot_subscribe(SubKind::Pattern, pattern.clone(), msg_cb, reply_cb);
        Handle { id, channel: pattern, kind: SubKind::Pattern }
    }

    pub fn unsubscribe(&self, handle: Handle) {
        self.engine.unsubscribe(handle.kind, handle.id, handle.channel);
    }

    pub fn punsubscribe(&self, handle: Handle) {
        self.engine.unsubscribe(handle.kind, handle.id, handle.channel);
    }
}

impl Default for AsyncFacade {
    fn default() -> Self {
        AsyncFacade::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn command_before_connect_reports_to_the_error_handler() {
        let facade = AsyncFacade::new();
        let reported = Arc::new(AtomicBool::new(false));
        let reported2 = reported.clone();
        facade.install_error_handler(std::sync::Arc::new(move |_msg| {
            reported2.store(true, Ordering::SeqCst);
        }));

        let fired = Arc::new(AtomicBool::new(false));
        let fired2 = fired.clone();
        facade.command("PING", Vec::new(), Box::new(move |_v| {
            fired2.store(true, Ordering::SeqCst);
        }));

        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        assert!(reported.load(Ordering::SeqCst));
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[test]
    fn handles_carry_id_and_channel() {
        let h = Handle { id: 7, channel: "ch1".to_string(), kind: SubKind::Channel };
        assert_eq!(h.id, 7);
        assert_eq!(h.channel, "ch1");
    }
}

//! The connection state machine, write queue, pending-reply FIFO, and
//! subscription registry — the component both [`crate::SyncFacade`] and
//! [`crate::AsyncFacade`] are built on.
//!
//! All mutable state lives inside a single `tokio::spawn`'d task (the
//! "lane" from the spec): every other thread or task talks to it by
//! posting a [`LaneMessage`] over an unbounded channel, the idiomatic Rust
//! stand-in for the original's `boost::asio::io_service::strand`. This
//! removes the need for locking inside the engine itself — the per-command
//! reply continuation is the only thing ever shared outside the lane, and
//! it's handed over once, by value.

pub mod endpoint;

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::codec::Framed as TokioFramed;

use crate::codec::{OutgoingBytes, RespCodec};
use crate::error::ClientError;
use crate::value::Value;
use endpoint::{dial, AsyncDuplex, Endpoint};

/// The connection's lifecycle state, mirrored out of the lane task via a
/// `watch` channel so callers can observe it without a round trip.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnState {
    Unconnected,
    Connecting,
    Connected,
    Subscribed,
    Closed,
}

/// Which subscribe/unsubscribe command a registration uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubKind {
    Channel,
    Pattern,
}

impl SubKind {
    fn subscribe_command(self) -> &'static str {
        match self {
            SubKind::Channel => "SUBSCRIBE",
            SubKind::Pattern => "PSUBSCRIBE",
        }
    }

    fn unsubscribe_command(self) -> &'static str {
        match self {
            SubKind::Channel => "UNSUBSCRIBE",
            SubKind::Pattern => "PUNSUBSCRIBE",
        }
    }
}

pub type ReplyFn = Box<dyn FnOnce(Value) + Send>;
pub type MsgHandler = Arc<dyn Fn(&[u8]) + Send + Sync>;
pub type ErrorHandler = Arc<dyn Fn(String) + Send + Sync>;

/// One outstanding reply continuation. `BatchMember` is how a pipelined
/// batch's N individually-queued replies get merged back into a single
/// `Value::Array` for the caller, without the engine's FIFO ever stopping
/// being "one entry per outstanding command".
enum ReplySlot {
    Single(ReplyFn),
    BatchMember(Arc<Mutex<BatchState>>),
}

struct BatchState {
    remaining: usize,
    values: Vec<Value>,
    on_complete: Option<ReplyFn>,
}

/// Splits one pipelined batch of `n` commands into `n` reply slots that
/// share completion state; the last one to complete invokes `on_complete`
/// with the assembled array, in submission order.
fn batch_slots(n: usize, on_complete: ReplyFn) -> Vec<ReplySlot> {
    let shared = Arc::new(Mutex::new(BatchState {
        remaining: n,
        values: Vec::with_capacity(n),
        on_complete: Some(on_complete),
    }));
    (0..n).map(|_| ReplySlot::BatchMember(shared.clone())).collect()
}

fn complete_slot(slot: ReplySlot, value: Value) {
    match slot {
        ReplySlot::Single(f) => f(value),
        ReplySlot::BatchMember(shared) => {
            let mut state = shared.lock().unwrap();
            state.values.push(value);
            state.remaining -= 1;
            if state.remaining == 0 {
                let values = std::mem::take(&mut state.values);
                let cb = state.on_complete.take();
                drop(state);
                if let Some(cb) = cb {
                    cb(Value::Array(values));
                }
            }
        }
    }
}

struct SubEntry {
    id: u64,
    handler: MsgHandler,
}

enum LaneMessage {
    Connect {
        endpoint: Endpoint,
        tcp_no_delay: bool,
        tcp_keep_alive: bool,
        reply: oneshot::Sender<Result<(), ClientError>>,
    },
    Command {
        bytes: Vec<u8>,
        slots: Vec<ReplySlot>,
    },
    Subscribe {
        id: u64,
        kind: SubKind,
        channel: String,
        msg_handler: MsgHandler,
        single_shot: bool,
        reply: ReplyFn,
    },
    Unsubscribe {
        kind: SubKind,
        id: u64,
        channel: String,
    },
    SetErrorHandler(ErrorHandler),
    Disconnect,
}

type Conn = TokioFramed<Box<dyn AsyncDuplex>, RespCodec>;
type ConnSink = SplitSink<Conn, OutgoingBytes>;
type ConnStream = SplitStream<Conn>;

/// A handle to the connection engine. Cheap to clone; every clone posts to
/// the same lane task.
#[derive(Clone)]
pub struct Engine {
    tx: mpsc::UnboundedSender<LaneMessage>,
    state_rx: watch::Receiver<ConnState>,
    next_sub_id: Arc<AtomicU64>,
}

impl Engine {
    pub fn new() -> Engine {
        let (tx, rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnState::Unconnected);
        let default_handler: ErrorHandler = Arc::new(|msg| error!("{msg}"));
        tokio::spawn(run(rx, state_tx, default_handler));
        Engine {
            tx,
            state_rx,
            next_sub_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn state(&self) -> ConnState {
        *self.state_rx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state(), ConnState::Connected | ConnState::Subscribed)
    }

    pub async fn connect(&self, endpoint: Endpoint, tcp_no_delay: bool, tcp_keep_alive: bool) -> Result<(), ClientError> {
        let (reply, rx) = oneshot::channel();
        if self
            .tx
            .send(LaneMessage::Connect { endpoint, tcp_no_delay, tcp_keep_alive, reply })
            .is_err()
        {
            return Err(ClientError::Transport(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "engine lane is gone",
            )));
        }
        rx.await.unwrap_or(Err(ClientError::Transport(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "engine lane dropped the connect reply",
        ))))
    }

    /// Sends a single already-framed command, invoking `reply` exactly once
    /// with its decoded `Value` (or never, if the engine closes first,
    /// matching the at-most-once-per-reply invariant).
    pub fn send_command(&self, bytes: Vec<u8>, reply: ReplyFn) {
        let _ = self.tx.send(LaneMessage::Command {
            bytes,
            slots: vec![ReplySlot::Single(reply)],
        });
    }

    /// Sends a pre-framed pipelined batch of `n` commands, invoking `reply`
    /// once with a single `Value::Array` of the `n` results in order.
    pub fn send_pipeline(&self, bytes: Vec<u8>, n: usize, reply: ReplyFn) {
        let _ = self.tx.send(LaneMessage::Command {
            bytes,
            slots: batch_slots(n, reply),
        });
    }

    pub fn subscribe(&self, kind: SubKind, channel: String, msg_handler: MsgHandler, reply: ReplyFn) -> u64 {
        let id = self.next_sub_id.fetch_add(1, Ordering::Relaxed);
        let _ = self.tx.send(LaneMessage::Subscribe {
            id,
            kind,
            channel,
            msg_handler,
            single_shot: false,
            reply,
        });
        id
    }

    pub fn single_shot_subscribe(&self, kind: SubKind, channel: String, msg_handler: MsgHandler, reply: ReplyFn) -> u64 {
        let id = self.next_sub_id.fetch_add(1, Ordering::Relaxed);
        let _ = self.tx.send(LaneMessage::Subscribe {
            id,
            kind,
            channel,
            msg_handler,
            single_shot: true,
            reply,
        });
        id
    }

    pub fn unsubscribe(&self, kind: SubKind, id: u64, channel: String) {
        let _ = self.tx.send(LaneMessage::Unsubscribe { kind, id, channel });
    }

    pub fn install_error_handler(&self, handler: ErrorHandler) {
        let _ = self.tx.send(LaneMessage::SetErrorHandler(handler));
    }

    pub fn disconnect(&self) {
        let _ = self.tx.send(LaneMessage::Disconnect);
    }
}

impl Default for Engine {
    fn default() -> Self {
        Engine::new()
    }
}

struct LaneState {
    state_tx: watch::Sender<ConnState>,
    sink: Option<ConnSink>,
    reply_queue: VecDeque<ReplySlot>,
    subs: HashMap<String, Vec<SubEntry>>,
    single_shot_subs: HashMap<String, Vec<SubEntry>>,
    error_handler: ErrorHandler,
}

impl LaneState {
    fn set_state(&mut self, state: ConnState) {
        let _ = self.state_tx.send(state);
    }

    fn current_state(&self) -> ConnState {
        *self.state_tx.borrow()
    }

    fn report(&self, message: impl Into<String>) {
        (self.error_handler)(message.into());
    }

    /// Fails every outstanding reply continuation and subscription handler
    /// exactly once, and tears down the socket. Called on transport error,
    /// protocol error, and explicit disconnect.
    fn close(&mut self) {
        self.sink = None;
        self.set_state(ConnState::Closed);

        while let Some(slot) = self.reply_queue.pop_front() {
            complete_slot(slot, Value::error("connection closed"));
        }

        for (_, entries) in self.subs.drain() {
            for entry in entries {
                (entry.handler)(&[]);
            }
        }
        for (_, entries) in self.single_shot_subs.drain() {
            for entry in entries {
                (entry.handler)(&[]);
            }
        }
    }
}

async fn run(
    mut rx: mpsc::UnboundedReceiver<LaneMessage>,
    state_tx: watch::Sender<ConnState>,
    default_error_handler: ErrorHandler,
) {
    let mut lane = LaneState {
        state_tx,
        sink: None,
        reply_queue: VecDeque::new(),
        subs: HashMap::new(),
        single_shot_subs: HashMap::new(),
        error_handler: default_error_handler,
    };
    let mut stream: Option<ConnStream> = None;

    loop {
        tokio::select! {
            biased;

            msg = rx.recv() => {
                match msg {
                    Some(msg) => handle_lane_message(&mut lane, &mut stream, msg).await,
                    None => {
                        lane.close();
                        return;
                    }
                }
            }

            incoming = next_incoming(&mut stream) => {
                match incoming {
                    Some(Ok(value)) => dispatch_incoming(&mut lane, value),
                    Some(Err(e)) => {
                        warn!("protocol error, closing connection: {e}");
                        lane.report(format!("protocol error: {e}"));
                        stream = None;
                        lane.close();
                    }
                    None => {
                        warn!("connection closed by peer");
                        lane.report("connection closed by peer");
                        stream = None;
                        lane.close();
                    }
                }
            }
        }
    }
}

/// Awaits the next frame from `stream`, or never resolves if there's no
/// connection yet — lets the `select!` loop stay alive with just the
/// message channel active before `connect()` has run.
async fn next_incoming(stream: &mut Option<ConnStream>) -> Option<Result<Value, std::io::Error>> {
    match stream {
        Some(s) => s.next().await,
        None => std::future::pending().await,
    }
}

async fn handle_lane_message(lane: &mut LaneState, stream: &mut Option<ConnStream>, msg: LaneMessage) {
    match msg {
        LaneMessage::Connect { endpoint, tcp_no_delay, tcp_keep_alive, reply } => {
            lane.set_state(ConnState::Connecting);
            match dial(&endpoint, tcp_no_delay, tcp_keep_alive).await {
                Ok(socket) => {
                    let framed = TokioFramed::new(socket, RespCodec::new());
                    let (sink, read_half) = framed.split();
                    lane.sink = Some(sink);
                    *stream = Some(read_half);
                    lane.set_state(ConnState::Connected);
                    info!("connected to {endpoint:?}");
                    let _ = reply.send(Ok(()));
                }
                Err(e) => {
                    lane.set_state(ConnState::Closed);
                    let _ = reply.send(Err(ClientError::Transport(e)));
                }
            }
        }
        LaneMessage::Command { bytes, slots } => {
            if !gated(lane, "command") {
                return;
            }
            lane.reply_queue.extend(slots);
            if let Some(sink) = lane.sink.as_mut() {
                if let Err(e) = sink.send(OutgoingBytes(bytes)).await {
                    warn!("write failed, closing connection: {e}");
                    lane.report(format!("write failed: {e}"));
                    *stream = None;
                    lane.close();
                }
            }
        }
        LaneMessage::Subscribe { id, kind, channel, msg_handler, single_shot, reply } => {
            if !gated(lane, "subscribe") {
                return;
            }
            let entry = SubEntry { id, handler: msg_handler };
            let target = if single_shot { &mut lane.single_shot_subs } else { &mut lane.subs };
            target.entry(channel.clone()).or_default().push(entry);

            if lane.current_state() == ConnState::Connected {
                lane.set_state(ConnState::Subscribed);
            }

            let cmd = crate::command::Command::new(
                kind.subscribe_command(),
                vec![crate::buffer::Buffer::from_str(&channel)],
            );
            let bytes = crate::frame::encode_command(&cmd);
            lane.reply_queue.push_back(ReplySlot::Single(reply));
            if let Some(sink) = lane.sink.as_mut() {
                if let Err(e) = sink.send(OutgoingBytes(bytes)).await {
                    warn!("write failed, closing connection: {e}");
                    lane.report(format!("write failed: {e}"));
                    *stream = None;
                    lane.close();
                }
            }
        }
        LaneMessage::Unsubscribe { kind, id, channel } => {
            let mut now_empty = true;
            if let Some(entries) = lane.subs.get_mut(&channel) {
                entries.retain(|e| e.id != id);
                now_empty = entries.is_empty();
                if entries.is_empty() {
                    lane.subs.remove(&channel);
                }
            }
            if now_empty {
                let cmd = crate::command::Command::new(
                    kind.unsubscribe_command(),
                    vec![crate::buffer::Buffer::from_str(&channel)],
                );
                let bytes = crate::frame::encode_command(&cmd);
                // The ACK for this command arrives as an ordinary reply
                // array, not a pub/sub delivery, so a slot must be queued
                // at the same moment the bytes are written — otherwise
                // `dispatch_incoming` would pop the FIFO entry belonging to
                // whatever command is actually next in flight.
                lane.reply_queue.push_back(ReplySlot::Single(Box::new(|_| {})));
                if let Some(sink) = lane.sink.as_mut() {
                    if let Err(e) = sink.send(OutgoingBytes(bytes)).await {
                        warn!("write failed, closing connection: {e}");
                        lane.report(format!("write failed: {e}"));
                        *stream = None;
                        lane.close();
                    }
                }
            }
            if lane.subs.is_empty()
                && lane.single_shot_subs.is_empty()
                && lane.current_state() == ConnState::Subscribed
            {
                lane.set_state(ConnState::Connected);
            }
        }
        LaneMessage::SetErrorHandler(handler) => {
            lane.error_handler = handler;
        }
        LaneMessage::Disconnect => {
            *stream = None;
            lane.close();
        }
    }
}

fn gated(lane: &mut LaneState, op: &str) -> bool {
    match lane.current_state() {
        ConnState::Connected | ConnState::Subscribed => true,
        other => {
            lane.report(format!("{op} called with invalid state {other:?}"));
            debug!("{op} rejected in state {other:?}");
            false
        }
    }
}

/// Routes one decoded top-level value: pub/sub deliveries go to channel
/// handlers (single-shot handlers fire once then are dropped before any
/// later delivery is processed), everything else pops the head of the
/// reply queue.
fn dispatch_incoming(lane: &mut LaneState, value: Value) {
    if let Some((kind, channel, payload)) = as_pubsub_message(&value) {
        let _ = kind;
        if let Some(entries) = lane.single_shot_subs.remove(&channel) {
            for entry in entries {
                (entry.handler)(payload);
            }
        }
        if let Some(entries) = lane.subs.get(&channel) {
            for entry in entries {
                (entry.handler)(payload);
            }
        }
        return;
    }

    if let Some(slot) = lane.reply_queue.pop_front() {
        complete_slot(slot, value);
    } else {
        warn!("received a reply with no matching pending command: {}", value.inspect());
    }
}

enum PubSubKind {
    Message,
    PMessage,
}

/// Recognizes `["message", channel, payload]` and
/// `["pmessage", pattern, channel, payload]` deliveries. The payload form
/// this engine delivers to handlers is always the message body octets:
/// for `pmessage` that's element 3, keyed by the pattern in element 1.
fn as_pubsub_message(value: &Value) -> Option<(PubSubKind, String, &[u8])> {
    let items = value.as_array()?;
    let head = items.first()?.as_bytes()?;
    match head {
        b"message" if items.len() == 3 => {
            let channel = String::from_utf8_lossy(items[1].as_bytes()?).into_owned();
            let payload = items[2].as_bytes()?;
            Some((PubSubKind::Message, channel, payload))
        }
        b"pmessage" if items.len() == 4 => {
            let pattern = String::from_utf8_lossy(items[1].as_bytes()?).into_owned();
            let payload = items[3].as_bytes()?;
            Some((PubSubKind::PMessage, pattern, payload))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_message_and_pmessage() {
        let msg = Value::array(vec![
            Value::bytes("message"),
            Value::bytes("ch1"),
            Value::bytes("hi"),
        ]);
        let (kind, channel, payload) = as_pubsub_message(&msg).unwrap();
        assert!(matches!(kind, PubSubKind::Message));
        assert_eq!(channel, "ch1");
        assert_eq!(payload, b"hi");

        let pmsg = Value::array(vec![
            Value::bytes("pmessage"),
            Value::bytes("ch*"),
            Value::bytes("ch1"),
            Value::bytes("hi"),
        ]);
        let (kind, pattern, payload) = as_pubsub_message(&pmsg).unwrap();
        assert!(matches!(kind, PubSubKind::PMessage));
        assert_eq!(pattern, "ch*");
        assert_eq!(payload, b"hi");
    }

    #[test]
    fn subscribe_ack_is_not_mistaken_for_a_delivery() {
        let ack = Value::array(vec![Value::bytes("subscribe"), Value::bytes("ch1"), Value::Int(1)]);
        assert!(as_pubsub_message(&ack).is_none());
    }

    #[test]
    fn batch_slots_merge_into_one_array_in_order() {
        let (tx, rx) = std::sync::mpsc::channel();
        let slots = batch_slots(
            3,
            Box::new(move |v| {
                tx.send(v).unwrap();
            }),
        );
        let mut iter = slots.into_iter();
        complete_slot(iter.next().unwrap(), Value::Int(1));
        complete_slot(iter.next().unwrap(), Value::Int(2));
        assert!(rx.try_recv().is_err());
        complete_slot(iter.next().unwrap(), Value::Int(3));
        let result = rx.try_recv().unwrap();
        assert_eq!(
            result,
            Value::array(vec![Value::Int(1), Value::Int(2), Value::Int(3)])
        );
    }
}

//! An in-process AMQP 0.9.1 broker, just capable enough to drive the client end to end.
//!
//! It speaks the wire protocol through the crate's own codec, keeps queues in memory,
//! routes through the default, direct and fanout exchanges, and can sever every live
//! socket to exercise recovery.

#![allow(dead_code)]

use bytes::BytesMut;
use parking_lot::Mutex;
use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    io::{self, Read, Write},
    net::{Shutdown, SocketAddr, TcpListener, TcpStream},
    sync::Arc,
    thread,
    time::{Duration, Instant},
};
use warren::{
    format::{
        content::AMQPContentHeader,
        frame::{decode_frame, gen_frame, AMQPFrame},
        ParserError,
    },
    protocol::{
        basic, channel, confirm, connection,
        constants::{NOT_FOUND, NO_ROUTE, PRECONDITION_FAILED},
        exchange, queue, AMQPClass, BasicProperties,
    },
    types::{ChannelId, FieldTable, ShortString},
};

const POLL: Duration = Duration::from_millis(10);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Poll `condition` until it holds, panicking after a few seconds.
pub fn eventually<F: FnMut() -> bool>(what: &str, mut condition: F) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        thread::sleep(POLL);
    }
}

#[derive(Clone, Debug)]
struct Message {
    exchange: ShortString,
    routing_key: ShortString,
    properties: BasicProperties,
    body: Vec<u8>,
    redelivered: bool,
}

#[derive(Default)]
struct State {
    exchanges: HashMap<String, String>,
    queues: HashMap<String, VecDeque<Message>>,
    /// (exchange, queue, routing key)
    bindings: Vec<(String, String, String)>,
    declarations: HashMap<String, usize>,
    generated: u32,
    accepted: usize,
    sockets: Vec<TcpStream>,
}

impl State {
    fn route(&self, exchange: &str, routing_key: &str) -> Option<Vec<String>> {
        if exchange.is_empty() {
            return Some(
                self.queues
                    .contains_key(routing_key)
                    .then(|| vec![routing_key.to_string()])
                    .unwrap_or_default(),
            );
        }
        let kind = self.exchanges.get(exchange)?;
        Some(
            self.bindings
                .iter()
                .filter(|(source, _, key)| {
                    source == exchange && (kind == "fanout" || key == routing_key)
                })
                .map(|(_, queue, _)| queue.clone())
                .collect(),
        )
    }

    fn declared(&mut self, name: &str) {
        *self.declarations.entry(name.to_string()).or_default() += 1;
    }
}

/// A broker listening on an ephemeral localhost port.
#[derive(Clone)]
pub struct FakeBroker {
    addr: SocketAddr,
    state: Arc<Mutex<State>>,
}

impl FakeBroker {
    pub fn start() -> FakeBroker {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let state = Arc::new(Mutex::new(State::default()));
        let accept_state = state.clone();
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { continue };
                let state = accept_state.clone();
                {
                    let mut state = state.lock();
                    state.accepted += 1;
                    if let Ok(clone) = stream.try_clone() {
                        state.sockets.push(clone);
                    }
                }
                thread::spawn(move || {
                    let mut peer = Peer::new(stream, state);
                    if let Err(err) = peer.serve() {
                        tracing::debug!(%err, "fake broker connection ended");
                    }
                    peer.requeue_unacked();
                });
            }
        });
        FakeBroker { addr, state }
    }

    pub fn uri(&self) -> String {
        format!("amqp://guest:guest@{}/%2f", self.addr)
    }

    /// How many TCP connections were accepted so far.
    pub fn accepted(&self) -> usize {
        self.state.lock().accepted
    }

    /// How many times an exchange or queue of that name was declared.
    pub fn declarations(&self, name: &str) -> usize {
        self.state.lock().declarations.get(name).copied().unwrap_or(0)
    }

    pub fn queue_len(&self, name: &str) -> Option<usize> {
        self.state.lock().queues.get(name).map(VecDeque::len)
    }

    pub fn has_binding(&self, exchange: &str, queue: &str) -> bool {
        self.state
            .lock()
            .bindings
            .iter()
            .any(|(source, destination, _)| source == exchange && destination == queue)
    }

    /// Cut every live socket. With `forget`, all exchanges, queues and bindings vanish too,
    /// like a restarted node without durable entities.
    pub fn sever(&self, forget: bool) {
        let mut state = self.state.lock();
        for socket in state.sockets.drain(..) {
            let _ = socket.shutdown(Shutdown::Both);
        }
        if forget {
            state.exchanges.clear();
            state.queues.clear();
            state.bindings.clear();
        }
    }
}

struct Subscription {
    tag: ShortString,
    queue: String,
    no_ack: bool,
}

struct PendingPublish {
    publish: basic::Publish,
    properties: BasicProperties,
    body_size: u64,
    body: Vec<u8>,
}

#[derive(Default)]
struct Channel {
    confirm: bool,
    published: u64,
    next_tag: u64,
    unacked: BTreeMap<u64, (String, Message)>,
    subscriptions: Vec<Subscription>,
    pending: Option<PendingPublish>,
}

impl Channel {
    fn next_tag(&mut self) -> u64 {
        self.next_tag += 1;
        self.next_tag
    }
}

struct Peer {
    stream: TcpStream,
    state: Arc<Mutex<State>>,
    buffer: BytesMut,
    channels: HashMap<ChannelId, Channel>,
    consumer_tags: u32,
}

impl Peer {
    fn new(stream: TcpStream, state: Arc<Mutex<State>>) -> Self {
        Self {
            stream,
            state,
            buffer: BytesMut::new(),
            channels: HashMap::new(),
            consumer_tags: 0,
        }
    }

    fn serve(&mut self) -> io::Result<()> {
        self.handshake()?;
        self.stream.set_read_timeout(Some(POLL))?;
        loop {
            while let Some(frame) = self.try_next_frame()? {
                if !self.handle(frame)? {
                    return Ok(());
                }
            }
            self.dispatch()?;
            self.fill()?;
        }
    }

    fn handshake(&mut self) -> io::Result<()> {
        match self.next_frame()? {
            AMQPFrame::ProtocolHeader(_) => {}
            frame => return Err(unexpected(frame)),
        }
        self.send(&[AMQPFrame::Method(
            0,
            AMQPClass::Connection(connection::AMQPMethod::Start(connection::Start {
                version_major: 0,
                version_minor: 9,
                server_properties: FieldTable::default(),
                mechanisms: "PLAIN AMQPLAIN".into(),
                locales: "en_US".into(),
            })),
        )])?;
        match self.next_frame()? {
            AMQPFrame::Method(0, AMQPClass::Connection(connection::AMQPMethod::StartOk(_))) => {}
            frame => return Err(unexpected(frame)),
        }
        self.send(&[AMQPFrame::Method(
            0,
            AMQPClass::Connection(connection::AMQPMethod::Tune(connection::Tune {
                channel_max: 2047,
                frame_max: 131_072,
                heartbeat: 0,
            })),
        )])?;
        match self.next_frame()? {
            AMQPFrame::Method(0, AMQPClass::Connection(connection::AMQPMethod::TuneOk(_))) => {}
            frame => return Err(unexpected(frame)),
        }
        match self.next_frame()? {
            AMQPFrame::Method(0, AMQPClass::Connection(connection::AMQPMethod::Open(_))) => {}
            frame => return Err(unexpected(frame)),
        }
        self.send(&[AMQPFrame::Method(
            0,
            AMQPClass::Connection(connection::AMQPMethod::OpenOk(connection::OpenOk {})),
        )])
    }

    /// Block until a whole frame is available.
    fn next_frame(&mut self) -> io::Result<AMQPFrame> {
        loop {
            if let Some(frame) = self.try_next_frame()? {
                return Ok(frame);
            }
            self.fill()?;
        }
    }

    fn try_next_frame(&mut self) -> io::Result<Option<AMQPFrame>> {
        match decode_frame(&self.buffer) {
            Ok((frame, used)) => {
                let _ = self.buffer.split_to(used);
                Ok(Some(frame))
            }
            Err(ParserError::ShortFrame { .. }) => Ok(None),
            Err(err) => Err(io::Error::new(io::ErrorKind::InvalidData, err)),
        }
    }

    fn fill(&mut self) -> io::Result<()> {
        let mut chunk = [0; 4096];
        match self.stream.read(&mut chunk) {
            Ok(0) => Err(io::ErrorKind::UnexpectedEof.into()),
            Ok(read) => {
                self.buffer.extend_from_slice(&chunk[..read]);
                Ok(())
            }
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                ) =>
            {
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    fn send(&mut self, frames: &[AMQPFrame]) -> io::Result<()> {
        let mut buf = BytesMut::new();
        for frame in frames {
            gen_frame(&mut buf, frame).map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        }
        self.stream.write_all(&buf)
    }

    fn reply(&mut self, id: ChannelId, method: AMQPClass) -> io::Result<()> {
        self.send(&[AMQPFrame::Method(id, method)])
    }

    fn send_content(
        &mut self,
        id: ChannelId,
        method: AMQPClass,
        message: &Message,
    ) -> io::Result<()> {
        let mut frames = vec![
            AMQPFrame::Method(id, method),
            AMQPFrame::Header(
                id,
                Box::new(AMQPContentHeader {
                    class_id: basic::CLASS_ID,
                    weight: 0,
                    body_size: message.body.len() as u64,
                    properties: message.properties.clone(),
                }),
            ),
        ];
        if !message.body.is_empty() {
            frames.push(AMQPFrame::Body(id, message.body.clone()));
        }
        self.send(&frames)
    }

    /// Close a channel on a soft error, the way a broker does.
    fn close_channel(&mut self, id: ChannelId, reply_code: u16, text: String, request: &AMQPClass) -> io::Result<()> {
        self.drop_channel(id);
        self.reply(
            id,
            AMQPClass::Channel(channel::AMQPMethod::Close(channel::Close {
                reply_code,
                reply_text: text.into(),
                class_id: request.get_amqp_class_id(),
                method_id: request.get_amqp_method_id(),
            })),
        )
    }

    fn drop_channel(&mut self, id: ChannelId) {
        if let Some(channel) = self.channels.remove(&id) {
            let mut state = self.state.lock();
            for (_, (queue, mut message)) in channel.unacked.into_iter().rev() {
                message.redelivered = true;
                if let Some(messages) = state.queues.get_mut(&queue) {
                    messages.push_front(message);
                }
            }
        }
    }

    fn requeue_unacked(&mut self) {
        let ids = self.channels.keys().copied().collect::<Vec<_>>();
        for id in ids {
            self.drop_channel(id);
        }
    }

    /// Returns `false` once the connection is closed.
    fn handle(&mut self, frame: AMQPFrame) -> io::Result<bool> {
        match frame {
            AMQPFrame::Method(0, AMQPClass::Connection(connection::AMQPMethod::Close(_))) => {
                self.reply(
                    0,
                    AMQPClass::Connection(connection::AMQPMethod::CloseOk(connection::CloseOk {})),
                )?;
                return Ok(false);
            }
            AMQPFrame::Method(_, AMQPClass::Connection(_)) | AMQPFrame::Heartbeat(_) => {}
            AMQPFrame::Method(id, method) => self.handle_method(id, method)?,
            AMQPFrame::Header(id, header) => {
                if let Some(pending) = self.channels.get_mut(&id).and_then(|c| c.pending.as_mut()) {
                    pending.body_size = header.body_size;
                    pending.properties = header.properties;
                }
                self.complete_publish(id)?;
            }
            AMQPFrame::Body(id, body) => {
                if let Some(pending) = self.channels.get_mut(&id).and_then(|c| c.pending.as_mut()) {
                    pending.body.extend(body);
                }
                self.complete_publish(id)?;
            }
            frame => return Err(unexpected(frame)),
        }
        Ok(true)
    }

    fn handle_method(&mut self, id: ChannelId, method: AMQPClass) -> io::Result<()> {
        if let AMQPClass::Channel(channel::AMQPMethod::Open(_)) = method {
            self.channels.insert(id, Channel::default());
            return self.reply(id, AMQPClass::Channel(channel::AMQPMethod::OpenOk(channel::OpenOk {})));
        }
        if !self.channels.contains_key(&id) {
            // a close-ok for a channel we closed, or traffic racing it
            return Ok(());
        }
        let request = method.clone();
        match method {
            AMQPClass::Channel(channel::AMQPMethod::Close(_)) => {
                self.drop_channel(id);
                self.reply(id, AMQPClass::Channel(channel::AMQPMethod::CloseOk(channel::CloseOk {})))
            }
            AMQPClass::Channel(channel::AMQPMethod::Flow(flow)) => self.reply(
                id,
                AMQPClass::Channel(channel::AMQPMethod::FlowOk(channel::FlowOk { active: flow.active })),
            ),
            AMQPClass::Exchange(exchange::AMQPMethod::Declare(declare)) => {
                let name = declare.exchange.to_string();
                {
                    let mut state = self.state.lock();
                    if declare.passive {
                        if !state.exchanges.contains_key(&name) {
                            drop(state);
                            return self.close_channel(id, NOT_FOUND, format!("NOT_FOUND - no exchange '{}'", name), &request);
                        }
                    } else {
                        state.declared(&name);
                        state.exchanges.insert(name, declare.kind.to_string());
                    }
                }
                if declare.nowait {
                    return Ok(());
                }
                self.reply(id, AMQPClass::Exchange(exchange::AMQPMethod::DeclareOk(exchange::DeclareOk {})))
            }
            AMQPClass::Exchange(exchange::AMQPMethod::Delete(delete)) => {
                {
                    let mut state = self.state.lock();
                    state.exchanges.remove(delete.exchange.as_str());
                    state.bindings.retain(|(source, _, _)| source != delete.exchange.as_str());
                }
                if delete.nowait {
                    return Ok(());
                }
                self.reply(id, AMQPClass::Exchange(exchange::AMQPMethod::DeleteOk(exchange::DeleteOk {})))
            }
            AMQPClass::Exchange(exchange::AMQPMethod::Bind(bind)) => {
                if bind.nowait {
                    return Ok(());
                }
                self.reply(id, AMQPClass::Exchange(exchange::AMQPMethod::BindOk(exchange::BindOk {})))
            }
            AMQPClass::Exchange(exchange::AMQPMethod::Unbind(unbind)) => {
                if unbind.nowait {
                    return Ok(());
                }
                self.reply(id, AMQPClass::Exchange(exchange::AMQPMethod::UnbindOk(exchange::UnbindOk {})))
            }
            AMQPClass::Queue(queue::AMQPMethod::Declare(declare)) => {
                let (name, message_count) = {
                    let mut state = self.state.lock();
                    let name = if declare.queue.as_str().is_empty() {
                        state.generated += 1;
                        format!("amq.gen-{}", state.generated)
                    } else {
                        declare.queue.to_string()
                    };
                    if declare.passive && !state.queues.contains_key(&name) {
                        drop(state);
                        return self.close_channel(id, NOT_FOUND, format!("NOT_FOUND - no queue '{}'", name), &request);
                    }
                    if !declare.passive {
                        state.declared(&name);
                    }
                    let count = state.queues.entry(name.clone()).or_default().len();
                    (name, count as u32)
                };
                if declare.nowait {
                    return Ok(());
                }
                self.reply(
                    id,
                    AMQPClass::Queue(queue::AMQPMethod::DeclareOk(queue::DeclareOk {
                        queue: name.into(),
                        message_count,
                        consumer_count: 0,
                    })),
                )
            }
            AMQPClass::Queue(queue::AMQPMethod::Bind(bind)) => {
                {
                    let mut state = self.state.lock();
                    if !state.exchanges.contains_key(bind.exchange.as_str()) {
                        drop(state);
                        return self.close_channel(id, NOT_FOUND, format!("NOT_FOUND - no exchange '{}'", bind.exchange), &request);
                    }
                    let binding = (
                        bind.exchange.to_string(),
                        bind.queue.to_string(),
                        bind.routing_key.to_string(),
                    );
                    if !state.bindings.contains(&binding) {
                        state.bindings.push(binding);
                    }
                }
                if bind.nowait {
                    return Ok(());
                }
                self.reply(id, AMQPClass::Queue(queue::AMQPMethod::BindOk(queue::BindOk {})))
            }
            AMQPClass::Queue(queue::AMQPMethod::Unbind(unbind)) => {
                self.state.lock().bindings.retain(|(source, destination, key)| {
                    !(source == unbind.exchange.as_str()
                        && destination == unbind.queue.as_str()
                        && key == unbind.routing_key.as_str())
                });
                self.reply(id, AMQPClass::Queue(queue::AMQPMethod::UnbindOk(queue::UnbindOk {})))
            }
            AMQPClass::Queue(queue::AMQPMethod::Purge(purge)) => {
                let message_count = self
                    .state
                    .lock()
                    .queues
                    .get_mut(purge.queue.as_str())
                    .map_or(0, |messages| messages.drain(..).count() as u32);
                self.reply(id, AMQPClass::Queue(queue::AMQPMethod::PurgeOk(queue::PurgeOk { message_count })))
            }
            AMQPClass::Queue(queue::AMQPMethod::Delete(delete)) => {
                let message_count = {
                    let mut state = self.state.lock();
                    state.bindings.retain(|(_, destination, _)| destination != delete.queue.as_str());
                    state
                        .queues
                        .remove(delete.queue.as_str())
                        .map_or(0, |messages| messages.len() as u32)
                };
                self.reply(id, AMQPClass::Queue(queue::AMQPMethod::DeleteOk(queue::DeleteOk { message_count })))
            }
            AMQPClass::Basic(basic::AMQPMethod::Qos(_)) => {
                self.reply(id, AMQPClass::Basic(basic::AMQPMethod::QosOk(basic::QosOk {})))
            }
            AMQPClass::Confirm(confirm::AMQPMethod::Select(select)) => {
                if let Some(channel) = self.channels.get_mut(&id) {
                    channel.confirm = true;
                }
                if select.nowait {
                    return Ok(());
                }
                self.reply(id, AMQPClass::Confirm(confirm::AMQPMethod::SelectOk(confirm::SelectOk {})))
            }
            AMQPClass::Basic(basic::AMQPMethod::Publish(publish)) => {
                if let Some(channel) = self.channels.get_mut(&id) {
                    channel.pending = Some(PendingPublish {
                        publish,
                        properties: BasicProperties::default(),
                        body_size: u64::MAX,
                        body: Vec::new(),
                    });
                }
                Ok(())
            }
            AMQPClass::Basic(basic::AMQPMethod::Get(get)) => {
                let popped = {
                    let mut state = self.state.lock();
                    match state.queues.get_mut(get.queue.as_str()) {
                        None => None,
                        Some(messages) => Some(messages.pop_front().map(|m| (m, messages.len() as u32))),
                    }
                };
                match popped {
                    None => self.close_channel(id, NOT_FOUND, format!("NOT_FOUND - no queue '{}'", get.queue), &request),
                    Some(None) => self.reply(id, AMQPClass::Basic(basic::AMQPMethod::GetEmpty(basic::GetEmpty {}))),
                    Some(Some((message, message_count))) => {
                        let Some(channel) = self.channels.get_mut(&id) else { return Ok(()) };
                        let delivery_tag = channel.next_tag();
                        if !get.no_ack {
                            channel.unacked.insert(delivery_tag, (get.queue.to_string(), message.clone()));
                        }
                        let get_ok = AMQPClass::Basic(basic::AMQPMethod::GetOk(basic::GetOk {
                            delivery_tag,
                            redelivered: message.redelivered,
                            exchange: message.exchange.clone(),
                            routing_key: message.routing_key.clone(),
                            message_count,
                        }));
                        self.send_content(id, get_ok, &message)
                    }
                }
            }
            AMQPClass::Basic(basic::AMQPMethod::Consume(consume)) => {
                if !self.state.lock().queues.contains_key(consume.queue.as_str()) {
                    return self.close_channel(id, NOT_FOUND, format!("NOT_FOUND - no queue '{}'", consume.queue), &request);
                }
                let tag = if consume.consumer_tag.as_str().is_empty() {
                    self.consumer_tags += 1;
                    ShortString::from(format!("amq.ctag-{}", self.consumer_tags))
                } else {
                    consume.consumer_tag.clone()
                };
                if let Some(channel) = self.channels.get_mut(&id) {
                    channel.subscriptions.push(Subscription {
                        tag: tag.clone(),
                        queue: consume.queue.to_string(),
                        no_ack: consume.no_ack,
                    });
                }
                if consume.nowait {
                    return Ok(());
                }
                self.reply(id, AMQPClass::Basic(basic::AMQPMethod::ConsumeOk(basic::ConsumeOk { consumer_tag: tag })))
            }
            AMQPClass::Basic(basic::AMQPMethod::Cancel(cancel)) => {
                if let Some(channel) = self.channels.get_mut(&id) {
                    channel.subscriptions.retain(|sub| sub.tag != cancel.consumer_tag);
                }
                if cancel.nowait {
                    return Ok(());
                }
                self.reply(
                    id,
                    AMQPClass::Basic(basic::AMQPMethod::CancelOk(basic::CancelOk {
                        consumer_tag: cancel.consumer_tag,
                    })),
                )
            }
            AMQPClass::Basic(basic::AMQPMethod::Ack(ack)) => {
                if self.settle(id, ack.delivery_tag, ack.multiple, None) {
                    Ok(())
                } else {
                    self.close_channel(id, PRECONDITION_FAILED, format!("PRECONDITION_FAILED - unknown delivery tag {}", ack.delivery_tag), &request)
                }
            }
            AMQPClass::Basic(basic::AMQPMethod::Nack(nack)) => {
                if self.settle(id, nack.delivery_tag, nack.multiple, Some(nack.requeue)) {
                    Ok(())
                } else {
                    self.close_channel(id, PRECONDITION_FAILED, format!("PRECONDITION_FAILED - unknown delivery tag {}", nack.delivery_tag), &request)
                }
            }
            AMQPClass::Basic(basic::AMQPMethod::Reject(reject)) => {
                if self.settle(id, reject.delivery_tag, false, Some(reject.requeue)) {
                    Ok(())
                } else {
                    self.close_channel(id, PRECONDITION_FAILED, format!("PRECONDITION_FAILED - unknown delivery tag {}", reject.delivery_tag), &request)
                }
            }
            AMQPClass::Basic(basic::AMQPMethod::Recover(_)) => {
                let last = self.channels.get(&id).and_then(|c| c.unacked.keys().next_back().copied());
                if let Some(last) = last {
                    self.settle(id, last, true, Some(true));
                }
                self.reply(id, AMQPClass::Basic(basic::AMQPMethod::RecoverOk(basic::RecoverOk {})))
            }
            AMQPClass::Basic(basic::AMQPMethod::RecoverAsync(_)) => {
                let last = self.channels.get(&id).and_then(|c| c.unacked.keys().next_back().copied());
                if let Some(last) = last {
                    self.settle(id, last, true, Some(true));
                }
                Ok(())
            }
            method => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("fake broker does not handle {}", method),
            )),
        }
    }

    /// Ack (`requeue == None`), or nack and maybe requeue, up to `delivery_tag`.
    fn settle(&mut self, id: ChannelId, delivery_tag: u64, multiple: bool, requeue: Option<bool>) -> bool {
        let Some(channel) = self.channels.get_mut(&id) else {
            return true;
        };
        let tags = if multiple {
            channel.unacked.range(..=delivery_tag).map(|(tag, _)| *tag).collect::<Vec<_>>()
        } else if channel.unacked.contains_key(&delivery_tag) {
            vec![delivery_tag]
        } else {
            Vec::new()
        };
        if tags.is_empty() {
            return multiple;
        }
        let mut settled = tags
            .into_iter()
            .filter_map(|tag| channel.unacked.remove(&tag))
            .collect::<Vec<_>>();
        if requeue == Some(true) {
            let mut state = self.state.lock();
            while let Some((queue, mut message)) = settled.pop() {
                message.redelivered = true;
                if let Some(messages) = state.queues.get_mut(&queue) {
                    messages.push_front(message);
                }
            }
        }
        true
    }

    fn complete_publish(&mut self, id: ChannelId) -> io::Result<()> {
        let Some(channel) = self.channels.get_mut(&id) else {
            return Ok(());
        };
        let complete = channel
            .pending
            .as_ref()
            .map_or(false, |pending| pending.body.len() as u64 >= pending.body_size);
        if !complete {
            return Ok(());
        }
        let Some(pending) = channel.pending.take() else {
            return Ok(());
        };
        let confirm = channel.confirm;
        if confirm {
            channel.published += 1;
        }
        let published = channel.published;
        let message = Message {
            exchange: pending.publish.exchange.clone(),
            routing_key: pending.publish.routing_key.clone(),
            properties: pending.properties,
            body: pending.body,
            redelivered: false,
        };
        let routed = {
            let mut state = self.state.lock();
            match state.route(pending.publish.exchange.as_str(), pending.publish.routing_key.as_str()) {
                Some(queues) => {
                    for queue in &queues {
                        if let Some(messages) = state.queues.get_mut(queue) {
                            messages.push_back(message.clone());
                        }
                    }
                    Some(!queues.is_empty())
                }
                None => None,
            }
        };
        let request = AMQPClass::Basic(basic::AMQPMethod::Publish(pending.publish.clone()));
        match routed {
            None => {
                return self.close_channel(
                    id,
                    NOT_FOUND,
                    format!("NOT_FOUND - no exchange '{}'", pending.publish.exchange),
                    &request,
                )
            }
            Some(false) if pending.publish.mandatory => {
                let ret = AMQPClass::Basic(basic::AMQPMethod::Return(basic::Return {
                    reply_code: NO_ROUTE,
                    reply_text: "NO_ROUTE".into(),
                    exchange: message.exchange.clone(),
                    routing_key: message.routing_key.clone(),
                }));
                self.send_content(id, ret, &message)?;
            }
            Some(_) => {}
        }
        if confirm {
            self.reply(
                id,
                AMQPClass::Basic(basic::AMQPMethod::Ack(basic::Ack {
                    delivery_tag: published,
                    multiple: false,
                })),
            )?;
        }
        Ok(())
    }

    /// Push whatever is queued to this connection's consumers.
    fn dispatch(&mut self) -> io::Result<()> {
        let mut deliveries = Vec::new();
        {
            let mut state = self.state.lock();
            let mut ids = self.channels.keys().copied().collect::<Vec<_>>();
            ids.sort_unstable();
            for id in ids {
                let Some(channel) = self.channels.get_mut(&id) else { continue };
                for index in 0..channel.subscriptions.len() {
                    let (queue, no_ack, tag) = {
                        let sub = &channel.subscriptions[index];
                        (sub.queue.clone(), sub.no_ack, sub.tag.clone())
                    };
                    let Some(messages) = state.queues.get_mut(&queue) else { continue };
                    while let Some(message) = messages.pop_front() {
                        let delivery_tag = channel.next_tag();
                        if !no_ack {
                            channel.unacked.insert(delivery_tag, (queue.clone(), message.clone()));
                        }
                        deliveries.push((id, tag.clone(), delivery_tag, message));
                    }
                }
            }
        }
        for (id, consumer_tag, delivery_tag, message) in deliveries {
            let deliver = AMQPClass::Basic(basic::AMQPMethod::Deliver(basic::Deliver {
                consumer_tag,
                delivery_tag,
                redelivered: message.redelivered,
                exchange: message.exchange.clone(),
                routing_key: message.routing_key.clone(),
            }));
            self.send_content(id, deliver, &message)?;
        }
        Ok(())
    }
}

fn unexpected(frame: AMQPFrame) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, format!("unexpected frame {}", frame))
}

use crate::{
    acker::Acker,
    acknowledgement::Acknowledgements,
    channel_receiver_state::{ChannelReceiverStates, DeliveryCause, PendingContent},
    channel_status::{ChannelState, ChannelStatus},
    configuration::Configuration,
    connection_status::{ConnectionState, ConnectionStatus},
    consumer::Consumer,
    consumers::Consumers,
    continuation::{Continuation, ContinuationQueue, Reply, ReplyTarget},
    format::{content::AMQPContentHeader, frame::AMQPFrame},
    frames::FrameSender,
    message::{BasicGetMessage, BasicReturnMessage, Delivery},
    options::BasicRejectOptions,
    promise::Promise,
    protocol::{basic, channel, connection, constants::FRAME_OVERHEAD, AMQPClass, AMQPError},
    registry::Registry,
    returned_messages::ReturnedMessages,
    session_manager::SessionRemover,
    topology::QosDefinition,
    types::{ChannelId, PayloadSize},
    BasicProperties, Error, Result,
};
use parking_lot::Mutex;
use std::{fmt, sync::Arc, time::Duration};
use tracing::{debug, error, info, trace, warn};

/// What every session of a connection shares.
#[derive(Clone)]
pub(crate) struct SessionContext {
    pub(crate) configuration: Configuration,
    pub(crate) connection_status: ConnectionStatus,
    pub(crate) frames: FrameSender,
    pub(crate) registry: Registry,
    pub(crate) remover: SessionRemover,
    pub(crate) rpc_timeout: Option<Duration>,
    pub(crate) close_timeout: Duration,
    pub(crate) auto_recover: bool,
}

/// A logical channel multiplexed on a connection.
///
/// Cloning a `Session` gives another handle on the same channel. At most one
/// synchronous call can be in flight on a session at any time.
#[derive(Clone)]
pub struct Session {
    id: ChannelId,
    status: ChannelStatus,
    context: SessionContext,
    continuation: ContinuationQueue,
    consumers: Consumers,
    acknowledgements: Acknowledgements,
    returned_messages: ReturnedMessages,
    receiver_state: ChannelReceiverStates,
    qos: Arc<Mutex<Option<QosDefinition>>>,
    publish_lock: Arc<Mutex<()>>,
}

impl Session {
    pub(crate) fn new(id: ChannelId, context: SessionContext) -> Self {
        let returned_messages = ReturnedMessages::default();
        Self {
            id,
            status: ChannelStatus::default(),
            context,
            continuation: ContinuationQueue::default(),
            consumers: Consumers::default(),
            acknowledgements: Acknowledgements::new(returned_messages.clone()),
            returned_messages,
            receiver_state: ChannelReceiverStates::default(),
            qos: Arc::default(),
            publish_lock: Arc::default(),
        }
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn status(&self) -> &ChannelStatus {
        &self.status
    }

    pub fn state(&self) -> ChannelState {
        self.status.state()
    }

    pub fn is_open(&self) -> bool {
        self.status.open()
    }

    pub fn configuration(&self) -> &Configuration {
        &self.context.configuration
    }

    pub(crate) fn registry(&self) -> &Registry {
        &self.context.registry
    }

    pub(crate) fn consumers(&self) -> &Consumers {
        &self.consumers
    }

    pub(crate) fn acknowledgements(&self) -> &Acknowledgements {
        &self.acknowledgements
    }

    pub(crate) fn returned_messages(&self) -> &ReturnedMessages {
        &self.returned_messages
    }

    pub(crate) fn qos(&self) -> Option<QosDefinition> {
        *self.qos.lock()
    }

    pub(crate) fn set_qos(&self, qos: QosDefinition) {
        *self.qos.lock() = Some(qos);
    }

    pub(crate) fn publish_lock(&self) -> &Mutex<()> {
        &self.publish_lock
    }

    pub(crate) fn close_timeout(&self) -> Duration {
        self.context.close_timeout
    }

    pub(crate) fn rpc_timeout(&self) -> Option<Duration> {
        self.context.rpc_timeout
    }

    pub(crate) fn interrupt_pending(&self, reason: Error) {
        self.continuation.interrupt(reason);
    }

    pub(crate) fn assert_open(&self) -> Result<()> {
        match self.status.state() {
            ChannelState::Open => Ok(()),
            state => Err(Error::InvalidChannelState(state)),
        }
    }

    pub(crate) fn send_method(&self, method: AMQPClass) -> Result<()> {
        self.context
            .frames
            .send_frame(AMQPFrame::Method(self.id, method))
    }

    /// Send a content-bearing method with its header and body, as a single batch.
    pub(crate) fn send_with_content(
        &self,
        method: AMQPClass,
        properties: BasicProperties,
        payload: &[u8],
    ) -> Result<()> {
        let class_id = method.get_amqp_class_id();
        let mut frames = vec![
            AMQPFrame::Method(self.id, method),
            AMQPFrame::Header(
                self.id,
                Box::new(AMQPContentHeader {
                    class_id,
                    weight: 0,
                    body_size: payload.len() as PayloadSize,
                    properties,
                }),
            ),
        ];
        let frame_max = self.context.configuration.frame_max() as usize;
        let chunk_size = if frame_max == 0 {
            payload.len().max(1)
        } else {
            frame_max.saturating_sub(FRAME_OVERHEAD).max(1)
        };
        frames.extend(
            payload
                .chunks(chunk_size)
                .map(|chunk| AMQPFrame::Body(self.id, chunk.to_vec())),
        );
        self.context.frames.send_frames(&frames)
    }

    /// Send `method` and block until its reply, an interruption or the rpc timeout.
    pub(crate) fn call(&self, method: AMQPClass) -> Result<Reply> {
        self.call_with(method, None, self.rpc_timeout())
    }

    pub(crate) fn call_with(
        &self,
        method: AMQPClass,
        consumer: Option<Consumer>,
        timeout: Option<Duration>,
    ) -> Result<Reply> {
        let (promise, resolver) = Promise::new();
        promise.set_marker(format!("channel {} {}", self.id, method));
        let mut continuation = Continuation::new(method.clone(), resolver);
        if let Some(consumer) = consumer {
            continuation = continuation.with_consumer(consumer);
        }
        let id = self.continuation.enqueue(continuation)?;
        if let Err(err) = self.send_method(method) {
            self.continuation.take_if_id(id);
            return Err(err);
        }
        match promise.wait(timeout) {
            Err(Error::RpcTimeout) => {
                if self.continuation.abandon(id) {
                    warn!(channel = self.id, "call timed out");
                    Err(Error::RpcTimeout)
                } else {
                    // the reply won the race against the timeout
                    promise.wait(timeout)
                }
            }
            res => res,
        }
    }

    pub(crate) fn handle_frame(&self, frame: AMQPFrame) -> Result<()> {
        match frame {
            AMQPFrame::Method(_, method) => self.receive_method(method),
            AMQPFrame::Header(_, header) => {
                let AMQPContentHeader {
                    class_id,
                    body_size,
                    properties,
                    ..
                } = *header;
                match self
                    .receiver_state
                    .receive_header(self.id, class_id, body_size, properties)?
                {
                    Some(pending) => self.content_complete(pending),
                    None => Ok(()),
                }
            }
            AMQPFrame::Body(_, payload) => {
                match self.receiver_state.receive_body(self.id, payload)? {
                    Some(pending) => self.content_complete(pending),
                    None => Ok(()),
                }
            }
            AMQPFrame::Heartbeat(_) => Ok(()),
            AMQPFrame::ProtocolHeader(version) => {
                error!(%version, "unexpected protocol header");
                Err(Error::InvalidFrameReceived)
            }
        }
    }

    fn receive_method(&self, method: AMQPClass) -> Result<()> {
        trace!(channel = self.id, %method, "received method");
        match method {
            AMQPClass::Connection(method) if self.id == 0 => self.receive_connection_method(method),
            AMQPClass::Channel(channel::AMQPMethod::Close(close)) => {
                self.receive_channel_close(close)
            }
            AMQPClass::Channel(channel::AMQPMethod::Flow(flow)) => {
                self.status.set_flow(flow.active);
                debug!(channel = self.id, active = flow.active, "flow control");
                self.send_method(AMQPClass::Channel(channel::AMQPMethod::FlowOk(
                    channel::FlowOk {
                        active: flow.active,
                    },
                )))
            }
            AMQPClass::Basic(basic::AMQPMethod::Deliver(deliver)) => {
                let no_ack = self
                    .consumers
                    .get(deliver.consumer_tag.as_str())
                    .map_or(false, |consumer| consumer.no_ack());
                let delivery = Delivery::new(
                    deliver.delivery_tag,
                    deliver.exchange,
                    deliver.routing_key,
                    deliver.redelivered,
                    self.acker(deliver.delivery_tag, no_ack),
                );
                self.receiver_state.set_will_receive(
                    self.id,
                    DeliveryCause::Consume(deliver.consumer_tag),
                    delivery,
                )
            }
            AMQPClass::Basic(basic::AMQPMethod::Return(ret)) => {
                let delivery =
                    Delivery::new(0, ret.exchange, ret.routing_key, false, Acker::default());
                self.receiver_state.set_will_receive(
                    self.id,
                    DeliveryCause::Return(ret.reply_code, ret.reply_text),
                    delivery,
                )
            }
            AMQPClass::Basic(basic::AMQPMethod::Ack(ack)) => {
                self.receive_confirmation(ack.delivery_tag, ack.multiple, true)
            }
            AMQPClass::Basic(basic::AMQPMethod::Nack(nack)) => {
                self.receive_confirmation(nack.delivery_tag, nack.multiple, false)
            }
            AMQPClass::Basic(basic::AMQPMethod::Cancel(cancel)) => {
                info!(channel = self.id, consumer_tag = %cancel.consumer_tag, "consumer canceled by the server");
                self.consumers.deregister(cancel.consumer_tag.as_str());
                self.context
                    .registry
                    .forget_consumer(cancel.consumer_tag.as_str());
                if cancel.nowait {
                    Ok(())
                } else {
                    self.send_method(AMQPClass::Basic(basic::AMQPMethod::CancelOk(
                        basic::CancelOk {
                            consumer_tag: cancel.consumer_tag,
                        },
                    )))
                }
            }
            method => self.receive_reply(method),
        }
    }

    fn receive_reply(&self, method: AMQPClass) -> Result<()> {
        let continuation = match self.continuation.next_for(&method) {
            ReplyTarget::Pending(continuation) => continuation,
            ReplyTarget::Abandoned(request) => {
                debug!(channel = self.id, %method, "late reply to a timed out call, dropping it");
                return self.drop_reply(method, Some(&request));
            }
            ReplyTarget::Unexpected => {
                warn!(channel = self.id, %method, "unexpected reply, dropping it");
                return self.drop_reply(method, None);
            }
        };
        match method {
            AMQPClass::Basic(basic::AMQPMethod::GetOk(get_ok)) => {
                let no_ack = match &continuation.request {
                    AMQPClass::Basic(basic::AMQPMethod::Get(get)) => get.no_ack,
                    _ => false,
                };
                let delivery = Delivery::new(
                    get_ok.delivery_tag,
                    get_ok.exchange,
                    get_ok.routing_key,
                    get_ok.redelivered,
                    self.acker(get_ok.delivery_tag, no_ack),
                );
                self.receiver_state.set_will_receive(
                    self.id,
                    DeliveryCause::Get(Some(continuation), get_ok.message_count),
                    delivery,
                )
            }
            AMQPClass::Basic(basic::AMQPMethod::ConsumeOk(consume_ok)) => {
                if let Some(consumer) = continuation.consumer.as_ref() {
                    consumer.set_tag(consume_ok.consumer_tag.clone());
                    self.consumers
                        .register(consume_ok.consumer_tag.clone(), consumer.clone());
                }
                continuation.resolve(AMQPClass::Basic(basic::AMQPMethod::ConsumeOk(consume_ok)));
                Ok(())
            }
            method => {
                continuation.resolve(method);
                Ok(())
            }
        }
    }

    /// A dropped `basic.get-ok` is still followed by its content, which must be
    /// consumed; the message goes back to the queue unless fetched in no-ack mode.
    fn drop_reply(&self, method: AMQPClass, request: Option<&AMQPClass>) -> Result<()> {
        let AMQPClass::Basic(basic::AMQPMethod::GetOk(get_ok)) = method else {
            return Ok(());
        };
        let no_ack = match request {
            Some(AMQPClass::Basic(basic::AMQPMethod::Get(get))) => get.no_ack,
            _ => false,
        };
        let delivery = Delivery::new(
            get_ok.delivery_tag,
            get_ok.exchange,
            get_ok.routing_key,
            get_ok.redelivered,
            self.acker(get_ok.delivery_tag, no_ack),
        );
        self.receiver_state.set_will_receive(
            self.id,
            DeliveryCause::Get(None, get_ok.message_count),
            delivery,
        )
    }

    fn receive_confirmation(&self, delivery_tag: u64, multiple: bool, ack: bool) -> Result<()> {
        if !self.status.confirm() {
            warn!(channel = self.id, delivery_tag, "confirmation received outside of confirm mode");
            return Ok(());
        }
        let res = if ack {
            self.acknowledgements.ack(delivery_tag, multiple)
        } else {
            self.acknowledgements.nack(delivery_tag, multiple)
        };
        if let Err(err) = res {
            warn!(channel = self.id, delivery_tag, %err, "invalid confirmation");
        }
        Ok(())
    }

    fn content_complete(&self, pending: PendingContent) -> Result<()> {
        let PendingContent { cause, delivery } = pending;
        match cause {
            DeliveryCause::Consume(consumer_tag) => {
                self.consumers.deliver(consumer_tag.as_str(), delivery);
            }
            DeliveryCause::Get(Some(continuation), message_count) => {
                let get_ok = basic::GetOk {
                    delivery_tag: delivery.delivery_tag,
                    redelivered: delivery.redelivered,
                    exchange: delivery.exchange.clone(),
                    routing_key: delivery.routing_key.clone(),
                    message_count,
                };
                continuation.resolve_with_message(
                    AMQPClass::Basic(basic::AMQPMethod::GetOk(get_ok)),
                    BasicGetMessage {
                        delivery,
                        message_count,
                    },
                );
            }
            DeliveryCause::Get(None, _) => {
                warn!(channel = self.id, "dropping a message nobody waits for anymore");
                if !delivery.acker.used() {
                    if let Err(err) = delivery.acker.reject(BasicRejectOptions { requeue: true }) {
                        warn!(channel = self.id, %err, "failed to requeue a dropped message");
                    }
                }
            }
            DeliveryCause::Return(reply_code, reply_text) => {
                let message = BasicReturnMessage::new(delivery, reply_code, reply_text);
                self.returned_messages
                    .new_returned_message(message, self.status.confirm());
            }
        }
        Ok(())
    }

    fn receive_channel_close(&self, close: channel::Close) -> Result<()> {
        let error = AMQPError::from_id(close.reply_code, close.reply_text.clone())
            .map(Error::ProtocolError)
            .unwrap_or(Error::InvalidChannelState(ChannelState::Closed));
        info!(
            channel = self.id,
            reply_code = close.reply_code,
            reply_text = %close.reply_text,
            "channel closed by the server"
        );
        let res = self.send_method(AMQPClass::Channel(channel::AMQPMethod::CloseOk(
            channel::CloseOk {},
        )));
        self.terminate(ChannelState::Closed, error, false);
        res
    }

    fn receive_connection_method(&self, method: connection::AMQPMethod) -> Result<()> {
        match method {
            connection::AMQPMethod::Close(close) => {
                info!(
                    reply_code = close.reply_code,
                    reply_text = %close.reply_text,
                    "connection closed by the server"
                );
                self.send_method(AMQPClass::Connection(connection::AMQPMethod::CloseOk(
                    connection::CloseOk {},
                )))?;
                Err(AMQPError::from_id(close.reply_code, close.reply_text)
                    .map(Error::ProtocolError)
                    .unwrap_or(Error::InvalidConnectionState(ConnectionState::Closed)))
            }
            connection::AMQPMethod::Blocked(blocked) => {
                warn!(reason = %blocked.reason, "connection blocked by the server");
                self.context.connection_status.block(blocked.reason);
                Ok(())
            }
            connection::AMQPMethod::Unblocked(_) => {
                info!("connection unblocked");
                self.context.connection_status.unblock();
                Ok(())
            }
            method => self.receive_reply(AMQPClass::Connection(method)),
        }
    }

    fn acker(&self, delivery_tag: u64, no_ack: bool) -> Acker {
        Acker::new(
            self.id,
            delivery_tag,
            self.context.frames.clone(),
            self.status.clone(),
            no_ack,
        )
    }

    /// Tear the session down after a close, interrupting whatever waits on it.
    ///
    /// Consumers are kept in the ledger only when `keep_consumers` is set and
    /// recovery is enabled: they will then be subscribed again elsewhere.
    pub(crate) fn terminate(&self, state: ChannelState, reason: Error, keep_consumers: bool) {
        self.status.set_state(state);
        self.continuation.interrupt(reason.clone());
        if let Some(PendingContent {
            cause: DeliveryCause::Get(Some(continuation), _),
            ..
        }) = self.receiver_state.reset()
        {
            continuation.reject(Error::interrupted(reason.clone()));
        }
        self.acknowledgements
            .reject_all(Error::interrupted(reason.clone()));
        if keep_consumers && self.context.auto_recover {
            self.consumers.detach();
        } else {
            for tag in self.consumers.tags() {
                self.context.registry.forget_consumer(tag.as_str());
            }
            if state == ChannelState::Error {
                self.consumers.error(reason);
            } else {
                self.consumers.cancel();
            }
        }
        self.context.remover.remove(self.id);
    }

    /// The connection is gone: fail everything pending on this session.
    pub(crate) fn set_connection_error(&self, error: Error) {
        if self.status.state().is_terminal() {
            return;
        }
        debug!(channel = self.id, %error, "connection error, failing session");
        self.terminate(ChannelState::Error, error, true);
    }

    /// The connection was closed on purpose.
    pub(crate) fn set_connection_closed(&self, reason: Error) {
        if self.status.state().is_terminal() {
            return;
        }
        self.terminate(ChannelState::Closed, reason, false);
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("status", &self.status)
            .field("continuation", &self.continuation)
            .field("consumers", &self.consumers)
            .field("acknowledgements", &self.acknowledgements)
            .finish_non_exhaustive()
    }
}

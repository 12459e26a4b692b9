//! The protocol operations available on a [`Session`].
//!
//! The public operations record what they declare in the recovery ledger; the
//! `do_*` ones only talk to the server and are what recovery replays.

use crate::{
    channel_status::ChannelState,
    consumer::Consumer,
    exchange::ExchangeKind,
    message::{BasicGetMessage, BasicReturnMessage},
    options::*,
    protocol::{basic, channel, confirm, exchange, queue, AMQPClass},
    publisher_confirm::PublisherConfirm,
    queue::Queue,
    session::Session,
    topology::{
        BindingDefinition, BindingDestination, ConsumerDefinition, ExchangeDefinition,
        QosDefinition, QueueDefinition,
    },
    types::{
        DeliveryTag, FieldTable, LongUInt, MessageCount, ReplyCode, ShortString, ShortUInt,
    },
    BasicProperties, Error, Result,
};
use tracing::{debug, trace};

macro_rules! expect_reply {
    ($reply:expr, $pattern:pat => $value:expr) => {
        match $reply.method {
            $pattern => Ok($value),
            method => {
                tracing::error!(%method, "unexpected reply");
                Err(Error::UnexpectedReply)
            }
        }
    };
}

impl Session {
    pub(crate) fn open(&self) -> Result<()> {
        let res = self
            .call(AMQPClass::Channel(channel::AMQPMethod::Open(channel::Open {})))
            .and_then(|reply| {
                expect_reply!(reply, AMQPClass::Channel(channel::AMQPMethod::OpenOk(_)) => ())
            });
        match res {
            Ok(()) => {
                self.status().transition(ChannelState::Open);
                debug!(channel = self.id(), "session opened");
                Ok(())
            }
            Err(err) => {
                self.terminate(ChannelState::Closed, err.clone(), false);
                Err(err)
            }
        }
    }

    /// Close the session, interrupting a call still in flight on it.
    ///
    /// Waits for the server acknowledgement at most for the connection's close timeout.
    pub fn close(&self, reply_code: ReplyCode, reply_text: &str) -> Result<()> {
        self.assert_open()?;
        self.status().set_state(ChannelState::Closing);
        self.interrupt_pending(Error::InvalidChannelState(ChannelState::Closing));
        let res = self
            .call_with(
                AMQPClass::Channel(channel::AMQPMethod::Close(channel::Close {
                    reply_code,
                    reply_text: reply_text.into(),
                    class_id: 0,
                    method_id: 0,
                })),
                None,
                Some(self.close_timeout()),
            )
            .map(|_| ());
        self.terminate(
            ChannelState::Closed,
            Error::InvalidChannelState(ChannelState::Closed),
            false,
        );
        res
    }

    /// Ask the server to pause (`false`) or resume (`true`) deliveries.
    pub fn channel_flow(&self, active: bool) -> Result<bool> {
        self.assert_open()?;
        let reply = self.call(AMQPClass::Channel(channel::AMQPMethod::Flow(
            channel::Flow { active },
        )))?;
        expect_reply!(reply, AMQPClass::Channel(channel::AMQPMethod::FlowOk(ok)) => ok.active)
    }

    pub fn exchange_declare(
        &self,
        exchange: &str,
        kind: ExchangeKind,
        options: ExchangeDeclareOptions,
        arguments: FieldTable,
    ) -> Result<()> {
        self.do_exchange_declare(exchange, kind.clone(), options, arguments.clone())?;
        if !options.passive {
            self.registry().record_exchange(ExchangeDefinition {
                name: exchange.into(),
                kind,
                options,
                arguments,
            });
        }
        Ok(())
    }

    pub(crate) fn do_exchange_declare(
        &self,
        exchange: &str,
        kind: ExchangeKind,
        options: ExchangeDeclareOptions,
        arguments: FieldTable,
    ) -> Result<()> {
        self.assert_open()?;
        let method = AMQPClass::Exchange(exchange::AMQPMethod::Declare(exchange::Declare {
            exchange: exchange.into(),
            kind: kind.kind().into(),
            passive: options.passive,
            durable: options.durable,
            auto_delete: options.auto_delete,
            internal: options.internal,
            nowait: options.nowait,
            arguments,
        }));
        if options.nowait {
            return self.send_method(method);
        }
        let reply = self.call(method)?;
        expect_reply!(reply, AMQPClass::Exchange(exchange::AMQPMethod::DeclareOk(_)) => ())
    }

    pub fn exchange_delete(&self, exchange: &str, options: ExchangeDeleteOptions) -> Result<()> {
        self.assert_open()?;
        let method = AMQPClass::Exchange(exchange::AMQPMethod::Delete(exchange::Delete {
            exchange: exchange.into(),
            if_unused: options.if_unused,
            nowait: options.nowait,
        }));
        if options.nowait {
            self.send_method(method)?;
        } else {
            let reply = self.call(method)?;
            expect_reply!(reply, AMQPClass::Exchange(exchange::AMQPMethod::DeleteOk(_)) => ())?;
        }
        self.registry().forget_exchange(exchange);
        Ok(())
    }

    pub fn exchange_bind(
        &self,
        destination: &str,
        source: &str,
        routing_key: &str,
        options: ExchangeBindOptions,
        arguments: FieldTable,
    ) -> Result<()> {
        self.do_exchange_bind(destination, source, routing_key, options, arguments.clone())?;
        self.registry().record_binding(BindingDefinition {
            destination_kind: BindingDestination::Exchange,
            destination: destination.into(),
            source: source.into(),
            routing_key: routing_key.into(),
            arguments,
        });
        Ok(())
    }

    pub(crate) fn do_exchange_bind(
        &self,
        destination: &str,
        source: &str,
        routing_key: &str,
        options: ExchangeBindOptions,
        arguments: FieldTable,
    ) -> Result<()> {
        self.assert_open()?;
        let method = AMQPClass::Exchange(exchange::AMQPMethod::Bind(exchange::Bind {
            destination: destination.into(),
            source: source.into(),
            routing_key: routing_key.into(),
            nowait: options.nowait,
            arguments,
        }));
        if options.nowait {
            return self.send_method(method);
        }
        let reply = self.call(method)?;
        expect_reply!(reply, AMQPClass::Exchange(exchange::AMQPMethod::BindOk(_)) => ())
    }

    pub fn exchange_unbind(
        &self,
        destination: &str,
        source: &str,
        routing_key: &str,
        options: ExchangeUnbindOptions,
        arguments: FieldTable,
    ) -> Result<()> {
        self.assert_open()?;
        let binding = BindingDefinition {
            destination_kind: BindingDestination::Exchange,
            destination: destination.into(),
            source: source.into(),
            routing_key: routing_key.into(),
            arguments: arguments.clone(),
        };
        let method = AMQPClass::Exchange(exchange::AMQPMethod::Unbind(exchange::Unbind {
            destination: binding.destination.clone(),
            source: binding.source.clone(),
            routing_key: binding.routing_key.clone(),
            nowait: options.nowait,
            arguments,
        }));
        if options.nowait {
            self.send_method(method)?;
        } else {
            let reply = self.call(method)?;
            expect_reply!(reply, AMQPClass::Exchange(exchange::AMQPMethod::UnbindOk(_)) => ())?;
        }
        self.registry().forget_binding(&binding);
        Ok(())
    }

    /// Declare a queue. An empty name lets the server generate one.
    pub fn queue_declare(
        &self,
        queue: &str,
        options: QueueDeclareOptions,
        arguments: FieldTable,
    ) -> Result<Queue> {
        let declared = self.do_queue_declare(queue, options, arguments.clone())?;
        if !options.passive {
            self.registry().record_queue(QueueDefinition {
                name: declared.name().clone(),
                options,
                arguments,
                server_named: queue.is_empty(),
            });
        }
        Ok(declared)
    }

    pub(crate) fn do_queue_declare(
        &self,
        queue: &str,
        options: QueueDeclareOptions,
        arguments: FieldTable,
    ) -> Result<Queue> {
        self.assert_open()?;
        let method = AMQPClass::Queue(queue::AMQPMethod::Declare(queue::Declare {
            queue: queue.into(),
            passive: options.passive,
            durable: options.durable,
            exclusive: options.exclusive,
            auto_delete: options.auto_delete,
            nowait: options.nowait,
            arguments,
        }));
        if options.nowait {
            self.send_method(method)?;
            return Ok(Queue::new(queue.into(), 0, 0));
        }
        let reply = self.call(method)?;
        expect_reply!(reply, AMQPClass::Queue(queue::AMQPMethod::DeclareOk(ok)) => {
            trace!(queue = %ok.queue, messages = ok.message_count, "queue declared");
            Queue::new(ok.queue, ok.message_count, ok.consumer_count)
        })
    }

    pub fn queue_bind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
        options: QueueBindOptions,
        arguments: FieldTable,
    ) -> Result<()> {
        self.do_queue_bind(queue, exchange, routing_key, options, arguments.clone())?;
        self.registry().record_binding(BindingDefinition {
            destination_kind: BindingDestination::Queue,
            destination: queue.into(),
            source: exchange.into(),
            routing_key: routing_key.into(),
            arguments,
        });
        Ok(())
    }

    pub(crate) fn do_queue_bind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
        options: QueueBindOptions,
        arguments: FieldTable,
    ) -> Result<()> {
        self.assert_open()?;
        let method = AMQPClass::Queue(queue::AMQPMethod::Bind(queue::Bind {
            queue: queue.into(),
            exchange: exchange.into(),
            routing_key: routing_key.into(),
            nowait: options.nowait,
            arguments,
        }));
        if options.nowait {
            return self.send_method(method);
        }
        let reply = self.call(method)?;
        expect_reply!(reply, AMQPClass::Queue(queue::AMQPMethod::BindOk(_)) => ())
    }

    pub fn queue_unbind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
        _options: QueueUnbindOptions,
        arguments: FieldTable,
    ) -> Result<()> {
        self.assert_open()?;
        let binding = BindingDefinition {
            destination_kind: BindingDestination::Queue,
            destination: queue.into(),
            source: exchange.into(),
            routing_key: routing_key.into(),
            arguments: arguments.clone(),
        };
        let reply = self.call(AMQPClass::Queue(queue::AMQPMethod::Unbind(queue::Unbind {
            queue: binding.destination.clone(),
            exchange: binding.source.clone(),
            routing_key: binding.routing_key.clone(),
            arguments,
        })))?;
        expect_reply!(reply, AMQPClass::Queue(queue::AMQPMethod::UnbindOk(_)) => ())?;
        self.registry().forget_binding(&binding);
        Ok(())
    }

    /// Drop every ready message of the queue, returning how many there were.
    pub fn queue_purge(&self, queue: &str, options: QueuePurgeOptions) -> Result<MessageCount> {
        self.assert_open()?;
        let method = AMQPClass::Queue(queue::AMQPMethod::Purge(queue::Purge {
            queue: queue.into(),
            nowait: options.nowait,
        }));
        if options.nowait {
            self.send_method(method)?;
            return Ok(0);
        }
        let reply = self.call(method)?;
        expect_reply!(reply, AMQPClass::Queue(queue::AMQPMethod::PurgeOk(ok)) => ok.message_count)
    }

    /// Delete the queue, returning how many messages it still held.
    pub fn queue_delete(&self, queue: &str, options: QueueDeleteOptions) -> Result<MessageCount> {
        self.assert_open()?;
        let method = AMQPClass::Queue(queue::AMQPMethod::Delete(queue::Delete {
            queue: queue.into(),
            if_unused: options.if_unused,
            if_empty: options.if_empty,
            nowait: options.nowait,
        }));
        let count = if options.nowait {
            self.send_method(method)?;
            0
        } else {
            let reply = self.call(method)?;
            expect_reply!(reply, AMQPClass::Queue(queue::AMQPMethod::DeleteOk(ok)) => ok.message_count)?
        };
        self.registry().forget_queue(queue);
        Ok(count)
    }

    /// Limit the unacknowledged deliveries the server sends.
    ///
    /// `prefetch_size` is passed to the server as is: RabbitMQ only supports 0.
    pub fn basic_qos(
        &self,
        prefetch_size: LongUInt,
        prefetch_count: ShortUInt,
        options: BasicQosOptions,
    ) -> Result<()> {
        self.do_basic_qos(prefetch_size, prefetch_count, options)
    }

    pub(crate) fn do_basic_qos(
        &self,
        prefetch_size: LongUInt,
        prefetch_count: ShortUInt,
        options: BasicQosOptions,
    ) -> Result<()> {
        self.assert_open()?;
        let reply = self.call(AMQPClass::Basic(basic::AMQPMethod::Qos(basic::Qos {
            prefetch_size,
            prefetch_count,
            global: options.global,
        })))?;
        expect_reply!(reply, AMQPClass::Basic(basic::AMQPMethod::QosOk(_)) => ())?;
        if !options.global {
            self.set_qos(QosDefinition {
                prefetch_size,
                prefetch_count,
            });
        }
        Ok(())
    }

    /// Subscribe to a queue. An empty tag lets the server generate one.
    pub fn basic_consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        options: BasicConsumeOptions,
        arguments: FieldTable,
    ) -> Result<Consumer> {
        let consumer = Consumer::new(consumer_tag.into(), queue.into(), options.no_ack);
        let consumer =
            self.do_basic_consume(queue, consumer_tag, options, arguments.clone(), consumer)?;
        self.registry().record_consumer(ConsumerDefinition {
            tag: consumer.tag(),
            queue: queue.into(),
            options,
            arguments,
            qos: self.qos(),
            consumer: Some(consumer.clone()),
        });
        Ok(consumer)
    }

    pub(crate) fn do_basic_consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        options: BasicConsumeOptions,
        arguments: FieldTable,
        consumer: Consumer,
    ) -> Result<Consumer> {
        self.assert_open()?;
        let method = AMQPClass::Basic(basic::AMQPMethod::Consume(basic::Consume {
            queue: queue.into(),
            consumer_tag: consumer_tag.into(),
            no_local: options.no_local,
            no_ack: options.no_ack,
            exclusive: options.exclusive,
            nowait: options.nowait,
            arguments,
        }));
        if options.nowait {
            if consumer_tag.is_empty() {
                return Err(Error::NotSupported(
                    "basic.consume with nowait requires a consumer tag",
                ));
            }
            self.consumers().register(consumer_tag.into(), consumer.clone());
            if let Err(err) = self.send_method(method) {
                self.consumers().deregister(consumer_tag);
                return Err(err);
            }
            return Ok(consumer);
        }
        let reply = self.call_with(method, Some(consumer.clone()), self.rpc_timeout())?;
        expect_reply!(reply, AMQPClass::Basic(basic::AMQPMethod::ConsumeOk(_)) => consumer)
    }

    pub fn basic_cancel(&self, consumer_tag: &str, options: BasicCancelOptions) -> Result<()> {
        self.assert_open()?;
        let method = AMQPClass::Basic(basic::AMQPMethod::Cancel(basic::Cancel {
            consumer_tag: consumer_tag.into(),
            nowait: options.nowait,
        }));
        if options.nowait {
            self.send_method(method)?;
        } else {
            let reply = self.call(method)?;
            expect_reply!(reply, AMQPClass::Basic(basic::AMQPMethod::CancelOk(_)) => ())?;
        }
        self.consumers().deregister(consumer_tag);
        self.registry().forget_consumer(consumer_tag);
        Ok(())
    }

    /// Publish a message. In confirm mode, the returned [`PublisherConfirm`] resolves
    /// once the server acks or nacks it; otherwise right away with `NotRequested`.
    pub fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        options: BasicPublishOptions,
        payload: &[u8],
        properties: BasicProperties,
    ) -> Result<PublisherConfirm> {
        self.assert_open()?;
        let method = AMQPClass::Basic(basic::AMQPMethod::Publish(basic::Publish {
            exchange: exchange.into(),
            routing_key: routing_key.into(),
            mandatory: options.mandatory,
            immediate: options.immediate,
        }));
        // delivery tags must be allocated in the order the publications hit the wire
        let _publishing = self.publish_lock().lock();
        if self.status().confirm() {
            let (delivery_tag, confirm) = self.acknowledgements().register_pending();
            if let Err(err) = self.send_with_content(method, properties, payload) {
                self.acknowledgements()
                    .cancel_pending(delivery_tag, err.clone());
                return Err(err);
            }
            Ok(confirm)
        } else {
            self.send_with_content(method, properties, payload)?;
            Ok(PublisherConfirm::not_requested(
                self.returned_messages().clone(),
            ))
        }
    }

    /// Fetch one message. `None` when the queue is empty.
    pub fn basic_get(&self, queue: &str, options: BasicGetOptions) -> Result<Option<BasicGetMessage>> {
        self.assert_open()?;
        let reply = self.call(AMQPClass::Basic(basic::AMQPMethod::Get(basic::Get {
            queue: queue.into(),
            no_ack: options.no_ack,
        })))?;
        match reply.method {
            AMQPClass::Basic(basic::AMQPMethod::GetOk(_)) => {
                reply.message.map(Some).ok_or(Error::UnexpectedReply)
            }
            AMQPClass::Basic(basic::AMQPMethod::GetEmpty(_)) => Ok(None),
            _ => Err(Error::UnexpectedReply),
        }
    }

    pub fn basic_ack(&self, delivery_tag: DeliveryTag, options: BasicAckOptions) -> Result<()> {
        self.assert_open()?;
        self.send_method(AMQPClass::Basic(basic::AMQPMethod::Ack(basic::Ack {
            delivery_tag,
            multiple: options.multiple,
        })))
    }

    pub fn basic_nack(&self, delivery_tag: DeliveryTag, options: BasicNackOptions) -> Result<()> {
        self.assert_open()?;
        self.send_method(AMQPClass::Basic(basic::AMQPMethod::Nack(basic::Nack {
            delivery_tag,
            multiple: options.multiple,
            requeue: options.requeue,
        })))
    }

    pub fn basic_reject(
        &self,
        delivery_tag: DeliveryTag,
        options: BasicRejectOptions,
    ) -> Result<()> {
        self.assert_open()?;
        self.send_method(AMQPClass::Basic(basic::AMQPMethod::Reject(basic::Reject {
            delivery_tag,
            requeue: options.requeue,
        })))
    }

    /// Redeliver every unacknowledged message of this session.
    pub fn basic_recover(&self, options: BasicRecoverOptions) -> Result<()> {
        self.assert_open()?;
        let reply = self.call(AMQPClass::Basic(basic::AMQPMethod::Recover(
            basic::Recover {
                requeue: options.requeue,
            },
        )))?;
        expect_reply!(reply, AMQPClass::Basic(basic::AMQPMethod::RecoverOk(_)) => ())
    }

    pub fn basic_recover_async(&self, options: BasicRecoverOptions) -> Result<()> {
        self.assert_open()?;
        self.send_method(AMQPClass::Basic(basic::AMQPMethod::RecoverAsync(
            basic::RecoverAsync {
                requeue: options.requeue,
            },
        )))
    }

    /// Switch to confirm mode: every publication is then acked or nacked by the server.
    pub fn confirm_select(&self, options: ConfirmSelectOptions) -> Result<()> {
        self.assert_open()?;
        let method = AMQPClass::Confirm(confirm::AMQPMethod::Select(confirm::Select {
            nowait: options.nowait,
        }));
        if options.nowait {
            self.send_method(method)?;
        } else {
            let reply = self.call(method)?;
            expect_reply!(reply, AMQPClass::Confirm(confirm::AMQPMethod::SelectOk(_)) => ())?;
        }
        self.status().set_confirm();
        Ok(())
    }

    /// Wait until every publication so far is confirmed, and collect the returned messages.
    pub fn wait_for_confirms(&self) -> Result<Vec<BasicReturnMessage>> {
        if self.status().confirm() {
            self.acknowledgements().wait_all(self.rpc_timeout())?;
        }
        Ok(self.returned_messages().drain())
    }

    /// The messages returned by the server and not attached to a confirmation.
    pub fn take_returned_messages(&self) -> Vec<BasicReturnMessage> {
        self.returned_messages().drain()
    }

    /// How many publications wait for their confirmation.
    pub fn unconfirmed(&self) -> usize {
        self.acknowledgements().pending()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{frames::tests::sent_frames, session::tests::open_session};

    #[test]
    fn nowait_consume_requires_a_tag() {
        let (_manager, session, _receiver) = open_session();
        assert_eq!(
            session
                .basic_consume(
                    "q",
                    "",
                    BasicConsumeOptions {
                        nowait: true,
                        ..BasicConsumeOptions::default()
                    },
                    FieldTable::default()
                )
                .unwrap_err(),
            Error::NotSupported("basic.consume with nowait requires a consumer tag")
        );
    }

    #[test]
    fn closed_session_refuses_operations() {
        let (_manager, session, receiver) = open_session();
        session.status().set_state(ChannelState::Closed);
        assert_eq!(
            session.basic_publish(
                "",
                "q",
                BasicPublishOptions::default(),
                b"payload",
                BasicProperties::default()
            )
            .unwrap_err(),
            Error::InvalidChannelState(ChannelState::Closed)
        );
        assert!(sent_frames(&receiver).is_empty());
    }

    #[test]
    fn publish_without_confirms() {
        let (_manager, session, receiver) = open_session();
        let confirm = session
            .basic_publish(
                "",
                "q",
                BasicPublishOptions::default(),
                b"abc",
                BasicProperties::default(),
            )
            .unwrap();
        assert_eq!(confirm.wait(), Ok(crate::publisher_confirm::Confirmation::NotRequested));
        let frames = sent_frames(&receiver);
        assert_eq!(frames.len(), 3);
        assert_eq!(
            frames[2],
            crate::format::frame::AMQPFrame::Body(1, b"abc".to_vec())
        );
    }

    #[test]
    fn nowait_confirm_select_numbers_publications() {
        let (_manager, session, _receiver) = open_session();
        session
            .confirm_select(ConfirmSelectOptions { nowait: true })
            .unwrap();
        let publish = || {
            session
                .basic_publish(
                    "",
                    "q",
                    BasicPublishOptions::default(),
                    b"",
                    BasicProperties::default(),
                )
                .unwrap()
        };
        let _first = publish();
        let _second = publish();
        assert_eq!(session.unconfirmed(), 2);
        session.acknowledgements().ack(2, true).unwrap();
        assert_eq!(session.unconfirmed(), 0);
    }
}

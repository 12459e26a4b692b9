use crate::{
    consumer::Consumer,
    exchange::is_predefined,
    protocol::constants::REPLY_SUCCESS,
    session::Session,
    topology::*,
    types::ShortString,
    Result,
};
use parking_lot::Mutex;
use std::{fmt, sync::Arc};
use tracing::{debug, info, warn};

/// The recovery ledger: the topology declared through a connection, replayed
/// on the new link after a connection loss.
///
/// Entities are recorded once the server confirmed them and forgotten once
/// deleted, so the ledger mirrors what the server is expected to hold.
#[derive(Clone, Default)]
pub(crate) struct Registry(Arc<Mutex<TopologyDefinition>>);

impl Registry {
    pub(crate) fn record_exchange(&self, exchange: ExchangeDefinition) {
        if is_predefined(exchange.name.as_str()) {
            return;
        }
        let mut inner = self.0.lock();
        match inner
            .exchanges
            .iter_mut()
            .find(|recorded| recorded.name == exchange.name)
        {
            Some(recorded) => *recorded = exchange,
            None => inner.exchanges.push(exchange),
        }
    }

    /// Also forgets the bindings having this exchange as source or destination.
    pub(crate) fn forget_exchange(&self, name: &str) {
        let mut inner = self.0.lock();
        inner.exchanges.retain(|exchange| exchange.name.as_str() != name);
        inner
            .bindings
            .retain(|binding| !binding.references_exchange(name));
    }

    pub(crate) fn record_queue(&self, queue: QueueDefinition) {
        let mut inner = self.0.lock();
        match inner
            .queues
            .iter_mut()
            .find(|recorded| recorded.name == queue.name)
        {
            Some(recorded) => *recorded = queue,
            None => inner.queues.push(queue),
        }
    }

    /// Also forgets the bindings and consumers of this queue.
    pub(crate) fn forget_queue(&self, name: &str) {
        let mut inner = self.0.lock();
        inner.queues.retain(|queue| queue.name.as_str() != name);
        inner
            .bindings
            .retain(|binding| !binding.references_queue(name));
        inner
            .consumers
            .retain(|consumer| consumer.queue.as_str() != name);
    }

    pub(crate) fn record_binding(&self, binding: BindingDefinition) {
        let mut inner = self.0.lock();
        if !inner
            .bindings
            .iter()
            .any(|recorded| same_binding(recorded, &binding))
        {
            inner.bindings.push(binding);
        }
    }

    pub(crate) fn forget_binding(&self, binding: &BindingDefinition) {
        self.0
            .lock()
            .bindings
            .retain(|recorded| !same_binding(recorded, binding));
    }

    pub(crate) fn record_consumer(&self, consumer: ConsumerDefinition) {
        let mut inner = self.0.lock();
        inner.consumers.retain(|recorded| recorded.tag != consumer.tag);
        inner.consumers.push(consumer);
    }

    pub(crate) fn forget_consumer(&self, tag: &str) {
        self.0
            .lock()
            .consumers
            .retain(|consumer| consumer.tag.as_str() != tag);
    }

    /// Substitute the name a server-named queue got on the new link.
    pub(crate) fn rename_queue(&self, old: &str, new: &ShortString) {
        let mut inner = self.0.lock();
        rename_queue(&mut inner, old, new);
    }

    pub(crate) fn topology(&self) -> TopologyDefinition {
        self.0.lock().clone()
    }

    pub(crate) fn is_empty(&self) -> bool {
        let inner = self.0.lock();
        inner.exchanges.is_empty()
            && inner.queues.is_empty()
            && inner.bindings.is_empty()
            && inner.consumers.is_empty()
    }

    /// Re-declare everything in order: exchanges, queues, bindings, then consumers.
    ///
    /// Failures are reported per entity, which stays recorded.
    pub(crate) fn replay(&self, open_session: &dyn Fn() -> Result<Session>) -> RecoveryReport {
        let mut topology = self.topology();
        let mut report = RecoveryReport::default();
        let mut current = SessionSlot::default();
        info!(
            exchanges = topology.exchanges.len(),
            queues = topology.queues.len(),
            bindings = topology.bindings.len(),
            consumers = topology.consumers.len(),
            "recovering topology"
        );

        for exchange in &topology.exchanges {
            let entity = RecordedEntity::Exchange(exchange.name.clone());
            let res = current.with(open_session, |session| {
                session.do_exchange_declare(
                    exchange.name.as_str(),
                    exchange.kind.clone(),
                    exchange.options,
                    exchange.arguments.clone(),
                )
            });
            report.track(entity, res);
        }

        let queues = topology.queues.clone();
        for queue in &queues {
            let entity = RecordedEntity::Queue(queue.name.clone());
            let name = if queue.server_named {
                ""
            } else {
                queue.name.as_str()
            };
            let res = current.with(open_session, |session| {
                session.do_queue_declare(name, queue.options, queue.arguments.clone())
            });
            if let Ok(declared) = res.as_ref() {
                if declared.name() != &queue.name {
                    debug!(old = %queue.name, new = %declared.name(), "server-named queue renamed");
                    self.rename_queue(queue.name.as_str(), declared.name());
                    rename_queue(&mut topology, queue.name.as_str(), declared.name());
                    report
                        .renamed_queues
                        .push((queue.name.clone(), declared.name().clone()));
                }
            }
            report.track(entity, res);
        }

        for binding in &topology.bindings {
            let entity = RecordedEntity::Binding {
                source: binding.source.clone(),
                destination: binding.destination.clone(),
                routing_key: binding.routing_key.clone(),
            };
            let res = current.with(open_session, |session| match binding.destination_kind {
                BindingDestination::Queue => session.do_queue_bind(
                    binding.destination.as_str(),
                    binding.source.as_str(),
                    binding.routing_key.as_str(),
                    Default::default(),
                    binding.arguments.clone(),
                ),
                BindingDestination::Exchange => session.do_exchange_bind(
                    binding.destination.as_str(),
                    binding.source.as_str(),
                    binding.routing_key.as_str(),
                    Default::default(),
                    binding.arguments.clone(),
                ),
            });
            report.track(entity, res);
        }

        for definition in &topology.consumers {
            let entity = RecordedEntity::Consumer(definition.tag.clone());
            let consumer = match definition.consumer.as_ref() {
                Some(consumer) => consumer.clone(),
                None => Consumer::new(
                    definition.tag.clone(),
                    definition.queue.clone(),
                    definition.options.no_ack,
                ),
            };
            consumer.set_queue(definition.queue.clone());
            // consumers each get their own session, like they had before
            let res = open_session().and_then(|session| {
                let res = definition
                    .qos
                    .map_or(Ok(()), |qos| {
                        session.do_basic_qos(
                            qos.prefetch_size,
                            qos.prefetch_count,
                            Default::default(),
                        )
                    })
                    .and_then(|()| {
                        session.do_basic_consume(
                            definition.queue.as_str(),
                            definition.tag.as_str(),
                            definition.options,
                            definition.arguments.clone(),
                            consumer,
                        )
                    });
                if res.is_err() && session.is_open() {
                    if let Err(err) = session.close(REPLY_SUCCESS, "consumer recovery failed") {
                        debug!(%err, "failed to close the session of an unrecovered consumer");
                    }
                }
                res
            });
            report.track(entity, res);
        }

        if report.is_complete() {
            info!(recovered = report.recovered, "topology recovered");
        } else {
            warn!(
                recovered = report.recovered,
                failures = report.failures.len(),
                "topology partially recovered"
            );
        }
        report
    }
}

fn rename_queue(topology: &mut TopologyDefinition, old: &str, new: &ShortString) {
    for queue in topology
        .queues
        .iter_mut()
        .filter(|queue| queue.name.as_str() == old)
    {
        queue.name = new.clone();
    }
    for binding in topology
        .bindings
        .iter_mut()
        .filter(|binding| binding.references_queue(old))
    {
        binding.destination = new.clone();
    }
    for consumer in topology
        .consumers
        .iter_mut()
        .filter(|consumer| consumer.queue.as_str() == old)
    {
        consumer.queue = new.clone();
    }
}

/// The server tells bindings apart by their arguments too.
fn same_binding(left: &BindingDefinition, right: &BindingDefinition) -> bool {
    left.destination_kind == right.destination_kind
        && left.destination == right.destination
        && left.source == right.source
        && left.routing_key == right.routing_key
        && left.arguments == right.arguments
}

impl RecoveryReport {
    fn track<T>(&mut self, entity: RecordedEntity, res: Result<T>) {
        match res {
            Ok(_) => self.recovered += 1,
            Err(error) => {
                warn!(%entity, %error, "failed to recover");
                self.failed(entity, error);
            }
        }
    }
}

/// The session used for the topology replay, replaced when an error closes it.
#[derive(Default)]
struct SessionSlot(Option<Session>);

impl SessionSlot {
    fn with<T>(
        &mut self,
        open_session: &dyn Fn() -> Result<Session>,
        f: impl FnOnce(&Session) -> Result<T>,
    ) -> Result<T> {
        let session = match self.0.take() {
            Some(session) if session.status().open() => session,
            _ => open_session()?,
        };
        let res = f(&session);
        self.0 = Some(session);
        res
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_tuple("Registry");
        if let Some(inner) = self.0.try_lock() {
            debug.field(&*inner);
        }
        debug.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        channel_status::ChannelState,
        configuration::Configuration,
        connection_status::ConnectionStatus,
        exchange::ExchangeKind,
        format::frame::AMQPFrame,
        frames::{tests::sent_frames, FrameSender},
        protocol::{channel, AMQPClass},
        session_manager::SessionManager,
        types::{AMQPValue, FieldTable},
    };
    use std::time::Duration;

    fn queue(name: &str, server_named: bool) -> QueueDefinition {
        QueueDefinition {
            name: name.into(),
            options: Default::default(),
            arguments: FieldTable::default(),
            server_named,
        }
    }

    fn binding(queue: &str, exchange: &str) -> BindingDefinition {
        BindingDefinition {
            destination_kind: BindingDestination::Queue,
            destination: queue.into(),
            source: exchange.into(),
            routing_key: "".into(),
            arguments: FieldTable::default(),
        }
    }

    fn consumer(tag: &str, queue: &str) -> ConsumerDefinition {
        ConsumerDefinition {
            tag: tag.into(),
            queue: queue.into(),
            options: Default::default(),
            arguments: FieldTable::default(),
            qos: None,
            consumer: None,
        }
    }

    #[test]
    fn predefined_exchanges_are_not_recorded() {
        let registry = Registry::default();
        for name in ["", "amq.topic", "logs"] {
            registry.record_exchange(ExchangeDefinition {
                name: name.into(),
                kind: ExchangeKind::Fanout,
                options: Default::default(),
                arguments: FieldTable::default(),
            });
        }
        let exchanges = registry.topology().exchanges;
        assert_eq!(exchanges.len(), 1);
        assert_eq!(exchanges[0].name.as_str(), "logs");
    }

    #[test]
    fn deleting_a_queue_cascades() {
        let registry = Registry::default();
        registry.record_queue(queue("q1", false));
        registry.record_queue(queue("q2", false));
        registry.record_binding(binding("q1", "logs"));
        registry.record_binding(binding("q1", "logs"));
        registry.record_binding(binding("q2", "logs"));
        registry.record_consumer(consumer("c1", "q1"));
        registry.forget_queue("q1");
        let topology = registry.topology();
        assert_eq!(topology.queues, vec![queue("q2", false)]);
        assert_eq!(topology.bindings, vec![binding("q2", "logs")]);
        assert!(topology.consumers.is_empty());
    }

    #[test]
    fn deleting_an_exchange_cascades() {
        let registry = Registry::default();
        registry.record_binding(binding("q1", "logs"));
        registry.record_binding(BindingDefinition {
            destination_kind: BindingDestination::Exchange,
            destination: "logs".into(),
            source: "events".into(),
            routing_key: "#".into(),
            arguments: FieldTable::default(),
        });
        registry.record_binding(binding("q1", "other"));
        registry.forget_exchange("logs");
        assert_eq!(registry.topology().bindings, vec![binding("q1", "other")]);
    }

    #[test]
    fn rename_server_named_queue() {
        let registry = Registry::default();
        registry.record_queue(queue("amq.gen-1", true));
        registry.record_binding(binding("amq.gen-1", "logs"));
        registry.record_consumer(consumer("c1", "amq.gen-1"));
        registry.rename_queue("amq.gen-1", &"amq.gen-2".into());
        let topology = registry.topology();
        assert_eq!(topology.queues, vec![queue("amq.gen-2", true)]);
        assert_eq!(topology.bindings, vec![binding("amq.gen-2", "logs")]);
        assert_eq!(topology.consumers[0].queue.as_str(), "amq.gen-2");
    }

    #[test]
    fn unbind_and_cancel() {
        let registry = Registry::default();
        registry.record_binding(binding("q1", "logs"));
        registry.record_consumer(consumer("c1", "q1"));
        registry.forget_binding(&binding("q1", "logs"));
        registry.forget_consumer("c1");
        assert!(registry.is_empty());
    }

    #[test]
    fn bindings_differ_by_arguments() {
        let registry = Registry::default();
        let mut with_arguments = binding("q1", "headers");
        with_arguments
            .arguments
            .insert("x-match".into(), AMQPValue::LongString("all".into()));
        registry.record_binding(binding("q1", "headers"));
        registry.record_binding(with_arguments.clone());
        registry.record_binding(with_arguments.clone());
        assert_eq!(registry.topology().bindings.len(), 2);

        registry.forget_binding(&with_arguments);
        assert_eq!(registry.topology().bindings, vec![binding("q1", "headers")]);
    }

    #[test]
    fn failed_consumer_recovery_closes_its_session() {
        let configuration = Configuration::default();
        let (frames, receiver) = FrameSender::new(configuration.clone());
        let registry = Registry::default();
        let manager = SessionManager::new(
            configuration,
            ConnectionStatus::default(),
            frames,
            registry.clone(),
            Some(Duration::from_millis(10)),
            Duration::from_millis(10),
            false,
        );
        registry.record_consumer(consumer("c1", "q1"));

        // nobody answers: the consume times out
        let opened = Mutex::new(Vec::new());
        let report = registry.replay(&|| {
            let session = manager.create()?;
            session.status().set_state(ChannelState::Open);
            opened.lock().push(session.clone());
            Ok(session)
        });
        assert_eq!(report.recovered, 0);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(registry.topology().consumers.len(), 1);

        let opened = opened.into_inner();
        assert_eq!(opened.len(), 1);
        assert_eq!(opened[0].state(), ChannelState::Closed);
        assert_eq!(manager.open_sessions(), 0);
        assert!(matches!(
            sent_frames(&receiver).last(),
            Some(AMQPFrame::Method(
                _,
                AMQPClass::Channel(channel::AMQPMethod::Close(_))
            ))
        ));
    }
}

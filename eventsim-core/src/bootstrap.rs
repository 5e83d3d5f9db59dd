//! Simulator bootstrap
//!
//! [`EventSimulator`] is the application-side entry point. It owns the
//! configuration, its end of the message bus and the stored event log, and
//! wires the capture engine and stream consumer to a connector.

use crate::bus::{BusMessage, MessageBus};
use crate::capture::{CaptureEngine, CaptureHandle};
use crate::config::SimulatorConfig;
use crate::consumption::{ConsumptionHandle, StreamConsumer};
use crate::dispatcher::Dispatcher;
use crate::error::{Result, SimulatorError};
use crate::store::{EventLog, EventStore, store_from_config};
use crate::transport::{EventSourceConnector, HttpConnector, InterceptingConnector};
use crate::worker::{InterceptionWorker, WorkerLifecycle, wait_until_installed, wait_until_ready};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

/// Sender name used on the bus for application-side messages
const APP_SENDER: &str = "event-simulator";

/// Named stages of worker registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationStage {
    WaitInstalled,
    WaitReady,
    Announce,
}

/// Result of a successful registration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistrationReport {
    pub endpoint_id: String,
    /// Whether `send_close_event` was announced as well
    pub close_event_announced: bool,
    /// Stages passed, in order
    pub stages: Vec<RegistrationStage>,
}

/// Application-side simulator facade
pub struct EventSimulator {
    config: SimulatorConfig,
    bus: MessageBus,
    log: EventLog,
    capture: CaptureEngine,
    consumer: StreamConsumer,
}

impl std::fmt::Debug for EventSimulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSimulator")
            .field("event_source_url", &self.config.event_source_url)
            .field("channel", &self.bus.name())
            .field("log", &self.log)
            .finish()
    }
}

impl EventSimulator {
    /// Create a simulator. Fails closed on invalid configuration.
    pub fn new(
        config: SimulatorConfig,
        bus: MessageBus,
        store: Arc<dyn EventStore>,
        connector: Arc<dyn EventSourceConnector>,
    ) -> Result<Self> {
        config.validate()?;
        if bus.name() != config.channel_name {
            return Err(SimulatorError::Configuration(format!(
                "bus channel {} does not match configured channel {}",
                bus.name(),
                config.channel_name
            )));
        }

        let log = EventLog::new(store, config.localstore_name.clone())
            .with_capacity(config.storage.max_events);
        let capture = CaptureEngine::new(connector.clone(), log.clone(), config.capture_url.clone());
        let consumer = StreamConsumer::new(connector, config.close_event_supported);
        debug!(
            endpoint = %config.event_source_url,
            channel = %config.channel_name,
            "Event simulator created"
        );

        Ok(Self {
            config,
            bus,
            log,
            capture,
            consumer,
        })
    }

    /// Simulator talking to real endpoints over HTTP, with the store
    /// selected by the configuration
    pub fn from_config(config: SimulatorConfig) -> Result<Self> {
        config.validate()?;
        let bus = MessageBus::new(config.channel_name.clone(), config.bus.capacity)?;
        let store = store_from_config(&config.storage);
        Self::new(config, bus, store, Arc::new(HttpConnector::new()))
    }

    /// Simulator plus an in-process interception context on the same bus.
    ///
    /// Connections go through the interception context first and fall back
    /// to HTTP when a request is not intercepted.
    pub fn with_interception(config: SimulatorConfig) -> Result<(Self, InterceptionWorker)> {
        config.validate()?;
        let bus = MessageBus::new(config.channel_name.clone(), config.bus.capacity)?;
        let worker = InterceptionWorker::install(bus.clone(), Dispatcher::from_config(&config.playback));
        let connector = InterceptingConnector::new(worker.interceptor())
            .with_upstream(Arc::new(HttpConnector::new()));
        let store = store_from_config(&config.storage);
        let simulator = Self::new(config, bus, store, Arc::new(connector))?;
        Ok((simulator, worker))
    }

    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    /// The application's end of the bus
    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }

    /// The stored event log
    pub fn event_log(&self) -> &EventLog {
        &self.log
    }

    /// Wait for the interception context, then announce the endpoint.
    ///
    /// Bounded by `registration_timeout`; dropping the future abandons the
    /// wait.
    pub async fn register(&self, worker: &dyn WorkerLifecycle) -> Result<RegistrationReport> {
        let timeout = self.config.registration_timeout;
        let pipeline = async {
            let mut stages = Vec::with_capacity(3);

            debug!(stage = ?RegistrationStage::WaitInstalled, "Registering");
            wait_until_installed(worker).await?;
            stages.push(RegistrationStage::WaitInstalled);

            debug!(stage = ?RegistrationStage::WaitReady, "Registering");
            wait_until_ready(worker).await?;
            stages.push(RegistrationStage::WaitReady);
            info!("Interception context is ready");

            self.announce_endpoint()?;
            let close_event_announced = self.config.close_event_supported;
            if close_event_announced {
                self.send_message(&BusMessage::send_close_event(
                    self.config.event_source_url.clone(),
                    true,
                ))?;
            }
            stages.push(RegistrationStage::Announce);

            Ok(RegistrationReport {
                endpoint_id: self.config.event_source_url.clone(),
                close_event_announced,
                stages,
            })
        };

        tokio::time::timeout(timeout, pipeline).await.map_err(|_| {
            SimulatorError::Worker(format!(
                "registration did not complete within {:?}",
                timeout
            ))
        })?
    }

    /// Publish `event_source_url` for the configured endpoint
    pub fn announce_endpoint(&self) -> Result<usize> {
        self.send_message(&BusMessage::event_source_url(
            self.config.event_source_url.clone(),
        ))
    }

    /// Publish any bus message; returns how many subscribers received it
    pub fn send_message(&self, message: &BusMessage) -> Result<usize> {
        debug!(message = message.kind().as_str(), endpoint = message.endpoint_id(), "Sending bus message");
        Ok(self.bus.publish(APP_SENDER, message)?)
    }

    /// Publish the stored events as the configured endpoint's playback.
    ///
    /// Returns the number of events sent.
    pub async fn load_events_from_storage(&self) -> Result<usize> {
        let events = self.log.load().await?;
        let count = events.len();
        info!(count, "Obtained events from storage");
        self.send_message(&BusMessage::fake_events(
            self.config.event_source_url.clone(),
            events,
        ))?;
        Ok(count)
    }

    /// Reset the stored log to empty
    pub async fn clear_events_from_storage(&self) -> Result<()> {
        self.log.clear().await?;
        info!("Cleared events from storage");
        Ok(())
    }

    /// Start recording from `capture_url` into the stored log
    pub async fn start_capture(&self) -> Result<CaptureHandle> {
        self.capture.start_capture().await
    }

    /// Stop the active capture; `false` if none was running
    pub async fn stop_capture(&self) -> bool {
        self.capture.stop_capture().await
    }

    /// Consume `url` once with the configured close-event expectation
    pub async fn test(&self, url: &str) -> Result<ConsumptionHandle> {
        self.consumer.consume(url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Inbound;
    use crate::config::ConfigBuilder;
    use crate::store::InMemoryEventStore;
    use std::time::Duration;
    use tokio::sync::watch;
    use crate::worker::WorkerState;

    struct StaticWorker(watch::Sender<WorkerState>);

    impl WorkerLifecycle for StaticWorker {
        fn state_watch(&self) -> watch::Receiver<WorkerState> {
            self.0.subscribe()
        }
    }

    fn simulator(close_event_supported: bool) -> EventSimulator {
        let config = ConfigBuilder::new()
            .event_source_url("/e")
            .close_event_supported(close_event_supported)
            .registration_timeout(Duration::from_secs(1))
            .build()
            .unwrap();
        let bus = MessageBus::new(config.channel_name.clone(), 16).unwrap();
        EventSimulator::new(
            config,
            bus,
            Arc::new(InMemoryEventStore::new()),
            Arc::new(HttpConnector::new()),
        )
        .unwrap()
    }

    #[test]
    fn rejects_invalid_configuration() {
        let mut config = SimulatorConfig::default();
        config.event_source_url.clear();
        assert!(EventSimulator::from_config(config).unwrap_err().is_configuration());
    }

    #[test]
    fn rejects_mismatched_bus() {
        let config = SimulatorConfig::default();
        let bus = MessageBus::new("other", 4).unwrap();
        let err = EventSimulator::new(
            config,
            bus,
            Arc::new(InMemoryEventStore::new()),
            Arc::new(HttpConnector::new()),
        )
        .unwrap_err();
        assert!(err.is_configuration());
    }

    #[tokio::test]
    async fn register_announces_endpoint_and_close_flag() {
        let sim = simulator(true);
        let mut sub = sim.bus().subscribe();
        let (state, _) = watch::channel(WorkerState::Activated);

        let report = sim.register(&StaticWorker(state)).await.unwrap();
        assert_eq!(report.endpoint_id, "/e");
        assert!(report.close_event_announced);
        assert_eq!(
            report.stages,
            vec![
                RegistrationStage::WaitInstalled,
                RegistrationStage::WaitReady,
                RegistrationStage::Announce
            ]
        );

        let first = sub.recv().await.unwrap();
        assert_eq!(
            Inbound::classify(&first.payload),
            Inbound::Message(BusMessage::event_source_url("/e"))
        );
        let second = sub.recv().await.unwrap();
        assert_eq!(
            Inbound::classify(&second.payload),
            Inbound::Message(BusMessage::send_close_event("/e", true))
        );
    }

    #[tokio::test]
    async fn register_fails_when_worker_turns_redundant() {
        let sim = simulator(false);
        let (state, _) = watch::channel(WorkerState::Installing);
        let worker = StaticWorker(state);

        let register = sim.register(&worker);
        worker.0.send_replace(WorkerState::Redundant);
        assert!(matches!(register.await, Err(SimulatorError::Worker(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn register_times_out_when_never_ready() {
        let sim = simulator(false);
        let (state, _) = watch::channel(WorkerState::Installed);
        let err = sim.register(&StaticWorker(state)).await.unwrap_err();
        assert!(err.to_string().contains("registration did not complete"));
    }

    #[tokio::test]
    async fn load_events_publishes_stored_log() {
        let sim = simulator(false);
        sim.event_log().append("{\"id\":1}").await.unwrap();
        let mut sub = sim.bus().subscribe();

        assert_eq!(sim.load_events_from_storage().await.unwrap(), 1);
        let envelope = sub.recv().await.unwrap();
        assert_eq!(
            Inbound::classify(&envelope.payload),
            Inbound::Message(BusMessage::fake_events("/e", vec!["{\"id\":1}".into()]))
        );

        sim.clear_events_from_storage().await.unwrap();
        assert!(sim.event_log().is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn capture_without_url_is_configuration_error() {
        let sim = simulator(false);
        assert!(sim.start_capture().await.unwrap_err().is_configuration());
        assert!(!sim.stop_capture().await);
    }
}

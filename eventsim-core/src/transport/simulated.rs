//! Connections answered by the interception context

use super::{EventSourceConnection, EventSourceConnector, decode_event_stream, failed_stream};
use crate::dispatcher::InterceptedRequest;
use crate::error::Result;
use crate::worker::Interceptor;
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use tracing::debug;

/// Routes every connection through the interception context first.
///
/// Intercepted requests are served from a playback session; anything else
/// goes to `upstream`, or fails like an unreachable host when there is none.
#[derive(Clone)]
pub struct InterceptingConnector {
    interceptor: Interceptor,
    upstream: Option<Arc<dyn EventSourceConnector>>,
}

impl std::fmt::Debug for InterceptingConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterceptingConnector")
            .field("upstream", &self.upstream.is_some())
            .finish()
    }
}

impl InterceptingConnector {
    pub fn new(interceptor: Interceptor) -> Self {
        Self {
            interceptor,
            upstream: None,
        }
    }

    /// Forward pass-through requests to `upstream`
    pub fn with_upstream(mut self, upstream: Arc<dyn EventSourceConnector>) -> Self {
        self.upstream = Some(upstream);
        self
    }
}

#[async_trait]
impl EventSourceConnector for InterceptingConnector {
    async fn connect(&self, url: &str) -> Result<EventSourceConnection> {
        let interception = self.interceptor.intercept(InterceptedRequest::new(url)).await?;
        match interception.into_response() {
            Some(response) => {
                let (body, session) = response.into_parts();
                debug!(url, session = %session.id(), "Serving simulated stream");
                let chunks = body.map(Ok::<String, String>);
                Ok(EventSourceConnection::new(url, decode_event_stream(chunks)).with_playback(session))
            }
            None => match &self.upstream {
                Some(upstream) => upstream.connect(url).await,
                None => Ok(EventSourceConnection::new(
                    url,
                    failed_stream("not intercepted and no network connector configured"),
                )),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{BusMessage, MessageBus};
    use crate::dispatcher::Dispatcher;
    use crate::transport::{ReadyState, TransportEvent};
    use crate::worker::{InterceptionWorker, wait_until_ready};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn registered_endpoint_is_served_from_playback() {
        let bus = MessageBus::new("c", 8).unwrap();
        let worker = InterceptionWorker::install(bus.clone(), Dispatcher::new(Duration::from_millis(100)));
        wait_until_ready(&worker).await.unwrap();
        bus.publish("app", &BusMessage::fake_events("/sse", vec!["{\"n\":1}".into()]))
            .unwrap();

        let connector = InterceptingConnector::new(worker.interceptor());
        let mut conn = connector.connect("/sse").await.unwrap();
        assert_eq!(conn.next_event().await, Some(TransportEvent::Open));
        let Some(TransportEvent::Message(event)) = conn.next_event().await else {
            panic!("expected message");
        };
        assert_eq!(event.data, "{\"n\":1}");
        assert!(matches!(
            conn.next_event().await,
            Some(TransportEvent::Error {
                ready_state: ReadyState::Connecting,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn pass_through_without_upstream_fails() {
        let bus = MessageBus::new("c", 8).unwrap();
        let worker = InterceptionWorker::install(bus, Dispatcher::new(Duration::from_millis(100)));
        let connector = InterceptingConnector::new(worker.interceptor());

        let mut conn = connector.connect("/unknown").await.unwrap();
        assert!(matches!(
            conn.next_event().await,
            Some(TransportEvent::Error {
                ready_state: ReadyState::Closed,
                ..
            })
        ));
        assert!(conn.is_closed());
    }
}

//! Interception dispatcher
//!
//! Decides, for each outgoing request seen by the interception context,
//! whether to answer it with a replay, with the live generator, or to let it
//! through to the network.

use crate::config::PlaybackConfig;
use crate::playback::{SseResponse, Timeline};
use crate::registry::{EndpointConfig, Registry};
use std::time::Duration;
use tracing::debug;

/// Reserved path suffix answered by the live generator
pub const GENERATOR_SUFFIX: &str = "generate-fake-events-sse-stream";

/// An outgoing request observed by the interception context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterceptedRequest {
    pub url: String,
}

impl InterceptedRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    /// Path component of the target, without query or fragment
    pub fn target_path(&self) -> String {
        if let Ok(parsed) = reqwest::Url::parse(&self.url) {
            return parsed.path().to_string();
        }
        let end = self.url.find(['?', '#']).unwrap_or(self.url.len());
        self.url[..end].to_string()
    }
}

/// Routing decision for a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Replay this configuration snapshot
    Playback(EndpointConfig),
    /// Start the live generator
    Generator,
    /// Do not intercept
    PassThrough,
}

/// What the interception context does with a request
#[derive(Debug)]
pub enum Interception {
    /// Answered with a replay of a registered endpoint
    Playback(SseResponse),
    /// Answered with the live generator
    Generator(SseResponse),
    /// Left for the network
    PassThrough(InterceptedRequest),
}

impl Interception {
    /// The synthetic response, if the request was answered
    pub fn into_response(self) -> Option<SseResponse> {
        match self {
            Interception::Playback(response) | Interception::Generator(response) => Some(response),
            Interception::PassThrough(_) => None,
        }
    }

    /// Whether the request was left alone
    pub fn is_pass_through(&self) -> bool {
        matches!(self, Interception::PassThrough(_))
    }
}

/// Matches requests against the registry and starts playback sessions
#[derive(Debug, Clone)]
pub struct Dispatcher {
    cadence: Duration,
    generator_events: u32,
    frame_buffer: usize,
}

impl Dispatcher {
    /// Create a dispatcher with the given cadence
    pub fn new(cadence: Duration) -> Self {
        Self::from_config(&PlaybackConfig {
            cadence,
            ..PlaybackConfig::default()
        })
    }

    /// Create a dispatcher from playback configuration
    pub fn from_config(config: &PlaybackConfig) -> Self {
        Self {
            cadence: config.cadence,
            generator_events: config.generator_events,
            frame_buffer: config.frame_buffer.max(1),
        }
    }

    /// Playback cadence
    pub fn cadence(&self) -> Duration {
        self.cadence
    }

    /// Decide how to handle a request. Registered endpoints take precedence
    /// over the generator suffix.
    pub fn route(&self, registry: &Registry, request: &InterceptedRequest) -> Route {
        let path = request.target_path();
        if let Some(config) = registry.find_match(&path) {
            return Route::Playback(config);
        }
        if path.ends_with(GENERATOR_SUFFIX) {
            return Route::Generator;
        }
        Route::PassThrough
    }

    /// Route a request and start a session when it is answered
    pub fn dispatch(&self, registry: &Registry, request: InterceptedRequest) -> Interception {
        match self.route(registry, &request) {
            Route::Playback(config) => {
                let timeline = Timeline::for_endpoint(&config, self.cadence);
                debug!(
                    url = %request.url,
                    endpoint = %config.endpoint_id,
                    events = config.events.len(),
                    duration = ?timeline.duration(),
                    "Intercepted request, starting playback"
                );
                Interception::Playback(SseResponse::start(
                    config.endpoint_id,
                    timeline,
                    self.frame_buffer,
                ))
            }
            Route::Generator => {
                debug!(url = %request.url, "Starting live event generator");
                let timeline = Timeline::live_generator(self.generator_events, self.cadence);
                Interception::Generator(SseResponse::start(
                    GENERATOR_SUFFIX,
                    timeline,
                    self.frame_buffer,
                ))
            }
            Route::PassThrough => {
                debug!(url = %request.url, "Fetch for unknown URL, passing through");
                Interception::PassThrough(request)
            }
        }
    }
}

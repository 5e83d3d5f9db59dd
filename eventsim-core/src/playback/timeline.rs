//! Emission schedules

use crate::registry::EndpointConfig;
use std::time::Duration;

/// What a scheduled timer does when it fires
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Emission {
    /// Send a recorded payload
    Data(String),
    /// Send the `n`th live generator event, rendered at fire time
    Generated(u32),
    /// Send the `{"id":"CLOSE"}` sentinel
    CloseSentinel,
    /// Close the stream
    EndOfStream,
}

/// An emission and its offset from session start
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledEmission {
    pub offset: Duration,
    pub emission: Emission,
}

/// Ordered schedule for one session. Offsets never decrease.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Timeline {
    entries: Vec<ScheduledEmission>,
}

fn ticks(cadence: Duration, n: usize) -> Duration {
    cadence.saturating_mul(u32::try_from(n).unwrap_or(u32::MAX))
}

impl Timeline {
    /// Replay schedule for an endpoint: event `i` at `i*T`, the sentinel at
    /// `(n+1)*T` when enabled, stream close at `(n+2)*T`.
    pub fn for_endpoint(config: &EndpointConfig, cadence: Duration) -> Self {
        let n = config.events.len();
        let mut entries: Vec<ScheduledEmission> = config
            .events
            .iter()
            .enumerate()
            .map(|(i, payload)| ScheduledEmission {
                offset: ticks(cadence, i),
                emission: Emission::Data(payload.clone()),
            })
            .collect();

        if config.send_close_event {
            entries.push(ScheduledEmission {
                offset: ticks(cadence, n + 1),
                emission: Emission::CloseSentinel,
            });
        }

        entries.push(ScheduledEmission {
            offset: ticks(cadence, n + 2),
            emission: Emission::EndOfStream,
        });

        Self { entries }
    }

    /// Live generator schedule: event `k` at `k*T` for `k` in `1..=count`,
    /// followed at the same instant by the sentinel and the stream close.
    pub fn live_generator(count: u32, cadence: Duration) -> Self {
        let mut entries: Vec<ScheduledEmission> = (1..=count)
            .map(|k| ScheduledEmission {
                offset: cadence.saturating_mul(k),
                emission: Emission::Generated(k),
            })
            .collect();
        let last = cadence.saturating_mul(count.max(1));
        entries.push(ScheduledEmission {
            offset: last,
            emission: Emission::CloseSentinel,
        });
        entries.push(ScheduledEmission {
            offset: last,
            emission: Emission::EndOfStream,
        });
        Self { entries }
    }

    /// Scheduled entries
    pub fn entries(&self) -> &[ScheduledEmission] {
        &self.entries
    }

    /// Number of scheduled entries, stream close included
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is scheduled
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Offset of the last entry
    pub fn duration(&self) -> Duration {
        self.entries.last().map(|e| e.offset).unwrap_or_default()
    }

    pub(crate) fn into_entries(self) -> Vec<ScheduledEmission> {
        self.entries
    }
}

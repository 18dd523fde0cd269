//! Background execution of submitted admin events.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use uuid::Uuid;

use crate::error::Result;
use crate::events::DEFAULT_EVENT_TTL;
use crate::model::{AdminEvent, EventState};
use crate::progress::{LogSink, ProgressSink};
use crate::workflow::Workflow;

/// Builds the progress sink for one event, typically addressed to its requester.
pub type SinkFactory = Arc<dyn Fn(&AdminEvent) -> Box<dyn ProgressSink> + Send + Sync>;

#[derive(Debug, Clone, Copy)]
pub struct DispatchConfig {
    pub poll_interval: Duration,
    pub event_ttl: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            event_ttl: DEFAULT_EVENT_TTL,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DispatchedEvent {
    pub id: Uuid,
    pub state: EventState,
}

#[derive(Debug, Default, Serialize)]
pub struct DispatchSummary {
    pub processed: Vec<DispatchedEvent>,
    pub expired: usize,
}

#[derive(Clone)]
pub struct Dispatcher {
    workflow: Arc<Workflow>,
    sinks: SinkFactory,
    config: DispatchConfig,
}

impl Dispatcher {
    pub fn new(workflow: Arc<Workflow>, config: DispatchConfig) -> Self {
        Self {
            workflow,
            sinks: Arc::new(|event: &AdminEvent| {
                Box::new(LogSink::new(&event.requested_by)) as Box<dyn ProgressSink>
            }),
            config,
        }
    }

    pub fn with_sinks(mut self, sinks: SinkFactory) -> Self {
        self.sinks = sinks;
        self
    }

    /// Executes every NEW event in request order, then expires stale ones.
    pub fn run_once(&self) -> Result<DispatchSummary> {
        let mut summary = DispatchSummary::default();
        for event in self.workflow.events().pending()? {
            let sink = (self.sinks)(&event);
            match self.workflow.execute(event.id, sink.as_ref()) {
                Ok(state) => summary.processed.push(DispatchedEvent {
                    id: event.id,
                    state,
                }),
                Err(err) => {
                    // claimed elsewhere or vanished since listing
                    tracing::warn!(event_id = %event.id, error = %err, "skipping event");
                }
            }
        }
        summary.expired = self
            .workflow
            .events()
            .expire(Utc::now(), self.config.event_ttl)?;
        Ok(summary)
    }

    /// Polls for events on a background thread until `stop` is set.
    pub fn spawn(self, stop: Arc<AtomicBool>) -> JoinHandle<()> {
        std::thread::spawn(move || {
            tracing::info!(interval = ?self.config.poll_interval, "dispatcher started");
            while !stop.load(Ordering::Relaxed) {
                if let Err(err) = self.run_once() {
                    tracing::error!(error = %err, "dispatch pass failed");
                }
                std::thread::sleep(self.config.poll_interval);
            }
            tracing::info!("dispatcher stopped");
        })
    }
}

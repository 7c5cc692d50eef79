//! Result and diagnostics aggregation.
//!
//! The [`Aggregator`] folds validator, transform, and runtime signals into
//! the active generation's [`ExecutionResult`]. Events are honoured only
//! when their instance id matches the current-instance reference, which the
//! session swaps whenever a new sandbox instance is attached.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, trace};

use crate::models::diagnostic::Diagnostic;
use crate::models::event::{ConsoleLine, EventKind, ExecutionEvent, InstanceId};
use crate::models::result::{ExecutionResult, FatalError, SessionState, Settlement, Viewport};

/// Value stored in the current-instance reference when no instance exists.
pub const NO_INSTANCE: u64 = 0;

/// What [`Aggregator::accumulate`] did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Folded {
    /// Event belongs to a superseded or unknown instance; dropped.
    Stale,
    /// Sequence number already seen for the current instance; dropped.
    Duplicate,
    /// Console line appended.
    Console,
    /// Runtime exception recorded.
    RuntimeError,
    /// Generation settled.
    Settled(Settlement),
    /// Liveness signal; nothing to fold.
    Heartbeat,
}

/// Folds signals into one consumer-facing result.
#[derive(Debug)]
pub struct Aggregator {
    current: Arc<AtomicU64>,
    max_console_lines: usize,
    result: ExecutionResult,
    console: VecDeque<ConsoleLine>,
    last_sequence: u64,
    stale_events: u64,
}

impl Aggregator {
    /// Aggregator retaining at most `max_console_lines` lines per generation.
    #[must_use]
    pub fn new(max_console_lines: usize) -> Self {
        Self {
            current: Arc::new(AtomicU64::new(NO_INSTANCE)),
            max_console_lines: max_console_lines.max(1),
            result: ExecutionResult::default(),
            console: VecDeque::new(),
            last_sequence: 0,
            stale_events: 0,
        }
    }

    /// Shared current-instance reference. Only the session writes it.
    #[must_use]
    pub fn current_instance(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.current)
    }

    /// Start a fresh result for `generation`, keeping the viewport overlay.
    ///
    /// Clears the current-instance reference; nothing is honoured until an
    /// instance is attached.
    pub fn begin_generation(&mut self, generation: u64) {
        self.current.store(NO_INSTANCE, Ordering::SeqCst);
        let viewport = self.result.viewport;
        self.result = ExecutionResult {
            generation,
            state: SessionState::Compiling,
            viewport,
            ..ExecutionResult::default()
        };
        self.console.clear();
        self.last_sequence = 0;
    }

    /// Make `instance_id` the only instance whose events are honoured.
    pub fn attach_instance(&mut self, instance_id: InstanceId) {
        self.result.instance_id = Some(instance_id);
        self.last_sequence = 0;
        self.current.store(instance_id.get(), Ordering::SeqCst);
    }

    /// Fold validator or transform diagnostics into the active result.
    pub fn add_diagnostics(&mut self, diagnostics: impl IntoIterator<Item = Diagnostic>) {
        self.result.diagnostics.extend(diagnostics);
    }

    /// Record the executable document on display for this generation.
    pub fn set_rendered(&mut self, document: String) {
        self.result.rendered = Some(document);
    }

    /// Update the presentation overlay.
    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.result.viewport = Some(viewport);
    }

    /// Overwrite the reported session state.
    pub fn set_state(&mut self, state: SessionState) {
        self.result.state = state;
    }

    /// Settle the active generation without any sandbox event.
    pub fn settle(&mut self, settlement: Settlement) {
        self.result.state = SessionState::Settled(settlement);
        self.result.completed_at = Some(Utc::now());
    }

    /// Fold one execution event into the active result.
    pub fn accumulate(&mut self, event: ExecutionEvent) -> Folded {
        let current = self.current.load(Ordering::SeqCst);
        if current == NO_INSTANCE || event.instance_id.get() != current {
            self.stale_events += 1;
            trace!(
                instance_id = %event.instance_id,
                sequence = event.sequence,
                "aggregator: dropping stale event"
            );
            return Folded::Stale;
        }
        if event.sequence <= self.last_sequence {
            debug!(
                instance_id = %event.instance_id,
                sequence = event.sequence,
                last = self.last_sequence,
                "aggregator: dropping duplicate or out-of-order event"
            );
            return Folded::Duplicate;
        }
        self.last_sequence = event.sequence;

        match event.kind {
            EventKind::Console { level, text } => {
                if self.console.len() == self.max_console_lines {
                    self.console.pop_front();
                    self.result.dropped_console_lines += 1;
                }
                self.console.push_back(ConsoleLine {
                    level,
                    text,
                    sequence: event.sequence,
                });
                Folded::Console
            }
            EventKind::Error { message, stack } => {
                self.result.diagnostics.push(Diagnostic::runtime(message, stack));
                // Errors after `ready` flip an already-settled result.
                if self.result.state.is_settled() {
                    self.settle(Settlement::Error);
                }
                Folded::RuntimeError
            }
            EventKind::Ready => {
                let settlement = if self.result.runtime_errors().next().is_some()
                    || self.result.fatal_error.is_some()
                {
                    Settlement::Error
                } else {
                    Settlement::Ready
                };
                self.settle(settlement);
                Folded::Settled(settlement)
            }
            EventKind::Heartbeat => Folded::Heartbeat,
            EventKind::Fatal { reason } => {
                self.result.fatal_error = Some(FatalError { reason });
                self.settle(Settlement::Error);
                Folded::Settled(Settlement::Error)
            }
        }
    }

    /// Current state of the active result.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.result.state
    }

    /// Events dropped by the staleness check since creation.
    #[must_use]
    pub fn stale_events(&self) -> u64 {
        self.stale_events
    }

    /// Copy of the active result, readable at any time.
    #[must_use]
    pub fn snapshot(&self) -> ExecutionResult {
        let mut result = self.result.clone();
        result.console_lines = self.console.iter().cloned().collect();
        result
    }
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The in-process event bus (spec.md §4.F.4): `emit` delivers to every
//! matching waiter exactly once, in arrival order; `await` blocks on one
//! matching event or a timeout.

use meow_core::{AwaitEventOutcome, BusEvent, EventFilter};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;

struct Waiter {
    id: u64,
    event_type: String,
    filter: EventFilter,
    tx: oneshot::Sender<BusEvent>,
}

#[derive(Default)]
pub struct EventBus {
    waiters: Mutex<Vec<Waiter>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `event` to every currently-registered waiter whose type and
    /// filter match, in the order they were registered. Unmatched events
    /// are discarded (fire-and-forget).
    pub fn emit(&self, event: BusEvent) {
        let mut waiters = self.waiters.lock();
        let mut remaining = Vec::with_capacity(waiters.len());
        for waiter in waiters.drain(..) {
            if waiter.event_type == event.event_type && waiter.filter.matches(&event) {
                let _ = waiter.tx.send(event.clone());
            } else {
                remaining.push(waiter);
            }
        }
        *waiters = remaining;
    }

    /// Block until a matching event arrives or `timeout` elapses.
    pub async fn await_event(
        &self,
        event_type: String,
        filter: EventFilter,
        timeout: Duration,
    ) -> AwaitEventOutcome {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().push(Waiter {
            id,
            event_type,
            filter,
            tx,
        });

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(event)) => AwaitEventOutcome::Matched(event),
            _ => {
                self.waiters.lock().retain(|w| w.id != id);
                AwaitEventOutcome::Timeout
            }
        }
    }
}

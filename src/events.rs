//! Event notification for listeners (displays, loggers, the finesse module glue).
//!
//! Fan-out distributor with backpressure: each subscriber gets a dedicated bounded mpsc
//! channel, so a lagging listener is never silently skipped. Publishers emit only after
//! the state an event describes is fully updated.

use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

use crate::fitting::{FitModel, FitResult};
use crate::measurement::FinesseResult;
use crate::measurement_types::Trace;

/// Fan-out event distributor
pub struct EventDistributor<T: Clone> {
    subscribers: Mutex<Vec<mpsc::Sender<T>>>,
    capacity: usize,
}

impl<T: Clone> EventDistributor<T> {
    /// Creates a distributor whose subscriber channels hold `capacity` events
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            capacity,
        }
    }

    /// Subscribe to the event stream
    pub async fn subscribe(&self) -> mpsc::Receiver<T> {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.subscribers.lock().await.push(tx);
        rx
    }

    /// Deliver an event to every subscriber, dropping those whose receiver is gone
    pub async fn publish(&self, event: T) {
        let mut subscribers = self.subscribers.lock().await;

        let results = join_all(
            subscribers
                .iter()
                .map(|sender| sender.send(event.clone())),
        )
        .await;

        let mut alive = results.iter().map(Result::is_ok);
        subscribers.retain(|_| alive.next().unwrap_or(false));
    }

    /// Returns the number of active subscribers
    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.lock().await.len()
    }
}

/// State of a finished fit, as shown to listeners
#[derive(Debug, Clone, PartialEq)]
pub struct FitSnapshot {
    /// Model that was fitted
    pub model: FitModel,
    /// Finesse derived from the fit
    pub finesse: FinesseResult,
    /// Fitted quantities
    pub result: FitResult,
    /// Abscissa of the fitted curve
    pub fit_x: Arc<Vec<f64>>,
    /// Fitted curve
    pub fit_y: Arc<Vec<f64>>,
    /// Stored step 1 conversion factor, if any
    pub step1_conversion: Option<f64>,
}

/// Notifications of the finesse calculator
#[derive(Debug, Clone, PartialEq)]
pub enum FinesseEvent {
    /// A new trace is the current one
    TraceUpdated(Arc<Trace>),
    /// A fit finished and its finesse is stored
    FitUpdated(FitSnapshot),
    /// The cavity length actually used for the FSR
    ParameterUpdated { cavity_length_um: f64 },
}

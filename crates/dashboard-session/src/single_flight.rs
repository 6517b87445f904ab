//! Single-flight execution: one spawned task does the work, every concurrent
//! caller waits for its outcome.
//!
//! The check-and-set of the in-flight flag and the drain of the waiter queue
//! both happen under one mutex, so every waiter that enqueued during a flight
//! receives exactly that flight's outcome, in FIFO order. The work runs on its
//! own task, so cancelling the caller that started it does not cancel it.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;
use tokio::sync::oneshot;

/// The flight's task ended (panicked or was aborted) without an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("single-flight leader abandoned the operation")]
pub struct FlightAbandoned;

type Waiter<T, E> = oneshot::Sender<Result<T, E>>;

struct FlightState<T, E> {
    in_flight: bool,
    waiters: VecDeque<Waiter<T, E>>,
    started_flights: u64,
    completed_flights: u64,
}

pub struct SingleFlight<T, E> {
    state: Arc<Mutex<FlightState<T, E>>>,
}

struct Ticket<T, E> {
    flight: u64,
    leads: bool,
    receiver: oneshot::Receiver<Result<T, E>>,
}

impl<T, E> Default for SingleFlight<T, E> {
    fn default() -> Self {
        Self {
            state: Arc::new(Mutex::new(FlightState {
                in_flight: false,
                waiters: VecDeque::new(),
                started_flights: 0,
                completed_flights: 0,
            })),
        }
    }
}

impl<T, E> std::fmt::Debug for SingleFlight<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("SingleFlight")
            .field("in_flight", &state.in_flight)
            .field("waiters", &state.waiters.len())
            .field("started_flights", &state.started_flights)
            .field("completed_flights", &state.completed_flights)
            .finish()
    }
}

impl<T, E> SingleFlight<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + From<FlightAbandoned> + 'static,
{
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `work` if no flight is active, otherwise waits for the active one.
    ///
    /// `work` is only invoked when this call starts a flight. Must be called
    /// from within a tokio runtime.
    pub async fn run<F, Fut>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        self.run_numbered(work).await.1
    }

    /// Like [`SingleFlight::run`], also returning the number of the flight
    /// whose outcome was received. Flights are numbered from 1.
    pub async fn run_numbered<F, Fut>(&self, work: F) -> (u64, Result<T, E>)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let ticket = self.join();
        if ticket.leads {
            let state = Arc::clone(&self.state);
            let future = work();
            tokio::spawn(async move {
                let mut guard = FlightGuard {
                    state,
                    finished: false,
                };
                let outcome = future.await;
                guard.finish(&outcome);
            });
        }

        let outcome = ticket
            .receiver
            .await
            .unwrap_or_else(|_| Err(E::from(FlightAbandoned)));
        (ticket.flight, outcome)
    }

    fn join(&self) -> Ticket<T, E> {
        let (sender, receiver) = oneshot::channel();
        let mut state = lock(&self.state);
        let leads = !state.in_flight;
        if leads {
            state.in_flight = true;
            state.started_flights += 1;
        }
        state.waiters.push_back(sender);
        Ticket {
            flight: state.started_flights,
            leads,
            receiver,
        }
    }
}

impl<T, E> SingleFlight<T, E> {
    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        lock(&self.state).in_flight
    }

    /// Number of callers currently waiting on the active flight, including
    /// the one that started it.
    #[must_use]
    pub fn waiting(&self) -> usize {
        lock(&self.state).waiters.len()
    }

    #[must_use]
    pub fn completed_flights(&self) -> u64 {
        lock(&self.state).completed_flights
    }
}

fn lock<T, E>(state: &Mutex<FlightState<T, E>>) -> MutexGuard<'_, FlightState<T, E>> {
    state
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn complete<T, E>(state: &Mutex<FlightState<T, E>>, outcome: &Result<T, E>)
where
    T: Clone,
    E: Clone,
{
    let waiters = {
        let mut state = lock(state);
        state.in_flight = false;
        state.completed_flights += 1;
        std::mem::take(&mut state.waiters)
    };

    for waiter in waiters {
        // A caller that stopped waiting has nothing left to resume.
        let _ = waiter.send(outcome.clone());
    }
}

/// Owned by the flight's task; releases waiters even if the task dies.
struct FlightGuard<T, E>
where
    T: Clone,
    E: Clone + From<FlightAbandoned>,
{
    state: Arc<Mutex<FlightState<T, E>>>,
    finished: bool,
}

impl<T, E> FlightGuard<T, E>
where
    T: Clone,
    E: Clone + From<FlightAbandoned>,
{
    fn finish(&mut self, outcome: &Result<T, E>) {
        self.finished = true;
        complete(&self.state, outcome);
    }
}

impl<T, E> Drop for FlightGuard<T, E>
where
    T: Clone,
    E: Clone + From<FlightAbandoned>,
{
    fn drop(&mut self) {
        if !self.finished {
            complete(&self.state, &Err(E::from(FlightAbandoned)));
        }
    }
}

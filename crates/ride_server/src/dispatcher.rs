//! The dispatch loop. One task owns the [`DispatchCore`]; websocket readers
//! and HTTP handlers talk to it over a mailbox.

use std::sync::Arc;
use std::time::Duration;

use ride_core::commands::Command;
use ride_core::ecs::ConnectionId;
use ride_core::error::ProviderError;
use ride_core::protocol::Effect;
use ride_core::routing::DistanceProvider;
use ride_core::runner::DispatchCore;
use ride_core::scoring::SharingScorer;
use ride_core::sharing::{self, SharingPrediction, SharingProposal};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::hub::Hub;

/// Routing and scoring backends. Both may block on the network.
pub struct Providers {
    pub distances: Box<dyn DistanceProvider>,
    pub scorer: Box<dyn SharingScorer>,
}

type Call = Box<dyn FnOnce(&mut DispatchCore, u64) + Send>;

enum Request {
    Command {
        origin: Option<ConnectionId>,
        command: Command,
    },
    Evaluated {
        proposal: SharingProposal,
        outcome: Result<SharingPrediction, ProviderError>,
    },
    Call(Call),
}

/// The dispatch loop has stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("dispatch loop is not running")]
pub struct DispatcherGone;

#[derive(Clone)]
pub struct DispatchHandle {
    tx: mpsc::UnboundedSender<Request>,
}

impl DispatchHandle {
    /// Queues a client command. Results reach the client as frames.
    pub fn send(&self, origin: Option<ConnectionId>, command: Command) -> Result<(), DispatcherGone> {
        self.tx
            .send(Request::Command { origin, command })
            .map_err(|_| DispatcherGone)
    }

    /// Runs `f` on the loop with the current wall clock and returns its
    /// result.
    pub async fn call<T, F>(&self, f: F) -> Result<T, DispatcherGone>
    where
        T: Send + 'static,
        F: FnOnce(&mut DispatchCore, u64) -> T + Send + 'static,
    {
        let (reply, rx) = oneshot::channel();
        let call: Call = Box::new(move |core, now| {
            let _ = reply.send(f(core, now));
        });
        self.tx.send(Request::Call(call)).map_err(|_| DispatcherGone)?;
        rx.await.map_err(|_| DispatcherGone)
    }
}

/// Wall clock in epoch milliseconds.
pub fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

pub struct Dispatcher {
    core: DispatchCore,
    hub: Arc<Hub>,
    providers: Arc<Providers>,
    rx: mpsc::UnboundedReceiver<Request>,
    tx: mpsc::UnboundedSender<Request>,
}

impl Dispatcher {
    pub fn new(core: DispatchCore, hub: Arc<Hub>, providers: Arc<Providers>) -> (Self, DispatchHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = DispatchHandle { tx: tx.clone() };
        (
            Self {
                core,
                hub,
                providers,
                rx,
                tx,
            },
            handle,
        )
    }

    /// Runs until every handle is dropped.
    pub async fn run(mut self) {
        info!("dispatch loop started");
        loop {
            let deadline = self.core.next_deadline();
            tokio::select! {
                request = self.rx.recv() => match request {
                    Some(request) => self.apply(request),
                    None => break,
                },
                _ = wait_until(deadline) => {
                    let fired = self.core.advance_to(now_ms());
                    debug!(fired, "timers fired");
                }
            }
            self.flush();
        }
        info!("dispatch loop stopped");
    }

    fn apply(&mut self, request: Request) {
        let now = now_ms();
        match request {
            Request::Command { origin, command } => {
                let kind = command.kind();
                if let Err(err) = self.core.handle(now, origin, command) {
                    debug!(command = kind.as_str(), error = %err, "command refused");
                }
            }
            Request::Evaluated { proposal, outcome } => {
                if let Err(err) = self.core.submit_evaluation(now, proposal, outcome) {
                    debug!(error = %err, "sharing evaluation refused");
                }
            }
            Request::Call(call) => {
                // Timers due before the call are applied first.
                self.core.advance_to(now);
                call(&mut self.core, now);
            }
        }
    }

    fn flush(&mut self) {
        let (messages, effects) = self.core.drain();
        if !messages.is_empty() {
            self.hub.deliver(messages);
        }
        for effect in effects {
            self.spawn_effect(effect);
        }
    }

    fn spawn_effect(&self, effect: Effect) {
        let Effect::EvaluateSharing(proposal) = effect;
        let providers = Arc::clone(&self.providers);
        let sharing_config = self.core.config().sharing.clone();
        let pricing = self.core.config().pricing.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let task = tokio::task::spawn_blocking(move || {
                let outcome = sharing::evaluate(
                    &*providers.distances,
                    &*providers.scorer,
                    &proposal,
                    &sharing_config,
                    &pricing,
                );
                (proposal, outcome)
            });
            match task.await {
                Ok((proposal, outcome)) => {
                    if tx.send(Request::Evaluated { proposal, outcome }).is_err() {
                        warn!("dispatch loop gone before sharing evaluation finished");
                    }
                }
                Err(err) => warn!(error = %err, "sharing evaluation task failed"),
            }
        });
    }
}

async fn wait_until(deadline: Option<u64>) {
    match deadline {
        Some(at) => {
            let wait = at.saturating_sub(now_ms());
            tokio::time::sleep(Duration::from_millis(wait)).await;
        }
        None => std::future::pending::<()>().await,
    }
}

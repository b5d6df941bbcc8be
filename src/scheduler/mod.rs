use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::render::Renderer;
use crate::report::{ReportEngine, TimeWindow};

/// Control messages accepted by the refresh scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// Request a dashboard refresh; `force` bypasses the interval gate.
    Trigger { force: bool },
    /// Terminate the control loop once the in-flight render finishes.
    Stop,
}

/// Background refresh scheduler.
///
/// Owns a single consumer task over an inbound control channel. At most
/// one report cycle runs at a time; triggers arriving faster than the
/// minimum refresh interval are coalesced, and a crashing render never
/// takes the control loop down with it.
pub struct RefreshScheduler {
    tx: mpsc::UnboundedSender<Control>,
    handle: Option<JoinHandle<()>>,
}

impl RefreshScheduler {
    /// Spawn the control loop over the given engine.
    pub fn spawn<R>(engine: Arc<ReportEngine<R>>, min_interval: Duration) -> Self
    where
        R: Renderer + Send + Sync + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<Control>();

        let handle = tokio::spawn(async move {
            let mut last_render: Option<Instant> = None;

            while let Some(msg) = rx.recv().await {
                match msg {
                    Control::Stop => break,
                    Control::Trigger { force } => {
                        let due = last_render
                            .map(|t| t.elapsed() >= min_interval)
                            .unwrap_or(true);

                        if !force && !due {
                            debug!("refresh trigger coalesced inside minimum interval");
                            continue;
                        }

                        last_render = Some(Instant::now());

                        // The cycle runs in its own task so a panic only
                        // kills that task; the control loop stays live
                        // for further triggers.
                        let engine = Arc::clone(&engine);
                        let render =
                            tokio::spawn(
                                async move { engine.run_cycle(TimeWindow::default()).await },
                            );

                        match render.await {
                            Ok(Ok(ctx)) => {
                                info!(
                                    xmin = ctx.window.0,
                                    xmax = ctx.window.1,
                                    "dashboard refreshed",
                                );
                            }
                            Ok(Err(e)) => {
                                warn!(error = format!("{e:#}"), "report cycle failed");
                            }
                            Err(e) if e.is_panic() => {
                                warn!("report cycle panicked");
                            }
                            Err(e) => {
                                warn!(error = %e, "report cycle cancelled");
                            }
                        }
                    }
                }
            }

            info!("refresh scheduler stopped");
        });

        Self {
            tx,
            handle: Some(handle),
        }
    }

    /// Enqueue a refresh request and return immediately.
    pub fn trigger(&self, force: bool) {
        let _ = self.tx.send(Control::Trigger { force });
    }

    /// Stop the control loop cooperatively, waiting for any in-flight
    /// render to finish first.
    pub async fn stop(&mut self) {
        let _ = self.tx.send(Control::Stop);

        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "refresh scheduler join failed");
            }
        }
    }
}

/// Caller-side policy for time-based automatic triggers: emit one when
/// forced, or when the period has elapsed since the last emission.
pub struct TriggerPolicy {
    period: Duration,
    last: Instant,
}

impl TriggerPolicy {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            last: Instant::now(),
        }
    }

    pub fn take(&mut self, scheduler: &RefreshScheduler, force: bool) {
        if force || self.last.elapsed() > self.period {
            scheduler.trigger(force);
            self.last = Instant::now();
        }
    }
}

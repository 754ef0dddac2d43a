//! Periodic liveness checking of registered peers.
//!
//! A ticker wakes every `check_period`, collects records whose last check
//! is older than `stale_interval`, and fans them out to a fixed pool of
//! probe workers over a bounded channel. A record failing its probe
//! `fail_threshold` consecutive times is evicted.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::probe::Prober;
use crate::registry::{PeerRegistry, PeerState};

pub struct HealthCheckConfig {
    pub check_period: Duration,
    pub stale_interval: Duration,
    pub workers: usize,
    pub fail_threshold: u32,
    /// How long shutdown waits for in-flight probes before giving up.
    pub drain_deadline: Duration,
}

pub struct HealthCheckManager {
    shutdown_tx: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
    drain_deadline: Duration,
}

impl HealthCheckManager {
    /// Spawn the ticker loop and worker pool.
    pub fn start(
        registry: Arc<PeerRegistry>,
        prober: Arc<Prober>,
        config: HealthCheckConfig,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let drain_deadline = config.drain_deadline;
        let handle = tokio::spawn(run_loop(registry, prober, config, shutdown_rx));
        HealthCheckManager {
            shutdown_tx,
            handle: Mutex::new(Some(handle)),
            drain_deadline,
        }
    }

    /// Stop the loop and wait for in-flight probes, up to the drain
    /// deadline.
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        let handle = self.handle.lock().await.take();
        if let Some(handle) = handle {
            if tokio::time::timeout(self.drain_deadline, handle)
                .await
                .is_err()
            {
                warn!("health-check loop did not drain before deadline");
            }
        }
    }
}

async fn run_loop(
    registry: Arc<PeerRegistry>,
    prober: Arc<Prober>,
    config: HealthCheckConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    let workers = config.workers.max(1);
    let (job_tx, job_rx) = mpsc::channel::<Arc<PeerState>>(workers);
    let job_rx = Arc::new(Mutex::new(job_rx));

    let mut worker_handles = Vec::with_capacity(workers);
    for _ in 0..workers {
        let job_rx = Arc::clone(&job_rx);
        let registry = Arc::clone(&registry);
        let prober = Arc::clone(&prober);
        let fail_threshold = config.fail_threshold;
        worker_handles.push(tokio::spawn(async move {
            loop {
                let job = job_rx.lock().await.recv().await;
                match job {
                    Some(state) => {
                        check_one(&registry, &prober, state, fail_threshold).await;
                    }
                    None => return,
                }
            }
        }));
    }

    // First tick only after a full period; freshly registered peers were
    // just probed by the connect-back check.
    let mut ticker = tokio::time::interval_at(
        tokio::time::Instant::now() + config.check_period,
        config.check_period,
    );

    'ticker: loop {
        tokio::select! {
            _ = shutdown.changed() => break 'ticker,
            _ = ticker.tick() => {
                let stale = registry.stale(config.stale_interval);
                if !stale.is_empty() {
                    debug!(count = stale.len(), "probing stale peers");
                }
                for state in stale {
                    tokio::select! {
                        _ = shutdown.changed() => break 'ticker,
                        sent = job_tx.send(state) => {
                            if sent.is_err() {
                                break 'ticker;
                            }
                        }
                    }
                }
            }
        }
    }

    drop(job_tx);
    for handle in worker_handles {
        let _ = handle.await;
    }
    info!("health-check loop stopped");
}

async fn check_one(
    registry: &PeerRegistry,
    prober: &Arc<Prober>,
    state: Arc<PeerState>,
    fail_threshold: u32,
) {
    let prober = Arc::clone(prober);
    let meta = state.meta.clone();
    // Probes run on their own task so a panic in one cannot take the
    // worker down with it.
    let probe = tokio::spawn(async move { prober.ping(&meta).await });
    match probe.await {
        Ok(Ok(())) => {
            state.mark_alive();
            debug!(peer = %state.meta.id, "peer alive");
        }
        Ok(Err(e)) => {
            debug!(peer = %state.meta.id, error = %e, "probe failed");
            evict_if_due(registry, &state, fail_threshold);
        }
        Err(e) => {
            warn!(peer = %state.meta.id, error = %e, "probe task failed");
            evict_if_due(registry, &state, fail_threshold);
        }
    }
}

fn evict_if_due(registry: &PeerRegistry, state: &Arc<PeerState>, fail_threshold: u32) {
    let fails = state.mark_failed();
    if fails < fail_threshold {
        return;
    }
    // The peer may have re-registered since this probe was scheduled, in
    // which case the registry holds a fresh record that just passed its
    // connect-back check. Only evict the exact record that failed.
    match registry.get(&state.meta.id) {
        Some(current) if Arc::ptr_eq(&current, state) => {
            registry.unregister(&state.meta.id);
        }
        _ => {}
    }
}

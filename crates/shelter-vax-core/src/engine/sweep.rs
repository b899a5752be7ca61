//! Overdue sweep and its daily scheduler.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::NaiveDate;
use tracing::{debug, error, info};

use super::{EngineConfig, EngineResult, VaccinationEngine};
use crate::db::{Database, ProtocolFilter};
use crate::models::ProtocolStatus;
use crate::schedule::{next_daily_run, Clock};

impl VaccinationEngine<'_> {
    /// Mark every in-progress protocol whose next dose is before `today` as
    /// overdue. Returns how many changed; a second run on the same day
    /// changes nothing.
    pub fn sweep_overdue(&self, today: NaiveDate) -> EngineResult<usize> {
        self.write("sweep_overdue", |tx| {
            let stale = tx.query_protocols(
                &ProtocolFilter::new()
                    .with_status(ProtocolStatus::InProgress)
                    .next_dose_before(today),
                None,
                None,
            )?;
            if stale.is_empty() {
                return Ok(0);
            }

            let ids: Vec<String> = stale.into_iter().map(|p| p.id).collect();
            Ok(tx.bulk_mark_overdue(&ids, self.clock.now())?)
        })
    }
}

/// Runs the overdue sweep once a day at the configured shelter time.
///
/// The sweeper owns its own connection so it never contends with request
/// handlers for one.
pub struct OverdueSweeper {
    db: Database,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

impl OverdueSweeper {
    pub fn new(db: Database, clock: Arc<dyn Clock>, config: EngineConfig) -> Self {
        Self { db, clock, config }
    }

    /// One sweep against the current shelter day. Failures are logged and
    /// reported as zero; the next run picks up whatever was missed.
    pub fn run_once(&self) -> usize {
        let engine =
            VaccinationEngine::new(&self.db, self.clock.as_ref()).with_config(self.config.clone());
        let today = engine.today();

        match engine.sweep_overdue(today) {
            Ok(0) => {
                info!(%today, "No overdue protocols");
                0
            }
            Ok(count) => {
                info!(%today, count, "{} protocols marked overdue", count);
                count
            }
            Err(err) => {
                error!(%today, error = %err, "Overdue sweep failed");
                0
            }
        }
    }

    /// Time until the next scheduled run.
    pub fn until_next_run(&self) -> Duration {
        let now = self.clock.now();
        let next = next_daily_run(now, self.config.utc_offset, self.config.sweep_at);
        (next - now).to_std().unwrap_or(Duration::ZERO)
    }

    /// Move the sweeper onto a background thread.
    pub fn spawn(self) -> std::io::Result<SweeperHandle> {
        let (shutdown, signal) = mpsc::channel::<()>();

        let thread = thread::Builder::new()
            .name("overdue-sweep".into())
            .spawn(move || loop {
                let wait = self.until_next_run();
                debug!(?wait, "Next overdue sweep scheduled");
                match signal.recv_timeout(wait) {
                    Err(RecvTimeoutError::Timeout) => {
                        self.run_once();
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })?;

        Ok(SweeperHandle {
            shutdown,
            thread: Some(thread),
        })
    }
}

/// Stops the background sweeper when shut down or dropped.
pub struct SweeperHandle {
    shutdown: mpsc::Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl SweeperHandle {
    /// Signal the sweeper and wait for it to exit.
    pub fn shutdown(mut self) {
        self.stop();
    }

    /// Block until the sweeper thread exits.
    pub fn wait(mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Overdue sweeper thread panicked");
            }
        }
    }

    fn stop(&mut self) {
        let _ = self.shutdown.send(());
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Overdue sweeper thread panicked");
            }
        }
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

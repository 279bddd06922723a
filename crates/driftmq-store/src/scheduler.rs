//! Background flush and cleanup threads.

use std::{
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};

use chrono::{Local, NaiveDateTime, TimeDelta};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use crate::{
    engine::Shared,
    error::{Result, StoreError},
};

/// One-shot stop signal that wakes sleeping workers immediately.
#[derive(Debug, Default)]
pub(crate) struct Shutdown {
    stopped: Mutex<bool>,
    cond: Condvar,
}

impl Shutdown {
    pub fn trigger(&self) {
        *self.stopped.lock() = true;
        self.cond.notify_all();
    }

    #[allow(dead_code)]
    pub fn is_triggered(&self) -> bool {
        *self.stopped.lock()
    }

    /// Sleep for `timeout` or until triggered. Returns `true` once triggered.
    pub fn wait(&self, timeout: Duration) -> bool {
        let mut stopped = self.stopped.lock();
        if !*stopped {
            let _ = self.cond.wait_for(&mut stopped, timeout);
        }
        *stopped
    }
}

pub(crate) fn spawn_flush(shared: Arc<Shared>) -> Result<JoinHandle<()>> {
    spawn("driftmq-flush", move || {
        let interval = shared.config().flush_interval;
        while !shared.shutdown().wait(interval) {
            if let Err(e) = shared.flush_all() {
                warn!(error = %e, "scheduled flush failed");
            }
        }
        debug!("flush scheduler stopped");
    })
}

pub(crate) fn spawn_cleanup(shared: Arc<Shared>) -> Result<JoinHandle<()>> {
    spawn("driftmq-cleanup", move || {
        loop {
            let delay = until_next_run(Local::now().naive_local(), shared.config().cleanup_hour);
            if shared.shutdown().wait(delay) {
                break;
            }
            match shared.clean_expired() {
                Ok(report) => info!(
                    data = report.data_segments_removed,
                    wal = report.wal_segments_removed,
                    "retention sweep finished"
                ),
                Err(e) => warn!(error = %e, "retention sweep failed"),
            }
        }
        debug!("cleanup scheduler stopped");
    })
}

fn spawn<F>(name: &'static str, body: F) -> Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(name.to_owned())
        .spawn(body)
        .map_err(|source| StoreError::Spawn { name, source })
}

/// Time from `now` until the next `hour:00:00` local time.
pub(crate) fn until_next_run(now: NaiveDateTime, hour: u32) -> Duration {
    let Some(today) = now.date().and_hms_opt(hour.min(23), 0, 0) else {
        return Duration::from_secs(24 * 60 * 60);
    };
    let next = if today > now { today } else { today + TimeDelta::days(1) };
    (next - now).to_std().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use chrono::NaiveDate;

    use super::*;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 1).unwrap().and_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn later_today() {
        assert_eq!(until_next_run(at(1, 30), 2), Duration::from_secs(30 * 60));
    }

    #[test]
    fn tomorrow_once_passed() {
        assert_eq!(until_next_run(at(2, 0), 2), Duration::from_secs(24 * 60 * 60));
        assert_eq!(until_next_run(at(23, 0), 2), Duration::from_secs(3 * 60 * 60));
    }

    #[test]
    fn shutdown_wakes_waiter() {
        let shutdown = Arc::new(Shutdown::default());
        let waiter = {
            let shutdown = Arc::clone(&shutdown);
            thread::spawn(move || shutdown.wait(Duration::from_secs(60)))
        };

        let start = Instant::now();
        shutdown.trigger();
        assert!(waiter.join().unwrap());
        assert!(start.elapsed() < Duration::from_secs(30));
        assert!(shutdown.wait(Duration::from_secs(60)));
    }
}

//! Background org count poller. The driver reads the latest count without blocking.

use anyhow::{Result, anyhow};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded, unbounded};
use log::debug;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::OrgConnection;
use crate::org::connect;

pub struct OrgCountPoller {
    counts_rx: Receiver<Result<u64>>,
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
    latest: Option<u64>,
}

impl OrgCountPoller {
    /// Count `sobject` in `org` now and then every `interval`. The thread exits after the first
    /// failed poll.
    pub fn spawn(org: OrgConnection, sobject: String, interval: Duration) -> Result<Self> {
        let (counts_tx, counts_rx) = unbounded();
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let handle = std::thread::Builder::new()
            .name("org-count-poller".to_string())
            .spawn(move || poll_loop(&org, &sobject, interval, &counts_tx, &stop_rx))?;
        Ok(Self {
            counts_rx,
            stop_tx: Some(stop_tx),
            handle: Some(handle),
            latest: None,
        })
    }

    /// Newest count received so far. A poll error is returned once and is fatal to the caller.
    pub fn latest(&mut self) -> Result<Option<u64>> {
        while let Ok(msg) = self.counts_rx.try_recv() {
            self.latest = Some(msg?);
        }
        Ok(self.latest)
    }

    pub fn stop(&mut self) {
        // Dropping the sender wakes the poller.
        self.stop_tx.take();
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            debug!("org count poller panicked");
        }
    }
}

impl Drop for OrgCountPoller {
    fn drop(&mut self) {
        self.stop();
    }
}

fn poll_loop(
    org: &OrgConnection,
    sobject: &str,
    interval: Duration,
    counts_tx: &Sender<Result<u64>>,
    stop_rx: &Receiver<()>,
) {
    let client = match connect(org) {
        Ok(client) => client,
        Err(e) => {
            let _ = counts_tx.send(Err(e.context("connect to org for record counts")));
            return;
        }
    };
    loop {
        let count = client
            .count_records(sobject)
            .map_err(|e| anyhow!("Could not count {sobject} records in the org: {e:#}"));
        let failed = count.is_err();
        if counts_tx.send(count).is_err() || failed {
            return;
        }
        match stop_rx.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => continue,
            _ => return,
        }
    }
}

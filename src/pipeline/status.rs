//! Point-in-time view of a data load, derived from queue directories. Never persisted.

use serde::Serialize;
use std::fmt::Write as _;
use std::time::Duration;

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct UploadStatus {
    /// Latest org count of the run-until object, when one is being polled.
    pub confirmed_count_in_org: Option<u64>,
    pub target_count: u64,
    /// Portion size of the newest generator job.
    pub base_batch_size: u64,
    pub sets_queued_to_be_generated: u64,
    pub sets_being_generated: u64,
    pub sets_queued_for_loading: u64,
    pub sets_being_loaded: u64,
    /// Loaded sets, including those loaded while preparing the template.
    pub sets_finished: u64,
    /// Failed job directories (generation and load).
    pub sets_failed: usize,
    pub user_max_num_generator_workers: usize,
    pub user_max_num_loader_workers: usize,
    pub inprogress_generator_jobs: usize,
    pub inprogress_loader_jobs: usize,
    pub data_gen_free_workers: usize,
    #[serde(skip)]
    pub elapsed: Duration,
}

impl UploadStatus {
    /// Everything queued, running or finished. Compared against the target to decide when to
    /// stop admitting work.
    pub fn total_sets_working_on_or_uploaded(&self) -> u64 {
        self.sets_queued_to_be_generated
            + self.sets_being_generated
            + self.sets_queued_for_loading
            + self.sets_being_loaded
            + self.sets_finished
    }

    pub fn total_in_flight(&self) -> u64 {
        self.sets_queued_to_be_generated
            + self.sets_being_generated
            + self.sets_queued_for_loading
            + self.sets_being_loaded
    }

    /// Multi-line report. `detailed` adds the internal counters.
    pub fn display(&self, detailed: bool) -> String {
        let mut out = String::from("**** Progress Totals ****\n");
        let _ = writeln!(out, "Target Count: {}", self.target_count);
        let _ = writeln!(
            out,
            "Total Sets Working On Or Uploaded: {}",
            self.total_sets_working_on_or_uploaded()
        );
        let _ = writeln!(out, "Sets Finished: {}", self.sets_finished);
        let _ = writeln!(out, "Sets Failed: {}", self.sets_failed);
        if let Some(count) = self.confirmed_count_in_org {
            let _ = writeln!(out, "Confirmed Count In Org: {count}");
        }
        out.push_str("\n**** Queue Stats ****\n");
        let _ = writeln!(
            out,
            "Inprogress Generator Jobs: {}",
            self.inprogress_generator_jobs
        );
        let _ = writeln!(out, "Inprogress Loader Jobs: {}", self.inprogress_loader_jobs);
        let _ = write!(out, "Elapsed: {}s", self.elapsed.as_secs());
        if detailed {
            out.push_str("\n\n**** Internal Counters ****\n");
            let _ = writeln!(out, "Base Batch Size: {}", self.base_batch_size);
            let _ = writeln!(
                out,
                "Sets Queued To Be Generated: {}",
                self.sets_queued_to_be_generated
            );
            let _ = writeln!(out, "Sets Being Generated: {}", self.sets_being_generated);
            let _ = writeln!(out, "Sets Queued For Loading: {}", self.sets_queued_for_loading);
            let _ = writeln!(out, "Sets Being Loaded: {}", self.sets_being_loaded);
            let _ = writeln!(
                out,
                "User Max Num Generator Workers: {}",
                self.user_max_num_generator_workers
            );
            let _ = writeln!(
                out,
                "User Max Num Loader Workers: {}",
                self.user_max_num_loader_workers
            );
            let _ = write!(out, "Data Gen Free Workers: {}", self.data_gen_free_workers);
        }
        out
    }
}

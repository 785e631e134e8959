//! Progress bar for the controller loop.

use kdam::{Animation, Bar, BarExt};
use std::sync::{Arc, Mutex};

// Progress bar type alias
pub type ProgressBar = Arc<Mutex<Bar>>;

/// Bar over `total` record sets.
pub fn create_progress_bar(total: u64, desc: &'static str) -> ProgressBar {
    Arc::new(Mutex::new(kdam::tqdm!(
        total = usize::try_from(total).unwrap_or(usize::MAX),
        desc = desc,
        animation = Animation::Classic,
        position = 0,
        unit = " sets"
    )))
}

/// Move the bar to `done` sets. Skips the update if the bar is busy.
pub fn set_progress(pb: &ProgressBar, done: u64) {
    if let Ok(mut bar) = pb.try_lock() {
        let done = usize::try_from(done).unwrap_or(usize::MAX).min(bar.total);
        let _ = bar.update_to(done);
    }
}

/// Final refresh and a newline so log output starts on its own line.
pub fn finish_progress_bar(pb: &ProgressBar) {
    if let Ok(mut bar) = pb.lock() {
        let _ = bar.refresh();
        eprintln!();
    }
}

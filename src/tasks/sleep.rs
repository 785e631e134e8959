use anyhow::Result;
use serde_json::Value;
use std::time::Duration;

use crate::TaskOptions;
use crate::tasks::{Task, TaskContext};

/// Sleeps for `seconds`. Useful for exercising queues without touching an org.
pub struct Sleep {
    seconds: u64,
}

impl Sleep {
    pub fn from_options(options: &TaskOptions) -> Result<Self> {
        Ok(Self {
            seconds: options.get_u64("seconds")?.unwrap_or(5),
        })
    }
}

impl Task for Sleep {
    fn run(&mut self, ctx: &TaskContext<'_>) -> Result<Option<Value>> {
        ctx.log.info(format!("Sleeping for {} seconds", self.seconds));
        std::thread::sleep(Duration::from_secs(self.seconds));
        ctx.log.info("Done");
        Ok(None)
    }
}

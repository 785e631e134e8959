//! Minimal keychain handed to workers.
//!
//! Workers get a frozen org connection, so the only service they may ask for is the connected
//! app. Anything else means the subtask expects more than the worker was given.

use crate::ConnectedApp;
use crate::errors::PipelineError;

pub const CONNECTED_APP_SERVICE: &str = "connected_app";

#[derive(Clone, Debug, Default)]
pub struct WorkerKeychain {
    connected_app: Option<ConnectedApp>,
}

impl WorkerKeychain {
    pub fn new(connected_app: Option<ConnectedApp>) -> Self {
        Self { connected_app }
    }

    pub fn get_service(&self, name: &str) -> Result<&ConnectedApp, PipelineError> {
        match (name, &self.connected_app) {
            (CONNECTED_APP_SERVICE, Some(app)) => Ok(app),
            _ => Err(PipelineError::ServiceNotConfigured(name.to_string())),
        }
    }
}

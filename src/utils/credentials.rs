//! Connected-app credentials for workers: env vars, then `.env` in the given dir.
//!
//! Never prompts. Workers must be able to start without a human at the keyboard.

use log::{debug, info};
use std::path::Path;

use crate::ConnectedApp;
use crate::utils::config::PackagePaths;

fn read_env(suffix: &str) -> Option<String> {
    let key = PackagePaths::get().env_var(suffix);
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn try_env() -> Option<ConnectedApp> {
    let client_id = read_env("CLIENT_ID")?;
    let client_secret = read_env("CLIENT_SECRET")?;
    Some(ConnectedApp {
        client_id,
        client_secret,
        callback_url: read_env("CALLBACK_URL"),
    })
}

/// Read the connected app: env (`SNOWQUEUE_CLIENT_ID`, `SNOWQUEUE_CLIENT_SECRET`,
/// `SNOWQUEUE_CALLBACK_URL`) → `.env` in `dir`. `None` when not configured.
pub fn load_connected_app(dir: &Path) -> Option<ConnectedApp> {
    if let Some(app) = try_env() {
        info!("Connected app found in environment");
        return Some(app);
    }
    let env_path = dir.join(".env");
    if env_path.is_file() {
        let _ = dotenvy::from_path(&env_path);
        if let Some(app) = try_env() {
            info!("Connected app found in {}", env_path.display());
            return Some(app);
        }
    }
    debug!("No connected app configured");
    None
}

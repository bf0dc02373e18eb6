use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::Path;

use anyhow::{Context, Result};
use core_types::SystemState;

/// Loads the persisted snapshot. An absent file starts fresh; a present but
/// unreadable one loads defaults with a warning latched on `error_status`
/// so the operator notices before re-enabling anything.
pub(crate) fn load_state(path: &Path) -> SystemState {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            tracing::info!(path = %path.display(), "no previous state snapshot; starting fresh");
            return SystemState::default();
        }
        Err(err) => {
            tracing::warn!(?err, path = %path.display(), "state snapshot unreadable; loading defaults");
            return corrupt_defaults();
        }
    };

    match serde_json::from_str::<SystemState>(&raw) {
        Ok(state) => {
            tracing::info!(
                buy = state.runtime.buy.on,
                sell = state.runtime.sell.on,
                cyclic = state.runtime.cyclic_on,
                "state restored"
            );
            state
        }
        Err(err) => {
            tracing::warn!(?err, path = %path.display(), "state snapshot corrupt; loading defaults");
            corrupt_defaults()
        }
    }
}

fn corrupt_defaults() -> SystemState {
    let mut state = SystemState::default();
    state.runtime.error_status = "state snapshot corrupt; defaults loaded".to_string();
    state
}

/// Write-to-temp, fsync, rename-over. The remove-then-rename fallback covers
/// platforms where rename does not replace an existing file.
pub(crate) fn write_state_atomic(path: &Path, state: &SystemState) -> Result<()> {
    let payload = serde_json::to_vec_pretty(state).context("serialize state snapshot")?;
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            fs::create_dir_all(dir).context("create snapshot dir")?;
        }
    }

    let tmp = path.with_extension("json.tmp");
    {
        let mut file = File::create(&tmp).context("create snapshot tmp")?;
        file.write_all(&payload).context("write snapshot tmp")?;
        file.sync_all().context("sync snapshot tmp")?;
    }

    if let Err(err) = fs::rename(&tmp, path) {
        if path.exists() {
            let _ = fs::remove_file(path);
            fs::rename(&tmp, path).context("replace snapshot file")?;
        } else {
            return Err(err).context("rename snapshot tmp");
        }
    }
    Ok(())
}

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{AccountState, Position, TradeRecord};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("state file I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("state file {path} is not valid JSON: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Everything the bot needs to resume after a restart.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistedState {
    pub account: AccountState,
    #[serde(default)]
    pub positions: HashMap<String, Position>,
    #[serde(default)]
    pub trades: Vec<TradeRecord>,
}

/// Read the state file. A missing file is not an error: it means a fresh start.
pub fn load(path: &Path) -> Result<Option<PersistedState>, StoreError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => return Err(StoreError::Io { path: path.to_path_buf(), source }),
    };
    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|source| StoreError::Parse { path: path.to_path_buf(), source })
}

/// Write to a sibling temp file, then rename over the target.
pub fn save(path: &Path, state: &PersistedState) -> Result<(), StoreError> {
    let json = serde_json::to_string_pretty(state)
        .map_err(|source| StoreError::Parse { path: path.to_path_buf(), source })?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let io_err = |source| StoreError::Io { path: path.to_path_buf(), source };
    fs::write(&tmp, json).map_err(io_err)?;
    fs::rename(&tmp, path).map_err(io_err)?;
    log::debug!(
        "State saved to {} ({} open, {} trades)",
        path.display(),
        state.positions.len(),
        state.trades.len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Side;
    use chrono::NaiveDate;

    fn sample() -> PersistedState {
        let mut account = AccountState::new(5_000.0, NaiveDate::from_ymd_opt(2024, 5, 1).unwrap());
        account.apply_open(1.25);
        let mut positions = HashMap::new();
        positions.insert(
            "ETHUSDT".to_string(),
            Position {
                symbol: "ETHUSDT".into(),
                side: Side::Short,
                entry_price: 3_000.0,
                notional: 500.0,
                leverage: 5.0,
                stop_loss: 3_045.0,
                take_profit: 2_850.0,
                trailing_stop: Some(2_950.0),
                best_price: 2_900.0,
                entry_fee: 1.25,
                opened_at: 1_714_521_600,
            },
        );
        PersistedState { account, positions, trades: Vec::new() }
    }

    #[test]
    fn missing_file_means_fresh_start() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load(&dir.path().join("nope.json")).unwrap().is_none());
    }

    #[test]
    fn saved_state_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        save(&path, &sample()).unwrap();

        let loaded = load(&path).unwrap().unwrap();
        assert_eq!(loaded.account.balance, 4_998.75);
        let pos = &loaded.positions["ETHUSDT"];
        assert_eq!(pos.side, Side::Short);
        assert_eq!(pos.trailing_stop, Some(2_950.0));
        assert!(!dir.path().join("state.json.tmp").exists());
    }

    #[test]
    fn corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(load(&path), Err(StoreError::Parse { .. })));
    }
}

use std::path::{Path, PathBuf};

use spotguard_core::{DispatchStamp, IdleCounter, format_error_chain};

pub const DEFAULT_COUNTER_FILE: &str = "/tmp/minecraft_zero_players_counter";
pub const DEFAULT_LAST_STOP_SENT_FILE: &str = "/tmp/minecraft_last_stop_sent_timestamp";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parse {}: invalid contents {contents:?}", path.display())]
    Parse { path: PathBuf, contents: String },
    #[error("write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn parse_value(raw: &str) -> Option<u64> {
    let s = raw.trim();
    if let Ok(v) = s.parse::<i64>() {
        return Some(v.max(0) as u64);
    }
    // Older tooling wrote floats ("1712345678.0").
    let f = s.parse::<f64>().ok().filter(|f| f.is_finite())?;
    Some(if f <= 0.0 { 0 } else { f.trunc() as u64 })
}

/// Reads a decimal value. A missing file is 0, not an error.
pub async fn read_value(path: &Path) -> Result<u64, StoreError> {
    let contents = match tokio::fs::read_to_string(path).await {
        Ok(v) => v,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(source) => {
            return Err(StoreError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    parse_value(&contents).ok_or_else(|| StoreError::Parse {
        path: path.to_path_buf(),
        contents: contents.trim().to_string(),
    })
}

/// Writes through `<path>.tmp` + rename so readers never see a torn value.
pub async fn write_value(path: &Path, value: u64) -> Result<(), StoreError> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    let write_err = |source| StoreError::Write {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }
    tokio::fs::write(&tmp, value.to_string())
        .await
        .map_err(write_err)?;
    tokio::fs::rename(&tmp, path).await.map_err(write_err)?;
    Ok(())
}

/// The two durable values the monitor keeps between ticks.
#[derive(Debug, Clone)]
pub struct CounterStore {
    counter_path: PathBuf,
    dispatch_path: PathBuf,
}

impl CounterStore {
    pub fn new(counter_path: impl Into<PathBuf>, dispatch_path: impl Into<PathBuf>) -> Self {
        Self {
            counter_path: counter_path.into(),
            dispatch_path: dispatch_path.into(),
        }
    }

    pub async fn load_counter(&self) -> IdleCounter {
        match read_value(&self.counter_path).await {
            Ok(v) => IdleCounter(v),
            Err(e) => {
                tracing::warn!(error = %format_error_chain(&e), "could not read idle counter; starting from 0");
                IdleCounter(0)
            }
        }
    }

    pub async fn load_last_dispatch(&self) -> DispatchStamp {
        match read_value(&self.dispatch_path).await {
            Ok(v) => DispatchStamp(v),
            Err(e) => {
                tracing::warn!(error = %format_error_chain(&e), "could not read last dispatch timestamp; starting from 0");
                DispatchStamp(0)
            }
        }
    }

    pub async fn save_counter(&self, counter: IdleCounter) -> Result<(), StoreError> {
        write_value(&self.counter_path, counter.0).await
    }

    pub async fn save_last_dispatch(&self, stamp: DispatchStamp) -> Result<(), StoreError> {
        write_value(&self.dispatch_path, stamp.0).await
    }
}

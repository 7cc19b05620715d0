use anyhow::{anyhow, Result};
use log::error;
use std::fmt::Display;
use std::path::Path;

mod base64bytes;
pub use base64bytes::Base64Byte;

pub trait IntoAnyhow<T> {
    fn anyhow(self) -> anyhow::Result<T>;
}

impl<T, E> IntoAnyhow<T> for Result<T, E>
where
    E: Display,
{
    fn anyhow(self) -> anyhow::Result<T> {
        self.map_err(|e| anyhow!(e.to_string()))
    }
}

pub trait IfNotFound<T> {
    fn if_not_found(self, what: impl Display) -> anyhow::Result<T>;
}

impl<T> IfNotFound<T> for Option<T> {
    fn if_not_found(self, what: impl Display) -> anyhow::Result<T> {
        match self {
            Some(t) => Ok(t),
            _ => Err(anyhow!("{} not found", what)),
        }
    }
}

pub trait LogErr {
    fn log_error(self);
}

impl<T, E> LogErr for Result<T, E>
where
    E: Display,
{
    fn log_error(self) {
        if let Err(e) = self {
            error!("{}", e)
        }
    }
}

/// Create the sqlite database file (and its directory) when the dsn points at a file that
/// does not exist yet. Other schemes are left alone.
pub async fn ensure_db_file(dsn: &str) -> Result<()> {
    let path = match dsn.strip_prefix("sqlite://") {
        Some(path) => path.split('?').next().unwrap_or(path),
        None => return Ok(()),
    };
    if path.is_empty() || path == ":memory:" {
        return Ok(());
    }

    let path = Path::new(path);
    if path.exists() {
        return Ok(());
    }
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            tokio::fs::create_dir_all(dir).await?;
        }
    }
    tokio::fs::File::create(path).await?;
    Ok(())
}

pub fn short_msg(msg: &str, len: usize) -> String {
    if msg.chars().count() > len {
        let mut pre_msg: String = msg.chars().take(len).collect();
        pre_msg.push_str("...");
        pre_msg
    } else {
        msg.to_string()
    }
}

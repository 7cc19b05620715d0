use crate::market_rpc::rpc::{get_market_api, WrapClient};
use anyhow::{anyhow, Result};
use chrono::{DateTime, Local, LocalResult, TimeZone, Utc};
use clap::ArgMatches;

pub fn timestamp_to_string(tm: i64) -> String {
    match Local.timestamp_opt(tm, 0) {
        LocalResult::None => "".to_string(),
        LocalResult::Single(v) => v.to_string(),
        LocalResult::Ambiguous(v1, v2) => format!("{}, {}", v1, v2),
    }
}

pub fn datetime_to_string(tm: &DateTime<Utc>) -> String {
    tm.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string()
}

pub fn optional_datetime(tm: &Option<DateTime<Utc>>) -> String {
    tm.as_ref().map(datetime_to_string).unwrap_or_default()
}

pub(crate) fn string_arg(sub_m: &ArgMatches, name: &str) -> Result<String> {
    sub_m
        .get_one::<String>(name)
        .cloned()
        .ok_or_else(|| anyhow!("{} argument not found", name))
}

pub(crate) async fn connect(sub_m: &ArgMatches) -> Result<WrapClient> {
    get_market_api(string_arg(sub_m, "url")?).await
}

pub(crate) fn admin_password(sub_m: &ArgMatches) -> Result<String> {
    match sub_m.get_one::<String>("admin-password") {
        Some(password) if !password.is_empty() => Ok(password.clone()),
        _ => Err(anyhow!(
            "admin password required, pass --admin-password or set TASKMARKET_ADMIN_PASSWORD"
        )),
    }
}

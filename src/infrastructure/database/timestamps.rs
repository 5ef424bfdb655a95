use chrono::{DateTime, TimeZone, Utc};

/// Values below this are taken to be seconds rather than milliseconds.
const MILLIS_THRESHOLD: i64 = 10_000_000_000;

fn utc_epoch() -> DateTime<Utc> {
    Utc.timestamp_opt(0, 0).single().unwrap_or_else(Utc::now)
}

pub fn to_epoch_millis(dt: &DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

/// Reads a stored epoch-millis column, tolerating rows written in seconds.
pub fn utc_from_epoch_millis_lossy(ms: i64) -> DateTime<Utc> {
    let candidate = if ms.abs() < MILLIS_THRESHOLD { ms * 1000 } else { ms };

    if let Some(dt) = Utc.timestamp_millis_opt(candidate).single() {
        if candidate != ms && ms != 0 {
            log::warn!("Coerced seconds timestamp to millis (ms={ms})");
        }
        return dt;
    }

    log::warn!("Invalid epoch millis timestamp (ms={ms}); falling back to epoch");
    utc_epoch()
}

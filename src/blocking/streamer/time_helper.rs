use chrono::{DateTime, Local, TimeZone};
use mongodb::bson::Timestamp;

pub fn to_datetime(ts: &Timestamp) -> Option<DateTime<Local>> {
    Local.timestamp_opt(ts.time as i64, 0).single()
}

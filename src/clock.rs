use chrono::{DateTime, NaiveDateTime, SubsecRound, Utc};

/// Format used for `Last-Modified` and accepted for `If-Modified-Since`.
///
/// Only the preferred IMF-fixdate form is parsed. Clients still sending the
/// obsolete RFC 850 or asctime forms simply get a full response.
const HTTP_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Freshness of a response. `None` means freshness is not tracked.
pub type Freshness = Option<DateTime<Utc>>;

/// import_time
///
/// Converts a stored Unix timestamp into a time value. The stored value `0`
/// is the "unset" marker and maps to `None`.
pub fn import_time(unix: i64) -> Freshness {
    if unix == 0 {
        return None;
    }
    DateTime::from_timestamp(unix, 0)
}

/// export_time
///
/// Inverse of [`import_time`]: `None` is stored as `0`.
pub fn export_time(time: Freshness) -> i64 {
    time.map(|t| t.timestamp()).unwrap_or(0)
}

/// last_time
///
/// Returns the most recent of the given times, ignoring unset ones.
/// Returns `None` when every input is unset (or there are none).
pub fn last_time<I>(times: I) -> Freshness
where
    I: IntoIterator<Item = Freshness>,
{
    times.into_iter().flatten().max()
}

pub fn truncate_to_seconds(time: DateTime<Utc>) -> DateTime<Utc> {
    time.trunc_subsecs(0)
}

/// http_date
///
/// Formats a time as an HTTP date. The zone token is always `GMT`.
pub fn http_date(time: DateTime<Utc>) -> String {
    time.format(HTTP_DATE_FORMAT).to_string()
}

/// parse_http_date
///
/// Parses an `If-Modified-Since` style value. Anything other than the
/// fixed `GMT` form yields `None`.
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value.trim(), HTTP_DATE_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

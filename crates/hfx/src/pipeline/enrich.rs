//! 🌍 Enrich — give every record a place on the map and a time on the clock.
//!
//! Three fields, always the same three:
//! - `src_location`  — `"<lat>,<lon>"` from `src_latitude`/`src_longitude`
//! - `dest_location` — same, from the `dest_*` pair
//! - `timestamp`     — when *we* saw it (RFC 3339, UTC), not when the sensor did
//!
//! Missing or non-numeric coordinates count as `0`. Null Island gets a lot of traffic.
//!
//! ⚠️ Enriching the same record twice rewrites `timestamp` with the newer time.
//! Same field names, different value. Testers: compare names, not timestamps.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::common::Record;

pub const SRC_LATITUDE: &str = "src_latitude";
pub const SRC_LONGITUDE: &str = "src_longitude";
pub const DEST_LATITUDE: &str = "dest_latitude";
pub const DEST_LONGITUDE: &str = "dest_longitude";

pub const SRC_LOCATION: &str = "src_location";
pub const DEST_LOCATION: &str = "dest_location";
pub const TIMESTAMP: &str = "timestamp";

/// 📍 `"<lat>,<lon>"` with six decimals, the shape a geo_point mapping accepts as a string.
pub fn geo_point(latitude: f64, longitude: f64) -> String {
    format!("{latitude:.6},{longitude:.6}")
}

/// 🚀 Add the derived fields to `record`, in place, stamping it with `now`.
///
/// The clock is a parameter so tests can pin it; the pipeline passes `Utc::now()`.
pub fn enrich(record: &mut Record, now: DateTime<Utc>) -> &mut Record {
    let coordinate = |record: &Record, field: &str| record.number(field).unwrap_or(0.0);

    let src = geo_point(coordinate(record, SRC_LATITUDE), coordinate(record, SRC_LONGITUDE));
    let dest = geo_point(coordinate(record, DEST_LATITUDE), coordinate(record, DEST_LONGITUDE));

    record.insert(SRC_LOCATION, src);
    record.insert(DEST_LOCATION, dest);
    record.insert(TIMESTAMP, now.to_rfc3339_opts(SecondsFormat::Secs, true));
    record
}

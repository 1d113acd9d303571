//! Temporal normalization.
//!
//! Every temporal value leaving the extractor is an instant in UTC. Naive timestamps and dates
//! coming from the source are interpreted as UTC, and text columns holding timestamps (common in
//! databases migrated from SQLite) are parsed.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

use crate::bail;
use crate::error::{ErrorKind, SyncResult};
use crate::schema::{ColumnSchema, WarehouseType};
use crate::types::Cell;

/// Canonical textual form of a normalized timestamp, e.g. `2024-05-01 09:30:00.000000+00:00`.
pub const CANONICAL_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f%:z";

const NAIVE_DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];
const OFFSET_DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%d %H:%M:%S%.f%#z"];
const DATE_FORMAT: &str = "%Y-%m-%d";

pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.format(CANONICAL_TIMESTAMP_FORMAT).to_string()
}

/// Parses the textual timestamp shapes found in source databases into UTC.
pub fn parse_timestamp(value: &str) -> SyncResult<DateTime<Utc>> {
    let value = value.trim();

    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Ok(parsed.with_timezone(&Utc));
    }
    for format in OFFSET_DATETIME_FORMATS {
        if let Ok(parsed) = DateTime::parse_from_str(value, format) {
            return Ok(parsed.with_timezone(&Utc));
        }
    }
    for format in NAIVE_DATETIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(parsed.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, DATE_FORMAT) {
        return Ok(date.and_hms_opt(0, 0, 0).unwrap_or_default().and_utc());
    }

    bail!(
        ErrorKind::ConversionError,
        "Value is not a recognized timestamp",
        value
    )
}

/// Brings `cell` into the canonical representation of `column`.
///
/// Only temporal columns are touched, everything else passes through unchanged.
pub fn normalize_cell(column: &ColumnSchema, cell: Cell) -> SyncResult<Cell> {
    if cell.is_null() {
        if !column.nullable {
            bail!(
                ErrorKind::InvalidData,
                "Null value in non-nullable column",
                &column.name
            );
        }
        return Ok(cell);
    }

    match (column.warehouse_type, cell) {
        (WarehouseType::Timestamp, Cell::TimestampTz(value)) => Ok(Cell::TimestampTz(value)),
        (WarehouseType::Timestamp, Cell::Date(date)) => Ok(Cell::TimestampTz(
            date.and_hms_opt(0, 0, 0).unwrap_or_default().and_utc(),
        )),
        (WarehouseType::Timestamp, Cell::String(text)) => {
            Ok(Cell::TimestampTz(parse_timestamp(&text)?))
        }
        (WarehouseType::Date, Cell::Date(date)) => Ok(Cell::Date(date)),
        (WarehouseType::Date, Cell::TimestampTz(value)) => Ok(Cell::Date(value.date_naive())),
        (WarehouseType::Date, Cell::String(text)) => {
            Ok(Cell::Date(parse_timestamp(&text)?.date_naive()))
        }
        (warehouse_type, cell) if warehouse_type.is_temporal() => bail!(
            ErrorKind::ConversionError,
            "Value cannot be converted to a temporal column",
            format!("{} ({warehouse_type}): {cell:?}", column.name)
        ),
        (_, cell) => Ok(cell),
    }
}

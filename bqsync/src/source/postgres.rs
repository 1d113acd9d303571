use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{Column, PgPool, Row, TypeInfo};
use tracing::debug;

use crate::bail;
use crate::error::{ErrorKind, SyncResult};
use crate::schema::EntityDescriptor;
use crate::source::normalize::normalize_cell;
use crate::source::{ChangeExtractor, check_row_order, extract_error};
use crate::types::{Cell, SyncRow};

/// Change extractor reading the operational Postgres database.
///
/// Issues the entity's rendered source query with the cursor bound as `$1`. The query runs as a
/// plain read in its own implicit transaction, so no rows are locked.
#[derive(Debug, Clone)]
pub struct PostgresChangeExtractor {
    pool: PgPool,
}

impl PostgresChangeExtractor {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch(&self, entity: &EntityDescriptor, since_row_id: i64) -> SyncResult<Vec<SyncRow>> {
        let query = entity.render_source_query();
        let rows = sqlx::query(&query)
            .bind(since_row_id)
            .fetch_all(&self.pool)
            .await?;

        let rows = rows
            .iter()
            .map(|row| decode_row(entity, row))
            .collect::<SyncResult<Vec<_>>>()?;
        check_row_order(entity, since_row_id, &rows)?;

        Ok(rows)
    }
}

impl ChangeExtractor for PostgresChangeExtractor {
    async fn extract(&self, entity: &EntityDescriptor, since_row_id: i64) -> SyncResult<Vec<SyncRow>> {
        let rows = self
            .fetch(entity, since_row_id)
            .await
            .map_err(|err| extract_error(entity, err))?;

        debug!(
            entity = %entity.name,
            since_row_id,
            rows = rows.len(),
            "extracted changed rows"
        );

        Ok(rows)
    }
}

/// Decodes the schema columns of `row` by name, normalizing each value.
fn decode_row(entity: &EntityDescriptor, row: &PgRow) -> SyncResult<SyncRow> {
    let mut values = Vec::with_capacity(entity.schema.len());
    for column in &entity.schema {
        let ordinal = row.try_column(column.name.as_str())?.ordinal();
        let cell = decode_cell(row, ordinal)?;
        values.push(normalize_cell(column, cell)?);
    }

    let id = entity
        .identifier_index()
        .and_then(|index| values[index].as_i64());
    let Some(id) = id else {
        bail!(
            ErrorKind::InvalidData,
            "Row has no integer identifier",
            format!("{}.{}", entity.name, entity.identifier_column)
        );
    };

    Ok(SyncRow::new(id, values))
}

/// Maps a Postgres value onto a [`Cell`] based on its column type.
fn decode_cell(row: &PgRow, ordinal: usize) -> SyncResult<Cell> {
    let column = row.column(ordinal);
    let cell: Cell = match column.type_info().name() {
        "BOOL" => row.try_get::<Option<bool>, _>(ordinal)?.into(),
        "INT2" => row
            .try_get::<Option<i16>, _>(ordinal)?
            .map(i64::from)
            .into(),
        "INT4" => row
            .try_get::<Option<i32>, _>(ordinal)?
            .map(i64::from)
            .into(),
        "INT8" => row.try_get::<Option<i64>, _>(ordinal)?.into(),
        "FLOAT4" => row
            .try_get::<Option<f32>, _>(ordinal)?
            .map(f64::from)
            .into(),
        "FLOAT8" => row.try_get::<Option<f64>, _>(ordinal)?.into(),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" | "CHAR" => {
            row.try_get::<Option<String>, _>(ordinal)?.into()
        }
        "JSON" | "JSONB" => row.try_get::<Option<serde_json::Value>, _>(ordinal)?.into(),
        "TIMESTAMPTZ" => row.try_get::<Option<DateTime<Utc>>, _>(ordinal)?.into(),
        "TIMESTAMP" => row
            .try_get::<Option<NaiveDateTime>, _>(ordinal)?
            .map(|value| value.and_utc())
            .into(),
        "DATE" => row.try_get::<Option<NaiveDate>, _>(ordinal)?.into(),
        other => bail!(
            ErrorKind::ConversionError,
            "Unsupported source column type",
            format!("{}: {other}", column.name())
        ),
    };

    Ok(cell)
}

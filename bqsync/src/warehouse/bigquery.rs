use std::collections::HashSet;
use std::fmt;

use gcp_bigquery_client::Client;
use gcp_bigquery_client::error::BQError;
use gcp_bigquery_client::model::query_parameter::QueryParameter;
use gcp_bigquery_client::model::query_parameter_type::QueryParameterType;
use gcp_bigquery_client::model::query_parameter_value::QueryParameterValue;
use gcp_bigquery_client::model::query_request::QueryRequest;
use gcp_bigquery_client::model::query_response::ResultSet;
use gcp_bigquery_client::model::table_data_insert_all_request::TableDataInsertAllRequest;
use gcp_bigquery_client::yup_oauth2::parse_service_account_key;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::error::{ErrorKind, SyncError, SyncResult};
use crate::schema::ColumnSchema;
use crate::source::normalize::format_timestamp;
use crate::sync_error;
use crate::types::{Cell, SyncRow};
use crate::warehouse::WarehouseClient;

/// Maximum number of rows sent in one streaming insert request.
pub const MAX_ROWS_PER_INSERT: usize = 500;

/// Budget for the encoded rows of one streaming insert request, below the 10 MB request limit.
pub const MAX_INSERT_REQUEST_BYTES: usize = 9 * 1024 * 1024;

/// Upper bound of the `{"insertId":"","json":}` envelope around each row.
const INSERT_ROW_ENVELOPE_BYTES: usize = 32;

/// Project and dataset every table of a [`BigQueryClient`] lives in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetRef {
    pub project_id: String,
    pub dataset_id: String,
}

impl DatasetRef {
    pub fn new(project_id: impl Into<String>, dataset_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            dataset_id: dataset_id.into(),
        }
    }

    /// Backtick quoted `project.dataset.table` name.
    pub fn full_table_name(&self, table: &str) -> SyncResult<String> {
        let project_id = sanitize_identifier(&self.project_id, "BigQuery project id")?;
        let dataset_id = sanitize_identifier(&self.dataset_id, "BigQuery dataset id")?;
        let table_id = sanitize_identifier(table, "BigQuery table id")?;

        Ok(format!("`{project_id}.{dataset_id}.{table_id}`"))
    }

    fn information_schema_columns(&self) -> SyncResult<String> {
        let project_id = sanitize_identifier(&self.project_id, "BigQuery project id")?;
        let dataset_id = sanitize_identifier(&self.dataset_id, "BigQuery dataset id")?;

        Ok(format!(
            "`{project_id}.{dataset_id}.INFORMATION_SCHEMA.COLUMNS`"
        ))
    }
}

/// Warehouse client for Google BigQuery.
///
/// DDL, merges and inserts from staging run as query jobs. Rows are streamed into staging tables
/// in requests of at most [`MAX_ROWS_PER_INSERT`] rows and [`MAX_INSERT_REQUEST_BYTES`] bytes, each
/// row carrying an insert id derived from its identifier so a retried request is deduplicated.
pub struct BigQueryClient {
    dataset: DatasetRef,
    client: Client,
}

impl BigQueryClient {
    /// Creates a client authenticated with a service account key in JSON form.
    pub async fn new_with_key(
        project_id: String,
        dataset_id: String,
        service_account_key: &str,
    ) -> SyncResult<BigQueryClient> {
        let key = parse_service_account_key(service_account_key).map_err(|err| {
            sync_error!(
                ErrorKind::AuthenticationError,
                "Invalid BigQuery service account key",
                err
            )
        })?;
        let client = Client::from_service_account_key(key, false)
            .await
            .map_err(bq_error_to_sync_error)?;

        Ok(BigQueryClient {
            dataset: DatasetRef::new(project_id, dataset_id),
            client,
        })
    }

    pub fn dataset(&self) -> &DatasetRef {
        &self.dataset
    }

    /// Runs a statement as a query job and returns its result set.
    async fn query(&self, request: QueryRequest) -> SyncResult<ResultSet> {
        let response = self
            .client
            .job()
            .query(&self.dataset.project_id, request)
            .await
            .map_err(bq_error_to_sync_error)?;

        if let Some(errors) = response.errors.as_ref().filter(|errors| !errors.is_empty()) {
            return Err(sync_error!(
                ErrorKind::DestinationQueryFailed,
                "BigQuery query reported errors",
                format!("{errors:?}")
            ));
        }
        if response.job_complete == Some(false) {
            return Err(sync_error!(
                ErrorKind::DestinationIoError,
                "BigQuery query did not complete in time"
            ));
        }

        Ok(ResultSet::new_from_query_response(response))
    }

    /// Column names of `table`, empty when the table does not exist.
    async fn existing_columns(&self, table: &str) -> SyncResult<HashSet<String>> {
        let query = format!(
            "select column_name from {} where table_name = @table_name",
            self.dataset.information_schema_columns()?
        );
        let mut request = QueryRequest::new(query);
        request.query_parameters = Some(vec![string_parameter("table_name", table)]);

        let mut result_set = self.query(request).await?;
        let mut columns = HashSet::new();
        while result_set.next_row() {
            if let Some(name) = result_set
                .get_string_by_name("column_name")
                .map_err(bq_error_to_sync_error)?
            {
                columns.insert(name);
            }
        }

        Ok(columns)
    }

    async fn insert_chunk(&self, table: &str, rows: Vec<InsertRow>) -> SyncResult<()> {
        let mut request = TableDataInsertAllRequest::new();
        for row in rows {
            request
                .add_row(Some(row.insert_id), row.json)
                .map_err(bq_error_to_sync_error)?;
        }

        let response = self
            .client
            .tabledata()
            .insert_all(
                &self.dataset.project_id,
                &self.dataset.dataset_id,
                table,
                request,
            )
            .await
            .map_err(|err| match err {
                // Freshly created tables take a moment to become visible to streaming inserts.
                BQError::ResponseError { error } if error.error.code == 404 => sync_error!(
                    ErrorKind::DestinationIoError,
                    "BigQuery table not yet visible to streaming inserts",
                    table
                ),
                err => bq_error_to_sync_error(err),
            })?;

        if let Some(errors) = response.insert_errors.as_ref().filter(|errors| !errors.is_empty()) {
            return Err(sync_error!(
                ErrorKind::DestinationQueryFailed,
                "BigQuery rejected inserted rows",
                format!("{table}: {} rows failed, first: {:?}", errors.len(), errors[0])
            ));
        }

        Ok(())
    }
}

impl WarehouseClient for BigQueryClient {
    async fn create_table_if_absent(
        &self,
        table: &str,
        schema: &[ColumnSchema],
        primary_key: &[String],
    ) -> SyncResult<bool> {
        let full_table_name = self.dataset.full_table_name(table)?;
        let existing = self.existing_columns(table).await?;

        if existing.is_empty() {
            let query = create_table_query(&full_table_name, schema, primary_key)?;
            info!(%full_table_name, "creating table in bigquery");
            self.query(QueryRequest::new(query)).await?;

            return Ok(true);
        }

        if let Some(query) = add_columns_query(&full_table_name, schema, &existing)? {
            info!(%full_table_name, "adding missing columns in bigquery");
            self.query(QueryRequest::new(query)).await?;
        }

        Ok(false)
    }

    async fn append_rows(
        &self,
        table: &str,
        schema: &[ColumnSchema],
        rows: &[SyncRow],
    ) -> SyncResult<usize> {
        sanitize_identifier(table, "BigQuery table id")?;

        let encoded = rows.iter().map(|row| InsertRow::new(table, schema, row));
        for chunk in split_into_requests(encoded, MAX_ROWS_PER_INSERT, MAX_INSERT_REQUEST_BYTES) {
            let count = chunk.len();
            self.insert_chunk(table, chunk).await?;
            debug!(table, rows = count, "inserted rows chunk into bigquery");
        }

        Ok(rows.len())
    }

    async fn merge(
        &self,
        destination: &str,
        staging: &str,
        schema: &[ColumnSchema],
        match_columns: &[String],
    ) -> SyncResult<()> {
        let query = merge_query(
            &self.dataset.full_table_name(destination)?,
            &self.dataset.full_table_name(staging)?,
            schema,
            match_columns,
        )?;
        self.query(QueryRequest::new(query)).await?;

        Ok(())
    }

    async fn insert_from(
        &self,
        destination: &str,
        staging: &str,
        schema: &[ColumnSchema],
        dedupe_column: &str,
    ) -> SyncResult<()> {
        let query = insert_from_query(
            &self.dataset.full_table_name(destination)?,
            &self.dataset.full_table_name(staging)?,
            schema,
            dedupe_column,
        )?;
        self.query(QueryRequest::new(query)).await?;

        Ok(())
    }

    async fn count_distinct(&self, table: &str, column: &str) -> SyncResult<usize> {
        let query = format!(
            "select count(distinct {}) as row_count from {}",
            quoted_column(column)?,
            self.dataset.full_table_name(table)?
        );

        let mut result_set = self.query(QueryRequest::new(query)).await?;
        let count = if result_set.next_row() {
            result_set
                .get_i64_by_name("row_count")
                .map_err(bq_error_to_sync_error)?
                .unwrap_or(0)
        } else {
            0
        };

        Ok(usize::try_from(count).unwrap_or_default())
    }

    async fn drop_table(&self, table: &str) -> SyncResult<()> {
        let full_table_name = self.dataset.full_table_name(table)?;
        debug!(%full_table_name, "dropping table from bigquery");

        let query = format!("drop table if exists {full_table_name}");
        self.query(QueryRequest::new(query)).await?;

        Ok(())
    }
}

impl fmt::Debug for BigQueryClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BigQueryClient")
            .field("project_id", &self.dataset.project_id)
            .field("dataset_id", &self.dataset.dataset_id)
            .finish()
    }
}

fn string_parameter(name: &str, value: &str) -> QueryParameter {
    QueryParameter {
        name: Some(name.to_string()),
        parameter_type: Some(QueryParameterType {
            r#type: "STRING".to_string(),
            array_type: None,
            struct_types: None,
        }),
        parameter_value: Some(QueryParameterValue {
            value: Some(value.to_string()),
            array_values: None,
            struct_values: None,
        }),
    }
}

/// Sanitizes an identifier for backtick quoting.
///
/// Rejects empty identifiers and control characters, escapes backticks and backslashes.
fn sanitize_identifier(identifier: &str, context: &str) -> SyncResult<String> {
    if identifier.is_empty() {
        return Err(sync_error!(
            ErrorKind::DestinationTableNameInvalid,
            "Invalid BigQuery identifier",
            format!("{context} cannot be empty")
        ));
    }
    if identifier.chars().any(char::is_control) {
        return Err(sync_error!(
            ErrorKind::DestinationTableNameInvalid,
            "Invalid BigQuery identifier",
            format!("{context} contains control characters")
        ));
    }

    let mut escaped = String::with_capacity(identifier.len());
    for ch in identifier.chars() {
        match ch {
            '`' => escaped.push_str("\\`"),
            '\\' => escaped.push_str("\\\\"),
            _ => escaped.push(ch),
        }
    }

    Ok(escaped)
}

fn quoted_column(name: &str) -> SyncResult<String> {
    sanitize_identifier(name, "BigQuery column name").map(|name| format!("`{name}`"))
}

fn column_definition(column: &ColumnSchema) -> SyncResult<String> {
    let mut definition = format!("{} {}", quoted_column(&column.name)?, column.warehouse_type);
    if !column.nullable {
        definition.push_str(" not null");
    }

    Ok(definition)
}

fn create_table_query(
    full_table_name: &str,
    schema: &[ColumnSchema],
    primary_key: &[String],
) -> SyncResult<String> {
    let mut columns = schema
        .iter()
        .map(column_definition)
        .collect::<SyncResult<Vec<_>>>()?
        .join(", ");

    if !primary_key.is_empty() {
        let keys = primary_key
            .iter()
            .map(|key| quoted_column(key))
            .collect::<SyncResult<Vec<_>>>()?;
        columns.push_str(&format!(", primary key ({}) not enforced", keys.join(", ")));
    }

    Ok(format!("create table if not exists {full_table_name} ({columns})"))
}

/// `alter table` adding the columns of `schema` missing from `existing`, if any.
///
/// Added columns are always nullable since rows already in the table have no value for them.
fn add_columns_query(
    full_table_name: &str,
    schema: &[ColumnSchema],
    existing: &HashSet<String>,
) -> SyncResult<Option<String>> {
    let additions = schema
        .iter()
        .filter(|column| !existing.contains(&column.name))
        .map(|column| {
            Ok(format!(
                "add column if not exists {} {}",
                quoted_column(&column.name)?,
                column.warehouse_type
            ))
        })
        .collect::<SyncResult<Vec<_>>>()?;

    if additions.is_empty() {
        return Ok(None);
    }

    Ok(Some(format!(
        "alter table {full_table_name} {}",
        additions.join(", ")
    )))
}

/// Upserts staging rows into the destination keyed on `match_columns`.
///
/// Staging rows are deduplicated per key first, so a chunk inserted twice by a retried request
/// cannot make the merge match multiple source rows.
fn merge_query(
    destination: &str,
    staging: &str,
    schema: &[ColumnSchema],
    match_columns: &[String],
) -> SyncResult<String> {
    if match_columns.is_empty() {
        return Err(sync_error!(
            ErrorKind::InvalidState,
            "Merge requires at least one key column",
            destination
        ));
    }

    let keys = match_columns
        .iter()
        .map(|key| quoted_column(key))
        .collect::<SyncResult<Vec<_>>>()?;
    let columns = schema
        .iter()
        .map(|column| quoted_column(&column.name))
        .collect::<SyncResult<Vec<_>>>()?;
    let updates = schema
        .iter()
        .filter(|column| !match_columns.contains(&column.name))
        .map(|column| quoted_column(&column.name).map(|name| format!("{name} = source.{name}")))
        .collect::<SyncResult<Vec<_>>>()?;

    let on = keys
        .iter()
        .map(|key| format!("target.{key} = source.{key}"))
        .collect::<Vec<_>>()
        .join(" and ");
    let source_values = columns
        .iter()
        .map(|column| format!("source.{column}"))
        .collect::<Vec<_>>()
        .join(", ");

    let mut query = format!(
        "merge {destination} as target using (select * from {staging} where true qualify row_number() over (partition by {}) = 1) as source on {on}",
        keys.join(", ")
    );
    if !updates.is_empty() {
        query.push_str(&format!(" when matched then update set {}", updates.join(", ")));
    }
    query.push_str(&format!(
        " when not matched then insert ({}) values ({source_values})",
        columns.join(", ")
    ));

    Ok(query)
}

/// Appends the rows of `staging` to `destination`, once per `dedupe_column` value.
fn insert_from_query(
    destination: &str,
    staging: &str,
    schema: &[ColumnSchema],
    dedupe_column: &str,
) -> SyncResult<String> {
    let columns = schema
        .iter()
        .map(|column| quoted_column(&column.name))
        .collect::<SyncResult<Vec<_>>>()?
        .join(", ");

    Ok(format!(
        "insert into {destination} ({columns}) select {columns} from {staging} where true qualify row_number() over (partition by {}) = 1",
        quoted_column(dedupe_column)?
    ))
}

/// One row of a streaming insert request.
#[derive(Debug, Clone)]
struct InsertRow {
    insert_id: String,
    json: Value,
}

impl InsertRow {
    fn new(table: &str, schema: &[ColumnSchema], row: &SyncRow) -> Self {
        Self {
            insert_id: format!("{table}:{}", row.id),
            json: encode_row(schema, row),
        }
    }

    /// Bytes this row adds to the request body.
    fn encoded_len(&self) -> usize {
        self.insert_id.len() + self.json.to_string().len() + INSERT_ROW_ENVELOPE_BYTES
    }
}

/// Groups rows into requests bounded by row count and encoded size.
///
/// A row larger than `max_bytes` on its own is sent alone and left for BigQuery to judge.
fn split_into_requests(
    rows: impl IntoIterator<Item = InsertRow>,
    max_rows: usize,
    max_bytes: usize,
) -> Vec<Vec<InsertRow>> {
    let mut requests = Vec::new();
    let mut current: Vec<InsertRow> = Vec::new();
    let mut current_bytes = 0;

    for row in rows {
        let row_bytes = row.encoded_len();
        let full = current.len() >= max_rows || current_bytes + row_bytes > max_bytes;
        if full && !current.is_empty() {
            requests.push(std::mem::take(&mut current));
            current_bytes = 0;
        }

        current_bytes += row_bytes;
        current.push(row);
    }
    if !current.is_empty() {
        requests.push(current);
    }

    requests
}

/// Encodes a row as the JSON object expected by streaming inserts.
fn encode_row(schema: &[ColumnSchema], row: &SyncRow) -> Value {
    let object: Map<String, Value> = schema
        .iter()
        .zip(&row.values)
        .map(|(column, cell)| (column.name.clone(), encode_cell(cell)))
        .collect();

    Value::Object(object)
}

fn encode_cell(cell: &Cell) -> Value {
    match cell {
        Cell::Null => Value::Null,
        Cell::Bool(value) => Value::Bool(*value),
        Cell::I64(value) => Value::from(*value),
        Cell::F64(value) => serde_json::Number::from_f64(*value)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(value.to_string())),
        Cell::String(value) => Value::String(value.clone()),
        // JSON columns take the document as a string.
        Cell::Json(value) => Value::String(value.to_string()),
        Cell::TimestampTz(value) => Value::String(format_timestamp(value)),
        Cell::Date(value) => Value::String(value.format("%Y-%m-%d").to_string()),
    }
}

/// Maps BigQuery errors onto [`SyncError`]s, classifying transient conditions as retryable.
fn bq_error_to_sync_error(err: BQError) -> SyncError {
    let (kind, description) = match &err {
        BQError::InvalidServiceAccountKey(_) => (
            ErrorKind::AuthenticationError,
            "Invalid BigQuery service account key",
        ),
        BQError::InvalidServiceAccountAuthenticator(_) => (
            ErrorKind::AuthenticationError,
            "Invalid BigQuery service account authenticator",
        ),
        BQError::AuthError(_) => (
            ErrorKind::AuthenticationError,
            "BigQuery authentication error",
        ),
        BQError::YupAuthError(_) => (
            ErrorKind::AuthenticationError,
            "BigQuery OAuth authentication error",
        ),
        BQError::NoToken => (
            ErrorKind::AuthenticationError,
            "BigQuery authentication token missing",
        ),
        BQError::RequestError(_) => (ErrorKind::DestinationIoError, "BigQuery request failed"),
        BQError::ResponseError { error } => match error.error.code {
            429 => (ErrorKind::DestinationThrottled, "BigQuery rate limit exceeded"),
            500 | 502 | 503 | 504 => (
                ErrorKind::DestinationIoError,
                "BigQuery service temporarily unavailable",
            ),
            404 => (ErrorKind::DestinationTableMissing, "BigQuery table not found"),
            401 | 403 => (ErrorKind::AuthenticationError, "BigQuery access denied"),
            _ => (ErrorKind::DestinationQueryFailed, "BigQuery response error"),
        },
        BQError::SerializationError(_) => (
            ErrorKind::SerializationError,
            "BigQuery JSON serialization error",
        ),
        _ => (ErrorKind::DestinationQueryFailed, "BigQuery operation failed"),
    };

    sync_error!(kind, description, err.to_string())
}

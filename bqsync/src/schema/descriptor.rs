use std::collections::HashSet;
use std::fmt;

use pg_escape::quote_identifier;
use serde::Serialize;

use crate::bail;
use crate::error::{ErrorKind, SyncResult};

/// Query used when an entity does not override it.
///
/// Placeholders are substituted with quoted identifiers by
/// [`EntityDescriptor::render_source_query`]; `$1` is bound to the cursor position.
pub const DEFAULT_SOURCE_QUERY_TEMPLATE: &str =
    "select {columns} from {table} where {identifier} > $1 order by {identifier} asc";

/// Column types understood by the warehouse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WarehouseType {
    String,
    Int64,
    Float64,
    Bool,
    Timestamp,
    Date,
    Json,
}

impl WarehouseType {
    pub fn as_sql(&self) -> &'static str {
        match self {
            WarehouseType::String => "STRING",
            WarehouseType::Int64 => "INT64",
            WarehouseType::Float64 => "FLOAT64",
            WarehouseType::Bool => "BOOL",
            WarehouseType::Timestamp => "TIMESTAMP",
            WarehouseType::Date => "DATE",
            WarehouseType::Json => "JSON",
        }
    }

    pub fn is_temporal(&self) -> bool {
        matches!(self, WarehouseType::Timestamp | WarehouseType::Date)
    }
}

impl fmt::Display for WarehouseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnSchema {
    pub name: String,
    pub warehouse_type: WarehouseType,
    pub nullable: bool,
}

impl ColumnSchema {
    pub fn new(name: impl Into<String>, warehouse_type: WarehouseType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            warehouse_type,
            nullable,
        }
    }

    pub fn required(name: impl Into<String>, warehouse_type: WarehouseType) -> Self {
        Self::new(name, warehouse_type, false)
    }

    pub fn nullable(name: impl Into<String>, warehouse_type: WarehouseType) -> Self {
        Self::new(name, warehouse_type, true)
    }
}

/// Everything the engine needs to mirror one entity.
///
/// Descriptors are plain data: adding an entity never requires new control flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityDescriptor {
    /// Entity name, also the destination table name and the cursor key.
    pub name: String,
    pub source_table: String,
    pub source_query_template: String,
    /// Strictly increasing integer column used as the change token.
    pub identifier_column: String,
    pub schema: Vec<ColumnSchema>,
    pub supports_update: bool,
    /// Merge keys. Only meaningful when `supports_update` is true.
    pub primary_key_columns: Vec<String>,
}

impl EntityDescriptor {
    /// An append-only entity read from the table of the same name.
    pub fn new(name: impl Into<String>, schema: Vec<ColumnSchema>) -> Self {
        let name = name.into();
        Self {
            source_table: name.clone(),
            name,
            source_query_template: DEFAULT_SOURCE_QUERY_TEMPLATE.to_string(),
            identifier_column: "id".to_string(),
            schema,
            supports_update: false,
            primary_key_columns: Vec::new(),
        }
    }

    /// Marks the entity updatable, merged on `columns`.
    pub fn with_primary_key<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.supports_update = true;
        self.primary_key_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_source_table(mut self, table: impl Into<String>) -> Self {
        self.source_table = table.into();
        self
    }

    pub fn with_source_query(mut self, template: impl Into<String>) -> Self {
        self.source_query_template = template.into();
        self
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.schema.iter().position(|column| column.name == name)
    }

    pub fn identifier_index(&self) -> Option<usize> {
        self.column_index(&self.identifier_column)
    }

    /// Expands the source query template.
    pub fn render_source_query(&self) -> String {
        let columns = self
            .schema
            .iter()
            .map(|column| quote_identifier(&column.name).into_owned())
            .collect::<Vec<_>>()
            .join(", ");

        self.source_query_template
            .replace("{columns}", &columns)
            .replace("{table}", &quote_identifier(&self.source_table))
            .replace("{identifier}", &quote_identifier(&self.identifier_column))
    }

    /// Checks the internal consistency of the descriptor.
    pub fn validate(&self) -> SyncResult<()> {
        if self.name.is_empty() {
            bail!(ErrorKind::ConfigError, "Entity name cannot be empty");
        }
        if self.schema.is_empty() {
            bail!(ErrorKind::ConfigError, "Entity schema cannot be empty", &self.name);
        }

        let mut seen = HashSet::new();
        for column in &self.schema {
            if !seen.insert(column.name.as_str()) {
                bail!(
                    ErrorKind::ConfigError,
                    "Entity schema has a duplicate column",
                    format!("{}.{}", self.name, column.name)
                );
            }
        }

        match self.identifier_index().map(|index| &self.schema[index]) {
            Some(column) if column.warehouse_type == WarehouseType::Int64 && !column.nullable => {}
            _ => bail!(
                ErrorKind::ConfigError,
                "Entity identifier must be a non-null INT64 column of its schema",
                format!("{}.{}", self.name, self.identifier_column)
            ),
        }

        if self.supports_update {
            if self.primary_key_columns.is_empty() {
                bail!(
                    ErrorKind::ConfigError,
                    "Updatable entity requires primary key columns",
                    &self.name
                );
            }
            for key in &self.primary_key_columns {
                if self.column_index(key).is_none() {
                    bail!(
                        ErrorKind::ConfigError,
                        "Primary key column is not part of the entity schema",
                        format!("{}.{key}", self.name)
                    );
                }
            }
        }

        if !self.source_query_template.contains("$1") {
            bail!(
                ErrorKind::ConfigError,
                "Source query template must bind the cursor position as $1",
                &self.name
            );
        }

        Ok(())
    }
}

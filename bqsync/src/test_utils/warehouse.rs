use std::sync::Arc;

use tokio::sync::{Mutex, Notify};

use crate::error::{ErrorKind, SyncResult};
use crate::schema::ColumnSchema;
use crate::sync_error;
use crate::types::SyncRow;
use crate::warehouse::{WarehouseClient, is_staging_table};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WarehouseOp {
    CreateTable,
    AppendRows,
    CountDistinct,
    Merge,
    InsertFrom,
    DropTable,
}

/// Table an injected fault or gate applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableMatch {
    Any,
    Exact(String),
    /// Staging tables of the given entity.
    StagingOf(String),
}

impl TableMatch {
    pub fn exact(table: &str) -> Self {
        TableMatch::Exact(table.to_string())
    }

    pub fn staging_of(entity_name: &str) -> Self {
        TableMatch::StagingOf(entity_name.to_string())
    }

    fn matches(&self, table: &str) -> bool {
        match self {
            TableMatch::Any => true,
            TableMatch::Exact(expected) => expected == table,
            TableMatch::StagingOf(entity) => {
                is_staging_table(table) && table.starts_with(entity.as_str())
            }
        }
    }
}

#[derive(Debug)]
struct Fault {
    op: WarehouseOp,
    table: TableMatch,
    kind: ErrorKind,
    /// `None` fails forever.
    remaining: Option<usize>,
}

/// Pauses the first matching call until released.
#[derive(Debug, Clone, Default)]
pub struct Gate {
    entered: Arc<Notify>,
    released: Arc<Notify>,
}

impl Gate {
    /// Resolves once a call reached the gate.
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    pub fn release(&self) {
        self.released.notify_one();
    }
}

/// One call received by a [`FaultyWarehouse`], recorded before any fault is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarehouseCall {
    pub op: WarehouseOp,
    pub table: String,
}

#[derive(Debug, Default)]
struct Inner {
    faults: Vec<Fault>,
    gate: Option<(WarehouseOp, TableMatch, Gate)>,
    calls: Vec<WarehouseCall>,
    /// Remaining `count_distinct` calls that see no rows.
    invisible_counts: usize,
}

/// Warehouse wrapper that records calls and injects failures or pauses.
#[derive(Debug, Clone)]
pub struct FaultyWarehouse<W> {
    wrapped: W,
    inner: Arc<Mutex<Inner>>,
}

impl<W> FaultyWarehouse<W> {
    pub fn wrap(wrapped: W) -> Self {
        Self {
            wrapped,
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    pub fn inner(&self) -> &W {
        &self.wrapped
    }

    /// Fails the next `times` matching calls with `kind`.
    pub async fn fail(&self, op: WarehouseOp, table: TableMatch, kind: ErrorKind, times: usize) {
        self.push_fault(op, table, kind, Some(times)).await;
    }

    /// Fails every matching call with `kind`.
    pub async fn fail_always(&self, op: WarehouseOp, table: TableMatch, kind: ErrorKind) {
        self.push_fault(op, table, kind, None).await;
    }

    /// Installs a gate pausing the first matching call.
    pub async fn gate(&self, op: WarehouseOp, table: TableMatch) -> Gate {
        let gate = Gate::default();
        let mut inner = self.inner.lock().await;
        inner.gate = Some((op, table, gate.clone()));

        gate
    }

    /// Makes the next `times` distinct counts report an empty table, as if appended rows were
    /// not readable yet.
    pub async fn hide_appended_rows(&self, times: usize) {
        self.inner.lock().await.invisible_counts = times;
    }

    pub async fn calls(&self) -> Vec<WarehouseCall> {
        self.inner.lock().await.calls.clone()
    }

    pub async fn call_count(&self, op: WarehouseOp) -> usize {
        let inner = self.inner.lock().await;
        inner.calls.iter().filter(|call| call.op == op).count()
    }

    async fn push_fault(
        &self,
        op: WarehouseOp,
        table: TableMatch,
        kind: ErrorKind,
        remaining: Option<usize>,
    ) {
        let mut inner = self.inner.lock().await;
        inner.faults.push(Fault {
            op,
            table,
            kind,
            remaining,
        });
    }

    /// Records the call, waits at the gate if it matches, then applies the first live fault.
    async fn intercept(&self, op: WarehouseOp, table: &str) -> SyncResult<()> {
        let (gate, fault) = {
            let mut inner = self.inner.lock().await;
            inner.calls.push(WarehouseCall {
                op,
                table: table.to_string(),
            });

            let gate_matches = matches!(
                &inner.gate,
                Some((gate_op, gate_table, _)) if *gate_op == op && gate_table.matches(table)
            );
            let gate = if gate_matches {
                inner.gate.take().map(|(_, _, gate)| gate)
            } else {
                None
            };

            let fault = inner.faults.iter_mut().find(|fault| {
                fault.op == op
                    && fault.table.matches(table)
                    && fault.remaining.is_none_or(|remaining| remaining > 0)
            });
            let fault = fault.map(|fault| {
                if let Some(remaining) = fault.remaining.as_mut() {
                    *remaining -= 1;
                }
                fault.kind
            });

            (gate, fault)
        };

        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.released.notified().await;
        }

        match fault {
            Some(kind) => Err(sync_error!(kind, "Injected warehouse failure", table)),
            None => Ok(()),
        }
    }
}

impl<W> WarehouseClient for FaultyWarehouse<W>
where
    W: WarehouseClient + Send + Sync,
{
    async fn create_table_if_absent(
        &self,
        table: &str,
        schema: &[ColumnSchema],
        primary_key: &[String],
    ) -> SyncResult<bool> {
        self.intercept(WarehouseOp::CreateTable, table).await?;
        self.wrapped
            .create_table_if_absent(table, schema, primary_key)
            .await
    }

    async fn append_rows(
        &self,
        table: &str,
        schema: &[ColumnSchema],
        rows: &[SyncRow],
    ) -> SyncResult<usize> {
        self.intercept(WarehouseOp::AppendRows, table).await?;
        self.wrapped.append_rows(table, schema, rows).await
    }

    async fn merge(
        &self,
        destination: &str,
        staging: &str,
        schema: &[ColumnSchema],
        match_columns: &[String],
    ) -> SyncResult<()> {
        self.intercept(WarehouseOp::Merge, destination).await?;
        self.wrapped
            .merge(destination, staging, schema, match_columns)
            .await
    }

    async fn insert_from(
        &self,
        destination: &str,
        staging: &str,
        schema: &[ColumnSchema],
        dedupe_column: &str,
    ) -> SyncResult<()> {
        self.intercept(WarehouseOp::InsertFrom, destination).await?;
        self.wrapped
            .insert_from(destination, staging, schema, dedupe_column)
            .await
    }

    async fn count_distinct(&self, table: &str, column: &str) -> SyncResult<usize> {
        self.intercept(WarehouseOp::CountDistinct, table).await?;

        let hidden = {
            let mut inner = self.inner.lock().await;
            let hidden = inner.invisible_counts > 0;
            inner.invisible_counts = inner.invisible_counts.saturating_sub(1);
            hidden
        };
        if hidden {
            return Ok(0);
        }

        self.wrapped.count_distinct(table, column).await
    }

    async fn drop_table(&self, table: &str) -> SyncResult<()> {
        self.intercept(WarehouseOp::DropTable, table).await?;
        self.wrapped.drop_table(table).await
    }
}

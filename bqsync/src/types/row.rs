use crate::types::Cell;

/// One extracted source row.
///
/// `values` follow the column order of the entity schema. `id` duplicates the identifier column
/// so cursor arithmetic never has to look it up.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncRow {
    pub id: i64,
    pub values: Vec<Cell>,
}

impl SyncRow {
    pub fn new(id: i64, values: Vec<Cell>) -> Self {
        Self { id, values }
    }

    pub fn value(&self, index: usize) -> Option<&Cell> {
        self.values.get(index)
    }
}

/// Highest identifier in `rows`, the position the cursor may advance to once they are written.
pub fn max_row_id(rows: &[SyncRow]) -> Option<i64> {
    rows.iter().map(|row| row.id).max()
}

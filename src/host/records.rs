//! Canonical generator records owned by the host.

use rusqlite::Row;
use serde::{Deserialize, Serialize};

use crate::metamodel::{ColumnNumber, GeneratorId};

/// A generator as the host records it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratorRecord {
    pub id: GeneratorId,
    pub name: String,
    /// Base table the generator models.
    pub table: String,
    /// Name of the owning metamodel.
    pub metamodel: String,
}

impl GeneratorRecord {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            table: row.get(2)?,
            metamodel: row.get(3)?,
        })
    }
}

/// A modelled column: `(column number, column name, statistical type)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratorColumn {
    pub colno: ColumnNumber,
    pub name: String,
    pub stattype: String,
}

impl GeneratorColumn {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            colno: row.get(0)?,
            name: row.get(1)?,
            stattype: row.get(2)?,
        })
    }
}

//! SQLite-backed host storage.
//!
//! The host owns the data tables and the canonical generator records.
//! Metamodels receive a `&Host` as their capability handle: they read rows
//! through it, keep their private records in the same database, and group
//! writes into [`Host::savepoint`] units of work.
//!
//! # Canonical records
//!
//! ```text
//! bayesdb_generator         (id, name, tabname, metamodel)
//! bayesdb_generator_column  (generator_id, colno, name, stattype)
//! ```
//!
//! Generator ids are allocated here, never by a metamodel. Column numbers
//! are the column's position in the base table.

mod records;

pub use records::{GeneratorColumn, GeneratorRecord};

use std::cell::Cell;
use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use crate::error::{Error, Result};
use crate::metamodel::{GeneratorId, RowId};
use crate::value::Value;

/// A host database connection.
#[derive(Debug)]
pub struct Host {
    conn: Connection,
    savepoint_seq: Cell<u64>,
    savepoint_depth: Cell<u32>,
}

impl Host {
    /// Open or create a host database file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    /// Open an in-memory host database.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let host = Self {
            conn,
            savepoint_seq: Cell::new(0),
            savepoint_depth: Cell::new(0),
        };
        host.init()?;
        Ok(host)
    }

    /// Create the canonical generator tables if they don't exist.
    fn init(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS bayesdb_generator (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL UNIQUE COLLATE NOCASE,
                tabname TEXT NOT NULL,
                metamodel TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS bayesdb_generator_column (
                generator_id INTEGER NOT NULL REFERENCES bayesdb_generator(id),
                colno INTEGER NOT NULL,
                name TEXT NOT NULL,
                stattype TEXT NOT NULL,
                PRIMARY KEY (generator_id, colno)
            );
            ",
        )?;
        Ok(())
    }

    /// The underlying SQLite connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Close the connection.
    pub fn close(self) -> Result<()> {
        self.conn.close().map_err(|(_, e)| Error::Sqlite(e))
    }

    // ========================================================================
    // Units of work
    // ========================================================================

    /// Run `f` inside a savepoint.
    ///
    /// The savepoint is released when `f` returns `Ok` and rolled back when
    /// it returns `Err` or panics, so none of its writes are visible after a
    /// failure. Savepoints nest.
    pub fn savepoint<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Host) -> Result<T>,
    {
        let seq = self.savepoint_seq.get();
        self.savepoint_seq.set(seq + 1);

        let mut guard = SavepointGuard::begin(self, format!("bayesgen_sp_{}", seq))?;
        let value = f(self)?;
        guard.release()?;
        Ok(value)
    }

    /// Whether a savepoint is currently open on this host.
    pub fn in_savepoint(&self) -> bool {
        self.savepoint_depth.get() > 0
    }

    // ========================================================================
    // Tables
    // ========================================================================

    /// Check whether a table exists.
    pub fn table_exists(&self, table: &str) -> Result<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM sqlite_master
                 WHERE type IN ('table', 'view') AND name = ?1 COLLATE NOCASE",
                params![table],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Columns of a table as `(position, name)` pairs.
    pub fn table_columns(&self, table: &str) -> Result<Vec<(i64, String)>> {
        if !self.table_exists(table)? {
            return Err(Error::NoSuchTable(table.to_string()));
        }
        let mut stmt = self
            .conn
            .prepare("SELECT cid, name FROM pragma_table_info(?1) ORDER BY cid")?;
        let columns = stmt
            .query_map(params![table], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<Vec<(i64, String)>, _>>()?;
        Ok(columns)
    }

    // ========================================================================
    // Generator records
    // ========================================================================

    /// Allocate a generator and its columns.
    ///
    /// This is the `instantiate` step of generator creation: `columns` are
    /// the `(column name, statistical type)` pairs a metamodel parsed from
    /// the schema. Column numbers are taken from the base table.
    pub fn instantiate_generator(
        &self,
        name: &str,
        table: &str,
        metamodel: &str,
        columns: &[(String, String)],
    ) -> Result<(GeneratorId, Vec<GeneratorColumn>)> {
        if self.find_generator_id(name)?.is_some() {
            return Err(Error::GeneratorExists(name.to_string()));
        }

        let table_columns = self.table_columns(table)?;

        let mut resolved: Vec<GeneratorColumn> = Vec::with_capacity(columns.len());
        for (column, stattype) in columns {
            let (colno, actual) = table_columns
                .iter()
                .find(|(_, n)| n.eq_ignore_ascii_case(column))
                .ok_or_else(|| Error::NoSuchColumn {
                    table: table.to_string(),
                    column: column.clone(),
                })?;
            if resolved.iter().any(|c| c.colno == *colno) {
                return Err(Error::schema(format!("duplicate column: {}", column)));
            }
            resolved.push(GeneratorColumn {
                colno: *colno,
                name: actual.clone(),
                stattype: stattype.clone(),
            });
        }

        self.conn.execute(
            "INSERT INTO bayesdb_generator (name, tabname, metamodel) VALUES (?1, ?2, ?3)",
            params![name, table, metamodel],
        )?;
        let generator_id = self.conn.last_insert_rowid();

        for column in &resolved {
            self.conn.execute(
                "INSERT INTO bayesdb_generator_column (generator_id, colno, name, stattype)
                 VALUES (?1, ?2, ?3, ?4)",
                params![generator_id, column.colno, column.name, column.stattype],
            )?;
        }

        debug!(generator_id, name, table, "instantiated generator");
        Ok((generator_id, resolved))
    }

    /// Look up a generator by id.
    pub fn generator(&self, generator_id: GeneratorId) -> Result<GeneratorRecord> {
        self.conn
            .query_row(
                "SELECT id, name, tabname, metamodel FROM bayesdb_generator WHERE id = ?1",
                params![generator_id],
                GeneratorRecord::from_row,
            )
            .optional()?
            .ok_or(Error::NoSuchGenerator(generator_id))
    }

    /// Look up a generator id by name.
    pub fn generator_id(&self, name: &str) -> Result<GeneratorId> {
        self.find_generator_id(name)?
            .ok_or_else(|| Error::NoSuchGeneratorName(name.to_string()))
    }

    fn find_generator_id(&self, name: &str) -> Result<Option<GeneratorId>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id FROM bayesdb_generator WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// List all generators, ordered by id.
    pub fn generators(&self) -> Result<Vec<GeneratorRecord>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, tabname, metamodel FROM bayesdb_generator ORDER BY id")?;
        let records = stmt
            .query_map([], GeneratorRecord::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Modelled columns of a generator, in schema order.
    pub fn generator_columns(&self, generator_id: GeneratorId) -> Result<Vec<GeneratorColumn>> {
        // Fails for unknown generators rather than returning no columns.
        self.generator(generator_id)?;

        let mut stmt = self.conn.prepare(
            "SELECT colno, name, stattype FROM bayesdb_generator_column
             WHERE generator_id = ?1 ORDER BY rowid",
        )?;
        let columns = stmt
            .query_map(params![generator_id], GeneratorColumn::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(columns)
    }

    /// Remove a generator's canonical records.
    pub fn delete_generator(&self, generator_id: GeneratorId) -> Result<()> {
        self.conn.execute(
            "DELETE FROM bayesdb_generator_column WHERE generator_id = ?1",
            params![generator_id],
        )?;
        let deleted = self.conn.execute(
            "DELETE FROM bayesdb_generator WHERE id = ?1",
            params![generator_id],
        )?;
        if deleted == 0 {
            return Err(Error::NoSuchGenerator(generator_id));
        }
        Ok(())
    }

    /// Record a column rename in the generator's column records.
    pub fn rename_generator_column(
        &self,
        generator_id: GeneratorId,
        old_name: &str,
        new_name: &str,
    ) -> Result<()> {
        let record = self.generator(generator_id)?;
        let updated = self.conn.execute(
            "UPDATE bayesdb_generator_column SET name = ?3
             WHERE generator_id = ?1 AND name = ?2 COLLATE NOCASE",
            params![generator_id, old_name, new_name],
        )?;
        if updated == 0 {
            return Err(Error::NoSuchColumn {
                table: record.table,
                column: old_name.to_string(),
            });
        }
        Ok(())
    }

    // ========================================================================
    // Rows
    // ========================================================================

    /// All rows of the generator's table, restricted to its modelled
    /// columns (schema order) and ordered by rowid.
    pub fn generator_rows(&self, generator_id: GeneratorId) -> Result<Vec<(RowId, Vec<Value>)>> {
        let sql = self.select_generator_columns(generator_id)? + " ORDER BY _rowid_";
        let mut stmt = self.conn.prepare(&sql)?;
        let width = stmt.column_count() - 1;
        let rows = stmt
            .query_map([], |row| {
                let rowid: RowId = row.get(0)?;
                let values = (1..=width)
                    .map(|i| row.get::<_, Value>(i))
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok((rowid, values))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Row count and largest rowid of the generator's table.
    pub fn generator_table_extent(&self, generator_id: GeneratorId) -> Result<(usize, Option<RowId>)> {
        let record = self.generator(generator_id)?;
        let sql = format!(
            "SELECT COUNT(*), MAX(_rowid_) FROM {}",
            quote_ident(&record.table)
        );
        let (count, max): (i64, Option<RowId>) = self
            .conn
            .query_row(&sql, [], |row| Ok((row.get(0)?, row.get(1)?)))?;
        Ok((count as usize, max))
    }

    /// One row of the generator's table, or `None` if the rowid is unknown.
    pub fn generator_row(
        &self,
        generator_id: GeneratorId,
        rowid: RowId,
    ) -> Result<Option<Vec<Value>>> {
        let sql = self.select_generator_columns(generator_id)? + " WHERE _rowid_ = ?1";
        let mut stmt = self.conn.prepare(&sql)?;
        let width = stmt.column_count() - 1;
        let row = stmt
            .query_row(params![rowid], |row| {
                (1..=width)
                    .map(|i| row.get::<_, Value>(i))
                    .collect::<rusqlite::Result<Vec<_>>>()
            })
            .optional()?;
        Ok(row)
    }

    fn select_generator_columns(&self, generator_id: GeneratorId) -> Result<String> {
        let record = self.generator(generator_id)?;
        let columns = self.generator_columns(generator_id)?;
        let mut sql = String::from("SELECT _rowid_");
        for column in &columns {
            sql.push_str(", ");
            sql.push_str(&quote_ident(&column.name));
        }
        sql.push_str(" FROM ");
        sql.push_str(&quote_ident(&record.table));
        Ok(sql)
    }
}

/// Quote an SQL identifier.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// An open savepoint; rolled back on drop unless released.
struct SavepointGuard<'a> {
    host: &'a Host,
    name: String,
    open: bool,
}

impl<'a> SavepointGuard<'a> {
    fn begin(host: &'a Host, name: String) -> Result<Self> {
        host.conn.execute_batch(&format!("SAVEPOINT {}", name))?;
        host.savepoint_depth.set(host.savepoint_depth.get() + 1);
        Ok(Self {
            host,
            name,
            open: true,
        })
    }

    fn release(&mut self) -> Result<()> {
        self.host
            .conn
            .execute_batch(&format!("RELEASE {}", self.name))?;
        self.open = false;
        self.host
            .savepoint_depth
            .set(self.host.savepoint_depth.get() - 1);
        Ok(())
    }
}

impl Drop for SavepointGuard<'_> {
    fn drop(&mut self) {
        if !self.open {
            return;
        }
        debug!(savepoint = %self.name, "rolling back savepoint");
        let sql = format!("ROLLBACK TO {0}; RELEASE {0}", self.name);
        if let Err(e) = self.host.conn.execute_batch(&sql) {
            tracing::error!(savepoint = %self.name, error = %e, "savepoint rollback failed");
        }
        self.host
            .savepoint_depth
            .set(self.host.savepoint_depth.get() - 1);
    }
}

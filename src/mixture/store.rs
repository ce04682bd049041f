//! Private tables of the mixture metamodel.
//!
//! Model state and inserted observations are stored as JSON text, keyed by
//! generator id:
//!
//! ```text
//! mixture_generator    (generator_id PK, columns JSON)
//! mixture_model        (generator_id, modelno, iterations, state JSON)
//! mixture_observation  (generator_id, seq, row JSON)
//! ```

use rusqlite::{params, OptionalExtension};

use super::columns::MixtureColumn;
use super::model::ModelState;
use crate::error::{Error, Result};
use crate::host::Host;
use crate::metamodel::{GeneratorId, ModelNumber};
use crate::value::Value;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS mixture_generator (
    generator_id INTEGER PRIMARY KEY,
    columns TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS mixture_model (
    generator_id INTEGER NOT NULL,
    modelno INTEGER NOT NULL,
    iterations INTEGER NOT NULL DEFAULT 0,
    state TEXT NOT NULL,
    PRIMARY KEY (generator_id, modelno)
);

CREATE TABLE IF NOT EXISTS mixture_observation (
    generator_id INTEGER NOT NULL,
    seq INTEGER NOT NULL,
    row TEXT NOT NULL,
    PRIMARY KEY (generator_id, seq)
);
"#;

pub(crate) fn install(host: &Host) -> Result<()> {
    host.connection().execute_batch(SCHEMA)?;
    Ok(())
}

// ============================================================================
// Generators
// ============================================================================

pub(crate) fn insert_generator(
    host: &Host,
    generator_id: GeneratorId,
    columns: &[MixtureColumn],
) -> Result<()> {
    let json = serde_json::to_string(columns)?;
    host.connection().execute(
        "INSERT INTO mixture_generator (generator_id, columns) VALUES (?1, ?2)",
        params![generator_id, json],
    )?;
    Ok(())
}

pub(crate) fn generator_columns(host: &Host, generator_id: GeneratorId) -> Result<Vec<MixtureColumn>> {
    let json: String = host
        .connection()
        .query_row(
            "SELECT columns FROM mixture_generator WHERE generator_id = ?1",
            params![generator_id],
            |row| row.get(0),
        )
        .optional()?
        .ok_or(Error::NoSuchGenerator(generator_id))?;
    Ok(serde_json::from_str(&json)?)
}

/// Delete everything stored for a generator.
pub(crate) fn delete_generator(host: &Host, generator_id: GeneratorId) -> Result<()> {
    let conn = host.connection();
    conn.execute(
        "DELETE FROM mixture_observation WHERE generator_id = ?1",
        params![generator_id],
    )?;
    conn.execute(
        "DELETE FROM mixture_model WHERE generator_id = ?1",
        params![generator_id],
    )?;
    let deleted = conn.execute(
        "DELETE FROM mixture_generator WHERE generator_id = ?1",
        params![generator_id],
    )?;
    if deleted == 0 {
        return Err(Error::NoSuchGenerator(generator_id));
    }
    Ok(())
}

// ============================================================================
// Models
// ============================================================================

pub(crate) fn load_models(host: &Host, generator_id: GeneratorId) -> Result<Vec<(ModelNumber, ModelState)>> {
    let mut stmt = host.connection().prepare(
        "SELECT modelno, state FROM mixture_model WHERE generator_id = ?1 ORDER BY modelno",
    )?;
    let rows = stmt
        .query_map(params![generator_id], |row| {
            Ok((row.get::<_, ModelNumber>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(modelno, json)| Ok((modelno, serde_json::from_str(&json)?)))
        .collect()
}

/// Insert or replace a model's stored state.
pub(crate) fn save_model(
    host: &Host,
    generator_id: GeneratorId,
    modelno: ModelNumber,
    state: &ModelState,
) -> Result<()> {
    let json = serde_json::to_string(state)?;
    host.connection().execute(
        "INSERT OR REPLACE INTO mixture_model (generator_id, modelno, iterations, state)
         VALUES (?1, ?2, ?3, ?4)",
        params![generator_id, modelno, state.iterations as i64, json],
    )?;
    Ok(())
}

pub(crate) fn delete_model(host: &Host, generator_id: GeneratorId, modelno: ModelNumber) -> Result<()> {
    host.connection().execute(
        "DELETE FROM mixture_model WHERE generator_id = ?1 AND modelno = ?2",
        params![generator_id, modelno],
    )?;
    Ok(())
}

pub(crate) fn delete_models(host: &Host, generator_id: GeneratorId) -> Result<()> {
    host.connection().execute(
        "DELETE FROM mixture_model WHERE generator_id = ?1",
        params![generator_id],
    )?;
    Ok(())
}

/// Stored iteration count of a model, if it exists.
pub(crate) fn model_iterations(
    host: &Host,
    generator_id: GeneratorId,
    modelno: ModelNumber,
) -> Result<Option<u64>> {
    let iterations: Option<i64> = host
        .connection()
        .query_row(
            "SELECT iterations FROM mixture_model WHERE generator_id = ?1 AND modelno = ?2",
            params![generator_id, modelno],
            |row| row.get(0),
        )
        .optional()?;
    Ok(iterations.map(|i| i as u64))
}

// ============================================================================
// Observations
// ============================================================================

pub(crate) fn load_observations(host: &Host, generator_id: GeneratorId) -> Result<Vec<Vec<Value>>> {
    let mut stmt = host.connection().prepare(
        "SELECT row FROM mixture_observation WHERE generator_id = ?1 ORDER BY seq",
    )?;
    let rows = stmt
        .query_map(params![generator_id], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    rows.iter()
        .map(|json| Ok(serde_json::from_str(json)?))
        .collect()
}

/// Append observations, numbering them from `first_seq`.
pub(crate) fn insert_observations(
    host: &Host,
    generator_id: GeneratorId,
    first_seq: usize,
    rows: &[Vec<Value>],
) -> Result<()> {
    let mut stmt = host.connection().prepare(
        "INSERT INTO mixture_observation (generator_id, seq, row) VALUES (?1, ?2, ?3)",
    )?;
    for (offset, row) in rows.iter().enumerate() {
        let json = serde_json::to_string(row)?;
        stmt.execute(params![generator_id, (first_seq + offset) as i64, json])?;
    }
    Ok(())
}

use rusqlite::OptionalExtension;
use rusqlite::{Connection, Result};

use crate::schema;

const META_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS Mediad (
    key TEXT PRIMARY KEY,
    value);
";

/// Create the schema on a fresh database; refuse a database written
/// with a different schema version. There is no migration path.
pub fn ensure_schema(conn: &mut Connection) -> Result<bool> {
    trace!("trying to get schema version");

    conn.execute_batch(META_SCHEMA)?;

    let schema_version: Option<u32> = conn
        .query_row("SELECT value FROM Mediad WHERE key = 'schema'", [], |row| {
            row.get(0)
        })
        .optional()?;

    if let Some(schema_version) = schema_version {
        if schema_version != schema::SCHEMA_VERSION {
            error!(
                "unsupported schema version: got {}, expected {}",
                schema_version,
                schema::SCHEMA_VERSION
            );
            return Ok(false);
        }

        debug!("schema version up-to-date, doing nothing");
    } else {
        debug!("schema meta not present, creating schema");

        let tran = conn.transaction()?;

        tran.execute(
            "INSERT INTO Mediad (key, value) VALUES ('schema', ?)",
            [schema::SCHEMA_VERSION],
        )?;
        schema::create_tables(&tran)?;

        tran.commit()?;
    }

    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_database_gets_schema() {
        let mut conn = Connection::open_in_memory().unwrap();
        assert!(ensure_schema(&mut conn).unwrap());

        // second run is a no-op
        assert!(ensure_schema(&mut conn).unwrap());

        let version: u32 = conn
            .query_row("SELECT value FROM Mediad WHERE key = 'schema'", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(version, schema::SCHEMA_VERSION);
    }

    #[test]
    fn version_mismatch_is_refused() {
        let mut conn = Connection::open_in_memory().unwrap();
        assert!(ensure_schema(&mut conn).unwrap());

        conn.execute("UPDATE Mediad SET value = 999 WHERE key = 'schema'", [])
            .unwrap();
        assert!(!ensure_schema(&mut conn).unwrap());
    }
}

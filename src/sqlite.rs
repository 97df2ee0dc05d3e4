//! Small helpers on top of rusqlite.
//!
//! Statement failures are logged and reported as sentinel values
//! (`false`, `-1`, `None`); most callers treat a failed statement as
//! "skip this item" rather than aborting the surrounding operation.

use rusqlite::types::ToSql;
use rusqlite::{Connection, OptionalExtension};

pub fn exec(conn: &Connection, sql: &str, params: &[&dyn ToSql]) -> bool {
    match conn.execute(sql, params) {
        Ok(_) => true,
        Err(e) => {
            error!("sql \"{}\" failed: {}", sql, e);
            false
        }
    }
}

pub fn exec_batch(conn: &Connection, sql: &str) -> bool {
    match conn.execute_batch(sql) {
        Ok(()) => true,
        Err(e) => {
            error!("sql \"{}\" failed: {}", sql, e);
            false
        }
    }
}

/// First column of the first row as integer, -1 on error or NULL.
pub fn query_i64(conn: &Connection, sql: &str, params: &[&dyn ToSql]) -> i64 {
    match conn
        .query_row(sql, params, |row| row.get::<_, Option<i64>>(0))
        .optional()
    {
        Ok(Some(Some(v))) => v,
        Ok(_) => -1,
        Err(e) => {
            error!("sql \"{}\" failed: {}", sql, e);
            -1
        }
    }
}

/// max() of a column, 0 for an empty table, -1 on error.
pub fn max_i64(conn: &Connection, table: &str, col: &str) -> i64 {
    let sql = format!("SELECT max(\"{}\") FROM {}", col, table);

    match conn.query_row(&sql, [], |row| row.get::<_, Option<i64>>(0)) {
        Ok(Some(v)) => v,
        Ok(None) => 0,
        Err(e) => {
            error!("sql \"{}\" failed: {}", sql, e);
            -1
        }
    }
}

/// Look up the id of a string in an id/name map table, -1 if absent.
pub fn string_to_id(
    conn: &Connection,
    table: &str,
    id_col: &str,
    string_col: &str,
    s: &str,
) -> i64 {
    let sql = format!(
        "SELECT \"{}\" FROM {} WHERE \"{}\" = ?",
        id_col, table, string_col
    );
    query_i64(conn, &sql, &[&s])
}

/// Find-or-insert into an id/name map table. Ids are allocated max+1.
pub fn string_to_id_add(
    conn: &Connection,
    table: &str,
    id_col: &str,
    string_col: &str,
    s: &str,
) -> i64 {
    let id = string_to_id(conn, table, id_col, string_col, s);
    if id >= 0 {
        return id;
    }

    let id = max_i64(conn, table, id_col);
    if id < 0 {
        return -1;
    }
    let id = id + 1;

    let sql = format!(
        "INSERT INTO {} (\"{}\", \"{}\") VALUES (?, ?)",
        table, id_col, string_col
    );
    if !exec(conn, &sql, &[&id, &s]) {
        return -1;
    }
    id
}

pub fn id_to_string(
    conn: &Connection,
    table: &str,
    string_col: &str,
    id_col: &str,
    id: i64,
) -> Option<String> {
    let sql = format!(
        "SELECT \"{}\" FROM {} WHERE \"{}\" = ?",
        string_col, table, id_col
    );

    match conn
        .query_row(&sql, &[&id as &dyn ToSql], |row| {
            row.get::<_, Option<String>>(0)
        })
        .optional()
    {
        Ok(Some(v)) => v,
        Ok(None) => None,
        Err(e) => {
            error!("sql \"{}\" failed: {}", sql, e);
            None
        }
    }
}

pub fn id_to_id(conn: &Connection, table: &str, dst_col: &str, src_col: &str, id: i64) -> i64 {
    let sql = format!(
        "SELECT \"{}\" FROM {} WHERE \"{}\" = ?",
        dst_col, table, src_col
    );
    query_i64(conn, &sql, &[&id])
}

/// One string column of every row.
pub fn string_array(conn: &Connection, sql: &str, params: &[&dyn ToSql]) -> Vec<String> {
    let mut result = Vec::new();

    let mut st = match conn.prepare(sql) {
        Ok(st) => st,
        Err(e) => {
            error!("sql \"{}\" failed: {}", sql, e);
            return result;
        }
    };

    let rows = st.query_map(params, |row| row.get::<_, Option<String>>(0));
    match rows {
        Ok(rows) => {
            for row in rows.flatten().flatten() {
                result.push(row);
            }
        }
        Err(e) => error!("sql \"{}\" failed: {}", sql, e),
    }

    result
}

/// One integer column of every row.
pub fn i64_array(conn: &Connection, sql: &str, params: &[&dyn ToSql]) -> Vec<i64> {
    let mut result = Vec::new();

    let mut st = match conn.prepare(sql) {
        Ok(st) => st,
        Err(e) => {
            error!("sql \"{}\" failed: {}", sql, e);
            return result;
        }
    };

    let rows = st.query_map(params, |row| row.get::<_, Option<i64>>(0));
    match rows {
        Ok(rows) => {
            for row in rows.flatten().flatten() {
                result.push(row);
            }
        }
        Err(e) => error!("sql \"{}\" failed: {}", sql, e),
    }

    result
}

pub fn start_transaction(conn: &Connection) {
    exec_batch(conn, "BEGIN TRANSACTION;");
}

pub fn end_transaction(conn: &Connection) {
    exec_batch(conn, "COMMIT;");
}

/// Register the "strcoll" collation used for title-sorted listings.
/// Case-insensitive, with a stable tiebreak on the raw bytes.
pub fn init_strcoll(conn: &Connection) -> rusqlite::Result<()> {
    conn.create_collation("strcoll", |a, b| {
        a.to_lowercase()
            .cmp(&b.to_lowercase())
            .then_with(|| a.cmp(b))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE names(ID INTEGER PRIMARY KEY, NAME TEXT);")
            .unwrap();
        conn
    }

    #[test]
    fn max_of_empty_table_is_zero() {
        let conn = test_conn();
        assert_eq!(max_i64(&conn, "names", "ID"), 0);
    }

    #[test]
    fn find_or_insert_deduplicates() {
        let conn = test_conn();

        let a = string_to_id_add(&conn, "names", "ID", "NAME", "Rock");
        let b = string_to_id_add(&conn, "names", "ID", "NAME", "Jazz");
        let c = string_to_id_add(&conn, "names", "ID", "NAME", "Rock");

        assert_eq!(a, 1);
        assert_eq!(b, 2);
        assert_eq!(c, a);

        // exact, case-sensitive matching
        let d = string_to_id_add(&conn, "names", "ID", "NAME", "rock");
        assert_eq!(d, 3);

        assert_eq!(id_to_string(&conn, "names", "NAME", "ID", 2).as_deref(), Some("Jazz"));
        assert_eq!(string_to_id(&conn, "names", "ID", "NAME", "Polka"), -1);
    }

    #[test]
    fn strcoll_orders_case_insensitively() {
        let conn = test_conn();
        init_strcoll(&conn).unwrap();

        for name in &["beta", "Alpha", "alpha", "Gamma"] {
            string_to_id_add(&conn, "names", "ID", "NAME", name);
        }

        let names = string_array(
            &conn,
            "SELECT NAME FROM names ORDER BY NAME COLLATE strcoll",
            &[],
        );
        assert_eq!(names, vec!["Alpha", "alpha", "beta", "Gamma"]);
    }
}

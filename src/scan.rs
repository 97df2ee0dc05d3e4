//! Filesystem synchronizer.
//!
//! A scan directory is reconciled against the database by URI and
//! mtime: vanished files are deleted, stale files are deleted so they
//! can be re-added, up-to-date files are skipped. New files are added
//! in two passes so that songs, movies and episodes can reference
//! cover/poster/NFO rows by id. Each directory add or remove runs
//! inside one transaction.

use rusqlite::Connection;
use walkdir::{DirEntry, WalkDir};

use crate::media::{self, MediaReader};
use crate::objects;
use crate::schema::{self, ObjectType};
use crate::sqlite;
use crate::track::{self, *};

pub struct FileEntry {
    pub uri: String,
    pub mtime: i64,
}

struct DbFile {
    uri: String,
    id: i64,
    mtime: i64,
    otype: ObjectType,
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .map_or(false, |s| s.starts_with('.'))
}

/// All regular files below `dir`, dot entries skipped.
pub fn scan_directory(dir: &str) -> Vec<FileEntry> {
    let mut files = Vec::new();

    for entry in WalkDir::new(dir)
        .follow_links(true)
        .into_iter()
        .filter_entry(|e| !is_hidden(e))
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let mtime = entry
            .metadata()
            .ok()
            .and_then(|m| m.modified().ok())
            .and_then(|t| t.duration_since(std::time::SystemTime::UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        files.push(FileEntry {
            uri: entry.path().to_string_lossy().to_string(),
            mtime,
        });
    }

    files
}

/// (URI, DBID, MTime) of every file-backed object of one scan
/// directory and pass.
fn files_db(conn: &Connection, scan_dir_id: i64, pass: u32) -> Vec<DbFile> {
    let mut result = Vec::new();

    for tab in schema::OBJECT_TABLES {
        if tab.pass != pass
            || schema::has_col(tab, META_SCAN_DIR_ID).is_none()
            || (schema::has_col(tab, META_URI).is_none()
                && schema::has_src_col(tab, META_URI).is_none())
        {
            continue;
        }

        let sql = format!(
            "SELECT \"{uri}\", \"{dbid}\", \"{mtime}\" FROM {table} WHERE \"{sd}\" = ?",
            uri = META_URI,
            dbid = META_DB_ID,
            mtime = META_MTIME,
            table = tab.table,
            sd = META_SCAN_DIR_ID
        );

        let mut st = match conn.prepare(&sql) {
            Ok(st) => st,
            Err(e) => {
                error!("sql \"{}\" failed: {}", sql, e);
                continue;
            }
        };

        let rows = st.query_map([&scan_dir_id], |row| {
            Ok((
                row.get::<_, Option<String>>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, Option<i64>>(2)?,
            ))
        });

        match rows {
            Ok(rows) => {
                for (uri, id, mtime) in rows.flatten() {
                    if let Some(uri) = uri {
                        result.push(DbFile {
                            uri,
                            id,
                            mtime: mtime.unwrap_or(0),
                            otype: tab.otype,
                        });
                    }
                }
            }
            Err(e) => error!("sql \"{}\" failed: {}", sql, e),
        }
    }

    info!("got {} files from database", result.len());
    result
}

/// Add new files: images and NFOs first, everything else second. A
/// file the reader cannot load is logged and skipped; multi-track
/// container files are not decomposed.
fn add_files(conn: &Connection, reader: &dyn MediaReader, files: Vec<FileEntry>, scan_dir_id: i64) {
    let mut rest: Vec<FileEntry> = Vec::new();

    for f in files {
        if !media::is_first_pass(&f.uri) {
            rest.push(f);
            continue;
        }

        if media::mimetype(&f.uri).as_deref() == Some(media::MIMETYPE_NFO) {
            info!("adding file: {}", f.uri);

            let mut obj = track::new_track();
            {
                let m = metadata_mut(&mut obj);
                set_string(m, META_CLASS, CLASS_NFO);
                set_string(m, META_URI, &f.uri);
                set_i64(m, META_MTIME, f.mtime);
            }
            objects::add_object(conn, &mut obj, scan_dir_id, -1);
            continue;
        }

        info!("loading {}", f.uri);
        match reader.load(&f.uri, f.mtime) {
            Some(tracks) => {
                if tracks.len() == 1 {
                    let mut t = tracks.into_iter().next().unwrap();
                    info!("adding file: {}", f.uri);
                    objects::add_object(conn, &mut t, scan_dir_id, -1);
                } else {
                    debug!("skipping multi-track file {}", f.uri);
                }
            }
            None => rest.push(f),
        }
    }

    for f in rest {
        if media::is_blacklisted(&f.uri) {
            continue;
        }

        info!("loading {}", f.uri);
        match reader.load(&f.uri, f.mtime) {
            Some(tracks) => {
                if tracks.len() == 1 {
                    let mut t = tracks.into_iter().next().unwrap();
                    info!("adding file: {}", f.uri);
                    objects::add_object(conn, &mut t, scan_dir_id, -1);
                } else {
                    debug!("skipping multi-track file {}", f.uri);
                }
            }
            None => warn!("no handler found for file '{}'", f.uri),
        }
    }
}

/// Add or re-scan one directory. Returns true if the directory was
/// not tracked before.
pub fn add_directory(conn: &Connection, reader: &dyn MediaReader, dir: &str) -> bool {
    let id = sqlite::string_to_id(conn, "scandirs", "ID", "PATH", dir);
    let is_new = id < 0;

    if is_new {
        info!("adding directory {}", dir);
    } else {
        info!("re-scanning directory {}", dir);
    }

    let mut files_fs = scan_directory(dir);
    info!("scanned directory, found {} files", files_fs.len());

    sqlite::start_transaction(conn);

    let id = if is_new {
        sqlite::string_to_id_add(conn, "scandirs", "ID", "PATH", dir)
    } else {
        for pass in 1..=2 {
            let mut db_files = files_db(conn, id, pass);

            // objects whose file disappeared
            db_files.retain(|f| {
                if files_fs.iter().any(|fs| fs.uri == f.uri) {
                    true
                } else {
                    objects::delete_object(conn, f.id, f.otype, objects::DEL_FLAG_ALL);
                    false
                }
            });

            // stale entries are deleted for re-adding; up-to-date
            // files leave the pending list
            files_fs.retain(|fs| {
                let db_idx = match db_files.iter().position(|db| db.uri == fs.uri) {
                    Some(i) => i,
                    None => return true,
                };

                if fs.mtime > db_files[db_idx].mtime {
                    info!("{} out of date, removing for re-adding later", fs.uri);
                    let db_file = db_files.remove(db_idx);
                    objects::delete_object(conn, db_file.id, db_file.otype, objects::DEL_FLAG_ALL);
                    true
                } else {
                    false
                }
            });
        }
        id
    };

    add_files(conn, reader, files_fs, id);

    sqlite::end_transaction(conn);

    if is_new {
        info!("done adding {}", dir);
    } else {
        info!("done re-scanning {}", dir);
    }

    is_new
}

/// Remove a directory and every object found below it.
pub fn delete_directory(conn: &Connection, dir: &str) {
    let id = sqlite::string_to_id(conn, "scandirs", "ID", "PATH", dir);
    if id < 0 {
        warn!("no such directory {} in db", dir);
        return;
    }

    let mut files = files_db(conn, id, 1);
    files.extend(files_db(conn, id, 2));

    sqlite::start_transaction(conn);

    for f in &files {
        objects::delete_object(conn, f.id, f.otype, objects::DEL_FLAG_ALL);
    }

    sqlite::exec(conn, "DELETE FROM scandirs WHERE ID = ?", &[&id]);

    sqlite::end_transaction(conn);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{movie_track, song_track, test_conn, MockReader};
    use std::fs;

    fn write_file(dir: &std::path::Path, name: &str) -> String {
        let path = dir.join(name);
        fs::write(&path, b"data").unwrap();
        path.to_string_lossy().to_string()
    }

    fn count(conn: &Connection, sql: &str) -> i64 {
        sqlite::query_i64(conn, sql, &[])
    }

    fn song_db_id(conn: &Connection, uri: &str) -> i64 {
        sqlite::string_to_id(conn, "songs", META_DB_ID, META_URI, uri)
    }

    #[test]
    fn add_directory_is_idempotent() {
        let conn = test_conn();
        let tmp = tempfile::tempdir().unwrap();

        let uri1 = write_file(tmp.path(), "one.mp3");
        let uri2 = write_file(tmp.path(), "two.mp3");

        let mut reader = MockReader::new();
        reader.insert(&uri1, song_track("One", "Foo", "Rock", "A", 100));
        reader.insert(&uri2, song_track("Two", "Foo", "Rock", "A", 90));

        let dir = tmp.path().to_string_lossy().to_string();

        assert!(add_directory(&conn, &reader, &dir));
        assert_eq!(count(&conn, "SELECT count(*) FROM songs"), 2);
        assert_eq!(count(&conn, "SELECT count(*) FROM albums"), 1);
        assert_eq!(count(&conn, "SELECT count(*) FROM scandirs"), 1);

        let id_before = song_db_id(&conn, &uri1);

        // unchanged rescan: same rows, same ids
        assert!(!add_directory(&conn, &reader, &dir));
        assert_eq!(count(&conn, "SELECT count(*) FROM songs"), 2);
        assert_eq!(count(&conn, "SELECT count(*) FROM albums"), 1);
        assert_eq!(song_db_id(&conn, &uri1), id_before);
    }

    #[test]
    fn stale_file_is_recreated_with_new_id() {
        let conn = test_conn();
        let tmp = tempfile::tempdir().unwrap();

        let uri = write_file(tmp.path(), "movie.mkv");
        let mut reader = MockReader::new();
        reader.insert(&uri, movie_track("Heat", 1995, &uri, 120));

        let dir = tmp.path().to_string_lossy().to_string();
        add_directory(&conn, &reader, &dir);

        let id_before = sqlite::string_to_id(&conn, "movie_parts", META_DB_ID, META_URI, &uri);
        assert!(id_before > 0);

        // another object keeps the id sequence from backtracking
        crate::objects::add_object(
            &conn,
            &mut song_track("Other", "Foo", "Rock", "A", 10),
            999,
            -1,
        );

        // pretend the database entry is older than the file
        sqlite::exec(
            &conn,
            "UPDATE movie_parts SET MTime = MTime - 10",
            &[],
        );

        add_directory(&conn, &reader, &dir);

        let id_after = sqlite::string_to_id(&conn, "movie_parts", META_DB_ID, META_URI, &uri);
        assert!(id_after > 0);
        assert_ne!(id_after, id_before);
        assert_eq!(count(&conn, "SELECT count(*) FROM movie_parts"), 1);
        assert_eq!(count(&conn, "SELECT count(*) FROM movies"), 1);
    }

    #[test]
    fn removed_file_cascades() {
        let conn = test_conn();
        let tmp = tempfile::tempdir().unwrap();

        let uri1 = write_file(tmp.path(), "one.mp3");
        let uri2 = write_file(tmp.path(), "two.mp3");

        let mut reader = MockReader::new();
        reader.insert(&uri1, song_track("One", "Foo", "Rock", "A", 100));
        reader.insert(&uri2, song_track("Two", "Bar", "Jazz", "B", 90));

        let dir = tmp.path().to_string_lossy().to_string();
        add_directory(&conn, &reader, &dir);
        assert_eq!(count(&conn, "SELECT count(*) FROM songs"), 2);
        assert_eq!(count(&conn, "SELECT count(*) FROM albums"), 2);

        fs::remove_file(&uri2).unwrap();
        add_directory(&conn, &reader, &dir);

        // the song and its now-empty album are gone
        assert_eq!(count(&conn, "SELECT count(*) FROM songs"), 1);
        assert_eq!(count(&conn, "SELECT count(*) FROM albums"), 1);
        assert!(song_db_id(&conn, &uri1) > 0);
        assert_eq!(song_db_id(&conn, &uri2), -1);
    }

    #[test]
    fn delete_directory_removes_everything() {
        let conn = test_conn();
        let tmp = tempfile::tempdir().unwrap();

        let uri = write_file(tmp.path(), "one.mp3");
        let mut reader = MockReader::new();
        reader.insert(&uri, song_track("One", "Foo", "Rock", "A", 100));

        let dir = tmp.path().to_string_lossy().to_string();
        add_directory(&conn, &reader, &dir);
        assert_eq!(count(&conn, "SELECT count(*) FROM scandirs"), 1);

        delete_directory(&conn, &dir);

        assert_eq!(count(&conn, "SELECT count(*) FROM scandirs"), 0);
        assert_eq!(count(&conn, "SELECT count(*) FROM songs"), 0);
        assert_eq!(count(&conn, "SELECT count(*) FROM albums"), 0);
        assert_eq!(count(&conn, "SELECT count(*) FROM objects"), 0);

        // deleting again is a logged no-op
        delete_directory(&conn, &dir);
    }

    #[test]
    fn dot_files_and_unknown_files_are_skipped() {
        let conn = test_conn();
        let tmp = tempfile::tempdir().unwrap();

        write_file(tmp.path(), ".hidden.mp3");
        write_file(tmp.path(), "notes.txt");
        let uri = write_file(tmp.path(), "one.mp3");

        let mut reader = MockReader::new();
        reader.insert(&uri, song_track("One", "Foo", "Rock", "A", 100));

        let dir = tmp.path().to_string_lossy().to_string();
        add_directory(&conn, &reader, &dir);

        assert_eq!(count(&conn, "SELECT count(*) FROM songs"), 1);
    }
}

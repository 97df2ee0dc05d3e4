//! Backend state and command dispatch.
//!
//! The backend owns the SQLite connection and the four synthetic root
//! containers. Commands arrive one at a time on the caller's thread;
//! responses and events are pushed into a caller supplied sink. Root
//! containers are exposed only while their backing table is
//! non-empty, and structural changes are bracketed by advisory
//! lock/unlock events so listeners know results may be transiently
//! inconsistent.

use std::path::Path;

use rusqlite::Connection;
use serde::Serialize;
use serde_json::Value;

use crate::browse::{
    self, ActiveRoots, ROOT_ALBUMS_ID, ROOT_MOVIES_ID, ROOT_SERIES_ID, ROOT_SONGS_ID,
};
use crate::media::MediaReader;
use crate::track::{self, *};
use crate::{db_meta, scan, sqlite, Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    BrowseObject {
        id: String,
    },
    BrowseChildren {
        id: String,
        start: i64,
        num: i64,
        one_answer: bool,
    },
    Rescan,
    AddScanDir {
        path: String,
    },
    DelScanDir {
        path: String,
    },
    SetDirs {
        dirs: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Event {
    ObjectResponse {
        obj: Value,
    },
    ChildrenResponse {
        children: Vec<Value>,
        index: i64,
        last: bool,
        total: i64,
    },
    RescanDone,
    ScanDirAdded {
        path: String,
    },
    ScanDirDeleted {
        path: String,
    },
    ParameterChanged {
        name: String,
        value: Value,
    },
    RootContainerAdded {
        container: Value,
    },
    RootContainerRemoved {
        id: String,
    },
    RootContainersLocked {
        locked: bool,
    },
}

pub trait EventSink {
    fn put(&mut self, event: Event);
}

impl EventSink for Vec<Event> {
    fn put(&mut self, event: Event) {
        self.push(event);
    }
}

fn root_container(id: &str, label: &str, class: &str, num_children: i64) -> Value {
    let mut t = track::new_track();
    {
        let m = metadata_mut(&mut t);
        set_string(m, META_ID, id);
        set_string(m, META_LABEL, label);
        set_string(m, META_CLASS, class);
    }
    track::set_num_children(&mut t, num_children, 0);
    t
}

pub struct Backend {
    conn: Connection,
    reader: Box<dyn MediaReader>,
    roots: ActiveRoots,
    songs: Value,
    albums: Value,
    movies: Value,
    series: Value,
    have_params: bool,
}

impl Backend {
    /// Open (or create) `<directory>/db.sqlite`. Fails if the file
    /// cannot be opened or the initial schema cannot be created.
    pub fn create(directory: &Path, reader: Box<dyn MediaReader>) -> Result<Backend> {
        let filename = directory.join("db.sqlite");
        info!("using '{}'", filename.to_string_lossy());

        let mut conn = match Connection::open(&filename) {
            Ok(c) => c,
            Err(e) => {
                error!(
                    "cannot open database '{}': {}",
                    filename.to_string_lossy(),
                    e
                );
                return Err(e.into());
            }
        };

        // journal_mode reports the new mode back as a row
        let _: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        sqlite::init_strcoll(&conn)?;

        if !db_meta::ensure_schema(&mut conn)? {
            return Err(Error::OtherError);
        }

        let mut backend = Backend {
            conn,
            reader,
            roots: ActiveRoots::default(),
            // facet counts are fixed per root
            songs: root_container(ROOT_SONGS_ID, "Songs", CLASS_ROOT_SONGS, 5),
            albums: root_container(ROOT_ALBUMS_ID, "Albums", CLASS_ROOT_ALBUMS, 4),
            movies: root_container(ROOT_MOVIES_ID, "Movies", CLASS_ROOT_MOVIES, 7),
            series: root_container(ROOT_SERIES_ID, "Series", CLASS_ROOT_SERIES, 2),
            have_params: false,
        };

        // expose roots whose tables already have content; no events
        // yet, nobody is listening during creation
        backend.roots = backend.query_roots();

        Ok(backend)
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn roots(&self) -> ActiveRoots {
        self.roots
    }

    fn query_roots(&self) -> ActiveRoots {
        let non_empty = |table: &str| {
            sqlite::query_i64(
                &self.conn,
                &format!("SELECT COUNT(\"{}\") FROM {}", META_DB_ID, table),
                &[],
            ) > 0
        };

        ActiveRoots {
            songs: non_empty("songs"),
            albums: non_empty("albums"),
            movies: non_empty("movies"),
            series: non_empty("shows"),
        }
    }

    fn update_root_containers(&mut self, sink: &mut dyn EventSink) {
        let new = self.query_roots();
        let old = self.roots;
        self.roots = new;

        let containers = [
            (old.songs, new.songs, &self.songs, ROOT_SONGS_ID),
            (old.albums, new.albums, &self.albums, ROOT_ALBUMS_ID),
            (old.movies, new.movies, &self.movies, ROOT_MOVIES_ID),
            (old.series, new.series, &self.series, ROOT_SERIES_ID),
        ];

        for (was, is, container, id) in &containers {
            if *is && !*was {
                sink.put(Event::RootContainerAdded {
                    container: (*container).clone(),
                });
            } else if !*is && *was {
                sink.put(Event::RootContainerRemoved { id: id.to_string() });
            }
        }
    }

    fn lock_root_containers(&self, locked: bool, sink: &mut dyn EventSink) {
        sink.put(Event::RootContainersLocked { locked });
    }

    fn root_container_for(&self, id: &str) -> Option<Value> {
        match id {
            ROOT_SONGS_ID if self.roots.songs => Some(self.songs.clone()),
            ROOT_ALBUMS_ID if self.roots.albums => Some(self.albums.clone()),
            ROOT_MOVIES_ID if self.roots.movies => Some(self.movies.clone()),
            ROOT_SERIES_ID if self.roots.series => Some(self.series.clone()),
            _ => None,
        }
    }

    fn scan_dirs(&self) -> Vec<String> {
        sqlite::string_array(&self.conn, "SELECT PATH FROM scandirs", &[])
    }

    /// Dispatch one inbound command, emitting responses and events.
    pub fn handle(&mut self, cmd: Command, sink: &mut dyn EventSink) {
        match cmd {
            Command::BrowseObject { id } => {
                if let Some(container) = self.root_container_for(&id) {
                    sink.put(Event::ObjectResponse { obj: container });
                    return;
                }

                // unresolvable ids are dropped without a response
                if let Some(obj) = browse::browse_object(&self.conn, &self.roots, &id) {
                    sink.put(Event::ObjectResponse { obj });
                }
            }

            Command::BrowseChildren {
                id,
                start,
                num,
                one_answer,
            } => {
                let conn = &self.conn;
                let roots = &self.roots;
                browse::browse_children(
                    conn,
                    roots,
                    &id,
                    start,
                    num,
                    one_answer,
                    &mut |children, index, last, total| {
                        sink.put(Event::ChildrenResponse {
                            children,
                            index,
                            last,
                            total,
                        });
                    },
                );
            }

            Command::Rescan => {
                let dirs = self.scan_dirs();

                self.lock_root_containers(true, sink);
                for dir in &dirs {
                    scan::add_directory(&self.conn, self.reader.as_ref(), dir);
                }
                self.lock_root_containers(false, sink);
                self.update_root_containers(sink);

                sink.put(Event::RescanDone);
            }

            Command::AddScanDir { path } => {
                info!("adding scan directory {}", path);

                let mut dirs = self.scan_dirs();
                if dirs.iter().any(|d| *d == path) {
                    warn!("directory {} already added", path);
                } else {
                    self.lock_root_containers(true, sink);
                    scan::add_directory(&self.conn, self.reader.as_ref(), &path);
                    self.lock_root_containers(false, sink);
                    self.update_root_containers(sink);

                    dirs.push(path.clone());
                    sink.put(Event::ParameterChanged {
                        name: "dirs".to_string(),
                        value: serde_json::json!(dirs),
                    });
                }

                sink.put(Event::ScanDirAdded { path });
            }

            Command::DelScanDir { path } => {
                info!("deleting scan directory {}", path);

                let mut dirs = self.scan_dirs();
                if let Some(idx) = dirs.iter().position(|d| *d == path) {
                    self.lock_root_containers(true, sink);
                    scan::delete_directory(&self.conn, &path);
                    self.lock_root_containers(false, sink);
                    self.update_root_containers(sink);

                    dirs.remove(idx);
                    sink.put(Event::ParameterChanged {
                        name: "dirs".to_string(),
                        value: serde_json::json!(dirs),
                    });
                } else {
                    warn!("directory {} not there", path);
                }

                sink.put(Event::ScanDirDeleted { path });
            }

            Command::SetDirs { dirs } => self.set_dirs(dirs, sink),
        }
    }

    /// Reconcile the desired directory set against `scandirs`,
    /// adding and removing the difference. Also used for state
    /// restore at startup; only later calls echo the changed
    /// parameter for persistence.
    fn set_dirs(&mut self, dirs: Vec<String>, sink: &mut dyn EventSink) {
        let current = self.scan_dirs();
        let mut locked = false;
        let mut changed = false;

        for dir in &dirs {
            if !current.iter().any(|d| d == dir) {
                if !locked {
                    self.lock_root_containers(true, sink);
                    locked = true;
                }
                scan::add_directory(&self.conn, self.reader.as_ref(), dir);
                changed = true;
            }
        }

        for dir in &current {
            if !dirs.iter().any(|d| d == dir) {
                if !locked {
                    self.lock_root_containers(true, sink);
                    locked = true;
                }
                scan::delete_directory(&self.conn, dir);
                changed = true;
            }
        }

        if locked {
            self.lock_root_containers(false, sink);
        }

        if changed || !self.have_params {
            self.update_root_containers(sink);
        }

        if self.have_params {
            sink.put(Event::ParameterChanged {
                name: "dirs".to_string(),
                value: serde_json::json!(dirs),
            });
        }
        self.have_params = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{song_track, MockReader};
    use std::fs;

    fn test_backend(reader: MockReader) -> (tempfile::TempDir, Backend) {
        let tmp = tempfile::tempdir().unwrap();
        let backend = Backend::create(tmp.path(), Box::new(reader)).unwrap();
        (tmp, backend)
    }

    fn music_dir(tmp: &tempfile::TempDir, reader: &mut MockReader) -> String {
        let dir = tmp.path().join("music");
        fs::create_dir_all(&dir).unwrap();

        let uri = dir.join("one.mp3").to_string_lossy().to_string();
        fs::write(&uri, b"x").unwrap();
        reader.insert(&uri, song_track("One", "Foo", "Rock", "A", 100));

        dir.to_string_lossy().to_string()
    }

    #[test]
    fn add_dir_exposes_roots_and_echoes_parameter() {
        let mut reader = MockReader::new();
        let tmp = tempfile::tempdir().unwrap();
        let dir = music_dir(&tmp, &mut reader);

        let (_db, mut backend) = test_backend(reader);
        assert_eq!(backend.roots(), ActiveRoots::default());

        let mut events: Vec<Event> = Vec::new();
        backend.handle(Command::AddScanDir { path: dir.clone() }, &mut events);

        assert!(events.contains(&Event::RootContainersLocked { locked: true }));
        assert!(events.contains(&Event::RootContainersLocked { locked: false }));
        assert!(events.contains(&Event::ScanDirAdded { path: dir.clone() }));

        // songs and albums appeared
        assert!(backend.roots().songs);
        assert!(backend.roots().albums);
        assert!(!backend.roots().movies);

        let added: Vec<&Value> = events
            .iter()
            .filter_map(|e| match e {
                Event::RootContainerAdded { container } => Some(container),
                _ => None,
            })
            .collect();
        assert_eq!(added.len(), 2);

        assert!(events.iter().any(|e| matches!(
            e,
            Event::ParameterChanged { name, .. } if name == "dirs"
        )));

        // adding the same directory again only confirms
        let mut events: Vec<Event> = Vec::new();
        backend.handle(Command::AddScanDir { path: dir.clone() }, &mut events);
        assert_eq!(
            events,
            vec![Event::ScanDirAdded { path: dir.clone() }]
        );
    }

    #[test]
    fn browse_round_trip_through_commands() {
        let mut reader = MockReader::new();
        let tmp = tempfile::tempdir().unwrap();
        let dir = music_dir(&tmp, &mut reader);

        let (_db, mut backend) = test_backend(reader);

        let mut events: Vec<Event> = Vec::new();
        backend.handle(Command::AddScanDir { path: dir }, &mut events);

        // root container object
        let mut events: Vec<Event> = Vec::new();
        backend.handle(
            Command::BrowseObject {
                id: ROOT_SONGS_ID.to_string(),
            },
            &mut events,
        );
        assert_eq!(events.len(), 1);
        match &events[0] {
            Event::ObjectResponse { obj } => {
                let m = metadata(obj).unwrap();
                assert_eq!(get_string(m, META_LABEL), Some("Songs"));
                assert_eq!(get_string(m, META_CLASS), Some(CLASS_ROOT_SONGS));
            }
            other => panic!("unexpected event {:?}", other),
        }

        // facet listing below it
        let mut events: Vec<Event> = Vec::new();
        backend.handle(
            Command::BrowseChildren {
                id: ROOT_SONGS_ID.to_string(),
                start: 0,
                num: 0,
                one_answer: true,
            },
            &mut events,
        );
        match &events[0] {
            Event::ChildrenResponse {
                children,
                index,
                last,
                total,
            } => {
                assert_eq!(*index, 0);
                assert!(*last);
                assert_eq!(*total, 5);
                assert_eq!(children.len(), 5);
            }
            other => panic!("unexpected event {:?}", other),
        }

        // unresolvable ids are dropped silently
        let mut events: Vec<Event> = Vec::new();
        backend.handle(
            Command::BrowseObject {
                id: "/songs/bogus".to_string(),
            },
            &mut events,
        );
        assert!(events.is_empty());
    }

    #[test]
    fn set_dirs_reconciles_and_del_dir_hides_roots() {
        let mut reader = MockReader::new();
        let tmp = tempfile::tempdir().unwrap();
        let dir = music_dir(&tmp, &mut reader);

        let (_db, mut backend) = test_backend(reader);

        // startup restore: no parameter echo
        let mut events: Vec<Event> = Vec::new();
        backend.handle(
            Command::SetDirs {
                dirs: vec![dir.clone()],
            },
            &mut events,
        );
        assert!(backend.roots().songs);
        assert!(!events
            .iter()
            .any(|e| matches!(e, Event::ParameterChanged { .. })));

        // removing the only directory empties the database
        let mut events: Vec<Event> = Vec::new();
        backend.handle(Command::DelScanDir { path: dir.clone() }, &mut events);

        assert!(!backend.roots().songs);
        assert!(events
            .iter()
            .any(|e| matches!(e, Event::RootContainerRemoved { id } if id == ROOT_SONGS_ID)));
        assert!(events.contains(&Event::ScanDirDeleted { path: dir.clone() }));

        // a later SetDirs echoes the parameter
        let mut events: Vec<Event> = Vec::new();
        backend.handle(
            Command::SetDirs {
                dirs: vec![dir.clone()],
            },
            &mut events,
        );
        assert!(events
            .iter()
            .any(|e| matches!(e, Event::ParameterChanged { .. })));
    }

    #[test]
    fn rescan_emits_completion() {
        let mut reader = MockReader::new();
        let tmp = tempfile::tempdir().unwrap();
        let dir = music_dir(&tmp, &mut reader);

        let (_db, mut backend) = test_backend(reader);

        let mut events: Vec<Event> = Vec::new();
        backend.handle(Command::AddScanDir { path: dir }, &mut events);

        let mut events: Vec<Event> = Vec::new();
        backend.handle(Command::Rescan, &mut events);
        assert_eq!(events.last(), Some(&Event::RescanDone));
    }
}

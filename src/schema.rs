//! Schema registry.
//!
//! One static table per object type describes its SQL table, scalar
//! columns, file source columns and string array facets. Everything
//! else (table creation, inserts, updates, object queries) is driven
//! off these descriptors, so column order here is load-bearing: the
//! first column is the primary key and readers map columns by
//! position.

use rusqlite::Connection;

use crate::track::*;

pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ObjectType {
    Song = 1,
    Album = 2,
    TvShow = 3,
    TvSeason = 4,
    TvEpisode = 5,
    Movie = 6,
    Image = 7,
    Nfo = 8,
    MoviePart = 9,
}

impl ObjectType {
    pub fn from_i64(v: i64) -> Option<ObjectType> {
        match v {
            1 => Some(ObjectType::Song),
            2 => Some(ObjectType::Album),
            3 => Some(ObjectType::TvShow),
            4 => Some(ObjectType::TvSeason),
            5 => Some(ObjectType::TvEpisode),
            6 => Some(ObjectType::Movie),
            7 => Some(ObjectType::Image),
            8 => Some(ObjectType::Nfo),
            9 => Some(ObjectType::MoviePart),
            _ => None,
        }
    }

    pub fn from_class(class: &str) -> Option<ObjectType> {
        match class {
            CLASS_SONG => Some(ObjectType::Song),
            CLASS_ALBUM => Some(ObjectType::Album),
            CLASS_TV_SHOW => Some(ObjectType::TvShow),
            CLASS_TV_SEASON => Some(ObjectType::TvSeason),
            CLASS_TV_EPISODE => Some(ObjectType::TvEpisode),
            CLASS_MOVIE => Some(ObjectType::Movie),
            CLASS_IMAGE => Some(ObjectType::Image),
            CLASS_NFO => Some(ObjectType::Nfo),
            CLASS_MOVIE_PART => Some(ObjectType::MoviePart),
            _ => None,
        }
    }

    pub fn class(self) -> &'static str {
        match self {
            ObjectType::Song => CLASS_SONG,
            ObjectType::Album => CLASS_ALBUM,
            ObjectType::TvShow => CLASS_TV_SHOW,
            ObjectType::TvSeason => CLASS_TV_SEASON,
            ObjectType::TvEpisode => CLASS_TV_EPISODE,
            ObjectType::Movie => CLASS_MOVIE,
            ObjectType::Image => CLASS_IMAGE,
            ObjectType::Nfo => CLASS_NFO,
            ObjectType::MoviePart => CLASS_MOVIE_PART,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ColumnType {
    Int,
    Long,
    Text,
}

impl ColumnType {
    fn sql(self) -> &'static str {
        match self {
            ColumnType::Int | ColumnType::Long => "INTEGER",
            ColumnType::Text => "TEXT",
        }
    }
}

pub struct ColumnDef {
    pub name: &'static str,
    pub ctype: ColumnType,
    /// Text columns stored indirectly as an id into this name table.
    pub id_table: Option<&'static str>,
}

pub struct ArrayDef {
    pub field: &'static str,
    pub arr_table: &'static str,
    pub id_table: &'static str,
}

pub struct ObjectTable {
    pub otype: ObjectType,
    pub table: &'static str,
    /// Scan pass this type is synchronized in (images/NFOs first).
    pub pass: u32,
    pub cols: &'static [ColumnDef],
    pub src_cols: &'static [ColumnDef],
    pub arrays: &'static [ArrayDef],
}

const fn col(name: &'static str, ctype: ColumnType) -> ColumnDef {
    ColumnDef {
        name,
        ctype,
        id_table: None,
    }
}

const fn id_col(name: &'static str, id_table: &'static str) -> ColumnDef {
    ColumnDef {
        name,
        ctype: ColumnType::Text,
        id_table: Some(id_table),
    }
}

pub const OBJECT_TABLES: &[ObjectTable] = &[
    ObjectTable {
        otype: ObjectType::Image,
        table: "images",
        pass: 1,
        cols: &[
            col(META_DB_ID, ColumnType::Long),
            col(META_SCAN_DIR_ID, ColumnType::Long),
            col(META_IMAGE_TYPE, ColumnType::Int),
        ],
        src_cols: &[
            col(META_URI, ColumnType::Text),
            col(META_MTIME, ColumnType::Long),
            id_col(META_MIMETYPE, "image_mimetypes"),
            col(META_WIDTH, ColumnType::Int),
            col(META_HEIGHT, ColumnType::Int),
        ],
        arrays: &[],
    },
    ObjectTable {
        otype: ObjectType::Nfo,
        table: "nfos",
        pass: 1,
        cols: &[
            col(META_DB_ID, ColumnType::Long),
            col(META_SCAN_DIR_ID, ColumnType::Long),
            col(META_URI, ColumnType::Text),
            col(META_MTIME, ColumnType::Long),
        ],
        src_cols: &[],
        arrays: &[],
    },
    ObjectTable {
        otype: ObjectType::Song,
        table: "songs",
        pass: 2,
        cols: &[
            col(META_DB_ID, ColumnType::Long),
            col(META_TITLE, ColumnType::Text),
            col(META_SEARCH_TITLE, ColumnType::Text),
            col(META_PARENT_ID, ColumnType::Long),
            col(META_TRACKNUMBER, ColumnType::Int),
            col(META_APPROX_DURATION, ColumnType::Long),
            col(META_DATE, ColumnType::Text),
            col(META_AUDIO_BITRATE, ColumnType::Int),
            col(META_AUDIO_CODEC, ColumnType::Text),
            col(META_AUDIO_CHANNELS, ColumnType::Int),
            col(META_AUDIO_SAMPLERATE, ColumnType::Int),
            col(META_SCAN_DIR_ID, ColumnType::Long),
            col(META_COVER_ID, ColumnType::Long),
        ],
        src_cols: &[
            col(META_URI, ColumnType::Text),
            col(META_MTIME, ColumnType::Long),
            id_col(META_MIMETYPE, "song_mimetypes"),
        ],
        arrays: &[
            ArrayDef {
                field: META_ARTIST,
                arr_table: "song_artists_arr",
                id_table: "song_artists",
            },
            ArrayDef {
                field: META_GENRE,
                arr_table: "song_genres_arr",
                id_table: "song_genres",
            },
        ],
    },
    ObjectTable {
        otype: ObjectType::Album,
        table: "albums",
        pass: 2,
        cols: &[
            col(META_DB_ID, ColumnType::Long),
            col(META_TITLE, ColumnType::Text),
            col(META_SEARCH_TITLE, ColumnType::Text),
            col(META_APPROX_DURATION, ColumnType::Long),
            col(META_DATE, ColumnType::Text),
            col(META_NUM_CHILDREN, ColumnType::Int),
            col(META_COVER_ID, ColumnType::Long),
        ],
        src_cols: &[],
        arrays: &[
            ArrayDef {
                field: META_ARTIST,
                arr_table: "album_artists_arr",
                id_table: "album_artists",
            },
            ArrayDef {
                field: META_GENRE,
                arr_table: "album_genres_arr",
                id_table: "album_genres",
            },
        ],
    },
    ObjectTable {
        otype: ObjectType::TvShow,
        table: "shows",
        pass: 2,
        cols: &[
            col(META_DB_ID, ColumnType::Long),
            col(META_TITLE, ColumnType::Text),
            col(META_SEARCH_TITLE, ColumnType::Text),
            col(META_NUM_CHILDREN, ColumnType::Int),
            col(META_PLOT, ColumnType::Text),
            col(META_POSTER_ID, ColumnType::Long),
            col(META_WALLPAPER_ID, ColumnType::Long),
            col(META_NFO_ID, ColumnType::Long),
        ],
        src_cols: &[],
        arrays: &[ArrayDef {
            field: META_GENRE,
            arr_table: "show_genres_arr",
            id_table: "show_genres",
        }],
    },
    ObjectTable {
        otype: ObjectType::TvSeason,
        table: "seasons",
        pass: 2,
        cols: &[
            col(META_DB_ID, ColumnType::Long),
            col(META_PARENT_ID, ColumnType::Long),
            col(META_SEASON, ColumnType::Int),
            col(META_APPROX_DURATION, ColumnType::Long),
            col(META_DATE, ColumnType::Text),
            col(META_NUM_CHILDREN, ColumnType::Int),
            col(META_POSTER_ID, ColumnType::Long),
            col(META_WALLPAPER_ID, ColumnType::Long),
        ],
        src_cols: &[],
        arrays: &[],
    },
    ObjectTable {
        otype: ObjectType::TvEpisode,
        table: "episodes",
        pass: 2,
        cols: &[
            col(META_DB_ID, ColumnType::Long),
            col(META_PARENT_ID, ColumnType::Long),
            col(META_TITLE, ColumnType::Text),
            col(META_SEARCH_TITLE, ColumnType::Text),
            col(META_EPISODENUMBER, ColumnType::Int),
            col(META_APPROX_DURATION, ColumnType::Long),
            col(META_DATE, ColumnType::Text),
            col(META_SCAN_DIR_ID, ColumnType::Long),
            col(META_POSTER_ID, ColumnType::Long),
            col(META_WALLPAPER_ID, ColumnType::Long),
            col(META_AUDIO_BITRATE, ColumnType::Int),
            col(META_AUDIO_CODEC, ColumnType::Text),
            col(META_AUDIO_CHANNELS, ColumnType::Int),
            col(META_AUDIO_SAMPLERATE, ColumnType::Int),
            col(META_VIDEO_CODEC, ColumnType::Text),
            col(META_WIDTH, ColumnType::Int),
            col(META_HEIGHT, ColumnType::Int),
        ],
        src_cols: &[
            col(META_URI, ColumnType::Text),
            col(META_MTIME, ColumnType::Long),
            id_col(META_MIMETYPE, "episode_mimetypes"),
        ],
        arrays: &[],
    },
    ObjectTable {
        otype: ObjectType::Movie,
        table: "movies",
        pass: 2,
        cols: &[
            col(META_DB_ID, ColumnType::Long),
            col(META_TITLE, ColumnType::Text),
            col(META_SEARCH_TITLE, ColumnType::Text),
            col(META_ORIGINAL_TITLE, ColumnType::Text),
            col(META_APPROX_DURATION, ColumnType::Long),
            col(META_PLOT, ColumnType::Text),
            col(META_DATE, ColumnType::Text),
            col(META_POSTER_ID, ColumnType::Long),
            col(META_WALLPAPER_ID, ColumnType::Long),
            col(META_NFO_ID, ColumnType::Long),
            col(META_AUDIO_BITRATE, ColumnType::Int),
            col(META_AUDIO_CODEC, ColumnType::Text),
            col(META_AUDIO_CHANNELS, ColumnType::Int),
            col(META_AUDIO_SAMPLERATE, ColumnType::Int),
            col(META_VIDEO_CODEC, ColumnType::Text),
            col(META_WIDTH, ColumnType::Int),
            col(META_HEIGHT, ColumnType::Int),
        ],
        src_cols: &[],
        arrays: &[
            ArrayDef {
                field: META_DIRECTOR,
                arr_table: "movie_directors_arr",
                id_table: "movie_directors",
            },
            ArrayDef {
                field: META_ACTOR,
                arr_table: "movie_actors_arr",
                id_table: "movie_actors",
            },
            ArrayDef {
                field: META_GENRE,
                arr_table: "movie_genres_arr",
                id_table: "movie_genres",
            },
            ArrayDef {
                field: META_COUNTRY,
                arr_table: "movie_countries_arr",
                id_table: "movie_countries",
            },
            ArrayDef {
                field: META_AUDIO_LANGUAGES,
                arr_table: "movie_audio_languages_arr",
                id_table: "movie_audio_languages",
            },
            ArrayDef {
                field: META_SUBTITLE_LANGUAGES,
                arr_table: "movie_subtitle_languages_arr",
                id_table: "movie_subtitle_languages",
            },
        ],
    },
    ObjectTable {
        otype: ObjectType::MoviePart,
        table: "movie_parts",
        pass: 2,
        cols: &[
            col(META_DB_ID, ColumnType::Long),
            col(META_SCAN_DIR_ID, ColumnType::Long),
            col(META_APPROX_DURATION, ColumnType::Long),
            col(META_IDX, ColumnType::Int),
            col(META_PARENT_ID, ColumnType::Long),
        ],
        src_cols: &[
            col(META_URI, ColumnType::Text),
            col(META_MTIME, ColumnType::Long),
            id_col(META_MIMETYPE, "movie_mimetypes"),
        ],
        arrays: &[],
    },
];

pub fn object_table(otype: ObjectType) -> &'static ObjectTable {
    OBJECT_TABLES
        .iter()
        .find(|t| t.otype == otype)
        .expect("unregistered object type")
}

pub fn has_col(tab: &'static ObjectTable, name: &str) -> Option<&'static ColumnDef> {
    tab.cols.iter().find(|c| c.name == name)
}

pub fn has_src_col(tab: &'static ObjectTable, name: &str) -> Option<&'static ColumnDef> {
    tab.src_cols.iter().find(|c| c.name == name)
}

pub fn has_array(tab: &ObjectTable, field: &str) -> bool {
    tab.arrays.iter().any(|a| a.field == field)
}

fn column_sql(c: &ColumnDef) -> String {
    if c.id_table.is_some() {
        format!("\"{}\" INTEGER", c.name)
    } else {
        format!("\"{}\" {}", c.name, c.ctype.sql())
    }
}

/// Materialize the registry into CREATE TABLE statements. Runs once,
/// on a freshly created database; any failure is fatal for backend
/// creation.
pub fn create_tables(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE objects(DBID INTEGER PRIMARY KEY, TYPE INTEGER);
        CREATE TABLE scandirs(ID INTEGER PRIMARY KEY, PATH TEXT);",
    )?;

    for tab in OBJECT_TABLES {
        let mut sql = format!("CREATE TABLE {}(", tab.table);

        for (i, c) in tab.cols.iter().enumerate() {
            if i > 0 {
                sql.push_str(", ");
            }
            sql.push_str(&column_sql(c));
            if i == 0 {
                sql.push_str(" PRIMARY KEY");
            }
        }

        for c in tab.src_cols {
            sql.push_str(", ");
            sql.push_str(&column_sql(c));
        }

        sql.push_str(");");
        conn.execute_batch(&sql)?;

        for arr in tab.arrays {
            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {}(ID INTEGER PRIMARY KEY, NAME TEXT);",
                arr.id_table
            ))?;
            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {}(ID INTEGER PRIMARY KEY, OBJ_ID INTEGER, NAME_ID INTEGER);",
                arr.arr_table
            ))?;
        }

        for c in tab.cols.iter().chain(tab.src_cols) {
            if let Some(id_table) = c.id_table {
                conn.execute_batch(&format!(
                    "CREATE TABLE IF NOT EXISTS {}(ID INTEGER PRIMARY KEY, NAME TEXT);",
                    id_table
                ))?;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn materializer_creates_all_tables() {
        let conn = Connection::open_in_memory().unwrap();
        create_tables(&conn).unwrap();

        let mut expected = vec!["objects".to_string(), "scandirs".to_string()];
        for tab in OBJECT_TABLES {
            expected.push(tab.table.to_string());
            for arr in tab.arrays {
                expected.push(arr.id_table.to_string());
                expected.push(arr.arr_table.to_string());
            }
            for c in tab.cols.iter().chain(tab.src_cols) {
                if let Some(t) = c.id_table {
                    expected.push(t.to_string());
                }
            }
        }

        for table in expected {
            let count: i64 = conn
                .query_row(
                    "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
                    [&table],
                    |row| row.get(0),
                )
                .unwrap();
            assert_eq!(count, 1, "missing table {}", table);
        }
    }

    #[test]
    fn first_column_is_the_object_id() {
        for tab in OBJECT_TABLES {
            assert_eq!(tab.cols[0].name, META_DB_ID, "table {}", tab.table);
        }
    }

    #[test]
    fn type_roundtrip() {
        for tab in OBJECT_TABLES {
            assert_eq!(ObjectType::from_i64(tab.otype as i64), Some(tab.otype));
            assert_eq!(ObjectType::from_class(tab.otype.class()), Some(tab.otype));
        }
    }
}

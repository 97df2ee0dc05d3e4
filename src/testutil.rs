//! Shared test fixtures.

use std::collections::HashMap;

use rusqlite::Connection;
use serde_json::Value;

use crate::media::MediaReader;
use crate::track::{self, *};
use crate::{db_meta, sqlite};

pub fn test_conn() -> Connection {
    let mut conn = Connection::open_in_memory().unwrap();
    sqlite::init_strcoll(&conn).unwrap();
    assert!(db_meta::ensure_schema(&mut conn).unwrap());
    conn
}

pub fn song_track(title: &str, artist: &str, genre: &str, album: &str, duration: i64) -> Value {
    let mut t = track::new_track();
    {
        let m = metadata_mut(&mut t);
        set_string(m, META_CLASS, CLASS_SONG);
        set_string(m, META_TITLE, title);
        append_string_array(m, META_ARTIST, artist);
        append_string_array(m, META_ALBUMARTIST, artist);
        append_string_array(m, META_GENRE, genre);
        set_string(m, META_ALBUM, album);
        set_i64(m, META_APPROX_DURATION, duration);
    }
    {
        let src = src_mut(&mut t);
        set_string(src, META_URI, &format!("/music/{}/{}.mp3", album, title));
        set_i64(src, META_MTIME, 1000);
        set_string(src, META_MIMETYPE, "audio/mpeg");
    }
    t
}

pub fn movie_track(title: &str, year: i32, uri: &str, duration: i64) -> Value {
    let mut t = track::new_track();
    {
        let m = metadata_mut(&mut t);
        set_string(m, META_CLASS, CLASS_MOVIE);
        set_string(m, META_TITLE, title);
        set_string(m, META_DATE, &format!("{:04}-01-01", year));
        set_i64(m, META_APPROX_DURATION, duration);
        append_string_array(m, META_GENRE, "Crime");
        append_string_array(m, META_DIRECTOR, "Somebody");
        append_string_array(m, META_ACTOR, "Someone");
    }
    {
        let src = src_mut(&mut t);
        set_string(src, META_URI, uri);
        set_i64(src, META_MTIME, 1000);
        set_string(src, META_MIMETYPE, "video/x-matroska");
    }
    t
}

pub fn episode_track(show: &str, season: i64, number: i64, title: &str, uri: &str) -> Value {
    let mut t = track::new_track();
    {
        let m = metadata_mut(&mut t);
        set_string(m, META_CLASS, CLASS_TV_EPISODE);
        set_string(m, META_SHOW, show);
        set_i64(m, META_SEASON, season);
        set_i64(m, META_EPISODENUMBER, number);
        set_string(m, META_TITLE, title);
        set_i64(m, META_APPROX_DURATION, 40);
        append_string_array(m, META_GENRE, "Drama");
    }
    {
        let src = src_mut(&mut t);
        set_string(src, META_URI, uri);
        set_i64(src, META_MTIME, 1000);
        set_string(src, META_MIMETYPE, "video/x-matroska");
    }
    t
}

/// Reader handing out canned tracks by URI.
pub struct MockReader {
    pub tracks: HashMap<String, Value>,
}

impl MockReader {
    pub fn new() -> MockReader {
        MockReader {
            tracks: HashMap::new(),
        }
    }

    pub fn insert(&mut self, uri: &str, track: Value) {
        self.tracks.insert(uri.to_string(), track);
    }
}

impl MediaReader for MockReader {
    fn load(&self, uri: &str, mtime: i64) -> Option<Vec<Value>> {
        let mut track = self.tracks.get(uri)?.clone();
        {
            let src = src_mut(&mut track);
            set_string(src, META_URI, uri);
            set_i64(src, META_MTIME, mtime);
        }
        Some(vec![track])
    }
}

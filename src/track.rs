//! Generic metadata records.
//!
//! Objects travel through the backend as JSON values: a track is an
//! object with a `metadata` dictionary, an optional `Src` array inside
//! the metadata (file sources) and an optional `Parts` array at the top
//! level (multipart movies). The field names double as SQL column names,
//! so they are part of the database layout.

use serde_json::{Map, Value};

pub type Dict = Map<String, Value>;

pub const META_DB_ID: &str = "DBID";
pub const META_PARENT_ID: &str = "ParentID";
pub const META_SCAN_DIR_ID: &str = "ScanDirID";
pub const META_POSTER_ID: &str = "PosterID";
pub const META_WALLPAPER_ID: &str = "WallpaperID";
pub const META_COVER_ID: &str = "CoverID";
pub const META_NFO_ID: &str = "NFOID";
pub const META_IMAGE_TYPE: &str = "IMAGETYPE";

pub const META_TITLE: &str = "Title";
pub const META_SEARCH_TITLE: &str = "SearchTitle";
pub const META_ORIGINAL_TITLE: &str = "OriginalTitle";
pub const META_APPROX_DURATION: &str = "ApproxDuration";
pub const META_DATE: &str = "Date";
pub const META_TRACKNUMBER: &str = "TrackNumber";
pub const META_NUM_CHILDREN: &str = "NumChildren";
pub const META_PLOT: &str = "Plot";
pub const META_SEASON: &str = "Season";
pub const META_EPISODENUMBER: &str = "EpisodeNumber";
pub const META_IDX: &str = "Idx";

pub const META_URI: &str = "URI";
pub const META_MTIME: &str = "MTime";
pub const META_MIMETYPE: &str = "MimeType";

pub const META_AUDIO_BITRATE: &str = "AudioBitrate";
pub const META_AUDIO_CODEC: &str = "AudioCodec";
pub const META_AUDIO_CHANNELS: &str = "AudioChannels";
pub const META_AUDIO_SAMPLERATE: &str = "AudioSamplerate";
pub const META_VIDEO_CODEC: &str = "VideoCodec";
pub const META_WIDTH: &str = "Width";
pub const META_HEIGHT: &str = "Height";

pub const META_ARTIST: &str = "Artist";
pub const META_ALBUMARTIST: &str = "AlbumArtist";
pub const META_GENRE: &str = "Genre";
pub const META_ACTOR: &str = "Actor";
pub const META_DIRECTOR: &str = "Director";
pub const META_COUNTRY: &str = "Country";
pub const META_AUDIO_LANGUAGES: &str = "AudioLanguages";
pub const META_SUBTITLE_LANGUAGES: &str = "SubtitleLanguages";

pub const META_ALBUM: &str = "Album";
pub const META_SHOW: &str = "Show";

pub const META_ID: &str = "Id";
pub const META_LABEL: &str = "Label";
pub const META_CLASS: &str = "Class";
pub const META_CHILD_CLASS: &str = "ChildClass";
pub const META_NEXT_ID: &str = "NextId";
pub const META_PREVIOUS_ID: &str = "PreviousId";
pub const META_NUM_CONTAINER_CHILDREN: &str = "NumContainerChildren";
pub const META_NUM_ITEM_CHILDREN: &str = "NumItemChildren";

pub const META_COVER_URL: &str = "CoverUrl";
pub const META_POSTER_URL: &str = "PosterUrl";
pub const META_WALLPAPER_URL: &str = "WallpaperUrl";
pub const META_NFO_FILE: &str = "NFOFile";

pub const META_METADATA: &str = "metadata";
pub const META_SRC: &str = "Src";
pub const META_PARTS: &str = "Parts";

/// Appended to an array field name for the parallel id array
/// ("Artist" -> "ArtistId").
pub const ID_SUFFIX: &str = "Id";
/// Appended to an array field name for the facet shortcut array
/// ("Artist" -> "ArtistContainer").
pub const CONTAINER_SUFFIX: &str = "Container";

pub const CLASS_SONG: &str = "song";
pub const CLASS_ALBUM: &str = "album";
pub const CLASS_TV_SHOW: &str = "tvshow";
pub const CLASS_TV_SEASON: &str = "tvseason";
pub const CLASS_TV_EPISODE: &str = "tvepisode";
pub const CLASS_MOVIE: &str = "movie";
pub const CLASS_MOVIE_PART: &str = "moviepart";
pub const CLASS_IMAGE: &str = "image";
pub const CLASS_NFO: &str = "nfo";

pub const CLASS_CONTAINER: &str = "container";
pub const CLASS_CONTAINER_ARTIST: &str = "container.artist";
pub const CLASS_CONTAINER_GENRE: &str = "container.genre";
pub const CLASS_CONTAINER_YEAR: &str = "container.year";
pub const CLASS_CONTAINER_ACTOR: &str = "container.actor";
pub const CLASS_CONTAINER_DIRECTOR: &str = "container.director";
pub const CLASS_CONTAINER_COUNTRY: &str = "container.country";
pub const CLASS_CONTAINER_LANGUAGE: &str = "container.language";

pub const CLASS_ROOT_SONGS: &str = "root.songs";
pub const CLASS_ROOT_ALBUMS: &str = "root.albums";
pub const CLASS_ROOT_MOVIES: &str = "root.movies";
pub const CLASS_ROOT_SERIES: &str = "root.series";

/// Dates whose year is unknown sort last and render as "Unknown".
pub const DATE_UNDEFINED: &str = "9999-99-99";

pub fn new_track() -> Value {
    let mut track = Map::new();
    track.insert(META_METADATA.to_string(), Value::Object(Map::new()));
    Value::Object(track)
}

pub fn metadata(track: &Value) -> Option<&Dict> {
    track.get(META_METADATA).and_then(|v| v.as_object())
}

pub fn metadata_mut(track: &mut Value) -> &mut Dict {
    let obj = track
        .as_object_mut()
        .expect("track is not a JSON object");

    obj.entry(META_METADATA.to_string())
        .or_insert_with(|| Value::Object(Map::new()))
        .as_object_mut()
        .unwrap()
}

pub fn get_string<'a>(m: &'a Dict, key: &str) -> Option<&'a str> {
    m.get(key).and_then(|v| v.as_str())
}

pub fn get_i64(m: &Dict, key: &str) -> Option<i64> {
    m.get(key).and_then(|v| v.as_i64())
}

pub fn set_string(m: &mut Dict, key: &str, val: &str) {
    m.insert(key.to_string(), Value::String(val.to_string()));
}

pub fn set_i64(m: &mut Dict, key: &str, val: i64) {
    m.insert(key.to_string(), Value::Number(val.into()));
}

pub fn string_array<'a>(m: &'a Dict, key: &str) -> Vec<&'a str> {
    match m.get(key) {
        Some(Value::Array(arr)) => arr.iter().filter_map(|v| v.as_str()).collect(),
        Some(Value::String(s)) => vec![s.as_str()],
        _ => Vec::new(),
    }
}

pub fn array_item<'a>(m: &'a Dict, key: &str, idx: usize) -> Option<&'a str> {
    string_array(m, key).get(idx).copied()
}

pub fn num_items(m: &Dict, key: &str) -> usize {
    string_array(m, key).len()
}

pub fn append_string_array(m: &mut Dict, key: &str, val: &str) {
    let entry = m
        .entry(key.to_string())
        .or_insert_with(|| Value::Array(Vec::new()));

    // A scalar string becomes a one-element array first
    if entry.is_string() {
        let old = entry.take();
        *entry = Value::Array(vec![old]);
    }

    if let Some(arr) = entry.as_array_mut() {
        arr.push(Value::String(val.to_string()));
    }
}

/// Copy entries from `src` that are not yet present in `dst`.
pub fn merge_missing(dst: &mut Dict, src: &Dict) {
    for (k, v) in src {
        if !dst.contains_key(k) {
            dst.insert(k.clone(), v.clone());
        }
    }
}

/// First file source of a track, if any.
pub fn src(track: &Value) -> Option<&Dict> {
    metadata(track)?
        .get(META_SRC)?
        .as_array()?
        .first()?
        .as_object()
}

/// First file source, created on demand.
pub fn src_mut(track: &mut Value) -> &mut Dict {
    let m = metadata_mut(track);
    let srcs = m
        .entry(META_SRC.to_string())
        .or_insert_with(|| Value::Array(Vec::new()))
        .as_array_mut()
        .unwrap();

    if srcs.is_empty() {
        srcs.push(Value::Object(Map::new()));
    }
    srcs[0].as_object_mut().unwrap()
}

/// Append a part entry (multipart movies) and return it.
pub fn add_part(track: &mut Value) -> &mut Dict {
    let obj = track.as_object_mut().expect("track is not a JSON object");
    let parts = obj
        .entry(META_PARTS.to_string())
        .or_insert_with(|| Value::Array(Vec::new()))
        .as_array_mut()
        .unwrap();

    parts.push(Value::Object(Map::new()));
    parts.last_mut().unwrap().as_object_mut().unwrap()
}

pub fn set_num_children(track: &mut Value, containers: i64, items: i64) {
    let m = metadata_mut(track);
    set_i64(m, META_NUM_CONTAINER_CHILDREN, containers);
    set_i64(m, META_NUM_ITEM_CHILDREN, items);
    set_i64(m, META_NUM_CHILDREN, containers + items);
}

pub fn num_children(m: &Dict) -> i64 {
    get_i64(m, META_NUM_CHILDREN).unwrap_or(0)
}

pub fn id(track: &Value) -> Option<&str> {
    metadata(track).and_then(|m| get_string(m, META_ID))
}

/// Year of a `Date` field; the undefined sentinel yields None.
pub fn year(m: &Dict) -> Option<i32> {
    let date = get_string(m, META_DATE)?;
    let year: i32 = date.get(..4)?.parse().ok()?;
    if year >= 9999 {
        None
    } else {
        Some(year)
    }
}

/// Title form used for sorting and letter grouping.
pub fn search_title(title: &str) -> String {
    for prefix in &["The ", "A ", "An "] {
        if title.len() > prefix.len() && title.starts_with(prefix) {
            return title[prefix.len()..].to_string();
        }
    }
    title.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn track_metadata_roundtrip() {
        let mut track = new_track();
        {
            let m = metadata_mut(&mut track);
            set_string(m, META_TITLE, "Some Song");
            set_i64(m, META_APPROX_DURATION, 215);
            append_string_array(m, META_ARTIST, "Foo");
            append_string_array(m, META_ARTIST, "Bar");
        }

        let m = metadata(&track).unwrap();
        assert_eq!(get_string(m, META_TITLE), Some("Some Song"));
        assert_eq!(get_i64(m, META_APPROX_DURATION), Some(215));
        assert_eq!(string_array(m, META_ARTIST), vec!["Foo", "Bar"]);
        assert_eq!(array_item(m, META_ARTIST, 1), Some("Bar"));
    }

    #[test]
    fn merge_does_not_overwrite() {
        let mut dst = Dict::new();
        set_string(&mut dst, META_LABEL, "kept");

        let mut src = Dict::new();
        set_string(&mut src, META_LABEL, "ignored");
        set_string(&mut src, META_TITLE, "added");

        merge_missing(&mut dst, &src);
        assert_eq!(get_string(&dst, META_LABEL), Some("kept"));
        assert_eq!(get_string(&dst, META_TITLE), Some("added"));
    }

    #[test]
    fn year_parsing() {
        let mut m = Dict::new();
        set_string(&mut m, META_DATE, "1971-11-12");
        assert_eq!(year(&m), Some(1971));

        set_string(&mut m, META_DATE, DATE_UNDEFINED);
        assert_eq!(year(&m), None);

        m.remove(META_DATE);
        assert_eq!(year(&m), None);
    }

    #[test]
    fn search_title_strips_articles() {
        assert_eq!(search_title("The Wall"), "Wall");
        assert_eq!(search_title("A Day"), "Day");
        assert_eq!(search_title("Another One"), "Another One");
        assert_eq!(search_title("The "), "The ");
    }

    #[test]
    fn num_children_counters() {
        let mut track = new_track();
        set_num_children(&mut track, 2, 3);
        let m = metadata(&track).unwrap();
        assert_eq!(get_i64(m, META_NUM_CONTAINER_CHILDREN), Some(2));
        assert_eq!(get_i64(m, META_NUM_ITEM_CHILDREN), Some(3));
        assert_eq!(num_children(m), 5);
    }
}

//! Media file probing boundary.
//!
//! The backend itself only depends on the `MediaReader` trait and the
//! mimetype classifier; `TagReader` is the built-in implementation
//! covering audio tags, image dimensions and filename-derived video
//! metadata.

use std::path::Path;

use lofty::file::{AudioFile, TaggedFileExt};
use lofty::tag::Accessor;
use serde_json::Value;

use crate::track;
use crate::track::*;

pub const MIMETYPE_NFO: &str = "text/x-nfo";

/// Classify a URI by file extension.
pub fn mimetype(uri: &str) -> Option<String> {
    let path = Path::new(uri);

    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        if ext.eq_ignore_ascii_case("nfo") {
            return Some(MIMETYPE_NFO.to_string());
        }
    }

    mime_guess::from_path(path)
        .first()
        .map(|m| m.essence_str().to_string())
}

/// Files synchronized in the first scan pass, so that later objects
/// can reference them by id.
pub fn is_first_pass(uri: &str) -> bool {
    match mimetype(uri) {
        Some(m) => m.starts_with("image/") || m == MIMETYPE_NFO,
        None => false,
    }
}

pub fn is_blacklisted(uri: &str) -> bool {
    let lower = uri.to_ascii_lowercase();
    lower.ends_with(".srt") || lower.ends_with(".sub") || lower.ends_with(".idx")
}

/// Loads structured metadata for one file. Returns zero or more
/// tracks; multi-track container files are currently not decomposed
/// by the synchronizer.
pub trait MediaReader {
    fn load(&self, uri: &str, mtime: i64) -> Option<Vec<Value>>;
}

/// Built-in reader: lofty for audio tags, the image crate for
/// dimensions, filename patterns for movies and episodes.
pub struct TagReader;

const AUDIO_EXTENSIONS: &[&str] = &["flac", "mp3", "ogg", "oga", "opus", "wav", "m4a", "aac", "wma"];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "avi", "mov", "webm", "m4v", "mpg", "mpeg", "wmv"];

impl MediaReader for TagReader {
    fn load(&self, uri: &str, mtime: i64) -> Option<Vec<Value>> {
        let path = Path::new(uri);
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())?;

        let mime = mimetype(uri);

        if mime.as_deref().map_or(false, |m| m.starts_with("image/")) {
            return self.load_image(uri, mtime).map(|t| vec![t]);
        }
        if mime.as_deref() == Some(MIMETYPE_NFO) {
            return Some(vec![nfo_track(uri, mtime)]);
        }
        if AUDIO_EXTENSIONS.iter().any(|e| *e == ext) {
            return self.load_audio(uri, mtime).map(|t| vec![t]);
        }
        if VIDEO_EXTENSIONS.iter().any(|e| *e == ext) {
            return self.load_video(uri, mtime).map(|t| vec![t]);
        }

        None
    }
}

impl TagReader {
    fn load_image(&self, uri: &str, mtime: i64) -> Option<Value> {
        let dimensions = match image::image_dimensions(Path::new(uri)) {
            Ok(d) => d,
            Err(e) => {
                error!("can't open image file '{}': {}", uri, e);
                return None;
            }
        };

        let mut t = track::new_track();
        set_string(metadata_mut(&mut t), META_CLASS, CLASS_IMAGE);

        let src = src_mut(&mut t);
        set_source(src, uri, mtime);
        set_i64(src, META_WIDTH, i64::from(dimensions.0));
        set_i64(src, META_HEIGHT, i64::from(dimensions.1));

        Some(t)
    }

    fn load_audio(&self, uri: &str, mtime: i64) -> Option<Value> {
        let tagged = match lofty::read_from_path(Path::new(uri)) {
            Ok(t) => t,
            Err(e) => {
                error!("can't read tags from '{}': {}", uri, e);
                return None;
            }
        };

        let mut t = track::new_track();

        {
            let m = metadata_mut(&mut t);
            set_string(m, META_CLASS, CLASS_SONG);

            let properties = tagged.properties();
            set_i64(m, META_APPROX_DURATION, properties.duration().as_secs() as i64);
            if let Some(bitrate) = properties.audio_bitrate() {
                set_i64(m, META_AUDIO_BITRATE, i64::from(bitrate));
            }
            if let Some(rate) = properties.sample_rate() {
                set_i64(m, META_AUDIO_SAMPLERATE, i64::from(rate));
            }
            if let Some(channels) = properties.channels() {
                set_i64(m, META_AUDIO_CHANNELS, i64::from(channels));
            }

            let tag = tagged.primary_tag().or_else(|| tagged.first_tag());

            let title = tag
                .and_then(|tag| tag.title().map(|s| s.to_string()))
                .unwrap_or_else(|| file_stem(uri));
            set_string(m, META_TITLE, &title);

            if let Some(tag) = tag {
                if let Some(artist) = tag.artist() {
                    append_string_array(m, META_ARTIST, &artist);
                }
                if let Some(album) = tag.album() {
                    set_string(m, META_ALBUM, &album);
                }
                if let Some(album_artist) =
                    tag.get_string(&lofty::prelude::ItemKey::AlbumArtist)
                {
                    append_string_array(m, META_ALBUMARTIST, album_artist);
                }
                if let Some(genre) = tag.genre() {
                    append_string_array(m, META_GENRE, &genre);
                }
                if let Some(number) = tag.track() {
                    set_i64(m, META_TRACKNUMBER, i64::from(number));
                }
                if let Some(year) = tag.year() {
                    set_string(m, META_DATE, &format!("{:04}-01-01", year));
                }
            }

            // Songs without an album artist fall back to the artist
            if num_items(m, META_ALBUMARTIST) == 0 {
                if let Some(artist) = array_item(m, META_ARTIST, 0).map(|s| s.to_string()) {
                    append_string_array(m, META_ALBUMARTIST, &artist);
                }
            }
        }

        set_source(src_mut(&mut t), uri, mtime);

        Some(t)
    }

    fn load_video(&self, uri: &str, mtime: i64) -> Option<Value> {
        let stem = file_stem(uri);

        let mut t = track::new_track();

        {
            let m = metadata_mut(&mut t);

            if let Some(episode) = parse_episode(&stem) {
                set_string(m, META_CLASS, CLASS_TV_EPISODE);
                set_string(m, META_SHOW, &episode.show);
                set_i64(m, META_SEASON, i64::from(episode.season));
                set_i64(m, META_EPISODENUMBER, i64::from(episode.number));
                set_string(m, META_TITLE, &episode.title);
            } else {
                let (title, year) = parse_movie_title(&stem);
                set_string(m, META_CLASS, CLASS_MOVIE);
                set_string(m, META_TITLE, &title);
                if let Some(year) = year {
                    set_string(m, META_DATE, &format!("{:04}-01-01", year));
                }
            }
        }

        set_source(src_mut(&mut t), uri, mtime);

        Some(t)
    }
}

fn set_source(src: &mut Dict, uri: &str, mtime: i64) {
    set_string(src, META_URI, uri);
    set_i64(src, META_MTIME, mtime);
    if let Some(m) = mimetype(uri) {
        set_string(src, META_MIMETYPE, &m);
    }
}

fn nfo_track(uri: &str, mtime: i64) -> Value {
    let mut t = track::new_track();
    let m = metadata_mut(&mut t);
    set_string(m, META_CLASS, CLASS_NFO);
    set_string(m, META_URI, uri);
    set_i64(m, META_MTIME, mtime);
    t
}

fn file_stem(uri: &str) -> String {
    Path::new(uri)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| uri.to_string())
}

struct EpisodeName {
    show: String,
    season: i32,
    number: i32,
    title: String,
}

fn clean_name(s: &str) -> String {
    s.trim_matches(|c: char| c == '.' || c == '_' || c == '-' || c == ' ')
        .replace(['.', '_'], " ")
}

/// Recognize "Show Name S01E03 Episode Title" style file names.
fn parse_episode(stem: &str) -> Option<EpisodeName> {
    let bytes = stem.as_bytes();

    for i in 0..bytes.len() {
        if !bytes[i].eq_ignore_ascii_case(&b's') {
            continue;
        }

        let mut j = i + 1;
        while j < bytes.len() && bytes[j].is_ascii_digit() {
            j += 1;
        }
        if j == i + 1 || !bytes.get(j).map_or(false, |b| b.eq_ignore_ascii_case(&b'e')) {
            continue;
        }

        let mut k = j + 1;
        while k < bytes.len() && bytes[k].is_ascii_digit() {
            k += 1;
        }
        if k == j + 1 {
            continue;
        }

        let show = clean_name(&stem[..i]);
        if show.is_empty() {
            continue;
        }

        let season: i32 = stem[i + 1..j].parse().ok()?;
        let number: i32 = stem[j + 1..k].parse().ok()?;

        let mut title = clean_name(&stem[k..]);
        if title.is_empty() {
            title = stem.to_string();
        }

        return Some(EpisodeName {
            show,
            season,
            number,
            title,
        });
    }

    None
}

/// Recognize a trailing "(1987)" year in a movie file name.
fn parse_movie_title(stem: &str) -> (String, Option<i32>) {
    if let Some(open) = stem.rfind('(') {
        let rest = &stem[open + 1..];
        if let Some(close) = rest.find(')') {
            let inner = &rest[..close];
            if inner.len() == 4 {
                if let Ok(year) = inner.parse::<i32>() {
                    let title = clean_name(&stem[..open]);
                    if !title.is_empty() {
                        return (title, Some(year));
                    }
                }
            }
        }
    }

    (clean_name(stem), None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mimetype_classification() {
        assert_eq!(mimetype("/m/a.nfo").as_deref(), Some(MIMETYPE_NFO));
        assert_eq!(mimetype("/m/a.jpg").as_deref(), Some("image/jpeg"));
        assert!(is_first_pass("/m/cover.png"));
        assert!(is_first_pass("/m/movie.nfo"));
        assert!(!is_first_pass("/m/song.mp3"));
    }

    #[test]
    fn blacklist() {
        assert!(is_blacklisted("/m/movie.srt"));
        assert!(is_blacklisted("/m/movie.SRT"));
        assert!(!is_blacklisted("/m/movie.mkv"));
    }

    #[test]
    fn episode_names() {
        let e = parse_episode("Some.Show.S02E05.The.One").unwrap();
        assert_eq!(e.show, "Some Show");
        assert_eq!(e.season, 2);
        assert_eq!(e.number, 5);
        assert_eq!(e.title, "The One");

        let e = parse_episode("show s1e12").unwrap();
        assert_eq!(e.show, "show");
        assert_eq!(e.season, 1);
        assert_eq!(e.number, 12);

        assert!(parse_episode("S01E02").is_none());
        assert!(parse_episode("Heat (1995)").is_none());
    }

    #[test]
    fn movie_titles() {
        assert_eq!(
            parse_movie_title("Heat (1995)"),
            ("Heat".to_string(), Some(1995))
        );
        assert_eq!(parse_movie_title("Heat"), ("Heat".to_string(), None));
        assert_eq!(
            parse_movie_title("Some.Movie"),
            ("Some Movie".to_string(), None)
        );
    }
}

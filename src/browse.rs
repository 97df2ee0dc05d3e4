//! Hierarchical browser.
//!
//! The externally visible address space is a set of slash separated
//! paths below four root containers. The segment grammar is fixed per
//! (root, facet): after the facet name, each segment is a group
//! bucket, a name-table id, a year or an object id, purely by
//! position. `seg_kinds` is that grammar table; both `browse_object`
//! and `browse_children_ids` dispatch on the parsed path.

use std::time::{Duration, Instant};

use rusqlite::types::ToSql;
use rusqlite::Connection;
use serde_json::Value;

use crate::groups;
use crate::objects;
use crate::schema::ObjectType;
use crate::sqlite;
use crate::track::{self, *};

pub const ROOT_SONGS_ID: &str = "/songs";
pub const ROOT_ALBUMS_ID: &str = "/albums";
pub const ROOT_MOVIES_ID: &str = "/movies";
pub const ROOT_SERIES_ID: &str = "/series";

/// Which root containers are currently exposed. Paths below an
/// inactive root do not resolve.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ActiveRoots {
    pub songs: bool,
    pub albums: bool,
    pub movies: bool,
    pub series: bool,
}

impl ActiveRoots {
    pub fn all() -> ActiveRoots {
        ActiveRoots {
            songs: true,
            albums: true,
            movies: true,
            series: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Root {
    Songs,
    Albums,
    Movies,
    Series,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Facet {
    Artist,
    Genre,
    GenreArtist,
    GenreYear,
    Year,
    Actor,
    Director,
    Country,
    Language,
    All,
}

#[derive(Debug, Clone, PartialEq)]
enum Seg {
    Group(String),
    Name(i64),
    Obj(i64),
    Year(i32),
    AllSeason,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum SegKind {
    Group,
    Name,
    Obj,
    Year,
    SeasonOrAll,
}

struct BrowsePath {
    root: Root,
    facet: Option<Facet>,
    segs: Vec<Seg>,
}

fn root_facets(root: Root) -> &'static [Facet] {
    match root {
        Root::Songs => &[
            Facet::Artist,
            Facet::Genre,
            Facet::GenreArtist,
            Facet::GenreYear,
            Facet::Year,
        ],
        Root::Albums => &[
            Facet::Artist,
            Facet::GenreArtist,
            Facet::GenreYear,
            Facet::Year,
        ],
        Root::Movies => &[
            Facet::All,
            Facet::Actor,
            Facet::Director,
            Facet::Genre,
            Facet::Year,
            Facet::Country,
            Facet::Language,
        ],
        Root::Series => &[Facet::All, Facet::Genre],
    }
}

fn facet_str(facet: Facet) -> &'static str {
    match facet {
        Facet::Artist => "artist",
        Facet::Genre => "genre",
        Facet::GenreArtist => "genre-artist",
        Facet::GenreYear => "genre-year",
        Facet::Year => "year",
        Facet::Actor => "actor",
        Facet::Director => "director",
        Facet::Country => "country",
        Facet::Language => "language",
        Facet::All => "all",
    }
}

fn facet_of(root: Root, seg: &str) -> Option<Facet> {
    root_facets(root)
        .iter()
        .copied()
        .find(|f| facet_str(*f) == seg)
}

/// The per-facet segment grammar. Positions are meaning: changing
/// this table changes the wire contract with browser clients.
fn seg_kinds(root: Root, facet: Facet) -> &'static [SegKind] {
    use SegKind::*;

    match (root, facet) {
        (Root::Songs, Facet::Artist) => &[Group, Name, Obj],
        (Root::Songs, Facet::Genre) => &[Name, Group, Obj],
        (Root::Songs, Facet::GenreArtist) => &[Name, Name, Obj],
        (Root::Songs, Facet::GenreYear) => &[Name, Year, Obj],
        (Root::Songs, Facet::Year) => &[Year, Obj],

        (Root::Albums, Facet::Artist) => &[Group, Name, Obj, Obj],
        (Root::Albums, Facet::GenreArtist) => &[Name, Name, Obj, Obj],
        (Root::Albums, Facet::GenreYear) => &[Name, Year, Obj, Obj],
        (Root::Albums, Facet::Year) => &[Year, Obj, Obj],

        (Root::Movies, Facet::All) => &[Obj],
        (Root::Movies, Facet::Actor) => &[Group, Name, Obj],
        (Root::Movies, Facet::Director) => &[Group, Name, Obj],
        (Root::Movies, Facet::Genre) => &[Name, Obj],
        (Root::Movies, Facet::Country) => &[Name, Obj],
        (Root::Movies, Facet::Language) => &[Name, Obj],
        (Root::Movies, Facet::Year) => &[Year, Obj],

        (Root::Series, Facet::All) => &[Obj, SeasonOrAll, Obj],
        (Root::Series, Facet::Genre) => &[Name, Obj, SeasonOrAll, Obj],

        _ => &[],
    }
}

fn parse_path(id: &str, roots: &ActiveRoots) -> Option<BrowsePath> {
    let (root, rest) = if let Some(rest) = id.strip_prefix(ROOT_SONGS_ID) {
        if !roots.songs {
            return None;
        }
        (Root::Songs, rest)
    } else if let Some(rest) = id.strip_prefix(ROOT_ALBUMS_ID) {
        if !roots.albums {
            return None;
        }
        (Root::Albums, rest)
    } else if let Some(rest) = id.strip_prefix(ROOT_MOVIES_ID) {
        if !roots.movies {
            return None;
        }
        (Root::Movies, rest)
    } else if let Some(rest) = id.strip_prefix(ROOT_SERIES_ID) {
        if !roots.series {
            return None;
        }
        (Root::Series, rest)
    } else {
        return None;
    };

    if rest.is_empty() {
        return Some(BrowsePath {
            root,
            facet: None,
            segs: Vec::new(),
        });
    }

    let rest = rest.strip_prefix('/')?;
    let mut parts = rest.split('/');

    let facet = facet_of(root, parts.next()?)?;
    let kinds = seg_kinds(root, facet);

    let mut segs = Vec::new();
    for (i, part) in parts.enumerate() {
        let seg = match kinds.get(i)? {
            SegKind::Group => {
                if groups::label(part).is_none() {
                    return None;
                }
                Seg::Group(part.to_string())
            }
            SegKind::Name => Seg::Name(part.parse().ok()?),
            SegKind::Obj => Seg::Obj(part.parse().ok()?),
            SegKind::Year => Seg::Year(part.parse().ok()?),
            SegKind::SeasonOrAll => {
                if part == "all" {
                    Seg::AllSeason
                } else {
                    Seg::Obj(part.parse().ok()?)
                }
            }
        };
        segs.push(seg);
    }

    Some(BrowsePath {
        root,
        facet: Some(facet),
        segs,
    })
}

fn names_of(conn: &Connection, table: &str) -> Vec<String> {
    sqlite::string_array(conn, &format!("SELECT NAME FROM {}", table), &[])
}

fn name_of(conn: &Connection, table: &str, id: i64) -> Option<String> {
    sqlite::id_to_string(conn, table, "NAME", "ID", id)
}

fn count(conn: &Connection, sql: &str, params: &[&dyn ToSql]) -> i64 {
    let n = sqlite::query_i64(conn, sql, params);
    if n < 0 {
        0
    } else {
        n
    }
}

fn year_label(year: i32) -> String {
    if year < 9999 {
        year.to_string()
    } else {
        "Unknown".to_string()
    }
}

fn set_container(ret: &mut Value, label: &str, class: &str, child_class: Option<&str>) {
    let m = metadata_mut(ret);
    set_string(m, META_LABEL, label);
    set_string(m, META_CLASS, class);
    if let Some(child_class) = child_class {
        set_string(m, META_CHILD_CLASS, child_class);
    }
}

/// Merge a stored object into the result and label it by title.
fn merge_object(conn: &Connection, ret: &mut Value, obj_id: i64, otype: ObjectType) -> Option<()> {
    let obj = objects::query_object(conn, obj_id, Some(otype))?;

    if let Some(parts) = obj.get(META_PARTS).cloned() {
        ret.as_object_mut()
            .unwrap()
            .insert(META_PARTS.to_string(), parts);
    }

    let m = metadata_mut(ret);
    merge_missing(m, metadata(&obj)?);

    if let Some(title) = get_string(m, META_TITLE).map(str::to_string) {
        set_string(m, META_LABEL, &title);
    }
    Some(())
}

fn container_key(field: &str) -> String {
    format!("{}{}", field, CONTAINER_SUFFIX)
}

fn append_name_containers(m: &mut Dict, field: &str, prefix: &str, with_group: bool) {
    let names: Vec<String> = string_array(m, field).iter().map(|s| s.to_string()).collect();
    let ids: Vec<String> = string_array(m, &format!("{}{}", field, ID_SUFFIX))
        .iter()
        .map(|s| s.to_string())
        .collect();

    if names.is_empty() || names.len() != ids.len() {
        return;
    }

    let key = container_key(field);
    for (name, id) in names.iter().zip(&ids) {
        let value = if with_group {
            let group = groups::group_of(name).unwrap_or("~group~others");
            format!("{}/{}/{}", prefix, group, id)
        } else {
            format!("{}/{}", prefix, id)
        };
        append_string_array(m, &key, &value);
    }
}

fn append_year_container(m: &mut Dict, root_id: &str) {
    if let Some(year) = track::year(m) {
        set_string(
            m,
            &container_key("Year"),
            &format!("{}/year/{}", root_id, year),
        );
    }
}

/// Facet shortcut links on songs.
fn finalize_song(m: &mut Dict) {
    append_name_containers(m, META_ARTIST, "/songs/artist", true);
    append_name_containers(m, META_GENRE, "/songs/genre-artist", false);
    append_year_container(m, ROOT_SONGS_ID);
}

fn finalize_album(m: &mut Dict) {
    append_name_containers(m, META_ARTIST, "/albums/artist", true);
    append_name_containers(m, META_GENRE, "/albums/genre-artist", false);
    append_year_container(m, ROOT_ALBUMS_ID);
}

fn finalize_movie(m: &mut Dict) {
    append_name_containers(m, META_ACTOR, "/movies/actor", true);
    append_name_containers(m, META_DIRECTOR, "/movies/director", true);
    append_name_containers(m, META_GENRE, "/movies/genre", false);
    append_name_containers(m, META_COUNTRY, "/movies/country", false);
    append_year_container(m, ROOT_MOVIES_ID);
}

fn merge_song(conn: &Connection, ret: &mut Value, id: i64) -> Option<()> {
    merge_object(conn, ret, id, ObjectType::Song)?;
    finalize_song(metadata_mut(ret));
    Some(())
}

fn merge_album(conn: &Connection, ret: &mut Value, id: i64, year_in_label: bool) -> Option<()> {
    merge_object(conn, ret, id, ObjectType::Album)?;

    let m = metadata_mut(ret);
    if year_in_label {
        if let (Some(title), Some(year)) =
            (get_string(m, META_TITLE).map(str::to_string), track::year(m))
        {
            set_string(m, META_LABEL, &format!("{} ({})", title, year));
        }
    }

    if let Some(num) = get_i64(m, META_NUM_CHILDREN) {
        set_i64(m, META_NUM_ITEM_CHILDREN, num);
    }
    set_i64(m, META_NUM_CONTAINER_CHILDREN, 0);

    finalize_album(m);
    Some(())
}

fn merge_movie(conn: &Connection, ret: &mut Value, id: i64) -> Option<()> {
    merge_object(conn, ret, id, ObjectType::Movie)?;
    finalize_movie(metadata_mut(ret));
    Some(())
}

fn browse_object_internal(
    conn: &Connection,
    roots: &ActiveRoots,
    id: &str,
) -> Option<Value> {
    let path = parse_path(id, roots)?;
    let facet = path.facet?;

    let mut ret = track::new_track();
    set_string(metadata_mut(&mut ret), META_ID, id);

    let ok = match path.root {
        Root::Songs => browse_object_songs(conn, facet, &path.segs, &mut ret),
        Root::Albums => browse_object_albums(conn, facet, &path.segs, &mut ret),
        Root::Movies => browse_object_movies(conn, facet, &path.segs, &mut ret),
        Root::Series => browse_object_series(conn, facet, &path.segs, &mut ret),
    };

    ok.map(|_| ret)
}

fn browse_object_songs(
    conn: &Connection,
    facet: Facet,
    segs: &[Seg],
    ret: &mut Value,
) -> Option<()> {
    match (facet, segs) {
        (Facet::Artist, []) => {
            let names = names_of(conn, "song_artists");
            set_container(ret, "Artist", CLASS_CONTAINER, Some(CLASS_CONTAINER));
            track::set_num_children(ret, groups::num_groups(&names), 0);
            Some(())
        }
        (Facet::Artist, [Seg::Group(group)]) => {
            let names = names_of(conn, "song_artists");
            let label = groups::label(group)?.to_string();
            set_container(ret, &label, CLASS_CONTAINER, Some(CLASS_CONTAINER_ARTIST));
            track::set_num_children(ret, groups::group_size(&names, group), 0);
            Some(())
        }
        (Facet::Artist, [Seg::Group(_), Seg::Name(artist_id)]) => {
            let label = name_of(conn, "song_artists", *artist_id)?;
            set_container(ret, &label, CLASS_CONTAINER_ARTIST, Some(CLASS_SONG));
            let num = count(
                conn,
                "SELECT count(OBJ_ID) FROM song_artists_arr WHERE NAME_ID = ?",
                &[artist_id],
            );
            track::set_num_children(ret, 0, num);
            Some(())
        }
        (Facet::Artist, [_, _, Seg::Obj(song_id)]) => merge_song(conn, ret, *song_id),

        (Facet::GenreArtist, []) => {
            set_container(ret, "Genre-Artist", CLASS_CONTAINER, Some(CLASS_CONTAINER_GENRE));
            let num = count(conn, "SELECT COUNT(ID) FROM song_genres", &[]);
            track::set_num_children(ret, num, 0);
            Some(())
        }
        (Facet::GenreArtist, [Seg::Name(genre_id)]) => {
            let label = name_of(conn, "song_genres", *genre_id)?;
            set_container(ret, &label, CLASS_CONTAINER_GENRE, Some(CLASS_CONTAINER_ARTIST));
            let num = count(
                conn,
                "SELECT count(DISTINCT song_artists_arr.NAME_ID) \
                 FROM song_artists_arr INNER JOIN song_genres_arr \
                 ON song_artists_arr.OBJ_ID = song_genres_arr.OBJ_ID \
                 WHERE song_genres_arr.NAME_ID = ?",
                &[genre_id],
            );
            track::set_num_children(ret, num, 0);
            Some(())
        }
        (Facet::GenreArtist, [Seg::Name(genre_id), Seg::Name(artist_id)]) => {
            let label = name_of(conn, "song_artists", *artist_id)?;
            set_container(ret, &label, CLASS_CONTAINER_ARTIST, Some(CLASS_SONG));
            let num = count(
                conn,
                "SELECT count(song_artists_arr.OBJ_ID) \
                 FROM song_artists_arr INNER JOIN song_genres_arr \
                 ON song_artists_arr.OBJ_ID = song_genres_arr.OBJ_ID \
                 WHERE song_genres_arr.NAME_ID = ? AND song_artists_arr.NAME_ID = ?",
                &[genre_id, artist_id],
            );
            track::set_num_children(ret, 0, num);
            Some(())
        }
        (Facet::GenreArtist, [_, _, Seg::Obj(song_id)]) => merge_song(conn, ret, *song_id),

        (Facet::GenreYear, []) => {
            set_container(ret, "Genre-Year", CLASS_CONTAINER, Some(CLASS_CONTAINER_GENRE));
            let num = count(conn, "SELECT COUNT(ID) FROM song_genres", &[]);
            track::set_num_children(ret, num, 0);
            Some(())
        }
        (Facet::GenreYear, [Seg::Name(genre_id)]) => {
            let label = name_of(conn, "song_genres", *genre_id)?;
            set_container(ret, &label, CLASS_CONTAINER_GENRE, Some(CLASS_CONTAINER_YEAR));
            let sql = format!(
                "SELECT count(DISTINCT substr(songs.\"{date}\", 1, 4)) FROM \
                 songs INNER JOIN song_genres_arr ON song_genres_arr.OBJ_ID = songs.\"{dbid}\" \
                 WHERE song_genres_arr.NAME_ID = ?",
                date = META_DATE,
                dbid = META_DB_ID
            );
            track::set_num_children(ret, count(conn, &sql, &[genre_id]), 0);
            Some(())
        }
        (Facet::GenreYear, [Seg::Name(genre_id), Seg::Year(year)]) => {
            set_container(ret, &year_label(*year), CLASS_CONTAINER_YEAR, Some(CLASS_SONG));
            let sql = format!(
                "SELECT count(songs.\"{dbid}\") FROM \
                 songs INNER JOIN song_genres_arr ON song_genres_arr.OBJ_ID = songs.\"{dbid}\" \
                 WHERE song_genres_arr.NAME_ID = ? AND songs.\"{date}\" GLOB '{year}*'",
                dbid = META_DB_ID,
                date = META_DATE,
                year = year
            );
            track::set_num_children(ret, 0, count(conn, &sql, &[genre_id]));
            Some(())
        }
        (Facet::GenreYear, [_, _, Seg::Obj(song_id)]) => merge_song(conn, ret, *song_id),

        (Facet::Genre, []) => {
            set_container(ret, "Genre", CLASS_CONTAINER, Some(CLASS_CONTAINER_GENRE));
            let num = count(conn, "SELECT COUNT(ID) FROM song_genres", &[]);
            track::set_num_children(ret, num, 0);
            Some(())
        }
        (Facet::Genre, [Seg::Name(genre_id)]) => {
            let label = name_of(conn, "song_genres", *genre_id)?;
            set_container(ret, &label, CLASS_CONTAINER_GENRE, Some(CLASS_CONTAINER));
            let sql = format!(
                "SELECT songs.\"{st}\" FROM song_genres_arr INNER JOIN songs \
                 ON song_genres_arr.OBJ_ID = songs.\"{dbid}\" \
                 WHERE song_genres_arr.NAME_ID = ?",
                st = META_SEARCH_TITLE,
                dbid = META_DB_ID
            );
            let titles = sqlite::string_array(conn, &sql, &[genre_id]);
            track::set_num_children(ret, groups::num_groups(&titles), 0);
            Some(())
        }
        (Facet::Genre, [Seg::Name(genre_id), Seg::Group(group)]) => {
            let label = groups::label(group)?.to_string();
            set_container(ret, &label, CLASS_CONTAINER, Some(CLASS_SONG));
            let cond = groups::condition(group)?;
            let sql = format!(
                "SELECT count(songs.\"{dbid}\") FROM song_genres_arr INNER JOIN songs \
                 ON song_genres_arr.OBJ_ID = songs.\"{dbid}\" \
                 WHERE song_genres_arr.NAME_ID = ? AND songs.\"{st}\"{cond}",
                dbid = META_DB_ID,
                st = META_SEARCH_TITLE,
                cond = cond
            );
            track::set_num_children(ret, 0, count(conn, &sql, &[genre_id]));
            Some(())
        }
        (Facet::Genre, [_, _, Seg::Obj(song_id)]) => merge_song(conn, ret, *song_id),

        (Facet::Year, []) => {
            set_container(ret, "Year", CLASS_CONTAINER, Some(CLASS_CONTAINER_YEAR));
            let sql = format!(
                "SELECT count(DISTINCT substr(\"{}\", 1, 4)) FROM songs",
                META_DATE
            );
            track::set_num_children(ret, count(conn, &sql, &[]), 0);
            Some(())
        }
        (Facet::Year, [Seg::Year(year)]) => {
            set_container(ret, &year_label(*year), CLASS_CONTAINER_YEAR, Some(CLASS_SONG));
            let sql = format!(
                "SELECT count(\"{}\") FROM songs WHERE \"{}\" GLOB '{}*'",
                META_DB_ID, META_DATE, year
            );
            track::set_num_children(ret, 0, count(conn, &sql, &[]));
            Some(())
        }
        (Facet::Year, [_, Seg::Obj(song_id)]) => merge_song(conn, ret, *song_id),

        _ => None,
    }
}

fn browse_object_albums(
    conn: &Connection,
    facet: Facet,
    segs: &[Seg],
    ret: &mut Value,
) -> Option<()> {
    match (facet, segs) {
        (Facet::Artist, []) => {
            let names = names_of(conn, "album_artists");
            set_container(ret, "Artist", CLASS_CONTAINER, Some(CLASS_CONTAINER));
            track::set_num_children(ret, groups::num_groups(&names), 0);
            Some(())
        }
        (Facet::Artist, [Seg::Group(group)]) => {
            let names = names_of(conn, "album_artists");
            let label = groups::label(group)?.to_string();
            set_container(ret, &label, CLASS_CONTAINER, Some(CLASS_CONTAINER_ARTIST));
            track::set_num_children(ret, groups::group_size(&names, group), 0);
            Some(())
        }
        (Facet::Artist, [Seg::Group(_), Seg::Name(artist_id)]) => {
            let label = name_of(conn, "album_artists", *artist_id)?;
            set_container(ret, &label, CLASS_CONTAINER_ARTIST, Some(CLASS_ALBUM));
            let num = count(
                conn,
                "SELECT count(OBJ_ID) FROM album_artists_arr WHERE NAME_ID = ?",
                &[artist_id],
            );
            track::set_num_children(ret, num, 0);
            Some(())
        }
        (Facet::Artist, [_, _, Seg::Obj(album_id)]) => merge_album(conn, ret, *album_id, true),
        (Facet::Artist, [_, _, _, Seg::Obj(song_id)]) => merge_song(conn, ret, *song_id),

        (Facet::GenreArtist, []) => {
            set_container(ret, "Genre-Artist", CLASS_CONTAINER, Some(CLASS_CONTAINER_GENRE));
            let num = count(conn, "SELECT COUNT(ID) FROM album_genres", &[]);
            track::set_num_children(ret, num, 0);
            Some(())
        }
        (Facet::GenreArtist, [Seg::Name(genre_id)]) => {
            let label = name_of(conn, "album_genres", *genre_id)?;
            set_container(ret, &label, CLASS_CONTAINER_GENRE, Some(CLASS_CONTAINER_ARTIST));
            let num = count(
                conn,
                "SELECT count(DISTINCT album_artists_arr.NAME_ID) \
                 FROM album_artists_arr INNER JOIN album_genres_arr \
                 ON album_artists_arr.OBJ_ID = album_genres_arr.OBJ_ID \
                 WHERE album_genres_arr.NAME_ID = ?",
                &[genre_id],
            );
            track::set_num_children(ret, num, 0);
            Some(())
        }
        (Facet::GenreArtist, [Seg::Name(genre_id), Seg::Name(artist_id)]) => {
            let label = name_of(conn, "album_artists", *artist_id)?;
            set_container(ret, &label, CLASS_CONTAINER_ARTIST, Some(CLASS_ALBUM));
            let num = count(
                conn,
                "SELECT count(album_artists_arr.OBJ_ID) \
                 FROM album_artists_arr INNER JOIN album_genres_arr \
                 ON album_artists_arr.OBJ_ID = album_genres_arr.OBJ_ID \
                 WHERE album_genres_arr.NAME_ID = ? AND album_artists_arr.NAME_ID = ?",
                &[genre_id, artist_id],
            );
            track::set_num_children(ret, num, 0);
            Some(())
        }
        (Facet::GenreArtist, [_, _, Seg::Obj(album_id)]) => merge_album(conn, ret, *album_id, true),
        (Facet::GenreArtist, [_, _, _, Seg::Obj(song_id)]) => merge_song(conn, ret, *song_id),

        (Facet::GenreYear, []) => {
            set_container(ret, "Genre-Year", CLASS_CONTAINER, Some(CLASS_CONTAINER_GENRE));
            let num = count(conn, "SELECT COUNT(ID) FROM album_genres", &[]);
            track::set_num_children(ret, num, 0);
            Some(())
        }
        (Facet::GenreYear, [Seg::Name(genre_id)]) => {
            let label = name_of(conn, "album_genres", *genre_id)?;
            set_container(ret, &label, CLASS_CONTAINER_GENRE, Some(CLASS_CONTAINER_YEAR));
            let sql = format!(
                "SELECT count(DISTINCT substr(albums.\"{date}\", 1, 4)) FROM \
                 albums INNER JOIN album_genres_arr ON album_genres_arr.OBJ_ID = albums.\"{dbid}\" \
                 WHERE album_genres_arr.NAME_ID = ?",
                date = META_DATE,
                dbid = META_DB_ID
            );
            track::set_num_children(ret, count(conn, &sql, &[genre_id]), 0);
            Some(())
        }
        (Facet::GenreYear, [Seg::Name(genre_id), Seg::Year(year)]) => {
            set_container(ret, &year_label(*year), CLASS_CONTAINER_YEAR, Some(CLASS_ALBUM));
            let sql = format!(
                "SELECT count(albums.\"{dbid}\") FROM \
                 albums INNER JOIN album_genres_arr ON album_genres_arr.OBJ_ID = albums.\"{dbid}\" \
                 WHERE album_genres_arr.NAME_ID = ? AND albums.\"{date}\" GLOB '{year}*'",
                dbid = META_DB_ID,
                date = META_DATE,
                year = year
            );
            track::set_num_children(ret, count(conn, &sql, &[genre_id]), 0);
            Some(())
        }
        (Facet::GenreYear, [_, _, Seg::Obj(album_id)]) => merge_album(conn, ret, *album_id, false),
        (Facet::GenreYear, [_, _, _, Seg::Obj(song_id)]) => merge_song(conn, ret, *song_id),

        (Facet::Year, []) => {
            set_container(ret, "Year", CLASS_CONTAINER, Some(CLASS_CONTAINER_YEAR));
            let sql = format!(
                "SELECT count(DISTINCT substr(\"{}\", 1, 4)) FROM albums",
                META_DATE
            );
            track::set_num_children(ret, count(conn, &sql, &[]), 0);
            Some(())
        }
        (Facet::Year, [Seg::Year(year)]) => {
            set_container(ret, &year_label(*year), CLASS_CONTAINER_YEAR, Some(CLASS_ALBUM));
            let sql = format!(
                "SELECT count(\"{}\") FROM albums WHERE \"{}\" GLOB '{}*'",
                META_DB_ID, META_DATE, year
            );
            track::set_num_children(ret, count(conn, &sql, &[]), 0);
            Some(())
        }
        (Facet::Year, [_, Seg::Obj(album_id)]) => merge_album(conn, ret, *album_id, false),
        (Facet::Year, [_, _, Seg::Obj(song_id)]) => merge_song(conn, ret, *song_id),

        _ => None,
    }
}

fn browse_object_movies(
    conn: &Connection,
    facet: Facet,
    segs: &[Seg],
    ret: &mut Value,
) -> Option<()> {
    let group_facet = |ret: &mut Value,
                       table: &str,
                       label: &str,
                       name_class: &'static str|
     -> Option<()> {
        match segs {
            [] => {
                let names = names_of(conn, table);
                set_container(ret, label, CLASS_CONTAINER, Some(CLASS_CONTAINER));
                track::set_num_children(ret, groups::num_groups(&names), 0);
                Some(())
            }
            [Seg::Group(group)] => {
                let names = names_of(conn, table);
                let label = groups::label(group)?.to_string();
                set_container(ret, &label, CLASS_CONTAINER, Some(name_class));
                track::set_num_children(ret, groups::group_size(&names, group), 0);
                Some(())
            }
            [Seg::Group(_), Seg::Name(name_id)] => {
                let label = name_of(conn, table, *name_id)?;
                set_container(ret, &label, name_class, Some(CLASS_MOVIE));
                let sql = format!(
                    "SELECT count(OBJ_ID) FROM {}_arr WHERE NAME_ID = ?",
                    table
                );
                track::set_num_children(ret, 0, count(conn, &sql, &[name_id]));
                Some(())
            }
            [_, _, Seg::Obj(movie_id)] => merge_movie(conn, ret, *movie_id),
            _ => None,
        }
    };

    let name_facet = |ret: &mut Value,
                      table: &str,
                      label: &str,
                      name_class: &'static str|
     -> Option<()> {
        match segs {
            [] => {
                set_container(ret, label, CLASS_CONTAINER, Some(name_class));
                let sql = format!("SELECT count(ID) FROM {}", table);
                track::set_num_children(ret, count(conn, &sql, &[]), 0);
                Some(())
            }
            [Seg::Name(name_id)] => {
                let label = name_of(conn, table, *name_id)?;
                set_container(ret, &label, name_class, Some(CLASS_MOVIE));
                let sql = format!(
                    "SELECT count(OBJ_ID) FROM {}_arr WHERE NAME_ID = ?",
                    table
                );
                track::set_num_children(ret, 0, count(conn, &sql, &[name_id]));
                Some(())
            }
            [_, Seg::Obj(movie_id)] => merge_movie(conn, ret, *movie_id),
            _ => None,
        }
    };

    match facet {
        Facet::All => match segs {
            [] => {
                set_container(ret, "All", CLASS_CONTAINER, Some(CLASS_MOVIE));
                let sql = format!("SELECT count(\"{}\") FROM movies", META_DB_ID);
                track::set_num_children(ret, 0, count(conn, &sql, &[]));
                Some(())
            }
            [Seg::Obj(movie_id)] => merge_movie(conn, ret, *movie_id),
            _ => None,
        },
        Facet::Actor => group_facet(ret, "movie_actors", "Actor", CLASS_CONTAINER_ACTOR),
        Facet::Director => group_facet(ret, "movie_directors", "Director", CLASS_CONTAINER_DIRECTOR),
        Facet::Genre => name_facet(ret, "movie_genres", "Genre", CLASS_CONTAINER_GENRE),
        Facet::Country => name_facet(ret, "movie_countries", "Country", CLASS_CONTAINER_COUNTRY),
        Facet::Language => {
            name_facet(ret, "movie_audio_languages", "Language", CLASS_CONTAINER_LANGUAGE)
        }
        Facet::Year => match segs {
            [] => {
                set_container(ret, "Year", CLASS_CONTAINER, Some(CLASS_CONTAINER_YEAR));
                let sql = format!(
                    "SELECT count(DISTINCT substr(\"{}\", 1, 4)) FROM movies",
                    META_DATE
                );
                track::set_num_children(ret, count(conn, &sql, &[]), 0);
                Some(())
            }
            [Seg::Year(year)] => {
                set_container(ret, &year_label(*year), CLASS_CONTAINER_YEAR, Some(CLASS_MOVIE));
                let sql = format!(
                    "SELECT count(\"{}\") FROM movies WHERE substr(\"{}\", 1, 4) = '{}'",
                    META_DB_ID, META_DATE, year
                );
                track::set_num_children(ret, 0, count(conn, &sql, &[]));
                Some(())
            }
            [_, Seg::Obj(movie_id)] => merge_movie(conn, ret, *movie_id),
            _ => None,
        },
        _ => None,
    }
}

fn merge_show(conn: &Connection, ret: &mut Value, show_id: i64) -> Option<()> {
    merge_object(conn, ret, show_id, ObjectType::TvShow)?;

    // one extra entry for "all episodes"
    let m = metadata_mut(ret);
    let num = get_i64(m, META_NUM_CHILDREN).unwrap_or(0) + 1;
    set_i64(m, META_NUM_CHILDREN, num);
    set_i64(m, META_NUM_CONTAINER_CHILDREN, num);
    Some(())
}

fn merge_all_episodes(conn: &Connection, ret: &mut Value, show_id: i64) -> Option<()> {
    set_container(ret, "All episodes", CLASS_CONTAINER, Some(CLASS_TV_EPISODE));

    let sql = format!(
        "SELECT COUNT(\"{dbid}\") FROM episodes WHERE \"{parent}\" IN \
         (SELECT \"{dbid}\" FROM seasons WHERE \"{parent}\" = ?)",
        dbid = META_DB_ID,
        parent = META_PARENT_ID
    );
    track::set_num_children(ret, 0, count(conn, &sql, &[&show_id]));

    // poster and wallpaper come from the show
    let sql = format!(
        "SELECT \"{}\", \"{}\" FROM shows WHERE \"{}\" = ?",
        META_POSTER_ID, META_WALLPAPER_ID, META_DB_ID
    );
    let ids = conn
        .query_row(&sql, [&show_id], |row| {
            Ok((
                row.get::<_, Option<i64>>(0)?,
                row.get::<_, Option<i64>>(1)?,
            ))
        })
        .ok();

    if let Some((poster, wallpaper)) = ids {
        let m = metadata_mut(ret);
        if let Some(poster) = poster {
            set_i64(m, META_POSTER_ID, poster);
        }
        if let Some(wallpaper) = wallpaper {
            set_i64(m, META_WALLPAPER_ID, wallpaper);
        }
        objects::query_images(conn, m);
    }

    Some(())
}

fn merge_season(conn: &Connection, ret: &mut Value, season_id: i64) -> Option<()> {
    merge_object(conn, ret, season_id, ObjectType::TvSeason)?;

    let m = metadata_mut(ret);
    let season = get_i64(m, META_SEASON).unwrap_or(0);
    set_string(m, META_LABEL, &format!("Season {}", season));
    if let Some(num) = get_i64(m, META_NUM_CHILDREN) {
        set_i64(m, META_NUM_ITEM_CHILDREN, num);
    }
    Some(())
}

fn merge_episode(conn: &Connection, ret: &mut Value, episode_id: i64) -> Option<()> {
    merge_object(conn, ret, episode_id, ObjectType::TvEpisode)
}

fn browse_object_series(
    conn: &Connection,
    facet: Facet,
    segs: &[Seg],
    ret: &mut Value,
) -> Option<()> {
    match (facet, segs) {
        (Facet::All, []) => {
            set_container(ret, "All", CLASS_CONTAINER, Some(CLASS_TV_SHOW));
            let sql = format!("SELECT COUNT(\"{}\") FROM shows", META_DB_ID);
            track::set_num_children(ret, count(conn, &sql, &[]), 0);
            Some(())
        }
        (Facet::All, [Seg::Obj(show_id)]) => merge_show(conn, ret, *show_id),
        (Facet::All, [Seg::Obj(show_id), Seg::AllSeason]) => {
            merge_all_episodes(conn, ret, *show_id)
        }
        (Facet::All, [_, Seg::Obj(season_id)]) => merge_season(conn, ret, *season_id),
        (Facet::All, [_, _, Seg::Obj(episode_id)]) => merge_episode(conn, ret, *episode_id),

        (Facet::Genre, []) => {
            set_container(ret, "Genre", CLASS_CONTAINER, Some(CLASS_CONTAINER_GENRE));
            let num = count(conn, "SELECT COUNT(ID) FROM show_genres", &[]);
            track::set_num_children(ret, num, 0);
            Some(())
        }
        (Facet::Genre, [Seg::Name(genre_id)]) => {
            let label = name_of(conn, "show_genres", *genre_id)?;
            set_container(ret, &label, CLASS_CONTAINER_GENRE, Some(CLASS_TV_SHOW));
            let num = count(
                conn,
                "SELECT count(OBJ_ID) FROM show_genres_arr WHERE NAME_ID = ?",
                &[genre_id],
            );
            track::set_num_children(ret, num, 0);
            Some(())
        }
        (Facet::Genre, [_, Seg::Obj(show_id)]) => merge_show(conn, ret, *show_id),
        (Facet::Genre, [_, Seg::Obj(show_id), Seg::AllSeason]) => {
            merge_all_episodes(conn, ret, *show_id)
        }
        (Facet::Genre, [_, _, Seg::Obj(season_id)]) => merge_season(conn, ret, *season_id),
        (Facet::Genre, [_, _, _, Seg::Obj(episode_id)]) => merge_episode(conn, ret, *episode_id),

        _ => None,
    }
}

/// Resolve one path to an object or synthetic container, with
/// previous/next sibling ids attached.
pub fn browse_object(conn: &Connection, roots: &ActiveRoots, id: &str) -> Option<Value> {
    let mut ret = browse_object_internal(conn, roots, id)?;

    if let Some(pos) = id.rfind('/') {
        let parent_id = &id[..pos];
        if !parent_id.is_empty() {
            if let Some(siblings) = browse_children_ids(conn, roots, parent_id) {
                let ids: Vec<String> = siblings
                    .iter()
                    .filter_map(|t| track::id(t).map(str::to_string))
                    .collect();

                if let Some(i) = ids.iter().position(|x| x == id) {
                    let m = metadata_mut(&mut ret);
                    if i > 0 {
                        set_string(m, META_PREVIOUS_ID, &ids[i - 1]);
                    }
                    if i + 1 < ids.len() {
                        set_string(m, META_NEXT_ID, &ids[i + 1]);
                    }
                }
            }
        }
    }

    Some(ret)
}

fn append_plain(ret: &mut Vec<Value>, id: String) {
    let mut t = track::new_track();
    set_string(metadata_mut(&mut t), META_ID, &id);
    ret.push(t);
}

/// Group bucket entries over a name list, counts included, empty
/// buckets skipped.
fn append_group_entries(
    ret: &mut Vec<Value>,
    parent_id: &str,
    names: &[String],
    child_is_item: bool,
) {
    for g in groups::GROUPS {
        let num = groups::group_size(names, g.id);
        if num == 0 {
            continue;
        }

        let mut t = track::new_track();
        {
            let m = metadata_mut(&mut t);
            set_string(m, META_ID, &format!("{}/{}", parent_id, g.id));
            set_string(m, META_LABEL, g.label);
        }
        if child_is_item {
            track::set_num_children(&mut t, 0, num);
        } else {
            track::set_num_children(&mut t, num, 0);
        }
        ret.push(t);
    }
}

/// Append one child id per result row of `sql`.
fn append_ids_query(
    conn: &Connection,
    ret: &mut Vec<Value>,
    parent_id: &str,
    sql: &str,
    params: &[&dyn ToSql],
) {
    let mut st = match conn.prepare(sql) {
        Ok(st) => st,
        Err(e) => {
            error!("sql \"{}\" failed: {}", sql, e);
            return;
        }
    };

    let rows = st.query_map(params, |row| row.get::<_, rusqlite::types::Value>(0));
    match rows {
        Ok(rows) => {
            for v in rows.flatten() {
                let s = match v {
                    rusqlite::types::Value::Integer(i) => i.to_string(),
                    rusqlite::types::Value::Text(s) => s,
                    _ => continue,
                };
                append_plain(ret, format!("{}/{}", parent_id, s));
            }
        }
        Err(e) => error!("sql \"{}\" failed: {}", sql, e),
    }
}

/// The full ordered child id list of a path.
pub fn browse_children_ids(
    conn: &Connection,
    roots: &ActiveRoots,
    id: &str,
) -> Option<Vec<Value>> {
    let path = parse_path(id, roots)?;
    let mut ret: Vec<Value> = Vec::new();

    let facet = match path.facet {
        None => {
            for f in root_facets(path.root) {
                append_plain(&mut ret, format!("{}/{}", id, facet_str(*f)));
            }
            return Some(ret);
        }
        Some(f) => f,
    };

    let ok = match path.root {
        Root::Songs => browse_children_songs(conn, facet, &path.segs, id, &mut ret),
        Root::Albums => browse_children_albums(conn, facet, &path.segs, id, &mut ret),
        Root::Movies => browse_children_movies(conn, facet, &path.segs, id, &mut ret),
        Root::Series => browse_children_series(conn, facet, &path.segs, id, &mut ret),
    };

    ok.map(|_| ret)
}

fn browse_children_songs(
    conn: &Connection,
    facet: Facet,
    segs: &[Seg],
    id: &str,
    ret: &mut Vec<Value>,
) -> Option<()> {
    match (facet, segs) {
        (Facet::Artist, []) => {
            let names = names_of(conn, "song_artists");
            append_group_entries(ret, id, &names, false);
            Some(())
        }
        (Facet::Artist, [Seg::Group(group)]) => {
            let cond = groups::condition(group)?;
            let sql = format!("SELECT ID FROM song_artists WHERE NAME{} ORDER BY NAME", cond);
            append_ids_query(conn, ret, id, &sql, &[]);
            Some(())
        }
        (Facet::Artist, [_, Seg::Name(artist_id)]) => {
            let sql = format!(
                "SELECT songs.\"{dbid}\" FROM songs INNER JOIN song_artists_arr \
                 ON songs.\"{dbid}\" = song_artists_arr.OBJ_ID \
                 WHERE song_artists_arr.NAME_ID = ? \
                 ORDER BY songs.\"{st}\" COLLATE strcoll",
                dbid = META_DB_ID,
                st = META_SEARCH_TITLE
            );
            append_ids_query(conn, ret, id, &sql, &[artist_id]);
            Some(())
        }

        (Facet::GenreArtist, []) => {
            append_ids_query(conn, ret, id, "SELECT ID FROM song_genres ORDER BY NAME", &[]);
            Some(())
        }
        (Facet::GenreArtist, [Seg::Name(genre_id)]) => {
            let sql = "SELECT ID FROM song_artists WHERE ID IN \
                       (SELECT DISTINCT song_artists_arr.NAME_ID \
                        FROM song_artists_arr INNER JOIN song_genres_arr \
                        ON song_artists_arr.OBJ_ID = song_genres_arr.OBJ_ID \
                        WHERE song_genres_arr.NAME_ID = ?) ORDER BY NAME";
            append_ids_query(conn, ret, id, sql, &[genre_id]);
            Some(())
        }
        (Facet::GenreArtist, [Seg::Name(genre_id), Seg::Name(artist_id)]) => {
            let sql = format!(
                "SELECT song_artists_arr.OBJ_ID FROM \
                 song_artists_arr INNER JOIN song_genres_arr \
                 ON song_artists_arr.OBJ_ID = song_genres_arr.OBJ_ID \
                 INNER JOIN songs ON songs.\"{dbid}\" = song_genres_arr.OBJ_ID \
                 WHERE song_genres_arr.NAME_ID = ? AND song_artists_arr.NAME_ID = ? \
                 ORDER BY songs.\"{st}\" COLLATE strcoll",
                dbid = META_DB_ID,
                st = META_SEARCH_TITLE
            );
            append_ids_query(conn, ret, id, &sql, &[genre_id, artist_id]);
            Some(())
        }

        (Facet::GenreYear, []) => {
            append_ids_query(conn, ret, id, "SELECT ID FROM song_genres ORDER BY NAME", &[]);
            Some(())
        }
        (Facet::GenreYear, [Seg::Name(genre_id)]) => {
            let sql = format!(
                "SELECT DISTINCT substr(songs.\"{date}\", 1, 4) FROM \
                 songs INNER JOIN song_genres_arr ON song_genres_arr.OBJ_ID = songs.\"{dbid}\" \
                 WHERE song_genres_arr.NAME_ID = ? ORDER BY songs.\"{date}\"",
                date = META_DATE,
                dbid = META_DB_ID
            );
            append_ids_query(conn, ret, id, &sql, &[genre_id]);
            Some(())
        }
        (Facet::GenreYear, [Seg::Name(genre_id), Seg::Year(year)]) => {
            let sql = format!(
                "SELECT songs.\"{dbid}\" FROM \
                 songs INNER JOIN song_genres_arr ON song_genres_arr.OBJ_ID = songs.\"{dbid}\" \
                 WHERE song_genres_arr.NAME_ID = ? AND songs.\"{date}\" GLOB '{year}*' \
                 ORDER BY songs.\"{st}\" COLLATE strcoll",
                dbid = META_DB_ID,
                date = META_DATE,
                st = META_SEARCH_TITLE,
                year = year
            );
            append_ids_query(conn, ret, id, &sql, &[genre_id]);
            Some(())
        }

        (Facet::Genre, []) => {
            append_ids_query(conn, ret, id, "SELECT ID FROM song_genres ORDER BY NAME", &[]);
            Some(())
        }
        (Facet::Genre, [Seg::Name(genre_id)]) => {
            let sql = format!(
                "SELECT songs.\"{st}\" FROM song_genres_arr INNER JOIN songs \
                 ON song_genres_arr.OBJ_ID = songs.\"{dbid}\" \
                 WHERE song_genres_arr.NAME_ID = ?",
                st = META_SEARCH_TITLE,
                dbid = META_DB_ID
            );
            let titles = sqlite::string_array(conn, &sql, &[genre_id]);
            append_group_entries(ret, id, &titles, true);
            Some(())
        }
        (Facet::Genre, [Seg::Name(genre_id), Seg::Group(group)]) => {
            let cond = groups::condition(group)?;
            let sql = format!(
                "SELECT songs.\"{dbid}\" FROM song_genres_arr INNER JOIN songs \
                 ON song_genres_arr.OBJ_ID = songs.\"{dbid}\" \
                 WHERE song_genres_arr.NAME_ID = ? AND songs.\"{st}\"{cond} \
                 ORDER BY songs.\"{st}\" COLLATE strcoll",
                dbid = META_DB_ID,
                st = META_SEARCH_TITLE,
                cond = cond
            );
            append_ids_query(conn, ret, id, &sql, &[genre_id]);
            Some(())
        }

        (Facet::Year, []) => {
            let sql = format!(
                "SELECT DISTINCT substr(\"{date}\", 1, 4) FROM songs ORDER BY \"{date}\"",
                date = META_DATE
            );
            append_ids_query(conn, ret, id, &sql, &[]);
            Some(())
        }
        (Facet::Year, [Seg::Year(year)]) => {
            let sql = format!(
                "SELECT \"{dbid}\" FROM songs WHERE \"{date}\" GLOB '{year}*' \
                 ORDER BY \"{st}\" COLLATE strcoll",
                dbid = META_DB_ID,
                date = META_DATE,
                st = META_SEARCH_TITLE,
                year = year
            );
            append_ids_query(conn, ret, id, &sql, &[]);
            Some(())
        }

        _ => None,
    }
}

fn album_songs_sql() -> String {
    format!(
        "SELECT \"{dbid}\" FROM songs WHERE \"{parent}\" = ? ORDER BY \"{track}\"",
        dbid = META_DB_ID,
        parent = META_PARENT_ID,
        track = META_TRACKNUMBER
    )
}

fn browse_children_albums(
    conn: &Connection,
    facet: Facet,
    segs: &[Seg],
    id: &str,
    ret: &mut Vec<Value>,
) -> Option<()> {
    // every album facet ends in the album's track listing
    if let Some(Seg::Obj(album_id)) = match (facet, segs) {
        (Facet::Artist, [_, _, last]) => Some(last),
        (Facet::GenreArtist, [_, _, last]) => Some(last),
        (Facet::GenreYear, [_, _, last]) => Some(last),
        (Facet::Year, [_, last]) => Some(last),
        _ => None,
    } {
        append_ids_query(conn, ret, id, &album_songs_sql(), &[album_id]);
        return Some(());
    }

    match (facet, segs) {
        (Facet::Artist, []) => {
            let names = names_of(conn, "album_artists");
            append_group_entries(ret, id, &names, false);
            Some(())
        }
        (Facet::Artist, [Seg::Group(group)]) => {
            let cond = groups::condition(group)?;
            let sql = format!(
                "SELECT ID FROM album_artists WHERE NAME{} ORDER BY NAME",
                cond
            );
            append_ids_query(conn, ret, id, &sql, &[]);
            Some(())
        }
        (Facet::Artist, [_, Seg::Name(artist_id)]) => {
            let sql = format!(
                "SELECT albums.\"{dbid}\" FROM albums INNER JOIN album_artists_arr \
                 ON albums.\"{dbid}\" = album_artists_arr.OBJ_ID \
                 WHERE album_artists_arr.NAME_ID = ? \
                 ORDER BY albums.\"{date}\", albums.\"{st}\" COLLATE strcoll",
                dbid = META_DB_ID,
                date = META_DATE,
                st = META_SEARCH_TITLE
            );
            append_ids_query(conn, ret, id, &sql, &[artist_id]);
            Some(())
        }

        (Facet::GenreArtist, []) => {
            append_ids_query(conn, ret, id, "SELECT ID FROM album_genres ORDER BY NAME", &[]);
            Some(())
        }
        (Facet::GenreArtist, [Seg::Name(genre_id)]) => {
            let sql = "SELECT ID FROM album_artists WHERE ID IN \
                       (SELECT DISTINCT album_artists_arr.NAME_ID \
                        FROM album_artists_arr INNER JOIN album_genres_arr \
                        ON album_artists_arr.OBJ_ID = album_genres_arr.OBJ_ID \
                        WHERE album_genres_arr.NAME_ID = ?) ORDER BY NAME";
            append_ids_query(conn, ret, id, sql, &[genre_id]);
            Some(())
        }
        (Facet::GenreArtist, [Seg::Name(genre_id), Seg::Name(artist_id)]) => {
            let sql = format!(
                "SELECT album_artists_arr.OBJ_ID FROM \
                 album_artists_arr INNER JOIN album_genres_arr \
                 ON album_artists_arr.OBJ_ID = album_genres_arr.OBJ_ID \
                 INNER JOIN albums ON albums.\"{dbid}\" = album_genres_arr.OBJ_ID \
                 WHERE album_genres_arr.NAME_ID = ? AND album_artists_arr.NAME_ID = ? \
                 ORDER BY albums.\"{date}\", albums.\"{st}\" COLLATE strcoll",
                dbid = META_DB_ID,
                date = META_DATE,
                st = META_SEARCH_TITLE
            );
            append_ids_query(conn, ret, id, &sql, &[genre_id, artist_id]);
            Some(())
        }

        (Facet::GenreYear, []) => {
            append_ids_query(conn, ret, id, "SELECT ID FROM album_genres ORDER BY NAME", &[]);
            Some(())
        }
        (Facet::GenreYear, [Seg::Name(genre_id)]) => {
            let sql = format!(
                "SELECT DISTINCT substr(albums.\"{date}\", 1, 4) FROM \
                 albums INNER JOIN album_genres_arr ON album_genres_arr.OBJ_ID = albums.\"{dbid}\" \
                 WHERE album_genres_arr.NAME_ID = ? ORDER BY albums.\"{date}\"",
                date = META_DATE,
                dbid = META_DB_ID
            );
            append_ids_query(conn, ret, id, &sql, &[genre_id]);
            Some(())
        }
        (Facet::GenreYear, [Seg::Name(genre_id), Seg::Year(year)]) => {
            let sql = format!(
                "SELECT albums.\"{dbid}\" FROM \
                 albums INNER JOIN album_genres_arr ON album_genres_arr.OBJ_ID = albums.\"{dbid}\" \
                 WHERE album_genres_arr.NAME_ID = ? AND albums.\"{date}\" GLOB '{year}*' \
                 ORDER BY albums.\"{st}\" COLLATE strcoll",
                dbid = META_DB_ID,
                date = META_DATE,
                st = META_SEARCH_TITLE,
                year = year
            );
            append_ids_query(conn, ret, id, &sql, &[genre_id]);
            Some(())
        }

        (Facet::Year, []) => {
            let sql = format!(
                "SELECT DISTINCT substr(\"{date}\", 1, 4) FROM albums ORDER BY \"{date}\"",
                date = META_DATE
            );
            append_ids_query(conn, ret, id, &sql, &[]);
            Some(())
        }
        (Facet::Year, [Seg::Year(year)]) => {
            let sql = format!(
                "SELECT \"{dbid}\" FROM albums WHERE \"{date}\" GLOB '{year}*' \
                 ORDER BY \"{st}\" COLLATE strcoll",
                dbid = META_DB_ID,
                date = META_DATE,
                st = META_SEARCH_TITLE,
                year = year
            );
            append_ids_query(conn, ret, id, &sql, &[]);
            Some(())
        }

        _ => None,
    }
}

fn browse_children_movies(
    conn: &Connection,
    facet: Facet,
    segs: &[Seg],
    id: &str,
    ret: &mut Vec<Value>,
) -> Option<()> {
    let group_facet = |table: &str, order: &str, ret: &mut Vec<Value>| -> Option<()> {
        match segs {
            [] => {
                let names = names_of(conn, table);
                append_group_entries(ret, id, &names, false);
                Some(())
            }
            [Seg::Group(group)] => {
                let cond = groups::condition(group)?;
                let sql = format!("SELECT ID FROM {} WHERE NAME{} ORDER BY NAME", table, cond);
                append_ids_query(conn, ret, id, &sql, &[]);
                Some(())
            }
            [_, Seg::Name(name_id)] => {
                let sql = format!(
                    "SELECT movies.\"{dbid}\" FROM movies INNER JOIN {table}_arr \
                     ON movies.\"{dbid}\" = {table}_arr.OBJ_ID \
                     WHERE {table}_arr.NAME_ID = ? ORDER BY {order}",
                    dbid = META_DB_ID,
                    table = table,
                    order = order
                );
                append_ids_query(conn, ret, id, &sql, &[name_id]);
                Some(())
            }
            _ => None,
        }
    };

    let name_facet = |table: &str, order: &str, ret: &mut Vec<Value>| -> Option<()> {
        match segs {
            [] => {
                let sql = format!("SELECT ID FROM {} ORDER BY NAME", table);
                append_ids_query(conn, ret, id, &sql, &[]);
                Some(())
            }
            [Seg::Name(name_id)] => {
                let sql = format!(
                    "SELECT movies.\"{dbid}\" FROM movies INNER JOIN {table}_arr \
                     ON movies.\"{dbid}\" = {table}_arr.OBJ_ID \
                     WHERE {table}_arr.NAME_ID = ? ORDER BY {order}",
                    dbid = META_DB_ID,
                    table = table,
                    order = order
                );
                append_ids_query(conn, ret, id, &sql, &[name_id]);
                Some(())
            }
            _ => None,
        }
    };

    let by_date = format!("movies.\"{}\"", META_DATE);
    let by_title = format!("movies.\"{}\" COLLATE strcoll", META_SEARCH_TITLE);
    let by_title_plain = format!("movies.\"{}\"", META_SEARCH_TITLE);

    match facet {
        Facet::All => match segs {
            [] => {
                let sql = format!(
                    "SELECT \"{}\" FROM movies ORDER BY \"{}\" COLLATE strcoll",
                    META_DB_ID, META_SEARCH_TITLE
                );
                append_ids_query(conn, ret, id, &sql, &[]);
                Some(())
            }
            _ => None,
        },
        Facet::Actor => group_facet("movie_actors", &by_date, ret),
        Facet::Director => group_facet("movie_directors", &by_date, ret),
        Facet::Genre => name_facet("movie_genres", &by_title, ret),
        Facet::Country => name_facet("movie_countries", &by_title_plain, ret),
        Facet::Language => name_facet("movie_audio_languages", &by_title, ret),
        Facet::Year => match segs {
            [] => {
                let sql = format!(
                    "SELECT DISTINCT substr(\"{date}\", 1, 4) FROM movies ORDER BY \"{date}\"",
                    date = META_DATE
                );
                append_ids_query(conn, ret, id, &sql, &[]);
                Some(())
            }
            [Seg::Year(year)] => {
                let sql = format!(
                    "SELECT \"{dbid}\" FROM movies WHERE substr(\"{date}\", 1, 4) = '{year}' \
                     ORDER BY \"{st}\" COLLATE strcoll",
                    dbid = META_DB_ID,
                    date = META_DATE,
                    st = META_SEARCH_TITLE,
                    year = year
                );
                append_ids_query(conn, ret, id, &sql, &[]);
                Some(())
            }
            _ => None,
        },
        _ => None,
    }
}

fn browse_children_series(
    conn: &Connection,
    facet: Facet,
    segs: &[Seg],
    id: &str,
    ret: &mut Vec<Value>,
) -> Option<()> {
    // tail below one show is shared between the two facets
    let show_tail = |segs: &[Seg], ret: &mut Vec<Value>| -> Option<()> {
        match segs {
            [Seg::Obj(show_id)] => {
                let sql = format!(
                    "SELECT \"{dbid}\" FROM seasons WHERE \"{parent}\" = ? ORDER BY \"{season}\"",
                    dbid = META_DB_ID,
                    parent = META_PARENT_ID,
                    season = META_SEASON
                );
                append_ids_query(conn, ret, id, &sql, &[show_id]);
                append_plain(ret, format!("{}/all", id));
                Some(())
            }
            [Seg::Obj(show_id), Seg::AllSeason] => {
                let sql = format!(
                    "SELECT \"{dbid}\" FROM episodes WHERE \"{parent}\" IN \
                     (SELECT \"{dbid}\" FROM seasons WHERE \"{parent}\" = ?) \
                     ORDER BY \"{st}\" COLLATE strcoll",
                    dbid = META_DB_ID,
                    parent = META_PARENT_ID,
                    st = META_SEARCH_TITLE
                );
                append_ids_query(conn, ret, id, &sql, &[show_id]);
                Some(())
            }
            [_, Seg::Obj(season_id)] => {
                let sql = format!(
                    "SELECT \"{dbid}\" FROM episodes WHERE \"{parent}\" = ? ORDER BY \"{ep}\"",
                    dbid = META_DB_ID,
                    parent = META_PARENT_ID,
                    ep = META_EPISODENUMBER
                );
                append_ids_query(conn, ret, id, &sql, &[season_id]);
                Some(())
            }
            _ => None,
        }
    };

    match (facet, segs) {
        (Facet::All, []) => {
            let sql = format!(
                "SELECT \"{}\" FROM shows ORDER BY \"{}\"",
                META_DB_ID, META_SEARCH_TITLE
            );
            append_ids_query(conn, ret, id, &sql, &[]);
            Some(())
        }
        (Facet::All, rest) => show_tail(rest, ret),

        (Facet::Genre, []) => {
            append_ids_query(conn, ret, id, "SELECT ID FROM show_genres ORDER BY NAME", &[]);
            Some(())
        }
        (Facet::Genre, [Seg::Name(genre_id)]) => {
            let sql = format!(
                "SELECT shows.\"{dbid}\" FROM shows INNER JOIN show_genres_arr \
                 ON shows.\"{dbid}\" = show_genres_arr.OBJ_ID \
                 WHERE show_genres_arr.NAME_ID = ? \
                 ORDER BY shows.\"{st}\" COLLATE strcoll",
                dbid = META_DB_ID,
                st = META_SEARCH_TITLE
            );
            append_ids_query(conn, ret, id, &sql, &[genre_id]);
            Some(())
        }
        (Facet::Genre, [_, rest @ ..]) => show_tail(rest, ret),

        _ => None,
    }
}

/// Resolve, window and materialize the children of a path, streaming
/// batches through `emit(children, index, last, total)`. Without
/// `one_answer`, a batch is flushed whenever more than a second has
/// passed since the previous flush.
pub fn browse_children(
    conn: &Connection,
    roots: &ActiveRoots,
    id: &str,
    start: i64,
    num: i64,
    one_answer: bool,
    emit: &mut dyn FnMut(Vec<Value>, i64, bool, i64),
) -> bool {
    let ids = match browse_children_ids(conn, roots, id) {
        Some(ids) => ids,
        None => return false,
    };

    let total = ids.len() as i64;
    let start = start.max(0);
    if start >= total {
        return false;
    }
    let num = if num <= 0 {
        total - start
    } else {
        num.min(total - start)
    };

    let mut batch: Vec<Value> = Vec::new();
    let mut idx = start;
    let mut last_flush = Instant::now();

    for i in 0..num {
        let pos = (start + i) as usize;

        let child_id = match track::id(&ids[pos]).map(str::to_string) {
            Some(id) => id,
            None => return false,
        };

        let mut obj = match browse_object_internal(conn, roots, &child_id) {
            Some(obj) => obj,
            None => return false,
        };

        // keep listing-level fields (group labels and counts)
        if let Some(em) = metadata(&ids[pos]) {
            merge_missing(metadata_mut(&mut obj), em);
        }

        let prev = if pos > 0 {
            track::id(&ids[pos - 1]).map(str::to_string)
        } else {
            None
        };
        let next = if pos + 1 < ids.len() {
            track::id(&ids[pos + 1]).map(str::to_string)
        } else {
            None
        };

        {
            let m = metadata_mut(&mut obj);
            if let Some(prev) = prev {
                set_string(m, META_PREVIOUS_ID, &prev);
            }
            if let Some(next) = next {
                set_string(m, META_NEXT_ID, &next);
            }
        }

        batch.push(obj);

        if !one_answer && last_flush.elapsed() > Duration::from_secs(1) {
            let flushed = std::mem::take(&mut batch);
            let count = flushed.len() as i64;
            let last = idx + count == total;

            emit(flushed, idx, last, total);
            idx += count;
            last_flush = Instant::now();
        }
    }

    if !batch.is_empty() {
        emit(batch, idx, true, total);
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::add_object;
    use crate::testutil::{movie_track, song_track, test_conn};

    fn ids_of(children: &[Value]) -> Vec<String> {
        children
            .iter()
            .filter_map(|t| track::id(t).map(str::to_string))
            .collect()
    }

    fn collect_children(conn: &Connection, id: &str) -> Vec<Value> {
        let mut all = Vec::new();
        let ok = browse_children(
            conn,
            &ActiveRoots::all(),
            id,
            0,
            0,
            true,
            &mut |children, _, last, _| {
                assert!(last);
                all.extend(children);
            },
        );
        assert!(ok, "browse_children failed for {}", id);
        all
    }

    #[test]
    fn inactive_roots_do_not_resolve() {
        let conn = test_conn();
        let roots = ActiveRoots::default();
        assert!(browse_object(&conn, &roots, "/songs/artist").is_none());
    }

    #[test]
    fn songs_artist_facet() {
        let conn = test_conn();
        add_object(&conn, &mut song_track("One", "Foo", "Rock", "A", 100), 1, -1);
        add_object(&conn, &mut song_track("Two", "Bar", "Rock", "B", 100), 1, -1);

        let roots = ActiveRoots::all();

        // facet root: one group per first letter
        let obj = browse_object(&conn, &roots, "/songs/artist").unwrap();
        let m = metadata(&obj).unwrap();
        assert_eq!(get_string(m, META_LABEL), Some("Artist"));
        assert_eq!(num_children(m), 2); // groups b and f

        let groups = browse_children_ids(&conn, &roots, "/songs/artist").unwrap();
        assert_eq!(
            ids_of(&groups),
            vec!["/songs/artist/~group~b", "/songs/artist/~group~f"]
        );

        // group bucket: the artists in it
        let artists = browse_children_ids(&conn, &roots, "/songs/artist/~group~f").unwrap();
        assert_eq!(artists.len(), 1);
        let artist_id = ids_of(&artists)[0].clone();

        // scenario A: exactly one child, resolving to the song
        let children = collect_children(&conn, &artist_id);
        assert_eq!(children.len(), 1);
        let m = metadata(&children[0]).unwrap();
        assert_eq!(get_string(m, META_TITLE), Some("One"));
        assert_eq!(get_string(m, META_CLASS), Some(CLASS_SONG));
    }

    #[test]
    fn movies_genre_counts() {
        let conn = test_conn();
        add_object(&conn, &mut movie_track("Heat", 1995, "/m/heat.mkv", 120), 1, -1);
        add_object(&conn, &mut movie_track("Ronin", 1998, "/m/ronin.mkv", 110), 1, -1);

        let roots = ActiveRoots::all();

        // scenario E: one synthetic entry per distinct genre
        let genres = browse_children_ids(&conn, &roots, "/movies/genre").unwrap();
        assert_eq!(genres.len(), 1);

        let genre_id = ids_of(&genres)[0].clone();
        let obj = browse_object(&conn, &roots, &genre_id).unwrap();
        let m = metadata(&obj).unwrap();
        assert_eq!(get_string(m, META_LABEL), Some("Crime"));
        assert_eq!(num_children(m), 2);

        let movies = collect_children(&conn, &genre_id);
        assert_eq!(movies.len(), 2);
        let m = metadata(&movies[0]).unwrap();
        assert_eq!(get_string(m, META_CLASS), Some(CLASS_MOVIE));
        assert!(movies[0].get(META_PARTS).is_some());
    }

    #[test]
    fn albums_nest_down_to_songs() {
        let conn = test_conn();
        add_object(&conn, &mut song_track("One", "Foo", "Rock", "First", 100), 1, -1);
        add_object(&conn, &mut song_track("Two", "Foo", "Rock", "First", 90), 1, -1);

        let roots = ActiveRoots::all();

        let artists = browse_children_ids(&conn, &roots, "/albums/artist/~group~f").unwrap();
        let artist_id = ids_of(&artists)[0].clone();

        let albums = browse_children_ids(&conn, &roots, &artist_id).unwrap();
        assert_eq!(albums.len(), 1);
        let album_path = ids_of(&albums)[0].clone();

        let obj = browse_object(&conn, &roots, &album_path).unwrap();
        let m = metadata(&obj).unwrap();
        assert_eq!(get_string(m, META_TITLE), Some("First"));
        assert_eq!(get_i64(m, META_NUM_ITEM_CHILDREN), Some(2));

        // track listing ordered by track number column order
        let songs = collect_children(&conn, &album_path);
        assert_eq!(songs.len(), 2);
        for song in &songs {
            let m = metadata(song).unwrap();
            assert_eq!(get_string(m, META_CLASS), Some(CLASS_SONG));
            assert_eq!(get_string(m, META_ALBUM), Some("First"));
        }
    }

    #[test]
    fn siblings_are_linked() {
        let conn = test_conn();
        add_object(&conn, &mut song_track("Alpha", "Foo", "Rock", "A", 10), 1, -1);
        add_object(&conn, &mut song_track("Beta", "Foo", "Rock", "A", 10), 1, -1);
        add_object(&conn, &mut song_track("Gamma", "Foo", "Rock", "A", 10), 1, -1);

        let conn_roots = ActiveRoots::all();
        let artists = browse_children_ids(&conn, &conn_roots, "/songs/artist/~group~f").unwrap();
        let artist_id = ids_of(&artists)[0].clone();

        let children = collect_children(&conn, &artist_id);
        assert_eq!(children.len(), 3);

        let m = metadata(&children[1]).unwrap();
        assert_eq!(
            get_string(m, META_PREVIOUS_ID),
            track::id(&children[0])
        );
        assert_eq!(get_string(m, META_NEXT_ID), track::id(&children[2]));

        // browse_object computes the same links
        let mid = track::id(&children[1]).unwrap();
        let obj = browse_object(&conn, &conn_roots, mid).unwrap();
        let m = metadata(&obj).unwrap();
        assert_eq!(get_string(m, META_PREVIOUS_ID), track::id(&children[0]));
    }

    #[test]
    fn windowing() {
        let conn = test_conn();
        for title in &["A1", "B2", "C3", "D4"] {
            add_object(&conn, &mut song_track(title, "Foo", "Rock", "A", 10), 1, -1);
        }

        let roots = ActiveRoots::all();
        let artists = browse_children_ids(&conn, &roots, "/songs/artist/~group~f").unwrap();
        let artist_id = ids_of(&artists)[0].clone();

        let mut got = Vec::new();
        let ok = browse_children(
            &conn,
            &roots,
            &artist_id,
            1,
            2,
            true,
            &mut |children, idx, last, total| {
                assert_eq!(idx, 1);
                assert!(last);
                assert_eq!(total, 4);
                got.extend(children);
            },
        );
        assert!(ok);
        assert_eq!(got.len(), 2);

        // a window past the end produces no response
        let ok = browse_children(&conn, &roots, &artist_id, 10, 5, true, &mut |_, _, _, _| {
            panic!("no response expected");
        });
        assert!(!ok);
    }

    #[test]
    fn facet_listing_at_root() {
        let conn = test_conn();
        let roots = ActiveRoots::all();

        let facets = browse_children_ids(&conn, &roots, "/movies").unwrap();
        assert_eq!(
            ids_of(&facets),
            vec![
                "/movies/all",
                "/movies/actor",
                "/movies/director",
                "/movies/genre",
                "/movies/year",
                "/movies/country",
                "/movies/language"
            ]
        );
    }

    #[test]
    fn series_expose_seasons_and_all_episodes() {
        let conn = test_conn();
        add_object(
            &conn,
            &mut crate::testutil::episode_track("Show", 1, 1, "Pilot", "/tv/s01e01.mkv"),
            1,
            -1,
        );
        add_object(
            &conn,
            &mut crate::testutil::episode_track("Show", 1, 2, "Second", "/tv/s01e02.mkv"),
            1,
            -1,
        );
        add_object(
            &conn,
            &mut crate::testutil::episode_track("Show", 2, 1, "Later", "/tv/s02e01.mkv"),
            1,
            -1,
        );

        let roots = ActiveRoots::all();

        let shows = browse_children_ids(&conn, &roots, "/series/all").unwrap();
        assert_eq!(shows.len(), 1);
        let show_path = ids_of(&shows)[0].clone();

        // the show reports its seasons plus the "all episodes" entry
        let obj = browse_object(&conn, &roots, &show_path).unwrap();
        let m = metadata(&obj).unwrap();
        assert_eq!(get_string(m, META_LABEL), Some("Show"));
        assert_eq!(num_children(m), 3);

        let children = browse_children_ids(&conn, &roots, &show_path).unwrap();
        let child_ids = ids_of(&children);
        assert_eq!(child_ids.len(), 3);
        assert_eq!(child_ids[2], format!("{}/all", show_path));

        // seasons are ordered by season number
        let season = browse_object(&conn, &roots, &child_ids[0]).unwrap();
        let m = metadata(&season).unwrap();
        assert_eq!(get_string(m, META_LABEL), Some("Season 1"));
        assert_eq!(get_i64(m, META_NUM_ITEM_CHILDREN), Some(2));

        // "all episodes" spans the seasons
        let all = browse_object(&conn, &roots, &child_ids[2]).unwrap();
        let m = metadata(&all).unwrap();
        assert_eq!(get_string(m, META_LABEL), Some("All episodes"));
        assert_eq!(num_children(m), 3);

        let episodes = collect_children(&conn, &child_ids[0]);
        assert_eq!(episodes.len(), 2);
        let m = metadata(&episodes[0]).unwrap();
        assert_eq!(get_string(m, META_TITLE), Some("Pilot"));
        assert_eq!(get_string(m, META_CLASS), Some(CLASS_TV_EPISODE));
    }

    #[test]
    fn malformed_paths_do_not_resolve() {
        let conn = test_conn();
        let roots = ActiveRoots::all();

        assert!(browse_object(&conn, &roots, "/songs/bogus").is_none());
        assert!(browse_object(&conn, &roots, "/songs/artist/nogroup").is_none());
        assert!(browse_object(&conn, &roots, "/songs/artist/~group~f/xyz").is_none());
        assert!(browse_object(&conn, &roots, "/movies/genre/1/2/3").is_none());
        assert!(browse_children_ids(&conn, &roots, "/elsewhere").is_none());
    }
}

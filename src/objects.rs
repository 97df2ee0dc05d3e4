//! Object CRUD engine.
//!
//! Generic create/read/update/delete of one object row plus its array
//! facets and file source columns, driven by the schema registry.
//! Containers (albums, shows, seasons, movies) are maintained as side
//! effects: adding a child creates or updates its container, deleting
//! a child decrements the container aggregates and removes the
//! container once it is empty.

use rusqlite::types::ToSql;
use rusqlite::Connection;
use serde_json::Value;

use crate::schema::{self, ColumnDef, ColumnType, ObjectTable, ObjectType};
use crate::sqlite;
use crate::track::{self, *};

pub const DEL_FLAG_RELATED: u32 = 1 << 0;
pub const DEL_FLAG_CHILDREN: u32 = 1 << 1;
pub const DEL_FLAG_PARENT: u32 = 1 << 2;
pub const DEL_FLAG_ALL: u32 = DEL_FLAG_RELATED | DEL_FLAG_CHILDREN | DEL_FLAG_PARENT;

const IMAGE_TYPE_IMAGE: i64 = 0;
const IMAGE_TYPE_COVER: i64 = 1;
const IMAGE_TYPE_POSTER: i64 = 2;
const IMAGE_TYPE_WALLPAPER: i64 = 3;

/// Allocate the next object id and insert the (DBID, TYPE) row.
pub fn create_object(conn: &Connection, otype: ObjectType) -> i64 {
    let id = sqlite::max_i64(conn, "objects", META_DB_ID);
    if id < 0 {
        return -1;
    }
    let id = id + 1;
    let type_id = otype as i64;

    if !sqlite::exec(
        conn,
        "INSERT INTO objects (DBID, TYPE) VALUES (?, ?)",
        &[&id, &type_id],
    ) {
        return -1;
    }
    id
}

pub fn object_type(conn: &Connection, id: i64) -> Option<ObjectType> {
    let t = sqlite::id_to_id(conn, "objects", "TYPE", META_DB_ID, id);
    ObjectType::from_i64(t)
}

fn set_dict_value(conn: &Connection, m: &mut Dict, col: &ColumnDef, row: &rusqlite::Row, idx: usize) {
    match col.ctype {
        ColumnType::Int | ColumnType::Long => {
            if let Ok(Some(v)) = row.get::<_, Option<i64>>(idx) {
                set_i64(m, col.name, v);
            }
        }
        ColumnType::Text => {
            if let Some(id_table) = col.id_table {
                if let Ok(Some(id)) = row.get::<_, Option<i64>>(idx) {
                    if let Some(name) = sqlite::id_to_string(conn, id_table, "NAME", "ID", id) {
                        set_string(m, col.name, &name);
                    }
                }
            } else if let Ok(Some(v)) = row.get::<_, Option<String>>(idx) {
                set_string(m, col.name, &v);
            }
        }
    }
}

fn select_sql(table: &str, cols: &[&ColumnDef], where_clause: &str) -> String {
    let names: Vec<String> = cols.iter().map(|c| format!("\"{}\"", c.name)).collect();
    format!("SELECT {} FROM {} {}", names.join(", "), table, where_clause)
}

fn columns_by_name(tab: &'static ObjectTable, names: &[&str]) -> Vec<&'static ColumnDef> {
    names
        .iter()
        .filter_map(|n| schema::has_col(tab, n))
        .collect()
}

/// First matching row of a per-type table as a metadata dictionary.
fn query_partial(
    conn: &Connection,
    tab: &'static ObjectTable,
    col_names: &[&str],
    where_clause: &str,
    params: &[&dyn ToSql],
) -> Option<Dict> {
    let cols = columns_by_name(tab, col_names);
    let sql = select_sql(tab.table, &cols, where_clause);

    let mut st = match conn.prepare(&sql) {
        Ok(st) => st,
        Err(e) => {
            error!("sql \"{}\" failed: {}", sql, e);
            return None;
        }
    };

    let mut rows = match st.query(params) {
        Ok(rows) => rows,
        Err(e) => {
            error!("sql \"{}\" failed: {}", sql, e);
            return None;
        }
    };

    match rows.next() {
        Ok(Some(row)) => {
            let mut m = Dict::new();
            for (i, col) in cols.iter().enumerate() {
                set_dict_value(conn, &mut m, col, row, i);
            }
            Some(m)
        }
        Ok(None) => None,
        Err(e) => {
            error!("sql \"{}\" failed: {}", sql, e);
            None
        }
    }
}

fn track_from_metadata(m: Dict) -> Value {
    let mut track = track::new_track();
    *metadata_mut(&mut track) = m;
    track
}

/// Load a complete object: scalar columns, file source, array facets,
/// resolved image urls, movie parts and the class tag.
pub fn query_object(conn: &Connection, id: i64, otype: Option<ObjectType>) -> Option<Value> {
    let otype = match otype {
        Some(t) => t,
        None => object_type(conn, id)?,
    };
    let tab = schema::object_table(otype);

    let cols: Vec<&'static ColumnDef> = tab.cols.iter().chain(tab.src_cols.iter()).collect();
    let sql = select_sql(tab.table, &cols, &format!("WHERE \"{}\" = ?", META_DB_ID));

    let mut track = {
        let mut st = match conn.prepare(&sql) {
            Ok(st) => st,
            Err(e) => {
                error!("sql \"{}\" failed: {}", sql, e);
                return None;
            }
        };

        let mut rows = match st.query(&[&id as &dyn ToSql]) {
            Ok(rows) => rows,
            Err(e) => {
                error!("sql \"{}\" failed: {}", sql, e);
                return None;
            }
        };

        let row = match rows.next() {
            Ok(Some(row)) => row,
            _ => return None,
        };

        let mut track = track::new_track();
        {
            let m = metadata_mut(&mut track);
            for (i, col) in tab.cols.iter().enumerate() {
                set_dict_value(conn, m, col, row, i);
            }
        }
        if !tab.src_cols.is_empty() {
            let src = src_mut(&mut track);
            for (i, col) in tab.src_cols.iter().enumerate() {
                set_dict_value(conn, src, col, row, tab.cols.len() + i);
            }
        }
        track
    };

    // Array facets, insertion-ordered, with the parallel id array
    for arr in tab.arrays {
        let sql = format!(
            "SELECT {idt}.NAME, {idt}.ID FROM {arrt} INNER JOIN {idt} ON {idt}.ID = {arrt}.NAME_ID \
             WHERE {arrt}.OBJ_ID = ? ORDER BY {arrt}.ID",
            idt = arr.id_table,
            arrt = arr.arr_table
        );

        let mut st = match conn.prepare(&sql) {
            Ok(st) => st,
            Err(e) => {
                error!("sql \"{}\" failed: {}", sql, e);
                return None;
            }
        };

        let entries: Vec<(String, i64)> = match st.query_map(&[&id as &dyn ToSql], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        }) {
            Ok(rows) => rows.flatten().collect(),
            Err(e) => {
                error!("sql \"{}\" failed: {}", sql, e);
                return None;
            }
        };

        let m = metadata_mut(&mut track);
        let id_field = format!("{}{}", arr.field, ID_SUFFIX);
        for (name, name_id) in entries {
            append_string_array(m, arr.field, &name);
            append_string_array(m, &id_field, &name_id.to_string());
        }
    }

    {
        let m = metadata_mut(&mut track);
        query_images(conn, m);

        if otype == ObjectType::Song {
            if let Some(parent_id) = get_i64(m, META_PARENT_ID).filter(|v| *v > 0) {
                if let Some(album) =
                    sqlite::id_to_string(conn, "albums", META_TITLE, META_DB_ID, parent_id)
                {
                    set_string(m, META_ALBUM, &album);
                }
            }
        }
    }

    if otype == ObjectType::Movie {
        query_parts(conn, &mut track, id);
        set_string(metadata_mut(&mut track), META_CLASS, CLASS_MOVIE);
    } else {
        set_string(metadata_mut(&mut track), META_CLASS, otype.class());
    }

    Some(track)
}

/// Resolve cover/poster/wallpaper ids into source urls.
pub fn query_images(conn: &Connection, m: &mut Dict) {
    const KEYS: &[(&str, &str)] = &[
        (META_COVER_ID, META_COVER_URL),
        (META_POSTER_ID, META_POSTER_URL),
        (META_WALLPAPER_ID, META_WALLPAPER_URL),
    ];

    for (id_key, url_key) in KEYS {
        let image_id = match get_i64(m, id_key) {
            Some(v) if v > 0 => v,
            _ => continue,
        };

        if let Some(uri) = sqlite::id_to_string(conn, "images", META_URI, META_DB_ID, image_id) {
            set_string(m, url_key, &uri);
        }
    }
}

/// Ordered part list of a multipart movie.
fn query_parts(conn: &Connection, movie: &mut Value, id: i64) {
    let sql = format!(
        "SELECT \"{dur}\", \"{uri}\", \"{mime}\", \"{mtime}\" FROM movie_parts \
         WHERE \"{parent}\" = ? ORDER BY \"{idx}\"",
        dur = META_APPROX_DURATION,
        uri = META_URI,
        mime = META_MIMETYPE,
        mtime = META_MTIME,
        parent = META_PARENT_ID,
        idx = META_IDX
    );

    let mut st = match conn.prepare(&sql) {
        Ok(st) => st,
        Err(e) => {
            error!("sql \"{}\" failed: {}", sql, e);
            return;
        }
    };

    let rows: Vec<(Option<i64>, Option<String>, Option<i64>, Option<i64>)> =
        match st.query_map(&[&id as &dyn ToSql], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
        }) {
            Ok(rows) => rows.flatten().collect(),
            Err(e) => {
                error!("sql \"{}\" failed: {}", sql, e);
                return;
            }
        };

    for (duration, uri, mimetype_id, mtime) in rows {
        let mimetype =
            mimetype_id.and_then(|mid| sqlite::id_to_string(conn, "movie_mimetypes", "NAME", "ID", mid));

        let part = add_part(movie);
        if let Some(uri) = uri {
            set_string(part, META_URI, &uri);
        }
        if let Some(mimetype) = mimetype {
            set_string(part, META_MIMETYPE, &mimetype);
        }
        if let Some(mtime) = mtime {
            set_i64(part, META_MTIME, mtime);
        }
        if let Some(duration) = duration {
            set_i64(part, META_APPROX_DURATION, duration);
        }
    }
}

/// UPDATE the declared scalar columns of an object from its metadata.
/// A failed statement is logged and otherwise ignored.
pub fn update_object(conn: &Connection, track: &Value, tab: &'static ObjectTable) {
    let m = match metadata(track) {
        Some(m) => m,
        None => return,
    };
    let id = match get_i64(m, META_DB_ID) {
        Some(id) => id,
        None => return,
    };

    let mut assignments: Vec<String> = Vec::new();
    let mut params: Vec<Box<dyn ToSql>> = Vec::new();

    for (key, value) in m {
        if key == META_DB_ID
            || key == META_NUM_CONTAINER_CHILDREN
            || key == META_NUM_ITEM_CHILDREN
        {
            continue;
        }
        let col = match schema::has_col(tab, key) {
            Some(col) => col,
            None => continue,
        };

        match col.ctype {
            ColumnType::Int | ColumnType::Long => {
                if let Some(v) = value.as_i64() {
                    assignments.push(format!("\"{}\" = ?", key));
                    params.push(Box::new(v));
                }
            }
            ColumnType::Text => {
                if let Some(v) = value.as_str() {
                    assignments.push(format!("\"{}\" = ?", key));
                    if let Some(id_table) = col.id_table {
                        params.push(Box::new(sqlite::string_to_id_add(
                            conn, id_table, "ID", "NAME", v,
                        )));
                    } else {
                        params.push(Box::new(v.to_string()));
                    }
                }
            }
        }
    }

    if assignments.is_empty() {
        return;
    }

    params.push(Box::new(id));
    let sql = format!(
        "UPDATE {} SET {} WHERE \"{}\" = ?",
        tab.table,
        assignments.join(", "),
        META_DB_ID
    );

    let refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();
    sqlite::exec(conn, &sql, &refs);
}

fn append_cols(
    conn: &Connection,
    m: &Dict,
    cols: &'static [ColumnDef],
    names: &mut Vec<String>,
    params: &mut Vec<Box<dyn ToSql>>,
) {
    for col in cols {
        let value = match m.get(col.name) {
            Some(v) => v,
            None => continue,
        };

        match col.ctype {
            ColumnType::Int | ColumnType::Long => {
                if let Some(v) = value.as_i64() {
                    names.push(format!("\"{}\"", col.name));
                    params.push(Box::new(v));
                }
            }
            ColumnType::Text => {
                if let Some(v) = value.as_str() {
                    names.push(format!("\"{}\"", col.name));
                    if let Some(id_table) = col.id_table {
                        params.push(Box::new(sqlite::string_to_id_add(
                            conn, id_table, "ID", "NAME", v,
                        )));
                    } else {
                        params.push(Box::new(v.to_string()));
                    }
                }
            }
        }
    }
}

fn append_arrays(conn: &Connection, m: &Dict, tab: &'static ObjectTable, object_id: i64) {
    for arr in tab.arrays {
        let mut row_id = -1;

        for name in string_array(m, arr.field) {
            let name_id = sqlite::string_to_id_add(conn, arr.id_table, "ID", "NAME", name);

            if row_id < 0 {
                row_id = sqlite::max_i64(conn, arr.arr_table, "ID");
                if row_id < 0 {
                    break;
                }
            }
            row_id += 1;

            let sql = format!(
                "INSERT INTO {} (ID, OBJ_ID, NAME_ID) VALUES (?, ?, ?)",
                arr.arr_table
            );
            if !sqlite::exec(conn, &sql, &[&row_id, &object_id, &name_id]) {
                break;
            }
        }
    }
}

fn set_image_type(conn: &Connection, image_id: i64, image_type: i64) {
    let sql = format!(
        "UPDATE images SET \"{}\" = ? WHERE \"{}\" = ?",
        META_IMAGE_TYPE, META_DB_ID
    );
    sqlite::exec(conn, &sql, &[&image_type, &image_id]);
}

/// Insert one generic metadata record. The class tag selects the
/// type; `obj_id` < 0 allocates a fresh id. Returns the object id or
/// -1 (logged, caller skips the record).
pub fn add_object(conn: &Connection, track: &mut Value, scan_dir_id: i64, obj_id: i64) -> i64 {
    let mut obj_id = obj_id;

    let klass = match metadata(track).and_then(|m| get_string(m, META_CLASS)) {
        Some(k) => k.to_string(),
        None => return -1,
    };

    info!(
        "adding object {} {}",
        metadata(track)
            .and_then(|m| get_string(m, META_TITLE))
            .unwrap_or(""),
        klass
    );

    // Single part movies are stored the same way as multipart ones
    let klass = if klass == CLASS_MOVIE && obj_id < 0 {
        set_string(metadata_mut(track), META_CLASS, CLASS_MOVIE_PART);
        CLASS_MOVIE_PART.to_string()
    } else {
        klass
    };

    let otype = match ObjectType::from_class(&klass) {
        Some(t) => t,
        None => return -1,
    };
    let tab = schema::object_table(otype);

    {
        let m = metadata_mut(track);

        if schema::has_col(tab, META_DATE).is_some() && get_string(m, META_DATE).is_none() {
            set_string(m, META_DATE, DATE_UNDEFINED);
        }
        if schema::has_col(tab, META_SEARCH_TITLE).is_some()
            && get_string(m, META_SEARCH_TITLE).is_none()
        {
            if let Some(title) = get_string(m, META_TITLE).map(|t| t.to_string()) {
                let st = track::search_title(&title);
                set_string(m, META_SEARCH_TITLE, &st);
            }
        }
        if schema::has_col(tab, META_IMAGE_TYPE).is_some()
            && get_i64(m, META_IMAGE_TYPE).is_none()
        {
            set_i64(m, META_IMAGE_TYPE, IMAGE_TYPE_IMAGE);
        }
    }

    // Parent containers
    let parent_id = match otype {
        ObjectType::Song => Some(add_child_album(conn, track)),
        ObjectType::TvEpisode => Some(add_child_tv_season(conn, track)),
        ObjectType::MoviePart => Some(add_movie_part(conn, track)),
        _ => None,
    };
    if let Some(parent_id) = parent_id {
        set_i64(metadata_mut(track), META_PARENT_ID, parent_id);
    }

    // Ids of external resources, added during pass 1
    {
        const RELATED: &[(&str, &str, &str, i64)] = &[
            (META_POSTER_ID, META_POSTER_URL, "images", IMAGE_TYPE_POSTER),
            (
                META_WALLPAPER_ID,
                META_WALLPAPER_URL,
                "images",
                IMAGE_TYPE_WALLPAPER,
            ),
            (META_COVER_ID, META_COVER_URL, "images", IMAGE_TYPE_COVER),
        ];

        for (id_key, url_key, table, image_type) in RELATED {
            if schema::has_col(tab, id_key).is_none() {
                continue;
            }

            let uri = metadata(track)
                .and_then(|m| get_string(m, url_key))
                .map(|s| s.to_string());

            let m = metadata_mut(track);
            match uri {
                Some(uri) => {
                    let id = sqlite::string_to_id(conn, table, META_DB_ID, META_URI, &uri);
                    set_i64(m, id_key, id);
                    if id > 0 {
                        set_image_type(conn, id, *image_type);
                    }
                }
                None => set_i64(m, id_key, -1),
            }
        }

        if schema::has_col(tab, META_NFO_ID).is_some() {
            let uri = metadata(track)
                .and_then(|m| get_string(m, META_NFO_FILE))
                .map(|s| s.to_string());

            let m = metadata_mut(track);
            match uri {
                Some(uri) => {
                    let id = sqlite::string_to_id(conn, "nfos", META_DB_ID, META_URI, &uri);
                    set_i64(m, META_NFO_ID, id);
                }
                None => set_i64(m, META_NFO_ID, -1),
            }
        }
    }

    {
        let m = metadata_mut(track);
        if schema::has_array(tab, META_COUNTRY) && num_items(m, META_COUNTRY) == 0 {
            append_string_array(m, META_COUNTRY, "Unknown");
        }
        if scan_dir_id >= 0 {
            set_i64(m, META_SCAN_DIR_ID, scan_dir_id);
        }
    }

    if obj_id < 0 {
        obj_id = create_object(conn, otype);
        if obj_id < 0 {
            return -1;
        }
    }

    // A movie row added for its parts points at itself
    if klass == CLASS_MOVIE {
        set_i64(metadata_mut(track), META_PARENT_ID, obj_id);
    }

    set_i64(metadata_mut(track), META_DB_ID, obj_id);

    {
        let m = metadata(track).unwrap();
        let mut names: Vec<String> = Vec::new();
        let mut params: Vec<Box<dyn ToSql>> = Vec::new();

        append_cols(conn, m, tab.cols, &mut names, &mut params);

        if !tab.src_cols.is_empty() {
            if let Some(src) = track::src(track) {
                append_cols(conn, src, tab.src_cols, &mut names, &mut params);
            }
        }

        let placeholders: Vec<&str> = names.iter().map(|_| "?").collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            tab.table,
            names.join(", "),
            placeholders.join(", ")
        );

        let refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();
        if !sqlite::exec(conn, &sql, &refs) {
            return -1;
        }
    }

    if let Some(m) = metadata(track) {
        append_arrays(conn, m, tab, obj_id);
    }

    obj_id
}

/// Find or create the album of a song, updating its aggregates.
fn add_child_album(conn: &Connection, song: &Value) -> i64 {
    let m = match metadata(song) {
        Some(m) => m,
        None => return -1,
    };

    let title = get_string(m, META_ALBUM).map(|s| s.to_string());
    let artist = array_item(m, META_ALBUMARTIST, 0)
        .or_else(|| array_item(m, META_ARTIST, 0))
        .map(|s| s.to_string());

    let tab = schema::object_table(ObjectType::Album);

    if let (Some(title), Some(artist)) = (title.as_deref(), artist.as_deref()) {
        let artist_id = sqlite::string_to_id(conn, "album_artists", "ID", "NAME", artist);

        if artist_id >= 0 {
            let where_clause = format!(
                "WHERE \"{}\" IN (SELECT OBJ_ID FROM album_artists_arr WHERE NAME_ID = ?) \
                 AND \"{}\" = ?",
                META_DB_ID, META_TITLE
            );

            if let Some(mut album_m) = query_partial(
                conn,
                tab,
                &[META_DB_ID, META_APPROX_DURATION, META_DATE, META_NUM_CHILDREN],
                &where_clause,
                &[&artist_id, &title],
            ) {
                let album_id = get_i64(&album_m, META_DB_ID).unwrap_or(-1);

                let num = get_i64(&album_m, META_NUM_CHILDREN).unwrap_or(0) + 1;
                set_i64(&mut album_m, META_NUM_CHILDREN, num);

                // Mixed-date albums fall back to the undefined date
                let album_date = get_string(&album_m, META_DATE).map(|s| s.to_string());
                let song_date = get_string(m, META_DATE);
                if let (Some(album_date), Some(song_date)) = (album_date, song_date) {
                    if album_date != DATE_UNDEFINED && album_date != song_date {
                        set_string(&mut album_m, META_DATE, DATE_UNDEFINED);
                    }
                }

                let duration = get_i64(&album_m, META_APPROX_DURATION).unwrap_or(0)
                    + get_i64(m, META_APPROX_DURATION).unwrap_or(0);
                set_i64(&mut album_m, META_APPROX_DURATION, duration);

                update_object(conn, &track_from_metadata(album_m), tab);
                return album_id;
            }
        }
    }

    // New album
    let album_id = create_object(conn, ObjectType::Album);
    if album_id < 0 {
        return -1;
    }

    let mut album = track::new_track();
    {
        let am = metadata_mut(&mut album);
        set_string(am, META_CLASS, CLASS_ALBUM);
        set_i64(am, META_DB_ID, album_id);

        if let Some(title) = title.as_deref() {
            set_string(am, META_TITLE, title);
        }
        for a in string_array(m, META_ALBUMARTIST) {
            append_string_array(am, META_ARTIST, a);
        }
        if num_items(am, META_ARTIST) == 0 {
            for a in string_array(m, META_ARTIST) {
                append_string_array(am, META_ARTIST, a);
            }
        }
        for g in string_array(m, META_GENRE) {
            append_string_array(am, META_GENRE, g);
        }
        if let Some(date) = get_string(m, META_DATE) {
            set_string(am, META_DATE, date);
        }
        if let Some(cover) = get_string(m, META_COVER_URL) {
            set_string(am, META_COVER_URL, cover);
        }
        if let Some(duration) = get_i64(m, META_APPROX_DURATION) {
            set_i64(am, META_APPROX_DURATION, duration);
        }
    }
    set_num_children(&mut album, 0, 1);

    add_object(conn, &mut album, -1, album_id);
    album_id
}

/// Find or create the show of an episode.
fn add_child_tv_show(conn: &Connection, episode: &Value) -> i64 {
    let m = match metadata(episode) {
        Some(m) => m,
        None => return -1,
    };

    let show = match get_string(m, META_SHOW) {
        Some(s) => s.to_string(),
        None => return -1,
    };

    let tab = schema::object_table(ObjectType::TvShow);
    let where_clause = format!("WHERE \"{}\" = ?", META_TITLE);

    if let Some(mut show_m) = query_partial(
        conn,
        tab,
        &[META_DB_ID, META_NUM_CHILDREN],
        &where_clause,
        &[&show],
    ) {
        let show_id = get_i64(&show_m, META_DB_ID).unwrap_or(-1);

        let num = get_i64(&show_m, META_NUM_CHILDREN).unwrap_or(0) + 1;
        set_i64(&mut show_m, META_NUM_CHILDREN, num);

        update_object(conn, &track_from_metadata(show_m), tab);
        return show_id;
    }

    let show_id = create_object(conn, ObjectType::TvShow);
    if show_id < 0 {
        return -1;
    }

    let mut show_track = track::new_track();
    {
        let sm = metadata_mut(&mut show_track);
        set_string(sm, META_CLASS, CLASS_TV_SHOW);
        set_i64(sm, META_DB_ID, show_id);
        set_string(sm, META_TITLE, &show);
        for g in string_array(m, META_GENRE) {
            append_string_array(sm, META_GENRE, g);
        }
    }
    set_num_children(&mut show_track, 1, 0);

    add_object(conn, &mut show_track, -1, show_id);
    show_id
}

/// Find or create the season of an episode, updating aggregates and
/// creating the show on the way if needed.
fn add_child_tv_season(conn: &Connection, episode: &Value) -> i64 {
    let m = match metadata(episode) {
        Some(m) => m,
        None => return -1,
    };

    let show = match get_string(m, META_SHOW) {
        Some(s) => s.to_string(),
        None => return -1,
    };
    let season = match get_i64(m, META_SEASON) {
        Some(s) => s,
        None => return -1,
    };

    let tab = schema::object_table(ObjectType::TvSeason);

    let show_id = sqlite::string_to_id(conn, "shows", META_DB_ID, META_TITLE, &show);
    if show_id >= 0 {
        let where_clause = format!(
            "WHERE \"{}\" = ? AND \"{}\" = ?",
            META_PARENT_ID, META_SEASON
        );

        if let Some(mut season_m) = query_partial(
            conn,
            tab,
            &[META_DB_ID, META_APPROX_DURATION, META_DATE, META_NUM_CHILDREN],
            &where_clause,
            &[&show_id, &season],
        ) {
            let season_id = get_i64(&season_m, META_DB_ID).unwrap_or(-1);

            let num = get_i64(&season_m, META_NUM_CHILDREN).unwrap_or(0) + 1;
            set_i64(&mut season_m, META_NUM_CHILDREN, num);

            // A season carries the date of its earliest episode
            let season_date = get_string(&season_m, META_DATE).map(|s| s.to_string());
            let episode_date = get_string(m, META_DATE);
            if let (Some(season_date), Some(episode_date)) = (season_date, episode_date) {
                if episode_date < season_date.as_str() {
                    set_string(&mut season_m, META_DATE, episode_date);
                }
            }

            let duration = get_i64(&season_m, META_APPROX_DURATION).unwrap_or(0)
                + get_i64(m, META_APPROX_DURATION).unwrap_or(0);
            set_i64(&mut season_m, META_APPROX_DURATION, duration);

            update_object(conn, &track_from_metadata(season_m), tab);
            return season_id;
        }
    }

    let show_id = add_child_tv_show(conn, episode);

    let season_id = create_object(conn, ObjectType::TvSeason);
    if season_id < 0 {
        return -1;
    }

    let mut season_track = track::new_track();
    {
        let sm = metadata_mut(&mut season_track);
        set_string(sm, META_CLASS, CLASS_TV_SEASON);
        set_i64(sm, META_DB_ID, season_id);
        set_i64(sm, META_PARENT_ID, show_id);
        set_i64(sm, META_SEASON, season);
        if let Some(date) = get_string(m, META_DATE) {
            set_string(sm, META_DATE, date);
        }
        if let Some(duration) = get_i64(m, META_APPROX_DURATION) {
            set_i64(sm, META_APPROX_DURATION, duration);
        }
    }
    set_num_children(&mut season_track, 0, 1);

    add_object(conn, &mut season_track, -1, season_id);
    season_id
}

/// Find or create the movie row a part belongs to.
fn add_movie_part(conn: &Connection, part: &Value) -> i64 {
    let m = match metadata(part) {
        Some(m) => m,
        None => return -1,
    };

    let title = get_string(m, META_TITLE).map(|s| s.to_string());
    let date = get_string(m, META_DATE).map(|s| s.to_string());

    let tab = schema::object_table(ObjectType::Movie);

    if let Some(title) = title.as_deref() {
        let where_clause = format!(
            "WHERE \"{}\" = ? AND \"{}\" = ?",
            META_TITLE, META_DATE
        );
        let date_param = date.clone().unwrap_or_else(|| DATE_UNDEFINED.to_string());

        if let Some(mut movie_m) = query_partial(
            conn,
            tab,
            &[META_DB_ID, META_APPROX_DURATION],
            &where_clause,
            &[&title, &date_param],
        ) {
            let movie_id = get_i64(&movie_m, META_DB_ID).unwrap_or(-1);

            let duration = get_i64(&movie_m, META_APPROX_DURATION).unwrap_or(0)
                + get_i64(m, META_APPROX_DURATION).unwrap_or(0);
            set_i64(&mut movie_m, META_APPROX_DURATION, duration);

            update_object(conn, &track_from_metadata(movie_m), tab);
            return movie_id;
        }
    }

    let movie_id = create_object(conn, ObjectType::Movie);
    if movie_id < 0 {
        return -1;
    }

    let mut movie = part.clone();
    {
        let mm = metadata_mut(&mut movie);
        mm.remove(META_SRC);
        set_string(mm, META_CLASS, CLASS_MOVIE);
    }

    add_object(conn, &mut movie, -1, movie_id);
    movie_id
}

fn related_array(conn: &Connection, tag: &str, id: i64) -> Vec<(i64, ObjectType)> {
    let mut result = Vec::new();

    for tab in schema::OBJECT_TABLES {
        if schema::has_col(tab, tag).is_none() {
            continue;
        }

        let sql = format!(
            "SELECT \"{}\" FROM {} WHERE \"{}\" = ?",
            META_DB_ID, tab.table, tag
        );
        for obj_id in sqlite::i64_array(conn, &sql, &[&id]) {
            result.push((obj_id, tab.otype));
        }
    }

    result
}

fn child_array(conn: &Connection, child_type: ObjectType, id: i64) -> Vec<i64> {
    let tab = schema::object_table(child_type);
    let sql = format!(
        "SELECT \"{}\" FROM {} WHERE \"{}\" = ?",
        META_DB_ID, tab.table, META_PARENT_ID
    );
    sqlite::i64_array(conn, &sql, &[&id])
}

/// Delete one object. Flag bits select whether related objects,
/// children and the parent aggregates are processed too. A container
/// whose duration or child count drops to zero is deleted as well,
/// recursing with the parent flag cleared so the ascent stops after
/// one level.
pub fn delete_object(conn: &Connection, id: i64, otype: ObjectType, del_flags: u32) {
    info!("deleting object {}", id);

    let mut parent_type: Option<ObjectType> = None;
    let mut child_type: Option<ObjectType> = None;

    match otype {
        ObjectType::Song => parent_type = Some(ObjectType::Album),
        ObjectType::TvSeason => {
            parent_type = Some(ObjectType::TvShow);
            child_type = Some(ObjectType::TvEpisode);
        }
        ObjectType::TvEpisode => parent_type = Some(ObjectType::TvSeason),
        ObjectType::MoviePart => parent_type = Some(ObjectType::Movie),
        ObjectType::Album => child_type = Some(ObjectType::Song),
        ObjectType::TvShow => child_type = Some(ObjectType::TvSeason),
        ObjectType::Movie => child_type = Some(ObjectType::MoviePart),
        ObjectType::Image => {
            if del_flags & DEL_FLAG_RELATED != 0 {
                let mut related = related_array(conn, META_POSTER_ID, id);
                related.extend(related_array(conn, META_WALLPAPER_ID, id));
                related.extend(related_array(conn, META_COVER_ID, id));
                for (obj_id, obj_type) in related {
                    delete_object(conn, obj_id, obj_type, del_flags);
                }
            }
        }
        ObjectType::Nfo => {
            if del_flags & DEL_FLAG_RELATED != 0 {
                for (obj_id, obj_type) in related_array(conn, META_NFO_ID, id) {
                    delete_object(conn, obj_id, obj_type, del_flags);
                }
            }
        }
    }

    if del_flags & DEL_FLAG_CHILDREN != 0 {
        if let Some(child_type) = child_type {
            for child_id in child_array(conn, child_type, id) {
                delete_object(conn, child_id, child_type, del_flags & !DEL_FLAG_PARENT);
            }
        }
    }

    if del_flags & DEL_FLAG_PARENT != 0 {
        if let Some(parent_type) = parent_type {
            update_parent_on_delete(conn, id, otype, parent_type, del_flags);
        }
    }

    // Dedicated table row, array facets, orphaned names, object row
    let tab = schema::object_table(otype);

    let sql = format!("DELETE FROM {} WHERE \"{}\" = ?", tab.table, META_DB_ID);
    sqlite::exec(conn, &sql, &[&id]);

    for arr in tab.arrays {
        let sql = format!("DELETE FROM {} WHERE OBJ_ID = ?", arr.arr_table);
        sqlite::exec(conn, &sql, &[&id]);

        let sql = format!(
            "DELETE FROM {} WHERE ID NOT IN (SELECT DISTINCT NAME_ID FROM {})",
            arr.id_table, arr.arr_table
        );
        sqlite::exec(conn, &sql, &[]);
    }

    let sql = format!("DELETE FROM objects WHERE \"{}\" = ?", META_DB_ID);
    sqlite::exec(conn, &sql, &[&id]);
}

fn update_parent_on_delete(
    conn: &Connection,
    id: i64,
    otype: ObjectType,
    parent_type: ObjectType,
    del_flags: u32,
) {
    let tab = schema::object_table(otype);
    let where_clause = format!("WHERE \"{}\" = ?", META_DB_ID);

    let obj_m = match query_partial(
        conn,
        tab,
        &[META_DB_ID, META_APPROX_DURATION, META_PARENT_ID],
        &where_clause,
        &[&id],
    ) {
        Some(m) => m,
        None => return,
    };

    let parent_id = match get_i64(&obj_m, META_PARENT_ID) {
        Some(p) if p > 0 && p != id => p,
        _ => return,
    };

    let parent_tab = schema::object_table(parent_type);
    let parent_cols: &[&str] = match parent_type {
        ObjectType::Movie => &[META_DB_ID, META_APPROX_DURATION],
        ObjectType::TvShow => &[META_DB_ID, META_NUM_CHILDREN],
        _ => &[META_DB_ID, META_APPROX_DURATION, META_NUM_CHILDREN],
    };

    let mut parent_m = match query_partial(
        conn,
        parent_tab,
        parent_cols,
        &where_clause,
        &[&parent_id],
    ) {
        Some(m) => m,
        None => return,
    };

    if let Some(parent_duration) = get_i64(&parent_m, META_APPROX_DURATION) {
        let duration = get_i64(&obj_m, META_APPROX_DURATION).unwrap_or(0);
        let parent_duration = parent_duration - duration;

        if parent_duration <= 0 {
            delete_object(conn, parent_id, parent_type, del_flags & !DEL_FLAG_PARENT);
            return;
        }
        set_i64(&mut parent_m, META_APPROX_DURATION, parent_duration);
    }

    if let Some(num_children) = get_i64(&parent_m, META_NUM_CHILDREN) {
        if num_children > 0 {
            let num_children = num_children - 1;

            if num_children <= 0 {
                delete_object(conn, parent_id, parent_type, del_flags & !DEL_FLAG_PARENT);
                return;
            }
            set_i64(&mut parent_m, META_NUM_CHILDREN, num_children);
        }
    }

    update_object(conn, &track_from_metadata(parent_m), parent_tab);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{movie_track, song_track, test_conn};

    fn count(conn: &Connection, sql: &str) -> i64 {
        sqlite::query_i64(conn, sql, &[])
    }

    #[test]
    fn create_object_allocates_sequential_ids() {
        let conn = test_conn();
        assert_eq!(create_object(&conn, ObjectType::Song), 1);
        assert_eq!(create_object(&conn, ObjectType::Movie), 2);
        assert_eq!(object_type(&conn, 2), Some(ObjectType::Movie));
        assert_eq!(object_type(&conn, 99), None);
    }

    #[test]
    fn add_song_creates_album_and_rows() {
        let conn = test_conn();
        let mut song = song_track("One", "Foo", "Rock", "First", 100);

        let id = add_object(&conn, &mut song, 1, -1);
        assert!(id > 0);

        // one album row, one song row, two object rows
        assert_eq!(count(&conn, "SELECT count(*) FROM songs"), 1);
        assert_eq!(count(&conn, "SELECT count(*) FROM albums"), 1);
        assert_eq!(count(&conn, "SELECT count(*) FROM objects"), 2);

        let obj = query_object(&conn, id, None).unwrap();
        let m = metadata(&obj).unwrap();
        assert_eq!(get_string(m, META_TITLE), Some("One"));
        assert_eq!(string_array(m, META_ARTIST), vec!["Foo"]);
        assert_eq!(string_array(m, META_GENRE), vec!["Rock"]);
        assert_eq!(get_string(m, META_ALBUM), Some("First"));
        assert_eq!(get_string(m, META_CLASS), Some(CLASS_SONG));

        let src = src(&obj).unwrap();
        assert!(get_string(src, META_URI).unwrap().contains("One"));
    }

    #[test]
    fn album_aggregates_follow_adds_and_deletes() {
        let conn = test_conn();

        let s1 = add_object(&conn, &mut song_track("One", "Foo", "Rock", "First", 100), 1, -1);
        let s2 = add_object(&conn, &mut song_track("Two", "Foo", "Rock", "First", 50), 1, -1);
        assert!(s1 > 0 && s2 > 0);

        assert_eq!(count(&conn, "SELECT count(*) FROM albums"), 1);
        let album_id = sqlite::query_i64(&conn, "SELECT DBID FROM albums", &[]);

        let album = query_object(&conn, album_id, None).unwrap();
        let m = metadata(&album).unwrap();
        assert_eq!(get_i64(m, META_NUM_CHILDREN), Some(2));
        assert_eq!(get_i64(m, META_APPROX_DURATION), Some(150));

        delete_object(&conn, s2, ObjectType::Song, DEL_FLAG_ALL);

        let album = query_object(&conn, album_id, None).unwrap();
        let m = metadata(&album).unwrap();
        assert_eq!(get_i64(m, META_NUM_CHILDREN), Some(1));
        assert_eq!(get_i64(m, META_APPROX_DURATION), Some(100));

        // deleting the last song removes the album itself
        delete_object(&conn, s1, ObjectType::Song, DEL_FLAG_ALL);
        assert!(query_object(&conn, album_id, None).is_none());
        assert_eq!(count(&conn, "SELECT count(*) FROM albums"), 0);
        assert_eq!(count(&conn, "SELECT count(*) FROM objects"), 0);
    }

    #[test]
    fn orphaned_names_are_removed() {
        let conn = test_conn();

        let s1 = add_object(&conn, &mut song_track("One", "Foo", "Rock", "A", 10), 1, -1);
        let s2 = add_object(&conn, &mut song_track("Two", "Bar", "Rock", "B", 10), 1, -1);

        assert_eq!(count(&conn, "SELECT count(*) FROM song_artists"), 2);
        assert_eq!(count(&conn, "SELECT count(*) FROM song_genres"), 1);

        delete_object(&conn, s1, ObjectType::Song, DEL_FLAG_ALL);

        // "Foo" has no songs left; "Rock" is still referenced by s2
        assert_eq!(count(&conn, "SELECT count(*) FROM song_artists"), 1);
        assert_eq!(count(&conn, "SELECT count(*) FROM song_genres"), 1);

        delete_object(&conn, s2, ObjectType::Song, DEL_FLAG_ALL);
        assert_eq!(count(&conn, "SELECT count(*) FROM song_artists"), 0);
        assert_eq!(count(&conn, "SELECT count(*) FROM song_genres"), 0);
    }

    #[test]
    fn single_part_movie_is_stored_as_part_plus_movie() {
        let conn = test_conn();

        let mut movie = movie_track("Heat", 1995, "/m/heat.mkv", 120);
        let part_id = add_object(&conn, &mut movie, 1, -1);
        assert!(part_id > 0);

        assert_eq!(count(&conn, "SELECT count(*) FROM movie_parts"), 1);
        assert_eq!(count(&conn, "SELECT count(*) FROM movies"), 1);

        // the movie row points at itself
        let movie_id = sqlite::query_i64(&conn, "SELECT DBID FROM movies", &[]);
        let parent = sqlite::id_to_id(&conn, "movies", META_PARENT_ID, META_DB_ID, movie_id);
        assert_eq!(parent, movie_id);

        // the part points at the movie
        let part_parent =
            sqlite::id_to_id(&conn, "movie_parts", META_PARENT_ID, META_DB_ID, part_id);
        assert_eq!(part_parent, movie_id);

        // browsing the movie includes its part list
        let obj = query_object(&conn, movie_id, None).unwrap();
        let parts = obj.get(META_PARTS).and_then(|p| p.as_array()).unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(
            parts[0].get(META_URI).and_then(|v| v.as_str()),
            Some("/m/heat.mkv")
        );

        // deleting the part cascades to the movie
        delete_object(&conn, part_id, ObjectType::MoviePart, DEL_FLAG_ALL);
        assert_eq!(count(&conn, "SELECT count(*) FROM movies"), 0);
        assert_eq!(count(&conn, "SELECT count(*) FROM movie_parts"), 0);
    }

    #[test]
    fn deleting_container_with_children_flag_removes_children() {
        let conn = test_conn();

        add_object(&conn, &mut song_track("One", "Foo", "Rock", "First", 10), 1, -1);
        add_object(&conn, &mut song_track("Two", "Foo", "Rock", "First", 10), 1, -1);

        let album_id = sqlite::query_i64(&conn, "SELECT DBID FROM albums", &[]);
        delete_object(&conn, album_id, ObjectType::Album, DEL_FLAG_CHILDREN);

        assert_eq!(count(&conn, "SELECT count(*) FROM songs"), 0);
        assert_eq!(count(&conn, "SELECT count(*) FROM albums"), 0);
        assert_eq!(count(&conn, "SELECT count(*) FROM objects"), 0);
    }

    #[test]
    fn update_object_writes_declared_columns_only() {
        let conn = test_conn();
        let id = add_object(&conn, &mut song_track("One", "Foo", "Rock", "A", 10), 1, -1);

        let mut m = Dict::new();
        set_i64(&mut m, META_DB_ID, id);
        set_string(&mut m, META_TITLE, "Renamed");
        set_i64(&mut m, META_NUM_ITEM_CHILDREN, 7); // convenience field, not stored
        set_string(&mut m, "NoSuchColumn", "x");

        update_object(
            &conn,
            &track_from_metadata(m),
            schema::object_table(ObjectType::Song),
        );

        let title = sqlite::id_to_string(&conn, "songs", META_TITLE, META_DB_ID, id);
        assert_eq!(title.as_deref(), Some("Renamed"));
    }

    #[test]
    fn date_aggregation_on_albums() {
        let conn = test_conn();

        let mut s1 = song_track("One", "Foo", "Rock", "First", 10);
        set_string(metadata_mut(&mut s1), META_DATE, "1990-01-01");
        add_object(&conn, &mut s1, 1, -1);

        let album_id = sqlite::query_i64(&conn, "SELECT DBID FROM albums", &[]);
        let date = sqlite::id_to_string(&conn, "albums", META_DATE, META_DB_ID, album_id);
        assert_eq!(date.as_deref(), Some("1990-01-01"));

        let mut s2 = song_track("Two", "Foo", "Rock", "First", 10);
        set_string(metadata_mut(&mut s2), META_DATE, "1992-01-01");
        add_object(&conn, &mut s2, 1, -1);

        let date = sqlite::id_to_string(&conn, "albums", META_DATE, META_DB_ID, album_id);
        assert_eq!(date.as_deref(), Some(DATE_UNDEFINED));
    }
}

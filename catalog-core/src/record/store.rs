//! Durable record store: a single `rusqlite::Connection` wrapping the `media` table,
//! owned by one [`RecordStore`] (single-threaded owner, borrowed under the catalog's
//! `RwLock` — one connection, borrowed per operation, rather than a thread-local
//! connection cache).

use std::collections::HashSet;
use std::path::Path;

use rusqlite::{params, Connection, ErrorCode};

use crate::error::RecordStoreError;
use crate::fingerprint::Hamming;
use crate::record::model::{Kind, KindMask, MediaId, MediaRecord, RelPath};

pub struct RecordStore {
    conn: Connection,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS media (
    id        INTEGER PRIMARY KEY NOT NULL,
    type      INTEGER NOT NULL,
    path      TEXT NOT NULL,
    width     INTEGER NOT NULL,
    height    INTEGER NOT NULL,
    md5       TEXT NOT NULL,
    phash_dct INTEGER NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS media_path_idx ON media (path);
CREATE INDEX IF NOT EXISTS media_md5_idx ON media (md5);
CREATE INDEX IF NOT EXISTS media_type_idx ON media (type);
";

impl RecordStore {
    /// Opens (creating if absent) the record store at `path`, e.g.
    /// `<root>/<index-dir>/index.db`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RecordStoreError> {
        let conn = Connection::open(path)?;
        Self::configure(&conn)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, RecordStoreError> {
        let conn = Connection::open_in_memory()?;
        Self::configure(&conn)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    fn configure(conn: &Connection) -> Result<(), RecordStoreError> {
        // LIKE must be case-sensitive, for both the LIKE and REGEXP queries.
        conn.pragma_update(None, "case_sensitive_like", true)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.create_scalar_function(
            "regexp",
            2,
            rusqlite::functions::FunctionFlags::SQLITE_DETERMINISTIC
                | rusqlite::functions::FunctionFlags::SQLITE_UTF8,
            |ctx| {
                // SQLite rewrites `X REGEXP Y` as `regexp(Y, X)`, so arg 0 is the pattern
                // and arg 1 is the value being matched.
                let pattern: String = ctx.get(0)?;
                let text: String = ctx.get(1)?;
                let re = regex::Regex::new(&pattern)
                    .map_err(|e| rusqlite::Error::UserFunctionError(Box::new(e)))?;
                Ok(re.is_match(&text))
            },
        )?;
        Ok(())
    }

    /// `max(id) + 1`, or `1` when the store is empty. Callers must read this under the
    /// catalog write lock and assign consecutive ids within the same transaction.
    pub fn next_id(&self) -> Result<u32, RecordStoreError> {
        let max: Option<i64> =
            self.conn.query_row("SELECT MAX(id) FROM media", [], |row| row.get(0))?;
        Ok(max.map(|m| m as u32 + 1).unwrap_or(1))
    }

    /// Inserts every record in a single transaction; fails atomically (the whole batch is
    /// rolled back) if any record's path already exists.
    pub fn insert_batch(&mut self, records: &[MediaRecord]) -> Result<(), RecordStoreError> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO media (id, type, path, width, height, md5, phash_dct)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for r in records {
                stmt.execute(params![
                    r.id.get(),
                    r.kind.bit() as i64,
                    r.rel_path.as_str(),
                    r.width,
                    r.height,
                    r.md5,
                    r.dct_hash.bits() as i64,
                ])
                .map_err(|e| duplicate_path_or(e, r.rel_path.as_str()))?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Deletes every id present, returning the subset that actually existed.
    pub fn delete(&mut self, ids: &[MediaId]) -> Result<HashSet<MediaId>, RecordStoreError> {
        let tx = self.conn.transaction()?;
        let mut deleted = HashSet::new();
        {
            let mut stmt = tx.prepare("DELETE FROM media WHERE id = ?1")?;
            for id in ids {
                if stmt.execute([id.get()])? > 0 {
                    deleted.insert(*id);
                }
            }
        }
        tx.commit()?;
        Ok(deleted)
    }

    pub fn set_md5(&mut self, id: MediaId, md5: &str) -> Result<(), RecordStoreError> {
        self.conn
            .execute("UPDATE media SET md5 = ?1 WHERE id = ?2", params![md5, id.get()])?;
        Ok(())
    }

    /// Point-updates a batch of `(id, new path)` pairs in one transaction, rolling back
    /// on the first failure (e.g. the new path collides with an existing one).
    pub fn update_paths(&mut self, pairs: &[(MediaId, RelPath)]) -> Result<(), RecordStoreError> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare("UPDATE media SET path = ?1 WHERE id = ?2")?;
            for (id, path) in pairs {
                stmt.execute(params![path.as_str(), id.get()])
                    .map_err(|e| duplicate_path_or(e, path.as_str()))?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn by_id(&self, id: MediaId) -> Result<Option<MediaRecord>, RecordStoreError> {
        let mut stmt = self.conn.prepare(&format!("{SELECT_COLS} WHERE id = ?1"))?;
        let mut rows = stmt.query_map([id.get()], row_to_record)?;
        rows.next().transpose().map_err(RecordStoreError::from)
    }

    pub fn by_ids(&self, ids: &[MediaId]) -> Result<Vec<MediaRecord>, RecordStoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = std::iter::repeat("?").take(ids.len()).collect::<Vec<_>>().join(",");
        let sql = format!("{SELECT_COLS} WHERE id IN ({placeholders})");
        let mut stmt = self.conn.prepare(&sql)?;
        let params = rusqlite::params_from_iter(ids.iter().map(|id| id.get()));
        let rows = stmt.query_map(params, row_to_record)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(RecordStoreError::from)
    }

    pub fn by_path(&self, path: &str) -> Result<Option<MediaRecord>, RecordStoreError> {
        let mut stmt = self.conn.prepare(&format!("{SELECT_COLS} WHERE path = ?1"))?;
        let mut rows = stmt.query_map([path], row_to_record)?;
        rows.next().transpose().map_err(RecordStoreError::from)
    }

    /// `pattern` is a raw SQL `LIKE` pattern; literal `_`/`%` must already be escaped by
    /// the caller with a backslash (see [`escape_like`]).
    pub fn by_path_like(&self, pattern: &str) -> Result<Vec<MediaRecord>, RecordStoreError> {
        let mut stmt =
            self.conn.prepare(&format!("{SELECT_COLS} WHERE path LIKE ?1 ESCAPE '\\'"))?;
        let rows = stmt.query_map([pattern], row_to_record)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(RecordStoreError::from)
    }

    pub fn by_path_regexp(&self, pattern: &str) -> Result<Vec<MediaRecord>, RecordStoreError> {
        let mut stmt = self.conn.prepare(&format!("{SELECT_COLS} WHERE path REGEXP ?1"))?;
        let rows = stmt.query_map([pattern], row_to_record)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(RecordStoreError::from)
    }

    pub fn by_md5(&self, md5: &str) -> Result<Vec<MediaRecord>, RecordStoreError> {
        let mut stmt = self.conn.prepare(&format!("{SELECT_COLS} WHERE md5 = ?1"))?;
        let rows = stmt.query_map([md5], row_to_record)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(RecordStoreError::from)
    }

    pub fn by_kind(&self, mask: KindMask) -> Result<Vec<MediaRecord>, RecordStoreError> {
        let mut stmt =
            self.conn.prepare(&format!("{SELECT_COLS} WHERE (type & ?1) != 0"))?;
        let rows = stmt.query_map([mask.raw() as i64], row_to_record)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(RecordStoreError::from)
    }

    pub fn count(&self, mask: KindMask) -> Result<u64, RecordStoreError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM media WHERE (type & ?1) != 0",
            [mask.raw() as i64],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    pub fn all_paths(&self) -> Result<Vec<RelPath>, RecordStoreError> {
        let mut stmt = self.conn.prepare("SELECT path FROM media")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for r in rows {
            out.push(RelPath::new(r?)?);
        }
        Ok(out)
    }

    /// Compacts on-disk storage. The caller must be holding the catalog's write lock.
    pub fn vacuum(&mut self) -> Result<(), RecordStoreError> {
        self.conn.execute_batch("VACUUM;")?;
        Ok(())
    }
}

const SELECT_COLS: &str = "SELECT id, type, path, width, height, md5, phash_dct FROM media";

fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<MediaRecord> {
    let id: i64 = row.get(0)?;
    let kind_raw: i64 = row.get(1)?;
    let path: String = row.get(2)?;
    let width: i64 = row.get(3)?;
    let height: i64 = row.get(4)?;
    let md5: String = row.get(5)?;
    let dct: i64 = row.get(6)?;

    let kind = Kind::from_db(kind_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            rusqlite::types::Type::Integer,
            format!("unrecognized kind bit {kind_raw}").into(),
        )
    })?;
    let rel_path = RelPath::new(path).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(MediaRecord {
        id: MediaId::new(id as u32),
        kind,
        rel_path,
        width: width as u32,
        height: height as u32,
        md5,
        dct_hash: Hamming::from_bits(dct as u64),
    })
}

fn duplicate_path_or(e: rusqlite::Error, path: &str) -> RecordStoreError {
    if let rusqlite::Error::SqliteFailure(ref inner, _) = e {
        if inner.code == ErrorCode::ConstraintViolation {
            return RecordStoreError::DuplicatePath(path.to_string());
        }
    }
    RecordStoreError::Sqlite(e)
}

/// Escapes `%`, `_` and the escape character itself with a backslash so `s` may be safely
/// embedded in a `LIKE ... ESCAPE '\'` pattern as a literal substring. Used by
/// `Catalog::move_dir` to build a prefix-match pattern.
pub fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod test {
    use super::*;

    fn rec(id: u32, path: &str, md5: &str) -> MediaRecord {
        MediaRecord {
            id: MediaId::new(id),
            kind: Kind::Image,
            rel_path: RelPath::new(path).unwrap(),
            width: 100,
            height: 100,
            md5: md5.to_string(),
            dct_hash: Hamming::from_bits(0),
        }
    }

    #[test]
    fn insert_then_fetch_is_byte_identical() {
        let mut store = RecordStore::open_in_memory().unwrap();
        let r = rec(1, "a/b.jpg", "deadbeef");
        store.insert_batch(&[r.clone()]).unwrap();
        assert_eq!(Some(r), store.by_id(MediaId::new(1)).unwrap());
    }

    #[test]
    fn next_id_is_max_plus_one() {
        let mut store = RecordStore::open_in_memory().unwrap();
        assert_eq!(1, store.next_id().unwrap());
        store.insert_batch(&[rec(1, "a.jpg", "x"), rec(5, "b.jpg", "y")]).unwrap();
        assert_eq!(6, store.next_id().unwrap());
    }

    #[test]
    fn duplicate_path_aborts_whole_batch() {
        let mut store = RecordStore::open_in_memory().unwrap();
        store.insert_batch(&[rec(1, "a.jpg", "x")]).unwrap();
        let err = store.insert_batch(&[rec(2, "b.jpg", "y"), rec(3, "a.jpg", "z")]);
        assert!(matches!(err, Err(RecordStoreError::DuplicatePath(_))));
        // the whole batch, including "b.jpg", must have been rolled back
        assert!(store.by_path("b.jpg").unwrap().is_none());
    }

    #[test]
    fn delete_returns_only_ids_that_existed() {
        let mut store = RecordStore::open_in_memory().unwrap();
        store.insert_batch(&[rec(1, "a.jpg", "x")]).unwrap();
        let deleted = store.delete(&[MediaId::new(1), MediaId::new(99)]).unwrap();
        assert_eq!(HashSet::from([MediaId::new(1)]), deleted);
        assert!(store.by_id(MediaId::new(1)).unwrap().is_none());
    }

    #[test]
    fn update_paths_rolls_back_on_first_collision() {
        let mut store = RecordStore::open_in_memory().unwrap();
        store.insert_batch(&[rec(1, "a.jpg", "x"), rec(2, "b.jpg", "y")]).unwrap();
        let err = store.update_paths(&[
            (MediaId::new(1), RelPath::new("c.jpg").unwrap()),
            (MediaId::new(2), RelPath::new("c.jpg").unwrap()),
        ]);
        assert!(err.is_err());
    }

    #[test]
    fn like_query_is_case_sensitive() {
        let mut store = RecordStore::open_in_memory().unwrap();
        store.insert_batch(&[rec(1, "Dir/A.jpg", "x")]).unwrap();
        assert_eq!(1, store.by_path_like("Dir/%").unwrap().len());
        assert_eq!(0, store.by_path_like("dir/%").unwrap().len());
    }

    #[test]
    fn like_query_honors_backslash_escape() {
        let mut store = RecordStore::open_in_memory().unwrap();
        store.insert_batch(&[rec(1, "a_b.jpg", "x"), rec(2, "axb.jpg", "y")]).unwrap();
        let pattern = format!("{}%", escape_like("a_b"));
        let hits = store.by_path_like(&pattern).unwrap();
        assert_eq!(1, hits.len());
        assert_eq!("a_b.jpg", hits[0].rel_path.as_str());
    }

    #[test]
    fn regexp_query_is_case_sensitive() {
        let mut store = RecordStore::open_in_memory().unwrap();
        store.insert_batch(&[rec(1, "Dir/A.jpg", "x")]).unwrap();
        assert_eq!(1, store.by_path_regexp("^Dir/").unwrap().len());
        assert_eq!(0, store.by_path_regexp("^dir/").unwrap().len());
    }

    #[test]
    fn by_kind_mask_filters() {
        let mut store = RecordStore::open_in_memory().unwrap();
        let mut video = rec(2, "v.mp4", "y");
        video.kind = Kind::Video;
        store.insert_batch(&[rec(1, "a.jpg", "x"), video]).unwrap();
        assert_eq!(1, store.by_kind(KindMask::of(Kind::Image)).unwrap().len());
        assert_eq!(2, store.by_kind(KindMask::ALL).unwrap().len());
    }
}

use crate::errors::{AppError, AppResult};
use crate::models::{Article, Man, ManFilter, PraiseRecord, Site, DEL_LIVE};
use chrono::Utc;
use once_cell::sync::Lazy;
use rusqlite::types::Value;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, ToSql};
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

const SCHEMA_SQL: &str = include_str!("schema.sql");

const SITE_COLUMNS: &str = "id, name, create_by, del, created_at";
const MAN_COLUMNS: &str = "id, name, cover, des, state, create_by, site_id, enable_comment, enable_praise, admins_json, del, created_at, updated_at";
const ARTICLE_COLUMNS: &str = "id, title, des, content, state, man_id, author_list_json, enable_comment, enable_praise, parent_id, idx, create_by, del, created_at, updated_at";

static LIKE_WILDCARDS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\\%_]").expect("valid regex"));

#[derive(Debug, Clone)]
pub struct NewMan {
    pub name: String,
    pub cover: Option<String>,
    pub des: Option<String>,
    pub state: i32,
    pub create_by: String,
    pub site_id: String,
    pub enable_comment: i32,
    pub enable_praise: i32,
}

#[derive(Debug, Clone, Default)]
pub struct ManPatch {
    pub name: Option<String>,
    pub cover: Option<String>,
    pub des: Option<String>,
    pub state: Option<i32>,
    pub del: Option<i32>,
    pub enable_comment: Option<i32>,
    pub enable_praise: Option<i32>,
    pub admins: Option<Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct NewArticle {
    pub title: String,
    pub des: Option<String>,
    pub content: Option<String>,
    pub state: i32,
    pub man_id: String,
    pub author_list: Vec<String>,
    pub enable_comment: i32,
    pub enable_praise: i32,
    pub parent_id: Option<String>,
    pub index: i64,
    pub create_by: String,
}

#[derive(Debug, Clone, Default)]
pub struct ArticlePatch {
    pub title: Option<String>,
    pub des: Option<String>,
    pub content: Option<String>,
    pub state: Option<i32>,
    pub author_list: Option<Vec<String>>,
    pub enable_comment: Option<i32>,
    pub enable_praise: Option<i32>,
    /// `Some(None)` detaches the article to the top level.
    pub parent_id: Option<Option<String>>,
    pub index: Option<i64>,
    pub del: Option<i32>,
}

/// Article lookup shared by the authored listing and the cross-author search.
#[derive(Debug, Clone, Default)]
pub struct ArticleQuery {
    pub title: Option<String>,
    pub des: Option<String>,
    pub search_key: Option<String>,
    pub state: Option<i32>,
    pub create_by: Option<String>,
    pub man_id: Option<String>,
    pub site_id: Option<String>,
    pub parent_id: Option<Option<String>>,
}

#[derive(Debug)]
pub struct Database {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl Database {
    pub fn new(path: &Path) -> AppResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| AppError::Io(err.to_string()))?;
        }
        let conn = Connection::open(path).map_err(AppError::from)?;
        conn.execute_batch(SCHEMA_SQL).map_err(AppError::from)?;

        Ok(Self {
            conn: Mutex::new(conn),
            db_path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn lock(&self) -> AppResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AppError::Internal("database mutex poisoned".to_string()))
    }

    pub fn insert_site(&self, create_by: &str, name: Option<&str>) -> AppResult<Site> {
        let now = Utc::now();
        let id = Uuid::new_v4().to_string();

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO sites (id, name, create_by, del, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id, name, create_by, DEL_LIVE, now],
        )?;

        Ok(Site {
            id,
            name: name.map(ToString::to_string),
            create_by: create_by.to_string(),
            del: DEL_LIVE,
            created_at: now,
        })
    }

    pub fn soft_delete_site(&self, site_id: &str) -> AppResult<bool> {
        let conn = self.lock()?;
        let changed = conn.execute("UPDATE sites SET del = 1 WHERE id = ?1 AND del = 0", [site_id])?;
        Ok(changed > 0)
    }

    pub fn get_site(&self, site_id: &str) -> AppResult<Option<Site>> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {} FROM sites WHERE id = ?1", SITE_COLUMNS),
            [site_id],
            parse_site_row,
        )
        .optional()
        .map_err(AppError::from)
    }

    pub fn count_live_sites(&self, site_id: &str, create_by: &str) -> AppResult<i64> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT COUNT(1) FROM sites WHERE id = ?1 AND del = 0 AND create_by = ?2",
            params![site_id, create_by],
            |row| row.get(0),
        )
        .map_err(AppError::from)
    }

    /// Inserts a manual. A live manual with the same name and creator makes
    /// the partial unique index reject the row, reported as a conflict.
    pub fn insert_man(&self, man: NewMan) -> AppResult<Man> {
        let now = Utc::now();
        let id = Uuid::new_v4().to_string();
        let admins: Vec<String> = Vec::new();

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO mans (
               id, name, cover, des, state, create_by, site_id, enable_comment, enable_praise,
               admins_json, del, created_at, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                id,
                man.name,
                man.cover,
                man.des,
                man.state,
                man.create_by,
                man.site_id,
                man.enable_comment,
                man.enable_praise,
                serde_json::to_value(&admins)?,
                DEL_LIVE,
                now,
                now,
            ],
        )
        .map_err(|err| unique_violation_or(err, "this man already exist"))?;

        Ok(Man {
            id,
            name: man.name,
            cover: man.cover,
            des: man.des,
            state: man.state,
            create_by: man.create_by,
            site_id: man.site_id,
            enable_comment: man.enable_comment,
            enable_praise: man.enable_praise,
            admins,
            del: DEL_LIVE,
            created_at: now,
            updated_at: now,
        })
    }

    /// Applies `patch` to the live manual `man_id` owned by `create_by` and
    /// returns the stored result, or `None` when no such manual exists.
    pub fn update_man(&self, man_id: &str, create_by: &str, patch: &ManPatch) -> AppResult<Option<Man>> {
        let mut sets: Vec<&str> = Vec::new();
        let mut values: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(name) = &patch.name {
            sets.push("name = ?");
            values.push(Box::new(name.clone()));
        }
        if let Some(cover) = &patch.cover {
            sets.push("cover = ?");
            values.push(Box::new(cover.clone()));
        }
        if let Some(des) = &patch.des {
            sets.push("des = ?");
            values.push(Box::new(des.clone()));
        }
        if let Some(state) = patch.state {
            sets.push("state = ?");
            values.push(Box::new(state));
        }
        if let Some(del) = patch.del {
            sets.push("del = ?");
            values.push(Box::new(del));
        }
        if let Some(enable_comment) = patch.enable_comment {
            sets.push("enable_comment = ?");
            values.push(Box::new(enable_comment));
        }
        if let Some(enable_praise) = patch.enable_praise {
            sets.push("enable_praise = ?");
            values.push(Box::new(enable_praise));
        }
        if let Some(admins) = &patch.admins {
            sets.push("admins_json = ?");
            values.push(Box::new(serde_json::to_value(admins)?));
        }
        sets.push("updated_at = ?");
        values.push(Box::new(Utc::now()));

        values.push(Box::new(man_id.to_string()));
        values.push(Box::new(create_by.to_string()));
        let sql = format!(
            "UPDATE mans SET {} WHERE id = ? AND del = 0 AND create_by = ?",
            sets.join(", ")
        );

        let conn = self.lock()?;
        let changed = conn
            .execute(&sql, rusqlite::params_from_iter(values.iter()))
            .map_err(|err| unique_violation_or(err, "this man already exist"))?;
        if changed == 0 {
            return Ok(None);
        }
        select_man(&conn, man_id)
    }

    pub fn get_man(&self, man_id: &str) -> AppResult<Option<Man>> {
        let conn = self.lock()?;
        select_man(&conn, man_id)
    }

    pub fn find_mans(&self, filter: &ManFilter) -> AppResult<Vec<Man>> {
        let mut query = format!("SELECT {} FROM mans WHERE del = 0", MAN_COLUMNS);
        let mut values: Vec<Value> = Vec::new();

        if let Some(name) = non_empty(&filter.name) {
            query.push_str(" AND name LIKE ? ESCAPE '\\'");
            values.push(Value::Text(like_pattern(name)));
        }
        if let Some(des) = non_empty(&filter.des) {
            query.push_str(" AND des LIKE ? ESCAPE '\\'");
            values.push(Value::Text(like_pattern(des)));
        }
        if let Some(state) = filter.state {
            query.push_str(" AND state = ?");
            values.push(Value::Integer(state.into()));
        }
        if let Some(create_by) = non_empty(&filter.create_by) {
            query.push_str(" AND create_by = ?");
            values.push(Value::Text(create_by.to_string()));
        }
        if let Some(site_id) = non_empty(&filter.site_id) {
            query.push_str(" AND site_id = ?");
            values.push(Value::Text(site_id.to_string()));
        }
        if let Some(enable_comment) = filter.enable_comment {
            query.push_str(" AND enable_comment = ?");
            values.push(Value::Integer(enable_comment.into()));
        }
        if let Some(enable_praise) = filter.enable_praise {
            query.push_str(" AND enable_praise = ?");
            values.push(Value::Integer(enable_praise.into()));
        }
        query.push_str(" ORDER BY created_at ASC, id ASC");

        let conn = self.lock()?;
        let mut statement = conn.prepare(&query)?;
        let rows = statement.query_map(rusqlite::params_from_iter(values.iter()), parse_man_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(AppError::from)
    }

    pub fn insert_article(&self, article: NewArticle) -> AppResult<Article> {
        let now = Utc::now();
        let id = Uuid::new_v4().to_string();

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO articles (
               id, title, des, content, state, man_id, author_list_json, enable_comment, enable_praise,
               parent_id, idx, create_by, del, created_at, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                id,
                article.title,
                article.des,
                article.content,
                article.state,
                article.man_id,
                serde_json::to_value(&article.author_list)?,
                article.enable_comment,
                article.enable_praise,
                article.parent_id,
                article.index,
                article.create_by,
                DEL_LIVE,
                now,
                now,
            ],
        )?;

        Ok(Article {
            id,
            title: article.title,
            des: article.des,
            content: article.content,
            state: article.state,
            man_id: article.man_id,
            author_list: article.author_list,
            enable_comment: article.enable_comment,
            enable_praise: article.enable_praise,
            parent_id: article.parent_id,
            index: article.index,
            create_by: article.create_by,
            del: DEL_LIVE,
            created_at: now,
            updated_at: now,
        })
    }

    /// Applies `patch` to the live article `article_id` authored by
    /// `create_by` in a live manual. Returns whether a row matched.
    pub fn update_article(&self, article_id: &str, create_by: &str, patch: &ArticlePatch) -> AppResult<bool> {
        let mut sets: Vec<&str> = Vec::new();
        let mut values: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(title) = &patch.title {
            sets.push("title = ?");
            values.push(Box::new(title.clone()));
        }
        if let Some(des) = &patch.des {
            sets.push("des = ?");
            values.push(Box::new(des.clone()));
        }
        if let Some(content) = &patch.content {
            sets.push("content = ?");
            values.push(Box::new(content.clone()));
        }
        if let Some(state) = patch.state {
            sets.push("state = ?");
            values.push(Box::new(state));
        }
        if let Some(author_list) = &patch.author_list {
            sets.push("author_list_json = ?");
            values.push(Box::new(serde_json::to_value(author_list)?));
        }
        if let Some(enable_comment) = patch.enable_comment {
            sets.push("enable_comment = ?");
            values.push(Box::new(enable_comment));
        }
        if let Some(enable_praise) = patch.enable_praise {
            sets.push("enable_praise = ?");
            values.push(Box::new(enable_praise));
        }
        if let Some(parent_id) = &patch.parent_id {
            sets.push("parent_id = ?");
            values.push(Box::new(parent_id.clone()));
        }
        if let Some(index) = patch.index {
            sets.push("idx = ?");
            values.push(Box::new(index));
        }
        if let Some(del) = patch.del {
            sets.push("del = ?");
            values.push(Box::new(del));
        }
        sets.push("updated_at = ?");
        values.push(Box::new(Utc::now()));

        values.push(Box::new(article_id.to_string()));
        values.push(Box::new(create_by.to_string()));
        let sql = format!(
            "UPDATE articles SET {} WHERE id = ? AND del = 0 AND create_by = ?
             AND man_id IN (SELECT id FROM mans WHERE del = 0)",
            sets.join(", ")
        );

        let conn = self.lock()?;
        let changed = conn.execute(&sql, rusqlite::params_from_iter(values.iter()))?;
        Ok(changed > 0)
    }

    pub fn get_article(&self, article_id: &str) -> AppResult<Option<Article>> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {} FROM articles WHERE id = ?1", ARTICLE_COLUMNS),
            [article_id],
            parse_article_row,
        )
        .optional()
        .map_err(AppError::from)
    }

    /// Live articles of live manuals matching `query`, in tree order:
    /// manual, parent, then sibling index.
    pub fn find_articles(&self, query: &ArticleQuery) -> AppResult<Vec<Article>> {
        let mut sql = format!(
            "SELECT {} FROM articles WHERE del = 0 AND man_id IN (SELECT id FROM mans WHERE del = 0)",
            ARTICLE_COLUMNS
        );
        let mut values: Vec<Value> = Vec::new();

        if let Some(title) = non_empty(&query.title) {
            sql.push_str(" AND title LIKE ? ESCAPE '\\'");
            values.push(Value::Text(like_pattern(title)));
        }
        if let Some(des) = non_empty(&query.des) {
            sql.push_str(" AND des LIKE ? ESCAPE '\\'");
            values.push(Value::Text(like_pattern(des)));
        }
        if let Some(key) = non_empty(&query.search_key) {
            sql.push_str(" AND (title LIKE ? ESCAPE '\\' OR des LIKE ? ESCAPE '\\' OR content LIKE ? ESCAPE '\\')");
            let pattern = like_pattern(key);
            values.push(Value::Text(pattern.clone()));
            values.push(Value::Text(pattern.clone()));
            values.push(Value::Text(pattern));
        }
        if let Some(state) = query.state {
            sql.push_str(" AND state = ?");
            values.push(Value::Integer(state.into()));
        }
        if let Some(create_by) = non_empty(&query.create_by) {
            sql.push_str(" AND create_by = ?");
            values.push(Value::Text(create_by.to_string()));
        }
        if let Some(man_id) = non_empty(&query.man_id) {
            sql.push_str(" AND man_id = ?");
            values.push(Value::Text(man_id.to_string()));
        }
        if let Some(site_id) = non_empty(&query.site_id) {
            sql.push_str(" AND man_id IN (SELECT id FROM mans WHERE site_id = ?)");
            values.push(Value::Text(site_id.to_string()));
        }
        match &query.parent_id {
            Some(Some(parent_id)) => {
                sql.push_str(" AND parent_id = ?");
                values.push(Value::Text(parent_id.clone()));
            }
            Some(None) => sql.push_str(" AND parent_id IS NULL"),
            None => {}
        }
        sql.push_str(" ORDER BY man_id ASC, parent_id ASC, idx ASC, created_at ASC");

        let conn = self.lock()?;
        let mut statement = conn.prepare(&sql)?;
        let rows = statement.query_map(rusqlite::params_from_iter(values.iter()), parse_article_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(AppError::from)
    }

    /// Sets the praise flag for `(create_by, article_id)` in one statement.
    /// Activating upserts the single record; deactivating only touches an
    /// active record. Repeating the same flag changes nothing.
    pub fn set_praise(&self, create_by: &str, article_id: &str, praise: bool) -> AppResult<Option<PraiseRecord>> {
        let now = Utc::now();
        let conn = self.lock()?;
        if praise {
            conn.execute(
                "INSERT INTO praises (create_by, article_id, praise, updated_at) VALUES (?1, ?2, 1, ?3)
                 ON CONFLICT(create_by, article_id)
                 DO UPDATE SET praise = 1, updated_at = excluded.updated_at WHERE praises.praise = 0",
                params![create_by, article_id, now],
            )?;
        } else {
            conn.execute(
                "UPDATE praises SET praise = 0, updated_at = ?1 WHERE create_by = ?2 AND article_id = ?3 AND praise = 1",
                params![now, create_by, article_id],
            )?;
        }
        select_praise(&conn, create_by, article_id)
    }

    pub fn get_praise(&self, create_by: &str, article_id: &str) -> AppResult<Option<PraiseRecord>> {
        let conn = self.lock()?;
        select_praise(&conn, create_by, article_id)
    }

    pub fn count_praise(&self, article_id: &str) -> AppResult<i64> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT COUNT(1) FROM praises WHERE article_id = ?1 AND praise = 1",
            [article_id],
            |row| row.get(0),
        )
        .map_err(AppError::from)
    }

    pub fn list_praise(&self, article_id: &str) -> AppResult<Vec<PraiseRecord>> {
        let conn = self.lock()?;
        let mut statement = conn.prepare(
            "SELECT create_by, article_id, praise, updated_at FROM praises
             WHERE article_id = ?1 ORDER BY updated_at ASC",
        )?;
        let rows = statement.query_map([article_id], parse_praise_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(AppError::from)
    }
}

fn select_man(conn: &Connection, man_id: &str) -> AppResult<Option<Man>> {
    conn.query_row(
        &format!("SELECT {} FROM mans WHERE id = ?1", MAN_COLUMNS),
        [man_id],
        parse_man_row,
    )
    .optional()
    .map_err(AppError::from)
}

fn select_praise(conn: &Connection, create_by: &str, article_id: &str) -> AppResult<Option<PraiseRecord>> {
    conn.query_row(
        "SELECT create_by, article_id, praise, updated_at FROM praises WHERE create_by = ?1 AND article_id = ?2",
        params![create_by, article_id],
        parse_praise_row,
    )
    .optional()
    .map_err(AppError::from)
}

fn unique_violation_or(err: rusqlite::Error, conflict_message: &str) -> AppError {
    match &err {
        rusqlite::Error::SqliteFailure(failure, _) if failure.code == ErrorCode::ConstraintViolation => {
            AppError::Conflict(conflict_message.to_string())
        }
        _ => AppError::from(err),
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|raw| !raw.is_empty())
}

/// Case-insensitive substring pattern with LIKE wildcards escaped.
fn like_pattern(raw: &str) -> String {
    format!("%{}%", LIKE_WILDCARDS.replace_all(raw, "\\$0"))
}

fn parse_site_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Site> {
    Ok(Site {
        id: row.get(0)?,
        name: row.get(1)?,
        create_by: row.get(2)?,
        del: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn parse_man_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Man> {
    let admins_raw: serde_json::Value = row.get(9)?;
    Ok(Man {
        id: row.get(0)?,
        name: row.get(1)?,
        cover: row.get(2)?,
        des: row.get(3)?,
        state: row.get(4)?,
        create_by: row.get(5)?,
        site_id: row.get(6)?,
        enable_comment: row.get(7)?,
        enable_praise: row.get(8)?,
        admins: serde_json::from_value(admins_raw).unwrap_or_default(),
        del: row.get(10)?,
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
    })
}

fn parse_article_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Article> {
    let authors_raw: serde_json::Value = row.get(6)?;
    Ok(Article {
        id: row.get(0)?,
        title: row.get(1)?,
        des: row.get(2)?,
        content: row.get(3)?,
        state: row.get(4)?,
        man_id: row.get(5)?,
        author_list: serde_json::from_value(authors_raw).unwrap_or_default(),
        enable_comment: row.get(7)?,
        enable_praise: row.get(8)?,
        parent_id: row.get(9)?,
        index: row.get(10)?,
        create_by: row.get(11)?,
        del: row.get(12)?,
        created_at: row.get(13)?,
        updated_at: row.get(14)?,
    })
}

fn parse_praise_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PraiseRecord> {
    Ok(PraiseRecord {
        create_by: row.get(0)?,
        article_id: row.get(1)?,
        praise: row.get::<_, i32>(2)? != 0,
        updated_at: row.get(3)?,
    })
}

//! SQLite-backed record store
//!
//! Reads the desktop application's database. The pool is opened read-only
//! unless writes are unlocked, so a denied mutation can never reach disk
//! even through a bug in the dispatch path.

use super::{
    Attachment, IndexCounts, LookupQuery, Major, Member, MemberQuery, MutationStore, Record,
    RecordFilter, RecordOrder, RecordQuery, RecordStore, School, SearchQuery, StatsSummary,
    LATEST_RECORDS,
};
use crate::error::StoreError;
use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{FromRow, QueryBuilder, Row, Sqlite};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info, warn};

/// Tables the store reads
///
/// Matches the layout the desktop application maintains. Exposed so tests
/// and fixtures can build a compatible database.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS awards (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    competition_name TEXT NOT NULL,
    award_date TEXT NOT NULL,
    level TEXT NOT NULL,
    rank TEXT NOT NULL,
    certificate_code TEXT,
    remarks TEXT,
    attachment_folder TEXT,
    deleted INTEGER NOT NULL DEFAULT 0,
    deleted_at TEXT
);
CREATE TABLE IF NOT EXISTS team_members (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    gender TEXT,
    id_card TEXT UNIQUE,
    phone TEXT,
    student_id TEXT UNIQUE,
    email TEXT,
    school TEXT,
    school_code TEXT,
    major TEXT,
    major_code TEXT,
    class_name TEXT,
    college TEXT,
    pinyin TEXT,
    active INTEGER NOT NULL DEFAULT 1,
    sort_index INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS award_members (
    award_id INTEGER NOT NULL REFERENCES awards(id) ON DELETE CASCADE,
    member_id INTEGER NOT NULL REFERENCES team_members(id) ON DELETE CASCADE,
    PRIMARY KEY (award_id, member_id)
);
CREATE TABLE IF NOT EXISTS attachments (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    award_id INTEGER NOT NULL REFERENCES awards(id) ON DELETE CASCADE,
    stored_name TEXT NOT NULL,
    original_name TEXT NOT NULL,
    relative_path TEXT NOT NULL UNIQUE,
    file_md5 TEXT,
    file_size INTEGER,
    deleted INTEGER NOT NULL DEFAULT 0,
    deleted_at TEXT
);
CREATE TABLE IF NOT EXISTS majors (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    code TEXT,
    pinyin TEXT,
    category TEXT,
    discipline_code TEXT,
    discipline_name TEXT,
    class_code TEXT,
    class_name TEXT
);
CREATE TABLE IF NOT EXISTS schools (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    code TEXT,
    pinyin TEXT,
    region TEXT
);
"#;

const AWARD_COLUMNS: &str = "a.id, a.competition_name, a.award_date, a.level, a.rank, \
     a.certificate_code, a.remarks, a.attachment_folder, a.deleted, a.deleted_at";

const MEMBER_COLUMNS: &str = "m.id, m.name, m.gender, m.id_card, m.phone, m.student_id, \
     m.email, m.school, m.school_code, m.major, m.major_code, m.class_name, m.college, \
     m.pinyin, m.active, m.sort_index";

#[derive(Debug, FromRow)]
struct AwardRow {
    id: i64,
    competition_name: String,
    award_date: String,
    level: String,
    rank: String,
    certificate_code: Option<String>,
    remarks: Option<String>,
    attachment_folder: Option<String>,
    deleted: bool,
    deleted_at: Option<String>,
}

impl AwardRow {
    fn into_record(self) -> Result<Record, StoreError> {
        // Some rows carry a time component after the date
        let date_part = self.award_date.get(..10).unwrap_or(&self.award_date);
        let award_date = NaiveDate::parse_from_str(date_part, "%Y-%m-%d").map_err(|e| {
            StoreError::Invalid(format!(
                "award {} has unreadable date `{}`: {}",
                self.id, self.award_date, e
            ))
        })?;

        Ok(Record {
            id: self.id,
            competition_name: self.competition_name,
            award_date,
            level: self.level,
            rank: self.rank,
            certificate_code: self.certificate_code,
            remarks: self.remarks,
            attachment_folder: self.attachment_folder,
            deleted: self.deleted,
            deleted_at: self.deleted_at,
            members: Vec::new(),
            attachments: None,
        })
    }
}

#[derive(Debug, FromRow)]
struct MemberRow {
    id: i64,
    name: String,
    gender: Option<String>,
    id_card: Option<String>,
    phone: Option<String>,
    student_id: Option<String>,
    email: Option<String>,
    school: Option<String>,
    school_code: Option<String>,
    major: Option<String>,
    major_code: Option<String>,
    class_name: Option<String>,
    college: Option<String>,
    pinyin: Option<String>,
    active: bool,
    sort_index: i64,
}

impl From<MemberRow> for Member {
    fn from(row: MemberRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            gender: row.gender,
            id_card: row.id_card,
            phone: row.phone,
            student_id: row.student_id,
            email: row.email,
            school: row.school,
            school_code: row.school_code,
            major: row.major,
            major_code: row.major_code,
            class_name: row.class_name,
            college: row.college,
            pinyin: row.pinyin,
            active: row.active,
            sort_index: row.sort_index,
        }
    }
}

#[derive(Debug, FromRow)]
struct MemberLink {
    award_id: i64,
    #[sqlx(flatten)]
    member: MemberRow,
}

#[derive(Debug, FromRow)]
struct AttachmentRow {
    id: i64,
    award_id: i64,
    stored_name: String,
    original_name: String,
    relative_path: String,
    file_md5: Option<String>,
    file_size: Option<i64>,
    deleted: bool,
}

impl From<AttachmentRow> for Attachment {
    fn from(row: AttachmentRow) -> Self {
        Self {
            id: row.id,
            record_id: row.award_id,
            stored_name: row.stored_name,
            original_name: row.original_name,
            relative_path: row.relative_path,
            file_md5: row.file_md5,
            file_size: row.file_size,
            deleted: row.deleted,
        }
    }
}

#[derive(Debug, FromRow)]
struct MajorRow {
    id: i64,
    name: String,
    code: Option<String>,
    pinyin: Option<String>,
    category: Option<String>,
    discipline_code: Option<String>,
    discipline_name: Option<String>,
    class_code: Option<String>,
    class_name: Option<String>,
}

impl From<MajorRow> for Major {
    fn from(row: MajorRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            code: row.code,
            pinyin: row.pinyin,
            category: row.category,
            discipline_code: row.discipline_code,
            discipline_name: row.discipline_name,
            class_code: row.class_code,
            class_name: row.class_name,
        }
    }
}

#[derive(Debug, FromRow)]
struct SchoolRow {
    id: i64,
    name: String,
    code: Option<String>,
    pinyin: Option<String>,
    region: Option<String>,
}

impl From<SchoolRow> for School {
    fn from(row: SchoolRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            code: row.code,
            pinyin: row.pinyin,
            region: row.region,
        }
    }
}

fn order_clause(order: RecordOrder) -> &'static str {
    match order {
        RecordOrder::AwardDateDesc => " ORDER BY a.award_date DESC, a.id DESC",
        RecordOrder::AwardDateAsc => " ORDER BY a.award_date ASC, a.id ASC",
        RecordOrder::CompetitionNameAsc => " ORDER BY a.competition_name ASC, a.id DESC",
        RecordOrder::CompetitionNameDesc => " ORDER BY a.competition_name DESC, a.id DESC",
    }
}

fn push_filter(qb: &mut QueryBuilder<'_, Sqlite>, filter: &RecordFilter) {
    if !filter.include_deleted {
        qb.push(" AND a.deleted = 0");
    }
    if let Some(level) = &filter.level {
        qb.push(" AND a.level = ").push_bind(level.clone());
    }
    if let Some(rank) = &filter.rank {
        qb.push(" AND a.rank = ").push_bind(rank.clone());
    }
    if let Some(start) = filter.start_date {
        qb.push(" AND a.award_date >= ")
            .push_bind(start.format("%Y-%m-%d").to_string());
    }
    if let Some(end) = filter.end_date {
        // Include stored values carrying a time suffix on the end date
        qb.push(" AND substr(a.award_date, 1, 10) <= ")
            .push_bind(end.format("%Y-%m-%d").to_string());
    }
}

/// `%term%` with LIKE wildcards escaped
fn like_pattern(term: &str) -> String {
    let escaped = term
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

/// Quote free text as a single FTS5 phrase
fn fts_phrase(term: &str) -> String {
    format!("\"{}\"", term.replace('"', "\"\""))
}

fn is_missing_table(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.message().contains("no such table"))
}

/// Record store over the application's SQLite database
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    writable: bool,
}

impl SqliteStore {
    /// Open an existing database file
    ///
    /// The connection is read-only unless `writable` is set. A missing file
    /// is reported as unavailable rather than created.
    pub async fn open(path: &Path, writable: bool) -> Result<Self, StoreError> {
        if !path.is_file() {
            return Err(StoreError::Unavailable(format!(
                "database file {} does not exist",
                path.display()
            )));
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .read_only(!writable)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| {
                StoreError::Unavailable(format!("failed to open {}: {}", path.display(), e))
            })?;

        info!(path = %path.display(), writable, "Opened records database");
        Ok(Self { pool, writable })
    }

    /// Wrap an existing pool
    pub fn from_pool(pool: SqlitePool, writable: bool) -> Self {
        Self { pool, writable }
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// Close the pool, waiting for checked-out connections
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn load_members(&self, records: &mut [Record]) -> Result<(), StoreError> {
        if records.is_empty() {
            return Ok(());
        }

        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "SELECT am.award_id, {} FROM award_members am \
             JOIN team_members m ON m.id = am.member_id WHERE am.award_id IN (",
            MEMBER_COLUMNS
        ));
        let mut ids = qb.separated(", ");
        for record in records.iter() {
            ids.push_bind(record.id);
        }
        ids.push_unseparated(") ORDER BY m.sort_index, m.name");

        let links: Vec<MemberLink> = qb.build_query_as().fetch_all(&self.pool).await?;
        let mut by_award: HashMap<i64, Vec<Member>> = HashMap::new();
        for link in links {
            by_award
                .entry(link.award_id)
                .or_default()
                .push(link.member.into());
        }

        for record in records.iter_mut() {
            record.members = by_award.remove(&record.id).unwrap_or_default();
        }
        Ok(())
    }

    async fn finish(&self, rows: Vec<AwardRow>) -> Result<Vec<Record>, StoreError> {
        let mut records = rows
            .into_iter()
            .map(AwardRow::into_record)
            .collect::<Result<Vec<_>, _>>()?;
        self.load_members(&mut records).await?;
        Ok(records)
    }

    async fn search_fts(&self, query: &SearchQuery) -> Result<Vec<AwardRow>, sqlx::Error> {
        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {} FROM awards a JOIN awards_fts f ON f.rowid = a.id WHERE f MATCH ",
            AWARD_COLUMNS
        ));
        qb.push_bind(fts_phrase(query.text.trim()));
        push_filter(&mut qb, &query.filter);
        qb.push(" ORDER BY a.award_date DESC, a.id DESC LIMIT ")
            .push_bind(query.limit as i64);
        qb.build_query_as().fetch_all(&self.pool).await
    }

    async fn search_like(&self, query: &SearchQuery) -> Result<Vec<AwardRow>, sqlx::Error> {
        let pattern = like_pattern(query.text.trim());
        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {} FROM awards a WHERE (a.competition_name LIKE ",
            AWARD_COLUMNS
        ));
        qb.push_bind(pattern.clone())
            .push(" ESCAPE '\\' OR a.certificate_code LIKE ")
            .push_bind(pattern.clone())
            .push(" ESCAPE '\\' OR a.remarks LIKE ")
            .push_bind(pattern.clone())
            .push(
                " ESCAPE '\\' OR EXISTS (SELECT 1 FROM award_members am \
                 JOIN team_members m ON m.id = am.member_id \
                 WHERE am.award_id = a.id AND m.name LIKE ",
            )
            .push_bind(pattern)
            .push(" ESCAPE '\\'))");
        push_filter(&mut qb, &query.filter);
        qb.push(" ORDER BY a.award_date DESC, a.id DESC LIMIT ")
            .push_bind(query.limit as i64);
        qb.build_query_as().fetch_all(&self.pool).await
    }

    async fn count_by(&self, column: &str) -> Result<Vec<(String, i64)>, StoreError> {
        let sql = format!(
            "SELECT {col} AS name, COUNT(*) AS total FROM awards WHERE deleted = 0 \
             GROUP BY {col} ORDER BY {col}",
            col = column
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        Ok(rows
            .into_iter()
            .map(|row| (row.get("name"), row.get("total")))
            .collect())
    }
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn list_records(&self, query: &RecordQuery) -> Result<Vec<Record>, StoreError> {
        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {} FROM awards a WHERE 1 = 1",
            AWARD_COLUMNS
        ));
        push_filter(&mut qb, &query.filter);
        qb.push(order_clause(query.order));
        qb.push(" LIMIT ")
            .push_bind(query.limit as i64)
            .push(" OFFSET ")
            .push_bind(query.offset as i64);

        let rows: Vec<AwardRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        self.finish(rows).await
    }

    async fn search_records(&self, query: &SearchQuery) -> Result<Vec<Record>, StoreError> {
        if query.text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let rows = match self.search_fts(query).await {
            Ok(rows) => rows,
            Err(e) if is_missing_table(&e) => {
                debug!("Search index missing, falling back to LIKE scan");
                self.search_like(query).await?
            }
            Err(e) => return Err(e.into()),
        };
        self.finish(rows).await
    }

    async fn get_record(&self, id: i64, include_deleted: bool) -> Result<Record, StoreError> {
        let row: Option<AwardRow> = sqlx::query_as(&format!(
            "SELECT {} FROM awards a WHERE a.id = ?",
            AWARD_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let row = row
            .filter(|r| include_deleted || !r.deleted)
            .ok_or_else(|| StoreError::not_found("record", id))?;

        let mut records = self.finish(vec![row]).await?;
        let mut record = records
            .pop()
            .ok_or_else(|| StoreError::not_found("record", id))?;

        let attachments: Vec<AttachmentRow> = sqlx::query_as(
            "SELECT id, award_id, stored_name, original_name, relative_path, file_md5, \
             file_size, deleted FROM attachments WHERE award_id = ? AND deleted = 0 ORDER BY id",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        record.attachments = Some(attachments.into_iter().map(Attachment::from).collect());
        Ok(record)
    }

    async fn list_members(&self, query: &MemberQuery) -> Result<Vec<Member>, StoreError> {
        let rows: Vec<MemberRow> = sqlx::query_as(&format!(
            "SELECT {} FROM team_members m WHERE (? = 0 OR m.active = 1) \
             ORDER BY m.sort_index, m.name LIMIT ? OFFSET ?",
            MEMBER_COLUMNS
        ))
        .bind(query.active_only)
        .bind(query.limit as i64)
        .bind(query.offset as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Member::from).collect())
    }

    async fn get_member(&self, id: i64) -> Result<Member, StoreError> {
        let row: Option<MemberRow> = sqlx::query_as(&format!(
            "SELECT {} FROM team_members m WHERE m.id = ?",
            MEMBER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Member::from)
            .ok_or_else(|| StoreError::not_found("member", id))
    }

    async fn get_attachment(
        &self,
        record_id: i64,
        attachment_id: i64,
    ) -> Result<Attachment, StoreError> {
        let row: Option<AttachmentRow> = sqlx::query_as(
            "SELECT t.id, t.award_id, t.stored_name, t.original_name, t.relative_path, \
             t.file_md5, t.file_size, t.deleted FROM attachments t \
             JOIN awards a ON a.id = t.award_id \
             WHERE t.id = ? AND t.award_id = ? AND t.deleted = 0 AND a.deleted = 0",
        )
        .bind(attachment_id)
        .bind(record_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Attachment::from)
            .ok_or_else(|| StoreError::not_found("attachment", attachment_id))
    }

    async fn list_majors(&self, query: &LookupQuery) -> Result<Vec<Major>, StoreError> {
        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT id, name, code, pinyin, category, discipline_code, discipline_name, \
             class_code, class_name FROM majors",
        );
        if let Some(keyword) = query.keyword.as_deref().filter(|k| !k.trim().is_empty()) {
            let pattern = like_pattern(keyword.trim());
            qb.push(" WHERE name LIKE ")
                .push_bind(pattern.clone())
                .push(" ESCAPE '\\' OR code LIKE ")
                .push_bind(pattern.clone())
                .push(" ESCAPE '\\' OR pinyin LIKE ")
                .push_bind(pattern)
                .push(" ESCAPE '\\'");
        }
        qb.push(" ORDER BY name LIMIT ")
            .push_bind(query.limit as i64)
            .push(" OFFSET ")
            .push_bind(query.offset as i64);

        let rows: Vec<MajorRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(Major::from).collect())
    }

    async fn list_schools(&self, query: &LookupQuery) -> Result<Vec<School>, StoreError> {
        let mut qb =
            QueryBuilder::<Sqlite>::new("SELECT id, name, code, pinyin, region FROM schools");
        if let Some(keyword) = query.keyword.as_deref().filter(|k| !k.trim().is_empty()) {
            let pattern = like_pattern(keyword.trim());
            qb.push(" WHERE name LIKE ")
                .push_bind(pattern.clone())
                .push(" ESCAPE '\\' OR code LIKE ")
                .push_bind(pattern.clone())
                .push(" ESCAPE '\\' OR pinyin LIKE ")
                .push_bind(pattern)
                .push(" ESCAPE '\\'");
        }
        qb.push(" ORDER BY name LIMIT ")
            .push_bind(query.limit as i64)
            .push(" OFFSET ")
            .push_bind(query.offset as i64);

        let rows: Vec<SchoolRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(School::from).collect())
    }

    async fn stats_summary(&self) -> Result<StatsSummary, StoreError> {
        let total: i64 = sqlx::query("SELECT COUNT(*) AS total FROM awards WHERE deleted = 0")
            .fetch_one(&self.pool)
            .await?
            .get("total");

        let latest = self
            .list_records(&RecordQuery {
                limit: LATEST_RECORDS,
                ..RecordQuery::default()
            })
            .await?;

        Ok(StatsSummary {
            total,
            by_level: self.count_by("level").await?.into_iter().collect(),
            by_rank: self.count_by("rank").await?.into_iter().collect(),
            latest,
        })
    }
}

#[async_trait]
impl MutationStore for SqliteStore {
    async fn rebuild_search_index(&self) -> Result<IndexCounts, StoreError> {
        if !self.writable {
            warn!("Index rebuild requested on a read-only connection");
            return Err(StoreError::Invalid(
                "database was opened read-only".to_string(),
            ));
        }

        let mut tx = self.pool.begin().await?;
        sqlx::query("DROP TABLE IF EXISTS awards_fts")
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "CREATE VIRTUAL TABLE awards_fts USING fts5(\
             competition_name, certificate_code, remarks, member_names)",
        )
        .execute(&mut *tx)
        .await?;
        let inserted = sqlx::query(
            "INSERT INTO awards_fts (rowid, competition_name, certificate_code, remarks, member_names) \
             SELECT a.id, a.competition_name, COALESCE(a.certificate_code, ''), \
             COALESCE(a.remarks, ''), \
             COALESCE((SELECT group_concat(m.name, ' ') FROM award_members am \
                       JOIN team_members m ON m.id = am.member_id \
                       WHERE am.award_id = a.id), '') \
             FROM awards a WHERE a.deleted = 0",
        )
        .execute(&mut *tx)
        .await?
        .rows_affected();
        let members: i64 = sqlx::query("SELECT COUNT(*) AS total FROM team_members")
            .fetch_one(&mut *tx)
            .await?
            .get("total");
        tx.commit().await?;

        let counts = IndexCounts {
            records: inserted,
            members: members.max(0) as u64,
        };
        info!(records = counts.records, members = counts.members, "Rebuilt search index");
        Ok(counts)
    }
}

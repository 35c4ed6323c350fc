//! External collaborator interfaces
//!
//! The control-plane never owns persistence. It reaches the records database
//! through three narrow traits:
//!
//! - [`RecordStore`] - read/query access to records, members and lookups
//! - [`AttachmentReader`] - byte-range reads of attachment files
//! - [`MutationStore`] - the only write path, reachable once writes are unlocked
//!
//! Each call performs one bounded operation and releases its resources
//! before returning; no transaction outlives a tool invocation.

mod attachments;
mod memory;
mod sqlite;

pub use attachments::{guess_mime_type, FsAttachmentReader};
pub use memory::MemoryStore;
pub use sqlite::{SqliteStore, SCHEMA};

use crate::error::StoreError;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Largest page a list call returns
pub const MAX_PAGE_SIZE: u32 = 200;

/// Page size when the caller gives none
pub const DEFAULT_PAGE_SIZE: u32 = 50;

/// Number of records in the stats summary's latest list
pub const LATEST_RECORDS: u32 = 10;

/// Team member attached to award records
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: i64,
    pub name: String,
    pub gender: Option<String>,
    pub id_card: Option<String>,
    pub phone: Option<String>,
    pub student_id: Option<String>,
    pub email: Option<String>,
    pub school: Option<String>,
    pub school_code: Option<String>,
    pub major: Option<String>,
    pub major_code: Option<String>,
    pub class_name: Option<String>,
    pub college: Option<String>,
    pub pinyin: Option<String>,
    pub active: bool,
    pub sort_index: i64,
}

impl Member {
    /// A member with only a name set
    pub fn named(id: i64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            gender: None,
            id_card: None,
            phone: None,
            student_id: None,
            email: None,
            school: None,
            school_code: None,
            major: None,
            major_code: None,
            class_name: None,
            college: None,
            pinyin: None,
            active: true,
            sort_index: 0,
        }
    }
}

/// Attachment metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: i64,
    pub record_id: i64,
    pub stored_name: String,
    pub original_name: String,
    /// Path relative to the attachment root
    pub relative_path: String,
    pub file_md5: Option<String>,
    pub file_size: Option<i64>,
    pub deleted: bool,
}

/// An award record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: i64,
    pub competition_name: String,
    pub award_date: NaiveDate,
    pub level: String,
    pub rank: String,
    pub certificate_code: Option<String>,
    pub remarks: Option<String>,
    pub attachment_folder: Option<String>,
    pub deleted: bool,
    pub deleted_at: Option<String>,
    pub members: Vec<Member>,
    /// Present only on single-record fetches
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Vec<Attachment>>,
}

/// Academic major lookup row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Major {
    pub id: i64,
    pub name: String,
    pub code: Option<String>,
    pub pinyin: Option<String>,
    pub category: Option<String>,
    pub discipline_code: Option<String>,
    pub discipline_name: Option<String>,
    pub class_code: Option<String>,
    pub class_name: Option<String>,
}

/// School lookup row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct School {
    pub id: i64,
    pub name: String,
    pub code: Option<String>,
    pub pinyin: Option<String>,
    pub region: Option<String>,
}

/// Aggregate counts over live records
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSummary {
    pub total: i64,
    pub by_level: BTreeMap<String, i64>,
    pub by_rank: BTreeMap<String, i64>,
    pub latest: Vec<Record>,
}

/// Rows written by a search index rebuild
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexCounts {
    pub records: u64,
    pub members: u64,
}

/// Sort order for record listings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RecordOrder {
    #[default]
    AwardDateDesc,
    AwardDateAsc,
    CompetitionNameAsc,
    CompetitionNameDesc,
}

impl RecordOrder {
    /// Accepted wire names, in declaration order
    pub const NAMES: &'static [&'static str] = &[
        "award_date_desc",
        "award_date_asc",
        "competition_name_asc",
        "competition_name_desc",
    ];

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "award_date_desc" => Some(Self::AwardDateDesc),
            "award_date_asc" => Some(Self::AwardDateAsc),
            "competition_name_asc" => Some(Self::CompetitionNameAsc),
            "competition_name_desc" => Some(Self::CompetitionNameDesc),
            _ => None,
        }
    }
}

/// Clamp a caller-supplied page size into `1..=MAX_PAGE_SIZE`
pub fn clamp_limit(limit: Option<i64>) -> u32 {
    limit
        .unwrap_or(DEFAULT_PAGE_SIZE as i64)
        .clamp(1, MAX_PAGE_SIZE as i64) as u32
}

/// Clamp a caller-supplied offset to be non-negative
pub fn clamp_offset(offset: Option<i64>) -> u64 {
    offset.unwrap_or(0).max(0) as u64
}

/// Filters shared by listing and searching
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordFilter {
    pub include_deleted: bool,
    pub level: Option<String>,
    pub rank: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

impl RecordFilter {
    /// Whether a record passes the filter
    pub fn matches(&self, record: &Record) -> bool {
        (self.include_deleted || !record.deleted)
            && self.level.as_ref().map_or(true, |l| &record.level == l)
            && self.rank.as_ref().map_or(true, |r| &record.rank == r)
            && self.start_date.map_or(true, |d| record.award_date >= d)
            && self.end_date.map_or(true, |d| record.award_date <= d)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordQuery {
    pub limit: u32,
    pub offset: u64,
    pub filter: RecordFilter,
    pub order: RecordOrder,
}

impl Default for RecordQuery {
    fn default() -> Self {
        Self {
            limit: DEFAULT_PAGE_SIZE,
            offset: 0,
            filter: RecordFilter::default(),
            order: RecordOrder::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub text: String,
    pub limit: u32,
    pub filter: RecordFilter,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberQuery {
    pub limit: u32,
    pub offset: u64,
    pub active_only: bool,
}

/// Paged keyword lookup over majors or schools
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupQuery {
    pub limit: u32,
    pub offset: u64,
    pub keyword: Option<String>,
}

/// Bytes read from one attachment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentSlice {
    /// Total size of the file
    pub file_size: u64,
    /// Bytes starting at the requested offset
    pub bytes: Vec<u8>,
}

/// Read/query interface over records and members
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn list_records(&self, query: &RecordQuery) -> Result<Vec<Record>, StoreError>;

    /// Free-text search over competition name, certificate code, remarks and
    /// member names
    async fn search_records(&self, query: &SearchQuery) -> Result<Vec<Record>, StoreError>;

    /// Fetch one record with members and live attachments
    async fn get_record(&self, id: i64, include_deleted: bool) -> Result<Record, StoreError>;

    async fn list_members(&self, query: &MemberQuery) -> Result<Vec<Member>, StoreError>;

    async fn get_member(&self, id: i64) -> Result<Member, StoreError>;

    /// Attachment metadata; soft-deleted attachments and attachments of
    /// soft-deleted records are not found
    async fn get_attachment(
        &self,
        record_id: i64,
        attachment_id: i64,
    ) -> Result<Attachment, StoreError>;

    async fn list_majors(&self, query: &LookupQuery) -> Result<Vec<Major>, StoreError>;

    async fn list_schools(&self, query: &LookupQuery) -> Result<Vec<School>, StoreError>;

    async fn stats_summary(&self) -> Result<StatsSummary, StoreError>;
}

/// Byte-range reader over attachment files
#[async_trait]
pub trait AttachmentReader: Send + Sync {
    /// Size of the attachment file in bytes
    async fn size(&self, attachment: &Attachment) -> Result<u64, StoreError>;

    /// Read up to `length` bytes starting at `offset`
    async fn read_range(
        &self,
        attachment: &Attachment,
        offset: u64,
        length: u64,
    ) -> Result<AttachmentSlice, StoreError>;
}

/// Write interface, only reached when writes are unlocked
#[async_trait]
pub trait MutationStore: Send + Sync {
    async fn rebuild_search_index(&self) -> Result<IndexCounts, StoreError>;
}

/// The collaborators a registry dispatches to
#[derive(Clone)]
pub struct Collaborators {
    pub records: Arc<dyn RecordStore>,
    pub attachments: Arc<dyn AttachmentReader>,
    pub mutations: Option<Arc<dyn MutationStore>>,
}

impl Collaborators {
    pub fn new(records: Arc<dyn RecordStore>, attachments: Arc<dyn AttachmentReader>) -> Self {
        Self {
            records,
            attachments,
            mutations: None,
        }
    }

    pub fn with_mutations(mut self, mutations: Arc<dyn MutationStore>) -> Self {
        self.mutations = Some(mutations);
        self
    }

    /// Use one in-memory store for every interface
    pub fn memory(store: Arc<MemoryStore>) -> Self {
        Self::new(store.clone(), store.clone()).with_mutations(store)
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators")
            .field("mutations", &self.mutations.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(level: &str, date: &str, deleted: bool) -> Record {
        Record {
            id: 1,
            competition_name: "Robotics".into(),
            award_date: date.parse().unwrap(),
            level: level.into(),
            rank: "first".into(),
            certificate_code: None,
            remarks: None,
            attachment_folder: None,
            deleted,
            deleted_at: None,
            members: vec![],
            attachments: None,
        }
    }

    #[test]
    fn test_clamp_limit() {
        assert_eq!(clamp_limit(None), 50);
        assert_eq!(clamp_limit(Some(0)), 1);
        assert_eq!(clamp_limit(Some(-4)), 1);
        assert_eq!(clamp_limit(Some(10)), 10);
        assert_eq!(clamp_limit(Some(5000)), 200);
        assert_eq!(clamp_offset(Some(-3)), 0);
    }

    #[test]
    fn test_record_order_names() {
        for name in RecordOrder::NAMES {
            assert!(RecordOrder::parse(name).is_some());
        }
        assert_eq!(RecordOrder::parse("random"), None);
    }

    #[test]
    fn test_filter_matches() {
        let filter = RecordFilter {
            level: Some("national".into()),
            start_date: Some("2024-01-01".parse().unwrap()),
            ..Default::default()
        };
        assert!(filter.matches(&record("national", "2024-03-01", false)));
        assert!(!filter.matches(&record("national", "2023-12-31", false)));
        assert!(!filter.matches(&record("provincial", "2024-03-01", false)));
        assert!(!filter.matches(&record("national", "2024-03-01", true)));

        let with_deleted = RecordFilter {
            include_deleted: true,
            ..Default::default()
        };
        assert!(with_deleted.matches(&record("school", "2020-01-01", true)));
    }

    #[test]
    fn test_record_serializes_iso_date() {
        let value = serde_json::to_value(record("school", "2024-05-06", false)).unwrap();
        assert_eq!(value["award_date"], "2024-05-06");
        assert!(value.get("attachments").is_none());
    }
}

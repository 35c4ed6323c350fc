//! In-process store
//!
//! Backs tests and demos. Counts calls per interface so callers can assert
//! which collaborator was touched, and can be switched into a failing mode
//! to exercise upstream error handling.

use super::{
    Attachment, AttachmentReader, AttachmentSlice, IndexCounts, LookupQuery, Major, Member,
    MemberQuery, MutationStore, Record, RecordOrder, RecordQuery, RecordStore, School,
    SearchQuery, StatsSummary, LATEST_RECORDS,
};
use crate::error::StoreError;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

#[derive(Default)]
struct Data {
    records: BTreeMap<i64, Record>,
    members: BTreeMap<i64, Member>,
    attachments: BTreeMap<i64, Attachment>,
    blobs: HashMap<i64, Vec<u8>>,
    majors: Vec<Major>,
    schools: Vec<School>,
    index: IndexCounts,
}

/// In-memory implementation of every collaborator interface
#[derive(Default)]
pub struct MemoryStore {
    data: RwLock<Data>,
    query_calls: AtomicUsize,
    read_calls: AtomicUsize,
    mutation_calls: AtomicUsize,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a record; its members become visible to member queries too
    pub fn insert_record(&self, record: Record) {
        let mut data = self.data.write();
        for member in &record.members {
            data.members
                .entry(member.id)
                .or_insert_with(|| member.clone());
        }
        data.records.insert(record.id, record);
    }

    pub fn insert_member(&self, member: Member) {
        self.data.write().members.insert(member.id, member);
    }

    /// Add attachment metadata with its file contents
    pub fn insert_attachment(&self, attachment: Attachment, bytes: Vec<u8>) {
        let mut data = self.data.write();
        data.blobs.insert(attachment.id, bytes);
        data.attachments.insert(attachment.id, attachment);
    }

    pub fn insert_major(&self, major: Major) {
        self.data.write().majors.push(major);
    }

    pub fn insert_school(&self, school: School) {
        self.data.write().schools.push(school);
    }

    /// Make every call fail as if the database were gone
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Calls made through [`RecordStore`]
    pub fn query_calls(&self) -> usize {
        self.query_calls.load(Ordering::SeqCst)
    }

    /// Calls made through [`AttachmentReader`]
    pub fn read_calls(&self) -> usize {
        self.read_calls.load(Ordering::SeqCst)
    }

    /// Calls made through [`MutationStore`]
    pub fn mutation_calls(&self) -> usize {
        self.mutation_calls.load(Ordering::SeqCst)
    }

    /// Result of the last index rebuild
    pub fn index_counts(&self) -> IndexCounts {
        self.data.read().index
    }

    fn enter(&self, counter: &AtomicUsize) -> Result<(), StoreError> {
        counter.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store offline".into()));
        }
        Ok(())
    }

    fn page<T: Clone>(items: impl Iterator<Item = T>, offset: u64, limit: u32) -> Vec<T> {
        items.skip(offset as usize).take(limit as usize).collect()
    }
}

fn contains_ci(haystack: Option<&str>, needle: &str) -> bool {
    haystack.map_or(false, |h| h.to_lowercase().contains(needle))
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn list_records(&self, query: &RecordQuery) -> Result<Vec<Record>, StoreError> {
        self.enter(&self.query_calls)?;
        let data = self.data.read();
        let mut rows: Vec<Record> = data
            .records
            .values()
            .filter(|r| query.filter.matches(r))
            .cloned()
            .collect();

        match query.order {
            RecordOrder::AwardDateDesc => {
                rows.sort_by(|a, b| (b.award_date, b.id).cmp(&(a.award_date, a.id)))
            }
            RecordOrder::AwardDateAsc => {
                rows.sort_by(|a, b| (a.award_date, a.id).cmp(&(b.award_date, b.id)))
            }
            RecordOrder::CompetitionNameAsc => rows.sort_by(|a, b| {
                a.competition_name
                    .cmp(&b.competition_name)
                    .then(b.id.cmp(&a.id))
            }),
            RecordOrder::CompetitionNameDesc => rows.sort_by(|a, b| {
                b.competition_name
                    .cmp(&a.competition_name)
                    .then(b.id.cmp(&a.id))
            }),
        }

        Ok(Self::page(rows.into_iter(), query.offset, query.limit))
    }

    async fn search_records(&self, query: &SearchQuery) -> Result<Vec<Record>, StoreError> {
        self.enter(&self.query_calls)?;
        let needle = query.text.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(Vec::new());
        }

        let data = self.data.read();
        let rows = data
            .records
            .values()
            .filter(|r| query.filter.matches(r))
            .filter(|r| {
                contains_ci(Some(r.competition_name.as_str()), &needle)
                    || contains_ci(r.certificate_code.as_deref(), &needle)
                    || contains_ci(r.remarks.as_deref(), &needle)
                    || r.members.iter().any(|m| contains_ci(Some(m.name.as_str()), &needle))
            })
            .cloned();
        Ok(Self::page(rows, 0, query.limit))
    }

    async fn get_record(&self, id: i64, include_deleted: bool) -> Result<Record, StoreError> {
        self.enter(&self.query_calls)?;
        let data = self.data.read();
        let mut record = data
            .records
            .get(&id)
            .filter(|r| include_deleted || !r.deleted)
            .cloned()
            .ok_or_else(|| StoreError::not_found("record", id))?;

        record.attachments = Some(
            data.attachments
                .values()
                .filter(|a| a.record_id == id && !a.deleted)
                .cloned()
                .collect(),
        );
        Ok(record)
    }

    async fn list_members(&self, query: &MemberQuery) -> Result<Vec<Member>, StoreError> {
        self.enter(&self.query_calls)?;
        let data = self.data.read();
        let mut rows: Vec<Member> = data
            .members
            .values()
            .filter(|m| !query.active_only || m.active)
            .cloned()
            .collect();
        rows.sort_by(|a, b| (a.sort_index, &a.name).cmp(&(b.sort_index, &b.name)));
        Ok(Self::page(rows.into_iter(), query.offset, query.limit))
    }

    async fn get_member(&self, id: i64) -> Result<Member, StoreError> {
        self.enter(&self.query_calls)?;
        self.data
            .read()
            .members
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("member", id))
    }

    async fn get_attachment(
        &self,
        record_id: i64,
        attachment_id: i64,
    ) -> Result<Attachment, StoreError> {
        self.enter(&self.query_calls)?;
        let data = self.data.read();
        let record_live = data.records.get(&record_id).map_or(false, |r| !r.deleted);
        data.attachments
            .get(&attachment_id)
            .filter(|a| record_live && a.record_id == record_id && !a.deleted)
            .cloned()
            .ok_or_else(|| StoreError::not_found("attachment", attachment_id))
    }

    async fn list_majors(&self, query: &LookupQuery) -> Result<Vec<Major>, StoreError> {
        self.enter(&self.query_calls)?;
        let keyword = query.keyword.as_deref().map(str::to_lowercase);
        let data = self.data.read();
        let rows = data.majors.iter().filter(|m| match keyword.as_deref() {
            Some(k) => {
                contains_ci(Some(m.name.as_str()), k)
                    || contains_ci(m.code.as_deref(), k)
                    || contains_ci(m.pinyin.as_deref(), k)
            }
            None => true,
        });
        Ok(Self::page(rows.cloned(), query.offset, query.limit))
    }

    async fn list_schools(&self, query: &LookupQuery) -> Result<Vec<School>, StoreError> {
        self.enter(&self.query_calls)?;
        let keyword = query.keyword.as_deref().map(str::to_lowercase);
        let data = self.data.read();
        let rows = data.schools.iter().filter(|s| match keyword.as_deref() {
            Some(k) => contains_ci(Some(s.name.as_str()), k) || contains_ci(s.code.as_deref(), k),
            None => true,
        });
        Ok(Self::page(rows.cloned(), query.offset, query.limit))
    }

    async fn stats_summary(&self) -> Result<StatsSummary, StoreError> {
        self.enter(&self.query_calls)?;
        let data = self.data.read();
        let mut summary = StatsSummary::default();
        let mut live: Vec<&Record> = data.records.values().filter(|r| !r.deleted).collect();
        for record in &live {
            summary.total += 1;
            *summary.by_level.entry(record.level.clone()).or_default() += 1;
            *summary.by_rank.entry(record.rank.clone()).or_default() += 1;
        }
        live.sort_by(|a, b| (b.award_date, b.id).cmp(&(a.award_date, a.id)));
        summary.latest = live
            .into_iter()
            .take(LATEST_RECORDS as usize)
            .cloned()
            .collect();
        Ok(summary)
    }
}

#[async_trait]
impl AttachmentReader for MemoryStore {
    async fn size(&self, attachment: &Attachment) -> Result<u64, StoreError> {
        self.enter(&self.read_calls)?;
        self.data
            .read()
            .blobs
            .get(&attachment.id)
            .map(|b| b.len() as u64)
            .ok_or_else(|| StoreError::not_found("attachment file", &attachment.relative_path))
    }

    async fn read_range(
        &self,
        attachment: &Attachment,
        offset: u64,
        length: u64,
    ) -> Result<AttachmentSlice, StoreError> {
        self.enter(&self.read_calls)?;
        let data = self.data.read();
        let blob = data
            .blobs
            .get(&attachment.id)
            .ok_or_else(|| StoreError::not_found("attachment file", &attachment.relative_path))?;

        let size = blob.len() as u64;
        let start = offset.min(size) as usize;
        let end = offset.saturating_add(length).min(size) as usize;
        Ok(AttachmentSlice {
            file_size: size,
            bytes: blob[start..end].to_vec(),
        })
    }
}

#[async_trait]
impl MutationStore for MemoryStore {
    async fn rebuild_search_index(&self) -> Result<IndexCounts, StoreError> {
        self.enter(&self.mutation_calls)?;
        let mut data = self.data.write();
        let counts = IndexCounts {
            records: data.records.values().filter(|r| !r.deleted).count() as u64,
            members: data.members.len() as u64,
        };
        data.index = counts;
        Ok(counts)
    }
}

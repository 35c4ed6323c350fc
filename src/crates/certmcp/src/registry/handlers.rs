//! Tool handlers
//!
//! Arguments reaching a handler have already passed schema validation, so
//! the accessors below only need to deal with absent values.

use super::catalog::ToolKind;
use super::HandlerResult;
use crate::store::{
    clamp_limit, clamp_offset, guess_mime_type, Collaborators, LookupQuery, MemberQuery,
    RecordFilter, RecordOrder, RecordQuery, SearchQuery,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tooling::runtime::{Arguments, PolicySnapshot, ToolFailure};
use tooling::validation::parse_iso_date;

/// Server name reported by the health probe and the protocol handshake
pub const SERVER_NAME: &str = "certificate-management";

pub(super) async fn dispatch(
    kind: ToolKind,
    stores: &Collaborators,
    policy: &PolicySnapshot,
    args: &Arguments,
) -> HandlerResult {
    match kind {
        ToolKind::Health => Ok(health(policy)),
        ToolKind::ListRecords => list_records(stores, args).await,
        ToolKind::SearchRecords => search_records(stores, args).await,
        ToolKind::GetRecord => get_record(stores, args).await,
        ToolKind::ListMembers => list_members(stores, args).await,
        ToolKind::GetMember => get_member(stores, args).await,
        ToolKind::ReadAttachment => read_attachment(stores, policy, args).await,
        ToolKind::ListMajors => list_majors(stores, args).await,
        ToolKind::ListSchools => list_schools(stores, args).await,
        ToolKind::StatsSummary => stats_summary(stores).await,
        ToolKind::RebuildSearchIndex => rebuild_search_index(stores).await,
    }
}

fn int_arg(args: &Arguments, key: &str) -> Option<i64> {
    args.get(key).and_then(Value::as_i64)
}

fn bool_arg(args: &Arguments, key: &str) -> bool {
    args.get(key).and_then(Value::as_bool).unwrap_or(false)
}

fn str_arg<'a>(args: &'a Arguments, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str)
}

fn required_int(args: &Arguments, key: &str) -> Result<i64, ToolFailure> {
    int_arg(args, key).ok_or_else(|| ToolFailure::validation(format!("missing field `{}`", key)))
}

fn record_filter(args: &Arguments) -> RecordFilter {
    RecordFilter {
        include_deleted: bool_arg(args, "include_deleted"),
        level: str_arg(args, "level").map(str::to_string),
        rank: str_arg(args, "rank").map(str::to_string),
        start_date: str_arg(args, "start_date").and_then(parse_iso_date),
        end_date: str_arg(args, "end_date").and_then(parse_iso_date),
    }
}

fn lookup_query(args: &Arguments) -> LookupQuery {
    LookupQuery {
        limit: clamp_limit(int_arg(args, "limit")),
        offset: clamp_offset(int_arg(args, "offset")),
        keyword: str_arg(args, "keyword")
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_string),
    }
}

/// Serialize a domain value into a payload object
fn to_object<T: Serialize>(value: &T) -> HandlerResult {
    match serde_json::to_value(value) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => {
            let mut map = Map::new();
            map.insert("value".into(), other);
            Ok(map)
        }
        Err(e) => Err(super::HandlerError::Encode(e.to_string())),
    }
}

fn page<T: Serialize>(items: &[T], extra: Value) -> HandlerResult {
    let mut map = to_object(&extra)?;
    map.insert(
        "items".into(),
        serde_json::to_value(items).map_err(|e| super::HandlerError::Encode(e.to_string()))?,
    );
    map.insert("count".into(), Value::from(items.len()));
    Ok(map)
}

fn health(policy: &PolicySnapshot) -> Map<String, Value> {
    let value = json!({
        "name": SERVER_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "status": "ok",
        "read_only": !policy.allows_mutation(),
        "redact_pii": policy.redact_pii,
        "max_bytes": policy.max_bytes,
    });
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

async fn list_records(stores: &Collaborators, args: &Arguments) -> HandlerResult {
    let query = RecordQuery {
        limit: clamp_limit(int_arg(args, "limit")),
        offset: clamp_offset(int_arg(args, "offset")),
        filter: record_filter(args),
        order: str_arg(args, "order_by")
            .and_then(RecordOrder::parse)
            .unwrap_or_default(),
    };
    let rows = stores.records.list_records(&query).await?;
    page(
        &rows,
        json!({ "limit": query.limit, "offset": query.offset }),
    )
}

async fn search_records(stores: &Collaborators, args: &Arguments) -> HandlerResult {
    let text = str_arg(args, "query").unwrap_or_default().trim().to_string();
    if text.is_empty() {
        let mut empty = Map::new();
        empty.insert("items".into(), Value::Array(Vec::new()));
        empty.insert("count".into(), Value::from(0));
        return Ok(empty);
    }

    let query = SearchQuery {
        text,
        limit: clamp_limit(int_arg(args, "limit")),
        filter: record_filter(args),
    };
    let rows = stores.records.search_records(&query).await?;
    page(&rows, json!({ "query": query.text, "limit": query.limit }))
}

async fn get_record(stores: &Collaborators, args: &Arguments) -> HandlerResult {
    let id = required_int(args, "record_id")?;
    let record = stores
        .records
        .get_record(id, bool_arg(args, "include_deleted"))
        .await?;
    to_object(&record)
}

async fn list_members(stores: &Collaborators, args: &Arguments) -> HandlerResult {
    let query = MemberQuery {
        limit: clamp_limit(int_arg(args, "limit")),
        offset: clamp_offset(int_arg(args, "offset")),
        active_only: bool_arg(args, "active_only"),
    };
    let rows = stores.records.list_members(&query).await?;
    page(
        &rows,
        json!({ "limit": query.limit, "offset": query.offset }),
    )
}

async fn get_member(stores: &Collaborators, args: &Arguments) -> HandlerResult {
    let id = required_int(args, "member_id")?;
    let member = stores.records.get_member(id).await?;
    to_object(&member)
}

async fn read_attachment(
    stores: &Collaborators,
    policy: &PolicySnapshot,
    args: &Arguments,
) -> HandlerResult {
    let record_id = required_int(args, "record_id")?;
    let attachment_id = required_int(args, "attachment_id")?;

    let offset = int_arg(args, "offset").unwrap_or(0);
    if offset < 0 {
        return Err(ToolFailure::validation("`offset` must not be negative").into());
    }
    let offset = offset as u64;

    let length = match int_arg(args, "length") {
        Some(n) if n <= 0 => {
            return Err(ToolFailure::validation("`length` must be positive").into());
        }
        Some(n) => Some(n as u64),
        None => None,
    };

    let attachment = stores
        .records
        .get_attachment(record_id, attachment_id)
        .await?;
    let file_size = stores.attachments.size(&attachment).await?;
    if offset > file_size {
        return Err(ToolFailure::validation(format!(
            "`offset` {} is beyond the file size {}",
            offset, file_size
        ))
        .into());
    }

    let remaining = file_size - offset;
    let requested = length.unwrap_or(remaining);
    let (allowed, capped) = policy.cap_bytes(requested);

    let slice = stores
        .attachments
        .read_range(&attachment, offset, allowed.min(remaining))
        .await?;
    let read = slice.bytes.len() as u64;

    to_object(&json!({
        "record_id": record_id,
        "attachment_id": attachment_id,
        "file_name": attachment.original_name,
        "mime_type": guess_mime_type(&attachment.original_name),
        "file_size": slice.file_size,
        "offset": offset,
        "length": read,
        "truncated": capped && offset + allowed < slice.file_size,
        "eof": offset + read >= slice.file_size,
        "content_base64": BASE64.encode(&slice.bytes),
    }))
}

async fn list_majors(stores: &Collaborators, args: &Arguments) -> HandlerResult {
    let query = lookup_query(args);
    let rows = stores.records.list_majors(&query).await?;
    page(
        &rows,
        json!({ "limit": query.limit, "offset": query.offset }),
    )
}

async fn list_schools(stores: &Collaborators, args: &Arguments) -> HandlerResult {
    let query = lookup_query(args);
    let rows = stores.records.list_schools(&query).await?;
    page(
        &rows,
        json!({ "limit": query.limit, "offset": query.offset }),
    )
}

async fn stats_summary(stores: &Collaborators) -> HandlerResult {
    let summary = stores.records.stats_summary().await?;
    to_object(&summary)
}

async fn rebuild_search_index(stores: &Collaborators) -> HandlerResult {
    let mutations = stores.mutations.as_ref().ok_or(super::HandlerError::NoMutationStore)?;
    let counts = mutations.rebuild_search_index().await?;
    to_object(&counts)
}

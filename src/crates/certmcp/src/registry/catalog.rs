//! The fixed tool catalog

use crate::store::RecordOrder;
use tooling::runtime::{ParamSpec, ParamType, ToolDescriptor};

/// Handler tag for a catalog entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolKind {
    Health,
    ListRecords,
    SearchRecords,
    GetRecord,
    ListMembers,
    GetMember,
    ReadAttachment,
    ListMajors,
    ListSchools,
    StatsSummary,
    RebuildSearchIndex,
}

/// A descriptor paired with the handler that serves it
#[derive(Debug, Clone, Copy)]
pub struct ToolEntry {
    pub descriptor: ToolDescriptor,
    pub kind: ToolKind,
}

const LIMIT: ParamSpec =
    ParamSpec::optional("limit", ParamType::Integer, "Page size, 1-200 (default 50)");
const OFFSET: ParamSpec =
    ParamSpec::optional("offset", ParamType::Integer, "Rows to skip (default 0)");
const INCLUDE_DELETED: ParamSpec = ParamSpec::optional(
    "include_deleted",
    ParamType::Boolean,
    "Include soft-deleted records",
);
const LEVEL: ParamSpec = ParamSpec::optional("level", ParamType::String, "Award level filter");
const RANK: ParamSpec = ParamSpec::optional("rank", ParamType::String, "Award rank filter");
const START_DATE: ParamSpec = ParamSpec::optional(
    "start_date",
    ParamType::Date,
    "Earliest award date, inclusive (YYYY-MM-DD)",
);
const END_DATE: ParamSpec = ParamSpec::optional(
    "end_date",
    ParamType::Date,
    "Latest award date, inclusive (YYYY-MM-DD)",
);
const KEYWORD: ParamSpec =
    ParamSpec::optional("keyword", ParamType::String, "Match on name, code or pinyin");

/// Every tool the control-plane serves, in catalog order
pub static CATALOG: &[ToolEntry] = &[
    ToolEntry {
        kind: ToolKind::Health,
        descriptor: ToolDescriptor {
            name: "health",
            description: "Report control-plane status and the active policy",
            params: &[],
            mutates: false,
        },
    },
    ToolEntry {
        kind: ToolKind::ListRecords,
        descriptor: ToolDescriptor {
            name: "list_records",
            description: "List award records, newest first by default",
            params: &[
                LIMIT,
                OFFSET,
                INCLUDE_DELETED,
                LEVEL,
                RANK,
                START_DATE,
                END_DATE,
                ParamSpec::optional(
                    "order_by",
                    ParamType::OneOf(RecordOrder::NAMES),
                    "Sort order (default award_date_desc)",
                ),
            ],
            mutates: false,
        },
    },
    ToolEntry {
        kind: ToolKind::SearchRecords,
        descriptor: ToolDescriptor {
            name: "search_records",
            description: "Free-text search over competition names, certificate codes, remarks and member names",
            params: &[
                ParamSpec::required("query", ParamType::String, "Search text"),
                LIMIT,
                INCLUDE_DELETED,
                LEVEL,
                RANK,
                START_DATE,
                END_DATE,
            ],
            mutates: false,
        },
    },
    ToolEntry {
        kind: ToolKind::GetRecord,
        descriptor: ToolDescriptor {
            name: "get_record",
            description: "Fetch one award record with its members and attachments",
            params: &[
                ParamSpec::required("record_id", ParamType::Integer, "Record identifier"),
                INCLUDE_DELETED,
            ],
            mutates: false,
        },
    },
    ToolEntry {
        kind: ToolKind::ListMembers,
        descriptor: ToolDescriptor {
            name: "list_members",
            description: "List team members",
            params: &[
                LIMIT,
                OFFSET,
                ParamSpec::optional("active_only", ParamType::Boolean, "Only active members"),
            ],
            mutates: false,
        },
    },
    ToolEntry {
        kind: ToolKind::GetMember,
        descriptor: ToolDescriptor {
            name: "get_member",
            description: "Fetch one team member",
            params: &[ParamSpec::required(
                "member_id",
                ParamType::Integer,
                "Member identifier",
            )],
            mutates: false,
        },
    },
    ToolEntry {
        kind: ToolKind::ReadAttachment,
        descriptor: ToolDescriptor {
            name: "read_attachment",
            description: "Read a byte range of an attachment as base64, capped at the configured maximum",
            params: &[
                ParamSpec::required("record_id", ParamType::Integer, "Owning record"),
                ParamSpec::required("attachment_id", ParamType::Integer, "Attachment identifier"),
                ParamSpec::optional("offset", ParamType::Integer, "Start offset in bytes (default 0)"),
                ParamSpec::optional(
                    "length",
                    ParamType::Integer,
                    "Bytes to read (default: to end of file)",
                ),
            ],
            mutates: false,
        },
    },
    ToolEntry {
        kind: ToolKind::ListMajors,
        descriptor: ToolDescriptor {
            name: "list_majors",
            description: "Look up academic majors",
            params: &[KEYWORD, LIMIT, OFFSET],
            mutates: false,
        },
    },
    ToolEntry {
        kind: ToolKind::ListSchools,
        descriptor: ToolDescriptor {
            name: "list_schools",
            description: "Look up schools",
            params: &[KEYWORD, LIMIT, OFFSET],
            mutates: false,
        },
    },
    ToolEntry {
        kind: ToolKind::StatsSummary,
        descriptor: ToolDescriptor {
            name: "stats_summary",
            description: "Record totals by level and rank plus the latest records",
            params: &[],
            mutates: false,
        },
    },
    ToolEntry {
        kind: ToolKind::RebuildSearchIndex,
        descriptor: ToolDescriptor {
            name: "rebuild_search_index",
            description: "Rebuild the full-text search index (requires writes to be enabled)",
            params: &[],
            mutates: true,
        },
    },
];

use serde::Serialize;
use sqlx::FromRow;

/// One persisted probe result. `probe_json` holds the serialized probe.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct CacheRow {
    pub path: String,
    pub size: i64,
    pub mtime_ns: i64,
    pub content_hash: Option<String>,
    pub probe_json: String,
    pub probed_at: String,
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("command output is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("listing output does not start with a snapshot record")]
    MissingSnapshot,

    #[error("unexpected {kind:?} record on line {line}")]
    UnexpectedRecord { kind: String, line: usize },
}

/// One point-in-time backup as reported by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub id: String,
    #[serde(default)]
    pub short_id: String,
    pub time: DateTime<Utc>,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub tree: String,
    #[serde(default, deserialize_with = "nullable")]
    pub paths: Vec<String>,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub username: String,
    #[serde(default, deserialize_with = "nullable")]
    pub tags: Vec<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub excludes: Vec<String>,
}

impl SnapshotRecord {
    pub fn short_id(&self) -> &str {
        if !self.short_id.is_empty() {
            return &self.short_id;
        }
        match self.id.char_indices().nth(8) {
            Some((end, _)) => &self.id[..end],
            None => &self.id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    File,
    Dir,
    Symlink,
    #[serde(other)]
    Other,
}

/// One node of a snapshot's tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    pub path: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub mode: u32,
    #[serde(default)]
    pub mtime: Option<DateTime<Utc>>,
    #[serde(default)]
    pub atime: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ctime: Option<DateTime<Utc>>,
    #[serde(default)]
    pub uid: u32,
    #[serde(default)]
    pub gid: u32,
}

impl DirectoryEntry {
    pub fn is_dir(&self) -> bool {
        self.entry_type == EntryType::Dir
    }

    pub fn is_file(&self) -> bool {
        self.entry_type == EntryType::File
    }
}

fn nullable<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Decodes `snapshots --json` output: one JSON array, order preserved.
pub fn decode_snapshots(output: &[u8]) -> Result<Vec<SnapshotRecord>, DecodeError> {
    let snapshots: Option<Vec<SnapshotRecord>> = serde_json::from_slice(output)?;
    Ok(snapshots.unwrap_or_default())
}

/// Decodes `ls --json` output: one JSON record per line, the snapshot
/// first and a `node` record for every entry after it.
pub fn decode_listing(output: &[u8]) -> Result<(SnapshotRecord, Vec<DirectoryEntry>), DecodeError> {
    let mut snapshot = None;
    let mut entries = Vec::new();

    for (index, line) in output.split(|b| *b == b'\n').enumerate() {
        let line = line.trim_ascii();
        if line.is_empty() {
            continue;
        }

        let record: serde_json::Value = serde_json::from_slice(line)?;
        let kind = record
            .get("struct_type")
            .or_else(|| record.get("message_type"))
            .and_then(|kind| kind.as_str())
            .unwrap_or_default()
            .to_string();

        match (kind.as_str(), snapshot.is_some()) {
            ("snapshot", false) => snapshot = Some(serde_json::from_value(record)?),
            ("node", true) => entries.push(serde_json::from_value(record)?),
            (_, false) => return Err(DecodeError::MissingSnapshot),
            (_, true) => {
                return Err(DecodeError::UnexpectedRecord {
                    kind: kind.clone(),
                    line: index + 1,
                })
            }
        }
    }

    let snapshot = snapshot.ok_or(DecodeError::MissingSnapshot)?;
    Ok((snapshot, entries))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SNAPSHOTS: &str = r#"[
        {"time":"2024-03-01T02:00:00.123456789+01:00","tree":"aa11","paths":["/etc"],"hostname":"web-1","username":"root","uid":0,"gid":0,"tags":["nightly"],"id":"0123456789abcdef","short_id":"01234567"},
        {"time":"2024-03-02T02:00:00Z","parent":"0123456789abcdef","tree":"bb22","paths":["/etc","/home"],"hostname":"web-1","username":"root","id":"fedcba9876543210","short_id":"fedcba98"},
        {"time":"2024-03-03T02:00:00Z","tree":"cc33","paths":["/srv"],"hostname":"db-1","tags":null,"id":"1111222233334444"}
    ]"#;

    #[test]
    fn test_decode_snapshots_preserves_order() {
        let snapshots = decode_snapshots(SNAPSHOTS.as_bytes()).unwrap();

        assert_eq!(snapshots.len(), 3);
        assert_eq!(snapshots[0].short_id(), "01234567");
        assert_eq!(snapshots[0].tags, vec!["nightly"]);
        assert_eq!(snapshots[0].time.to_rfc3339(), "2024-03-01T01:00:00.123456789+00:00");
        assert_eq!(snapshots[1].parent.as_deref(), Some("0123456789abcdef"));
        assert_eq!(snapshots[1].paths, vec!["/etc", "/home"]);
        assert_eq!(snapshots[2].hostname, "db-1");
        assert!(snapshots[2].tags.is_empty());
        assert_eq!(snapshots[2].short_id(), "11112222");
    }

    #[test]
    fn test_decode_empty_snapshot_list() {
        assert!(decode_snapshots(b"[]\n").unwrap().is_empty());
        assert!(decode_snapshots(b"null").unwrap().is_empty());
    }

    #[test]
    fn test_decode_snapshots_rejects_non_json() {
        let err = decode_snapshots(b"Fatal: wrong password or no key found\n").unwrap_err();
        assert!(matches!(err, DecodeError::Json(_)));
    }

    #[test]
    fn test_decode_listing() {
        let output = concat!(
            r#"{"time":"2024-03-01T02:00:00Z","tree":"aa11","paths":["/etc"],"hostname":"web-1","id":"0123456789abcdef","short_id":"01234567","struct_type":"snapshot"}"#,
            "\n",
            r#"{"name":"nginx","type":"dir","path":"/etc/nginx","uid":0,"gid":0,"mode":2147484141,"mtime":"2024-02-28T10:00:00Z","struct_type":"node"}"#,
            "\n",
            r#"{"name":"nginx.conf","type":"file","path":"/etc/nginx/nginx.conf","size":2048,"mode":420,"mtime":"2024-02-28T10:00:00Z","struct_type":"node"}"#,
            "\n",
            r#"{"name":"current","type":"symlink","path":"/etc/nginx/current","struct_type":"node"}"#,
            "\n",
            r#"{"name":"ctl","type":"socket","path":"/etc/nginx/ctl","struct_type":"node"}"#,
            "\n",
        );

        let (snapshot, entries) = decode_listing(output.as_bytes()).unwrap();

        assert_eq!(snapshot.id, "0123456789abcdef");
        assert_eq!(entries.len(), 4);
        assert!(entries[0].is_dir());
        assert!(entries[1].is_file());
        assert_eq!(entries[1].size, 2048);
        assert_eq!(entries[2].entry_type, EntryType::Symlink);
        assert_eq!(entries[3].entry_type, EntryType::Other);
        assert!(entries[2].mtime.is_none());
    }

    #[test]
    fn test_decode_listing_accepts_message_type_records() {
        let output = concat!(
            r#"{"time":"2024-03-01T02:00:00Z","id":"abc","message_type":"snapshot"}"#,
            "\n",
            r#"{"name":"a","type":"file","path":"/a","message_type":"node"}"#,
            "\n",
        );
        let (_, entries) = decode_listing(output.as_bytes()).unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_decode_listing_requires_snapshot_first() {
        let node_first = r#"{"name":"a","type":"file","path":"/a","struct_type":"node"}"#;
        assert!(matches!(decode_listing(node_first.as_bytes()), Err(DecodeError::MissingSnapshot)));
        assert!(matches!(decode_listing(b""), Err(DecodeError::MissingSnapshot)));

        let two_snapshots = concat!(
            r#"{"time":"2024-03-01T02:00:00Z","id":"abc","struct_type":"snapshot"}"#,
            "\n",
            r#"{"time":"2024-03-01T02:00:00Z","id":"def","struct_type":"snapshot"}"#,
            "\n",
        );
        assert!(matches!(
            decode_listing(two_snapshots.as_bytes()),
            Err(DecodeError::UnexpectedRecord { line: 2, .. })
        ));
    }
}

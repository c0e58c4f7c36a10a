use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Local, NaiveDateTime, Utc};
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};

/// Identifier of a post or comment. The backend hands these out from a single
/// sequence, so roots and comments never collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PostId(String);

impl PostId {
    pub fn new<S: Into<String>>(raw: S) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<u64> for PostId {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

impl From<&str> for PostId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl Serialize for PostId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for PostId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(StringOrNumber).map(PostId)
    }
}

struct StringOrNumber;

impl<'de> Visitor<'de> for StringOrNumber {
    type Value = String;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a string or an integer")
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<String, E> {
        Ok(value.to_string())
    }

    fn visit_string<E: de::Error>(self, value: String) -> Result<String, E> {
        Ok(value)
    }

    fn visit_u64<E: de::Error>(self, value: u64) -> Result<String, E> {
        Ok(value.to_string())
    }

    fn visit_i64<E: de::Error>(self, value: i64) -> Result<String, E> {
        Ok(value.to_string())
    }
}

fn count_from_wire<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
    let raw: Option<serde_json::Value> = Option::deserialize(deserializer)?;
    Ok(match raw {
        Some(serde_json::Value::Number(n)) => n.as_u64(),
        Some(serde_json::Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

/// Record as it arrives from `/api/requestPost` or `/api/requestComment`.
/// Every field beyond the id is optional on the wire.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WireRecord {
    pub id: Option<PostId>,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub postcontent: String,
    #[serde(default)]
    pub imagepath: Option<String>,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default, deserialize_with = "count_from_wire")]
    pub commentcount: Option<u64>,
    #[serde(default)]
    pub pinned: Option<bool>,
    #[serde(default)]
    pub locked: Option<bool>,
    #[serde(default)]
    pub canpin: Option<bool>,
    #[serde(default)]
    pub canlock: Option<bool>,
    #[serde(default)]
    pub hasownership: Option<bool>,
    #[serde(default)]
    pub iscomment: Option<bool>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub can_pin: bool,
    pub can_lock: bool,
    pub has_ownership: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordKind {
    Root { reply_count: Option<u64> },
    Comment { parent: PostId },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub id: PostId,
    pub kind: RecordKind,
    pub author: String,
    pub content: String,
    pub image: Option<String>,
    pub created_at: Timestamp,
    pub pinned: bool,
    pub locked: bool,
    pub caps: Capabilities,
}

impl Record {
    pub fn root(wire: WireRecord) -> Option<Self> {
        let reply_count = wire.commentcount;
        Self::from_wire(wire, RecordKind::Root { reply_count })
    }

    pub fn comment(wire: WireRecord, parent: &PostId) -> Option<Self> {
        Self::from_wire(
            wire,
            RecordKind::Comment {
                parent: parent.clone(),
            },
        )
    }

    fn from_wire(wire: WireRecord, kind: RecordKind) -> Option<Self> {
        let id = wire.id?;
        let image = wire
            .imagepath
            .map(|path| path.trim().to_string())
            .filter(|path| !path.is_empty());
        Some(Self {
            id,
            kind,
            author: wire.username,
            content: wire.postcontent,
            image,
            created_at: Timestamp::parse(&wire.timestamp),
            pinned: wire.pinned.unwrap_or(false),
            locked: wire.locked.unwrap_or(false),
            caps: Capabilities {
                can_pin: wire.canpin.unwrap_or(false),
                can_lock: wire.canlock.unwrap_or(false),
                has_ownership: wire.hasownership.unwrap_or(false),
            },
        })
    }

    pub fn is_comment(&self) -> bool {
        matches!(self.kind, RecordKind::Comment { .. })
    }

    pub fn reply_count(&self) -> Option<u64> {
        match self.kind {
            RecordKind::Root { reply_count } => reply_count,
            RecordKind::Comment { .. } => None,
        }
    }

    pub fn parent(&self) -> Option<&PostId> {
        match &self.kind {
            RecordKind::Comment { parent } => Some(parent),
            RecordKind::Root { .. } => None,
        }
    }
}

/// Creation time as sent by the server. Unparseable values are kept verbatim
/// and shown as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Timestamp {
    Parsed(DateTime<Utc>),
    Raw(String),
}

impl Timestamp {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
            return Timestamp::Parsed(parsed.with_timezone(&Utc));
        }
        for pattern in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S%.f"] {
            if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, pattern) {
                return Timestamp::Parsed(naive.and_utc());
            }
        }
        Timestamp::Raw(raw.to_string())
    }

    /// `DD/MM/YY HH:MM:SS` in the local timezone.
    pub fn display(&self) -> String {
        match self {
            Timestamp::Parsed(at) => at
                .with_timezone(&Local)
                .format("%d/%m/%y %H:%M:%S")
                .to_string(),
            Timestamp::Raw(raw) => raw.clone(),
        }
    }
}

/// Records of the view currently on screen, in render order.
#[derive(Debug, Clone, Default)]
pub struct RecordMap {
    order: Vec<PostId>,
    records: HashMap<PostId, Record>,
}

impl RecordMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.records.clear();
    }

    /// Later duplicates overwrite the value but keep the first position.
    pub fn insert(&mut self, record: Record) {
        if !self.records.contains_key(&record.id) {
            self.order.push(record.id.clone());
        }
        self.records.insert(record.id.clone(), record);
    }

    pub fn replace<I: IntoIterator<Item = Record>>(&mut self, records: I) {
        self.clear();
        for record in records {
            self.insert(record);
        }
    }

    pub fn get(&self, id: &PostId) -> Option<&Record> {
        self.records.get(id)
    }

    pub fn at(&self, index: usize) -> Option<&Record> {
        self.order.get(index).and_then(|id| self.records.get(id))
    }

    pub fn position(&self, id: &PostId) -> Option<usize> {
        self.order.iter().position(|candidate| candidate == id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Record> + '_ {
        self.order.iter().filter_map(|id| self.records.get(id))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum View {
    #[default]
    Listing,
    Thread {
        root: PostId,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub start: u32,
    pub count: u32,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            start: 1,
            count: 20,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wire(json: &str) -> WireRecord {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn ids_accept_strings_and_numbers() {
        let from_number = wire(r#"{"id": 5}"#);
        let from_string = wire(r#"{"id": "5"}"#);
        assert_eq!(from_number.id, from_string.id);
        assert_eq!(serde_json::to_string(&PostId::from(5)).unwrap(), r#""5""#);
    }

    #[test]
    fn missing_flags_mean_feature_off() {
        let record = Record::root(wire(r#"{"id": "9", "username": "a", "imagepath": ""}"#))
            .unwrap();
        assert!(!record.pinned);
        assert!(!record.locked);
        assert_eq!(record.caps, Capabilities::default());
        assert_eq!(record.image, None);
        assert_eq!(record.reply_count(), None);
    }

    #[test]
    fn comment_count_parses_from_string() {
        let record = Record::root(wire(r#"{"id": "1", "commentcount": "12"}"#)).unwrap();
        assert_eq!(record.reply_count(), Some(12));
    }

    #[test]
    fn comments_carry_their_parent() {
        let parent = PostId::from(3);
        let record = Record::comment(wire(r#"{"id": 4, "iscomment": true}"#), &parent).unwrap();
        assert!(record.is_comment());
        assert_eq!(record.parent(), Some(&parent));
    }

    #[test]
    fn records_without_id_are_dropped() {
        assert!(Record::root(wire(r#"{"username": "ghost"}"#)).is_none());
    }

    #[test]
    fn unparseable_timestamp_is_shown_verbatim() {
        assert_eq!(Timestamp::parse("t").display(), "t");
    }

    #[test]
    fn sqlite_timestamp_formats_day_first() {
        let stamp = Timestamp::parse("2024-03-07 09:05:01");
        let Timestamp::Parsed(at) = &stamp else {
            panic!("expected a parsed timestamp");
        };
        let expected = at.with_timezone(&Local).format("%d/%m/%y %H:%M:%S").to_string();
        assert_eq!(stamp.display(), expected);
        assert_eq!(expected.len(), "DD/MM/YY HH:MM:SS".len());
    }

    #[test]
    fn record_map_keeps_first_position_on_duplicate() {
        let mut map = RecordMap::new();
        let a = Record::root(wire(r#"{"id": "1", "username": "a"}"#)).unwrap();
        let b = Record::root(wire(r#"{"id": "2", "username": "b"}"#)).unwrap();
        let a2 = Record::root(wire(r#"{"id": "1", "username": "a2"}"#)).unwrap();
        map.replace(vec![a, b, a2]);
        assert_eq!(map.len(), 2);
        assert_eq!(map.at(0).unwrap().author, "a2");
        assert_eq!(map.at(1).unwrap().author, "b");
    }
}

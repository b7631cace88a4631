use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// Timestamp: canonical time representation (seconds + nanoseconds)
//
// On the wire a timestamp is an RFC 3339 string in UTC. Input may also be
// whole epoch seconds or the `{seconds_since_epoch, nanoseconds}` object.
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(try_from = "TimestampRepr")]
pub struct Timestamp {
    pub seconds_since_epoch: u64,
    pub nanoseconds: u32,
}

impl Timestamp {
    /// Wall-clock now. Only the outer layers (CLI, callers) read the clock;
    /// evaluation always receives its time through the context.
    pub fn now() -> Self {
        chrono::Utc::now().into()
    }

    pub fn from_seconds(seconds: u64) -> Self {
        Self {
            seconds_since_epoch: seconds,
            nanoseconds: 0,
        }
    }

    /// Parse an RFC 3339 string. Instants before the epoch are rejected.
    pub fn parse_rfc3339(s: &str) -> Option<Self> {
        let dt = chrono::DateTime::parse_from_rfc3339(s).ok()?;
        if dt.timestamp() < 0 {
            return None;
        }
        Some(dt.with_timezone(&chrono::Utc).into())
    }

    pub fn to_datetime(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        chrono::DateTime::from_timestamp(self.seconds_since_epoch as i64, self.nanoseconds)
    }

    pub fn to_rfc3339(&self) -> String {
        self.to_datetime()
            .map(|d| d.to_rfc3339_opts(chrono::SecondsFormat::AutoSi, true))
            .unwrap_or_else(|| "invalid".to_string())
    }

    pub fn plus_seconds(&self, seconds: u64) -> Self {
        Self {
            seconds_since_epoch: self.seconds_since_epoch.saturating_add(seconds),
            nanoseconds: self.nanoseconds,
        }
    }
}

impl From<chrono::DateTime<chrono::Utc>> for Timestamp {
    fn from(dt: chrono::DateTime<chrono::Utc>) -> Self {
        Self {
            seconds_since_epoch: dt.timestamp().max(0) as u64,
            nanoseconds: dt.timestamp_subsec_nanos(),
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_rfc3339())
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.to_datetime() {
            Some(_) => serializer.serialize_str(&self.to_rfc3339()),
            None => Err(serde::ser::Error::custom(format!(
                "timestamp {}s is outside the representable range",
                self.seconds_since_epoch
            ))),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TimestampRepr {
    Text(String),
    Seconds(u64),
    Parts {
        seconds_since_epoch: u64,
        #[serde(default)]
        nanoseconds: u32,
    },
}

impl TryFrom<TimestampRepr> for Timestamp {
    type Error = String;

    fn try_from(repr: TimestampRepr) -> Result<Self, Self::Error> {
        match repr {
            TimestampRepr::Text(text) => Timestamp::parse_rfc3339(&text)
                .ok_or_else(|| format!("'{}' is not an RFC 3339 time after the epoch", text)),
            TimestampRepr::Seconds(seconds) => Ok(Timestamp::from_seconds(seconds)),
            TimestampRepr::Parts {
                seconds_since_epoch,
                nanoseconds,
            } => {
                if nanoseconds >= 1_000_000_000 {
                    return Err(format!("nanoseconds {} out of range", nanoseconds));
                }
                Ok(Timestamp {
                    seconds_since_epoch,
                    nanoseconds,
                })
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Typed identifiers: prevent stringly-typed confusion
// ---------------------------------------------------------------------------

macro_rules! define_id {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

define_id!(PermissionId, "Unique identifier for a stored permission.");
define_id!(SubjectId, "Identifier of a user, group or role.");
define_id!(ResourceId, "Identifier of a resource or scope node.");

impl PermissionId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

// ---------------------------------------------------------------------------
// RecordVersion: optimistic concurrency counter
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordVersion(pub u64);

impl RecordVersion {
    pub fn initial() -> Self {
        Self(1)
    }

    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for RecordVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Scope: breadth at which a permission applies
// ---------------------------------------------------------------------------

/// Breadth hierarchy with manual Ord.
/// Exhaustive (no #[non_exhaustive]) so a new level forces review of the
/// compatibility table and the scope resolver.
///
/// Ordering: Document < Folder < Project < Department < Organization < Global
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Document,
    Folder,
    Project,
    Department,
    Organization,
    Global,
}

impl Scope {
    pub const ALL: [Scope; 6] = [
        Scope::Document,
        Scope::Folder,
        Scope::Project,
        Scope::Department,
        Scope::Organization,
        Scope::Global,
    ];

    fn ordinal(self) -> u8 {
        match self {
            Scope::Document => 0,
            Scope::Folder => 1,
            Scope::Project => 2,
            Scope::Department => 3,
            Scope::Organization => 4,
            Scope::Global => 5,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Document => "document",
            Scope::Folder => "folder",
            Scope::Project => "project",
            Scope::Department => "department",
            Scope::Organization => "organization",
            Scope::Global => "global",
        }
    }
}

impl PartialOrd for Scope {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scope {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.ordinal().cmp(&other.ordinal())
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Scope::ALL
            .into_iter()
            .find(|scope| scope.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown scope '{}'", s))
    }
}

// ---------------------------------------------------------------------------
// ResourceType: the resource taxonomy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Document,
    Folder,
    System,
    Workflow,
    Report,
    Global,
}

impl ResourceType {
    pub const ALL: [ResourceType; 6] = [
        ResourceType::Document,
        ResourceType::Folder,
        ResourceType::System,
        ResourceType::Workflow,
        ResourceType::Report,
        ResourceType::Global,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Document => "document",
            ResourceType::Folder => "folder",
            ResourceType::System => "system",
            ResourceType::Workflow => "workflow",
            ResourceType::Report => "report",
            ResourceType::Global => "global",
        }
    }

    /// The scope level a resource of this type occupies itself, if any.
    /// Workflows, reports and system resources live inside a scope node
    /// but are not one.
    pub fn own_scope(&self) -> Option<Scope> {
        match self {
            ResourceType::Document => Some(Scope::Document),
            ResourceType::Folder => Some(Scope::Folder),
            ResourceType::Global => Some(Scope::Global),
            ResourceType::System | ResourceType::Workflow | ResourceType::Report => None,
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceType::ALL
            .into_iter()
            .find(|rt| rt.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown resource type '{}'", s))
    }
}

// ---------------------------------------------------------------------------
// SubjectRef: who a permission is granted to
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectKind {
    User,
    Group,
    Role,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SubjectRef {
    pub kind: SubjectKind,
    pub id: SubjectId,
}

impl SubjectRef {
    pub fn user(id: impl Into<String>) -> Self {
        Self {
            kind: SubjectKind::User,
            id: SubjectId::new(id),
        }
    }

    pub fn group(id: impl Into<String>) -> Self {
        Self {
            kind: SubjectKind::Group,
            id: SubjectId::new(id),
        }
    }

    pub fn role(id: impl Into<String>) -> Self {
        Self {
            kind: SubjectKind::Role,
            id: SubjectId::new(id),
        }
    }
}

impl fmt::Display for SubjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            SubjectKind::User => "user",
            SubjectKind::Group => "group",
            SubjectKind::Role => "role",
        };
        write!(f, "{}:{}", kind, self.id)
    }
}

impl FromStr for SubjectRef {
    type Err = String;

    /// Parse the `kind:id` form, e.g. `group:finance`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, id) = s
            .split_once(':')
            .ok_or_else(|| format!("subject '{}' must have the form <kind>:<id>", s))?;
        if id.is_empty() {
            return Err(format!("subject '{}' has an empty id", s));
        }
        match kind.to_ascii_lowercase().as_str() {
            "user" => Ok(SubjectRef::user(id)),
            "group" => Ok(SubjectRef::group(id)),
            "role" => Ok(SubjectRef::role(id)),
            other => Err(format!("unknown subject kind '{}'", other)),
        }
    }
}

// ---------------------------------------------------------------------------
// ScopeNode: one link of a resource's ancestor chain
// ---------------------------------------------------------------------------

/// A node in the containment hierarchy. The Global node carries no id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScopeNode {
    pub scope: Scope,
    #[serde(default)]
    pub id: Option<ResourceId>,
}

impl ScopeNode {
    pub fn new(scope: Scope, id: impl Into<String>) -> Self {
        Self {
            scope,
            id: Some(ResourceId::new(id)),
        }
    }

    pub fn global() -> Self {
        Self {
            scope: Scope::Global,
            id: None,
        }
    }
}

impl fmt::Display for ScopeNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.id {
            Some(id) => write!(f, "{}/{}", self.scope, id),
            None => write!(f, "{}", self.scope),
        }
    }
}

use std::fmt;

use serde::{Deserialize, Serialize};

/// Wildcard marker accepted for any rule field.
pub const WILDCARD: &str = "*";

/// Opaque name of a network principal, e.g. `app:checkout` or `db:billing`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tag(String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Port(pub u16);

/// A request to open connectivity from `source` to `destination` on `port`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionRequest {
    pub source: Tag,
    pub destination: Tag,
    pub port: Port,
}

/// One constrained field of a rule.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum FieldMatch<T> {
    #[default]
    Any,
    Exact(T),
}

/// One row of the review table. Order in the table is priority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawRule", into = "RawRule")]
pub struct Rule {
    pub from: FieldMatch<Tag>,
    pub to: FieldMatch<Tag>,
    pub port: FieldMatch<Port>,
    pub reason: String,
}

impl Tag {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Tag {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl ConnectionRequest {
    pub fn new(source: impl Into<Tag>, destination: impl Into<Tag>, port: u16) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            port: Port(port),
        }
    }
}

impl fmt::Display for ConnectionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}:{}", self.source, self.destination, self.port)
    }
}

impl<T: PartialEq> FieldMatch<T> {
    /// `Any` accepts every value; `Exact` compares without normalization.
    pub fn accepts(&self, value: &T) -> bool {
        match self {
            FieldMatch::Any => true,
            FieldMatch::Exact(expected) => expected == value,
        }
    }
}

impl<T: fmt::Display> fmt::Display for FieldMatch<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldMatch::Any => f.write_str(WILDCARD),
            FieldMatch::Exact(value) => write!(f, "{value}"),
        }
    }
}

impl Rule {
    pub fn new(
        from: FieldMatch<Tag>,
        to: FieldMatch<Tag>,
        port: FieldMatch<Port>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            from,
            to,
            port,
            reason: reason.into(),
        }
    }
}

/// On-disk shape of a rule: `from`/`to` are a tag or `"*"`, `port` is an
/// integer or `"*"`. A missing or `null` field is read as the wildcard.
/// A quoted number is refused: it would never equal an integer port.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawRule {
    #[serde(default)]
    from: Option<String>,
    #[serde(default)]
    to: Option<String>,
    #[serde(default)]
    port: Option<RawPort>,
    reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum RawPort {
    Number(u64),
    Text(String),
}

impl TryFrom<RawRule> for Rule {
    type Error = String;

    fn try_from(raw: RawRule) -> Result<Self, Self::Error> {
        let port = match raw.port {
            None => FieldMatch::Any,
            Some(RawPort::Text(text)) if text == WILDCARD => FieldMatch::Any,
            Some(RawPort::Text(text)) => {
                return Err(format!("port must be an integer or \"*\", got {text:?}"))
            }
            Some(RawPort::Number(number)) => {
                let port = u16::try_from(number).map_err(|_| format!("port out of range: {number}"))?;
                FieldMatch::Exact(Port(port))
            }
        };
        Ok(Rule {
            from: tag_field(raw.from),
            to: tag_field(raw.to),
            port,
            reason: raw.reason,
        })
    }
}

impl From<Rule> for RawRule {
    fn from(rule: Rule) -> Self {
        let tag = |field: FieldMatch<Tag>| match field {
            FieldMatch::Any => WILDCARD.to_string(),
            FieldMatch::Exact(tag) => tag.0,
        };
        let port = match rule.port {
            FieldMatch::Any => RawPort::Text(WILDCARD.to_string()),
            FieldMatch::Exact(port) => RawPort::Number(u64::from(port.0)),
        };
        RawRule {
            from: Some(tag(rule.from)),
            to: Some(tag(rule.to)),
            port: Some(port),
            reason: rule.reason,
        }
    }
}

fn tag_field(value: Option<String>) -> FieldMatch<Tag> {
    match value {
        None => FieldMatch::Any,
        Some(value) if value == WILDCARD => FieldMatch::Any,
        Some(value) => FieldMatch::Exact(Tag(value)),
    }
}

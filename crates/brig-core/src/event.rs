//! Inbound CI events.
//!
//! The payload is opaque JSON owned by the event source. Brig only reads the
//! handful of fields its routing rules name, through JSON pointers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{BrigError, ValidationError};

/// Event types Brig knows how to route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventType {
    Exec,
    Push,
    Release,
    CheckSuiteRequested,
    CheckSuiteRerequested,
    CheckRunRerequested,
    IssueCommentCreated,
    IssueCommentEdited,
}

impl EventType {
    pub const ALL: [EventType; 8] = [
        EventType::Exec,
        EventType::Push,
        EventType::Release,
        EventType::CheckSuiteRequested,
        EventType::CheckSuiteRerequested,
        EventType::CheckRunRerequested,
        EventType::IssueCommentCreated,
        EventType::IssueCommentEdited,
    ];

    /// Wire name, e.g. `check_suite:requested`.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Exec => "exec",
            EventType::Push => "push",
            EventType::Release => "release",
            EventType::CheckSuiteRequested => "check_suite:requested",
            EventType::CheckSuiteRerequested => "check_suite:rerequested",
            EventType::CheckRunRerequested => "check_run:rerequested",
            EventType::IssueCommentCreated => "issue_comment:created",
            EventType::IssueCommentEdited => "issue_comment:edited",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = BrigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ValidationError::EmptyEventType.into());
        }
        EventType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| BrigError::UnknownEvent {
                event_type: s.to_string(),
            })
    }
}

/// The git revision an event refers to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revision {
    #[serde(rename = "ref", default)]
    pub git_ref: String,
    #[serde(default)]
    pub commit: String,
}

/// One event delivered by the event source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub build_id: String,
    #[serde(default)]
    pub revision: Revision,
}

impl Event {
    pub fn new(event_type: impl Into<String>, payload: Value) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
            build_id: String::new(),
            revision: Revision::default(),
        }
    }

    pub fn with_build_id(mut self, build_id: impl Into<String>) -> Self {
        self.build_id = build_id.into();
        self
    }

    pub fn with_revision(mut self, git_ref: impl Into<String>, commit: impl Into<String>) -> Self {
        self.revision = Revision {
            git_ref: git_ref.into(),
            commit: commit.into(),
        };
        self
    }

    /// Parse the event type.
    pub fn kind(&self) -> Result<EventType, BrigError> {
        self.event_type.parse()
    }

    /// The payload as JSON. Sources that deliver the payload as a string
    /// (the common case for webhook relays) are parsed here.
    pub fn payload_json(&self) -> Result<Value, ValidationError> {
        match &self.payload {
            Value::String(raw) if raw.trim().is_empty() => Ok(Value::Null),
            Value::String(raw) => {
                serde_json::from_str(raw).map_err(|source| ValidationError::MalformedPayload {
                    event_type: self.event_type.clone(),
                    source,
                })
            }
            other => Ok(other.clone()),
        }
    }

    /// String field at a JSON pointer such as `/comment/body`.
    pub fn payload_str(&self, pointer: &str) -> Result<Option<String>, ValidationError> {
        let payload = self.payload_json()?;
        Ok(payload
            .pointer(pointer)
            .and_then(Value::as_str)
            .map(str::to_string))
    }

    /// Like [`Event::payload_str`], but absence is a validation error.
    pub fn require_str(&self, pointer: &str) -> Result<String, ValidationError> {
        self.payload_str(pointer)?
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| ValidationError::MissingPayloadField {
                event_type: self.event_type.clone(),
                field: pointer.trim_start_matches('/').replace('/', "."),
            })
    }

    /// The git ref, preferring the revision over the payload's `ref` field.
    pub fn git_ref(&self) -> Result<Option<String>, ValidationError> {
        if !self.revision.git_ref.is_empty() {
            return Ok(Some(self.revision.git_ref.clone()));
        }
        self.payload_str("/ref")
    }
}

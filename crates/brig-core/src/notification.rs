//! Check notification state.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Status value reported for a check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Conclusion {
    Pending,
    Success,
    Failure,
    Neutral,
    Cancelled,
    TimedOut,
}

impl Conclusion {
    pub fn as_str(&self) -> &'static str {
        match self {
            Conclusion::Pending => "pending",
            Conclusion::Success => "success",
            Conclusion::Failure => "failure",
            Conclusion::Neutral => "neutral",
            Conclusion::Cancelled => "cancelled",
            Conclusion::TimedOut => "timed_out",
        }
    }

    /// Whether the check is finished once this conclusion is reported.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Conclusion::Pending | Conclusion::Neutral)
    }
}

impl fmt::Display for Conclusion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Distinct identity of one send, `<target>-<sequence>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NotificationIdentity {
    pub target: String,
    pub sequence: u32,
}

impl fmt::Display for NotificationIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.target, self.sequence)
    }
}

/// Notification state for one check target within one pipeline run.
///
/// The value is owned by the run that reports the check; each send goes
/// through [`NotificationState::advance`], so identities never repeat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationState {
    pub target: String,
    pub conclusion: Conclusion,
    pub title: String,
    pub summary: String,
    pub text: String,
    pub external_id: String,
    /// Raw event payload forwarded to the reporting system.
    pub payload: String,
    sequence: u32,
}

impl NotificationState {
    pub fn new(target: impl Into<String>, external_id: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            conclusion: Conclusion::Neutral,
            title: "running check".to_string(),
            summary: String::new(),
            text: String::new(),
            external_id: external_id.into(),
            payload: String::new(),
            sequence: 0,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn with_payload(mut self, payload: impl Into<String>) -> Self {
        self.payload = payload.into();
        self
    }

    /// Number of sends so far.
    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    /// Identity the next send will use. Does not change the state.
    pub fn next_identity(&self) -> NotificationIdentity {
        NotificationIdentity {
            target: self.target.clone(),
            sequence: self.sequence + 1,
        }
    }

    /// Claim the next identity.
    pub fn advance(&mut self) -> NotificationIdentity {
        let identity = self.next_identity();
        self.sequence = identity.sequence;
        identity
    }
}

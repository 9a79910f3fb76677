//! Wire protocol types for host-agent communication.
//!
//! - **ChannelState**: the value held in the mailbox notification word
//! - **Job**: host to agent, `name` or `name[<json args>]`
//! - **JobOutcome**: agent to host, `{"ok": <value>}` or `{"err": "<message>"}`

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Unique identifier for a channel, shared by both ends for log correlation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(uuid::Uuid);

impl ChannelId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for ChannelId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which side is expected to act next.
///
/// Exactly one side acts per state; the other blocks on the notification word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ChannelState {
    Idle = 0,
    /// Host wrote a job; the agent should consume it.
    JobPosted = 10,
    /// Agent wrote a result; the host should consume it.
    ResultPosted = 20,
}

impl ChannelState {
    pub const fn as_raw(self) -> u32 {
        self as u32
    }

    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::Idle),
            10 => Some(Self::JobPosted),
            20 => Some(Self::ResultPosted),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::JobPosted => "job_posted",
            Self::ResultPosted => "result_posted",
        }
    }
}

impl std::fmt::Display for ChannelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("operation name is empty")]
    EmptyOperation,

    #[error("operation name {0:?} contains '['")]
    InvalidOperation(String),

    #[error("arguments must serialize to a list, got {0}")]
    ArgumentsNotAList(&'static str),

    #[error("arguments are not serializable: {0}")]
    UnserializableArguments(String),

    #[error("malformed job arguments: {0}")]
    MalformedArguments(String),

    #[error("malformed result: {0}")]
    MalformedResult(String),
}

/// A named operation plus its positional arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    op: String,
    args: Vec<Value>,
}

impl Job {
    pub fn new(op: impl Into<String>, args: Vec<Value>) -> Result<Self, ProtocolError> {
        let op = op.into();
        validate_operation(&op)?;
        Ok(Self { op, args })
    }

    /// Build a job from any argument list that serializes to a JSON array
    /// (tuples, vectors, arrays). `()` means no arguments.
    pub fn from_args<A: Serialize>(op: impl Into<String>, args: A) -> Result<Self, ProtocolError> {
        let args = match serde_json::to_value(args)
            .map_err(|e| ProtocolError::UnserializableArguments(e.to_string()))?
        {
            Value::Array(items) => items,
            Value::Null => Vec::new(),
            other => return Err(ProtocolError::ArgumentsNotAList(json_kind(&other))),
        };
        Self::new(op, args)
    }

    pub fn op(&self) -> &str {
        &self.op
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    pub fn into_parts(self) -> (String, Vec<Value>) {
        (self.op, self.args)
    }

    /// Wire text: `op` alone without arguments, `op[a,b,...]` otherwise.
    pub fn to_text(&self) -> String {
        if self.args.is_empty() {
            return self.op.clone();
        }
        let mut text = self.op.clone();
        text.push_str(&Value::Array(self.args.clone()).to_string());
        text
    }

    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let (op, args) = match text.find('[') {
            Some(idx) => {
                let args: Vec<Value> = serde_json::from_str(&text[idx..])
                    .map_err(|e| ProtocolError::MalformedArguments(e.to_string()))?;
                (&text[..idx], args)
            }
            None => (text, Vec::new()),
        };
        Self::new(op, args)
    }
}

fn validate_operation(op: &str) -> Result<(), ProtocolError> {
    if op.is_empty() {
        return Err(ProtocolError::EmptyOperation);
    }
    if op.contains('[') {
        return Err(ProtocolError::InvalidOperation(op.to_string()));
    }
    Ok(())
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// What the agent sends back. Failures raised inside a job are carried here,
/// not by the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOutcome {
    Ok(Value),
    Err(String),
}

impl JobOutcome {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Err(message.into())
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }

    pub fn to_text(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::MalformedResult(e.to_string()))
    }

    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::MalformedResult(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn channel_state_raw_values() {
        assert_eq!(ChannelState::Idle.as_raw(), 0);
        assert_eq!(ChannelState::JobPosted.as_raw(), 10);
        assert_eq!(ChannelState::ResultPosted.as_raw(), 20);
        for state in [
            ChannelState::Idle,
            ChannelState::JobPosted,
            ChannelState::ResultPosted,
        ] {
            assert_eq!(ChannelState::from_raw(state.as_raw()), Some(state));
        }
        assert_eq!(ChannelState::from_raw(11), None);
    }

    #[test]
    fn channel_id_displays_uuid() {
        let id: ChannelId =
            serde_json::from_str(r#""550e8400-e29b-41d4-a716-446655440000""#).unwrap();
        assert_eq!(id.to_string(), "550e8400-e29b-41d4-a716-446655440000");
        assert_ne!(ChannelId::new(), ChannelId::new());
        insta::assert_json_snapshot!(id, @r#""550e8400-e29b-41d4-a716-446655440000""#);
    }

    #[test]
    fn job_text_with_args() {
        let job = Job::from_args("add", (2, 2)).unwrap();
        insta::assert_snapshot!(job.to_text(), @"add[2,2]");
    }

    #[test]
    fn job_text_without_args() {
        let job = Job::from_args("ping", ()).unwrap();
        insta::assert_snapshot!(job.to_text(), @"ping");
    }

    #[test]
    fn job_text_with_structured_args() {
        let job = Job::new("greet", vec![json!({"name": "ada"}), json!([1, "two"])]).unwrap();
        insta::assert_snapshot!(job.to_text(), @r#"greet[{"name":"ada"},[1,"two"]]"#);
    }

    #[test]
    fn job_parse_preserves_argument_order() {
        let job = Job::parse(r#"concat["a","b","c"]"#).unwrap();
        assert_eq!(job.op(), "concat");
        assert_eq!(job.args(), &[json!("a"), json!("b"), json!("c")]);

        let again = Job::parse(&job.to_text()).unwrap();
        assert_eq!(again, job);
    }

    #[test]
    fn job_parse_bare_name() {
        let job = Job::parse("ping").unwrap();
        assert_eq!(job.op(), "ping");
        assert!(job.args().is_empty());
    }

    #[test]
    fn job_rejects_bad_operation_names() {
        assert_eq!(Job::new("", vec![]), Err(ProtocolError::EmptyOperation));
        assert_eq!(
            Job::new("a[b", vec![]),
            Err(ProtocolError::InvalidOperation("a[b".to_string()))
        );
        assert_eq!(Job::parse("[1,2]"), Err(ProtocolError::EmptyOperation));
    }

    #[test]
    fn job_rejects_non_list_arguments() {
        assert_eq!(
            Job::from_args("f", json!({"x": 1})),
            Err(ProtocolError::ArgumentsNotAList("an object"))
        );
        assert_eq!(
            Job::from_args("f", 3),
            Err(ProtocolError::ArgumentsNotAList("a number"))
        );
    }

    #[test]
    fn job_rejects_unserializable_arguments() {
        let mut map = std::collections::HashMap::new();
        map.insert((1, 2), "tuple keys are not valid JSON object keys");
        let err = Job::from_args("f", vec![map]).unwrap_err();
        assert!(matches!(err, ProtocolError::UnserializableArguments(_)));
    }

    #[test]
    fn job_parse_rejects_malformed_arguments() {
        let err = Job::parse("add[2,").unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedArguments(_)));
    }

    #[test]
    fn outcome_ok_serializes() {
        insta::assert_json_snapshot!(JobOutcome::Ok(json!(4)), @r#"
        {
          "ok": 4
        }
        "#);
    }

    #[test]
    fn outcome_ok_null_serializes() {
        insta::assert_json_snapshot!(JobOutcome::Ok(Value::Null), @r#"
        {
          "ok": null
        }
        "#);
    }

    #[test]
    fn outcome_err_serializes() {
        insta::assert_json_snapshot!(JobOutcome::failed("division by zero"), @r#"
        {
          "err": "division by zero"
        }
        "#);
    }

    #[test]
    fn outcome_text_is_compact() {
        let text = JobOutcome::Ok(json!({"a": [1, 2]})).to_text().unwrap();
        assert_eq!(text, r#"{"ok":{"a":[1,2]}}"#);
        assert_eq!(
            JobOutcome::parse(&text).unwrap(),
            JobOutcome::Ok(json!({"a": [1, 2]}))
        );
    }

    #[test]
    fn outcome_parse_rejects_garbage() {
        let err = JobOutcome::parse("4").unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedResult(_)));
    }
}

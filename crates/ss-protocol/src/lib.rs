// ss-protocol: SkillScale wire envelopes and intent parsing.
//
// Every message on the bus is a two-frame multipart: frame 0 is the topic
// prefix, frame 1 is a JSON envelope.  Requests flow client -> skill server,
// responses flow back on the client's private reply topic.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Status values
// ---------------------------------------------------------------------------

/// Frozen response status strings.
///
/// Clients treat anything other than `SUCCESS` as an error, so servers must
/// only ever emit these two values.
pub mod status {
    pub const SUCCESS: &str = "success";
    pub const ERROR: &str = "error";
}

// ---------------------------------------------------------------------------
// Request envelope
// ---------------------------------------------------------------------------

/// A request published on a skill topic.
///
/// `request_id` is unique within the originating client's lifetime; every
/// response for this request is published on exactly `reply_to`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub request_id: String,
    /// The client's private reply topic (stable for the client's lifetime).
    pub reply_to: String,
    /// Free text or a JSON object (see [`ParsedIntent`]).
    pub intent: String,
    /// Seconds since the epoch; informational only.
    #[serde(default)]
    pub timestamp: f64,
}

impl RequestEnvelope {
    pub fn new(request_id: String, reply_to: String, intent: String) -> Self {
        RequestEnvelope {
            request_id,
            reply_to,
            intent,
            timestamp: epoch_now(),
        }
    }

    /// Parse a payload frame, distinguishing non-JSON garbage (silently
    /// droppable) from a JSON object missing a required field (answerable
    /// with an error response when `reply_to` survived).
    pub fn parse(payload: &str) -> Result<Self, RequestParseError> {
        let value: serde_json::Value =
            serde_json::from_str(payload).map_err(|_| RequestParseError::NotJson)?;
        let obj = match value.as_object() {
            Some(obj) => obj,
            None => return Err(RequestParseError::NotJson),
        };

        let reply_to = obj
            .get("reply_to")
            .and_then(|v| v.as_str())
            .map(str::to_owned);
        let request_id_raw = obj
            .get("request_id")
            .and_then(|v| v.as_str())
            .map(str::to_owned);

        let field = |name: &'static str| -> Result<String, RequestParseError> {
            obj.get(name)
                .and_then(|v| v.as_str())
                .map(str::to_owned)
                .ok_or(RequestParseError::MissingField {
                    field: name,
                    request_id: request_id_raw.clone(),
                    reply_to: reply_to.clone(),
                })
        };

        let request_id = field("request_id")?;
        let intent = field("intent")?;
        let reply_to = reply_to.ok_or(RequestParseError::MissingField {
            field: "reply_to",
            request_id: request_id_raw,
            reply_to: None,
        })?;
        let timestamp = obj.get("timestamp").and_then(|v| v.as_f64()).unwrap_or(0.0);

        Ok(RequestEnvelope {
            request_id,
            reply_to,
            intent,
            timestamp,
        })
    }
}

/// Why a request payload could not be accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestParseError {
    /// Not JSON, or not a JSON object.  Dropped without a response.
    NotJson,
    /// A JSON object missing a required field.  When `reply_to` survived,
    /// the server can still answer with a "malformed request" error,
    /// echoing `request_id` when that survived too.
    MissingField {
        field: &'static str,
        request_id: Option<String>,
        reply_to: Option<String>,
    },
}

impl std::fmt::Display for RequestParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestParseError::NotJson => write!(f, "payload is not a JSON object"),
            RequestParseError::MissingField { field, .. } => {
                write!(f, "missing required field '{}'", field)
            }
        }
    }
}

impl std::error::Error for RequestParseError {}

// ---------------------------------------------------------------------------
// Response envelope
// ---------------------------------------------------------------------------

/// A response published on the requesting client's reply topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub request_id: String,
    /// `"success"` or `"error"`; anything else is treated as an error.
    #[serde(default)]
    pub status: String,
    /// Response body (empty on error).
    #[serde(default)]
    pub content: String,
    /// Human-readable diagnostic (empty on success).
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub timestamp: f64,
}

impl ResponseEnvelope {
    pub fn success(request_id: String, content: String) -> Self {
        ResponseEnvelope {
            request_id,
            status: status::SUCCESS.to_owned(),
            content,
            error: String::new(),
            timestamp: epoch_now(),
        }
    }

    pub fn failure(request_id: String, error: String) -> Self {
        ResponseEnvelope {
            request_id,
            status: status::ERROR.to_owned(),
            content: String::new(),
            error,
            timestamp: epoch_now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == status::SUCCESS
    }
}

// ---------------------------------------------------------------------------
// Intent parsing
// ---------------------------------------------------------------------------

/// The decoded form of a request's `intent` string.
///
/// An intent is either a JSON object with optional `skill` / `data` / `task`
/// fields, or free text.  `skill` selects explicit mode; otherwise `task`
/// (or the full free text) is handed to the matcher.  The executable's stdin
/// is `data` if present, else `task`, else the full intent string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedIntent {
    pub skill: Option<String>,
    pub task: Option<String>,
    pub exec_input: String,
}

impl ParsedIntent {
    pub fn from_intent(intent: &str) -> Self {
        let obj = match serde_json::from_str::<serde_json::Value>(intent) {
            Ok(serde_json::Value::Object(obj)) => obj,
            // Free text (or JSON that isn't an object): task mode on the
            // whole string.
            _ => {
                return ParsedIntent {
                    skill: None,
                    task: Some(intent.to_owned()),
                    exec_input: intent.to_owned(),
                };
            }
        };

        let skill = obj.get("skill").and_then(|v| v.as_str()).map(str::to_owned);
        let task = obj.get("task").and_then(|v| v.as_str()).map(str::to_owned);

        let exec_input = match obj.get("data") {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => match &task {
                Some(task) => task.clone(),
                None => intent.to_owned(),
            },
        };

        ParsedIntent {
            skill,
            task,
            exec_input,
        }
    }
}

// ---------------------------------------------------------------------------
// Topics
// ---------------------------------------------------------------------------

/// Derive the bus topic for a skills folder: `TOPIC_<FOLDER>` uppercased
/// with dashes mapped to underscores (`data-processing` ->
/// `TOPIC_DATA_PROCESSING`).
pub fn topic_for_folder(folder: &str) -> String {
    format!("TOPIC_{}", folder.to_uppercase().replace('-', "_"))
}

/// Current time as float seconds since the epoch.
pub fn epoch_now() -> f64 {
    let now = chrono::Utc::now();
    now.timestamp() as f64 + f64::from(now.timestamp_subsec_micros()) / 1_000_000.0
}

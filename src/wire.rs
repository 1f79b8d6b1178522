use serde::Deserialize;
use serde_json::Value;

/// `{"uri": "..."}` body of a 202 answer pointing at the next poll target.
#[derive(Debug, Deserialize)]
pub struct PollLink {
    #[serde(default)]
    pub uri: Option<String>,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskStatus {
    Ok,
    Error,
    Running,
}

/// `{"status": "OK"|"ERROR"|"RUNNING", "messages": [...]}`.
#[derive(Debug, Deserialize)]
pub struct StatusDocument {
    pub status: TaskStatus,
    #[serde(default)]
    pub messages: Vec<Value>,
}

impl StatusDocument {
    /// Messages rendered as text; strings verbatim, anything else as JSON.
    pub fn message_texts(&self) -> Vec<String> {
        self.messages
            .iter()
            .map(|message| match message {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            })
            .collect()
    }
}

#[allow(dead_code)]
#[derive(Debug, Default, Deserialize)]
pub struct Paging {
    #[serde(default)]
    pub offset: Option<u64>,
    #[serde(default)]
    pub limit: Option<u64>,
    #[serde(default, rename = "nextUri")]
    pub next_uri: Option<String>,
}

/// Paginated list body with the item array under an endpoint-specific key.
#[derive(Debug, Deserialize)]
pub struct PageEnvelope {
    #[serde(default)]
    pub paging: Paging,
    #[serde(flatten)]
    pub rest: serde_json::Map<String, Value>,
}

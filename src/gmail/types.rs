use serde::Deserialize;
use std::collections::HashMap;

/// `users.messages.list` response. `messages` is absent for an empty mailbox.
#[derive(Debug, Deserialize)]
pub struct ListMessagesResponse {
    #[serde(default)]
    pub messages: Vec<MessageRef>,
    #[serde(rename = "nextPageToken")]
    pub next_page_token: Option<String>,
    #[serde(rename = "resultSizeEstimate", default)]
    pub result_size_estimate: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MessageRef {
    pub id: String,
}

/// `users.messages.get` with `format=metadata`.
#[derive(Debug, Deserialize)]
pub struct Message {
    pub id: String,
    pub payload: Option<MessagePayload>,
}

#[derive(Debug, Deserialize)]
pub struct MessagePayload {
    #[serde(default)]
    pub headers: Vec<MessageHeader>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageHeader {
    pub name: String,
    pub value: String,
}

/// Requested headers of one message, keyed by header name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageMetadata {
    pub id: String,
    pub headers: HashMap<String, String>,
}

impl MessageMetadata {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

impl From<Message> for MessageMetadata {
    fn from(m: Message) -> Self {
        let mut headers = HashMap::new();
        for h in m.payload.map(|p| p.headers).unwrap_or_default() {
            // a repeated header keeps its last value, as a dict built from the list would
            headers.insert(h.name, h.value);
        }
        Self { id: m.id, headers }
    }
}

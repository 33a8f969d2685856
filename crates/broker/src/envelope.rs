use {
    chatgate_store::InstanceRecord,
    serde::{Deserialize, Serialize},
    serde_json::Value,
};

/// What consumers receive on every routing key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub event: String,
    /// Snapshot of the originating instance, access key stripped.
    pub instance: InstanceRecord,
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_webhook: Option<String>,
}

impl Envelope {
    pub fn new(event: impl Into<String>, instance: &InstanceRecord, data: Value) -> Self {
        Self {
            event: event.into(),
            instance: instance.redacted(),
            data,
            global_webhook: None,
        }
    }

    pub fn with_global_webhook(mut self, url: Option<String>) -> Self {
        self.global_webhook = url;
        self
    }
}

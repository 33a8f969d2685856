//! Wire frames exchanged with the bridge sidecar.

use {
    chatgate_protocol::QrEvent,
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
    serde_json::Value,
};

/// Frames sent from the gateway to the sidecar.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayMessage {
    /// Invoke `method` for `account_id`; answered by a
    /// [`SidecarMessage::Response`] carrying the same `request_id`.
    Request {
        request_id: String,
        account_id: String,
        method: String,
        #[serde(default)]
        params: Value,
    },
}

/// Frames sent from the sidecar to the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SidecarMessage {
    Response {
        request_id: String,
        ok: bool,
        #[serde(default)]
        result: Value,
        #[serde(default)]
        error: Option<String>,
        /// Machine-readable failure class, e.g. `device_not_found`.
        #[serde(default)]
        code: Option<String>,
    },
    /// Pairing progress for one account.
    Qr { account_id: String, qr: QrEvent },
    /// A protocol occurrence, named by its wire name.
    Event {
        account_id: String,
        name: String,
        #[serde(default)]
        data: Value,
    },
    /// Link and device state, pushed whenever it changes.
    Status {
        account_id: String,
        connected: bool,
        logged_in: bool,
        #[serde(default)]
        device: Option<DeviceFrame>,
    },
    Error {
        #[serde(default)]
        account_id: Option<String>,
        error: String,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceFrame {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub push_name: Option<String>,
    #[serde(default)]
    pub last_successful_connect: Option<DateTime<Utc>>,
}

/// Failure codes the sidecar attaches to error responses.
pub mod codes {
    pub const DEVICE_NOT_FOUND: &str = "device_not_found";
    pub const NOT_CONNECTED: &str = "not_connected";
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, serde_json::json};

    #[test]
    fn request_frame_shape() {
        let frame = GatewayMessage::Request {
            request_id: "r1".into(),
            account_id: "acc".into(),
            method: "logout".into(),
            params: Value::Null,
        };
        assert_eq!(
            serde_json::to_value(&frame).unwrap(),
            json!({
                "type": "request",
                "request_id": "r1",
                "account_id": "acc",
                "method": "logout",
                "params": null
            })
        );
    }

    #[test]
    fn decodes_sidecar_frames() {
        let qr: SidecarMessage = serde_json::from_value(json!({
            "type": "qr",
            "account_id": "acc",
            "qr": { "event": "code", "code": "2@abc" }
        }))
        .unwrap();
        assert!(matches!(
            qr,
            SidecarMessage::Qr { qr: QrEvent::Code { ref code }, .. } if code == "2@abc"
        ));

        let failed: SidecarMessage = serde_json::from_value(json!({
            "type": "response",
            "request_id": "r2",
            "ok": false,
            "error": "no device",
            "code": "device_not_found"
        }))
        .unwrap();
        assert!(matches!(
            failed,
            SidecarMessage::Response { ok: false, code: Some(ref c), .. } if c == codes::DEVICE_NOT_FOUND
        ));

        let status: SidecarMessage = serde_json::from_value(json!({
            "type": "status",
            "account_id": "acc",
            "connected": true,
            "logged_in": false
        }))
        .unwrap();
        assert!(matches!(status, SidecarMessage::Status { device: None, .. }));
    }
}

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfoResponse {
    pub name: String,
    pub public_url: String,
    /// First 8 characters of the node guild id.
    pub server_id: String,
    pub region: String,
    pub main_backend_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
    pub ice_servers: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
}

/// Payload POSTed to the authority's host-registry heartbeat endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatPayload {
    pub name: String,
    pub public_url: String,
    pub server_id: String,
    pub region: String,
    pub version: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_payload_is_camel_case() {
        let payload = HeartbeatPayload {
            name: "remus".into(),
            public_url: "http://example.com".into(),
            server_id: "0198a2b3".into(),
            region: "eu".into(),
            version: "0.1.0".into(),
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert!(json.get("publicUrl").is_some());
        assert!(json.get("serverId").is_some());
    }
}

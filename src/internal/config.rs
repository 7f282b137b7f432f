use anyhow::Result;
use serde::{Deserialize, Serialize};

/// public STUN servers. they help with address discovery on a LAN without a relay
pub const DEFAULT_ICE_SERVERS: [&str; 2] = [
    "stun:stun.l.google.com:19302",
    "stun:stun1.l.google.com:19302",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CallConfig {
    /// STUN urls handed to every transport context
    pub ice_servers: Vec<String>,
    /// display name used when the teacher registers via `set_role`
    pub teacher_name: String,
    /// re-acquire local media right after a hang up so the preview stays live
    pub warm_preview: bool,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            ice_servers: DEFAULT_ICE_SERVERS.iter().map(|s| s.to_string()).collect(),
            teacher_name: "Teacher".into(),
            warm_preview: true,
        }
    }
}

impl CallConfig {
    pub fn from_json(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }
}

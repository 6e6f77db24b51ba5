//! Bus wire format shared by every surface

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::constants::bus::MAX_MESSAGE_SIZE;
use crate::settings::SettingsSnapshot;

/// Events broadcast between surfaces. One datagram carries one event as JSON:
/// `{"event":"settings-updated","payload":{...}}`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "event", content = "payload")]
pub enum BusEvent {
    /// A surface persisted a new snapshot
    #[serde(rename = "settings-updated")]
    SettingsUpdated(SettingsSnapshot),
}

impl BusEvent {
    pub fn encode(&self) -> Result<Vec<u8>> {
        let bytes = serde_json::to_vec(self).context("Failed to serialize bus event to JSON")?;
        if bytes.len() > MAX_MESSAGE_SIZE {
            return Err(anyhow!(
                "Bus event too large: {} bytes (max: {})",
                bytes.len(),
                MAX_MESSAGE_SIZE
            ));
        }
        Ok(bytes)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() > MAX_MESSAGE_SIZE {
            return Err(anyhow!(
                "Bus event too large: {} bytes (max: {})",
                bytes.len(),
                MAX_MESSAGE_SIZE
            ));
        }
        serde_json::from_slice(bytes).context("Failed to deserialize bus event from JSON")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::Theme;

    #[test]
    fn test_wire_shape() {
        let mut snapshot = SettingsSnapshot::default();
        snapshot.theme = Theme::Light;
        snapshot.rev = 3;
        let bytes = BusEvent::SettingsUpdated(snapshot).encode().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["event"], "settings-updated");
        assert_eq!(value["payload"]["theme"], "light");
        assert_eq!(value["payload"]["rev"], 3);
    }

    #[test]
    fn test_decode_lenient_payload() {
        let raw = br#"{"event":"settings-updated","payload":{"rev":"4","theme":"bogus"}}"#;
        let BusEvent::SettingsUpdated(snapshot) = BusEvent::decode(raw).unwrap();
        assert_eq!(snapshot.rev, 4);
        assert_eq!(snapshot.theme, Theme::Dark);
    }

    #[test]
    fn test_decode_rejects_unknown_event() {
        assert!(BusEvent::decode(br#"{"event":"reboot","payload":{}}"#).is_err());
        assert!(BusEvent::decode(b"not json").is_err());
    }
}

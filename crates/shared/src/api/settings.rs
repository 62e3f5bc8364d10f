use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_AUDIT_MAX_ENTRIES, DEFAULT_TIMEOUT_MAX_MINUTES};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsView {
    pub audit_max_entries: i64,
    pub timeout_max_minutes: i64,
}

impl Default for SettingsView {
    fn default() -> Self {
        Self {
            audit_max_entries: DEFAULT_AUDIT_MAX_ENTRIES,
            timeout_max_minutes: DEFAULT_TIMEOUT_MAX_MINUTES,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSettingsRequest {
    #[serde(default)]
    pub audit_max_entries: Option<i64>,
    #[serde(default)]
    pub timeout_max_minutes: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_constants() {
        let settings = SettingsView::default();
        assert_eq!(settings.audit_max_entries, DEFAULT_AUDIT_MAX_ENTRIES);
        assert_eq!(settings.timeout_max_minutes, DEFAULT_TIMEOUT_MAX_MINUTES);
    }

    #[test]
    fn partial_update_deserializes() {
        let req: UpdateSettingsRequest =
            serde_json::from_str(r#"{"auditMaxEntries":200}"#).unwrap();
        assert_eq!(req.audit_max_entries, Some(200));
        assert!(req.timeout_max_minutes.is_none());
    }
}

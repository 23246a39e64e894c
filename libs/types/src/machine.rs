//! Machine records as published by per-machine agents.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::resources::Resources;

/// State advertised by a machine's agent under a presence lease.
///
/// Field names follow the registry wire schema; `Metadata` and
/// `Capabilities` may be null when the agent has nothing to report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineState {
    #[serde(rename = "ID")]
    pub id: String,

    #[serde(rename = "PublicIP", default)]
    pub public_ip: String,

    #[serde(rename = "Metadata", default)]
    pub metadata: Option<BTreeMap<String, String>>,

    #[serde(rename = "Capabilities", default)]
    pub capabilities: Option<Vec<String>>,

    #[serde(rename = "Version", default)]
    pub version: String,

    #[serde(rename = "TotalResources", default)]
    pub total_resources: Resources,

    #[serde(rename = "FreeResources", default)]
    pub free_resources: Resources,
}

impl MachineState {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// True when this machine satisfies every required metadata entry.
    ///
    /// `required` maps a key to the set of acceptable values; the machine
    /// must carry the key with one of those values.
    pub fn has_metadata(&self, required: &BTreeMap<String, Vec<String>>) -> bool {
        required.iter().all(|(key, values)| {
            self.metadata
                .as_ref()
                .and_then(|m| m.get(key))
                .map(|have| values.iter().any(|want| want == have))
                .unwrap_or(false)
        })
    }
}

/// Compare dotted-numeric version strings, e.g. `"1.2.10" >= "1.2"`.
///
/// Missing components count as zero; non-numeric components fail the
/// comparison outright.
pub fn version_at_least(have: &str, want: &str) -> bool {
    let parse = |s: &str| -> Option<Vec<u64>> {
        s.trim()
            .split('.')
            .map(|part| part.parse::<u64>().ok())
            .collect()
    };

    match (parse(have), parse(want)) {
        (Some(have), Some(want)) => {
            let len = have.len().max(want.len());
            for i in 0..len {
                let h = have.get(i).copied().unwrap_or(0);
                let w = want.get(i).copied().unwrap_or(0);
                if h != w {
                    return h > w;
                }
            }
            true
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine_with_metadata(pairs: &[(&str, &str)]) -> MachineState {
        let mut m = MachineState::new("m1");
        m.metadata = Some(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        );
        m
    }

    #[test]
    fn test_has_metadata() {
        let m = machine_with_metadata(&[("region", "us-east"), ("disk", "ssd")]);

        let mut required = BTreeMap::new();
        required.insert("region".to_string(), vec!["us-east".to_string()]);
        assert!(m.has_metadata(&required));

        required.insert(
            "disk".to_string(),
            vec!["ssd".to_string(), "nvme".to_string()],
        );
        assert!(m.has_metadata(&required));

        required.insert("rack".to_string(), vec!["12".to_string()]);
        assert!(!m.has_metadata(&required));
    }

    #[test]
    fn test_has_metadata_without_any_metadata() {
        let m = MachineState::new("m1");
        let mut required = BTreeMap::new();
        assert!(m.has_metadata(&required));
        required.insert("region".to_string(), vec!["us-east".to_string()]);
        assert!(!m.has_metadata(&required));
    }

    #[test]
    fn test_version_at_least() {
        assert!(version_at_least("1.2.10", "1.2"));
        assert!(version_at_least("1.2", "1.2.0"));
        assert!(version_at_least("2.0", "1.9.9"));
        assert!(!version_at_least("1.1", "1.2"));
        assert!(!version_at_least("", "1.0"));
        assert!(!version_at_least("abc", "1.0"));
    }

    #[test]
    fn test_decode_with_null_metadata() {
        let json = r#"{"ID":"mach1","PublicIP":"","Metadata":null,"Capabilities":null,"Version":"","TotalResources":{"Cores":0,"Memory":0,"Disk":0},"FreeResources":{"Cores":0,"Memory":0,"Disk":0}}"#;
        let m: MachineState = serde_json::from_str(json).unwrap();
        assert_eq!(m.id, "mach1");
        assert!(m.metadata.is_none());
    }
}

//! Image profile catalog parsing
//!
//! The catalog is a YAML mapping from a logical image name to its launch
//! template. A structural problem anywhere in the document is a
//! catalog-level error: a malformed catalog yields zero profiles, never
//! partial ones.

use serde::{Deserialize, Serialize};
use serde_yaml::Value;

use crate::{Error, Result};

/// A named launch template for one conceptual image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageProfile {
    /// Logical name, used as the image id
    pub name: String,
    /// Base OS image name in the backend
    pub image: String,
    /// Machine flavor name
    pub flavor: String,
    /// Network name
    pub network: String,
    /// Security group name
    pub security_group: String,
    /// Key pair name
    pub key_pair: String,
    /// Optional startup script reference (empty when absent)
    pub user_script: String,
    /// Optional boot volume size in GB (0 when absent or malformed)
    pub volume_size: u64,
    /// Whether to attach a floating IP after creation
    pub auto_floating_ip: bool,
    /// Optional availability zone (empty when absent)
    pub availability_zone: String,
}

/// Parse a YAML profile catalog into its profiles, in document order.
///
/// Returns a catalog-level error for empty text, a non-mapping document,
/// an entry without parameters, or a missing/empty required field.
pub fn parse_catalog(text: &str) -> Result<Vec<ImageProfile>> {
    if text.trim().is_empty() {
        return Err(Error::Catalog("no images specified".into()));
    }

    let doc: Value = serde_yaml::from_str(text)
        .map_err(|e| Error::Catalog(format!("malformed catalog: {}", e)))?;

    let map = match doc {
        Value::Mapping(m) if !m.is_empty() => m,
        Value::Null | Value::Mapping(_) => {
            return Err(Error::Catalog("no images specified (perhaps only comments)".into()));
        }
        _ => return Err(Error::Catalog("catalog must be a mapping of image names".into())),
    };

    let mut profiles = Vec::with_capacity(map.len());
    for (key, value) in map {
        let name = scalar_string(&key)
            .ok_or_else(|| Error::Catalog("image name must be a string".into()))?;

        let entry = match value {
            Value::Mapping(m) => m,
            _ => return Err(Error::Catalog(format!("no parameters defined for image: {}", name))),
        };

        let required = |field: &'static str| -> Result<String> {
            entry
                .get(&Value::String(field.into()))
                .and_then(scalar_string)
                .filter(|s| !s.is_empty())
                .ok_or_else(|| {
                    Error::Catalog(format!("image '{}': missing required field '{}'", name, field))
                })
        };

        profiles.push(ImageProfile {
            name: name.clone(),
            image: required("image")?,
            flavor: required("flavor")?,
            network: required("network")?,
            security_group: required("security_group")?,
            key_pair: required("key_pair")?,
            user_script: optional_string(&entry, "user_script"),
            volume_size: volume_size(&entry),
            auto_floating_ip: optional_bool(&entry, "auto_floating_ip"),
            availability_zone: optional_string(&entry, "availability_zone"),
        });
    }

    Ok(profiles)
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn optional_string(entry: &serde_yaml::Mapping, key: &str) -> String {
    entry
        .get(&Value::String(key.into()))
        .and_then(scalar_string)
        .unwrap_or_default()
}

fn optional_bool(entry: &serde_yaml::Mapping, key: &str) -> bool {
    matches!(entry.get(&Value::String(key.into())), Some(Value::Bool(true)))
}

// A malformed volume_size silently falls back to 0. Deliberate leniency
// for partially specified profiles, kept from the observed behavior.
fn volume_size(entry: &serde_yaml::Mapping) -> u64 {
    match entry.get(&Value::String("volume_size".into())) {
        Some(Value::Number(n)) => n.as_u64().unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

//! Skill version domain types.
//!
//! A [`SkillVersion`] is the registry's immutable record of one published
//! bundle. The execution engine only ever reads it.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Symbol invoked when an entrypoint descriptor names only a file.
pub const DEFAULT_ENTRYPOINT_SYMBOL: &str = "run";

/// An immutable, versioned skill bundle as supplied by the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillVersion {
    pub id: Uuid,
    /// Name of the skill this version belongs to.
    pub skill_name: String,
    pub version: semver::Version,
    /// Entrypoint descriptor: `<relative-file-path>` or `<relative-file-path>:<symbol>`.
    pub entrypoint: String,
    /// Root directory of the unpacked bundle on disk.
    pub bundle_root: PathBuf,
    /// Timeout declared by the bundle, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_hint_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Declared input fields.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<IoField>,
    /// Declared output fields.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<IoField>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// JSON Schema for the input payload, when the bundle ships one.
    /// Takes precedence over a schema derived from `inputs`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
}

/// One declared input or output of a skill.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IoField {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Skill-level type: `text`, `number`, `integer`, `boolean`, `file`,
    /// `object` or `array`. Anything else is treated as text.
    #[serde(rename = "type", default = "default_io_type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub optional: bool,
}

fn default_io_type() -> String {
    "text".to_string()
}

impl IoField {
    /// The field name, falling back to its type.
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.kind)
    }

    /// JSON Schema type for this field.
    pub fn json_type(&self) -> &'static str {
        match self.kind.to_ascii_lowercase().as_str() {
            "number" => "number",
            "integer" => "integer",
            "boolean" => "boolean",
            "object" => "object",
            "array" => "array",
            // `file` travels as a path or URL.
            _ => "string",
        }
    }
}

impl SkillVersion {
    /// `name@version` label used in logs and CLI output.
    pub fn label(&self) -> String {
        format!("{}@{}", self.skill_name, self.version)
    }
}

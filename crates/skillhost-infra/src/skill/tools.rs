//! Agent-facing tool manifests.
//!
//! Registered skill versions are described as tools an LLM agent can call:
//! a generic definition carrying the declared inputs and outputs, plus the
//! OpenAI and Anthropic tool shapes and a plain-text summary for system
//! prompts. Every definition pins the skill version id so a tool call can be
//! routed back to [`BundleCatalog::resolve_ref`](super::bundle::BundleCatalog::resolve_ref).

use std::collections::BTreeMap;
use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use skillhost_types::skill::{IoField, SkillVersion};
use uuid::Uuid;

/// Revision of the manifest layout.
pub const MANIFEST_VERSION: &str = "2025-10-01";

pub const MANIFEST_PROVIDER: &str = "skillhost";

/// Property every argument schema pins to the version id.
pub const VERSION_ID_PROPERTY: &str = "skill_version_id";

const NO_SKILLS: &str = "No skills are currently available.";

/// Longest tool name the OpenAI and Anthropic APIs accept.
const PROVIDER_NAME_MAX: usize = 64;

/// How tool names are built.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolNaming {
    /// `skill:<name>@<version>`, one tool per registered version.
    #[default]
    Versioned,
    /// `skill:<name>`, one tool per skill (its highest version).
    Simple,
}

/// Output shape of a tool listing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolFormat {
    #[default]
    Generic,
    Openai,
    Anthropic,
}

/// Layout of the text rendered for system prompts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptStyle {
    /// Numbered entries with inputs, outputs and tags.
    #[default]
    Detailed,
    /// One bullet line per skill.
    Compact,
    /// One numbered line per skill.
    Numbered,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolIo {
    pub inputs: Vec<IoField>,
    pub outputs: Vec<IoField>,
}

/// Framework-neutral description of one skill version as a tool.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentTool {
    pub name: String,
    pub title: String,
    pub description: String,
    pub args_schema: Value,
    pub io: ToolIo,
    pub skill_version_id: Uuid,
    pub version: String,
    pub tags: Vec<String>,
}

/// `.well-known/skills.json` style document.
#[derive(Debug, Clone, Serialize)]
pub struct ToolManifest {
    pub version: &'static str,
    pub provider: &'static str,
    pub generated_at: DateTime<Utc>,
    pub tools: Vec<AgentTool>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OpenAiTool {
    #[serde(rename = "type")]
    pub tool_type: &'static str,
    pub function: FunctionDefinition,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnthropicTool {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Describe `versions` as tools, ordered by skill name.
pub fn as_agent_tools(versions: &[SkillVersion], naming: ToolNaming) -> Vec<AgentTool> {
    let selected: Vec<&SkillVersion> = match naming {
        ToolNaming::Versioned => {
            let mut all: Vec<&SkillVersion> = versions.iter().collect();
            all.sort_by(|a, b| {
                a.skill_name
                    .cmp(&b.skill_name)
                    .then_with(|| b.version.cmp(&a.version))
            });
            all
        }
        ToolNaming::Simple => {
            let mut latest: BTreeMap<&str, &SkillVersion> = BTreeMap::new();
            for version in versions {
                latest
                    .entry(version.skill_name.as_str())
                    .and_modify(|current| {
                        if version.version > current.version {
                            *current = version;
                        }
                    })
                    .or_insert(version);
            }
            latest.into_values().collect()
        }
    };

    let tools: Vec<AgentTool> = selected
        .into_iter()
        .map(|version| AgentTool::from_version(version, naming))
        .collect();
    tracing::debug!(count = tools.len(), ?naming, "built agent tools");
    tools
}

impl AgentTool {
    pub fn from_version(version: &SkillVersion, naming: ToolNaming) -> Self {
        let name = match naming {
            ToolNaming::Versioned => format!("skill:{}@{}", version.skill_name, version.version),
            ToolNaming::Simple => format!("skill:{}", version.skill_name),
        };
        Self {
            name,
            title: title_case(&version.skill_name),
            description: version.description.clone().unwrap_or_default(),
            args_schema: args_schema(version),
            io: ToolIo {
                inputs: version.inputs.clone(),
                outputs: version.outputs.clone(),
            },
            skill_version_id: version.id,
            version: version.version.to_string(),
            tags: version.tags.clone(),
        }
    }

    /// Name restricted to `[A-Za-z0-9_-]{1,64}`, as provider APIs require.
    pub fn provider_name(&self) -> String {
        self.name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                    c
                } else {
                    '_'
                }
            })
            .take(PROVIDER_NAME_MAX)
            .collect()
    }

    pub fn to_openai_tool(&self) -> OpenAiTool {
        OpenAiTool {
            tool_type: "function",
            function: FunctionDefinition {
                name: self.provider_name(),
                description: self.description.clone(),
                parameters: self.args_schema.clone(),
            },
        }
    }

    pub fn to_anthropic_tool(&self) -> AnthropicTool {
        AnthropicTool {
            name: self.provider_name(),
            description: self.description.clone(),
            input_schema: self.args_schema.clone(),
        }
    }

    /// `name - description` on one line.
    pub fn summary(&self) -> String {
        if self.description.is_empty() {
            self.name.clone()
        } else {
            format!("{} - {}", self.name, self.description)
        }
    }
}

/// Input schema for a version: the bundle's own schema when it ships one,
/// otherwise one property per declared input. Either way the version id is
/// pinned as a constant property.
fn args_schema(version: &SkillVersion) -> Value {
    let mut schema = match &version.input_schema {
        Some(Value::Object(schema)) => schema.clone(),
        _ => {
            let mut properties = Map::new();
            let mut required = Vec::new();
            for field in &version.inputs {
                let description = field
                    .description
                    .clone()
                    .unwrap_or_else(|| format!("{} input", field.name()));
                properties.insert(
                    field.name().to_string(),
                    json!({ "type": field.json_type(), "description": description }),
                );
                if !field.optional {
                    required.push(Value::String(field.name().to_string()));
                }
            }
            let mut schema = Map::new();
            schema.insert("type".into(), json!("object"));
            schema.insert("properties".into(), Value::Object(properties));
            schema.insert("required".into(), Value::Array(required));
            schema
        }
    };

    let properties = schema
        .entry("properties")
        .or_insert_with(|| Value::Object(Map::new()));
    if let Value::Object(properties) = properties {
        properties.insert(
            VERSION_ID_PROPERTY.to_string(),
            json!({
                "type": "string",
                "description": "Internal: skill version ID",
                "const": version.id.to_string(),
            }),
        );
    }
    Value::Object(schema)
}

fn title_case(name: &str) -> String {
    name.split(['_', '-'])
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Wrap `tools` in a manifest document.
pub fn manifest(tools: Vec<AgentTool>) -> ToolManifest {
    ToolManifest {
        version: MANIFEST_VERSION,
        provider: MANIFEST_PROVIDER,
        generated_at: Utc::now(),
        tools,
    }
}

/// Render `tools` in the requested shape, one JSON value per tool.
pub fn render_tools(tools: &[AgentTool], format: ToolFormat) -> Result<Vec<Value>, serde_json::Error> {
    tools
        .iter()
        .map(|tool| match format {
            ToolFormat::Generic => serde_json::to_value(tool),
            ToolFormat::Openai => serde_json::to_value(tool.to_openai_tool()),
            ToolFormat::Anthropic => serde_json::to_value(tool.to_anthropic_tool()),
        })
        .collect()
}

/// Describe `tools` as text for an agent's system prompt.
pub fn manifest_to_prompt(tools: &[AgentTool], style: PromptStyle) -> String {
    if tools.is_empty() {
        return NO_SKILLS.to_string();
    }

    let mut out = String::new();
    match style {
        PromptStyle::Compact => {
            for tool in tools {
                let _ = writeln!(out, "- **{}**: {}", tool.name, tool.description);
            }
        }
        PromptStyle::Numbered => {
            for (i, tool) in tools.iter().enumerate() {
                let _ = writeln!(out, "{}. **{}**: {}", i + 1, tool.name, tool.description);
            }
        }
        PromptStyle::Detailed => {
            for (i, tool) in tools.iter().enumerate() {
                let _ = writeln!(out, "{}. **{}**", i + 1, tool.name);
                let _ = writeln!(out, "   Description: {}", tool.description);
                if !tool.io.inputs.is_empty() {
                    let inputs: Vec<String> = tool
                        .io
                        .inputs
                        .iter()
                        .map(|field| match &field.description {
                            Some(text) => format!("{} ({}): {text}", field.name(), field.kind),
                            None => format!("{} ({})", field.name(), field.kind),
                        })
                        .collect();
                    let _ = writeln!(out, "   Inputs: {}", inputs.join(", "));
                }
                if !tool.io.outputs.is_empty() {
                    let outputs: Vec<String> = tool
                        .io
                        .outputs
                        .iter()
                        .map(|field| format!("{} ({})", field.name(), field.kind))
                        .collect();
                    let _ = writeln!(out, "   Outputs: {}", outputs.join(", "));
                }
                if !tool.tags.is_empty() {
                    let _ = writeln!(out, "   Tags: {}", tool.tags.join(", "));
                }
                out.push('\n');
            }
        }
    }
    out.trim_end().to_string()
}

/// Append an "Available Skills" section to `system_prompt`. The prompt is
/// returned unchanged when there are no tools.
pub fn inject_skills_context(system_prompt: &str, tools: &[AgentTool], style: PromptStyle) -> String {
    if tools.is_empty() {
        return system_prompt.to_string();
    }
    format!(
        "{system_prompt}\n\n## Available Skills\n\nYou have access to the following skills:\n\n{}\n\n\
         When a task requires capabilities provided by these skills, use them by making tool calls.\n",
        manifest_to_prompt(tools, style)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn version(name: &str, number: &str) -> SkillVersion {
        SkillVersion {
            id: Uuid::now_v7(),
            skill_name: name.to_string(),
            version: semver::Version::parse(number).unwrap(),
            entrypoint: "main.py".to_string(),
            bundle_root: PathBuf::from("/skills").join(name),
            timeout_hint_secs: None,
            description: Some(format!("Does {name} things")),
            inputs: Vec::new(),
            outputs: Vec::new(),
            tags: Vec::new(),
            input_schema: None,
        }
    }

    fn field(name: &str, kind: &str, optional: bool) -> IoField {
        IoField {
            name: Some(name.to_string()),
            kind: kind.to_string(),
            description: None,
            optional,
        }
    }

    #[test]
    fn args_schema_comes_from_declared_inputs() {
        let mut v = version("excel_to_pptx", "1.0.0");
        v.inputs = vec![field("workbook", "file", false), field("slides", "integer", true)];

        let tool = AgentTool::from_version(&v, ToolNaming::Versioned);

        assert_eq!(tool.name, "skill:excel_to_pptx@1.0.0");
        assert_eq!(tool.title, "Excel To Pptx");
        let schema = &tool.args_schema;
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["workbook"]["type"], "string");
        assert_eq!(schema["properties"]["slides"]["type"], "integer");
        assert_eq!(schema["required"], json!(["workbook"]));
        assert_eq!(
            schema["properties"][VERSION_ID_PROPERTY]["const"],
            v.id.to_string()
        );
    }

    #[test]
    fn shipped_schema_wins_over_inputs() {
        let mut v = version("sum", "0.1.0");
        v.inputs = vec![field("ignored", "text", false)];
        v.input_schema = Some(json!({
            "type": "object",
            "properties": { "values": { "type": "array" } },
            "required": ["values"]
        }));

        let schema = AgentTool::from_version(&v, ToolNaming::Versioned).args_schema;

        assert!(schema["properties"].get("ignored").is_none());
        assert_eq!(schema["properties"]["values"]["type"], "array");
        assert_eq!(schema["required"], json!(["values"]));
        assert!(schema["properties"].get(VERSION_ID_PROPERTY).is_some());
    }

    #[test]
    fn simple_naming_keeps_the_highest_version() {
        let versions = vec![
            version("beta", "1.0.0"),
            version("alpha", "1.2.0"),
            version("alpha", "2.0.0"),
            version("alpha", "1.9.9"),
        ];

        let simple = as_agent_tools(&versions, ToolNaming::Simple);
        let names: Vec<(&str, &str)> = simple
            .iter()
            .map(|t| (t.name.as_str(), t.version.as_str()))
            .collect();
        assert_eq!(names, vec![("skill:alpha", "2.0.0"), ("skill:beta", "1.0.0")]);

        let versioned = as_agent_tools(&versions, ToolNaming::Versioned);
        assert_eq!(versioned.len(), 4);
        assert_eq!(versioned[0].name, "skill:alpha@2.0.0");
        assert_eq!(versioned[3].name, "skill:beta@1.0.0");
    }

    #[test]
    fn provider_shapes() {
        let tool = AgentTool::from_version(&version("hello-world", "1.0.0"), ToolNaming::Versioned);

        let openai = serde_json::to_value(tool.to_openai_tool()).unwrap();
        assert_eq!(openai["type"], "function");
        assert_eq!(openai["function"]["name"], "skill_hello-world_1_0_0");
        assert_eq!(openai["function"]["description"], "Does hello-world things");
        assert_eq!(openai["function"]["parameters"], tool.args_schema);

        let anthropic = serde_json::to_value(tool.to_anthropic_tool()).unwrap();
        assert_eq!(anthropic["name"], "skill_hello-world_1_0_0");
        assert_eq!(anthropic["input_schema"], tool.args_schema);

        let rendered = render_tools(std::slice::from_ref(&tool), ToolFormat::Generic).unwrap();
        assert_eq!(rendered[0]["skill_version_id"], tool.skill_version_id.to_string());
    }

    #[test]
    fn provider_name_is_capped() {
        let long = "x".repeat(100);
        let tool = AgentTool::from_version(&version(&long, "1.0.0"), ToolNaming::Simple);
        assert_eq!(tool.provider_name().len(), 64);
        assert!(tool.provider_name().starts_with("skill_x"));
    }

    #[test]
    fn prompt_styles() {
        assert_eq!(manifest_to_prompt(&[], PromptStyle::Detailed), NO_SKILLS);

        let mut v = version("summarize", "1.0.0");
        v.inputs = vec![IoField {
            description: Some("Text to shorten".into()),
            ..field("text", "text", false)
        }];
        v.outputs = vec![field("summary", "text", false)];
        v.tags = vec!["nlp".into()];
        let tools = as_agent_tools(&[v], ToolNaming::Simple);

        assert_eq!(
            manifest_to_prompt(&tools, PromptStyle::Compact),
            "- **skill:summarize**: Does summarize things"
        );
        assert_eq!(
            manifest_to_prompt(&tools, PromptStyle::Numbered),
            "1. **skill:summarize**: Does summarize things"
        );
        assert_eq!(
            manifest_to_prompt(&tools, PromptStyle::Detailed),
            "1. **skill:summarize**\n   Description: Does summarize things\n   Inputs: text (text): Text to shorten\n   Outputs: summary (text)\n   Tags: nlp"
        );
        assert_eq!(tools[0].summary(), "skill:summarize - Does summarize things");
    }

    #[test]
    fn injected_context_leaves_empty_catalogs_alone() {
        assert_eq!(inject_skills_context("Be helpful.", &[], PromptStyle::Compact), "Be helpful.");

        let tools = as_agent_tools(&[version("echo", "1.0.0")], ToolNaming::Simple);
        let prompt = inject_skills_context("Be helpful.", &tools, PromptStyle::Compact);
        assert!(prompt.starts_with("Be helpful.\n\n## Available Skills\n"));
        assert!(prompt.contains("- **skill:echo**: Does echo things"));
    }

    #[test]
    fn manifest_document() {
        let doc = manifest(as_agent_tools(&[version("echo", "1.0.0")], ToolNaming::Versioned));
        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(json["version"], MANIFEST_VERSION);
        assert_eq!(json["provider"], "skillhost");
        assert_eq!(json["tools"][0]["name"], "skill:echo@1.0.0");
    }
}

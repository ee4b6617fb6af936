//! Read-only access to the dashboard's tool and environment catalogs.
//!
//! The catalogs are JSON documents written by the dashboard's own CRUD
//! dialogs (`tools.json`, `environments.json`, camelCase keys). This module
//! only deserializes and looks records up; editing and persistence belong to
//! the dashboard, not to the execution core.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

/// A launchable tool as recorded in the catalog.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    /// Opaque record identifier.
    #[serde(default)]
    pub id: String,
    /// Display name shown on the dashboard.
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Category the tool is grouped under (unused by the execution core).
    #[serde(default)]
    pub category_id: Option<String>,
    /// Identifier of the environment the tool runs in.
    #[serde(default)]
    pub environment_id: Option<String>,
    /// Command or script path passed to the environment executable.
    #[serde(default)]
    pub command: String,
    /// Extra arguments, whitespace-separated.
    #[serde(default)]
    pub arguments: Option<String>,
    /// Working directory for the launched process (optional metadata).
    #[serde(default)]
    pub working_directory: Option<String>,
    #[serde(default)]
    pub icon_path: Option<String>,
    /// GUI tools spawn detached; everything else runs in a terminal session.
    #[serde(rename = "hasGUI", default)]
    pub has_gui: bool,
}

/// A runtime environment: the executable a tool is handed to.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Environment {
    #[serde(default)]
    pub id: String,
    /// Display name, e.g. "Python 3".
    pub name: String,
    /// Free-form kind tag ("java", "python", ...), informational only.
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    /// Path to the interpreter or runtime binary.
    #[serde(default)]
    pub executable_path: String,
    /// Startup parameters, whitespace-separated.
    #[serde(default)]
    pub parameters: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// The loaded catalogs, queried by the launcher and the frontend.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pub tools: Vec<Tool>,
    pub environments: Vec<Environment>,
}

impl Catalog {
    /// Loads both catalog files. A missing file yields an empty list rather
    /// than an error, matching the dashboard's first-run behavior.
    pub fn load(tools_path: &Path, environments_path: &Path) -> Result<Self> {
        Ok(Self {
            tools: load_records(tools_path)?,
            environments: load_records(environments_path)?,
        })
    }

    pub fn tool_by_name(&self, name: &str) -> Option<&Tool> {
        self.tools.iter().find(|tool| tool.name == name)
    }

    pub fn environment(&self, id: &str) -> Option<&Environment> {
        self.environments.iter().find(|env| env.id == id)
    }
}

fn load_records<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read catalog file {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse catalog file {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_camel_case_tool_records() {
        let raw = r#"[
            {
                "id": "t1",
                "name": "sqlmap",
                "description": "sql injection scanner",
                "categoryId": "c1",
                "environmentId": "e1",
                "command": "sqlmap.py",
                "arguments": "--batch",
                "workingDirectory": "/opt/sqlmap",
                "iconPath": null,
                "hasGUI": false
            },
            {
                "name": "burp",
                "command": "-jar burpsuite.jar",
                "hasGUI": true
            }
        ]"#;
        let tools: Vec<Tool> = serde_json::from_str(raw).unwrap();
        assert_eq!(tools.len(), 2);
        assert_eq!(tools[0].environment_id.as_deref(), Some("e1"));
        assert_eq!(tools[0].working_directory.as_deref(), Some("/opt/sqlmap"));
        assert!(!tools[0].has_gui);
        assert!(tools[1].has_gui);
        assert!(tools[1].environment_id.is_none());
    }

    #[test]
    fn parses_environment_records_and_looks_up_by_id() {
        let raw = r#"[
            {
                "id": "e1",
                "name": "Python 3",
                "type": "python",
                "executablePath": "/usr/bin/python3",
                "parameters": "-u"
            }
        ]"#;
        let environments: Vec<Environment> = serde_json::from_str(raw).unwrap();
        let catalog = Catalog {
            tools: Vec::new(),
            environments,
        };
        let env = catalog.environment("e1").unwrap();
        assert_eq!(env.executable_path, "/usr/bin/python3");
        assert_eq!(env.parameters.as_deref(), Some("-u"));
        assert!(catalog.environment("e2").is_none());
    }

    #[test]
    fn missing_catalog_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::load(
            &dir.path().join("tools.json"),
            &dir.path().join("environments.json"),
        )
        .unwrap();
        assert!(catalog.tools.is_empty());
        assert!(catalog.environments.is_empty());
    }
}

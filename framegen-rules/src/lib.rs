//! Token correction rules applied before catalog lookup.
//!
//! The table is data: each [`Rule`] is one compatibility fix keyed on token names and on the
//! presence, version or size of tools in the assembly. Rules run in table order.

use std::fs;
use std::path::Path;

use framegen_types::Tool;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("io error: {0}")]
    Io(String),
    #[error("parse error: {0}")]
    Parse(String),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Rule {
    /// One of `tools` is on the assembly and `token` is requested: swap in `replacement`.
    ReplaceWithTool {
        tools: Vec<String>,
        token: String,
        replacement: String,
    },
    /// Drop `token` when any of its successors is also requested.
    Supersede {
        token: String,
        superseded_by: Vec<String>,
    },
    /// Request `companion` alongside `token` for specific tool versions (and sizes).
    AddCompanion {
        token: String,
        tool: String,
        versions: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sizes: Option<Vec<String>>,
        companion: String,
    },
    /// Unconditional rename.
    Replace { token: String, replacement: String },
}

fn contains(tokens: &[String], token: &str) -> bool {
    tokens.iter().any(|t| t == token)
}

fn remove_all(tokens: &mut Vec<String>, token: &str) {
    tokens.retain(|t| t != token);
}

fn push_absent(tokens: &mut Vec<String>, token: &str) {
    if !contains(tokens, token) {
        tokens.push(token.to_string());
    }
}

impl Rule {
    /// Applies the rule in place. Returns whether it fired.
    pub fn apply(&self, tokens: &mut Vec<String>, tools: &[Tool]) -> bool {
        match self {
            Rule::ReplaceWithTool {
                tools: wanted,
                token,
                replacement,
            } => {
                let tool_present = tools.iter().any(|t| wanted.contains(&t.display_name));
                if !tool_present || !contains(tokens, token) {
                    return false;
                }
                remove_all(tokens, token);
                push_absent(tokens, replacement);
                true
            }
            Rule::Supersede { token, superseded_by } => {
                if !contains(tokens, token) || !superseded_by.iter().any(|s| contains(tokens, s)) {
                    return false;
                }
                remove_all(tokens, token);
                true
            }
            Rule::AddCompanion {
                token,
                tool,
                versions,
                sizes,
                companion,
            } => {
                if !contains(tokens, token) || contains(tokens, companion) {
                    return false;
                }
                let Some(tool) = tools.iter().find(|t| &t.display_name == tool) else {
                    return false;
                };
                let version_ok = tool
                    .version
                    .as_ref()
                    .is_some_and(|v| versions.contains(v));
                let size_ok = match sizes {
                    None => true,
                    Some(sizes) => tool.size.as_ref().is_some_and(|s| sizes.contains(s)),
                };
                if !(version_ok && size_ok) {
                    return false;
                }
                tokens.push(companion.clone());
                true
            }
            Rule::Replace { token, replacement } => {
                if !contains(tokens, token) {
                    return false;
                }
                remove_all(tokens, token);
                push_absent(tokens, replacement);
                true
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RuleSet {
    pub rules: Vec<Rule>,
}

#[derive(Clone, Debug)]
pub struct RuleEngine {
    rules: RuleSet,
}

impl RuleEngine {
    pub fn new(rules: RuleSet) -> Self {
        Self { rules }
    }

    /// The compatibility table the catalog currently needs.
    pub fn builtin() -> Self {
        let supersede = |token: &str, by: &[&str]| Rule::Supersede {
            token: token.into(),
            superseded_by: by.iter().map(|s| s.to_string()).collect(),
        };
        let strings = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        Self::new(RuleSet {
            rules: vec![
                Rule::ReplaceWithTool {
                    tools: strings(&["RTA", "CLNK"]),
                    token: "TF_b".into(),
                    replacement: "TFHI_b".into(),
                },
                supersede("DDR_RT_1_r1", &["DDR_RT_2_r1", "DDR_RT_3_r1", "DDR_RT_4_r1"]),
                supersede("DDR_RT_1_r2", &["DDR_RT_2_r2", "DDR_RT_3_r2", "DDR_RT_4_r2"]),
                supersede("DDR_RT_1_r3", &["DDR_RT_2_r3", "DDR_RT_3_r3", "DDR_RT_4_r3"]),
                supersede("C_PKPO4_s", &["C_PKPO3_s"]),
                supersede("O_grcnt_c", &["GRCNTX_c", "GRCNT_c"]),
                supersede("O_RHOB_v", &["RHOB_v", "ROBB_v"]),
                supersede("O_DRHO_v", &["DRHO_v", "DRHB_v"]),
                Rule::AddCompanion {
                    token: "CS3PK_H_mp".into(),
                    tool: "MP3".into(),
                    versions: strings(&["7.7", "8.4", "8.5", "8.7"]),
                    sizes: None,
                    companion: "SCLP_mp".into(),
                },
                Rule::AddCompanion {
                    token: "CSSTAT_mp".into(),
                    tool: "MP3".into(),
                    versions: strings(&["8.5", "8.7"]),
                    sizes: Some(strings(&["8.25", "6.75", "9.0"])),
                    companion: "AET_mp".into(),
                },
                Rule::Replace {
                    token: "O_RBIT_gvr".into(),
                    replacement: "RESBIT_gvr".into(),
                },
            ],
        })
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, RuleError> {
        let rules: RuleSet = serde_yaml::from_str(yaml).map_err(|e| RuleError::Parse(e.to_string()))?;
        Ok(Self::new(rules))
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, RuleError> {
        let text = fs::read_to_string(path).map_err(|e| RuleError::Io(e.to_string()))?;
        Self::from_yaml_str(&text)
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules.rules
    }

    /// Corrects a token list for the given assembly.
    pub fn apply(&self, tokens: &[String], tools: &[Tool]) -> Vec<String> {
        let mut out = tokens.to_vec();
        for (idx, rule) in self.rules.rules.iter().enumerate() {
            if rule.apply(&mut out, tools) {
                debug!(rule = idx, ?rule, "token rule applied");
            }
        }
        out
    }
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::builtin()
    }
}

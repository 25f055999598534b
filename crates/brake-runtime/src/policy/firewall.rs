//! Semantic firewall: per-tool regex rules over call arguments.
//!
//! A rule may carry a `deny_if` set and an `allow_if` set of
//! `argument name -> pattern`. A set matches only when every named argument
//! is present and its value matches the pattern (unanchored search); an
//! empty set matches every call. Deny is checked before allow; rules for the
//! same tool run in listed order and the first one that triggers decides the
//! verdict.

use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{PolicyAction, PolicyContext, PolicyLayer, Verdict};

/// Argument patterns as written in configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ArgumentPatterns {
    #[serde(default)]
    pub arguments: BTreeMap<String, String>,
}

/// One firewall rule as written in configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GranularRule {
    pub tool: String,
    #[serde(default)]
    pub allow_if: Option<ArgumentPatterns>,
    #[serde(default)]
    pub deny_if: Option<ArgumentPatterns>,
    /// Defaults to `block`
    #[serde(default)]
    pub action: Option<PolicyAction>,
}

struct CompiledRule {
    tool: String,
    allow_if: Option<Vec<(String, Regex)>>,
    deny_if: Option<Vec<(String, Regex)>>,
    action: PolicyAction,
}

pub struct GranularAccessPolicy {
    rules: Vec<CompiledRule>,
}

impl GranularAccessPolicy {
    /// Compile all rules up front; an invalid pattern fails construction.
    pub fn new(rules: &[GranularRule]) -> Result<Self> {
        let mut compiled = Vec::with_capacity(rules.len());

        for (index, rule) in rules.iter().enumerate() {
            let action = rule.action.unwrap_or(PolicyAction::Block);
            if action == PolicyAction::RequestApproval {
                bail!(
                    "granular rule #{} for tool '{}': request_approval is not a valid rule action",
                    index,
                    rule.tool
                );
            }

            compiled.push(CompiledRule {
                tool: rule.tool.clone(),
                allow_if: compile_patterns(index, &rule.tool, rule.allow_if.as_ref())?,
                deny_if: compile_patterns(index, &rule.tool, rule.deny_if.as_ref())?,
                action,
            });
        }

        Ok(Self { rules: compiled })
    }
}

fn compile_patterns(
    index: usize,
    tool: &str,
    patterns: Option<&ArgumentPatterns>,
) -> Result<Option<Vec<(String, Regex)>>> {
    let Some(patterns) = patterns else {
        return Ok(None);
    };

    let compiled = patterns
        .arguments
        .iter()
        .map(|(arg, pattern)| {
            let regex = Regex::new(pattern).with_context(|| {
                format!(
                    "granular rule #{} for tool '{}': invalid pattern for argument '{}'",
                    index, tool, arg
                )
            })?;
            Ok((arg.clone(), regex))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Some(compiled))
}

/// String form of an argument value used for matching
fn argument_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// True when every named argument is present and matches its pattern
fn matches_all(args: &Map<String, Value>, patterns: &[(String, Regex)]) -> bool {
    patterns.iter().all(|(name, regex)| {
        args.get(name)
            .map(|value| regex.is_match(&argument_text(value)))
            .unwrap_or(false)
    })
}

impl PolicyLayer for GranularAccessPolicy {
    fn name(&self) -> &str {
        "GranularAccessPolicy"
    }

    fn evaluate(&self, ctx: &PolicyContext) -> Option<Verdict> {
        let tool = ctx.tool_name();
        let args = &ctx.invocation.arguments;

        for rule in self.rules.iter().filter(|r| r.tool == tool) {
            if rule.deny_if.as_ref().is_some_and(|p| matches_all(args, p)) {
                return Some(Verdict::new(
                    self.name(),
                    rule.action,
                    format!(
                        "Tool '{}' arguments match DENY pattern. Blocked by Semantic Firewall.",
                        tool
                    ),
                ));
            }

            if rule.allow_if.as_ref().is_some_and(|p| !matches_all(args, p)) {
                return Some(Verdict::new(
                    self.name(),
                    rule.action,
                    format!(
                        "Tool '{}' arguments do not match ALLOW pattern. Blocked by Semantic Firewall.",
                        tool
                    ),
                ));
            }
        }

        None
    }
}

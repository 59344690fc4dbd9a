// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Declarative variable-name translation.
//!
//! A [`RenameRule`] is an ordered pipeline of three clauses —
//! strip-prefix, strip-known-suffixes, add-prefix — applied to a live
//! variable name to produce the name its value was serialized under.
//! Keeping the clauses explicit (and separately tested) is what makes
//! the scope translation auditable; the invariant that matters is in
//! [`build_variable_map`]: the translation must be a bijection.

use std::collections::HashMap;

use crate::CheckpointError;

/// Known trailing markers that serializers append to variable names but
/// checkpoints store without (e.g. output-slot markers like `:0`).
pub const KNOWN_SUFFIXES: &[&str] = &[":0"];

/// An ordered rename pipeline: strip-prefix → strip-suffixes → add-prefix.
#[derive(Debug, Clone, Default)]
pub struct RenameRule {
    strip_prefix: Option<String>,
    strip_suffixes: Vec<String>,
    add_prefix: Option<String>,
}

impl RenameRule {
    /// Creates an empty rule (the identity translation).
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes `prefix` from the front of the name, if present.
    pub fn strip_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.strip_prefix = Some(prefix.into());
        self
    }

    /// Removes any of `suffixes` from the end of the name, repeatedly,
    /// until none matches.
    pub fn strip_suffixes<I, S>(mut self, suffixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.strip_suffixes = suffixes.into_iter().map(Into::into).collect();
        self
    }

    /// Prepends `prefix` to the name.
    pub fn add_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.add_prefix = Some(prefix.into());
        self
    }

    /// Applies the pipeline to a single name.
    pub fn apply(&self, name: &str) -> String {
        let mut out = name;

        if let Some(prefix) = &self.strip_prefix {
            out = out.strip_prefix(prefix.as_str()).unwrap_or(out);
        }

        let mut trimmed = out.to_string();
        loop {
            let before = trimmed.len();
            for suffix in &self.strip_suffixes {
                if let Some(rest) = trimmed.strip_suffix(suffix.as_str()) {
                    trimmed = rest.to_string();
                }
            }
            if trimmed.len() == before {
                break;
            }
        }

        match &self.add_prefix {
            Some(prefix) => format!("{prefix}{trimmed}"),
            None => trimmed,
        }
    }
}

/// The live-to-checkpoint name mapping, built once after construction
/// and retained read-only.
#[derive(Debug, Clone)]
pub struct VariableMap {
    entries: Vec<(String, String)>,
}

impl VariableMap {
    /// Iterates `(live_name, checkpoint_name)` pairs in live-name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(l, c)| (l.as_str(), c.as_str()))
    }

    /// Number of mapped variables.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is mapped.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Builds the rename map for every live variable under `live_scope`.
///
/// The rule applied is strip `"{live_scope}/"` → strip
/// [`KNOWN_SUFFIXES`] → prepend `"{checkpoint_scope}/"`.
///
/// # Errors
/// Returns [`CheckpointError::NameCollision`] if two live names collapse
/// onto one checkpoint name — the mapping must stay a bijection or a
/// restore would silently load one tensor into two variables.
pub fn build_variable_map(
    live_names: &[String],
    live_scope: &str,
    checkpoint_scope: &str,
) -> Result<VariableMap, CheckpointError> {
    let rule = RenameRule::new()
        .strip_prefix(format!("{live_scope}/"))
        .strip_suffixes(KNOWN_SUFFIXES.iter().copied())
        .add_prefix(format!("{checkpoint_scope}/"));

    let mut entries = Vec::with_capacity(live_names.len());
    let mut seen: HashMap<String, String> = HashMap::with_capacity(live_names.len());

    for live in live_names {
        let checkpoint_name = rule.apply(live);
        if let Some(first) = seen.insert(checkpoint_name.clone(), live.clone()) {
            return Err(CheckpointError::NameCollision {
                checkpoint_name,
                first,
                second: live.clone(),
            });
        }
        entries.push((live.clone(), checkpoint_name));
    }

    Ok(VariableMap { entries })
}

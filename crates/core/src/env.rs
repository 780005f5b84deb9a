//! Build environment and placeholder expansion.
//!
//! Configured remote names, branch names, URLs and ref-specs may reference
//! build variables as `$NAME` or `${NAME}`. Expansion is a single pass of
//! literal substitution: unknown variables are left verbatim and substituted
//! values are never expanded again.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::sync::LazyLock;

use regex_lite::{Captures, Regex};
use serde::{Deserialize, Serialize};
use tracing::debug;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$([A-Za-z0-9_]+|\{[A-Za-z0-9_.]+\})").expect("placeholder regex is valid")
});

/// Variables available to a build step, keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Environment {
    vars: BTreeMap<String, String>,
}

impl Environment {
    /// An empty environment.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the current process environment.
    ///
    /// Variables whose name or value is not valid UTF-8 cannot appear in a
    /// placeholder expansion and are skipped.
    pub fn from_process() -> Self {
        Self::from_os_vars(std::env::vars_os())
    }

    fn from_os_vars<I>(vars: I) -> Self
    where
        I: IntoIterator<Item = (OsString, OsString)>,
    {
        vars.into_iter()
            .filter_map(|(name, value)| match (name.into_string(), value.into_string()) {
                (Ok(name), Ok(value)) => Some((name, value)),
                (name, _) => {
                    debug!(name = ?name, "skipping environment variable that is not valid UTF-8");
                    None
                }
            })
            .collect()
    }

    /// Set a variable, replacing any previous value.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Replace every recognized `$NAME` / `${NAME}` token in `template`.
    pub fn expand(&self, template: &str) -> String {
        let expanded = PLACEHOLDER.replace_all(template, |caps: &Captures<'_>| {
            let token = &caps[0];
            let name = caps[1].trim_start_matches('{').trim_end_matches('}');
            match self.vars.get(name) {
                Some(value) => value.clone(),
                None => token.to_string(),
            }
        });
        if expanded != template {
            debug!(template, expanded = %expanded, "expanded placeholders");
        }
        expanded.into_owned()
    }

    /// Expand each template in order.
    pub fn expand_all(&self, templates: &[String]) -> Vec<String> {
        templates.iter().map(|t| self.expand(t)).collect()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Environment {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            vars: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl<K: Into<String>, V: Into<String>> Extend<(K, V)> for Environment {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (k, v) in iter {
            self.insert(k, v);
        }
    }
}

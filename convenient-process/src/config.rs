//! Build configurations and flag handling
//!
//! A [`BuildConfiguration`] is a target name plus a set of `-DKEY=VALUE`
//! cache flags. Flags are keyed by name, so merging an override set replaces
//! existing entries with the same key and leaves everything else alone.
//! Flags the driver knows nothing about are carried through verbatim.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Prefix that marks a command-line argument as a build-system flag
pub const FLAG_PREFIX: &str = "-D";

/// A single build-system flag
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BuildFlag {
    /// Cache entry name, including an optional `:TYPE` suffix
    pub key: String,
    /// Value after `=`; `None` for a bare `-DKEY`
    pub value: Option<String>,
}

impl BuildFlag {
    /// Create a `KEY=VALUE` flag
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: Some(value.into()),
        }
    }

    /// Parse `-DKEY=VALUE` or `-DKEY`. Returns `None` without the prefix.
    pub fn parse(arg: &str) -> Option<Self> {
        let body = arg.strip_prefix(FLAG_PREFIX)?;
        if body.is_empty() {
            return None;
        }
        Some(match body.split_once('=') {
            Some((key, value)) => Self::new(key, value),
            None => Self {
                key: body.to_string(),
                value: None,
            },
        })
    }

    /// Render in build-system syntax
    pub fn to_arg(&self) -> String {
        match &self.value {
            Some(value) => format!("{FLAG_PREFIX}{}={value}", self.key),
            None => format!("{FLAG_PREFIX}{}", self.key),
        }
    }
}

impl fmt::Display for BuildFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_arg())
    }
}

/// Build target plus its cache flags
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildConfiguration {
    /// Build-system target to build (e.g. `test`, `dai`)
    pub target: String,
    flags: BTreeMap<String, Option<String>>,
}

impl BuildConfiguration {
    /// Create a configuration with no flags
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            flags: BTreeMap::new(),
        }
    }

    /// Builder-style flag setter
    #[must_use]
    pub fn with_flag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(BuildFlag::new(key, value));
        self
    }

    /// Insert or replace one flag
    pub fn set(&mut self, flag: BuildFlag) {
        let _ = self.flags.insert(flag.key, flag.value);
    }

    /// Apply overrides in order; later entries win over earlier ones
    pub fn merge<I>(&mut self, overrides: I)
    where
        I: IntoIterator<Item = BuildFlag>,
    {
        for flag in overrides {
            self.set(flag);
        }
    }

    /// Copy of `self` with `overrides` applied, retargeted to `target`
    #[must_use]
    pub fn derive<I>(&self, target: impl Into<String>, overrides: I) -> Self
    where
        I: IntoIterator<Item = BuildFlag>,
    {
        let mut derived = self.clone();
        derived.target = target.into();
        derived.merge(overrides);
        derived
    }

    /// Look up a flag value. Bare flags yield `Some(None)`.
    pub fn get(&self, key: &str) -> Option<Option<&str>> {
        self.flags.get(key).map(Option::as_deref)
    }

    /// Iterate flags in their serialized order
    pub fn flags(&self) -> impl Iterator<Item = BuildFlag> + '_ {
        self.flags.iter().map(|(key, value)| BuildFlag {
            key: key.clone(),
            value: value.clone(),
        })
    }

    /// Number of flags
    pub fn len(&self) -> usize {
        self.flags.len()
    }

    /// Whether the configuration carries no flags
    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }

    /// Serialize to `-DKEY=VALUE` arguments
    pub fn to_args(&self) -> Vec<String> {
        self.flags().map(|flag| flag.to_arg()).collect()
    }

    /// Rebuild a configuration from serialized arguments, ignoring non-flags
    pub fn from_args<S: AsRef<str>>(target: impl Into<String>, args: &[S]) -> Self {
        let mut config = Self::new(target);
        config.merge(args.iter().filter_map(|arg| BuildFlag::parse(arg.as_ref())));
        config
    }
}

/// Split caller arguments into build flags and program arguments
///
/// Anything starting with [`FLAG_PREFIX`] is a flag; the rest is handed to
/// the program under test in its original order.
pub fn split_arguments<S: AsRef<str>>(args: &[S]) -> (Vec<BuildFlag>, Vec<String>) {
    let mut flags = Vec::new();
    let mut program_args = Vec::new();

    for arg in args {
        let arg = arg.as_ref();
        match BuildFlag::parse(arg) {
            Some(flag) => flags.push(flag),
            None => program_args.push(arg.to_string()),
        }
    }

    (flags, program_args)
}

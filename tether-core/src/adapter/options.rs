//! Adapter configuration.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// When a computed property recomputes, and how it notifies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalMode {
    /// Recompute as soon as a dependency changes; notify only if the result
    /// differs.
    #[default]
    Immediate,
    /// Mark dirty and notify; recompute on the next read.
    Lazy,
    /// Never cache; every read recomputes.
    OnDemand,
}

/// Whether producer listeners keep the adapter alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingStrength {
    #[default]
    Weak,
    Strong,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterOptions {
    pub mode: RetrievalMode,
    pub binding: BindingStrength,
}

impl AdapterOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(mut self, mode: RetrievalMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn binding(mut self, binding: BindingStrength) -> Self {
        self.binding = binding;
        self
    }

    /// Read options from JSON such as `{"mode": "lazy"}`. Missing fields
    /// take their defaults.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|err| Error::evaluation(format!("invalid adapter options: {err}")))
    }
}

impl From<RetrievalMode> for AdapterOptions {
    fn from(mode: RetrievalMode) -> Self {
        Self::new().mode(mode)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_immediate_and_weak() {
        let options = AdapterOptions::default();
        assert_eq!(options.mode, RetrievalMode::Immediate);
        assert_eq!(options.binding, BindingStrength::Weak);
    }

    #[test]
    fn json_uses_snake_case_and_defaults() {
        let options = AdapterOptions::from_json(r#"{"mode": "on_demand"}"#).unwrap();
        assert_eq!(options, AdapterOptions::new().mode(RetrievalMode::OnDemand));

        let options = AdapterOptions::from_json(r#"{"binding": "strong"}"#).unwrap();
        assert_eq!(options.binding, BindingStrength::Strong);
        assert_eq!(options.mode, RetrievalMode::Immediate);

        let json = serde_json::to_string(&AdapterOptions::new().mode(RetrievalMode::Lazy)).unwrap();
        assert_eq!(json, r#"{"mode":"lazy","binding":"weak"}"#);
    }

    #[test]
    fn unknown_mode_is_rejected() {
        assert!(AdapterOptions::from_json(r#"{"mode": "eventually"}"#).is_err());
    }
}

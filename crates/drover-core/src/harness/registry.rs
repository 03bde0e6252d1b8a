//! Harness registry -- the set of known backends and the selection rule.
//!
//! The run loop never names a backend directly. It hands a
//! [`SelectionPolicy`] to [`HarnessRegistry::select`], which resolves an
//! explicit override first, then the configured priority list, then the
//! fixed fallback order.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, info};

use super::aider::AiderAdapter;
use super::claude::ClaudeAdapter;
use super::codex::CodexAdapter;
use super::error::HarnessError;
use super::opencode::OpenCodeAdapter;
use super::trait_def::Harness;
use super::types::{Capability, HarnessKind};

/// How to choose a backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionPolicy {
    /// Always use this backend. Fails if it is not installed.
    pub override_kind: Option<HarnessKind>,
    /// Try these in order before the fallback order.
    pub priority: Vec<HarnessKind>,
}

impl SelectionPolicy {
    /// Build a policy from configured names.
    ///
    /// # Errors
    ///
    /// [`HarnessError::UnknownHarness`] for a name that is not a backend.
    pub fn from_names<S: AsRef<str>>(
        override_name: Option<&str>,
        priority: &[S],
    ) -> Result<Self, HarnessError> {
        let override_kind = override_name
            .map(str::parse::<HarnessKind>)
            .transpose()?;
        let priority = priority
            .iter()
            .map(|name| name.as_ref().parse::<HarnessKind>())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            override_kind,
            priority,
        })
    }

    /// Candidates in the order they will be tried, without duplicates.
    pub fn candidates(&self) -> Vec<HarnessKind> {
        if let Some(kind) = self.override_kind {
            return vec![kind];
        }
        let mut order = Vec::with_capacity(HarnessKind::ALL.len());
        for kind in self.priority.iter().chain(HarnessKind::FALLBACK_ORDER.iter()) {
            if !order.contains(kind) {
                order.push(*kind);
            }
        }
        order
    }
}

/// Availability report for one registered backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HarnessAvailability {
    pub kind: HarnessKind,
    pub binary: String,
    pub available: bool,
    pub capabilities: Vec<Capability>,
}

/// A collection of registered [`Harness`] implementations, keyed by kind.
#[derive(Default)]
pub struct HarnessRegistry {
    harnesses: BTreeMap<HarnessKind, Box<dyn Harness>>,
}

impl HarnessRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding all four backends with their default binaries.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(ClaudeAdapter::new());
        registry.register(CodexAdapter::new());
        registry.register(AiderAdapter::new());
        registry.register(OpenCodeAdapter::new());
        registry
    }

    /// Register a harness adapter under its [`Harness::kind`]. Returns the
    /// adapter it replaced, if any.
    pub fn register(&mut self, harness: impl Harness + 'static) -> Option<Box<dyn Harness>> {
        self.harnesses.insert(harness.kind(), Box::new(harness))
    }

    /// Look up a harness by kind.
    pub fn get(&self, kind: HarnessKind) -> Option<&dyn Harness> {
        self.harnesses.get(&kind).map(|b| b.as_ref())
    }

    /// Registered kinds, in declaration order.
    pub fn list(&self) -> Vec<HarnessKind> {
        self.harnesses.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.harnesses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.harnesses.is_empty()
    }

    /// Resolve `policy` to an installed backend.
    ///
    /// # Errors
    ///
    /// [`HarnessError::NoHarnessAvailable`] listing every kind tried.
    pub fn select(&self, policy: &SelectionPolicy) -> Result<&dyn Harness, HarnessError> {
        let mut tried = Vec::new();
        for kind in policy.candidates() {
            tried.push(kind);
            let Some(harness) = self.get(kind) else {
                debug!(harness = %kind, "not registered");
                continue;
            };
            if harness.is_available() {
                info!(harness = %kind, binary = harness.binary(), "selected harness");
                return Ok(harness);
            }
            debug!(harness = %kind, binary = harness.binary(), "binary not found");
        }
        Err(HarnessError::NoHarnessAvailable { tried })
    }

    /// Availability of every registered backend.
    pub fn availability(&self) -> Vec<HarnessAvailability> {
        self.harnesses
            .values()
            .map(|h| HarnessAvailability {
                kind: h.kind(),
                binary: h.binary().to_string(),
                available: h.is_available(),
                capabilities: h.capabilities().iter().collect(),
            })
            .collect()
    }
}

impl std::fmt::Debug for HarnessRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HarnessRegistry")
            .field("harnesses", &self.harnesses.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MISSING: &str = "/nonexistent/drover/bin";

    /// Registry where only the kinds in `installed` point at a real file.
    fn registry_with(installed: &[HarnessKind], dir: &std::path::Path) -> HarnessRegistry {
        let real = dir.join("agent");
        std::fs::write(&real, "#!/bin/sh\n").unwrap();
        let real = real.to_str().unwrap().to_string();
        let bin = |kind: HarnessKind| {
            if installed.contains(&kind) {
                real.clone()
            } else {
                format!("{MISSING}/{}", kind.name())
            }
        };

        let mut registry = HarnessRegistry::new();
        registry.register(ClaudeAdapter::with_binary(bin(HarnessKind::Claude)));
        registry.register(CodexAdapter::with_binary(bin(HarnessKind::Codex)));
        registry.register(AiderAdapter::with_binary(bin(HarnessKind::Aider)));
        registry.register(OpenCodeAdapter::with_binary(bin(HarnessKind::OpenCode)));
        registry
    }

    #[test]
    fn defaults_register_all_four() {
        let registry = HarnessRegistry::with_defaults();
        assert_eq!(registry.len(), 4);
        assert_eq!(registry.list(), HarnessKind::ALL.to_vec());
        assert!(format!("{registry:?}").contains("Claude"));
    }

    #[test]
    fn register_replaces_existing() {
        let mut registry = HarnessRegistry::new();
        assert!(registry.register(AiderAdapter::new()).is_none());
        let old = registry.register(AiderAdapter::with_binary("/opt/aider"));
        assert_eq!(old.unwrap().binary(), "aider");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn override_wins_over_priority() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = registry_with(&[HarnessKind::Claude, HarnessKind::Aider], tmp.path());
        let policy = SelectionPolicy {
            override_kind: Some(HarnessKind::Aider),
            priority: vec![HarnessKind::Claude],
        };
        assert_eq!(registry.select(&policy).unwrap().kind(), HarnessKind::Aider);
    }

    #[test]
    fn missing_override_fails_without_fallback() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = registry_with(&[HarnessKind::Claude], tmp.path());
        let policy = SelectionPolicy {
            override_kind: Some(HarnessKind::Codex),
            priority: vec![],
        };
        match registry.select(&policy) {
            Err(HarnessError::NoHarnessAvailable { tried }) => {
                assert_eq!(tried, vec![HarnessKind::Codex]);
            }
            other => panic!("unexpected: {:?}", other.map(|h| h.kind())),
        }
    }

    #[test]
    fn priority_then_fallback_order() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = registry_with(&[HarnessKind::Codex, HarnessKind::Aider], tmp.path());

        let policy = SelectionPolicy {
            override_kind: None,
            priority: vec![HarnessKind::Aider],
        };
        assert_eq!(registry.select(&policy).unwrap().kind(), HarnessKind::Aider);

        // Fallback order is claude, opencode, codex, aider.
        let policy = SelectionPolicy::default();
        assert_eq!(registry.select(&policy).unwrap().kind(), HarnessKind::Codex);
    }

    #[test]
    fn nothing_installed_lists_every_kind() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = registry_with(&[], tmp.path());
        let err = match registry.select(&SelectionPolicy::default()) {
            Err(e) => e,
            Ok(h) => panic!("selected {}", h.kind()),
        };
        match err {
            HarnessError::NoHarnessAvailable { tried } => {
                assert_eq!(tried, HarnessKind::FALLBACK_ORDER.to_vec());
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn candidates_deduplicate() {
        let policy = SelectionPolicy {
            override_kind: None,
            priority: vec![HarnessKind::Aider, HarnessKind::Claude, HarnessKind::Aider],
        };
        assert_eq!(
            policy.candidates(),
            vec![
                HarnessKind::Aider,
                HarnessKind::Claude,
                HarnessKind::OpenCode,
                HarnessKind::Codex
            ]
        );
    }

    #[test]
    fn from_names_rejects_unknown() {
        let policy = SelectionPolicy::from_names(Some("codex"), &["aider", "claude"]).unwrap();
        assert_eq!(policy.override_kind, Some(HarnessKind::Codex));
        assert_eq!(policy.priority, vec![HarnessKind::Aider, HarnessKind::Claude]);

        let err = SelectionPolicy::from_names::<&str>(None, &["cursor"]).unwrap_err();
        assert!(matches!(err, HarnessError::UnknownHarness(name) if name == "cursor"));
    }

    #[test]
    fn availability_reports_each_backend() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = registry_with(&[HarnessKind::OpenCode], tmp.path());
        let report = registry.availability();
        assert_eq!(report.len(), 4);
        let opencode = report
            .iter()
            .find(|a| a.kind == HarnessKind::OpenCode)
            .unwrap();
        assert!(opencode.available);
        assert!(opencode.capabilities.contains(&Capability::TokenReporting));
        assert!(report.iter().filter(|a| a.available).count() == 1);
    }
}

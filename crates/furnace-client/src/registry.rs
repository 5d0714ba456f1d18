use std::collections::BTreeSet;
use std::fmt;

use serde::Deserialize;

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Target {
    pub namespace: String,
    pub name: String,
}

impl Target {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

// Wire shape of one lease. The proxy also sends ip/port/expires, which the
// client has no use for.
#[derive(Debug, Deserialize)]
pub(crate) struct Registration {
    pub(crate) namespace: String,
    #[serde(rename = "podName")]
    pub(crate) pod_name: String,
}

impl From<Registration> for Target {
    fn from(r: Registration) -> Self {
        Target::new(r.namespace, r.pod_name)
    }
}

pub(crate) fn parse_registrations(body: &str) -> Result<Vec<Target>> {
    let regs: Vec<Registration> = serde_json::from_str(body)?;
    Ok(regs.into_iter().map(Target::from).collect())
}

#[derive(Debug, Default, Clone)]
pub struct TargetRegistry {
    targets: Vec<Target>,
    refreshed_at: Option<chrono::DateTime<chrono::Local>>,
    consecutive_failures: u32,
}

impl TargetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one fetch result. Failures are logged and the previous list is
    /// kept. Returns whether the list was replaced.
    pub fn apply_fetch(&mut self, result: Result<Vec<Target>>) -> bool {
        match result {
            Ok(targets) => {
                tracing::debug!(count = targets.len(), "registry refreshed");
                self.targets = targets;
                self.refreshed_at = Some(chrono::Local::now());
                self.consecutive_failures = 0;
                true
            }
            Err(e) => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                tracing::warn!(
                    error = %e,
                    failures = self.consecutive_failures,
                    "registry fetch failed; keeping previous targets"
                );
                false
            }
        }
    }

    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn refreshed_at(&self) -> Option<chrono::DateTime<chrono::Local>> {
        self.refreshed_at
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn namespaces(&self) -> Vec<String> {
        let set: BTreeSet<&str> = self.targets.iter().map(|t| t.namespace.as_str()).collect();
        set.into_iter().map(str::to_string).collect()
    }

    pub fn targets_in(&self, namespace: &str) -> Vec<String> {
        let set: BTreeSet<&str> = self
            .targets
            .iter()
            .filter(|t| t.namespace == namespace)
            .map(|t| t.name.as_str())
            .collect();
        set.into_iter().map(str::to_string).collect()
    }

    pub fn contains(&self, target: &Target) -> bool {
        self.targets.iter().any(|t| t == target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn parses_lease_json_and_ignores_extra_fields() {
        let body = r#"[
            {"podName":"a","namespace":"default","ip":"10.0.0.1","port":12380,"expires":1},
            {"podName":"b","namespace":"default"}
        ]"#;
        let targets = parse_registrations(body).unwrap();
        assert_eq!(
            targets,
            vec![Target::new("default", "a"), Target::new("default", "b")]
        );
    }

    #[test]
    fn rejects_malformed_body() {
        assert!(parse_registrations("{\"oops\":").is_err());
    }

    #[test]
    fn derived_views_are_sorted_and_deduplicated() {
        let mut reg = TargetRegistry::new();
        reg.apply_fetch(Ok(vec![
            Target::new("web", "z"),
            Target::new("default", "b"),
            Target::new("web", "c"),
            Target::new("default", "a"),
            Target::new("default", "b"),
        ]));
        assert_eq!(reg.namespaces(), vec!["default", "web"]);
        assert_eq!(reg.targets_in("default"), vec!["a", "b"]);
        assert_eq!(reg.targets_in("web"), vec!["c", "z"]);
        assert!(reg.targets_in("missing").is_empty());
    }

    #[test]
    fn failed_fetch_keeps_previous_list() {
        let mut reg = TargetRegistry::new();
        assert!(reg.apply_fetch(Ok(vec![Target::new("default", "a")])));
        assert!(!reg.apply_fetch(Err(Error::msg("connection refused"))));
        assert_eq!(reg.targets(), &[Target::new("default", "a")]);
        assert_eq!(reg.consecutive_failures(), 1);

        assert!(reg.apply_fetch(Ok(Vec::new())));
        assert!(reg.is_empty());
        assert_eq!(reg.consecutive_failures(), 0);
    }
}

//! Environment variable configuration
//!
//! Provides environment variable overrides for command line defaults.

use std::env;
use std::path::PathBuf;

/// Environment variable prefix
const ENV_PREFIX: &str = "GUESTRUN";

/// Overrides read from environment variables
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EnvConfig {
    /// Plan file from GUESTRUN_PLAN
    pub plan: Option<PathBuf>,
    /// Step working directory from GUESTRUN_WORKDIR
    pub workdir: Option<PathBuf>,
    /// Worker pool size from GUESTRUN_MAX_WORKERS
    pub max_workers: Option<usize>,
    /// Stop after the first failure, from GUESTRUN_EXIT_FIRST
    pub exit_first: Option<bool>,
}

impl EnvConfig {
    /// Load configuration from environment variables
    pub fn load() -> Self {
        Self::from_lookup(|name| env::var(format!("{ENV_PREFIX}_{name}")).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            plan: lookup("PLAN").map(PathBuf::from),
            workdir: lookup("WORKDIR").map(PathBuf::from),
            max_workers: lookup("MAX_WORKERS").and_then(|v| v.parse().ok()),
            exit_first: lookup("EXIT_FIRST").map(|v| parse_bool(&v)),
        }
    }

    /// Check if any environment variables are set
    pub fn has_any(&self) -> bool {
        self.plan.is_some()
            || self.workdir.is_some()
            || self.max_workers.is_some()
            || self.exit_first.is_some()
    }

    /// Print current environment configuration
    pub fn print_summary(&self) {
        println!("Environment Configuration:");
        if !self.has_any() {
            println!("  (no {ENV_PREFIX}_* variables set)");
            return;
        }
        println!("  {}_PLAN:        {:?}", ENV_PREFIX, self.plan);
        println!("  {}_WORKDIR:     {:?}", ENV_PREFIX, self.workdir);
        println!("  {}_MAX_WORKERS: {:?}", ENV_PREFIX, self.max_workers);
        println!("  {}_EXIT_FIRST:  {:?}", ENV_PREFIX, self.exit_first);
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.to_lowercase().as_str(),
        "1" | "true" | "yes" | "on" | "enabled"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> EnvConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        EnvConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_empty_environment() {
        let config = lookup(&[]);
        assert!(!config.has_any());
        assert_eq!(config, EnvConfig::default());
    }

    #[test]
    fn test_overrides() {
        let config = lookup(&[
            ("PLAN", "plans/smoke.yaml"),
            ("MAX_WORKERS", "8"),
            ("EXIT_FIRST", "yes"),
        ]);

        assert!(config.has_any());
        assert_eq!(config.plan, Some(PathBuf::from("plans/smoke.yaml")));
        assert_eq!(config.max_workers, Some(8));
        assert_eq!(config.exit_first, Some(true));
        assert!(config.workdir.is_none());
    }

    #[test]
    fn test_invalid_number_ignored() {
        assert_eq!(lookup(&[("MAX_WORKERS", "many")]).max_workers, None);
    }

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool("On"));
        assert!(!parse_bool("0"));
        assert!(!parse_bool("off"));
    }
}

use crate::grading;
use std::path::PathBuf;

pub const ENV_WORKSPACE: &str = "SRMS_WORKSPACE";
pub const ENV_DEFAULT_SCHEME: &str = "SRMS_DEFAULT_SCHEME";
pub const ENV_LOG: &str = "SRMS_LOG";

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Workspace opened before the first request, if any.
    pub workspace: Option<PathBuf>,
    pub default_scheme: String,
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace: None,
            default_scheme: grading::NEPAL.to_string(),
            log_filter: "info".to_string(),
        }
    }
}

impl Config {
    /// Reads `SRMS_*` variables, after loading a `.env` file if one exists.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Config::default();
        let non_empty = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(ws) = non_empty(ENV_WORKSPACE) {
            cfg.workspace = Some(PathBuf::from(ws));
        }
        if let Some(scheme) = non_empty(ENV_DEFAULT_SCHEME) {
            let scheme = scheme.to_ascii_lowercase();
            let known = grading::builtin_schemes()
                .iter()
                .any(|s| s.name == scheme);
            if !known {
                anyhow::bail!("{} names an unknown grading scheme: {}", ENV_DEFAULT_SCHEME, scheme);
            }
            cfg.default_scheme = scheme;
        }
        if let Some(filter) = non_empty(ENV_LOG) {
            cfg.log_filter = filter;
        }
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let cfg = Config::from_lookup(lookup(&[])).expect("config");
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.default_scheme, "nepal");
    }

    #[test]
    fn reads_overrides() {
        let cfg = Config::from_lookup(lookup(&[
            (ENV_WORKSPACE, "/tmp/srms"),
            (ENV_DEFAULT_SCHEME, " International "),
            (ENV_LOG, "srmsd=debug"),
        ]))
        .expect("config");
        assert_eq!(cfg.workspace, Some(PathBuf::from("/tmp/srms")));
        assert_eq!(cfg.default_scheme, "international");
        assert_eq!(cfg.log_filter, "srmsd=debug");
    }

    #[test]
    fn rejects_unknown_scheme() {
        assert!(Config::from_lookup(lookup(&[(ENV_DEFAULT_SCHEME, "martian")])).is_err());
    }

    #[test]
    fn blank_values_are_ignored() {
        let cfg = Config::from_lookup(lookup(&[(ENV_WORKSPACE, "  ")])).expect("config");
        assert!(cfg.workspace.is_none());
    }
}

use anyhow::{Context, Result};
use keystone_auth_core::{PolicySet, SyncConfig};
use std::path::Path;

/// Reads a policy file holding a JSON list of rules.
pub fn load_policy(path: &Path) -> Result<PolicySet> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read policy file {}", path.display()))?;
    PolicySet::from_json(&json)
        .with_context(|| format!("failed to parse policy file {}", path.display()))
}

/// Reads a YAML sync configuration file. The result is not validated.
pub fn load_sync_config(path: &Path) -> Result<SyncConfig> {
    let yaml = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read sync config file {}", path.display()))?;
    SyncConfig::from_yaml(&yaml)
        .with_context(|| format!("failed to parse sync config file {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("temp file must be created");
        file.write_all(contents.as_bytes())
            .expect("temp file must be written");
        file
    }

    #[test]
    fn loads_policy() {
        let file = write(r#"[{"nonresource": {"verbs": ["get"], "path": "/version"}}]"#);
        let policy = load_policy(file.path()).expect("policy must load");
        assert_eq!(policy.len(), 1);
    }

    #[test]
    fn loads_sync_config() {
        let file = write("data_types_to_sync:\n  - projects\nprojects_black_list:\n  - p1\n");
        let sc = load_sync_config(file.path()).expect("sync config must load");
        assert_eq!(sc.data_types_to_sync, vec!["projects"]);
        assert_eq!(sc.projects_black_list, vec!["p1"]);
        assert_eq!(sc.namespace_format, "%i");
    }

    #[test]
    fn reports_path_on_failure() {
        let file = write("not: [a, policy");
        let error = load_policy(file.path()).expect_err("policy must not load");
        assert!(error
            .to_string()
            .contains(&file.path().display().to_string()));

        let missing = file.path().with_extension("missing");
        let error = load_sync_config(&missing).expect_err("sync config must not load");
        assert!(error.to_string().starts_with("failed to read sync config file"));
    }
}

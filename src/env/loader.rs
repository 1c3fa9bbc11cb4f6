use std::{fs, io::Cursor, path::Path};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::env::{EnvMap, Environment};

#[derive(Debug, Deserialize)]
struct EnvironmentFile {
    name: Option<String>,
    #[serde(default, alias = "variables")]
    values: EnvMap,
}

/// Loads an environment from a `.json` document or a dotenv file.
///
/// The environment name defaults to the file stem.
pub fn load_environment(path: &Path) -> Result<Environment> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading environment {}", path.display()))?;
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "environment".to_string());

    let is_json = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if is_json {
        let file: EnvironmentFile = serde_json::from_str(&content)
            .with_context(|| format!("parsing environment {}", path.display()))?;
        return Ok(Environment {
            name: file.name.unwrap_or(stem),
            variables: file.values,
        });
    }

    let mut variables = EnvMap::new();
    for item in dotenvy::from_read_iter(Cursor::new(content)) {
        let (key, value) =
            item.with_context(|| format!("parsing env file {}", path.display()))?;
        variables.insert(key, value);
    }

    Ok(Environment {
        name: stem,
        variables,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use tempfile::tempdir;

    #[test]
    fn loads_dotenv_files() -> Result<()> {
        let temp = tempdir()?;
        let path = temp.path().join("staging.env");
        fs::write(&path, "HOST=staging.example.com\nTOKEN=abc\n")?;

        let env = load_environment(&path)?;
        assert_eq!(env.name, "staging");
        assert_eq!(env.variables.get("TOKEN").map(String::as_str), Some("abc"));
        Ok(())
    }

    #[test]
    fn loads_json_environments() -> Result<()> {
        let temp = tempdir()?;
        let path = temp.path().join("dev.json");
        fs::write(&path, r#"{"name":"Development","values":{"host":"localhost"}}"#)?;

        let env = load_environment(&path)?;
        assert_eq!(env.name, "Development");
        assert_eq!(env.variables.get("host").map(String::as_str), Some("localhost"));
        Ok(())
    }

    #[test]
    fn reports_missing_files() {
        let err = load_environment(Path::new("does-not-exist.env")).unwrap_err();
        assert!(err.to_string().contains("reading environment"));
    }
}

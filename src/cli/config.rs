use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::cli::args::IndexArgs;

/// Top-level representation of `.scip-index/config.toml`.
#[derive(Debug, Default, Deserialize)]
pub struct CliConfig {
    #[serde(default)]
    pub index: Option<IndexSection>,
}

#[derive(Debug, Default, Deserialize)]
pub struct IndexSection {
    #[serde(default)]
    pub derived_data: Option<PathBuf>,
    #[serde(default)]
    pub project_root: Option<PathBuf>,
    #[serde(default)]
    pub output: Option<PathBuf>,
    #[serde(default)]
    pub incremental: Option<bool>,
    #[serde(default)]
    pub include_snippets: Option<bool>,
    #[serde(default)]
    pub modules: Vec<String>,
}

pub fn load_cli_config() -> Result<Option<CliConfig>> {
    let cwd = std::env::current_dir().context("failed to read current directory")?;
    let Some(path) = find_project_config(&cwd) else {
        return Ok(None);
    };

    let contents = fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    let config: CliConfig = toml::from_str(&contents)
        .with_context(|| format!("failed to parse TOML config at {}", path.display()))?;

    Ok(Some(config))
}

fn find_project_config(start: &Path) -> Option<PathBuf> {
    let mut dir = Some(start);

    while let Some(current) = dir {
        let config_toml = current.join(".scip-index").join("config.toml");
        if config_toml.is_file() {
            return Some(config_toml);
        }
        dir = current.parent();
    }

    None
}

/// CLI flags win over config values; config only fills in what the CLI
/// left unset.
pub fn apply_index_config_defaults(config: &CliConfig, args: &mut IndexArgs) {
    let Some(index) = &config.index else {
        return;
    };

    if args.derived_data.is_none() {
        args.derived_data = index.derived_data.clone();
    }
    if args.project_root.is_none() {
        args.project_root = index.project_root.clone();
    }
    if args.output.is_none() {
        args.output = index.output.clone();
    }
    if !args.incremental {
        args.incremental = index.incremental.unwrap_or(false);
    }
    if args.modules.is_empty() {
        args.modules = index.modules.clone();
    }
    if !args.no_include_snippets && index.include_snippets == Some(false) {
        args.no_include_snippets = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_values_fill_only_unset_cli_fields() {
        let config = CliConfig {
            index: Some(IndexSection {
                derived_data: Some(PathBuf::from("/derived")),
                project_root: Some(PathBuf::from("/proj")),
                output: Some(PathBuf::from("/out.db")),
                incremental: Some(true),
                include_snippets: Some(true),
                modules: vec!["ModuleA".to_string()],
            }),
        };

        let mut args = IndexArgs {
            project_root: Some(PathBuf::from("/explicit")),
            ..Default::default()
        };
        apply_index_config_defaults(&config, &mut args);

        assert_eq!(args.project_root, Some(PathBuf::from("/explicit")));
        assert_eq!(args.derived_data, Some(PathBuf::from("/derived")));
        assert_eq!(args.output, Some(PathBuf::from("/out.db")));
        assert!(args.incremental);
        assert_eq!(args.modules, vec!["ModuleA".to_string()]);
    }
}

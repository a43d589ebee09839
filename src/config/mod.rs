use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

pub const STATE_DIR: &str = ".redirect-ledger";
pub const PROJECT_CONFIG_FILE: &str = ".redirect-ledger.project.yml";
pub const DEFAULT_DATABASE_FILE: &str = "ledger.sqlite";

/// Settings after every layer has been applied. Unset keys stay `None`; the
/// CLI fills them from flags or the state directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EffectiveConfig {
    pub database: Option<PathBuf>,
    pub redirect_dump: Option<PathBuf>,
    pub page_dump: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    database: Option<String>,
    #[serde(default)]
    redirect_dump: Option<String>,
    #[serde(default)]
    page_dump: Option<String>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Where each layer lives. Missing files are skipped, except `explicit`.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources<'a> {
    pub user: Option<&'a Path>,
    pub repo: Option<&'a Path>,
    pub explicit: Option<&'a Path>,
}

/// Merges user, nearest project, repo, then explicit config; later layers
/// override the keys they set. Relative paths stay relative to the process
/// working directory.
pub fn load_effective_config(
    cwd: &Path,
    home: &Path,
    sources: &ConfigSources<'_>,
) -> Result<EffectiveConfig, ConfigError> {
    let mut merged = EffectiveConfig::default();

    if let Some(path) = sources.user.filter(|path| path.exists()) {
        merge_layer(&mut merged, load_config_layer(path)?, home);
    }

    if let Some(path) = find_nearest_project_config(cwd) {
        merge_layer(&mut merged, load_config_layer(&path)?, home);
    }

    if let Some(path) = sources.repo.filter(|path| path.exists()) {
        merge_layer(&mut merged, load_config_layer(path)?, home);
    }

    if let Some(path) = sources.explicit {
        merge_layer(&mut merged, load_config_layer(path)?, home);
    }

    Ok(merged)
}

pub fn find_nearest_project_config(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join(PROJECT_CONFIG_FILE))
        .find(|candidate| candidate.is_file())
}

fn merge_layer(merged: &mut EffectiveConfig, layer: RawConfig, home: &Path) {
    let expand = |value: String| expand_tilde(&value, home);
    if let Some(database) = layer.database {
        merged.database = Some(expand(database));
    }
    if let Some(redirect_dump) = layer.redirect_dump {
        merged.redirect_dump = Some(expand(redirect_dump));
    }
    if let Some(page_dump) = layer.page_dump {
        merged.page_dump = Some(expand(page_dump));
    }
}

fn load_config_layer(path: &Path) -> Result<RawConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config_layer(&content).map_err(|source| ConfigError::Yaml {
        path: path.to_path_buf(),
        source,
    })
}

fn parse_config_layer(content: &str) -> Result<RawConfig, serde_yaml::Error> {
    // A file holding only comments is a null document, not a mapping.
    match serde_yaml::from_str::<serde_yaml::Value>(content)? {
        serde_yaml::Value::Null => Ok(RawConfig::default()),
        value => serde_yaml::from_value(value),
    }
}

pub fn default_repo_config_yaml() -> String {
    r#"# Paths used by `ingest` when no flag is given.
# database: .redirect-ledger/ledger.sqlite
# redirect_dump: ./redirect.sql
# page_dump: ./page.sql
"#
    .to_string()
}

pub fn default_global_config_yaml() -> String {
    r#"# Paths used by `ingest --global` when no flag is given.
# database: ~/.redirect-ledger/ledger.sqlite
# redirect_dump: ~/dumps/redirect.sql
# page_dump: ~/dumps/page.sql
"#
    .to_string()
}

pub fn expand_tilde(path: &str, home: &Path) -> PathBuf {
    if path == "~" {
        return home.to_path_buf();
    }
    if let Some(rest) = path.strip_prefix("~/") {
        return home.join(rest);
    }
    PathBuf::from(path)
}

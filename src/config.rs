use crate::types::{Entrant, DEFAULT_BIND_ADDR};
use serde::{Deserialize, Serialize};
use std::{
    env,
    fs,
    path::{Path, PathBuf},
};

pub const SEED_FILE_NAME: &str = "entrants.json";

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
  #[serde(default)]
  pub bind_addr: String,
  #[serde(default)]
  pub data_dir: String,
  #[serde(default)]
  pub log_dir: String,
  #[serde(default)]
  pub static_dir: String,
}

impl AppConfig {
  pub fn data_path(&self) -> PathBuf {
    resolve_repo_path(&self.data_dir)
  }

  pub fn log_path(&self) -> PathBuf {
    resolve_repo_path(&self.log_dir)
  }

  pub fn static_path(&self) -> Option<PathBuf> {
    let trimmed = self.static_dir.trim();
    if trimmed.is_empty() {
      return None;
    }
    Some(resolve_repo_path(trimmed))
  }

  pub fn seed_path(&self) -> PathBuf {
    self.data_path().join(SEED_FILE_NAME)
  }
}

pub fn repo_root() -> PathBuf {
  PathBuf::from(env!("CARGO_MANIFEST_DIR"))
}

pub fn resolve_repo_path(raw: &str) -> PathBuf {
  let path = PathBuf::from(raw.trim());
  if path.is_absolute() {
    path
  } else {
    repo_root().join(path)
  }
}

pub fn config_path() -> PathBuf {
  match env_default("BRACKET_CONFIG_PATH") {
    Some(raw) => resolve_repo_path(&raw),
    None => repo_root().join("config.json"),
  }
}

pub fn env_default(key: &str) -> Option<String> {
  env::var(key)
    .ok()
    .map(|value| value.trim().to_string())
    .filter(|value| !value.is_empty())
}

fn fill_from_env(field: &mut String, key: &str, fallback: &str) {
  if !field.trim().is_empty() {
    return;
  }
  *field = env_default(key).unwrap_or_else(|| fallback.to_string());
}

pub fn apply_env_defaults(mut config: AppConfig) -> AppConfig {
  fill_from_env(&mut config.bind_addr, "BRACKET_BIND_ADDR", DEFAULT_BIND_ADDR);
  fill_from_env(&mut config.data_dir, "BRACKET_DATA_DIR", "data");
  fill_from_env(&mut config.log_dir, "BRACKET_LOG_DIR", "logs");
  fill_from_env(&mut config.static_dir, "BRACKET_STATIC_DIR", "");
  config
}

pub fn load_config_inner() -> Result<AppConfig, String> {
  load_config_from(&config_path())
}

pub fn load_config_from(path: &Path) -> Result<AppConfig, String> {
  if !path.is_file() {
    return Ok(apply_env_defaults(AppConfig::default()));
  }
  let data = fs::read_to_string(path).map_err(|e| format!("read config {}: {e}", path.display()))?;
  let config =
    serde_json::from_str::<AppConfig>(&data).map_err(|e| format!("parse config {}: {e}", path.display()))?;
  Ok(apply_env_defaults(config))
}

/// Entrant list used by `POST /admin/build` when the request carries none.
pub fn load_seed_entrants(path: &Path) -> Result<Vec<Entrant>, String> {
  let data = fs::read_to_string(path).map_err(|e| format!("read seed file {}: {e}", path.display()))?;
  serde_json::from_str::<Vec<Entrant>>(&data).map_err(|e| format!("parse seed file {}: {e}", path.display()))
}

pub fn load_env_file() {
  let env_path = repo_root().join(".env");
  if !env_path.is_file() {
    return;
  }
  let contents = match fs::read_to_string(&env_path) {
    Ok(data) => data,
    Err(_) => return,
  };
  for line in contents.lines() {
    if let Some((key, value)) = parse_env_line(line) {
      if env::var_os(&key).is_none() {
        env::set_var(key, value);
      }
    }
  }
}

pub fn parse_env_line(line: &str) -> Option<(String, String)> {
  let trimmed = line.trim();
  if trimmed.is_empty() || trimmed.starts_with('#') {
    return None;
  }
  let trimmed = trimmed.strip_prefix("export ").unwrap_or(trimmed);
  let (key, raw_value) = trimmed.split_once('=')?;
  let key = key.trim();
  if key.is_empty() {
    return None;
  }
  let mut value = raw_value.trim();
  let quoted = value.len() >= 2
    && ((value.starts_with('"') && value.ends_with('"')) || (value.starts_with('\'') && value.ends_with('\'')));
  if quoted {
    value = &value[1..value.len() - 1];
  } else if let Some(idx) = value.find('#') {
    value = value[..idx].trim_end();
  }
  Some((key.to_string(), value.to_string()))
}

pub fn log_config_warnings(config: &AppConfig) {
  if let Some(dir) = config.static_path() {
    if !dir.is_dir() {
      tracing::warn!(path = %dir.display(), "static dir not found; front end will not be served");
    }
  }
  let seeds = config.seed_path();
  if !seeds.is_file() {
    tracing::warn!(path = %seeds.display(), "no seed file; /admin/build needs entrants in the request body");
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_env_lines() {
    assert_eq!(
      parse_env_line("BRACKET_DATA_DIR=/srv/data"),
      Some(("BRACKET_DATA_DIR".to_string(), "/srv/data".to_string()))
    );
    assert_eq!(
      parse_env_line("export BRACKET_BIND_ADDR=\"0.0.0.0:80\""),
      Some(("BRACKET_BIND_ADDR".to_string(), "0.0.0.0:80".to_string()))
    );
    assert_eq!(
      parse_env_line("BRACKET_LOG_DIR=logs # rotated daily"),
      Some(("BRACKET_LOG_DIR".to_string(), "logs".to_string()))
    );
    assert_eq!(
      parse_env_line("KEY='a # b'"),
      Some(("KEY".to_string(), "a # b".to_string()))
    );
    assert_eq!(parse_env_line("# comment"), None);
    assert_eq!(parse_env_line("   "), None);
    assert_eq!(parse_env_line("=value"), None);
    assert_eq!(parse_env_line("no_equals"), None);
  }

  #[test]
  fn config_file_values_win_over_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    fs::write(&path, r#"{"bindAddr": "0.0.0.0:9000", "dataDir": "/var/bracket"}"#).unwrap();
    let config = load_config_from(&path).unwrap();
    assert_eq!(config.bind_addr, "0.0.0.0:9000");
    assert_eq!(config.data_path(), PathBuf::from("/var/bracket"));
    assert!(!config.log_dir.is_empty());
  }

  #[test]
  fn malformed_config_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    fs::write(&path, "{ bindAddr: ").unwrap();
    let err = load_config_from(&path).unwrap_err();
    assert!(err.starts_with("parse config"));
  }

  #[test]
  fn relative_paths_resolve_against_repo_root() {
    assert_eq!(resolve_repo_path("data"), repo_root().join("data"));
    assert_eq!(resolve_repo_path("/abs/dir"), PathBuf::from("/abs/dir"));
    let config = AppConfig {
      static_dir: "  ".to_string(),
      ..AppConfig::default()
    };
    assert_eq!(config.static_path(), None);
  }

  #[test]
  fn reads_seed_entrants() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(SEED_FILE_NAME);
    fs::write(&path, r#"[{"id": 1994, "score": 91.5}, {"id": 2001, "score": 88.0}]"#).unwrap();
    let entrants = load_seed_entrants(&path).unwrap();
    assert_eq!(entrants, vec![Entrant::new(1994, 91.5), Entrant::new(2001, 88.0)]);
    assert!(load_seed_entrants(&dir.path().join("missing.json")).is_err());
  }
}

#![forbid(unsafe_code)]

//! Runtime configuration for the hometube server.
//!
//! Values are resolved with the precedence: explicit override (CLI) >
//! process environment > `.env` file > built-in default. Only `DATA_ROOT`
//! is mandatory; everything the server touches (database, uploaded media,
//! token key) lives underneath it.

use anyhow::{Context, Result, anyhow};
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
};

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_HOST: &str = "127.0.0.1";

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub data_root: PathBuf,
    pub port: u16,
    pub host: String,
}

#[derive(Debug, Clone, Default)]
pub struct RuntimeOverrides {
    pub data_root: Option<PathBuf>,
    pub port: Option<u16>,
    pub host: Option<String>,
    pub env_path: Option<PathBuf>,
}

pub fn load_runtime_config() -> Result<RuntimeConfig> {
    resolve_runtime_config(RuntimeOverrides::default())
}

pub fn resolve_runtime_config(overrides: RuntimeOverrides) -> Result<RuntimeConfig> {
    let env_path = overrides
        .env_path
        .as_deref()
        .unwrap_or_else(|| Path::new(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(env_path)?;
    build_runtime_config(&file_vars, env_var_string, overrides)
}

fn build_runtime_config(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: RuntimeOverrides,
) -> Result<RuntimeConfig> {
    let data_root = overrides
        .data_root
        .map(|path| path.to_string_lossy().into_owned())
        .or_else(|| lookup_value("DATA_ROOT", file_vars, &env_lookup))
        .ok_or_else(|| anyhow!("DATA_ROOT not set"))?;
    let port = overrides
        .port
        .or_else(|| {
            lookup_value("HOMETUBE_PORT", file_vars, &env_lookup)
                .and_then(|value| value.parse::<u16>().ok())
        })
        .unwrap_or(DEFAULT_PORT);
    let host = overrides
        .host
        .and_then(|value| {
            let trimmed = value.trim().to_string();
            if trimmed.is_empty() { None } else { Some(trimmed) }
        })
        .or_else(|| lookup_value("HOMETUBE_HOST", file_vars, &env_lookup))
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_HOST.to_string());
    Ok(RuntimeConfig {
        data_root: PathBuf::from(data_root),
        port,
        host,
    })
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key).or_else(|| file_vars.get(key).cloned())
}

pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    if !path.exists() {
        return Ok(vars);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some((key, value_raw)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value_raw.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|value| value.strip_suffix('"'))
            .or_else(|| {
                value
                    .strip_prefix('\'')
                    .and_then(|value| value.strip_suffix('\''))
            })
            .unwrap_or(value);
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn make_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", contents).unwrap();
        file
    }

    fn config_from(contents: &str) -> RuntimeConfig {
        let cfg = make_config(contents);
        let vars = read_env_file(cfg.path()).unwrap();
        build_runtime_config(&vars, |_| None, RuntimeOverrides::default()).unwrap()
    }

    #[test]
    fn reads_port_from_file() {
        let config = config_from("DATA_ROOT=\"/srv/tube\"\nHOMETUBE_PORT=\"4242\"\n");
        assert_eq!(config.port, 4242);
    }

    #[test]
    fn defaults_apply_when_only_data_root_is_set() {
        let config = config_from("DATA_ROOT=\"/srv/tube\"\n");
        assert_eq!(config.data_root, PathBuf::from("/srv/tube"));
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.host, DEFAULT_HOST);
    }

    #[test]
    fn missing_data_root_is_an_error() {
        let vars = HashMap::new();
        let err = build_runtime_config(&vars, |_| None, RuntimeOverrides::default()).unwrap_err();
        assert!(err.to_string().contains("DATA_ROOT"));
    }

    #[test]
    fn env_wins_over_file() {
        let vars = read_env_file(make_config("DATA_ROOT=\"/file\"\n").path()).unwrap();
        let config = build_runtime_config(
            &vars,
            |key| {
                if key == "DATA_ROOT" {
                    Some("/env".to_string())
                } else {
                    None
                }
            },
            RuntimeOverrides::default(),
        )
        .unwrap();
        assert_eq!(config.data_root, PathBuf::from("/env"));
    }

    #[test]
    fn overrides_win_over_env_and_file() {
        let mut vars = HashMap::new();
        vars.insert("DATA_ROOT".to_string(), "/file".to_string());
        vars.insert("HOMETUBE_PORT".to_string(), "7000".to_string());
        vars.insert("HOMETUBE_HOST".to_string(), "file-host".to_string());

        let overrides = RuntimeOverrides {
            data_root: Some(PathBuf::from("/override")),
            port: Some(9000),
            host: Some("override-host".into()),
            env_path: None,
        };
        let config = build_runtime_config(
            &vars,
            |key| {
                if key == "HOMETUBE_PORT" {
                    Some("8000".to_string())
                } else {
                    None
                }
            },
            overrides,
        )
        .unwrap();
        assert_eq!(config.data_root, PathBuf::from("/override"));
        assert_eq!(config.port, 9000);
        assert_eq!(config.host, "override-host");
    }

    #[test]
    fn blank_host_falls_back_to_default() {
        let vars = read_env_file(make_config("DATA_ROOT=\"/d\"\n").path()).unwrap();
        let config = build_runtime_config(
            &vars,
            |_| None,
            RuntimeOverrides {
                host: Some("   ".into()),
                ..RuntimeOverrides::default()
            },
        )
        .unwrap();
        assert_eq!(config.host, DEFAULT_HOST);
    }

    #[test]
    fn env_file_parsing_handles_export_quotes_and_comments() {
        let cfg = make_config(
            r#"
            export DATA_ROOT="/data"
            HOMETUBE_HOST='0.0.0.0'
            HOMETUBE_PORT = 9090
            # comment
            INVALID_LINE
            "#,
        );
        let vars = read_env_file(cfg.path()).unwrap();
        assert_eq!(vars.get("DATA_ROOT").unwrap(), "/data");
        assert_eq!(vars.get("HOMETUBE_HOST").unwrap(), "0.0.0.0");
        assert_eq!(vars.get("HOMETUBE_PORT").unwrap(), "9090");
        assert!(!vars.contains_key("INVALID_LINE"));
    }

    #[test]
    fn missing_env_file_yields_empty_map() {
        let dir = tempfile::tempdir().unwrap();
        let vars = read_env_file(&dir.path().join("missing.env")).unwrap();
        assert!(vars.is_empty());
    }

    #[test]
    fn unparsable_port_falls_back_to_default() {
        let config = config_from("DATA_ROOT=\"/d\"\nHOMETUBE_PORT=\"nope\"\n");
        assert_eq!(config.port, DEFAULT_PORT);
    }
}

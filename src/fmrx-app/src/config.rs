// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File name searched for in every default location.
pub const CONFIG_FILE_NAME: &str = "fmrx.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    ReadError(PathBuf, String),

    #[error("Failed to parse config file {0}: {1}")]
    ParseError(PathBuf, String),
}

/// Returns the default search paths for `fmrx.toml`
/// (current directory, then the user config dir, then /etc).
pub fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from(CONFIG_FILE_NAME)];
    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join("fmrx").join(CONFIG_FILE_NAME));
    }
    paths.push(PathBuf::from("/etc/fmrx").join(CONFIG_FILE_NAME));
    paths
}

/// Parse `content` and deserialize its `[key]` table.
///
/// Returns `Ok(None)` when the section is absent.
fn parse_section<T: DeserializeOwned>(
    path: &Path,
    content: &str,
    key: &str,
) -> Result<Option<T>, ConfigError> {
    let mut table: toml::Table = toml::from_str(content)
        .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;

    let Some(section) = table.remove(key) else {
        return Ok(None);
    };

    let cfg = section
        .try_into::<T>()
        .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
    Ok(Some(cfg))
}

fn load_section_from_file<T: DeserializeOwned>(
    path: &Path,
    key: &str,
) -> Result<Option<T>, ConfigError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::ReadError(path.to_path_buf(), e.to_string()))?;
    parse_section(path, &content, key)
}

/// Trait for loading configuration from a `fmrx.toml` section.
pub trait ConfigFile: Sized + Default + DeserializeOwned {
    /// Section key in `fmrx.toml` (e.g. `"fmrx-server"`).
    fn section_key() -> &'static str;

    /// Load the section from a specific file path.
    ///
    /// Returns an error if the file cannot be read, is not valid TOML, or
    /// does not contain the expected `[<section_key>]` header.
    fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        load_section_from_file::<Self>(path, Self::section_key())?.ok_or_else(|| {
            ConfigError::ParseError(
                path.to_path_buf(),
                format!("missing [{}] section", Self::section_key()),
            )
        })
    }

    /// Parse the section out of an in-memory TOML document.
    fn load_from_str(content: &str) -> Result<Self, ConfigError> {
        let path = PathBuf::from("<inline>");
        parse_section::<Self>(&path, content, Self::section_key())?.ok_or_else(|| {
            ConfigError::ParseError(path, format!("missing [{}] section", Self::section_key()))
        })
    }

    /// Search the default paths and load the first file that contains the
    /// expected section.
    ///
    /// Returns `(config, path_where_found)` or `(Default::default(), None)`
    /// when no config file is found.
    fn load_from_default_paths() -> Result<(Self, Option<PathBuf>), ConfigError> {
        for path in config_search_paths() {
            if path.exists() {
                if let Some(cfg) = load_section_from_file::<Self>(&path, Self::section_key())? {
                    return Ok((cfg, Some(path)));
                }
            }
        }
        Ok((Self::default(), None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Default, Deserialize, PartialEq)]
    #[serde(default)]
    struct Sample {
        level: String,
        rate: u32,
    }

    impl ConfigFile for Sample {
        fn section_key() -> &'static str {
            "sample"
        }
    }

    #[test]
    fn loads_named_section_with_defaults() {
        let cfg = Sample::load_from_str("[other]\nrate = 1\n[sample]\nrate = 48000\n").unwrap();
        assert_eq!(
            cfg,
            Sample {
                level: String::new(),
                rate: 48_000
            }
        );
    }

    #[test]
    fn missing_section_is_an_error() {
        let err = Sample::load_from_str("[other]\nrate = 1\n").unwrap_err();
        assert!(err.to_string().contains("missing [sample] section"));
    }

    #[test]
    fn reads_from_disk() {
        let path = std::env::temp_dir().join(format!("fmrx-app-test-{}.toml", std::process::id()));
        std::fs::write(&path, "[sample]\nlevel = \"debug\"\n").unwrap();
        let cfg = Sample::load_from_file(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(cfg.level, "debug");

        let missing = Sample::load_from_file(Path::new("/nonexistent/fmrx.toml"));
        assert!(matches!(missing, Err(ConfigError::ReadError(_, _))));
    }

    #[test]
    fn search_paths_end_in_etc() {
        let paths = config_search_paths();
        assert_eq!(paths.first(), Some(&PathBuf::from("fmrx.toml")));
        assert_eq!(paths.last(), Some(&PathBuf::from("/etc/fmrx/fmrx.toml")));
    }
}

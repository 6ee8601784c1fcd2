//! 配置文件读写（YAML）。
//!
//! 提供 `config.yml` 的底层 I/O 与错误类型；字段语义见
//! [`crate::base_system::context`]。

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error at {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("invalid yaml at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("validation error: {0}")]
    Validation(String),
    #[error("profile inheritance cycle at '{name}'")]
    ProfileCycle { name: String },
}

/// 读取并反序列化一个 YAML 文件。文件不存在时返回 `Ok(None)`。
pub fn read_yaml<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let value = serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(Some(value))
}

/// 序列化并写入一个 YAML 文件，必要时创建父目录。
pub fn write_yaml<T: Serialize>(value: &T, path: &Path) -> Result<(), ConfigError> {
    ensure_parent(path)?;
    let yaml =
        serde_yaml::to_string(value).map_err(|err| ConfigError::Validation(err.to_string()))?;
    fs::write(path, yaml).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

pub fn ensure_parent(path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    Ok(())
}

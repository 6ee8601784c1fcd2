//! 路径解析：配置目录、数据目录与文件名安全化。
//!
//! 遵循 XDG 规范（Linux/macOS 走 `~/.config` / `~/.local/share`，
//! Windows 走 `APPDATA` / `LOCALAPPDATA`）。

use std::env;
use std::path::PathBuf;

const APP_DIR_NAME: &str = "insta-mash";

/// 配置目录（存放 `config.yml`）。
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = env::var("XDG_CONFIG_HOME") {
        if !xdg.is_empty() {
            return PathBuf::from(xdg).join(APP_DIR_NAME);
        }
    }

    if cfg!(windows) {
        if let Ok(appdata) = env::var("APPDATA") {
            return PathBuf::from(appdata).join(APP_DIR_NAME);
        }
    }

    home_dir().join(".config").join(APP_DIR_NAME)
}

/// 数据目录（存放日志、下载档案与断点续跑状态）。
pub fn data_dir() -> PathBuf {
    if let Ok(xdg) = env::var("XDG_DATA_HOME") {
        if !xdg.is_empty() {
            return PathBuf::from(xdg).join(APP_DIR_NAME);
        }
    }

    if cfg!(windows) {
        if let Ok(local) = env::var("LOCALAPPDATA") {
            return PathBuf::from(local).join(APP_DIR_NAME);
        }
    }

    home_dir().join(".local").join("share").join(APP_DIR_NAME)
}

pub fn config_path() -> PathBuf {
    config_dir().join("config.yml")
}

/// 默认下载档案文件（`archive` 预设写入这里）。
pub fn default_archive_path() -> PathBuf {
    data_dir().join("archive.txt")
}

/// 批处理断点文件的存放位置。
pub fn resume_dir() -> PathBuf {
    data_dir().join("resume")
}

pub fn logs_dir() -> PathBuf {
    data_dir().join("logs")
}

fn home_dir() -> PathBuf {
    if cfg!(windows) {
        if let Ok(profile) = env::var("USERPROFILE") {
            return PathBuf::from(profile);
        }
    }
    env::var("HOME").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from("."))
}

/// 展开开头的 `~` 为用户主目录。
pub fn expand_user(path: &str) -> PathBuf {
    if path == "~" {
        return home_dir();
    }
    if let Some(rest) = path.strip_prefix("~/").or_else(|| path.strip_prefix("~\\")) {
        return home_dir().join(rest);
    }
    PathBuf::from(path)
}

/// 将任意字符串转成可安全用作文件名的形式。
pub fn safe_fs_name(raw: &str, replacement: &str, max_len: usize) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        let bad = matches!(
            ch,
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|'
        ) || ch.is_control();
        if bad {
            out.push_str(replacement);
        } else {
            out.push(ch);
        }
    }
    let trimmed = out.trim().trim_matches('.');
    let mut result: String = trimmed.chars().take(max_len).collect();
    if result.is_empty() {
        result = "_".to_string();
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_fs_name_replaces_separators() {
        assert_eq!(safe_fs_name("a/b:c", "_", 64), "a_b_c");
    }

    #[test]
    fn safe_fs_name_truncates() {
        let long = "x".repeat(200);
        assert_eq!(safe_fs_name(&long, "_", 16).len(), 16);
    }

    #[test]
    fn safe_fs_name_never_empty() {
        assert_eq!(safe_fs_name("", "_", 16), "_");
    }

    #[test]
    fn expand_user_passthrough_without_tilde() {
        assert_eq!(expand_user("./downloads"), PathBuf::from("./downloads"));
    }
}

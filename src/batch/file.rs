//! 批处理任务文件的解析与校验。
//!
//! 文件格式：UTF-8 文本，一行一个任务；`#` 开头与空白行忽略；
//! 行 = `URL [key:value ...]`，识别的 key 为 `preset` 与 `profile`，
//! 其余 key 一律静默忽略。

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::base_system::config::ConfigError;
use crate::base_system::context::Config;
use crate::download::options::DownloadOptions;
use crate::download::presets;

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("batch file not found: {path}")]
    NotFound { path: PathBuf },
    #[error("io error at {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
}

/// 批处理文件中的一个任务描述。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchEntry {
    /// 源文件行号（1 起）。
    pub line_number: usize,
    pub url: String,
    pub preset: String,
    pub profile: String,
}

impl BatchEntry {
    /// 解析一行。注释行和空行返回 None；首个空白分隔的 token 视为 URL
    /// （解析阶段不做 URL 语法校验），重复 key 后者胜出。
    pub fn parse(line: &str, line_number: usize) -> Option<BatchEntry> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }

        let mut tokens = line.split_whitespace();
        let url = tokens.next()?.to_string();

        let mut preset = String::new();
        let mut profile = String::new();
        for token in tokens {
            if let Some((key, value)) = token.split_once(':') {
                match key {
                    "preset" => preset = value.to_string(),
                    "profile" => profile = value.to_string(),
                    _ => {}
                }
            }
        }

        Some(BatchEntry {
            line_number,
            url,
            preset,
            profile,
        })
    }

    /// 批处理路径的分层解析：默认值 → 批处理全局 → 档案 → 预设。
    /// 预设在此路径同样排在档案之后（最高业务优先级）。
    pub fn resolve_options(
        &self,
        config: &Config,
        global_options: Option<&DownloadOptions>,
    ) -> Result<DownloadOptions, ConfigError> {
        let (_, options) =
            config.resolve_layers(global_options, &self.profile, &self.preset, None, "")?;
        Ok(options)
    }
}

/// 一条批处理校验错误（1 起行号 + 消息）。
#[derive(Debug, Clone)]
pub struct BatchValidationError {
    pub line_number: usize,
    pub message: String,
    pub entry: Option<BatchEntry>,
}

/// 已解析的批处理文件，条目顺序与文件行序一致。
#[derive(Debug, Clone)]
pub struct BatchFile {
    pub path: PathBuf,
    pub entries: Vec<BatchEntry>,
}

impl BatchFile {
    /// 逐行读取并解析。文件不存在是硬错误；空文件合法（零条目）。
    pub fn load(path: &Path) -> Result<BatchFile, BatchError> {
        if !path.exists() {
            return Err(BatchError::NotFound {
                path: path.to_path_buf(),
            });
        }

        let file = File::open(path).map_err(|source| BatchError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let mut entries = Vec::new();
        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|source| BatchError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            if let Some(entry) = BatchEntry::parse(&line, index + 1) {
                entries.push(entry);
            }
        }

        Ok(BatchFile {
            path: path.to_path_buf(),
            entries,
        })
    }

    /// 独立重扫文件做引用校验：未知预设、未知档案（只查直接成员，
    /// 不解析继承）。错误按行序返回，空列表即全部合法。
    ///
    /// 同一行可以同时产生预设与档案两条错误，两项检查互不影响。
    pub fn validate(&self, config: &Config) -> Result<Vec<BatchValidationError>, BatchError> {
        let file = File::open(&self.path).map_err(|source| BatchError::Io {
            path: self.path.clone(),
            source,
        })?;

        let mut errors = Vec::new();
        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|source| BatchError::Io {
                path: self.path.clone(),
                source,
            })?;
            let line_number = index + 1;

            let stripped = line.trim();
            if stripped.is_empty() || stripped.starts_with('#') {
                continue;
            }

            let Some(entry) = BatchEntry::parse(&line, line_number) else {
                // 当前解析器不会走到这里，保留给将来更严格的语法
                errors.push(BatchValidationError {
                    line_number,
                    message: "语法无效".to_string(),
                    entry: None,
                });
                continue;
            };

            if !entry.preset.is_empty() && presets::get_preset(&entry.preset).is_none() {
                errors.push(BatchValidationError {
                    line_number,
                    message: format!("未知预设: {}", entry.preset),
                    entry: Some(entry.clone()),
                });
            }

            if !entry.profile.is_empty() && !config.profiles.contains_key(&entry.profile) {
                errors.push(BatchValidationError {
                    line_number,
                    message: format!("未知档案: {}", entry.profile),
                    entry: Some(entry.clone()),
                });
            }
        }

        Ok(errors)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn write_batch(content: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("batch.txt");
        let mut file = File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        (dir, path)
    }

    #[test]
    fn parse_url_with_preset_and_profile() {
        let entry = BatchEntry::parse("https://a.example/x preset:polite profile:slow", 3).unwrap();
        assert_eq!(entry.line_number, 3);
        assert_eq!(entry.url, "https://a.example/x");
        assert_eq!(entry.preset, "polite");
        assert_eq!(entry.profile, "slow");
    }

    #[test]
    fn parse_skips_comments_and_blank_lines() {
        assert!(BatchEntry::parse("# comment", 1).is_none());
        assert!(BatchEntry::parse("", 2).is_none());
        assert!(BatchEntry::parse("   \t ", 3).is_none());
    }

    #[test]
    fn parse_ignores_unknown_keys_and_keeps_last_duplicate() {
        let entry = BatchEntry::parse("u1 color:red preset:a preset:b note:x", 1).unwrap();
        assert_eq!(entry.preset, "b");
        assert_eq!(entry.profile, "");
    }

    #[test]
    fn parse_trims_surrounding_whitespace() {
        let entry = BatchEntry::parse("  https://e.example  preset:test  ", 8).unwrap();
        assert_eq!(entry.url, "https://e.example");
        assert_eq!(entry.preset, "test");
    }

    #[test]
    fn load_preserves_order_and_line_numbers() {
        // 注释与空行不产生条目，但行号按源文件计
        let (_dir, path) =
            write_batch("https://a.example/x\n# comment\n\nhttps://b.example/y preset:polite\n");
        let batch = BatchFile::load(&path).unwrap();
        assert_eq!(batch.entries.len(), 2);
        assert_eq!(batch.entries[0].line_number, 1);
        assert_eq!(batch.entries[0].url, "https://a.example/x");
        assert!(batch.entries[0].preset.is_empty());
        assert!(batch.entries[0].profile.is_empty());
        assert_eq!(batch.entries[1].line_number, 4);
        assert_eq!(batch.entries[1].url, "https://b.example/y");
        assert_eq!(batch.entries[1].preset, "polite");
    }

    #[test]
    fn load_missing_file_is_hard_error() {
        let err = BatchFile::load(Path::new("/nonexistent/batch.txt")).unwrap_err();
        assert!(matches!(err, BatchError::NotFound { .. }));
    }

    #[test]
    fn load_empty_file_yields_zero_entries() {
        let (_dir, path) = write_batch("");
        assert!(BatchFile::load(&path).unwrap().entries.is_empty());
    }

    #[test]
    fn validate_reports_unknown_references_in_line_order() {
        let (_dir, path) = write_batch("u1 preset:bogus\nu2 profile:bogus\n");
        let batch = BatchFile::load(&path).unwrap();
        let errors = batch.validate(&Config::default()).unwrap();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].line_number, 1);
        assert!(errors[0].message.contains("bogus"));
        assert_eq!(errors[1].line_number, 2);
        assert!(errors[1].message.contains("bogus"));
    }

    #[test]
    fn validate_can_flag_one_line_twice() {
        let (_dir, path) = write_batch("u1 preset:nope profile:missing\n");
        let batch = BatchFile::load(&path).unwrap();
        let errors = batch.validate(&Config::default()).unwrap();
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().all(|e| e.line_number == 1));
    }

    #[test]
    fn validate_clean_file_returns_empty_list() {
        let (_dir, path) = write_batch("u1\nu2 preset:polite\n# note\n");
        let batch = BatchFile::load(&path).unwrap();
        assert!(batch.validate(&Config::default()).unwrap().is_empty());
    }

    #[test]
    fn resolve_options_without_layers_equals_defaults_merge() {
        let mut config = Config::default();
        config.defaults.sleep = "2.0".to_string();
        config.defaults.retries = 5;
        let entry = BatchEntry::parse("https://a.example/x", 1).unwrap();
        let options = entry.resolve_options(&config, None).unwrap();
        assert_eq!(options, DownloadOptions::default().merge(&config.defaults));
    }

    #[test]
    fn resolve_options_places_preset_above_profile_and_global() {
        let mut config = Config::default();
        let mut slow = DownloadOptions::default();
        slow.sleep = "9.0".to_string();
        config.add_profile("slow", slow, "");

        let mut global = DownloadOptions::default();
        global.sleep = "5.0".to_string();
        global.destination = "./global".to_string();

        let entry = BatchEntry::parse("u preset:polite profile:slow", 1).unwrap();
        let options = entry.resolve_options(&config, Some(&global)).unwrap();
        // polite 的 sleep 盖过档案与全局
        assert_eq!(options.sleep, "2.0-4.0");
        assert_eq!(options.rate_limit, "500k");
    }
}

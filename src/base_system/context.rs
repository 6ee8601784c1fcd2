//! 全局配置结构（Config）：默认选项 + 用户档案。
//!
//! 配置来自 `config.yml`（缺失时取默认值），通过显式的 setter 修改，
//! 显式 `save` 持久化；`dirty` 标记仅作提示用途。
//!
//! 分层解析的唯一入口是 [`Config::resolve_layers`]：CLI 路径与批处理
//! 路径只是对它的不同参数化，避免两份合并序列各自漂移。

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::config::{ConfigError, read_yaml, write_yaml};
use super::paths::config_path;
use crate::download::options::DownloadOptions;
use crate::download::presets;

/// 用户命名档案。`extends` 指向父档案名，仅一层，但通过
/// `get_profile` 递归解析成链。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Profile {
    #[serde(skip)]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub extends: String,
    #[serde(flatten)]
    pub options: DownloadOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default, skip_serializing_if = "DownloadOptions::is_default")]
    pub defaults: DownloadOptions,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub profiles: BTreeMap<String, Profile>,

    #[serde(skip)]
    path: PathBuf,
    #[serde(skip)]
    dirty: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            defaults: DownloadOptions::default(),
            profiles: BTreeMap::new(),
            path: config_path(),
            dirty: false,
        }
    }
}

impl Config {
    /// 从文件加载；文件不存在时返回默认配置（记住路径，便于后续保存）。
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path.map(Path::to_path_buf).unwrap_or_else(config_path);
        let mut config = match read_yaml::<Config>(&path)? {
            Some(config) => config,
            None => Config::default(),
        };
        config.path = path;
        config.dirty = false;
        // 档案名只存在于映射键上，载入后补齐到结构体里
        for (name, profile) in config.profiles.iter_mut() {
            profile.name = name.clone();
        }
        Ok(config)
    }

    pub fn save(&mut self, path: Option<&Path>) -> Result<(), ConfigError> {
        let path = path.map(Path::to_path_buf).unwrap_or_else(|| self.path.clone());
        write_yaml(self, &path)?;
        self.dirty = false;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    // ── 档案管理 ──────────────────────────────────────────────

    /// 取档案并解析继承链。父档案不存在时当作没有 `extends`；
    /// 继承链成环是配置错误。
    pub fn get_profile(&self, name: &str) -> Result<Option<Profile>, ConfigError> {
        let mut visited = HashSet::new();
        self.resolve_profile(name, &mut visited)
    }

    fn resolve_profile(
        &self,
        name: &str,
        visited: &mut HashSet<String>,
    ) -> Result<Option<Profile>, ConfigError> {
        let Some(profile) = self.profiles.get(name) else {
            return Ok(None);
        };
        if !visited.insert(name.to_string()) {
            return Err(ConfigError::ProfileCycle {
                name: name.to_string(),
            });
        }
        if profile.extends.is_empty() {
            return Ok(Some(profile.clone()));
        }
        match self.resolve_profile(&profile.extends, visited)? {
            Some(parent) => Ok(Some(Profile {
                name: profile.name.clone(),
                description: profile.description.clone(),
                extends: String::new(),
                options: parent.options.merge(&profile.options),
            })),
            None => Ok(Some(profile.clone())),
        }
    }

    /// 新增或覆盖档案（同名后写胜出）。
    pub fn add_profile(&mut self, name: &str, options: DownloadOptions, description: &str) {
        self.profiles.insert(
            name.to_string(),
            Profile {
                name: name.to_string(),
                description: description.to_string(),
                extends: String::new(),
                options,
            },
        );
        self.dirty = true;
    }

    /// 删除档案，存在并删除时返回 true。
    pub fn delete_profile(&mut self, name: &str) -> bool {
        let removed = self.profiles.remove(name).is_some();
        if removed {
            self.dirty = true;
        }
        removed
    }

    // ── 默认选项管理 ──────────────────────────────────────────

    pub fn set_default(&mut self, key: &str, value: &str) -> Result<(), String> {
        self.defaults.set_field(key, value)?;
        self.dirty = true;
        Ok(())
    }

    pub fn unset_default(&mut self, key: &str) -> bool {
        let ok = self.defaults.unset_field(key);
        if ok {
            self.dirty = true;
        }
        ok
    }

    // ── 分层解析 ──────────────────────────────────────────────

    /// CLI 路径：默认值 → 档案 → 预设 → CLI 覆盖。
    /// 返回的 URL 只可能来自预设渲染。
    pub fn resolve_options(
        &self,
        profile_name: &str,
        preset_name: &str,
        cli_options: Option<&DownloadOptions>,
        target: &str,
    ) -> Result<(String, DownloadOptions), ConfigError> {
        self.resolve_layers(None, profile_name, preset_name, cli_options, target)
    }

    /// 统一的分层合并序列。批处理路径传 `global`、不传 `cli`；
    /// CLI 路径相反。两条路径中预设都排在档案之后。
    pub(crate) fn resolve_layers(
        &self,
        global: Option<&DownloadOptions>,
        profile_name: &str,
        preset_name: &str,
        cli_options: Option<&DownloadOptions>,
        target: &str,
    ) -> Result<(String, DownloadOptions), ConfigError> {
        let mut url = String::new();
        let mut options = DownloadOptions::default().merge(&self.defaults);

        if let Some(global) = global {
            options = options.merge(global);
        }

        if !profile_name.is_empty() {
            if let Some(profile) = self.get_profile(profile_name)? {
                options = options.merge(&profile.options);
            }
        }

        if !preset_name.is_empty() {
            if let Some(preset) = presets::get_preset(preset_name) {
                let (preset_url, preset_options) = preset.apply(target);
                if !preset_url.is_empty() {
                    url = preset_url;
                }
                options = options.merge(&preset_options);
            }
        }

        if let Some(cli) = cli_options {
            options = options.merge(cli);
        }

        Ok((url, options))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(options: DownloadOptions, extends: &str) -> Profile {
        Profile {
            name: String::new(),
            description: String::new(),
            extends: extends.to_string(),
            options,
        }
    }

    #[test]
    fn get_profile_resolves_single_level_inheritance() {
        let mut config = Config::default();
        let mut base = DownloadOptions::default();
        base.sleep = "2.0".to_string();
        base.retries = 2;
        let mut child = DownloadOptions::default();
        child.retries = 8;
        config.profiles.insert("base".to_string(), profile(base.clone(), ""));
        config.profiles.insert("child".to_string(), profile(child.clone(), "base"));

        let resolved = config.get_profile("child").unwrap().unwrap();
        assert_eq!(resolved.options, base.merge(&child));
        assert_eq!(resolved.options.sleep, "2.0");
        assert_eq!(resolved.options.retries, 8);
    }

    #[test]
    fn get_profile_with_missing_parent_ignores_extends() {
        let mut config = Config::default();
        let mut opts = DownloadOptions::default();
        opts.rate_limit = "500k".to_string();
        config.profiles.insert("solo".to_string(), profile(opts.clone(), "ghost"));

        let resolved = config.get_profile("solo").unwrap().unwrap();
        assert_eq!(resolved.options, opts);
    }

    #[test]
    fn get_profile_detects_extends_cycle() {
        let mut config = Config::default();
        config
            .profiles
            .insert("a".to_string(), profile(DownloadOptions::default(), "b"));
        config
            .profiles
            .insert("b".to_string(), profile(DownloadOptions::default(), "a"));

        assert!(matches!(
            config.get_profile("a"),
            Err(ConfigError::ProfileCycle { .. })
        ));
    }

    #[test]
    fn get_profile_unknown_returns_none() {
        let config = Config::default();
        assert!(config.get_profile("nope").unwrap().is_none());
    }

    #[test]
    fn resolve_without_layers_equals_config_defaults() {
        let mut config = Config::default();
        config.defaults.sleep = "2.0".to_string();
        config.defaults.retries = 5;

        let (url, options) = config.resolve_options("", "", None, "").unwrap();
        assert!(url.is_empty());
        assert_eq!(options, DownloadOptions::default().merge(&config.defaults));
    }

    #[test]
    fn resolve_preset_overrides_profile() {
        let mut config = Config::default();
        let mut slow = DownloadOptions::default();
        slow.sleep = "9.0".to_string();
        slow.retries = 9;
        config.profiles.insert("slow".to_string(), profile(slow, ""));

        // polite 预设设置 sleep/rate_limit/retries，应盖过档案层
        let (url, options) = config.resolve_options("slow", "polite", None, "").unwrap();
        assert!(url.is_empty());
        assert_eq!(options.sleep, "2.0-4.0");
        assert_eq!(options.rate_limit, "500k");
        assert_eq!(options.retries, 2);
    }

    #[test]
    fn resolve_cli_layer_wins_over_preset() {
        let config = Config::default();
        let mut cli = DownloadOptions::default();
        cli.sleep = "0.1".to_string();

        let (_, options) = config.resolve_options("", "polite", Some(&cli), "").unwrap();
        assert_eq!(options.sleep, "0.1");
        // CLI 未动的字段仍来自预设
        assert_eq!(options.rate_limit, "500k");
    }

    #[test]
    fn resolve_url_comes_only_from_presets() {
        let config = Config::default();
        let (url, options) = config
            .resolve_options("", "instagram", None, "alice")
            .unwrap();
        assert_eq!(url, "https://instagram.com/alice");
        assert_eq!(options.destination, "./alice_instagram");

        let (url, _) = config.resolve_options("", "", None, "alice").unwrap();
        assert!(url.is_empty());
    }

    #[test]
    fn resolved_options_contain_every_preset_field() {
        let config = Config::default();
        for preset in presets::list_presets() {
            let (_, options) = config.resolve_options("", preset.name, None, "").unwrap();
            let (_, expected) = preset.apply("");
            for (key, value) in expected.to_sparse_map() {
                assert_eq!(
                    options.to_sparse_map().get(&key),
                    Some(&value),
                    "preset {} field {:?}",
                    preset.name,
                    key
                );
            }
        }
    }

    #[test]
    fn set_and_unset_default_flip_dirty_flag() {
        let mut config = Config::default();
        assert!(!config.is_dirty());
        config.set_default("sleep", "1.0").unwrap();
        assert!(config.is_dirty());
        assert_eq!(config.defaults.sleep, "1.0");
        assert!(config.set_default("bogus", "1").is_err());
        assert!(config.unset_default("sleep"));
        assert!(!config.unset_default("bogus"));
    }

    #[test]
    fn config_round_trips_through_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yml");

        let mut config = Config::default();
        config.defaults.sleep = "1.5".to_string();
        let mut opts = DownloadOptions::default();
        opts.rate_limit = "1M".to_string();
        config.add_profile("bulk", opts, "批量任务");
        config.save(Some(&path)).unwrap();

        let loaded = Config::load(Some(&path)).unwrap();
        assert_eq!(loaded.defaults.sleep, "1.5");
        let bulk = loaded.get_profile("bulk").unwrap().unwrap();
        assert_eq!(bulk.name, "bulk");
        assert_eq!(bulk.description, "批量任务");
        assert_eq!(bulk.options.rate_limit, "1M");
        // 稀疏持久化：未定制字段不应出现在文件里
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(!raw.contains("timeout"));
        assert!(!raw.contains("destination"));
    }

    #[test]
    fn load_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(Some(&dir.path().join("none.yml"))).unwrap();
        assert!(config.profiles.is_empty());
        assert_eq!(config.defaults, DownloadOptions::default());
    }
}

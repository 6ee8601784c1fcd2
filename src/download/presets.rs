//! 内置预设注册表。
//!
//! 两类预设：
//! - 目标型（URL 模板非空）：`apply(target)` 渲染出具体 URL 与下载目录
//! - 修饰型（模板为空）：只贡献选项字段，URL 保持为空
//!
//! 预设在进程启动后只读，不提供用户修改入口。

use std::collections::HashMap;
use std::sync::OnceLock;

use crate::base_system::paths::default_archive_path;
use crate::download::options::DownloadOptions;

#[derive(Debug, Clone)]
pub struct Preset {
    pub name: &'static str,
    pub description: &'static str,
    /// 含 `{target}` 占位符的 URL 模板，空串表示修饰型预设。
    pub url_template: &'static str,
    pub destination_template: &'static str,
    pub options: DownloadOptions,
}

impl Preset {
    /// 渲染模板并返回 `(url, options)`。
    ///
    /// target 为空时 URL 为空、目录保持预设自身的值；
    /// target 非空时两个模板都被渲染（空模板渲染为空串）。
    pub fn apply(&self, target: &str) -> (String, DownloadOptions) {
        let mut options = self.options.clone();
        if target.is_empty() {
            return (String::new(), options);
        }
        let url = render_template(self.url_template, target);
        options.destination = render_template(self.destination_template, target);
        (url, options)
    }

    /// 目标型预设需要 target 才能生成 URL。
    pub fn requires_target(&self) -> bool {
        !self.url_template.is_empty()
    }
}

fn render_template(template: &str, target: &str) -> String {
    template.replace("{target}", target)
}

static PRESETS: OnceLock<HashMap<&'static str, Preset>> = OnceLock::new();

fn registry() -> &'static HashMap<&'static str, Preset> {
    PRESETS.get_or_init(build_registry)
}

/// 按名称查预设，未知名称返回 None（由调用方处理）。
pub fn get_preset(name: &str) -> Option<&'static Preset> {
    registry().get(name)
}

/// 全部预设，按名称排序。
pub fn list_presets() -> Vec<&'static Preset> {
    let mut all: Vec<&'static Preset> = registry().values().collect();
    all.sort_by_key(|p| p.name);
    all
}

fn build_registry() -> HashMap<&'static str, Preset> {
    fn opts(build: impl FnOnce(&mut DownloadOptions)) -> DownloadOptions {
        let mut options = DownloadOptions::default();
        build(&mut options);
        options
    }

    let presets = [
        Preset {
            name: "instagram",
            description: "Instagram 主页（公开帖，礼貌间隔）",
            url_template: "https://instagram.com/{target}",
            destination_template: "./{target}_instagram",
            options: opts(|o| {
                o.sleep = "1.0-2.0".to_string();
                o.filename_format = "{date:%Y-%m-%d}_{filename}".to_string();
            }),
        },
        Preset {
            name: "instagram-stories",
            description: "Instagram 快拍（需要登录）",
            url_template: "https://instagram.com/{target}/stories",
            destination_template: "./{target}_instagram_stories",
            options: opts(|o| o.sleep = "1.0-2.0".to_string()),
        },
        Preset {
            name: "instagram-reels",
            description: "Instagram Reels",
            url_template: "https://instagram.com/{target}/reels",
            destination_template: "./{target}_instagram_reels",
            options: opts(|o| o.sleep = "1.5-3.0".to_string()),
        },
        Preset {
            name: "twitter",
            description: "Twitter/X 媒体时间线",
            url_template: "https://twitter.com/{target}/media",
            destination_template: "./{target}_twitter",
            options: opts(|o| o.filename_format = "/O".to_string()),
        },
        Preset {
            name: "reddit",
            description: "Reddit 子版或用户",
            url_template: "https://reddit.com/{target}",
            destination_template: "./{target}_reddit",
            options: opts(|o| o.sleep = "0.5-1.0".to_string()),
        },
        Preset {
            name: "tumblr",
            description: "Tumblr 博客存档",
            url_template: "https://{target}.tumblr.com",
            destination_template: "./{target}_tumblr",
            options: opts(|o| o.write_metadata = true),
        },
        Preset {
            name: "polite",
            description: "限速 + 大间隔的礼貌抓取",
            url_template: "",
            destination_template: "",
            options: opts(|o| {
                o.sleep = "2.0-4.0".to_string();
                o.sleep_request = "1.0".to_string();
                o.rate_limit = "500k".to_string();
                o.retries = 2;
            }),
        },
        Preset {
            name: "archive",
            description: "记录下载档案，跳过重复",
            url_template: "",
            destination_template: "",
            options: opts(|o| {
                o.archive_file = default_archive_path().to_string_lossy().to_string();
                o.write_metadata = true;
            }),
        },
        Preset {
            name: "fast",
            description: "无间隔，少重试",
            url_template: "",
            destination_template: "",
            options: opts(|o| o.retries = 2),
        },
    ];

    presets.into_iter().map(|p| (p.name, p)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_has_at_least_nine_presets() {
        assert!(list_presets().len() >= 9);
    }

    #[test]
    fn unknown_name_returns_none() {
        assert!(get_preset("bogus").is_none());
    }

    #[test]
    fn target_preset_renders_url_and_destination() {
        let preset = get_preset("instagram").unwrap();
        assert!(preset.requires_target());
        let (url, options) = preset.apply("alice");
        assert_eq!(url, "https://instagram.com/alice");
        assert_eq!(options.destination, "./alice_instagram");
        assert_eq!(options.sleep, "1.0-2.0");
    }

    #[test]
    fn modifier_preset_without_target_keeps_url_empty() {
        let preset = get_preset("polite").unwrap();
        assert!(!preset.requires_target());
        let (url, options) = preset.apply("");
        assert!(url.is_empty());
        assert_eq!(options.rate_limit, "500k");
        assert_eq!(options.retries, 2);
        assert_eq!(options.destination, DownloadOptions::default().destination);
    }

    #[test]
    fn tumblr_template_substitutes_subdomain() {
        let (url, _) = get_preset("tumblr").unwrap().apply("cats");
        assert_eq!(url, "https://cats.tumblr.com");
    }
}

//! 下载选项模型（DownloadOptions）与合并策略。
//!
//! 所有分层配置（默认值 / 档案 / 预设 / 批处理全局 / CLI / 环境变量）
//! 最终都折叠成一个 `DownloadOptions`，再翻译成外部下载工具的命令行参数。
//!
//! 合并规则（优先级由 merge 的调用顺序编码）：
//! - 字符串：覆盖层非空时生效
//! - 布尔：覆盖层为 true 时生效
//! - 列表：拼接（基底在前，允许重复）
//! - 数值：覆盖层不等于文档默认值时生效

use std::env;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use tracing::warn;

use crate::base_system::paths::expand_user;

pub const DEFAULT_DESTINATION: &str = "./downloads";
pub const DEFAULT_RETRIES: i32 = 4;
pub const DEFAULT_TIMEOUT: f64 = 30.0;

/// 可从浏览器读取 Cookie 的浏览器名单。
pub const VALID_BROWSERS: &[&str] = &[
    "brave", "chrome", "chromium", "edge", "firefox", "opera", "safari",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadOptions {
    #[serde(
        default = "default_destination",
        skip_serializing_if = "is_default_destination"
    )]
    pub destination: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub filename_format: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub rate_limit: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sleep: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sleep_request: String,
    #[serde(default = "default_retries", skip_serializing_if = "is_default_retries")]
    pub retries: i32,
    #[serde(default = "default_timeout", skip_serializing_if = "is_default_timeout")]
    pub timeout: f64,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cookies_browser: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cookies_file: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub archive_file: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub range_filter: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub filesize_min: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub filesize_max: String,

    #[serde(default, skip_serializing_if = "is_false")]
    pub write_metadata: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub zip_output: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub no_skip: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub no_mtime: bool,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user_agent: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub proxy: String,

    /// 直通外部工具的 `key=value` 选项。
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_options: Vec<String>,
}

fn default_destination() -> String {
    DEFAULT_DESTINATION.to_string()
}

fn default_retries() -> i32 {
    DEFAULT_RETRIES
}

fn default_timeout() -> f64 {
    DEFAULT_TIMEOUT
}

fn is_default_destination(value: &str) -> bool {
    value == DEFAULT_DESTINATION
}

fn is_default_retries(value: &i32) -> bool {
    *value == DEFAULT_RETRIES
}

fn is_default_timeout(value: &f64) -> bool {
    *value == DEFAULT_TIMEOUT
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            destination: default_destination(),
            filename_format: String::new(),
            rate_limit: String::new(),
            sleep: String::new(),
            sleep_request: String::new(),
            retries: DEFAULT_RETRIES,
            timeout: DEFAULT_TIMEOUT,
            cookies_browser: String::new(),
            cookies_file: String::new(),
            archive_file: String::new(),
            range_filter: String::new(),
            filesize_min: String::new(),
            filesize_max: String::new(),
            write_metadata: false,
            zip_output: false,
            no_skip: false,
            no_mtime: false,
            user_agent: String::new(),
            proxy: String::new(),
            extra_options: Vec::new(),
        }
    }
}

impl DownloadOptions {
    /// 合并一层覆盖，返回新值，两个操作数都不被修改。
    ///
    /// 注意数值字段的语义：覆盖层的值等于文档默认值时视为“未定制”，
    /// 不会盖掉基底里已定制的值。
    pub fn merge(&self, overlay: &DownloadOptions) -> DownloadOptions {
        fn pick_str(base: &str, overlay: &str) -> String {
            if overlay.is_empty() { base } else { overlay }.to_string()
        }
        fn pick_bool(base: bool, overlay: bool) -> bool {
            overlay || base
        }

        DownloadOptions {
            destination: pick_str(&self.destination, &overlay.destination),
            filename_format: pick_str(&self.filename_format, &overlay.filename_format),
            rate_limit: pick_str(&self.rate_limit, &overlay.rate_limit),
            sleep: pick_str(&self.sleep, &overlay.sleep),
            sleep_request: pick_str(&self.sleep_request, &overlay.sleep_request),
            retries: if overlay.retries != DEFAULT_RETRIES {
                overlay.retries
            } else {
                self.retries
            },
            timeout: if overlay.timeout != DEFAULT_TIMEOUT {
                overlay.timeout
            } else {
                self.timeout
            },
            cookies_browser: pick_str(&self.cookies_browser, &overlay.cookies_browser),
            cookies_file: pick_str(&self.cookies_file, &overlay.cookies_file),
            archive_file: pick_str(&self.archive_file, &overlay.archive_file),
            range_filter: pick_str(&self.range_filter, &overlay.range_filter),
            filesize_min: pick_str(&self.filesize_min, &overlay.filesize_min),
            filesize_max: pick_str(&self.filesize_max, &overlay.filesize_max),
            write_metadata: pick_bool(self.write_metadata, overlay.write_metadata),
            zip_output: pick_bool(self.zip_output, overlay.zip_output),
            no_skip: pick_bool(self.no_skip, overlay.no_skip),
            no_mtime: pick_bool(self.no_mtime, overlay.no_mtime),
            user_agent: pick_str(&self.user_agent, &overlay.user_agent),
            proxy: pick_str(&self.proxy, &overlay.proxy),
            extra_options: self
                .extra_options
                .iter()
                .chain(overlay.extra_options.iter())
                .cloned()
                .collect(),
        }
    }

    /// 翻译为外部下载工具的参数序列（不含程序名与目标 URL）。
    pub fn to_tool_args(&self) -> Vec<String> {
        fn flag(args: &mut Vec<String>, name: &str, value: &str) {
            args.push(name.to_string());
            args.push(value.to_string());
        }

        let mut args: Vec<String> = Vec::new();

        if !self.destination.is_empty() {
            flag(&mut args, "-D", &expand_user(&self.destination).to_string_lossy());
        }
        if !self.filename_format.is_empty() {
            flag(&mut args, "-f", &self.filename_format);
        }
        if !self.rate_limit.is_empty() {
            flag(&mut args, "-r", &self.rate_limit);
        }
        if !self.sleep.is_empty() {
            flag(&mut args, "--sleep", &self.sleep);
        }
        if !self.sleep_request.is_empty() {
            flag(&mut args, "--sleep-request", &self.sleep_request);
        }
        if self.retries != DEFAULT_RETRIES {
            flag(&mut args, "-R", &self.retries.to_string());
        }
        if self.timeout != DEFAULT_TIMEOUT {
            flag(&mut args, "--http-timeout", &self.timeout.to_string());
        }
        if !self.cookies_browser.is_empty() {
            flag(&mut args, "--cookies-from-browser", &self.cookies_browser);
        }
        if !self.cookies_file.is_empty() {
            flag(&mut args, "-C", &expand_user(&self.cookies_file).to_string_lossy());
        }
        if !self.archive_file.is_empty() {
            flag(
                &mut args,
                "--download-archive",
                &expand_user(&self.archive_file).to_string_lossy(),
            );
        }
        if !self.range_filter.is_empty() {
            flag(&mut args, "--range", &self.range_filter);
        }
        if !self.filesize_min.is_empty() {
            flag(&mut args, "--filesize-min", &self.filesize_min);
        }
        if !self.filesize_max.is_empty() {
            flag(&mut args, "--filesize-max", &self.filesize_max);
        }
        if self.write_metadata {
            args.push("--write-metadata".to_string());
        }
        if self.zip_output {
            args.push("--zip".to_string());
        }
        if self.no_skip {
            args.push("--no-skip".to_string());
        }
        if self.no_mtime {
            args.push("--no-mtime".to_string());
        }
        if !self.user_agent.is_empty() {
            flag(&mut args, "-a", &self.user_agent);
        }
        if !self.proxy.is_empty() {
            flag(&mut args, "--proxy", &self.proxy);
        }
        for opt in &self.extra_options {
            flag(&mut args, "-o", opt);
        }

        args
    }

    /// 仅包含偏离文档默认值字段的映射，用于持久化与展示。
    pub fn to_sparse_map(&self) -> Mapping {
        match serde_yaml::to_value(self) {
            Ok(Value::Mapping(map)) => map,
            _ => Mapping::new(),
        }
    }

    pub fn is_default(&self) -> bool {
        self.to_sparse_map().is_empty()
    }

    /// `k=v, k=v` 形式的单行摘要（档案列表用）。
    pub fn summary(&self) -> String {
        self.to_sparse_map()
            .iter()
            .map(|(k, v)| {
                let key = k.as_str().unwrap_or_default();
                match v {
                    Value::String(s) => format!("{key}={s}"),
                    other => format!(
                        "{key}={}",
                        serde_yaml::to_string(other).unwrap_or_default().trim()
                    ),
                }
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

// ── 字段元信息（`config set` 的显式字段表）────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Str,
    Int,
    Float,
    Bool,
    List,
}

#[derive(Debug, Clone, Copy)]
pub struct OptionField {
    pub name: &'static str,
    pub kind: FieldKind,
    pub description: &'static str,
}

pub const OPTION_FIELDS: &[OptionField] = &[
    OptionField { name: "destination", kind: FieldKind::Str, description: "下载目录" },
    OptionField { name: "filename_format", kind: FieldKind::Str, description: "文件名格式" },
    OptionField { name: "rate_limit", kind: FieldKind::Str, description: "限速（如 500k、2.5M、800k-2M）" },
    OptionField { name: "sleep", kind: FieldKind::Str, description: "下载间隔秒数（如 2.0、1.5-3.0）" },
    OptionField { name: "sleep_request", kind: FieldKind::Str, description: "请求间隔秒数" },
    OptionField { name: "retries", kind: FieldKind::Int, description: "失败重试次数（-1 为无限）" },
    OptionField { name: "timeout", kind: FieldKind::Float, description: "HTTP 超时秒数" },
    OptionField { name: "cookies_browser", kind: FieldKind::Str, description: "从指定浏览器读取 Cookie" },
    OptionField { name: "cookies_file", kind: FieldKind::Str, description: "Cookie 文件路径" },
    OptionField { name: "archive_file", kind: FieldKind::Str, description: "下载档案文件（跳过重复）" },
    OptionField { name: "range_filter", kind: FieldKind::Str, description: "条目范围（如 5、8-20、1:24:3）" },
    OptionField { name: "filesize_min", kind: FieldKind::Str, description: "最小文件大小" },
    OptionField { name: "filesize_max", kind: FieldKind::Str, description: "最大文件大小" },
    OptionField { name: "write_metadata", kind: FieldKind::Bool, description: "写出元数据 JSON" },
    OptionField { name: "zip_output", kind: FieldKind::Bool, description: "打包为 ZIP" },
    OptionField { name: "no_skip", kind: FieldKind::Bool, description: "不跳过已存在文件" },
    OptionField { name: "no_mtime", kind: FieldKind::Bool, description: "不设置文件修改时间" },
    OptionField { name: "user_agent", kind: FieldKind::Str, description: "自定义 User-Agent" },
    OptionField { name: "proxy", kind: FieldKind::Str, description: "代理地址" },
    OptionField { name: "extra_options", kind: FieldKind::List, description: "直通选项 key=value（追加）" },
];

pub fn lookup_field(name: &str) -> Option<&'static OptionField> {
    OPTION_FIELDS.iter().find(|f| f.name == name)
}

impl DownloadOptions {
    /// 按字段名设置值（文本输入按字段类型解析）。未知字段或解析失败返回 Err。
    pub fn set_field(&mut self, key: &str, value: &str) -> Result<(), String> {
        let field = lookup_field(key).ok_or_else(|| format!("未知配置项: {key}"))?;
        match (field.kind, key) {
            (FieldKind::Str, "destination") => self.destination = value.to_string(),
            (FieldKind::Str, "filename_format") => self.filename_format = value.to_string(),
            (FieldKind::Str, "rate_limit") => self.rate_limit = value.to_string(),
            (FieldKind::Str, "sleep") => self.sleep = value.to_string(),
            (FieldKind::Str, "sleep_request") => self.sleep_request = value.to_string(),
            (FieldKind::Int, "retries") => {
                self.retries = value
                    .parse()
                    .map_err(|_| format!("retries 需要整数，而不是 '{value}'"))?;
            }
            (FieldKind::Float, "timeout") => {
                self.timeout = value
                    .parse()
                    .map_err(|_| format!("timeout 需要数字，而不是 '{value}'"))?;
            }
            (FieldKind::Str, "cookies_browser") => self.cookies_browser = value.to_string(),
            (FieldKind::Str, "cookies_file") => self.cookies_file = value.to_string(),
            (FieldKind::Str, "archive_file") => self.archive_file = value.to_string(),
            (FieldKind::Str, "range_filter") => self.range_filter = value.to_string(),
            (FieldKind::Str, "filesize_min") => self.filesize_min = value.to_string(),
            (FieldKind::Str, "filesize_max") => self.filesize_max = value.to_string(),
            (FieldKind::Bool, "write_metadata") => self.write_metadata = parse_bool(value),
            (FieldKind::Bool, "zip_output") => self.zip_output = parse_bool(value),
            (FieldKind::Bool, "no_skip") => self.no_skip = parse_bool(value),
            (FieldKind::Bool, "no_mtime") => self.no_mtime = parse_bool(value),
            (FieldKind::Str, "user_agent") => self.user_agent = value.to_string(),
            (FieldKind::Str, "proxy") => self.proxy = value.to_string(),
            (FieldKind::List, "extra_options") => self.extra_options.push(value.to_string()),
            _ => return Err(format!("未知配置项: {key}")),
        }
        Ok(())
    }

    /// 将字段恢复为文档默认值。未知字段返回 false。
    pub fn unset_field(&mut self, key: &str) -> bool {
        if lookup_field(key).is_none() {
            return false;
        }
        let defaults = DownloadOptions::default();
        match key {
            "destination" => self.destination = defaults.destination,
            "filename_format" => self.filename_format = defaults.filename_format,
            "rate_limit" => self.rate_limit = defaults.rate_limit,
            "sleep" => self.sleep = defaults.sleep,
            "sleep_request" => self.sleep_request = defaults.sleep_request,
            "retries" => self.retries = defaults.retries,
            "timeout" => self.timeout = defaults.timeout,
            "cookies_browser" => self.cookies_browser = defaults.cookies_browser,
            "cookies_file" => self.cookies_file = defaults.cookies_file,
            "archive_file" => self.archive_file = defaults.archive_file,
            "range_filter" => self.range_filter = defaults.range_filter,
            "filesize_min" => self.filesize_min = defaults.filesize_min,
            "filesize_max" => self.filesize_max = defaults.filesize_max,
            "write_metadata" => self.write_metadata = defaults.write_metadata,
            "zip_output" => self.zip_output = defaults.zip_output,
            "no_skip" => self.no_skip = defaults.no_skip,
            "no_mtime" => self.no_mtime = defaults.no_mtime,
            "user_agent" => self.user_agent = defaults.user_agent,
            "proxy" => self.proxy = defaults.proxy,
            "extra_options" => self.extra_options = defaults.extra_options,
            _ => return false,
        }
        true
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "true" | "1" | "yes")
}

// ── 选项语法校验 ──────────────────────────────────────────────

static RE_RATE: OnceLock<Regex> = OnceLock::new();
static RE_SLEEP: OnceLock<Regex> = OnceLock::new();
static RE_RANGE: OnceLock<Regex> = OnceLock::new();

fn rate_re() -> &'static Regex {
    RE_RATE.get_or_init(|| {
        Regex::new(r"(?i)^\d+(\.\d+)?[kmg]?(-\d+(\.\d+)?[kmg]?)?$").expect("compile RE_RATE")
    })
}

fn sleep_re() -> &'static Regex {
    RE_SLEEP.get_or_init(|| Regex::new(r"^\d+(\.\d+)?(-\d+(\.\d+)?)?$").expect("compile RE_SLEEP"))
}

fn range_re() -> &'static Regex {
    RE_RANGE.get_or_init(|| {
        Regex::new(r"^(\d+(-\d+)?|\d+:\d*(:\d+)?)$").expect("compile RE_RANGE")
    })
}

/// 一条配置校验错误（字段、消息、出错的值）。
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationIssue {
    pub field: &'static str,
    pub message: String,
    pub value: String,
}

/// 校验选项语法。所有检查都会执行，一次调用可同时报告多个错误。
pub fn validate_options(options: &DownloadOptions) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    if !options.rate_limit.is_empty() && !rate_re().is_match(&options.rate_limit) {
        issues.push(ValidationIssue {
            field: "rate_limit",
            message: "格式无效，示例：500k、2.5M、800k-2M".to_string(),
            value: options.rate_limit.clone(),
        });
    }

    if !options.sleep.is_empty() && !sleep_re().is_match(&options.sleep) {
        issues.push(ValidationIssue {
            field: "sleep",
            message: "格式无效，示例：2.0、1.5-3.0".to_string(),
            value: options.sleep.clone(),
        });
    }

    if !options.sleep_request.is_empty() && !sleep_re().is_match(&options.sleep_request) {
        issues.push(ValidationIssue {
            field: "sleep_request",
            message: "格式无效，示例：1.0、0.5-1.5".to_string(),
            value: options.sleep_request.clone(),
        });
    }

    if options.retries < -1 {
        issues.push(ValidationIssue {
            field: "retries",
            message: "必须是 -1（无限）或 >= 0".to_string(),
            value: options.retries.to_string(),
        });
    }

    if options.timeout <= 0.0 {
        issues.push(ValidationIssue {
            field: "timeout",
            message: "必须为正数".to_string(),
            value: options.timeout.to_string(),
        });
    }

    if !options.range_filter.is_empty() && !range_re().is_match(&options.range_filter) {
        issues.push(ValidationIssue {
            field: "range_filter",
            message: "格式无效，示例：5、8-20、1:24:3".to_string(),
            value: options.range_filter.clone(),
        });
    }

    if !options.cookies_browser.is_empty() {
        // 允许 `chrome/Profile 1` 这类带 profile 的写法，只校验浏览器名部分
        let browser = options
            .cookies_browser
            .split('/')
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();
        if !VALID_BROWSERS.contains(&browser.as_str()) {
            issues.push(ValidationIssue {
                field: "cookies_browser",
                message: format!("未知浏览器，可选：{}", VALID_BROWSERS.join(", ")),
                value: options.cookies_browser.clone(),
            });
        }
    }

    issues
}

// ── 环境变量覆盖 ──────────────────────────────────────────────

pub const ENV_PREFIX: &str = "MASH_";

/// 环境变量名（去前缀）到选项字段的映射。
pub const ENV_MAPPINGS: &[(&str, &str)] = &[
    ("DESTINATION", "destination"),
    ("SLEEP", "sleep"),
    ("RATE_LIMIT", "rate_limit"),
    ("RETRIES", "retries"),
    ("COOKIES_BROWSER", "cookies_browser"),
    ("ARCHIVE", "archive_file"),
    ("PROXY", "proxy"),
];

/// 以最高优先级把环境变量覆盖到已解析的选项上。
pub fn apply_env_overrides(options: &mut DownloadOptions) {
    for (env_key, field) in ENV_MAPPINGS {
        let var = format!("{ENV_PREFIX}{env_key}");
        let Ok(value) = env::var(&var) else { continue };
        if value.is_empty() {
            continue;
        }
        if let Err(err) = options.set_field(field, &value) {
            warn!(target: "config", var, error = %err, "忽略无效的环境变量覆盖");
        }
    }
}

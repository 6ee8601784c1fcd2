//! `mash` 命令入口：命令行定义与子命令分发。

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result, anyhow};
use clap::{Args, Parser, Subcommand};
use tracing::warn;

use insta_mash::base_system::context::Config;
use insta_mash::base_system::logging::{LogOptions, LogSystem};
use insta_mash::batch::executor::{BatchExecutor, BatchRunOptions};
use insta_mash::batch::file::BatchFile;
use insta_mash::download::options::{
    DownloadOptions, OPTION_FIELDS, apply_env_overrides, validate_options,
};
use insta_mash::download::presets;
use insta_mash::download::runner;
use insta_mash::ui;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Parser)]
#[command(name = "mash")]
#[command(version)]
#[command(about = "gallery-dl 的交互/CLI 前端（配置分层 + 批处理）")]
struct Cli {
    /// 启用调试日志输出
    #[arg(long, global = true, default_value_t = false)]
    debug: bool,

    /// 配置文件路径（默认在 XDG 配置目录）
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// 下载单个 URL
    Grab(GrabArgs),
    /// 列出内置预设，或用预设下载一个目标
    Preset(PresetArgs),
    /// 管理配置与档案
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// 批处理任务文件
    Batch {
        #[command(subcommand)]
        command: BatchCommands,
    },
    /// 列出外部工具支持的站点
    Sites {
        /// 按子串过滤
        #[arg(short, long)]
        filter: Option<String>,
    },
    /// 显示版本信息
    Version,
}

#[derive(Debug, Args)]
struct GrabArgs {
    url: String,
    /// 下载目录
    #[arg(short, long)]
    destination: Option<String>,
    /// 文件名格式
    #[arg(short, long)]
    filename: Option<String>,
    /// 限速（如 500k、2M）
    #[arg(short = 'r', long)]
    rate_limit: Option<String>,
    /// 下载间隔秒数（如 2.0、1-3）
    #[arg(short, long)]
    sleep: Option<String>,
    /// 失败重试次数
    #[arg(short = 'R', long)]
    retries: Option<i32>,
    /// 从指定浏览器读取 Cookie
    #[arg(short = 'c', long)]
    cookies: Option<String>,
    /// 下载档案文件（跳过重复）
    #[arg(short = 'a', long)]
    archive: Option<String>,
    /// 只下载范围内的条目
    #[arg(long = "range")]
    range_filter: Option<String>,
    /// 写出元数据 JSON
    #[arg(short = 'm', long)]
    metadata: bool,
    /// 打包为 ZIP
    #[arg(short = 'z', long = "zip")]
    zip_output: bool,
    /// 仅模拟，不实际下载
    #[arg(short = 'n', long)]
    dry_run: bool,
    /// 使用已保存的档案
    #[arg(short, long)]
    profile: Option<String>,
    /// 叠加内置预设
    #[arg(long)]
    preset: Option<String>,
}

#[derive(Debug, Args)]
struct PresetArgs {
    /// 预设名
    name: Option<String>,
    /// 目标（用户名等，目标型预设必填）
    target: Option<String>,
    /// 列出全部预设
    #[arg(short, long)]
    list: bool,
    /// 仅模拟，不实际下载
    #[arg(short = 'n', long)]
    dry_run: bool,
    /// 同时叠加档案
    #[arg(short, long)]
    profile: Option<String>,
}

#[derive(Debug, Subcommand)]
enum ConfigCommands {
    /// 显示当前配置
    Show,
    /// 设置一个默认选项
    Set { key: String, value: String },
    /// 恢复一个默认选项为出厂值
    Unset { key: String },
    /// 打印配置文件路径
    Path,
    /// 用 $EDITOR 打开配置文件
    Edit,
    /// 列出已保存的档案
    Profiles,
    /// 把当前默认值存为档案
    SaveProfile {
        name: String,
        /// 档案描述
        #[arg(short, long, default_value = "")]
        description: String,
    },
    /// 把档案载入为当前默认值
    LoadProfile { name: String },
    /// 删除档案
    DeleteProfile { name: String },
}

#[derive(Debug, Subcommand)]
enum BatchCommands {
    /// 顺序执行批处理文件里的全部任务
    Run(BatchRunArgs),
    /// 校验批处理文件（预设/档案引用与语法）
    Validate { file: PathBuf },
}

#[derive(Debug, Args)]
struct BatchRunArgs {
    file: PathBuf,
    /// 任务之间的等待秒数
    #[arg(long, default_value_t = 0.0)]
    delay: f64,
    /// 仅模拟，不实际下载
    #[arg(short = 'n', long)]
    dry_run: bool,
    /// 从上次断点续跑
    #[arg(long)]
    resume: bool,
    /// 批处理全局：下载目录
    #[arg(long)]
    destination: Option<String>,
    /// 批处理全局：限速
    #[arg(long)]
    rate_limit: Option<String>,
    /// 批处理全局：下载间隔
    #[arg(long)]
    sleep: Option<String>,
    /// 批处理全局：重试次数
    #[arg(long)]
    retries: Option<i32>,
    /// 批处理全局：下载档案文件
    #[arg(long)]
    archive: Option<String>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("错误: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    // guard 活到本函数结束，保证日志落盘
    let _log = init_logging(cli.debug)?;

    let mut config =
        Config::load(cli.config.as_deref()).map_err(|e| anyhow!(e.to_string()))?;

    let code = match cli.command {
        None => {
            ui::interactive::run(&mut config)?;
            if config.is_dirty() {
                config.save(None).map_err(|e| anyhow!(e.to_string()))?;
            }
            0
        }
        Some(Commands::Grab(args)) => cmd_grab(&config, &args)?,
        Some(Commands::Preset(args)) => cmd_preset(&config, &args)?,
        Some(Commands::Config { command }) => cmd_config(&mut config, command)?,
        Some(Commands::Batch { command }) => cmd_batch(&config, command)?,
        Some(Commands::Sites { filter }) => cmd_sites(filter.as_deref())?,
        Some(Commands::Version) => cmd_version(),
    };

    Ok(if code == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(code as u8)
    })
}

fn init_logging(debug: bool) -> Result<LogSystem> {
    let opts = LogOptions {
        debug,
        console: debug,
        use_color: true,
    };
    LogSystem::init(opts).map_err(|e| anyhow!(e))
}

// ── grab ──────────────────────────────────────────────────────

fn cmd_grab(config: &Config, args: &GrabArgs) -> Result<i32> {
    let cli_opts = grab_overlay(args);
    grab_flow(
        config,
        &args.url,
        args.profile.as_deref().unwrap_or(""),
        args.preset.as_deref().unwrap_or(""),
        cli_opts.as_ref(),
        "",
        args.dry_run,
    )
}

/// 只有用户真的给了选项旗标时才构造 CLI 覆盖层，否则覆盖层里
/// 非空的默认下载目录会把低层已定制的目录盖掉。
fn grab_overlay(args: &GrabArgs) -> Option<DownloadOptions> {
    let mut opts = DownloadOptions::default();
    let mut any = false;
    if let Some(v) = &args.destination {
        opts.destination = v.clone();
        any = true;
    }
    if let Some(v) = &args.filename {
        opts.filename_format = v.clone();
        any = true;
    }
    if let Some(v) = &args.rate_limit {
        opts.rate_limit = v.clone();
        any = true;
    }
    if let Some(v) = &args.sleep {
        opts.sleep = v.clone();
        any = true;
    }
    if let Some(v) = args.retries {
        opts.retries = v;
        any = true;
    }
    if let Some(v) = &args.cookies {
        opts.cookies_browser = v.clone();
        any = true;
    }
    if let Some(v) = &args.archive {
        opts.archive_file = v.clone();
        any = true;
    }
    if let Some(v) = &args.range_filter {
        opts.range_filter = v.clone();
        any = true;
    }
    if args.metadata {
        opts.write_metadata = true;
        any = true;
    }
    if args.zip_output {
        opts.zip_output = true;
        any = true;
    }
    any.then_some(opts)
}

/// grab 与 preset 共用的下载流程：解析分层 → 环境变量 → 校验 →
/// 拼命令 → 建目录 → 直通执行，退出码来自外部工具。
fn grab_flow(
    config: &Config,
    url: &str,
    profile_name: &str,
    preset_name: &str,
    cli_opts: Option<&DownloadOptions>,
    target: &str,
    dry_run: bool,
) -> Result<i32> {
    let (preset_url, mut options) = config
        .resolve_options(profile_name, preset_name, cli_opts, target)
        .map_err(|e| anyhow!(e.to_string()))?;
    apply_env_overrides(&mut options);

    let url = if url.is_empty() { preset_url.as_str() } else { url };
    if url.is_empty() {
        eprintln!("错误：没有可下载的 URL。");
        return Ok(1);
    }

    let issues = validate_options(&options);
    if !issues.is_empty() {
        for issue in &issues {
            eprintln!("配置错误: {}: {}（{}）", issue.field, issue.message, issue.value);
        }
        return Ok(1);
    }

    let argv = runner::build_command(runner::DEFAULT_TOOL, &options, url, dry_run);
    println!("命令: {}", argv.join(" "));

    if !dry_run {
        runner::ensure_destination(&options).context("创建下载目录失败")?;
    }

    match runner::run_streaming(&argv) {
        Ok(status) => Ok(status.code().unwrap_or(1)),
        Err(err) => {
            eprintln!("执行失败: {err}");
            Ok(1)
        }
    }
}

// ── preset ────────────────────────────────────────────────────

fn cmd_preset(config: &Config, args: &PresetArgs) -> Result<i32> {
    let Some(name) = args.name.as_deref().filter(|_| !args.list) else {
        println!("可用预设：");
        for preset in presets::list_presets() {
            let template = if preset.url_template.is_empty() {
                "-"
            } else {
                preset.url_template
            };
            println!("  {:<18} {:<30} {}", preset.name, preset.description, template);
        }
        return Ok(0);
    };

    let Some(preset) = presets::get_preset(name) else {
        eprintln!("未知预设: {name}");
        eprintln!(
            "可用：{}",
            presets::list_presets()
                .iter()
                .map(|p| p.name)
                .collect::<Vec<_>>()
                .join(", ")
        );
        return Ok(1);
    };

    match (preset.requires_target(), args.target.as_deref()) {
        (true, Some(target)) => grab_flow(
            config,
            "",
            args.profile.as_deref().unwrap_or(""),
            preset.name,
            None,
            target,
            args.dry_run,
        ),
        (true, None) => {
            println!("预设 '{name}' 需要一个目标。");
            println!("用法: mash preset {name} <用户名>");
            Ok(1)
        }
        (false, _) => {
            println!("'{name}' 是修饰型预设，配合下载命令使用：");
            println!("  mash grab --preset {name} <url>");
            Ok(0)
        }
    }
}

// ── config ────────────────────────────────────────────────────

fn cmd_config(config: &mut Config, command: ConfigCommands) -> Result<i32> {
    match command {
        ConfigCommands::Show => {
            println!("配置文件: {}\n", config.path().display());
            let defaults = config.defaults.to_sparse_map();
            if defaults.is_empty() {
                println!("默认值：（全部为出厂值）");
            } else {
                println!("默认值：");
                for (key, value) in &defaults {
                    let key = key.as_str().unwrap_or_default();
                    let value = serde_yaml::to_string(value).unwrap_or_default();
                    println!("  {} = {}", key, value.trim());
                }
            }
            println!();
            if config.profiles.is_empty() {
                println!("档案：（无）");
            } else {
                println!("档案：");
                for (name, profile) in &config.profiles {
                    let extends = if profile.extends.is_empty() {
                        String::new()
                    } else {
                        format!("（继承 {}）", profile.extends)
                    };
                    println!("  {:<16} {}{}", name, profile.description, extends);
                }
            }
            Ok(0)
        }
        ConfigCommands::Set { key, value } => {
            if let Err(err) = config.set_default(&key, &value) {
                eprintln!("{err}");
                eprintln!(
                    "可用配置项：{}",
                    OPTION_FIELDS
                        .iter()
                        .map(|f| f.name)
                        .collect::<Vec<_>>()
                        .join(", ")
                );
                return Ok(1);
            }
            config.save(None).map_err(|e| anyhow!(e.to_string()))?;
            println!("已设置 {key} = {value}");
            Ok(0)
        }
        ConfigCommands::Unset { key } => {
            if !config.unset_default(&key) {
                eprintln!("未知配置项: {key}");
                return Ok(1);
            }
            config.save(None).map_err(|e| anyhow!(e.to_string()))?;
            println!("已恢复 {key} 为默认值");
            Ok(0)
        }
        ConfigCommands::Path => {
            println!("{}", config.path().display());
            Ok(0)
        }
        ConfigCommands::Edit => {
            if !config.path().exists() {
                config.save(None).map_err(|e| anyhow!(e.to_string()))?;
            }
            let editor = std::env::var("EDITOR").unwrap_or_else(|_| "vim".to_string());
            let status = runner::command(&editor)
                .arg(config.path())
                .status()
                .with_context(|| format!("启动编辑器失败: {editor}"))?;
            Ok(if status.success() { 0 } else { 1 })
        }
        ConfigCommands::Profiles => {
            if config.profiles.is_empty() {
                println!("还没有保存过档案。");
                println!("保存当前默认值: mash config save-profile <名字>");
                return Ok(0);
            }
            for (name, profile) in &config.profiles {
                let settings = profile.options.summary();
                println!(
                    "{:<16} {:<24} {}",
                    name,
                    profile.description,
                    if settings.is_empty() { "-" } else { settings.as_str() }
                );
            }
            Ok(0)
        }
        ConfigCommands::SaveProfile { name, description } => {
            let options = config.defaults.clone();
            config.add_profile(&name, options, &description);
            config.save(None).map_err(|e| anyhow!(e.to_string()))?;
            println!("已保存档案: {name}");
            Ok(0)
        }
        ConfigCommands::LoadProfile { name } => {
            let Some(profile) = config.get_profile(&name).map_err(|e| anyhow!(e.to_string()))?
            else {
                eprintln!("档案不存在: {name}");
                return Ok(1);
            };
            config.defaults = profile.options.clone();
            config.save(None).map_err(|e| anyhow!(e.to_string()))?;
            println!("已载入档案: {}", profile.name);
            Ok(0)
        }
        ConfigCommands::DeleteProfile { name } => {
            if !config.delete_profile(&name) {
                eprintln!("档案不存在: {name}");
                return Ok(1);
            }
            config.save(None).map_err(|e| anyhow!(e.to_string()))?;
            println!("已删除档案: {name}");
            Ok(0)
        }
    }
}

// ── batch ─────────────────────────────────────────────────────

fn cmd_batch(config: &Config, command: BatchCommands) -> Result<i32> {
    match command {
        BatchCommands::Validate { file } => {
            let batch = BatchFile::load(&file)?;
            let errors = batch.validate(config)?;
            if errors.is_empty() {
                println!("校验通过：{} 个任务。", batch.entries.len());
                return Ok(0);
            }
            for error in &errors {
                match &error.entry {
                    Some(entry) => {
                        println!("第 {} 行 ({}): {}", error.line_number, entry.url, error.message)
                    }
                    None => println!("第 {} 行: {}", error.line_number, error.message),
                }
            }
            println!("\n{} 个任务，{} 条错误。", batch.entries.len(), errors.len());
            Ok(1)
        }
        BatchCommands::Run(args) => {
            let batch = BatchFile::load(&args.file)?;
            if batch.entries.is_empty() {
                println!("批处理文件没有任务。");
                return Ok(0);
            }

            // 引用错误不阻止执行（解析本身是宽松的），但要提醒
            for error in batch.validate(config)? {
                warn!(target: "batch", line = error.line_number, "{}", error.message);
            }

            let interrupted = Arc::new(AtomicBool::new(false));
            {
                let flag = interrupted.clone();
                if let Err(err) = ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst)) {
                    warn!(target: "batch", error = %err, "安装中断处理器失败");
                }
            }

            let run_options = BatchRunOptions {
                global_options: batch_overlay(&args),
                delay: args.delay,
                dry_run: args.dry_run,
                resume: args.resume,
                show_progress: true,
                ..Default::default()
            };
            let progress = BatchExecutor::new(config, run_options)
                .with_interrupt_flag(interrupted.clone())
                .run(&batch);

            println!(
                "完成：共 {} 个任务，本次处理 {}，成功 {}，失败 {}。",
                progress.total, progress.completed, progress.succeeded, progress.failed
            );
            if interrupted.load(Ordering::SeqCst) {
                println!("（运行被中断，可用 --resume 续跑）");
            }
            for (url, message) in &progress.errors {
                println!("  失败 {url}: {message}");
            }
            Ok(if progress.failed > 0 { 1 } else { 0 })
        }
    }
}

fn batch_overlay(args: &BatchRunArgs) -> Option<DownloadOptions> {
    let mut opts = DownloadOptions::default();
    let mut any = false;
    if let Some(v) = &args.destination {
        opts.destination = v.clone();
        any = true;
    }
    if let Some(v) = &args.rate_limit {
        opts.rate_limit = v.clone();
        any = true;
    }
    if let Some(v) = &args.sleep {
        opts.sleep = v.clone();
        any = true;
    }
    if let Some(v) = args.retries {
        opts.retries = v;
        any = true;
    }
    if let Some(v) = &args.archive {
        opts.archive_file = v.clone();
        any = true;
    }
    any.then_some(opts)
}

// ── sites / version ───────────────────────────────────────────

fn cmd_sites(filter: Option<&str>) -> Result<i32> {
    let mut lines = match runner::list_extractors(runner::DEFAULT_TOOL) {
        Ok(lines) => lines,
        Err(err) => {
            eprintln!("获取站点列表失败: {err}");
            return Ok(1);
        }
    };

    if let Some(filter) = filter {
        let needle = filter.to_lowercase();
        lines.retain(|line| line.to_lowercase().contains(&needle));
    }

    println!("支持的站点（{} 个）：\n", lines.len());
    for line in lines.iter().take(100) {
        println!("  {line}");
    }
    if lines.len() > 100 {
        println!("\n  …… 其余 {} 个省略（可用 --filter 缩小范围）", lines.len() - 100);
    }
    Ok(0)
}

fn cmd_version() -> i32 {
    println!("insta-mash {VERSION}");
    match runner::tool_version(runner::DEFAULT_TOOL) {
        Some(version) => println!("{} {}", runner::DEFAULT_TOOL, version),
        None => println!("{}（未检测到）", runner::DEFAULT_TOOL),
    }
    0
}

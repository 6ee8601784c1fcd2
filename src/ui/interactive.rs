//! 交互模式：菜单驱动的下载会话。
//!
//! 会话持有工作中的 URL 与选项层；预设/档案按需叠加，运行前统一校验。

use std::io::{self, BufRead, Write};

use anyhow::{Context, Result};

use crate::base_system::context::Config;
use crate::download::options::{
    DownloadOptions, apply_env_overrides, validate_options, VALID_BROWSERS,
};
use crate::download::presets;
use crate::download::runner;

struct Session {
    url: String,
    options: DownloadOptions,
    active_profile: String,
    active_preset: String,
}

impl Session {
    fn new(config: &Config) -> Self {
        let mut options = config.defaults.merge(&DownloadOptions::default());
        apply_env_overrides(&mut options);
        Session {
            url: String::new(),
            options,
            active_profile: String::new(),
            active_preset: String::new(),
        }
    }

    fn reset(&mut self, config: &Config) {
        *self = Session::new(config);
    }

    fn apply_preset(&mut self, name: &str, target: &str) {
        if let Some(preset) = presets::get_preset(name) {
            let (url, options) = preset.apply(target);
            if !url.is_empty() {
                self.url = url;
            }
            self.options = self.options.merge(&options);
            self.active_preset = name.to_string();
        }
    }

    fn apply_profile(&mut self, config: &Config, name: &str) -> Result<()> {
        if let Some(profile) = config.get_profile(name)? {
            self.options = self.options.merge(&profile.options);
            self.active_profile = name.to_string();
        }
        Ok(())
    }

    fn build_command(&self, dry_run: bool) -> Vec<String> {
        runner::build_command(runner::DEFAULT_TOOL, &self.options, &self.url, dry_run)
    }

    fn display(&self) {
        fn or_dim(value: &str, fallback: &str) -> String {
            if value.is_empty() {
                format!("（{fallback}）")
            } else {
                value.to_string()
            }
        }

        println!("===== 当前配置 =====");
        println!("URL:        {}", or_dim(&self.url, "未设置"));
        let mut active = Vec::new();
        if !self.active_profile.is_empty() {
            active.push(format!("profile:{}", self.active_profile));
        }
        if !self.active_preset.is_empty() {
            active.push(format!("preset:{}", self.active_preset));
        }
        println!("已叠加:     {}", if active.is_empty() { "（无）".to_string() } else { active.join(", ") });
        println!("下载目录:   {}", self.options.destination);
        println!("文件名格式: {}", or_dim(&self.options.filename_format, "默认"));
        println!("限速:       {}", or_dim(&self.options.rate_limit, "不限"));
        println!("下载间隔:   {}", or_dim(&self.options.sleep, "无"));
        println!("重试次数:   {}", self.options.retries);
        println!("浏览器Cookie: {}", or_dim(&self.options.cookies_browser, "无"));
        println!("下载档案:   {}", or_dim(&self.options.archive_file, "无"));
        println!("范围:       {}", or_dim(&self.options.range_filter, "全部"));
        println!("写元数据:   {}", if self.options.write_metadata { "是" } else { "否" });
        println!("打包 ZIP:   {}", if self.options.zip_output { "是" } else { "否" });
        if !self.options.extra_options.is_empty() {
            println!("直通选项:   {}", self.options.extra_options.join(", "));
        }
        println!("命令预览:   {}", self.build_command(false).join(" "));
        println!();
    }
}

/// 交互主循环。
pub fn run(config: &mut Config) -> Result<()> {
    println!(
        "欢迎使用 insta-mash（gallery-dl 交互前端）。\n\
每步输入编号选择，q 退出。\n"
    );

    let mut session = Session::new(config);

    loop {
        session.display();
        println!("1. 设置 URL          2. 设置下载目录");
        println!("3. 配置选项          4. 快速预设");
        println!("5. 载入档案          6. 保存为档案");
        println!("7. 开始下载          8. 模拟运行（dry run）");
        println!("9. 查看支持站点      0. 重置");
        let choice = read_line("请选择（q 退出）：")?;
        let choice = choice.trim();

        match choice {
            "q" | "Q" => {
                println!("已退出。");
                break;
            }
            "1" => menu_set_url(&mut session)?,
            "2" => menu_set_destination(&mut session)?,
            "3" => menu_options(&mut session)?,
            "4" => menu_presets(&mut session)?,
            "5" => menu_load_profile(&mut session, config)?,
            "6" => menu_save_profile(&session, config)?,
            "7" => menu_run(&mut session, false)?,
            "8" => menu_run(&mut session, true)?,
            "9" => menu_sites()?,
            "0" => session.reset(config),
            _ => {}
        }
    }

    Ok(())
}

fn menu_set_url(session: &mut Session) -> Result<()> {
    let url = read_line("输入下载 URL（留空取消）：")?;
    let url = url.trim();
    if url.is_empty() {
        return Ok(());
    }
    session.url = url.to_string();

    // Instagram 链接时顺手建议一个目录名
    if url.contains("instagram.com") {
        if let Some(username) = url.trim_end_matches('/').rsplit('/').next() {
            let suggested = format!("./{username}_instagram");
            let answer = read_line(&format!("将下载目录设为 {suggested}？[Y/n]: "))?;
            if !answer.trim().eq_ignore_ascii_case("n") {
                session.options.destination = suggested;
            }
        }
    }
    Ok(())
}

fn menu_set_destination(session: &mut Session) -> Result<()> {
    let dest = read_line(&format!(
        "下载目录（当前：{}，留空保持）：",
        session.options.destination
    ))?;
    let dest = dest.trim();
    if !dest.is_empty() {
        session.options.destination = dest.to_string();
    }
    Ok(())
}

fn menu_options(session: &mut Session) -> Result<()> {
    loop {
        println!("\n--- 配置选项 ---");
        println!("1. 文件名格式        2. 限速");
        println!("3. 下载间隔          4. 重试次数");
        println!("5. 浏览器 Cookie     6. 下载档案");
        println!("7. 范围过滤          8. 写元数据（开/关）");
        println!("9. 打包 ZIP（开/关） 10. 追加直通选项");
        let choice = read_line("请选择（留空返回）：")?;
        match choice.trim() {
            "" => break,
            "1" => {
                println!("常用占位符：{{category}} {{filename}} {{id}} {{date}} {{title}}，/O 表示原始文件名");
                prompt_set(session, "filename_format", "文件名格式（留空用默认）：")?;
            }
            "2" => {
                println!("示例：500k、2.5M、800k-2M");
                prompt_set(session, "rate_limit", "限速（留空不限）：")?;
            }
            "3" => {
                println!("示例：2.0、1.5-3.0");
                prompt_set(session, "sleep", "下载间隔秒数（留空无）：")?;
            }
            "4" => {
                let text = read_line("最大重试次数（-1 为无限）：")?;
                if let Ok(parsed) = text.trim().parse::<i32>() {
                    session.options.retries = parsed;
                }
            }
            "5" => {
                println!("可选浏览器：{}", VALID_BROWSERS.join(", "));
                prompt_set(session, "cookies_browser", "从哪个浏览器读 Cookie（留空无）：")?;
            }
            "6" => prompt_set(session, "archive_file", "下载档案文件路径（留空无）：")?,
            "7" => {
                println!("示例：1-10、5、1:100:2");
                prompt_set(session, "range_filter", "范围过滤（留空全部）：")?;
            }
            "8" => session.options.write_metadata = !session.options.write_metadata,
            "9" => session.options.zip_output = !session.options.zip_output,
            "10" => {
                let opt = read_line("直通选项（key=value 形式）：")?;
                let opt = opt.trim();
                if opt.contains('=') {
                    session.options.extra_options.push(opt.to_string());
                }
            }
            _ => {}
        }
    }
    Ok(())
}

fn prompt_set(session: &mut Session, field: &str, prompt: &str) -> Result<()> {
    let value = read_line(prompt)?;
    // 留空也写入：允许用户清掉已有值
    if let Err(err) = session.options.set_field(field, value.trim()) {
        println!("{err}");
    }
    Ok(())
}

fn menu_presets(session: &mut Session) -> Result<()> {
    println!("\n===== 预设列表 =====");
    let all = presets::list_presets();
    for (index, preset) in all.iter().enumerate() {
        println!("{}. {} - {}", index + 1, preset.name, preset.description);
    }
    let choice = read_line("请选择预设编号（留空返回）：")?;
    let choice = choice.trim();
    if choice.is_empty() {
        return Ok(());
    }
    let Ok(number) = choice.parse::<usize>() else {
        return Ok(());
    };
    let Some(preset) = all.get(number.saturating_sub(1)) else {
        println!("无效编号。");
        return Ok(());
    };

    if preset.requires_target() {
        let target = read_line("输入用户名/目标：")?;
        let target = target.trim();
        if target.is_empty() {
            return Ok(());
        }
        session.apply_preset(preset.name, target);
    } else {
        session.apply_preset(preset.name, "");
    }
    Ok(())
}

fn menu_load_profile(session: &mut Session, config: &Config) -> Result<()> {
    if config.profiles.is_empty() {
        println!("还没有保存过档案，可用“保存为档案”创建。\n");
        return Ok(());
    }

    println!("\n===== 档案列表 =====");
    let names: Vec<&String> = config.profiles.keys().collect();
    for (index, name) in names.iter().enumerate() {
        let profile = &config.profiles[name.as_str()];
        if profile.description.is_empty() {
            println!("{}. {}", index + 1, name);
        } else {
            println!("{}. {} - {}", index + 1, name, profile.description);
        }
    }
    let choice = read_line("请选择档案编号（留空返回）：")?;
    let choice = choice.trim();
    if choice.is_empty() {
        return Ok(());
    }
    if let Ok(number) = choice.parse::<usize>() {
        if let Some(name) = names.get(number.saturating_sub(1)) {
            let name = name.to_string();
            session.apply_profile(config, &name)?;
        }
    }
    Ok(())
}

fn menu_save_profile(session: &Session, config: &mut Config) -> Result<()> {
    let name = read_line("档案名（留空取消）：")?;
    let name = name.trim().to_string();
    if name.is_empty() {
        return Ok(());
    }
    let description = read_line("描述（可留空）：")?;
    config.add_profile(&name, session.options.clone(), description.trim());
    config.save(None).context("保存配置失败")?;
    println!("已保存档案: {name}\n");
    Ok(())
}

fn menu_run(session: &mut Session, dry_run: bool) -> Result<()> {
    if session.url.is_empty() {
        println!("错误：尚未设置 URL。\n");
        return Ok(());
    }

    let issues = validate_options(&session.options);
    if !issues.is_empty() {
        for issue in issues {
            println!("配置错误: {}: {}（{}）", issue.field, issue.message, issue.value);
        }
        println!();
        return Ok(());
    }

    let argv = session.build_command(dry_run);
    println!(
        "{}：{}\n",
        if dry_run { "模拟执行" } else { "执行" },
        argv.join(" ")
    );

    if !dry_run {
        runner::ensure_destination(&session.options).context("创建下载目录失败")?;
    }

    match runner::run_streaming(&argv) {
        Ok(status) if status.success() => println!("\n✓ 完成\n"),
        Ok(status) => println!("\n结束，退出码 {}\n", status.code().unwrap_or(-1)),
        Err(err) => println!("\n执行失败: {err}\n"),
    }
    Ok(())
}

fn menu_sites() -> Result<()> {
    println!("正在获取支持的站点列表……");
    match runner::list_extractors(runner::DEFAULT_TOOL) {
        Ok(lines) => {
            println!("\n支持的站点（{} 个解析器）：\n", lines.len());
            for line in lines.iter().take(50) {
                println!("  {line}");
            }
            if lines.len() > 50 {
                println!("\n  …… 其余 {} 个省略", lines.len() - 50);
            }
            println!();
        }
        Err(err) => println!("获取失败: {err}\n"),
    }
    Ok(())
}

fn read_line(prompt: &str) -> Result<String> {
    print!("{}", prompt);
    io::stdout().flush().ok();
    let stdin = io::stdin();
    let mut line = String::new();
    stdin.lock().read_line(&mut line)?;
    Ok(line)
}

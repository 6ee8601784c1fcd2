//! 外部下载工具的进程调用。
//!
//! 工具被当作黑盒：输入一个参数向量和目标 URL，输出退出码与诊断文本。
//! 批处理路径带 300 秒硬超时；交互/单次下载路径直通终端、无超时。

use std::ffi::OsStr;
use std::fs;
use std::io::Read;
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::base_system::paths::expand_user;
use crate::download::options::DownloadOptions;

/// 默认的外部工具程序名。
pub const DEFAULT_TOOL: &str = "gallery-dl";

/// 批处理中单个任务的硬超时。
pub const TOOL_TIMEOUT: Duration = Duration::from_secs(300);

const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// 构造一个不抢焦点的 Command（Windows 下不弹出控制台窗口）。
pub fn command(program: impl AsRef<OsStr>) -> Command {
    let mut cmd = Command::new(program);
    configure_for_background(&mut cmd);
    cmd
}

#[cfg(windows)]
fn configure_for_background(cmd: &mut Command) {
    use std::os::windows::process::CommandExt;

    const CREATE_NO_WINDOW: u32 = 0x0800_0000;
    cmd.creation_flags(CREATE_NO_WINDOW);
}

#[cfg(not(windows))]
fn configure_for_background(_cmd: &mut Command) {}

/// 完整参数向量：程序名 + 选项参数 + 可选 `-s`（仅模拟） + URL。
pub fn build_command(tool: &str, options: &DownloadOptions, url: &str, dry_run: bool) -> Vec<String> {
    let mut argv = vec![tool.to_string()];
    argv.extend(options.to_tool_args());
    if dry_run {
        argv.push("-s".to_string());
    }
    argv.push(url.to_string());
    argv
}

/// 下载目录存在性保证（幂等）。
pub fn ensure_destination(options: &DownloadOptions) -> std::io::Result<()> {
    if options.destination.is_empty() {
        return Ok(());
    }
    fs::create_dir_all(expand_user(&options.destination))
}

/// 一次外部调用的结果。执行类错误一律折叠成 (success, message)，
/// 不会向上抛异常。
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub success: bool,
    pub message: String,
}

impl RunOutcome {
    fn ok() -> Self {
        Self {
            success: true,
            message: String::new(),
        }
    }

    fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// 批处理路径：阻塞执行，带硬超时；stderr 被捕获用于失败消息，
/// stdout 直通终端。
pub fn run_with_timeout(argv: &[String], timeout: Duration) -> RunOutcome {
    debug!(target: "runner", command = %argv.join(" "), "调用外部工具");

    let (program, args) = match argv.split_first() {
        Some(split) => split,
        None => return RunOutcome::fail("empty command"),
    };

    let mut child = match command(program).args(args).stderr(Stdio::piped()).spawn() {
        Ok(child) => child,
        Err(err) => return RunOutcome::fail(err.to_string()),
    };

    // stderr 由独立线程读到底，避免管道写满后子进程卡死
    let mut stderr_handle = child.stderr.take().map(|mut stderr| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = stderr.read_to_end(&mut buf);
            buf
        })
    });

    fn collect_stderr(handle: Option<thread::JoinHandle<Vec<u8>>>) -> String {
        handle
            .and_then(|h| h.join().ok())
            .map(|buf| String::from_utf8_lossy(&buf).trim().to_string())
            .unwrap_or_default()
    }

    let started = Instant::now();
    loop {
        if started.elapsed() >= timeout {
            kill_child(&mut child);
            let _ = collect_stderr(stderr_handle.take());
            warn!(target: "runner", "外部工具执行超时，已终止");
            return RunOutcome::fail(format!("timed out after {}s", timeout.as_secs()));
        }

        match child.try_wait() {
            Ok(Some(status)) => {
                let stderr_text = collect_stderr(stderr_handle.take());
                return classify_exit(status, &stderr_text);
            }
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(err) => {
                kill_child(&mut child);
                let _ = collect_stderr(stderr_handle.take());
                return RunOutcome::fail(err.to_string());
            }
        }
    }
}

fn classify_exit(status: ExitStatus, stderr_text: &str) -> RunOutcome {
    if status.success() {
        return RunOutcome::ok();
    }
    if !stderr_text.is_empty() {
        return RunOutcome::fail(stderr_text);
    }
    match status.code() {
        Some(code) => RunOutcome::fail(format!("exit code {code}")),
        None => RunOutcome::fail("terminated by signal"),
    }
}

fn kill_child(child: &mut std::process::Child) {
    let _ = child.kill();
    let _ = child.wait();
}

/// 交互/单次下载路径：stdio 全部直通终端，阻塞到工具退出，
/// 返回退出码（spawn 失败返回 Err）。
pub fn run_streaming(argv: &[String]) -> std::io::Result<ExitStatus> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| std::io::Error::other("empty command"))?;
    debug!(target: "runner", command = %argv.join(" "), "调用外部工具（直通）");
    command(program).args(args).status()
}

/// 查询工具支持的站点列表（`--list-extractors`）。
pub fn list_extractors(tool: &str) -> std::io::Result<Vec<String>> {
    let output = command(tool).arg("--list-extractors").output()?;
    if !output.status.success() {
        return Err(std::io::Error::other(format!(
            "{tool} --list-extractors failed"
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(str::to_string)
        .collect())
}

/// 查询工具版本，失败时返回 None（版本展示是尽力而为）。
pub fn tool_version(tool: &str) -> Option<String> {
    let output = command(tool).arg("--version").output().ok()?;
    if !output.status.success() {
        return None;
    }
    Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

//! 批处理执行器的端到端测试：用可执行桩脚本替代外部下载工具，
//! 验证失败容忍、断点续跑与 dry-run 行为。

#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use insta_mash::base_system::context::Config;
use insta_mash::batch::executor::{BatchExecutor, BatchRunOptions};
use insta_mash::batch::file::BatchFile;
use insta_mash::batch::resume::ResumeState;
use insta_mash::download::options::DownloadOptions;

/// 写一个记录调用参数的桩“下载工具”。URL 含 `fail` 时以退出码 1 失败。
fn write_stub_tool(dir: &Path, invocations_log: &Path) -> PathBuf {
    let path = dir.join("stub-tool.sh");
    let script = format!(
        "#!/bin/sh\n\
         echo \"$@\" >> {log}\n\
         for arg in \"$@\"; do last=\"$arg\"; done\n\
         case \"$last\" in\n\
           *fail*) echo boom >&2; exit 1;;\n\
         esac\n\
         exit 0\n",
        log = invocations_log.display()
    );
    fs::write(&path, script).unwrap();
    let mut perms = fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).unwrap();
    path
}

fn write_batch_file(dir: &Path, content: &str) -> PathBuf {
    let path = dir.join("batch.txt");
    fs::write(&path, content).unwrap();
    path
}

fn run_options(dir: &Path, tool: &Path) -> BatchRunOptions {
    // 下载目录指到临时目录里，避免默认 ./downloads 落进工作目录
    let mut global = DownloadOptions::default();
    global.destination = dir.join("downloads").to_string_lossy().to_string();
    BatchRunOptions {
        global_options: Some(global),
        tool: tool.to_string_lossy().to_string(),
        checkpoint: Some(dir.join("state.json")),
        ..Default::default()
    }
}

fn logged_lines(log: &Path) -> Vec<String> {
    fs::read_to_string(log)
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

#[test]
fn every_entry_is_attempted_once_despite_failures() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("invocations.log");
    let tool = write_stub_tool(dir.path(), &log);
    let batch_path = write_batch_file(
        dir.path(),
        "https://a.example/ok1\nhttps://b.example/fail\nhttps://c.example/ok2\n",
    );

    let config = Config::default();
    let batch = BatchFile::load(&batch_path).unwrap();
    let progress = BatchExecutor::new(&config, run_options(dir.path(), &tool)).run(&batch);

    assert_eq!(progress.total, 3);
    assert_eq!(progress.completed, 3);
    assert_eq!(progress.succeeded, 2);
    assert_eq!(progress.failed, 1);
    assert_eq!(progress.succeeded + progress.failed, progress.completed);
    assert_eq!(progress.errors.len(), 1);
    assert_eq!(progress.errors[0].0, "https://b.example/fail");
    assert_eq!(progress.errors[0].1, "boom");

    // 每个任务恰好调用一次外部工具，URL 是最后一个位置参数
    let lines = logged_lines(&log);
    assert_eq!(lines.len(), 3);
    assert!(lines[0].ends_with("https://a.example/ok1"));
    assert!(lines[1].ends_with("https://b.example/fail"));
    assert!(lines[2].ends_with("https://c.example/ok2"));

    // 每个任务之后都有断点落盘
    let state = ResumeState::load(&dir.path().join("state.json")).unwrap();
    assert_eq!(state.batch_path, batch_path);
    assert_eq!(
        state.completed_indices.iter().copied().collect::<Vec<_>>(),
        vec![0, 1, 2]
    );
}

#[test]
fn resume_skips_previously_completed_indices() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("invocations.log");
    let tool = write_stub_tool(dir.path(), &log);
    let batch_path = write_batch_file(
        dir.path(),
        "https://a.example/x\nhttps://b.example/y\nhttps://c.example/z\n",
    );

    // 预置断点：0 与 2 已完成
    let state_path = dir.path().join("state.json");
    let mut state = ResumeState::new(batch_path.clone());
    state.mark_completed(0);
    state.mark_completed(2);
    state.save(&state_path).unwrap();

    let config = Config::default();
    let batch = BatchFile::load(&batch_path).unwrap();
    let mut options = run_options(dir.path(), &tool);
    options.resume = true;
    let progress = BatchExecutor::new(&config, options).run(&batch);

    // 被跳过的任务不更新进度
    assert_eq!(progress.total, 3);
    assert_eq!(progress.completed, 1);
    assert_eq!(progress.succeeded, 1);
    assert_eq!(progress.failed, 0);

    let lines = logged_lines(&log);
    assert_eq!(lines.len(), 1);
    assert!(lines[0].ends_with("https://b.example/y"));

    // 续跑之后三个下标都已完成
    let state = ResumeState::load(&state_path).unwrap();
    assert_eq!(state.completed_indices.len(), 3);
}

#[test]
fn stale_resume_state_for_other_file_is_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("invocations.log");
    let tool = write_stub_tool(dir.path(), &log);
    let batch_path = write_batch_file(dir.path(), "https://a.example/x\n");

    // 断点里记录的是别的批处理文件，应当被忽略
    let state_path = dir.path().join("state.json");
    let mut state = ResumeState::new(PathBuf::from("/somewhere/else.txt"));
    state.mark_completed(0);
    state.save(&state_path).unwrap();

    let config = Config::default();
    let batch = BatchFile::load(&batch_path).unwrap();
    let mut options = run_options(dir.path(), &tool);
    options.resume = true;
    let progress = BatchExecutor::new(&config, options).run(&batch);

    assert_eq!(progress.completed, 1);
    assert_eq!(logged_lines(&log).len(), 1);
}

#[test]
fn dry_run_appends_simulate_flag_and_creates_no_destination() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("invocations.log");
    let tool = write_stub_tool(dir.path(), &log);
    let batch_path = write_batch_file(dir.path(), "https://a.example/x\n");

    let config = Config::default();
    let batch = BatchFile::load(&batch_path).unwrap();
    let mut options = run_options(dir.path(), &tool);
    options.dry_run = true;
    let progress = BatchExecutor::new(&config, options).run(&batch);

    assert_eq!(progress.succeeded, 1);
    let lines = logged_lines(&log);
    assert_eq!(lines.len(), 1);
    // `-s` 紧挨在最后的 URL 之前
    assert!(lines[0].ends_with("-s https://a.example/x"));
    assert!(!dir.path().join("downloads").exists());
}

#[test]
fn profile_and_preset_references_shape_the_tool_arguments() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("invocations.log");
    let tool = write_stub_tool(dir.path(), &log);
    let batch_path = write_batch_file(
        dir.path(),
        "https://a.example/x preset:polite profile:meta\n",
    );

    let mut config = Config::default();
    let mut meta = DownloadOptions::default();
    meta.write_metadata = true;
    config.add_profile("meta", meta, "");

    let batch = BatchFile::load(&batch_path).unwrap();
    assert!(batch.validate(&config).unwrap().is_empty());

    let progress = BatchExecutor::new(&config, run_options(dir.path(), &tool)).run(&batch);
    assert_eq!(progress.succeeded, 1);

    let line = logged_lines(&log).pop().unwrap();
    // polite 预设的限速/间隔 + 档案的元数据开关都要出现在参数里
    assert!(line.contains("-r 500k"));
    assert!(line.contains("--sleep 2.0-4.0"));
    assert!(line.contains("--sleep-request 1.0"));
    assert!(line.contains("-R 2"));
    assert!(line.contains("--write-metadata"));
}

#[test]
fn delay_waits_between_entries_but_not_after_the_last() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("invocations.log");
    let tool = write_stub_tool(dir.path(), &log);
    let batch_path = write_batch_file(dir.path(), "https://a.example/x\nhttps://b.example/y\n");

    let config = Config::default();
    let batch = BatchFile::load(&batch_path).unwrap();
    let mut options = run_options(dir.path(), &tool);
    options.delay = 0.3;

    let started = std::time::Instant::now();
    let progress = BatchExecutor::new(&config, options).run(&batch);
    let elapsed = started.elapsed();

    assert_eq!(progress.completed, 2);
    // 两个任务之间恰好一次等待：至少 0.3s，远小于两次等待
    assert!(elapsed >= std::time::Duration::from_millis(300));
    assert!(elapsed < std::time::Duration::from_secs(5));
}

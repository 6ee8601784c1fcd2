//! 批处理执行器：严格顺序地驱动每个任务走完
//! 解析 → 调用外部工具 → 记录 的流程。
//!
//! 失败容忍是硬性约束：单个任务失败只记录、不中断，每个任务在一次运行中
//! 恰好尝试一次。断点状态在每个任务处理完后落盘，杀掉的运行可以用
//! `--resume` 续跑并跳过已处理下标。

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use tracing::{info, warn};

use crate::base_system::context::Config;
use crate::batch::file::BatchFile;
use crate::batch::progress::{BatchProgress, BatchReporter};
use crate::batch::resume::ResumeState;
use crate::download::options::{DownloadOptions, apply_env_overrides};
use crate::download::runner::{self, RunOutcome, TOOL_TIMEOUT};

#[derive(Debug, Clone)]
pub struct BatchRunOptions {
    /// 批处理全局选项层（默认值之上、档案/预设之下）。
    pub global_options: Option<DownloadOptions>,
    /// 任务之间的阻塞等待秒数（顺序驱动里就是简单 sleep）。
    pub delay: f64,
    /// 仅模拟：给外部工具追加 `-s`，不创建下载目录。
    pub dry_run: bool,
    /// 外部工具程序名，测试可替换为桩程序。
    pub tool: String,
    /// 是否从已有断点续跑。
    pub resume: bool,
    /// 断点文件位置覆盖；None 时按批处理文件名推导。
    pub checkpoint: Option<PathBuf>,
    pub show_progress: bool,
}

impl Default for BatchRunOptions {
    fn default() -> Self {
        Self {
            global_options: None,
            delay: 0.0,
            dry_run: false,
            tool: runner::DEFAULT_TOOL.to_string(),
            resume: false,
            checkpoint: None,
            show_progress: false,
        }
    }
}

pub struct BatchExecutor<'a> {
    config: &'a Config,
    options: BatchRunOptions,
    interrupted: Option<Arc<AtomicBool>>,
}

impl<'a> BatchExecutor<'a> {
    pub fn new(config: &'a Config, options: BatchRunOptions) -> Self {
        Self {
            config,
            options,
            interrupted: None,
        }
    }

    /// 挂接中断标记（Ctrl-C 处理器置位）；主循环在任务之间检查它。
    pub fn with_interrupt_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupted = Some(flag);
        self
    }

    fn is_interrupted(&self) -> bool {
        self.interrupted
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    /// 顺序执行整个批处理，返回最终进度。
    pub fn run(&self, batch: &BatchFile) -> BatchProgress {
        let state_path = self
            .options
            .checkpoint
            .clone()
            .unwrap_or_else(|| ResumeState::state_path_for(&batch.path));

        // 断点属于别的批处理文件时视同不存在
        let mut state = if self.options.resume {
            ResumeState::load(&state_path)
                .filter(|s| s.batch_path == batch.path)
                .unwrap_or_else(|| ResumeState::new(batch.path.clone()))
        } else {
            ResumeState::new(batch.path.clone())
        };

        let total = batch.entries.len();
        let resumed = state.completed_indices.len();
        if resumed > 0 {
            info!(target: "batch", resumed, total, "从断点续跑，跳过已完成任务");
        }

        let mut reporter = BatchReporter::new(total, self.options.show_progress);

        for (index, entry) in batch.entries.iter().enumerate() {
            if self.is_interrupted() {
                warn!(target: "batch", index, "收到中断，停止批处理（断点已保存）");
                break;
            }

            // 已完成的下标整条跳过：不更新进度，也不等待
            if state.is_completed(index) {
                info!(target: "batch", index, url = %entry.url, "跳过已完成任务");
                continue;
            }

            reporter.set_current(&entry.url);
            info!(target: "batch", index, url = %entry.url, "开始任务");

            let outcome = self.process_entry(entry);
            if outcome.success {
                info!(target: "batch", index, url = %entry.url, "任务完成");
            } else {
                warn!(target: "batch", index, url = %entry.url, error = %outcome.message, "任务失败");
            }
            reporter.record(&entry.url, outcome.success, &outcome.message);

            state.mark_completed(index);
            if let Err(err) = state.save(&state_path) {
                warn!(target: "batch", error = %err, "断点保存失败");
            }

            if self.options.delay > 0.0 && index + 1 < total {
                thread::sleep(Duration::from_secs_f64(self.options.delay));
            }
        }

        reporter.finish()
    }

    /// 单个任务：解析选项 → 准备目录 → 调用工具。所有失败路径都折叠成
    /// RunOutcome，绝不向外抛。
    fn process_entry(&self, entry: &crate::batch::file::BatchEntry) -> RunOutcome {
        let mut options =
            match entry.resolve_options(self.config, self.options.global_options.as_ref()) {
                Ok(options) => options,
                Err(err) => {
                    return RunOutcome {
                        success: false,
                        message: err.to_string(),
                    };
                }
            };
        apply_env_overrides(&mut options);

        if !self.options.dry_run {
            if let Err(err) = runner::ensure_destination(&options) {
                return RunOutcome {
                    success: false,
                    message: format!("create destination failed: {err}"),
                };
            }
        }

        let argv = runner::build_command(&self.options.tool, &options, &entry.url, self.options.dry_run);
        runner::run_with_timeout(&argv, TOOL_TIMEOUT)
    }
}

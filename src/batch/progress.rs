//! 批处理进度统计与 CLI 进度条。
//!
//! `BatchProgress` 是纯数据（可测），`BatchReporter` 在其上挂一个可选的
//! indicatif 进度条；两者都只被顺序执行的批处理主循环修改。

use indicatif::{ProgressBar, ProgressStyle};

/// 一次批处理运行的进度快照。
#[derive(Debug, Clone, Default)]
pub struct BatchProgress {
    /// 任务总数，批处理开始时固定。
    pub total: usize,
    pub completed: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// 正在处理的 URL（空表示当前没有任务在飞）。
    pub current_url: String,
    /// 失败任务的 (url, 错误消息) 列表，按发生顺序。
    pub errors: Vec<(String, String)>,
}

impl BatchProgress {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            ..Default::default()
        }
    }

    pub fn set_current(&mut self, url: &str) {
        self.current_url = url.to_string();
    }

    /// 每个被处理的条目恰好调用一次。
    pub fn update(&mut self, url: &str, success: bool, message: &str) {
        self.completed += 1;
        if success {
            self.succeeded += 1;
        } else {
            self.failed += 1;
            self.errors.push((url.to_string(), message.to_string()));
        }
        self.current_url.clear();
    }
}

pub(crate) struct BatchReporter {
    pub(crate) progress: BatchProgress,
    bar: Option<ProgressBar>,
}

impl BatchReporter {
    pub(crate) fn new(total: usize, show_bar: bool) -> Self {
        let bar = show_bar.then(|| {
            let bar = ProgressBar::new(total as u64);
            bar.set_style(
                ProgressStyle::with_template("{bar:40.cyan/blue} {pos}/{len} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar()),
            );
            bar
        });
        Self {
            progress: BatchProgress::new(total),
            bar,
        }
    }

    pub(crate) fn set_current(&mut self, url: &str) {
        self.progress.set_current(url);
        if let Some(bar) = &self.bar {
            bar.set_message(url.to_string());
        }
    }

    pub(crate) fn record(&mut self, url: &str, success: bool, message: &str) {
        self.progress.update(url, success, message);
        if let Some(bar) = &self.bar {
            bar.inc(1);
        }
    }

    pub(crate) fn finish(self) -> BatchProgress {
        if let Some(bar) = &self.bar {
            bar.finish_and_clear();
        }
        self.progress
    }
}

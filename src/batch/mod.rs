//! 批处理模块入口。
//!
//! 子模块：
//! - `file`     — 任务文件解析与引用校验
//! - `progress` — 进度统计与 CLI 进度条
//! - `resume`   — 断点状态持久化
//! - `executor` — 顺序执行驱动

pub mod executor;
pub mod file;
pub mod progress;
pub mod resume;

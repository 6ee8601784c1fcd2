//! insta-mash：gallery-dl 的交互/CLI 前端。
//!
//! 核心是分层配置（默认值/档案/预设/批处理全局/CLI/环境变量）的确定性
//! 合并，以及带断点续跑的批处理执行器；外部下载工具只通过参数向量与
//! 退出码交互。
//!
//! 代码结构（读代码入口）：
//! - `base_system`：配置文件/日志/路径等基础设施
//! - `download`：选项模型、预设注册表、外部工具调用
//! - `batch`：批处理文件解析、进度、断点与执行器
//! - `ui`：菜单式交互模式

pub mod base_system;
pub mod batch;
pub mod download;
pub mod ui;

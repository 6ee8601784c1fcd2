//! 批处理断点状态的持久化。
//!
//! 小 JSON 文件：批处理文件路径、已完成条目下标（0 起，持久化时天然有序）
//! 与 RFC-3339 保存时间。损坏或缺失的断点文件一律当作“无断点”。

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::debug;

use crate::base_system::paths::{resume_dir, safe_fs_name};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumeState {
    pub batch_path: PathBuf,
    /// BTreeSet 序列化为有序列表，成员判断与排序输出一步到位。
    pub completed_indices: BTreeSet<usize>,
    pub saved_at: String,
}

impl ResumeState {
    pub fn new(batch_path: PathBuf) -> Self {
        Self {
            batch_path,
            completed_indices: BTreeSet::new(),
            saved_at: String::new(),
        }
    }

    /// 某个批处理文件对应的默认断点文件位置（数据目录下）。
    pub fn state_path_for(batch_path: &Path) -> PathBuf {
        let stem = batch_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "batch".to_string());
        resume_dir().join(format!("{}.json", safe_fs_name(&stem, "_", 120)))
    }

    pub fn mark_completed(&mut self, index: usize) {
        self.completed_indices.insert(index);
    }

    pub fn is_completed(&self, index: usize) -> bool {
        self.completed_indices.contains(&index)
    }

    /// 写出断点文件（必要时创建父目录），并刷新保存时间戳。
    pub fn save(&mut self, path: &Path) -> io::Result<()> {
        self.saved_at = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .map_err(io::Error::other)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)
    }

    /// 读取断点文件。缺失、读不出或解析失败都返回 None，绝不报错。
    pub fn load(path: &Path) -> Option<ResumeState> {
        let raw = fs::read_to_string(path).ok()?;
        match serde_json::from_str(&raw) {
            Ok(state) => Some(state),
            Err(err) => {
                debug!(target: "batch", path = %path.display(), error = %err, "断点文件损坏，按无断点处理");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_load_round_trip_preserves_indices_and_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");

        let mut state = ResumeState::new(PathBuf::from("/tmp/batch.txt"));
        state.mark_completed(4);
        state.mark_completed(0);
        state.mark_completed(2);
        state.save(&path).unwrap();

        let loaded = ResumeState::load(&path).unwrap();
        assert_eq!(loaded.batch_path, PathBuf::from("/tmp/batch.txt"));
        assert_eq!(loaded.completed_indices, state.completed_indices);
        assert_eq!(loaded.saved_at, state.saved_at);
        assert!(!loaded.saved_at.is_empty());
        // 时间戳可按 RFC-3339 解回，亚秒精度不丢
        assert!(OffsetDateTime::parse(&loaded.saved_at, &Rfc3339).is_ok());
    }

    #[test]
    fn persisted_indices_are_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let mut state = ResumeState::new(PathBuf::from("b.txt"));
        for index in [9, 1, 5] {
            state.mark_completed(index);
        }
        state.save(&path).unwrap();
        let raw = fs::read_to_string(&path).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(
            parsed["completed_indices"],
            serde_json::json!([1, 5, 9])
        );
    }

    #[test]
    fn missing_file_loads_as_absent() {
        assert!(ResumeState::load(Path::new("/nonexistent/state.json")).is_none());
    }

    #[test]
    fn corrupt_file_loads_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "{not json").unwrap();
        assert!(ResumeState::load(&path).is_none());
    }
}

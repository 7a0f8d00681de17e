//! 对 `mr-berry::dataset` 的更一层封装. 提供更直接的病人目录加载器.

use mr_berry::dataset::{self, Patient};
use std::env;
use std::io;
use std::path::{Path, PathBuf};

/// 指定数据集根目录的环境变量.
pub const DATA_DIR_ENV: &str = "MR_BERRY_DATA_DIR";

/// 获取病人数据集根目录.
///
/// 1. 若环境变量 `$MR_BERRY_DATA_DIR` 非空, 则返回其值;
/// 2. 否则, 返回 `$HOME/dataset/patients`;
/// 3. 无法确定用户主目录时返回 `None`.
pub fn data_dir_from_env_or_home() -> Option<PathBuf> {
    match env::var(DATA_DIR_ENV) {
        Ok(d) if !d.is_empty() => Some(PathBuf::from(d)),
        _ => dataset::home_dataset_dir_with(["patients"]),
    }
}

/// 列出 `path` 下的所有病人.
#[inline]
pub fn patients<P: AsRef<Path>>(path: P) -> io::Result<Vec<Patient>> {
    dataset::list_patients(path)
}

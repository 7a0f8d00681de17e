//! 数据集操作.
//!
//! 数据集根目录下每个子目录对应一个病人, 子目录名即病人 ID.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::consts::file;

/// 获取 `{用户主目录}/dataset` 目录.
pub fn home_dataset_dir() -> Option<PathBuf> {
    let mut ans = dirs::home_dir()?;
    ans.push("dataset");
    Some(ans)
}

/// 获取 `{用户主目录}/dataset` 目录下给定继续项组成的全路径.
pub fn home_dataset_dir_with<P: AsRef<Path>, I: IntoIterator<Item = P>>(it: I) -> Option<PathBuf> {
    let mut ans = home_dataset_dir()?;
    ans.extend(it);
    Some(ans)
}

/// 单个病人目录.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Patient {
    dir: PathBuf,
    id: String,
}

impl Patient {
    /// 以目录 `dir` 创建病人. 病人 ID 取目录名.
    ///
    /// 该方法不检查目录是否存在.
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        let dir = dir.as_ref().to_owned();
        let id = dir
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self { dir, id }
    }

    /// 病人 ID.
    #[inline]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// 病人目录.
    #[inline]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[inline]
    fn file(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// 参考 t1ce 序列.
    #[inline]
    pub fn t1ce_path(&self) -> PathBuf {
        self.file(file::T1CE)
    }

    /// 肿瘤掩膜.
    #[inline]
    pub fn tumor_path(&self) -> PathBuf {
        self.file(file::TUMOR)
    }

    /// 术腔掩膜.
    #[inline]
    pub fn cavity_path(&self) -> PathBuf {
        self.file(file::CAVITY)
    }

    /// 体素特征表.
    #[inline]
    pub fn features_path(&self) -> PathBuf {
        self.file(file::VOXEL_FEATURES)
    }

    /// 预测结果表.
    #[inline]
    pub fn predictions_path(&self) -> PathBuf {
        self.file(file::PREDICTIONS)
    }

    /// 可视化输出目录.
    #[inline]
    pub fn saved_images_dir(&self) -> PathBuf {
        self.file(file::SAVED_IMAGES)
    }

    /// 特征表是否缺失. 特征提取在外部完成, 缺失时该病人无法处理.
    #[inline]
    pub fn needs_features(&self) -> bool {
        !self.features_path().is_file()
    }
}

/// 列出 `root` 下所有病人, 按目录名排序. 普通文件会被忽略.
pub fn list_patients<P: AsRef<Path>>(root: P) -> io::Result<Vec<Patient>> {
    let mut ans = Vec::new();
    for entry in fs::read_dir(root.as_ref())? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            ans.push(Patient::new(entry.path()));
        }
    }
    ans.sort_unstable_by(|a, b| a.id.cmp(&b.id));
    Ok(ans)
}

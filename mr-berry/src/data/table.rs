//! 以体素索引为行键的表格的持久化存储.
//!
//! 表格以 npz 归档保存, 每一列为一个 npy 数组, 其中 `index` 列为平铺的体素索引.

use std::fmt;
use std::fs::File;
use std::path::Path;

use ndarray::{Array1, Array2, ArrayBase, Dimension, Ix1, Ix2, OwnedRepr};
use ndarray_npy::{NpzReader, NpzWriter, ReadNpzError, ReadableElement, WriteNpzError};

use crate::consts::column;
use crate::VoxelIndex;

/// 读写体素表时的错误.
#[derive(Debug)]
pub enum TableError {
    /// 底层 I/O 错误.
    Io(std::io::Error),

    /// 读取 npz 归档错误.
    Read(ReadNpzError),

    /// 写入 npz 归档错误.
    Write(WriteNpzError),

    /// 缺少指定列.
    MissingColumn(&'static str),

    /// 索引列中存在负数.
    NegativeIndex(i64),

    /// 列长度与索引列不一致. `(列名, 列长度, 索引长度)`.
    LengthMismatch(&'static str, usize, usize),
}

impl fmt::Display for TableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableError::Io(e) => write!(f, "table io error: {e}"),
            TableError::Read(e) => write!(f, "cannot read npz table: {e}"),
            TableError::Write(e) => write!(f, "cannot write npz table: {e}"),
            TableError::MissingColumn(c) => write!(f, "missing column `{c}`"),
            TableError::NegativeIndex(i) => write!(f, "negative voxel index {i}"),
            TableError::LengthMismatch(c, len, index) => {
                write!(f, "column `{c}` has {len} rows but index has {index}")
            }
        }
    }
}

impl std::error::Error for TableError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TableError::Io(e) => Some(e),
            TableError::Read(e) => Some(e),
            TableError::Write(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for TableError {
    fn from(e: std::io::Error) -> Self {
        TableError::Io(e)
    }
}

impl From<ReadNpzError> for TableError {
    fn from(e: ReadNpzError) -> Self {
        TableError::Read(e)
    }
}

impl From<WriteNpzError> for TableError {
    fn from(e: WriteNpzError) -> Self {
        TableError::Write(e)
    }
}

/// 体素表操作结果.
pub type TableResult<T> = Result<T, TableError>;

/// 在归档中查找列. numpy 写出的条目名带有 `.npy` 后缀, 两种写法都接受.
fn entry_name(names: &[String], col: &'static str) -> TableResult<String> {
    names
        .iter()
        .find(|n| n.as_str() == col || n.strip_suffix(".npy") == Some(col))
        .cloned()
        .ok_or(TableError::MissingColumn(col))
}

fn read_column<A, D>(
    npz: &mut NpzReader<File>,
    names: &[String],
    col: &'static str,
) -> TableResult<ArrayBase<OwnedRepr<A>, D>>
where
    A: ReadableElement,
    D: Dimension,
{
    let name = entry_name(names, col)?;
    Ok(npz.by_name::<OwnedRepr<A>, D>(&name)?)
}

/// 读取索引列. pandas 导出的索引通常是 `int64`, 因此在 `uint64` 失败时再尝试有符号类型.
fn read_index(npz: &mut NpzReader<File>, names: &[String]) -> TableResult<Array1<VoxelIndex>> {
    match read_column::<u64, Ix1>(npz, names, column::INDEX) {
        Ok(index) => Ok(index),
        Err(TableError::Read(_)) => {
            let signed = read_column::<i64, Ix1>(npz, names, column::INDEX)?;
            if let Some(&neg) = signed.iter().find(|i| **i < 0) {
                return Err(TableError::NegativeIndex(neg));
            }
            Ok(signed.mapv(|i| i as VoxelIndex))
        }
        Err(e) => Err(e),
    }
}

fn open_npz(path: &Path) -> TableResult<(NpzReader<File>, Vec<String>)> {
    let mut npz = NpzReader::new(File::open(path)?)?;
    let names = npz.names()?;
    Ok((npz, names))
}

#[inline]
fn check_len(col: &'static str, len: usize, index: usize) -> TableResult<()> {
    if len == index {
        Ok(())
    } else {
        Err(TableError::LengthMismatch(col, len, index))
    }
}

/// 逐体素特征表. 每一行为一个瘤周体素, 每一列为一个特征.
#[derive(Debug, Clone)]
pub struct FeatureTable {
    /// 体素索引.
    pub index: Array1<VoxelIndex>,

    /// 特征矩阵, 形状为 `(体素个数, 特征个数)`. 缺失值为 NaN.
    pub features: Array2<f64>,
}

impl FeatureTable {
    /// 从 npz 文件读取. 归档中必须有 `index` 和 `features` 两列.
    pub fn open<P: AsRef<Path>>(path: P) -> TableResult<Self> {
        let (mut npz, names) = open_npz(path.as_ref())?;
        let index = read_index(&mut npz, &names)?;
        let features = read_column::<f64, Ix2>(&mut npz, &names, column::FEATURES)?;
        check_len(column::FEATURES, features.nrows(), index.len())?;
        Ok(Self { index, features })
    }

    /// 以压缩 npz 格式保存到 `path`.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> TableResult<()> {
        let mut npz = NpzWriter::new_compressed(File::create(path.as_ref())?);
        npz.add_array(column::INDEX, &self.index)?;
        npz.add_array(column::FEATURES, &self.features)?;
        npz.finish()?;
        Ok(())
    }

    /// 行数.
    #[inline]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// 是否为空表.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

/// 逐体素预测结果表.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionTable {
    /// 体素索引.
    pub index: Array1<VoxelIndex>,

    /// 复发概率.
    pub probabilities: Array1<f64>,

    /// 二值化标注, 1 代表复发, 0 代表不复发.
    pub predictions: Array1<u8>,
}

impl PredictionTable {
    /// 由概率和阈值构建结果表. 概率严格大于 `threshold` 的体素被标注为复发.
    ///
    /// 如果 `index` 和 `probabilities` 长度不一致则返回 `Err`.
    pub fn from_threshold(
        index: Array1<VoxelIndex>,
        probabilities: Array1<f64>,
        threshold: f64,
    ) -> TableResult<Self> {
        check_len(column::PROBABILITIES, probabilities.len(), index.len())?;
        let predictions = probabilities.mapv(|p| u8::from(p > threshold));
        Ok(Self {
            index,
            probabilities,
            predictions,
        })
    }

    /// 从 npz 文件读取.
    pub fn open<P: AsRef<Path>>(path: P) -> TableResult<Self> {
        let (mut npz, names) = open_npz(path.as_ref())?;
        let index = read_index(&mut npz, &names)?;
        let probabilities = read_column::<f64, Ix1>(&mut npz, &names, column::PROBABILITIES)?;
        check_len(column::PROBABILITIES, probabilities.len(), index.len())?;
        let predictions = read_column::<u8, Ix1>(&mut npz, &names, column::PREDICTIONS)?;
        check_len(column::PREDICTIONS, predictions.len(), index.len())?;
        Ok(Self {
            index,
            probabilities,
            predictions,
        })
    }

    /// 以压缩 npz 格式保存到 `path`.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> TableResult<()> {
        let mut npz = NpzWriter::new_compressed(File::create(path.as_ref())?);
        npz.add_array(column::INDEX, &self.index)?;
        npz.add_array(column::PROBABILITIES, &self.probabilities)?;
        npz.add_array(column::PREDICTIONS, &self.predictions)?;
        npz.finish()?;
        Ok(())
    }

    /// 被标注为复发的体素个数.
    #[inline]
    pub fn positives(&self) -> usize {
        self.predictions.iter().filter(|p| **p != 0).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2};

    #[test]
    fn test_prediction_table_threshold() {
        let t = PredictionTable::from_threshold(
            array![3, 1, 4, 15],
            array![0.2, 0.5, 0.7, 0.5000001],
            0.5,
        )
        .unwrap();
        assert_eq!(t.predictions, array![0, 0, 1, 1]);
        assert_eq!(t.positives(), 2);

        let err = PredictionTable::from_threshold(array![1, 2], array![0.1], 0.5).unwrap_err();
        assert!(matches!(err, TableError::LengthMismatch("probabilities", 1, 2)));
    }

    #[test]
    fn test_prediction_table_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("predictions.npz");
        let t = PredictionTable::from_threshold(array![0, 9, 26], array![0.1, 0.9, 0.4], 0.3)
            .unwrap();
        t.save(&path).unwrap();
        assert_eq!(PredictionTable::open(&path).unwrap(), t);
    }

    #[test]
    fn test_feature_table_missing_column() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("voxel_features.npz");
        let mut npz = NpzWriter::new(File::create(&path).unwrap());
        npz.add_array("index", &array![1u64, 2]).unwrap();
        npz.finish().unwrap();

        let err = FeatureTable::open(&path).unwrap_err();
        assert!(matches!(err, TableError::MissingColumn("features")));
    }

    #[test]
    fn test_feature_table_signed_index() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("voxel_features.npz");
        let mut npz = NpzWriter::new(File::create(&path).unwrap());
        npz.add_array("index", &array![5i64, 7]).unwrap();
        npz.add_array("features", &Array2::<f64>::zeros((2, 3))).unwrap();
        npz.finish().unwrap();

        let t = FeatureTable::open(&path).unwrap();
        assert_eq!(t.index, array![5u64, 7]);
        assert_eq!(t.features.dim(), (2, 3));
    }
}

//! ROI (肿瘤或术腔) 提取与最近距离查询.

use std::fmt;
use std::path::PathBuf;

use crate::data::{RoiMask, VolumeError};
use crate::dataset::Patient;
use crate::{Idx3d, NiftiHeaderAttr, Shape3d};

mod kdtree;

pub use kdtree::KdTree;

/// ROI 提取错误.
#[derive(Debug)]
pub enum RoiError {
    /// 肿瘤掩膜和术腔掩膜均不存在.
    NotFound {
        /// 首选的肿瘤掩膜路径.
        tumor: PathBuf,

        /// 备选的术腔掩膜路径.
        cavity: PathBuf,
    },

    /// 掩膜文件存在, 但无法读取.
    Volume(PathBuf, VolumeError),
}

impl fmt::Display for RoiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoiError::NotFound { tumor, cavity } => write!(
                f,
                "neither tumor mask `{}` nor cavity mask `{}` exists",
                tumor.display(),
                cavity.display()
            ),
            RoiError::Volume(p, e) => write!(f, "cannot load roi mask `{}`: {e}", p.display()),
        }
    }
}

impl std::error::Error for RoiError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RoiError::NotFound { .. } => None,
            RoiError::Volume(_, e) => Some(e),
        }
    }
}

/// ROI 提取结果.
pub type RoiResult<T> = Result<T, RoiError>;

/// ROI 来源.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RoiSource {
    /// 肿瘤掩膜.
    Tumor,

    /// 术腔掩膜.
    Cavity,
}

/// ROI 体素坐标集合. 构建后不可变.
///
/// 内部按行优先升序存储且无重复, 因此两个集合相等当且仅当其内部向量相等.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoiPoints {
    shape: Shape3d,
    points: Vec<Idx3d>,
}

impl RoiPoints {
    /// 收集 `mask` 中所有非零体素.
    pub fn from_mask(mask: &RoiMask) -> Self {
        // `indexed_iter` 在标准布局下即为行优先序.
        Self {
            shape: mask.shape(),
            points: mask.foreground_pos(),
        }
    }

    /// 由任意坐标集合构建. 重复坐标会被合并.
    pub fn from_points<I: IntoIterator<Item = Idx3d>>(shape: Shape3d, it: I) -> Self {
        let mut points: Vec<Idx3d> = it.into_iter().collect();
        points.sort_unstable();
        points.dedup();
        Self { shape, points }
    }

    /// 掩膜形状.
    #[inline]
    pub fn shape(&self) -> Shape3d {
        self.shape
    }

    /// 体素个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// 是否为空.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// 按行优先序迭代所有坐标.
    #[inline]
    pub fn iter(&self) -> impl ExactSizeIterator<Item = &Idx3d> {
        self.points.iter()
    }

    /// `pos` 是否属于 ROI.
    #[inline]
    pub fn contains(&self, pos: &Idx3d) -> bool {
        self.points.binary_search(pos).is_ok()
    }

    /// 获取 `pos` 前后上下左右六个点中位于 ROI 之外的个数.
    /// 位于体数据以外的点同样计入.
    fn outer_neighbours(&self, (x, y, z): Idx3d) -> usize {
        [
            (x.wrapping_sub(1), y, z),
            (x.saturating_add(1), y, z),
            (x, y.wrapping_sub(1), z),
            (x, y.saturating_add(1), z),
            (x, y, z.wrapping_sub(1)),
            (x, y, z.saturating_add(1)),
        ]
        .iter()
        .filter(|p| !self.contains(p))
        .count()
    }

    /// 收集 ROI 表面体素, 即至少有一个 6-邻居不属于 ROI 的体素.
    ///
    /// 对于 ROI 之外的任意点, 其最近的 ROI 体素必然位于表面:
    /// 内部体素总有一个朝向查询点的邻居离得更近.
    pub fn surface(&self) -> Vec<Idx3d> {
        self.points
            .iter()
            .copied()
            .filter(|p| self.outer_neighbours(*p) > 0)
            .collect()
    }
}

/// 对固定 ROI 反复进行最近距离查询的结构.
pub struct NearestRoi<'a> {
    roi: &'a RoiPoints,
    tree: KdTree,
}

impl<'a> NearestRoi<'a> {
    /// 在 `roi` 表面体素上建立 k-d 树.
    pub fn new(roi: &'a RoiPoints) -> Self {
        let tree = KdTree::new(roi.surface());
        log::debug!("roi: {} voxels, {} on surface", roi.len(), tree.len());
        Self { roi, tree }
    }

    /// `pos` 到最近 ROI 体素的欧氏距离. ROI 为空时返回 `None`.
    pub fn distance(&self, pos: Idx3d) -> Option<f64> {
        if self.roi.contains(&pos) {
            return Some(0.0);
        }
        self.tree.nearest_squared(pos).map(|d| (d as f64).sqrt())
    }
}

/// 穷举所有 ROI 体素求最近距离. 仅作为正确性参照.
pub fn nearest_distance_exhaustive(roi: &RoiPoints, (x, y, z): Idx3d) -> Option<f64> {
    roi.iter()
        .map(|&(a, b, c)| {
            let d2 = a.abs_diff(x).pow(2) + b.abs_diff(y).pow(2) + c.abs_diff(z).pow(2);
            (d2 as f64).sqrt()
        })
        .min_by(f64::total_cmp)
}

/// 读取 `path` 处的掩膜. 文件不存在时返回 `Ok(None)`.
fn try_open_mask(path: PathBuf) -> RoiResult<Option<RoiMask>> {
    if !path.is_file() {
        return Ok(None);
    }
    RoiMask::open(&path)
        .map(Some)
        .map_err(|e| RoiError::Volume(path, e))
}

/// 定位病人的 ROI.
///
/// 优先使用肿瘤掩膜; 若不存在 (已接受切除手术), 则退回到术腔掩膜.
/// 两者均不存在时返回 [`RoiError::NotFound`].
pub fn locate_roi(patient: &Patient) -> RoiResult<(RoiSource, RoiPoints)> {
    let tumor = patient.tumor_path();
    let cavity = patient.cavity_path();

    if let Some(mask) = try_open_mask(tumor.clone())? {
        return Ok((RoiSource::Tumor, RoiPoints::from_mask(&mask)));
    }
    if let Some(mask) = try_open_mask(cavity.clone())? {
        log::info!("{}: no tumor mask, falling back to cavity", patient.id());
        return Ok((RoiSource::Cavity, RoiPoints::from_mask(&mask)));
    }
    Err(RoiError::NotFound { tumor, cavity })
}

#[cfg(test)]
mod tests {
    use super::*;
    use itertools::iproduct;
    use ndarray::Array3;

    fn cube_roi() -> RoiPoints {
        // 3x3x3 实心立方体, 位于 7x7x7 体数据中心.
        RoiPoints::from_points((7, 7, 7), iproduct!(2..5, 2..5, 2..5))
    }

    #[test]
    fn test_from_mask_collects_foreground() {
        let mut data = Array3::<u8>::zeros((4, 4, 4));
        data[(3, 0, 1)] = 1;
        data[(0, 1, 2)] = 5;
        let roi = RoiPoints::from_mask(&RoiMask::fake(data));
        assert_eq!(roi.len(), 2);
        assert_eq!(roi.iter().copied().collect::<Vec<_>>(), vec![(0, 1, 2), (3, 0, 1)]);
        assert!(roi.contains(&(3, 0, 1)));
        assert!(!roi.contains(&(3, 0, 0)));
    }

    #[test]
    fn test_from_points_dedup_and_order() {
        let a = RoiPoints::from_points((5, 5, 5), [(1, 1, 1), (0, 0, 4), (1, 1, 1)]);
        let b = RoiPoints::from_points((5, 5, 5), [(0, 0, 4), (1, 1, 1)]);
        assert_eq!(a, b);
        assert_eq!(a.len(), 2);
    }

    #[test]
    fn test_surface_of_cube() {
        let roi = cube_roi();
        let surface = roi.surface();
        assert_eq!(surface.len(), 26);
        assert!(!surface.contains(&(3, 3, 3)));
    }

    #[test]
    fn test_surface_touching_volume_border() {
        let roi = RoiPoints::from_points((2, 2, 2), iproduct!(0..2, 0..2, 0..2));
        assert_eq!(roi.surface().len(), 8);
    }

    #[test]
    fn test_nearest_matches_exhaustive() {
        let roi = cube_roi();
        let nearest = NearestRoi::new(&roi);
        for q in iproduct!(0..7, 0..7, 0..7) {
            let fast = nearest.distance(q).unwrap();
            let slow = nearest_distance_exhaustive(&roi, q).unwrap();
            assert_eq!(fast.to_bits(), slow.to_bits(), "query {q:?}");
        }
        assert_eq!(nearest.distance((3, 3, 3)), Some(0.0));
        assert_eq!(nearest.distance((0, 3, 3)), Some(2.0));
    }

    #[test]
    fn test_empty_roi_distance() {
        let roi = RoiPoints::from_points((3, 3, 3), Vec::new());
        assert!(roi.is_empty());
        assert_eq!(NearestRoi::new(&roi).distance((0, 0, 0)), None);
        assert_eq!(nearest_distance_exhaustive(&roi, (0, 0, 0)), None);
    }

    #[test]
    fn test_unreadable_tumor_does_not_fall_back() {
        let root = tempfile::tempdir().unwrap();
        let patient = Patient::new(root.path().join("p1"));
        std::fs::create_dir_all(patient.dir()).unwrap();
        std::fs::write(patient.tumor_path(), b"not a nifti file").unwrap();
        let mut cavity = Array3::<f32>::zeros((3, 3, 3));
        cavity[(1, 1, 1)] = 1.0;
        nifti::writer::WriterOptions::new(patient.cavity_path())
            .write_nifti(&cavity)
            .unwrap();

        match locate_roi(&patient) {
            Err(RoiError::Volume(path, _)) => assert_eq!(path, patient.tumor_path()),
            Err(e) => panic!("unexpected error {e}"),
            Ok((source, _)) => panic!("fell back to {source:?}"),
        }
    }
}

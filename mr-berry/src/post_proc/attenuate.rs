//! 根据到 ROI 的距离衰减复发概率.

use std::fmt;

use crate::roi::{NearestRoi, RoiPoints};
use crate::Idx3d;

cfg_if::cfg_if! {
    if #[cfg(feature = "rayon")] {
        use rayon::iter::{
            IndexedParallelIterator, IntoParallelRefIterator, IntoParallelRefMutIterator,
            ParallelIterator,
        };
    }
}

/// 概率校正运行时错误.
#[derive(Debug, Clone, PartialEq)]
pub enum CorrectError {
    /// ROI 中没有任何体素, 无法计算距离.
    EmptyRoi,

    /// 概率与坐标个数不一致. 第一个参数为概率个数, 第二个参数为坐标个数.
    LengthMismatch(usize, usize),
}

impl fmt::Display for CorrectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CorrectError::EmptyRoi => write!(f, "roi is empty"),
            CorrectError::LengthMismatch(p, c) => {
                write!(f, "{p} probabilities but {c} voxel coordinates")
            }
        }
    }
}

impl std::error::Error for CorrectError {}

/// 概率校正结果.
pub type CorrectResult<T> = Result<T, CorrectError>;

/// 距离 `distance` 处的衰减因子 `0.5 + 0.5 * tanh(-slope * (distance - maximum_distance))`.
///
/// 该因子是以 `maximum_distance` 为中心的平滑 S 型曲线: 远小于 `maximum_distance`
/// 时接近 1, 恰好等于时为 0.5, 远大于时趋于 0. `slope` 越大衰减越快.
/// `slope` 为 1 时, `maximum_distance` 前后 1 mm 处的因子分别约为 0.88 和 0.12.
#[inline]
pub fn attenuation_factor(distance: f64, maximum_distance: f64, slope: f64) -> f64 {
    0.5 + 0.5 * (-slope * (distance - maximum_distance)).tanh()
}

/// 最大距离是否意味着需要校正. 零, 负数和非有限值均表示跳过校正.
#[inline]
pub fn should_correct(maximum_distance: f64) -> bool {
    maximum_distance.is_finite() && maximum_distance > 0.0
}

/// 对每个体素求到 `roi` 的最近欧氏距离 (单位 mm, 假设体素各向同性且边长 1 mm),
/// 并以 [`attenuation_factor`] 原地缩放 `probabilities`.
///
/// `coordinates[i]` 是 `probabilities[i]` 对应体素的 `(x, y, z)` 坐标.
///
/// # 注意
///
/// 该函数总是执行校正. 是否跳过校正 (如最大距离为 0) 由调用方通过
/// [`should_correct`] 决定.
pub fn correct_proba(
    probabilities: &mut [f64],
    coordinates: &[Idx3d],
    roi: &RoiPoints,
    maximum_distance: f64,
    slope: f64,
) -> CorrectResult<()> {
    if probabilities.len() != coordinates.len() {
        return Err(CorrectError::LengthMismatch(
            probabilities.len(),
            coordinates.len(),
        ));
    }
    if roi.is_empty() {
        return Err(CorrectError::EmptyRoi);
    }

    let nearest = NearestRoi::new(roi);
    let attenuate = |p: &mut f64, pos: &Idx3d| {
        // ROI 非空, 距离总是存在.
        if let Some(d) = nearest.distance(*pos) {
            *p *= attenuation_factor(d, maximum_distance, slope);
        }
    };

    cfg_if::cfg_if! {
        if #[cfg(feature = "rayon")] {
            probabilities
                .par_iter_mut()
                .zip(coordinates.par_iter())
                .for_each(|(p, pos)| attenuate(p, pos));
        } else {
            probabilities
                .iter_mut()
                .zip(coordinates.iter())
                .for_each(|(p, pos)| attenuate(p, pos));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::{DEFAULT_MAXIMUM_DISTANCE, DEFAULT_SLOPE};
    use itertools::iproduct;

    fn f64_eq(a: f64, b: f64, eps: f64) -> bool {
        (a - b).abs() < eps
    }

    #[test]
    fn test_factor_documented_curve() {
        let md = DEFAULT_MAXIMUM_DISTANCE;
        let s = DEFAULT_SLOPE;
        assert!(f64_eq(attenuation_factor(md - 1.0, md, s), 0.88, 5e-3));
        assert!(f64_eq(attenuation_factor(md, md, s), 0.5, 1e-12));
        assert!(f64_eq(attenuation_factor(md + 1.0, md, s), 0.12, 5e-3));
    }

    #[test]
    fn test_factor_monotone_and_bounded() {
        let mut prev = f64::INFINITY;
        for i in 0..=300 {
            let d = i as f64 * 0.1;
            let f = attenuation_factor(d, 20.0, 1.0);
            assert!(f > 0.0 && f <= 1.0, "factor {f} at {d}");
            assert!(f <= prev);
            prev = f;
        }
        // 陡峭程度越大, 截断点之后衰减越快.
        assert!(attenuation_factor(21.0, 20.0, 3.0) < attenuation_factor(21.0, 20.0, 1.0));
    }

    #[test]
    fn test_should_correct() {
        assert!(should_correct(20.0));
        assert!(!should_correct(0.0));
        assert!(!should_correct(-1.0));
        assert!(!should_correct(f64::NAN));
        assert!(!should_correct(f64::INFINITY));
    }

    #[test]
    fn test_correct_5x5x5_grid() {
        let roi = RoiPoints::from_points((5, 5, 5), [(2, 2, 2)]);
        let coords: Vec<Idx3d> = iproduct!(0..5, 0..5, 0..5).collect();

        let mut loose = vec![0.9; coords.len()];
        correct_proba(&mut loose, &coords, &roi, 20.0, 1.0).unwrap();
        for p in &loose {
            assert!(*p <= 0.9 && *p >= 0.9 * 0.88, "{p}");
        }

        let mut tight = vec![0.9; coords.len()];
        correct_proba(&mut tight, &coords, &roi, 1.0, 1.0).unwrap();
        // 角点距离 sqrt(12) ≈ 3.46.
        assert!(tight[0] < 0.01);
        assert_eq!(coords[62], (2, 2, 2));
        assert!(tight[62] > 0.75);
    }

    #[test]
    fn test_correct_errors() {
        let roi = RoiPoints::from_points((2, 2, 2), [(0, 0, 0)]);
        let mut p = vec![0.5; 2];
        let err = correct_proba(&mut p, &[(1, 1, 1)], &roi, 20.0, 1.0).unwrap_err();
        assert_eq!(err, CorrectError::LengthMismatch(2, 1));

        let empty = RoiPoints::from_points((2, 2, 2), Vec::new());
        let err = correct_proba(&mut p, &[(1, 1, 1), (0, 1, 0)], &empty, 20.0, 1.0).unwrap_err();
        assert_eq!(err, CorrectError::EmptyRoi);
        // 出错时概率不被修改.
        assert_eq!(p, vec![0.5; 2]);
    }
}

//! Otsu 自动阈值.

use itertools::{Itertools, MinMaxResult};

/// 直方图分箱个数.
pub const OTSU_BINS: usize = 256;

/// 基于 `OTSU_BINS` 分箱直方图计算 Otsu 阈值.
///
/// 直方图覆盖 `values` 的 \[最小值, 最大值\] 区间, 返回使类间方差最大的分割处的箱中心.
/// 严格大于阈值的值属于前景.
///
/// NaN 会被忽略. 若不存在有限值则返回 `None`; 若所有值都相同, 则直接返回该值.
pub fn otsu_threshold(values: &[f64]) -> Option<f64> {
    let finite = || values.iter().copied().filter(|v| v.is_finite());
    let (lo, hi) = match finite().minmax_by(f64::total_cmp) {
        MinMaxResult::NoElements => return None,
        MinMaxResult::OneElement(v) => return Some(v),
        MinMaxResult::MinMax(lo, hi) if lo == hi => return Some(lo),
        MinMaxResult::MinMax(lo, hi) => (lo, hi),
    };

    let width = (hi - lo) / OTSU_BINS as f64;
    let mut hist = [0u64; OTSU_BINS];
    for v in finite() {
        // 最后一个箱为闭区间.
        let bin = (((v - lo) / width) as usize).min(OTSU_BINS - 1);
        hist[bin] += 1;
    }
    let centers: Vec<f64> = (0..OTSU_BINS)
        .map(|i| lo + width * (i as f64 + 0.5))
        .collect();

    // 前缀 (左类) 和后缀 (右类) 的权重与加权和.
    let mut weight_left = [0.0; OTSU_BINS];
    let mut sum_left = [0.0; OTSU_BINS];
    let (mut w, mut s) = (0.0, 0.0);
    for i in 0..OTSU_BINS {
        w += hist[i] as f64;
        s += hist[i] as f64 * centers[i];
        weight_left[i] = w;
        sum_left[i] = s;
    }
    let mut weight_right = [0.0; OTSU_BINS];
    let mut sum_right = [0.0; OTSU_BINS];
    let (mut w, mut s) = (0.0, 0.0);
    for i in (0..OTSU_BINS).rev() {
        w += hist[i] as f64;
        s += hist[i] as f64 * centers[i];
        weight_right[i] = w;
        sum_right[i] = s;
    }

    let mut best = (f64::NEG_INFINITY, 0usize);
    for i in 0..OTSU_BINS - 1 {
        let (w1, w2) = (weight_left[i], weight_right[i + 1]);
        if w1 == 0.0 || w2 == 0.0 {
            continue;
        }
        let diff = sum_left[i] / w1 - sum_right[i + 1] / w2;
        let variance = w1 * w2 * diff * diff;
        if variance > best.0 {
            best = (variance, i);
        }
    }
    Some(centers[best.1])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_otsu_degenerate() {
        assert_eq!(otsu_threshold(&[]), None);
        assert_eq!(otsu_threshold(&[f64::NAN, f64::NAN]), None);
        assert_eq!(otsu_threshold(&[0.3, 0.3, f64::NAN]), Some(0.3));
    }

    #[test]
    fn test_otsu_bimodal() {
        let mut values = vec![0.1; 100];
        values.extend(vec![0.12; 50]);
        values.extend(vec![0.8; 80]);
        values.extend(vec![0.85; 40]);
        let th = otsu_threshold(&values).unwrap();
        assert!(th > 0.1 && th < 0.8, "threshold {th}");
        assert!(values.iter().filter(|v| **v >= 0.8).all(|v| *v > th));
        assert!(values.iter().filter(|v| **v == 0.1).all(|v| *v <= th));
    }

    #[test]
    fn test_otsu_two_values() {
        let th = otsu_threshold(&[0.0, 1.0]).unwrap();
        // 第一个箱的中心.
        assert!((th - 0.5 / 256.0).abs() < 1e-12);
    }
}

//! 伪彩映射与归一化.

use itertools::{Itertools, MinMaxResult};

/// 将 `[0, 1]` 映射为 turbo 伪彩 (0 为蓝, 1 为红). 超出范围的值会被截断.
///
/// 采用 turbo 的六次多项式近似, 与查找表的最大误差在 1/255 量级.
pub fn turbo(x: f64) -> [u8; 3] {
    let x = if x.is_nan() { 0.0 } else { x.clamp(0.0, 1.0) };
    let r = 0.13572138
        + x * (4.61539260
            + x * (-42.66032258 + x * (132.13108234 + x * (-152.94239396 + x * 59.28637943))));
    let g = 0.09140261
        + x * (2.19418839
            + x * (4.84296658 + x * (-14.18503333 + x * (4.27729857 + x * 2.82956604))));
    let b = 0.10667330
        + x * (12.64194608
            + x * (-60.58204836 + x * (110.36276771 + x * (-89.90310912 + x * 27.34824973))));
    [to_u8(r), to_u8(g), to_u8(b)]
}

/// `[0, 1]` 灰度转为三通道.
#[inline]
pub fn gray(x: f64) -> [u8; 3] {
    let v = to_u8(x);
    [v, v, v]
}

/// `[0, 1]` 映射到 `0..=255`, 向下取整.
#[inline]
fn to_u8(v: f64) -> u8 {
    (255.0 * v.clamp(0.0, 1.0)) as u8
}

/// 忽略 NaN 的 min-max 归一化器.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct MinMax {
    min: f64,
    max: f64,
}

impl MinMax {
    /// 统计 `values` 中有限值的最小值和最大值. 不存在有限值时返回 `None`.
    pub fn fit<I: IntoIterator<Item = f64>>(values: I) -> Option<Self> {
        match values
            .into_iter()
            .filter(|v| v.is_finite())
            .minmax_by(f64::total_cmp)
        {
            MinMaxResult::NoElements => None,
            MinMaxResult::OneElement(v) => Some(Self { min: v, max: v }),
            MinMaxResult::MinMax(min, max) => Some(Self { min, max }),
        }
    }

    /// 将 `v` 映射到 `[0, 1]`. 最小值等于最大值时, 所有值映射为 0.
    #[inline]
    pub fn apply(&self, v: f64) -> f64 {
        let range = self.max - self.min;
        if range > 0.0 {
            ((v - self.min) / range).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }
}

//! 二类稠密条件随机场 (dense CRF) 平滑. 实验性功能.
//!
//! 将整个 3D 概率体数据视为 "复发 / 不复发" 二类全连接随机场:
//!
//! - 一元势为 `-ln(p)` 与 `-ln(1 - p)`;
//! - 二元势为体素网格上的高斯空间核 `exp(-|Δ|² / (2σ²))`, 对称归一化后配合 Potts 兼容性;
//! - 使用平均场近似推断.
//!
//! 高斯空间核在规则网格上可分离, 因此消息传递可以用三次一维卷积精确完成
//! (核在 4σ 处截断), 无需 permutohedral lattice.
//!
//! 双边 (强度) 核目前仅预留配置位, 开启时返回 [`CrfError::BilateralUnsupported`].

use std::fmt;

use ndarray::{Array3, ArrayView3, Axis, Zip};
use serde::{Deserialize, Serialize};

/// 避免 `-ln(0)` 的概率下限.
pub const PROBA_EPS: f64 = 1e-8;

/// 高斯核截断半径 (以 σ 为单位).
const TRUNCATE_SIGMA: f64 = 4.0;

/// 稠密 CRF 配置.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DenseCrfConfig {
    /// 高斯空间核带宽 σ, 以体素为单位.
    pub spatial_bandwidth: f64,

    /// 二元势 (Potts 兼容性) 权重.
    pub pairwise_weight: f64,

    /// 平均场推断迭代次数.
    pub inference_iterations: u32,

    /// 是否启用双边核. 预留, 目前不支持.
    pub bilateral_enabled: bool,
}

impl Default for DenseCrfConfig {
    fn default() -> Self {
        Self {
            spatial_bandwidth: 3.0,
            pairwise_weight: 3.0,
            inference_iterations: 5,
            bilateral_enabled: false,
        }
    }
}

/// 稠密 CRF 运行时错误.
#[derive(Debug, Clone, PartialEq)]
pub enum CrfError {
    /// 配置非法. 参数为具体原因.
    InvalidConfig(&'static str),

    /// 双边核尚未实现.
    BilateralUnsupported,
}

impl fmt::Display for CrfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CrfError::InvalidConfig(why) => write!(f, "invalid dense crf config: {why}"),
            CrfError::BilateralUnsupported => write!(f, "bilateral pairwise term is not supported"),
        }
    }
}

impl std::error::Error for CrfError {}

impl DenseCrfConfig {
    /// 检查配置是否合法.
    pub fn validate(&self) -> Result<(), CrfError> {
        if self.bilateral_enabled {
            return Err(CrfError::BilateralUnsupported);
        }
        if !(self.spatial_bandwidth.is_finite() && self.spatial_bandwidth > 0.0) {
            return Err(CrfError::InvalidConfig("spatial_bandwidth must be positive"));
        }
        if !(self.pairwise_weight.is_finite() && self.pairwise_weight >= 0.0) {
            return Err(CrfError::InvalidConfig("pairwise_weight must be non-negative"));
        }
        Ok(())
    }
}

/// 一维高斯核权重 `exp(-d² / (2σ²))`, `d` 取 `-r..=r`. 中心权重为 1, 不做归一化.
///
/// 半径不超过 `max_radius`: 零填充下超出体数据的抽头没有贡献.
fn gaussian_kernel(sigma: f64, max_radius: usize) -> Vec<f64> {
    let radius = (TRUNCATE_SIGMA * sigma).ceil().min(max_radius as f64) as i64;
    (-radius..=radius)
        .map(|d| (-((d * d) as f64) / (2.0 * sigma * sigma)).exp())
        .collect()
}

/// 在 `axis` 方向上以零填充边界原地卷积 `data`.
fn convolve_axis(data: &mut Array3<f64>, axis: usize, kernel: &[f64]) {
    let radius = (kernel.len() / 2) as i64;
    let convolve_lane = |mut lane: ndarray::ArrayViewMut1<f64>| {
        let src = lane.to_vec();
        let n = src.len() as i64;
        for (i, out) in lane.iter_mut().enumerate() {
            let i = i as i64;
            let lo = (i - radius).max(0);
            let hi = (i + radius).min(n - 1);
            *out = (lo..=hi)
                .map(|j| src[j as usize] * kernel[(j - i + radius) as usize])
                .sum();
        }
    };

    cfg_if::cfg_if! {
        if #[cfg(feature = "rayon")] {
            Zip::from(data.lanes_mut(Axis(axis))).par_for_each(convolve_lane);
        } else {
            Zip::from(data.lanes_mut(Axis(axis))).for_each(convolve_lane);
        }
    }
}

/// 对 `data` 施加三维可分离高斯滤波.
fn gaussian_filter(data: &Array3<f64>, kernel: &[f64]) -> Array3<f64> {
    let mut out = data.clone();
    for axis in 0..3 {
        convolve_axis(&mut out, axis, kernel);
    }
    out
}

/// 对 3D 复发概率体数据进行稠密 CRF 平滑, 返回 "复发" 类的边缘概率, 形状与输入一致.
///
/// `proba` 中的 NaN (分析区域以外) 视为 0. 概率在构造一元势前被截断到
/// `[PROBA_EPS, 1 - PROBA_EPS]`.
pub fn dense_crf_smooth(
    proba: ArrayView3<f32>,
    config: &DenseCrfConfig,
) -> Result<Array3<f32>, CrfError> {
    config.validate()?;

    let p = proba.mapv(|v| {
        let v = if v.is_nan() { 0.0 } else { v as f64 };
        v.clamp(PROBA_EPS, 1.0 - PROBA_EPS)
    });
    // 一元势: U1 = -ln(p), U0 = -ln(1 - p).
    let unary_1 = p.mapv(|v| -v.ln());
    let unary_0 = p.mapv(|v| -(1.0 - v).ln());

    let (x, y, z) = p.dim();
    let kernel = gaussian_kernel(config.spatial_bandwidth, x.max(y).max(z).saturating_sub(1));
    let w = config.pairwise_weight;

    // 对称归一化: n_i = 1 / sqrt(Σ_{j≠i} k_ij). 消息 m(Q)_i = n_i Σ_{j≠i} k_ij n_j Q_j.
    let ones = Array3::<f64>::ones(p.dim());
    let norm = (gaussian_filter(&ones, &kernel) - 1.0).mapv(|s| {
        // 单体素体数据没有任何邻居.
        if s > 0.0 {
            s.sqrt().recip()
        } else {
            0.0
        }
    });
    let message = |q: &Array3<f64>| {
        let nq = &norm * q;
        (gaussian_filter(&nq, &kernel) - &nq) * &norm
    };
    // 由线性性, m(Q0) = m(1) - m(Q1).
    let total = message(&ones);

    // 初始化为一元势的 softmax, 即截断后的 p.
    let mut q1 = p;
    for it in 0..config.inference_iterations {
        let m1 = message(&q1);
        Zip::from(&mut q1)
            .and(&m1)
            .and(&total)
            .and(&unary_0)
            .and(&unary_1)
            .for_each(|q, &msg1, &all, &u0, &u1| {
                let msg0 = all - msg1;
                // Q_l ∝ exp(-U_l + w * m_l).
                let e1 = -u1 + w * msg1;
                let e0 = -u0 + w * msg0;
                *q = 1.0 / (1.0 + (e0 - e1).exp());
            });
        log::debug!("dense crf: iteration {} done", it + 1);
    }

    Ok(q1.mapv(|v| v as f32))
}

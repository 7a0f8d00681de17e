//! 预训练分类器与特征标准化器.
//!
//! 模型训练不在本 crate 范围内. 训练好的模型以 JSON 产物的形式读入, 格式如下:
//!
//! ```json
//! {
//!   "feature_names": ["adc_original_firstorder_Mean", "..."],
//!   "scaler": { "mean": [0.0, "..."], "scale": [1.0, "..."] },
//!   "classifier": { "coefficients": [0.3, "..."], "intercept": -1.2 }
//! }
//! ```

use std::fmt;
use std::fs;
use std::path::Path;

use ndarray::{Array1, Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

/// 读取模型或预测时的错误.
#[derive(Debug)]
pub enum ModelError {
    /// 底层 I/O 错误.
    Io(std::io::Error),

    /// JSON 解析错误.
    Json(serde_json::Error),

    /// 特征个数不一致. 第一个参数为期望个数, 第二个参数为实际个数.
    FeatureMismatch(usize, usize),

    /// 标准化器中存在为零或非有限的尺度.
    DegenerateScale(usize),
}

impl fmt::Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::Io(e) => write!(f, "cannot read model: {e}"),
            ModelError::Json(e) => write!(f, "malformed model artifact: {e}"),
            ModelError::FeatureMismatch(expected, got) => {
                write!(f, "model expects {expected} features, got {got}")
            }
            ModelError::DegenerateScale(i) => write!(f, "scaler has degenerate scale at column {i}"),
        }
    }
}

impl std::error::Error for ModelError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ModelError::Io(e) => Some(e),
            ModelError::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ModelError {
    fn from(e: std::io::Error) -> Self {
        ModelError::Io(e)
    }
}

impl From<serde_json::Error> for ModelError {
    fn from(e: serde_json::Error) -> Self {
        ModelError::Json(e)
    }
}

/// 模型运行结果.
pub type ModelResult<T> = Result<T, ModelError>;

/// 能够为每一行特征给出 "复发" 类概率的模型.
pub trait ProbaModel: Sync {
    /// 期望的特征个数.
    fn n_features(&self) -> usize;

    /// 对 `features` 的每一行给出复发概率. `features` 的形状为 `(体素个数, 特征个数)`.
    fn predict_proba(&self, features: ArrayView2<f64>) -> ModelResult<Array1<f64>>;
}

/// 以列均值填补缺失值 (NaN). 均值计算时忽略 NaN; 全部缺失的列以 0 填补.
pub fn impute_column_means(features: &mut Array2<f64>) {
    for mut col in features.axis_iter_mut(Axis(1)) {
        let (sum, cnt) = col
            .iter()
            .filter(|v| !v.is_nan())
            .fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
        let mean = if cnt == 0 { 0.0 } else { sum / cnt as f64 };
        col.iter_mut().filter(|v| v.is_nan()).for_each(|v| *v = mean);
    }
}

/// 标准化器, `(x - mean) / scale`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    /// 各特征均值.
    pub mean: Vec<f64>,

    /// 各特征尺度 (标准差).
    pub scale: Vec<f64>,
}

impl StandardScaler {
    /// 原地标准化 `features`.
    pub fn transform(&self, features: &mut Array2<f64>) -> ModelResult<()> {
        if features.ncols() != self.mean.len() {
            return Err(ModelError::FeatureMismatch(self.mean.len(), features.ncols()));
        }
        for mut row in features.axis_iter_mut(Axis(0)) {
            for ((v, m), s) in row.iter_mut().zip(&self.mean).zip(&self.scale) {
                *v = (*v - m) / s;
            }
        }
        Ok(())
    }
}

/// 二分类逻辑回归.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogisticRegression {
    /// 各特征系数.
    pub coefficients: Vec<f64>,

    /// 截距.
    pub intercept: f64,
}

impl LogisticRegression {
    /// 单行特征的决策函数值 `w · x + b`.
    #[inline]
    fn decision(&self, row: impl IntoIterator<Item = f64>) -> f64 {
        row.into_iter()
            .zip(&self.coefficients)
            .map(|(x, w)| x * w)
            .sum::<f64>()
            + self.intercept
    }
}

#[inline]
fn sigmoid(t: f64) -> f64 {
    1.0 / (1.0 + (-t).exp())
}

/// 预训练模型产物: 特征名, 标准化器, 分类器.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FittedModel {
    /// 特征名, 顺序与特征表的列一致.
    #[serde(default)]
    pub feature_names: Vec<String>,

    /// 标准化器.
    pub scaler: StandardScaler,

    /// 分类器.
    pub classifier: LogisticRegression,
}

impl FittedModel {
    /// 从 JSON 文件加载并检查一致性.
    pub fn open<P: AsRef<Path>>(path: P) -> ModelResult<Self> {
        let text = fs::read_to_string(path.as_ref())?;
        let model: Self = serde_json::from_str(&text)?;
        model.validate()?;
        Ok(model)
    }

    /// 检查各部分的特征个数是否一致, 以及尺度是否合法.
    pub fn validate(&self) -> ModelResult<()> {
        let n = self.classifier.coefficients.len();
        for len in [self.scaler.mean.len(), self.scaler.scale.len()] {
            if len != n {
                return Err(ModelError::FeatureMismatch(n, len));
            }
        }
        if !self.feature_names.is_empty() && self.feature_names.len() != n {
            return Err(ModelError::FeatureMismatch(n, self.feature_names.len()));
        }
        if let Some(i) = self
            .scaler
            .scale
            .iter()
            .position(|s| !s.is_finite() || *s == 0.0)
        {
            return Err(ModelError::DegenerateScale(i));
        }
        Ok(())
    }
}

impl ProbaModel for FittedModel {
    #[inline]
    fn n_features(&self) -> usize {
        self.classifier.coefficients.len()
    }

    /// 先以列均值填补缺失值, 再标准化, 最后经逻辑回归得到概率.
    fn predict_proba(&self, features: ArrayView2<f64>) -> ModelResult<Array1<f64>> {
        if features.ncols() != self.n_features() {
            return Err(ModelError::FeatureMismatch(self.n_features(), features.ncols()));
        }
        let mut x = features.to_owned();
        impute_column_means(&mut x);
        self.scaler.transform(&mut x)?;
        Ok(x
            .axis_iter(Axis(0))
            .map(|row| sigmoid(self.classifier.decision(row.iter().copied())))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn toy_model() -> FittedModel {
        FittedModel {
            feature_names: vec!["a".into(), "b".into()],
            scaler: StandardScaler {
                mean: vec![1.0, 0.0],
                scale: vec![2.0, 1.0],
            },
            classifier: LogisticRegression {
                coefficients: vec![1.0, -1.0],
                intercept: 0.0,
            },
        }
    }

    #[test]
    fn test_impute_column_means() {
        let mut x = array![[1.0, f64::NAN], [f64::NAN, f64::NAN], [3.0, f64::NAN]];
        impute_column_means(&mut x);
        assert_eq!(x, array![[1.0, 0.0], [2.0, 0.0], [3.0, 0.0]]);
    }

    #[test]
    fn test_predict_proba() {
        let model = toy_model();
        model.validate().unwrap();
        let x = array![[1.0, 0.0], [5.0, 0.0], [f64::NAN, 2.0]];
        let p = model.predict_proba(x.view()).unwrap();
        assert!((p[0] - 0.5).abs() < 1e-12);
        assert!((p[1] - sigmoid(2.0)).abs() < 1e-12);
        // 第三行 a 被填补为 3.0 -> 1.0, b = 2.0 -> 1.0 - 2.0.
        assert!((p[2] - sigmoid(-1.0)).abs() < 1e-12);
    }

    #[test]
    fn test_feature_mismatch() {
        let model = toy_model();
        let x = array![[1.0, 2.0, 3.0]];
        assert!(matches!(
            model.predict_proba(x.view()),
            Err(ModelError::FeatureMismatch(2, 3))
        ));

        let mut broken = toy_model();
        broken.scaler.scale = vec![1.0, 0.0];
        assert!(matches!(broken.validate(), Err(ModelError::DegenerateScale(1))));
    }

    #[test]
    fn test_model_from_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        fs::write(&path, serde_json::to_string(&toy_model()).unwrap()).unwrap();
        assert_eq!(FittedModel::open(&path).unwrap(), toy_model());

        fs::write(&path, "{\"scaler\": 1}").unwrap();
        assert!(matches!(FittedModel::open(&path), Err(ModelError::Json(_))));
    }
}

//! 单个病人的完整后处理流程与批处理.
//!
//! 单个病人的流程为:
//!
//! 1. 读取体素特征表与参考 t1ce 序列;
//! 2. 以预训练模型给出逐体素复发概率;
//! 3. 若最大距离为正, 定位 ROI 并按距离衰减概率;
//! 4. 可选的稠密 CRF 平滑;
//! 5. Otsu 阈值标注, 写出 `predictions.npz`;
//! 6. 可选的融合可视化.
//!
//! 批处理中每个病人相互独立, 某个病人失败不影响其他病人.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use ndarray::{Array1, Array3};
use serde::{Deserialize, Serialize};

use crate::consts::{DEFAULT_MAXIMUM_DISTANCE, DEFAULT_SLOPE};
use crate::data::VolumeError;
use crate::dataset::Patient;
use crate::fusion::{render, RenderError};
use crate::model::{ModelError, ProbaModel};
use crate::post_proc::{
    correct_proba, dense_crf_smooth, otsu_threshold, should_correct, CorrectError, CrfError,
    DenseCrfConfig,
};
use crate::roi::{locate_roi, RoiError};
use crate::{voxel_coordinates, FeatureTable, MrScan, NiftiHeaderAttr, PredictionTable, TableError};

cfg_if::cfg_if! {
    if #[cfg(feature = "rayon")] {
        use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
    }
}

/// 后处理配置.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// 距离衰减的最大距离, 以毫米为单位. 为 0 时跳过距离校正.
    pub maximum_distance: f64,

    /// 距离衰减的陡峭程度.
    pub slope: f64,

    /// 稠密 CRF 配置. 为 `None` 时不平滑.
    pub crf: Option<DenseCrfConfig>,

    /// 是否输出融合可视化.
    pub render: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            maximum_distance: DEFAULT_MAXIMUM_DISTANCE,
            slope: DEFAULT_SLOPE,
            crf: None,
            render: true,
        }
    }
}

/// 读取配置时的错误.
#[derive(Debug)]
pub enum ConfigError {
    /// 底层 I/O 错误.
    Io(std::io::Error),

    /// JSON 解析错误.
    Json(serde_json::Error),

    /// 配置取值非法.
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "cannot read config: {e}"),
            ConfigError::Json(e) => write!(f, "malformed config: {e}"),
            ConfigError::Invalid(why) => write!(f, "invalid config: {why}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(e) => Some(e),
            ConfigError::Json(e) => Some(e),
            ConfigError::Invalid(_) => None,
        }
    }
}

impl PipelineConfig {
    /// 从 JSON 文件读取配置. 缺省字段取默认值.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path.as_ref()).map_err(ConfigError::Io)?;
        let config: Self = serde_json::from_str(&text).map_err(ConfigError::Json)?;
        config.validate()?;
        Ok(config)
    }

    /// 检查配置是否合法. 最大距离允许为 0 或负数 (均表示跳过校正), 但不允许为 NaN.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.maximum_distance.is_nan() {
            return Err(ConfigError::Invalid("maximum_distance is NaN".to_owned()));
        }
        if !(self.slope.is_finite() && self.slope > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "slope must be positive, got {}",
                self.slope
            )));
        }
        if let Some(crf) = &self.crf {
            crf.validate()
                .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        }
        Ok(())
    }
}

/// 失败的严重程度.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// 没有产生任何结果.
    Fatal,

    /// 预测结果已写出, 仅后续步骤 (如可视化) 失败.
    Recoverable,
}

/// 单个病人后处理时的错误.
#[derive(Debug)]
pub enum PipelineError {
    /// 特征表无法读取.
    Features(PathBuf, TableError),

    /// 参考序列无法读取.
    Scan(PathBuf, VolumeError),

    /// 特征表中的体素索引超出参考序列范围.
    Index(VolumeError),

    /// 模型预测失败 (如特征个数不符).
    Model(ModelError),

    /// ROI 缺失或无法读取.
    Roi(RoiError),

    /// 距离校正失败.
    Correct(CorrectError),

    /// 稠密 CRF 平滑失败.
    Crf(CrfError),

    /// 没有任何有限概率, 无法确定阈值.
    NoThreshold,

    /// 预测结果无法写出.
    Predictions(PathBuf, TableError),

    /// 可视化失败. 此时预测结果已写出.
    Render(RenderError),
}

impl PipelineError {
    /// 错误的严重程度.
    pub fn kind(&self) -> FailureKind {
        match self {
            PipelineError::Render(_) => FailureKind::Recoverable,
            _ => FailureKind::Fatal,
        }
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::Features(p, e) => {
                write!(f, "cannot load features `{}`: {e}", p.display())
            }
            PipelineError::Scan(p, e) => write!(f, "cannot load scan `{}`: {e}", p.display()),
            PipelineError::Index(e) => write!(f, "feature table does not match scan: {e}"),
            PipelineError::Model(e) => write!(f, "{e}"),
            PipelineError::Roi(e) => write!(f, "{e}"),
            PipelineError::Correct(e) => write!(f, "distance correction failed: {e}"),
            PipelineError::Crf(e) => write!(f, "{e}"),
            PipelineError::NoThreshold => write!(f, "no finite probability to threshold"),
            PipelineError::Predictions(p, e) => {
                write!(f, "cannot write predictions `{}`: {e}", p.display())
            }
            PipelineError::Render(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PipelineError::Features(_, e) | PipelineError::Predictions(_, e) => Some(e),
            PipelineError::Scan(_, e) | PipelineError::Index(e) => Some(e),
            PipelineError::Model(e) => Some(e),
            PipelineError::Roi(e) => Some(e),
            PipelineError::Correct(e) => Some(e),
            PipelineError::Crf(e) => Some(e),
            PipelineError::NoThreshold => None,
            PipelineError::Render(e) => Some(e),
        }
    }
}

impl From<ModelError> for PipelineError {
    fn from(e: ModelError) -> Self {
        PipelineError::Model(e)
    }
}

impl From<RoiError> for PipelineError {
    fn from(e: RoiError) -> Self {
        PipelineError::Roi(e)
    }
}

impl From<CorrectError> for PipelineError {
    fn from(e: CorrectError) -> Self {
        PipelineError::Correct(e)
    }
}

impl From<CrfError> for PipelineError {
    fn from(e: CrfError) -> Self {
        PipelineError::Crf(e)
    }
}

impl From<RenderError> for PipelineError {
    fn from(e: RenderError) -> Self {
        PipelineError::Render(e)
    }
}

/// 后处理结果.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// 成功处理一个病人后的摘要.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PatientSummary {
    /// 体素个数.
    pub voxels: usize,

    /// Otsu 阈值.
    pub threshold: f64,

    /// 被标注为复发的体素个数.
    pub positives: usize,
}

/// 对单个病人执行完整后处理.
///
/// 出错时返回 `Err`. 若错误发生在预测结果写出之后, 其 [`PipelineError::kind`]
/// 为 [`FailureKind::Recoverable`].
pub fn process_patient<M: ProbaModel + ?Sized>(
    patient: &Patient,
    model: &M,
    config: &PipelineConfig,
) -> PipelineResult<PatientSummary> {
    let features_path = patient.features_path();
    let table =
        FeatureTable::open(&features_path).map_err(|e| PipelineError::Features(features_path, e))?;
    let t1ce_path = patient.t1ce_path();
    let t1ce = MrScan::open(&t1ce_path).map_err(|e| PipelineError::Scan(t1ce_path, e))?;

    let index = table.index.to_vec();
    let coordinates = voxel_coordinates(&index, t1ce.shape()).map_err(PipelineError::Index)?;
    log::debug!("{}: {} voxels", patient.id(), index.len());

    let mut probabilities = model.predict_proba(table.features.view())?.to_vec();

    if should_correct(config.maximum_distance) {
        let (source, roi) = locate_roi(patient)?;
        log::debug!("{}: {source:?} roi with {} voxels", patient.id(), roi.len());
        correct_proba(
            &mut probabilities,
            &coordinates,
            &roi,
            config.maximum_distance,
            config.slope,
        )?;
    } else {
        log::debug!("{}: distance correction skipped", patient.id());
    }

    if let Some(crf) = &config.crf {
        let mut volume = Array3::<f32>::from_elem(t1ce.shape(), f32::NAN);
        for (pos, p) in coordinates.iter().zip(&probabilities) {
            volume[*pos] = *p as f32;
        }
        let smoothed = dense_crf_smooth(volume.view(), crf)?;
        for (p, pos) in probabilities.iter_mut().zip(&coordinates) {
            *p = smoothed[*pos] as f64;
        }
    }

    let threshold = otsu_threshold(&probabilities).ok_or(PipelineError::NoThreshold)?;
    let predictions =
        PredictionTable::from_threshold(table.index, Array1::from(probabilities), threshold)
            .map_err(|e| PipelineError::Predictions(patient.predictions_path(), e))?;
    let predictions_path = patient.predictions_path();
    predictions
        .save(&predictions_path)
        .map_err(|e| PipelineError::Predictions(predictions_path, e))?;

    let summary = PatientSummary {
        voxels: index.len(),
        threshold,
        positives: predictions.positives(),
    };

    if config.render {
        let probabilities = predictions.probabilities.to_vec();
        render(patient, &t1ce, &index, &probabilities)?;
    }
    Ok(summary)
}

/// 单个病人的处理状态.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PatientStatus {
    /// 处理完成.
    Done {
        /// 体素个数.
        voxels: usize,

        /// Otsu 阈值.
        threshold: f64,

        /// 被标注为复发的体素个数.
        positives: usize,
    },

    /// 未处理.
    Skipped {
        /// 原因.
        reason: String,
    },

    /// 处理失败.
    Failed {
        /// 严重程度.
        kind: FailureKind,

        /// 错误信息.
        message: String,
    },
}

impl From<PipelineResult<PatientSummary>> for PatientStatus {
    fn from(r: PipelineResult<PatientSummary>) -> Self {
        match r {
            Ok(s) => PatientStatus::Done {
                voxels: s.voxels,
                threshold: s.threshold,
                positives: s.positives,
            },
            Err(e) => PatientStatus::Failed {
                kind: e.kind(),
                message: e.to_string(),
            },
        }
    }
}

/// 单个病人的处理报告.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PatientReport {
    /// 病人 ID.
    pub patient: String,

    /// 处理状态.
    #[serde(flatten)]
    pub status: PatientStatus,

    /// 耗时, 以秒为单位.
    pub elapsed_secs: f64,
}

impl PatientReport {
    fn skipped(patient: &Patient, reason: &str) -> Self {
        Self {
            patient: patient.id().to_owned(),
            status: PatientStatus::Skipped {
                reason: reason.to_owned(),
            },
            elapsed_secs: 0.0,
        }
    }
}

/// 处理单个病人, 并将结果整理为报告. 该函数不会失败.
///
/// 没有特征表的病人会被跳过.
pub fn run_patient<M: ProbaModel + ?Sized>(
    patient: &Patient,
    model: &M,
    config: &PipelineConfig,
) -> PatientReport {
    if patient.needs_features() {
        log::info!("{}: skipped, no voxel feature table", patient.id());
        return PatientReport::skipped(patient, "no voxel feature table");
    }

    let start = Instant::now();
    let result = process_patient(patient, model, config);
    if let Err(e) = &result {
        log::warn!("{}: {:?} failure: {e}", patient.id(), e.kind());
    }
    let status = PatientStatus::from(result);
    let elapsed_secs = start.elapsed().as_secs_f64();
    log::info!("{}: finished in {elapsed_secs:.2}s", patient.id());
    PatientReport {
        patient: patient.id().to_owned(),
        status,
        elapsed_secs,
    }
}

/// 整个批次的处理报告.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    /// 病人总数.
    pub total: usize,

    /// 完成个数.
    pub done: usize,

    /// 跳过个数.
    pub skipped: usize,

    /// 失败个数 (不论严重程度).
    pub failed: usize,

    /// 按病人 ID 排列的逐病人报告.
    pub patients: Vec<PatientReport>,
}

impl BatchReport {
    /// 由逐病人报告汇总.
    pub fn new(patients: Vec<PatientReport>) -> Self {
        let mut ans = Self {
            total: patients.len(),
            ..Default::default()
        };
        for r in &patients {
            match r.status {
                PatientStatus::Done { .. } => ans.done += 1,
                PatientStatus::Skipped { .. } => ans.skipped += 1,
                PatientStatus::Failed { .. } => ans.failed += 1,
            }
        }
        ans.patients = patients;
        ans
    }

    /// 是否存在致命失败.
    pub fn has_fatal(&self) -> bool {
        self.patients.iter().any(|r| {
            matches!(
                r.status,
                PatientStatus::Failed {
                    kind: FailureKind::Fatal,
                    ..
                }
            )
        })
    }
}

/// 批量处理 `patients`.
///
/// 每个病人开始处理前检查 `cancel`; 一旦被置位, 尚未开始的病人均标记为跳过.
/// 启用 `rayon` 特性时, 不同病人并行处理.
pub fn run_batch<M: ProbaModel + ?Sized>(
    patients: &[Patient],
    model: &M,
    config: &PipelineConfig,
    cancel: &AtomicBool,
) -> BatchReport {
    let run_one = |patient: &Patient| {
        if cancel.load(Ordering::Relaxed) {
            PatientReport::skipped(patient, "cancelled")
        } else {
            run_patient(patient, model, config)
        }
    };

    cfg_if::cfg_if! {
        if #[cfg(feature = "rayon")] {
            let reports: Vec<PatientReport> = patients.par_iter().map(run_one).collect();
        } else {
            let reports: Vec<PatientReport> = patients.iter().map(run_one).collect();
        }
    }
    BatchReport::new(reports)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults_from_json() {
        let config: PipelineConfig = serde_json::from_str(r#"{"maximum_distance": 0}"#).unwrap();
        assert_eq!(config.maximum_distance, 0.0);
        assert_eq!(config.slope, DEFAULT_SLOPE);
        assert_eq!(config.crf, None);
        assert!(config.render);
        config.validate().unwrap();

        let config: PipelineConfig =
            serde_json::from_str(r#"{"crf": {"inference_iterations": 2}}"#).unwrap();
        let crf = config.crf.unwrap();
        assert_eq!(crf.inference_iterations, 2);
        assert_eq!(crf.spatial_bandwidth, DenseCrfConfig::default().spatial_bandwidth);
    }

    #[test]
    fn test_config_validation() {
        let bad = PipelineConfig {
            slope: 0.0,
            ..Default::default()
        };
        assert!(matches!(bad.validate(), Err(ConfigError::Invalid(_))));

        let bilateral = PipelineConfig {
            crf: Some(DenseCrfConfig {
                bilateral_enabled: true,
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(bilateral.validate().is_err());
    }

    #[test]
    fn test_error_kind() {
        assert_eq!(PipelineError::NoThreshold.kind(), FailureKind::Fatal);
        let render = PipelineError::Render(RenderError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            "disk full",
        )));
        assert_eq!(render.kind(), FailureKind::Recoverable);
    }

    #[test]
    fn test_batch_report_counts() {
        let report = |id: &str, status| PatientReport {
            patient: id.to_owned(),
            status,
            elapsed_secs: 0.0,
        };
        let batch = BatchReport::new(vec![
            report(
                "a",
                PatientStatus::Done {
                    voxels: 3,
                    threshold: 0.4,
                    positives: 1,
                },
            ),
            report(
                "b",
                PatientStatus::Skipped {
                    reason: "cancelled".into(),
                },
            ),
            report(
                "c",
                PatientStatus::Failed {
                    kind: FailureKind::Recoverable,
                    message: "oops".into(),
                },
            ),
        ]);
        assert_eq!((batch.total, batch.done, batch.skipped, batch.failed), (3, 1, 1, 1));
        assert!(!batch.has_fatal());

        let json = serde_json::to_value(&batch).unwrap();
        assert_eq!(json["patients"][0]["status"], "done");
        assert_eq!(json["patients"][2]["kind"], "recoverable");
    }

    #[test]
    fn test_cancelled_batch_skips_everyone() {
        use crate::model::{FittedModel, LogisticRegression, StandardScaler};

        let model = FittedModel {
            feature_names: Vec::new(),
            scaler: StandardScaler {
                mean: vec![0.0],
                scale: vec![1.0],
            },
            classifier: LogisticRegression {
                coefficients: vec![1.0],
                intercept: 0.0,
            },
        };
        let patients = vec![Patient::new("/nowhere/p1"), Patient::new("/nowhere/p2")];
        let cancel = AtomicBool::new(true);
        let batch = run_batch(&patients, &model, &PipelineConfig::default(), &cancel);
        assert_eq!(batch.skipped, 2);
        assert!(batch.patients.iter().all(|r| r.status
            == PatientStatus::Skipped {
                reason: "cancelled".into()
            }));
    }
}

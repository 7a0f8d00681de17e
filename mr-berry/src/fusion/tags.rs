//! 融合图像的描述性标签.

use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::consts::{IMAGE_TYPE, MODALITY};

/// 随融合图像一同保存的描述性标签. 字段名与 DICOM 关键字一致.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FusedTags {
    /// 序列时间, `HHMMSS`.
    pub series_time: String,

    /// 序列日期, `YYYYMMDD`.
    pub series_date: String,

    /// 图像类型.
    pub image_type: String,

    /// 病人 ID.
    #[serde(rename = "PatientID")]
    pub patient_id: String,

    /// 模态.
    pub modality: String,
}

impl FusedTags {
    /// 以本地时刻 `now` 为病人 `patient_id` 生成标签.
    pub fn new(patient_id: &str, now: NaiveDateTime) -> Self {
        Self {
            series_time: now.format("%H%M%S").to_string(),
            series_date: now.format("%Y%m%d").to_string(),
            image_type: IMAGE_TYPE.to_owned(),
            patient_id: patient_id.to_owned(),
            modality: MODALITY.to_owned(),
        }
    }

    /// 以当前本地时间生成标签.
    pub fn now(patient_id: &str) -> Self {
        Self::new(patient_id, Local::now().naive_local())
    }
}

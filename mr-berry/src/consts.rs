//! 通用常量.

/// 病人目录下的文件名.
pub mod file {
    /// 参考序列. 所有体素索引均以其形状展开.
    pub const T1CE: &str = "t1ce.nii.gz";

    /// 肿瘤掩膜. ROI 的首选来源.
    pub const TUMOR: &str = "tumor.nii.gz";

    /// 术腔掩膜. 肿瘤掩膜缺失 (已切除) 时使用.
    pub const CAVITY: &str = "cavity.nii.gz";

    /// 逐体素特征表.
    pub const VOXEL_FEATURES: &str = "voxel_features.npz";

    /// 逐体素预测结果表.
    pub const PREDICTIONS: &str = "predictions.npz";

    /// 结果图像子目录.
    pub const SAVED_IMAGES: &str = "saved_images";

    /// 概率体数据 (位于 `SAVED_IMAGES` 下).
    pub const PROBABILITIES: &str = "probabilities.nii.gz";

    /// 融合后的 RGB 体数据 (位于 `SAVED_IMAGES` 下).
    pub const FUSED: &str = "t1ce_fused_proba.nii.gz";

    /// 融合图像的描述性标签 (位于 `SAVED_IMAGES` 下).
    pub const FUSED_TAGS: &str = "t1ce_fused_proba.json";

    /// 融合图像逐层 png 子目录 (位于 `SAVED_IMAGES` 下).
    pub const FUSED_SLICES: &str = "fused";
}

/// 体素表中的列名.
pub mod column {
    /// 体素索引列.
    pub const INDEX: &str = "index";

    /// 特征矩阵.
    pub const FEATURES: &str = "features";

    /// 复发概率.
    pub const PROBABILITIES: &str = "probabilities";

    /// 二值化标注 (1 = 复发).
    pub const PREDICTIONS: &str = "predictions";
}

/// 距离衰减的默认最大距离, 以毫米为单位.
pub const DEFAULT_MAXIMUM_DISTANCE: f64 = 20.0;

/// 距离衰减的默认陡峭程度.
pub const DEFAULT_SLOPE: f64 = 1.0;

/// 融合图像的模态标签.
pub const MODALITY: &str = "MR";

/// 融合图像的图像类型标签.
pub const IMAGE_TYPE: &str = "DERIVED\\SECONDARY";

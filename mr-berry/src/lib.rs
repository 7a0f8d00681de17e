#![warn(missing_docs)] // <= 合适时移除它.
// #![warn(clippy::missing_docs_in_private_items)]  // <= too strict.

//! 核心库. 对分类器给出的瘤周体素复发概率进行后处理, 并将其与 t1ce 序列融合可视化.
//!
//! 该 crate 目前仅提供 `safe` 接口.
//!
//! # 注意
//!
//! 1. 病人数据按照 "一个病人一个目录" 的方式组织, 目录内文件名见 [`consts::file`].
//! 2. 体素索引按照参考 `t1ce` 体数据的 `(x, y, z)` 形状行优先展开,
//!   即 `index = x * Y * Z + y * Z + z`. 该约定与外部特征表保持一致.
//! 3. 坐标系假设体素各向同性, 且单位体素边长为 1 mm.
//! 4. 影像组学特征提取与分类器训练不在本 crate 范围内,
//!   特征表与训练好的模型均作为外部产物读入.
//!
//! # 开发计划
//!
//! ### ROI 提取 ✅
//!
//! 优先读取肿瘤掩膜, 缺失时退回到术腔掩膜. 两者均缺失时报错.
//!
//! 实现位于 `mr-berry/src/roi`.
//!
//! ### 距离衰减 ✅
//!
//! 对每个瘤周体素求到 ROI 的最近欧氏距离, 用双曲正切平滑衰减其复发概率.
//! 最近点查询使用 ROI 表面体素上的 k-d 树, 结果与穷举扫描逐位一致.
//!
//! 实现位于 `mr-berry/src/post_proc/attenuate.rs`.
//!
//! ### 稠密条件随机场平滑 ⌛️
//!
//! 二类全连接 CRF, 仅高斯空间核, 平均场推断. 双边核预留但未实现.
//!
//! 实现位于 `mr-berry/src/post_proc/dense_crf.rs`.
//!
//! ### Otsu 阈值标注 ✅
//!
//! 实现位于 `mr-berry/src/post_proc/otsu.rs`.
//!
//! ### 融合可视化 ✅
//!
//! 概率体数据 (nii), turbo 伪彩融合 (RGB nii + 逐层 png) 以及描述性标签.
//!
//! 实现位于 `mr-berry/src/fusion`.
//!
//! ### 批处理与逐病人状态报告 ✅
//!
//! 单个病人失败不会中断整个批次.
//!
//! 实现位于 `mr-berry/src/pipeline.rs`.

/// 三维索引 `(x, y, z)`, 同时也可一定程度上用作非负整数向量.
pub type Idx3d = (usize, usize, usize);

/// 三维体数据形状 `(X, Y, Z)`.
pub type Shape3d = (usize, usize, usize);

/// 平铺的体素索引.
pub type VoxelIndex = u64;

/// nii 体数据与体素表.
mod data;

pub use data::{
    ravel_index, unravel_index, voxel_coordinates, FeatureTable, MrScan, NiftiHeaderAttr,
    PredictionTable, RoiMask, TableError, VolumeError,
};

pub mod consts;

pub mod roi;

pub mod post_proc;

pub mod model;

pub mod fusion;

pub mod dataset;

pub mod pipeline;

pub mod prelude;

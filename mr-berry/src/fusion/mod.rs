//! 概率体数据重建与 t1ce 融合可视化.
//!
//! 所有输出均位于病人目录的 `saved_images` 子目录下:
//!
//! - `probabilities.nii.gz`: 与 t1ce 同坐标系的概率体数据, 表外体素为 NaN;
//! - `t1ce_fused_proba.nii.gz`: RGB24 融合体数据. 有概率的体素以 turbo 伪彩着色,
//!   其余体素为 t1ce 灰度;
//! - `fused/{z:03}.png`: 融合体数据的逐层轴位切片;
//! - `t1ce_fused_proba.json`: 描述性标签, 见 [`FusedTags`].

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use ndarray::{Array3, ArrayView3, Axis, Zip};
use nifti::writer::WriterOptions;

use crate::consts::file;
use crate::data::VolumeError;
use crate::dataset::Patient;
use crate::{unravel_index, MrScan, NiftiHeaderAttr, Shape3d, VoxelIndex};

mod colormap;
mod tags;

pub use colormap::{gray, turbo, MinMax};
pub use tags::FusedTags;

/// 渲染输出时的错误.
#[derive(Debug)]
pub enum RenderError {
    /// 底层 I/O 错误.
    Io(std::io::Error),

    /// 写入 nii 文件错误.
    Nifti(nifti::NiftiError),

    /// 写入 png 文件错误.
    Image(image::ImageError),

    /// 写入标签错误.
    Json(serde_json::Error),

    /// 体素索引与参考体数据不符.
    Volume(VolumeError),
}

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderError::Io(e) => write!(f, "render io error: {e}"),
            RenderError::Nifti(e) => write!(f, "cannot write nifti: {e}"),
            RenderError::Image(e) => write!(f, "cannot write slice image: {e}"),
            RenderError::Json(e) => write!(f, "cannot write tags: {e}"),
            RenderError::Volume(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for RenderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RenderError::Io(e) => Some(e),
            RenderError::Nifti(e) => Some(e),
            RenderError::Image(e) => Some(e),
            RenderError::Json(e) => Some(e),
            RenderError::Volume(e) => Some(e),
        }
    }
}

impl From<std::io::Error> for RenderError {
    fn from(e: std::io::Error) -> Self {
        RenderError::Io(e)
    }
}

impl From<nifti::NiftiError> for RenderError {
    fn from(e: nifti::NiftiError) -> Self {
        RenderError::Nifti(e)
    }
}

impl From<image::ImageError> for RenderError {
    fn from(e: image::ImageError) -> Self {
        RenderError::Image(e)
    }
}

impl From<serde_json::Error> for RenderError {
    fn from(e: serde_json::Error) -> Self {
        RenderError::Json(e)
    }
}

impl From<VolumeError> for RenderError {
    fn from(e: VolumeError) -> Self {
        RenderError::Volume(e)
    }
}

/// 渲染结果.
pub type RenderResult<T> = Result<T, RenderError>;

/// 将按体素索引存储的概率放回形状为 `shape` 的体数据中. 表中没有的体素为 NaN.
///
/// 索引越界时返回 `Err`.
pub fn probability_volume(
    shape: Shape3d,
    index: &[VoxelIndex],
    probabilities: &[f64],
) -> RenderResult<Array3<f32>> {
    let size = shape.0 * shape.1 * shape.2;
    let mut volume = Array3::<f32>::from_elem(shape, f32::NAN);
    for (&i, &p) in index.iter().zip(probabilities) {
        let pos = unravel_index(i, shape).ok_or(VolumeError::IndexOutOfBound(i, size))?;
        volume[pos] = p as f32;
    }
    Ok(volume)
}

/// 将概率体数据融合到 t1ce 上.
///
/// 两者分别做 min-max 归一化 (概率忽略 NaN). 概率非 NaN 的体素以 turbo 伪彩着色,
/// 其余体素保留 t1ce 灰度.
///
/// # 注意
///
/// `t1ce` 和 `proba` 形状必须一致, 否则程序 panic.
pub fn fuse(t1ce: ArrayView3<f32>, proba: ArrayView3<f32>) -> Array3<[u8; 3]> {
    let t1ce_range = MinMax::fit(t1ce.iter().map(|v| *v as f64));
    let proba_range = MinMax::fit(proba.iter().map(|v| *v as f64));

    Zip::from(&t1ce).and(&proba).map_collect(|&t, &p| {
        match (p.is_nan(), proba_range) {
            (false, Some(range)) => turbo(range.apply(p as f64)),
            _ => gray(t1ce_range.map_or(0.0, |r| r.apply(t as f64))),
        }
    })
}

/// 将融合体数据逐层 (沿 z 轴) 保存为 png, 返回保存的张数.
/// 图像宽为 x 方向, 高为 y 方向.
pub fn save_axial_slices<P: AsRef<Path>>(fused: ArrayView3<[u8; 3]>, dir: P) -> RenderResult<usize> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir)?;
    let (width, height, _) = fused.dim();
    for (z, slice) in fused.axis_iter(Axis(2)).enumerate() {
        let mut buf = image::RgbImage::new(width as u32, height as u32);
        for ((x, y), &rgb) in slice.indexed_iter() {
            buf.put_pixel(x as u32, y as u32, image::Rgb(rgb));
        }
        buf.save(dir.join(format!("{z:03}.png")))?;
    }
    Ok(fused.len_of(Axis(2)))
}

/// 单个病人的渲染输出路径.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderOutput {
    /// 概率体数据.
    pub probabilities: PathBuf,

    /// RGB 融合体数据.
    pub fused: PathBuf,

    /// 逐层切片目录.
    pub slices: PathBuf,

    /// 描述性标签.
    pub tags: PathBuf,
}

impl RenderOutput {
    fn under(dir: &Path) -> Self {
        Self {
            probabilities: dir.join(file::PROBABILITIES),
            fused: dir.join(file::FUSED),
            slices: dir.join(file::FUSED_SLICES),
            tags: dir.join(file::FUSED_TAGS),
        }
    }
}

/// 渲染病人 `patient` 的全部可视化输出. `t1ce` 为该病人的参考序列,
/// `index` 与 `probabilities` 为逐体素预测结果.
pub fn render(
    patient: &Patient,
    t1ce: &MrScan,
    index: &[VoxelIndex],
    probabilities: &[f64],
) -> RenderResult<RenderOutput> {
    let dir = patient.saved_images_dir();
    fs::create_dir_all(&dir)?;
    let out = RenderOutput::under(&dir);

    let proba = probability_volume(t1ce.shape(), index, probabilities)?;
    WriterOptions::new(&out.probabilities)
        .reference_header(t1ce.header())
        .write_nifti(&proba)?;

    let fused = fuse(t1ce.data(), proba.view());
    WriterOptions::new(&out.fused)
        .reference_header(t1ce.header())
        .write_rgb_nifti(&fused)?;
    let n = save_axial_slices(fused.view(), &out.slices)?;

    let tags = FusedTags::now(patient.id());
    fs::write(&out.tags, serde_json::to_string_pretty(&tags)?)?;

    log::debug!("{}: rendered {n} axial slices", patient.id());
    Ok(out)
}

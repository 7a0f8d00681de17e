use std::fmt;
use std::ops::Index;
use std::path::Path;

use ndarray::{Array3, ArrayView, Ix3};
use nifti::{IntoNdArray, NiftiHeader, NiftiObject, ReaderOptions};

use crate::{Idx3d, Shape3d, VoxelIndex};

mod table;

pub use table::{FeatureTable, PredictionTable, TableError};

/// `NiftiHeader` 是栈上大对象, 移动该对象的开销很可观.
/// 因此我们将其分配到堆上.
type BoxedHeader = Box<NiftiHeader>;

/// 打开或解析 nii 体数据时的错误.
#[derive(Debug)]
pub enum VolumeError {
    /// nifti 底层读写错误 (包括文件不存在).
    Nifti(nifti::NiftiError),

    /// 体数据形状与 header 不符.
    Shape(ndarray::ShapeError),

    /// 体素索引超出体数据范围.
    ///
    /// 第一个参数为索引, 第二个参数为体素总数.
    IndexOutOfBound(VoxelIndex, usize),
}

impl fmt::Display for VolumeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VolumeError::Nifti(e) => write!(f, "nifti error: {e}"),
            VolumeError::Shape(e) => write!(f, "volume shape error: {e}"),
            VolumeError::IndexOutOfBound(i, size) => {
                write!(f, "voxel index {i} out of bound (volume size {size})")
            }
        }
    }
}

impl std::error::Error for VolumeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            VolumeError::Nifti(e) => Some(e),
            VolumeError::Shape(e) => Some(e),
            VolumeError::IndexOutOfBound(..) => None,
        }
    }
}

impl From<nifti::NiftiError> for VolumeError {
    fn from(e: nifti::NiftiError) -> Self {
        VolumeError::Nifti(e)
    }
}

impl From<ndarray::ShapeError> for VolumeError {
    fn from(e: ndarray::ShapeError) -> Self {
        VolumeError::Shape(e)
    }
}

/// 体数据操作结果.
pub type VolumeResult<T> = Result<T, VolumeError>;

/// 从 header 中读出 `(X, Y, Z)` 形状.
#[inline]
fn get_shape_from_header(h: &NiftiHeader) -> Shape3d {
    // [ndim, X, Y, Z, ...]. 体素个数数组.
    let [_, x, y, z, ..] = h.dim;
    (x as usize, y as usize, z as usize)
}

/// 读取 nii 文件, 返回 header 与行优先 `(x, y, z)` 排布的 `f32` 数据.
fn read_f32_volume(path: &Path) -> VolumeResult<(BoxedHeader, Array3<f32>)> {
    let obj = ReaderOptions::new().read_file(path)?;
    let header = Box::new(obj.header().clone());
    let shape = get_shape_from_header(&header);

    // nifti 数据按列优先存储, 多余的尾部维度长度均为 1.
    let data = obj.into_volume().into_ndarray::<f32>()?.into_shape(shape)?;
    let data = data.as_standard_layout().into_owned();
    debug_assert!(data.is_standard_layout());

    Ok((header, data))
}

/// 将平铺的体素索引按 `shape` 行优先展开为 `(x, y, z)`.
///
/// 索引越界时返回 `None`.
#[inline]
pub fn unravel_index(index: VoxelIndex, (sx, sy, sz): Shape3d) -> Option<Idx3d> {
    let size = (sx * sy * sz) as VoxelIndex;
    if index >= size {
        return None;
    }
    let plane = (sy * sz) as VoxelIndex;
    let x = index / plane;
    let rest = index % plane;
    Some((x as usize, (rest / sz as VoxelIndex) as usize, (rest % sz as VoxelIndex) as usize))
}

/// [`unravel_index`] 的逆操作. 坐标越界时返回 `None`.
#[inline]
pub fn ravel_index((x, y, z): Idx3d, (sx, sy, sz): Shape3d) -> Option<VoxelIndex> {
    (x < sx && y < sy && z < sz).then(|| ((x * sy + y) * sz + z) as VoxelIndex)
}

/// 批量展开体素索引. 遇到第一个越界索引时返回 `Err`.
pub fn voxel_coordinates(index: &[VoxelIndex], shape: Shape3d) -> VolumeResult<Vec<Idx3d>> {
    let size = shape.0 * shape.1 * shape.2;
    index
        .iter()
        .map(|&i| unravel_index(i, shape).ok_or(VolumeError::IndexOutOfBound(i, size)))
        .collect()
}

/// 3D nii 文件 header 的共用属性和部分通用操作.
pub trait NiftiHeaderAttr {
    /// 获取 header 部分.
    fn header(&self) -> &NiftiHeader;

    /// 获取数据形状大小 `(X, Y, Z)`.
    #[inline]
    fn shape(&self) -> Shape3d {
        get_shape_from_header(self.header())
    }

    /// 获取数据体素个数.
    #[inline]
    fn size(&self) -> usize {
        let (x, y, z) = self.shape();
        x * y * z
    }

    /// 检查索引是否合法.
    #[inline]
    fn check(&self, (x0, y0, z0): &Idx3d) -> bool {
        let (x, y, z) = self.shape();
        *x0 < x && *y0 < y && *z0 < z
    }

    /// 获取单个体素分辨率 `[x, y, z]`, 以毫米为单位.
    #[inline]
    fn pix_dim(&self) -> [f64; 3] {
        let [_, x, y, z, ..] = self.header().pixdim;
        [x as f64, y as f64, z as f64]
    }

    /// 体素分辨率在三个维度上是否是各向同的?
    #[inline]
    fn is_isotropic(&self) -> bool {
        let [x, y, z] = self.pix_dim();
        x == y && x == z
    }
}

/// nii 格式 3D MRI 序列 (如 t1ce), 包括 header 和强度值. 强度以 `f32` 保存.
#[derive(Debug, Clone)]
pub struct MrScan {
    header: BoxedHeader,
    data: Array3<f32>,
}

impl NiftiHeaderAttr for MrScan {
    #[inline]
    fn header(&self) -> &NiftiHeader {
        &self.header
    }
}

impl Index<Idx3d> for MrScan {
    type Output = f32;

    #[inline]
    fn index(&self, index: Idx3d) -> &Self::Output {
        &self.data[index]
    }
}

impl MrScan {
    /// 打开 nii 文件格式的 3D MRI 序列. `path` 为 nii 文件的本地路径.
    /// 如果打开成功, 则返回 `Ok(Self)`, 否则返回 `Err`.
    pub fn open<P: AsRef<Path>>(path: P) -> VolumeResult<Self> {
        let (header, data) = read_f32_volume(path.as_ref())?;
        Ok(Self { header, data })
    }

    /// 根据 `(x, y, z)` 排布的数据和体素分辨率直接创建序列.
    ///
    /// # 注意
    ///
    /// 该方法创建的 header 仅填写形状和分辨率, 你应仅将其用于实验目的.
    pub fn fake(data: Array3<f32>, pix_dim: [f32; 3]) -> Self {
        let header = fake_header(data.dim(), pix_dim);
        let data = data.as_standard_layout().into_owned();
        Self { header, data }
    }

    /// 获得数据的一份不可变 shallow copy.
    #[inline]
    pub fn data(&self) -> ArrayView<'_, f32, Ix3> {
        self.data.view()
    }
}

/// nii 格式 3D 二值掩膜 (肿瘤, 术腔等). 非零体素记为 1, 其余为 0.
#[derive(Debug, Clone)]
pub struct RoiMask {
    header: BoxedHeader,
    data: Array3<u8>,
}

impl NiftiHeaderAttr for RoiMask {
    #[inline]
    fn header(&self) -> &NiftiHeader {
        &self.header
    }
}

impl Index<Idx3d> for RoiMask {
    type Output = u8;

    #[inline]
    fn index(&self, index: Idx3d) -> &Self::Output {
        &self.data[index]
    }
}

impl RoiMask {
    /// 打开 nii 文件格式的 3D 掩膜. 任意非零体素 (包括 NaN) 均视为前景.
    pub fn open<P: AsRef<Path>>(path: P) -> VolumeResult<Self> {
        let (header, data) = read_f32_volume(path.as_ref())?;
        let data = data.mapv(|v| u8::from(v != 0.0));
        Ok(Self { header, data })
    }

    /// 根据 `(x, y, z)` 排布的数据直接创建掩膜. 非零体素视为前景.
    ///
    /// # 注意
    ///
    /// 该方法创建的 header 仅填写形状和分辨率, 你应仅将其用于实验目的.
    pub fn fake(data: Array3<u8>) -> Self {
        let header = fake_header(data.dim(), [1.0; 3]);
        let data = data.mapv(|v| u8::from(v != 0));
        Self { header, data }
    }

    /// 获得数据的一份不可变 shallow copy.
    #[inline]
    pub fn data(&self) -> ArrayView<'_, u8, Ix3> {
        self.data.view()
    }

    /// 前景体素个数.
    #[inline]
    pub fn count(&self) -> usize {
        self.data.iter().filter(|p| **p != 0).count()
    }

    /// 收集所有前景体素对应的下标, 结果按行优先存储.
    pub fn foreground_pos(&self) -> Vec<Idx3d> {
        self.data
            .indexed_iter()
            .filter_map(|(pos, pixel)| (*pixel != 0).then_some(pos))
            .collect()
    }
}

fn fake_header((x, y, z): Shape3d, pix_dim: [f32; 3]) -> BoxedHeader {
    let mut header = Box::<NiftiHeader>::default();
    header.dim = [3, x as u16, y as u16, z as u16, 1, 1, 1, 1];
    let [_, px, py, pz, ..] = &mut header.pixdim;
    [*px, *py, *pz] = pix_dim;
    header.intent_name[..4].copy_from_slice(b"fake");
    header
}

//! nii (`.nii` / `.nii.gz`) 文件读取.
//!
//! 体素数据按照 nii 原始轴顺序 `(i, j, k)` 保存, 不做任何轴置换.
//! 仿射矩阵的来源优先级为 sform, qform, 最后是 pixdim 对角阵.

use crate::{Affine, BinaryMask, Volume, VerifyError, VerifyResult};
use ndarray::{Array3, Ix3};
use nifti::{IntoNdArray, NiftiHeader, NiftiObject, ReaderOptions};
use std::path::Path;

/// 由 nii 头部计算体素到物理空间的仿射矩阵.
pub fn affine_from_header(header: &NiftiHeader) -> Affine {
    let f = |v: f32| v as f64;

    if header.sform_code > 0 {
        let (x, y, z) = (header.srow_x, header.srow_y, header.srow_z);
        return Affine::from_rows([
            x.map(f),
            y.map(f),
            z.map(f),
            [0.0, 0.0, 0.0, 1.0],
        ]);
    }

    let [qfac, dx, dy, dz] = [0, 1, 2, 3].map(|i| f(header.pixdim[i]));
    if header.qform_code > 0 {
        let (b, c, d) = (f(header.quatern_b), f(header.quatern_c), f(header.quatern_d));
        let a = (1.0 - (b * b + c * c + d * d).min(1.0)).sqrt();
        let qfac = if qfac < 0.0 { -1.0 } else { 1.0 };
        let dz = dz * qfac;

        let r = [
            [a * a + b * b - c * c - d * d, 2.0 * (b * c - a * d), 2.0 * (b * d + a * c)],
            [2.0 * (b * c + a * d), a * a + c * c - b * b - d * d, 2.0 * (c * d - a * b)],
            [2.0 * (b * d - a * c), 2.0 * (c * d + a * b), a * a + d * d - c * c - b * b],
        ];
        let t = [f(header.quatern_x), f(header.quatern_y), f(header.quatern_z)];
        let row = |i: usize| [r[i][0] * dx, r[i][1] * dy, r[i][2] * dz, t[i]];
        return Affine::from_rows([row(0), row(1), row(2), [0.0, 0.0, 0.0, 1.0]]);
    }

    Affine::from_spacing([dx, dy, dz])
}

/// 读取 nii 文件, 得到三维 `f32` 数组 (已应用 `scl_slope` / `scl_inter`) 与仿射矩阵.
fn read_array(path: &Path) -> VerifyResult<(Array3<f32>, Affine)> {
    if !path.is_file() {
        return Err(VerifyError::MissingInput(path.to_path_buf()));
    }
    let obj = ReaderOptions::new().read_file(path)?;
    let affine = affine_from_header(obj.header());
    let data = obj.into_volume().into_ndarray::<f32>()?;
    let ndim = data.ndim();
    let data = data.into_dimensionality::<Ix3>().map_err(|_| {
        VerifyError::geometry(format!("{} has {ndim} dimensions, expected 3", path.display()))
    })?;
    Ok((data, affine))
}

/// 打开 nii 格式的三维扫描.
///
/// # 返回值
///
/// 文件不存在时返回 [`VerifyError::MissingInput`], 数据不是三维或体素间距非法时
/// 返回 [`VerifyError::MalformedGeometry`].
pub fn read_volume<P: AsRef<Path>>(path: P) -> VerifyResult<Volume> {
    let (data, affine) = read_array(path.as_ref())?;
    Volume::new(data, affine)
}

/// 打开 nii 格式的三维掩膜, 以 `value > threshold` 二值化.
pub fn read_mask<P: AsRef<Path>>(path: P, threshold: f64) -> VerifyResult<BinaryMask> {
    let (data, affine) = read_array(path.as_ref())?;
    BinaryMask::from_values(&data, affine, threshold)
}

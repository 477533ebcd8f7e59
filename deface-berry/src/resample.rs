//! 掩膜最近邻重采样.

use crate::{BinaryMask, GridAttr, VerifyError, VerifyResult};
use ndarray::{Array3, Zip};

/// 将体素坐标就近取整为数组下标. 越界时返回 `None`.
#[inline]
fn nearest(x: f64, len: usize) -> Option<usize> {
    let r = (x + 0.5).floor();
    (r >= 0.0 && r < len as f64).then_some(r as usize)
}

/// 将 `mask` 重采样到 `grid` 的网格上.
///
/// 若两者已经在同一网格 (形状相同且仿射在容差内相同), 直接返回 `mask` 的拷贝.
/// 否则对 `grid` 的每个体素, 经仿射变换找到 `mask` 中最近的体素取值,
/// 落在 `mask` 范围外的体素取背景.
///
/// # 返回值
///
/// `mask` 的仿射不可逆时返回 [`VerifyError::MalformedGeometry`].
pub fn resample_to<G: GridAttr>(mask: &BinaryMask, grid: &G) -> VerifyResult<BinaryMask> {
    if mask.same_grid(grid) {
        return Ok(mask.clone());
    }
    let inv = mask
        .affine()
        .try_inverse()
        .ok_or_else(|| VerifyError::geometry("mask affine is singular"))?;
    let vox2vox = inv.then_from(grid.affine());
    let (si, sj, sk) = mask.shape();
    let src = mask.data();

    let mut out = Array3::from_elem(grid.shape(), false);
    let sample = |(i, j, k): (usize, usize, usize), v: &mut bool| {
        let [x, y, z] = vox2vox.apply([i as f64, j as f64, k as f64]);
        *v = match (nearest(x, si), nearest(y, sj), nearest(z, sk)) {
            (Some(a), Some(b), Some(c)) => src[(a, b, c)],
            _ => false,
        };
    };

    cfg_if::cfg_if! {
        if #[cfg(feature = "rayon")] {
            Zip::indexed(&mut out).par_for_each(sample);
        } else {
            Zip::indexed(&mut out).for_each(sample);
        }
    }

    tracing::debug!(
        from = ?mask.shape(),
        to = ?grid.shape(),
        "resampled mask onto a different grid"
    );
    Ok(BinaryMask::on_grid_of(grid, out))
}

//! 区域相似度指标: 掩膜 SSIM 与掩膜 PSNR.

use crate::consts::{
    DEFAULT_STACK_AXIS, FLAT_PATCH_STD, SSIM_K1, SSIM_K2, SSIM_MAX_WINDOW, SSIM_MIN_SLICE_VOXELS,
    SSIM_MIN_WINDOW,
};
use crate::{BinaryMask, GridAttr, Idx2d, Volume};
use itertools::Itertools;
use ndarray::{s, Array2, ArrayView2, Axis, Zip};

/// 二维前缀和 (summed-area table), 用于 O(1) 求任意矩形窗口的和.
struct SummedArea(Array2<f64>);

impl SummedArea {
    fn new(a: &Array2<f64>) -> Self {
        let (h, w) = a.dim();
        let mut t = Array2::zeros((h + 1, w + 1));
        for i in 0..h {
            let mut row = 0.0;
            for j in 0..w {
                row += a[(i, j)];
                t[(i + 1, j + 1)] = t[(i, j + 1)] + row;
            }
        }
        Self(t)
    }

    /// 左上角为 `(r, c)`, 边长为 `win` 的正方形窗口内元素之和.
    #[inline]
    fn window(&self, (r, c): Idx2d, win: usize) -> f64 {
        let t = &self.0;
        t[(r + win, c + win)] - t[(r, c + win)] - t[(r + win, c)] + t[(r, c)]
    }
}

/// 两幅等大二维图像的 SSIM.
///
/// 使用均匀窗口, 边长 `win` (奇数), 协方差按样本方式归一化 (`NP / (NP - 1)`),
/// 只在窗口完全落在图像内部的中心点上取平均.
///
/// # 注意
///
/// `win` 必须是不小于 2 的数, 并且不超过图像的短边, 否则程序 panic.
pub fn ssim_2d(a: ArrayView2<f64>, b: ArrayView2<f64>, win: usize, data_range: f64) -> f64 {
    assert_eq!(a.dim(), b.dim(), "图像形状不一致");
    let (h, w) = a.dim();
    assert!(win >= 2 && win <= h && win <= w, "SSIM 窗口大小非法: {win}");

    let a = a.to_owned();
    let b = b.to_owned();
    let sa = SummedArea::new(&a);
    let sb = SummedArea::new(&b);
    let saa = SummedArea::new(&(&a * &a));
    let sbb = SummedArea::new(&(&b * &b));
    let sab = SummedArea::new(&(&a * &b));

    let np = (win * win) as f64;
    let cov_norm = np / (np - 1.0);
    let c1 = (SSIM_K1 * data_range).powi(2);
    let c2 = (SSIM_K2 * data_range).powi(2);

    let mut total = 0.0;
    let mut n = 0usize;
    for r in 0..=(h - win) {
        for c in 0..=(w - win) {
            let ux = sa.window((r, c), win) / np;
            let uy = sb.window((r, c), win) / np;
            let uxx = saa.window((r, c), win) / np;
            let uyy = sbb.window((r, c), win) / np;
            let uxy = sab.window((r, c), win) / np;
            let vx = cov_norm * (uxx - ux * ux);
            let vy = cov_norm * (uyy - uy * uy);
            let vxy = cov_norm * (uxy - ux * uy);

            let num = (2.0 * ux * uy + c1) * (2.0 * vxy + c2);
            let den = (ux * ux + uy * uy + c1) * (vx + vy + c2);
            total += num / den;
            n += 1;
        }
    }
    total / n as f64
}

/// 根据裁剪后切片的短边确定 SSIM 窗口: 不超过 7 的奇数, 至少为 3.
/// 短边小于 3 时返回 `None`.
fn window_for(min_side: usize) -> Option<usize> {
    if min_side < SSIM_MIN_WINDOW {
        return None;
    }
    let mut win = min_side.min(SSIM_MAX_WINDOW);
    if win % 2 == 0 {
        win -= 1;
    }
    Some(win.max(SSIM_MIN_WINDOW))
}

/// 二维掩膜前景的紧致包围盒, 两端均包含.
fn bbox_2d(m: &ArrayView2<bool>) -> Option<(Idx2d, Idx2d)> {
    let pos = m.indexed_iter().filter_map(|(p, v)| v.then_some(p)).collect_vec();
    let (r0, r1) = pos.iter().map(|p| p.0).minmax().into_option()?;
    let (c0, c1) = pos.iter().map(|p| p.1).minmax().into_option()?;
    Some(((r0, c0), (r1, c1)))
}

/// 逐切片掩膜 SSIM 的参数.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SliceSsim {
    /// 切片堆叠轴, 即与二维采集平面正交的轴.
    pub stack_axis: usize,

    /// 切片参与计算所需的最少区域体素数.
    pub min_slice_voxels: usize,
}

impl Default for SliceSsim {
    fn default() -> Self {
        Self {
            stack_axis: DEFAULT_STACK_AXIS,
            min_slice_voxels: SSIM_MIN_SLICE_VOXELS,
        }
    }
}

impl SliceSsim {
    /// 逐切片的掩膜 SSIM.
    ///
    /// 沿 `stack_axis` 遍历切片. 对每个切片:
    ///
    /// 1. 区域内体素少于 `min_slice_voxels` 个时跳过;
    /// 2. 两幅图像都裁剪到区域在该切片上的包围盒 (包围盒内的所有像素都参与计算);
    /// 3. 窗口取不超过 7 的奇数, 至少为 3, 短边小于 3 时跳过;
    /// 4. 任一裁剪块的 (总体) 标准差小于 `1e-8` 时跳过;
    /// 5. 以动态范围 1.0 计算 SSIM.
    ///
    /// # 返回值
    ///
    /// 所有参与计算切片的平均值. 没有任何切片参与时返回 1.0.
    pub fn compute(&self, raw: &Volume, candidate: &Volume, region: &BinaryMask) -> f64 {
        assert_eq!(raw.shape(), candidate.shape(), "扫描形状不一致");
        assert_eq!(raw.shape(), region.shape(), "区域与扫描形状不一致");
        assert!(self.stack_axis < 3, "非法的切片轴: {}", self.stack_axis);

        let axis = Axis(self.stack_axis);
        let (raw_d, cand_d, reg_d) = (raw.data(), candidate.data(), region.data());
        let mut scores = Vec::new();

        for ((a, b), m) in raw_d
            .axis_iter(axis)
            .zip(cand_d.axis_iter(axis))
            .zip(reg_d.axis_iter(axis))
        {
            if m.iter().filter(|v| **v).count() < self.min_slice_voxels {
                continue;
            }
            let Some(((r0, c0), (r1, c1))) = bbox_2d(&m) else {
                continue;
            };
            let Some(win) = window_for((r1 - r0 + 1).min(c1 - c0 + 1)) else {
                continue;
            };
            let a = a.slice(s![r0..=r1, c0..=c1]).mapv(|v| v as f64);
            let b = b.slice(s![r0..=r1, c0..=c1]).mapv(|v| v as f64);
            if a.std(0.0) < FLAT_PATCH_STD || b.std(0.0) < FLAT_PATCH_STD {
                continue;
            }
            scores.push(ssim_2d(a.view(), b.view(), win, 1.0));
        }

        tracing::trace!(slices = scores.len(), "masked SSIM");
        if scores.is_empty() {
            1.0
        } else {
            scores.iter().sum::<f64>() / scores.len() as f64
        }
    }
}

/// 沿 `stack_axis` 的逐切片掩膜 SSIM, 其余参数取默认值. 见 [`SliceSsim::compute`].
pub fn masked_ssim(raw: &Volume, candidate: &Volume, region: &BinaryMask, stack_axis: usize) -> f64 {
    SliceSsim {
        stack_axis,
        ..SliceSsim::default()
    }
    .compute(raw, candidate, region)
}

/// 区域 `region` 内两幅图像的均方误差. 区域为空时返回 `None`.
pub fn masked_mse(raw: &Volume, candidate: &Volume, region: &BinaryMask) -> Option<f64> {
    assert_eq!(raw.shape(), candidate.shape(), "扫描形状不一致");
    let mut sum = 0.0;
    let mut n = 0usize;
    Zip::from(raw.data())
        .and(candidate.data())
        .and(region.data())
        .for_each(|&a, &b, &m| {
            if m {
                let d = a as f64 - b as f64;
                sum += d * d;
                n += 1;
            }
        });
    (n > 0).then(|| sum / n as f64)
}

/// 由均方误差计算 PSNR (dB). `mse <= 0` 时为 `+inf`.
#[inline]
pub fn psnr_from_mse(mse: f64, peak: f64) -> f64 {
    if mse <= 0.0 {
        f64::INFINITY
    } else {
        10.0 * (peak * peak / mse).log10()
    }
}

/// 三维区域内的掩膜 PSNR (dB).
///
/// # 返回值
///
/// 区域为空或两者在区域内完全相同时返回 `+inf`.
pub fn masked_psnr(raw: &Volume, candidate: &Volume, region: &BinaryMask, peak: f64) -> f64 {
    masked_mse(raw, candidate, region).map_or(f64::INFINITY, |mse| psnr_from_mse(mse, peak))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Affine;
    use ndarray::Array3;

    fn f64_eq(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    fn ramp(n: usize, depth: usize) -> Volume {
        let data = Array3::from_shape_fn((n, n, depth), |(i, j, k)| {
            ((i * 7 + j * 3 + k) % 11) as f32 / 10.0
        });
        Volume::new(data, Affine::default()).unwrap()
    }

    fn region(n: usize, depth: usize, lo: usize, hi: usize) -> BinaryMask {
        let data = Array3::from_shape_fn((n, n, depth), |(i, j, _)| {
            (lo..hi).contains(&i) && (lo..hi).contains(&j)
        });
        BinaryMask::new(data, Affine::default()).unwrap()
    }

    #[test]
    fn test_window_rule() {
        assert_eq!(window_for(2), None);
        assert_eq!(window_for(3), Some(3));
        assert_eq!(window_for(4), Some(3));
        assert_eq!(window_for(6), Some(5));
        assert_eq!(window_for(7), Some(7));
        assert_eq!(window_for(100), Some(7));
    }

    #[test]
    fn test_summed_area_window() {
        let a = Array2::from_shape_fn((4, 5), |(i, j)| (i * 5 + j) as f64);
        let t = SummedArea::new(&a);
        let direct: f64 = a.slice(s![1..4, 2..5]).sum();
        assert!(f64_eq(t.window((1, 2), 3), direct));
    }

    #[test]
    fn test_identical_images() {
        let v = ramp(16, 4);
        let r = region(16, 4, 2, 14);
        assert!((masked_ssim(&v, &v, &r, 2) - 1.0).abs() < 1e-9);
        assert!(masked_psnr(&v, &v, &r, 1.0).is_infinite());
    }

    #[test]
    fn test_destroyed_region_scores_low() {
        let v = ramp(16, 4);
        let zeroed = v.with_data(Array3::zeros((16, 16, 4)));
        let inverted = v.with_data(v.data().mapv(|x| 1.0 - x));
        let r = region(16, 4, 2, 14);
        // 全零块的标准差为 0, 所有切片都被跳过.
        assert_eq!(masked_ssim(&v, &zeroed, &r, 2), 1.0);
        assert!(masked_ssim(&v, &inverted, &r, 2) < 0.0);
        assert!(masked_psnr(&v, &inverted, &r, 1.0) < 10.0);
    }

    #[test]
    fn test_small_regions_are_skipped() {
        let v = ramp(16, 4);
        let other = v.with_data(v.data().mapv(|x| 1.0 - x));
        // 每个切片只有 4x4 = 16 个体素.
        let r = region(16, 4, 2, 6);
        assert_eq!(masked_ssim(&v, &other, &r, 2), 1.0);
        let relaxed = SliceSsim {
            min_slice_voxels: 16,
            ..SliceSsim::default()
        };
        assert!(relaxed.compute(&v, &other, &r) < 0.0);
        let empty = BinaryMask::empty_like(&v);
        assert_eq!(masked_ssim(&v, &other, &empty, 2), 1.0);
        assert!(masked_psnr(&v, &other, &empty, 1.0).is_infinite());
    }

    #[test]
    fn test_psnr_monotonic() {
        assert!(psnr_from_mse(0.0, 1.0).is_infinite());
        assert!(f64_eq(psnr_from_mse(0.01, 1.0), 20.0));
        let mut last = f64::INFINITY;
        for mse in [1e-4, 1e-3, 0.01, 0.1, 0.5, 1.0] {
            let p = psnr_from_mse(mse, 1.0);
            assert!(p <= last);
            last = p;
        }

        let a = Volume::new(Array3::from_elem((3, 3, 3), 0.5f32), Affine::default()).unwrap();
        let b = a.with_data(Array3::from_elem((3, 3, 3), 0.6f32));
        let r = region(3, 3, 0, 3);
        assert!((masked_psnr(&a, &b, &r, 1.0) - 20.0).abs() < 1e-4);
    }
}

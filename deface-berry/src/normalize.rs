//! 灰度归一化, 以及通用的分位数计算.

use crate::consts::{NORM_HIGH_PERCENTILE, NORM_LOW_PERCENTILE};
use crate::{BinaryMask, Volume};
use itertools::{Itertools, MinMaxResult};
use ordered_float::OrderedFloat;

/// 计算 `values` 的第 `q` 百分位数 (`0 <= q <= 100`), 在相邻秩之间线性插值.
///
/// 秩位置为 `q / 100 * (n - 1)`. 内部使用选择算法, 因此 `values` 的顺序会被打乱.
/// `NaN` 按 `f64::total_cmp` 排在最大端. `values` 为空时返回 `None`.
pub fn percentile(values: &mut [f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let q = q.clamp(0.0, 100.0);
    let rank = q / 100.0 * (values.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let frac = rank - lo as f64;

    let (_, lo_v, right) = values.select_nth_unstable_by(lo, f64::total_cmp);
    let lo_v = *lo_v;
    if frac == 0.0 || right.is_empty() {
        return Some(lo_v);
    }
    // 第 lo + 1 小的值就是右半部分的最小值.
    let hi_v = right
        .iter()
        .copied()
        .min_by(f64::total_cmp)
        .unwrap_or(lo_v);
    Some(lo_v + (hi_v - lo_v) * frac)
}

/// 所有有限值的最小值和最大值.
fn finite_min_max(values: &[f64]) -> Option<(f64, f64)> {
    match values
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .map(OrderedFloat)
        .minmax()
    {
        MinMaxResult::NoElements => None,
        MinMaxResult::OneElement(v) => Some((v.0, v.0)),
        MinMaxResult::MinMax(a, b) => Some((a.0, b.0)),
    }
}

/// 灰度线性映射窗口 `[lo, hi]`, 保证 `lo < hi`.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct IntensityWindow {
    lo: f64,
    hi: f64,
}

impl IntensityWindow {
    /// 由统计样本得到稳健窗口.
    ///
    /// 优先使用 1%/99% 分位数. 分位数非有限或 `hi <= lo` 时退化为有限值的最小/最大值.
    /// 仍然退化时返回 `None`, 此时不应做任何归一化.
    pub fn robust(mut values: Vec<f64>) -> Option<Self> {
        let lo = percentile(&mut values, NORM_LOW_PERCENTILE)?;
        let hi = percentile(&mut values, NORM_HIGH_PERCENTILE)?;
        if lo.is_finite() && hi.is_finite() && hi > lo {
            return Some(Self { lo, hi });
        }
        let (lo, hi) = finite_min_max(&values)?;
        (hi > lo).then_some(Self { lo, hi })
    }

    /// 下界.
    #[inline]
    pub fn lo(&self) -> f64 {
        self.lo
    }

    /// 上界.
    #[inline]
    pub fn hi(&self) -> f64 {
        self.hi
    }

    /// `x ↦ clip((x - lo) / (hi - lo), 0, 1)`.
    #[inline]
    pub fn map(&self, x: f32) -> f32 {
        let y = (x as f64 - self.lo) / (self.hi - self.lo);
        // clamp 不处理 NaN.
        if y.is_nan() {
            0.0
        } else {
            y.clamp(0.0, 1.0) as f32
        }
    }

    /// 对整幅体数据应用映射.
    pub fn apply(&self, vol: &Volume) -> Volume {
        vol.with_data(vol.data().mapv(|x| self.map(x)))
    }
}

/// 联合归一化后的两幅图像.
#[derive(Debug, Clone)]
pub struct Normalized {
    /// 归一化后的原始扫描.
    pub raw: Volume,

    /// 归一化后的候选 (去脸后) 扫描.
    pub candidate: Volume,

    /// 名义峰值. 总是 1.0.
    pub peak: f64,

    /// 实际使用的窗口. `None` 表示样本退化, 两幅图像原样返回.
    pub window: Option<IntensityWindow>,
}

/// 以原始扫描在 `foreground` 内的灰度统计, 对两幅图像做同一个线性映射.
///
/// `foreground` 为空时, 统计样本取整幅原始扫描.
///
/// # 注意
///
/// 三者形状必须一致, 否则程序 panic.
pub fn normalize_pair(raw: &Volume, candidate: &Volume, foreground: &BinaryMask) -> Normalized {
    let values = if foreground.is_empty() {
        raw.values()
    } else {
        raw.values_in(foreground)
    };

    match IntensityWindow::robust(values) {
        Some(window) => {
            tracing::debug!(lo = window.lo, hi = window.hi, "intensity window");
            Normalized {
                raw: window.apply(raw),
                candidate: window.apply(candidate),
                peak: 1.0,
                window: Some(window),
            }
        }
        None => {
            tracing::debug!("degenerate intensity range, images left unscaled");
            Normalized {
                raw: raw.clone(),
                candidate: candidate.clone(),
                peak: 1.0,
                window: None,
            }
        }
    }
}

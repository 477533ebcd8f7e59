//! 解剖前景提取.
//!
//! [`ForegroundExtractor`] 有两种实现: 纯启发式的 [`HeuristicForeground`],
//! 以及优先调用外部分割模型、失败时退化为启发式的 [`SegmentedForeground`].
//! 流水线只依赖该 trait, 因此数值部分可以在不启动任何外部进程的情况下测试.

use crate::consts::FOREGROUND_PERCENTILE;
use crate::normalize::percentile;
use crate::resample::resample_to;
use crate::{BinaryMask, GridAttr, Volume, VerifyResult};
use ndarray::Zip;

/// 从候选扫描中提取解剖前景.
///
/// 返回值形状必须与 `candidate` 一致. 结果允许为空.
pub trait ForegroundExtractor {
    /// 提取前景.
    fn extract(&self, candidate: &Volume) -> BinaryMask;
}

/// 外部分割能力. 结果可以定义在任意网格上, 调用方负责重采样.
pub trait Segmenter {
    /// 分割 `candidate`, 返回二值掩膜 (`> 0` 即前景).
    fn segment(&self, candidate: &Volume) -> VerifyResult<BinaryMask>;
}

impl<S: Segmenter + ?Sized> Segmenter for &S {
    #[inline]
    fn segment(&self, candidate: &Volume) -> VerifyResult<BinaryMask> {
        (**self).segment(candidate)
    }
}

impl<F: ForegroundExtractor + ?Sized> ForegroundExtractor for &F {
    #[inline]
    fn extract(&self, candidate: &Volume) -> BinaryMask {
        (**self).extract(candidate)
    }
}

/// 确定性启发式前景: 分位数阈值, 26-邻域最大连通分量, 填洞.
#[derive(Debug, Copy, Clone)]
pub struct HeuristicForeground {
    percentile: f64,
}

impl Default for HeuristicForeground {
    fn default() -> Self {
        Self::new(FOREGROUND_PERCENTILE)
    }
}

impl HeuristicForeground {
    /// 以 `percentile` (0 ~ 100) 分位数作为阈值.
    pub fn new(percentile: f64) -> Self {
        Self { percentile }
    }
}

impl ForegroundExtractor for HeuristicForeground {
    fn extract(&self, candidate: &Volume) -> BinaryMask {
        let Some(threshold) = percentile(&mut candidate.values(), self.percentile) else {
            return BinaryMask::empty_like(candidate);
        };
        // 严格大于阈值. 全常数图像因此得到空掩膜.
        let above = Zip::from(candidate.data()).map_collect(|v| *v as f64 > threshold);
        let mask = BinaryMask::on_grid_of(candidate, above);
        if mask.is_empty() {
            return mask;
        }
        mask.largest_component().fill_holes()
    }
}

/// 优先使用外部分割模型的前景提取.
///
/// 分割失败 (进程错误, 超时, 模型缺失, 网格无法对齐) 时记录警告,
/// 并使用 `fallback` 计算前景. 该过程本身从不失败.
pub struct SegmentedForeground<S> {
    segmenter: S,
    fallback: HeuristicForeground,
}

impl<S: Segmenter> SegmentedForeground<S> {
    /// 以默认启发式作为退路.
    pub fn new(segmenter: S) -> Self {
        Self {
            segmenter,
            fallback: HeuristicForeground::default(),
        }
    }

    /// 替换退路.
    pub fn with_fallback(mut self, fallback: HeuristicForeground) -> Self {
        self.fallback = fallback;
        self
    }

    fn try_segment(&self, candidate: &Volume) -> VerifyResult<BinaryMask> {
        let mask = self.segmenter.segment(candidate)?;
        resample_to(&mask, candidate)
    }
}

impl<S: Segmenter> ForegroundExtractor for SegmentedForeground<S> {
    fn extract(&self, candidate: &Volume) -> BinaryMask {
        match self.try_segment(candidate) {
            Ok(fg) => {
                tracing::debug!(voxels = fg.count(), "foreground from segmentation model");
                fg
            }
            Err(e) => {
                tracing::warn!("Foreground segmentation failed ({e}), using heuristic foreground");
                self.fallback.extract(candidate)
            }
        }
    }
}

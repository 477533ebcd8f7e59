//! 单个受试者的验证流水线.
//!
//! 流水线是线性的状态序列, 每一步只消费前一步的产物:
//!
//! ```text
//! LoadInputs -> ResampleMasks -> ComputeForeground -> ComputeRegions
//!   -> ComputeRoiAndClip -> ComputeSurfaceMetrics -> NormalizeIntensities
//!   -> ComputeSimilarityMetrics -> Gate -> Emit
//! ```
//!
//! 任何一步失败都只终止当前受试者.

use crate::consts::{DEFAULT_STACK_AXIS, ROI_MARGIN_MM, SSIM_MIN_SLICE_VOXELS, SURFACE_TOLERANCE_MM};
use crate::foreground::ForegroundExtractor;
use crate::gate::{Verdict, VerificationTargets};
use crate::metrics::{masked_psnr, volume_dsc, SliceSsim, SurfaceComparison};
use crate::morph_3d::RoiBuilder;
use crate::normalize::normalize_pair;
use crate::resample::resample_to;
use crate::{BinaryMask, GridAttr, Volume, VerifyError, VerifyResult};
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// 流水线状态.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Stage {
    /// 检查输入.
    LoadInputs,

    /// 掩膜对齐到候选网格.
    ResampleMasks,

    /// 前景提取.
    ComputeForeground,

    /// 计算预测移除区域和工具移除区域.
    ComputeRegions,

    /// ROI 与裁剪.
    ComputeRoiAndClip,

    /// Surface DSC, HD95.
    ComputeSurfaceMetrics,

    /// 灰度归一化.
    NormalizeIntensities,

    /// SSIM, PSNR.
    ComputeSimilarityMetrics,

    /// 判定.
    Gate,

    /// 产出结果.
    Emit,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::LoadInputs => "load-inputs",
            Stage::ResampleMasks => "resample-masks",
            Stage::ComputeForeground => "compute-foreground",
            Stage::ComputeRegions => "compute-regions",
            Stage::ComputeRoiAndClip => "compute-roi-and-clip",
            Stage::ComputeSurfaceMetrics => "compute-surface-metrics",
            Stage::NormalizeIntensities => "normalize-intensities",
            Stage::ComputeSimilarityMetrics => "compute-similarity-metrics",
            Stage::Gate => "gate",
            Stage::Emit => "emit",
        };
        f.write_str(s)
    }
}

/// 流水线数值参数.
#[derive(Debug, Copy, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PipelineConfig {
    /// Surface DSC 的距离容差, 毫米.
    pub tolerance_mm: f64,

    /// ROI 物理边距, 毫米.
    pub margin_mm: f64,

    /// SSIM 切片堆叠轴.
    pub stack_axis: usize,

    /// SSIM 切片最少区域体素数.
    pub min_slice_voxels: usize,
}

impl PipelineConfig {
    /// 检查参数. 距离必须有限且非负, 切片轴必须是 0, 1, 2 之一.
    pub fn validate(&self) -> VerifyResult<()> {
        for (name, v) in [("tolerance_mm", self.tolerance_mm), ("margin_mm", self.margin_mm)] {
            if !(v.is_finite() && v >= 0.0) {
                return Err(VerifyError::config(format!("{name} must be finite and >= 0, got {v}")));
            }
        }
        if self.stack_axis >= 3 {
            return Err(VerifyError::config(format!(
                "stack_axis must be 0, 1 or 2, got {}",
                self.stack_axis
            )));
        }
        Ok(())
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            tolerance_mm: SURFACE_TOLERANCE_MM,
            margin_mm: ROI_MARGIN_MM,
            stack_axis: DEFAULT_STACK_AXIS,
            min_slice_voxels: SSIM_MIN_SLICE_VOXELS,
        }
    }
}

/// 单个受试者的全部输入. 掩膜可以定义在各自的网格上.
#[derive(Debug, Clone)]
pub struct SubjectInputs {
    /// 原始扫描.
    pub raw: Volume,

    /// 候选 (去脸后) 扫描. 所有计算都在它的网格上进行.
    pub candidate: Volume,

    /// 去脸工具输出的保留区域.
    pub kept: BinaryMask,

    /// 外部模型预测的应移除区域.
    pub predicted: BinaryMask,
}

/// 单个受试者的验证结果.
#[derive(Debug, Copy, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MetricResult {
    /// 容差下的 Surface DSC.
    pub surface_dsc: f64,

    /// HD95, 毫米. 可能为 `+inf`.
    pub hd95_mm: f64,

    /// 去脸区域内的 SSIM.
    pub ssim: f64,

    /// 去脸区域内的 PSNR, dB. 可能为 `+inf`.
    pub psnr_db: f64,

    /// 两个裁剪后移除区域的体积 Dice. 仅供参考, 不参与判定.
    pub volume_dsc: f64,

    /// 裁剪后预测移除区域的体素数.
    pub predicted_voxel_count: usize,

    /// 裁剪后工具移除区域的体素数.
    pub tool_voxel_count: usize,

    /// 逐项判定.
    pub verdict: Verdict,

    /// 是否通过.
    pub passed: bool,
}

/// 验证流水线.
#[derive(Debug, Copy, Clone, Default)]
pub struct VerificationPipeline {
    config: PipelineConfig,
    targets: VerificationTargets,
}

impl VerificationPipeline {
    /// 以给定参数和目标创建.
    pub fn new(config: PipelineConfig, targets: VerificationTargets) -> Self {
        Self { config, targets }
    }

    /// 数值参数.
    #[inline]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// 判定目标.
    #[inline]
    pub fn targets(&self) -> &VerificationTargets {
        &self.targets
    }

    /// 对单个受试者运行全部步骤.
    ///
    /// # 返回值
    ///
    /// 参数不合法时返回 [`VerifyError::InvalidConfig`].
    /// 原始扫描与候选扫描形状不同, 或掩膜无法对齐时返回 [`VerifyError::MalformedGeometry`].
    /// 数值退化从不报错.
    pub fn run<F>(&self, inputs: &SubjectInputs, foreground: &F) -> VerifyResult<MetricResult>
    where
        F: ForegroundExtractor + ?Sized,
    {
        let cfg = &self.config;
        cfg.validate()?;
        let SubjectInputs {
            raw,
            candidate,
            kept,
            predicted,
        } = inputs;

        tracing::debug!(stage = %Stage::LoadInputs, shape = ?candidate.shape(), spacing = ?candidate.spacing());
        if raw.shape() != candidate.shape() {
            return Err(VerifyError::geometry(format!(
                "raw scan shape {:?} differs from candidate shape {:?}",
                raw.shape(),
                candidate.shape()
            )));
        }

        tracing::debug!(stage = %Stage::ResampleMasks);
        let kept = resample_to(kept, candidate)?;
        let predicted = resample_to(predicted, candidate)?;

        tracing::debug!(stage = %Stage::ComputeForeground);
        let fg = resample_to(&foreground.extract(candidate), candidate)?;

        tracing::debug!(stage = %Stage::ComputeRegions, foreground = fg.count());
        let tool_removed = fg.and_not(&kept);

        tracing::debug!(stage = %Stage::ComputeRoiAndClip);
        let roi = RoiBuilder::new(cfg.margin_mm).build(&predicted.or(&tool_removed));
        let clip = roi.and(&fg);
        let pred_clip = predicted.and(&clip);
        let tool_clip = tool_removed.and(&clip);

        let (pred_n, tool_n) = (pred_clip.count(), tool_clip.count());
        tracing::debug!(stage = %Stage::ComputeSurfaceMetrics, predicted = pred_n, tool = tool_n);
        let cmp = SurfaceComparison::new(&pred_clip, &tool_clip, candidate.spacing());
        let surface_dsc = cmp.surface_dsc(cfg.tolerance_mm);
        let hd95_mm = cmp.hd95();
        let volume_dsc = volume_dsc(&pred_clip, &tool_clip);

        tracing::debug!(stage = %Stage::NormalizeIntensities);
        let norm = normalize_pair(raw, candidate, &fg);

        tracing::debug!(stage = %Stage::ComputeSimilarityMetrics);
        let ssim = SliceSsim {
            stack_axis: cfg.stack_axis,
            min_slice_voxels: cfg.min_slice_voxels,
        }
        .compute(&norm.raw, &norm.candidate, &tool_clip);
        let psnr_db = masked_psnr(&norm.raw, &norm.candidate, &tool_clip, norm.peak);

        tracing::debug!(stage = %Stage::Gate);
        let verdict = self.targets.judge(surface_dsc, hd95_mm, ssim, psnr_db);

        tracing::debug!(stage = %Stage::Emit);
        let result = MetricResult {
            surface_dsc,
            hd95_mm,
            ssim,
            psnr_db,
            volume_dsc,
            predicted_voxel_count: pred_n,
            tool_voxel_count: tool_n,
            verdict,
            passed: verdict.passed(),
        };
        tracing::info!(
            surface_dsc = result.surface_dsc,
            hd95_mm = result.hd95_mm,
            ssim = result.ssim,
            psnr_db = result.psnr_db,
            passed = result.passed,
            "verification metrics"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foreground::HeuristicForeground;
    use crate::Affine;
    use ndarray::Array3;

    struct Everything;

    impl ForegroundExtractor for Everything {
        fn extract(&self, candidate: &Volume) -> BinaryMask {
            BinaryMask::on_grid_of(candidate, Array3::from_elem(candidate.shape(), true))
        }
    }

    fn volume(shape: (usize, usize, usize)) -> Volume {
        Volume::new(
            Array3::from_shape_fn(shape, |(i, j, k)| ((i * 7 + j * 3 + k) % 11) as f32),
            Affine::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_shape_mismatch_is_malformed() {
        let raw = volume((4, 4, 4));
        let candidate = volume((4, 4, 5));
        let inputs = SubjectInputs {
            kept: BinaryMask::empty_like(&candidate),
            predicted: BinaryMask::empty_like(&candidate),
            raw,
            candidate,
        };
        let err = VerificationPipeline::default()
            .run(&inputs, &Everything)
            .unwrap_err();
        assert!(matches!(err, VerifyError::MalformedGeometry(_)));
    }

    #[test]
    fn test_nothing_removed() {
        // 工具保留了全部前景, 模型也没有预测任何移除区域.
        let candidate = volume((8, 8, 8));
        let inputs = SubjectInputs {
            raw: candidate.clone(),
            kept: BinaryMask::on_grid_of(&candidate, Array3::from_elem((8, 8, 8), true)),
            predicted: BinaryMask::empty_like(&candidate),
            candidate,
        };
        let r = VerificationPipeline::default()
            .run(&inputs, &HeuristicForeground::default())
            .unwrap();
        assert_eq!(r.surface_dsc, 1.0);
        assert_eq!(r.hd95_mm, 0.0);
        assert_eq!(r.ssim, 1.0);
        assert!(r.psnr_db.is_infinite());
        assert_eq!(r.tool_voxel_count, 0);
        assert!(!r.passed);
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(Stage::ComputeRoiAndClip.to_string(), "compute-roi-and-clip");
        assert_eq!(PipelineConfig::default().stack_axis, 2);
    }

    #[test]
    fn test_invalid_config_is_error() {
        let candidate = volume((6, 6, 6));
        let inputs = SubjectInputs {
            raw: candidate.clone(),
            kept: BinaryMask::empty_like(&candidate),
            predicted: BinaryMask::empty_like(&candidate),
            candidate,
        };
        assert!(PipelineConfig::default().validate().is_ok());

        for config in [
            PipelineConfig {
                stack_axis: 3,
                ..PipelineConfig::default()
            },
            PipelineConfig {
                margin_mm: f64::NAN,
                ..PipelineConfig::default()
            },
            PipelineConfig {
                tolerance_mm: -1.0,
                ..PipelineConfig::default()
            },
        ] {
            let pipeline = VerificationPipeline::new(config, VerificationTargets::default());
            let err = pipeline.run(&inputs, &Everything).unwrap_err();
            assert!(matches!(err, VerifyError::InvalidConfig(_)), "{err}");
        }
    }
}

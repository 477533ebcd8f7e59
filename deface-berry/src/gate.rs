//! 验证判定.

use crate::consts::target::{HD95_MM_MAX, PSNR_DB_MAX, SSIM_MAX, SURFACE_DSC_MIN};
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// 四项指标的目标阈值. 进程启动时确定, 之后不再修改.
///
/// Surface DSC 越高越好, HD95 越低越好; SSIM 与 PSNR 衡量的是去脸区域内
/// 原始内容被 *保留* 的程度, 因此同样是越低越好.
#[derive(Debug, Copy, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct VerificationTargets {
    /// Surface DSC 下限 (含).
    pub surface_dsc_min: f64,

    /// HD95 上限 (含), 毫米.
    pub hd95_mm_max: f64,

    /// SSIM 上限 (含).
    pub ssim_max: f64,

    /// PSNR 上限 (含), dB.
    pub psnr_db_max: f64,
}

impl VerificationTargets {
    /// 默认目标.
    pub const DEFAULT: Self = Self {
        surface_dsc_min: SURFACE_DSC_MIN,
        hd95_mm_max: HD95_MM_MAX,
        ssim_max: SSIM_MAX,
        psnr_db_max: PSNR_DB_MAX,
    };

    /// 逐项判定.
    ///
    /// 比较均为闭区间. `NaN` 与任何阈值比较都不成立, 因此对应项判定为不通过;
    /// `+inf` 的 HD95 或 PSNR 也同样不通过.
    pub fn judge(&self, surface_dsc: f64, hd95_mm: f64, ssim: f64, psnr_db: f64) -> Verdict {
        Verdict {
            surface_dsc: surface_dsc >= self.surface_dsc_min,
            hd95: hd95_mm <= self.hd95_mm_max,
            ssim: ssim <= self.ssim_max,
            psnr: psnr_db <= self.psnr_db_max,
        }
    }
}

impl Default for VerificationTargets {
    #[inline]
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for VerificationTargets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Surface DSC >= {:.2}, HD95 <= {:.2} mm, SSIM <= {:.2}, PSNR <= {:.2} dB",
            self.surface_dsc_min, self.hd95_mm_max, self.ssim_max, self.psnr_db_max
        )
    }
}

/// 每一项指标是否达标.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Verdict {
    /// Surface DSC 是否达标.
    pub surface_dsc: bool,

    /// HD95 是否达标.
    pub hd95: bool,

    /// SSIM 是否达标.
    pub ssim: bool,

    /// PSNR 是否达标.
    pub psnr: bool,
}

impl Verdict {
    /// 四项全部达标时才算通过.
    #[inline]
    pub fn passed(&self) -> bool {
        self.surface_dsc && self.hd95 && self.ssim && self.psnr
    }
}

/// `PASS` 或 `FAIL`.
#[inline]
pub fn pass_fail(ok: bool) -> &'static str {
    if ok {
        "PASS"
    } else {
        "FAIL"
    }
}

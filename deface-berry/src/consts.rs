//! 通用常量.

/// 默认的验证目标阈值.
pub mod target {
    /// Surface DSC 下限 (含).
    pub const SURFACE_DSC_MIN: f64 = 0.80;

    /// HD95 上限 (含), 单位毫米.
    pub const HD95_MM_MAX: f64 = 30.00;

    /// 去脸区域 SSIM 上限 (含). 越低说明面部结构被破坏得越彻底.
    pub const SSIM_MAX: f64 = 0.80;

    /// 去脸区域 PSNR 上限 (含), 单位 dB.
    pub const PSNR_DB_MAX: f64 = 10.00;
}

/// 表面距离容差, 单位毫米.
pub const SURFACE_TOLERANCE_MM: f64 = 5.0;

/// ROI 膨胀的物理边距, 单位毫米.
pub const ROI_MARGIN_MM: f64 = 30.0;

/// 判定两个仿射矩阵 "相同" 时的绝对容差.
pub const AFFINE_ATOL: f64 = 1e-3;

/// 判定两个仿射矩阵 "相同" 时的相对容差.
pub const AFFINE_RTOL: f64 = 1e-5;

/// 单个切片参与 SSIM 计算所需的最少区域体素数.
pub const SSIM_MIN_SLICE_VOXELS: usize = 25;

/// SSIM 滑动窗口的最大边长.
pub const SSIM_MAX_WINDOW: usize = 7;

/// SSIM 滑动窗口的最小边长.
pub const SSIM_MIN_WINDOW: usize = 3;

/// 标准差低于该值的切片被视为平坦, 不参与 SSIM 计算.
pub const FLAT_PATCH_STD: f64 = 1e-8;

/// SSIM 亮度项常数.
pub const SSIM_K1: f64 = 0.01;

/// SSIM 对比度项常数.
pub const SSIM_K2: f64 = 0.03;

/// 默认的切片堆叠轴 (与二维采集平面正交的轴).
pub const DEFAULT_STACK_AXIS: usize = 2;

/// 启发式前景提取所用的灰度分位数 (百分比).
pub const FOREGROUND_PERCENTILE: f64 = 5.0;

/// 灰度归一化的下分位数 (百分比).
pub const NORM_LOW_PERCENTILE: f64 = 1.0;

/// 灰度归一化的上分位数 (百分比).
pub const NORM_HIGH_PERCENTILE: f64 = 99.0;

/// HD95 使用的分位数 (百分比).
pub const HD_PERCENTILE: f64 = 95.0;

#![warn(missing_docs)] // <= 合适时移除它.
// #![warn(clippy::missing_docs_in_private_items)]  // <= too strict.

//! 核心库. 对 3D 医学影像 (CT/MR) 的去脸 (defacing) 结果进行几何与灰度两方面的量化验证.
//!
//! 给定原始扫描, 去脸后的扫描, 去脸工具自己输出的 "保留区域" 掩膜,
//! 以及外部分割模型预测的 "应当移除区域" 掩膜, 该 crate 计算
//! Surface DSC, HD95, 区域 SSIM, 区域 PSNR 四个指标, 并按固定目标给出 PASS/FAIL.
//!
//! 该 crate 目前仅提供 `safe` 接口.
//!
//! # 注意
//!
//! 1. 指标引擎本身与文件格式无关, 只消费已加载的三维数组、仿射矩阵和掩膜.
//!   nii 文件的读取由 [`nii`] 模块负责, 外部进程 (格式转换、分割模型)
//!   由 [`collab`] 模块负责.
//! 2. 空掩膜、零方差切片、零动态范围等数值退化情况 **从不** 报错,
//!   而是返回约定的哨兵值 (1.0, 0.0 或 +inf).
//! 3. 所有体素索引按照 nii 原始轴顺序 `(i, j, k)` 存储, 与仿射矩阵的列一一对应.
//!
//! # 开发计划
//!
//! ### 掩膜重采样 ✅
//!
//! 网格或仿射不一致时做最近邻重采样, 一致时原样返回.
//!
//! 实现位于 `deface-berry/src/resample.rs`.
//!
//! ### 三维形态学操作 ✅
//!
//! 6-邻域腐蚀/膨胀, 26-邻域最大连通分量, 空洞填充, 以及按物理距离膨胀的 ROI.
//!
//! 实现位于 `deface-berry/src/morph_3d`.
//!
//! ### 前景提取 ✅
//!
//! 外部分割模型优先, 失败时退化为 "5% 分位数阈值 + 最大连通分量 + 填洞".
//!
//! 实现位于 `deface-berry/src/foreground.rs`.
//!
//! ### 灰度归一化 ✅
//!
//! 以前景内原始扫描的 1%/99% 分位数联合缩放两幅图像到 \[0, 1\].
//!
//! 实现位于 `deface-berry/src/normalize.rs`.
//!
//! ### 表面指标 ✅
//!
//! 各向异性精确欧氏距离变换, Surface DSC 和 HD95.
//!
//! 实现位于 `deface-berry/src/metrics/surface.rs`.
//!
//! ### 区域相似度指标 ✅
//!
//! 逐切片裁剪的掩膜 SSIM, 三维掩膜 PSNR.
//!
//! 实现位于 `deface-berry/src/metrics/similarity.rs`.
//!
//! ### 判定与流水线 ✅
//!
//! 实现位于 `deface-berry/src/gate.rs` 和 `deface-berry/src/pipeline.rs`.
//!
//! ### 外部组件适配 ✅
//!
//! nnU-Net 推理进程 (带超时), dcm2niix 转换进程.
//!
//! 实现位于 `deface-berry/src/collab`.

/// 二维索引, 同时也可一定程度上用作非负整数向量.
pub type Idx2d = (usize, usize);

/// 三维索引, 同时也可一定程度上用作非负整数向量.
pub type Idx3d = (usize, usize, usize);

/// 三个轴向的体素间距, 以毫米为单位.
pub type Spacing = [f64; 3];

/// 三维数据基础结构: 仿射, 图像, 掩膜.
mod data;

pub use data::{Affine, BinaryMask, GridAttr, Volume};

pub mod consts;

mod error;

pub use error::{VerifyError, VerifyResult};

pub mod morph_3d;

pub mod resample;

pub mod foreground;

pub mod normalize;

pub mod metrics;

pub mod gate;

pub mod pipeline;

pub mod collab;

pub mod nii;

pub mod prelude;

//! 🍇欢迎光临🍓
//!
//! 涵盖了本 crate 一系列常用的功能.

pub use crate::{Idx2d, Idx3d, Spacing};

pub use crate::{Affine, BinaryMask, GridAttr, Volume};
pub use crate::{VerifyError, VerifyResult};

pub use crate::consts::target::{HD95_MM_MAX, PSNR_DB_MAX, SSIM_MAX, SURFACE_DSC_MIN};

pub use crate::foreground::{ForegroundExtractor, HeuristicForeground, Segmenter, SegmentedForeground};
pub use crate::gate::{pass_fail, VerificationTargets, Verdict};
pub use crate::metrics::{hd95, masked_psnr, masked_ssim, surface_dsc, volume_dsc};
pub use crate::morph_3d::RoiBuilder;
pub use crate::normalize::{normalize_pair, IntensityWindow};
pub use crate::pipeline::{MetricResult, PipelineConfig, SubjectInputs, VerificationPipeline};
pub use crate::resample::resample_to;

pub use crate::collab::{Dcm2Niix, NnUnet, NnUnetConfig, NnUnetSegmenter};
pub use crate::nii::{read_mask, read_volume};

//! 验证指标.
//!
//! - 几何: [`surface`] 中的 Surface DSC, HD95, 以及这里的体积 Dice;
//! - 灰度: [`similarity`] 中的掩膜 SSIM, 掩膜 PSNR.
//!
//! 所有函数都是纯函数. 数值退化时返回约定的哨兵值, 从不报错.

use crate::BinaryMask;

pub mod similarity;
pub mod surface;

pub use similarity::{masked_psnr, masked_ssim, SliceSsim};
pub use surface::{hd95, surface_dsc, SurfaceComparison, SurfaceSet};

/// 体积 Dice 系数 `2|A∩B| / (|A|+|B|)`. 两者都为空时返回 1.0.
///
/// # 注意
///
/// 两者形状必须一致, 否则程序 panic.
pub fn volume_dsc(a: &BinaryMask, b: &BinaryMask) -> f64 {
    let (na, nb) = (a.count(), b.count());
    if na + nb == 0 {
        return 1.0;
    }
    2.0 * a.and(b).count() as f64 / (na + nb) as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Affine;
    use ndarray::Array3;

    #[test]
    fn test_volume_dsc() {
        let a = BinaryMask::new(
            Array3::from_shape_fn((4, 4, 4), |(i, _, _)| i < 2),
            Affine::default(),
        )
        .unwrap();
        let b = BinaryMask::new(
            Array3::from_shape_fn((4, 4, 4), |(i, _, _)| i >= 1 && i < 3),
            Affine::default(),
        )
        .unwrap();
        assert_eq!(volume_dsc(&a, &a), 1.0);
        assert_eq!(volume_dsc(&a, &b), 0.5);
        let e = BinaryMask::empty_like(&a);
        assert_eq!(volume_dsc(&e, &e), 1.0);
        assert_eq!(volume_dsc(&a, &e), 0.0);
    }
}

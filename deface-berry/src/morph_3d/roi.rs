use crate::{BinaryMask, GridAttr, Spacing};

/// 按照给定的毫米边距, 计算 6-邻域膨胀次数.
///
/// 每个轴向需要 `max(1, ceil(margin / spacing))` 次, 最终取三轴中的最大值,
/// 因此在各向异性网格上, 较细的轴向会向外多扩展一些. 这保证了 ROI 在每个
/// 轴向上的物理边距都不小于 `margin_mm`.
pub fn dilation_iterations(margin_mm: f64, spacing: Spacing) -> usize {
    spacing
        .iter()
        .map(|s| ((margin_mm / s).ceil() as usize).max(1))
        .max()
        .unwrap_or(1)
}

/// 围绕锚点区域构建感兴趣区域 (ROI).
#[derive(Debug, Copy, Clone)]
pub struct RoiBuilder {
    margin_mm: f64,
}

impl RoiBuilder {
    /// # 注意
    ///
    /// `margin_mm` 必须是有限的非负数, 否则程序 panic.
    pub fn new(margin_mm: f64) -> Self {
        assert!(margin_mm.is_finite() && margin_mm >= 0.0, "ROI 边距非法: {margin_mm}");
        Self { margin_mm }
    }

    /// ROI 物理边距.
    #[inline]
    pub fn margin_mm(&self) -> f64 {
        self.margin_mm
    }

    /// 将 `anchor` 膨胀得到 ROI. 结果总是 `anchor` 的超集, 锚点为空时 ROI 也为空.
    pub fn build(&self, anchor: &BinaryMask) -> BinaryMask {
        anchor.dilate(dilation_iterations(self.margin_mm, anchor.spacing()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Affine;
    use ndarray::Array3;

    #[test]
    fn test_iterations() {
        assert_eq!(dilation_iterations(30.0, [1.0, 1.0, 1.0]), 30);
        assert_eq!(dilation_iterations(30.0, [1.0, 1.0, 3.0]), 30);
        assert_eq!(dilation_iterations(30.0, [0.5, 2.0, 2.0]), 60);
        assert_eq!(dilation_iterations(5.0, [2.0, 2.0, 2.0]), 3);
        // 至少一次.
        assert_eq!(dilation_iterations(0.0, [1.0, 1.0, 1.0]), 1);
        assert_eq!(dilation_iterations(1.0, [4.0, 4.0, 4.0]), 1);
    }

    #[test]
    fn test_roi_is_superset() {
        let mut data = Array3::from_elem((12, 12, 12), false);
        data[(2, 3, 4)] = true;
        data[(9, 9, 9)] = true;
        let anchor = BinaryMask::new(data, Affine::from_spacing([2.0, 2.0, 2.0])).unwrap();
        let roi = RoiBuilder::new(4.0).build(&anchor);
        assert!(roi.contains(&anchor));
        assert!(roi[(2, 3, 6)]);
        assert!(roi[(4, 3, 4)]);
        assert!(!roi[(2, 3, 7)]);

        let empty = BinaryMask::empty_like(&anchor);
        assert!(RoiBuilder::new(30.0).build(&empty).is_empty());
    }
}

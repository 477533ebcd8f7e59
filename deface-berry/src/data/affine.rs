use crate::consts::{AFFINE_ATOL, AFFINE_RTOL};
use crate::Spacing;
use nalgebra::{Matrix4, Vector4};

/// 体素索引到物理空间 (毫米) 的 4x4 齐次仿射矩阵.
///
/// 该结构是只读的. 若要修改矩阵, 你应该创建新的实例.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Affine(Matrix4<f64>);

impl Default for Affine {
    /// 单位矩阵, 即 1 毫米各向同性、原点在 0 的网格.
    #[inline]
    fn default() -> Self {
        Self(Matrix4::identity())
    }
}

impl Affine {
    /// 直接由矩阵构建.
    #[inline]
    pub const fn new(m: Matrix4<f64>) -> Self {
        Self(m)
    }

    /// 由按行存储的 4x4 数组构建.
    pub fn from_rows(rows: [[f64; 4]; 4]) -> Self {
        Self(Matrix4::from_fn(|r, c| rows[r][c]))
    }

    /// 构建轴对齐、原点在 0、体素间距为 `spacing` 的仿射矩阵.
    pub fn from_spacing([si, sj, sk]: Spacing) -> Self {
        Self(Matrix4::from_diagonal(&Vector4::new(si, sj, sk, 1.0)))
    }

    /// 获取底层矩阵.
    #[inline]
    pub fn matrix(&self) -> &Matrix4<f64> {
        &self.0
    }

    /// 获取三个轴向的体素间距 (毫米), 即左上 3x3 块各列的欧氏范数.
    pub fn spacing(&self) -> Spacing {
        [0, 1, 2].map(|c| (0..3).map(|r| self.0[(r, c)].powi(2)).sum::<f64>().sqrt())
    }

    /// 按照 `allclose` 语义逐元素比较两个仿射矩阵:
    /// `|a - b| <= atol + rtol * |b|`.
    pub fn approx_eq(&self, other: &Affine) -> bool {
        self.0
            .iter()
            .zip(other.0.iter())
            .all(|(a, b)| (a - b).abs() <= AFFINE_ATOL + AFFINE_RTOL * b.abs())
    }

    /// 求逆. 矩阵奇异时返回 `None`.
    #[inline]
    pub fn try_inverse(&self) -> Option<Affine> {
        self.0.try_inverse().map(Self)
    }

    /// 将 (可能为小数的) 体素坐标映射到物理坐标.
    pub fn apply(&self, [i, j, k]: [f64; 3]) -> [f64; 3] {
        let v = self.0 * Vector4::new(i, j, k, 1.0);
        [v.x, v.y, v.z]
    }

    /// 复合: 先做 `rhs` 再做 `self`.
    #[inline]
    pub fn then_from(&self, rhs: &Affine) -> Affine {
        Self(self.0 * rhs.0)
    }
}

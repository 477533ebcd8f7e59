use std::ops::{Index, IndexMut};

use itertools::Itertools;
use ndarray::{Array3, ArrayBase, ArrayView3, ArrayViewMut3, Data, Ix3, Zip};

use crate::{Idx3d, Spacing, VerifyError, VerifyResult};

mod affine;

pub use affine::Affine;

/// 三维网格 (图像或掩膜) 的共用属性和部分通用操作.
pub trait GridAttr {
    /// 获取仿射矩阵.
    fn affine(&self) -> &Affine;

    /// 获取数据形状大小, 按 `(i, j, k)` 顺序.
    fn shape(&self) -> Idx3d;

    /// 获取三个轴向的体素间距, 以毫米为单位.
    #[inline]
    fn spacing(&self) -> Spacing {
        self.affine().spacing()
    }

    /// 获取数据体素个数.
    #[inline]
    fn size(&self) -> usize {
        let (i, j, k) = self.shape();
        i * j * k
    }

    /// 检查索引是否合法.
    #[inline]
    fn check(&self, (i0, j0, k0): &Idx3d) -> bool {
        let (i, j, k) = self.shape();
        *i0 < i && *j0 < j && *k0 < k
    }

    /// 获取体素的实际体积值, 以立方毫米为单位.
    #[inline]
    fn voxel(&self) -> f64 {
        self.spacing().iter().product()
    }

    /// 体素分辨率在三个维度上是否是各向同的?
    #[inline]
    fn is_isotropic(&self) -> bool {
        let [i, j, k] = self.spacing();
        i == j && i == k
    }

    /// 两者是否定义在同一个网格上 (形状相同, 仿射在容差内相同)?
    #[inline]
    fn same_grid<G: GridAttr>(&self, other: &G) -> bool
    where
        Self: Sized,
    {
        self.shape() == other.shape() && self.affine().approx_eq(other.affine())
    }
}

/// 检查体素间距是否严格为正且有限.
fn check_spacing(affine: &Affine) -> VerifyResult<()> {
    let sp = affine.spacing();
    if sp.iter().all(|s| s.is_finite() && *s > 0.0) {
        Ok(())
    } else {
        Err(VerifyError::geometry(format!("invalid voxel spacing {sp:?}")))
    }
}

#[inline]
fn shape_of<S: Data>(data: &ArrayBase<S, Ix3>) -> Idx3d {
    data.dim()
}

/// 三维体数据 (扫描), 包括仿射矩阵和体素值. 体素值以 `f32` 保存.
#[derive(Debug, Clone)]
pub struct Volume {
    affine: Affine,
    data: Array3<f32>,
}

impl GridAttr for Volume {
    #[inline]
    fn affine(&self) -> &Affine {
        &self.affine
    }

    #[inline]
    fn shape(&self) -> Idx3d {
        shape_of(&self.data)
    }
}

impl Index<Idx3d> for Volume {
    type Output = f32;

    #[inline]
    fn index(&self, index: Idx3d) -> &Self::Output {
        &self.data[index]
    }
}

impl IndexMut<Idx3d> for Volume {
    #[inline]
    fn index_mut(&mut self, index: Idx3d) -> &mut Self::Output {
        &mut self.data[index]
    }
}

impl Volume {
    /// 由体素数组和仿射矩阵创建体数据. 若体素间距不合法, 则返回 `Err`.
    pub fn new(data: Array3<f32>, affine: Affine) -> VerifyResult<Self> {
        check_spacing(&affine)?;
        Ok(Self { affine, data })
    }

    /// 在相同网格上, 以 `data` 替换体素值.
    ///
    /// 如果 `data` 形状与 `self` 不符, 则程序 panic.
    pub fn with_data(&self, data: Array3<f32>) -> Self {
        assert_eq!(self.shape(), shape_of(&data), "体素数组形状不符");
        Self {
            affine: self.affine,
            data,
        }
    }

    /// 获得数据的一份不可变 shallow copy.
    #[inline]
    pub fn data(&self) -> ArrayView3<'_, f32> {
        self.data.view()
    }

    /// 获得数据的一份可变 shallow copy.
    #[inline]
    pub fn data_mut(&mut self) -> ArrayViewMut3<'_, f32> {
        self.data.view_mut()
    }

    /// 直接获得底层数据.
    #[inline]
    pub fn into_raw(self) -> Array3<f32> {
        self.data
    }

    /// 收集 `mask` 内所有体素值 (以 `f64` 表示). 顺序为数组的逻辑行优先顺序.
    ///
    /// 如果 `mask` 形状与 `self` 不符, 则程序 panic.
    pub fn values_in(&self, mask: &BinaryMask) -> Vec<f64> {
        assert_eq!(self.shape(), mask.shape(), "掩膜与扫描形状不一致");
        self.data
            .iter()
            .zip(mask.data.iter())
            .filter_map(|(v, m)| m.then_some(*v as f64))
            .collect()
    }

    /// 收集所有体素值 (以 `f64` 表示).
    pub fn values(&self) -> Vec<f64> {
        self.data.iter().map(|v| *v as f64).collect()
    }
}

/// 定义在某个网格上的二值掩膜. `true` 代表前景.
#[derive(Debug, Clone)]
pub struct BinaryMask {
    affine: Affine,
    data: Array3<bool>,
}

impl GridAttr for BinaryMask {
    #[inline]
    fn affine(&self) -> &Affine {
        &self.affine
    }

    #[inline]
    fn shape(&self) -> Idx3d {
        shape_of(&self.data)
    }
}

impl Index<Idx3d> for BinaryMask {
    type Output = bool;

    #[inline]
    fn index(&self, index: Idx3d) -> &Self::Output {
        &self.data[index]
    }
}

impl IndexMut<Idx3d> for BinaryMask {
    #[inline]
    fn index_mut(&mut self, index: Idx3d) -> &mut Self::Output {
        &mut self.data[index]
    }
}

impl BinaryMask {
    /// 由布尔数组和仿射矩阵创建掩膜. 若体素间距不合法, 则返回 `Err`.
    pub fn new(data: Array3<bool>, affine: Affine) -> VerifyResult<Self> {
        check_spacing(&affine)?;
        Ok(Self { affine, data })
    }

    /// 在 `grid` 的网格上创建掩膜, 内容为 `data`.
    ///
    /// 如果 `data` 形状与 `grid` 不符, 则程序 panic.
    pub fn on_grid_of<G: GridAttr>(grid: &G, data: Array3<bool>) -> Self {
        assert_eq!(grid.shape(), shape_of(&data), "掩膜与网格形状不一致");
        Self {
            affine: *grid.affine(),
            data,
        }
    }

    /// 在 `grid` 的网格上创建全背景掩膜.
    pub fn empty_like<G: GridAttr>(grid: &G) -> Self {
        Self {
            affine: *grid.affine(),
            data: Array3::from_elem(grid.shape(), false),
        }
    }

    /// 对任意数值数组以 `value > threshold` 规则二值化.
    pub fn from_values<S, A>(values: &ArrayBase<S, Ix3>, affine: Affine, threshold: f64) -> VerifyResult<Self>
    where
        S: Data<Elem = A>,
        A: Copy + Into<f64>,
    {
        Self::new(values.map(|v| Into::<f64>::into(*v) > threshold), affine)
    }

    /// 获得数据的一份不可变 shallow copy.
    #[inline]
    pub fn data(&self) -> ArrayView3<'_, bool> {
        self.data.view()
    }

    /// 获得数据的一份可变 shallow copy.
    #[inline]
    pub fn data_mut(&mut self) -> ArrayViewMut3<'_, bool> {
        self.data.view_mut()
    }

    /// 直接获得底层数据.
    #[inline]
    pub fn into_raw(self) -> Array3<bool> {
        self.data
    }

    /// 前景体素个数.
    #[inline]
    pub fn count(&self) -> usize {
        self.data.iter().filter(|p| **p).count()
    }

    /// 是否不含任何前景体素?
    #[inline]
    pub fn is_empty(&self) -> bool {
        !self.data.iter().any(|p| *p)
    }

    /// 是否整个网格都是前景?
    #[inline]
    pub fn is_full(&self) -> bool {
        self.data.iter().all(|p| *p)
    }

    /// 收集所有前景体素对应的下标. 结果按行优先存储.
    pub fn positions(&self) -> Vec<Idx3d> {
        self.data
            .indexed_iter()
            .filter_map(|(pos, p)| p.then_some(pos))
            .collect()
    }

    /// 前景的紧致包围盒 `(最小角, 最大角)`, 两端均包含. 全背景时返回 `None`.
    pub fn bounding_box(&self) -> Option<(Idx3d, Idx3d)> {
        let pos = self.positions();
        let (i0, i1) = pos.iter().map(|p| p.0).minmax().into_option()?;
        let (j0, j1) = pos.iter().map(|p| p.1).minmax().into_option()?;
        let (k0, k1) = pos.iter().map(|p| p.2).minmax().into_option()?;
        Some(((i0, j0, k0), (i1, j1, k1)))
    }

    /// 逐体素组合两个掩膜.
    ///
    /// 如果两者形状不一致, 则程序 panic.
    fn zip_with(&self, other: &BinaryMask, op: impl Fn(bool, bool) -> bool) -> BinaryMask {
        assert_eq!(self.shape(), other.shape(), "掩膜形状不一致");
        let data = Zip::from(&self.data)
            .and(&other.data)
            .map_collect(|&a, &b| op(a, b));
        Self {
            affine: self.affine,
            data,
        }
    }

    /// 交集 `self ∩ other`.
    #[inline]
    pub fn and(&self, other: &BinaryMask) -> BinaryMask {
        self.zip_with(other, |a, b| a && b)
    }

    /// 并集 `self ∪ other`.
    #[inline]
    pub fn or(&self, other: &BinaryMask) -> BinaryMask {
        self.zip_with(other, |a, b| a || b)
    }

    /// 差集 `self \ other`.
    #[inline]
    pub fn and_not(&self, other: &BinaryMask) -> BinaryMask {
        self.zip_with(other, |a, b| a && !b)
    }

    /// `self` 是否包含 `other` 的所有前景体素?
    pub fn contains(&self, other: &BinaryMask) -> bool {
        assert_eq!(self.shape(), other.shape(), "掩膜形状不一致");
        self.data.iter().zip(other.data.iter()).all(|(a, b)| *a || !*b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn cube_mask(n: usize, from: usize, to: usize) -> BinaryMask {
        let data = Array3::from_shape_fn((n, n, n), |(i, j, k)| {
            (from..to).contains(&i) && (from..to).contains(&j) && (from..to).contains(&k)
        });
        BinaryMask::new(data, Affine::default()).unwrap()
    }

    #[test]
    fn test_invalid_spacing_rejected() {
        let data = Array3::<f32>::zeros((2, 2, 2));
        let err = Volume::new(data, Affine::from_spacing([1.0, 0.0, 1.0])).unwrap_err();
        assert!(matches!(err, VerifyError::MalformedGeometry(_)));
    }

    #[test]
    fn test_mask_algebra() {
        let a = cube_mask(6, 0, 3);
        let b = cube_mask(6, 2, 5);
        assert_eq!(a.count(), 27);
        assert_eq!(a.and(&b).count(), 1);
        assert_eq!(a.or(&b).count(), 27 + 27 - 1);
        assert_eq!(a.and_not(&b).count(), 26);
        assert!(a.or(&b).contains(&a));
        assert!(!a.contains(&b));
        assert_eq!(b.bounding_box(), Some(((2, 2, 2), (4, 4, 4))));
        assert_eq!(BinaryMask::empty_like(&a).bounding_box(), None);
    }

    #[test]
    fn test_values_in_mask() {
        let data = Array3::from_shape_fn((2, 2, 2), |(i, j, k)| (i * 4 + j * 2 + k) as f32);
        let v = Volume::new(data, Affine::default()).unwrap();
        let mut m = BinaryMask::empty_like(&v);
        m[(1, 1, 1)] = true;
        m[(0, 0, 1)] = true;
        assert_eq!(v.values_in(&m), vec![1.0, 7.0]);
        assert!(v.same_grid(&m));
    }
}

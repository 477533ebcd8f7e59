//! 表面指标: Surface DSC 与 HD95.
//!
//! 距离变换使用可分离的下包络 (lower envelope) 算法, 按轴依次处理,
//! 每一轴都乘上该轴的物理间距, 因此在各向异性网格上也是精确的欧氏距离.

use crate::consts::HD_PERCENTILE;
use crate::normalize::percentile;
use crate::{BinaryMask, GridAttr, Idx3d, Spacing};
use ndarray::{Array3, ArrayViewMut1, Axis, Zip};

/// 掩膜的表面体素集合, 即掩膜减去其 6-邻域单步腐蚀.
#[derive(Debug, Clone)]
pub struct SurfaceSet {
    surface: BinaryMask,
    positions: Vec<Idx3d>,
}

impl SurfaceSet {
    /// 提取 `mask` 的表面.
    pub fn of(mask: &BinaryMask) -> Self {
        let surface = mask.surface();
        let positions = surface.positions();
        Self { surface, positions }
    }

    /// 表面体素个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// 表面是否为空?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// 表面体素坐标, 行优先.
    #[inline]
    pub fn positions(&self) -> &[Idx3d] {
        &self.positions
    }

    /// 表面掩膜本身.
    #[inline]
    pub fn as_mask(&self) -> &BinaryMask {
        &self.surface
    }
}

/// 一维平方距离变换: `out[q] = min_p ((q - p) * s)^2 + f[p]`.
///
/// `f` 中非有限值的位置不作为特征点. 没有任何特征点时, 输出全部为 `+inf`.
fn lower_envelope(f: &[f64], s: f64, env: &mut Vec<(usize, f64)>, mut out: ArrayViewMut1<f64>) {
    env.clear();
    for (q, fq) in f.iter().enumerate() {
        if !fq.is_finite() {
            continue;
        }
        let xq = q as f64 * s;
        let mut left = f64::NEG_INFINITY;
        while let Some(&(p, zp)) = env.last() {
            let xp = p as f64 * s;
            let sect = ((fq + xq * xq) - (f[p] + xp * xp)) / (2.0 * (xq - xp));
            if sect <= zp {
                env.pop();
            } else {
                left = sect;
                break;
            }
        }
        env.push((q, left));
    }

    if env.is_empty() {
        out.fill(f64::INFINITY);
        return;
    }
    let mut k = 0;
    for (q, o) in out.iter_mut().enumerate() {
        let xq = q as f64 * s;
        while k + 1 < env.len() && env[k + 1].1 < xq {
            k += 1;
        }
        let p = env[k].0;
        let d = xq - p as f64 * s;
        *o = d * d + f[p];
    }
}

/// 对 `field` 的每一条沿 `axis` 的线做一维变换.
fn transform_axis(field: &mut Array3<f64>, axis: usize, s: f64) {
    let run = |lane: ArrayViewMut1<f64>| {
        let f = lane.to_vec();
        let mut env = Vec::with_capacity(f.len());
        lower_envelope(&f, s, &mut env, lane);
    };

    cfg_if::cfg_if! {
        if #[cfg(feature = "rayon")] {
            Zip::from(field.lanes_mut(Axis(axis))).par_for_each(run);
        } else {
            Zip::from(field.lanes_mut(Axis(axis))).for_each(run);
        }
    }
}

/// 以 `features` 为特征点集合的精确欧氏距离场 (毫米), 定义在 `[lo, hi]` 包围盒上.
///
/// 所有特征点都必须位于包围盒内.
fn distance_field(features: &[Idx3d], lo: Idx3d, hi: Idx3d, spacing: Spacing) -> Array3<f64> {
    let shape = (hi.0 - lo.0 + 1, hi.1 - lo.1 + 1, hi.2 - lo.2 + 1);
    let mut field = Array3::from_elem(shape, f64::INFINITY);
    for &(i, j, k) in features {
        field[(i - lo.0, j - lo.1, k - lo.2)] = 0.0;
    }
    for (axis, s) in spacing.into_iter().enumerate() {
        transform_axis(&mut field, axis, s);
    }
    field.mapv_inplace(f64::sqrt);
    field
}

/// `from` 的每个表面体素到 `to` 表面的距离. 两者都必须位于包围盒 `[lo, hi]` 内.
fn directed(from: &SurfaceSet, to: &SurfaceSet, (lo, hi): (Idx3d, Idx3d), spacing: Spacing) -> Vec<f64> {
    let field = distance_field(to.positions(), lo, hi, spacing);
    from.positions()
        .iter()
        .map(|&(i, j, k)| field[(i - lo.0, j - lo.1, k - lo.2)])
        .collect()
}

/// 借助 `rayon`, 并行地计算两个方向的距离.
#[cfg(feature = "rayon")]
fn directed_pair(a: &SurfaceSet, b: &SurfaceSet, bbox: (Idx3d, Idx3d), spacing: Spacing) -> (Vec<f64>, Vec<f64>) {
    rayon::join(
        || directed(a, b, bbox, spacing),
        || directed(b, a, bbox, spacing),
    )
}

#[cfg(not(feature = "rayon"))]
fn directed_pair(a: &SurfaceSet, b: &SurfaceSet, bbox: (Idx3d, Idx3d), spacing: Spacing) -> (Vec<f64>, Vec<f64>) {
    (directed(a, b, bbox, spacing), directed(b, a, bbox, spacing))
}

/// 两个表面之间的双向距离.
#[derive(Debug, Clone)]
pub struct SurfaceComparison {
    a_len: usize,
    b_len: usize,

    /// `A` 的每个表面体素到 `B` 表面的距离.
    a_to_b: Vec<f64>,

    /// `B` 的每个表面体素到 `A` 表面的距离.
    b_to_a: Vec<f64>,
}

impl SurfaceComparison {
    /// 计算 `a` 与 `b` 表面之间的双向距离.
    ///
    /// 任意一方表面为空时, 不计算距离.
    ///
    /// # 注意
    ///
    /// `a`, `b` 形状必须一致, 否则程序 panic.
    pub fn new(a: &BinaryMask, b: &BinaryMask, spacing: Spacing) -> Self {
        assert_eq!(a.shape(), b.shape(), "掩膜形状不一致");
        let (sa, sb) = (SurfaceSet::of(a), SurfaceSet::of(b));
        let mut ret = Self {
            a_len: sa.len(),
            b_len: sb.len(),
            a_to_b: Vec::new(),
            b_to_a: Vec::new(),
        };
        if sa.is_empty() || sb.is_empty() {
            return ret;
        }
        let Some((lo, hi)) = sa.as_mask().or(sb.as_mask()).bounding_box() else {
            return ret;
        };

        (ret.a_to_b, ret.b_to_a) = directed_pair(&sa, &sb, (lo, hi), spacing);
        ret
    }

    /// 两个表面的体素个数.
    #[inline]
    pub fn surface_sizes(&self) -> (usize, usize) {
        (self.a_len, self.b_len)
    }

    /// 容差 `tolerance_mm` 下的 Surface DSC.
    ///
    /// # 返回值
    ///
    /// 两表面都为空返回 1.0, 仅一方为空返回 0.0.
    pub fn surface_dsc(&self, tolerance_mm: f64) -> f64 {
        match (self.a_len, self.b_len) {
            (0, 0) => return 1.0,
            (0, _) | (_, 0) => return 0.0,
            _ => (),
        }
        let within = |d: &[f64]| d.iter().filter(|v| **v <= tolerance_mm).count();
        let num = within(&self.a_to_b) + within(&self.b_to_a);
        num as f64 / (self.a_len + self.b_len).max(1) as f64
    }

    /// 双向表面距离合并后的第 95 百分位数 (毫米).
    ///
    /// # 返回值
    ///
    /// 两表面都为空返回 0.0, 仅一方为空返回 `+inf`.
    pub fn hd95(&self) -> f64 {
        match (self.a_len, self.b_len) {
            (0, 0) => return 0.0,
            (0, _) | (_, 0) => return f64::INFINITY,
            _ => (),
        }
        let mut pooled = Vec::with_capacity(self.a_len + self.b_len);
        pooled.extend_from_slice(&self.a_to_b);
        pooled.extend_from_slice(&self.b_to_a);
        percentile(&mut pooled, HD_PERCENTILE).unwrap_or(f64::INFINITY)
    }

    /// 最大表面距离 (Hausdorff 距离). 约定与 [`Self::hd95`] 相同.
    pub fn hausdorff(&self) -> f64 {
        match (self.a_len, self.b_len) {
            (0, 0) => 0.0,
            (0, _) | (_, 0) => f64::INFINITY,
            _ => self
                .a_to_b
                .iter()
                .chain(self.b_to_a.iter())
                .copied()
                .fold(0.0, f64::max),
        }
    }
}

/// 计算 Surface DSC. 见 [`SurfaceComparison::surface_dsc`].
pub fn surface_dsc(a: &BinaryMask, b: &BinaryMask, spacing: Spacing, tolerance_mm: f64) -> f64 {
    SurfaceComparison::new(a, b, spacing).surface_dsc(tolerance_mm)
}

/// 计算 HD95. 见 [`SurfaceComparison::hd95`].
pub fn hd95(a: &BinaryMask, b: &BinaryMask, spacing: Spacing) -> f64 {
    SurfaceComparison::new(a, b, spacing).hd95()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Affine;

    fn f64_eq(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    /// 暴力计算最近表面距离.
    fn brute_force(from: &[Idx3d], to: &[Idx3d], sp: Spacing) -> Vec<f64> {
        from.iter()
            .map(|a| {
                to.iter()
                    .map(|b| {
                        let d = [
                            (a.0 as f64 - b.0 as f64) * sp[0],
                            (a.1 as f64 - b.1 as f64) * sp[1],
                            (a.2 as f64 - b.2 as f64) * sp[2],
                        ];
                        d.iter().map(|x| x * x).sum::<f64>().sqrt()
                    })
                    .fold(f64::INFINITY, f64::min)
            })
            .collect()
    }

    fn mask_from(shape: Idx3d, on: &[Idx3d]) -> BinaryMask {
        let mut m = BinaryMask::new(Array3::from_elem(shape, false), Affine::default()).unwrap();
        for p in on {
            m[*p] = true;
        }
        m
    }

    fn cube(shape: Idx3d, lo: usize, hi: usize) -> BinaryMask {
        let data = Array3::from_shape_fn(shape, |(i, j, k)| {
            (lo..hi).contains(&i) && (lo..hi).contains(&j) && (lo..hi).contains(&k)
        });
        BinaryMask::new(data, Affine::default()).unwrap()
    }

    #[test]
    fn test_identical_cubes() {
        let a = cube((14, 14, 14), 2, 12);
        let c = SurfaceComparison::new(&a, &a, [1.0, 1.0, 1.0]);
        assert_eq!(c.surface_dsc(5.0), 1.0);
        assert_eq!(c.hd95(), 0.0);
        assert_eq!(c.hausdorff(), 0.0);
    }

    #[test]
    fn test_adjacent_voxels() {
        let a = mask_from((11, 11, 11), &[(5, 5, 5)]);
        let b = mask_from((11, 11, 11), &[(5, 5, 6)]);
        assert_eq!(surface_dsc(&a, &b, [1.0, 1.0, 1.0], 5.0), 1.0);
        assert!(f64_eq(hd95(&a, &b, [1.0, 1.0, 1.0]), 1.0));
        // 沿 k 轴间距 3mm.
        assert!(f64_eq(hd95(&a, &b, [1.0, 1.0, 3.0]), 3.0));
    }

    #[test]
    fn test_empty_cases() {
        let e = mask_from((6, 6, 6), &[]);
        let b = cube((6, 6, 6), 1, 4);
        let sp = [1.0, 1.0, 1.0];
        assert_eq!(surface_dsc(&e, &e, sp, 5.0), 1.0);
        assert_eq!(hd95(&e, &e, sp), 0.0);
        assert_eq!(surface_dsc(&e, &b, sp, 5.0), 0.0);
        assert_eq!(surface_dsc(&b, &e, sp, 5.0), 0.0);
        assert!(hd95(&e, &b, sp).is_infinite());

        // 填满网格的掩膜表面为空.
        let full = cube((4, 4, 4), 0, 4);
        let c = SurfaceComparison::new(&full, &full, sp);
        assert_eq!(c.surface_sizes(), (0, 0));
        assert_eq!(c.surface_dsc(5.0), 1.0);
    }

    #[test]
    fn test_far_apart() {
        let a = cube((40, 10, 10), 1, 5);
        let mut b = mask_from((40, 10, 10), &[]);
        for i in 30..34 {
            for j in 1..5 {
                for k in 1..5 {
                    b[(i, j, k)] = true;
                }
            }
        }
        let c = SurfaceComparison::new(&a, &b, [1.0, 1.0, 1.0]);
        assert_eq!(c.surface_dsc(5.0), 0.0);
        let hd = c.hd95();
        assert!((26.0..=29.0 + 1e-9).contains(&hd), "hd95 = {hd}");
        assert!(c.hausdorff() >= hd);
    }

    #[test]
    fn test_edt_matches_brute_force() {
        let a = mask_from((9, 7, 8), &[(1, 1, 1), (1, 2, 1), (7, 5, 6), (4, 0, 3)]);
        let b = mask_from((9, 7, 8), &[(8, 6, 7), (2, 3, 0), (5, 5, 5)]);
        let sp = [0.7, 1.3, 2.5];
        let c = SurfaceComparison::new(&a, &b, sp);
        let expected = brute_force(&a.positions(), &b.positions(), sp);
        for (x, y) in c.a_to_b.iter().zip(expected.iter()) {
            assert!(f64_eq(*x, *y), "{x} != {y}");
        }
        let expected = brute_force(&b.positions(), &a.positions(), sp);
        for (x, y) in c.b_to_a.iter().zip(expected.iter()) {
            assert!(f64_eq(*x, *y), "{x} != {y}");
        }
    }

    #[test]
    fn test_lower_envelope_without_features() {
        let f = [f64::INFINITY; 4];
        let mut out = ndarray::Array1::zeros(4);
        lower_envelope(&f, 1.0, &mut Vec::new(), out.view_mut());
        assert!(out.iter().all(|v| v.is_infinite()));
    }
}

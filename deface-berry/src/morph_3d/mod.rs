//! 3D 形态学操作.
//!
//! 腐蚀、膨胀和空洞填充使用 6-邻域 (面相邻) 结构元,
//! 连通分量使用 26-邻域 (全相邻) 规则.

use self::wavefront::Wavefront;
use crate::{BinaryMask, GridAttr, Idx3d};
use itertools::iproduct;
use ndarray::Array3;
use std::collections::VecDeque;

mod roi;
mod wavefront;

pub use roi::{dilation_iterations, RoiBuilder};

/// 6-邻域偏移量.
const FACE_OFFSETS: [(isize, isize, isize); 6] = [
    (-1, 0, 0),
    (1, 0, 0),
    (0, -1, 0),
    (0, 1, 0),
    (0, 0, -1),
    (0, 0, 1),
];

/// `pos + d`. 结果越界时返回 `None`.
#[inline]
fn offset((i, j, k): Idx3d, (di, dj, dk): (isize, isize, isize), (si, sj, sk): Idx3d) -> Option<Idx3d> {
    let i = i.checked_add_signed(di).filter(|v| *v < si)?;
    let j = j.checked_add_signed(dj).filter(|v| *v < sj)?;
    let k = k.checked_add_signed(dk).filter(|v| *v < sk)?;
    Some((i, j, k))
}

/// 获取 `pos` 前后上下左右六个点的坐标.
///
/// 在网格 `shape` 范围外的坐标会被过滤掉.
#[inline]
pub fn neighbours6(shape: Idx3d, pos: Idx3d) -> impl Iterator<Item = Idx3d> {
    FACE_OFFSETS
        .into_iter()
        .filter_map(move |d| offset(pos, d, shape))
}

/// 获取 `pos` 周围 26 个点的坐标.
///
/// 在网格 `shape` 范围外的坐标会被过滤掉.
#[inline]
pub fn neighbours26(shape: Idx3d, pos: Idx3d) -> impl Iterator<Item = Idx3d> {
    iproduct!(-1isize..=1, -1isize..=1, -1isize..=1)
        .filter(|d| *d != (0, 0, 0))
        .filter_map(move |d| offset(pos, d, shape))
}

/// 判断 `pos` 是否位于网格的六个表面上.
#[inline]
fn is_at_border((i, j, k): Idx3d, (si, sj, sk): Idx3d) -> bool {
    i == 0 || j == 0 || k == 0 || i + 1 == si || j + 1 == sj || k + 1 == sk
}

/// 形态学实现块
impl BinaryMask {
    /// 6-邻域单步腐蚀.
    ///
    /// 网格外的位置被视为前景, 因此填满整个网格的掩膜腐蚀后不变.
    pub fn erode(&self) -> BinaryMask {
        let shape = self.shape();
        let data = self.data();
        let out = Array3::from_shape_fn(shape, |pos| {
            data[pos] && neighbours6(shape, pos).all(|n| data[n])
        });
        BinaryMask::on_grid_of(self, out)
    }

    /// 表面体素集合, 即 `self XOR erode(self)`.
    ///
    /// 结果为空当且仅当 `self` 为空或填满整个网格.
    pub fn surface(&self) -> BinaryMask {
        let shape = self.shape();
        let data = self.data();
        let out = Array3::from_shape_fn(shape, |pos| {
            data[pos] && neighbours6(shape, pos).any(|n| !data[n])
        });
        BinaryMask::on_grid_of(self, out)
    }

    /// 以 6-邻域结构元膨胀 `iterations` 次. 网格外的位置被视为背景.
    ///
    /// 结果等价于网格内到前景的 L1 (曼哈顿) 体素距离不超过 `iterations` 的所有位置.
    pub fn dilate(&self, iterations: usize) -> BinaryMask {
        let shape = self.shape();
        let mut wf = Wavefront::new(self.data().to_owned());
        for pos in self.positions() {
            wf.push_pos(pos);
        }

        for _ in 0..iterations {
            for pos in wf.take_positions() {
                for n in neighbours6(shape, pos) {
                    wf.visit(n);
                }
            }
            if !wf.step() {
                break;
            }
        }
        BinaryMask::on_grid_of(self, wf.into_visited())
    }

    /// 按照 26-相邻规则只保留体素数最多的连通分量. 若有多个同样大的分量,
    /// 保留按行优先扫描时最先遇到的那个. 全背景时返回全背景.
    pub fn largest_component(&self) -> BinaryMask {
        let shape = self.shape();
        let data = self.data();
        let mut labels = Array3::<u32>::zeros(shape);
        let mut bfs_q = VecDeque::with_capacity(64);
        let (mut best, mut best_len) = (0u32, 0usize);
        let mut next_label = 0u32;

        for (pos, &p) in data.indexed_iter() {
            if !p || labels[pos] != 0 {
                continue;
            }
            next_label += 1;
            labels[pos] = next_label;
            bfs_q.push_back(pos);
            let mut this_len = 0usize;

            while let Some(cur) = bfs_q.pop_front() {
                this_len += 1;
                for n in neighbours26(shape, cur) {
                    if data[n] && labels[n] == 0 {
                        labels[n] = next_label;
                        bfs_q.push_back(n);
                    }
                }
            }
            if this_len > best_len {
                (best, best_len) = (next_label, this_len);
            }
        }

        let out = labels.mapv(|l| best != 0 && l == best);
        BinaryMask::on_grid_of(self, out)
    }

    /// 将被前景完全包围的背景空洞填充为前景.
    ///
    /// 背景体素若不能沿 6-邻域路径到达网格表面, 即被视为空洞.
    pub fn fill_holes(&self) -> BinaryMask {
        let shape = self.shape();
        let data = self.data();

        // 前景本身就是障碍.
        let mut wf = Wavefront::new(data.to_owned());
        for (pos, &p) in data.indexed_iter() {
            if !p && is_at_border(pos, shape) {
                wf.visit(pos);
            }
        }
        while wf.step() {
            for pos in wf.take_positions() {
                for n in neighbours6(shape, pos) {
                    wf.visit(n);
                }
            }
        }

        let reached = wf.into_visited();
        let out = Array3::from_shape_fn(shape, |pos| data[pos] || !reached[pos]);
        BinaryMask::on_grid_of(self, out)
    }
}

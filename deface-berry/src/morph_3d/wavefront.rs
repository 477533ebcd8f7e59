use crate::Idx3d;
use ndarray::Array3;
use std::mem;

/// 逐层扩张 (BFS) 所需要维护的数据结构集合.
///
/// `visited` 中为 `true` 的位置不会再次入队. 初始为 `true` 的位置
/// 既可以是种子本身, 也可以是不允许穿越的障碍.
pub struct Wavefront {
    visited: Array3<bool>,
    current: Vec<Idx3d>,
    next: Vec<Idx3d>,
}

impl Wavefront {
    /// 以 `visited` 为初始访问状态创建, 当前层为空.
    pub fn new(visited: Array3<bool>) -> Self {
        Self {
            visited,
            current: Vec::with_capacity(1024),
            next: Vec::with_capacity(1024),
        }
    }

    /// 为当前层添加一个坐标, 不检查访问状态.
    #[inline]
    pub fn push_pos(&mut self, pos: Idx3d) {
        self.current.push(pos);
    }

    /// 获得当前层所有坐标.
    ///
    /// 注意该操作在底层是 move 的, 因此性能开销较小.
    pub fn take_positions(&mut self) -> Vec<Idx3d> {
        let prev_len = self.current.len();
        mem::replace(&mut self.current, Vec::with_capacity(prev_len))
    }

    /// 若 `pos` 尚未访问, 则标记并加入下一层. 返回值指示是否是新位置.
    #[inline]
    pub fn visit(&mut self, pos: Idx3d) -> bool {
        let v = &mut self.visited[pos];
        if *v {
            return false;
        }
        *v = true;
        self.next.push(pos);
        true
    }

    /// 进入下一层. 返回新的当前层是否非空.
    pub fn step(&mut self) -> bool {
        self.current.clear();
        mem::swap(&mut self.current, &mut self.next);
        !self.current.is_empty()
    }

    /// 结束扩张, 取回访问状态.
    #[inline]
    pub fn into_visited(self) -> Array3<bool> {
        self.visited
    }
}

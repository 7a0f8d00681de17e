//! 整数坐标上的隐式 k-d 树, 仅支持最近点距离查询.
//!
//! 所有距离均以整数平方形式比较, 因此结果与穷举扫描完全一致.

use crate::Idx3d;

type Point = [i64; 3];

#[inline]
fn to_point((x, y, z): Idx3d) -> Point {
    [x as i64, y as i64, z as i64]
}

#[inline]
fn squared_distance(a: &Point, b: &Point) -> i64 {
    a.iter().zip(b).map(|(p, q)| (p - q).pow(2)).sum()
}

/// 以切片中点为节点的平衡 k-d 树. 节点的左子树位于 `[..mid]`, 右子树位于 `[mid + 1..]`.
#[derive(Debug, Clone)]
pub struct KdTree {
    points: Vec<Point>,
}

impl KdTree {
    /// 由点集构建 k-d 树. 允许重复点.
    pub fn new<I: IntoIterator<Item = Idx3d>>(points: I) -> Self {
        let mut points: Vec<Point> = points.into_iter().map(to_point).collect();
        build(&mut points, 0);
        Self { points }
    }

    /// 树中点的个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// 树是否为空.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// 查询 `query` 到树中最近点的欧氏距离的平方. 空树返回 `None`.
    pub fn nearest_squared(&self, query: Idx3d) -> Option<i64> {
        if self.points.is_empty() {
            return None;
        }
        let mut best = i64::MAX;
        search(&self.points, 0, &to_point(query), &mut best);
        Some(best)
    }
}

fn build(points: &mut [Point], depth: usize) {
    if points.len() <= 1 {
        return;
    }
    let axis = depth % 3;
    let mid = points.len() / 2;
    points.select_nth_unstable_by_key(mid, |p| p[axis]);
    let (left, right) = points.split_at_mut(mid);
    build(left, depth + 1);
    build(&mut right[1..], depth + 1);
}

fn search(points: &[Point], depth: usize, query: &Point, best: &mut i64) {
    if points.is_empty() {
        return;
    }
    let axis = depth % 3;
    let mid = points.len() / 2;
    let node = &points[mid];

    let d = squared_distance(node, query);
    if d < *best {
        *best = d;
        if d == 0 {
            return;
        }
    }

    let diff = query[axis] - node[axis];
    let (near, far) = if diff < 0 {
        (&points[..mid], &points[mid + 1..])
    } else {
        (&points[mid + 1..], &points[..mid])
    };
    search(near, depth + 1, query, best);
    // 分割面另一侧只有可能更近时才需要继续搜索.
    if diff * diff < *best {
        search(far, depth + 1, query, best);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use itertools::iproduct;

    fn brute_force(points: &[Idx3d], q: Idx3d) -> i64 {
        points
            .iter()
            .map(|p| squared_distance(&to_point(*p), &to_point(q)))
            .min()
            .unwrap()
    }

    /// 固定种子的线性同余发生器, 避免引入随机数依赖.
    fn lcg_points(n: usize, bound: u64, mut seed: u64) -> Vec<Idx3d> {
        let mut next = move || {
            seed = seed
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            ((seed >> 33) % bound) as usize
        };
        (0..n).map(|_| (next(), next(), next())).collect()
    }

    #[test]
    fn test_empty_tree() {
        let tree = KdTree::new(Vec::<Idx3d>::new());
        assert!(tree.is_empty());
        assert_eq!(tree.nearest_squared((1, 2, 3)), None);
    }

    #[test]
    fn test_single_point() {
        let tree = KdTree::new([(2, 2, 2)]);
        assert_eq!(tree.nearest_squared((2, 2, 2)), Some(0));
        assert_eq!(tree.nearest_squared((0, 0, 0)), Some(12));
        assert_eq!(tree.nearest_squared((4, 2, 3)), Some(5));
    }

    #[test]
    fn test_against_brute_force() {
        for seed in [1, 7, 42] {
            let points = lcg_points(200, 24, seed);
            let tree = KdTree::new(points.iter().copied());
            assert_eq!(tree.len(), 200);
            for q in iproduct!((0..24).step_by(3), (0..24).step_by(5), (0..24).step_by(2)) {
                assert_eq!(tree.nearest_squared(q), Some(brute_force(&points, q)));
            }
        }
    }

    #[test]
    fn test_duplicated_points() {
        let points = vec![(1, 1, 1); 9];
        let tree = KdTree::new(points);
        assert_eq!(tree.nearest_squared((1, 1, 4)), Some(9));
    }
}

//! Tag trees (ISO/IEC 15444-1 B.10.2).
//!
//! Both trees are stored level by level, leaves first. Each level remembers
//! the node index visited by the last `reset`, so the decoder can walk from
//! the highest unknown ancestor back down to the leaf one bit at a time.

/// Inclusion-tree marker for a node whose subtree is known to be included.
const INCLUDED: u32 = u32::MAX;

#[derive(Debug, Clone)]
struct TreeLevel<T> {
    width: usize,
    items: Vec<T>,
    index: usize,
}

/// ceil(log2(x)), with 0 for x <= 1.
pub(crate) fn ceil_log2(x: usize) -> u32 {
    if x <= 1 {
        0
    } else {
        usize::BITS - (x - 1).leading_zeros()
    }
}

fn build_levels<T: Clone>(mut width: usize, mut height: usize, init: T) -> Vec<TreeLevel<T>> {
    let count = ceil_log2(width.max(height)) as usize + 1;
    let mut levels = Vec::with_capacity(count);
    for _ in 0..count {
        levels.push(TreeLevel {
            width,
            items: vec![init.clone(); width * height],
            index: 0,
        });
        width = width.div_ceil(2);
        height = height.div_ceil(2);
    }
    levels
}

/// Total number of nodes of a tree covering `width` x `height` leaves.
pub fn node_count(mut width: usize, mut height: usize) -> usize {
    let count = ceil_log2(width.max(height)) as usize + 1;
    let mut total = 0;
    for _ in 0..count {
        total += width * height;
        width = width.div_ceil(2);
        height = height.div_ceil(2);
    }
    total
}

/// Tag tree used for the zero bit-plane counts of a precinct.
#[derive(Debug, Clone)]
pub struct TagTree {
    levels: Vec<TreeLevel<Option<u32>>>,
    current_level: usize,
    value: Option<u32>,
}

impl TagTree {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            levels: build_levels(width, height, None),
            current_level: 0,
            value: None,
        }
    }

    /// Positions the cursor on the lowest known ancestor of leaf `(i, j)`.
    /// The node below it starts from that ancestor's value.
    pub fn reset(&mut self, mut i: usize, mut j: usize) {
        let mut found = None;
        let mut level_index = 0;
        while level_index < self.levels.len() {
            let level = &mut self.levels[level_index];
            let index = i + j * level.width;
            level.index = index;
            if let Some(value) = level.items[index] {
                found = Some(value);
                break;
            }
            i >>= 1;
            j >>= 1;
            level_index += 1;
        }

        self.value = None;
        if found.is_some() && level_index == 0 {
            // Leaf already decoded; the next `next_level` reports it.
            self.current_level = 0;
            return;
        }
        let below = level_index - 1;
        let level = &mut self.levels[below];
        level.items[level.index] = Some(found.unwrap_or(0));
        self.current_level = below;
    }

    pub fn increment_value(&mut self) {
        let level = &mut self.levels[self.current_level];
        if let Some(value) = level.items[level.index].as_mut() {
            *value += 1;
        }
    }

    /// Moves one level towards the leaves. Returns `false` once the leaf
    /// value is final; it is then available through [`TagTree::value`].
    pub fn next_level(&mut self) -> bool {
        let level = &self.levels[self.current_level];
        let value = level.items[level.index];
        if self.current_level == 0 {
            self.value = value;
            return false;
        }
        self.current_level -= 1;
        let level = &mut self.levels[self.current_level];
        level.items[level.index] = value;
        true
    }

    pub fn value(&self) -> Option<u32> {
        self.value
    }
}

/// Tag tree recording the first layer in which each code-block of a
/// precinct contributes data (B.10.4).
#[derive(Debug, Clone)]
pub struct InclusionTree {
    levels: Vec<TreeLevel<u32>>,
    current_level: usize,
}

impl InclusionTree {
    pub fn new(width: usize, height: usize, default_value: u32) -> Self {
        Self {
            levels: build_levels(width, height, default_value),
            current_level: 0,
        }
    }

    /// Returns `false` when the tree already proves leaf `(i, j)` is not
    /// included up to layer `stop_value`, so no bits need to be read.
    pub fn reset(&mut self, mut i: usize, mut j: usize, stop_value: u32) -> bool {
        let mut level_index = 0;
        while level_index < self.levels.len() {
            let level = &mut self.levels[level_index];
            let index = i + j * level.width;
            level.index = index;
            let value = level.items[index];
            if value == INCLUDED {
                break;
            }
            if value > stop_value {
                self.current_level = level_index;
                self.propagate_values();
                return false;
            }
            i >>= 1;
            j >>= 1;
            level_index += 1;
        }
        self.current_level = level_index.saturating_sub(1);
        true
    }

    pub fn increment_value(&mut self, stop_value: u32) {
        let level = &mut self.levels[self.current_level];
        level.items[level.index] = stop_value + 1;
        self.propagate_values();
    }

    fn propagate_values(&mut self) {
        let level = &self.levels[self.current_level];
        let value = level.items[level.index];
        for level in self.levels[..self.current_level].iter_mut() {
            level.items[level.index] = value;
        }
    }

    /// Marks the current node as included and moves towards the leaves.
    /// Returns `false` when the leaf itself was reached.
    pub fn next_level(&mut self) -> bool {
        let level = &mut self.levels[self.current_level];
        let value = level.items[level.index];
        level.items[level.index] = INCLUDED;
        if self.current_level == 0 {
            return false;
        }
        self.current_level -= 1;
        let level = &mut self.levels[self.current_level];
        level.items[level.index] = value;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Feeds `bits` through the zero bit-plane decoding loop for one leaf.
    fn decode_leaf(tree: &mut TagTree, i: usize, j: usize, bits: &[u32]) -> (u32, usize) {
        tree.reset(i, j);
        let mut consumed = 0;
        loop {
            let bit = bits[consumed];
            consumed += 1;
            if bit != 0 {
                if !tree.next_level() {
                    break;
                }
            } else {
                tree.increment_value();
            }
        }
        (tree.value().unwrap(), consumed)
    }

    #[test]
    fn test_level_layout() {
        assert_eq!(ceil_log2(1), 0);
        assert_eq!(ceil_log2(2), 1);
        assert_eq!(ceil_log2(3), 2);
        assert_eq!(ceil_log2(8), 3);
        assert_eq!(ceil_log2(9), 4);
        // 3x3 leaves, 2x2 and a root
        assert_eq!(node_count(3, 3), 14);
        assert_eq!(node_count(1, 1), 1);
        assert_eq!(TagTree::new(5, 2).levels.len(), 4);
    }

    #[test]
    fn test_single_node_tree() {
        let mut tree = TagTree::new(1, 1);
        assert_eq!(decode_leaf(&mut tree, 0, 0, &[0, 0, 1]), (2, 3));
    }

    #[test]
    fn test_siblings_share_the_root_value() {
        let mut tree = TagTree::new(2, 1);
        // root = 0, then the leaf counts one more
        assert_eq!(decode_leaf(&mut tree, 0, 0, &[1, 0, 1]), (1, 3));
        // root is known, the sibling starts from it
        assert_eq!(decode_leaf(&mut tree, 1, 0, &[1]), (0, 1));
    }

    #[test]
    fn test_values_never_decrease() {
        let mut tree = TagTree::new(4, 4);
        let (first, _) = decode_leaf(&mut tree, 2, 3, &[0, 1, 0, 1, 1, 0, 1]);
        let (again, consumed) = decode_leaf(&mut tree, 2, 3, &[1, 1, 1, 1]);
        assert!(again >= first);
        assert_eq!(consumed, 1);
        let (neighbour, _) = decode_leaf(&mut tree, 3, 3, &[1, 1, 1, 1]);
        assert!(neighbour >= 1);
    }

    #[test]
    fn test_inclusion_across_layers() {
        let mut tree = InclusionTree::new(1, 1, 0);
        // Layer 0: a zero bit means "not yet".
        assert!(tree.reset(0, 0, 0));
        tree.increment_value(0);
        // Same layer again: known without reading bits.
        assert!(!tree.reset(0, 0, 0));
        // Layer 1: a one bit at the leaf means included.
        assert!(tree.reset(0, 0, 1));
        assert!(!tree.next_level());
    }

    #[test]
    fn test_inclusion_walks_down_from_root() {
        let mut tree = InclusionTree::new(2, 2, 0);
        assert!(tree.reset(1, 1, 0));
        // root included, then the leaf
        assert!(tree.next_level());
        assert!(!tree.next_level());
        // sibling: root already included, only the leaf is unknown
        assert!(tree.reset(0, 1, 0));
        tree.increment_value(0);
        assert!(!tree.reset(0, 1, 0));
    }
}

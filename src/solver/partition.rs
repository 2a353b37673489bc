//! Disjoint ownership of potential degrees of freedom.
//!
//! Each partition owns a contiguous DOF range. The reaction phase of a step
//! touches only the partition's own nodes and writes its share of `Vtilde`
//! into its own slice of the global field, so partitions run concurrently
//! without any exchange and the global fields never need a separate gather.

use std::ops::Range;

/// Contiguous split of `num_dofs` into at most `num_parts` ranges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partitioning {
    ends: Vec<usize>,
}

impl Partitioning {
    /// Balanced split; earlier partitions take the remainder.
    pub fn new(num_dofs: usize, num_parts: usize) -> Self {
        let parts = num_parts.clamp(1, num_dofs.max(1));
        let ends = (0..parts)
            .map(|id| partition_range(parts, id, num_dofs).end)
            .collect();
        Self { ends }
    }

    pub fn num_parts(&self) -> usize {
        self.ends.len()
    }

    /// Exclusive end of each partition, ascending.
    pub fn ends(&self) -> &[usize] {
        &self.ends
    }

    /// Split a global field into per-partition mutable slices.
    pub fn split_mut<'a, T>(&self, mut field: &'a mut [T]) -> Vec<&'a mut [T]> {
        let mut out = Vec::with_capacity(self.ends.len());
        let mut start = 0;
        for &end in &self.ends {
            let (head, tail) = field.split_at_mut(end - start);
            out.push(head);
            field = tail;
            start = end;
        }
        out
    }
}

fn partition_range(num_parts: usize, id: usize, num_dofs: usize) -> Range<usize> {
    let min_size = num_dofs / num_parts;
    let remainder = num_dofs % num_parts;

    if id < remainder {
        let size = min_size + 1;
        let start = size * id;
        start..start + size
    } else {
        let start = (min_size + 1) * remainder + min_size * (id - remainder);
        start..start + min_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_balanced_ranges() {
        let p = Partitioning::new(10, 3);
        assert_eq!(p.ends(), &[4, 7, 10]);
        assert_eq!(p.num_parts(), 3);
    }

    #[test]
    fn test_matches_partition_ranges() {
        for (dofs, parts) in [(7, 7), (100, 6), (5, 1)] {
            let p = Partitioning::new(dofs, parts);
            let mut start = 0;
            for (id, &end) in p.ends().iter().enumerate() {
                assert_eq!(partition_range(parts, id, dofs), start..end);
                start = end;
            }
            assert_eq!(start, dofs);
        }
    }

    #[test]
    fn test_more_parts_than_dofs() {
        let p = Partitioning::new(2, 8);
        assert_eq!(p.num_parts(), 2);
        assert_eq!(p.ends(), &[1, 2]);
    }

    #[test]
    fn test_split_field() {
        let p = Partitioning::new(5, 2);
        let mut field = vec![0.0; 5];
        let parts = p.split_mut(&mut field);
        assert_eq!(parts.iter().map(|s| s.len()).collect::<Vec<_>>(), vec![3, 2]);
    }
}

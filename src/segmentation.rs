//! 8-connected component extraction over a boolean detection mask.

use ndarray::Array2;

const NEIGHBORS: [(i64, i64); 8] = [
    (-1, -1),
    (-1, 0),
    (-1, 1),
    (0, -1),
    (0, 1),
    (1, -1),
    (1, 0),
    (1, 1),
];

/// One 8-connected component of the foreground.
#[derive(Debug, Clone)]
pub struct Region {
    /// Member pixels as `(row, col)`, sorted row-major so downstream
    /// arithmetic is independent of traversal order.
    pub pixels: Vec<(usize, usize)>,
}

impl Region {
    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    /// `(min_row, max_row, min_col, max_col)`, inclusive.
    pub fn bounding_box(&self) -> (usize, usize, usize, usize) {
        let mut min_r = usize::MAX;
        let mut max_r = 0;
        let mut min_c = usize::MAX;
        let mut max_c = 0;
        for &(r, c) in &self.pixels {
            min_r = min_r.min(r);
            max_r = max_r.max(r);
            min_c = min_c.min(c);
            max_c = max_c.max(c);
        }
        (min_r, max_r, min_c, max_c)
    }
}

/// Partition the mask's `true` pixels into 8-connected regions.
///
/// Flood fill with an explicit stack: a saturated blob spanning the whole
/// frame must not hit a recursion limit. The row-major outer scan plus the
/// per-region pixel sort make the output fully deterministic. No minimum
/// size filtering happens here.
pub fn label_components(mask: &Array2<bool>) -> Vec<Region> {
    let (h, w) = mask.dim();
    let mut visited = vec![false; h * w];
    let mut regions = Vec::new();
    let mut stack = Vec::new();

    for i in 0..h {
        for j in 0..w {
            if !mask[[i, j]] || visited[i * w + j] {
                continue;
            }
            visited[i * w + j] = true;
            stack.push((i, j));
            let mut pixels = Vec::new();
            while let Some((y, x)) = stack.pop() {
                pixels.push((y, x));
                for (dy, dx) in NEIGHBORS {
                    let ny = y as i64 + dy;
                    let nx = x as i64 + dx;
                    if ny < 0 || ny >= h as i64 || nx < 0 || nx >= w as i64 {
                        continue;
                    }
                    let (ny, nx) = (ny as usize, nx as usize);
                    if mask[[ny, nx]] && !visited[ny * w + nx] {
                        visited[ny * w + nx] = true;
                        stack.push((ny, nx));
                    }
                }
            }
            pixels.sort_unstable();
            regions.push(Region { pixels });
        }
    }
    regions
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn mask_from(coords: &[(usize, usize)], h: usize, w: usize) -> Array2<bool> {
        let mut mask = Array2::from_elem((h, w), false);
        for &(y, x) in coords {
            mask[[y, x]] = true;
        }
        mask
    }

    #[test]
    fn diagonal_pixels_share_a_region() {
        let mask = mask_from(&[(2, 2), (3, 3)], 6, 6);
        let regions = label_components(&mask);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].pixels, vec![(2, 2), (3, 3)]);
    }

    #[test]
    fn separated_pixels_split() {
        let mask = mask_from(&[(1, 1), (1, 4)], 6, 6);
        let regions = label_components(&mask);
        assert_eq!(regions.len(), 2);
    }

    #[test]
    fn regions_partition_the_foreground() {
        // Two blobs plus an isolated pixel.
        let coords = [
            (0, 0),
            (0, 1),
            (1, 0),
            (4, 4),
            (4, 5),
            (5, 5),
            (7, 1),
        ];
        let mask = mask_from(&coords, 9, 9);
        let regions = label_components(&mask);
        assert_eq!(regions.len(), 3);

        let mut seen = HashSet::new();
        for region in &regions {
            for &p in &region.pixels {
                assert!(seen.insert(p), "pixel {:?} in two regions", p);
                assert!(mask[[p.0, p.1]]);
            }
        }
        assert_eq!(seen.len(), coords.len());
    }

    #[test]
    fn pixels_are_sorted_row_major() {
        let mask = mask_from(&[(3, 3), (2, 4), (3, 4), (2, 3)], 6, 6);
        let regions = label_components(&mask);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].pixels, vec![(2, 3), (2, 4), (3, 3), (3, 4)]);
    }

    #[test]
    fn full_frame_blob_does_not_recurse() {
        let mask = Array2::from_elem((80, 80), true);
        let regions = label_components(&mask);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].len(), 6400);
    }

    #[test]
    fn empty_mask_yields_no_regions() {
        let mask = Array2::from_elem((10, 10), false);
        assert!(label_components(&mask).is_empty());
    }
}

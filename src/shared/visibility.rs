//! Occlusion math
//!
//! A window is exposed when the union of everything stacked above it does not
//! cover its whole area. The union area is computed exactly with
//! inclusion–exclusion, so two occluders that overlap each other are not
//! double-counted.

use super::geometry::Rect;

/// Default tolerance for the area comparison
pub const DEFAULT_AREA_EPSILON: f64 = 1e-4;

/// Exact area of the union of `rects`
///
/// Sums `(-1)^(k+1) * area(r1 ∩ … ∩ rk)` over every non-empty subset. Subsets
/// are walked depth-first and a branch stops as soon as its running
/// intersection is empty, since every superset of it contributes zero.
pub fn union_area(rects: &[Rect]) -> f64 {
    let rects: Vec<Rect> = rects.iter().filter(|r| !r.is_empty()).copied().collect();

    let mut total = 0.0;
    for (i, rect) in rects.iter().enumerate() {
        accumulate_subsets(&rects[i + 1..], *rect, 1, &mut total);
    }
    total
}

fn accumulate_subsets(rest: &[Rect], intersection: Rect, subset_len: usize, total: &mut f64) {
    if subset_len % 2 == 1 {
        *total += intersection.area();
    } else {
        *total -= intersection.area();
    }

    for (i, next) in rest.iter().enumerate() {
        if let Some(overlap) = intersection.intersect(next) {
            accumulate_subsets(&rest[i + 1..], overlap, subset_len + 1, total);
        }
    }
}

/// Whether any pixel of `target` is left uncovered by `occluders`
///
/// `occluders` are the rects of mapped windows stacked above the target; they
/// are clipped to the target before the union is taken.
pub fn is_exposed(target: &Rect, occluders: &[Rect], epsilon: f64) -> bool {
    let overlaps: Vec<Rect> = occluders
        .iter()
        .filter_map(|occluder| target.intersect(occluder))
        .collect();

    if overlaps.is_empty() {
        return true;
    }

    union_area(&overlaps) < target.area() - epsilon
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_occluders_is_visible() {
        let target = Rect::new(0, 0, 100, 100);
        assert!(is_exposed(&target, &[], DEFAULT_AREA_EPSILON));
    }

    #[test]
    fn test_disjoint_occluders_is_visible() {
        let target = Rect::new(0, 0, 100, 100);
        let occluders = [Rect::new(200, 200, 50, 50), Rect::new(100, 0, 10, 10)];
        assert!(is_exposed(&target, &occluders, DEFAULT_AREA_EPSILON));
    }

    #[test]
    fn test_identical_occluder_hides_target() {
        let target = Rect::new(0, 0, 100, 100);
        assert!(!is_exposed(&target, &[target], DEFAULT_AREA_EPSILON));
    }

    #[test]
    fn test_larger_occluder_hides_target() {
        let target = Rect::new(300, 300, 100, 100);
        let occluders = [Rect::new(0, 0, 1920, 1080)];
        assert!(!is_exposed(&target, &occluders, DEFAULT_AREA_EPSILON));
    }

    #[test]
    fn test_overlapping_corners_leave_target_exposed() {
        let target = Rect::new(0, 0, 100, 100);
        let occluders = [Rect::new(0, 0, 60, 60), Rect::new(50, 50, 60, 60)];

        let clipped: Vec<Rect> = occluders.iter().filter_map(|o| target.intersect(o)).collect();
        // 3600 + 2500 - 100: the second occluder is clipped to 50x50 inside the target
        assert_eq!(union_area(&clipped), 6000.0);
        assert_eq!(union_area(&occluders), 7100.0);
        assert!(is_exposed(&target, &occluders, DEFAULT_AREA_EPSILON));
    }

    #[test]
    fn test_sum_of_areas_would_be_wrong() {
        // Individual areas sum past the target area, but the union leaves a strip
        let target = Rect::new(0, 0, 100, 100);
        let occluders = [
            Rect::new(0, 0, 100, 70),
            Rect::new(0, 20, 100, 70),
        ];
        let naive: f64 = occluders.iter().map(Rect::area).sum();
        assert!(naive > target.area());
        assert_eq!(union_area(&occluders), 9000.0);
        assert!(is_exposed(&target, &occluders, DEFAULT_AREA_EPSILON));
    }

    #[test]
    fn test_tiled_occluders_hide_target() {
        let target = Rect::new(0, 0, 100, 100);
        let occluders = [
            Rect::new(0, 0, 50, 50),
            Rect::new(50, 0, 50, 50),
            Rect::new(0, 50, 50, 50),
            Rect::new(50, 50, 50, 50),
            Rect::new(25, 25, 50, 50),
        ];
        assert_eq!(union_area(&occluders), 10000.0);
        assert!(!is_exposed(&target, &occluders, DEFAULT_AREA_EPSILON));
    }

    #[test]
    fn test_union_area_ignores_empty_rects() {
        let rects = [Rect::new(0, 0, 0, 40), Rect::new(5, 5, 10, 10)];
        assert_eq!(union_area(&rects), 100.0);
        assert_eq!(union_area(&[]), 0.0);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    const GRID: i32 = 24;

    fn small_rect() -> impl Strategy<Value = Rect> {
        (0..GRID, 0..GRID, 0u32..12, 0u32..12).prop_map(|(x, y, w, h)| Rect::new(x, y, w, h))
    }

    /// Count covered unit cells; integer rects make this the exact union area
    fn rasterized_area(rects: &[Rect]) -> f64 {
        let mut covered = 0u32;
        for y in 0..GRID + 12 {
            for x in 0..GRID + 12 {
                let cell = Rect::new(x, y, 1, 1);
                if rects.iter().any(|r| r.intersect(&cell).is_some()) {
                    covered += 1;
                }
            }
        }
        covered as f64
    }

    proptest! {
        #[test]
        fn union_area_matches_rasterization(rects in prop::collection::vec(small_rect(), 0..=6)) {
            let exact = union_area(&rects);
            let raster = rasterized_area(&rects);
            prop_assert!((exact - raster).abs() < 1e-9, "union {} vs raster {} for {:?}", exact, raster, rects);
        }

        /// Adding an occluder never turns a hidden target visible
        #[test]
        fn occlusion_is_monotonic(
            target in small_rect(),
            occluders in prop::collection::vec(small_rect(), 1..=5),
            extra in small_rect(),
        ) {
            let before = is_exposed(&target, &occluders, DEFAULT_AREA_EPSILON);
            let mut more = occluders.clone();
            more.push(extra);
            let after = is_exposed(&target, &more, DEFAULT_AREA_EPSILON);
            prop_assert!(before || !after, "adding {:?} exposed {:?}", extra, target);
        }
    }
}

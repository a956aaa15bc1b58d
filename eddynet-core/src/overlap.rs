// Overlap predicates
// Bounding-box candidate search and polygon overlap scoring between two steps

use crate::contour::ContourSet;
use geo::{Area, BooleanOps, Coord, LineString, Polygon};
use rstar::{RTree, RTreeObject, AABB};

/// Overlap acceptance settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverlapConfig {
    /// A candidate is a match when its score is strictly greater than this
    pub threshold: f64,
    /// Divide the intersection by the smaller area instead of the union
    pub minimal_area: bool,
}

impl Default for OverlapConfig {
    fn default() -> Self {
        OverlapConfig {
            threshold: 0.2,
            minimal_area: false,
        }
    }
}

/// Geometric tests applied to the contours of two steps.
///
/// Implementations must be deterministic and return candidate pairs sorted by
/// the index in `a`, then the index in `b`.
pub trait OverlapPredicate {
    /// Pairs `(ia[k], ib[k])` whose bounding boxes intersect
    fn bbox_intersection(&self, a: &ContourSet, b: &ContourSet) -> (Vec<usize>, Vec<usize>);

    /// One overlap score per candidate pair, aligned with `ia`/`ib`
    fn vertice_overlap(&self, a: &ContourSet, ia: &[usize], b: &ContourSet, ib: &[usize]) -> Vec<f64>;
}

/// Envelope of one contour, tagged with its observation index
struct ContourBox {
    index: usize,
    env: AABB<[f64; 2]>,
}

impl RTreeObject for ContourBox {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.env
    }
}

/// Bounding box over the finite samples of a contour
fn contour_bounds(lon: &[f64], lat: &[f64]) -> Option<([f64; 2], [f64; 2])> {
    let mut lower = [f64::INFINITY, f64::INFINITY];
    let mut upper = [f64::NEG_INFINITY, f64::NEG_INFINITY];
    let mut any = false;
    for (&x, &y) in lon.iter().zip(lat) {
        if !x.is_finite() || !y.is_finite() {
            continue;
        }
        lower = [lower[0].min(x), lower[1].min(y)];
        upper = [upper[0].max(x), upper[1].max(y)];
        any = true;
    }
    any.then_some((lower, upper))
}

/// Shift every longitude by the multiple of 360 that brings the first finite
/// one within 180 degrees of `reference`
fn wrap_to(lon: &[f64], reference: f64) -> Vec<f64> {
    let first = lon.iter().copied().find(|x| x.is_finite());
    let shift = match first {
        Some(x) if reference.is_finite() => ((reference - x) / 360.0).round() * 360.0,
        _ => 0.0,
    };
    lon.iter().map(|x| x + shift).collect()
}

/// Polygon over the finite samples; `None` below three vertices
fn polygon(lon: &[f64], lat: &[f64]) -> Option<Polygon<f64>> {
    let ring: Vec<Coord<f64>> = lon
        .iter()
        .zip(lat)
        .filter(|(x, y)| x.is_finite() && y.is_finite())
        .map(|(&x, &y)| Coord { x, y })
        .collect();
    if ring.len() < 3 {
        return None;
    }
    Some(Polygon::new(LineString::from(ring), vec![]))
}

/// R-tree bounding boxes plus polygon intersection over union
#[derive(Debug, Clone, Copy, Default)]
pub struct PolygonOverlap {
    config: OverlapConfig,
}

impl PolygonOverlap {
    pub fn new(config: OverlapConfig) -> Self {
        PolygonOverlap { config }
    }

    fn score(&self, a: &Polygon<f64>, b: &Polygon<f64>) -> f64 {
        let area_a = a.unsigned_area();
        let area_b = b.unsigned_area();
        if area_a <= 0.0 || area_b <= 0.0 {
            return 0.0;
        }
        let inter = a.intersection(b).unsigned_area();
        let denominator = if self.config.minimal_area {
            area_a.min(area_b)
        } else {
            area_a + area_b - inter
        };
        if denominator > 0.0 {
            inter / denominator
        } else {
            0.0
        }
    }
}

impl OverlapPredicate for PolygonOverlap {
    fn bbox_intersection(&self, a: &ContourSet, b: &ContourSet) -> (Vec<usize>, Vec<usize>) {
        let boxes: Vec<ContourBox> = (0..b.len())
            .filter_map(|index| {
                let (lon, lat) = b.contour(index);
                contour_bounds(lon, lat).map(|(lower, upper)| ContourBox {
                    index,
                    env: AABB::from_corners(lower, upper),
                })
            })
            .collect();
        let tree = RTree::bulk_load(boxes);

        let mut ia = Vec::new();
        let mut ib = Vec::new();
        let mut hits = Vec::new();
        for i in 0..a.len() {
            let (lon, lat) = a.contour(i);
            let Some((lower, upper)) = contour_bounds(lon, lat) else {
                continue;
            };
            hits.clear();
            for shift in [0.0, -360.0, 360.0] {
                let query = AABB::from_corners(
                    [lower[0] + shift, lower[1]],
                    [upper[0] + shift, upper[1]],
                );
                hits.extend(tree.locate_in_envelope_intersecting(&query).map(|c| c.index));
            }
            hits.sort_unstable();
            hits.dedup();
            for &j in &hits {
                ia.push(i);
                ib.push(j);
            }
        }
        (ia, ib)
    }

    fn vertice_overlap(&self, a: &ContourSet, ia: &[usize], b: &ContourSet, ib: &[usize]) -> Vec<f64> {
        ia.iter()
            .zip(ib)
            .map(|(&i, &j)| {
                let (lon_a, lat_a) = a.contour(i);
                let (lon_b, lat_b) = b.contour(j);
                let reference = lon_a.iter().copied().find(|x| x.is_finite()).unwrap_or(0.0);
                let lon_b = wrap_to(lon_b, reference);
                match (polygon(lon_a, lat_a), polygon(&lon_b, lat_b)) {
                    (Some(pa), Some(pb)) => self.score(&pa, &pb),
                    _ => 0.0,
                }
            })
            .collect()
    }
}

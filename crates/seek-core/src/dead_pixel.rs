//! Dead-pixel detection and neighbour-mean repair.
//!
//! A dead-pixel map is built once per session from a reference frame the
//! sensor emits at start-up. The map keeps a binary mask (0 = defective) and
//! an ordered list of defective coordinates. The order guarantees that each
//! listed pixel has at least one valid or previously repaired neighbour, so
//! repairing in list order can fill in clusters from their edges inwards.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Value written to defective pixels before they are repaired.
pub const DEAD_PIXEL_MARKER: u16 = 0xFFFF;

const MASK_DEAD: u8 = 0;
const MASK_VALID: u8 = 255;

/// Histogram covers the 14-bit sample range with unit-width bins.
const HISTOGRAM_BINS: usize = 0x4000;

/// How the dead-pixel mask is derived from the reference frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadPixelPolicy {
    /// Threshold at `2 * mode - max` of the reference frame's histogram.
    Histogram,
    /// Any reference sample that saturates to 0 in 8 bits is defective.
    DirectMask,
}

/// Visible-region coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pixel {
    pub x: usize,
    pub y: usize,
}

#[derive(Debug, Error)]
pub enum DeadPixelError {
    #[error("{unresolved} defective pixels have no usable neighbour (reference frame is all defective)")]
    AllDefective { unresolved: usize },
    #[error("mask length mismatch: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

/// Dead-pixel mask plus the repair order derived from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadPixelMap {
    width: usize,
    height: usize,
    mask: Vec<u8>,
    list: Vec<Pixel>,
}

impl DeadPixelMap {
    /// A map with no defective pixels.
    pub fn all_valid(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            mask: vec![MASK_VALID; width * height],
            list: Vec::new(),
        }
    }

    /// Derive the mask from a visible-region reference frame and order it.
    pub fn from_reference(
        reference: &[u16],
        width: usize,
        height: usize,
        policy: DeadPixelPolicy,
    ) -> Result<Self, DeadPixelError> {
        if reference.len() != width * height {
            return Err(DeadPixelError::InvalidLength {
                expected: width * height,
                actual: reference.len(),
            });
        }
        let mask = match policy {
            DeadPixelPolicy::Histogram => histogram_mask(reference),
            DeadPixelPolicy::DirectMask => direct_mask(reference),
        };
        Self::from_mask(mask, width, height)
    }

    /// Build the ordered list for an existing mask (0 = defective).
    pub fn from_mask(mask: Vec<u8>, width: usize, height: usize) -> Result<Self, DeadPixelError> {
        if mask.len() != width * height {
            return Err(DeadPixelError::InvalidLength {
                expected: width * height,
                actual: mask.len(),
            });
        }
        let mask: Vec<u8> = mask
            .into_iter()
            .map(|m| if m == MASK_DEAD { MASK_DEAD } else { MASK_VALID })
            .collect();
        let list = order_dead_pixels(&mask, width, height)?;
        tracing::info!(count = list.len(), "found dead pixels");
        Ok(Self {
            width,
            height,
            mask,
            list,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Binary mask, 0 = defective, 255 = valid.
    pub fn mask(&self) -> &[u8] {
        &self.mask
    }

    /// Defective pixels in repair order.
    pub fn list(&self) -> &[Pixel] {
        &self.list
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn is_defective(&self, x: usize, y: usize) -> bool {
        x < self.width && y < self.height && self.mask[y * self.width + x] == MASK_DEAD
    }

    /// Copy valid pixels from `src` into `dst` and fill every listed
    /// defective pixel with the mean of its non-marker neighbours.
    pub fn repair(&self, src: &[u16], dst: &mut [u16]) {
        debug_assert_eq!(src.len(), self.mask.len());
        debug_assert_eq!(dst.len(), self.mask.len());

        for ((out, &value), &m) in dst.iter_mut().zip(src).zip(&self.mask) {
            *out = if m == MASK_DEAD { DEAD_PIXEL_MARKER } else { value };
        }

        for &p in &self.list {
            let mean = neighbour_mean(dst, self.width, self.height, p, DEAD_PIXEL_MARKER);
            dst[p.y * self.width + p.x] = mean;
        }
    }
}

/// Threshold used by the histogram policy: `2 * mode - max`.
///
/// The mode ignores bin 0, which is dominated by masked pixels. Values at or
/// above the histogram range still count towards `max`.
pub fn histogram_threshold(reference: &[u16]) -> i64 {
    let max_value = reference.iter().copied().max().unwrap_or(0);

    let mut histogram = vec![0u32; HISTOGRAM_BINS];
    for &v in reference {
        if let Some(bin) = histogram.get_mut(v as usize) {
            *bin += 1;
        }
    }
    histogram[0] = 0;

    // First bin with the highest count
    let (mode, _) = histogram
        .iter()
        .enumerate()
        .fold((0usize, 0u32), |best, (bin, &count)| {
            if count > best.1 {
                (bin, count)
            } else {
                best
            }
        });

    let threshold = 2 * mode as i64 - i64::from(max_value);
    tracing::debug!(mode, max = max_value, threshold, "dead pixel histogram");
    threshold
}

/// Pixels strictly above the histogram threshold are valid.
pub fn histogram_mask(reference: &[u16]) -> Vec<u8> {
    let threshold = histogram_threshold(reference);
    reference
        .iter()
        .map(|&v| {
            if i64::from(v) > threshold {
                MASK_VALID
            } else {
                MASK_DEAD
            }
        })
        .collect()
}

/// Reference samples of 0 are defective; everything else saturates to valid.
pub fn direct_mask(reference: &[u16]) -> Vec<u8> {
    reference
        .iter()
        .map(|&v| if v == 0 { MASK_DEAD } else { MASK_VALID })
        .collect()
}

/// Order the defective pixels so each has a resolved neighbour at its turn.
///
/// Scans the unresolved pixels in raster order until all are resolved. A
/// pixel resolved earlier in a scan counts for later pixels of the same scan.
fn order_dead_pixels(mask: &[u8], width: usize, height: usize) -> Result<Vec<Pixel>, DeadPixelError> {
    let mut resolved: Vec<bool> = mask.iter().map(|&m| m != MASK_DEAD).collect();
    let mut pending: Vec<Pixel> = (0..height)
        .flat_map(|y| (0..width).map(move |x| Pixel { x, y }))
        .filter(|p| mask[p.y * width + p.x] == MASK_DEAD)
        .collect();
    let mut list = Vec::with_capacity(pending.len());

    while !pending.is_empty() {
        let before = pending.len();
        pending.retain(|&p| {
            if has_resolved_neighbour(&resolved, width, height, p) {
                resolved[p.y * width + p.x] = true;
                list.push(p);
                false
            } else {
                true
            }
        });
        if pending.len() == before {
            return Err(DeadPixelError::AllDefective { unresolved: before });
        }
    }

    Ok(list)
}

fn has_resolved_neighbour(resolved: &[bool], width: usize, height: usize, p: Pixel) -> bool {
    (p.x > 0 && resolved[p.y * width + p.x - 1])
        || (p.x + 1 < width && resolved[p.y * width + p.x + 1])
        || (p.y > 0 && resolved[(p.y - 1) * width + p.x])
        || (p.y + 1 < height && resolved[(p.y + 1) * width + p.x])
}

/// Truncated mean of the in-bounds left/right/up/down neighbours that do not
/// carry `marker`. Returns 0 when there are none.
pub fn neighbour_mean(img: &[u16], width: usize, height: usize, p: Pixel, marker: u16) -> u16 {
    let mut sum = 0u32;
    let mut count = 0u32;
    let mut take = |value: u16| {
        if value != marker {
            sum += u32::from(value);
            count += 1;
        }
    };

    if p.x != 0 {
        take(img[p.y * width + p.x - 1]);
    }
    if p.x + 1 != width {
        take(img[p.y * width + p.x + 1]);
    }
    if p.y != 0 {
        take(img[(p.y - 1) * width + p.x]);
    }
    if p.y + 1 != height {
        take(img[(p.y + 1) * width + p.x]);
    }

    if count == 0 {
        return 0;
    }
    (sum / count) as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mask_with_dead(width: usize, height: usize, dead: &[(usize, usize)]) -> Vec<u8> {
        let mut mask = vec![MASK_VALID; width * height];
        for &(x, y) in dead {
            mask[y * width + x] = MASK_DEAD;
        }
        mask
    }

    #[test]
    fn test_histogram_marks_low_pixels_dead() {
        // Mode 1000, max 1200 -> threshold 800
        let mut reference = vec![1000u16; 16];
        reference[3] = 1200;
        reference[5] = 0;
        reference[9] = 700;
        reference[10] = 800;
        assert_eq!(histogram_threshold(&reference), 800);

        let mask = histogram_mask(&reference);
        assert_eq!(mask[3], MASK_VALID);
        assert_eq!(mask[5], MASK_DEAD);
        assert_eq!(mask[9], MASK_DEAD);
        assert_eq!(mask[10], MASK_DEAD, "threshold itself is not above threshold");
        assert_eq!(mask.iter().filter(|&&m| m == MASK_DEAD).count(), 3);
    }

    #[test]
    fn test_histogram_ignores_zero_bin_for_mode() {
        // Mostly zeros, but the mode must come from the non-zero bins
        let mut reference = vec![0u16; 20];
        reference[..5].fill(500);
        reference[5] = 600;
        assert_eq!(histogram_threshold(&reference), 400);
    }

    #[test]
    fn test_histogram_first_bin_wins_ties() {
        let reference = vec![10, 10, 20, 20, 30];
        // Mode 10 (first max), max 30 -> threshold -10
        assert_eq!(histogram_threshold(&reference), -10);
    }

    #[test]
    fn test_direct_mask() {
        assert_eq!(direct_mask(&[0, 1, 255, 0x4000]), vec![0, 255, 255, 255]);
    }

    #[test]
    fn test_isolated_dead_pixel_repaired_with_neighbour_mean() {
        let mask = mask_with_dead(3, 3, &[(1, 1)]);
        let map = DeadPixelMap::from_mask(mask, 3, 3).unwrap();
        assert_eq!(map.list(), &[Pixel { x: 1, y: 1 }]);

        let src = vec![
            0, 10, 0, //
            20, 999, 30, //
            0, 41, 0,
        ];
        let mut dst = vec![0u16; 9];
        map.repair(&src, &mut dst);
        // (20 + 30 + 10 + 41) / 4 = 25 (truncated)
        assert_eq!(dst[4], 25);
        assert_eq!(dst[0], 0);
        assert_eq!(dst[7], 41);
    }

    #[test]
    fn test_border_pixel_uses_in_bounds_neighbours_only() {
        let mask = mask_with_dead(3, 2, &[(0, 0)]);
        let map = DeadPixelMap::from_mask(mask, 3, 2).unwrap();
        let src = vec![5000, 100, 0, 301, 0, 0];
        let mut dst = vec![0u16; 6];
        map.repair(&src, &mut dst);
        assert_eq!(dst[0], (100 + 301) / 2);
    }

    #[test]
    fn test_cluster_ordered_from_edges_inwards() {
        // Horizontal run of 3 dead pixels with valid pixels only on row ends
        let mask = mask_with_dead(5, 1, &[(1, 0), (2, 0), (3, 0)]);
        let map = DeadPixelMap::from_mask(mask, 5, 1).unwrap();
        // (1,0) has a valid left neighbour; (2,0) then sees (1,0) resolved
        assert_eq!(
            map.list(),
            &[Pixel { x: 1, y: 0 }, Pixel { x: 2, y: 0 }, Pixel { x: 3, y: 0 }]
        );

        let src = vec![100, 0, 0, 0, 300];
        let mut dst = vec![0u16; 5];
        map.repair(&src, &mut dst);
        assert_eq!(dst, vec![100, 100, 100, 200, 300]);
    }

    #[test]
    fn test_late_resolution_needs_another_scan() {
        // (0,0) only touches (1,0) and (0,1), both dead; (0,1) is resolved by
        // (0,2) after (0,0) was already visited, forcing a second scan.
        let mask = mask_with_dead(2, 3, &[(0, 0), (1, 0), (0, 1), (1, 1)]);
        let map = DeadPixelMap::from_mask(mask, 2, 3).unwrap();
        assert_eq!(
            map.list(),
            &[
                Pixel { x: 0, y: 1 },
                Pixel { x: 1, y: 1 },
                Pixel { x: 0, y: 0 },
                Pixel { x: 1, y: 0 },
            ]
        );
    }

    #[test]
    fn test_repair_never_leaves_marker_when_neighbour_valid() {
        let (w, h) = (8, 6);
        let dead = [(0, 0), (1, 0), (0, 1), (4, 2), (5, 2), (4, 3), (5, 3), (7, 5), (3, 5)];
        let map = DeadPixelMap::from_mask(mask_with_dead(w, h, &dead), w, h).unwrap();
        let src: Vec<u16> = (0..(w * h) as u16).map(|i| 1000 + i * 7).collect();
        let mut dst = vec![0u16; w * h];
        map.repair(&src, &mut dst);
        assert!(!dst.contains(&DEAD_PIXEL_MARKER));
        for &(x, y) in &dead {
            assert!(map.is_defective(x, y));
        }
    }

    #[test]
    fn test_no_valid_neighbours_resolves_to_zero() {
        // Neighbours are valid but their corrected values collide with the marker
        let map = DeadPixelMap::from_mask(mask_with_dead(3, 3, &[(1, 1)]), 3, 3).unwrap();
        let src = vec![
            7, 0xFFFF, 7, //
            0xFFFF, 123, 0xFFFF, //
            7, 0xFFFF, 7,
        ];
        let mut dst = vec![0u16; 9];
        map.repair(&src, &mut dst);
        assert_eq!(dst[4], 0);
    }

    #[test]
    fn test_neighbour_mean_without_neighbours() {
        let img = [42u16];
        assert_eq!(neighbour_mean(&img, 1, 1, Pixel { x: 0, y: 0 }, DEAD_PIXEL_MARKER), 0);
    }

    #[test]
    fn test_all_defective_is_error() {
        let err = DeadPixelMap::from_mask(vec![0; 6], 3, 2).unwrap_err();
        assert!(matches!(err, DeadPixelError::AllDefective { unresolved: 6 }));
    }

    #[test]
    fn test_construction_is_idempotent() {
        let (w, h) = (16, 12);
        let reference: Vec<u16> = (0..w * h)
            .map(|i| match i % 37 {
                0 => 0,
                5 => 20,
                _ => 8000 + (i % 5) as u16,
            })
            .collect();
        let a = DeadPixelMap::from_reference(&reference, w, h, DeadPixelPolicy::Histogram).unwrap();
        let b = DeadPixelMap::from_reference(&reference, w, h, DeadPixelPolicy::Histogram).unwrap();
        assert_eq!(a, b);
        assert!(!a.is_empty());
    }

    #[test]
    fn test_from_reference_rejects_wrong_length() {
        let err = DeadPixelMap::from_reference(&[1, 2, 3], 2, 2, DeadPixelPolicy::DirectMask)
            .unwrap_err();
        assert!(matches!(
            err,
            DeadPixelError::InvalidLength {
                expected: 4,
                actual: 3
            }
        ));
    }

    #[test]
    fn test_policy_deserializes_snake_case() {
        use serde::de::value::{Error, StrDeserializer};
        use serde::de::IntoDeserializer;

        let de: StrDeserializer<'_, Error> = "direct_mask".into_deserializer();
        assert_eq!(DeadPixelPolicy::deserialize(de).unwrap(), DeadPixelPolicy::DirectMask);
    }
}

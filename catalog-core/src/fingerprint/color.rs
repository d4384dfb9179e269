//! Compact color descriptor: K weighted colors in a fixed color space, produced by
//! quantizing and histogram-binning a decoded image, compared with an Earth-Mover-like
//! weighted distance.
//!
//! Shaped like `fingerprint::hamming`: a small newtype wrapping a fixed-size payload plus
//! a `distance_to` method, so `ColorIndex` (`index::color`) can treat it exactly like a
//! `Hamming` value with a different metric.

/// Maximum number of weighted colors kept per descriptor.
pub const MAX_COLORS: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightedColor {
    /// RGB color, quantized to a fixed palette bucket.
    pub rgb: [u8; 3],
    /// Fraction of the image covered by this color, in `[0.0, 1.0]`.
    pub weight: f32,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ColorDescriptor {
    colors: Vec<WeightedColor>,
}

impl ColorDescriptor {
    /// Builds a descriptor from a histogram of `(rgb, count)` pairs, keeping the
    /// `MAX_COLORS` heaviest buckets and normalizing their weights to sum to 1.0.
    pub fn from_histogram(mut buckets: Vec<([u8; 3], u32)>) -> Self {
        buckets.sort_by(|a, b| b.1.cmp(&a.1));
        buckets.truncate(MAX_COLORS);

        let total: u64 = buckets.iter().map(|(_, count)| *count as u64).sum();
        let colors = if total == 0 {
            Vec::new()
        } else {
            buckets
                .into_iter()
                .map(|(rgb, count)| WeightedColor {
                    rgb,
                    weight: count as f32 / total as f32,
                })
                .collect()
        };

        Self { colors }
    }

    /// Builds a descriptor directly from already-weighted colors, e.g. when
    /// deserializing from the `ColorIndex`'s own store.
    pub fn from_weighted(colors: Vec<WeightedColor>) -> Self {
        Self { colors }
    }

    pub fn colors(&self) -> &[WeightedColor] {
        &self.colors
    }

    fn color_distance(a: [u8; 3], b: [u8; 3]) -> f32 {
        let d = |i: usize| (a[i] as f32 - b[i] as f32).powi(2);
        (d(0) + d(1) + d(2)).sqrt()
    }

    /// A fixed-cost approximation of the Earth Mover's Distance between two color
    /// histograms: each weighted color is matched against its nearest neighbor in the
    /// other descriptor and the mismatch is accumulated, symmetrically.
    pub fn distance_to(&self, other: &Self) -> f32 {
        let half = |from: &[WeightedColor], to: &[WeightedColor]| -> f32 {
            from.iter()
                .map(|c| {
                    let nearest = to
                        .iter()
                        .map(|o| Self::color_distance(c.rgb, o.rgb))
                        .fold(f32::INFINITY, f32::min);
                    let nearest = if nearest.is_finite() { nearest } else { 255.0 * 3f32.sqrt() };
                    c.weight * nearest
                })
                .sum()
        };

        half(&self.colors, &other.colors) + half(&other.colors, &self.colors)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn identical_descriptors_have_zero_distance() {
        let d = ColorDescriptor::from_histogram(vec![([255, 0, 0], 10), ([0, 0, 255], 5)]);
        assert_eq!(0.0, d.distance_to(&d));
    }

    #[test]
    fn distinct_descriptors_have_positive_distance() {
        let red = ColorDescriptor::from_histogram(vec![([255, 0, 0], 10)]);
        let blue = ColorDescriptor::from_histogram(vec![([0, 0, 255], 10)]);
        assert!(red.distance_to(&blue) > 0.0);
    }

    #[test]
    fn keeps_only_the_heaviest_buckets() {
        let buckets: Vec<_> = (0..(MAX_COLORS as u32 + 10))
            .map(|i| ([i as u8, 0, 0], i + 1))
            .collect();
        let d = ColorDescriptor::from_histogram(buckets);
        assert_eq!(MAX_COLORS, d.colors().len());
        // heaviest bucket kept is the one with the largest count
        assert!(d.colors().iter().any(|c| c.rgb[0] as u32 == MAX_COLORS as u32 + 9));
    }

    #[test]
    fn weights_sum_to_one() {
        let d = ColorDescriptor::from_histogram(vec![([1, 0, 0], 1), ([2, 0, 0], 3)]);
        let sum: f32 = d.colors().iter().map(|c| c.weight).sum();
        assert!((sum - 1.0).abs() < 1e-6);
    }
}

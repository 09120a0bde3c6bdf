use crate::pixel_buf::{CHANNELS, PixelBuffer};

/// Mismatches listed individually before the rest are only counted.
pub const MAX_REPORTED_MISMATCHES: usize = 16;

#[derive(Clone, Debug, PartialEq)]
pub struct Mismatch {
    pub x: u32,
    pub y: u32,
    pub channel: usize,
    pub expected: f32,
    pub actual: f32,
}

/// Outcome of comparing a parallel result against the reference.
#[derive(Clone, Debug, PartialEq)]
pub struct VerifyReport {
    pub dimensions_match: bool,
    /// Samples whose difference exceeded the tolerance (or was NaN).
    pub mismatches: usize,
    pub max_diff: f32,
    /// The first [`MAX_REPORTED_MISMATCHES`] mismatches in row-major order.
    pub reported: Vec<Mismatch>,
}

impl VerifyReport {
    pub fn passed(&self) -> bool {
        self.dimensions_match && self.mismatches == 0
    }

    pub fn suppressed(&self) -> bool {
        self.mismatches > self.reported.len()
    }
}

/// Compare every channel of `output` against `reference`.
pub fn compare(reference: &PixelBuffer, output: &PixelBuffer, tolerance: f32) -> VerifyReport {
    if !reference.same_dimensions(output) {
        return VerifyReport {
            dimensions_match: false,
            mismatches: reference.data.len().max(output.data.len()),
            max_diff: f32::INFINITY,
            reported: Vec::new(),
        };
    }

    let mut report = VerifyReport {
        dimensions_match: true,
        mismatches: 0,
        max_diff: 0.0,
        reported: Vec::new(),
    };
    let width = reference.width as usize;
    for (i, (&expected, &actual)) in reference.data.iter().zip(&output.data).enumerate() {
        let diff = (expected - actual).abs();
        if diff <= tolerance {
            report.max_diff = report.max_diff.max(diff);
            continue;
        }
        report.max_diff = if diff.is_nan() {
            f32::INFINITY
        } else {
            report.max_diff.max(diff)
        };
        report.mismatches += 1;
        if report.reported.len() < MAX_REPORTED_MISMATCHES {
            let pixel = i / CHANNELS;
            report.reported.push(Mismatch {
                x: (pixel % width) as u32,
                y: (pixel / width) as u32,
                channel: i % CHANNELS,
                expected,
                actual,
            });
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_buffers_pass_with_zero_tolerance() {
        let a = PixelBuffer::filled(3, 3, [0.1, 0.2, 0.3, 0.4]);
        let report = compare(&a, &a.clone(), 0.0);
        assert!(report.passed());
        assert_eq!(report.max_diff, 0.0);
    }

    #[test]
    fn difference_within_tolerance_passes() {
        let a = PixelBuffer::filled(2, 2, [0.5; 4]);
        let mut b = a.clone();
        b.data[6] += 0.5 / 255.0;
        assert!(compare(&a, &b, 1.0 / 255.0).passed());
    }

    #[test]
    fn mismatch_location_is_reported() {
        let a = PixelBuffer::new(3, 2);
        let mut b = a.clone();
        // pixel (2,1), channel 1
        b.data[(3 + 2) * 4 + 1] = 0.5;
        let report = compare(&a, &b, 1.0 / 255.0);
        assert!(!report.passed());
        assert_eq!(report.mismatches, 1);
        assert_eq!(
            report.reported[0],
            Mismatch {
                x: 2,
                y: 1,
                channel: 1,
                expected: 0.0,
                actual: 0.5,
            }
        );
    }

    #[test]
    fn reporting_is_capped() {
        let a = PixelBuffer::new(10, 10);
        let b = PixelBuffer::filled(10, 10, [1.0; 4]);
        let report = compare(&a, &b, 0.01);
        assert_eq!(report.mismatches, 400);
        assert_eq!(report.reported.len(), MAX_REPORTED_MISMATCHES);
        assert!(report.suppressed());
    }

    #[test]
    fn nan_is_a_mismatch() {
        let a = PixelBuffer::new(1, 1);
        let mut b = a.clone();
        b.data[0] = f32::NAN;
        let report = compare(&a, &b, 1.0);
        assert_eq!(report.mismatches, 1);
        assert!(report.max_diff.is_infinite());
    }

    #[test]
    fn dimension_mismatch_fails() {
        let report = compare(&PixelBuffer::new(2, 2), &PixelBuffer::new(4, 1), 1.0);
        assert!(!report.dimensions_match);
        assert!(!report.passed());
    }
}

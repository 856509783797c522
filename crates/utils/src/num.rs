/// Round up to 2 decimal places. Timings are reported at this precision.
pub fn round2(value: f64) -> f64 {
    round_places(value, 2)
}

/// Round up to 4 decimal places. Ratios and metric values use this precision.
pub fn round4(value: f64) -> f64 {
    round_places(value, 4)
}

pub fn round_places(value: f64, places: i32) -> f64 {
    let round = 10f64.powi(places);
    (value * round).ceil() / round
}

/// Ratio of n over d, 0.0 when the denominator is zero.
pub fn percent(n: f64, d: f64) -> f64 {
    if d == 0.0 { 0.0 } else { round4(n / d) }
}

/// Cache hit ratio: hits over hits + reads, 0.0 when there was no traffic.
pub fn hit_percent(hit: f64, read: f64) -> f64 {
    let total = hit + read;
    if total == 0.0 { 0.0 } else { round4(hit / total) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_up_at_the_requested_precision() {
        assert_eq!(round2(1.2345), 1.24);
        assert_eq!(round2(1.0), 1.0);
        assert_eq!(round4(0.123456), 0.1235);
    }

    #[test]
    fn percent_handles_zero_denominator() {
        assert_eq!(percent(5.0, 0.0), 0.0);
        assert_eq!(percent(1.0, 4.0), 0.25);
    }

    #[test]
    fn hit_percent_handles_no_traffic() {
        assert_eq!(hit_percent(0.0, 0.0), 0.0);
        assert_eq!(hit_percent(3.0, 1.0), 0.75);
    }
}

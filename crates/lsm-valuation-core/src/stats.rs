//! Sample statistics shared by the engines.

/// Sample mean and standard error (`s / sqrt(n)`, with `n - 1` in the variance).
pub fn mean_and_stderr(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mut sum = 0.0_f64;
    let mut sum_sq = 0.0_f64;
    for &v in values {
        sum += v;
        sum_sq += v * v;
    }
    let mean = sum / n;
    let var = if values.len() > 1 {
        ((sum_sq - sum * sum / n) / (n - 1.0)).max(0.0)
    } else {
        0.0
    };
    (mean, (var / n).sqrt())
}

/// Per-step discount factor `exp(-r * dt)`.
#[inline]
pub fn step_discount(rate: f64, dt: f64) -> f64 {
    (-rate * dt).exp()
}

/// Running share of paths whose event index is `<= t`, for every `t`.
pub(crate) fn cumulative_share(event_steps: &[Option<usize>], steps: usize) -> Vec<f64> {
    let n = event_steps.len().max(1) as f64;
    let mut counts = vec![0usize; steps];
    for t in event_steps.iter().flatten() {
        if *t < steps {
            counts[*t] += 1;
        }
    }
    let mut running = 0usize;
    counts
        .into_iter()
        .map(|c| {
            running += c;
            running as f64 / n
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_and_stderr() {
        let (m, se) = mean_and_stderr(&[1.0, 2.0, 3.0, 4.0]);
        assert!((m - 2.5).abs() < 1e-12);
        // sample sd = sqrt(5/3)
        assert!((se - (5.0_f64 / 3.0).sqrt() / 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_single_value_has_zero_stderr() {
        assert_eq!(mean_and_stderr(&[7.0]), (7.0, 0.0));
        assert_eq!(mean_and_stderr(&[]), (0.0, 0.0));
    }

    #[test]
    fn test_cumulative_share_is_monotone() {
        let events = [Some(2), None, Some(0), Some(2)];
        let share = cumulative_share(&events, 4);
        assert_eq!(share, vec![0.25, 0.25, 0.75, 0.75]);
    }
}

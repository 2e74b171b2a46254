/// Centered moving average. The window shrinks at the edges so the output
/// has the same length as the input.
pub fn moving_average(samples: &[f32], window: usize) -> Vec<f32> {
    if window <= 1 || samples.is_empty() {
        return samples.to_vec();
    }
    let half = window / 2;
    (0..samples.len())
        .map(|i| {
            let start = i.saturating_sub(half);
            let end = (i + half + 1).min(samples.len());
            let slice = &samples[start..end];
            slice.iter().sum::<f32>() / slice.len() as f32
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_signal_is_unchanged() {
        let samples = vec![2.5; 20];
        assert_eq!(moving_average(&samples, 5), samples);
    }

    #[test]
    fn window_of_one_is_identity() {
        let samples = vec![1.0, -1.0, 3.0];
        assert_eq!(moving_average(&samples, 1), samples);
    }

    #[test]
    fn impulse_is_smeared() {
        let mut samples = vec![0.0; 11];
        samples[5] = 10.0;
        let smoothed = moving_average(&samples, 5);
        assert!(smoothed[5] < 10.0);
        assert!(smoothed[4] > 0.0);
        assert!(smoothed[6] > 0.0);
        // Energy stays in the neighborhood
        assert!(smoothed[0] == 0.0 && smoothed[10] == 0.0);
    }

    #[test]
    fn empty_input() {
        assert!(moving_average(&[], 5).is_empty());
    }
}

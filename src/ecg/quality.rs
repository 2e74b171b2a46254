/// Lead quality estimate for one analysis window.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SignalQuality {
    /// 1.0 = clean, 0.0 = unusable (or leads off).
    pub score: f32,
    pub noise_variance: f32,
}

fn variance(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let n = samples.len() as f32;
    let mean = samples.iter().sum::<f32>() / n;
    samples.iter().map(|s| (s - mean).powi(2)).sum::<f32>() / n
}

/// Scores a window by comparing the high-frequency residual (raw minus
/// smoothed) against the overall signal variance. A flat window reads as
/// leads-off and scores zero.
pub fn assess(samples: &[f32], smoothed: &[f32]) -> SignalQuality {
    debug_assert_eq!(samples.len(), smoothed.len());
    let signal_variance = variance(samples);
    if signal_variance <= f32::EPSILON {
        return SignalQuality {
            score: 0.0,
            noise_variance: 0.0,
        };
    }
    let residual: Vec<f32> = samples
        .iter()
        .zip(smoothed)
        .map(|(raw, smooth)| raw - smooth)
        .collect();
    let noise_variance = variance(&residual);
    let score = (1.0 - noise_variance / signal_variance).clamp(0.0, 1.0);
    SignalQuality {
        score,
        noise_variance,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecg::filter::moving_average;

    fn sine(len: usize, period: f32) -> Vec<f32> {
        (0..len)
            .map(|i| (i as f32 * std::f32::consts::TAU / period).sin())
            .collect()
    }

    #[test]
    fn clean_signal_scores_higher_than_noisy() {
        let clean = sine(500, 100.0);
        let clean_quality = assess(&clean, &moving_average(&clean, 5));

        let noisy: Vec<f32> = clean
            .iter()
            .enumerate()
            .map(|(i, s)| s + if i % 2 == 0 { 0.8 } else { -0.8 })
            .collect();
        let noisy_quality = assess(&noisy, &moving_average(&noisy, 5));

        assert!(clean_quality.score > noisy_quality.score);
        assert!(clean_quality.score > 0.9);
        assert!(noisy_quality.noise_variance > clean_quality.noise_variance);
    }

    #[test]
    fn flat_window_reads_as_leads_off() {
        let flat = vec![0.0; 100];
        let quality = assess(&flat, &moving_average(&flat, 5));
        assert_eq!(quality.score, 0.0);
    }
}

use std::time::Duration;

/// Tuning for the R-peak picker.
#[derive(Debug, Clone)]
pub struct PeakConfig {
    /// Threshold above the window mean, in standard deviations.
    pub threshold_factor: f32,
    /// Minimum spacing between detected peaks.
    pub refractory_ms: u16,
}

impl Default for PeakConfig {
    fn default() -> Self {
        Self {
            threshold_factor: 2.0,
            refractory_ms: 250,
        }
    }
}

/// Finds R-peak sample indices in a (smoothed) window.
///
/// A sample qualifies when it is a local maximum above
/// `mean + threshold_factor * stddev`, and at least the refractory period
/// away from the previously accepted peak. Deterministic for a given
/// window and config.
pub fn detect_r_peaks(samples: &[f32], sample_rate_hz: u16, config: &PeakConfig) -> Vec<usize> {
    if samples.len() < 3 || sample_rate_hz == 0 {
        return Vec::new();
    }
    let n = samples.len() as f32;
    let mean = samples.iter().sum::<f32>() / n;
    let variance = samples.iter().map(|s| (s - mean).powi(2)).sum::<f32>() / n;
    // A flat lead has nothing to detect, and would otherwise put the
    // threshold at the mean itself
    if variance <= f32::EPSILON {
        return Vec::new();
    }
    let threshold = mean + config.threshold_factor * variance.sqrt();
    let refractory_samples =
        ((config.refractory_ms as u32 * sample_rate_hz as u32) / 1000).max(1) as usize;

    let mut peaks: Vec<usize> = Vec::new();
    for i in 1..samples.len() - 1 {
        if samples[i] < threshold {
            continue;
        }
        if samples[i] < samples[i - 1] || samples[i] < samples[i + 1] {
            continue;
        }
        match peaks.last() {
            Some(&last) if i - last < refractory_samples => {
                // Within the refractory window, keep whichever is taller
                if samples[i] > samples[last] {
                    *peaks.last_mut().unwrap() = i;
                }
            }
            _ => peaks.push(i),
        }
    }
    peaks
}

/// Converts peak spacings into RR intervals.
pub fn rr_from_peaks(peaks: &[usize], sample_rate_hz: u16) -> Vec<Duration> {
    if sample_rate_hz == 0 {
        return Vec::new();
    }
    peaks
        .windows(2)
        .map(|pair| Duration::from_secs_f64((pair[1] - pair[0]) as f64 / sample_rate_hz as f64))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spike_train(len: usize, period: usize) -> Vec<f32> {
        let mut samples = vec![0.0; len];
        let mut i = period / 2;
        while i < len {
            samples[i] = 1.0;
            i += period;
        }
        samples
    }

    #[test]
    fn finds_evenly_spaced_peaks() {
        // 250 Hz, spike every second
        let samples = spike_train(2500, 250);
        let peaks = detect_r_peaks(&samples, 250, &PeakConfig::default());
        assert_eq!(peaks.len(), 10);
        for pair in peaks.windows(2) {
            assert_eq!(pair[1] - pair[0], 250);
        }
    }

    #[test]
    fn flat_signal_yields_nothing() {
        assert!(detect_r_peaks(&vec![0.42; 500], 250, &PeakConfig::default()).is_empty());
        assert!(detect_r_peaks(&[], 250, &PeakConfig::default()).is_empty());
    }

    #[test]
    fn refractory_keeps_the_taller_of_close_peaks() {
        let mut samples = vec![0.0; 500];
        samples[100] = 0.8;
        samples[110] = 1.0; // taller twin 40ms later at 250 Hz
        samples[350] = 0.9;
        let peaks = detect_r_peaks(&samples, 250, &PeakConfig::default());
        assert_eq!(peaks, vec![110, 350]);
    }

    #[test]
    fn rr_intervals_from_spacing() {
        let rr = rr_from_peaks(&[0, 250, 375], 250);
        assert_eq!(
            rr,
            vec![Duration::from_secs(1), Duration::from_millis(500)]
        );
        assert!(rr_from_peaks(&[100], 250).is_empty());
    }
}

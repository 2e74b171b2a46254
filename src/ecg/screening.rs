use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Local};

use super::quality::SignalQuality;
use crate::settings::AnalysisSettings;

/// Time-domain statistics over one rolling RR-interval window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RrStats {
    pub mean_rr_ms: f64,
    pub sdrr_ms: f64,
    pub rmssd_ms: f64,
    /// Percentage of successive RR pairs differing by more than 50 ms.
    pub pnn50_pct: f64,
}

impl RrStats {
    pub fn from_intervals(intervals: &[Duration]) -> Option<Self> {
        if intervals.len() < 2 {
            return None;
        }
        let ms: Vec<f64> = intervals.iter().map(|rr| rr.as_secs_f64() * 1000.0).collect();
        let n = ms.len() as f64;
        let mean_rr_ms = ms.iter().sum::<f64>() / n;
        let sdrr_ms =
            (ms.iter().map(|rr| (rr - mean_rr_ms).powi(2)).sum::<f64>() / n).sqrt();

        let diffs: Vec<f64> = ms.windows(2).map(|pair| pair[1] - pair[0]).collect();
        let rmssd_ms =
            (diffs.iter().map(|d| d * d).sum::<f64>() / diffs.len() as f64).sqrt();
        let over_50 = diffs.iter().filter(|d| d.abs() > 50.0).count();
        let pnn50_pct = over_50 as f64 / diffs.len() as f64 * 100.0;

        Some(Self {
            mean_rr_ms,
            sdrr_ms,
            rmssd_ms,
            pnn50_pct,
        })
    }

    pub fn mean_bpm(&self) -> f64 {
        60_000.0 / self.mean_rr_ms
    }
}

/// Screening flags. These are heuristics for triage, not diagnoses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RhythmFlag {
    Bradycardia,
    Tachycardia,
    IrregularRhythm,
    PoorSignal,
}

impl fmt::Display for RhythmFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RhythmFlag::Bradycardia => "bradycardia",
            RhythmFlag::Tachycardia => "tachycardia",
            RhythmFlag::IrregularRhythm => "irregular-rhythm",
            RhythmFlag::PoorSignal => "poor-signal",
        };
        write!(f, "{label}")
    }
}

#[derive(Debug, Clone)]
pub struct ScreeningReport {
    pub timestamp: DateTime<Local>,
    pub stats: Option<RrStats>,
    pub quality: Option<SignalQuality>,
    pub rr_count: usize,
    pub flags: Vec<RhythmFlag>,
}

impl ScreeningReport {
    /// "ok", or the flags joined with '|'. Used in CSV rows and log lines.
    pub fn flags_label(&self) -> String {
        if self.flags.is_empty() {
            "ok".to_string()
        } else {
            self.flags
                .iter()
                .map(|flag| flag.to_string())
                .collect::<Vec<_>>()
                .join("|")
        }
    }
}

/// Applies the configured thresholds to one window.
///
/// A poor-quality lead only reports `PoorSignal`: rate and rhythm flags off
/// a bad trace would be noise. Too few intervals reports nothing.
pub fn screen(
    stats: Option<&RrStats>,
    quality: Option<SignalQuality>,
    rr_count: usize,
    settings: &AnalysisSettings,
) -> Vec<RhythmFlag> {
    let mut flags = Vec::new();

    if let Some(quality) = quality {
        if quality.score < settings.min_quality {
            flags.push(RhythmFlag::PoorSignal);
            return flags;
        }
    }

    let Some(stats) = stats else {
        return flags;
    };
    if rr_count < settings.min_rr_count as usize {
        return flags;
    }

    let mean_bpm = stats.mean_bpm();
    if mean_bpm < settings.brady_bpm as f64 {
        flags.push(RhythmFlag::Bradycardia);
    } else if mean_bpm > settings.tachy_bpm as f64 {
        flags.push(RhythmFlag::Tachycardia);
    }

    if stats.rmssd_ms > settings.rmssd_irregular_ms && stats.pnn50_pct > settings.pnn50_irregular_pct
    {
        flags.push(RhythmFlag::IrregularRhythm);
    }

    flags
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_settings() -> AnalysisSettings {
        AnalysisSettings {
            window_secs: 30,
            screening_interval_secs: 10,
            smoothing_window: 5,
            peak_threshold_factor: 2.0,
            refractory_ms: 250,
            brady_bpm: 50,
            tachy_bpm: 110,
            rmssd_irregular_ms: 120.0,
            pnn50_irregular_pct: 40.0,
            min_quality: 0.35,
            min_rr_count: 8,
        }
    }

    fn steady(ms: u64, count: usize) -> Vec<Duration> {
        vec![Duration::from_millis(ms); count]
    }

    #[test]
    fn steady_sinus_rhythm_is_clean() {
        let stats = RrStats::from_intervals(&steady(1000, 10)).unwrap();
        assert_eq!(stats.mean_rr_ms, 1000.0);
        assert_eq!(stats.sdrr_ms, 0.0);
        assert_eq!(stats.rmssd_ms, 0.0);
        assert_eq!(stats.mean_bpm(), 60.0);
        let flags = screen(Some(&stats), None, 10, &test_settings());
        assert!(flags.is_empty());
    }

    #[test]
    fn slow_rhythm_flags_bradycardia() {
        let stats = RrStats::from_intervals(&steady(1500, 10)).unwrap();
        let flags = screen(Some(&stats), None, 10, &test_settings());
        assert_eq!(flags, vec![RhythmFlag::Bradycardia]);
    }

    #[test]
    fn fast_rhythm_flags_tachycardia() {
        let stats = RrStats::from_intervals(&steady(400, 10)).unwrap();
        let flags = screen(Some(&stats), None, 10, &test_settings());
        assert_eq!(flags, vec![RhythmFlag::Tachycardia]);
    }

    #[test]
    fn alternating_intervals_flag_irregular_rhythm() {
        let intervals: Vec<Duration> = (0..12)
            .map(|i| Duration::from_millis(if i % 2 == 0 { 600 } else { 1100 }))
            .collect();
        let stats = RrStats::from_intervals(&intervals).unwrap();
        assert_eq!(stats.rmssd_ms, 500.0);
        assert_eq!(stats.pnn50_pct, 100.0);
        let flags = screen(Some(&stats), None, 12, &test_settings());
        assert!(flags.contains(&RhythmFlag::IrregularRhythm));
    }

    #[test]
    fn poor_signal_suppresses_rhythm_flags() {
        let stats = RrStats::from_intervals(&steady(1500, 10)).unwrap();
        let quality = SignalQuality {
            score: 0.1,
            noise_variance: 0.5,
        };
        let flags = screen(Some(&stats), Some(quality), 10, &test_settings());
        assert_eq!(flags, vec![RhythmFlag::PoorSignal]);
    }

    #[test]
    fn too_few_intervals_reports_nothing() {
        let stats = RrStats::from_intervals(&steady(1500, 3)).unwrap();
        let flags = screen(Some(&stats), None, 3, &test_settings());
        assert!(flags.is_empty());
        assert!(RrStats::from_intervals(&steady(1000, 1)).is_none());
    }
}

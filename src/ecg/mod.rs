pub mod buffer;
pub mod detector;
pub mod filter;
pub mod quality;
pub mod screening;

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::broadcast::{Receiver as BReceiver, Sender as BSender};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::app::AppUpdate;
use crate::broadcast;
use crate::monitor::{EcgChunk, HeartRateStatus};
use crate::settings::AnalysisSettings;

use buffer::SampleBuffer;
use detector::{detect_r_peaks, rr_from_peaks, PeakConfig};
use filter::moving_average;
use quality::assess;
use screening::{screen, RrStats, ScreeningReport};

struct AnalyzerActor {
    settings: AnalysisSettings,
    peak_config: PeakConfig,
    rr_window: VecDeque<(Instant, Duration)>,
    samples: Option<SampleBuffer>,
    sample_rate_hz: u16,
}

impl AnalyzerActor {
    fn new(settings: AnalysisSettings) -> Self {
        let peak_config = PeakConfig {
            threshold_factor: settings.peak_threshold_factor,
            refractory_ms: settings.refractory_ms,
        };
        Self {
            settings,
            peak_config,
            rr_window: VecDeque::new(),
            samples: None,
            sample_rate_hz: 0,
        }
    }

    fn handle_status(&mut self, status: &HeartRateStatus) {
        if status.heart_rate_bpm == 0 {
            return;
        }
        let now = Instant::now();
        for rr in &status.rr_intervals {
            self.rr_window.push_back((now, *rr));
        }
        self.evict_stale(now);
    }

    fn handle_chunk(&mut self, chunk: &EcgChunk) {
        if chunk.sample_rate_hz == 0 {
            return;
        }
        if self.sample_rate_hz != chunk.sample_rate_hz {
            // Source changed (or first chunk): size the window to it
            self.sample_rate_hz = chunk.sample_rate_hz;
            let capacity = self.settings.window_secs as usize * chunk.sample_rate_hz as usize;
            self.samples = Some(SampleBuffer::new(capacity.max(1)));
        }
        if let Some(buffer) = self.samples.as_mut() {
            buffer.extend(&chunk.samples);
        }
    }

    fn evict_stale(&mut self, now: Instant) {
        let window = Duration::from_secs(self.settings.window_secs as u64);
        while let Some((arrived, _)) = self.rr_window.front() {
            if now.duration_since(*arrived) > window {
                self.rr_window.pop_front();
            } else {
                break;
            }
        }
    }

    fn build_report(&mut self) -> ScreeningReport {
        self.evict_stale(Instant::now());

        let mut quality = None;
        let mut peak_rr = Vec::new();
        if let Some(buffer) = &self.samples {
            if buffer.len() >= self.settings.smoothing_window as usize {
                let raw = buffer.to_vec();
                let smoothed = moving_average(&raw, self.settings.smoothing_window as usize);
                quality = Some(assess(&raw, &smoothed));
                let peaks = detect_r_peaks(&smoothed, self.sample_rate_hz, &self.peak_config);
                peak_rr = rr_from_peaks(&peaks, self.sample_rate_hz);
            }
        }

        // Device-reported RR intervals are the primary rhythm source;
        // peak-derived intervals cover waveform-only sources.
        let device_rr: Vec<Duration> = self.rr_window.iter().map(|(_, rr)| *rr).collect();
        let intervals = if device_rr.is_empty() { peak_rr } else { device_rr };

        let rr_count = intervals.len();
        let stats = RrStats::from_intervals(&intervals);
        let flags = screen(stats.as_ref(), quality, rr_count, &self.settings);

        ScreeningReport {
            timestamp: chrono::Local::now(),
            stats,
            quality,
            rr_count,
            flags,
        }
    }
}

pub async fn analyzer_thread(
    mut broadcast_rx: BReceiver<AppUpdate>,
    broadcast_tx: BSender<AppUpdate>,
    analysis_settings: AnalysisSettings,
    cancel_token: CancellationToken,
) {
    let mut actor = AnalyzerActor::new(analysis_settings);
    let mut screening_interval = tokio::time::interval(Duration::from_secs(
        actor.settings.screening_interval_secs.max(1) as u64,
    ));
    // The first tick fires immediately; skip it so the first report
    // covers a real window
    screening_interval.tick().await;

    info!("Analyzer thread started!");

    loop {
        tokio::select! {
            update = broadcast_rx.recv() => {
                match update {
                    Ok(AppUpdate::HeartRateStatus(status)) => actor.handle_status(&status),
                    Ok(AppUpdate::EcgChunk(chunk)) => actor.handle_chunk(&chunk),
                    Ok(_) => {}
                    Err(RecvError::Closed) => {
                        warn!("Analyzer: Channel closed");
                        return;
                    }
                    Err(RecvError::Lagged(count)) => {
                        warn!("Analyzer: Lagged! Missed {count} messages");
                    }
                }
            }
            _ = screening_interval.tick() => {
                let report = actor.build_report();
                if report.flags.is_empty() {
                    debug!("Screening window clean ({} RR intervals)", report.rr_count);
                } else {
                    warn!("Screening flags raised: {}", report.flags_label());
                }
                broadcast!(broadcast_tx, report);
            }
            _ = cancel_token.cancelled() => {
                info!("Shutting down Analyzer thread!");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::{BatteryLevel, ContactStatus};

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

    fn status_with_rr(bpm: u16, rr_ms: u64, count: usize) -> HeartRateStatus {
        HeartRateStatus {
            heart_rate_bpm: bpm,
            rr_intervals: vec![Duration::from_millis(rr_ms); count],
            battery_level: BatteryLevel::NotReported,
            contact: ContactStatus::Contact,
            timestamp: chrono::Local::now(),
        }
    }

    #[test_log::test]
    fn device_rr_feeds_the_report() {
        let mut actor = AnalyzerActor::new(test_settings());
        actor.handle_status(&status_with_rr(40, 1500, 10));
        let report = actor.build_report();
        assert_eq!(report.rr_count, 10);
        let stats = report.stats.unwrap();
        assert_eq!(stats.mean_rr_ms, 1500.0);
        assert_eq!(
            report.flags,
            vec![screening::RhythmFlag::Bradycardia]
        );
    }

    #[test]
    fn zero_bpm_updates_are_ignored() {
        let mut actor = AnalyzerActor::new(test_settings());
        actor.handle_status(&status_with_rr(0, 1000, 4));
        assert_eq!(actor.rr_window.len(), 0);
    }

    #[test_log::test]
    fn waveform_peaks_cover_rr_less_sources() {
        let mut actor = AnalyzerActor::new(test_settings());
        // 10 seconds of a 1 Hz spike train at 250 Hz
        let mut samples = vec![0.0; 2500];
        let mut i = 125;
        while i < samples.len() {
            samples[i] = 1.0;
            i += 250;
        }
        actor.handle_chunk(&EcgChunk {
            samples,
            sample_rate_hz: 250,
            timestamp: chrono::Local::now(),
        });
        let report = actor.build_report();
        assert!(report.rr_count >= 8, "rr_count = {}", report.rr_count);
        let stats = report.stats.unwrap();
        assert!((stats.mean_rr_ms - 1000.0).abs() < 50.0);
        assert!(report.quality.is_some());
    }

    #[test]
    fn chunk_sample_rate_change_resizes_the_window() {
        let mut actor = AnalyzerActor::new(test_settings());
        actor.handle_chunk(&EcgChunk {
            samples: vec![0.0; 10],
            sample_rate_hz: 250,
            timestamp: chrono::Local::now(),
        });
        assert_eq!(actor.samples.as_ref().unwrap().capacity(), 30 * 250);
        actor.handle_chunk(&EcgChunk {
            samples: vec![0.0; 10],
            sample_rate_hz: 130,
            timestamp: chrono::Local::now(),
        });
        assert_eq!(actor.samples.as_ref().unwrap().capacity(), 30 * 130);
    }
}

use super::{rr_from_bpm, BatteryLevel, ContactStatus, EcgChunk, HeartRateStatus};
use crate::app::{AppAlert, AppUpdate};
use crate::broadcast;
use crate::settings::SimulatorSettings;

use std::f32::consts::PI;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::broadcast::Sender as BSender;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::info;

const CHUNKS_PER_SEC: u64 = 4;

/// Synthesizes one cardiac cycle's worth of waveform per RR interval,
/// R wave centered at phase 0.5.
struct EcgSynth {
    sample_rate: f32,
    phase: f32,
    wander_phase: f32,
    rng: StdRng,
}

fn gaussian_bump(t: f32, center: f32, width: f32, amplitude: f32) -> f32 {
    let x = (t - center) / width;
    amplitude * (-0.5 * x * x).exp()
}

fn pqrst(phase: f32) -> f32 {
    let t = phase - 0.5;
    gaussian_bump(t, -0.16, 0.040, 0.15)
        + gaussian_bump(t, -0.02, 0.010, -0.10)
        + gaussian_bump(t, 0.0, 0.020, 1.0)
        + gaussian_bump(t, 0.03, 0.0125, -0.20)
        + gaussian_bump(t, 0.25, 0.080, 0.25)
}

impl EcgSynth {
    fn new(sample_rate_hz: u16) -> Self {
        Self {
            sample_rate: sample_rate_hz.max(1) as f32,
            phase: 0.0,
            wander_phase: 0.0,
            rng: StdRng::from_entropy(),
        }
    }

    fn next_chunk(&mut self, bpm: u16, len: usize) -> Vec<f32> {
        let rr_secs = 60.0 / bpm.max(1) as f32;
        let mut samples = Vec::with_capacity(len);
        for _ in 0..len {
            self.phase += 1.0 / (self.sample_rate * rr_secs);
            if self.phase >= 1.0 {
                self.phase -= 1.0;
            }
            self.wander_phase += 0.3 / self.sample_rate;
            let mut sample = pqrst(self.phase);
            sample += 0.05 * (2.0 * PI * self.wander_phase).sin();
            sample += 0.02 * (self.rng.gen::<f32>() - 0.5) * 2.0;
            samples.push(sample);
        }
        samples
    }
}

pub async fn simulator_thread(
    broadcast_tx: BSender<AppUpdate>,
    simulator_settings: SimulatorSettings,
    cancel_token: CancellationToken,
) {
    let bpm_update_per_sec = Duration::from_secs_f32(1.0 / (simulator_settings.bpm_speed));
    let mut bpm_update_interval = time::interval(bpm_update_per_sec);
    let mut chunk_interval = time::interval(Duration::from_millis(1000 / CHUNKS_PER_SEC));
    let low_bpm = simulator_settings.low_bpm;
    let high_bpm = simulator_settings.high_bpm;
    let loops_before_dc = simulator_settings.loops_before_dc;
    let sample_rate_hz = simulator_settings.sample_rate_hz;
    let chunk_len = (sample_rate_hz as usize / CHUNKS_PER_SEC as usize).max(1);

    let mut synth = EcgSynth::new(sample_rate_hz);
    let mut loops: u16 = 0;
    let mut positive_direction = true;
    let mut dropped_out = false;
    let mut hr_status = HeartRateStatus {
        heart_rate_bpm: low_bpm.saturating_sub(1),
        battery_level: BatteryLevel::Level(100),
        contact: ContactStatus::Contact,
        ..Default::default()
    };

    loop {
        tokio::select! {
            _ = bpm_update_interval.tick() => {
                let bound = if positive_direction {
                    hr_status.heart_rate_bpm += 1;
                    high_bpm
                } else {
                    hr_status.heart_rate_bpm -= 1;
                    low_bpm
                };
                hr_status.rr_intervals = vec![rr_from_bpm(hr_status.heart_rate_bpm)];
                hr_status.timestamp = chrono::Local::now();
                if hr_status.heart_rate_bpm == bound {
                    positive_direction = !positive_direction;
                    loops += 1;
                    if loops > loops_before_dc {
                        loops = 0;
                    }
                }
                dropped_out = loops == loops_before_dc && loops_before_dc != 0;
                if dropped_out {
                    broadcast!(broadcast_tx, AppAlert::Intermittent(
                        "Simulating lost connection".into(),
                    ));
                } else {
                    broadcast!(broadcast_tx, hr_status.clone());
                }
            }
            _ = chunk_interval.tick() => {
                if !dropped_out && hr_status.heart_rate_bpm > 0 {
                    let chunk = EcgChunk {
                        samples: synth.next_chunk(hr_status.heart_rate_bpm, chunk_len),
                        sample_rate_hz,
                        timestamp: chrono::Local::now(),
                    };
                    broadcast!(broadcast_tx, chunk);
                }
            }
            _ = cancel_token.cancelled() => {
                info!("Shutting down Simulator thread!");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn r_wave_dominates_the_cycle() {
        let peak = pqrst(0.5);
        for i in 0..100 {
            let phase = i as f32 / 100.0;
            if (phase - 0.5).abs() > 0.02 {
                assert!(pqrst(phase) < peak);
            }
        }
        assert!(peak > 0.9);
    }

    #[test]
    fn chunks_have_requested_length_and_sane_range() {
        let mut synth = EcgSynth::new(250);
        let samples = synth.next_chunk(70, 250);
        assert_eq!(samples.len(), 250);
        for sample in &samples {
            assert!(sample.abs() < 2.0, "sample out of range: {sample}");
        }
    }

    #[test]
    fn beat_spacing_follows_bpm() {
        let mut synth = EcgSynth::new(250);
        // 10 seconds at 60 bpm: one R wave per second
        let samples = synth.next_chunk(60, 2500);
        let beats = samples
            .windows(2)
            .filter(|w| w[0] < 0.6 && w[1] >= 0.6)
            .count();
        assert!((8..=12).contains(&beats), "expected ~10 beats, got {beats}");
    }
}

//! Mel filter bank for Whisper's log-mel spectrogram.
//!
//! Whisper was trained on features computed with a Slaney-style mel scale
//! (linear below 1kHz, logarithmic above) and area-normalised triangular
//! filters, 16kHz audio and a 400 point FFT. The bank is laid out row-major,
//! `n_mels` rows of `N_FFT / 2 + 1` weights, which is the layout
//! `candle_transformers::models::whisper::audio::pcm_to_mel` consumes.

use candle_transformers::models::whisper as m;

const F_SP: f64 = 200.0 / 3.0;
const MIN_LOG_HZ: f64 = 1000.0;
const MIN_LOG_MEL: f64 = MIN_LOG_HZ / F_SP;

fn log_step() -> f64 {
    6.4f64.ln() / 27.0
}

fn hz_to_mel(hz: f64) -> f64 {
    if hz >= MIN_LOG_HZ {
        MIN_LOG_MEL + (hz / MIN_LOG_HZ).ln() / log_step()
    } else {
        hz / F_SP
    }
}

fn mel_to_hz(mel: f64) -> f64 {
    if mel >= MIN_LOG_MEL {
        MIN_LOG_HZ * (log_step() * (mel - MIN_LOG_MEL)).exp()
    } else {
        F_SP * mel
    }
}

/// Build the filter bank for `n_mels` bins at Whisper's sample rate and FFT size.
pub fn mel_filters(n_mels: usize) -> Vec<f32> {
    let sample_rate = m::SAMPLE_RATE as f64;
    let n_freqs = m::N_FFT / 2 + 1;
    let f_max = sample_rate / 2.0;

    let fft_freqs: Vec<f64> = (0..n_freqs)
        .map(|i| i as f64 * f_max / (n_freqs - 1) as f64)
        .collect();

    // n_mels + 2 points evenly spaced on the mel scale, back in Hz
    let mel_max = hz_to_mel(f_max);
    let mel_points: Vec<f64> = (0..n_mels + 2)
        .map(|i| mel_to_hz(mel_max * i as f64 / (n_mels + 1) as f64))
        .collect();

    let mut filters = vec![0f32; n_mels * n_freqs];
    for i in 0..n_mels {
        let (lower, center, upper) = (mel_points[i], mel_points[i + 1], mel_points[i + 2]);
        let norm = 2.0 / (upper - lower);

        for (j, &freq) in fft_freqs.iter().enumerate() {
            let rising = (freq - lower) / (center - lower);
            let falling = (upper - freq) / (upper - center);
            let weight = rising.min(falling).max(0.0);
            filters[i * n_freqs + j] = (weight * norm) as f32;
        }
    }

    filters
}

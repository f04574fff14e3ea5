//! # Audio File Decoding
//!
//! Turns an audio file on disk into the 16kHz mono `f32` PCM that Whisper
//! expects. The container is sniffed from the file contents, so an M4A
//! recording saved under a `.wav` name still decodes.
//!
//! ## Pipeline:
//! 1. Probe the container (WAV, FLAC, OGG, MP3, MP4/M4A)
//! 2. Decode every packet of the default track, skipping corrupt frames
//! 3. Downmix interleaved channels to mono
//! 4. Resample to 16kHz when the source rate differs

use anyhow::{Context, Result};
use std::fmt;
use std::fs::File;
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// Sample rate every Whisper model is trained on.
pub const TARGET_SAMPLE_RATE: u32 = 16_000;

/// The file could not be interpreted as audio.
///
/// Kept distinct from I/O and model failures so the HTTP layer can answer
/// with a client error instead of a server error.
#[derive(Debug, Clone)]
pub struct AudioDecodeError {
    message: String,
}

impl AudioDecodeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

impl fmt::Display for AudioDecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "audio decoding failed: {}", self.message)
    }
}

impl std::error::Error for AudioDecodeError {}

/// Decoded audio ready for feature extraction.
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    /// Mono samples at [`TARGET_SAMPLE_RATE`], range [-1.0, 1.0]
    pub samples: Vec<f32>,
    /// Sample rate of the source before resampling
    pub source_sample_rate: u32,
    /// Channel count of the source before downmixing
    pub source_channels: usize,
}

impl DecodedAudio {
    pub fn duration_seconds(&self) -> f64 {
        self.samples.len() as f64 / TARGET_SAMPLE_RATE as f64
    }
}

/// Decode the audio file at `path` into 16kHz mono PCM.
pub fn decode_file(path: &Path) -> Result<DecodedAudio> {
    let file = File::open(path)
        .with_context(|| format!("opening audio file {}", path.display()))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let probed = symphonia::default::get_probe()
        .format(
            &Hint::new(),
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| AudioDecodeError::new(format!("probe: {}", e)))?;

    let mut format = probed.format;

    let track = format
        .default_track()
        .ok_or_else(|| AudioDecodeError::new("no audio track found"))?;
    let track_id = track.id;
    let codec_params = track.codec_params.clone();

    let source_rate = codec_params
        .sample_rate
        .ok_or_else(|| AudioDecodeError::new("unknown sample rate"))?;
    let channels = codec_params.channels.map(|c| c.count()).unwrap_or(1).max(1);

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| AudioDecodeError::new(format!("codec: {}", e)))?;

    let mut samples: Vec<f32> = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(AudioDecodeError::new(format!("packet: {}", e)).into()),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => {
                tracing::warn!(error = %e, "Skipping corrupt audio frame");
                continue;
            }
            Err(e) => return Err(AudioDecodeError::new(format!("decode: {}", e)).into()),
        };

        let spec = *decoded.spec();
        let frames = decoded.frames();
        if frames == 0 {
            continue;
        }

        let mut buffer = SampleBuffer::<f32>::new(frames as u64, spec);
        buffer.copy_interleaved_ref(decoded);
        downmix_into(buffer.samples(), spec.channels.count().max(1), &mut samples);
    }

    if samples.is_empty() {
        return Err(AudioDecodeError::new("no audio samples decoded").into());
    }

    if source_rate != TARGET_SAMPLE_RATE {
        samples = resample(&samples, source_rate, TARGET_SAMPLE_RATE)?;
        // A handful of source samples can round down to nothing
        if samples.is_empty() {
            return Err(AudioDecodeError::new("no audio samples decoded").into());
        }
    }

    tracing::debug!(
        samples = samples.len(),
        source_rate,
        channels,
        duration_secs = samples.len() as f32 / TARGET_SAMPLE_RATE as f32,
        "Audio decoded to 16kHz mono PCM"
    );

    Ok(DecodedAudio {
        samples,
        source_sample_rate: source_rate,
        source_channels: channels,
    })
}

/// Average interleaved frames down to one channel.
fn downmix_into(interleaved: &[f32], channels: usize, out: &mut Vec<f32>) {
    if channels == 1 {
        out.extend_from_slice(interleaved);
        return;
    }
    out.extend(
        interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32),
    );
}

fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    use rubato::{
        Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
    };

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let ratio = to_rate as f64 / from_rate as f64;
    let chunk_size = 1024;

    let mut resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, chunk_size, 1)
        .context("initialising resampler")?;

    let mut output = Vec::with_capacity((samples.len() as f64 * ratio) as usize + chunk_size);

    for chunk in samples.chunks(chunk_size) {
        let mut input = chunk.to_vec();
        input.resize(chunk_size, 0.0);

        let result = resampler.process(&[input], None).context("resampling audio")?;
        if let Some(channel) = result.first() {
            output.extend_from_slice(channel);
        }
    }

    // The last chunk was zero padded
    let expected_len = samples.len() as u64 * to_rate as u64 / from_rate as u64;
    output.truncate(expected_len as usize);
    Ok(output)
}

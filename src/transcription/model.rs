//! # Whisper Model Management
//!
//! Handles loading Whisper models using Candle-rs and decoding log-mel
//! spectrograms to text.
//!
//! ## Model Loading Process:
//! 1. Download model files from HuggingFace if not cached locally
//! 2. Load tokenizer and configuration
//! 3. Initialize model weights on the selected device (CPU/GPU)
//!
//! ## Decoding:
//! Audio is cut into 30 second windows (3000 mel frames). Each window is
//! encoded once and decoded from the prompt
//! `<|startoftranscript|><|lang|><|transcribe|><|notimestamps|>`, greedily at
//! first. A pass that starts looping on the same tokens or ends with a low
//! average log probability is retried at the next higher sampling
//! temperature. Windows the model scores as silence produce no text.

use crate::transcription::mel;
use anyhow::{anyhow, Context, Result};
use candle_core::{Device, IndexOp, Tensor};
use candle_nn::{ops::softmax, VarBuilder};
use candle_transformers::models::whisper::{self as m, audio, Config};
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::PathBuf;
use tokenizers::Tokenizer;

/// Sampling temperatures tried in order until a pass is accepted.
const TEMPERATURES: [f64; 6] = [0.0, 0.2, 0.4, 0.6, 0.8, 1.0];

/// Passes averaging below this log probability per token are retried.
const LOGPROB_THRESHOLD: f64 = -1.0;

/// Above this `<|nospeech|>` probability a window counts as silence.
const NO_SPEECH_THRESHOLD: f64 = 0.6;

const SAMPLING_SEED: u64 = 299_792_458;

/// Available Whisper model sizes with their characteristics.
///
/// ## Trade-offs:
/// - **Size vs Accuracy**: Larger models are more accurate but slower
/// - **Memory vs Speed**: More memory usage for better performance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ModelSize {
    Tiny,
    Base,
    Small,
    Medium,
    Large,
}

impl ModelSize {
    /// Get the HuggingFace model repository name.
    pub fn repo_name(&self) -> &'static str {
        match self {
            ModelSize::Tiny => "openai/whisper-tiny",
            ModelSize::Base => "openai/whisper-base",
            ModelSize::Small => "openai/whisper-small",
            ModelSize::Medium => "openai/whisper-medium",
            ModelSize::Large => "openai/whisper-large-v2",
        }
    }
}

impl std::str::FromStr for ModelSize {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "tiny" => Ok(ModelSize::Tiny),
            "base" => Ok(ModelSize::Base),
            "small" => Ok(ModelSize::Small),
            "medium" => Ok(ModelSize::Medium),
            "large" => Ok(ModelSize::Large),
            _ => Err(anyhow!("Unknown model size: {}", s)),
        }
    }
}

impl std::fmt::Display for ModelSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ModelSize::Tiny => "tiny",
            ModelSize::Base => "base",
            ModelSize::Small => "small",
            ModelSize::Medium => "medium",
            ModelSize::Large => "large",
        };
        write!(f, "{}", name)
    }
}

/// Where model files come from.
#[derive(Debug, Clone)]
pub struct ModelSource {
    /// HuggingFace repository id, e.g. `openai/whisper-base`
    pub repo_id: String,
    /// Override for the hub cache directory
    pub cache_dir: Option<PathBuf>,
}

/// Special token ids resolved from the tokenizer.
#[derive(Debug, Clone, Copy)]
struct SpecialTokens {
    sot: u32,
    transcribe: u32,
    no_timestamps: u32,
    eot: u32,
    /// `<|nospeech|>`, called `<|nocaptions|>` by older tokenizers
    no_speech: Option<u32>,
}

/// Outcome of decoding one window at one temperature.
#[derive(Debug, Clone)]
struct DecodingResult {
    text: String,
    avg_logprob: f64,
    no_speech_prob: f64,
    temperature: f64,
    repetitive: bool,
}

impl DecodingResult {
    /// Whether the pass looks like a hallucination worth retrying hotter.
    fn needs_fallback(&self) -> bool {
        if self.no_speech_prob > NO_SPEECH_THRESHOLD {
            return false;
        }
        self.repetitive || self.avg_logprob < LOGPROB_THRESHOLD
    }

    fn is_silence(&self) -> bool {
        self.no_speech_prob > NO_SPEECH_THRESHOLD && self.avg_logprob < LOGPROB_THRESHOLD
    }
}

/// A loaded Whisper model ready for transcription.
///
/// ## Mutability:
/// Decoding caches cross-attention keys/values inside the model, so
/// [`WhisperModel::transcribe`] takes `&mut self`. Callers that share a model
/// between threads put it behind a mutex.
pub struct WhisperModel {
    model: m::model::Whisper,
    config: Config,
    device: Device,
    tokenizer: Tokenizer,
    mel_filters: Vec<f32>,
    tokens: SpecialTokens,
    /// Additive logit mask: `-inf` for tokens the model must never emit
    suppress_mask: Tensor,
    rng: StdRng,
    repo_id: String,
}

impl WhisperModel {
    /// Load a Whisper model from HuggingFace.
    ///
    /// ## Loading Process:
    /// 1. Create HuggingFace API client (honours HF_TOKEN, HF_HUB_CACHE, HF_HOME)
    /// 2. Download model files (cached locally)
    /// 3. Load tokenizer and configuration
    /// 4. Initialize model weights
    pub async fn load(source: &ModelSource, device: Device) -> Result<Self> {
        tracing::info!(repo = %source.repo_id, "Loading Whisper model...");
        let start_time = std::time::Instant::now();

        let api = build_hub_api(source)?;
        let repo = api.model(source.repo_id.clone());

        let config_filename = repo
            .get("config.json")
            .await
            .with_context(|| format!("Failed to download config.json from {}", source.repo_id))?;
        let tokenizer_filename = repo
            .get("tokenizer.json")
            .await
            .with_context(|| format!("Failed to download tokenizer.json from {}", source.repo_id))?;
        let model_filename = repo
            .get("model.safetensors")
            .await
            .with_context(|| format!("Failed to download model weights from {}", source.repo_id))?;

        let config: Config = serde_json::from_reader(std::fs::File::open(&config_filename)?)
            .context("Failed to parse model config")?;
        tracing::debug!(
            mel_bins = config.num_mel_bins,
            vocab = config.vocab_size,
            "Model config loaded"
        );

        let tokenizer = Tokenizer::from_file(&tokenizer_filename)
            .map_err(|e| anyhow!("Failed to load tokenizer: {}", e))?;

        // SAFETY: safetensors files are memory-mapped read-only
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[model_filename], m::DTYPE, &device)? };
        let model = m::model::Whisper::load(&vb, config.clone())?;

        let whisper_model = Self::from_parts(model, config, tokenizer, device, source.repo_id.clone())?;

        tracing::info!(
            repo = %source.repo_id,
            "Whisper model loaded in {:.2}s",
            start_time.elapsed().as_secs_f64()
        );

        Ok(whisper_model)
    }

    fn from_parts(
        model: m::model::Whisper,
        config: Config,
        tokenizer: Tokenizer,
        device: Device,
        repo_id: String,
    ) -> Result<Self> {
        let tokens = SpecialTokens {
            sot: token_id(&tokenizer, m::SOT_TOKEN)?,
            transcribe: token_id(&tokenizer, m::TRANSCRIBE_TOKEN)?,
            no_timestamps: token_id(&tokenizer, m::NO_TIMESTAMPS_TOKEN)?,
            eot: token_id(&tokenizer, m::EOT_TOKEN)?,
            no_speech: ["<|nospeech|>", "<|nocaptions|>"]
                .iter()
                .find_map(|token| tokenizer.token_to_id(token)),
        };

        let suppress: Vec<f32> = (0..config.vocab_size as u32)
            .map(|id| {
                if config.suppress_tokens.contains(&id) || id == tokens.no_timestamps {
                    f32::NEG_INFINITY
                } else {
                    0.0
                }
            })
            .collect();
        let suppress_mask = Tensor::new(suppress.as_slice(), &device)?;

        let mel_filters = mel::mel_filters(config.num_mel_bins);

        Ok(Self {
            model,
            config,
            device,
            tokenizer,
            mel_filters,
            tokens,
            suppress_mask,
            rng: StdRng::seed_from_u64(SAMPLING_SEED),
            repo_id,
        })
    }

    /// Repository the weights were loaded from.
    pub fn repo_id(&self) -> &str {
        &self.repo_id
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn tokenizer(&self) -> &Tokenizer {
        &self.tokenizer
    }

    /// Token id of `<|language|>`, if this model knows the language.
    pub fn language_token(&self, language: &str) -> Option<u32> {
        language_token(&self.tokenizer, language)
    }

    /// Transcribe 16kHz mono PCM to text.
    ///
    /// ## Returns:
    /// - **Ok((text, segments))**: Joined text of every 30 second window and the window count
    /// - **Err(anyhow::Error)**: Unknown language or a tensor operation failed
    pub fn transcribe(&mut self, pcm: &[f32], language: &str) -> Result<(String, usize)> {
        if pcm.is_empty() {
            return Err(anyhow!("Audio data is empty"));
        }

        let language_token = self
            .language_token(language)
            .ok_or_else(|| anyhow!("Model {} does not support language {:?}", self.repo_id, language))?;

        let mel = audio::pcm_to_mel(&self.config, pcm, &self.mel_filters);
        let n_mels = self.config.num_mel_bins;
        let n_frames = mel.len() / n_mels;
        let mel = Tensor::from_vec(mel, (1, n_mels, n_frames), &self.device)?;

        let mut texts = Vec::new();
        let windows = plan_windows(pcm.len(), n_frames);
        for (index, &(seek, size)) in windows.iter().enumerate() {
            let mel_segment = mel.narrow(2, seek, size)?;

            let text = self.decode_segment(&mel_segment, language_token)?;
            tracing::debug!(segment = index, seek, text = %text, "Decoded audio window");
            if !text.is_empty() {
                texts.push(text);
            }
        }

        Ok((texts.join(" "), windows.len()))
    }

    fn decode_segment(&mut self, mel: &Tensor, language_token: u32) -> Result<String> {
        let audio_features = self.model.encoder.forward(mel, true)?;

        let mut accepted = None;
        for (attempt, &temperature) in TEMPERATURES.iter().enumerate() {
            let result = self.decode_with_temperature(&audio_features, language_token, temperature)?;
            if attempt + 1 == TEMPERATURES.len() || !result.needs_fallback() {
                accepted = Some(result);
                break;
            }
            tracing::debug!(
                temperature,
                avg_logprob = result.avg_logprob,
                repetitive = result.repetitive,
                "Decoding pass rejected, retrying at a higher temperature"
            );
        }
        let result = accepted.ok_or_else(|| anyhow!("No decoding pass was accepted"))?;

        if result.is_silence() {
            tracing::debug!(
                no_speech_prob = result.no_speech_prob,
                temperature = result.temperature,
                "Window skipped as silence"
            );
            return Ok(String::new());
        }
        Ok(result.text)
    }

    fn decode_with_temperature(
        &mut self,
        audio_features: &Tensor,
        language_token: u32,
        temperature: f64,
    ) -> Result<DecodingResult> {
        let prompt = [
            self.tokens.sot,
            language_token,
            self.tokens.transcribe,
            self.tokens.no_timestamps,
        ];
        let mut tokens = prompt.to_vec();
        let sample_len = self.config.max_target_positions / 2;
        let mut sum_logprob = 0.0;
        let mut no_speech_prob = 0.0;
        let mut repetitive = false;

        for i in 0..sample_len {
            let tokens_t = Tensor::new(tokens.as_slice(), &self.device)?.unsqueeze(0)?;
            let ys = self.model.decoder.forward(&tokens_t, audio_features, i == 0)?;

            // Scored at the start-of-transcript position, before any masking
            if i == 0 {
                if let Some(no_speech) = self.tokens.no_speech {
                    let logits = self.model.decoder.final_linear(&ys.i(..1)?)?.i(0)?.i(0)?;
                    no_speech_prob = softmax(&logits, 0)?
                        .i(no_speech as usize)?
                        .to_scalar::<f32>()? as f64;
                }
            }

            let (_, seq_len, _) = ys.dims3()?;
            let logits = self
                .model
                .decoder
                .final_linear(&ys.i((..1, seq_len - 1..))?)?
                .i(0)?
                .i(0)?;
            let logits = logits.broadcast_add(&self.suppress_mask)?;

            let next_token = if temperature > 0.0 {
                let prs: Vec<f32> = softmax(&(&logits / temperature)?, 0)?.to_vec1()?;
                let distr = WeightedIndex::new(&prs)
                    .map_err(|e| anyhow!("Cannot sample next token: {}", e))?;
                distr.sample(&mut self.rng) as u32
            } else {
                logits.argmax(0)?.to_scalar::<u32>()?
            };

            if next_token == self.tokens.eot {
                break;
            }
            if is_repetitive(&tokens[prompt.len()..], next_token) {
                repetitive = true;
                break;
            }

            let prob = softmax(&logits, 0)?
                .i(next_token as usize)?
                .to_scalar::<f32>()? as f64;
            sum_logprob += prob.ln();

            tokens.push(next_token);
            if tokens.len() >= self.config.max_target_positions {
                break;
            }
        }

        self.model.reset_kv_cache();

        let generated = &tokens[prompt.len()..];
        let avg_logprob = if generated.is_empty() {
            0.0
        } else {
            sum_logprob / generated.len() as f64
        };
        let text = self
            .tokenizer
            .decode(generated, true)
            .map_err(|e| anyhow!("Tokenizer decode error: {}", e))?;

        Ok(DecodingResult {
            text: text.trim().to_string(),
            avg_logprob,
            no_speech_prob,
            temperature,
            repetitive,
        })
    }
}

/// Mel windows worth decoding, as `(first frame, frame count)`.
///
/// `pcm_to_mel` pads the spectrogram with at least one window of silence;
/// only windows starting inside the real audio are kept. Every window spans
/// a full 3000 frames unless the spectrogram ends first.
fn plan_windows(pcm_len: usize, n_frames: usize) -> Vec<(usize, usize)> {
    if n_frames == 0 {
        return Vec::new();
    }
    let audio_frames = (pcm_len / m::HOP_LENGTH).clamp(1, n_frames);
    (0..audio_frames)
        .step_by(m::N_FRAMES)
        .map(|seek| (seek, usize::min(n_frames - seek, m::N_FRAMES)))
        .collect()
}

/// True when `next` would extend a loop: the same token three times running,
/// or the last three tokens repeating the three before them.
fn is_repetitive(generated: &[u32], next: u32) -> bool {
    let n = generated.len();
    if n < 6 {
        return false;
    }
    let last = &generated[n - 3..];
    last == [next; 3] || last == &generated[n - 6..n - 3]
}

fn build_hub_api(source: &ModelSource) -> Result<hf_hub::api::tokio::Api> {
    use hf_hub::api::tokio::ApiBuilder;

    let mut builder = ApiBuilder::new().with_progress(false);

    if let Ok(token) = std::env::var("HF_TOKEN") {
        builder = builder.with_token(Some(token));
    }

    if let Some(cache_dir) = source.cache_dir.clone() {
        builder = builder.with_cache_dir(cache_dir);
    } else if let Ok(cache_dir) = std::env::var("HF_HUB_CACHE") {
        builder = builder.with_cache_dir(cache_dir.into());
    } else if let Ok(hf_home) = std::env::var("HF_HOME") {
        builder = builder.with_cache_dir(PathBuf::from(hf_home).join("hub"));
    }

    builder.build().context("Failed to create HuggingFace API client")
}

/// Whisper marks the spoken language with a `<|code|>` special token.
pub fn language_token(tokenizer: &Tokenizer, language: &str) -> Option<u32> {
    tokenizer.token_to_id(&format!("<|{}|>", language))
}

fn token_id(tokenizer: &Tokenizer, token: &str) -> Result<u32> {
    tokenizer
        .token_to_id(token)
        .ok_or_else(|| anyhow!("Tokenizer has no {} token", token))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_size_parsing() {
        assert_eq!("base".parse::<ModelSize>().unwrap(), ModelSize::Base);
        assert_eq!("LARGE".parse::<ModelSize>().unwrap(), ModelSize::Large);
        assert!("invalid".parse::<ModelSize>().is_err());
    }

    #[test]
    fn test_model_size_repo() {
        assert_eq!(ModelSize::Base.repo_name(), "openai/whisper-base");
        assert_eq!(ModelSize::Base.to_string(), "base");
    }

    const SECOND: usize = m::SAMPLE_RATE;

    /// Frame count `pcm_to_mel` produces: rounded up to 1500, plus 1500.
    fn mel_frames(pcm_len: usize) -> usize {
        let frames = pcm_len / m::HOP_LENGTH;
        frames.div_ceil(1500) * 1500 + 1500
    }

    #[test]
    fn test_thirty_seconds_is_one_window() {
        let pcm_len = 30 * SECOND;
        assert_eq!(mel_frames(pcm_len), 4500);
        assert_eq!(plan_windows(pcm_len, mel_frames(pcm_len)), vec![(0, 3000)]);
    }

    #[test]
    fn test_thirty_one_seconds_is_two_windows() {
        let pcm_len = 31 * SECOND;
        assert_eq!(
            plan_windows(pcm_len, mel_frames(pcm_len)),
            vec![(0, 3000), (3000, 3000)]
        );
    }

    #[test]
    fn test_sixty_one_seconds_is_three_windows() {
        let pcm_len = 61 * SECOND;
        assert_eq!(
            plan_windows(pcm_len, mel_frames(pcm_len)),
            vec![(0, 3000), (3000, 3000), (6000, 3000)]
        );
    }

    #[test]
    fn test_trailing_padding_is_not_decoded() {
        // 60s gets 7500 frames; the window at 6000 would be pure padding
        let pcm_len = 60 * SECOND;
        assert_eq!(mel_frames(pcm_len), 7500);
        assert_eq!(
            plan_windows(pcm_len, mel_frames(pcm_len)),
            vec![(0, 3000), (3000, 3000)]
        );
    }

    #[test]
    fn test_short_clip_is_one_window() {
        assert_eq!(plan_windows(320, mel_frames(320)), vec![(0, 3000)]);
        assert_eq!(plan_windows(1, mel_frames(1)), vec![(0, 3000)]);
    }

    #[test]
    fn test_last_window_stops_at_spectrogram_end() {
        assert_eq!(plan_windows(31 * SECOND, 4600), vec![(0, 3000), (3000, 1600)]);
        assert!(plan_windows(SECOND, 0).is_empty());
    }

    #[test]
    fn test_repetition_detection() {
        assert!(!is_repetitive(&[1, 1, 1], 1));
        assert!(is_repetitive(&[5, 6, 7, 8, 9, 9, 9], 9));
        assert!(is_repetitive(&[1, 2, 3, 1, 2, 3], 4));
        assert!(!is_repetitive(&[1, 2, 3, 4, 5, 6], 7));
        assert!(!is_repetitive(&[1, 2, 3, 4, 9, 9], 9));
    }

    fn pass(avg_logprob: f64, no_speech_prob: f64, repetitive: bool) -> DecodingResult {
        DecodingResult {
            text: "text".to_string(),
            avg_logprob,
            no_speech_prob,
            temperature: 0.0,
            repetitive,
        }
    }

    #[test]
    fn test_fallback_on_repetition_or_low_confidence() {
        assert!(!pass(-0.3, 0.1, false).needs_fallback());
        assert!(pass(-0.3, 0.1, true).needs_fallback());
        assert!(pass(-1.5, 0.1, false).needs_fallback());
        // Likely silence is accepted as is rather than resampled
        assert!(!pass(-1.5, 0.9, true).needs_fallback());
    }

    #[test]
    fn test_silence_needs_both_signals() {
        assert!(pass(-1.5, 0.9, false).is_silence());
        assert!(!pass(-0.2, 0.9, false).is_silence());
        assert!(!pass(-1.5, 0.2, false).is_silence());
    }

    #[test]
    fn test_temperatures_start_greedy() {
        assert_eq!(TEMPERATURES[0], 0.0);
        assert!(TEMPERATURES.windows(2).all(|w| w[0] < w[1]));
    }
}

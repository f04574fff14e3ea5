//! # Audio Handling
//!
//! Everything between the HTTP upload and the model input.
//!
//! ## Key Components:
//! - **Upload**: Buffer the multipart file field into memory with a size limit
//! - **Temporary File**: Scoped on-disk copy the transcriber reads from
//! - **Decoder**: Container probing, decoding, downmixing and resampling to 16kHz mono

pub mod decoder;
pub mod temp_file;
pub mod upload;

pub use temp_file::TemporaryAudioFile;
pub use upload::{read_upload, UploadedAudio};

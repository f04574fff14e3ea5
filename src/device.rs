//! # Device Detection and Management
//!
//! Picks the compute device (CPU/GPU) the Whisper model is loaded on.
//! GPU backends that were not compiled into candle report themselves as
//! unavailable, so every preference degrades to CPU.

use candle_core::Device;
use tracing::{debug, info};

/// Device preferences for model inference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DevicePreference {
    /// Automatically select the best available device
    #[default]
    Auto,
    /// Force CPU usage
    Cpu,
    /// CUDA GPU (falls back to CPU if not available)
    Cuda,
    /// Metal GPU (falls back to CPU if not available)
    Metal,
}

impl std::str::FromStr for DevicePreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" | "automatic" => Ok(DevicePreference::Auto),
            "cpu" => Ok(DevicePreference::Cpu),
            "cuda" | "gpu" => Ok(DevicePreference::Cuda),
            "metal" => Ok(DevicePreference::Metal),
            _ => Err(format!("Unknown device preference: {}", s)),
        }
    }
}

pub struct DeviceManager;

impl DeviceManager {
    /// Get a device for the given preference
    pub fn get_device(preference: DevicePreference) -> Device {
        let device = match preference {
            DevicePreference::Auto => Self::detect_best_device(),
            DevicePreference::Cpu => Device::Cpu,
            DevicePreference::Cuda => Self::get_cuda_device().unwrap_or(Device::Cpu),
            DevicePreference::Metal => Self::get_metal_device().unwrap_or(Device::Cpu),
        };
        info!(
            preference = ?preference,
            device = %Self::get_device_info(&device),
            "Selected compute device"
        );
        device
    }

    fn detect_best_device() -> Device {
        if let Some(cuda_device) = Self::get_cuda_device() {
            return cuda_device;
        }
        if let Some(metal_device) = Self::get_metal_device() {
            return metal_device;
        }
        Device::Cpu
    }

    fn get_cuda_device() -> Option<Device> {
        match Device::new_cuda(0) {
            Ok(device) => Some(device),
            Err(e) => {
                debug!("CUDA not available: {}", e);
                None
            }
        }
    }

    fn get_metal_device() -> Option<Device> {
        match Device::new_metal(0) {
            Ok(device) => Some(device),
            Err(e) => {
                debug!("Metal not available: {}", e);
                None
            }
        }
    }

    /// Short label for logging and health output
    pub fn get_device_info(device: &Device) -> String {
        match device {
            Device::Cpu => "CPU".to_string(),
            Device::Cuda(_) => "CUDA GPU".to_string(),
            Device::Metal(_) => "Metal GPU".to_string(),
        }
    }
}

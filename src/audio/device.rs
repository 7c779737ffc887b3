//! Audio device enumeration and selection

use cpal::traits::{DeviceTrait, HostTrait};
use serde::Serialize;

use crate::error::AudioError;

/// Wrapper around a cpal device
pub struct AudioDevice {
    inner: cpal::Device,
    pub name: String,
    pub is_input: bool,
    pub is_output: bool,
}

impl AudioDevice {
    pub fn from_cpal(device: cpal::Device, is_input: bool, is_output: bool) -> Self {
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        Self {
            inner: device,
            name,
            is_input,
            is_output,
        }
    }

    pub fn inner(&self) -> &cpal::Device {
        &self.inner
    }

    pub fn into_inner(self) -> cpal::Device {
        self.inner
    }

    pub fn default_input_config(&self) -> Result<cpal::SupportedStreamConfig, AudioError> {
        self.inner
            .default_input_config()
            .map_err(|e| AudioError::UnsupportedFormat(e.to_string()))
    }

    pub fn default_output_config(&self) -> Result<cpal::SupportedStreamConfig, AudioError> {
        self.inner
            .default_output_config()
            .map_err(|e| AudioError::UnsupportedFormat(e.to_string()))
    }
}

/// Device description for the status API and startup listing
#[derive(Debug, Clone, Serialize)]
pub struct AudioDeviceInfo {
    pub name: String,
    pub is_input: bool,
    pub is_output: bool,
    pub is_default: bool,
    pub sample_rates: Vec<u32>,
    pub channels: Vec<u16>,
}

/// List all available audio devices
pub fn list_devices() -> Vec<AudioDeviceInfo> {
    let host = cpal::default_host();
    let mut devices = Vec::new();

    let default_input_name = host.default_input_device().and_then(|d| d.name().ok());
    let default_output_name = host.default_output_device().and_then(|d| d.name().ok());

    if let Ok(input_devices) = host.input_devices() {
        for device in input_devices {
            if let Ok(name) = device.name() {
                let is_default = default_input_name.as_ref() == Some(&name);
                let (sample_rates, channels) = capabilities(&device, true);
                devices.push(AudioDeviceInfo {
                    name,
                    is_input: true,
                    is_output: false,
                    is_default,
                    sample_rates,
                    channels,
                });
            }
        }
    }

    if let Ok(output_devices) = host.output_devices() {
        for device in output_devices {
            if let Ok(name) = device.name() {
                let is_default = default_output_name.as_ref() == Some(&name);
                let (sample_rates, channels) = capabilities(&device, false);

                if let Some(existing) = devices.iter_mut().find(|d| d.name == name) {
                    existing.is_output = true;
                    existing.is_default |= is_default;
                } else {
                    devices.push(AudioDeviceInfo {
                        name,
                        is_input: false,
                        is_output: true,
                        is_default,
                        sample_rates,
                        channels,
                    });
                }
            }
        }
    }

    devices
}

fn capabilities(device: &cpal::Device, is_input: bool) -> (Vec<u32>, Vec<u16>) {
    let mut sample_rates = Vec::new();
    let mut channels = Vec::new();

    let mut scan = |configs: &mut dyn Iterator<Item = cpal::SupportedStreamConfigRange>| {
        for config in configs {
            for rate_val in [44100u32, 48000, 88200, 96000, 176400, 192000] {
                let rate = cpal::SampleRate(rate_val);
                if rate >= config.min_sample_rate()
                    && rate <= config.max_sample_rate()
                    && !sample_rates.contains(&rate_val)
                {
                    sample_rates.push(rate_val);
                }
            }
            let ch = config.channels();
            if !channels.contains(&ch) {
                channels.push(ch);
            }
        }
    };

    if is_input {
        if let Ok(mut configs) = device.supported_input_configs() {
            scan(&mut configs);
        }
    } else if let Ok(mut configs) = device.supported_output_configs() {
        scan(&mut configs);
    }

    sample_rates.sort_unstable();
    channels.sort_unstable();
    (sample_rates, channels)
}

/// Find an input device by name
pub fn get_input_device(name: &str) -> Result<AudioDevice, AudioError> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|e| AudioError::DeviceNotFound(e.to_string()))?;

    for device in devices {
        if matches!(device.name().as_deref(), Ok(n) if n == name) {
            return Ok(AudioDevice::from_cpal(device, true, false));
        }
    }

    Err(AudioError::DeviceNotFound(name.to_string()))
}

/// Find an output device by name
pub fn get_output_device(name: &str) -> Result<AudioDevice, AudioError> {
    let host = cpal::default_host();
    let devices = host
        .output_devices()
        .map_err(|e| AudioError::DeviceNotFound(e.to_string()))?;

    for device in devices {
        if matches!(device.name().as_deref(), Ok(n) if n == name) {
            return Ok(AudioDevice::from_cpal(device, false, true));
        }
    }

    Err(AudioError::DeviceNotFound(name.to_string()))
}

/// Resolve the capture device.
///
/// An explicit name wins. Otherwise scan for a loopback/monitor-style
/// input (system audio capture), then fall back to the default input.
pub fn resolve_capture_device(selector: Option<&str>) -> Result<AudioDevice, AudioError> {
    if let Some(name) = selector {
        return get_input_device(name);
    }

    let host = cpal::default_host();

    if let Ok(devices) = host.input_devices() {
        for device in devices {
            if let Ok(name) = device.name() {
                let lower = name.to_lowercase();
                if lower.contains("loopback")
                    || lower.contains("monitor")
                    || lower.contains("stereo mix")
                {
                    return Ok(AudioDevice::from_cpal(device, true, false));
                }
            }
        }
    }

    host.default_input_device()
        .map(|d| AudioDevice::from_cpal(d, true, false))
        .ok_or_else(|| AudioError::DeviceNotFound("no default input device".to_string()))
}

/// Resolve the playback device, default output when unspecified
pub fn resolve_output_device(selector: Option<&str>) -> Result<AudioDevice, AudioError> {
    if let Some(name) = selector {
        return get_output_device(name);
    }

    cpal::default_host()
        .default_output_device()
        .map(|d| AudioDevice::from_cpal(d, false, true))
        .ok_or_else(|| AudioError::DeviceNotFound("no default output device".to_string()))
}

//! Audio subsystem module

pub mod capture;
pub mod device;
pub mod frame;
pub mod playback;

pub use capture::CaptureSource;
pub use device::{list_devices, AudioDevice, AudioDeviceInfo};
pub use frame::AudioFrame;
pub use playback::PlaybackHandle;

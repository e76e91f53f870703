//! Audio device enumeration and selection

use cpal::traits::{DeviceTrait, HostTrait};

use crate::error::AudioError;
use crate::protocol::AudioDeviceInfo;

/// Name fragments that identify loopback capture devices
const LOOPBACK_NAMES: [&str; 4] = ["stereo mix", "loopback", "blackhole", "soundflower"];

/// Wrapper around cpal device
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

    pub fn into_inner(self) -> cpal::Device {
        self.inner
    }

    /// Get default output config
    pub fn default_output_config(&self) -> Result<cpal::SupportedStreamConfig, AudioError> {
        self.inner
            .default_output_config()
            .map_err(|e| AudioError::DeviceNotFound(e.to_string()))
    }
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
                let (sample_rates, channels) = get_device_capabilities(&device, true);
                devices.push(AudioDeviceInfo {
                    id: format!("input:{}", name),
                    is_default: default_input_name.as_ref() == Some(&name),
                    name,
                    is_input: true,
                    is_output: false,
                    sample_rates,
                    channels,
                });
            }
        }
    }

    if let Ok(output_devices) = host.output_devices() {
        for device in output_devices {
            if let Ok(name) = device.name() {
                let (sample_rates, channels) = get_device_capabilities(&device, false);
                devices.push(AudioDeviceInfo {
                    id: format!("output:{}", name),
                    is_default: default_output_name.as_ref() == Some(&name),
                    name,
                    is_input: false,
                    is_output: true,
                    sample_rates,
                    channels,
                });
            }
        }
    }

    devices
}

/// Get device capabilities
fn get_device_capabilities(device: &cpal::Device, is_input: bool) -> (Vec<u32>, Vec<u16>) {
    let configs: Vec<cpal::SupportedStreamConfigRange> = if is_input {
        device
            .supported_input_configs()
            .map(|c| c.collect())
            .unwrap_or_default()
    } else {
        device
            .supported_output_configs()
            .map(|c| c.collect())
            .unwrap_or_default()
    };

    let mut sample_rates = Vec::new();
    let mut channels = Vec::new();
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
        if !channels.contains(&config.channels()) {
            channels.push(config.channels());
        }
    }

    sample_rates.sort_unstable();
    channels.sort_unstable();
    (sample_rates, channels)
}

/// Device name from an output id: `output:<name>` or a bare name.
/// `input:` ids are rejected.
pub fn output_device_name(id: &str) -> Result<&str, AudioError> {
    if id.starts_with("input:") {
        return Err(AudioError::DeviceNotFound(format!(
            "{} is an input device, expected an output",
            id
        )));
    }
    Ok(id.strip_prefix("output:").unwrap_or(id))
}

/// Get an output device by id (see [`output_device_name`])
pub fn get_output_device(id: &str) -> Result<AudioDevice, AudioError> {
    let name = output_device_name(id)?;
    let host = cpal::default_host();

    let devices = host
        .output_devices()
        .map_err(|e| AudioError::DeviceNotFound(e.to_string()))?;

    for device in devices {
        if device.name().map(|n| n == name).unwrap_or(false) {
            return Ok(AudioDevice::from_cpal(device, false, true));
        }
    }

    Err(AudioError::DeviceNotFound(id.to_string()))
}

/// Get default output device
pub fn get_default_output_device() -> Result<AudioDevice, AudioError> {
    let host = cpal::default_host();
    host.default_output_device()
        .map(|d| AudioDevice::from_cpal(d, false, true))
        .ok_or_else(|| AudioError::DeviceNotFound("No default output device".to_string()))
}

/// All devices the default host can capture from, in host order
pub fn input_devices() -> Result<Vec<cpal::Device>, AudioError> {
    let host = cpal::default_host();
    host.input_devices()
        .map(|devices| devices.collect())
        .map_err(|e| AudioError::DeviceNotFound(e.to_string()))
}

/// What input selection needs to know about a device
pub trait CaptureCandidate {
    fn device_name(&self) -> Option<String>;
    fn supports_input(&self) -> bool;
}

impl CaptureCandidate for cpal::Device {
    fn device_name(&self) -> Option<String> {
        self.name().ok()
    }

    fn supports_input(&self) -> bool {
        self.supported_input_configs()
            .map(|mut c| c.next().is_some())
            .unwrap_or(false)
    }
}

/// Find a device whose name looks like a loopback capture source
pub fn find_loopback_device<D: CaptureCandidate>(devices: &[D]) -> Option<&D> {
    devices.iter().find(|device| {
        device
            .device_name()
            .map(|name| {
                let name = name.to_lowercase();
                LOOPBACK_NAMES.iter().any(|lb| name.contains(lb))
            })
            .unwrap_or(false)
    })
}

/// Pick the capture device: by index, else by exact name, else a loopback
/// device, else the first device with input support
pub fn select_input_device<'a, D: CaptureCandidate>(
    devices: &'a [D],
    index: Option<usize>,
    name: Option<&str>,
) -> Option<&'a D> {
    if let Some(index) = index {
        return devices.get(index).filter(|d| d.supports_input());
    }
    if let Some(name) = name {
        return devices
            .iter()
            .find(|d| d.device_name().as_deref() == Some(name) && d.supports_input());
    }
    find_loopback_device(devices).or_else(|| devices.iter().find(|d| d.supports_input()))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MockDevice {
        name: &'static str,
        has_input: bool,
    }

    impl CaptureCandidate for MockDevice {
        fn device_name(&self) -> Option<String> {
            Some(self.name.to_string())
        }

        fn supports_input(&self) -> bool {
            self.has_input
        }
    }

    fn mock(name: &'static str, has_input: bool) -> MockDevice {
        MockDevice { name, has_input }
    }

    #[test]
    fn test_output_device_name() {
        assert_eq!(output_device_name("output:Speakers").unwrap(), "Speakers");
        assert_eq!(output_device_name("Speakers").unwrap(), "Speakers");
        assert!(matches!(
            output_device_name("input:Microphone"),
            Err(AudioError::DeviceNotFound(_))
        ));
    }

    #[test]
    fn test_find_loopback_device() {
        let devices = [
            mock("Microphone", true),
            mock("Stereo Mix (Realtek Audio)", true),
            mock("Speakers", false),
        ];
        let found = find_loopback_device(&devices).unwrap();
        assert_eq!(found.name, "Stereo Mix (Realtek Audio)");
    }

    #[test]
    fn test_find_loopback_device_no_match() {
        let devices = [mock("Microphone", true), mock("Speakers", false)];
        assert!(find_loopback_device(&devices).is_none());
    }

    #[test]
    fn test_select_by_index() {
        let devices = [mock("Device1", true), mock("Device2", true), mock("Out", false)];
        assert_eq!(select_input_device(&devices, Some(1), None).unwrap().name, "Device2");
        assert!(select_input_device(&devices, Some(2), None).is_none());
        assert!(select_input_device(&devices, Some(9), None).is_none());
    }

    #[test]
    fn test_select_by_name() {
        let devices = [mock("Microphone", true), mock("Stereo Mix", true)];
        assert_eq!(
            select_input_device(&devices, None, Some("Microphone")).unwrap().name,
            "Microphone"
        );
        assert!(select_input_device(&devices, None, Some("Missing")).is_none());
    }

    #[test]
    fn test_select_prefers_loopback() {
        let devices = [mock("Microphone", true), mock("BlackHole 2ch", true)];
        assert_eq!(
            select_input_device(&devices, None, None).unwrap().name,
            "BlackHole 2ch"
        );
    }

    #[test]
    fn test_select_falls_back_to_first_input() {
        let devices = [mock("Speakers", false), mock("Microphone", true)];
        assert_eq!(
            select_input_device(&devices, None, None).unwrap().name,
            "Microphone"
        );
    }
}

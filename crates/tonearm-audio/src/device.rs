use std::str::FromStr;

use cpal::{
    Device, Host,
    traits::{DeviceTrait, HostTrait},
};

/// Errors that can occur while enumerating or configuring audio output
/// devices.
#[derive(Debug, thiserror::Error)]
pub enum AudioDeviceError {
    /// Failed to enumerate audio output devices. This error occurs when the
    /// underlying audio backend fails to query the list of available output
    /// devices for the host.
    #[error("failed to read device's information: {0}")]
    ReadDevices(#[from] cpal::DevicesError),
    /// Failed to construct an output audio stream. This error is returned
    /// when the audio backend rejects the requested stream configuration or
    /// fails to initialize the output stream.
    #[error("failed to build device output stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),
    /// Failed to obtain the device's default output stream configuration.
    /// This error occurs when the device does not support output streams or
    /// when the audio backend fails to query the default output
    /// configuration.
    #[error("failed to build device config: {0}")]
    BuildStreamConfig(#[from] cpal::DefaultStreamConfigError),
    /// Failed to parse the provided device ID. It may be incorrect or
    /// invalid. You should refer to CPAL's error for more information.
    #[error("failed to parse device id: {0}")]
    ReadDeviceId(#[from] cpal::DeviceIdError),
    /// The host has no usable output device.
    #[error("no output device available")]
    NoOutputDevice,
}

/// Represents a parsed output audio device belonging to a specific host.
#[derive(Clone)]
pub struct HostOutputDevice {
    /// Unique identifier of the device within the host.
    pub id: cpal::DeviceId,
    /// Human-readable device description.
    pub description: String,

    device: Device,
}

impl std::fmt::Display for HostOutputDevice {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{} ({})", self.description, self.id)
    }
}

impl HostOutputDevice {
    /// Returns the default output sample rate and channel count for this
    /// device.
    pub fn sample_rate_and_channels(&self) -> Result<(cpal::SampleRate, u16), AudioDeviceError> {
        let default_output_config = self.device.default_output_config()?;
        Ok((
            default_output_config.sample_rate(),
            default_output_config.channels(),
        ))
    }

    pub(crate) fn raw(&self) -> &Device {
        &self.device
    }
}

impl From<Device> for HostOutputDevice {
    fn from(device: Device) -> Self {
        Self {
            id: device.id().expect("failed to obtain device's id"),
            description: device
                .description()
                .expect("failed to obtain device's information")
                .to_string(),
            device,
        }
    }
}

/// Returns a list of all output audio devices available on the given host.
///
/// This function queries the provided [`cpal::Host`] for all output-capable
/// audio devices and returns their identifiers and display names.
pub fn list_host_output_devices(host: &Host) -> Result<Vec<HostOutputDevice>, AudioDeviceError> {
    Ok(host
        .output_devices()?
        .map(HostOutputDevice::from)
        .collect())
}

/// The host's default output device.
pub fn default_output_device(host: &Host) -> Result<HostOutputDevice, AudioDeviceError> {
    host.default_output_device()
        .map(HostOutputDevice::from)
        .ok_or(AudioDeviceError::NoOutputDevice)
}

/// Retrieves a specific audio device by its unique identifier within a given
/// host.
///
/// Attempts to look up a device using a string representation of its
/// [`cpal::DeviceId`].
pub fn get_device_by_id(
    host: &Host,
    device_id: String,
) -> Result<Option<Device>, AudioDeviceError> {
    let device_id = cpal::DeviceId::from_str(&device_id)?;
    Ok(host.device_by_id(&device_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_build_failures_carry_the_backend_message() {
        let error = AudioDeviceError::BuildStream(cpal::BuildStreamError::DeviceNotAvailable);
        assert!(error.to_string().starts_with("failed to build device output stream"));
    }
}

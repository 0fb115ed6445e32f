//! Devices and device lists.
use std::fmt;

use rsbridge_sys::{kind, CameraInfo};

use crate::error::{Error, Result};
use crate::handle::Owned;
use crate::host::Host;
use crate::resource::Resource;
use crate::sensor::Sensor;

/// A snapshot of connected devices.
pub struct DeviceList {
    resource: Resource<kind::DeviceList>,
}

impl DeviceList {
    pub(crate) fn from_owned(host: &Host, list: Option<Owned<kind::DeviceList>>) -> Self {
        Self {
            resource: Resource::new(host, list),
        }
    }

    pub fn destroy(&self) {
        self.resource.destroy();
    }

    #[inline]
    pub fn is_destroyed(&self) -> bool {
        self.resource.is_empty()
    }

    pub fn len(&self) -> Result<usize> {
        let count = self
            .resource
            .fetch(|sdk, raw, error| sdk.device_count(raw, error))?;
        Ok(count.max(0) as usize)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Creates the device at `index`.
    pub fn get(&self, index: usize) -> Option<Device> {
        let index = i32::try_from(index).ok()?;
        let raw = self
            .resource
            .query(|sdk, raw, error| sdk.create_device(raw, index, error))
            .flatten()?;
        // SAFETY: the SDK returns a new device handle owned by the caller.
        let device = unsafe { Owned::from_raw(self.resource.host().api(), raw) };
        Some(Device::from_owned(self.resource.host(), device))
    }

    /// Creates every device in the list.
    pub fn devices(&self) -> Result<Vec<Device>> {
        (0..self.len()?)
            .map(|index| self.get(index).ok_or(Error::Unavailable("device")))
            .collect()
    }

    /// Whether `device` is in this list.
    pub fn contains(&self, device: &Device) -> Result<bool> {
        let device = device.raw().ok_or(Error::Destroyed)?;
        self.resource
            .fetch(|sdk, raw, error| sdk.device_list_contains(raw, device, error))
    }
}

impl fmt::Debug for DeviceList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DeviceList").field(&self.resource).finish()
    }
}

/// A connected camera.
pub struct Device {
    resource: Resource<kind::Device>,
}

impl Device {
    pub(crate) fn from_owned(host: &Host, device: Owned<kind::Device>) -> Self {
        Self {
            resource: Resource::new(host, Some(device)),
        }
    }

    pub fn destroy(&self) {
        self.resource.destroy();
    }

    #[inline]
    pub fn is_destroyed(&self) -> bool {
        self.resource.is_empty()
    }

    pub(crate) fn raw(&self) -> Option<rsbridge_sys::RawDevice> {
        self.resource.raw()
    }

    pub fn camera_info(&self, info: CameraInfo) -> Result<String> {
        self.resource
            .fetch(|sdk, raw, error| sdk.device_info(raw, info, error))?
            .ok_or(Error::Unavailable("camera info"))
    }

    pub fn supports_camera_info(&self, info: CameraInfo) -> Result<bool> {
        self.resource
            .fetch(|sdk, raw, error| sdk.supports_device_info(raw, info, error))
    }

    /// Creates every sensor of the device.
    pub fn sensors(&self) -> Option<Vec<Sensor>> {
        let host = self.resource.host();
        let raw = self
            .resource
            .query(|sdk, raw, error| sdk.query_sensors(raw, error))
            .flatten()?;
        // SAFETY: the SDK returns a new sensor list owned by the caller.
        let list = unsafe { Owned::from_raw(host.api(), raw) };

        let count = self
            .resource
            .native(|sdk, error| sdk.sensors_count(list.borrow(), error))
            .ok()?;
        let mut sensors = Vec::with_capacity(count.max(0) as usize);
        for index in 0..count {
            let raw = self
                .resource
                .native(|sdk, error| sdk.create_sensor(list.borrow(), index, error))
                .ok()
                .flatten()?;
            // SAFETY: the SDK returns a new sensor handle owned by the caller.
            let sensor = unsafe { Owned::from_raw(host.api(), raw) };
            sensors.push(Sensor::from_owned(host, sensor));
        }
        Some(sensors)
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Device").field(&self.resource).finish()
    }
}

// Copyright (c) Thing Model SDK Contributors.
// Licensed under the MIT License.

//! Registry of the devices a client speaks for.

use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;

use crate::error::{DmError, DmErrorKind};

/// Index of the client's own device
pub const SELF_DEVICE: usize = 0;

/// Identity of a device
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceInfo {
    product_key: String,
    device_name: String,
}

impl DeviceInfo {
    /// Create a device identity.
    ///
    /// # Arguments
    /// * `product_key` - Product the device belongs to
    /// * `device_name` - Name of the device within its product
    ///
    /// # Errors
    /// [`DmError`] of kind [`InvalidParameter`](DmErrorKind::InvalidParameter) if either part is empty
    pub fn new(
        product_key: impl Into<String>,
        device_name: impl Into<String>,
    ) -> Result<Self, DmError> {
        let product_key = product_key.into();
        let device_name = device_name.into();
        if product_key.is_empty() || device_name.is_empty() {
            return Err(DmErrorKind::InvalidParameter(
                "product key and device name must not be empty".to_string(),
            )
            .into());
        }
        Ok(Self {
            product_key,
            device_name,
        })
    }

    /// Product key
    #[must_use]
    pub fn product_key(&self) -> &str {
        &self.product_key
    }

    /// Device name
    #[must_use]
    pub fn device_name(&self) -> &str {
        &self.device_name
    }
}

/// Devices addressed by index. Index [`SELF_DEVICE`] is always present.
#[derive(Debug)]
pub struct DeviceRegistry {
    devices: DashMap<usize, DeviceInfo>,
    indices: DashMap<DeviceInfo, usize>,
    next_index: AtomicUsize,
}

impl DeviceRegistry {
    /// Create a registry holding only the client's own device.
    #[must_use]
    pub fn new(own: DeviceInfo) -> Self {
        let devices = DashMap::new();
        let indices = DashMap::new();
        indices.insert(own.clone(), SELF_DEVICE);
        devices.insert(SELF_DEVICE, own);
        Self {
            devices,
            indices,
            next_index: AtomicUsize::new(SELF_DEVICE + 1),
        }
    }

    /// Register a device, returning its index. A device already present keeps its index.
    pub fn add(&self, info: DeviceInfo) -> usize {
        // the identity's shard stays locked until the index is allocated and stored
        *self.indices.entry(info.clone()).or_insert_with(|| {
            let index = self.next_index.fetch_add(1, Ordering::Relaxed);
            log::debug!(
                "[device] add {}/{} as {index}",
                info.product_key(),
                info.device_name()
            );
            self.devices.insert(index, info);
            index
        })
    }

    /// Remove the device at `index`.
    ///
    /// # Errors
    /// [`DmError`] of kind [`InvalidParameter`](DmErrorKind::InvalidParameter) for the client's own device
    ///
    /// [`DmError`] of kind [`NotFound`](DmErrorKind::NotFound) if no device has that index
    pub fn remove(&self, index: usize) -> Result<DeviceInfo, DmError> {
        if index == SELF_DEVICE {
            return Err(DmErrorKind::InvalidParameter(
                "the client's own device cannot be removed".to_string(),
            )
            .into());
        }
        let info = self.get(index)?;
        // unmap the identity first, so a concurrent add allocates a fresh index
        self.indices.remove_if(&info, |_, mapped| *mapped == index);
        let (_, info) = self.devices.remove(&index).ok_or(DmErrorKind::NotFound)?;
        Ok(info)
    }

    /// Identity of the device at `index`.
    ///
    /// # Errors
    /// [`DmError`] of kind [`NotFound`](DmErrorKind::NotFound) if no device has that index
    pub fn get(&self, index: usize) -> Result<DeviceInfo, DmError> {
        Ok(self
            .devices
            .get(&index)
            .map(|info| info.value().clone())
            .ok_or(DmErrorKind::NotFound)?)
    }

    /// Index of the device with the given identity
    #[must_use]
    pub fn find(&self, product_key: &str, device_name: &str) -> Option<usize> {
        let identity = DeviceInfo {
            product_key: product_key.to_string(),
            device_name: device_name.to_string(),
        };
        self.indices.get(&identity).map(|index| *index)
    }

    /// Number of registered devices, including the client's own
    #[must_use]
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Always false, the client's own device is always registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

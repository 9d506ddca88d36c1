//! Role resolution for discovered characteristics.

use brew_types::{CharacteristicRole, uuids};
use tracing::{debug, warn};

use crate::error::ResolutionError;
use crate::link::{CharacteristicHandle, ServiceCatalog};

/// Handles for every [`CharacteristicRole`], resolved from one catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleMap {
    realtime: CharacteristicHandle,
    destination: CharacteristicHandle,
}

impl RoleMap {
    /// Handle for a role.
    pub fn get(&self, role: CharacteristicRole) -> &CharacteristicHandle {
        match role {
            CharacteristicRole::RealtimeTemperature => &self.realtime,
            CharacteristicRole::DestinationTemperature => &self.destination,
        }
    }

    /// Role a handle belongs to, if any.
    pub fn role_of(&self, handle: &CharacteristicHandle) -> Option<CharacteristicRole> {
        CharacteristicRole::ALL
            .into_iter()
            .find(|role| self.get(*role) == handle)
    }

    /// Iterate over `(role, handle)` pairs in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (CharacteristicRole, &CharacteristicHandle)> {
        CharacteristicRole::ALL
            .into_iter()
            .map(move |role| (role, self.get(role)))
    }
}

/// Resolve the controller roles from a discovery catalog.
///
/// Roles are checked in declaration order, so a catalog missing both
/// characteristics reports the realtime role.
///
/// # Errors
///
/// Returns [`ResolutionError::ServiceNotFound`] when the controller service
/// is absent and [`ResolutionError::CharacteristicNotFound`] for the first
/// missing role.
pub fn resolve(catalog: &ServiceCatalog) -> Result<RoleMap, ResolutionError> {
    let service = catalog.service(uuids::CONTROLLER_SERVICE).ok_or(
        ResolutionError::ServiceNotFound {
            service_count: catalog.len(),
        },
    )?;

    let lookup = |role: CharacteristicRole| -> Result<CharacteristicHandle, ResolutionError> {
        let characteristic = service
            .characteristic(role.uuid())
            .ok_or(ResolutionError::CharacteristicNotFound { role })?;
        if !characteristic
            .descriptors
            .contains(&uuids::CLIENT_CHARACTERISTIC_CONFIG)
        {
            // Discovery on some platforms omits descriptors.
            warn!("{} characteristic reports no CCCD", role);
        }
        Ok(characteristic.handle.clone())
    };

    let realtime = lookup(CharacteristicRole::RealtimeTemperature)?;
    let destination = lookup(CharacteristicRole::DestinationTemperature)?;
    debug!(%realtime, %destination, "Resolved controller characteristics");

    Ok(RoleMap {
        realtime,
        destination,
    })
}

/// Instance-owned role registry for one session.
///
/// Holds a [`RoleMap`] only while the session is ready; the controller
/// clears it on every teardown.
#[derive(Debug, Default)]
pub struct CharacteristicRegistry {
    map: Option<RoleMap>,
}

impl CharacteristicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the map for a newly ready session.
    pub fn install(&mut self, map: RoleMap) {
        self.map = Some(map);
    }

    /// Discard the current map.
    pub fn clear(&mut self) {
        self.map = None;
    }

    pub fn is_resolved(&self) -> bool {
        self.map.is_some()
    }

    /// Handle for a role while resolved.
    pub fn handle(&self, role: CharacteristicRole) -> Option<&CharacteristicHandle> {
        self.map.as_ref().map(|map| map.get(role))
    }

    /// Role for a handle while resolved.
    pub fn role_for(&self, handle: &CharacteristicHandle) -> Option<CharacteristicRole> {
        self.map.as_ref().and_then(|map| map.role_of(handle))
    }

    pub fn role_map(&self) -> Option<&RoleMap> {
        self.map.as_ref()
    }
}

//! Module registry
//!
//! Built once per connection from the module info reads performed at
//! discovery. Every capability gate consults the registry before any command
//! is sent, so unsupported requests fail without touching the transport.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{Result, SensorError};
use crate::protocol::constants::*;

/// Accelerometer implementation id of the BMI160
pub const ACCEL_IMPL_BMI160: u8 = 1;

/// First data processor revision with the packer
pub const DP_REVISION_PACKER: u8 = 2;

/// Module info as reported by the firmware
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleInfo {
    pub id: u8,
    /// Implementation id, `None` when the module is absent
    pub implementation: Option<u8>,
    pub revision: u8,
    /// Capability flags and extra bytes following implementation and revision
    pub extra: Vec<u8>,
}

impl ModuleInfo {
    pub fn absent(id: u8) -> Self {
        Self {
            id,
            implementation: None,
            revision: 0,
            extra: Vec::new(),
        }
    }

    pub fn present(id: u8, implementation: u8, revision: u8) -> Self {
        Self {
            id,
            implementation: Some(implementation),
            revision,
            extra: Vec::new(),
        }
    }

    /// Parse a module info response payload (after `[module, 0x80]`)
    pub fn parse(id: u8, payload: &[u8]) -> Self {
        match payload {
            [] | [_] => Self::absent(id),
            [implementation, revision, extra @ ..] => Self {
                id,
                implementation: Some(*implementation),
                revision: *revision,
                extra: extra.to_vec(),
            },
        }
    }

    pub fn is_present(&self) -> bool {
        self.implementation.is_some()
    }
}

fn module_name(id: u8) -> &'static str {
    match id {
        MODULE_SWITCH => "switch",
        MODULE_LED => "led",
        MODULE_ACCELEROMETER => "accelerometer",
        MODULE_TEMPERATURE => "temperature",
        MODULE_DATA_PROCESSOR => "data processor",
        MODULE_EVENT => "event",
        MODULE_LOGGING => "logging",
        MODULE_TIMER => "timer",
        MODULE_MACRO => "macro",
        MODULE_BAROMETER => "barometer",
        MODULE_SENSOR_FUSION => "sensor fusion",
        _ => "unknown module",
    }
}

/// Capabilities of the connected board
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleRegistry {
    modules: BTreeMap<u8, ModuleInfo>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every known module present at implementation 0, revision 0
    pub fn all_present() -> Self {
        let mut registry = Self::new();
        for id in KNOWN_MODULES {
            registry.insert(ModuleInfo::present(*id, 0, 0));
        }
        registry
    }

    pub fn insert(&mut self, info: ModuleInfo) {
        self.modules.insert(info.id, info);
    }

    pub fn get(&self, id: u8) -> Option<&ModuleInfo> {
        self.modules.get(&id)
    }

    pub fn is_present(&self, id: u8) -> bool {
        self.get(id).is_some_and(ModuleInfo::is_present)
    }

    pub fn modules(&self) -> impl Iterator<Item = &ModuleInfo> {
        self.modules.values()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Fail with `Unsupported` unless the module is present
    pub fn require(&self, id: u8) -> Result<&ModuleInfo> {
        match self.get(id) {
            Some(info) if info.is_present() => Ok(info),
            _ => Err(SensorError::Unsupported(format!(
                "{} module ({:#04x}) is not present",
                module_name(id),
                id
            ))),
        }
    }

    /// Fail with `Unsupported` unless the module reports at least `revision`
    pub fn require_revision(&self, id: u8, revision: u8, feature: &str) -> Result<&ModuleInfo> {
        let info = self.require(id)?;
        if info.revision < revision {
            return Err(SensorError::Unsupported(format!(
                "{} requires {} revision {} (board has {})",
                feature,
                module_name(id),
                revision,
                info.revision
            )));
        }
        Ok(info)
    }

    /// Fail with `Unsupported` unless the module uses the given implementation
    pub fn require_implementation(
        &self,
        id: u8,
        implementation: u8,
        feature: &str,
    ) -> Result<&ModuleInfo> {
        let info = self.require(id)?;
        if info.implementation != Some(implementation) {
            return Err(SensorError::Unsupported(format!(
                "{} is not available on this {} implementation",
                feature,
                module_name(id)
            )));
        }
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_module_info() {
        let info = ModuleInfo::parse(MODULE_DATA_PROCESSOR, &[0x00, 0x02, 0x1C]);
        assert_eq!(info.implementation, Some(0));
        assert_eq!(info.revision, 2);
        assert_eq!(info.extra, vec![0x1C]);
        assert!(!ModuleInfo::parse(MODULE_BAROMETER, &[]).is_present());
    }

    #[test]
    fn test_require_gates() {
        let mut registry = ModuleRegistry::new();
        registry.insert(ModuleInfo::present(MODULE_ACCELEROMETER, 3, 1));
        registry.insert(ModuleInfo::present(MODULE_DATA_PROCESSOR, 0, 1));
        registry.insert(ModuleInfo::absent(MODULE_SENSOR_FUSION));

        assert!(registry.require(MODULE_ACCELEROMETER).is_ok());
        assert!(registry.require(MODULE_SENSOR_FUSION).unwrap_err().is_unsupported());
        assert!(registry.require(MODULE_TIMER).unwrap_err().is_unsupported());
        assert!(registry
            .require_implementation(MODULE_ACCELEROMETER, ACCEL_IMPL_BMI160, "step detector")
            .is_err());
        assert!(registry
            .require_revision(MODULE_DATA_PROCESSOR, DP_REVISION_PACKER, "packer")
            .is_err());
    }

    #[test]
    fn test_registry_serde_round_trip() {
        let registry = ModuleRegistry::all_present();
        let json = serde_json::to_string(&registry).unwrap();
        let back: ModuleRegistry = serde_json::from_str(&json).unwrap();
        assert_eq!(registry, back);
        assert_eq!(back.len(), KNOWN_MODULES.len());
    }
}

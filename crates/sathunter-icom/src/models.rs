//! Icom BLE model definitions.
//!
//! Each Bluetooth-capable Icom rig is described by a [`BleRigModel`] that
//! captures its CI-V address, the GATT identifiers of its control
//! characteristic, the name it advertises, and the pairing token it expects.
//! Only the IC-705 is supported today.
//!
//! | Model  | CI-V   | Advertised name   | Token         |
//! |--------|--------|-------------------|---------------|
//! | IC-705 | `0xA4` | `ICOM BT(IC-705)` | `EE 39 09 10` |

use sathunter_core::GattTarget;
use uuid::Uuid;

/// Static model definition for a BLE-connected Icom transceiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BleRigModel {
    /// Human-readable model name (e.g. "IC-705").
    pub name: &'static str,
    /// Default CI-V address.
    pub default_civ_address: u8,
    /// Exact local name the radio advertises.
    pub advertised_name: &'static str,
    /// Primary GATT service.
    pub service_uuid: Uuid,
    /// Control characteristic (write-with-response + notify).
    pub characteristic_uuid: Uuid,
    /// Model-specific pairing token sent as the last handshake frame.
    pub pairing_token: [u8; 4],
}

impl BleRigModel {
    /// GATT target for the transport.
    pub fn gatt_target(&self) -> GattTarget {
        GattTarget {
            advertised_name: self.advertised_name.to_string(),
            service: self.service_uuid,
            characteristic: self.characteristic_uuid,
        }
    }
}

/// IC-705 service UUID.
pub const IC705_SERVICE: Uuid = Uuid::from_u128(0x14CF8001_1EC2_D408_1B04_2EB270F14203);

/// IC-705 control characteristic UUID.
pub const IC705_CHARACTERISTIC: Uuid = Uuid::from_u128(0x14CF8002_1EC2_D408_1B04_2EB270F14203);

/// IC-705 model definition.
///
/// A 10 W HF/VHF/UHF portable with built-in Bluetooth. Its BLE CI-V bridge
/// accepts a single controller after a three-frame pairing exchange.
pub fn ic_705() -> BleRigModel {
    BleRigModel {
        name: "IC-705",
        default_civ_address: 0xA4,
        advertised_name: "ICOM BT(IC-705)",
        service_uuid: IC705_SERVICE,
        characteristic_uuid: IC705_CHARACTERISTIC,
        pairing_token: [0xEE, 0x39, 0x09, 0x10],
    }
}

/// All supported models.
pub fn all_models() -> Vec<BleRigModel> {
    vec![ic_705()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ic705_identity() {
        let m = ic_705();
        assert_eq!(m.name, "IC-705");
        assert_eq!(m.default_civ_address, 0xA4);
        assert_eq!(m.advertised_name, "ICOM BT(IC-705)");
        assert_eq!(m.pairing_token, [0xEE, 0x39, 0x09, 0x10]);
    }

    #[test]
    fn ic705_uuids() {
        let m = ic_705();
        assert_eq!(
            m.service_uuid.to_string().to_uppercase(),
            "14CF8001-1EC2-D408-1B04-2EB270F14203"
        );
        assert_eq!(
            m.characteristic_uuid.to_string().to_uppercase(),
            "14CF8002-1EC2-D408-1B04-2EB270F14203"
        );
    }

    #[test]
    fn gatt_target_from_model() {
        let target = ic_705().gatt_target();
        assert_eq!(target.advertised_name, "ICOM BT(IC-705)");
        assert_eq!(target.service, IC705_SERVICE);
        assert_eq!(target.characteristic, IC705_CHARACTERISTIC);
    }

    #[test]
    fn all_models_contains_ic705() {
        assert!(all_models().iter().any(|m| m.name == "IC-705"));
    }
}

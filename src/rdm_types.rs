use crate::consts::RDM_DEVICE_INFO_SIZE;
use crate::layouts::rdm_device_info_layout;
use crate::types::{data_pack_truncated, DataPack};
use crate::unique_identifier::{PackageAddress, UniqueIdentifier};
use modular_bitfield::bitfield;
use modular_bitfield::prelude::B12;

/// The parameter data could not be parsed.
#[derive(Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeserializationError;

impl core::fmt::Display for DeserializationError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "There was a deserialization error.")
    }
}

#[cfg(feature = "std")]
impl std::error::Error for DeserializationError {}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DmxStartAddress {
    /// The requested device has a dmx footprint of 0.
    NoAddress,
    /// The requested device does allocate dmx addresses.
    Address(u16),
}

impl DmxStartAddress {
    pub fn as_u16(&self) -> u16 {
        match self {
            DmxStartAddress::Address(address) => *address,
            DmxStartAddress::NoAddress => 0xFFFF,
        }
    }

    pub fn deserialize(data: &[u8]) -> Result<Self, DeserializationError> {
        let start_address = u16::from_be_bytes(data.try_into().map_err(|_| DeserializationError)?);

        start_address.try_into()
    }

    pub fn serialize(&self) -> DataPack {
        data_pack_truncated(&self.as_u16().to_be_bytes())
    }
}

impl TryFrom<u16> for DmxStartAddress {
    type Error = DeserializationError;

    fn try_from(start_address: u16) -> Result<Self, Self::Error> {
        if start_address == 0xFFFF {
            return Ok(Self::NoAddress);
        }

        if !(1..=512).contains(&start_address) {
            return Err(DeserializationError);
        }

        Ok(Self::Address(start_address))
    }
}

/// Response to discovery mute/unmute requests.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub struct DiscoveryMuteResponse {
    /// The responder is a proxy device.
    pub managed_proxy: bool,
    /// The responder supports sub devices.
    pub sub_device: bool,
    /// The responder is not operational before receiving a firmware update.
    pub boot_loader: bool,
    /// A proxy device has responded on behalf of another device.
    pub proxy_device: bool,
    /// Included if the responding device contains multiple responder ports.
    /// It is the uid of the primary port of the device.
    pub binding_uid: Option<UniqueIdentifier>,
}

// The control field is a big endian u16 with the flags in the lowest bits, so the bitfield
// is read from the swapped bytes.
#[bitfield]
struct DiscControlField {
    managed_proxy: bool,
    sub_device: bool,
    boot_loader: bool,
    proxy_device: bool,
    #[skip]
    reserved: B12,
}

impl DiscoveryMuteResponse {
    pub fn deserialize(data: &[u8]) -> Result<Self, DeserializationError> {
        if data.len() != 2 && data.len() != 8 {
            return Err(DeserializationError);
        }

        let control_field = DiscControlField::from_bytes([data[1], data[0]]);
        let mut discovery_mute_response = Self {
            managed_proxy: control_field.managed_proxy(),
            sub_device: control_field.sub_device(),
            boot_loader: control_field.boot_loader(),
            proxy_device: control_field.proxy_device(),
            binding_uid: None,
        };

        if data.len() == 8 {
            let mut uid_buffer = [0u8; 6];
            uid_buffer.copy_from_slice(&data[2..8]);

            discovery_mute_response.binding_uid = match PackageAddress::from_bytes(&uid_buffer) {
                PackageAddress::Device(uid) if uid.is_null() => None,
                PackageAddress::Device(uid) => Some(uid),
                _ => return Err(DeserializationError),
            };
        }

        Ok(discovery_mute_response)
    }

    pub fn serialize(&self) -> DataPack {
        let control_field = DiscControlField::new()
            .with_managed_proxy(self.managed_proxy)
            .with_sub_device(self.sub_device)
            .with_boot_loader(self.boot_loader)
            .with_proxy_device(self.proxy_device)
            .into_bytes();

        let mut buffer = [0u8; 8];
        buffer[0] = control_field[1];
        buffer[1] = control_field[0];

        match self.binding_uid {
            None => data_pack_truncated(&buffer[..2]),
            Some(uid) => {
                buffer[2..].copy_from_slice(&uid.to_bytes());
                data_pack_truncated(&buffer)
            },
        }
    }
}

/// Parameter data of DEVICE_INFO.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct DeviceInfo {
    pub device_model_id: u16,
    pub product_category: u16,
    pub software_version: u32,
    pub dmx_footprint: u16,
    /// Current personality in the upper byte, personality count in the lower byte.
    pub dmx_personality: u16,
    pub dmx_start_address: DmxStartAddress,
    pub sub_device_count: u16,
    pub sensor_count: u8,
}

impl DeviceInfo {
    pub fn deserialize(buffer: &[u8]) -> Result<Self, DeserializationError> {
        if buffer.len() != RDM_DEVICE_INFO_SIZE {
            return Err(DeserializationError);
        }

        let device_info_view = rdm_device_info_layout::View::new(buffer);
        Ok(DeviceInfo {
            device_model_id: device_info_view.device_model_id().read(),
            product_category: device_info_view.product_category().read(),
            software_version: device_info_view.software_version_id().read(),
            dmx_footprint: device_info_view.dmx_footprint().read(),
            dmx_personality: device_info_view.dmx_personality().read(),
            dmx_start_address: device_info_view.dmx_start_address().read().try_into()?,
            sub_device_count: device_info_view.sub_device_count().read(),
            sensor_count: device_info_view.sensor_count().read(),
        })
    }

    pub fn serialize(&self) -> DataPack {
        let mut resp_buffer = [0u8; RDM_DEVICE_INFO_SIZE];
        let mut device_info_view = rdm_device_info_layout::View::new(&mut resp_buffer[..]);

        device_info_view.protocol_version_mut().write(0x01_00);
        device_info_view
            .device_model_id_mut()
            .write(self.device_model_id);
        device_info_view
            .product_category_mut()
            .write(self.product_category);
        device_info_view
            .software_version_id_mut()
            .write(self.software_version);
        device_info_view
            .dmx_footprint_mut()
            .write(self.dmx_footprint);
        device_info_view
            .dmx_personality_mut()
            .write(self.dmx_personality);
        device_info_view
            .dmx_start_address_mut()
            .write(self.dmx_start_address.as_u16());
        device_info_view
            .sub_device_count_mut()
            .write(self.sub_device_count);
        device_info_view.sensor_count_mut().write(self.sensor_count);

        data_pack_truncated(&resp_buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dmx_start_address_range() {
        assert_eq!(
            DmxStartAddress::deserialize(&[0x02, 0x00]),
            Ok(DmxStartAddress::Address(512))
        );
        assert_eq!(
            DmxStartAddress::deserialize(&[0xFF, 0xFF]),
            Ok(DmxStartAddress::NoAddress)
        );
        DmxStartAddress::deserialize(&[0x02, 0x01]).unwrap_err();
        DmxStartAddress::deserialize(&[0x00, 0x00]).unwrap_err();
        DmxStartAddress::deserialize(&[0x01]).unwrap_err();
    }

    #[test]
    fn test_disc_mute_control_field_bit_order() {
        let response = DiscoveryMuteResponse {
            sub_device: true,
            ..Default::default()
        };
        assert_eq!(response.serialize(), [0x00, 0x02]);

        let response = DiscoveryMuteResponse::deserialize(&[0x00, 0x09]).unwrap();
        assert!(response.managed_proxy);
        assert!(response.proxy_device);
        assert!(!response.boot_loader);
        assert_eq!(response.binding_uid, None);
    }

    #[test]
    fn test_disc_mute_binding_uid() {
        let binding_uid = UniqueIdentifier::new(0x05E0, 0x42).unwrap();
        let response = DiscoveryMuteResponse {
            binding_uid: Some(binding_uid),
            ..Default::default()
        };

        let serialized = response.serialize();
        assert_eq!(serialized.len(), 8);
        assert_eq!(
            DiscoveryMuteResponse::deserialize(&serialized).unwrap(),
            response
        );

        // a zero binding uid means there is none
        let response =
            DiscoveryMuteResponse::deserialize(&[0, 0, 0, 0, 0, 0, 0, 0]).unwrap();
        assert_eq!(response.binding_uid, None);

        DiscoveryMuteResponse::deserialize(&[0, 0, 0]).unwrap_err();
    }

    #[test]
    fn test_device_info_layout() {
        let device_info = DeviceInfo {
            device_model_id: 0x0102,
            product_category: 0x0508,
            software_version: 0x0000_0003,
            dmx_footprint: 4,
            dmx_personality: 0x0101,
            dmx_start_address: DmxStartAddress::Address(10),
            sub_device_count: 0,
            sensor_count: 0,
        };

        let serialized = device_info.serialize();
        assert_eq!(serialized.len(), RDM_DEVICE_INFO_SIZE);
        assert_eq!(&serialized[..4], &[0x01, 0x00, 0x01, 0x02]);
        assert_eq!(&serialized[14..16], &[0x00, 0x0A]);
        assert_eq!(DeviceInfo::deserialize(&serialized).unwrap(), device_info);

        DeviceInfo::deserialize(&serialized[..18]).unwrap_err();
    }
}

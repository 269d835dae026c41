use crate::consts::RDM_MAX_PARAMETER_DATA_LENGTH;

/// Parameter data of one rdm package.
pub type DataPack = heapless::Vec<u8, RDM_MAX_PARAMETER_DATA_LENGTH>;

/// Builds a [DataPack] from a slice, dropping everything past the maximum parameter data length.
pub(crate) fn data_pack_truncated(data: &[u8]) -> DataPack {
    let mut data_pack = DataPack::new();
    let length = data.len().min(RDM_MAX_PARAMETER_DATA_LENGTH);
    // cannot fail, the length is clamped to the capacity
    let _ = data_pack.extend_from_slice(&data[..length]);
    data_pack
}

/// Response status of a rdm package
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum ResponseType {
    /// The request was acknowledged.
    ResponseTypeAck = 0x00,
    /// The request was acknowledged but the result isn't ready yet.
    ResponseTypeAckTimer = 0x01,
    /// The request was not acknowledged.
    ResponseTypeNackReason = 0x02,
    /// The request was acknowledged but the response does not fit into a single response.
    ResponseTypeAckOverflow = 0x03,
}

impl TryFrom<u8> for ResponseType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        Ok(match value {
            0x00 => Self::ResponseTypeAck,
            0x01 => Self::ResponseTypeAckTimer,
            0x02 => Self::ResponseTypeNackReason,
            0x03 => Self::ResponseTypeAckOverflow,
            _ => {
                return Err(());
            },
        })
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u16)]
pub enum NackReason {
    UnknownPid = 0x0000,
    FormatError = 0x0001,
    HardwareFault = 0x0002,
    ProxyReject = 0x0003,
    WriteProtect = 0x0004,
    UnsupportedCommandClass = 0x0005,
    DataOutOfRange = 0x0006,
    BufferFull = 0x0007,
    PacketSizeUnsupported = 0x0008,
    SubDeviceOutOfRange = 0x0009,
    ProxyBufferFull = 0x000A,
}

impl NackReason {
    pub fn serialize(&self) -> DataPack {
        data_pack_truncated(&(*self as u16).to_be_bytes())
    }
}

impl From<NackReason> for u16 {
    fn from(value: NackReason) -> Self {
        value as u16
    }
}

impl TryFrom<u16> for NackReason {
    type Error = ();

    fn try_from(value: u16) -> Result<Self, ()> {
        match value {
            0x0000 => Ok(Self::UnknownPid),
            0x0001 => Ok(Self::FormatError),
            0x0002 => Ok(Self::HardwareFault),
            0x0003 => Ok(Self::ProxyReject),
            0x0004 => Ok(Self::WriteProtect),
            0x0005 => Ok(Self::UnsupportedCommandClass),
            0x0006 => Ok(Self::DataOutOfRange),
            0x0007 => Ok(Self::BufferFull),
            0x0008 => Ok(Self::PacketSizeUnsupported),
            0x0009 => Ok(Self::SubDeviceOutOfRange),
            0x000A => Ok(Self::ProxyBufferFull),
            _ => Err(()),
        }
    }
}

/// Severity filter of a QUEUED_MESSAGE request.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum StatusType {
    /// Repeat the previously delivered message.
    StatusGetLastMessage = 0x01,
    StatusAdvisory = 0x02,
    StatusWarning = 0x03,
    StatusError = 0x04,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nack_reason_serialize() {
        assert_eq!(NackReason::SubDeviceOutOfRange.serialize(), [0x00, 0x09]);
        assert_eq!(NackReason::try_from(0x0002), Ok(NackReason::HardwareFault));
        assert_eq!(NackReason::try_from(0x000B), Err(()));
    }

    #[test]
    fn test_data_pack_truncated() {
        let long = [0x55u8; 300];
        assert_eq!(
            data_pack_truncated(&long).len(),
            RDM_MAX_PARAMETER_DATA_LENGTH
        );
        assert_eq!(data_pack_truncated(&[1, 2]), [1, 2]);
    }
}

use crate::command_class::{RequestCommandClass, ResponseCommandClass};
use crate::consts::{
    PREAMBLE_BYTE, RDM_DISCOVERY_RESPONSE_SIZE, RDM_HEADER_SIZE, RDM_MAX_DISCOVERY_RESPONSE_SIZE,
    RDM_MAX_PACKAGE_SIZE, RDM_MAX_PREAMBLE_LENGTH, RDM_MIN_PACKAGE_SIZE, SC_RDM, SC_SUB_MESSAGE,
    SEPARATOR_BYTE,
};
use crate::layouts::{disc_unique_branch_layout, rdm_header_layout};
use crate::types::{data_pack_truncated, DataPack, ResponseType};
use crate::unique_identifier::{PackageAddress, UniqueIdentifier};
use crate::utils::{calculate_checksum, decode_disc_unique, encode_disc_unique};

/// Binary representation of an RDM package.
pub type BinaryRdmPackage = heapless::Vec<u8, RDM_MAX_PACKAGE_SIZE>;

/// Binary representation of a discovery response including preamble and separator.
pub type BinaryDiscoveryResponse = heapless::Vec<u8, RDM_MAX_DISCOVERY_RESPONSE_SIZE>;

/// Offset of the transaction number in a serialized rdm package.
const TRANSACTION_NUMBER_OFFSET: usize = 15;
/// Offset of the command class in a serialized rdm package.
const COMMAND_CLASS_OFFSET: usize = 20;
/// Offset of the parameter id in a serialized rdm package.
const PARAMETER_ID_OFFSET: usize = 21;

/// Error that gets raised when attempting to convert an [RdmRequestData] object
/// to a [RdmResponseData] object that contains a broadcast destination address.
#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct IsBroadcastError;

impl core::fmt::Display for IsBroadcastError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "tried to convert broadcast request to response")
    }
}

#[cfg(feature = "std")]
impl std::error::Error for IsBroadcastError {}

/// An RDM Request package that does not have its parameter data deserialized.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct RdmRequestData {
    pub destination_uid: PackageAddress,
    pub source_uid: UniqueIdentifier,
    pub transaction_number: u8,
    pub port_id: u8,
    pub message_count: u8,
    pub sub_device: u16,
    pub command_class: RequestCommandClass,
    pub parameter_id: u16,
    pub parameter_data: DataPack,
}

impl RdmRequestData {
    /// Builds the response to this request. The response is addressed to the source of the
    /// request and sent from the `responder_uid`.
    pub fn build_response(
        &self,
        responder_uid: UniqueIdentifier,
        response_type: ResponseType,
        response: DataPack,
        message_count: u8,
    ) -> Result<RdmResponseData, IsBroadcastError> {
        if self.destination_uid.is_broadcast() {
            return Err(IsBroadcastError);
        }

        Ok(RdmResponseData {
            destination_uid: PackageAddress::Device(self.source_uid),
            source_uid: responder_uid,
            transaction_number: self.transaction_number,
            response_type,
            message_count,
            sub_device: self.sub_device,
            command_class: self.command_class.get_response_class(),
            parameter_id: self.parameter_id,
            parameter_data: response,
        })
    }

    /// Returns true if a responder will answer this request.
    /// Broadcasts are not answered, except for DISC_UNIQUE_BRANCH.
    pub fn expects_response(&self) -> bool {
        !self.destination_uid.is_broadcast() || self.is_disc_unique_branch()
    }

    pub fn is_disc_unique_branch(&self) -> bool {
        self.command_class == RequestCommandClass::DiscoveryCommand
            && self.parameter_id == crate::pids::DISC_UNIQUE_BRANCH
    }
}

/// An RDM Response package that does not have its parameter data deserialized.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct RdmResponseData {
    pub destination_uid: PackageAddress,
    pub source_uid: UniqueIdentifier,
    pub transaction_number: u8,
    pub response_type: ResponseType,
    pub message_count: u8,
    pub sub_device: u16,
    pub command_class: ResponseCommandClass,
    pub parameter_id: u16,
    pub parameter_data: DataPack,
}

#[derive(Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RdmDeserializationError {
    /// Buffer must be at least 26 bytes
    BufferTooSmall,
    /// Buffer must be at most 257 bytes
    BufferTooBig,
    /// The command class was not found; contains contents of command class field
    CommandClassNotFound(u8),
    /// The response type was not found; contains contents of response type field
    ResponseTypeNotFound(u8),
    /// The message length field is incorrect; contains result of parsing
    WrongMessageLength(usize),
    /// Wrong checksum
    WrongChecksum,
    /// Received wrong start code (0xCC) or sub start code (0x01)
    WrongStartCode,
    /// The source uid is a broadcast address.
    SourceUidIsBroadcast,
}

impl core::fmt::Display for RdmDeserializationError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            RdmDeserializationError::BufferTooSmall => write!(f, "buffer too small"),
            RdmDeserializationError::BufferTooBig => write!(f, "buffer too big"),
            RdmDeserializationError::CommandClassNotFound(command_class) => {
                write!(f, "command class {} not found", command_class)
            },
            RdmDeserializationError::ResponseTypeNotFound(response_type) => {
                write!(f, "response type {} is unknown", response_type)
            },
            RdmDeserializationError::WrongMessageLength(message_length) => {
                write!(f, "message length {} is incorrect", message_length)
            },
            RdmDeserializationError::WrongChecksum => write!(f, "checksum is incorrect"),
            RdmDeserializationError::WrongStartCode => write!(f, "start code is incorrect"),
            RdmDeserializationError::SourceUidIsBroadcast => write!(f, "source uid is a broadcast"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for RdmDeserializationError {}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum RdmData {
    Request(RdmRequestData),
    Response(RdmResponseData),
}

impl RdmData {
    pub fn deserialize(buf: &[u8]) -> Result<Self, RdmDeserializationError> {
        deserialize_rdm_data(buf)
    }

    pub fn serialize(&self) -> BinaryRdmPackage {
        let mut buffer = [0u8; RDM_MAX_PACKAGE_SIZE];
        let package_size = serialize_rdm_data(self, &mut buffer);

        // the buffer has the capacity of the package type
        BinaryRdmPackage::from_slice(&buffer[..package_size]).unwrap_or_default()
    }
}

/// Returns true if the checksum trailer of the rdm package matches its contents.
pub fn checksum_is_valid(buffer: &[u8]) -> bool {
    if buffer.len() < 2 {
        return false;
    }

    let (content, checksum) = buffer.split_at(buffer.len() - 2);
    calculate_checksum(content) == u16::from_be_bytes([checksum[0], checksum[1]])
}

/// Deserialize rdm data.
/// Buffer must be between 26 and 257 bytes and carry a valid checksum.
pub fn deserialize_rdm_data(buffer: &[u8]) -> Result<RdmData, RdmDeserializationError> {
    check_package_size(buffer)?;

    if !checksum_is_valid(buffer) {
        return Err(RdmDeserializationError::WrongChecksum);
    }

    deserialize_rdm_data_unchecked(buffer)
}

fn check_package_size(buffer: &[u8]) -> Result<(), RdmDeserializationError> {
    if buffer.len() < RDM_MIN_PACKAGE_SIZE {
        return Err(RdmDeserializationError::BufferTooSmall);
    }

    if buffer.len() > RDM_MAX_PACKAGE_SIZE {
        return Err(RdmDeserializationError::BufferTooBig);
    }

    Ok(())
}

/// Deserialize rdm data without looking at the checksum.
pub fn deserialize_rdm_data_unchecked(buffer: &[u8]) -> Result<RdmData, RdmDeserializationError> {
    check_package_size(buffer)?;
    let buffer_size = buffer.len();

    let header_view = rdm_header_layout::View::new(buffer);

    if header_view.start_code().read() != SC_RDM
        || header_view.sub_start_code().read() != SC_SUB_MESSAGE
    {
        return Err(RdmDeserializationError::WrongStartCode);
    }

    // exclude checksum
    let message_length = header_view.message_length().read() as usize;
    if message_length != buffer_size - 2 {
        return Err(RdmDeserializationError::WrongMessageLength(message_length));
    }

    let parameter_data_length = header_view.parameter_data_length().read() as usize;
    if parameter_data_length != message_length - RDM_HEADER_SIZE {
        return Err(RdmDeserializationError::WrongMessageLength(message_length));
    }

    let parameter_data = data_pack_truncated(
        &header_view.parameter_data_and_checksum()[..parameter_data_length],
    );

    let destination_uid = PackageAddress::from_bytes(header_view.destination_uid());
    let source_uid = match PackageAddress::from_bytes(header_view.source_uid()) {
        PackageAddress::Device(device_uid) => device_uid,
        _ => return Err(RdmDeserializationError::SourceUidIsBroadcast),
    };

    let command_class_field = header_view.command_class().read();

    if let Ok(command_class) = RequestCommandClass::try_from(command_class_field) {
        return Ok(RdmData::Request(RdmRequestData {
            destination_uid,
            source_uid,
            transaction_number: header_view.transaction_number().read(),
            port_id: header_view.port_id_response_type().read(),
            message_count: header_view.message_count().read(),
            sub_device: header_view.sub_device().read(),
            command_class,
            parameter_id: header_view.parameter_id().read(),
            parameter_data,
        }));
    }

    let command_class = ResponseCommandClass::try_from(command_class_field)
        .map_err(|_| RdmDeserializationError::CommandClassNotFound(command_class_field))?;

    let response_type_field = header_view.port_id_response_type().read();
    let response_type = response_type_field
        .try_into()
        .map_err(|_| RdmDeserializationError::ResponseTypeNotFound(response_type_field))?;

    Ok(RdmData::Response(RdmResponseData {
        destination_uid,
        source_uid,
        transaction_number: header_view.transaction_number().read(),
        response_type,
        message_count: header_view.message_count().read(),
        sub_device: header_view.sub_device().read(),
        command_class,
        parameter_id: header_view.parameter_id().read(),
        parameter_data,
    }))
}

/// Serializes RDM data into `dst` and returns the amount of bytes written.
/// `dst` has to hold at least 257 bytes or the size of the package.
pub fn serialize_rdm_data(rdm_data: &RdmData, dst: &mut [u8]) -> usize {
    let (destination_uid, source_uid, transaction_number, port_id_response_type) = match rdm_data
    {
        RdmData::Request(request) => (
            request.destination_uid,
            request.source_uid,
            request.transaction_number,
            request.port_id,
        ),
        RdmData::Response(response) => (
            response.destination_uid,
            response.source_uid,
            response.transaction_number,
            response.response_type as u8,
        ),
    };
    let (message_count, sub_device, command_class, parameter_id, parameter_data) = match rdm_data {
        RdmData::Request(request) => (
            request.message_count,
            request.sub_device,
            request.command_class as u8,
            request.parameter_id,
            &request.parameter_data,
        ),
        RdmData::Response(response) => (
            response.message_count,
            response.sub_device,
            response.command_class as u8,
            response.parameter_id,
            &response.parameter_data,
        ),
    };

    let parameter_data_length = parameter_data.len();
    let total_package_length = parameter_data_length + RDM_MIN_PACKAGE_SIZE;
    let mut header_view = rdm_header_layout::View::new(&mut dst[..total_package_length]);

    header_view.start_code_mut().write(SC_RDM);
    header_view.sub_start_code_mut().write(SC_SUB_MESSAGE);
    header_view
        .message_length_mut()
        .write((parameter_data_length + RDM_HEADER_SIZE) as u8);
    header_view
        .destination_uid_mut()
        .copy_from_slice(&destination_uid.to_bytes());
    header_view
        .source_uid_mut()
        .copy_from_slice(&PackageAddress::Device(source_uid).to_bytes());
    header_view
        .transaction_number_mut()
        .write(transaction_number);
    header_view
        .port_id_response_type_mut()
        .write(port_id_response_type);
    header_view.message_count_mut().write(message_count);
    header_view.sub_device_mut().write(sub_device);
    header_view.command_class_mut().write(command_class);
    header_view.parameter_id_mut().write(parameter_id);
    header_view
        .parameter_data_length_mut()
        .write(parameter_data_length as u8);
    header_view.parameter_data_and_checksum_mut()[..parameter_data_length]
        .copy_from_slice(parameter_data);

    write_checksum(&mut dst[..total_package_length]);

    total_package_length
}

fn write_checksum(package: &mut [u8]) {
    let checksum_index = package.len() - 2;
    let checksum = calculate_checksum(&package[..checksum_index]);
    package[checksum_index..].copy_from_slice(&checksum.to_be_bytes());
}

/// Returns true if the frame looks like an rdm request (start code and request command class).
pub fn is_rdm_request(frame: &[u8]) -> bool {
    frame.len() >= RDM_MIN_PACKAGE_SIZE
        && frame[0] == SC_RDM
        && RequestCommandClass::try_from(frame[COMMAND_CLASS_OFFSET]).is_ok()
}

/// Returns true if the frame looks like an rdm response.
pub fn is_rdm_response(frame: &[u8]) -> bool {
    frame.len() >= RDM_MIN_PACKAGE_SIZE
        && frame[0] == SC_RDM
        && ResponseCommandClass::try_from(frame[COMMAND_CLASS_OFFSET]).is_ok()
}

/// Returns true if the frame is an rdm request that will be answered by a responder.
pub fn rdm_request_expects_response(frame: &[u8]) -> bool {
    if !is_rdm_request(frame) {
        return false;
    }

    let mut destination = [0u8; 6];
    destination.copy_from_slice(&frame[3..9]);

    !PackageAddress::from_bytes(&destination).is_broadcast() || is_disc_unique_branch(frame)
}

/// Returns true if the frame is a DISC_UNIQUE_BRANCH request.
pub fn is_disc_unique_branch(frame: &[u8]) -> bool {
    if !is_rdm_request(frame) {
        return false;
    }

    let parameter_id = u16::from_be_bytes([
        frame[PARAMETER_ID_OFFSET],
        frame[PARAMETER_ID_OFFSET + 1],
    ]);

    frame[COMMAND_CLASS_OFFSET] == RequestCommandClass::DiscoveryCommand as u8
        && parameter_id == crate::pids::DISC_UNIQUE_BRANCH
}

/// Overwrites the transaction number of a serialized rdm request and fixes its checksum.
/// Returns false if the frame is not a well formed rdm package.
pub fn stamp_transaction_number(frame: &mut [u8], transaction_number: u8) -> bool {
    if frame.len() < RDM_MIN_PACKAGE_SIZE || frame[0] != SC_RDM {
        return false;
    }

    let package_length = frame[2] as usize + 2;
    if package_length < RDM_MIN_PACKAGE_SIZE || package_length > frame.len() {
        return false;
    }

    frame[TRANSACTION_NUMBER_OFFSET] = transaction_number;
    write_checksum(&mut frame[..package_length]);

    true
}

/// Serializes the parameter data of DISC_UNIQUE_BRANCH.
pub fn serialize_disc_unique_branch(lower_bound: u64, upper_bound: u64) -> DataPack {
    let mut buffer = [0u8; 12];
    let mut branch_view = disc_unique_branch_layout::View::new(&mut buffer[..]);
    branch_view
        .lower_bound_mut()
        .copy_from_slice(&lower_bound.to_be_bytes()[2..]);
    branch_view
        .upper_bound_mut()
        .copy_from_slice(&upper_bound.to_be_bytes()[2..]);

    data_pack_truncated(&buffer)
}

/// Returns the lower and upper bound of DISC_UNIQUE_BRANCH parameter data.
pub fn deserialize_disc_unique_branch(parameter_data: &[u8]) -> Option<(u64, u64)> {
    if parameter_data.len() != 12 {
        return None;
    }

    let branch_view = disc_unique_branch_layout::View::new(parameter_data);

    Some((
        bound_value(branch_view.lower_bound()),
        bound_value(branch_view.upper_bound()),
    ))
}

fn bound_value(bytes: &[u8; 6]) -> u64 {
    let mut buffer = [0u8; 8];
    buffer[2..].copy_from_slice(bytes);
    u64::from_be_bytes(buffer)
}

/// Serializes the response to DISC_UNIQUE_BRANCH with the given amount of preamble bytes (0-7).
pub fn serialize_discovery_response(
    uid: UniqueIdentifier,
    preamble_length: usize,
) -> BinaryDiscoveryResponse {
    let preamble_length = preamble_length.min(RDM_MAX_PREAMBLE_LENGTH);
    let mut frame_buffer = [PREAMBLE_BYTE; RDM_MAX_DISCOVERY_RESPONSE_SIZE];
    frame_buffer[preamble_length] = SEPARATOR_BYTE;

    let data_start = preamble_length + 1;
    let checksum_start = data_start + 12;
    encode_disc_unique(&uid.to_bytes(), &mut frame_buffer[data_start..checksum_start]);

    let checksum = calculate_checksum(&frame_buffer[data_start..checksum_start]);
    encode_disc_unique(
        &checksum.to_be_bytes(),
        &mut frame_buffer[checksum_start..checksum_start + 4],
    );

    BinaryDiscoveryResponse::from_slice(&frame_buffer[..checksum_start + 4]).unwrap_or_default()
}

/// Returns the index of the separator byte of a discovery response, if the frame starts with a
/// valid preamble.
pub fn discovery_response_separator(buffer: &[u8]) -> Option<usize> {
    buffer
        .iter()
        .take(RDM_MAX_PREAMBLE_LENGTH + 1)
        .position(|&byte| byte != PREAMBLE_BYTE)
        .filter(|&index| buffer[index] == SEPARATOR_BYTE)
}

/// Returns received device id if there is no collision.
pub fn deserialize_discovery_response(
    buffer: &[u8],
) -> Result<UniqueIdentifier, RdmDeserializationError> {
    let index_of_separator_byte =
        discovery_response_separator(buffer).ok_or(RdmDeserializationError::WrongStartCode)?;

    let start_index = index_of_separator_byte + 1;
    let message_length = buffer.len() - start_index;
    if message_length < RDM_DISCOVERY_RESPONSE_SIZE {
        return Err(RdmDeserializationError::WrongMessageLength(message_length));
    }

    let encoded_uid = &buffer[start_index..start_index + 12];
    let calculated_checksum = calculate_checksum(encoded_uid);

    let mut checksum_buf = [0u8; 2];
    decode_disc_unique(
        &buffer[start_index + 12..start_index + RDM_DISCOVERY_RESPONSE_SIZE],
        &mut checksum_buf,
    );

    if calculated_checksum != u16::from_be_bytes(checksum_buf) {
        return Err(RdmDeserializationError::WrongChecksum);
    }

    let mut device_id_buf = [0u8; 6];
    decode_disc_unique(encoded_uid, &mut device_id_buf);

    match PackageAddress::from_bytes(&device_id_buf) {
        PackageAddress::Device(uid) => Ok(uid),
        _ => Err(RdmDeserializationError::SourceUidIsBroadcast),
    }
}

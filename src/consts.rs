pub const DMX_NULL_START: u8 = 0x00;
/// start code + 512 byte package
pub const DMX_MAX_PACKAGE_SIZE: usize = 513;
pub const SC_RDM: u8 = 0xCC;
pub const SC_SUB_MESSAGE: u8 = 0x01;

pub const PREAMBLE_BYTE: u8 = 0xFE;
pub const SEPARATOR_BYTE: u8 = 0xAA;
/// A discovery response may start with up to 7 preamble bytes.
pub const RDM_MAX_PREAMBLE_LENGTH: usize = 7;

pub const BROADCAST_UID: u64 = 0xFFFF_FFFFFFFF;
/// The highest uid a device can have. Upper bound of the discovery address space.
pub const RDM_MAX_UID: u64 = 0xFFFF_FFFFFFFE;

pub const DMX_BAUD: u32 = 250_000;
pub const DMX_BAUD_MIN: u32 = 245_000;
pub const DMX_BAUD_MAX: u32 = 255_000;

pub const DMX_BREAK_MIN_MICROS: u32 = 92;
pub const DMX_BREAK_MAX_MICROS: u32 = 1_000_000;
pub const DMX_MAB_MIN_MICROS: u32 = 12;
pub const DMX_MAB_MAX_MICROS: u32 = 999_999;
/// Break length a controller uses by default. Within the RDM limits of 176-352us.
pub const RDM_BREAK_MICROS: u32 = 176;
/// Mark after break length a controller uses by default. Within the RDM limits of 12-88us.
pub const RDM_MAB_MICROS: u32 = 12;
/// One slot (start bit, 8 data bits, 2 stop bits) at 250 kBd.
pub const DMX_SLOT_MICROS: u32 = 44;
/// Longest a DMX512 packet may take, used as the default receive timeout.
pub const MAXIMUM_DMX512_MILLIS: u32 = 1250;

/// The controller considers a response lost after this time.
pub const RDM_RESPONSE_TIMEOUT_MICROS: u32 = 2800;
/// A responder has to start its response within this time after the request.
pub const RDM_RESPONDER_WINDOW_MICROS: u32 = 2000;
/// Default timeout the controller waits for a complete response.
pub const RDM_REQUEST_TIMEOUT_MICROS: u32 = 20_000;

pub const RDM_PACKET_SPACING_BROADCAST_MICROS: u32 = 176;
pub const RDM_PACKET_SPACING_RESPONSE_MICROS: u32 = 176;
pub const RDM_PACKET_SPACING_REQUEST_NO_RESPONSE_MICROS: u32 = 3000;
pub const RDM_PACKET_SPACING_DISCOVERY_NO_RESPONSE_MICROS: u32 = 5800;

/// Size of the header of an rdm package, including start code, excluding checksum.
pub const RDM_HEADER_SIZE: usize = 24;
pub const RDM_MIN_PACKAGE_SIZE: usize = RDM_HEADER_SIZE + 2;
pub const RDM_MAX_PACKAGE_SIZE: usize = 257;
/// Excluding preamble and separator
pub const RDM_DISCOVERY_RESPONSE_SIZE: usize = 16;
/// Including 7 bytes preamble + 1 byte separator
pub const RDM_MAX_DISCOVERY_RESPONSE_SIZE: usize = RDM_DISCOVERY_RESPONSE_SIZE + 8;

pub const RDM_MAX_PARAMETER_DATA_LENGTH: usize = 231;
pub const RDM_DEVICE_INFO_SIZE: usize = 0x13;
/// Maximum length of an ascii parameter like DEVICE_LABEL.
pub const RDM_ASCII_MAX_LENGTH: usize = 32;

/// Highest sub device number besides [RDM_SUB_DEVICE_ALL].
pub const RDM_SUB_DEVICE_MAX: u16 = 512;
pub const RDM_SUB_DEVICE_ALL: u16 = 0xFFFF;

/// A 48 bit address space never needs more than 48 levels of subdivision, plus the root.
pub const RDM_DISCOVERY_STACK_SIZE: usize = 49;
pub const RDM_DISCOVERY_ATTEMPTS: u8 = 3;
pub const RDM_QUICK_FIND_ROUNDS: u8 = 3;

/// Parameters required by the responder itself.
pub const RDM_RESPONDER_PIDS_REQUIRED: usize = 11;
/// Optional parameters a user may add on top of the required ones.
pub const RDM_RESPONDER_PIDS_OPTIONAL: usize = 25;
pub const RDM_RESPONDER_PIDS_MAX: usize = RDM_RESPONDER_PIDS_REQUIRED + RDM_RESPONDER_PIDS_OPTIONAL;
pub const RDM_RESPONDER_QUEUE_SIZE_MAX: usize = 64;
/// Storage taken by the default parameters: IDENTIFY_DEVICE, DMX_START_ADDRESS and DEVICE_LABEL.
pub const RDM_PARAMETER_ARENA_MIN: usize = 1 + 2 + RDM_ASCII_MAX_LENGTH;

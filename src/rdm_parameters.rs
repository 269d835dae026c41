//! The parameter dictionary of a responder.
//!
//! Every parameter id the responder answers to has one entry. An entry either owns a slice of a
//! caller supplied storage arena, views into the storage of another entry (an alias) or has no
//! storage at all, in which case its response handler computes the value. Entries are never
//! removed.

use crate::command_class::RequestCommandClass;
use crate::consts::{
    RDM_MAX_PARAMETER_DATA_LENGTH, RDM_RESPONDER_PIDS_MAX, RDM_RESPONDER_QUEUE_SIZE_MAX,
};
use crate::pids;
use crate::rdm_codec::{self, FieldKind, Schema};
use crate::rdm_data::RdmRequestData;
use crate::rdm_responder::{DeviceState, RdmAnswer, RdmResult};
use crate::types::NackReason;

/// The command classes a parameter supports.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ParameterAccess {
    Discovery,
    Get,
    Set,
    GetSet,
}

impl ParameterAccess {
    pub fn allows(&self, command_class: RequestCommandClass) -> bool {
        matches!(
            (self, command_class),
            (Self::Discovery, RequestCommandClass::DiscoveryCommand)
                | (Self::Get | Self::GetSet, RequestCommandClass::GetCommand)
                | (Self::Set | Self::GetSet, RequestCommandClass::SetCommand)
        )
    }

    /// The value used in PARAMETER_DESCRIPTION.
    pub fn description_code(&self) -> u8 {
        match self {
            Self::Discovery => 0x00,
            Self::Get => 0x01,
            Self::Set => 0x02,
            Self::GetSet => 0x03,
        }
    }
}

/// Data type of a parameter as reported in PARAMETER_DESCRIPTION.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum DataType {
    NotDefined = 0x00,
    BitField = 0x01,
    Ascii = 0x02,
    UnsignedByte = 0x03,
    SignedByte = 0x04,
    UnsignedWord = 0x05,
    SignedWord = 0x06,
    UnsignedDWord = 0x07,
    SignedDWord = 0x08,
}

/// Metadata of a parameter.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ParameterDescription {
    pub data_type: DataType,
    pub units: u8,
    pub prefix: u8,
    pub min_value: u32,
    pub max_value: u32,
    pub default_value: u32,
    pub description: &'static str,
}

impl ParameterDescription {
    pub const fn new(data_type: DataType, description: &'static str) -> Self {
        Self {
            data_type,
            units: 0,
            prefix: 0,
            min_value: 0,
            max_value: 0,
            default_value: 0,
            description,
        }
    }
}

/// Builds the response for a request on one parameter id.
pub type ResponseHandler =
    fn(&mut ParameterDictionary<'_>, &mut DeviceState, &RdmRequestData) -> RdmResult;

/// Gets called after a request on the parameter was answered.
pub type ParameterCallback = fn(&ParameterDictionary<'_>, &RdmRequestData, &RdmAnswer);

#[derive(Debug, Copy, Clone)]
pub struct ParameterDefinition {
    pub pid: u16,
    /// Wire format of the parameter data of GET responses and SET requests.
    pub schema: Schema,
    pub access: ParameterAccess,
    pub description: ParameterDescription,
    pub response_handler: ResponseHandler,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Storage {
    Owned { start: usize, len: usize },
    Alias { start: usize, len: usize },
    Deterministic,
}

impl Storage {
    fn range(&self) -> Option<core::ops::Range<usize>> {
        match *self {
            Storage::Owned { start, len } | Storage::Alias { start, len } => {
                Some(start..start + len)
            },
            Storage::Deterministic => None,
        }
    }
}

#[derive(Debug, Copy, Clone)]
struct Entry {
    definition: ParameterDefinition,
    storage: Storage,
    callback: Option<ParameterCallback>,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DictionaryError {
    /// The parameter id already has an entry.
    AlreadyDefined,
    /// All entries are taken.
    Full,
    /// Not enough space left in the storage arena.
    OutOfStorage,
    /// There is no entry for the parameter id.
    UnknownPid,
    /// The alias offset is past the end of the aliased storage.
    OffsetOutOfRange,
    /// The aliased parameter has no storage.
    NoStorage,
}

impl core::fmt::Display for DictionaryError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            DictionaryError::AlreadyDefined => write!(f, "parameter is already defined"),
            DictionaryError::Full => write!(f, "parameter table is full"),
            DictionaryError::OutOfStorage => write!(f, "parameter storage is exhausted"),
            DictionaryError::UnknownPid => write!(f, "parameter is not defined"),
            DictionaryError::OffsetOutOfRange => write!(f, "alias offset out of range"),
            DictionaryError::NoStorage => write!(f, "aliased parameter has no storage"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for DictionaryError {}

const DESCRIPTION_FIELDS: &[FieldKind] = &[
    FieldKind::Word,
    FieldKind::Byte,
    FieldKind::Byte,
    FieldKind::Byte,
    FieldKind::Byte,
    FieldKind::Byte,
    FieldKind::Byte,
    FieldKind::DWord,
    FieldKind::DWord,
    FieldKind::DWord,
    FieldKind::Ascii,
];

/// Size of the native form of a PARAMETER_DESCRIPTION response.
pub const PARAMETER_DESCRIPTION_NATIVE_SIZE: usize = 2 + 6 + 12 + 32;

/// Wire format of PARAMETER_DESCRIPTION responses.
pub fn parameter_description_schema() -> Schema {
    Schema::new(DESCRIPTION_FIELDS).unwrap_or_else(|_| Schema::empty())
}

/// Registry of the parameters a responder supports.
pub struct ParameterDictionary<'a> {
    arena: &'a mut [u8],
    used: usize,
    entries: heapless::Vec<Entry, RDM_RESPONDER_PIDS_MAX>,
    queue: heapless::Deque<u16, RDM_RESPONDER_QUEUE_SIZE_MAX>,
    last_queued: Option<u16>,
}

impl<'a> ParameterDictionary<'a> {
    /// Creates an empty dictionary that allocates the storage of its parameters from `arena`.
    pub fn new(arena: &'a mut [u8]) -> Self {
        Self {
            arena,
            used: 0,
            entries: heapless::Vec::new(),
            queue: heapless::Deque::new(),
            last_queued: None,
        }
    }

    fn entry(&self, pid: u16) -> Option<&Entry> {
        self.entries.iter().find(|entry| entry.definition.pid == pid)
    }

    fn entry_mut(&mut self, pid: u16) -> Option<&mut Entry> {
        self.entries
            .iter_mut()
            .find(|entry| entry.definition.pid == pid)
    }

    fn insert(&mut self, entry: Entry) -> Result<(), DictionaryError> {
        if self.exists(entry.definition.pid) {
            return Err(DictionaryError::AlreadyDefined);
        }

        self.entries
            .push(entry)
            .map_err(|_| DictionaryError::Full)
    }

    fn check_free(&self, pid: u16) -> Result<(), DictionaryError> {
        if self.exists(pid) {
            return Err(DictionaryError::AlreadyDefined);
        }
        if self.entries.is_full() {
            return Err(DictionaryError::Full);
        }

        Ok(())
    }

    /// Defines a parameter with `storage_size` bytes of storage, initialized with `default` or
    /// zeros. Returns the storage.
    pub fn define(
        &mut self,
        definition: ParameterDefinition,
        storage_size: usize,
        default: Option<&[u8]>,
    ) -> Result<&[u8], DictionaryError> {
        self.check_free(definition.pid)?;

        if storage_size > self.arena.len() - self.used {
            return Err(DictionaryError::OutOfStorage);
        }

        let start = self.used;
        self.used += storage_size;

        let storage = Storage::Owned {
            start,
            len: storage_size,
        };
        self.insert(Entry {
            definition,
            storage,
            callback: None,
        })?;

        let value = &mut self.arena[start..start + storage_size];
        value.fill(0);
        if let Some(default) = default {
            let length = default.len().min(storage_size);
            value[..length].copy_from_slice(&default[..length]);
        }

        Ok(&self.arena[start..start + storage_size])
    }

    /// Defines a parameter that views the storage of `target_pid` starting at `offset`.
    pub fn alias(
        &mut self,
        definition: ParameterDefinition,
        target_pid: u16,
        offset: usize,
    ) -> Result<&[u8], DictionaryError> {
        self.check_free(definition.pid)?;

        let target = self
            .entry(target_pid)
            .ok_or(DictionaryError::UnknownPid)?
            .storage
            .range()
            .ok_or(DictionaryError::NoStorage)?;
        if offset > target.len() {
            return Err(DictionaryError::OffsetOutOfRange);
        }

        let start = target.start + offset;
        let len = target.len() - offset;
        self.insert(Entry {
            definition,
            storage: Storage::Alias { start, len },
            callback: None,
        })?;

        Ok(&self.arena[start..start + len])
    }

    /// Defines a parameter without storage. Its response handler computes the value.
    pub fn define_deterministic(
        &mut self,
        definition: ParameterDefinition,
    ) -> Result<(), DictionaryError> {
        self.insert(Entry {
            definition,
            storage: Storage::Deterministic,
            callback: None,
        })
    }

    pub fn update_response_handler(
        &mut self,
        pid: u16,
        response_handler: ResponseHandler,
    ) -> Result<(), DictionaryError> {
        let entry = self.entry_mut(pid).ok_or(DictionaryError::UnknownPid)?;
        entry.definition.response_handler = response_handler;

        Ok(())
    }

    /// Sets or removes the callback of a parameter.
    pub fn update_callback(
        &mut self,
        pid: u16,
        callback: Option<ParameterCallback>,
    ) -> Result<(), DictionaryError> {
        let entry = self.entry_mut(pid).ok_or(DictionaryError::UnknownPid)?;
        entry.callback = callback;

        Ok(())
    }

    pub fn callback(&self, pid: u16) -> Option<ParameterCallback> {
        self.entry(pid).and_then(|entry| entry.callback)
    }

    pub fn exists(&self, pid: u16) -> bool {
        self.entry(pid).is_some()
    }

    pub fn definition(&self, pid: u16) -> Option<&ParameterDefinition> {
        self.entry(pid).map(|entry| &entry.definition)
    }

    /// The parameter ids in the order they were defined.
    pub fn list(&self) -> impl Iterator<Item = u16> + '_ {
        self.entries.iter().map(|entry| entry.definition.pid)
    }

    /// Number of defined parameters.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Bytes of the arena that are not allocated yet.
    pub fn storage_left(&self) -> usize {
        self.arena.len() - self.used
    }

    /// The storage of a parameter. `None` for unknown and deterministic parameters.
    pub fn get(&self, pid: u16) -> Option<&[u8]> {
        let range = self.entry(pid)?.storage.range()?;
        Some(&self.arena[range])
    }

    /// Copies `data` into the storage of a parameter and returns the amount of bytes written.
    ///
    /// Ascii parameters are cleared past the first zero, so a shorter value does not keep the
    /// tail of the previous one. Writes nothing for unknown and deterministic parameters.
    pub fn set(&mut self, pid: u16, data: &[u8]) -> usize {
        let Some(entry) = self.entry(pid) else {
            return 0;
        };
        let Some(range) = entry.storage.range() else {
            return 0;
        };
        let is_ascii = entry.definition.description.data_type == DataType::Ascii;

        let value = &mut self.arena[range];
        let length = data.len().min(value.len());
        if is_ascii {
            let text = data[..length]
                .iter()
                .position(|&byte| byte == 0)
                .unwrap_or(length);
            value[..text].copy_from_slice(&data[..text]);
            value[text..].fill(0);
        } else {
            value[..length].copy_from_slice(&data[..length]);
        }

        length
    }

    /// Like [ParameterDictionary::set], and queues the parameter id so a controller learns about
    /// the change through QUEUED_MESSAGE. A parameter id that is already queued is not queued
    /// again.
    pub fn set_and_enqueue(&mut self, pid: u16, data: &[u8]) -> usize {
        let written = self.set(pid, data);

        if written > 0 && !self.queue.iter().any(|&queued| queued == pid) {
            if self.queue.push_back(pid).is_err() {
                warn!("queued message list is full, dropping pid {:#x}", pid);
            }
        }

        written
    }

    /// Removes the oldest queued parameter id.
    pub fn pop_queued(&mut self) -> Option<u16> {
        let pid = self.queue.pop_front()?;
        self.last_queued = Some(pid);

        Some(pid)
    }

    /// The parameter id popped last.
    pub fn last_queued(&self) -> Option<u16> {
        self.last_queued
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Native form of the PARAMETER_DESCRIPTION response of a manufacturer specific parameter.
    pub fn description(&self, pid: u16) -> Option<[u8; PARAMETER_DESCRIPTION_NATIVE_SIZE]> {
        if !pids::is_manufacturer_specific(pid) {
            return None;
        }

        let definition = self.definition(pid)?;
        let description = &definition.description;
        let pdl_size = definition
            .schema
            .wire_size()
            .min(RDM_MAX_PARAMETER_DATA_LENGTH) as u8;

        let mut native = [0u8; PARAMETER_DESCRIPTION_NATIVE_SIZE];
        native[..2].copy_from_slice(&pid.to_le_bytes());
        native[2] = pdl_size;
        native[3] = description.data_type as u8;
        native[4] = definition.access.description_code();
        native[5] = 0;
        native[6] = description.units;
        native[7] = description.prefix;
        native[8..12].copy_from_slice(&description.min_value.to_le_bytes());
        native[12..16].copy_from_slice(&description.max_value.to_le_bytes());
        native[16..20].copy_from_slice(&description.default_value.to_le_bytes());

        let text = description.description.as_bytes();
        let length = text.len().min(native.len() - 20);
        native[20..20 + length].copy_from_slice(&text[..length]);

        Some(native)
    }

    /// Answers a request through the response handler of its parameter.
    /// Unknown parameter ids get a NACK with [NackReason::UnknownPid].
    pub fn dispatch(&mut self, state: &mut DeviceState, request: &RdmRequestData) -> RdmResult {
        let Some(entry) = self.entry(request.parameter_id) else {
            return RdmResult::NotAcknowledged(NackReason::UnknownPid as u16);
        };

        let response_handler = entry.definition.response_handler;
        response_handler(self, state, request)
    }
}

/// The response handler for parameters that are plain stored values.
///
/// GET answers with the serialized storage, SET deserializes the parameter data into the storage.
/// Only the root device is supported.
pub fn simple_response(
    dictionary: &mut ParameterDictionary<'_>,
    _state: &mut DeviceState,
    request: &RdmRequestData,
) -> RdmResult {
    if request.sub_device != 0 {
        return RdmResult::NotAcknowledged(NackReason::SubDeviceOutOfRange as u16);
    }

    let Some(definition) = dictionary.definition(request.parameter_id) else {
        return RdmResult::NotAcknowledged(NackReason::UnknownPid as u16);
    };
    let schema = definition.schema;

    match request.command_class {
        RequestCommandClass::GetCommand => {
            let Some(value) = dictionary.get(request.parameter_id) else {
                return RdmResult::NotAcknowledged(NackReason::HardwareFault as u16);
            };

            match rdm_codec::serialize_pack(&schema, value) {
                Ok(parameter_data) => RdmResult::Acknowledged(parameter_data),
                Err(_) => RdmResult::NotAcknowledged(NackReason::HardwareFault as u16),
            }
        },
        RequestCommandClass::SetCommand => {
            let capacity = dictionary
                .get(request.parameter_id)
                .map_or(0, <[u8]>::len)
                .min(RDM_MAX_PARAMETER_DATA_LENGTH);

            let mut native = [0u8; RDM_MAX_PARAMETER_DATA_LENGTH];
            let decoded =
                rdm_codec::deserialize(&schema, &request.parameter_data, &mut native[..capacity]);
            let Ok(length) = decoded else {
                return RdmResult::NotAcknowledged(NackReason::FormatError as u16);
            };

            if dictionary.set(request.parameter_id, &native[..length]) == 0 {
                return RdmResult::NotAcknowledged(NackReason::HardwareFault as u16);
            }

            RdmResult::Acknowledged(Default::default())
        },
        RequestCommandClass::DiscoveryCommand => {
            RdmResult::NotAcknowledged(NackReason::UnsupportedCommandClass as u16)
        },
    }
}

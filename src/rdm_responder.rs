use crate::command_class::RequestCommandClass;
use crate::consts::{
    RDM_ASCII_MAX_LENGTH, RDM_PARAMETER_ARENA_MIN, RDM_SUB_DEVICE_ALL, RDM_SUB_DEVICE_MAX,
};
use crate::pids;
use crate::rdm_codec::{self, FieldKind, Schema, SchemaError};
use crate::rdm_data::{deserialize_disc_unique_branch, RdmRequestData, RdmResponseData};
use crate::rdm_parameters::{
    parameter_description_schema, simple_response, DataType, DictionaryError, ParameterAccess,
    ParameterDefinition, ParameterDescription, ParameterDictionary, ResponseHandler,
};
use crate::rdm_types::{DeviceInfo, DiscoveryMuteResponse, DmxStartAddress};
use crate::types::{data_pack_truncated, DataPack, NackReason, ResponseType, StatusType};
use crate::unique_identifier::UniqueIdentifier;

/// Parameters every responder supports. They are not listed in SUPPORTED_PARAMETERS.
const REQUIRED_PIDS: [u16; 9] = [
    pids::DISC_UNIQUE_BRANCH,
    pids::DISC_MUTE,
    pids::DISC_UN_MUTE,
    pids::SUPPORTED_PARAMETERS,
    pids::PARAMETER_DESCRIPTION,
    pids::DEVICE_INFO,
    pids::SOFTWARE_VERSION_LABEL,
    pids::DMX_START_ADDRESS,
    pids::IDENTIFY_DEVICE,
];

const DEVICE_INFO_FIELDS: &[FieldKind] = &[
    FieldKind::Word,
    FieldKind::Word,
    FieldKind::Word,
    FieldKind::DWord,
    FieldKind::Word,
    FieldKind::Word,
    FieldKind::Word,
    FieldKind::Word,
    FieldKind::Byte,
];

const STATUS_GET_LAST_MESSAGE: u8 = StatusType::StatusGetLastMessage as u8;
const STATUS_ADVISORY: u8 = StatusType::StatusAdvisory as u8;
const STATUS_ERROR: u8 = StatusType::StatusError as u8;

/// The result object of an RDM handler.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum RdmResult {
    /// The package was acknowledged. The [DataPack] contains the response data.
    Acknowledged(DataPack),
    /// The package was acknowledged, but it does not fit into one [DataPack].
    /// The [DataPack] contains part of the response.
    AcknowledgedOverflow(DataPack),
    /// The message was not acknowledged. The [u16] is the [NackReason].
    NotAcknowledged(u16),
    /// The message was acknowledged but a result can not be delivered immediately. The [u16]
    /// contains the amount of time the controller has to wait in 100ms steps.
    AcknowledgedTimer(u16),
    /// The receiver does not respond with anything.
    NoResponse,
    /// Answer a DISC_UNIQUE_BRANCH with the encoded uid.
    DiscoveryResponse(UniqueIdentifier),
    /// A custom response.
    Custom(RdmResponseData),
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum RdmAnswer {
    /// Has to be sent with an uart break
    Response(RdmResponseData),
    /// Has to be sent without an uart break
    DiscoveryResponse(UniqueIdentifier),
    /// No response to send
    NoResponse,
}

/// Metadata reported in DEVICE_INFO and the initial values of the stored default parameters.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct RdmReceiverMetadata {
    pub device_model_id: u16,
    pub product_category: u16,
    pub software_version_id: u32,
    pub software_version_label: &'static str,
    pub dmx_footprint: u16,
    /// Current personality in the upper byte, personality count in the lower byte.
    pub dmx_personality: u16,
    pub dmx_start_address: DmxStartAddress,
    pub device_label: &'static str,
}

impl Default for RdmReceiverMetadata {
    fn default() -> Self {
        Self {
            device_model_id: 0,
            product_category: 0,
            software_version_id: 0,
            software_version_label: "dmx-rdm-port device",
            dmx_footprint: 1,
            dmx_personality: 0x0101,
            dmx_start_address: DmxStartAddress::Address(1),
            device_label: "",
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct RdmResponderConfig {
    /// The unique id that is used as a source id in the packages.
    pub uid: UniqueIdentifier,
    /// Parameters answered by a [RdmResponderHandlerFunc] instead of the parameter dictionary.
    /// They are listed in SUPPORTED_PARAMETERS.
    pub supported_pids: &'static [u16],
    /// Additional metadata of the RDM-receiver.
    pub rdm_receiver_metadata: RdmReceiverMetadata,
}

/// Responder state outside of the parameter dictionary. Response handlers get it passed along.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct DeviceState {
    pub uid: UniqueIdentifier,
    pub metadata: RdmReceiverMetadata,
    pub supported_pids: &'static [u16],
    /// true if the device won't respond to discovery requests.
    pub discovery_muted: bool,
}

impl DeviceState {
    pub fn new(config: &RdmResponderConfig) -> Self {
        Self {
            uid: config.uid,
            metadata: config.rdm_receiver_metadata,
            supported_pids: config.supported_pids,
            discovery_muted: false,
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ResponderError {
    /// The parameter arena can't hold the default parameters.
    ArenaTooSmall,
    Dictionary(DictionaryError),
    Schema(SchemaError),
}

impl From<DictionaryError> for ResponderError {
    fn from(value: DictionaryError) -> Self {
        Self::Dictionary(value)
    }
}

impl From<SchemaError> for ResponderError {
    fn from(value: SchemaError) -> Self {
        Self::Schema(value)
    }
}

impl core::fmt::Display for ResponderError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ResponderError::ArenaTooSmall => write!(
                f,
                "parameter arena is smaller than {} bytes",
                RDM_PARAMETER_ARENA_MIN
            ),
            ResponderError::Dictionary(error) => write!(f, "{}", error),
            ResponderError::Schema(error) => write!(f, "{}", error),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for ResponderError {}

/// A context object for accessing the state of a responder from a
/// [crate::dmx_receiver::DmxResponderHandler].
pub struct DmxReceiverContext<'a, 'b> {
    pub dictionary: &'a mut ParameterDictionary<'b>,
    pub state: &'a mut DeviceState,
}

/// A handler for rdm packages on parameters that are not in the parameter dictionary.
pub trait RdmResponderHandlerFunc {
    type Error;

    fn handle_rdm(
        &mut self,
        _request: &RdmRequestData,
        _context: &mut DmxReceiverContext,
    ) -> Result<RdmResult, Self::Error> {
        Ok(RdmResult::NotAcknowledged(NackReason::UnknownPid as u16))
    }
}

fn nack(reason: NackReason) -> RdmResult {
    RdmResult::NotAcknowledged(reason as u16)
}

fn definition(
    pid: u16,
    fields: &'static [FieldKind],
    access: ParameterAccess,
    data_type: DataType,
    response_handler: ResponseHandler,
) -> Result<ParameterDefinition, SchemaError> {
    Ok(ParameterDefinition {
        pid,
        schema: Schema::new(fields)?,
        access,
        description: ParameterDescription::new(data_type, ""),
        response_handler,
    })
}

/// Converts the result of a handler to a response. Returns `None` if nothing is sent.
fn build_response(
    request: &RdmRequestData,
    responder_uid: UniqueIdentifier,
    result: RdmResult,
    message_count: u8,
) -> Option<RdmResponseData> {
    let (response_type, parameter_data) = match result {
        RdmResult::Acknowledged(data) => (ResponseType::ResponseTypeAck, data),
        RdmResult::AcknowledgedOverflow(data) => (ResponseType::ResponseTypeAckOverflow, data),
        RdmResult::NotAcknowledged(reason) => (
            ResponseType::ResponseTypeNackReason,
            data_pack_truncated(&reason.to_be_bytes()),
        ),
        RdmResult::AcknowledgedTimer(timer) => (
            ResponseType::ResponseTypeAckTimer,
            data_pack_truncated(&timer.to_be_bytes()),
        ),
        RdmResult::Custom(mut response) => {
            response.message_count = message_count;
            return Some(response);
        },
        RdmResult::NoResponse | RdmResult::DiscoveryResponse(_) => return None,
    };

    request
        .build_response(responder_uid, response_type, parameter_data, message_count)
        .ok()
}

fn disc_unique_branch(
    _dictionary: &mut ParameterDictionary<'_>,
    state: &mut DeviceState,
    request: &RdmRequestData,
) -> RdmResult {
    if state.discovery_muted || request.sub_device != 0 {
        return RdmResult::NoResponse;
    }

    let Some((lower_bound, upper_bound)) = deserialize_disc_unique_branch(&request.parameter_data)
    else {
        return RdmResult::NoResponse;
    };
    let own_uid: u64 = state.uid.into();

    if (lower_bound..=upper_bound).contains(&own_uid) {
        return RdmResult::DiscoveryResponse(state.uid);
    }

    RdmResult::NoResponse
}

fn disc_mute(
    _dictionary: &mut ParameterDictionary<'_>,
    state: &mut DeviceState,
    request: &RdmRequestData,
) -> RdmResult {
    if request.sub_device != 0 || !request.parameter_data.is_empty() {
        return RdmResult::NoResponse;
    }

    state.discovery_muted = request.parameter_id == pids::DISC_MUTE;
    RdmResult::Acknowledged(DiscoveryMuteResponse::default().serialize())
}

fn device_info(
    dictionary: &mut ParameterDictionary<'_>,
    state: &mut DeviceState,
    request: &RdmRequestData,
) -> RdmResult {
    if request.sub_device != 0 {
        return nack(NackReason::SubDeviceOutOfRange);
    }

    let dmx_start_address = dictionary
        .get(pids::DMX_START_ADDRESS)
        .and_then(|value| value.get(..2))
        .map(|value| u16::from_le_bytes([value[0], value[1]]))
        .and_then(|address| DmxStartAddress::try_from(address).ok())
        .unwrap_or(DmxStartAddress::NoAddress);

    let metadata = &state.metadata;
    RdmResult::Acknowledged(
        DeviceInfo {
            device_model_id: metadata.device_model_id,
            product_category: metadata.product_category,
            software_version: metadata.software_version_id,
            dmx_footprint: metadata.dmx_footprint,
            dmx_personality: metadata.dmx_personality,
            dmx_start_address,
            sub_device_count: 0,
            sensor_count: 0,
        }
        .serialize(),
    )
}

fn supported_parameters(
    dictionary: &mut ParameterDictionary<'_>,
    state: &mut DeviceState,
    request: &RdmRequestData,
) -> RdmResult {
    if request.sub_device != 0 {
        return nack(NackReason::SubDeviceOutOfRange);
    }

    let mut parameter_data = DataPack::new();
    for pid in dictionary
        .list()
        .chain(state.supported_pids.iter().copied())
        .filter(|pid| !REQUIRED_PIDS.contains(pid))
    {
        if parameter_data.extend_from_slice(&pid.to_be_bytes()).is_err() {
            warn!("SUPPORTED_PARAMETERS is truncated at pid {:#x}", pid);
            break;
        }
    }

    RdmResult::Acknowledged(parameter_data)
}

fn parameter_description(
    dictionary: &mut ParameterDictionary<'_>,
    _state: &mut DeviceState,
    request: &RdmRequestData,
) -> RdmResult {
    if request.sub_device != 0 {
        return nack(NackReason::SubDeviceOutOfRange);
    }

    let Ok(requested_pid) = <[u8; 2]>::try_from(&request.parameter_data[..]) else {
        return nack(NackReason::FormatError);
    };
    let Some(native) = dictionary.description(u16::from_be_bytes(requested_pid)) else {
        return nack(NackReason::DataOutOfRange);
    };

    match rdm_codec::serialize_pack(&parameter_description_schema(), &native) {
        Ok(parameter_data) => RdmResult::Acknowledged(parameter_data),
        Err(_) => nack(NackReason::HardwareFault),
    }
}

fn software_version_label(
    _dictionary: &mut ParameterDictionary<'_>,
    state: &mut DeviceState,
    request: &RdmRequestData,
) -> RdmResult {
    if request.sub_device != 0 {
        return nack(NackReason::SubDeviceOutOfRange);
    }

    let label = state.metadata.software_version_label.as_bytes();
    RdmResult::Acknowledged(data_pack_truncated(
        &label[..label.len().min(RDM_ASCII_MAX_LENGTH)],
    ))
}

fn identify_device(
    dictionary: &mut ParameterDictionary<'_>,
    state: &mut DeviceState,
    request: &RdmRequestData,
) -> RdmResult {
    if request.command_class == RequestCommandClass::SetCommand {
        match request.parameter_data[..] {
            [0x00] | [0x01] => {},
            [_] => return nack(NackReason::DataOutOfRange),
            _ => return nack(NackReason::FormatError),
        }
    }

    simple_response(dictionary, state, request)
}

fn dmx_start_address(
    dictionary: &mut ParameterDictionary<'_>,
    state: &mut DeviceState,
    request: &RdmRequestData,
) -> RdmResult {
    if request.command_class == RequestCommandClass::SetCommand {
        if request.parameter_data.len() != 2 {
            return nack(NackReason::FormatError);
        }

        if DmxStartAddress::deserialize(&request.parameter_data).is_err() {
            return nack(NackReason::DataOutOfRange);
        }
    }

    simple_response(dictionary, state, request)
}

fn queued_message(
    dictionary: &mut ParameterDictionary<'_>,
    state: &mut DeviceState,
    request: &RdmRequestData,
) -> RdmResult {
    // a popped message could not be delivered
    if request.destination_uid.is_broadcast() {
        return RdmResult::NoResponse;
    }

    let queued_pid = match request.parameter_data[..] {
        [STATUS_GET_LAST_MESSAGE] => dictionary.last_queued(),
        [STATUS_ADVISORY..=STATUS_ERROR] => dictionary.pop_queued(),
        [_] => return nack(NackReason::DataOutOfRange),
        _ => return nack(NackReason::FormatError),
    };

    let Some(queued_pid) = queued_pid else {
        let mut status_request = request.clone();
        status_request.parameter_id = pids::STATUS_MESSAGES;
        return build_response(
            &status_request,
            state.uid,
            RdmResult::Acknowledged(DataPack::new()),
            0,
        )
        .map_or(RdmResult::NoResponse, RdmResult::Custom);
    };

    let mut queued_request = request.clone();
    queued_request.parameter_id = queued_pid;
    queued_request.parameter_data = DataPack::new();
    queued_request.sub_device = 0;

    let result = dictionary.dispatch(state, &queued_request);
    build_response(&queued_request, state.uid, result, 0)
        .map_or_else(|| nack(NackReason::HardwareFault), RdmResult::Custom)
}

/// Answers rdm requests from the parameter dictionary.
pub struct RdmResponderPackageHandler<'a> {
    dictionary: ParameterDictionary<'a>,
    state: DeviceState,
}

impl<'a> RdmResponderPackageHandler<'a> {
    /// Creates a new [RdmResponderPackageHandler] and registers the default parameters.
    /// Their storage is taken from `arena`, which needs at least
    /// [RDM_PARAMETER_ARENA_MIN] bytes. The rest of the arena is left for user defined
    /// parameters.
    pub fn new(config: RdmResponderConfig, arena: &'a mut [u8]) -> Result<Self, ResponderError> {
        if arena.len() < RDM_PARAMETER_ARENA_MIN {
            return Err(ResponderError::ArenaTooSmall);
        }

        let state = DeviceState::new(&config);
        let metadata = config.rdm_receiver_metadata;
        let mut dictionary = ParameterDictionary::new(arena);

        let discovery: [(u16, ResponseHandler); 3] = [
            (pids::DISC_UNIQUE_BRANCH, disc_unique_branch),
            (pids::DISC_MUTE, disc_mute),
            (pids::DISC_UN_MUTE, disc_mute),
        ];
        for (pid, response_handler) in discovery {
            dictionary.define_deterministic(definition(
                pid,
                &[],
                ParameterAccess::Discovery,
                DataType::NotDefined,
                response_handler,
            )?)?;
        }

        dictionary.define_deterministic(definition(
            pids::DEVICE_INFO,
            DEVICE_INFO_FIELDS,
            ParameterAccess::Get,
            DataType::NotDefined,
            device_info,
        )?)?;
        dictionary.define_deterministic(definition(
            pids::SUPPORTED_PARAMETERS,
            &[FieldKind::Word],
            ParameterAccess::Get,
            DataType::UnsignedWord,
            supported_parameters,
        )?)?;
        dictionary.define_deterministic(ParameterDefinition {
            pid: pids::PARAMETER_DESCRIPTION,
            schema: parameter_description_schema(),
            access: ParameterAccess::Get,
            description: ParameterDescription::new(DataType::NotDefined, ""),
            response_handler: parameter_description,
        })?;
        dictionary.define_deterministic(definition(
            pids::SOFTWARE_VERSION_LABEL,
            &[FieldKind::Ascii],
            ParameterAccess::Get,
            DataType::Ascii,
            software_version_label,
        )?)?;

        dictionary.define(
            definition(
                pids::IDENTIFY_DEVICE,
                &[FieldKind::Byte],
                ParameterAccess::GetSet,
                DataType::UnsignedByte,
                identify_device,
            )?,
            1,
            None,
        )?;
        dictionary.define(
            definition(
                pids::DMX_START_ADDRESS,
                &[FieldKind::Word],
                ParameterAccess::GetSet,
                DataType::UnsignedWord,
                dmx_start_address,
            )?,
            2,
            Some(&metadata.dmx_start_address.as_u16().to_le_bytes()),
        )?;
        dictionary.define(
            definition(
                pids::DEVICE_LABEL,
                &[FieldKind::Ascii],
                ParameterAccess::GetSet,
                DataType::Ascii,
                simple_response,
            )?,
            RDM_ASCII_MAX_LENGTH,
            Some(metadata.device_label.as_bytes()),
        )?;

        dictionary.define_deterministic(definition(
            pids::QUEUED_MESSAGE,
            &[FieldKind::Byte],
            ParameterAccess::Get,
            DataType::UnsignedByte,
            queued_message,
        )?)?;

        debug!(
            "responder {} registered {} parameters",
            config.uid,
            dictionary.len()
        );

        Ok(Self { dictionary, state })
    }

    /// Get the uid of the rdm responder.
    pub fn get_uid(&self) -> UniqueIdentifier {
        self.state.uid
    }

    pub fn dictionary(&self) -> &ParameterDictionary<'a> {
        &self.dictionary
    }

    /// The dictionary to define additional parameters or to update stored values.
    pub fn dictionary_mut(&mut self) -> &mut ParameterDictionary<'a> {
        &mut self.dictionary
    }

    pub fn state(&self) -> &DeviceState {
        &self.state
    }

    /// Get the amount of queued messages.
    pub fn get_message_count(&self) -> u8 {
        self.dictionary.queue_len().min(u8::MAX as usize) as u8
    }

    pub fn get_context(&mut self) -> DmxReceiverContext<'_, 'a> {
        DmxReceiverContext {
            dictionary: &mut self.dictionary,
            state: &mut self.state,
        }
    }

    fn validate(&self, request: &RdmRequestData) -> Option<RdmResult> {
        let get_or_set = request.command_class != RequestCommandClass::DiscoveryCommand;
        if request.port_id == 0 && get_or_set {
            return Some(nack(NackReason::FormatError));
        }

        let definition = self.dictionary.definition(request.parameter_id)?;
        if !definition.access.allows(request.command_class) {
            return Some(nack(NackReason::UnsupportedCommandClass));
        }

        let sub_device = request.sub_device;
        if (sub_device > RDM_SUB_DEVICE_MAX && sub_device != RDM_SUB_DEVICE_ALL)
            || (sub_device == RDM_SUB_DEVICE_ALL
                && request.command_class == RequestCommandClass::GetCommand)
        {
            return Some(nack(NackReason::SubDeviceOutOfRange));
        }

        None
    }

    /// Answers a request. Parameters that are not in the dictionary are passed to `handler`.
    pub fn handle_rdm_request<HandlerError>(
        &mut self,
        request: RdmRequestData,
        handler: &mut dyn RdmResponderHandlerFunc<Error = HandlerError>,
    ) -> Result<RdmAnswer, HandlerError> {
        if !request.destination_uid.addresses(self.state.uid) {
            return Ok(RdmAnswer::NoResponse);
        }

        let known_pid = self.dictionary.exists(request.parameter_id);
        let result = match self.validate(&request) {
            Some(result) => result,
            None if known_pid => self.dictionary.dispatch(&mut self.state, &request),
            None => handler.handle_rdm(&request, &mut self.get_context())?,
        };

        let answer = self.answer(&request, result);

        if let Some(callback) = self.dictionary.callback(request.parameter_id) {
            callback(&self.dictionary, &request, &answer);
        }

        Ok(answer)
    }

    fn answer(&self, request: &RdmRequestData, result: RdmResult) -> RdmAnswer {
        if let RdmResult::DiscoveryResponse(uid) = result {
            if request.is_disc_unique_branch() {
                return RdmAnswer::DiscoveryResponse(uid);
            }

            return RdmAnswer::NoResponse;
        }

        if request.destination_uid.is_broadcast() {
            return RdmAnswer::NoResponse;
        }

        let Some(response) =
            build_response(request, self.state.uid, result, self.get_message_count())
        else {
            return RdmAnswer::NoResponse;
        };

        if request.command_class == RequestCommandClass::DiscoveryCommand
            && response.response_type != ResponseType::ResponseTypeAck
        {
            return RdmAnswer::NoResponse;
        }

        RdmAnswer::Response(response)
    }
}

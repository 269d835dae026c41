use crate::command_class::RequestCommandClass;
use crate::consts::{RDM_ASCII_MAX_LENGTH, RDM_MAX_PARAMETER_DATA_LENGTH};
use crate::dmx_driver::{
    ControllerDriverErrorDef, CustomStartCodeControllerDriver, DiscoveryOption,
    DmxControllerDriver, DmxError, RdmControllerDriver,
};
use crate::pids;
use crate::rdm_codec::{self, Schema};
use crate::rdm_data::{serialize_disc_unique_branch, RdmRequestData};
use crate::rdm_types::{self, DeviceInfo, DiscoveryMuteResponse, DmxStartAddress};
use crate::types::{data_pack_truncated, DataPack, NackReason, ResponseType, StatusType};
use crate::unique_identifier::{PackageAddress, UniqueIdentifier};

/// Maximum amount of parameter ids in one SUPPORTED_PARAMETERS response.
pub const SUPPORTED_PARAMETERS_MAX: usize = RDM_MAX_PARAMETER_DATA_LENGTH / 2;

#[derive(Debug, Copy, Clone)]
pub struct DmxControllerConfig {
    pub rdm_uid: UniqueIdentifier,
    /// The port id sent in requests. Responders reject requests with port id 0.
    pub port_id: u8,
}

impl Default for DmxControllerConfig {
    fn default() -> Self {
        Self {
            rdm_uid: UniqueIdentifier::new(0x7FF0, 0).unwrap(), // prototyping id
            port_id: 1,
        }
    }
}

#[derive(Debug)]
pub struct RdmRequest {
    /// The unique id of the recipient of the request.
    pub destination_uid: PackageAddress,
    /// The id that specifies the type of the package.
    pub parameter_id: u16,
    pub sub_device: u16,
    /// The parameter data.
    pub data: DataPack,
}

impl RdmRequest {
    /// Creates an RdmRequest with empty parameter data for the root device.
    pub fn empty(uid: PackageAddress, pid: u16) -> Self {
        Self {
            destination_uid: uid,
            parameter_id: pid,
            sub_device: 0,
            data: DataPack::new(),
        }
    }

    /// Creates an RdmRequest for the root device.
    pub fn with_data(uid: PackageAddress, pid: u16, data: &[u8]) -> Self {
        Self {
            data: data_pack_truncated(data),
            ..Self::empty(uid, pid)
        }
    }
}

/// The part of an rdm response that is relevant to the controller.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct RdmResponseInfo {
    /// Differs from the requested parameter id for QUEUED_MESSAGE.
    pub parameter_id: u16,
    pub message_count: u8,
    pub data: DataPack,
}

#[derive(Debug)]
pub enum RdmResponse {
    /// The message data of the response.
    Response(RdmResponseInfo),
    /// The request has been excepted but the message data is too big to fit into one response.
    /// Use the get command on the same pid to receive the rest of it until you just receive a Response.
    IncompleteResponse(RdmResponseInfo),
    /// No response was received since the request was a broadcast.
    RequestWasBroadcast,
}

/// An RDM controller
pub struct DmxController<C: ControllerDriverErrorDef> {
    driver: C,
    uid: UniqueIdentifier,
    port_id: u8,
    last_message_count: u8,
}

#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RdmResponseError<E> {
    /// The received package doesn't match the request.
    NotMatching,
    /// The parameter data couldn't be deserialized.
    ParameterDataNotDeserializable,
    /// The response has an error status but the contents aren't deserializable.
    ErrorNotDeserializable,
    /// The response isn't ready yet. The value is the estimated time in 100ms steps.
    NotReady(u16),
    /// The responder didn't acknowledge the request.
    NotAcknowledged(NackReason),
    /// The value can't be sent. Nothing was sent.
    InvalidParameter,
    /// The underlying dmx controller raised an error.
    DmxError(DmxError<E>),
}

impl<E: core::fmt::Display> core::fmt::Display for RdmResponseError<E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            RdmResponseError::NotMatching => write!(f, "response does not match the request"),
            RdmResponseError::ParameterDataNotDeserializable => {
                write!(f, "parameter data is not deserializable")
            },
            RdmResponseError::ErrorNotDeserializable => {
                write!(f, "error response is not deserializable")
            },
            RdmResponseError::NotReady(timer) => {
                write!(f, "response is ready in {} ms", *timer as u32 * 100)
            },
            RdmResponseError::NotAcknowledged(reason) => {
                write!(f, "request not acknowledged: {:?}", reason)
            },
            RdmResponseError::InvalidParameter => write!(f, "parameter out of range"),
            RdmResponseError::DmxError(error) => error.fmt(f),
        }
    }
}

impl<E> From<DmxError<E>> for RdmResponseError<E> {
    fn from(value: DmxError<E>) -> Self {
        Self::DmxError(value)
    }
}

#[cfg(feature = "std")]
impl<E: core::fmt::Debug + core::fmt::Display> std::error::Error for RdmResponseError<E> {}

impl<E> From<rdm_types::DeserializationError> for RdmResponseError<E> {
    fn from(_: rdm_types::DeserializationError) -> Self {
        Self::ParameterDataNotDeserializable
    }
}

impl<E> From<rdm_codec::CodecError> for RdmResponseError<E> {
    fn from(_: rdm_codec::CodecError) -> Self {
        Self::ParameterDataNotDeserializable
    }
}

fn complete_response<E>(response: RdmResponse) -> Result<RdmResponseInfo, RdmResponseError<E>> {
    match response {
        RdmResponse::Response(response_info) => Ok(response_info),
        _ => Err(RdmResponseError::ParameterDataNotDeserializable),
    }
}

fn ascii_label<E>(data: &[u8]) -> Result<heapless::String<RDM_ASCII_MAX_LENGTH>, RdmResponseError<E>> {
    let text = data.split(|&byte| byte == 0).next().unwrap_or_default();
    let text = core::str::from_utf8(text).or(Err(RdmResponseError::ParameterDataNotDeserializable))?;

    heapless::String::try_from(text).or(Err(RdmResponseError::ParameterDataNotDeserializable))
}

impl<D: ControllerDriverErrorDef> DmxController<D> {
    /// Creates a new DmxController instance.
    pub fn new(driver: D, config: &DmxControllerConfig) -> Self {
        Self {
            driver,
            uid: config.rdm_uid,
            port_id: config.port_id,
            last_message_count: 0,
        }
    }

    /// Get a reference to the underlying driver.
    pub fn get_driver(&mut self) -> &mut D {
        &mut self.driver
    }

    pub fn uid(&self) -> UniqueIdentifier {
        self.uid
    }
}

impl<D: CustomStartCodeControllerDriver> DmxController<D> {
    /// Sends a package with a custom start code.
    pub fn send_custom_package(
        &mut self,
        start_code: u8,
        package: &[u8],
    ) -> Result<(), RdmResponseError<D::DriverError>> {
        self.driver
            .send_custom_package(start_code, package)
            .map_err(RdmResponseError::DmxError)
    }
}

impl<D: DmxControllerDriver> DmxController<D> {
    /// Sends a dmx package. Package can't be bigger than 512 bytes.
    pub fn send_dmx_package(
        &mut self,
        package: &[u8],
    ) -> Result<(), RdmResponseError<D::DriverError>> {
        self.driver
            .send_dmx_package(package)
            .map_err(RdmResponseError::DmxError)
    }
}

impl<D: RdmControllerDriver> DmxController<D> {
    fn rdm_request(
        &mut self,
        command_class: RequestCommandClass,
        request: RdmRequest,
    ) -> Result<RdmResponse, RdmResponseError<D::DriverError>> {
        let response = self.driver.rdm_request(RdmRequestData {
            destination_uid: request.destination_uid,
            source_uid: self.uid,
            // stamped by the driver
            transaction_number: 0,
            port_id: self.port_id,
            message_count: 0,
            sub_device: request.sub_device,
            command_class,
            parameter_id: request.parameter_id,
            parameter_data: request.data,
        })?;

        let Some(response) = response else {
            return Ok(RdmResponse::RequestWasBroadcast);
        };

        if response.destination_uid != PackageAddress::Device(self.uid)
            || response.command_class.get_request_class() != command_class
        {
            return Err(RdmResponseError::NotMatching);
        }

        self.last_message_count = response.message_count;

        let response_info = RdmResponseInfo {
            parameter_id: response.parameter_id,
            message_count: response.message_count,
            data: response.parameter_data,
        };

        match response.response_type {
            ResponseType::ResponseTypeAck => Ok(RdmResponse::Response(response_info)),
            ResponseType::ResponseTypeAckTimer => {
                let [high, low] = response_info.data[..] else {
                    return Err(RdmResponseError::ErrorNotDeserializable);
                };

                Err(RdmResponseError::NotReady(u16::from_be_bytes([high, low])))
            },
            ResponseType::ResponseTypeNackReason => {
                let [high, low] = response_info.data[..] else {
                    return Err(RdmResponseError::ErrorNotDeserializable);
                };

                let nack_reason = u16::from_be_bytes([high, low])
                    .try_into()
                    .or(Err(RdmResponseError::ErrorNotDeserializable))?;

                Err(RdmResponseError::NotAcknowledged(nack_reason))
            },
            ResponseType::ResponseTypeAckOverflow => {
                Ok(RdmResponse::IncompleteResponse(response_info))
            },
        }
    }

    /// Sends a get request.
    pub fn rdm_get(
        &mut self,
        request: RdmRequest,
    ) -> Result<RdmResponse, RdmResponseError<D::DriverError>> {
        self.rdm_request(RequestCommandClass::GetCommand, request)
    }

    /// Sends a set request.
    pub fn rdm_set(
        &mut self,
        request: RdmRequest,
    ) -> Result<RdmResponse, RdmResponseError<D::DriverError>> {
        self.rdm_request(RequestCommandClass::SetCommand, request)
    }

    /// Gets a parameter and decodes it with `schema` into its native form. Returns the amount of
    /// bytes written to `native`.
    pub fn rdm_get_parameter(
        &mut self,
        uid: UniqueIdentifier,
        parameter_id: u16,
        schema: &Schema,
        native: &mut [u8],
    ) -> Result<usize, RdmResponseError<D::DriverError>> {
        let response_info = complete_response(
            self.rdm_get(RdmRequest::empty(PackageAddress::Device(uid), parameter_id))?,
        )?;

        Ok(rdm_codec::deserialize(schema, &response_info.data, native)?)
    }

    /// Encodes the native form of a parameter with `schema` and sets it.
    pub fn rdm_set_parameter(
        &mut self,
        uid: PackageAddress,
        parameter_id: u16,
        schema: &Schema,
        native: &[u8],
    ) -> Result<(), RdmResponseError<D::DriverError>> {
        let data = rdm_codec::serialize_pack(schema, native)
            .or(Err(RdmResponseError::InvalidParameter))?;

        self.rdm_set(RdmRequest {
            data,
            ..RdmRequest::empty(uid, parameter_id)
        })?;

        Ok(())
    }

    /// Sends a discovery request to a range of device ids and returns the found uid
    /// if there is no collision and the device does not have its discovery muted.
    pub fn rdm_discover(
        &mut self,
        first_uid: u64,
        last_uid: u64,
    ) -> Result<DiscoveryOption, RdmResponseError<D::DriverError>> {
        Ok(self.driver.rdm_discover_branch(RdmRequestData {
            destination_uid: PackageAddress::Broadcast,
            source_uid: self.uid,
            transaction_number: 0,
            port_id: self.port_id,
            message_count: 0,
            sub_device: 0,
            command_class: RequestCommandClass::DiscoveryCommand,
            parameter_id: pids::DISC_UNIQUE_BRANCH,
            parameter_data: serialize_disc_unique_branch(first_uid, last_uid),
        })?)
    }

    /// Mute device from discovery. It will not respond to discovery requests anymore.
    /// Returns None if the request was a broadcast.
    pub fn rdm_disc_mute(
        &mut self,
        uid: PackageAddress,
    ) -> Result<Option<DiscoveryMuteResponse>, RdmResponseError<D::DriverError>> {
        let response = self.rdm_request(
            RequestCommandClass::DiscoveryCommand,
            RdmRequest::empty(uid, pids::DISC_MUTE),
        )?;

        deserialize_discovery_mute_response::<D>(&response)
    }

    /// Unmute device from discovery. It will respond to discovery requests again.
    /// Returns None if the request was a broadcast.
    pub fn rdm_disc_un_mute(
        &mut self,
        uid: PackageAddress,
    ) -> Result<Option<DiscoveryMuteResponse>, RdmResponseError<D::DriverError>> {
        let response = self.rdm_request(
            RequestCommandClass::DiscoveryCommand,
            RdmRequest::empty(uid, pids::DISC_UN_MUTE),
        )?;

        deserialize_discovery_mute_response::<D>(&response)
    }

    /// Get the identify state in the rdm device (led for searching)
    pub fn rdm_get_identify(
        &mut self,
        uid: UniqueIdentifier,
    ) -> Result<bool, RdmResponseError<D::DriverError>> {
        let response_info = complete_response(self.rdm_get(RdmRequest::empty(
            PackageAddress::Device(uid),
            pids::IDENTIFY_DEVICE,
        ))?)?;

        match response_info.data[..] {
            [identify] => Ok(identify != 0),
            _ => Err(RdmResponseError::ParameterDataNotDeserializable),
        }
    }

    /// Set the identify state in the rdm device (led for searching)
    pub fn rdm_set_identify(
        &mut self,
        uid: PackageAddress,
        enabled: bool,
    ) -> Result<(), RdmResponseError<D::DriverError>> {
        self.rdm_set(RdmRequest::with_data(
            uid,
            pids::IDENTIFY_DEVICE,
            &[enabled as u8],
        ))?;

        Ok(())
    }

    /// Get the software version label.
    pub fn rdm_get_software_version_label(
        &mut self,
        uid: UniqueIdentifier,
    ) -> Result<heapless::String<RDM_ASCII_MAX_LENGTH>, RdmResponseError<D::DriverError>> {
        let response_info = complete_response(self.rdm_get(RdmRequest::empty(
            PackageAddress::Device(uid),
            pids::SOFTWARE_VERSION_LABEL,
        ))?)?;

        ascii_label(&response_info.data)
    }

    /// Get the label of the rdm device.
    pub fn rdm_get_device_label(
        &mut self,
        uid: UniqueIdentifier,
    ) -> Result<heapless::String<RDM_ASCII_MAX_LENGTH>, RdmResponseError<D::DriverError>> {
        let response_info = complete_response(self.rdm_get(RdmRequest::empty(
            PackageAddress::Device(uid),
            pids::DEVICE_LABEL,
        ))?)?;

        ascii_label(&response_info.data)
    }

    /// Set the label of the rdm device. It can't be longer than 32 bytes.
    pub fn rdm_set_device_label(
        &mut self,
        uid: PackageAddress,
        label: &str,
    ) -> Result<(), RdmResponseError<D::DriverError>> {
        if label.len() > RDM_ASCII_MAX_LENGTH {
            return Err(RdmResponseError::InvalidParameter);
        }

        self.rdm_set(RdmRequest::with_data(
            uid,
            pids::DEVICE_LABEL,
            label.as_bytes(),
        ))?;

        Ok(())
    }

    /// Get the current start address of the dmx slave.
    pub fn rdm_get_dmx_start_address(
        &mut self,
        uid: UniqueIdentifier,
    ) -> Result<DmxStartAddress, RdmResponseError<D::DriverError>> {
        let response_info = complete_response(self.rdm_get(RdmRequest::empty(
            PackageAddress::Device(uid),
            pids::DMX_START_ADDRESS,
        ))?)?;

        Ok(DmxStartAddress::deserialize(&response_info.data)?)
    }

    /// Set the current start address of the dmx slave. The address has to be between 1 and 512,
    /// otherwise [RdmResponseError::InvalidParameter] is returned without sending anything.
    pub fn rdm_set_dmx_start_address(
        &mut self,
        uid: PackageAddress,
        start_address: u16,
    ) -> Result<(), RdmResponseError<D::DriverError>> {
        if !(1..=512).contains(&start_address) {
            return Err(RdmResponseError::InvalidParameter);
        }

        self.rdm_set(RdmRequest::with_data(
            uid,
            pids::DMX_START_ADDRESS,
            &start_address.to_be_bytes(),
        ))?;

        Ok(())
    }

    /// Get the next queued message, or the last one again with
    /// [StatusType::StatusGetLastMessage].
    ///
    /// The [RdmResponseInfo] contains the parameter id the message is about. If nothing is
    /// queued the parameter id is STATUS_MESSAGES.
    /// Use [DmxController::rdm_get_last_message_count] to find out how many messages are left.
    pub fn rdm_get_queued_message(
        &mut self,
        uid: UniqueIdentifier,
        status_requested: StatusType,
    ) -> Result<RdmResponseInfo, RdmResponseError<D::DriverError>> {
        complete_response(self.rdm_get(RdmRequest::with_data(
            PackageAddress::Device(uid),
            pids::QUEUED_MESSAGE,
            &[status_requested as u8],
        ))?)
    }

    /// Get the parameter ids that are supported by the responder.
    ///
    /// <div class="warning">Note that this only includes optional parameter ids that are not
    /// required to be compliant with ANSI E1.20.</div>
    pub fn rdm_get_supported_parameters(
        &mut self,
        uid: UniqueIdentifier,
    ) -> Result<heapless::Vec<u16, SUPPORTED_PARAMETERS_MAX>, RdmResponseError<D::DriverError>>
    {
        let response_info = complete_response(self.rdm_get(RdmRequest::empty(
            PackageAddress::Device(uid),
            pids::SUPPORTED_PARAMETERS,
        ))?)?;

        if response_info.data.len() % 2 != 0 {
            return Err(RdmResponseError::ParameterDataNotDeserializable);
        }

        Ok(response_info
            .data
            .chunks_exact(2)
            .map(|pid| u16::from_be_bytes([pid[0], pid[1]]))
            .collect())
    }

    /// Get the device info from the rdm device.
    pub fn rdm_get_device_info(
        &mut self,
        uid: UniqueIdentifier,
    ) -> Result<DeviceInfo, RdmResponseError<D::DriverError>> {
        let response_info = complete_response(self.rdm_get(RdmRequest::empty(
            PackageAddress::Device(uid),
            pids::DEVICE_INFO,
        ))?)?;

        Ok(DeviceInfo::deserialize(&response_info.data)?)
    }

    /// Returns the message count that was received on the last request using this instance.
    pub fn rdm_get_last_message_count(&self) -> u8 {
        self.last_message_count
    }
}

fn deserialize_discovery_mute_response<D: RdmControllerDriver>(
    response: &RdmResponse,
) -> Result<Option<DiscoveryMuteResponse>, RdmResponseError<D::DriverError>> {
    Ok(match response {
        RdmResponse::Response(response_info) => Some(
            DiscoveryMuteResponse::deserialize(&response_info.data)
                .map_err(|_| RdmResponseError::ParameterDataNotDeserializable)?,
        ),
        RdmResponse::RequestWasBroadcast => None,
        RdmResponse::IncompleteResponse(_) => {
            return Err(RdmResponseError::ParameterDataNotDeserializable)
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::{DmxConfig, DmxPort};
    use crate::rdm_codec::FieldKind;
    use crate::rdm_responder::{RdmReceiverMetadata, RdmResponderConfig};
    use crate::sim::{rdm_devices, SimUart, SimTimer, Wire};

    fn responder_uid() -> UniqueIdentifier {
        UniqueIdentifier::new(0x05E0, 0x0000_0A0B).unwrap()
    }

    fn responder_config() -> RdmResponderConfig {
        RdmResponderConfig {
            uid: responder_uid(),
            supported_pids: &[],
            rdm_receiver_metadata: RdmReceiverMetadata {
                device_model_id: 0x0042,
                product_category: 0x0101,
                software_version_label: "1.4.2",
                dmx_footprint: 6,
                dmx_start_address: DmxStartAddress::Address(17),
                device_label: "Front wash",
                ..Default::default()
            },
        }
    }

    fn install(wire: &Wire) -> DmxPort<SimUart, SimTimer> {
        wire.set_responder(rdm_devices([responder_config()]));
        let port = DmxPort::install(wire.uart(), wire.timer(), DmxConfig::default()).unwrap();
        port.enable().unwrap();
        port
    }

    #[test]
    fn test_get_device_info() {
        let wire = Wire::new();
        let port = install(&wire);
        let mut wait = wire.waiter(&port);
        let mut controller =
            DmxController::new(port.lock(&mut wait), &DmxControllerConfig::default());

        let response = complete_response::<()>(
            controller
                .rdm_get(RdmRequest::empty(
                    PackageAddress::Device(responder_uid()),
                    pids::DEVICE_INFO,
                ))
                .unwrap(),
        )
        .unwrap();
        assert_eq!(response.parameter_id, pids::DEVICE_INFO);
        assert_eq!(response.data.len(), crate::consts::RDM_DEVICE_INFO_SIZE);

        let device_info = controller.rdm_get_device_info(responder_uid()).unwrap();
        assert_eq!(device_info.device_model_id, 0x0042);
        assert_eq!(device_info.product_category, 0x0101);
        assert_eq!(device_info.dmx_footprint, 6);
        assert_eq!(device_info.dmx_start_address, DmxStartAddress::Address(17));
        assert_eq!(controller.rdm_get_last_message_count(), 0);
    }

    #[test]
    fn test_labels_and_start_address() {
        let wire = Wire::new();
        let port = install(&wire);
        let mut wait = wire.waiter(&port);
        let mut controller =
            DmxController::new(port.lock(&mut wait), &DmxControllerConfig::default());
        let device = PackageAddress::Device(responder_uid());

        assert_eq!(
            controller
                .rdm_get_software_version_label(responder_uid())
                .unwrap(),
            "1.4.2"
        );
        assert_eq!(
            controller.rdm_get_device_label(responder_uid()).unwrap(),
            "Front wash"
        );

        controller.rdm_set_device_label(device, "Rear").unwrap();
        assert_eq!(controller.rdm_get_device_label(responder_uid()).unwrap(), "Rear");

        controller.rdm_set_dmx_start_address(device, 480).unwrap();
        assert_eq!(
            controller.rdm_get_dmx_start_address(responder_uid()).unwrap(),
            DmxStartAddress::Address(480)
        );

        controller.rdm_set_identify(device, true).unwrap();
        assert!(controller.rdm_get_identify(responder_uid()).unwrap());

        let sent = wire.sent().len();
        assert!(matches!(
            controller.rdm_set_dmx_start_address(device, 513),
            Err(RdmResponseError::InvalidParameter)
        ));
        assert!(matches!(
            controller.rdm_set_device_label(device, "a label that is longer than 32 bytes"),
            Err(RdmResponseError::InvalidParameter)
        ));
        assert_eq!(wire.sent().len(), sent);
    }

    #[test]
    fn test_typed_parameters() {
        let wire = Wire::new();
        let port = install(&wire);
        let mut wait = wire.waiter(&port);
        let mut controller =
            DmxController::new(port.lock(&mut wait), &DmxControllerConfig::default());
        let word = Schema::new(&[FieldKind::Word]).unwrap();

        controller
            .rdm_set_parameter(
                PackageAddress::Device(responder_uid()),
                pids::DMX_START_ADDRESS,
                &word,
                &300u16.to_le_bytes(),
            )
            .unwrap();

        let mut native = [0u8; 2];
        let length = controller
            .rdm_get_parameter(responder_uid(), pids::DMX_START_ADDRESS, &word, &mut native)
            .unwrap();
        assert_eq!(length, 2);
        assert_eq!(u16::from_le_bytes(native), 300);

        let parameters = controller
            .rdm_get_supported_parameters(responder_uid())
            .unwrap();
        assert_eq!(parameters, [pids::DEVICE_LABEL, pids::QUEUED_MESSAGE]);

        let queued = controller
            .rdm_get_queued_message(responder_uid(), StatusType::StatusAdvisory)
            .unwrap();
        assert_eq!(queued.parameter_id, pids::STATUS_MESSAGES);
        assert!(queued.data.is_empty());
    }

    #[test]
    fn test_errors() {
        let wire = Wire::new();
        let port = install(&wire);
        let mut wait = wire.waiter(&port);
        let mut controller =
            DmxController::new(port.lock(&mut wait), &DmxControllerConfig::default());

        assert!(matches!(
            controller.rdm_get(RdmRequest::empty(PackageAddress::Device(responder_uid()), 0x8123)),
            Err(RdmResponseError::NotAcknowledged(NackReason::UnknownPid))
        ));
        assert!(matches!(
            controller.rdm_set(RdmRequest::empty(
                PackageAddress::Device(responder_uid()),
                pids::DEVICE_INFO
            )),
            Err(RdmResponseError::NotAcknowledged(
                NackReason::UnsupportedCommandClass
            ))
        ));

        let other = UniqueIdentifier::new(0x05E0, 0x0000_0A0C).unwrap();
        assert!(matches!(
            controller.rdm_get_device_info(other),
            Err(RdmResponseError::DmxError(DmxError::TimeoutError))
        ));

        assert!(matches!(
            controller.rdm_set(RdmRequest::with_data(
                PackageAddress::Broadcast,
                pids::IDENTIFY_DEVICE,
                &[1]
            )),
            Ok(RdmResponse::RequestWasBroadcast)
        ));
        assert!(controller.rdm_get_identify(responder_uid()).unwrap());
    }

    #[test]
    fn test_discovery_primitives() {
        let wire = Wire::new();
        let port = install(&wire);
        let mut wait = wire.waiter(&port);
        let mut controller =
            DmxController::new(port.lock(&mut wait), &DmxControllerConfig::default());

        assert_eq!(
            controller.rdm_disc_un_mute(PackageAddress::Broadcast).unwrap(),
            None
        );
        assert_eq!(
            controller.rdm_discover(0, 0xFFFF_FFFF_FFFE).unwrap(),
            DiscoveryOption::Found(responder_uid())
        );

        let mute = controller
            .rdm_disc_mute(PackageAddress::Device(responder_uid()))
            .unwrap()
            .unwrap();
        assert_eq!(mute.binding_uid, None);
        assert_eq!(
            controller.rdm_discover(0, 0xFFFF_FFFF_FFFE).unwrap(),
            DiscoveryOption::NoDevice
        );
    }

    #[test]
    fn test_send_dmx_package() {
        let wire = Wire::new();
        let port = install(&wire);
        let mut wait = wire.waiter(&port);
        let mut controller =
            DmxController::new(port.lock(&mut wait), &DmxControllerConfig::default());

        controller.send_dmx_package(&[0x10, 0x20, 0x30]).unwrap();
        controller.send_custom_package(0x17, &[0x01]).unwrap();

        let sent = wire.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].bytes, [0x00, 0x10, 0x20, 0x30]);
        assert_eq!(sent[1].bytes, [0x17, 0x01]);
        assert!(sent.iter().all(|frame| frame.with_break));
    }
}

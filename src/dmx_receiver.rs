use crate::consts::{DMX_MAX_PACKAGE_SIZE, SC_RDM};
use crate::dmx_driver::{DmxError, DmxReceiver, RdmResponderDriver};
use crate::rdm_data::{RdmData, RdmDeserializationError, RdmRequestData};
use crate::rdm_parameters::ParameterDictionary;
use crate::rdm_responder::{
    DeviceState, DmxReceiverContext, RdmAnswer, RdmResponderConfig, RdmResponderHandlerFunc,
    RdmResponderPackageHandler, RdmResult, ResponderError,
};
use crate::types::NackReason;

/// A vector that contains one DmxFrame. The first byte is the start code. 0x00 is the dmx start code.
pub type DmxFrame = heapless::Vec<u8, DMX_MAX_PACKAGE_SIZE>;

#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// Errors that can happen during polling. These errors should not cause panics.
pub enum PollingError<DriverError, HandlerError> {
    /// There were fewer bytes written to the uart then there should have been.
    UartOverflow,
    /// The request timed time out.
    /// **Important:** If you implement a driver make sure this error gets raised instead
    /// of a driver specific error.
    TimeoutError,
    /// A slot of the frame was received with an invalid stop bit.
    FramingError,
    /// Multiple devices transmitted at the same time.
    Collision,
    /// The frame did not fit into the buffer.
    BufferTooSmall,
    /// The package size is insufficient.
    WrongPackageSize,
    /// The received package is a response and not a request.
    NotMatching,
    /// A driver specific error occurred.
    DriverError(DriverError),
    /// A handler specific error occurred.
    HandlerError(HandlerError),
    /// Raised when an RDM package could not be deserialized.
    DeserializationError(RdmDeserializationError),
}

impl<DriverError, HandlerError> From<DmxError<DriverError>>
    for PollingError<DriverError, HandlerError>
{
    fn from(value: DmxError<DriverError>) -> Self {
        match value {
            DmxError::UartOverflow => Self::UartOverflow,
            DmxError::TimeoutError => Self::TimeoutError,
            DmxError::FramingError => Self::FramingError,
            DmxError::Collision => Self::Collision,
            DmxError::BufferTooSmall => Self::BufferTooSmall,
            DmxError::DeserializationError(deserialization_error) => {
                Self::DeserializationError(deserialization_error)
            },
            DmxError::DriverError(driver_error) => Self::DriverError(driver_error),
        }
    }
}

impl<DriverError: core::fmt::Display, HandlerError: core::fmt::Display> core::fmt::Display
    for PollingError<DriverError, HandlerError>
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let error_message = match self {
            PollingError::UartOverflow => "Uart overflow.",
            PollingError::TimeoutError => "Timeout error.",
            PollingError::FramingError => "Framing error.",
            PollingError::Collision => "Data collision.",
            PollingError::BufferTooSmall => "The frame did not fit into the buffer.",
            PollingError::DeserializationError(_) => "Deserialization error.",
            PollingError::NotMatching => "Received response and not request.",
            PollingError::WrongPackageSize => "The package size is insufficient.",
            PollingError::DriverError(error) => {
                return core::fmt::Display::fmt(error, f);
            },
            PollingError::HandlerError(error) => {
                return core::fmt::Display::fmt(error, f);
            },
        };

        write!(f, "{}", error_message)
    }
}

#[cfg(feature = "std")]
impl<
        DriverError: core::fmt::Display + core::fmt::Debug,
        HandlerError: core::fmt::Display + core::fmt::Debug,
    > std::error::Error for PollingError<DriverError, HandlerError>
{
}

/// A handler for dmx and custom rdm packages.
pub trait DmxResponderHandler {
    type Error;

    /// Handle rdm requests on parameters that are not in the parameter dictionary.
    fn handle_rdm(
        &mut self,
        _request: &RdmRequestData,
        _context: &mut DmxReceiverContext,
    ) -> Result<RdmResult, Self::Error> {
        Ok(RdmResult::NotAcknowledged(NackReason::UnknownPid as u16))
    }

    /// Handle all received frames that have a different start code than `0xCC` (the rdm start code).
    /// The first byte is the start code. If start code is `0x00` it's a DMX Package.
    fn handle_dmx(
        &mut self,
        _dmx_frame: DmxFrame,
        _context: &mut DmxReceiverContext,
    ) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// The structure to build an RDM Receiver.
pub struct RdmResponder<'a, D: DmxReceiver + RdmResponderDriver> {
    driver: D,
    rdm_receiver_handler: RdmResponderPackageHandler<'a>,
}

impl<'a, D: DmxReceiver + RdmResponderDriver> RdmResponder<'a, D> {
    /// Creates a new [RdmResponder]. The parameters are stored in `arena`, see
    /// [RdmResponderPackageHandler::new].
    pub fn new(
        driver: D,
        config: RdmResponderConfig,
        arena: &'a mut [u8],
    ) -> Result<Self, ResponderError> {
        Ok(Self {
            driver,
            rdm_receiver_handler: RdmResponderPackageHandler::new(config, arena)?,
        })
    }

    /// Call this function as often as you can or on a serial interrupt. It will
    /// receive a package and handle it.
    ///
    /// Returns false if no package was received.
    pub fn poll<HandlerError>(
        &mut self,
        handler: &mut dyn DmxResponderHandler<Error = HandlerError>,
    ) -> Result<bool, PollingError<D::DriverError, HandlerError>> {
        let package = match self.driver.receive_package() {
            Err(DmxError::TimeoutError) => return Ok(false),
            result => result?,
        };

        if package.is_empty() {
            return Err(PollingError::WrongPackageSize);
        }

        match package[0] {
            SC_RDM => self.handle_rdm(package, handler)?,
            _ => handler
                .handle_dmx(package, &mut self.rdm_receiver_handler.get_context())
                .map_err(PollingError::HandlerError)?,
        }

        Ok(true)
    }

    fn handle_rdm<HandlerError>(
        &mut self,
        package: DmxFrame,
        handler: &mut dyn DmxResponderHandler<Error = HandlerError>,
    ) -> Result<(), PollingError<D::DriverError, HandlerError>> {
        struct DmxRdmHandlerWrapper<'a, HandlerError> {
            dmx: &'a mut dyn DmxResponderHandler<Error = HandlerError>,
        }

        impl<HandlerError> RdmResponderHandlerFunc for DmxRdmHandlerWrapper<'_, HandlerError> {
            type Error = HandlerError;
            fn handle_rdm(
                &mut self,
                request: &RdmRequestData,
                context: &mut DmxReceiverContext,
            ) -> Result<RdmResult, Self::Error> {
                self.dmx.handle_rdm(request, context)
            }
        }

        let request = match RdmData::deserialize(&package) {
            Ok(RdmData::Request(request)) => request,
            Ok(RdmData::Response(_)) => {
                self.driver.skip_response()?;
                return Err(PollingError::NotMatching);
            },
            Err(error) => {
                self.driver.skip_response()?;
                return Err(PollingError::DeserializationError(error));
            },
        };

        let response = self
            .rdm_receiver_handler
            .handle_rdm_request(request, &mut DmxRdmHandlerWrapper { dmx: handler })
            .map_err(PollingError::HandlerError)?;

        match response {
            RdmAnswer::Response(response_data) => {
                self.driver.send_rdm_response(response_data)?;
            },
            RdmAnswer::DiscoveryResponse(uid) => {
                self.driver.send_rdm_discovery_response(uid)?;
            },
            RdmAnswer::NoResponse => {
                self.driver.skip_response()?;
            },
        }

        Ok(())
    }

    pub fn driver(&mut self) -> &mut D {
        &mut self.driver
    }

    pub fn dictionary(&self) -> &ParameterDictionary<'a> {
        self.rdm_receiver_handler.dictionary()
    }

    /// The parameter dictionary to define parameters or update values.
    pub fn dictionary_mut(&mut self) -> &mut ParameterDictionary<'a> {
        self.rdm_receiver_handler.dictionary_mut()
    }

    pub fn state(&self) -> &DeviceState {
        self.rdm_receiver_handler.state()
    }

    /// Get the amount of queued messages.
    pub fn get_message_count(&self) -> u8 {
        self.rdm_receiver_handler.get_message_count()
    }
}

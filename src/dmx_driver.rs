use crate::bus::{Event, EventStatus};
use crate::dmx_receiver::DmxFrame;
use crate::rdm_data::{RdmDeserializationError, RdmRequestData, RdmResponseData};
use crate::unique_identifier::UniqueIdentifier;

#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DmxError<E> {
    /// The uart fifo overflowed before the data could be read.
    UartOverflow,
    /// The request timed out.
    /// **Important:** If you implement a driver make sure this error gets raised instead
    /// of a driver specific error.
    TimeoutError,
    /// A slot was received with an invalid stop bit.
    FramingError,
    /// Multiple devices transmitted at the same time.
    Collision,
    /// The frame does not fit into the supplied buffer.
    BufferTooSmall,
    /// Raised when an RDM package could not be deserialized.
    DeserializationError(RdmDeserializationError),
    /// An error raised by the driver.
    DriverError(E),
}

impl<E: core::fmt::Display> core::fmt::Display for DmxError<E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            DmxError::UartOverflow => write!(f, "uart overflowed"),
            DmxError::TimeoutError => write!(f, "request timed out"),
            DmxError::FramingError => write!(f, "framing error on the line"),
            DmxError::Collision => write!(f, "data collision"),
            DmxError::BufferTooSmall => write!(f, "buffer too small for the frame"),
            DmxError::DeserializationError(error) => error.fmt(f),
            DmxError::DriverError(error) => error.fmt(f),
        }
    }
}

#[cfg(feature = "std")]
impl<E: core::fmt::Display + core::fmt::Debug> std::error::Error for DmxError<E> {}

impl<E> DmxError<E> {
    /// Converts the status of a bus event into a result.
    pub fn check_event(event: &Event) -> Result<(), Self> {
        match event.status {
            EventStatus::Ok => Ok(()),
            EventStatus::Timeout => Err(Self::TimeoutError),
            EventStatus::ChecksumInvalid => Err(Self::DeserializationError(
                RdmDeserializationError::WrongChecksum,
            )),
            EventStatus::FramingError => Err(Self::FramingError),
            EventStatus::Overflow => Err(Self::UartOverflow),
            EventStatus::Collision => Err(Self::Collision),
            EventStatus::BufferTooSmall => Err(Self::BufferTooSmall),
        }
    }
}

/// Errors of the interrupt driven port.
#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PortError<UE, TE> {
    /// The port is not enabled.
    Disabled,
    /// The previous frame is still being sent.
    StillSending,
    /// The request was received longer ago than a responder may take to answer.
    TooLateToRespond,
    /// The frame exceeds 513 slots.
    FrameTooLarge,
    Uart(UE),
    Timer(TE),
}

impl<UE: core::fmt::Display, TE: core::fmt::Display> core::fmt::Display for PortError<UE, TE> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            PortError::Disabled => write!(f, "port is disabled"),
            PortError::StillSending => write!(f, "port is still sending"),
            PortError::TooLateToRespond => write!(f, "responder window expired"),
            PortError::FrameTooLarge => write!(f, "frame too large"),
            PortError::Uart(error) => error.fmt(f),
            PortError::Timer(error) => error.fmt(f),
        }
    }
}

#[cfg(feature = "std")]
impl<UE, TE> std::error::Error for PortError<UE, TE>
where
    UE: core::fmt::Display + core::fmt::Debug,
    TE: core::fmt::Display + core::fmt::Debug,
{
}

impl<UE, TE> From<PortError<UE, TE>> for DmxError<PortError<UE, TE>> {
    fn from(value: PortError<UE, TE>) -> Self {
        Self::DriverError(value)
    }
}

#[derive(Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DiscoveryOption {
    /// No device responded to the discovery request.
    /// There aren't any devices in the specified unique id range.
    NoDevice,
    /// The response to the discovery request couldn't be deserialized.
    /// There are multiple devices in the specified unique id range.
    Collision,
    /// The discovery response was successfully deserialized.
    /// There is only one device in the specified unique id range.
    Found(UniqueIdentifier),
}

/// Trait that ensures that the same Error is used in the [DmxControllerDriver] as well as the [RdmControllerDriver].
pub trait ControllerDriverErrorDef {
    /// The driver specific error.
    type DriverError;
}

/// Trait for controlling DMX fixtures.
pub trait DmxControllerDriver: ControllerDriverErrorDef {
    /// Send a DMX512 package. It shouldn't be bigger than 512 bytes.
    fn send_dmx_package(&mut self, package: &[u8]) -> Result<(), DmxError<Self::DriverError>>;
}

/// Trait for implementing packages with custom start codes.
pub trait CustomStartCodeControllerDriver: ControllerDriverErrorDef {
    /// Sends a package with a custom start code.
    fn send_custom_package(
        &mut self,
        start_code: u8,
        package: &[u8],
    ) -> Result<(), DmxError<Self::DriverError>>;
}

/// Trait for RDM transactions from a controller point of view.
pub trait RdmControllerDriver: ControllerDriverErrorDef {
    /// Sends an RDM request and waits for the response.
    ///
    /// The driver owns the transaction number and overwrites the one of the request. Responses
    /// with a different transaction number are skipped. Returns `None` for requests that don't
    /// get a response, which are broadcasts.
    fn rdm_request(
        &mut self,
        request: RdmRequestData,
    ) -> Result<Option<RdmResponseData>, DmxError<Self::DriverError>>;

    /// Sends a DISC_UNIQUE_BRANCH request and interprets the discovery response.
    fn rdm_discover_branch(
        &mut self,
        request: RdmRequestData,
    ) -> Result<DiscoveryOption, DmxError<Self::DriverError>>;
}

/// Trait for receiving frames on a responder.
pub trait DmxReceiver: ControllerDriverErrorDef {
    /// Receive a DMX512 package. Raises [DmxError::TimeoutError] if there was none.
    fn receive_package(&mut self) -> Result<DmxFrame, DmxError<Self::DriverError>>;
}

/// Trait for answering requests on a responder.
pub trait RdmResponderDriver: ControllerDriverErrorDef {
    /// Sends a response with a break.
    fn send_rdm_response(
        &mut self,
        response: RdmResponseData,
    ) -> Result<(), DmxError<Self::DriverError>>;

    /// Sends the response to DISC_UNIQUE_BRANCH, which goes without a break.
    fn send_rdm_discovery_response(
        &mut self,
        uid: UniqueIdentifier,
    ) -> Result<(), DmxError<Self::DriverError>>;

    /// Called when a request does not get a response, so the driver can go back to receiving.
    fn skip_response(&mut self) -> Result<(), DmxError<Self::DriverError>> {
        Ok(())
    }
}

impl<D: ControllerDriverErrorDef> ControllerDriverErrorDef for &mut D {
    type DriverError = D::DriverError;
}

impl<D: DmxControllerDriver> DmxControllerDriver for &mut D {
    fn send_dmx_package(&mut self, package: &[u8]) -> Result<(), DmxError<Self::DriverError>> {
        (**self).send_dmx_package(package)
    }
}

impl<D: CustomStartCodeControllerDriver> CustomStartCodeControllerDriver for &mut D {
    fn send_custom_package(
        &mut self,
        start_code: u8,
        package: &[u8],
    ) -> Result<(), DmxError<Self::DriverError>> {
        (**self).send_custom_package(start_code, package)
    }
}

impl<D: RdmControllerDriver> RdmControllerDriver for &mut D {
    fn rdm_request(
        &mut self,
        request: RdmRequestData,
    ) -> Result<Option<RdmResponseData>, DmxError<Self::DriverError>> {
        (**self).rdm_request(request)
    }

    fn rdm_discover_branch(
        &mut self,
        request: RdmRequestData,
    ) -> Result<DiscoveryOption, DmxError<Self::DriverError>> {
        (**self).rdm_discover_branch(request)
    }
}

impl<D: DmxReceiver> DmxReceiver for &mut D {
    fn receive_package(&mut self) -> Result<DmxFrame, DmxError<Self::DriverError>> {
        (**self).receive_package()
    }
}

impl<D: RdmResponderDriver> RdmResponderDriver for &mut D {
    fn send_rdm_response(
        &mut self,
        response: RdmResponseData,
    ) -> Result<(), DmxError<Self::DriverError>> {
        (**self).send_rdm_response(response)
    }

    fn send_rdm_discovery_response(
        &mut self,
        uid: UniqueIdentifier,
    ) -> Result<(), DmxError<Self::DriverError>> {
        (**self).send_rdm_discovery_response(uid)
    }

    fn skip_response(&mut self) -> Result<(), DmxError<Self::DriverError>> {
        (**self).skip_response()
    }
}

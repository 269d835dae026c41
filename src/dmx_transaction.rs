//! Exclusive access to a [DmxPort].
//!
//! A [Transaction] is handed out by [DmxPort::lock] and releases the port when dropped. Every
//! operation that needs more than one step (send a request and wait for the response, a discovery
//! branch, answering a request) runs through it, so only one of them is in flight per port.
//!
//! The transaction implements the driver traits of [crate::dmx_driver], which makes it usable
//! with [crate::dmx_controller::DmxController] and [crate::dmx_receiver::RdmResponder].

use crate::bus::{BusEvent, Event, EventOrigin, EventStatus, FrameKind, PortMode};
use crate::consts::{
    DMX_MAX_PACKAGE_SIZE, DMX_NULL_START, MAXIMUM_DMX512_MILLIS, RDM_MAX_PACKAGE_SIZE,
    RDM_MAX_PREAMBLE_LENGTH, RDM_PACKET_SPACING_BROADCAST_MICROS,
    RDM_PACKET_SPACING_RESPONSE_MICROS, RDM_REQUEST_TIMEOUT_MICROS, RDM_RESPONDER_WINDOW_MICROS,
};
use crate::dmx_driver::{
    ControllerDriverErrorDef, CustomStartCodeControllerDriver, DiscoveryOption,
    DmxControllerDriver, DmxError, DmxReceiver, PortError, RdmControllerDriver,
    RdmResponderDriver,
};
use crate::dmx_receiver::DmxFrame;
use crate::dmx_uart_driver::{DmxTimer, DmxUart, DmxWait};
use crate::port::{DmxPort, DmxPortError};
use crate::rdm_data::{
    deserialize_discovery_response, is_disc_unique_branch, is_rdm_request, is_rdm_response,
    rdm_request_expects_response, serialize_discovery_response, serialize_rdm_data,
    stamp_transaction_number, RdmData, RdmDeserializationError, RdmRequestData, RdmResponseData,
};
use crate::timing::{packet_spacing, LastTransfer};
use crate::unique_identifier::UniqueIdentifier;

const MAXIMUM_DMX512_MICROS: u32 = MAXIMUM_DMX512_MILLIS * 1000;

/// Exclusive access to a port. See [DmxPort::lock].
pub struct Transaction<'a, U: DmxUart, T: DmxTimer, W: DmxWait> {
    port: &'a DmxPort<U, T>,
    wait: &'a mut W,
}

impl<'a, U: DmxUart, T: DmxTimer, W: DmxWait> Transaction<'a, U, T, W> {
    pub(crate) fn new(port: &'a DmxPort<U, T>, wait: &'a mut W) -> Self {
        Self { port, wait }
    }

    pub fn port(&self) -> &DmxPort<U, T> {
        self.port
    }

    fn now(&self) -> u64 {
        self.port.with_inner(|inner| inner.now())
    }

    fn wait_until(&mut self, deadline: u64) {
        while self.now() < deadline {
            self.wait.pause();
        }
    }

    /// Copies the frame buffer starting at `offset` into `data` and returns the amount of bytes
    /// copied.
    pub fn read(&self, offset: usize, data: &mut [u8]) -> usize {
        self.port.with_inner(|inner| {
            let frame = &inner.bus.frame()[offset.min(DMX_MAX_PACKAGE_SIZE)..];
            let length = frame.len().min(data.len());
            data[..length].copy_from_slice(&frame[..length]);

            length
        })
    }

    /// Copies `data` into the frame buffer starting at `offset` and returns the amount of bytes
    /// copied. Fails while an RDM frame is being sent.
    pub fn write(&mut self, offset: usize, data: &[u8]) -> Result<usize, DmxPortError<U, T>> {
        self.port.with_inner(|inner| {
            if inner.bus.is_sending()
                && matches!(
                    inner.bus.tx_kind(),
                    FrameKind::Rdm | FrameKind::DiscoveryResponse
                )
            {
                return Err(PortError::StillSending);
            }

            let frame = &mut inner.bus.frame_mut()[offset.min(DMX_MAX_PACKAGE_SIZE)..];
            let length = frame.len().min(data.len());
            frame[..length].copy_from_slice(&data[..length]);

            Ok(length)
        })
    }

    /// Sends the first `size` bytes of the frame buffer with a break.
    ///
    /// A controller waits out the packet spacing after the previous transfer first and stamps
    /// RDM requests with the transaction number of the port. Returns as soon as the transmission
    /// started.
    pub fn send(&mut self, size: usize) -> Result<usize, DmxPortError<U, T>> {
        self.send_frame(size, true)
    }

    fn send_frame(&mut self, size: usize, with_break: bool) -> Result<usize, DmxPortError<U, T>> {
        if size > DMX_MAX_PACKAGE_SIZE {
            return Err(PortError::FrameTooLarge);
        }

        if !self.port.is_enabled() {
            return Err(PortError::Disabled);
        }

        if size == 0 {
            return Ok(0);
        }

        self.wait_sent(MAXIMUM_DMX512_MICROS)?;

        let deadline = self.port.with_inner(|inner| {
            let frame = &inner.bus.frame()[..size];
            let is_reply = !with_break || is_rdm_response(frame);
            let elapsed = inner.now().saturating_sub(inner.bus.last_frame_at());

            if is_reply && matches!(inner.bus.mode(), PortMode::Responder(_)) {
                if elapsed > RDM_RESPONDER_WINDOW_MICROS as u64 {
                    return Err(PortError::TooLateToRespond);
                }

                return Ok(inner.bus.last_frame_at() + RDM_PACKET_SPACING_RESPONSE_MICROS as u64);
            }

            Ok(inner.bus.last_frame_at() + packet_spacing(inner.last_transfer) as u64)
        })?;

        self.wait_until(deadline);

        let (notification, result) = self.port.with_inner(|inner| {
            let transaction_number = inner.transaction_number;
            let frame = &mut inner.bus.frame_mut()[..size];

            let expects_reply = rdm_request_expects_response(frame);
            inner.last_transfer = if !with_break || is_rdm_response(frame) {
                LastTransfer::RdmResponse
            } else if is_rdm_request(frame) {
                stamp_transaction_number(frame, transaction_number);
                inner.transaction_number = transaction_number.wrapping_add(1);

                if !expects_reply {
                    LastTransfer::RdmBroadcast
                } else if is_disc_unique_branch(frame) {
                    LastTransfer::RdmDiscovery { answered: false }
                } else {
                    LastTransfer::RdmRequest { answered: false }
                }
            } else {
                LastTransfer::Dmx
            };

            self.port.events().reset();

            let space = inner.uart.tx_fifo_space();
            inner.dispatch(BusEvent::StartTransmit {
                len: size,
                expects_reply,
                with_break,
                space,
            })
        });

        if let Some(event) = notification {
            self.port.events().signal(event);
        }
        result?;

        trace!("frame of {} bytes queued", size);
        Ok(size)
    }

    /// Waits until the frame that is being sent left the uart.
    /// Fails with [PortError::StillSending] if it didn't within `timeout_micros`.
    pub fn wait_sent(&mut self, timeout_micros: u32) -> Result<(), DmxPortError<U, T>> {
        let deadline = self.now() + timeout_micros as u64;

        loop {
            let (sending, now) = self
                .port
                .with_inner(|inner| (inner.bus.is_sending(), inner.now()));

            if !sending {
                return Ok(());
            }

            if now >= deadline {
                return Err(PortError::StillSending);
            }

            self.wait.pause();
        }
    }

    /// Waits for the next received frame. The frame is in the frame buffer afterward, see
    /// [Transaction::read].
    ///
    /// Returns an event with [EventStatus::Timeout] if nothing arrived within `timeout_micros`.
    pub fn receive(&mut self, timeout_micros: u32) -> Result<Event, DmxPortError<U, T>> {
        if !self.port.is_enabled() {
            return Err(PortError::Disabled);
        }

        let (notification, result) = self
            .port
            .with_inner(|inner| inner.dispatch(BusEvent::ReceiveRequested));
        if let Some(event) = notification {
            self.port.events().signal(event);
        }
        result?;

        let deadline = self.now() + timeout_micros as u64;
        loop {
            if let Some(event) = self.port.events().try_take() {
                if event.origin == EventOrigin::Transmit {
                    continue;
                }

                if event.size > 0 {
                    self.port.with_inner(|inner| {
                        inner.last_transfer = match inner.last_transfer {
                            LastTransfer::RdmRequest { .. } => {
                                LastTransfer::RdmRequest { answered: true }
                            },
                            LastTransfer::RdmDiscovery { .. } => {
                                LastTransfer::RdmDiscovery { answered: true }
                            },
                            other => other,
                        };
                    });
                }

                return Ok(event);
            }

            if self.now() >= deadline {
                return Ok(Event::timeout());
            }

            self.wait.pause();
        }
    }

    /// Sends the first `size` bytes of the frame buffer and waits for the response.
    ///
    /// Returns `None` for frames that don't get a response. Those return once the frame was sent
    /// and the bus was quiet for the broadcast packet spacing.
    pub fn request(
        &mut self,
        size: usize,
        timeout_micros: u32,
    ) -> Result<Option<Event>, DmxPortError<U, T>> {
        let expects_reply = self.port.with_inner(|inner| {
            rdm_request_expects_response(&inner.bus.frame()[..size.min(DMX_MAX_PACKAGE_SIZE)])
        });

        self.send(size)?;

        if !expects_reply {
            self.wait_sent(MAXIMUM_DMX512_MICROS)?;
            let last_frame_at = self.port.with_inner(|inner| inner.bus.last_frame_at());
            self.wait_until(last_frame_at + RDM_PACKET_SPACING_BROADCAST_MICROS as u64);

            return Ok(None);
        }

        self.receive(timeout_micros).map(Some)
    }

    /// Serializes the package into the frame buffer once the bus is free.
    fn load_rdm(&mut self, rdm_data: &RdmData) -> Result<usize, DmxPortError<U, T>> {
        self.wait_sent(MAXIMUM_DMX512_MICROS)?;

        Ok(self
            .port
            .with_inner(|inner| serialize_rdm_data(rdm_data, &mut inner.bus.frame_mut()[..])))
    }

    fn load_frame(&mut self, start_code: u8, package: &[u8]) -> Result<usize, DmxPortError<U, T>> {
        if package.len() >= DMX_MAX_PACKAGE_SIZE {
            return Err(PortError::FrameTooLarge);
        }

        self.wait_sent(MAXIMUM_DMX512_MICROS)?;

        self.port.with_inner(|inner| {
            let frame = inner.bus.frame_mut();
            frame[0] = start_code;
            frame[1..=package.len()].copy_from_slice(package);
        });

        Ok(package.len() + 1)
    }

    fn read_rdm(&self, event: &Event) -> Result<RdmData, RdmDeserializationError> {
        let mut buffer = [0u8; RDM_MAX_PACKAGE_SIZE];
        let size = self.read(0, &mut buffer[..event.size.min(RDM_MAX_PACKAGE_SIZE)]);

        RdmData::deserialize(&buffer[..size])
    }
}

impl<U: DmxUart, T: DmxTimer, W: DmxWait> Drop for Transaction<'_, U, T, W> {
    fn drop(&mut self) {
        self.port.unlock();
    }
}

impl<U: DmxUart, T: DmxTimer, W: DmxWait> ControllerDriverErrorDef for Transaction<'_, U, T, W> {
    type DriverError = DmxPortError<U, T>;
}

impl<U: DmxUart, T: DmxTimer, W: DmxWait> DmxControllerDriver for Transaction<'_, U, T, W> {
    fn send_dmx_package(&mut self, package: &[u8]) -> Result<(), DmxError<Self::DriverError>> {
        self.send_custom_package(DMX_NULL_START, package)
    }
}

impl<U: DmxUart, T: DmxTimer, W: DmxWait> CustomStartCodeControllerDriver
    for Transaction<'_, U, T, W>
{
    fn send_custom_package(
        &mut self,
        start_code: u8,
        package: &[u8],
    ) -> Result<(), DmxError<Self::DriverError>> {
        let size = self.load_frame(start_code, package)?;
        self.send(size)?;
        self.wait_sent(MAXIMUM_DMX512_MICROS)?;

        Ok(())
    }
}

impl<U: DmxUart, T: DmxTimer, W: DmxWait> RdmControllerDriver for Transaction<'_, U, T, W> {
    fn rdm_request(
        &mut self,
        request: RdmRequestData,
    ) -> Result<Option<RdmResponseData>, DmxError<Self::DriverError>> {
        let transaction_number = self.port.with_inner(|inner| inner.transaction_number);
        let request = RdmRequestData {
            transaction_number,
            ..request
        };

        let size = self.load_rdm(&RdmData::Request(request))?;
        let deadline = self.now() + RDM_REQUEST_TIMEOUT_MICROS as u64;

        let Some(mut event) = self.request(size, RDM_REQUEST_TIMEOUT_MICROS)? else {
            return Ok(None);
        };

        loop {
            DmxError::<Self::DriverError>::check_event(&event)?;

            if event.kind != FrameKind::Rdm {
                return Err(DmxError::DeserializationError(
                    RdmDeserializationError::WrongStartCode,
                ));
            }

            let rdm_data = self
                .read_rdm(&event)
                .map_err(DmxError::<Self::DriverError>::DeserializationError)?;

            match rdm_data {
                RdmData::Response(response) if response.transaction_number == transaction_number => {
                    return Ok(Some(response));
                },
                _ => debug!("skipped rdm package with a different transaction number"),
            }

            let now = self.now();
            if now >= deadline {
                return Err(DmxError::TimeoutError);
            }

            event = self.receive((deadline - now) as u32)?;
        }
    }

    fn rdm_discover_branch(
        &mut self,
        request: RdmRequestData,
    ) -> Result<DiscoveryOption, DmxError<Self::DriverError>> {
        let transaction_number = self.port.with_inner(|inner| inner.transaction_number);
        let size = self.load_rdm(&RdmData::Request(RdmRequestData {
            transaction_number,
            ..request
        }))?;

        let Some(event) = self.request(size, RDM_REQUEST_TIMEOUT_MICROS)? else {
            return Ok(DiscoveryOption::NoDevice);
        };

        Ok(match (event.status, event.kind) {
            (EventStatus::Timeout, _) => {
                // bytes that never formed a frame are overlapping responses
                if self.port.with_inner(|inner| inner.bus.cursor() > 0) {
                    DiscoveryOption::Collision
                } else {
                    DiscoveryOption::NoDevice
                }
            },
            (EventStatus::Ok, FrameKind::DiscoveryResponse) => {
                let mut buffer = [0u8; RDM_MAX_PACKAGE_SIZE];
                let size = self.read(0, &mut buffer[..event.size.min(RDM_MAX_PACKAGE_SIZE)]);

                match deserialize_discovery_response(&buffer[..size]) {
                    Ok(uid) => DiscoveryOption::Found(uid),
                    Err(_) => DiscoveryOption::Collision,
                }
            },
            _ => DiscoveryOption::Collision,
        })
    }
}

impl<U: DmxUart, T: DmxTimer, W: DmxWait> DmxReceiver for Transaction<'_, U, T, W> {
    fn receive_package(&mut self) -> Result<DmxFrame, DmxError<Self::DriverError>> {
        let deadline = self.now() + MAXIMUM_DMX512_MICROS as u64;

        loop {
            let now = self.now();
            if now >= deadline {
                return Err(DmxError::TimeoutError);
            }

            let event = self.receive((deadline - now) as u32)?;
            DmxError::<Self::DriverError>::check_event(&event)?;

            // discovery responses of other responders
            if matches!(event.kind, FrameKind::DiscoveryResponse | FrameKind::Empty) {
                continue;
            }

            let mut frame = DmxFrame::new();
            self.port.with_inner(|inner| {
                // the event size never exceeds the frame buffer
                let _ = frame.extend_from_slice(&inner.bus.frame()[..event.size]);
            });

            return Ok(frame);
        }
    }
}

impl<U: DmxUart, T: DmxTimer, W: DmxWait> RdmResponderDriver for Transaction<'_, U, T, W> {
    fn send_rdm_response(
        &mut self,
        response: RdmResponseData,
    ) -> Result<(), DmxError<Self::DriverError>> {
        let size = self.load_rdm(&RdmData::Response(response))?;
        self.send_frame(size, true)?;
        self.wait_sent(MAXIMUM_DMX512_MICROS)?;

        Ok(())
    }

    fn send_rdm_discovery_response(
        &mut self,
        uid: UniqueIdentifier,
    ) -> Result<(), DmxError<Self::DriverError>> {
        let response = serialize_discovery_response(uid, RDM_MAX_PREAMBLE_LENGTH);

        self.wait_sent(MAXIMUM_DMX512_MICROS)?;
        self.port.with_inner(|inner| {
            inner.bus.frame_mut()[..response.len()].copy_from_slice(&response);
        });

        self.send_frame(response.len(), false)?;
        self.wait_sent(MAXIMUM_DMX512_MICROS)?;

        Ok(())
    }

    fn skip_response(&mut self) -> Result<(), DmxError<Self::DriverError>> {
        let (_, result) = self
            .port
            .with_inner(|inner| inner.dispatch(BusEvent::ReceiveRequested));

        Ok(result?)
    }
}

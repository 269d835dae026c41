//! The interrupt driven receive and transmit state machine of one port.
//!
//! [BusState::handle] is a pure transition function: it consumes one [BusEvent] and returns the
//! [Effect]s the port has to apply to the hardware. This keeps every transition testable without
//! an interrupt context.

use crate::consts::{
    DMX_MAX_PACKAGE_SIZE, PREAMBLE_BYTE, RDM_DISCOVERY_RESPONSE_SIZE, RDM_HEADER_SIZE,
    RDM_MAX_PACKAGE_SIZE, RDM_RESPONSE_TIMEOUT_MICROS, SC_RDM, SEPARATOR_BYTE,
};
use crate::rdm_data::{
    checksum_is_valid, deserialize_discovery_response, discovery_response_separator,
    rdm_request_expects_response, RdmDeserializationError,
};
use crate::timing::{BreakMeasurement, BreakTiming, TimerAction, TxTimer};
use crate::unique_identifier::{PackageAddress, UniqueIdentifier};

/// A single event never causes more effects than this.
pub const MAX_EFFECTS: usize = 8;

pub type Effects = heapless::Vec<Effect, MAX_EFFECTS>;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PortMode {
    /// Sends requests and turns the bus around for the response.
    Controller,
    /// Answers requests addressed to the uid. Turns the bus around as soon as such a request is
    /// complete.
    Responder(UniqueIdentifier),
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RxState {
    Idle,
    InBreak,
    InMarkAfterBreak,
    ReceivingData,
    FrameComplete,
    FrameError,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TxState {
    Idle,
    Break,
    MarkAfterBreak,
    Data,
    Done,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    Transmit,
    Receive,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LineError {
    Framing,
    Overflow,
}

/// Something that happened on the bus, as seen from interrupt or task context.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusEvent {
    /// The task wrote `len` bytes into the frame buffer and wants them transmitted.
    /// `space` is the free space of the transmit fifo.
    StartTransmit {
        len: usize,
        expects_reply: bool,
        with_break: bool,
        space: usize,
    },
    /// The hardware alarm fired.
    Alarm { space: usize },
    /// The transmit fifo has room for `space` more bytes.
    TxReady { space: usize },
    /// The last byte left the shift register.
    TxDone,
    /// The uart detected a break.
    Break,
    /// The edge sniffer saw the end of a break.
    LineRising,
    /// `count` bytes were read into [BusState::rx_window].
    DataReceived { count: usize },
    /// The uart reported an error. `count` bytes that were still in the fifo were read into
    /// [BusState::rx_window].
    LineError { error: LineError, count: usize },
    /// Another transmitter drove the line at the same time.
    Collision,
    /// The task wants to receive. Turns the bus back to receive if it was left in transmit.
    ReceiveRequested,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Effect {
    ResetRxFifo,
    EnableRx,
    DisableRx,
    /// Enable the transmit fifo and transmit done interrupts.
    EnableTx,
    /// Disable the transmit fifo interrupt, all data is queued.
    DisableTxData,
    DisableTx,
    Direction(Direction),
    InvertTx(bool),
    SetAlarm(u32),
    CancelAlarm,
    /// Write `frame[start..end]` to the transmit fifo.
    WriteFifo { start: usize, end: usize },
    Notify(Event),
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EventStatus {
    Ok,
    Timeout,
    ChecksumInvalid,
    FramingError,
    Overflow,
    Collision,
    BufferTooSmall,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EventOrigin {
    Receive,
    Transmit,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameKind {
    Empty,
    Dmx { start_code: u8 },
    Rdm,
    DiscoveryResponse,
}

/// The result of one reception or transmission, delivered from interrupt context to the task.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Event {
    pub status: EventStatus,
    pub origin: EventOrigin,
    pub kind: FrameKind,
    pub size: usize,
    pub timing: Option<BreakMeasurement>,
}

impl Event {
    pub fn timeout() -> Self {
        Self {
            status: EventStatus::Timeout,
            origin: EventOrigin::Receive,
            kind: FrameKind::Empty,
            size: 0,
            timing: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == EventStatus::Ok
    }
}

/// Result of looking at the bytes received so far.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Classification {
    /// More bytes are needed to tell.
    Incomplete,
    /// The frame is complete at the given size.
    Complete { kind: FrameKind, size: usize },
    /// The bytes cannot become a valid frame.
    Malformed { kind: FrameKind },
}

/// Classifies the bytes received so far.
///
/// `after_break` is false for frames that started without a break, which can only be discovery
/// responses. `size_guess` is the expected size of a frame with an unknown length.
fn classify(frame: &[u8], after_break: bool, size_guess: usize) -> Classification {
    let Some(&start_code) = frame.first() else {
        return Classification::Incomplete;
    };

    if !after_break {
        if start_code != PREAMBLE_BYTE && start_code != SEPARATOR_BYTE {
            return Classification::Malformed {
                kind: FrameKind::DiscoveryResponse,
            };
        }

        return match discovery_response_separator(frame) {
            Some(separator) => {
                let size = separator + 1 + RDM_DISCOVERY_RESPONSE_SIZE;
                if frame.len() >= size {
                    Classification::Complete {
                        kind: FrameKind::DiscoveryResponse,
                        size,
                    }
                } else {
                    Classification::Incomplete
                }
            },
            None if frame.iter().all(|&byte| byte == PREAMBLE_BYTE)
                && frame.len() <= crate::consts::RDM_MAX_PREAMBLE_LENGTH =>
            {
                Classification::Incomplete
            },
            None => Classification::Malformed {
                kind: FrameKind::DiscoveryResponse,
            },
        };
    }

    if start_code == SC_RDM {
        if frame.len() < 3 {
            return Classification::Incomplete;
        }

        let size = (frame[2] as usize).max(RDM_HEADER_SIZE) + 2;
        let size = size.min(RDM_MAX_PACKAGE_SIZE);
        return if frame.len() >= size {
            Classification::Complete {
                kind: FrameKind::Rdm,
                size,
            }
        } else {
            Classification::Incomplete
        };
    }

    if frame.len() >= size_guess {
        Classification::Complete {
            kind: FrameKind::Dmx { start_code },
            size: size_guess,
        }
    } else {
        Classification::Incomplete
    }
}

/// The state of one port's bus.
pub struct BusState {
    frame: [u8; DMX_MAX_PACKAGE_SIZE],
    mode: PortMode,
    timing: BreakTiming,
    tx_timer: TxTimer,
    rx: RxState,
    tx: TxState,
    rx_enabled: bool,
    after_break: bool,
    cursor: usize,
    size_guess: usize,
    rx_size: usize,
    rx_kind: FrameKind,
    tx_cursor: usize,
    tx_size: usize,
    tx_kind: FrameKind,
    expects_reply: bool,
    awaiting_response: bool,
    last_frame_at: u64,
}

impl BusState {
    pub fn new(mode: PortMode, timing: BreakTiming) -> Self {
        Self {
            frame: [0u8; DMX_MAX_PACKAGE_SIZE],
            mode,
            timing,
            tx_timer: TxTimer::new(),
            rx: RxState::Idle,
            tx: TxState::Idle,
            rx_enabled: false,
            after_break: false,
            cursor: 0,
            size_guess: DMX_MAX_PACKAGE_SIZE,
            rx_size: 0,
            rx_kind: FrameKind::Empty,
            tx_cursor: 0,
            tx_size: 0,
            tx_kind: FrameKind::Empty,
            expects_reply: false,
            awaiting_response: false,
            last_frame_at: 0,
        }
    }

    pub fn frame(&self) -> &[u8; DMX_MAX_PACKAGE_SIZE] {
        &self.frame
    }

    /// The frame buffer. Only written by the task while nothing is transmitted.
    pub fn frame_mut(&mut self) -> &mut [u8; DMX_MAX_PACKAGE_SIZE] {
        &mut self.frame
    }

    /// The part of the frame buffer the next received bytes go to.
    pub fn rx_window(&mut self) -> &mut [u8] {
        &mut self.frame[self.cursor..]
    }

    pub fn mode(&self) -> PortMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: PortMode) {
        self.mode = mode;
    }

    pub fn timing(&self) -> BreakTiming {
        self.timing
    }

    pub fn timing_mut(&mut self) -> &mut BreakTiming {
        &mut self.timing
    }

    pub fn rx_state(&self) -> RxState {
        self.rx
    }

    pub fn tx_state(&self) -> TxState {
        self.tx
    }

    pub fn is_sending(&self) -> bool {
        matches!(
            self.tx,
            TxState::Break | TxState::MarkAfterBreak | TxState::Data
        )
    }

    pub fn is_receive_enabled(&self) -> bool {
        self.rx_enabled
    }

    pub fn is_awaiting_response(&self) -> bool {
        self.awaiting_response
    }

    /// Kind of the frame that is being transmitted or was transmitted last.
    pub fn tx_kind(&self) -> FrameKind {
        self.tx_kind
    }

    /// The expected size of the next DMX frame, learned from the previous one.
    pub fn size_guess(&self) -> usize {
        self.size_guess
    }

    /// Size of the last complete frame.
    pub fn rx_size(&self) -> usize {
        self.rx_size
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Time of the last slot that went over the bus, received or transmitted.
    pub fn last_frame_at(&self) -> u64 {
        self.last_frame_at
    }

    /// Enables reception after the port was enabled.
    pub fn start(&mut self) -> Effects {
        let mut effects = Effects::new();
        self.reset_rx();
        self.rx_enabled = true;
        push(&mut effects, Effect::Direction(Direction::Receive));
        push(&mut effects, Effect::ResetRxFifo);
        push(&mut effects, Effect::EnableRx);
        effects
    }

    /// Stops all interrupts and pending alarms.
    pub fn stop(&mut self) -> Effects {
        let mut effects = Effects::new();
        self.tx_timer.cancel();
        self.tx = TxState::Idle;
        self.awaiting_response = false;
        self.rx_enabled = false;
        push(&mut effects, Effect::CancelAlarm);
        push(&mut effects, Effect::InvertTx(false));
        push(&mut effects, Effect::DisableTx);
        push(&mut effects, Effect::DisableRx);
        push(&mut effects, Effect::Direction(Direction::Receive));
        effects
    }

    pub fn handle(&mut self, event: BusEvent, now: u64) -> Effects {
        let mut effects = Effects::new();

        match event {
            BusEvent::StartTransmit {
                len,
                expects_reply,
                with_break,
                space,
            } => self.start_transmit(len, expects_reply, with_break, space, &mut effects),
            BusEvent::Alarm { space } => self.on_alarm(space, &mut effects),
            BusEvent::TxReady { space } => {
                if self.tx == TxState::Data {
                    self.write_chunk(space, &mut effects);
                }
            },
            BusEvent::TxDone => self.on_tx_done(now, &mut effects),
            BusEvent::Break => self.on_break(&mut effects),
            BusEvent::LineRising => {
                if self.rx == RxState::InBreak {
                    self.rx = RxState::InMarkAfterBreak;
                }
            },
            BusEvent::DataReceived { count } => self.on_data(count, now, &mut effects),
            BusEvent::LineError { error, count } => {
                self.on_line_error(error, count, now, &mut effects)
            },
            BusEvent::Collision => {
                if !self.frame_finished() && (self.awaiting_response || self.cursor > 0) {
                    self.finish_frame(
                        EventStatus::Collision,
                        FrameKind::DiscoveryResponse,
                        self.cursor,
                        now,
                        &mut effects,
                    );
                    self.rx = RxState::FrameError;
                }
                push(&mut effects, Effect::ResetRxFifo);
            },
            BusEvent::ReceiveRequested => {
                if !self.is_sending() && !self.rx_enabled {
                    self.reset_rx();
                    self.rx_enabled = true;
                    push(&mut effects, Effect::Direction(Direction::Receive));
                    push(&mut effects, Effect::ResetRxFifo);
                    push(&mut effects, Effect::EnableRx);
                }
            },
        }

        effects
    }

    fn frame_finished(&self) -> bool {
        matches!(self.rx, RxState::FrameComplete | RxState::FrameError)
    }

    fn reset_rx(&mut self) {
        self.rx = RxState::Idle;
        self.cursor = 0;
        self.after_break = false;
    }

    fn start_transmit(
        &mut self,
        len: usize,
        expects_reply: bool,
        with_break: bool,
        space: usize,
        effects: &mut Effects,
    ) {
        if self.is_sending() || len == 0 {
            return;
        }

        self.tx_size = len.min(DMX_MAX_PACKAGE_SIZE);
        self.tx_cursor = 0;
        self.tx_kind = match (with_break, self.frame[0]) {
            (false, _) => FrameKind::DiscoveryResponse,
            (true, SC_RDM) => FrameKind::Rdm,
            (true, start_code) => FrameKind::Dmx { start_code },
        };
        self.expects_reply = expects_reply;
        self.awaiting_response = false;
        self.rx_enabled = false;
        self.reset_rx();

        push(effects, Effect::DisableRx);
        push(effects, Effect::CancelAlarm);
        push(effects, Effect::Direction(Direction::Transmit));

        if with_break {
            if let TimerAction::Break { alarm_us } = self.tx_timer.begin(self.timing) {
                self.tx = TxState::Break;
                push(effects, Effect::InvertTx(true));
                push(effects, Effect::SetAlarm(alarm_us));
            }
        } else {
            self.tx = TxState::Data;
            push(effects, Effect::EnableTx);
            self.write_chunk(space, effects);
        }
    }

    fn on_alarm(&mut self, space: usize, effects: &mut Effects) {
        match self.tx_timer.on_alarm() {
            TimerAction::Break { alarm_us } => {
                push(effects, Effect::InvertTx(true));
                push(effects, Effect::SetAlarm(alarm_us));
            },
            TimerAction::Mark { alarm_us } => {
                self.tx = TxState::MarkAfterBreak;
                push(effects, Effect::InvertTx(false));
                push(effects, Effect::SetAlarm(alarm_us));
            },
            TimerAction::StartData => {
                self.tx = TxState::Data;
                push(effects, Effect::EnableTx);
                self.write_chunk(space, effects);
            },
            TimerAction::None => {
                if !self.awaiting_response {
                    return;
                }

                self.awaiting_response = false;
                if self.rx == RxState::Idle {
                    trace!("rdm response timed out");
                    push(effects, Effect::Notify(Event::timeout()));
                }
            },
        }
    }

    fn write_chunk(&mut self, space: usize, effects: &mut Effects) {
        let end = (self.tx_cursor + space).min(self.tx_size);
        if end > self.tx_cursor {
            push(
                effects,
                Effect::WriteFifo {
                    start: self.tx_cursor,
                    end,
                },
            );
            self.tx_cursor = end;
        }

        if self.tx_cursor == self.tx_size {
            push(effects, Effect::DisableTxData);
        }
    }

    fn on_tx_done(&mut self, now: u64, effects: &mut Effects) {
        if self.tx != TxState::Data || self.tx_cursor < self.tx_size {
            return;
        }

        self.tx = TxState::Done;
        self.last_frame_at = now;
        self.reset_rx();
        self.rx_enabled = true;

        if self.expects_reply {
            // turnaround has to happen right here to catch the response
            push(effects, Effect::DisableTx);
            push(effects, Effect::ResetRxFifo);
            push(effects, Effect::Direction(Direction::Receive));
            push(effects, Effect::EnableRx);
            push(effects, Effect::SetAlarm(RDM_RESPONSE_TIMEOUT_MICROS));
            self.awaiting_response = true;
        } else {
            push(effects, Effect::DisableTx);
            push(effects, Effect::Direction(Direction::Receive));
            push(effects, Effect::ResetRxFifo);
            push(effects, Effect::EnableRx);
            push(
                effects,
                Effect::Notify(Event {
                    status: EventStatus::Ok,
                    origin: EventOrigin::Transmit,
                    kind: self.tx_kind,
                    size: self.tx_size,
                    timing: None,
                }),
            );
        }
    }

    fn on_break(&mut self, effects: &mut Effects) {
        if self.cursor > 0 && self.after_break && !matches!(self.rx_kind_in_progress(), FrameKind::Rdm)
        {
            // a frame that kept going after its expected end was longer than guessed
            if !self.frame_finished() || self.cursor > self.size_guess {
                self.size_guess = self.cursor;
            }
        }

        self.cursor = 0;
        self.after_break = true;
        self.rx = RxState::InBreak;
        push(effects, Effect::ResetRxFifo);
    }

    fn rx_kind_in_progress(&self) -> FrameKind {
        match self.frame[0] {
            SC_RDM => FrameKind::Rdm,
            start_code => FrameKind::Dmx { start_code },
        }
    }

    fn on_data(&mut self, count: usize, now: u64, effects: &mut Effects) {
        let space = DMX_MAX_PACKAGE_SIZE - self.cursor;
        // the port drops what doesn't fit the frame buffer but still counts it
        let overflow = count > space;
        let count = count.min(space);

        match self.rx {
            RxState::FrameComplete => {
                // trailing slots of a dmx frame that was longer than guessed
                if matches!(self.rx_kind, FrameKind::Dmx { .. }) {
                    self.cursor += count;
                    if overflow {
                        self.finish_oversized(self.rx_kind, now, effects);
                    }
                }
                return;
            },
            RxState::FrameError => return,
            RxState::Idle | RxState::InBreak | RxState::InMarkAfterBreak => {
                self.rx = RxState::ReceivingData;
            },
            RxState::ReceivingData => {},
        }

        self.cursor += count;

        let classification = classify(&self.frame[..self.cursor], self.after_break, self.size_guess);
        match classification {
            Classification::Incomplete if self.cursor == DMX_MAX_PACKAGE_SIZE => {
                let kind = self.rx_kind_in_progress();
                if overflow {
                    self.finish_oversized(kind, now, effects);
                } else {
                    self.finish_frame(EventStatus::Ok, kind, self.cursor, now, effects);
                }
            },
            Classification::Incomplete => {},
            Classification::Malformed { kind } => {
                self.finish_frame(EventStatus::Collision, kind, self.cursor, now, effects);
                self.rx = RxState::FrameError;
            },
            Classification::Complete {
                kind: FrameKind::Rdm,
                size,
            } => {
                let status = if checksum_is_valid(&self.frame[..size]) {
                    EventStatus::Ok
                } else {
                    EventStatus::ChecksumInvalid
                };
                self.finish_frame(status, FrameKind::Rdm, size, now, effects);

                if self.mode == PortMode::Controller
                    || (status == EventStatus::Ok && self.is_request_for_us(size))
                {
                    // a responder has to answer within the responder window, a controller keeps
                    // the response until the task read it
                    self.turn_around(effects);
                }
            },
            Classification::Complete {
                kind: FrameKind::DiscoveryResponse,
                size,
            } => {
                let status = match deserialize_discovery_response(&self.frame[..size]) {
                    Ok(_) => EventStatus::Ok,
                    Err(RdmDeserializationError::WrongChecksum) => EventStatus::ChecksumInvalid,
                    Err(_) => EventStatus::Collision,
                };
                self.finish_frame(status, FrameKind::DiscoveryResponse, size, now, effects);

                if self.mode == PortMode::Controller {
                    self.turn_around(effects);
                }
            },
            Classification::Complete { kind, size } => {
                if overflow {
                    self.finish_oversized(kind, now, effects);
                } else {
                    self.finish_frame(EventStatus::Ok, kind, size, now, effects);
                }
            },
        }
    }

    fn turn_around(&mut self, effects: &mut Effects) {
        self.rx_enabled = false;
        push(effects, Effect::DisableRx);
        push(effects, Effect::Direction(Direction::Transmit));
    }

    /// Reports a frame that didn't fit the frame buffer. The rest of it is ignored.
    fn finish_oversized(&mut self, kind: FrameKind, now: u64, effects: &mut Effects) {
        debug!("frame longer than {} slots", DMX_MAX_PACKAGE_SIZE);
        self.finish_frame(EventStatus::BufferTooSmall, kind, self.cursor, now, effects);
        self.rx = RxState::FrameError;
    }

    fn is_request_for_us(&self, size: usize) -> bool {
        let PortMode::Responder(uid) = self.mode else {
            return false;
        };

        let frame = &self.frame[..size];
        if !rdm_request_expects_response(frame) {
            return false;
        }

        let mut destination = [0u8; 6];
        destination.copy_from_slice(&frame[3..9]);
        PackageAddress::from_bytes(&destination).addresses(uid)
    }

    fn on_line_error(&mut self, error: LineError, count: usize, now: u64, effects: &mut Effects) {
        if !self.frame_finished() {
            let count = count.min(DMX_MAX_PACKAGE_SIZE - self.cursor);
            self.cursor += count;

            let status = match error {
                LineError::Framing => EventStatus::FramingError,
                LineError::Overflow => EventStatus::Overflow,
            };
            let kind = if self.cursor == 0 {
                FrameKind::Empty
            } else if self.after_break {
                self.rx_kind_in_progress()
            } else {
                FrameKind::DiscoveryResponse
            };

            debug!("line error while receiving");
            self.finish_frame(status, kind, self.cursor, now, effects);
            self.rx = RxState::FrameError;
        }

        push(effects, Effect::ResetRxFifo);
    }

    fn finish_frame(
        &mut self,
        status: EventStatus,
        kind: FrameKind,
        size: usize,
        now: u64,
        effects: &mut Effects,
    ) {
        self.rx = RxState::FrameComplete;
        self.rx_kind = kind;
        self.rx_size = size;
        self.last_frame_at = now;

        if self.awaiting_response {
            self.awaiting_response = false;
            push(effects, Effect::CancelAlarm);
        }

        push(
            effects,
            Effect::Notify(Event {
                status,
                origin: EventOrigin::Receive,
                kind,
                size,
                timing: None,
            }),
        );
    }
}

fn push(effects: &mut Effects, effect: Effect) {
    let pushed = effects.push(effect);
    debug_assert!(pushed.is_ok(), "more than MAX_EFFECTS effects in one transition");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command_class::RequestCommandClass;
    use crate::rdm_data::{serialize_discovery_response, RdmData, RdmRequestData};
    use crate::types::DataPack;

    fn responder_uid() -> UniqueIdentifier {
        UniqueIdentifier::new(0x05E0, 0x42).unwrap()
    }

    fn request_frame(destination: PackageAddress) -> heapless::Vec<u8, 257> {
        RdmData::Request(RdmRequestData {
            destination_uid: destination,
            source_uid: UniqueIdentifier::new(0x7FF0, 0).unwrap(),
            transaction_number: 0,
            port_id: 1,
            message_count: 0,
            sub_device: 0,
            command_class: RequestCommandClass::GetCommand,
            parameter_id: crate::pids::DEVICE_INFO,
            parameter_data: DataPack::new(),
        })
        .serialize()
    }

    fn receive(bus: &mut BusState, bytes: &[u8], now: u64) -> Effects {
        bus.rx_window()[..bytes.len()].copy_from_slice(bytes);
        bus.handle(BusEvent::DataReceived { count: bytes.len() }, now)
    }

    fn notified(effects: &Effects) -> Option<Event> {
        effects.iter().find_map(|effect| match effect {
            Effect::Notify(event) => Some(*event),
            _ => None,
        })
    }

    #[test]
    fn test_transmit_with_break() {
        let mut bus = BusState::new(PortMode::Controller, BreakTiming::new(200, 20));
        bus.frame_mut()[..4].copy_from_slice(&[0x00, 1, 2, 3]);

        let effects = bus.handle(
            BusEvent::StartTransmit {
                len: 4,
                expects_reply: false,
                with_break: true,
                space: 128,
            },
            0,
        );
        assert!(effects.contains(&Effect::Direction(Direction::Transmit)));
        assert!(effects.contains(&Effect::InvertTx(true)));
        assert!(effects.contains(&Effect::SetAlarm(200)));
        assert_eq!(bus.tx_state(), TxState::Break);
        assert!(bus.is_sending());

        let effects = bus.handle(BusEvent::Alarm { space: 128 }, 200);
        assert_eq!(
            effects.as_slice(),
            &[Effect::InvertTx(false), Effect::SetAlarm(20)]
        );
        assert_eq!(bus.tx_state(), TxState::MarkAfterBreak);

        let effects = bus.handle(BusEvent::Alarm { space: 2 }, 220);
        assert_eq!(
            effects.as_slice(),
            &[Effect::EnableTx, Effect::WriteFifo { start: 0, end: 2 }]
        );

        let effects = bus.handle(BusEvent::TxReady { space: 128 }, 250);
        assert_eq!(
            effects.as_slice(),
            &[Effect::WriteFifo { start: 2, end: 4 }, Effect::DisableTxData]
        );

        let effects = bus.handle(BusEvent::TxDone, 400);
        let event = notified(&effects).unwrap();
        assert_eq!(event.origin, EventOrigin::Transmit);
        assert_eq!(event.kind, FrameKind::Dmx { start_code: 0 });
        assert_eq!(event.size, 4);
        assert!(effects.contains(&Effect::EnableRx));
        assert!(!bus.is_sending());
        assert_eq!(bus.last_frame_at(), 400);
    }

    #[test]
    fn test_turnaround_after_request() {
        let mut bus = BusState::new(PortMode::Controller, BreakTiming::default());
        let request = request_frame(PackageAddress::Device(responder_uid()));
        bus.frame_mut()[..request.len()].copy_from_slice(&request);

        bus.handle(
            BusEvent::StartTransmit {
                len: request.len(),
                expects_reply: true,
                with_break: false,
                space: 128,
            },
            0,
        );

        let effects = bus.handle(BusEvent::TxDone, 1_000);
        assert_eq!(
            effects.as_slice(),
            &[
                Effect::DisableTx,
                Effect::ResetRxFifo,
                Effect::Direction(Direction::Receive),
                Effect::EnableRx,
                Effect::SetAlarm(RDM_RESPONSE_TIMEOUT_MICROS),
            ]
        );
        assert!(bus.is_awaiting_response());
        assert!(bus.is_receive_enabled());

        // nothing arrives
        let effects = bus.handle(BusEvent::Alarm { space: 128 }, 3_800);
        assert_eq!(notified(&effects), Some(Event::timeout()));
        assert!(!bus.is_awaiting_response());
    }

    #[test]
    fn test_response_cancels_timeout() {
        let mut bus = BusState::new(PortMode::Controller, BreakTiming::default());
        let request = request_frame(PackageAddress::Device(responder_uid()));
        bus.frame_mut()[..request.len()].copy_from_slice(&request);
        bus.handle(
            BusEvent::StartTransmit {
                len: request.len(),
                expects_reply: true,
                with_break: false,
                space: 128,
            },
            0,
        );
        bus.handle(BusEvent::TxDone, 1_000);

        bus.handle(BusEvent::Break, 1_200);
        let effects = receive(&mut bus, &request, 2_400);

        assert!(effects.contains(&Effect::CancelAlarm));
        let event = notified(&effects).unwrap();
        assert_eq!(event.status, EventStatus::Ok);
        assert_eq!(event.kind, FrameKind::Rdm);
        assert_eq!(event.size, request.len());

        // a late alarm does not produce a timeout
        assert!(bus.handle(BusEvent::Alarm { space: 128 }, 3_800).is_empty());
    }

    #[test]
    fn test_controller_turns_around_after_response() {
        let mut bus = BusState::new(PortMode::Controller, BreakTiming::default());
        let request = request_frame(PackageAddress::Device(responder_uid()));
        bus.frame_mut()[..request.len()].copy_from_slice(&request);
        bus.handle(
            BusEvent::StartTransmit {
                len: request.len(),
                expects_reply: true,
                with_break: false,
                space: 128,
            },
            0,
        );
        bus.handle(BusEvent::TxDone, 1_000);
        assert!(bus.is_receive_enabled());

        bus.handle(BusEvent::Break, 1_200);
        let effects = receive(&mut bus, &request, 2_400);
        assert!(notified(&effects).unwrap().is_ok());
        assert!(effects.contains(&Effect::DisableRx));
        assert!(effects.contains(&Effect::Direction(Direction::Transmit)));
        assert!(!bus.is_receive_enabled());
        assert_eq!(bus.rx_size(), request.len());

        // receiving again starts a new frame
        let effects = bus.handle(BusEvent::ReceiveRequested, 3_000);
        assert!(effects.contains(&Effect::EnableRx));
        assert!(effects.contains(&Effect::Direction(Direction::Receive)));
        assert!(bus.is_receive_enabled());

        let response = serialize_discovery_response(responder_uid(), 7);
        let effects = receive(&mut bus, &response, 3_500);
        assert_eq!(
            notified(&effects).unwrap().kind,
            FrameKind::DiscoveryResponse
        );
        assert!(effects.contains(&Effect::DisableRx));
        assert!(effects.contains(&Effect::Direction(Direction::Transmit)));
        assert!(!bus.is_receive_enabled());
    }

    #[test]
    fn test_oversized_frame() {
        let mut bus = BusState::new(PortMode::Responder(responder_uid()), BreakTiming::default());

        // everything in one go, the port counts the slots it had to drop
        bus.handle(BusEvent::Break, 0);
        bus.rx_window().fill(0x00);
        let effects = bus.handle(BusEvent::DataReceived { count: 600 }, 100);
        let event = notified(&effects).unwrap();
        assert_eq!(event.status, EventStatus::BufferTooSmall);
        assert_eq!(event.kind, FrameKind::Dmx { start_code: 0 });
        assert_eq!(event.size, DMX_MAX_PACKAGE_SIZE);
        assert_eq!(bus.rx_state(), RxState::FrameError);
        assert!(notified(&bus.handle(BusEvent::DataReceived { count: 16 }, 200)).is_none());

        // the frame buffer fills up exactly, the extra slots arrive afterward
        bus.handle(BusEvent::Break, 30_000);
        let effects = receive(&mut bus, &[0x00; DMX_MAX_PACKAGE_SIZE], 30_100);
        assert!(notified(&effects).unwrap().is_ok());

        let effects = bus.handle(BusEvent::DataReceived { count: 87 }, 30_200);
        let event = notified(&effects).unwrap();
        assert_eq!(event.status, EventStatus::BufferTooSmall);
        assert_eq!(event.size, DMX_MAX_PACKAGE_SIZE);
        assert!(notified(&bus.handle(BusEvent::DataReceived { count: 16 }, 30_300)).is_none());
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "more than MAX_EFFECTS")]
    fn test_effects_never_dropped() {
        let mut effects = Effects::new();
        for _ in 0..=MAX_EFFECTS {
            push(&mut effects, Effect::ResetRxFifo);
        }
    }

    #[test]
    fn test_rdm_checksum_invalid() {
        let mut bus = BusState::new(PortMode::Controller, BreakTiming::default());
        let mut request = request_frame(PackageAddress::Broadcast);
        request[10] ^= 0xFF;

        bus.handle(BusEvent::Break, 0);
        let effects = receive(&mut bus, &request[..10], 100);
        assert_eq!(notified(&effects), None);

        let effects = receive(&mut bus, &request[10..], 200);
        assert_eq!(
            notified(&effects).unwrap().status,
            EventStatus::ChecksumInvalid
        );
        assert_eq!(bus.rx_state(), RxState::FrameComplete);
    }

    #[test]
    fn test_responder_turns_around_for_own_requests() {
        let mut bus = BusState::new(PortMode::Responder(responder_uid()), BreakTiming::default());

        let request = request_frame(PackageAddress::Device(responder_uid()));
        bus.handle(BusEvent::Break, 0);
        let effects = receive(&mut bus, &request, 100);
        assert!(effects.contains(&Effect::DisableRx));
        assert!(effects.contains(&Effect::Direction(Direction::Transmit)));
        assert!(!bus.is_receive_enabled());

        let effects = bus.handle(BusEvent::ReceiveRequested, 200);
        assert!(effects.contains(&Effect::EnableRx));
        assert!(bus.is_receive_enabled());

        // broadcasts are not answered, requests to others are not ours
        for destination in [
            PackageAddress::Broadcast,
            PackageAddress::Device(UniqueIdentifier::new(0x05E0, 0x43).unwrap()),
        ] {
            let request = request_frame(destination);
            bus.handle(BusEvent::Break, 1_000);
            let effects = receive(&mut bus, &request, 1_100);
            assert!(notified(&effects).is_some());
            assert!(!effects.contains(&Effect::DisableRx));
        }
    }

    #[test]
    fn test_dmx_size_guess() {
        let mut bus = BusState::new(PortMode::Responder(responder_uid()), BreakTiming::default());
        assert_eq!(bus.size_guess(), DMX_MAX_PACKAGE_SIZE);

        // the first frame is shorter than the guess and never completes
        bus.handle(BusEvent::Break, 0);
        assert!(notified(&receive(&mut bus, &[0x00; 25], 100)).is_none());

        bus.handle(BusEvent::Break, 2_000);
        assert_eq!(bus.size_guess(), 25);

        let effects = receive(&mut bus, &[0x00; 25], 2_100);
        let event = notified(&effects).unwrap();
        assert_eq!(event.kind, FrameKind::Dmx { start_code: 0 });
        assert_eq!(event.size, 25);

        // a longer frame completes at the guess, the trailing slots update it
        bus.handle(BusEvent::Break, 4_000);
        receive(&mut bus, &[0x00; 25], 4_100);
        receive(&mut bus, &[0x00; 5], 4_200);
        bus.handle(BusEvent::Break, 6_000);
        assert_eq!(bus.size_guess(), 30);
    }

    #[test]
    fn test_discovery_response_with_preamble() {
        let uid = UniqueIdentifier::new(0x05E0, 0x1234).unwrap();

        for preamble_length in [0, 3, 7] {
            let mut bus = BusState::new(PortMode::Controller, BreakTiming::default());
            bus.handle(BusEvent::ReceiveRequested, 0);

            let response = serialize_discovery_response(uid, preamble_length);
            let (first, rest) = response.split_at(5);
            assert!(notified(&receive(&mut bus, first, 10)).is_none());

            let event = notified(&receive(&mut bus, rest, 20)).unwrap();
            assert_eq!(event.status, EventStatus::Ok);
            assert_eq!(event.kind, FrameKind::DiscoveryResponse);
            assert_eq!(event.size, response.len());
        }
    }

    #[test]
    fn test_line_error_unblocks_receiver() {
        let mut bus = BusState::new(PortMode::Controller, BreakTiming::default());
        bus.handle(BusEvent::Break, 0);
        receive(&mut bus, &[SC_RDM, 0x01], 50);

        bus.rx_window()[0] = 0x18;
        let effects = bus.handle(
            BusEvent::LineError {
                error: LineError::Framing,
                count: 1,
            },
            100,
        );

        let event = notified(&effects).unwrap();
        assert_eq!(event.status, EventStatus::FramingError);
        assert_eq!(event.size, 3);
        assert!(effects.contains(&Effect::ResetRxFifo));
        assert_eq!(bus.rx_state(), RxState::FrameError);

        // a second error for the same frame stays silent
        let effects = bus.handle(
            BusEvent::LineError {
                error: LineError::Overflow,
                count: 0,
            },
            110,
        );
        assert_eq!(notified(&effects), None);
    }

    #[test]
    fn test_collision_during_discovery() {
        let mut bus = BusState::new(PortMode::Controller, BreakTiming::default());
        bus.frame_mut()[0] = SC_RDM;
        bus.handle(
            BusEvent::StartTransmit {
                len: 38,
                expects_reply: true,
                with_break: false,
                space: 128,
            },
            0,
        );
        bus.handle(BusEvent::TxDone, 2_000);

        let effects = bus.handle(BusEvent::Collision, 2_100);
        assert_eq!(notified(&effects).unwrap().status, EventStatus::Collision);
        assert!(effects.contains(&Effect::CancelAlarm));
    }
}

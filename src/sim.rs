//! A simulated RS485 line for host tests.
//!
//! [SimUart] and [SimTimer] share one [Wire] that runs on virtual time. Every
//! [DmxWait::pause] of a [SimWait] advances the wire to the next scheduled thing (a transmitted
//! byte leaving the shift register, the timer alarm, a byte or break arriving from the simulated
//! responder) and calls the interrupt entry points of the port like the hardware would.
//!
//! Edges are always scheduled and delivered by the next step, never from inside a uart call,
//! since uart calls run while the port is borrowed.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::consts::{DMX_SLOT_MICROS, RDM_BREAK_MICROS, RDM_MAB_MICROS, RDM_MAX_PREAMBLE_LENGTH};
use crate::dmx_uart_driver::{DmxTimer, DmxUart, DmxWait, UartInterrupts};
use crate::port::DmxPort;
use crate::rdm_data::{serialize_discovery_response, RdmData};
use crate::rdm_responder::{
    RdmAnswer, RdmResponderConfig, RdmResponderHandlerFunc, RdmResponderPackageHandler,
};
use crate::timing::LineLevel;

const FIFO_SIZE: usize = 128;
const TX_THRESHOLD: usize = 32;
const IDLE_STEP_MICROS: u64 = 10;

#[derive(Debug, Eq, PartialEq)]
pub enum SimError {
    AttachFailed,
    NotAttached,
    FifoFull,
}

impl core::fmt::Display for SimError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// A frame that left the uart.
#[derive(Debug, Clone)]
pub struct SentFrame {
    pub bytes: Vec<u8>,
    pub with_break: bool,
    /// Start of the break, or of the first byte for frames without a break.
    pub started_at: u64,
    pub finished_at: u64,
    pub break_len: Option<u64>,
    pub mab_len: Option<u64>,
}

/// What the simulated device on the other end sends back.
#[derive(Debug, Clone)]
pub struct Reply {
    /// Microseconds between the end of the frame and the start of the reply.
    pub delay: u64,
    pub with_break: bool,
    pub bytes: Vec<u8>,
}

impl Reply {
    pub fn rdm(bytes: &[u8]) -> Self {
        Self {
            delay: 0,
            with_break: true,
            bytes: bytes.to_vec(),
        }
    }
}

type Responder = Box<dyn FnMut(&SentFrame) -> Option<Reply> + Send>;

#[derive(Debug, Copy, Clone)]
enum Incoming {
    Byte(u8),
    Break,
    Edge(LineLevel),
}

#[derive(Default)]
struct WireState {
    now: u64,
    uart_attached: bool,
    timer_attached: bool,
    fail_uart_attach: bool,
    fail_timer_attach: bool,
    baud_rate: u32,

    rts: bool,
    inverted: bool,
    enabled: u8,
    pending: u8,

    rx_fifo: VecDeque<u8>,
    tx_fifo: VecDeque<u8>,
    shifting: Option<(u8, u64)>,
    current: Vec<u8>,
    frame_started_at: Option<u64>,
    break_at: Option<u64>,
    break_len: Option<u64>,
    mark_at: Option<u64>,
    mab_len: Option<u64>,

    alarm_at: Option<u64>,
    schedule: Vec<(u64, Incoming)>,

    sent: Vec<SentFrame>,
    replies_done: Vec<u64>,
    lost: usize,
    responder: Option<Responder>,
}

impl WireState {
    fn set_pending(&mut self, interrupts: UartInterrupts) {
        self.pending |= interrupts.bits();
    }

    fn update_tx_threshold(&mut self) {
        let tx_data = UartInterrupts::new().with_tx_data(true);
        if self.tx_fifo.len() < TX_THRESHOLD {
            self.set_pending(tx_data);
        } else {
            self.pending &= !tx_data.bits();
        }
    }

    fn start_shifting(&mut self) {
        if self.shifting.is_some() {
            return;
        }

        let Some(byte) = self.tx_fifo.pop_front() else {
            return;
        };

        if self.current.is_empty() {
            if self.frame_started_at.is_none() {
                self.frame_started_at = Some(self.now);
            }
            self.mab_len = self.mark_at.map(|mark_at| self.now - mark_at);
            self.schedule.push((self.now, Incoming::Edge(LineLevel::Low)));
            self.schedule.push((self.now + 4, Incoming::Edge(LineLevel::High)));
        }

        self.shifting = Some((byte, self.now + DMX_SLOT_MICROS as u64));
        self.update_tx_threshold();
    }

    fn finish_byte(&mut self) {
        let Some((byte, _)) = self.shifting.take() else {
            return;
        };
        self.current.push(byte);

        if !self.tx_fifo.is_empty() {
            self.start_shifting();
            return;
        }

        self.set_pending(UartInterrupts::new().with_tx_done(true));

        let frame = SentFrame {
            bytes: core::mem::take(&mut self.current),
            with_break: self.break_len.is_some(),
            started_at: self.frame_started_at.take().unwrap_or(self.now),
            finished_at: self.now,
            break_len: self.break_len.take(),
            mab_len: self.mab_len.take(),
        };
        self.mark_at = None;

        let reply = self
            .responder
            .as_mut()
            .and_then(|responder| responder(&frame));
        self.sent.push(frame);

        if let Some(reply) = reply {
            self.schedule_reply(reply);
        }
    }

    fn schedule_reply(&mut self, reply: Reply) {
        let mut start = self.now + reply.delay;

        if reply.with_break {
            self.schedule.push((start, Incoming::Edge(LineLevel::Low)));
            start += RDM_BREAK_MICROS as u64;
            self.schedule.push((start, Incoming::Edge(LineLevel::High)));
            self.schedule.push((start, Incoming::Break));
            start += RDM_MAB_MICROS as u64;
        }

        self.schedule.push((start, Incoming::Edge(LineLevel::Low)));
        self.schedule.push((start + 4, Incoming::Edge(LineLevel::High)));

        let mut done = start;
        for (index, byte) in reply.bytes.iter().enumerate() {
            done = start + DMX_SLOT_MICROS as u64 * (index as u64 + 1);
            self.schedule.push((done, Incoming::Byte(*byte)));
        }
        self.replies_done.push(done);
    }

    fn next_time(&self) -> u64 {
        let scheduled = self.schedule.iter().map(|(at, _)| *at).min();
        let shifted = self.shifting.map(|(_, done)| done);
        let alarm = if self.timer_attached {
            self.alarm_at
        } else {
            None
        };

        [scheduled, shifted, alarm]
            .into_iter()
            .flatten()
            .min()
            .unwrap_or(self.now + IDLE_STEP_MICROS)
            .max(self.now)
    }

    fn receive(&mut self, incoming: Incoming, edges: &mut Vec<LineLevel>) {
        match incoming {
            Incoming::Edge(level) => edges.push(level),
            // the transceiver only passes the line through while receiving
            Incoming::Byte(_) | Incoming::Break if self.rts => self.lost += 1,
            Incoming::Byte(byte) => {
                if self.rx_fifo.len() < FIFO_SIZE {
                    self.rx_fifo.push_back(byte);
                    self.set_pending(UartInterrupts::new().with_rx_data(true));
                } else {
                    self.set_pending(UartInterrupts::new().with_rx_overflow(true));
                }
            },
            Incoming::Break => self.set_pending(UartInterrupts::new().with_rx_break(true)),
        }
    }
}

/// The line shared by the simulated uart and timer.
#[derive(Clone)]
pub struct Wire {
    state: Arc<Mutex<WireState>>,
    step: Arc<Mutex<()>>,
}

impl Wire {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(WireState::default())),
            step: Arc::new(Mutex::new(())),
        }
    }

    fn state(&self) -> MutexGuard<'_, WireState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn uart(&self) -> SimUart {
        SimUart { wire: self.clone() }
    }

    pub fn timer(&self) -> SimTimer {
        SimTimer { wire: self.clone() }
    }

    pub fn waiter<'a>(&self, port: &'a DmxPort<SimUart, SimTimer>) -> SimWait<'a> {
        SimWait {
            wire: self.clone(),
            port,
        }
    }

    pub fn fail_uart_attach(&self) {
        self.state().fail_uart_attach = true;
    }

    pub fn fail_timer_attach(&self) {
        self.state().fail_timer_attach = true;
    }

    pub fn uart_attached(&self) -> bool {
        self.state().uart_attached
    }

    pub fn timer_attached(&self) -> bool {
        self.state().timer_attached
    }

    pub fn is_transmitting(&self) -> bool {
        self.state().rts
    }

    pub fn baud_rate(&self) -> u32 {
        self.state().baud_rate
    }

    pub fn now(&self) -> u64 {
        self.state().now
    }

    /// Sets the device on the other end of the line. It is called with every frame that was
    /// sent, from inside the simulation, so it must not touch the port.
    pub fn set_responder(
        &self,
        responder: impl FnMut(&SentFrame) -> Option<Reply> + Send + 'static,
    ) {
        self.state().responder = Some(Box::new(responder));
    }

    /// Schedules an incoming frame that starts `reply.delay` from now.
    pub fn inject(&self, reply: Reply) {
        self.state().schedule_reply(reply);
    }

    pub fn sent(&self) -> Vec<SentFrame> {
        self.state().sent.clone()
    }

    /// Times at which the last byte of each reply or injected frame arrived.
    pub fn replies_done(&self) -> Vec<u64> {
        self.state().replies_done.clone()
    }

    /// Bytes that arrived while the transceiver was driving the line.
    pub fn lost(&self) -> usize {
        self.state().lost
    }

    fn step(&self, port: &DmxPort<SimUart, SimTimer>) {
        let _step = self.step.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut edges = Vec::new();
        let fire_alarm = {
            let mut state = self.state();
            let target = state.next_time();
            state.now = target;

            if matches!(state.shifting, Some((_, done)) if done <= target) {
                state.finish_byte();
            }

            let fire_alarm = state.timer_attached && state.alarm_at.is_some_and(|at| at <= target);
            if fire_alarm {
                state.alarm_at = None;
            }

            let mut due = Vec::new();
            state.schedule.retain(|&(at, incoming)| {
                if at <= target {
                    due.push((at, incoming));
                    false
                } else {
                    true
                }
            });
            due.sort_by_key(|(at, _)| *at);
            for (_, incoming) in due {
                state.receive(incoming, &mut edges);
            }

            fire_alarm
        };

        for level in edges {
            port.on_edge(level);
        }

        if fire_alarm {
            port.on_timer_interrupt();
        }

        let uart_interrupt = {
            let state = self.state();
            state.pending & state.enabled != 0
        };
        if uart_interrupt {
            port.on_uart_interrupt();
        }
    }
}

pub struct SimUart {
    wire: Wire,
}

impl DmxUart for SimUart {
    type Error = SimError;

    fn attach(&mut self) -> Result<(), Self::Error> {
        let mut state = self.wire.state();
        if state.fail_uart_attach {
            return Err(SimError::AttachFailed);
        }

        state.uart_attached = true;
        Ok(())
    }

    fn detach(&mut self) -> Result<(), Self::Error> {
        let mut state = self.wire.state();
        if !state.uart_attached {
            return Err(SimError::NotAttached);
        }

        state.uart_attached = false;
        state.enabled = 0;
        Ok(())
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<(), Self::Error> {
        self.wire.state().baud_rate = baud_rate;
        Ok(())
    }

    fn read_fifo(&mut self, buffer: &mut [u8]) -> Result<usize, Self::Error> {
        let mut state = self.wire.state();
        let mut count = 0;

        while count < buffer.len() {
            let Some(byte) = state.rx_fifo.pop_front() else {
                break;
            };
            buffer[count] = byte;
            count += 1;
        }

        Ok(count)
    }

    fn tx_fifo_space(&mut self) -> usize {
        FIFO_SIZE - self.wire.state().tx_fifo.len()
    }

    fn write_fifo(&mut self, data: &[u8]) -> Result<(), Self::Error> {
        let mut state = self.wire.state();
        if state.tx_fifo.len() + data.len() > FIFO_SIZE {
            return Err(SimError::FifoFull);
        }

        state.tx_fifo.extend(data.iter().copied());
        state.start_shifting();
        state.update_tx_threshold();

        Ok(())
    }

    fn reset_rx_fifo(&mut self) -> Result<(), Self::Error> {
        self.wire.state().rx_fifo.clear();
        Ok(())
    }

    fn reset_tx_fifo(&mut self) -> Result<(), Self::Error> {
        self.wire.state().tx_fifo.clear();
        Ok(())
    }

    fn interrupt_status(&mut self) -> UartInterrupts {
        let state = self.wire.state();
        UartInterrupts::from_bits(state.pending & state.enabled)
    }

    fn enable_interrupts(&mut self, mask: UartInterrupts) {
        self.wire.state().enabled |= mask.bits();
    }

    fn disable_interrupts(&mut self, mask: UartInterrupts) {
        self.wire.state().enabled &= !mask.bits();
    }

    fn clear_interrupts(&mut self, mask: UartInterrupts) {
        let mut state = self.wire.state();
        state.pending &= !mask.bits();

        // level triggered like the hardware
        if !state.rx_fifo.is_empty() {
            state.set_pending(UartInterrupts::new().with_rx_data(true));
        }
        if mask.tx_data() {
            state.update_tx_threshold();
        }
    }

    fn set_rts(&mut self, transmit: bool) -> Result<(), Self::Error> {
        self.wire.state().rts = transmit;
        Ok(())
    }

    fn invert_tx(&mut self, invert: bool) -> Result<(), Self::Error> {
        let mut state = self.wire.state();
        if state.inverted == invert {
            return Ok(());
        }
        state.inverted = invert;

        let now = state.now;
        if invert {
            state.break_at = Some(now);
            state.frame_started_at = Some(now);
            state.schedule.push((now, Incoming::Edge(LineLevel::Low)));
        } else {
            state.break_len = state.break_at.take().map(|break_at| now - break_at);
            state.mark_at = Some(now);
            state.schedule.push((now, Incoming::Edge(LineLevel::High)));
        }

        Ok(())
    }
}

pub struct SimTimer {
    wire: Wire,
}

impl DmxTimer for SimTimer {
    type Error = SimError;

    fn attach(&mut self) -> Result<(), Self::Error> {
        let mut state = self.wire.state();
        if state.fail_timer_attach {
            return Err(SimError::AttachFailed);
        }

        state.timer_attached = true;
        Ok(())
    }

    fn detach(&mut self) -> Result<(), Self::Error> {
        let mut state = self.wire.state();
        if !state.timer_attached {
            return Err(SimError::NotAttached);
        }

        state.timer_attached = false;
        state.alarm_at = None;
        Ok(())
    }

    fn now_micros(&mut self) -> u64 {
        self.wire.state().now
    }

    fn set_alarm(&mut self, micros: u32) -> Result<(), Self::Error> {
        let mut state = self.wire.state();
        state.alarm_at = Some(state.now + micros as u64);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), Self::Error> {
        self.wire.state().alarm_at = None;
        Ok(())
    }
}

/// Advances the simulation while a task waits.
pub struct SimWait<'a> {
    wire: Wire,
    port: &'a DmxPort<SimUart, SimTimer>,
}

impl DmxWait for SimWait<'_> {
    fn pause(&mut self) {
        self.wire.step(self.port);
    }
}

struct NoUserParameters;

impl RdmResponderHandlerFunc for NoUserParameters {
    type Error = core::convert::Infallible;
}

/// Responders on the other end of the line, each answering from its own parameter dictionary.
/// Replies of more than one device at once garble each other.
pub fn rdm_devices(
    configs: impl IntoIterator<Item = RdmResponderConfig>,
) -> impl FnMut(&SentFrame) -> Option<Reply> + Send + 'static {
    let mut devices: Vec<RdmResponderPackageHandler<'static>> = configs
        .into_iter()
        .map(|config| {
            let arena: &'static mut [u8] = Box::leak(Box::new([0u8; 128]));
            RdmResponderPackageHandler::new(config, arena).unwrap()
        })
        .collect();

    move |frame| {
        let Ok(RdmData::Request(request)) = RdmData::deserialize(&frame.bytes) else {
            return None;
        };

        let mut reply: Option<Reply> = None;
        for device in devices.iter_mut() {
            let answer = match device.handle_rdm_request(request.clone(), &mut NoUserParameters) {
                Ok(answer) => answer,
                Err(never) => match never {},
            };
            let next = match answer {
                RdmAnswer::Response(response) => {
                    Reply::rdm(&RdmData::Response(response).serialize())
                },
                RdmAnswer::DiscoveryResponse(uid) => Reply {
                    delay: 0,
                    with_break: false,
                    bytes: serialize_discovery_response(uid, RDM_MAX_PREAMBLE_LENGTH).to_vec(),
                },
                RdmAnswer::NoResponse => continue,
            };

            reply = Some(match reply {
                None => next,
                Some(mut previous) => {
                    for (byte, other) in previous.bytes.iter_mut().zip(next.bytes) {
                        *byte ^= other;
                    }
                    previous
                },
            });
        }

        reply
    }
}

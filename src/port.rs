//! The context of one physical port.
//!
//! A [DmxPort] owns the uart, the timer, the [BusState] and the timing measurement. The interrupt
//! handlers of the target forward to [DmxPort::on_uart_interrupt], [DmxPort::on_timer_interrupt]
//! and, if edge capture is available, [DmxPort::on_edge]. Tasks get exclusive access to the port
//! through [DmxPort::lock], which hands out a [Transaction] in the order the tasks asked for it.
//!
//! Everything the interrupt handlers touch lives behind a critical section mutex. Completed frames
//! are reported to the waiting task through a single slot signal, a newer event replaces an event
//! that was not picked up yet.

use core::cell::{Cell, RefCell};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::signal::Signal;

use crate::bus::{
    BusEvent, BusState, Direction, Effect, Effects, Event, EventOrigin, FrameKind, LineError,
    PortMode,
};
use crate::consts::{DMX_BAUD, RDM_BREAK_MICROS, RDM_MAB_MICROS};
use crate::dmx_driver::PortError;
use crate::dmx_transaction::Transaction;
use crate::dmx_uart_driver::{DmxTimer, DmxUart, DmxWait, UartInterrupts};
use crate::timing::{
    clamp_baud_rate, BreakMeasurement, BreakTiming, EdgeSniffer, LastTransfer, LineLevel,
    UartBreakEstimator,
};

/// The error type of a port on the uart `U` and the timer `T`.
pub type DmxPortError<U, T> = PortError<<U as DmxUart>::Error, <T as DmxTimer>::Error>;

#[derive(Debug, Copy, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DmxConfig {
    pub baud_rate: u32,
    /// Break length in microseconds.
    pub break_len: u32,
    /// Mark after break length in microseconds.
    pub mab_len: u32,
    pub mode: PortMode,
    /// Measure the break and mark after break from the edges passed to [DmxPort::on_edge]. Without
    /// it they are estimated from the uart interrupts.
    pub sniffer: bool,
}

impl Default for DmxConfig {
    fn default() -> Self {
        Self {
            baud_rate: DMX_BAUD,
            break_len: RDM_BREAK_MICROS,
            mab_len: RDM_MAB_MICROS,
            mode: PortMode::Controller,
            sniffer: false,
        }
    }
}

/// Returned if [DmxPort::install] failed. Everything that was attached is detached again and the
/// hardware is handed back.
pub struct InstallError<U: DmxUart, T: DmxTimer> {
    pub uart: U,
    pub timer: T,
    pub error: DmxPortError<U, T>,
}

impl<U: DmxUart, T: DmxTimer> core::fmt::Debug for InstallError<U, T>
where
    U::Error: core::fmt::Debug,
    T::Error: core::fmt::Debug,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("InstallError")
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

impl<U: DmxUart, T: DmxTimer> core::fmt::Display for InstallError<U, T>
where
    U::Error: core::fmt::Display,
    T::Error: core::fmt::Display,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "installing the port failed: {}", self.error)
    }
}

#[cfg(feature = "std")]
impl<U: DmxUart, T: DmxTimer> std::error::Error for InstallError<U, T>
where
    U::Error: core::fmt::Debug + core::fmt::Display,
    T::Error: core::fmt::Debug + core::fmt::Display,
{
}

/// The part of the port shared with the interrupt handlers.
pub(crate) struct PortInner<U, T> {
    pub(crate) uart: U,
    pub(crate) timer: T,
    pub(crate) bus: BusState,
    sniffer: EdgeSniffer,
    estimator: UartBreakEstimator,
    sniffer_enabled: bool,
    pub(crate) enabled: bool,
    baud_rate: u32,
    /// Transaction number of the next request.
    pub(crate) transaction_number: u8,
    pub(crate) last_transfer: LastTransfer,
}

impl<U: DmxUart, T: DmxTimer> PortInner<U, T> {
    pub(crate) fn now(&mut self) -> u64 {
        self.timer.now_micros()
    }

    /// Runs a bus event from task context.
    pub(crate) fn dispatch(
        &mut self,
        event: BusEvent,
    ) -> (Option<Event>, Result<(), DmxPortError<U, T>>) {
        let now = self.timer.now_micros();
        let effects = self.bus.handle(event, now);
        self.apply_all(effects)
    }

    fn apply_all(&mut self, effects: Effects) -> (Option<Event>, Result<(), DmxPortError<U, T>>) {
        let mut notification = None;
        let mut result = Ok(());

        for effect in effects {
            match self.apply(effect) {
                Ok(Some(event)) => notification = Some(event),
                Ok(None) => {},
                Err(error) => {
                    if result.is_ok() {
                        result = Err(error);
                    }
                },
            }
        }

        (notification, result)
    }

    fn apply(&mut self, effect: Effect) -> Result<Option<Event>, DmxPortError<U, T>> {
        match effect {
            Effect::ResetRxFifo => self.uart.reset_rx_fifo().map_err(PortError::Uart)?,
            Effect::EnableRx => {
                self.uart.clear_interrupts(UartInterrupts::rx_all());
                self.uart.enable_interrupts(UartInterrupts::rx_all());
            },
            Effect::DisableRx => self.uart.disable_interrupts(UartInterrupts::rx_all()),
            Effect::EnableTx => {
                self.uart.clear_interrupts(UartInterrupts::tx_all());
                self.uart.enable_interrupts(UartInterrupts::tx_all());
            },
            Effect::DisableTxData => self
                .uart
                .disable_interrupts(UartInterrupts::new().with_tx_data(true)),
            Effect::DisableTx => self.uart.disable_interrupts(UartInterrupts::tx_all()),
            Effect::Direction(direction) => self
                .uart
                .set_rts(direction == Direction::Transmit)
                .map_err(PortError::Uart)?,
            Effect::InvertTx(invert) => self.uart.invert_tx(invert).map_err(PortError::Uart)?,
            Effect::SetAlarm(micros) => self.timer.set_alarm(micros).map_err(PortError::Timer)?,
            Effect::CancelAlarm => self.timer.stop().map_err(PortError::Timer)?,
            Effect::WriteFifo { start, end } => self
                .uart
                .write_fifo(&self.bus.frame()[start..end])
                .map_err(PortError::Uart)?,
            Effect::Notify(mut event) => {
                if event.origin == EventOrigin::Receive
                    && matches!(event.kind, FrameKind::Dmx { .. } | FrameKind::Rdm)
                {
                    event.timing = self.latest_timing();
                }

                return Ok(Some(event));
            },
        }

        Ok(None)
    }

    fn latest_timing(&self) -> Option<BreakMeasurement> {
        if self.sniffer_enabled {
            self.sniffer.latest()
        } else {
            self.estimator.latest()
        }
    }

    fn run(&mut self, event: BusEvent, now: u64, notification: &mut Option<Event>) {
        let effects = self.bus.handle(event, now);
        let (event, result) = self.apply_all(effects);

        if event.is_some() {
            *notification = event;
        }

        if result.is_err() {
            warn!("hardware error in dmx interrupt handler");
        }
    }

    /// Moves the receive fifo into the frame buffer. Bytes that don't fit are dropped but still
    /// counted, so the bus can tell the frame was too long.
    fn drain_rx(&mut self) -> usize {
        let mut count = match self.uart.read_fifo(self.bus.rx_window()) {
            Ok(count) => count,
            Err(_) => {
                warn!("reading the receive fifo failed");
                0
            },
        };

        let mut discard = [0u8; 16];
        while let Ok(read @ 1..) = self.uart.read_fifo(&mut discard) {
            count += read;
        }

        count
    }

    fn handle_uart_interrupt(&mut self) -> Option<Event> {
        let pending = self.uart.interrupt_status();
        if pending.is_empty() {
            return None;
        }
        self.uart.clear_interrupts(pending);

        let now = self.timer.now_micros();
        let mut notification = None;

        if pending.rx_framing_error() || pending.rx_overflow() {
            let count = self.drain_rx();
            let error = if pending.rx_overflow() {
                LineError::Overflow
            } else {
                LineError::Framing
            };
            self.run(BusEvent::LineError { error, count }, now, &mut notification);
        } else if pending.rx_data() {
            let count = self.drain_rx();
            if count > 0 {
                self.estimator.on_data(now, count);
                self.run(BusEvent::DataReceived { count }, now, &mut notification);
            }
        }

        if pending.rx_break() {
            trace!("break received");
            self.estimator.on_break(now);
            self.run(BusEvent::Break, now, &mut notification);
        }

        if pending.rx_collision() {
            self.run(BusEvent::Collision, now, &mut notification);
        }

        if pending.tx_data() {
            let space = self.uart.tx_fifo_space();
            self.run(BusEvent::TxReady { space }, now, &mut notification);
        }

        if pending.tx_done() {
            self.run(BusEvent::TxDone, now, &mut notification);
        }

        notification
    }

    fn handle_alarm(&mut self) -> Option<Event> {
        let now = self.timer.now_micros();
        let space = self.uart.tx_fifo_space();
        let mut notification = None;

        self.run(BusEvent::Alarm { space }, now, &mut notification);

        notification
    }

    fn handle_edge(&mut self, level: LineLevel) -> Option<Event> {
        let now = self.timer.now_micros();
        let mut notification = None;

        if self.sniffer_enabled {
            self.sniffer.on_edge(level, now);
        }

        if level == LineLevel::High {
            self.run(BusEvent::LineRising, now, &mut notification);
        }

        notification
    }
}

#[derive(Debug, Copy, Clone, Default)]
struct Tickets {
    next: u32,
    serving: u32,
}

/// One DMX512/RDM port.
pub struct DmxPort<U: DmxUart, T: DmxTimer> {
    inner: Mutex<CriticalSectionRawMutex, RefCell<PortInner<U, T>>>,
    event: Signal<CriticalSectionRawMutex, Event>,
    tickets: Mutex<CriticalSectionRawMutex, Cell<Tickets>>,
}

impl<U: DmxUart, T: DmxTimer> DmxPort<U, T> {
    /// Attaches the uart and the timer and creates the port. The port starts disabled.
    ///
    /// If anything fails the parts that were already attached are detached again.
    pub fn install(mut uart: U, mut timer: T, config: DmxConfig) -> Result<Self, InstallError<U, T>> {
        if let Err(error) = uart.attach() {
            return Err(InstallError {
                uart,
                timer,
                error: PortError::Uart(error),
            });
        }

        let baud_rate = clamp_baud_rate(config.baud_rate);
        if let Err(error) = uart.set_baud_rate(baud_rate) {
            if uart.detach().is_err() {
                warn!("detaching the uart failed");
            }

            return Err(InstallError {
                uart,
                timer,
                error: PortError::Uart(error),
            });
        }
        uart.disable_interrupts(UartInterrupts::rx_all().union(UartInterrupts::tx_all()));

        if let Err(error) = timer.attach() {
            if uart.detach().is_err() {
                warn!("detaching the uart failed");
            }

            return Err(InstallError {
                uart,
                timer,
                error: PortError::Timer(error),
            });
        }

        debug!("dmx port installed");

        Ok(Self {
            inner: Mutex::new(RefCell::new(PortInner {
                uart,
                timer,
                bus: BusState::new(
                    config.mode,
                    BreakTiming::new(config.break_len, config.mab_len),
                ),
                sniffer: EdgeSniffer::new(),
                estimator: UartBreakEstimator::new(),
                sniffer_enabled: config.sniffer,
                enabled: false,
                baud_rate,
                transaction_number: 0,
                last_transfer: LastTransfer::Idle,
            })),
            event: Signal::new(),
            tickets: Mutex::new(Cell::new(Tickets::default())),
        })
    }

    /// Starts receiving.
    pub fn enable(&self) -> Result<(), DmxPortError<U, T>> {
        let result = self.with_inner(|inner| {
            if inner.enabled {
                return Ok(());
            }

            inner.uart.reset_tx_fifo().map_err(PortError::Uart)?;
            inner.enabled = true;
            let effects = inner.bus.start();
            inner.apply_all(effects).1
        });

        self.event.reset();
        result
    }

    /// Stops all interrupts. Fails while a frame is being sent.
    pub fn disable(&self) -> Result<(), DmxPortError<U, T>> {
        self.with_inner(|inner| {
            if !inner.enabled {
                return Ok(());
            }

            if inner.bus.is_sending() {
                return Err(PortError::StillSending);
            }

            inner.enabled = false;
            let effects = inner.bus.stop();
            inner.apply_all(effects).1
        })
    }

    /// Detaches the hardware and hands it back.
    pub fn delete(self) -> (U, T) {
        let mut inner = self.inner.into_inner().into_inner();

        let effects = inner.bus.stop();
        if inner.apply_all(effects).1.is_err() {
            warn!("stopping the port failed");
        }

        if inner.uart.detach().is_err() {
            warn!("detaching the uart failed");
        }

        if inner.timer.detach().is_err() {
            warn!("detaching the timer failed");
        }

        let PortInner { uart, timer, .. } = inner;
        (uart, timer)
    }

    pub fn is_enabled(&self) -> bool {
        self.with_inner(|inner| inner.enabled)
    }

    pub fn mode(&self) -> PortMode {
        self.with_inner(|inner| inner.bus.mode())
    }

    /// Switches between controller and responder. Fails while a frame is being sent.
    pub fn set_mode(&self, mode: PortMode) -> Result<(), DmxPortError<U, T>> {
        self.with_inner(|inner| {
            if inner.bus.is_sending() {
                return Err(PortError::StillSending);
            }

            inner.bus.set_mode(mode);
            Ok(())
        })
    }

    pub fn baud_rate(&self) -> u32 {
        self.with_inner(|inner| inner.baud_rate)
    }

    /// Sets the baud rate, clamped to the DMX512 limits. Returns the baud rate that was set.
    pub fn set_baud_rate(&self, baud_rate: u32) -> Result<u32, DmxPortError<U, T>> {
        let baud_rate = clamp_baud_rate(baud_rate);

        self.with_inner(|inner| {
            inner
                .uart
                .set_baud_rate(baud_rate)
                .map_err(PortError::Uart)?;
            inner.baud_rate = baud_rate;

            Ok(baud_rate)
        })
    }

    pub fn break_len(&self) -> u32 {
        self.with_inner(|inner| inner.bus.timing().break_len())
    }

    /// Sets the transmitted break length, clamped to the DMX512 limits. Returns the length that was
    /// set.
    pub fn set_break_len(&self, break_len: u32) -> u32 {
        self.with_inner(|inner| inner.bus.timing_mut().set_break_len(break_len))
    }

    pub fn mab_len(&self) -> u32 {
        self.with_inner(|inner| inner.bus.timing().mab_len())
    }

    /// Sets the transmitted mark after break length, clamped to the DMX512 limits. Returns the
    /// length that was set.
    pub fn set_mab_len(&self, mab_len: u32) -> u32 {
        self.with_inner(|inner| inner.bus.timing_mut().set_mab_len(mab_len))
    }

    /// The break and mark after break of the most recent frame that was seen on the line.
    pub fn last_break_timing(&self) -> Option<BreakMeasurement> {
        self.with_inner(|inner| inner.latest_timing())
    }

    /// Call from the uart interrupt handler.
    pub fn on_uart_interrupt(&self) {
        if let Some(event) = self.with_inner(|inner| inner.handle_uart_interrupt()) {
            self.event.signal(event);
        }
    }

    /// Call from the interrupt handler of the timer alarm.
    pub fn on_timer_interrupt(&self) {
        if let Some(event) = self.with_inner(|inner| inner.handle_alarm()) {
            self.event.signal(event);
        }
    }

    /// Call from the edge interrupt of the receive pin with the level after the edge.
    pub fn on_edge(&self, level: LineLevel) {
        if let Some(event) = self.with_inner(|inner| inner.handle_edge(level)) {
            self.event.signal(event);
        }
    }

    /// Waits until all tasks that asked before got their turn and returns a [Transaction].
    /// The port is released when the transaction is dropped.
    pub fn lock<'a, W: DmxWait>(&'a self, wait: &'a mut W) -> Transaction<'a, U, T, W> {
        let ticket = self.tickets.lock(|tickets| {
            let mut current = tickets.get();
            let ticket = current.next;
            current.next = current.next.wrapping_add(1);
            tickets.set(current);

            ticket
        });

        while self.tickets.lock(|tickets| tickets.get().serving) != ticket {
            wait.pause();
        }

        Transaction::new(self, wait)
    }

    /// Returns a [Transaction] if nobody holds or waits for the port.
    pub fn try_lock<'a, W: DmxWait>(&'a self, wait: &'a mut W) -> Option<Transaction<'a, U, T, W>> {
        let acquired = self.tickets.lock(|tickets| {
            let mut current = tickets.get();
            if current.next != current.serving {
                return false;
            }

            current.next = current.next.wrapping_add(1);
            tickets.set(current);

            true
        });

        acquired.then(|| Transaction::new(self, wait))
    }

    pub(crate) fn unlock(&self) {
        self.tickets.lock(|tickets| {
            let mut current = tickets.get();
            current.serving = current.serving.wrapping_add(1);
            tickets.set(current);
        });
    }

    pub(crate) fn with_inner<R>(&self, f: impl FnOnce(&mut PortInner<U, T>) -> R) -> R {
        self.inner.lock(|inner| f(&mut inner.borrow_mut()))
    }

    pub(crate) fn events(&self) -> &Signal<CriticalSectionRawMutex, Event> {
        &self.event
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dmx_uart_driver::SpinWait;
    use crate::sim::{SimError, Wire};

    #[test]
    fn test_install_unwinds_on_timer_failure() {
        let wire = Wire::new();
        wire.fail_timer_attach();

        let error = match DmxPort::install(wire.uart(), wire.timer(), DmxConfig::default()) {
            Err(error) => error,
            Ok(_) => panic!("install must fail"),
        };

        assert!(matches!(error.error, PortError::Timer(SimError::AttachFailed)));
        assert!(!wire.uart_attached());
        assert!(!wire.timer_attached());
    }

    #[test]
    fn test_install_unwinds_on_uart_failure() {
        let wire = Wire::new();
        wire.fail_uart_attach();

        let error = match DmxPort::install(wire.uart(), wire.timer(), DmxConfig::default()) {
            Err(error) => error,
            Ok(_) => panic!("install must fail"),
        };

        assert!(matches!(error.error, PortError::Uart(SimError::AttachFailed)));
        assert!(!wire.uart_attached());
        assert!(!wire.timer_attached());
    }

    #[test]
    fn test_install_and_delete() {
        let wire = Wire::new();
        let port = DmxPort::install(wire.uart(), wire.timer(), DmxConfig::default()).unwrap();
        assert!(wire.uart_attached());
        assert!(wire.timer_attached());
        assert!(!port.is_enabled());

        port.enable().unwrap();
        assert!(port.is_enabled());
        assert!(!wire.is_transmitting());

        port.disable().unwrap();
        let _ = port.delete();
        assert!(!wire.uart_attached());
        assert!(!wire.timer_attached());
    }

    #[test]
    fn test_setters_clamp() {
        let wire = Wire::new();
        let port = DmxPort::install(wire.uart(), wire.timer(), DmxConfig::default()).unwrap();

        assert_eq!(port.set_break_len(10), 92);
        assert_eq!(port.break_len(), 92);
        assert_eq!(port.set_mab_len(2_000_000), 999_999);
        assert_eq!(port.set_baud_rate(1).unwrap(), 245_000);
        assert_eq!(wire.baud_rate(), 245_000);
    }

    #[test]
    fn test_tickets_are_served_in_order() {
        let wire = Wire::new();
        let port = DmxPort::install(wire.uart(), wire.timer(), DmxConfig::default()).unwrap();
        let mut first_wait = SpinWait;
        let mut second_wait = SpinWait;

        let transaction = port.try_lock(&mut first_wait).unwrap();
        assert!(port.try_lock(&mut second_wait).is_none());
        drop(transaction);

        assert!(port.try_lock(&mut second_wait).is_some());
    }
}

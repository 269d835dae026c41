use modular_bitfield::bitfield;
use modular_bitfield::prelude::B1;

/// The uart interrupts the port works with. Used as status as well as mask.
#[bitfield]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct UartInterrupts {
    /// The receive fifo holds data, or the receive timeout expired.
    pub rx_data: bool,
    pub rx_break: bool,
    pub rx_framing_error: bool,
    pub rx_overflow: bool,
    /// The line level differed from the transmitted data.
    pub rx_collision: bool,
    /// The transmit fifo dropped below its threshold.
    pub tx_data: bool,
    /// The last byte left the shift register.
    pub tx_done: bool,
    #[skip]
    reserved: B1,
}

impl UartInterrupts {
    pub fn bits(&self) -> u8 {
        self.into_bytes()[0]
    }

    pub fn from_bits(bits: u8) -> Self {
        Self::from_bytes([bits])
    }

    /// All receive interrupts.
    pub fn rx_all() -> Self {
        Self::new()
            .with_rx_data(true)
            .with_rx_break(true)
            .with_rx_framing_error(true)
            .with_rx_overflow(true)
            .with_rx_collision(true)
    }

    /// All transmit interrupts.
    pub fn tx_all() -> Self {
        Self::new().with_tx_data(true).with_tx_done(true)
    }

    pub fn union(&self, other: Self) -> Self {
        Self::from_bits(self.bits() | other.bits())
    }

    pub fn intersection(&self, other: Self) -> Self {
        Self::from_bits(self.bits() & other.bits())
    }

    pub fn intersects(&self, other: Self) -> bool {
        self.bits() & other.bits() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.bits() == 0
    }
}

/// The uart a port runs on. Implemented by the hardware abstraction of the target.
///
/// The port calls every method from inside a critical section, both from task and interrupt
/// context, so implementations must not block.
pub trait DmxUart {
    type Error;

    /// Claims the peripheral and installs the interrupt handler.
    fn attach(&mut self) -> Result<(), Self::Error>;
    /// Releases everything [DmxUart::attach] claimed.
    fn detach(&mut self) -> Result<(), Self::Error>;

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<(), Self::Error>;

    /// Moves received bytes into the buffer and returns the amount moved.
    fn read_fifo(&mut self, buffer: &mut [u8]) -> Result<usize, Self::Error>;
    /// Free space of the transmit fifo.
    fn tx_fifo_space(&mut self) -> usize;
    /// Writes bytes to the transmit fifo. Never called with more bytes than
    /// [DmxUart::tx_fifo_space] returned.
    fn write_fifo(&mut self, data: &[u8]) -> Result<(), Self::Error>;
    fn reset_rx_fifo(&mut self) -> Result<(), Self::Error>;
    fn reset_tx_fifo(&mut self) -> Result<(), Self::Error>;

    /// Pending interrupts that are enabled.
    fn interrupt_status(&mut self) -> UartInterrupts;
    fn enable_interrupts(&mut self, mask: UartInterrupts);
    fn disable_interrupts(&mut self, mask: UartInterrupts);
    fn clear_interrupts(&mut self, mask: UartInterrupts);

    /// Drives the transceiver direction pin. `true` enables the line driver.
    fn set_rts(&mut self, transmit: bool) -> Result<(), Self::Error>;
    /// Inverts the transmit line. An inverted idle line is a break.
    fn invert_tx(&mut self, invert: bool) -> Result<(), Self::Error>;
}

/// A free running microsecond timer with one alarm.
pub trait DmxTimer {
    type Error;

    fn attach(&mut self) -> Result<(), Self::Error>;
    fn detach(&mut self) -> Result<(), Self::Error>;

    /// Microseconds since an arbitrary point in time. Must not wrap during the port's lifetime.
    fn now_micros(&mut self) -> u64;
    /// Fires the alarm interrupt once, `micros` from now. Replaces a pending alarm.
    fn set_alarm(&mut self, micros: u32) -> Result<(), Self::Error>;
    /// Cancels a pending alarm.
    fn stop(&mut self) -> Result<(), Self::Error>;
}

/// Called by a blocked task on every iteration of its wait loop.
///
/// On an RTOS this yields to the scheduler, bare metal implementations can wait for an interrupt.
pub trait DmxWait {
    fn pause(&mut self);
}

/// Busy waits.
#[derive(Debug, Default)]
pub struct SpinWait;

impl DmxWait for SpinWait {
    fn pause(&mut self) {
        core::hint::spin_loop();
    }
}

#[cfg(feature = "std")]
/// Yields the thread to the os scheduler.
#[derive(Debug, Default)]
pub struct YieldWait;

#[cfg(feature = "std")]
impl DmxWait for YieldWait {
    fn pause(&mut self) {
        std::thread::yield_now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interrupt_masks() {
        let rx = UartInterrupts::rx_all();
        let tx = UartInterrupts::tx_all();

        assert_eq!(rx.bits(), 0b0001_1111);
        assert_eq!(tx.bits(), 0b0110_0000);
        assert!(!rx.intersects(tx));
        assert_eq!(rx.union(tx).bits(), 0b0111_1111);

        let pending = UartInterrupts::new().with_rx_break(true).with_tx_done(true);
        assert!(pending.intersection(rx).rx_break());
        assert!(!pending.intersection(rx).tx_done());
        assert!(UartInterrupts::from_bits(0).is_empty());
    }
}

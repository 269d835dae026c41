//! Break and mark after break generation and measurement.
//!
//! Nothing in here touches hardware. [TxTimer] tells the caller which line state to drive and for
//! how long, [EdgeSniffer] and [UartBreakEstimator] turn timestamps into [BreakMeasurement]s.

use crate::consts::{
    DMX_BAUD_MAX, DMX_BAUD_MIN, DMX_BREAK_MAX_MICROS, DMX_BREAK_MIN_MICROS, DMX_MAB_MAX_MICROS,
    DMX_MAB_MIN_MICROS, DMX_SLOT_MICROS, RDM_BREAK_MICROS, RDM_MAB_MICROS,
    RDM_PACKET_SPACING_BROADCAST_MICROS, RDM_PACKET_SPACING_DISCOVERY_NO_RESPONSE_MICROS,
    RDM_PACKET_SPACING_REQUEST_NO_RESPONSE_MICROS, RDM_PACKET_SPACING_RESPONSE_MICROS,
};

pub fn clamp_break_len(break_len: u32) -> u32 {
    break_len.clamp(DMX_BREAK_MIN_MICROS, DMX_BREAK_MAX_MICROS)
}

pub fn clamp_mab_len(mab_len: u32) -> u32 {
    mab_len.clamp(DMX_MAB_MIN_MICROS, DMX_MAB_MAX_MICROS)
}

pub fn clamp_baud_rate(baud_rate: u32) -> u32 {
    baud_rate.clamp(DMX_BAUD_MIN, DMX_BAUD_MAX)
}

/// Break and mark after break length used when transmitting a frame.
/// Both values are always within the DMX512 limits.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BreakTiming {
    break_len: u32,
    mab_len: u32,
}

impl BreakTiming {
    /// Creates a new timing, clamping both lengths to the legal ranges.
    pub fn new(break_len: u32, mab_len: u32) -> Self {
        Self {
            break_len: clamp_break_len(break_len),
            mab_len: clamp_mab_len(mab_len),
        }
    }

    pub fn break_len(&self) -> u32 {
        self.break_len
    }

    pub fn mab_len(&self) -> u32 {
        self.mab_len
    }

    pub fn set_break_len(&mut self, break_len: u32) -> u32 {
        self.break_len = clamp_break_len(break_len);
        self.break_len
    }

    pub fn set_mab_len(&mut self, mab_len: u32) -> u32 {
        self.mab_len = clamp_mab_len(mab_len);
        self.mab_len
    }
}

impl Default for BreakTiming {
    fn default() -> Self {
        Self::new(RDM_BREAK_MICROS, RDM_MAB_MICROS)
    }
}

/// A measured break and mark after break in microseconds.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BreakMeasurement {
    pub break_len: u32,
    pub mab_len: u32,
}

/// What the alarm handler has to do next.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TimerAction {
    /// Pull the line low and fire the alarm again after `alarm_us`.
    Break { alarm_us: u32 },
    /// Release the line and fire the alarm again after `alarm_us`.
    Mark { alarm_us: u32 },
    /// The mark after break is over, the first slot may be written.
    StartData,
    /// The alarm did not belong to a break sequence.
    None,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum TxPhase {
    Idle,
    Break,
    MarkAfterBreak,
}

/// Drives the transmit side break sequence from the hardware alarm.
#[derive(Debug)]
pub struct TxTimer {
    phase: TxPhase,
    mab_len: u32,
}

impl TxTimer {
    pub const fn new() -> Self {
        Self {
            phase: TxPhase::Idle,
            mab_len: DMX_MAB_MIN_MICROS,
        }
    }

    /// Starts a new break. The returned action is always [TimerAction::Break].
    pub fn begin(&mut self, timing: BreakTiming) -> TimerAction {
        self.phase = TxPhase::Break;
        self.mab_len = timing.mab_len();

        TimerAction::Break {
            alarm_us: timing.break_len(),
        }
    }

    /// Advances the break sequence. Called from the alarm interrupt.
    pub fn on_alarm(&mut self) -> TimerAction {
        match self.phase {
            TxPhase::Break => {
                self.phase = TxPhase::MarkAfterBreak;
                TimerAction::Mark {
                    alarm_us: self.mab_len,
                }
            },
            TxPhase::MarkAfterBreak => {
                self.phase = TxPhase::Idle;
                TimerAction::StartData
            },
            TxPhase::Idle => TimerAction::None,
        }
    }

    /// Aborts a running break sequence.
    pub fn cancel(&mut self) {
        self.phase = TxPhase::Idle;
    }

    pub fn is_active(&self) -> bool {
        self.phase != TxPhase::Idle
    }
}

impl Default for TxTimer {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LineLevel {
    Low,
    High,
}

/// Measures break and mark after break from the edges on the receive line.
///
/// A low period of at least the minimum break length is a break. The mark after break lasts until
/// the next falling edge, which is the start bit of the first slot.
#[derive(Debug, Default)]
pub struct EdgeSniffer {
    last_fall: Option<u64>,
    last_rise: Option<u64>,
    pending_break: Option<u32>,
    latest: Option<BreakMeasurement>,
}

impl EdgeSniffer {
    pub const fn new() -> Self {
        Self {
            last_fall: None,
            last_rise: None,
            pending_break: None,
            latest: None,
        }
    }

    pub fn on_edge(&mut self, level: LineLevel, now: u64) {
        match level {
            LineLevel::Low => {
                if let (Some(break_len), Some(rise)) = (self.pending_break.take(), self.last_rise)
                {
                    self.latest = Some(BreakMeasurement {
                        break_len,
                        mab_len: now.saturating_sub(rise) as u32,
                    });
                }
                self.last_fall = Some(now);
            },
            LineLevel::High => {
                if let Some(fall) = self.last_fall {
                    let low_len = now.saturating_sub(fall);
                    if low_len >= DMX_BREAK_MIN_MICROS as u64 {
                        self.pending_break = Some(low_len.min(u32::MAX as u64) as u32);
                    }
                }
                self.last_rise = Some(now);
            },
        }
    }

    /// Returns true between the end of a break and the start bit of the first slot.
    pub fn in_mark_after_break(&self) -> bool {
        self.pending_break.is_some()
    }

    /// The most recent complete measurement.
    pub fn latest(&self) -> Option<BreakMeasurement> {
        self.latest
    }
}

/// Estimates the timing without edge capture, from the uart break interrupt and the first data
/// interrupt after it.
///
/// The break interrupt only tells that the line was low for at least one slot, so the reported
/// break length is [DMX_SLOT_MICROS], a lower bound. The mark after break is the time between the
/// break interrupt and the start of the first slot.
#[derive(Debug, Default)]
pub struct UartBreakEstimator {
    break_at: Option<u64>,
    latest: Option<BreakMeasurement>,
}

impl UartBreakEstimator {
    pub const fn new() -> Self {
        Self {
            break_at: None,
            latest: None,
        }
    }

    pub fn on_break(&mut self, now: u64) {
        self.break_at = Some(now);
    }

    /// Called on every data interrupt with the amount of slots that were read.
    pub fn on_data(&mut self, now: u64, slots: usize) {
        if let Some(break_at) = self.break_at.take() {
            let first_slot_start = now.saturating_sub(slots as u64 * DMX_SLOT_MICROS as u64);
            self.latest = Some(BreakMeasurement {
                break_len: DMX_SLOT_MICROS,
                mab_len: first_slot_start.saturating_sub(break_at) as u32,
            });
        }
    }

    pub fn latest(&self) -> Option<BreakMeasurement> {
        self.latest
    }
}

/// The last transfer on the bus. Decides how long the bus has to stay idle before the controller
/// may send again.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LastTransfer {
    Idle,
    Dmx,
    RdmBroadcast,
    RdmRequest { answered: bool },
    RdmDiscovery { answered: bool },
    RdmResponse,
}

/// Minimum idle time in microseconds after the given transfer.
pub fn packet_spacing(last_transfer: LastTransfer) -> u32 {
    match last_transfer {
        LastTransfer::Idle | LastTransfer::Dmx => 0,
        LastTransfer::RdmBroadcast => RDM_PACKET_SPACING_BROADCAST_MICROS,
        LastTransfer::RdmRequest { answered: true }
        | LastTransfer::RdmDiscovery { answered: true }
        | LastTransfer::RdmResponse => RDM_PACKET_SPACING_RESPONSE_MICROS,
        LastTransfer::RdmRequest { answered: false } => {
            RDM_PACKET_SPACING_REQUEST_NO_RESPONSE_MICROS
        },
        LastTransfer::RdmDiscovery { answered: false } => {
            RDM_PACKET_SPACING_DISCOVERY_NO_RESPONSE_MICROS
        },
    }
}

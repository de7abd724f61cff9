//! Breakpoint snapshots as gdb reports them, and the IDE-side bound
//! breakpoints the core updates on hits.

use std::{
    fmt,
    sync::{
        atomic::{AtomicU32, AtomicU8, Ordering},
        Mutex, MutexGuard, PoisonError,
    },
    thread,
};

/// gdb breakpoint number. `0` addresses every breakpoint in bulk records.
pub type GdbId = u32;

pub const ALL_BREAKPOINTS: GdbId = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BreakpointAddress {
    /// Symbols for the location are not loaded yet.
    #[default]
    Pending,
    Resolved(u64),
}

impl fmt::Display for BreakpointAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BreakpointAddress::Pending => f.write_str(crate::record::PENDING_ADDRESS),
            BreakpointAddress::Resolved(addr) => write!(f, "0x{addr:08x}"),
        }
    }
}

/// Latest state of one gdb breakpoint.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BreakpointSnapshot {
    pub id: GdbId,
    pub enabled: bool,
    pub address: BreakpointAddress,
    pub function: String,
    pub file: String,
    pub line: u32,
    pub hits: u32,
    pub ignore_count: u32,
    pub condition: String,
}

impl BreakpointSnapshot {
    pub fn is_pending(&self) -> bool {
        self.address == BreakpointAddress::Pending
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakpointLocation {
    FileLine {
        file: String,
        full_path: String,
        line: u32,
    },
    Function(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PassCountStyle {
    #[default]
    None,
    Equal,
    EqualOrGreater,
    Mod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PassCount {
    pub style: PassCountStyle,
    pub count: u32,
}

impl PassCount {
    pub fn new(style: PassCountStyle, count: u32) -> Self {
        Self { style, count }
    }

    /// Whether a stop is allowed with `hits` accumulated hits.
    pub fn allows_break(&self, hits: u32) -> bool {
        match self.style {
            PassCountStyle::None => true,
            PassCountStyle::Equal => hits == self.count,
            PassCountStyle::EqualOrGreater => hits >= self.count,
            PassCountStyle::Mod => self.count != 0 && hits % self.count == 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConditionStyle {
    #[default]
    None,
    WhenTrue,
    /// gdb cannot do this one; the breakpoint stops every time and the core
    /// compares the evaluated expression against the previous hit.
    WhenChanged,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BreakCondition {
    pub style: ConditionStyle,
    pub expression: String,
}

impl BreakCondition {
    pub fn when_true(expression: impl Into<String>) -> Self {
        Self {
            style: ConditionStyle::WhenTrue,
            expression: expression.into(),
        }
    }

    pub fn when_changed(expression: impl Into<String>) -> Self {
        Self {
            style: ConditionStyle::WhenChanged,
            expression: expression.into(),
        }
    }
}

/// Update gates of a bound breakpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Gates(u8);

impl Gates {
    pub const HIT_COUNT: Gates = Gates(0b01);
    pub const CONDITION: Gates = Gates(0b10);
    pub const BOTH: Gates = Gates(0b11);

    pub fn bits(self) -> u8 {
        self.0
    }
}

/// Mutable part of a bound breakpoint. Only touched while the matching gate
/// is held.
#[derive(Debug, Clone, Default)]
pub struct BoundState {
    pub hits: u32,
    pub pass_count: PassCount,
    pub condition: BreakCondition,
    pub break_when_changed: bool,
    pub previous_value: String,
    pub is_hit_count_equal: bool,
    pub hit_count_multiple: u32,
}

/// IDE breakpoint bound to a gdb id.
#[derive(Debug)]
pub struct BoundBreakpoint {
    gdb_id: AtomicU32,
    location: BreakpointLocation,
    gates: AtomicU8,
    state: Mutex<BoundState>,
}

impl BoundBreakpoint {
    pub fn new(gdb_id: GdbId, location: BreakpointLocation) -> Self {
        Self {
            gdb_id: AtomicU32::new(gdb_id),
            location,
            gates: AtomicU8::new(0),
            state: Mutex::new(BoundState::default()),
        }
    }

    pub fn gdb_id(&self) -> GdbId {
        self.gdb_id.load(Ordering::Acquire)
    }

    /// Re-created breakpoints get a fresh number from gdb.
    pub fn set_gdb_id(&self, id: GdbId) {
        self.gdb_id.store(id, Ordering::Release);
    }

    pub fn location(&self) -> &BreakpointLocation {
        &self.location
    }

    pub fn state(&self) -> MutexGuard<'_, BoundState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn hits(&self) -> u32 {
        self.state().hits
    }

    pub fn is_when_changed(&self) -> bool {
        self.state().break_when_changed
    }

    /// Takes every gate in `gates` or none of them.
    pub fn try_lock(&self, gates: Gates) -> Option<GateGuard<'_>> {
        let bits = gates.bits();
        let mut current = self.gates.load(Ordering::Acquire);
        loop {
            if current & bits != 0 {
                return None;
            }
            match self.gates.compare_exchange_weak(
                current,
                current | bits,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(GateGuard { owner: self, bits }),
                Err(actual) => current = actual,
            }
        }
    }

    /// Spins with `yield_now` until `gates` are free.
    pub fn lock(&self, gates: Gates) -> GateGuard<'_> {
        loop {
            if let Some(guard) = self.try_lock(gates) {
                return guard;
            }
            thread::yield_now();
        }
    }

    pub fn is_locked(&self, gates: Gates) -> bool {
        self.gates.load(Ordering::Acquire) & gates.bits() != 0
    }
}

/// Releases the gates it was created with.
#[must_use]
pub struct GateGuard<'a> {
    owner: &'a BoundBreakpoint,
    bits: u8,
}

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        self.owner.gates.fetch_and(!self.bits, Ordering::AcqRel);
    }
}

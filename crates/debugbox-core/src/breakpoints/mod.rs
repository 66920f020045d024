//! Breakpoint bookkeeping.
//!
//! The store keeps every breakpoint record in a slot-stable generational
//! arena and remembers insertion order so scans visit the newest record
//! first. It never touches guest memory: installing and restoring trap
//! markers is the job of the [`engine`], which always restores a record's
//! byte before asking the store to drop it.

pub mod engine;

use std::collections::VecDeque;

pub use debugbox_protocol::BreakpointId;
use debugbox_protocol::{BreakpointInfo, BreakpointTarget, WatchMode};
pub use engine::{BreakpointEngine, BreakpointHit, WatchHit};

use crate::types::LinearAddress;

/// Trap marker written over the first byte of a code breakpoint (`int3`).
pub const TRAP_OPCODE: u8 = 0xcc;

/// AH filter of an interrupt breakpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AhMatch
{
    /// Match whatever AH holds.
    Any,
    /// Match only this AH value.
    Value(u8),
}

impl AhMatch
{
    /// Whether `ah` passes the filter.
    #[must_use]
    pub const fn matches(self, ah: u8) -> bool
    {
        match self {
            Self::Any => true,
            Self::Value(value) => value == ah,
        }
    }
}

impl From<Option<u8>> for AhMatch
{
    fn from(value: Option<u8>) -> Self
    {
        value.map_or(Self::Any, Self::Value)
    }
}

impl From<AhMatch> for Option<u8>
{
    fn from(value: AhMatch) -> Self
    {
        match value {
            AhMatch::Any => None,
            AhMatch::Value(ah) => Some(ah),
        }
    }
}

/// Where a code breakpoint sits.
///
/// `linear` is resolved once, when the breakpoint is added.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CodeLocation
{
    pub segment: u16,
    pub offset: u32,
    pub linear: LinearAddress,
}

/// Kind-specific part of a breakpoint record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind
{
    /// Execution breakpoint
    ///
    /// `saved_byte` holds the guest byte the trap marker replaced, and is
    /// `Some` exactly while the engine's marker is in guest memory.
    Code
    {
        location: CodeLocation,
        saved_byte: Option<u8>,
    },
    /// Software interrupt breakpoint.
    Interrupt
    {
        number: u8,
        ah: AhMatch,
    },
    /// Byte watch at `segment:offset`, translated with the current mode.
    MemoryWatch
    {
        segment: u16,
        offset: u32,
        last_value: u8,
    },
    /// Byte watch at `selector:offset`, only checked in protected mode while
    /// the selector has a non-empty descriptor.
    MemoryWatchProtected
    {
        selector: u16,
        offset: u32,
        last_value: u8,
    },
    /// Byte watch at a fixed linear address.
    MemoryWatchLinear
    {
        linear: LinearAddress,
        last_value: u8,
    },
}

impl RecordKind
{
    /// Whether this is one of the memory watch kinds.
    #[must_use]
    pub const fn is_watch(&self) -> bool
    {
        matches!(
            self,
            Self::MemoryWatch { .. } | Self::MemoryWatchProtected { .. } | Self::MemoryWatchLinear { .. }
        )
    }
}

/// A stored breakpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakpointRecord
{
    pub kind: RecordKind,
    /// Remove the record after its first match.
    pub once: bool,
    /// Armed. Set for every kind by activation, even when no trap is written.
    pub active: bool,
}

impl BreakpointRecord
{
    /// Create an inactive record.
    #[must_use]
    pub const fn new(kind: RecordKind, once: bool) -> Self
    {
        Self {
            kind,
            once,
            active: false,
        }
    }

    /// Linear address of a code record, `None` for other kinds.
    #[must_use]
    pub const fn code_address(&self) -> Option<LinearAddress>
    {
        match self.kind {
            RecordKind::Code { location, .. } => Some(location.linear),
            _ => None,
        }
    }

    /// Snapshot in wire form.
    #[must_use]
    pub fn info(&self, id: BreakpointId) -> BreakpointInfo
    {
        let target = match self.kind {
            RecordKind::Code { location, .. } => BreakpointTarget::Code {
                segment: location.segment,
                offset: location.offset,
                linear: location.linear.value(),
            },
            RecordKind::Interrupt { number, ah } => BreakpointTarget::Interrupt { number, ah: ah.into() },
            RecordKind::MemoryWatch {
                segment,
                offset,
                last_value,
            } => BreakpointTarget::MemoryWatch {
                segment,
                offset,
                mode: WatchMode::Real,
                last_value,
            },
            RecordKind::MemoryWatchProtected {
                selector,
                offset,
                last_value,
            } => BreakpointTarget::MemoryWatch {
                segment: selector,
                offset,
                mode: WatchMode::Protected,
                last_value,
            },
            RecordKind::MemoryWatchLinear { linear, last_value } => BreakpointTarget::MemoryWatch {
                segment: 0,
                offset: linear.value(),
                mode: WatchMode::Linear,
                last_value,
            },
        };
        BreakpointInfo {
            id,
            target,
            once: self.once,
            active: self.active,
        }
    }
}

#[derive(Debug, Default)]
struct Slot
{
    generation: u32,
    record: Option<BreakpointRecord>,
}

/// Generational arena of breakpoint records, scanned newest first
///
/// Identifiers stay valid until their record is removed. A removed
/// identifier never resolves again, even after its slot is reused.
///
/// ## Example
///
/// ```rust
/// use debugbox_core::breakpoints::{AhMatch, BreakpointStore};
///
/// let mut store = BreakpointStore::new();
/// let first = store.add_interrupt(0x21, AhMatch::Any, false);
/// let second = store.add_interrupt(0x10, AhMatch::Value(0x0e), false);
/// assert_eq!(store.ids(), vec![second, first]);
///
/// assert!(store.delete(first));
/// let third = store.add_interrupt(0x16, AhMatch::Any, true);
/// assert!(store.get(first).is_none());
/// assert!(store.get(third).is_some());
/// ```
#[derive(Debug, Default)]
pub struct BreakpointStore
{
    slots: Vec<Slot>,
    free: Vec<u32>,
    order: VecDeque<BreakpointId>,
}

impl BreakpointStore
{
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Insert a record in front of every existing one.
    pub fn insert(&mut self, record: BreakpointRecord) -> BreakpointId
    {
        let id = if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.record = Some(record);
            BreakpointId::from_parts(index, slot.generation)
        } else {
            let index = u32::try_from(self.slots.len()).unwrap_or(u32::MAX);
            self.slots.push(Slot {
                generation: 0,
                record: Some(record),
            });
            BreakpointId::from_parts(index, 0)
        };
        self.order.push_front(id);
        id
    }

    /// Add a code breakpoint at an already resolved location.
    pub fn add_code(&mut self, location: CodeLocation, once: bool) -> BreakpointId
    {
        self.insert(BreakpointRecord::new(
            RecordKind::Code {
                location,
                saved_byte: None,
            },
            once,
        ))
    }

    /// Add a software interrupt breakpoint.
    pub fn add_interrupt(&mut self, number: u8, ah: AhMatch, once: bool) -> BreakpointId
    {
        self.insert(BreakpointRecord::new(RecordKind::Interrupt { number, ah }, once))
    }

    /// Add a memory watch with a zero baseline
    ///
    /// For [`WatchMode::Linear`] the offset is the linear address and the
    /// segment is ignored. Watches are never `once`.
    pub fn add_memory_watch(&mut self, segment: u16, offset: u32, mode: WatchMode) -> BreakpointId
    {
        let kind = match mode {
            WatchMode::Real => RecordKind::MemoryWatch {
                segment,
                offset,
                last_value: 0,
            },
            WatchMode::Protected => RecordKind::MemoryWatchProtected {
                selector: segment,
                offset,
                last_value: 0,
            },
            WatchMode::Linear => RecordKind::MemoryWatchLinear {
                linear: LinearAddress::new(offset),
                last_value: 0,
            },
        };
        self.insert(BreakpointRecord::new(kind, false))
    }

    /// Look up a live record.
    #[must_use]
    pub fn get(&self, id: BreakpointId) -> Option<&BreakpointRecord>
    {
        let slot = self.slots.get(id.index() as usize)?;
        if slot.generation != id.generation() {
            return None;
        }
        slot.record.as_ref()
    }

    /// Look up a live record for modification.
    pub fn get_mut(&mut self, id: BreakpointId) -> Option<&mut BreakpointRecord>
    {
        let slot = self.slots.get_mut(id.index() as usize)?;
        if slot.generation != id.generation() {
            return None;
        }
        slot.record.as_mut()
    }

    /// Remove a record and hand it back.
    pub fn remove(&mut self, id: BreakpointId) -> Option<BreakpointRecord>
    {
        let slot = self.slots.get_mut(id.index() as usize)?;
        if slot.generation != id.generation() {
            return None;
        }
        let record = slot.record.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index());
        self.order.retain(|&live| live != id);
        Some(record)
    }

    /// Remove a record. Returns `false` if `id` is stale or unknown.
    pub fn delete(&mut self, id: BreakpointId) -> bool
    {
        self.remove(id).is_some()
    }

    /// Newest code record at `linear`.
    #[must_use]
    pub fn find_code_at(&self, linear: LinearAddress) -> Option<BreakpointId>
    {
        self.iter()
            .find(|(_, record)| record.code_address() == Some(linear))
            .map(|(id, _)| id)
    }

    /// Remove the newest code record at `linear`.
    pub fn delete_at(&mut self, linear: LinearAddress) -> bool
    {
        self.find_code_at(linear).is_some_and(|id| self.delete(id))
    }

    /// Remove every record, returning how many there were.
    pub fn clear(&mut self) -> usize
    {
        let ids: Vec<BreakpointId> = self.order.iter().copied().collect();
        ids.into_iter().filter(|&id| self.delete(id)).count()
    }

    /// Whether any code record sits at `linear`.
    #[must_use]
    pub fn exists_at(&self, linear: LinearAddress) -> bool
    {
        self.find_code_at(linear).is_some()
    }

    /// Whether a front end should draw a marker at `linear`
    ///
    /// Decided by the newest code record there: `once` breakpoints are
    /// internal (step-over, program start) and stay hidden.
    #[must_use]
    pub fn is_visible_at(&self, linear: LinearAddress) -> bool
    {
        self.find_code_at(linear)
            .and_then(|id| self.get(id))
            .is_some_and(|record| !record.once)
    }

    /// Number of live records.
    #[must_use]
    pub fn len(&self) -> usize
    {
        self.order.len()
    }

    /// Whether the store holds no record.
    #[must_use]
    pub fn is_empty(&self) -> bool
    {
        self.order.is_empty()
    }

    /// Identifiers of all live records, newest first.
    ///
    /// The list is a snapshot, so records may be removed while walking it.
    #[must_use]
    pub fn ids(&self) -> Vec<BreakpointId>
    {
        self.order.iter().copied().collect()
    }

    /// Iterate over live records, newest first.
    pub fn iter(&self) -> impl Iterator<Item = (BreakpointId, &BreakpointRecord)> + '_
    {
        self.order.iter().filter_map(|&id| self.get(id).map(|record| (id, record)))
    }

    /// Wire snapshots of every record, newest first.
    #[must_use]
    pub fn list(&self) -> Vec<BreakpointInfo>
    {
        self.iter().map(|(id, record)| record.info(id)).collect()
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    fn location(segment: u16, offset: u32) -> CodeLocation
    {
        CodeLocation {
            segment,
            offset,
            linear: LinearAddress::new((u32::from(segment) << 4) + offset),
        }
    }

    #[test]
    fn test_newest_first()
    {
        let mut store = BreakpointStore::new();
        let a = store.add_code(location(0x1000, 0x10), false);
        let b = store.add_code(location(0x1000, 0x10), true);
        assert_eq!(store.ids(), vec![b, a]);
        assert_eq!(store.find_code_at(LinearAddress::new(0x10010)), Some(b));
    }

    #[test]
    fn test_stale_id_after_slot_reuse()
    {
        let mut store = BreakpointStore::new();
        let old = store.add_interrupt(0x21, AhMatch::Any, false);
        assert!(store.delete(old));
        let new = store.add_interrupt(0x10, AhMatch::Any, false);

        assert_eq!(new.index(), old.index());
        assert_ne!(new, old);
        assert!(store.get(old).is_none());
        assert!(!store.delete(old));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_delete_at_only_matches_code()
    {
        let mut store = BreakpointStore::new();
        store.add_memory_watch(0, 0x10010, WatchMode::Linear);
        assert!(!store.delete_at(LinearAddress::new(0x10010)));

        store.add_code(location(0x1000, 0x10), false);
        assert!(store.delete_at(LinearAddress::new(0x10010)));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_visibility_follows_newest_record()
    {
        let mut store = BreakpointStore::new();
        let at = LinearAddress::new(0x20050);
        store.add_code(location(0x2000, 0x50), true);
        assert!(store.exists_at(at));
        assert!(!store.is_visible_at(at));

        store.add_code(location(0x2000, 0x50), false);
        assert!(store.is_visible_at(at));
    }

    #[test]
    fn test_clear_empties_store()
    {
        let mut store = BreakpointStore::new();
        store.add_code(location(0x1000, 0x10), false);
        store.add_interrupt(0x21, AhMatch::Value(0x4c), false);
        store.add_memory_watch(0x40, 0x6c, WatchMode::Real);

        assert_eq!(store.clear(), 3);
        assert!(store.is_empty());
        assert!(!store.exists_at(LinearAddress::new(0x10010)));
        assert!(store.list().is_empty());
    }

    #[test]
    fn test_watch_info_reports_mode()
    {
        let mut store = BreakpointStore::new();
        let id = store.add_memory_watch(0x08, 0x100, WatchMode::Protected);
        let info = store.get(id).unwrap().info(id);
        assert_eq!(
            info.target,
            BreakpointTarget::MemoryWatch {
                segment: 0x08,
                offset: 0x100,
                mode: WatchMode::Protected,
                last_value: 0,
            }
        );
        assert!(!info.once);
    }
}

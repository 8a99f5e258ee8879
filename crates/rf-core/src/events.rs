//! Roast events and the indices at which they were marked.

use std::fmt;

use crate::error::{CoreError, CoreResult};

/// Roast events, in their fixed slot order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum EventKind {
    Charge,
    DryEnd,
    FcStart,
    FcEnd,
    ScStart,
    ScEnd,
    Drop,
    CoolEnd,
}

impl EventKind {
    pub const COUNT: usize = 8;

    pub const ALL: [EventKind; Self::COUNT] = [
        EventKind::Charge,
        EventKind::DryEnd,
        EventKind::FcStart,
        EventKind::FcEnd,
        EventKind::ScStart,
        EventKind::ScEnd,
        EventKind::Drop,
        EventKind::CoolEnd,
    ];

    /// Slot of this event in the raw index array.
    pub fn slot(self) -> usize {
        self as usize
    }

    pub fn label(self) -> &'static str {
        match self {
            EventKind::Charge => "CHARGE",
            EventKind::DryEnd => "DRY_END",
            EventKind::FcStart => "FC_START",
            EventKind::FcEnd => "FC_END",
            EventKind::ScStart => "SC_START",
            EventKind::ScEnd => "SC_END",
            EventKind::Drop => "DROP",
            EventKind::CoolEnd => "COOL_END",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Series indices of the events marked so far in one roast.
///
/// A slot is written once; re-marking an event is rejected so indices are
/// never renumbered after the fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EventMarks {
    slots: [Option<usize>; EventKind::COUNT],
}

impl EventMarks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from the raw sentinel encoding: `-1` is unset for every slot,
    /// and any value `<= 0` is unset for the slots after CHARGE.
    pub fn from_raw(raw: [i32; EventKind::COUNT]) -> Self {
        let mut slots = [None; EventKind::COUNT];
        for (slot, &value) in slots.iter_mut().zip(raw.iter()) {
            *slot = usize::try_from(value).ok();
        }
        for slot in slots.iter_mut().skip(1) {
            if *slot == Some(0) {
                *slot = None;
            }
        }
        Self { slots }
    }

    /// Raw sentinel encoding (`-1` for unset).
    pub fn to_raw(&self) -> [i32; EventKind::COUNT] {
        let mut raw = [-1; EventKind::COUNT];
        for (out, slot) in raw.iter_mut().zip(self.slots.iter()) {
            if let Some(index) = slot {
                *out = i32::try_from(*index).unwrap_or(i32::MAX);
            }
        }
        raw
    }

    pub fn get(&self, kind: EventKind) -> Option<usize> {
        self.slots[kind.slot()]
    }

    pub fn is_set(&self, kind: EventKind) -> bool {
        self.get(kind).is_some()
    }

    /// Index of `kind` if it is set and lies inside a series of `len` samples.
    pub fn get_in_bounds(&self, kind: EventKind, len: usize) -> Option<usize> {
        self.get(kind).filter(|&index| index < len)
    }

    /// Mark `kind` at `index` of a series currently holding `len` samples.
    pub fn mark(&mut self, kind: EventKind, index: usize, len: usize) -> CoreResult<()> {
        if let Some(existing) = self.get(kind) {
            return Err(CoreError::AlreadyMarked {
                kind,
                index: existing,
            });
        }
        if index >= len {
            return Err(CoreError::IndexOob {
                what: "event mark",
                index,
                len,
            });
        }
        self.slots[kind.slot()] = Some(index);
        Ok(())
    }

    /// Clear every mark (new roast).
    pub fn clear(&mut self) {
        self.slots = [None; EventKind::COUNT];
    }

    pub fn iter(&self) -> impl Iterator<Item = (EventKind, usize)> + '_ {
        EventKind::ALL
            .iter()
            .filter_map(|&kind| self.get(kind).map(|index| (kind, index)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_sentinels() {
        let marks = EventMarks::from_raw([0, 0, 12, -1, -1, -1, 30, -1]);
        assert_eq!(marks.get(EventKind::Charge), Some(0));
        // zero is "unset" for everything but CHARGE
        assert_eq!(marks.get(EventKind::DryEnd), None);
        assert_eq!(marks.get(EventKind::FcStart), Some(12));
        assert_eq!(marks.get(EventKind::Drop), Some(30));
        assert_eq!(marks.to_raw(), [0, -1, 12, -1, -1, -1, 30, -1]);
    }

    #[test]
    fn mark_once() {
        let mut marks = EventMarks::new();
        marks.mark(EventKind::Charge, 2, 5).unwrap();
        let err = marks.mark(EventKind::Charge, 4, 5).unwrap_err();
        assert_eq!(
            err,
            CoreError::AlreadyMarked {
                kind: EventKind::Charge,
                index: 2
            }
        );
        assert_eq!(marks.get(EventKind::Charge), Some(2));
    }

    #[test]
    fn mark_out_of_bounds_rejected() {
        let mut marks = EventMarks::new();
        assert!(marks.mark(EventKind::Drop, 5, 5).is_err());
        assert!(!marks.is_set(EventKind::Drop));
    }

    #[test]
    fn bounds_filter() {
        let marks = EventMarks::from_raw([0, -1, -1, -1, -1, -1, 9, -1]);
        assert_eq!(marks.get_in_bounds(EventKind::Drop, 10), Some(9));
        assert_eq!(marks.get_in_bounds(EventKind::Drop, 9), None);
    }
}

//! The player inventory slot model.
//!
//! Slot indices: 0 = crafting result, 1..4 = 2x2 crafting input
//! (column-major, `slot = 1 + col + row*2`), 5..8 = armor, 9..35 = main
//! storage, 36..44 = hotbar, 45 = offhand. -999 is the outside-window
//! sentinel.

use mattock_types::ItemStack;
use std::collections::HashMap;

pub const SLOT_RESULT: i16 = 0;
pub const SLOT_CRAFT_FIRST: i16 = 1;
pub const SLOT_CRAFT_LAST: i16 = 4;
pub const SLOT_ARMOR_FIRST: i16 = 5;
pub const SLOT_MAIN_FIRST: i16 = 9;
pub const SLOT_MAIN_LAST: i16 = 35;
pub const SLOT_HOTBAR_FIRST: i16 = 36;
pub const SLOT_HOTBAR_LAST: i16 = 44;
pub const SLOT_OFFHAND: i16 = 45;
pub const SLOT_OUTSIDE: i16 = -999;
pub const SLOT_COUNT: usize = 46;

/// Maximum stack size for an item.
pub fn stack_size(_item_id: i32) -> i8 {
    64
}

/// One inventory slot. `item_id == 0` means empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Slot {
    pub item_id: i32,
    pub count: i8,
}

impl Slot {
    pub const EMPTY: Slot = Slot { item_id: 0, count: 0 };

    pub fn new(item_id: i32, count: i8) -> Self {
        Self { item_id, count }
    }

    pub fn is_empty(&self) -> bool {
        self.item_id == 0 || self.count == 0
    }

    pub fn clear(&mut self) {
        *self = Slot::EMPTY;
    }

    /// Normalize a drained slot back to the canonical empty value.
    pub fn normalize(&mut self) {
        if self.count <= 0 {
            self.clear();
        }
    }

    pub fn to_wire(self) -> Option<ItemStack> {
        if self.is_empty() {
            None
        } else {
            Some(ItemStack::new(self.item_id, self.count))
        }
    }

    pub fn from_wire(item: Option<ItemStack>) -> Self {
        match item {
            Some(stack) => Slot::new(stack.item_id, stack.count),
            None => Slot::EMPTY,
        }
    }
}

/// A player's inventory: sparse slot map, carried (cursor) stack, and the
/// state id echoed by every click.
pub struct Inventory {
    slots: HashMap<i16, Slot>,
    pub carried: Slot,
    pub last_state_id: i32,
    pub(crate) dragging: bool,
    pub(crate) drag_button: i8,
    pub(crate) drag_slots: Vec<i16>,
}

impl Default for Inventory {
    fn default() -> Self {
        Self::new()
    }
}

impl Inventory {
    pub fn new() -> Self {
        Self {
            slots: HashMap::new(),
            carried: Slot::EMPTY,
            last_state_id: 0,
            dragging: false,
            drag_button: 0,
            drag_slots: Vec::new(),
        }
    }

    /// Bump and return the state id for a server-initiated sync.
    pub fn next_state_id(&mut self) -> i32 {
        self.last_state_id += 1;
        self.last_state_id
    }

    pub fn slot(&self, index: i16) -> Slot {
        self.slots.get(&index).copied().unwrap_or(Slot::EMPTY)
    }

    pub fn set_slot(&mut self, index: i16, slot: Slot) {
        if slot.is_empty() {
            self.slots.remove(&index);
        } else {
            self.slots.insert(index, slot);
        }
    }

    pub fn clear_slot(&mut self, index: i16) {
        self.slots.remove(&index);
    }

    pub(crate) fn with_slot<R>(&mut self, index: i16, f: impl FnOnce(&mut Slot) -> R) -> R {
        let mut slot = self.slot(index);
        let result = f(&mut slot);
        slot.normalize();
        self.set_slot(index, slot);
        result
    }

    /// The 2x2 crafting grid as a row-major item-id array.
    pub fn crafting_input(&self) -> [i32; 4] {
        let mut input = [0i32; 4];
        for (i, slot_value) in input.iter_mut().enumerate() {
            *slot_value = self.slot(SLOT_CRAFT_FIRST + i as i16).item_id;
        }
        input
    }

    /// Snapshot of every window slot in index order, for the full-content
    /// packet.
    pub fn content_snapshot(&self) -> Vec<Option<ItemStack>> {
        (0..SLOT_COUNT as i16).map(|i| self.slot(i).to_wire()).collect()
    }

    /// Total item count per id across slots and the carried stack. The
    /// click engine conserves this except for explicit credits and drops.
    pub fn item_totals(&self) -> HashMap<i32, i64> {
        let mut totals = HashMap::new();
        for slot in self.slots.values() {
            if !slot.is_empty() {
                *totals.entry(slot.item_id).or_insert(0) += slot.count as i64;
            }
        }
        if !self.carried.is_empty() {
            *totals.entry(self.carried.item_id).or_insert(0) += self.carried.count as i64;
        }
        totals
    }

    /// Find the hotbar slot the active index points at.
    pub fn hotbar_slot(active_index: u8) -> i16 {
        SLOT_HOTBAR_FIRST + active_index as i16
    }

    /// Whether the hotbar and main storage together have room for the
    /// whole stack.
    pub fn can_accept(&self, item: Slot) -> bool {
        if item.is_empty() {
            return true;
        }
        let max = stack_size(item.item_id);
        let mut space = 0i32;
        for index in (SLOT_HOTBAR_FIRST..=SLOT_HOTBAR_LAST).chain(SLOT_MAIN_FIRST..=SLOT_MAIN_LAST) {
            let slot = self.slot(index);
            if slot.is_empty() {
                space += max as i32;
            } else if slot.item_id == item.item_id {
                space += (max - slot.count) as i32;
            }
            if space >= item.count as i32 {
                return true;
            }
        }
        false
    }

    /// Insert a picked-up stack: merge with matching hotbar and main
    /// stacks first, then fill empty slots. Returns what did not fit.
    pub fn add_item(&mut self, item: Slot) -> Slot {
        if item.is_empty() {
            return Slot::EMPTY;
        }
        let max = stack_size(item.item_id);
        let mut remaining = item.count;
        let order: Vec<i16> = (SLOT_HOTBAR_FIRST..=SLOT_HOTBAR_LAST)
            .chain(SLOT_MAIN_FIRST..=SLOT_MAIN_LAST)
            .collect();
        for &index in &order {
            if remaining == 0 {
                break;
            }
            let slot = self.slot(index);
            if slot.item_id == item.item_id && slot.count < max {
                let to_add = remaining.min(max - slot.count);
                self.with_slot(index, |s| s.count += to_add);
                remaining -= to_add;
            }
        }
        for &index in &order {
            if remaining == 0 {
                break;
            }
            if self.slot(index).is_empty() {
                let to_add = remaining.min(max);
                self.set_slot(index, Slot::new(item.item_id, to_add));
                remaining -= to_add;
            }
        }
        if remaining == 0 {
            Slot::EMPTY
        } else {
            Slot::new(item.item_id, remaining)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sparse_slots_default_empty() {
        let inv = Inventory::new();
        assert!(inv.slot(17).is_empty());
        assert_eq!(inv.content_snapshot().len(), SLOT_COUNT);
        assert!(inv.content_snapshot().iter().all(Option::is_none));
    }

    #[test]
    fn test_set_empty_removes_entry() {
        let mut inv = Inventory::new();
        inv.set_slot(10, Slot::new(5, 3));
        assert_eq!(inv.slot(10), Slot::new(5, 3));
        inv.set_slot(10, Slot::EMPTY);
        assert!(inv.slots.is_empty());
    }

    #[test]
    fn test_crafting_input_layout() {
        let mut inv = Inventory::new();
        inv.set_slot(1, Slot::new(11, 1));
        inv.set_slot(4, Slot::new(44, 1));
        assert_eq!(inv.crafting_input(), [11, 0, 0, 44]);
    }

    #[test]
    fn test_add_item_merges_then_fills() {
        let mut inv = Inventory::new();
        inv.set_slot(SLOT_HOTBAR_FIRST, Slot::new(7, 60));
        let leftover = inv.add_item(Slot::new(7, 10));
        assert!(leftover.is_empty());
        assert_eq!(inv.slot(SLOT_HOTBAR_FIRST), Slot::new(7, 64));
        assert_eq!(inv.slot(SLOT_HOTBAR_FIRST + 1), Slot::new(7, 6));
    }

    #[test]
    fn test_add_item_reports_overflow_when_full() {
        let mut inv = Inventory::new();
        for index in SLOT_MAIN_FIRST..=SLOT_MAIN_LAST {
            inv.set_slot(index, Slot::new(9, 64));
        }
        for index in SLOT_HOTBAR_FIRST..=SLOT_HOTBAR_LAST {
            inv.set_slot(index, Slot::new(9, 64));
        }
        let leftover = inv.add_item(Slot::new(7, 5));
        assert_eq!(leftover, Slot::new(7, 5));
    }

    #[test]
    fn test_item_totals() {
        let mut inv = Inventory::new();
        inv.set_slot(9, Slot::new(7, 10));
        inv.set_slot(36, Slot::new(7, 5));
        inv.carried = Slot::new(3, 2);
        let totals = inv.item_totals();
        assert_eq!(totals.get(&7), Some(&15));
        assert_eq!(totals.get(&3), Some(&2));
    }
}

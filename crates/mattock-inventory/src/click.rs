//! Mode-and-button click resolution and client reconciliation.

use crate::recipe::RecipeSet;
use crate::slots::{
    stack_size, Inventory, Slot, SLOT_CRAFT_FIRST, SLOT_CRAFT_LAST, SLOT_HOTBAR_FIRST,
    SLOT_HOTBAR_LAST, SLOT_MAIN_FIRST, SLOT_MAIN_LAST, SLOT_OUTSIDE, SLOT_RESULT,
};
use tracing::debug;

/// A decoded container-click request.
#[derive(Debug, Clone)]
pub struct ClickPacket {
    pub window_id: u8,
    pub state_id: i32,
    pub slot: i16,
    pub button: i8,
    pub mode: i32,
    /// Slots the client believes changed, with its view of their contents.
    pub changed_slots: Vec<(i16, Slot)>,
    /// The client's view of the cursor stack.
    pub carried: Slot,
}

/// What the session must send to reconcile the client.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncAction {
    /// Re-send the whole window.
    FullResync,
    /// Correct a single slot.
    SlotUpdate(i16, Slot),
}

impl Inventory {
    /// Resolve a click against window 0 and produce the reconciliation
    /// plan. Items dropped at the outside sentinel are returned so the
    /// caller can spawn item entities.
    pub fn handle_click(&mut self, click: &ClickPacket, recipes: &RecipeSet) -> (Vec<SyncAction>, Vec<Slot>) {
        if click.window_id != 0 {
            debug!("ignoring click for window id {}", click.window_id);
            return (Vec::new(), Vec::new());
        }

        let need_full_resync = click.state_id != self.last_state_id;
        let mut dropped = Vec::new();

        match click.mode {
            0 => self.click_normal(click, &mut dropped),
            1 => self.click_shift(click, recipes),
            2 => self.click_number_key(click),
            5 => self.click_drag(click),
            6 => self.click_double(click),
            other => {
                debug!("unhandled click mode {other}");
            }
        }

        // Crafting-grid changes re-resolve the result slot; taking the
        // result consumes one unit of each matched ingredient.
        if click
            .changed_slots
            .iter()
            .any(|(slot, _)| (SLOT_CRAFT_FIRST..=SLOT_CRAFT_LAST).contains(slot))
        {
            self.update_crafting_result(recipes);
        }
        if click.changed_slots.iter().any(|(slot, _)| *slot == SLOT_RESULT) {
            self.consume_crafting_ingredients(recipes);
            self.update_crafting_result(recipes);
        }

        self.last_state_id = click.state_id;

        let mut actions = Vec::new();
        if need_full_resync {
            actions.push(SyncAction::FullResync);
            return (actions, dropped);
        }

        for (slot_index, client_view) in &click.changed_slots {
            let server_view = self.slot(*slot_index);
            if server_view != *client_view {
                actions.push(SyncAction::SlotUpdate(*slot_index, server_view));
            }
            if (SLOT_CRAFT_FIRST..=SLOT_CRAFT_LAST).contains(slot_index) {
                actions.push(SyncAction::SlotUpdate(SLOT_RESULT, self.slot(SLOT_RESULT)));
            }
        }
        if self.carried != click.carried {
            actions.push(SyncAction::FullResync);
        }
        (actions, dropped)
    }

    fn click_normal(&mut self, click: &ClickPacket, dropped: &mut Vec<Slot>) {
        if click.slot >= 0 {
            match click.button {
                0 => self.left_click_slot(click.slot),
                1 => self.right_click_slot(click.slot),
                _ => {}
            }
        } else if click.slot == SLOT_OUTSIDE {
            match click.button {
                0 => {
                    // Drop the whole carried stack.
                    if !self.carried.is_empty() {
                        dropped.push(self.carried);
                    }
                    self.carried.clear();
                }
                1 => {
                    if !self.carried.is_empty() {
                        dropped.push(Slot::new(self.carried.item_id, 1));
                        self.carried.count -= 1;
                        self.carried.normalize();
                    }
                }
                _ => {}
            }
        }
    }

    fn left_click_slot(&mut self, slot_index: i16) {
        let carried = self.carried;
        if carried.is_empty() {
            // Pick up the whole stack.
            self.carried = self.slot(slot_index);
            self.clear_slot(slot_index);
            return;
        }
        let clicked = self.slot(slot_index);
        let same_or_empty = clicked.item_id == carried.item_id || clicked.is_empty();
        if same_or_empty && slot_index > SLOT_RESULT {
            // Place into the slot up to the stack limit.
            let max = stack_size(carried.item_id);
            let space = max - clicked.count;
            let moved = carried.count.min(space);
            self.with_slot(slot_index, |slot| {
                slot.item_id = carried.item_id;
                slot.count += moved;
            });
            self.carried.count -= moved;
            self.carried.normalize();
        } else if same_or_empty && slot_index == SLOT_RESULT {
            // Pull the result onto the cursor.
            let max = stack_size(carried.item_id);
            let space = max - carried.count;
            let moved = clicked.count.min(space);
            self.carried.count += moved;
            self.with_slot(slot_index, |slot| slot.count -= moved);
        } else if slot_index > SLOT_RESULT {
            // Different item: swap.
            self.set_slot(slot_index, carried);
            self.carried = clicked;
        }
    }

    fn right_click_slot(&mut self, slot_index: i16) {
        let carried = self.carried;
        if carried.is_empty() {
            // Pick up half, rounding up.
            let clicked = self.slot(slot_index);
            if clicked.is_empty() {
                return;
            }
            let half = (clicked.count + 1) / 2;
            self.carried = Slot::new(clicked.item_id, half);
            self.with_slot(slot_index, |slot| slot.count -= half);
            return;
        }
        let clicked = self.slot(slot_index);
        let same_or_empty = clicked.item_id == carried.item_id || clicked.is_empty();
        if same_or_empty && slot_index > SLOT_RESULT {
            // Place exactly one.
            if clicked.count < stack_size(carried.item_id) {
                self.with_slot(slot_index, |slot| {
                    slot.item_id = carried.item_id;
                    slot.count += 1;
                });
                self.carried.count -= 1;
                self.carried.normalize();
            }
        } else if same_or_empty && slot_index == SLOT_RESULT {
            let max = stack_size(carried.item_id);
            let space = max - carried.count;
            let moved = clicked.count.min(space);
            self.carried.count += moved;
            self.with_slot(slot_index, |slot| slot.count -= moved);
        } else {
            // Different item: full swap.
            self.set_slot(slot_index, carried);
            self.carried = clicked;
        }
    }

    fn click_shift(&mut self, click: &ClickPacket, recipes: &RecipeSet) {
        if click.slot > SLOT_RESULT {
            self.move_to_other_section(click.slot);
        }
        // Shift-clicking the result slot crafts as long as ingredients allow.
        while recipes.find_match(&self.crafting_input()).is_some() && !self.slot(SLOT_RESULT).is_empty() {
            self.consume_crafting_ingredients(recipes);
            self.move_to_other_section(click.slot);
            self.update_crafting_result(recipes);
            if click.slot != SLOT_RESULT {
                break;
            }
        }
    }

    fn click_number_key(&mut self, click: &ClickPacket) {
        if click.slot >= 0 && (0..=8).contains(&click.button) {
            let hotbar = SLOT_HOTBAR_FIRST + click.button as i16;
            let a = self.slot(click.slot);
            let b = self.slot(hotbar);
            self.set_slot(click.slot, b);
            self.set_slot(hotbar, a);
        }
    }

    fn click_drag(&mut self, click: &ClickPacket) {
        if click.slot == SLOT_OUTSIDE {
            match click.button {
                // Start drag: 0 = left, 4 = right, 8 = middle.
                0 | 4 | 8 => {
                    self.dragging = true;
                    self.drag_button = click.button;
                    self.drag_slots.clear();
                }
                // End drag.
                2 | 6 | 10 => {
                    if !self.dragging {
                        return;
                    }
                    self.finish_drag();
                    self.dragging = false;
                    self.drag_slots.clear();
                }
                _ => {}
            }
        } else if self.dragging && !self.drag_slots.contains(&click.slot) {
            self.drag_slots.push(click.slot);
        }
    }

    fn finish_drag(&mut self) {
        if self.carried.is_empty() || self.drag_slots.is_empty() {
            return;
        }
        let drag_slots = std::mem::take(&mut self.drag_slots);
        let carried_id = self.carried.item_id;
        let max = stack_size(carried_id);
        match self.drag_button {
            0 => {
                // Left drag: distribute evenly, remainder stays carried.
                let per_slot = self.carried.count / drag_slots.len() as i8;
                for slot_index in &drag_slots {
                    let slot = self.slot(*slot_index);
                    if slot.is_empty() || slot.item_id == carried_id {
                        let space = max - slot.count;
                        let to_add = per_slot.min(space);
                        if to_add > 0 {
                            self.with_slot(*slot_index, |s| {
                                s.item_id = carried_id;
                                s.count += to_add;
                            });
                            self.carried.count -= to_add;
                        }
                    }
                }
            }
            4 => {
                // Right drag: one per slot.
                for slot_index in &drag_slots {
                    if self.carried.count == 0 {
                        break;
                    }
                    let slot = self.slot(*slot_index);
                    if (slot.is_empty() || slot.item_id == carried_id) && slot.count < max {
                        self.with_slot(*slot_index, |s| {
                            s.item_id = carried_id;
                            s.count += 1;
                        });
                        self.carried.count -= 1;
                    }
                }
            }
            8 => {
                // Middle (creative) drag: full stacks, cursor untouched.
                for slot_index in &drag_slots {
                    self.set_slot(*slot_index, Slot::new(carried_id, max));
                }
            }
            _ => {}
        }
        self.carried.normalize();
        self.drag_slots = drag_slots;
    }

    fn click_double(&mut self, click: &ClickPacket) {
        if click.slot < 0 || click.button != 0 {
            return;
        }
        if self.carried.is_empty() {
            let clicked = self.slot(click.slot);
            if clicked.is_empty() {
                return;
            }
            self.carried = clicked;
            self.clear_slot(click.slot);
        }
        if self.carried.is_empty() {
            return;
        }
        let target_id = self.carried.item_id;
        let max = stack_size(target_id);
        // Gather matching items from every slot into the cursor.
        let indices: Vec<i16> = (0..crate::slots::SLOT_COUNT as i16).collect();
        for slot_index in indices {
            if self.carried.count >= max {
                break;
            }
            let slot = self.slot(slot_index);
            if slot.item_id == target_id && !slot.is_empty() && slot_index != SLOT_RESULT {
                let can_take = slot.count.min(max - self.carried.count);
                if can_take > 0 {
                    self.carried.count += can_take;
                    self.with_slot(slot_index, |s| s.count -= can_take);
                }
            }
        }
    }

    /// Shift-click transfer: main <-> hotbar, everything else to main.
    /// Merges with existing stacks first, then fills empty slots.
    fn move_to_other_section(&mut self, slot_index: i16) {
        let from = self.slot(slot_index);
        if from.is_empty() {
            return;
        }
        let (start, end) = if (SLOT_MAIN_FIRST..=SLOT_MAIN_LAST).contains(&slot_index) {
            (SLOT_HOTBAR_FIRST, SLOT_HOTBAR_LAST)
        } else if (SLOT_HOTBAR_FIRST..=SLOT_HOTBAR_LAST).contains(&slot_index) {
            (SLOT_MAIN_FIRST, SLOT_MAIN_LAST)
        } else {
            (SLOT_MAIN_FIRST, SLOT_MAIN_LAST)
        };

        let max = stack_size(from.item_id);
        let mut remaining = from.count;

        for target in start..=end {
            if remaining == 0 {
                break;
            }
            let slot = self.slot(target);
            if slot.item_id == from.item_id && slot.count < max {
                let to_add = remaining.min(max - slot.count);
                self.with_slot(target, |s| s.count += to_add);
                remaining -= to_add;
            }
        }
        for target in start..=end {
            if remaining == 0 {
                break;
            }
            if self.slot(target).is_empty() {
                let to_add = remaining.min(max);
                self.set_slot(target, Slot::new(from.item_id, to_add));
                remaining -= to_add;
            }
        }

        self.with_slot(slot_index, |s| s.count = remaining);
    }

    /// Re-resolve the crafting result from the grid contents.
    pub fn update_crafting_result(&mut self, recipes: &RecipeSet) {
        let input = self.crafting_input();
        match recipes.find_match(&input) {
            Some(recipe) => {
                self.set_slot(SLOT_RESULT, Slot::new(recipe.result, recipe.result_count));
            }
            None => self.clear_slot(SLOT_RESULT),
        }
    }

    /// Consume one unit of each ingredient of the recipe currently matched
    /// by the grid.
    pub fn consume_crafting_ingredients(&mut self, recipes: &RecipeSet) {
        let input = self.crafting_input();
        let recipe = match recipes.find_match(&input) {
            Some(r) => r.clone(),
            None => return,
        };

        if !recipe.shapeless {
            let (x_off, y_off) = match recipe.find_placement(&input) {
                Some(p) => p,
                None => return,
            };
            for y in 0..recipe.height as usize {
                for x in 0..recipe.width as usize {
                    let ingredient = recipe.ingredients[x + y * recipe.width as usize];
                    if ingredient != 0 {
                        let grid_index = (x + x_off) + (y + y_off) * 2;
                        let slot_index = SLOT_CRAFT_FIRST + grid_index as i16;
                        self.with_slot(slot_index, |s| {
                            if s.count > 0 {
                                s.count -= 1;
                            }
                        });
                    }
                }
            }
        } else {
            let mut needed: std::collections::HashMap<i32, i32> = std::collections::HashMap::new();
            for &ing in &recipe.ingredients {
                if ing != 0 {
                    *needed.entry(ing).or_insert(0) += 1;
                }
            }
            for slot_index in SLOT_CRAFT_FIRST..=SLOT_CRAFT_LAST {
                let slot = self.slot(slot_index);
                if slot.is_empty() {
                    continue;
                }
                if let Some(count) = needed.get_mut(&slot.item_id) {
                    if *count > 0 {
                        *count -= 1;
                        self.with_slot(slot_index, |s| s.count -= 1);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recipe::{items, CraftingRecipe};

    fn click(slot: i16, button: i8, mode: i32, inv: &Inventory) -> ClickPacket {
        ClickPacket {
            window_id: 0,
            state_id: inv.last_state_id,
            slot,
            button,
            mode,
            changed_slots: Vec::new(),
            carried: Slot::EMPTY,
        }
    }

    fn totals_sum(inv: &Inventory) -> i64 {
        inv.item_totals().values().sum()
    }

    #[test]
    fn test_left_click_pick_up_and_place() {
        let mut inv = Inventory::new();
        let recipes = RecipeSet::new();
        inv.set_slot(10, Slot::new(7, 20));

        let (_, dropped) = inv.handle_click(&click(10, 0, 0, &inv), &recipes);
        assert!(dropped.is_empty());
        assert_eq!(inv.carried, Slot::new(7, 20));
        assert!(inv.slot(10).is_empty());

        inv.handle_click(&click(11, 0, 0, &inv), &recipes);
        assert_eq!(inv.slot(11), Slot::new(7, 20));
        assert!(inv.carried.is_empty());
    }

    #[test]
    fn test_left_click_merges_same_type() {
        let mut inv = Inventory::new();
        let recipes = RecipeSet::new();
        inv.set_slot(10, Slot::new(7, 60));
        inv.carried = Slot::new(7, 10);
        let before = totals_sum(&inv);

        inv.handle_click(&click(10, 0, 0, &inv), &recipes);
        assert_eq!(inv.slot(10), Slot::new(7, 64));
        assert_eq!(inv.carried, Slot::new(7, 6));
        assert_eq!(totals_sum(&inv), before);
    }

    #[test]
    fn test_left_click_swaps_different_type() {
        let mut inv = Inventory::new();
        let recipes = RecipeSet::new();
        inv.set_slot(10, Slot::new(7, 5));
        inv.carried = Slot::new(9, 3);
        inv.handle_click(&click(10, 0, 0, &inv), &recipes);
        assert_eq!(inv.slot(10), Slot::new(9, 3));
        assert_eq!(inv.carried, Slot::new(7, 5));
    }

    #[test]
    fn test_right_click_picks_half_rounding_up() {
        let mut inv = Inventory::new();
        let recipes = RecipeSet::new();
        inv.set_slot(12, Slot::new(7, 5));
        inv.handle_click(&click(12, 1, 0, &inv), &recipes);
        assert_eq!(inv.carried, Slot::new(7, 3));
        assert_eq!(inv.slot(12), Slot::new(7, 2));
    }

    #[test]
    fn test_right_click_places_one() {
        let mut inv = Inventory::new();
        let recipes = RecipeSet::new();
        inv.carried = Slot::new(7, 5);
        inv.handle_click(&click(13, 1, 0, &inv), &recipes);
        assert_eq!(inv.slot(13), Slot::new(7, 1));
        assert_eq!(inv.carried, Slot::new(7, 4));
    }

    #[test]
    fn test_outside_drop() {
        let mut inv = Inventory::new();
        let recipes = RecipeSet::new();
        inv.carried = Slot::new(7, 5);
        let (_, dropped) = inv.handle_click(&click(SLOT_OUTSIDE, 0, 0, &inv), &recipes);
        assert_eq!(dropped, vec![Slot::new(7, 5)]);
        assert!(inv.carried.is_empty());

        inv.carried = Slot::new(7, 5);
        let (_, dropped) = inv.handle_click(&click(SLOT_OUTSIDE, 1, 0, &inv), &recipes);
        assert_eq!(dropped, vec![Slot::new(7, 1)]);
        assert_eq!(inv.carried, Slot::new(7, 4));
    }

    #[test]
    fn test_shift_click_merges_then_fills() {
        let mut inv = Inventory::new();
        let recipes = RecipeSet::new();
        inv.set_slot(10, Slot::new(7, 40));
        inv.set_slot(36, Slot::new(7, 60));
        let before = totals_sum(&inv);

        inv.handle_click(&click(10, 0, 1, &inv), &recipes);
        // 4 merge into hotbar slot 36 (to 64), the rest fill slot 37.
        assert_eq!(inv.slot(36), Slot::new(7, 64));
        assert_eq!(inv.slot(37), Slot::new(7, 36));
        assert!(inv.slot(10).is_empty());
        assert_eq!(totals_sum(&inv), before);
    }

    #[test]
    fn test_number_key_swap() {
        let mut inv = Inventory::new();
        let recipes = RecipeSet::new();
        inv.set_slot(10, Slot::new(7, 4));
        inv.set_slot(38, Slot::new(9, 2));
        // Number key 3 => hotbar slot 38.
        inv.handle_click(&click(10, 2, 2, &inv), &recipes);
        assert_eq!(inv.slot(10), Slot::new(9, 2));
        assert_eq!(inv.slot(38), Slot::new(7, 4));
    }

    #[test]
    fn test_drag_left_distributes_evenly() {
        let mut inv = Inventory::new();
        let recipes = RecipeSet::new();
        inv.carried = Slot::new(7, 10);
        let before = totals_sum(&inv);

        inv.handle_click(&click(SLOT_OUTSIDE, 0, 5, &inv), &recipes);
        inv.handle_click(&click(20, 1, 5, &inv), &recipes);
        inv.handle_click(&click(21, 1, 5, &inv), &recipes);
        inv.handle_click(&click(22, 1, 5, &inv), &recipes);
        inv.handle_click(&click(SLOT_OUTSIDE, 2, 5, &inv), &recipes);

        assert_eq!(inv.slot(20), Slot::new(7, 3));
        assert_eq!(inv.slot(21), Slot::new(7, 3));
        assert_eq!(inv.slot(22), Slot::new(7, 3));
        // Remainder stays on the cursor.
        assert_eq!(inv.carried, Slot::new(7, 1));
        assert_eq!(totals_sum(&inv), before);
    }

    #[test]
    fn test_drag_right_one_per_slot() {
        let mut inv = Inventory::new();
        let recipes = RecipeSet::new();
        inv.carried = Slot::new(7, 5);

        inv.handle_click(&click(SLOT_OUTSIDE, 4, 5, &inv), &recipes);
        inv.handle_click(&click(20, 5, 5, &inv), &recipes);
        inv.handle_click(&click(21, 5, 5, &inv), &recipes);
        inv.handle_click(&click(SLOT_OUTSIDE, 6, 5, &inv), &recipes);

        assert_eq!(inv.slot(20), Slot::new(7, 1));
        assert_eq!(inv.slot(21), Slot::new(7, 1));
        assert_eq!(inv.carried, Slot::new(7, 3));
    }

    #[test]
    fn test_double_click_gathers() {
        let mut inv = Inventory::new();
        let recipes = RecipeSet::new();
        inv.set_slot(10, Slot::new(7, 10));
        inv.set_slot(20, Slot::new(7, 20));
        inv.set_slot(30, Slot::new(9, 8));
        inv.carried = Slot::new(7, 4);

        inv.handle_click(&click(10, 0, 6, &inv), &recipes);
        assert_eq!(inv.carried, Slot::new(7, 34));
        assert!(inv.slot(10).is_empty());
        assert!(inv.slot(20).is_empty());
        assert_eq!(inv.slot(30), Slot::new(9, 8));
    }

    #[test]
    fn test_craft_stick_scenario() {
        // Two planks stacked vertically, result credited, ingredients
        // consumed when the result is taken.
        let mut inv = Inventory::new();
        let recipes = RecipeSet::with_recipes(vec![CraftingRecipe::shaped(
            2,
            1,
            vec![items::OAK_PLANKS, items::OAK_PLANKS],
            items::STICK,
            1,
        )]);
        inv.set_slot(1, Slot::new(items::OAK_PLANKS, 3));
        inv.set_slot(2, Slot::new(items::OAK_PLANKS, 3));

        // Client reports the grid slots changed; engine resolves the result.
        let mut packet = click(1, 0, 0, &inv);
        packet.changed_slots = vec![(1, inv.slot(1)), (2, inv.slot(2))];
        packet.carried = inv.carried;
        inv.carried = Slot::EMPTY;
        // Use a no-op normal click on an unrelated slot to trigger resolution.
        packet.slot = 11;
        inv.handle_click(&packet, &recipes);
        assert_eq!(inv.slot(SLOT_RESULT), Slot::new(items::STICK, 1));

        // Take the result: left-click it with an empty cursor, client
        // reports slot 0 changed.
        let mut take = click(SLOT_RESULT, 0, 0, &inv);
        take.changed_slots = vec![(SLOT_RESULT, Slot::EMPTY)];
        inv.handle_click(&take, &recipes);
        assert_eq!(inv.carried, Slot::new(items::STICK, 1));
        assert_eq!(inv.slot(1), Slot::new(items::OAK_PLANKS, 2));
        assert_eq!(inv.slot(2), Slot::new(items::OAK_PLANKS, 2));
    }

    #[test]
    fn test_state_id_mismatch_forces_full_resync() {
        let mut inv = Inventory::new();
        let recipes = RecipeSet::new();
        inv.last_state_id = 5;
        let mut packet = click(10, 0, 0, &inv);
        packet.state_id = 3;
        let (actions, _) = inv.handle_click(&packet, &recipes);
        assert_eq!(actions, vec![SyncAction::FullResync]);
        assert_eq!(inv.last_state_id, 3);
    }

    #[test]
    fn test_disagreeing_slot_gets_single_update() {
        let mut inv = Inventory::new();
        let recipes = RecipeSet::new();
        inv.set_slot(10, Slot::new(7, 10));
        let mut packet = click(10, 0, 0, &inv);
        // Client claims the slot now holds 9 items; server picked up all 10.
        packet.changed_slots = vec![(10, Slot::new(7, 9))];
        packet.carried = inv.carried;
        let (actions, _) = inv.handle_click(&packet, &recipes);
        // Carried mismatch also forces a resync: client said empty cursor.
        assert!(actions.contains(&SyncAction::SlotUpdate(10, Slot::EMPTY)));
        assert!(actions.contains(&SyncAction::FullResync));
    }

    #[test]
    fn test_item_conservation_over_click_storm() {
        let mut inv = Inventory::new();
        let recipes = RecipeSet::new();
        inv.set_slot(9, Slot::new(7, 30));
        inv.set_slot(36, Slot::new(7, 64));
        inv.set_slot(20, Slot::new(9, 12));
        let before = inv.item_totals();

        for (slot, button, mode) in [
            (9i16, 0i8, 0i32),
            (20, 1, 0),
            (36, 0, 1),
            (10, 2, 2),
            (9, 0, 6),
        ] {
            inv.handle_click(&click(slot, button, mode, &inv), &recipes);
        }

        // Nothing was dropped or crafted, so totals must be unchanged.
        assert_eq!(inv.item_totals(), before);
    }
}

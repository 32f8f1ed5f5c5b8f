//! Shaped and shapeless crafting recipes resolved against the player's
//! 2x2 grid.

use std::collections::HashMap;

/// Item registry ids for the built-in recipe set.
pub mod items {
    pub const OAK_LOG: i32 = 130;
    pub const OAK_PLANKS: i32 = 36;
    pub const STICK: i32 = 915;
    pub const CRAFTING_TABLE: i32 = 309;
    pub const COAL: i32 = 799;
    pub const TORCH: i32 = 285;
}

/// A crafting recipe. Shaped recipes have `width`/`height` <= 2 and an
/// ordered ingredient grid where 0 means empty; shapeless recipes treat
/// `ingredients` as a multiset.
#[derive(Debug, Clone)]
pub struct CraftingRecipe {
    pub shapeless: bool,
    pub width: u8,
    pub height: u8,
    pub ingredients: Vec<i32>,
    pub result: i32,
    pub result_count: i8,
}

impl CraftingRecipe {
    pub fn shaped(width: u8, height: u8, ingredients: Vec<i32>, result: i32, result_count: i8) -> Self {
        debug_assert_eq!(ingredients.len(), (width * height) as usize);
        Self {
            shapeless: false,
            width,
            height,
            ingredients,
            result,
            result_count,
        }
    }

    pub fn shapeless(ingredients: Vec<i32>, result: i32, result_count: i8) -> Self {
        Self {
            shapeless: true,
            width: 0,
            height: 0,
            ingredients,
            result,
            result_count,
        }
    }

    /// Does this recipe match the 2x2 input grid (row-major, 0 = empty)?
    pub fn matches(&self, input: &[i32; 4]) -> bool {
        if self.shapeless {
            self.matches_shapeless(input)
        } else {
            self.find_placement(input).is_some()
        }
    }

    fn matches_shapeless(&self, input: &[i32; 4]) -> bool {
        let mut needed: HashMap<i32, i32> = HashMap::new();
        for &ing in &self.ingredients {
            if ing != 0 {
                *needed.entry(ing).or_insert(0) += 1;
            }
        }
        for &item in input {
            if item != 0 {
                match needed.get_mut(&item) {
                    Some(count) if *count > 0 => *count -= 1,
                    _ => return false,
                }
            }
        }
        needed.values().all(|&count| count == 0)
    }

    /// Enumerate every placement of the recipe within the 2x2 grid; a
    /// placement matches only if all uncovered cells are empty.
    pub fn find_placement(&self, input: &[i32; 4]) -> Option<(usize, usize)> {
        if self.shapeless || self.width > 2 || self.height > 2 {
            return None;
        }
        let max_x_off = (2 - self.width) as usize;
        let max_y_off = (2 - self.height) as usize;
        for y_off in 0..=max_y_off {
            for x_off in 0..=max_x_off {
                if self.placement_matches(input, x_off, y_off) {
                    return Some((x_off, y_off));
                }
            }
        }
        None
    }

    fn placement_matches(&self, input: &[i32; 4], x_off: usize, y_off: usize) -> bool {
        let get_input = |x: usize, y: usize| input[x + y * 2];
        for ry in 0..self.height as usize {
            for rx in 0..self.width as usize {
                let required = self.ingredients[rx + ry * self.width as usize];
                if get_input(rx + x_off, ry + y_off) != required {
                    return false;
                }
            }
        }
        // Cells outside the covered rectangle must be empty.
        for y in 0..2 {
            for x in 0..2 {
                let covered = x >= x_off
                    && x < x_off + self.width as usize
                    && y >= y_off
                    && y < y_off + self.height as usize;
                if !covered && get_input(x, y) != 0 {
                    return false;
                }
            }
        }
        true
    }
}

/// The server's recipe list.
pub struct RecipeSet {
    recipes: Vec<CraftingRecipe>,
}

impl Default for RecipeSet {
    fn default() -> Self {
        Self::new()
    }
}

impl RecipeSet {
    /// The built-in 2x2-craftable recipes.
    pub fn new() -> Self {
        Self {
            recipes: vec![
                CraftingRecipe::shapeless(vec![items::OAK_LOG], items::OAK_PLANKS, 4),
                CraftingRecipe::shaped(
                    1,
                    2,
                    vec![items::OAK_PLANKS, items::OAK_PLANKS],
                    items::STICK,
                    4,
                ),
                CraftingRecipe::shaped(
                    2,
                    2,
                    vec![
                        items::OAK_PLANKS,
                        items::OAK_PLANKS,
                        items::OAK_PLANKS,
                        items::OAK_PLANKS,
                    ],
                    items::CRAFTING_TABLE,
                    1,
                ),
                CraftingRecipe::shaped(1, 2, vec![items::COAL, items::STICK], items::TORCH, 4),
            ],
        }
    }

    pub fn with_recipes(recipes: Vec<CraftingRecipe>) -> Self {
        Self { recipes }
    }

    pub fn find_match(&self, input: &[i32; 4]) -> Option<&CraftingRecipe> {
        self.recipes.iter().find(|r| r.matches(input))
    }

    pub fn iter(&self) -> impl Iterator<Item = &CraftingRecipe> {
        self.recipes.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shaped_match_with_offset() {
        // Two planks side by side, width 2 height 1: matches only at (0, 0)
        // with the bottom row empty.
        let recipe = CraftingRecipe::shaped(
            2,
            1,
            vec![items::OAK_PLANKS, items::OAK_PLANKS],
            items::STICK,
            1,
        );
        let top = [items::OAK_PLANKS, items::OAK_PLANKS, 0, 0];
        assert_eq!(recipe.find_placement(&top), Some((0, 0)));
        let bottom = [0, 0, items::OAK_PLANKS, items::OAK_PLANKS];
        assert_eq!(recipe.find_placement(&bottom), Some((0, 1)));
    }

    #[test]
    fn test_shaped_rejects_extra_items() {
        let recipe = CraftingRecipe::shaped(
            2,
            1,
            vec![items::OAK_PLANKS, items::OAK_PLANKS],
            items::STICK,
            1,
        );
        let input = [items::OAK_PLANKS, items::OAK_PLANKS, items::COAL, 0];
        assert_eq!(recipe.find_placement(&input), None);
    }

    #[test]
    fn test_vertical_shaped_both_columns() {
        let recipe = CraftingRecipe::shaped(
            1,
            2,
            vec![items::OAK_PLANKS, items::OAK_PLANKS],
            items::STICK,
            4,
        );
        let left = [items::OAK_PLANKS, 0, items::OAK_PLANKS, 0];
        assert_eq!(recipe.find_placement(&left), Some((0, 0)));
        let right = [0, items::OAK_PLANKS, 0, items::OAK_PLANKS];
        assert_eq!(recipe.find_placement(&right), Some((1, 0)));
    }

    #[test]
    fn test_shapeless_multiset() {
        let recipe = CraftingRecipe::shapeless(vec![items::OAK_LOG], items::OAK_PLANKS, 4);
        assert!(recipe.matches(&[items::OAK_LOG, 0, 0, 0]));
        assert!(recipe.matches(&[0, 0, 0, items::OAK_LOG]));
        // Extra ingredient breaks the match.
        assert!(!recipe.matches(&[items::OAK_LOG, items::COAL, 0, 0]));
        // Two of the same when one is needed breaks it too.
        assert!(!recipe.matches(&[items::OAK_LOG, items::OAK_LOG, 0, 0]));
    }

    #[test]
    fn test_shapeless_exact_multiset_law() {
        // bag(input minus zeros) == bag(ingredients) is both necessary and
        // sufficient.
        let recipe =
            CraftingRecipe::shapeless(vec![items::COAL, items::COAL, items::STICK], 999, 1);
        assert!(recipe.matches(&[items::COAL, items::STICK, items::COAL, 0]));
        assert!(!recipe.matches(&[items::COAL, items::STICK, 0, 0]));
        assert!(!recipe.matches(&[items::COAL, items::STICK, items::COAL, items::COAL]));
    }

    #[test]
    fn test_recipe_set_lookup() {
        let set = RecipeSet::new();
        let result = set.find_match(&[items::OAK_LOG, 0, 0, 0]).unwrap();
        assert_eq!(result.result, items::OAK_PLANKS);
        assert_eq!(result.result_count, 4);
        assert!(set.find_match(&[items::TORCH, 0, 0, 0]).is_none());
    }
}

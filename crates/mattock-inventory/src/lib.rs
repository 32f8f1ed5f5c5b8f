pub mod click;
pub mod recipe;
pub mod slots;

pub use click::{ClickPacket, SyncAction};
pub use recipe::{items, CraftingRecipe, RecipeSet};
pub use slots::{Inventory, Slot};

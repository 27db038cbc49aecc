//! In-process event bus for task lifecycle notifications.
//!
//! The scheduler and polling engine publish [`TaskEvent`]s here instead of
//! calling interested parties directly; collaborators (history views, balance
//! displays, re-login prompts) subscribe and react on their own schedule.

pub mod bus;

pub use bus::{EventBus, TaskEvent};

//! Enforcement core: process inventory, policy evaluation and throttling.
//!
//! Nothing in here performs remote I/O; the scheduler feeds these pieces and
//! routes their decisions to `crate::enforce`.

pub mod inventory;
pub mod policy;
pub mod throttle;

pub use inventory::{inventory_for, CommandInventory, InventoryKind, ProcessInventory, SysinfoInventory};
pub use policy::{evaluate, is_system_process, names_match};
pub use throttle::{ThrottleSettings, ViolationThrottle};

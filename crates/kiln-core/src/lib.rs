pub mod branch;
pub mod config;
pub mod events;
pub mod state;
pub mod types;

pub use branch::*;
pub use config::*;
pub use events::*;
pub use state::*;
pub use types::*;

#[cfg(test)]
mod tests {
    use super::{derive_branch_name, SessionStep, Ticket, TicketId, WorktreeStatus};
    use std::any::TypeId;

    #[test]
    fn crate_root_reexports_core_types() {
        let _ = TypeId::of::<Ticket>();
        let _ = TypeId::of::<TicketId>();
        let _ = TypeId::of::<SessionStep>();
        let _ = TypeId::of::<WorktreeStatus>();
    }

    #[test]
    fn crate_root_reexports_branch_helper() {
        assert_eq!(derive_branch_name("A-1", "b"), "a-1-b");
    }
}

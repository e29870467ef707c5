pub mod events;
pub mod ids;
pub mod state;

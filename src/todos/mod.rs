//! TODO / bug-report records generated from events and inbound email.

pub mod generator;
pub mod model;
pub mod store;

pub use generator::TodoGenerator;
pub use model::{TodoRecord, TodoStatus};
pub use store::TodoStore;

mod live;
mod memory;
mod model;
mod mysql;
mod store;

pub use live::*;
pub use memory::*;
pub use model::*;
pub use mysql::*;
pub use store::*;

pub mod errors;
pub mod space;
pub mod state;

pub use errors::*;
pub use space::*;
pub use state::*;

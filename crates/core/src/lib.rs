pub mod error;
pub mod models;
pub mod time;
pub mod traits;

pub use error::*;
pub use models::*;
pub use time::*;
pub use traits::*;

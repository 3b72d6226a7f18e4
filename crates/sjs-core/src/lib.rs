pub mod error;
pub mod types;
pub mod value;

pub use error::{ErrorKind, SjsError};
pub use types::*;
pub use value::*;

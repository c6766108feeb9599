pub mod error;
pub mod types;
pub mod value;

pub use error::{CacheError, Result};
pub use types::{Column, ForeignKey, Row, estimated_row_bytes};
pub use value::{DataType, Value};

mod field_value;
mod filter;
mod record;
mod report;

pub use field_value::*;
pub use filter::*;
pub use record::*;
pub use report::*;

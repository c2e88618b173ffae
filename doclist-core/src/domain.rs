pub mod doctype;
pub mod document;
pub mod filter;
pub mod ids;
pub mod permission;
pub mod query;
pub mod registry;
pub mod savepoint;
pub mod value;

pub use doctype::*;
pub use document::*;
pub use filter::*;
pub use ids::*;
pub use permission::*;
pub use query::*;
pub use registry::*;
pub use savepoint::*;
pub use value::*;

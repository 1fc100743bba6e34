mod coercion;
mod expression;
mod template;

pub use coercion::*;
pub use expression::*;
pub use template::*;

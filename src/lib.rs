mod ast;
mod engine;
mod error;
mod escape;
mod interface;
mod parser;
mod template;
mod value;

// Public exports.
pub use engine::{Options, StencilEngine};
pub use error::{HelperError, ParseError, ParseErrorKind, StencilError, StencilResult};
pub use escape::escape_html;
pub use interface::{Context, Helper, StencilInterface, helper};
pub use value::Value;

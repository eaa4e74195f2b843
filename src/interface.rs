use std::{collections::BTreeMap, path::Path, sync::Arc};

use crate::error::{HelperError, StencilResult};
use crate::value::Value;

/// A named helper function callable from marker expressions.
///
/// Helpers receive their evaluated arguments and return a [`Value`]; a
/// returned array is joined with the empty separator and spliced unescaped,
/// which is how pre-rendered output composes without double-escaping.
pub type Helper = Arc<dyn Fn(&[Value]) -> Result<Value, HelperError> + Send + Sync>;

/// Wraps a closure as a [`Helper`].
///
/// ```
/// use stencil::{Value, helper};
///
/// let upcase = helper(|args| {
///     let text = args.first().map(Value::render_string).unwrap_or_default();
///     Ok(Value::String(text.to_uppercase()))
/// });
/// ```
pub fn helper<F>(function: F) -> Helper
where
    F: Fn(&[Value]) -> Result<Value, HelperError> + Send + Sync + 'static,
{
    Arc::new(function)
}

/// Per-render data context: an ordered mapping from field name to value.
///
/// Supplied to each render call and merged with the helper set to form the
/// evaluation scope; never stored by the engine.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Context {
    data: BTreeMap<String, Value>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a context from the fields of a JSON object.
    ///
    /// Anything other than an object produces an empty context.
    pub fn from_json(value: serde_json::Value) -> Self {
        match Value::from(value) {
            Value::Object(map) => Self { data: map },
            Value::Null
            | Value::Bool(_)
            | Value::Number(_)
            | Value::String(_)
            | Value::Array(_) => Self::default(),
        }
    }

    pub fn insert<N: AsRef<str>, V: Into<Value>>(&mut self, name: N, value: V) -> &mut Self {
        self.data.insert(name.as_ref().to_string(), value.into());
        self
    }

    pub fn get<N: AsRef<str>>(&self, name: N) -> Option<&Value> {
        self.data.get(name.as_ref())
    }

    pub fn contains<N: AsRef<str>>(&self, name: N) -> bool {
        self.data.contains_key(name.as_ref())
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Iterates fields in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.data.iter()
    }

    /// The JSON snapshot attached to failure diagnostics.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.data
                .iter()
                .map(|(name, value)| (name.clone(), value.to_json()))
                .collect(),
        )
    }
}

impl From<BTreeMap<String, Value>> for Context {
    fn from(data: BTreeMap<String, Value>) -> Self {
        Self { data }
    }
}

/// `StencilInterface` is a trait for the Stencil templating engine, an
/// opinionated and minimalistic `${}` interpolation engine designed for
/// synchronous rendering against a stable template registry.
pub trait StencilInterface {
    /// `register` makes a template available in the engine, trimming both
    /// name and body. Last write wins on duplicate names.
    fn register<N: AsRef<str>, B: AsRef<str>>(&mut self, name: N, body: B);

    /// `render` renders a registered template against a context, optionally
    /// composing the output into an `extend` parent template.
    ///
    /// # Errors
    /// - If the template name is not found.
    fn render<N: AsRef<str>>(
        &self,
        template_name: N,
        context: Option<&Context>,
        extend: Option<&str>,
    ) -> StencilResult<String>;

    /// `discover` walks a directory tree and registers every template file
    /// matching the configured extension, returning how many were found.
    ///
    /// # Errors
    /// - If the directory walk or a file read fails.
    fn discover<P: AsRef<Path>>(&mut self, root: P) -> StencilResult<usize>;
}

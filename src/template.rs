use std::collections::BTreeMap;

use crate::ast::{BinaryOp, Expr, Marker, Segment, UnaryOp};
use crate::engine::StencilEngine;
use crate::error::{HelperError, StencilError, StencilResult};
use crate::escape::escape_html;
use crate::interface::Context;
use crate::parser::compile;
use crate::value::Value;

/// A registered template: the trimmed body compiled into literal runs and
/// cached marker expressions.
///
/// Compilation happens once at registration and never fails; a marker whose
/// expression does not parse carries its error and reports it when the
/// template is rendered.
pub(crate) struct Template {
    name: String,
    source: String,
    segments: Vec<Segment>,
}

impl Template {
    pub(crate) fn new<N: Into<String>, B: Into<String>>(name: N, body: B) -> Self {
        let source = body.into();
        let segments = compile(&source);
        Self {
            name: name.into(),
            source,
            segments,
        }
    }

    /// The registered (trimmed) body this template was compiled from.
    pub(crate) fn source(&self) -> &str {
        &self.source
    }

    /// Renders every segment against the scope. This is steps 1-4 of the
    /// render algorithm: no extend handling, no output trimming, and no
    /// failure recovery — evaluation errors propagate to the engine, which
    /// owns the debug/log policy.
    pub(crate) fn render(&self, scope: &Scope, engine: &StencilEngine) -> StencilResult<String> {
        let mut output = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal { data } => output.push_str(data),
                Segment::Marker(marker) => {
                    self.render_marker(marker, scope, engine, &mut output)?;
                }
            }
        }
        Ok(output)
    }

    fn render_marker(
        &self,
        marker: &Marker,
        scope: &Scope,
        engine: &StencilEngine,
        output: &mut String,
    ) -> StencilResult<()> {
        let expr = match &marker.expr {
            Ok(expr) => expr,
            Err(parse_error) => {
                return Err(self.evaluation_error(parse_error.to_string()));
            }
        };
        let value = evaluate(expr, scope, engine)
            .map_err(|error| self.evaluation_error(error.message))?;
        splice(output, &value, marker.raw, engine.autoescape());
        Ok(())
    }

    fn evaluation_error(&self, message: String) -> StencilError {
        StencilError::Evaluation {
            template_name: self.name.clone(),
            message,
        }
    }
}

/// The merged variable scope for one render invocation.
///
/// Data fields are visible as bare identifiers. Two extra bindings are
/// injected when the data does not define them itself: `data`, the whole
/// context as an object (for the `data.field` access style), and
/// `variables`, the sorted comma-joined field names. Helpers are not part
/// of the scope — they are visible in call position only, so data can
/// never shadow them.
pub(crate) struct Scope {
    vars: BTreeMap<String, Value>,
}

impl Scope {
    pub(crate) fn new(context: &Context) -> Self {
        let mut vars: BTreeMap<String, Value> = context
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        if !vars.contains_key("data") {
            let object: BTreeMap<String, Value> = context
                .iter()
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect();
            vars.insert("data".to_string(), Value::Object(object));
        }
        if !vars.contains_key("variables") {
            let names: Vec<&str> = context.iter().map(|(name, _)| name.as_str()).collect();
            vars.insert("variables".to_string(), Value::String(names.join(", ")));
        }
        Self { vars }
    }

    fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }
}

/// Appends a value to rendered output, applying the escaping policy.
///
/// Arrays are joined with the empty separator and spliced raw regardless of
/// policy: they are the vehicle for pre-rendered fragments that must not be
/// escaped again.
fn splice(output: &mut String, value: &Value, raw: bool, autoescape: bool) {
    match value {
        Value::Array(items) => {
            for item in items {
                output.push_str(&item.render_string());
            }
        }
        Value::Null
        | Value::Bool(_)
        | Value::Number(_)
        | Value::String(_)
        | Value::Object(_) => {
            let text = value.render_string();
            if raw || !autoescape {
                output.push_str(&text);
            } else {
                output.push_str(&escape_html(&text));
            }
        }
    }
}

/// Internal evaluation failure; the template name is attached by the
/// calling [`Template`].
pub(crate) struct EvalError {
    pub message: String,
}

impl EvalError {
    fn new<M: Into<String>>(message: M) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<StencilError> for EvalError {
    fn from(error: StencilError) -> Self {
        Self {
            message: error.to_string(),
        }
    }
}

impl From<HelperError> for EvalError {
    fn from(error: HelperError) -> Self {
        Self {
            message: error.message,
        }
    }
}

fn evaluate(expr: &Expr, scope: &Scope, engine: &StencilEngine) -> Result<Value, EvalError> {
    match expr {
        Expr::Null => Ok(Value::Null),
        Expr::Bool(b) => Ok(Value::Bool(*b)),
        Expr::Number(n) => Ok(Value::Number(*n)),
        Expr::Str(s) => Ok(Value::String(s.clone())),
        Expr::Ident(name) => lookup(scope, name),
        Expr::Array(items) => {
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                values.push(evaluate(item, scope, engine)?);
            }
            Ok(Value::Array(values))
        }
        Expr::Object(entries) => {
            let mut map = BTreeMap::new();
            for (key, entry) in entries {
                let value = match entry {
                    Some(expr) => evaluate(expr, scope, engine)?,
                    // `{x}` shorthand resolves the key in the scope.
                    None => lookup(scope, key)?,
                };
                map.insert(key.clone(), value);
            }
            Ok(Value::Object(map))
        }
        Expr::Member { object, property } => {
            let object = evaluate(object, scope, engine)?;
            member(&object, property)
        }
        Expr::Index { object, index } => {
            let object = evaluate(object, scope, engine)?;
            let index = evaluate(index, scope, engine)?;
            index_into(&object, &index)
        }
        Expr::Call { name, args } => {
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                values.push(evaluate(arg, scope, engine)?);
            }
            call_helper(name, &values, engine)
        }
        Expr::Unary { op, operand } => {
            let value = evaluate(operand, scope, engine)?;
            match op {
                UnaryOp::Not => Ok(Value::Bool(!value.is_truthy())),
                UnaryOp::Neg => value
                    .as_number()
                    .map(|n| Value::Number(-n))
                    .ok_or_else(|| {
                        EvalError::new(format!("cannot negate a {}", value.type_name()))
                    }),
            }
        }
        Expr::Binary { op, left, right } => evaluate_binary(*op, left, right, scope, engine),
        Expr::Ternary {
            condition,
            then,
            otherwise,
        } => {
            if evaluate(condition, scope, engine)?.is_truthy() {
                evaluate(then, scope, engine)
            } else {
                evaluate(otherwise, scope, engine)
            }
        }
    }
}

fn lookup(scope: &Scope, name: &str) -> Result<Value, EvalError> {
    scope
        .get(name)
        .cloned()
        .ok_or_else(|| EvalError::new(format!("'{}' is not defined", name)))
}

fn member(object: &Value, property: &str) -> Result<Value, EvalError> {
    match object {
        Value::Object(map) => Ok(map.get(property).cloned().unwrap_or(Value::Null)),
        // `length` mirrors the host-language convenience on collections.
        Value::Array(items) if property == "length" => Ok(Value::Number(items.len() as f64)),
        Value::String(s) if property == "length" => Ok(Value::Number(s.chars().count() as f64)),
        Value::Null
        | Value::Bool(_)
        | Value::Number(_)
        | Value::String(_)
        | Value::Array(_) => Err(EvalError::new(format!(
            "cannot read property '{}' of {}",
            property,
            object.type_name()
        ))),
    }
}

fn index_into(object: &Value, index: &Value) -> Result<Value, EvalError> {
    match (object, index) {
        (Value::Array(items), Value::Number(n)) => {
            if n.fract() == 0.0 && *n >= 0.0 {
                Ok(items.get(*n as usize).cloned().unwrap_or(Value::Null))
            } else {
                Ok(Value::Null)
            }
        }
        (Value::Object(map), Value::String(key)) => {
            Ok(map.get(key).cloned().unwrap_or(Value::Null))
        }
        _ => Err(EvalError::new(format!(
            "cannot index {} with {}",
            object.type_name(),
            index.type_name()
        ))),
    }
}

fn evaluate_binary(
    op: BinaryOp,
    left: &Expr,
    right: &Expr,
    scope: &Scope,
    engine: &StencilEngine,
) -> Result<Value, EvalError> {
    match op {
        // Logical operators short-circuit and yield operand values, so
        // `${name || "anonymous"}` works as a default.
        BinaryOp::And => {
            let left = evaluate(left, scope, engine)?;
            if left.is_truthy() {
                evaluate(right, scope, engine)
            } else {
                Ok(left)
            }
        }
        BinaryOp::Or => {
            let left = evaluate(left, scope, engine)?;
            if left.is_truthy() {
                Ok(left)
            } else {
                evaluate(right, scope, engine)
            }
        }
        BinaryOp::Eq => {
            let left = evaluate(left, scope, engine)?;
            let right = evaluate(right, scope, engine)?;
            Ok(Value::Bool(left == right))
        }
        BinaryOp::Ne => {
            let left = evaluate(left, scope, engine)?;
            let right = evaluate(right, scope, engine)?;
            Ok(Value::Bool(left != right))
        }
        BinaryOp::Lt => {
            let left = evaluate(left, scope, engine)?;
            let right = evaluate(right, scope, engine)?;
            compare(&left, &right, "<").map(|o| Value::Bool(o.is_lt()))
        }
        BinaryOp::Le => {
            let left = evaluate(left, scope, engine)?;
            let right = evaluate(right, scope, engine)?;
            compare(&left, &right, "<=").map(|o| Value::Bool(o.is_le()))
        }
        BinaryOp::Gt => {
            let left = evaluate(left, scope, engine)?;
            let right = evaluate(right, scope, engine)?;
            compare(&left, &right, ">").map(|o| Value::Bool(o.is_gt()))
        }
        BinaryOp::Ge => {
            let left = evaluate(left, scope, engine)?;
            let right = evaluate(right, scope, engine)?;
            compare(&left, &right, ">=").map(|o| Value::Bool(o.is_ge()))
        }
        BinaryOp::Add => {
            let left = evaluate(left, scope, engine)?;
            let right = evaluate(right, scope, engine)?;
            add(&left, &right)
        }
        BinaryOp::Sub => {
            let left = evaluate(left, scope, engine)?;
            let right = evaluate(right, scope, engine)?;
            numeric(&left, &right, "-", |a, b| a - b)
        }
        BinaryOp::Mul => {
            let left = evaluate(left, scope, engine)?;
            let right = evaluate(right, scope, engine)?;
            numeric(&left, &right, "*", |a, b| a * b)
        }
        BinaryOp::Div => {
            let left = evaluate(left, scope, engine)?;
            let right = evaluate(right, scope, engine)?;
            numeric(&left, &right, "/", |a, b| a / b)
        }
        BinaryOp::Rem => {
            let left = evaluate(left, scope, engine)?;
            let right = evaluate(right, scope, engine)?;
            numeric(&left, &right, "%", |a, b| a % b)
        }
    }
}

/// `+` concatenates when either side is a string, otherwise adds numbers.
fn add(left: &Value, right: &Value) -> Result<Value, EvalError> {
    match (left, right) {
        (Value::String(_), _) | (_, Value::String(_)) => Ok(Value::String(format!(
            "{}{}",
            left.render_string(),
            right.render_string()
        ))),
        _ => numeric(left, right, "+", |a, b| a + b),
    }
}

fn numeric<F: Fn(f64, f64) -> f64>(
    left: &Value,
    right: &Value,
    symbol: &str,
    apply: F,
) -> Result<Value, EvalError> {
    match (left.as_number(), right.as_number()) {
        (Some(a), Some(b)) => Ok(Value::Number(apply(a, b))),
        _ => Err(EvalError::new(format!(
            "cannot apply '{}' to {} and {}",
            symbol,
            left.type_name(),
            right.type_name()
        ))),
    }
}

fn compare(left: &Value, right: &Value, symbol: &str) -> Result<std::cmp::Ordering, EvalError> {
    let ordering = match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.partial_cmp(b),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    };
    ordering.ok_or_else(|| {
        EvalError::new(format!(
            "cannot apply '{}' to {} and {}",
            symbol,
            left.type_name(),
            right.type_name()
        ))
    })
}

/// Resolves a call. Built-ins are matched first, so a custom helper can
/// never shadow `include`, `escape`, or `html`.
fn call_helper(name: &str, args: &[Value], engine: &StencilEngine) -> Result<Value, EvalError> {
    match name {
        "include" => include_helper(args, engine),
        "escape" => escape_helper(args),
        "html" => html_helper(args),
        _ => match engine.helpers().get(name) {
            Some(helper) => helper(args).map_err(EvalError::from),
            None => Err(EvalError::new(format!("'{}' is not a helper", name))),
        },
    }
}

/// `include(name, data?)`: renders another registered template and splices
/// its untrimmed output. The nested render gets an independent scope — data
/// is only inherited when passed explicitly — and applies the engine's
/// failure policy itself. A missing target template becomes this marker's
/// evaluation failure.
fn include_helper(args: &[Value], engine: &StencilEngine) -> Result<Value, EvalError> {
    let name = args
        .first()
        .and_then(Value::as_str)
        .ok_or_else(|| EvalError::new("include: first argument must be a template name"))?;
    if args.len() > 2 {
        return Err(EvalError::new("include: expected at most two arguments"));
    }
    let context = match args.get(1) {
        None => Context::new(),
        Some(Value::Object(map)) => Context::from(map.clone()),
        Some(other) => {
            return Err(EvalError::new(format!(
                "include: data must be an object, got {}",
                other.type_name()
            )));
        }
    };
    engine
        .render_nested(name, &context)
        .map(Value::String)
        .map_err(EvalError::from)
}

fn escape_helper(args: &[Value]) -> Result<Value, EvalError> {
    let [value] = args else {
        return Err(EvalError::new("escape: expected exactly one argument"));
    };
    Ok(Value::String(
        escape_html(&value.render_string()).into_owned(),
    ))
}

/// `html(parts, ...substs)`: interleaves literal parts with substitutions
/// under the renderer's marker rules — substitutions are escaped, arrays
/// join raw, and a part ending in `$` suppresses escaping for the next
/// substitution (the sigil is removed).
fn html_helper(args: &[Value]) -> Result<Value, EvalError> {
    let Some((first, substitutions)) = args.split_first() else {
        return Err(EvalError::new(
            "html: first argument must be an array of literal parts",
        ));
    };
    let Value::Array(parts) = first else {
        return Err(EvalError::new(
            "html: first argument must be an array of literal parts",
        ));
    };
    if parts.len() != substitutions.len() + 1 {
        return Err(EvalError::new(
            "html: expected one more literal part than substitutions",
        ));
    }

    let mut out = String::new();
    let mut sigil = false;
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            if let Some(subst) = substitutions.get(i - 1) {
                if sigil {
                    out.pop();
                }
                splice(&mut out, subst, sigil, true);
            }
        }
        let text = part.render_string();
        sigil = text.ends_with('$');
        out.push_str(&text);
    }
    Ok(Value::String(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_expression;

    fn eval(source: &str, context: &Context) -> Result<Value, EvalError> {
        let engine = StencilEngine::new();
        let scope = Scope::new(context);
        let expr = parse_expression(source).expect("expression should parse");
        evaluate(&expr, &scope, &engine)
    }

    fn eval_ok(source: &str, context: &Context) -> Value {
        match eval(source, context) {
            Ok(value) => value,
            Err(error) => panic!("evaluation failed: {}", error.message),
        }
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_arithmetic() {
        let context = Context::new();
        assert_eq!(eval_ok("1 + 2 * 3", &context), Value::Number(7.0));
        assert_eq!(eval_ok("7 % 4", &context), Value::Number(3.0));
        assert_eq!(eval_ok("-2 + 1", &context), Value::Number(-1.0));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_string_concatenation() {
        let mut context = Context::new();
        context.insert("name", "Ada");
        assert_eq!(
            eval_ok("'Hello ' + name + '!'", &context),
            Value::from("Hello Ada!")
        );
        assert_eq!(eval_ok("'n=' + 3", &context), Value::from("n=3"));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_logical_operators_yield_operands() {
        let mut context = Context::new();
        context.insert("empty", "");
        context.insert("name", "Ada");
        assert_eq!(eval_ok("empty || 'fallback'", &context), Value::from("fallback"));
        assert_eq!(eval_ok("name || 'fallback'", &context), Value::from("Ada"));
        assert_eq!(eval_ok("name && 'present'", &context), Value::from("present"));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_member_and_index() {
        let mut context = Context::new();
        context.insert(
            "user",
            Value::from(serde_json::json!({"name": "Ada", "tags": ["x", "y"]})),
        );
        assert_eq!(eval_ok("user.name", &context), Value::from("Ada"));
        assert_eq!(eval_ok("user.tags[1]", &context), Value::from("y"));
        assert_eq!(eval_ok("user.tags.length", &context), Value::Number(2.0));
        assert_eq!(eval_ok("user.missing", &context), Value::Null);
        assert_eq!(eval_ok("user.tags[9]", &context), Value::Null);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_undefined_identifier_fails() {
        let context = Context::new();
        let error = eval("missing", &context).err().map(|e| e.message);
        assert_eq!(error, Some("'missing' is not defined".to_string()));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_object_shorthand_reads_scope() {
        let mut context = Context::new();
        context.insert("x", 7);
        let value = eval_ok("{x}", &context);
        let map = value.as_object().expect("object expected");
        assert_eq!(map.get("x"), Some(&Value::Number(7.0)));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_escape_helper() {
        let mut context = Context::new();
        context.insert("markup", "<i>");
        assert_eq!(eval_ok("escape(markup)", &context), Value::from("&lt;i&gt;"));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_html_helper_rules() {
        let context = Context::new();
        // Escaped substitution between parts.
        assert_eq!(
            eval_ok("html(['<p>', '</p>'], '<i>')", &context),
            Value::from("<p>&lt;i&gt;</p>")
        );
        // A part ending in '$' suppresses escaping and is removed.
        assert_eq!(
            eval_ok("html(['<p>$', '</p>'], '<i>')", &context),
            Value::from("<p><i></p>")
        );
        // Array substitutions join raw.
        assert_eq!(
            eval_ok("html(['<ul>', '</ul>'], ['<li>a</li>', '<li>b</li>'])", &context),
            Value::from("<ul><li>a</li><li>b</li></ul>")
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_unknown_helper_fails() {
        let context = Context::new();
        let error = eval("nope()", &context).err().map(|e| e.message);
        assert_eq!(error, Some("'nope' is not a helper".to_string()));
    }
}

use std::collections::HashMap;
use std::ffi::OsStr;
use std::fmt;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{StencilError, StencilResult};
use crate::interface::{Context, Helper, StencilInterface};
use crate::template::{Scope, Template};
use crate::value::Value;

/// Name of the built-in diagnostic template rendered in place of real
/// output when debug mode is on and a render fails.
const DEBUG_TEMPLATE: &str = "debug";

const DEBUG_TEMPLATE_BODY: &str = "<pre style=\"background: black; color: white; padding: 5px; width: fit-content;\">Template \"${template}\" error: ${message}</pre>";

/// Engine construction options.
///
/// Assembled once and handed to [`StencilEngine::with_options`]; there is
/// no ambient configuration.
#[derive(Clone)]
pub struct Options {
    /// Template directory used by [`StencilEngine::prepare`].
    pub root: Option<PathBuf>,
    /// File suffix (without the dot) recognised during discovery.
    pub extension: String,
    /// HTML-escape every interpolated value unless suppressed per marker.
    pub autoescape: bool,
    /// On render failure, substitute the built-in `debug` template instead
    /// of degrading to empty output.
    pub debug: bool,
    /// Additional named helpers. Built-in names (`include`, `escape`,
    /// `html`) always win a collision.
    pub helpers: HashMap<String, Helper>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            root: None,
            extension: "html".to_string(),
            autoescape: true,
            debug: false,
            helpers: HashMap::new(),
        }
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut helper_names: Vec<&str> = self.helpers.keys().map(String::as_str).collect();
        helper_names.sort_unstable();
        f.debug_struct("Options")
            .field("root", &self.root)
            .field("extension", &self.extension)
            .field("autoescape", &self.autoescape)
            .field("debug", &self.debug)
            .field("helpers", &helper_names)
            .finish()
    }
}

/// How one pass of steps 1-4 of the render algorithm ended.
enum RenderOutcome {
    /// All markers evaluated.
    Rendered(String),
    /// A marker failed and the failure policy produced replacement output
    /// (the debug template, or empty after logging). Extend composition is
    /// skipped for recovered output.
    Recovered(String),
}

/// `StencilEngine` is the primary implementation of the [`StencilInterface`]
/// trait: a registry of compiled templates plus the configuration and helper
/// set shared by every render call.
///
/// # Examples
///
/// ```
/// use stencil::{StencilEngine, StencilInterface, Context};
///
/// let mut engine = StencilEngine::new();
/// engine.register("greeting", "Hello, ${name}!");
///
/// let mut context = Context::new();
/// context.insert("name", "World");
///
/// let output = engine.render("greeting", Some(&context), None).unwrap();
/// assert_eq!(output, "Hello, World!");
/// ```
pub struct StencilEngine {
    templates: HashMap<String, Template>,
    helpers: HashMap<String, Helper>,
    root: Option<PathBuf>,
    extension: String,
    autoescape: bool,
    debug: bool,
}

impl StencilEngine {
    /// Creates an engine with default options: autoescape on, debug off,
    /// `"html"` extension, no root, no custom helpers.
    pub fn new() -> Self {
        Self::with_options(Options::default())
    }

    pub fn with_options(options: Options) -> Self {
        let Options {
            root,
            extension,
            autoescape,
            debug,
            helpers,
        } = options;
        let mut engine = Self {
            templates: HashMap::new(),
            helpers,
            root,
            extension,
            autoescape,
            debug,
        };
        engine.register(DEBUG_TEMPLATE, DEBUG_TEMPLATE_BODY);
        engine
    }

    /// Discovers templates from the configured root directory.
    ///
    /// No-op returning zero when no root was configured.
    ///
    /// # Errors
    /// - If walking or reading the directory fails.
    pub fn prepare(&mut self) -> StencilResult<usize> {
        match self.root.clone() {
            Some(root) => self.discover(root),
            None => Ok(0),
        }
    }

    /// Steps 1-3: look up the template and evaluate every marker. No
    /// failure recovery, no extend, no trimming.
    pub(crate) fn render_partial(&self, name: &str, context: &Context) -> StencilResult<String> {
        let template =
            self.templates
                .get(name)
                .ok_or_else(|| StencilError::TemplateNotFound {
                    template_name: name.to_string(),
                })?;
        let scope = Scope::new(context);
        template.render(&scope, self)
    }

    /// Steps 1-4: render with the failure policy applied. A missing
    /// template is still an error — `include` propagates it into the
    /// enclosing marker.
    fn render_steps(&self, name: &str, context: &Context) -> StencilResult<RenderOutcome> {
        match self.render_partial(name, context) {
            Ok(output) => Ok(RenderOutcome::Rendered(output)),
            Err(StencilError::Evaluation {
                template_name,
                message,
            }) => self
                .recover_failed_render(&template_name, &message, context)
                .map(RenderOutcome::Recovered),
            Err(other) => Err(other),
        }
    }

    /// Entry point for the `include` helper: the same algorithm as a
    /// top-level render minus extend composition and output trimming.
    pub(crate) fn render_nested(&self, name: &str, context: &Context) -> StencilResult<String> {
        match self.render_steps(name, context)? {
            RenderOutcome::Rendered(output) | RenderOutcome::Recovered(output) => Ok(output),
        }
    }

    fn recover_failed_render(
        &self,
        template_name: &str,
        message: &str,
        context: &Context,
    ) -> StencilResult<String> {
        if self.debug {
            let mut diagnostic = Context::new();
            diagnostic
                .insert("template", template_name)
                .insert("message", message);
            return self.render_partial(DEBUG_TEMPLATE, &diagnostic);
        }
        let snapshot = serde_json::to_string(&context.to_json()).unwrap_or_default();
        tracing::error!(
            template = %template_name,
            error = %message,
            data = %snapshot,
            "template evaluation failed"
        );
        Ok(String::new())
    }

    /// Looks up the registered body for a template name.
    ///
    /// Exact, case-sensitive match on the trimmed name; `None` when the
    /// template was never registered.
    pub fn lookup<N: AsRef<str>>(&self, name: N) -> Option<&str> {
        self.templates.get(name.as_ref()).map(Template::source)
    }

    pub(crate) fn helpers(&self) -> &HashMap<String, Helper> {
        &self.helpers
    }

    pub(crate) const fn autoescape(&self) -> bool {
        self.autoescape
    }
}

impl Default for StencilEngine {
    /// Creates a default `StencilEngine` instance by calling `new()`.
    fn default() -> Self {
        Self::new()
    }
}

impl StencilInterface for StencilEngine {
    /// Registers a template, trimming both name and body.
    ///
    /// Re-registering a name overwrites the previous body (last write
    /// wins). Never fails: a body whose marker expressions do not parse is
    /// stored anyway and reports the error when rendered.
    ///
    /// # Examples
    ///
    /// ```
    /// use stencil::{StencilEngine, StencilInterface};
    ///
    /// let mut engine = StencilEngine::new();
    /// engine.register("greeting", "Hello, ${name}!");
    /// ```
    fn register<N: AsRef<str>, B: AsRef<str>>(&mut self, name: N, body: B) {
        let name = name.as_ref().trim().to_string();
        let body = body.as_ref().trim();
        let template = Template::new(name.clone(), body);
        self.templates.insert(name, template);
    }

    /// Renders a template with the given name using the provided context.
    ///
    /// When `extend` names a template, that template is rendered afterwards
    /// with the same data plus an `extend` field holding this template's
    /// output (single-level inheritance). The final output is trimmed.
    ///
    /// # Errors
    ///
    /// * `StencilError::TemplateNotFound` if no template with the given
    ///   name exists — never a silent empty string.
    ///
    /// An evaluation failure is not an error here: depending on debug mode
    /// the call returns the rendered `debug` template or, after logging the
    /// failure, an empty string.
    ///
    /// # Examples
    ///
    /// ```
    /// use stencil::{StencilEngine, StencilInterface, Context};
    ///
    /// let mut engine = StencilEngine::new();
    /// engine.register("base", "<body>${extend}</body>");
    /// engine.register("page", "content");
    ///
    /// let output = engine.render("page", None, Some("base")).unwrap();
    /// assert_eq!(output, "<body>content</body>");
    /// ```
    fn render<N: AsRef<str>>(
        &self,
        template_name: N,
        context: Option<&Context>,
        extend: Option<&str>,
    ) -> StencilResult<String> {
        let name = template_name.as_ref();
        let default_context = Context::default();
        let context = context.unwrap_or(&default_context);

        let output = match self.render_steps(name, context)? {
            RenderOutcome::Rendered(output) => output,
            // Recovery replaces the output wholesale; extend is skipped.
            RenderOutcome::Recovered(output) => return Ok(output.trim().to_string()),
        };

        match extend.map(str::trim).filter(|parent| !parent.is_empty()) {
            Some(parent) => {
                let mut merged = context.clone();
                merged.insert("extend", Value::String(output));
                self.render(parent, Some(&merged), None)
            }
            None => Ok(output.trim().to_string()),
        }
    }

    /// Recursively walks `root` and registers every file ending in
    /// `.<extension>` under its root-relative path (with `/` separators and
    /// the extension stripped), so `emails/welcome.html` becomes
    /// `emails/welcome`.
    ///
    /// Returns the number of templates registered. Fails fast on the first
    /// I/O error; templates registered before the failure stay registered.
    ///
    /// # Errors
    /// - If walking the directory or reading a file fails.
    fn discover<P: AsRef<Path>>(&mut self, root: P) -> StencilResult<usize> {
        let root = root.as_ref();
        let suffix = format!(".{}", self.extension);
        let mut registered = 0;

        for entry in WalkDir::new(root).sort_by_file_name() {
            let entry = entry.map_err(|error| StencilError::Discover {
                path: root.display().to_string(),
                message: error.to_string(),
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let Some(file_name) = path.file_name().and_then(OsStr::to_str) else {
                continue;
            };
            if !file_name.ends_with(&suffix) {
                continue;
            }

            let relative = path.strip_prefix(root).unwrap_or(path);
            let Some(name) = template_name_from_path(relative, &suffix) else {
                continue;
            };
            let body = std::fs::read_to_string(path).map_err(|error| StencilError::Discover {
                path: path.display().to_string(),
                message: error.to_string(),
            })?;
            self.register(&name, &body);
            registered += 1;
        }
        Ok(registered)
    }
}

/// Joins path components with `/` on every platform and strips the
/// extension suffix. Non-UTF-8 components are skipped by the caller.
fn template_name_from_path(relative: &Path, suffix: &str) -> Option<String> {
    let mut parts = Vec::new();
    for component in relative.components() {
        parts.push(component.as_os_str().to_str()?.to_string());
    }
    let joined = parts.join("/");
    let name = joined.strip_suffix(suffix)?;
    if name.is_empty() {
        return None;
    }
    Some(name.to_string())
}

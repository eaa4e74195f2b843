use std::fs;
use std::path::PathBuf;

use stencil::{Context, Options, StencilEngine, StencilError, StencilInterface};

fn write_template(root: &std::path::Path, relative: &str, body: &str) {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create template directory");
    }
    fs::write(path, body).expect("write template file");
}

#[test]
#[ntest::timeout(1000)]
fn test_discover_registers_matching_files() {
    let dir = tempfile::tempdir().expect("create tempdir");
    write_template(dir.path(), "index.html", "Welcome, ${name}!");
    write_template(dir.path(), "notes.txt", "not a template");

    let mut engine = StencilEngine::new();
    let registered = engine.discover(dir.path()).unwrap();
    assert_eq!(registered, 1, "only .html files should be registered");

    let context = Context::new().insert("name", "Ada").to_owned();
    let rendered = engine.render("index", Some(&context), None).unwrap();
    assert_eq!(rendered, "Welcome, Ada!");
}

#[test]
#[ntest::timeout(1000)]
fn test_discover_preserves_nested_paths_in_names() {
    let dir = tempfile::tempdir().expect("create tempdir");
    write_template(dir.path(), "emails/welcome.html", "Hi ${name}");
    write_template(dir.path(), "emails/digest/weekly.html", "Week ${week}");

    let mut engine = StencilEngine::new();
    let registered = engine.discover(dir.path()).unwrap();
    assert_eq!(registered, 2);

    let context = Context::new().insert("name", "Ada").to_owned();
    let rendered = engine.render("emails/welcome", Some(&context), None).unwrap();
    assert_eq!(rendered, "Hi Ada");

    let context = Context::new().insert("week", 7).to_owned();
    let rendered = engine
        .render("emails/digest/weekly", Some(&context), None)
        .unwrap();
    assert_eq!(rendered, "Week 7");
}

#[test]
#[ntest::timeout(1000)]
fn test_discover_with_custom_extension() {
    let dir = tempfile::tempdir().expect("create tempdir");
    write_template(dir.path(), "report.tpl", "Report ${id}");
    write_template(dir.path(), "ignored.html", "skipped");

    let mut engine = StencilEngine::with_options(Options {
        extension: "tpl".to_string(),
        ..Options::default()
    });
    let registered = engine.discover(dir.path()).unwrap();
    assert_eq!(registered, 1);

    let context = Context::new().insert("id", 12).to_owned();
    let rendered = engine.render("report", Some(&context), None).unwrap();
    assert_eq!(rendered, "Report 12");
}

#[test]
#[ntest::timeout(1000)]
fn test_prepare_uses_configured_root() {
    let dir = tempfile::tempdir().expect("create tempdir");
    write_template(dir.path(), "home.html", "home page");

    let mut engine = StencilEngine::with_options(Options {
        root: Some(dir.path().to_path_buf()),
        ..Options::default()
    });
    let registered = engine.prepare().unwrap();
    assert_eq!(registered, 1);
    assert_eq!(engine.render("home", None, None).unwrap(), "home page");
}

#[test]
#[ntest::timeout(1000)]
fn test_prepare_without_root_is_a_no_op() {
    let mut engine = StencilEngine::new();
    assert_eq!(engine.prepare().unwrap(), 0);
}

#[test]
#[ntest::timeout(1000)]
fn test_discover_missing_directory_fails() {
    let missing = PathBuf::from("/definitely/not/a/real/template/root");
    let mut engine = StencilEngine::new();
    let result = engine.discover(&missing);
    assert!(matches!(result, Err(StencilError::Discover { .. })));
}

#[test]
#[ntest::timeout(1000)]
fn test_discovered_templates_compose() {
    let dir = tempfile::tempdir().expect("create tempdir");
    write_template(dir.path(), "base.html", "<html>$${extend}</html>");
    write_template(dir.path(), "partials/footer.html", "<footer>fin</footer>");
    write_template(
        dir.path(),
        "page.html",
        r#"body $${include("partials/footer")}"#,
    );

    let mut engine = StencilEngine::new();
    engine.discover(dir.path()).unwrap();

    let rendered = engine.render("page", None, Some("base")).unwrap();
    assert_eq!(rendered, "<html>body <footer>fin</footer></html>");
}

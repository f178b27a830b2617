use org_core::ast::Node;
use org_core::{Configuration, HtmlWriter};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[test]
fn include_defers_reading_until_render_time() {
    let reads = Arc::new(AtomicUsize::new(0));
    let counter = reads.clone();
    let mut cfg = Configuration::default().silent();
    cfg.read_file = Arc::new(move |_path: &Path| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(b"fn main() {}\n".to_vec())
    });

    let doc = cfg.parse_str("#+INCLUDE: \"lib.rs\" src rust\n", "main.org");
    assert!(doc.error.is_none());
    // Parsing records the target but must not touch the file system.
    assert_eq!(reads.load(Ordering::SeqCst), 0);
    let Some(Node::Include(include)) = doc.nodes.first() else {
        panic!("expected an include node");
    };
    assert_eq!(include.block_kind, "SRC");
    assert_eq!(include.lang, "rust");

    let out = doc.write(&mut HtmlWriter::new()).unwrap();
    assert_eq!(reads.load(Ordering::SeqCst), 1);
    assert!(out.contains("fn main() {}"));
    assert!(out.contains("src-rust"));
}

#[test]
fn broken_include_degrades_to_the_keyword() {
    let mut cfg = Configuration::default().silent();
    cfg.read_file = Arc::new(|_path: &Path| {
        Err(std::io::Error::new(std::io::ErrorKind::NotFound, "nope"))
    });
    let doc = cfg.parse_str("#+INCLUDE: \"missing.rs\" src rust\n", "main.org");
    let out = doc.write(&mut org_core::OrgWriter::new()).unwrap();
    // The raw keyword round-trips instead of failing the render.
    assert!(out.contains("#+INCLUDE:"));
}

#[test]
fn include_reads_relative_to_the_including_file() {
    let dir = tempfile::tempdir().unwrap();
    let included = dir.path().join("code.sh");
    std::fs::write(&included, "echo from-file\n").unwrap();
    let main_path = dir.path().join("main.org");

    let cfg = Configuration::default().silent();
    let doc = cfg.parse_str("#+INCLUDE: \"code.sh\" src sh\n", &main_path);
    let out = doc.write(&mut HtmlWriter::new()).unwrap();
    assert!(out.contains("echo from-file"));
}

#[test]
fn setup_file_merges_settings_non_destructively() {
    let dir = tempfile::tempdir().unwrap();
    let setup = dir.path().join("setup.org");
    std::fs::write(&setup, "#+TITLE: from-setup\n#+AUTHOR: upstream\n").unwrap();
    let main_path = dir.path().join("main.org");

    let cfg = Configuration::default().silent();
    let doc = cfg.parse_str("#+TITLE: mine\n#+SETUPFILE: setup.org\n", &main_path);
    assert!(doc.error.is_none());
    // Keys already set by the including document win.
    assert_eq!(doc.get("TITLE"), "mine");
    // Everything else merges in.
    assert_eq!(doc.get("AUTHOR"), "upstream");
}

#[test]
fn missing_setup_file_is_recoverable() {
    let cfg = Configuration::default().silent();
    let doc = cfg.parse_str("#+SETUPFILE: /no/such/file.org\nbody\n", "main.org");
    assert!(doc.error.is_none());
    assert!(doc
        .nodes
        .iter()
        .any(|n| matches!(n, Node::Paragraph(_))));
}

use org_core::ast::Node;
use org_core::{Configuration, OrgWriter};
use pretty_assertions::assert_eq;

fn render(source: &str) -> String {
    let doc = Configuration::default().silent().parse_str(source, "test.org");
    assert!(doc.error.is_none(), "parse failed: {:?}", doc.error);
    doc.write(&mut OrgWriter::new()).expect("write should succeed")
}

/// Kind tree with text content, ignoring positions, for tree equality
/// modulo offsets.
fn shape(nodes: &[Node]) -> Vec<String> {
    let mut out = Vec::new();
    fn visit(nodes: &[Node], depth: usize, out: &mut Vec<String>) {
        for node in nodes {
            let label = match node {
                Node::Text(t) => format!("text({})", t.content),
                Node::Headline(h) => format!("headline({})", h.lvl),
                other => other.kind_name().to_string(),
            };
            out.push(format!("{}{label}", "  ".repeat(depth)));
            visit(node.children(), depth + 1, out);
            if let Node::Headline(h) = node {
                visit(&h.title, depth + 1, out);
            }
        }
    }
    visit(nodes, 0, &mut out);
    out
}

#[test]
fn canonical_documents_round_trip_byte_identical() {
    let sources = [
        "* Hello\n",
        "* Hello\nparagraph text\n",
        "some text\nover two lines\n",
        "- one\n- two\n  - nested\n",
        "1. first\n2. second\n",
        "| a  | bbb |\n|----+-----|\n| cc | d   |\n",
        "#+BEGIN_SRC sh\necho hi\n#+END_SRC\n",
        "#+TITLE: Stuff\n\nbody\n",
        "*bold* and /italic/ and _under_ and +gone+\n",
        "[[https://example.com][site]] and [fn:1] and [1/2]\n",
        ": example one\n: example two\n",
        "-----\n",
        "# comment\n",
        ":DRAWER:\ninside\n:END:\n",
    ];
    for source in sources {
        assert_eq!(render(source), source, "source: {source:?}");
    }
}

#[test]
fn rendering_is_idempotent_on_messy_input() {
    let messy = "\
*   TODO    Spaced     out :a:b:
** child
SCHEDULED: <2021-2-3 Wed>
some    text *bold*
-  item one
- item two

|a|bbb|
|-|-|
|cc|d|

[fn:note] a definition
";
    let once = render(messy);
    let twice = render(&once);
    assert_eq!(once, twice);
}

#[test]
fn reparsing_writer_output_preserves_the_tree() {
    let source = "\
#+TITLE: Round trip

* One :tag:
text with *emphasis* and [[https://example.com][a link]]

** DONE Two
- a
- b
  - c

| x | y |
|---+---|
| 1 | 2 |
";
    let cfg = Configuration::default().silent();
    let first = cfg.parse_str(source, "t.org");
    let rendered = first.write(&mut OrgWriter::new()).unwrap();
    let second = cfg.parse_str(&rendered, "t.org");
    assert_eq!(shape(&first.nodes), shape(&second.nodes));
}

#[test]
fn anchors_survive_reserialization() {
    let cfg = Configuration::default().silent();
    let first = cfg.parse_str("* stable\n** nested\n* other\n", "t.org");
    let rendered = first.write(&mut OrgWriter::new()).unwrap();
    let second = cfg.parse_str(&rendered, "t.org");

    fn hashes(nodes: &[Node], out: &mut Vec<String>) {
        for n in nodes {
            if let Node::Headline(h) = n {
                out.push(h.hash.clone());
                hashes(&h.children, out);
            }
        }
    }
    let (mut a, mut b) = (Vec::new(), Vec::new());
    hashes(&first.nodes, &mut a);
    hashes(&second.nodes, &mut b);
    assert_eq!(a, b);
}

#[test]
fn position_invariants_hold_across_constructs() {
    let source = "\
* head *bold title*
paragraph with [[http://x.y][link]] and more
text spanning
lines

- list
  - inner

| a | b |

#+BEGIN_QUOTE
quoted
#+END_QUOTE

[fn:1] note
";
    let doc = Configuration::default().silent().parse_str(source, "t.org");
    fn check(nodes: &[Node]) {
        for node in nodes {
            assert!(
                node.end().at_or_after(node.pos()),
                "{} at {:?} ends before it starts",
                node.kind_name(),
                node.pos()
            );
            if let Some(last) = node.children().last() {
                assert!(
                    node.end().at_or_after(last.end()),
                    "{} ends before its last child",
                    node.kind_name()
                );
            }
            check(node.children());
        }
    }
    check(&doc.nodes);
}

#[test]
fn timestamps_normalize_through_round_trip() {
    let out = render("SCHEDULED: <2004-1-25 Sun>\n");
    assert_eq!(out, "SCHEDULED: <2004-01-25 Sun>\n");
    let out = render("<2009-10-17 Sat 14:30 +1w>\n");
    assert_eq!(out, "<2009-10-17 Sat 14:30 +1w>\n");
}

#[test]
fn example_escape_round_trips() {
    let source = "#+BEGIN_EXAMPLE\n,* escaped headline\n,#+ escaped keyword\n#+END_EXAMPLE\n";
    assert_eq!(render(source), source);
}

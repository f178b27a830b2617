use org_core::ast::{ListKind, Node};
use org_core::Configuration;

fn parse(source: &str) -> org_core::Document {
    let doc = Configuration::default().silent().parse_str(source, "test.org");
    assert!(doc.error.is_none(), "parse failed: {:?}", doc.error);
    doc
}

const KITCHEN_SINK: &str = "\
#+TITLE: Kitchen sink
#+TODO: TODO NEXT | DONE

* Intro :meta:
Some text with *bold*, /italic/ and ~verbatim~ words, a [[https://example.com][link]]
and a footnote reference[fn:1].

** NEXT [#B] Subtask
SCHEDULED: <2021-06-01 Tue>
:PROPERTIES:
:CUSTOM_ID: subtask
:END:
- first
- second
  - deeper
- term :: description

| name | n |
|------+---|
| a    | 1 |
| bb   | 2 |
#+TBLFM: @2$2=@1$2*2

#+BEGIN_SRC sh
echo hi
#+END_SRC

* Outro
-----
: example line
# a comment

[fn:1] The definition.
";

#[test]
fn kitchen_sink_parses_into_expected_structure() {
    let doc = parse(KITCHEN_SINK);
    assert_eq!(doc.get("TITLE"), "Kitchen sink");

    let headlines: Vec<_> = doc
        .nodes
        .iter()
        .filter_map(|n| match n {
            Node::Headline(h) => Some(h),
            _ => None,
        })
        .collect();
    assert_eq!(headlines.len(), 2);

    let intro = headlines[0];
    assert_eq!(intro.tags, vec!["meta"]);
    let subtask = intro
        .children
        .iter()
        .find_map(|n| match n {
            Node::Headline(h) => Some(h),
            _ => None,
        })
        .expect("nested headline");
    assert_eq!(subtask.status.as_deref(), Some("NEXT"));
    assert_eq!(subtask.priority.as_deref(), Some("B"));
    assert_eq!(subtask.id(), "subtask");
    assert!(subtask.scheduled.is_some());
    assert!(subtask.properties.is_some());

    let list = subtask
        .children
        .iter()
        .find_map(|n| match n {
            Node::List(l) => Some(l),
            _ => None,
        })
        .expect("a list");
    // The descriptive trailing item turns the run into one list per kind
    // boundary; the first list is the plain one.
    assert_eq!(list.kind, ListKind::Unordered);

    let table = subtask
        .children
        .iter()
        .find_map(|n| match n {
            Node::Table(t) => Some(t),
            _ => None,
        })
        .expect("a table");
    assert_eq!(table.width(), 2);
    assert!(table.formulas.is_some());

    assert!(subtask
        .children
        .iter()
        .any(|n| matches!(n, Node::Block(b) if b.name == "SRC")));
}

#[test]
fn outline_mirrors_headline_nesting() {
    let doc = parse(KITCHEN_SINK);
    assert_eq!(doc.outline.count, 3);
    let roots = doc.outline.root_children();
    assert_eq!(roots.len(), 2);
    let intro = doc.outline.section(roots[0]);
    assert_eq!(intro.children.len(), 1);
    let subtask = doc.outline.section(intro.children[0]);
    assert_eq!(
        subtask.headline.as_ref().map(|h| h.id.as_str()),
        Some("subtask")
    );
}

#[test]
fn custom_todo_keywords_take_effect() {
    let doc = parse("#+TODO: OPEN | SHUT\n* OPEN door\n* TODO not a keyword here\n");
    let statuses: Vec<_> = doc
        .nodes
        .iter()
        .filter_map(|n| match n {
            Node::Headline(h) => Some(h.status.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(statuses[0].as_deref(), Some("OPEN"));
    // "TODO" is no longer in the configured keyword set.
    assert_eq!(statuses[1], None);
}

#[test]
fn fast_access_suffixes_are_trimmed_from_todo_keywords() {
    let doc = parse("#+TODO: TODO(t) | DONE(d)\n* TODO task\n");
    let Node::Headline(h) = &doc.nodes[1] else { panic!() };
    assert_eq!(h.status.as_deref(), Some("TODO"));
}

#[test]
fn every_headline_gets_a_distinct_hash() {
    let doc = parse("* a\n** b\n** c\n* d\n");
    let mut hashes = Vec::new();
    fn collect(nodes: &[Node], out: &mut Vec<String>) {
        for n in nodes {
            if let Node::Headline(h) = n {
                out.push(h.hash.clone());
                collect(&h.children, out);
            }
        }
    }
    collect(&doc.nodes, &mut hashes);
    assert_eq!(hashes.len(), 4);
    let unique: std::collections::HashSet<_> = hashes.iter().collect();
    assert_eq!(unique.len(), 4);
}

#[test]
fn lexing_is_total_on_arbitrary_input() {
    // A grab bag of half-formed syntax; everything must parse into a tree.
    let source = "\
*
**no space
[fn:]
[[unclosed
#+
|
:D:
#+BEGIN_
#+END_NOTHING
SCHEDULED:
<2020-99-99 Xxx>
";
    let doc = Configuration::default().silent().parse_str(source, "t.org");
    assert!(doc.error.is_none());
    assert!(!doc.nodes.is_empty());
}

#[test]
fn deep_nesting_does_not_blow_up() {
    let mut source = String::new();
    for depth in 1..=30 {
        source.push_str(&"*".repeat(depth));
        source.push_str(" level\n");
    }
    let doc = parse(&source);
    assert_eq!(doc.outline.count, 30);
    // The tree nests one headline per level.
    let mut node = doc.nodes.first();
    let mut depth = 0;
    while let Some(Node::Headline(h)) = node {
        depth += 1;
        node = h.children.first();
    }
    assert_eq!(depth, 30);
}

#[test]
fn named_tables_can_be_looked_up() {
    let doc = parse("#+NAME: numbers\n| 1 | 2 |\n");
    let node = doc.named_nodes.get("numbers").expect("registered node");
    assert!(matches!(node, Node::Table(_)));
}

#[test]
fn table_cell_mutation_contract() {
    let mut doc = parse("| a | b |\n| c | d |\n");
    let Some(Node::Table(table)) = doc.nodes.first_mut() else {
        panic!()
    };
    table.set_val(2, 1, "changed");
    assert_eq!(table.get_val(2, 1), "changed");
    assert_eq!(table.get_val(1, 1), "a");
}

use crate::ast::Node;
use crate::document::Document;

/// Export backend contract: a before hook, an exhaustive per-variant write
/// hook, an after hook and a way to take the accumulated output. Writers get
/// read-only access to the document for settings, links, macros and the
/// outline.
pub trait Writer {
    fn before(&mut self, _doc: &Document) {}
    fn write_node(&mut self, doc: &Document, node: &Node);
    fn after(&mut self, _doc: &Document) {}
    /// Takes the accumulated output, leaving the writer reusable.
    fn output(&mut self) -> String;
}

pub fn write_nodes<W: Writer + ?Sized>(writer: &mut W, doc: &Document, nodes: &[Node]) {
    for node in nodes {
        writer.write_node(doc, node);
    }
}

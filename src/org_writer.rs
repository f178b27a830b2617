use crate::ast::*;
use crate::date::DateType;
use crate::document::Document;
use crate::writer::Writer;
use regex::Regex;

/// Pretty-prints a node tree back into Org syntax. Does not need document
/// context, so it doubles as the renderer behind headline content hashes and
/// table cell values.
pub struct OrgWriter {
    /// Column the headline tag cluster is right-aligned to.
    pub tags_column: usize,
    out: String,
    indent: String,
    example_unescape: Regex,
}

impl OrgWriter {
    pub fn new() -> Self {
        OrgWriter {
            tags_column: 77,
            out: String::new(),
            indent: String::new(),
            example_unescape: Regex::new(r"(^|\n)([ \t]*)(\*|,\*|#\+|,#\+)")
                .expect("unescape pattern must compile"),
        }
    }

    fn push(&mut self, s: &str) {
        self.out.push_str(s);
    }

    /// Renders nodes into a string without disturbing the output in
    /// progress.
    pub fn write_nodes_str(&mut self, nodes: &[Node]) -> String {
        let saved = std::mem::take(&mut self.out);
        for node in nodes {
            self.write_org_node(node);
        }
        std::mem::replace(&mut self.out, saved)
    }

    fn emphasis_borders(kind: &str) -> (String, String) {
        match kind {
            "_{}" => ("_{".to_string(), "}".to_string()),
            "^{}" => ("^{".to_string(), "}".to_string()),
            _ => (kind.to_string(), kind.to_string()),
        }
    }

    pub fn write_org_node(&mut self, node: &Node) {
        match node {
            Node::Headline(h) => self.write_headline(h),
            Node::Paragraph(p) => self.write_paragraph(p),
            Node::List(l) => self.write_list(l),
            Node::ListItem(li) => self.write_list_item(li),
            Node::DescriptiveListItem(di) => self.write_descriptive_list_item(di),
            Node::Table(t) => self.write_table(t),
            Node::TableRow(r) => self.write_table_row_standalone(r),
            Node::TableColumn(c) => {
                let content = self.write_nodes_str(&c.children);
                self.push(&content);
            }
            Node::Block(b) => self.write_block(b),
            Node::Result(r) => self.write_result(r),
            Node::Example(e) => self.write_example(e),
            Node::Drawer(d) => self.write_drawer(d),
            Node::PropertyDrawer(d) => self.write_property_drawer(d),
            Node::Keyword(k) => self.write_keyword(k),
            Node::Comment(c) => {
                let indent = self.indent.clone();
                self.push(&indent);
                self.push("# ");
                self.push(&c.content);
                self.push("\n");
            }
            Node::FootnoteDefinition(f) => self.write_footnote_definition(f),
            Node::FootnoteLink(f) => self.write_footnote_link(f),
            Node::RegularLink(l) => self.write_regular_link(l),
            Node::Macro(m) => self.push(&format!(
                "{{{{{{{}({})}}}}}}",
                m.name,
                m.parameters.join(",")
            )),
            Node::Emphasis(e) => {
                let (open, close) = Self::emphasis_borders(&e.kind);
                self.push(&open);
                let content = self.write_nodes_str(&e.content);
                self.push(&content);
                self.push(&close);
            }
            Node::InlineBlock(b) => self.write_inline_block(b),
            Node::LatexFragment(l) => {
                self.push(&l.opening_pair);
                let content = self.write_nodes_str(&l.content);
                self.push(&content);
                self.push(&l.closing_pair);
            }
            Node::StatisticToken(s) => self.push(&format!("[{}]", s.content)),
            Node::LineBreak(l) => {
                let segment = format!("\n{}", self.indent);
                for _ in 0..l.count {
                    self.push(&segment);
                }
            }
            Node::ExplicitLineBreak(_) => {
                let segment = format!("\\\\\n{}", self.indent);
                self.push(&segment);
            }
            Node::Text(t) => self.push(&t.content),
            Node::Timestamp(t) => self.push(&t.date.to_full_string()),
            Node::SchedulingEntry(s) => self.write_scheduling_entry(s),
            Node::NodeWithName(n) => {
                self.push(&format!("#+NAME: {}\n", n.name));
                self.write_org_node(&n.node);
            }
            Node::NodeWithMeta(n) => self.write_node_with_meta(n),
            Node::Include(i) => self.write_keyword(&i.keyword),
            Node::HorizontalRule(_) => {
                let indent = self.indent.clone();
                self.push(&indent);
                self.push("-----\n");
            }
        }
    }

    fn write_headline(&mut self, h: &Headline) {
        let start = self.out.len();
        self.push(&"*".repeat(h.lvl));
        if let Some(status) = &h.status {
            self.push(" ");
            self.push(status);
        }
        if let Some(priority) = &h.priority {
            self.push(&format!(" [#{priority}]"));
        }
        self.push(" ");
        let title = self.write_nodes_str(&h.title);
        self.push(&title);
        if let Some(progress) = &h.progress {
            self.push(&format!(" [{}]", progress.content));
        }
        if !h.tags.is_empty() {
            let cluster = format!(":{}:", h.tags.join(":"));
            let written = self.out.len() - start;
            if self.tags_column > cluster.len() + written {
                self.push(&" ".repeat(self.tags_column - cluster.len() - written));
            } else {
                self.push(" ");
            }
            self.push(&cluster);
        }
        self.push("\n");
        if let Some(properties) = &h.properties {
            self.write_property_drawer(properties);
        }
        for child in &h.children {
            self.write_org_node(child);
        }
    }

    fn write_paragraph(&mut self, p: &Paragraph) {
        let content = self.write_nodes_str(&p.children);
        if !content.starts_with('\n') {
            let indent = self.indent.clone();
            self.push(&indent);
        }
        self.push(&content);
        self.push("\n");
    }

    fn write_block(&mut self, b: &Block) {
        let indent = self.indent.clone();
        self.push(&indent);
        self.push(&format!("#+BEGIN_{}", b.name));
        if !b.parameters.is_empty() {
            self.push(&format!(" {}", b.parameters.join(" ")));
        }
        self.push("\n");
        let mut content = self.write_nodes_str(&b.children);
        if !indent.is_empty() && content.ends_with(indent.as_str()) {
            content.truncate(content.len() - indent.len());
        }
        if b.name == "EXAMPLE"
            || (b.name == "SRC" && b.parameters.first().map(String::as_str) == Some("org"))
        {
            content = self
                .example_unescape
                .replace_all(&content, "$1$2,$3")
                .to_string();
        }
        self.push(&content);
        if !content.is_empty() && !content.ends_with('\n') {
            self.push("\n");
        }
        self.push(&indent);
        self.push(&format!("#+END_{}\n", b.name));
        if let Some(result) = &b.result {
            self.push("\n");
            self.write_org_node(result);
        }
    }

    fn write_result(&mut self, r: &ResultBlock) {
        let indent = self.indent.clone();
        self.push(&indent);
        self.push("#+RESULTS:\n");
        self.write_org_node(&r.node);
    }

    fn write_inline_block(&mut self, b: &InlineBlock) {
        match b.name.as_str() {
            "src" => {
                self.push(&format!("src_{}", b.parameters.first().map_or("", |p| p)));
                if b.parameters.len() > 1 {
                    self.push(&format!("[{}]", b.parameters[1..].join(" ")));
                }
                self.push("{");
                let content = self.write_nodes_str(&b.children);
                self.push(&content);
                self.push("}");
            }
            _ => {
                self.push(&format!("@@{}:", b.parameters.first().map_or("", |p| p)));
                let content = self.write_nodes_str(&b.children);
                self.push(&content);
                self.push("@@");
            }
        }
    }

    fn write_drawer(&mut self, d: &Drawer) {
        let indent = self.indent.clone();
        self.push(&indent);
        self.push(&format!(":{}:\n", d.name));
        for child in &d.children {
            self.write_org_node(child);
        }
        self.push(&indent);
        self.push(":END:\n");
    }

    fn write_property_drawer(&mut self, d: &PropertyDrawer) {
        let indent = self.indent.clone();
        self.push(&indent);
        self.push(":PROPERTIES:\n");
        for (key, value) in &d.properties {
            self.push(&indent);
            if value.is_empty() {
                self.push(&format!(":{key}:\n"));
            } else {
                self.push(&format!(":{key}: {value}\n"));
            }
        }
        self.push(&indent);
        self.push(":END:\n");
    }

    fn write_footnote_definition(&mut self, f: &FootnoteDefinition) {
        if !f.inline {
            let indent = self.indent.clone();
            self.push(&indent);
        }
        self.push(&format!("[fn:{}]", f.name));
        let content = self.write_nodes_str(&f.children);
        if !content.is_empty() && !content.starts_with(char::is_whitespace) {
            self.push(" ");
        }
        self.push(&content);
    }

    fn write_scheduling_entry(&mut self, s: &SchedulingEntry) {
        let name = match s.date_type {
            DateType::Scheduled => "SCHEDULED",
            DateType::Deadline => "DEADLINE",
            DateType::Closed => "CLOSED",
            _ => "",
        };
        match &s.date {
            Some(date) => self.push(&format!("{name}: {}\n", date.to_full_string())),
            None => self.push(&format!("{name}:\n")),
        }
    }

    fn write_example(&mut self, e: &Example) {
        let indent = self.indent.clone();
        for child in &e.children {
            self.push(&indent);
            self.push(":");
            let content = self.write_nodes_str(std::slice::from_ref(child));
            if !content.is_empty() {
                self.push(" ");
                self.push(&content);
            }
            self.push("\n");
        }
    }

    fn write_keyword(&mut self, k: &Keyword) {
        let indent = self.indent.clone();
        self.push(&indent);
        self.push(&format!("#+{}:", k.key));
        if !k.value.is_empty() {
            self.push(&format!(" {}", k.value));
        }
        self.push("\n");
    }

    fn write_node_with_meta(&mut self, n: &NodeWithMeta) {
        let indent = self.indent.clone();
        for caption in &n.meta.caption {
            self.push(&indent);
            self.push("#+CAPTION: ");
            let content = self.write_nodes_str(caption);
            self.push(&content);
            self.push("\n");
        }
        for attributes in &n.meta.html_attributes {
            self.push(&indent);
            self.push(&format!("#+ATTR_HTML: {}\n", attributes.join(" ")));
        }
        for attributes in &n.meta.latex_attributes {
            self.push(&indent);
            self.push(&format!("#+ATTR_LATEX: {}\n", attributes.join(" ")));
        }
        if !n.meta.latex_env.is_empty() {
            self.push(&indent);
            self.push(&format!("#+ENV: {}\n", n.meta.latex_env));
        }
        self.write_org_node(&n.node);
    }

    fn write_list(&mut self, l: &List) {
        for item in &l.items {
            self.write_org_node(item);
        }
    }

    fn write_list_item(&mut self, li: &ListItem) {
        let original_out = std::mem::take(&mut self.out);
        let original_indent = self.indent.clone();
        self.indent = format!("{}{}", original_indent, " ".repeat(li.bullet.len() + 1));
        for child in &li.children {
            self.write_org_node(child);
        }
        let rendered = std::mem::replace(&mut self.out, original_out);
        let content = rendered
            .strip_prefix(self.indent.as_str())
            .unwrap_or(&rendered)
            .to_string();
        self.indent = original_indent.clone();
        self.push(&original_indent);
        self.push(&li.bullet);
        if let Some(value) = &li.value {
            self.push(&format!(" [@{value}]"));
        }
        if let Some(status) = &li.status {
            self.push(&format!(" [{status}]"));
        }
        if content.starts_with('\n') {
            self.push(&content);
        } else {
            self.push(" ");
            self.push(&content);
        }
    }

    fn write_descriptive_list_item(&mut self, di: &DescriptiveListItem) {
        let original_indent = self.indent.clone();
        self.push(&original_indent);
        self.push(&di.bullet);
        let mut item_indent =
            format!("{}{}", original_indent, " ".repeat(di.bullet.len() + 1));
        if let Some(status) = &di.status {
            self.push(&format!(" [{status}]"));
            item_indent.push_str(&" ".repeat(status.len() + 3));
        }
        if !di.term.is_empty() {
            let term = self.write_nodes_str(&di.term);
            self.push(&format!(" {term} ::"));
            item_indent.push_str(&" ".repeat(term.len() + 4));
        }
        let original_out = std::mem::take(&mut self.out);
        self.indent = item_indent;
        for child in &di.details {
            self.write_org_node(child);
        }
        let rendered = std::mem::replace(&mut self.out, original_out);
        let content = rendered
            .strip_prefix(self.indent.as_str())
            .unwrap_or(&rendered)
            .to_string();
        self.indent = original_indent;
        if content.starts_with('\n') {
            self.push(&content);
        } else {
            self.push(" ");
            self.push(&content);
        }
    }

    fn write_table(&mut self, t: &Table) {
        let indent = self.indent.clone();
        for row in &t.rows {
            self.push(&indent);
            if row.columns.is_empty() {
                self.push("|");
                for (i, info) in t.column_infos.iter().enumerate() {
                    self.push(&"-".repeat(info.len + 2));
                    if i < t.column_infos.len() - 1 {
                        self.push("+");
                    }
                }
                self.push("|");
            } else {
                self.push("|");
                for (column, info) in row.columns.iter().zip(&t.column_infos) {
                    self.push(" ");
                    let mut content = self.write_nodes_str(&column.children);
                    if content.is_empty() {
                        content = " ".to_string();
                    }
                    let pad = info.len.saturating_sub(content.chars().count());
                    match info.align {
                        Some(crate::table::Align::Center) => {
                            if pad % 2 != 0 {
                                self.push(" ");
                            }
                            self.push(&" ".repeat(pad / 2));
                            self.push(&content);
                            self.push(&" ".repeat(pad / 2));
                        }
                        Some(crate::table::Align::Right) => {
                            self.push(&" ".repeat(pad));
                            self.push(&content);
                        }
                        _ => {
                            self.push(&content);
                            self.push(&" ".repeat(pad));
                        }
                    }
                    self.push(" |");
                }
            }
            self.push("\n");
        }
    }

    fn write_table_row_standalone(&mut self, r: &Row) {
        self.push("|");
        for column in &r.columns {
            self.push(" ");
            let content = self.write_nodes_str(&column.children);
            self.push(&content);
            self.push(" |");
        }
        self.push("\n");
    }

    fn write_footnote_link(&mut self, f: &FootnoteLink) {
        self.push(&format!("[fn:{}", f.name));
        if let Some(definition) = &f.definition {
            self.push(":");
            if let Some(Node::Paragraph(p)) = definition.children.first() {
                let content = self.write_nodes_str(&p.children);
                self.push(&content);
            }
        }
        self.push("]");
    }

    fn write_regular_link(&mut self, l: &RegularLink) {
        if l.auto_link {
            self.push(&l.url);
        } else {
            match &l.description {
                None => self.push(&format!("[[{}]]", l.url)),
                Some(description) => {
                    let rendered = self.write_nodes_str(description);
                    self.push(&format!("[[{}][{rendered}]]", l.url));
                }
            }
        }
    }
}

impl Default for OrgWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl Writer for OrgWriter {
    fn write_node(&mut self, _doc: &Document, node: &Node) {
        self.write_org_node(node);
    }

    fn output(&mut self) -> String {
        std::mem::take(&mut self.out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Configuration;

    fn render(source: &str) -> String {
        let cfg = Configuration::default().silent();
        let doc = cfg.parse_str(source, "test.org");
        assert!(doc.error.is_none());
        doc.write(&mut OrgWriter::new()).unwrap()
    }

    #[test]
    fn headline_and_paragraph_round_trip() {
        let source = "* Hello\nsome text\n";
        assert_eq!(render(source), source);
    }

    #[test]
    fn status_priority_and_tags_render() {
        let out = render("* TODO [#A] Fix it :work:\n");
        assert!(out.starts_with("* TODO [#A] Fix it"));
        assert!(out.trim_end().ends_with(":work:"));
    }

    #[test]
    fn list_round_trip() {
        let source = "- one\n- two\n  - nested\n";
        assert_eq!(render(source), source);
    }

    #[test]
    fn table_is_padded_by_column_width() {
        let out = render("| a | bbb |\n| cc | d |\n");
        assert_eq!(out, "| a  | bbb |\n| cc | d   |\n");
    }

    #[test]
    fn separator_row_renders_dashes() {
        let out = render("| a | b |\n|---+---|\n");
        assert_eq!(out, "| a | b |\n|---+---|\n");
    }

    #[test]
    fn block_round_trip() {
        let source = "#+BEGIN_SRC sh\necho hi\n#+END_SRC\n";
        assert_eq!(render(source), source);
    }

    #[test]
    fn example_block_escapes_headline_lookalikes() {
        let out = render("#+BEGIN_EXAMPLE\n,* not a headline\n#+END_EXAMPLE\n");
        assert!(out.contains(",* not a headline"));
    }

    #[test]
    fn scheduling_entry_renders_under_headline() {
        let out = render("* task\nSCHEDULED: <2004-12-25 Sat>\n");
        assert!(out.contains("SCHEDULED: <2004-12-25 Sat>\n"));
    }

    #[test]
    fn drawer_round_trip() {
        let source = ":LOGBOOK:\na note\n:END:\n";
        assert_eq!(render(source), source);
    }

    #[test]
    fn property_drawer_renders_after_headline() {
        let out = render("* a\n:PROPERTIES:\n:KEY: value\n:END:\n");
        assert_eq!(out, "* a\n:PROPERTIES:\n:KEY: value\n:END:\n");
    }

    #[test]
    fn emphasis_borders_round_trip() {
        assert_eq!(render("*bold* and ~verbatim~\n"), "*bold* and ~verbatim~\n");
        assert_eq!(render("x_{sub} y^{sup}\n"), "x_{sub} y^{sup}\n");
    }

    #[test]
    fn links_round_trip() {
        assert_eq!(
            render("[[https://example.com][site]]\n"),
            "[[https://example.com][site]]\n"
        );
        assert_eq!(render("[[file:img.png]]\n"), "[[file:img.png]]\n");
    }

    #[test]
    fn keyword_and_tblfm_round_trip() {
        let source = "| 1 | 2 |\n#+TBLFM: @1$2=@1$1\n";
        assert_eq!(render(source), source);
    }
}

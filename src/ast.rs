use crate::date::{DateType, OrgDate};
use crate::lexer::Pos;
use crate::table::{ColumnInfo, Formulas, RowColRef};
use serde::Serialize;
use std::path::PathBuf;

/// A parsed node of the document. The variant set is closed: writers match
/// exhaustively, so adding a variant means updating every writer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Node {
    Headline(Headline),
    Paragraph(Paragraph),
    List(List),
    ListItem(ListItem),
    DescriptiveListItem(DescriptiveListItem),
    Table(Table),
    TableRow(Row),
    TableColumn(Column),
    Block(Block),
    Result(ResultBlock),
    Example(Example),
    Drawer(Drawer),
    PropertyDrawer(PropertyDrawer),
    Keyword(Keyword),
    Comment(Comment),
    FootnoteDefinition(FootnoteDefinition),
    FootnoteLink(FootnoteLink),
    RegularLink(RegularLink),
    Macro(Macro),
    Emphasis(Emphasis),
    InlineBlock(InlineBlock),
    LatexFragment(LatexFragment),
    StatisticToken(StatisticToken),
    LineBreak(LineBreak),
    ExplicitLineBreak(ExplicitLineBreak),
    Text(Text),
    Timestamp(Timestamp),
    SchedulingEntry(SchedulingEntry),
    NodeWithName(NodeWithName),
    NodeWithMeta(NodeWithMeta),
    Include(Include),
    HorizontalRule(HorizontalRule),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Headline {
    pub pos: Pos,
    pub end: Pos,
    pub index: usize,
    pub lvl: usize,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub progress: Option<StatisticToken>,
    pub tags: Vec<String>,
    pub title: Vec<Node>,
    pub properties: Option<PropertyDrawer>,
    pub scheduled: Option<SchedulingEntry>,
    pub deadline: Option<SchedulingEntry>,
    pub closed: Option<SchedulingEntry>,
    pub timestamp: Option<Timestamp>,
    pub children: Vec<Node>,
    /// Stable anchor identity: the ancestor chain's running hash mixed with
    /// this headline's rendered title.
    pub hash: String,
}

impl Headline {
    /// Anchor id: an explicit CUSTOM_ID property wins, otherwise the content
    /// hash keeps the anchor stable across reorderings of later siblings.
    pub fn id(&self) -> String {
        if let Some(custom) = self
            .properties
            .as_ref()
            .and_then(|p| p.get("CUSTOM_ID"))
        {
            return custom.to_string();
        }
        format!("headline-{}", self.hash)
    }

    /// True when one of the headline's tags appears in the (whitespace
    /// separated) excluded tag list.
    pub fn is_excluded(&self, excluded_tags: &str) -> bool {
        excluded_tags
            .split_whitespace()
            .any(|excluded| self.tags.iter().any(|t| t == excluded))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Paragraph {
    pub pos: Pos,
    pub children: Vec<Node>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ListKind {
    Unordered,
    Ordered,
    Descriptive,
}

impl ListKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListKind::Unordered => "unordered",
            ListKind::Ordered => "ordered",
            ListKind::Descriptive => "descriptive",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct List {
    pub pos: Pos,
    pub kind: ListKind,
    pub items: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ListItem {
    pub pos: Pos,
    pub bullet: String,
    pub status: Option<String>,
    pub value: Option<String>,
    pub children: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DescriptiveListItem {
    pub pos: Pos,
    pub bullet: String,
    pub status: Option<String>,
    pub term: Vec<Node>,
    pub details: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Table {
    pub pos: Pos,
    pub rows: Vec<Row>,
    pub column_infos: Vec<ColumnInfo>,
    pub separator_indices: Vec<usize>,
    pub formulas: Option<Formulas>,
    /// Cursor used to resolve relative formula references.
    pub cur: RowColRef,
    pub(crate) id: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Row {
    pub columns: Vec<Column>,
    /// Alignment directive rows (`<l>`/`<c8>`/…) are special: they shape the
    /// table but are not data.
    pub is_special: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Column {
    pub pos: Pos,
    pub end: Pos,
    pub children: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Block {
    pub pos: Pos,
    pub end: Pos,
    pub name: String,
    pub parameters: Vec<String>,
    pub children: Vec<Node>,
    pub result: Option<Box<Node>>,
    /// Generic keywords seen since the previous node; source highlighters
    /// consume these as hints.
    pub keywords: Vec<Keyword>,
}

impl Block {
    /// The first bare parameter is the language, the rest are `:key value`
    /// pairs.
    pub fn parameter_map(&self) -> std::collections::HashMap<String, String> {
        let mut map = std::collections::HashMap::new();
        if let Some(lang) = self.parameters.first() {
            map.insert(":lang".to_string(), lang.clone());
        }
        let mut i = 1;
        while i + 1 < self.parameters.len() {
            map.insert(
                self.parameters[i].clone(),
                self.parameters[i + 1].clone(),
            );
            i += 2;
        }
        map
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultBlock {
    pub pos: Pos,
    pub node: Box<Node>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Example {
    pub pos: Pos,
    pub children: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Drawer {
    pub pos: Pos,
    pub end: Pos,
    pub name: String,
    pub children: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct PropertyDrawer {
    pub pos: Pos,
    pub end: Pos,
    pub properties: Vec<(String, String)>,
}

impl PropertyDrawer {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.properties
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn set(&mut self, key: &str, value: &str) {
        for (k, v) in &mut self.properties {
            if k == key {
                *v = value.to_string();
                return;
            }
        }
        self.properties.push((key.to_string(), value.to_string()));
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Keyword {
    pub pos: Pos,
    pub end: Pos,
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Comment {
    pub pos: Pos,
    pub end: Pos,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FootnoteDefinition {
    pub pos: Pos,
    pub name: String,
    pub children: Vec<Node>,
    /// Inline definitions come from `[fn:name:text]` references.
    pub inline: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FootnoteLink {
    pub pos: Pos,
    pub end: Pos,
    pub name: String,
    pub definition: Option<Box<FootnoteDefinition>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LinkKind {
    Regular,
    Image,
    Video,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegularLink {
    pub pos: Pos,
    pub end: Pos,
    pub protocol: String,
    pub description: Option<Vec<Node>>,
    pub url: String,
    pub auto_link: bool,
    /// Classified at parse time from the target/description extension.
    pub kind: LinkKind,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Macro {
    pub pos: Pos,
    pub end: Pos,
    pub name: String,
    pub parameters: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Emphasis {
    pub pos: Pos,
    pub end: Pos,
    /// Marker: `*`, `/`, `+`, `=`, `~`, `_`, `_{}` or `^{}`.
    pub kind: String,
    pub content: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InlineBlock {
    pub pos: Pos,
    pub end: Pos,
    pub name: String,
    pub parameters: Vec<String>,
    pub children: Vec<Node>,
    pub keywords: Vec<Keyword>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatexFragment {
    pub pos: Pos,
    pub end: Pos,
    pub opening_pair: String,
    pub closing_pair: String,
    pub content: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatisticToken {
    pub pos: Pos,
    pub end: Pos,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LineBreak {
    pub pos: Pos,
    pub count: usize,
    pub between_multibyte: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExplicitLineBreak {
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Text {
    pub pos: Pos,
    pub end: Pos,
    pub content: String,
    /// Raw text never re-enters inline parsing (verbatim block interiors).
    pub raw: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Timestamp {
    pub pos: Pos,
    pub end: Pos,
    pub date: OrgDate,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchedulingEntry {
    pub pos: Pos,
    pub end: Pos,
    pub date: Option<OrgDate>,
    pub date_type: DateType,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeWithName {
    pub name: String,
    pub node: Box<Node>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct Metadata {
    pub caption: Vec<Vec<Node>>,
    pub html_attributes: Vec<Vec<String>>,
    pub latex_attributes: Vec<Vec<String>>,
    pub latex_env: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeWithMeta {
    pub pos: Pos,
    pub node: Box<Node>,
    pub meta: Metadata,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Include {
    pub pos: Pos,
    pub end: Pos,
    pub keyword: Keyword,
    /// `None` when the keyword value did not parse; resolution then degrades
    /// to rendering the raw keyword.
    pub path: Option<PathBuf>,
    pub block_kind: String,
    pub lang: String,
    pub keywords: Vec<Keyword>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HorizontalRule {
    pub pos: Pos,
    pub end: Pos,
}

const NO_CHILDREN: &[Node] = &[];

fn last_end(children: &[Node], fallback: Pos) -> Pos {
    children.last().map_or(fallback, |n| n.end())
}

impl Node {
    pub fn pos(&self) -> Pos {
        match self {
            Node::Headline(n) => n.pos,
            Node::Paragraph(n) => n.pos,
            Node::List(n) => n.pos,
            Node::ListItem(n) => n.pos,
            Node::DescriptiveListItem(n) => n.pos,
            Node::Table(n) => n.pos,
            Node::TableRow(n) => n.columns.first().map_or(Pos::default(), |c| c.pos),
            Node::TableColumn(n) => n.pos,
            Node::Block(n) => n.pos,
            Node::Result(n) => n.pos,
            Node::Example(n) => n.pos,
            Node::Drawer(n) => n.pos,
            Node::PropertyDrawer(n) => n.pos,
            Node::Keyword(n) => n.pos,
            Node::Comment(n) => n.pos,
            Node::FootnoteDefinition(n) => n.pos,
            Node::FootnoteLink(n) => n.pos,
            Node::RegularLink(n) => n.pos,
            Node::Macro(n) => n.pos,
            Node::Emphasis(n) => n.pos,
            Node::InlineBlock(n) => n.pos,
            Node::LatexFragment(n) => n.pos,
            Node::StatisticToken(n) => n.pos,
            Node::LineBreak(n) => n.pos,
            Node::ExplicitLineBreak(n) => n.pos,
            Node::Text(n) => n.pos,
            Node::Timestamp(n) => n.pos,
            Node::SchedulingEntry(n) => n.pos,
            Node::NodeWithName(n) => n.node.pos(),
            Node::NodeWithMeta(n) => n.pos,
            Node::Include(n) => n.pos,
            Node::HorizontalRule(n) => n.pos,
        }
    }

    /// End position. Stored where child chains make derivation ambiguous,
    /// derived as "last child's end" with the node's own position as the
    /// empty-container fallback everywhere else.
    pub fn end(&self) -> Pos {
        match self {
            Node::Headline(n) => n.end,
            Node::Paragraph(n) => last_end(&n.children, n.pos),
            Node::List(n) => last_end(&n.items, n.pos),
            Node::ListItem(n) => last_end(&n.children, n.pos),
            Node::DescriptiveListItem(n) => last_end(&n.details, n.pos),
            Node::Table(n) => n
                .rows
                .iter()
                .rev()
                .find_map(|r| r.columns.last())
                .map_or(n.pos, |c| Pos::new(c.end.row, c.end.col + 1)),
            Node::TableRow(n) => n
                .columns
                .last()
                .map_or(Pos::default(), |c| Pos::new(c.end.row, c.end.col + 1)),
            Node::TableColumn(n) => n.end,
            Node::Block(n) => n.end,
            Node::Result(n) => n.node.end(),
            Node::Example(n) => last_end(&n.children, n.pos),
            Node::Drawer(n) => n.end,
            Node::PropertyDrawer(n) => n.end,
            Node::Keyword(n) => n.end,
            Node::Comment(n) => n.end,
            Node::FootnoteDefinition(n) => last_end(&n.children, n.pos),
            Node::FootnoteLink(n) => n.end,
            Node::RegularLink(n) => n.end,
            Node::Macro(n) => n.end,
            Node::Emphasis(n) => n.end,
            Node::InlineBlock(n) => n.end,
            Node::LatexFragment(n) => n.end,
            Node::StatisticToken(n) => n.end,
            Node::LineBreak(n) => Pos::new(n.pos.row + n.count.saturating_sub(1), 0),
            Node::ExplicitLineBreak(n) => n.pos,
            Node::Text(n) => n.end,
            Node::Timestamp(n) => n.end,
            Node::SchedulingEntry(n) => n.end,
            Node::NodeWithName(n) => n.node.end(),
            Node::NodeWithMeta(n) => n.node.end(),
            Node::Include(n) => n.end,
            Node::HorizontalRule(n) => n.end,
        }
    }

    pub fn children(&self) -> &[Node] {
        match self {
            Node::Headline(n) => &n.children,
            Node::Paragraph(n) => &n.children,
            Node::List(n) => &n.items,
            Node::ListItem(n) => &n.children,
            Node::DescriptiveListItem(n) => &n.details,
            Node::TableColumn(n) => &n.children,
            Node::Block(n) => &n.children,
            Node::Result(n) => std::slice::from_ref(n.node.as_ref()),
            Node::Example(n) => &n.children,
            Node::Drawer(n) => &n.children,
            Node::FootnoteDefinition(n) => &n.children,
            Node::RegularLink(n) => n.description.as_deref().unwrap_or(NO_CHILDREN),
            Node::Emphasis(n) => &n.content,
            Node::InlineBlock(n) => &n.children,
            Node::LatexFragment(n) => &n.content,
            Node::NodeWithName(n) => std::slice::from_ref(n.node.as_ref()),
            Node::NodeWithMeta(n) => std::slice::from_ref(n.node.as_ref()),
            _ => NO_CHILDREN,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Node::Headline(_) => "headline",
            Node::Paragraph(_) => "paragraph",
            Node::List(_) => "list",
            Node::ListItem(_) => "listitem",
            Node::DescriptiveListItem(_) => "descriptivelistitem",
            Node::Table(_) => "table",
            Node::TableRow(_) => "tablerow",
            Node::TableColumn(_) => "tablecol",
            Node::Block(_) => "block",
            Node::Result(_) => "result",
            Node::Example(_) => "example",
            Node::Drawer(_) => "drawer",
            Node::PropertyDrawer(_) => "propertydrawer",
            Node::Keyword(_) => "keyword",
            Node::Comment(_) => "comment",
            Node::FootnoteDefinition(_) => "footnotedef",
            Node::FootnoteLink(_) => "footnotelink",
            Node::RegularLink(_) => "link",
            Node::Macro(_) => "macro",
            Node::Emphasis(_) => "emphasis",
            Node::InlineBlock(_) => "inlineblock",
            Node::LatexFragment(_) => "latex",
            Node::StatisticToken(_) => "statistictoken",
            Node::LineBreak(_) => "linebreak",
            Node::ExplicitLineBreak(_) => "explicitlinebreak",
            Node::Text(_) => "text",
            Node::Timestamp(_) => "timestamp",
            Node::SchedulingEntry(_) => "schedulingentry",
            Node::NodeWithName(_) => "namednode",
            Node::NodeWithMeta(_) => "metanode",
            Node::Include(_) => "include",
            Node::HorizontalRule(_) => "horizontalrule",
        }
    }
}

/// Lightweight headline summary carried by outline sections so writers can
/// build a table of contents without re-walking the node tree.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SectionHeadline {
    pub index: usize,
    pub lvl: usize,
    pub id: String,
    pub hash: String,
    pub title: Vec<Node>,
    pub tags: Vec<String>,
}

/// One outline section; children link by arena index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Section {
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    pub lvl: usize,
    pub headline: Option<SectionHeadline>,
}

/// Table of contents mirror of the headline nesting. Built incrementally
/// during parsing: a new headline attaches to the nearest open section with a
/// strictly smaller level. Index 0 is the synthetic zero-level root.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Outline {
    pub sections: Vec<Section>,
    last: usize,
    pub count: usize,
}

impl Outline {
    pub fn new() -> Self {
        Outline {
            sections: vec![Section {
                parent: None,
                children: Vec::new(),
                lvl: 0,
                headline: None,
            }],
            last: 0,
            count: 0,
        }
    }

    /// Adds a section for a headline and returns its 1-based document index.
    pub fn add_headline(&mut self, headline: SectionHeadline) -> usize {
        let lvl = headline.lvl;
        let mut parent = self.last;
        while self.sections[parent].headline.is_some() && self.sections[parent].lvl >= lvl {
            parent = self.sections[parent]
                .parent
                .expect("non-root sections always have a parent");
        }
        let idx = self.sections.len();
        self.sections.push(Section {
            parent: Some(parent),
            children: Vec::new(),
            lvl,
            headline: Some(headline),
        });
        self.sections[parent].children.push(idx);
        self.last = idx;
        self.count += 1;
        self.count
    }

    pub fn root_children(&self) -> &[usize] {
        &self.sections[0].children
    }

    pub fn section(&self, idx: usize) -> &Section {
        &self.sections[idx]
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

impl Default for Outline {
    fn default() -> Self {
        Self::new()
    }
}

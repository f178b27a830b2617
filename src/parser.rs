use crate::ast::*;
use crate::document::Configuration;
use crate::lexer::{compute_text_end, Pos, Token, TokenKind};
use crate::org_writer::OrgWriter;
use crate::table::{compute_column_infos, is_special_row, Formulas, RowColRef};
use rustc_hash::{FxHashMap, FxHasher};
use std::collections::HashMap;
use std::hash::Hasher;
use std::path::{Path, PathBuf};

/// A stop predicate: a pure function of the token slice and an index,
/// composed by each sub-parser to express its sibling/container boundary.
/// Every predicate chain roots in the bounds check of the whole-document
/// parse, so predicates may index the slice after deferring to their parent.
pub(crate) type StopPred<'a> = &'a dyn Fn(&[Token], usize) -> bool;

/// Per-headline mutable state while its children are being parsed:
/// scheduling entries and embedded timestamps attach to the innermost open
/// headline, `#+TBLFM:` keywords to its most recent table.
#[derive(Default)]
pub(crate) struct HeadlineScope {
    scheduled: Option<SchedulingEntry>,
    deadline: Option<SchedulingEntry>,
    closed: Option<SchedulingEntry>,
    timestamp: Option<Timestamp>,
    tables: Vec<u64>,
}

pub(crate) struct ParseOutput {
    pub nodes: Vec<Node>,
    pub outline: Outline,
    pub buffer_settings: HashMap<String, String>,
    pub macros: HashMap<String, String>,
    pub links: HashMap<String, String>,
    pub named_nodes: HashMap<String, Node>,
}

/// Recursive-descent block parser over the token stream. Owns its token
/// slice exclusively; the only mutable shared structures are the outline
/// cursor, the content-hash stack and the headline scope stack, all scoped
/// to one parse call.
pub(crate) struct Parser<'a> {
    pub(crate) cfg: &'a Configuration,
    path: PathBuf,
    pub(crate) tokens: Vec<Token>,
    pub(crate) base_lvl: usize,
    outline: Outline,
    hash_stack: Vec<FxHasher>,
    pub(crate) scopes: Vec<HeadlineScope>,
    buffer_settings: HashMap<String, String>,
    macros: HashMap<String, String>,
    links: HashMap<String, String>,
    named_nodes: HashMap<String, Node>,
    pub(crate) last_keywords: Vec<Keyword>,
    pending_formulas: FxHashMap<u64, Vec<Keyword>>,
    table_seq: u64,
}

pub(crate) fn is_second_blank_line(tokens: &[Token], i: usize) -> bool {
    if i == 0 || i >= tokens.len() {
        return false;
    }
    let (t1, t2) = (&tokens[i - 1], &tokens[i]);
    t1.kind == TokenKind::Text
        && t2.kind == TokenKind::Text
        && t1.content.trim().is_empty()
        && t2.content.trim().is_empty()
}

fn is_list_token(t: &Token) -> bool {
    matches!(t.kind, TokenKind::UnorderedList | TokenKind::OrderedList)
}

/// Trims fast-access suffixes from TODO keywords: `TODO(t)` -> `TODO`.
fn trim_fast_tags(tags: Vec<&str>) -> Vec<String> {
    tags.into_iter()
        .map(|t| {
            let b = t.as_bytes();
            if b.len() >= 3 && b[b.len() - 1] == b')' && b[b.len() - 3] == b'(' {
                t[..t.len() - 3].to_string()
            } else {
                t.to_string()
            }
        })
        .collect()
}

fn split_parameters(s: &str) -> Vec<String> {
    let mut parameters = Vec::new();
    let mut parts = s.split(" :");
    let lang = parts.next().unwrap_or("").trim();
    if !lang.is_empty() {
        parameters.push(lang.to_string());
    }
    for p in parts {
        match p.split_once(' ') {
            Some((k, v)) => {
                parameters.push(format!(":{k}"));
                parameters.push(v.trim().to_string());
            }
            None => {
                parameters.push(format!(":{p}"));
                parameters.push(String::new());
            }
        }
    }
    parameters
}

fn trim_indent_up_to(line: &str, max: usize) -> &str {
    let mut i = 0;
    let bytes = line.as_bytes();
    while i < bytes.len() && i < max && (bytes[i] as char).is_whitespace() {
        i += 1;
    }
    &line[i..]
}

impl<'a> Parser<'a> {
    pub(crate) fn new(cfg: &'a Configuration, path: &Path, lines: &[String]) -> Self {
        let tokens = lines
            .iter()
            .enumerate()
            .map(|(row, line)| cfg.patterns.tokenize(line, row))
            .collect();
        let mut root_hash = FxHasher::default();
        root_hash.write(path.to_string_lossy().as_bytes());
        Parser {
            cfg,
            path: path.to_path_buf(),
            tokens,
            base_lvl: 0,
            outline: Outline::new(),
            hash_stack: vec![root_hash],
            scopes: vec![HeadlineScope::default()],
            buffer_settings: HashMap::new(),
            macros: HashMap::new(),
            links: HashMap::new(),
            named_nodes: HashMap::new(),
            last_keywords: Vec::new(),
            pending_formulas: FxHashMap::default(),
            table_seq: 0,
        }
    }

    pub(crate) fn run(mut self) -> ParseOutput {
        let stop = |tokens: &[Token], i: usize| i >= tokens.len();
        let (_, mut nodes) = self.parse_many(0, &stop);
        self.attach_formulas(&mut nodes);
        ParseOutput {
            nodes,
            outline: self.outline,
            buffer_settings: self.buffer_settings,
            macros: self.macros,
            links: self.links,
            named_nodes: self.named_nodes,
        }
    }

    /// Value for a buffer setting, falling back to the configured defaults.
    pub(crate) fn get_setting(&self, key: &str) -> String {
        self.buffer_settings
            .get(key)
            .or_else(|| self.cfg.default_settings.get(key))
            .cloned()
            .unwrap_or_default()
    }

    pub(crate) fn parse_many(&mut self, start: usize, stop: StopPred) -> (usize, Vec<Node>) {
        let mut i = start;
        let mut nodes = Vec::new();
        while i < self.tokens.len() && !stop(&self.tokens, i) {
            let (consumed, node) = self.parse_one(i, stop);
            i += consumed;
            nodes.push(node);
        }
        (i - start, nodes)
    }

    /// Dispatches on the current token kind. A sub-parser reporting zero
    /// consumption means malformed nesting; the token is demoted to plain
    /// text and retried, which guarantees forward progress.
    pub(crate) fn parse_one(&mut self, i: usize, stop: StopPred) -> (usize, Node) {
        loop {
            let (consumed, node) = match self.tokens[i].kind {
                TokenKind::UnorderedList | TokenKind::OrderedList => self.parse_list(i, stop),
                TokenKind::TableRow | TokenKind::TableSeparator => self.parse_table(i, stop),
                TokenKind::BeginBlock => self.parse_block(i, stop),
                TokenKind::Result => self.parse_result(i, stop),
                TokenKind::BeginDrawer => self.parse_drawer(i, stop),
                TokenKind::Text => self.parse_paragraph(i, stop),
                TokenKind::Example => self.parse_example(i, stop),
                TokenKind::HorizontalRule => self.parse_horizontal_rule(i, stop),
                TokenKind::Comment => self.parse_comment(i, stop),
                TokenKind::Keyword => self.parse_keyword(i, stop),
                TokenKind::Headline => self.parse_headline(i, stop),
                TokenKind::Scheduled | TokenKind::Deadline | TokenKind::Closed => {
                    self.parse_scheduling_entry(i, stop)
                }
                TokenKind::FootnoteDefinition => self.parse_footnote_definition(i, stop),
                TokenKind::EndBlock | TokenKind::EndDrawer => (0, None),
            };
            if consumed != 0 {
                return (consumed, node.expect("consuming parsers produce a node"));
            }
            self.cfg.warn(format!(
                "could not parse token {:?} at row {}: falling back to plain text",
                self.tokens[i].kind, self.tokens[i].pos.row
            ));
            let line = self.tokens[i].matches[0].clone();
            let row = self.tokens[i].pos.row;
            self.tokens[i] = self.cfg.patterns.as_text(&line, row);
        }
    }

    // === Headlines and the outline ===

    fn parse_headline(&mut self, i: usize, parent_stop: StopPred) -> (usize, Option<Node>) {
        let token = self.tokens[i].clone();
        let lvl = token.matches[1].len();
        let pos = token.pos;
        let mut text = token.content.clone();

        let mut status = None;
        let todo_keywords = trim_fast_tags(
            self.get_setting("TODO")
                .split(|c: char| c.is_whitespace() || c == '|')
                .filter(|s| !s.is_empty())
                .collect(),
        );
        for keyword in &todo_keywords {
            if let Some(rest) = text.strip_prefix(keyword.as_str()) {
                if rest.starts_with(char::is_whitespace) {
                    status = Some(keyword.clone());
                    text = rest[1..].to_string();
                    break;
                }
            }
        }

        let mut priority = None;
        let tb = text.as_bytes();
        if tb.len() >= 4 && tb[0] == b'[' && tb[1] == b'#' && (b'A'..=b'C').contains(&tb[2]) && tb[3] == b']'
        {
            priority = Some((tb[2] as char).to_string());
            text = text[4..].trim_start().to_string();
        }

        let mut tags = Vec::new();
        if let Some(m) = self.cfg.patterns.tag.captures(&text) {
            let cluster = m.get(2).map_or("", |g| g.as_str()).to_string();
            text = m.get(1).map_or("", |g| g.as_str()).to_string();
            tags = cluster
                .trim()
                .split(':')
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect();
        }

        let mut progress = None;
        if let Some(m) = self.cfg.patterns.progress_suffix.captures(&text.clone()) {
            let whole = m.get(0).unwrap();
            let content = m.get(1).unwrap().as_str().to_string();
            let p = Pos::new(pos.row, token.matches[0].len() - whole.as_str().trim_start().len());
            progress = Some(StatisticToken {
                pos: p,
                end: Pos::new(p.row, p.col + content.len() + 2),
                content,
            });
            text.truncate(whole.start());
        }

        let title = self.parse_inline(&text, i);
        let rendered_title = OrgWriter::new().write_nodes_str(&title);

        let mut hasher = self
            .hash_stack
            .last()
            .expect("the hash stack always holds the root")
            .clone();
        hasher.write(rendered_title.as_bytes());
        let hash = format!("{:016x}", hasher.finish());
        self.hash_stack.push(hasher);

        let index = self.outline.add_headline(SectionHeadline {
            index: 0,
            lvl,
            id: format!("headline-{hash}"),
            hash: hash.clone(),
            title: title.clone(),
            tags: tags.clone(),
        });
        let section_idx = self.outline.sections.len() - 1;
        if let Some(sh) = &mut self.outline.sections[section_idx].headline {
            sh.index = index;
        }

        self.scopes.push(HeadlineScope::default());
        let stop = |tokens: &[Token], i: usize| {
            parent_stop(tokens, i)
                || (tokens[i].kind == TokenKind::Headline && tokens[i].matches[1].len() <= lvl)
        };
        let (consumed, mut children) = self.parse_many(i + 1, &stop);
        let scope = self.scopes.pop().expect("scope pushed above");
        self.hash_stack.pop();

        // The property drawer sits right under the headline, possibly below
        // the planning line; it is promoted out of the ordinary children.
        let mut properties = None;
        let mut drawer_idx = 0;
        while matches!(children.get(drawer_idx), Some(Node::SchedulingEntry(_))) {
            drawer_idx += 1;
        }
        if matches!(children.get(drawer_idx), Some(Node::PropertyDrawer(_))) {
            if let Node::PropertyDrawer(d) = children.remove(drawer_idx) {
                properties = Some(d);
            }
        }
        if let Some(custom) = properties.as_ref().and_then(|p| p.get("CUSTOM_ID")) {
            if let Some(sh) = &mut self.outline.sections[section_idx].headline {
                sh.id = custom.to_string();
            }
        }

        let end = children
            .last()
            .map(|n| n.end())
            .or_else(|| title.last().map(|n| n.end()))
            .unwrap_or(token.end_pos);
        let headline = Headline {
            pos,
            end,
            index,
            lvl,
            status,
            priority,
            progress,
            tags,
            title,
            properties,
            scheduled: scope.scheduled,
            deadline: scope.deadline,
            closed: scope.closed,
            timestamp: scope.timestamp,
            children,
            hash,
        };
        (consumed + 1, Some(Node::Headline(headline)))
    }

    fn parse_scheduling_entry(&mut self, i: usize, _stop: StopPred) -> (usize, Option<Node>) {
        let token = self.tokens[i].clone();
        let parsed = self.cfg.dates.parse_sdc(&token.content);
        let (date, date_type) = match parsed {
            Some((d, dt)) => (Some(d), dt),
            None => (None, crate::date::DateType::None),
        };
        let entry = SchedulingEntry {
            pos: token.pos,
            end: token.end_pos,
            date,
            date_type,
        };
        let scope = self.scopes.last_mut().expect("a scope is always open");
        match token.kind {
            TokenKind::Scheduled => scope.scheduled = Some(entry.clone()),
            TokenKind::Deadline => scope.deadline = Some(entry.clone()),
            _ => scope.closed = Some(entry.clone()),
        }
        (1, Some(Node::SchedulingEntry(entry)))
    }

    pub(crate) fn attach_timestamp(&mut self, timestamp: &Timestamp) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.timestamp = Some(timestamp.clone());
        }
    }

    // === Lists ===

    fn list_kind(&self, t: &Token) -> (ListKind, ListKind) {
        let main = match t.kind {
            TokenKind::UnorderedList => ListKind::Unordered,
            _ => ListKind::Ordered,
        };
        if self.cfg.patterns.descriptive_sep.is_match(&t.content) {
            (main, ListKind::Descriptive)
        } else {
            (main, main)
        }
    }

    fn parse_list(&mut self, i: usize, parent_stop: StopPred) -> (usize, Option<Node>) {
        let start = i;
        let lvl = self.tokens[i].lvl;
        let (main_kind, kind) = self.list_kind(&self.tokens[i]);
        let pos = self.tokens[start].pos;
        let mut items = Vec::new();
        let mut i = i;
        loop {
            if i >= self.tokens.len()
                || parent_stop(&self.tokens, i)
                || self.tokens[i].lvl != lvl
                || !is_list_token(&self.tokens[i])
                || self.list_kind(&self.tokens[i]).0 != main_kind
            {
                break;
            }
            let (consumed, item) = self.parse_list_item(kind, i, parent_stop);
            i += consumed;
            items.push(item);
        }
        (i - start, Some(Node::List(List { pos, kind, items })))
    }

    fn parse_list_item(
        &mut self,
        kind: ListKind,
        i: usize,
        parent_stop: StopPred,
    ) -> (usize, Node) {
        let start = i;
        let token = self.tokens[i].clone();
        let bullet = token.matches[2].clone();
        let min_indent = token.lvl + bullet.len();
        let mut content = token.content.clone();
        let mut term = String::new();
        let mut status = None;
        let mut value = None;
        let pos = token.pos;

        let original_base_lvl = self.base_lvl;
        self.base_lvl = min_indent + 1;

        if kind == ListKind::Ordered {
            if let Some(m) = self.cfg.patterns.list_value.captures(&content) {
                let v = m.get(1).unwrap().as_str().to_string();
                content = content[4 + v.len()..].to_string();
                value = Some(v);
            }
        }
        if let Some(m) = self.cfg.patterns.list_status.captures(&content) {
            status = Some(m.get(1).unwrap().as_str().to_string());
            content = content[4..].to_string();
        }
        if kind == ListKind::Descriptive {
            if let Some(m) = self.cfg.patterns.descriptive_sep.find(&content) {
                term = content[..m.start()].to_string();
                content = content[m.end()..].to_string();
                if let Some(idx) = token.matches[0].find(" ::") {
                    self.base_lvl = idx + 4;
                }
            }
        }

        // The item's own first line is re-lexed with the bullet stripped and
        // the indentation normalized to the bullet's width.
        let row = token.pos.row;
        let mut replacement = self
            .cfg
            .patterns
            .tokenize(&format!("{}{}", " ".repeat(min_indent), content), row);
        replacement.pos.col += 1;
        replacement.end_pos.col += 1;
        self.tokens[i] = replacement;

        let stop = |tokens: &[Token], j: usize| {
            if parent_stop(tokens, j) {
                return true;
            }
            let t = &tokens[j];
            t.lvl < min_indent && !(t.kind == TokenKind::Text && t.content.is_empty())
        };
        let mut i = i;
        let mut children = Vec::new();
        while i < self.tokens.len()
            && !stop(&self.tokens, i)
            && (i <= start + 1 || !is_second_blank_line(&self.tokens, i))
        {
            let (consumed, node) = self.parse_one(i, &stop);
            i += consumed;
            children.push(node);
        }
        self.base_lvl = original_base_lvl;

        if kind == ListKind::Descriptive {
            let term_nodes = self.parse_inline(&term, start);
            return (
                i - start,
                Node::DescriptiveListItem(DescriptiveListItem {
                    pos,
                    bullet,
                    status,
                    term: term_nodes,
                    details: children,
                }),
            );
        }
        (
            i - start,
            Node::ListItem(ListItem {
                pos,
                bullet,
                status,
                value,
                children,
            }),
        )
    }

    // === Tables ===

    fn parse_table(&mut self, i: usize, parent_stop: StopPred) -> (usize, Option<Node>) {
        let start = i;
        let mut raw_rows: Vec<Option<Vec<String>>> = Vec::new();
        let mut row_spans: Vec<Vec<(Pos, Pos)>> = Vec::new();
        let mut row_tokens: Vec<usize> = Vec::new();
        let mut separator_indices = Vec::new();
        let mut i = i;
        while i < self.tokens.len() && !parent_stop(&self.tokens, i) {
            let token = &self.tokens[i];
            match token.kind {
                TokenKind::TableRow => {
                    let mut cells = Vec::new();
                    let mut spans = Vec::new();
                    let inner = token
                        .content
                        .strip_prefix('|')
                        .unwrap_or(&token.content)
                        .strip_suffix('|')
                        .unwrap_or_else(|| {
                            token.content.strip_prefix('|').unwrap_or(&token.content)
                        });
                    // Cell spans are reconstructed by walking the unsplit
                    // line's separator offsets, keeping round trips exact.
                    let mut col = token.pos.col;
                    for raw in inner.split('|') {
                        let cell_start = Pos::new(token.pos.row, col + 1);
                        let cell_end = Pos::new(token.pos.row, col + 1 + raw.len());
                        spans.push((cell_start, cell_end));
                        cells.push(raw.trim().to_string());
                        col = cell_end.col;
                    }
                    raw_rows.push(Some(cells));
                    row_spans.push(spans);
                    row_tokens.push(i);
                }
                TokenKind::TableSeparator => {
                    separator_indices.push(i - start);
                    raw_rows.push(None);
                    row_spans.push(Vec::new());
                    row_tokens.push(i);
                }
                _ => break,
            }
            i += 1;
        }

        let column_infos = compute_column_infos(&self.cfg.table_patterns, &raw_rows);
        let mut rows = Vec::new();
        for (r, raw) in raw_rows.iter().enumerate() {
            let Some(cells) = raw else {
                rows.push(Row {
                    columns: Vec::new(),
                    is_special: false,
                });
                continue;
            };
            let spans = &row_spans[r];
            let mut columns = Vec::new();
            for c in 0..column_infos.len() {
                let (pos, end) = spans.get(c).copied().unwrap_or_else(|| {
                    let prev = spans
                        .last()
                        .map(|(_, e)| Pos::new(e.row, e.col + 1))
                        .unwrap_or(self.tokens[row_tokens[r]].pos);
                    (prev, prev)
                });
                let children = match cells.get(c) {
                    Some(cell) if !cell.is_empty() => self.parse_inline(cell, row_tokens[r]),
                    _ => Vec::new(),
                };
                columns.push(Column { pos, end, children });
            }
            rows.push(Row {
                columns,
                is_special: is_special_row(&self.cfg.table_patterns, cells),
            });
        }

        self.table_seq += 1;
        let id = self.table_seq;
        if let Some(scope) = self.scopes.last_mut() {
            scope.tables.push(id);
        }
        let table = Table {
            pos: self.tokens[start].pos,
            rows,
            column_infos,
            separator_indices,
            formulas: None,
            cur: RowColRef::default(),
            id,
        };
        (i - start, Some(Node::Table(table)))
    }

    /// Moves pending `#+TBLFM:` keywords onto their tables, parsing the
    /// formulas against the finished table.
    fn attach_formulas(&mut self, nodes: &mut [Node]) {
        if self.pending_formulas.is_empty() {
            return;
        }
        fn walk(parser: &mut Parser<'_>, nodes: &mut [Node]) {
            for node in nodes {
                match node {
                    Node::Table(t) => {
                        if let Some(keywords) = parser.pending_formulas.remove(&t.id) {
                            let formulas =
                                Formulas::process(&parser.cfg.table_patterns, keywords, t);
                            for formula in &formulas.formulas {
                                if !formula.valid {
                                    let value = formulas.keywords[formula.keyword_index]
                                        .value
                                        .clone();
                                    let offset = value.find(&formula.raw).unwrap_or(0);
                                    let err = crate::error::OrgError::BadFormulaTarget {
                                        src: miette::NamedSource::new("TBLFM", value),
                                        span: (offset, formula.raw.len()).into(),
                                    };
                                    parser.cfg.warn(err.to_string());
                                }
                            }
                            t.formulas = Some(formulas);
                        }
                    }
                    Node::Headline(h) => walk(parser, &mut h.children),
                    Node::List(l) => walk(parser, &mut l.items),
                    Node::ListItem(li) => walk(parser, &mut li.children),
                    Node::DescriptiveListItem(di) => walk(parser, &mut di.details),
                    Node::Drawer(d) => walk(parser, &mut d.children),
                    Node::Block(b) => walk(parser, &mut b.children),
                    Node::NodeWithName(n) => walk(parser, std::slice::from_mut(n.node.as_mut())),
                    Node::NodeWithMeta(n) => walk(parser, std::slice::from_mut(n.node.as_mut())),
                    Node::Result(r) => walk(parser, std::slice::from_mut(r.node.as_mut())),
                    _ => {}
                }
            }
        }
        walk(self, nodes);
    }

    // === Blocks, examples, results ===

    fn parse_block(&mut self, i: usize, parent_stop: StopPred) -> (usize, Option<Node>) {
        let start = i;
        let token = self.tokens[i].clone();
        let name = token.content.clone();
        let parameters = split_parameters(&token.matches[3]);
        let is_raw = matches!(
            name.as_str(),
            "SRC" | "EXAMPLE" | "EXPORT" | "VERSE" | "QUOTE" | "CUSTOM"
        );
        let end_of_block = |tokens: &[Token], j: usize| {
            j >= tokens.len()
                || (tokens[j].kind == TokenKind::EndBlock && tokens[j].content == name)
        };

        let mut i = i + 1;
        let children;
        if is_raw {
            let mut raw_text = String::new();
            while !end_of_block(&self.tokens, i) {
                raw_text.push_str(trim_indent_up_to(&self.tokens[i].matches[0], token.lvl));
                raw_text.push('\n');
                i += 1;
            }
            if i >= self.tokens.len() {
                return (0, None);
            }
            if name == "EXAMPLE" || (name == "SRC" && parameters.first().map(String::as_str) == Some("org"))
            {
                raw_text = self
                    .cfg
                    .patterns
                    .example_escape
                    .replace_all(&raw_text, "$1$2$3$4")
                    .to_string();
            }
            children = self.parse_raw_inline(&raw_text, i);
        } else {
            let stop =
                |tokens: &[Token], j: usize| parent_stop(tokens, j) || end_of_block(tokens, j);
            let (consumed, nodes) = self.parse_many(i, &stop);
            children = nodes;
            i += consumed;
        }
        if end_of_block(&self.tokens, i) && i < self.tokens.len() {
            let end = self.tokens[i].end_pos;
            let mut block = Block {
                pos: token.pos,
                end,
                name: name.clone(),
                parameters,
                children,
                result: None,
                keywords: std::mem::take(&mut self.last_keywords),
            };
            let mut i = i;
            if name == "SRC" {
                let (consumed, result) = self.parse_src_block_result(i + 1, parent_stop);
                block.result = result.map(Box::new);
                i += consumed;
            }
            return (i + 1 - start, Some(Node::Block(block)));
        }
        (0, None)
    }

    /// Lookahead for a `#+RESULTS:` marker after a source block, skipping
    /// blank text tokens but stopping at anything else.
    fn parse_src_block_result(
        &mut self,
        i: usize,
        parent_stop: StopPred,
    ) -> (usize, Option<Node>) {
        let start = i;
        let mut i = i;
        while i < self.tokens.len()
            && !parent_stop(&self.tokens, i)
            && self.tokens[i].kind == TokenKind::Text
            && self.tokens[i].content.is_empty()
        {
            i += 1;
        }
        if i >= self.tokens.len()
            || parent_stop(&self.tokens, i)
            || self.tokens[i].kind != TokenKind::Result
        {
            return (0, None);
        }
        let (consumed, node) = self.parse_result(i, parent_stop);
        (i - start + consumed, node)
    }

    fn parse_result(&mut self, i: usize, parent_stop: StopPred) -> (usize, Option<Node>) {
        if i + 1 >= self.tokens.len() || parent_stop(&self.tokens, i + 1) {
            return (0, None);
        }
        let pos = self.tokens[i].pos;
        let (consumed, node) = self.parse_one(i + 1, parent_stop);
        (
            consumed + 1,
            Some(Node::Result(ResultBlock {
                pos,
                node: Box::new(node),
            })),
        )
    }

    fn parse_example(&mut self, i: usize, parent_stop: StopPred) -> (usize, Option<Node>) {
        let start = i;
        let pos = self.tokens[i].pos;
        let mut children = Vec::new();
        let mut i = i;
        while i < self.tokens.len()
            && !parent_stop(&self.tokens, i)
            && self.tokens[i].kind == TokenKind::Example
        {
            let p = self.tokens[i].pos;
            let content = self.tokens[i].content.clone();
            children.push(Node::Text(Text {
                pos: p,
                end: compute_text_end(p, &content),
                content,
                raw: true,
            }));
            i += 1;
        }
        (i - start, Some(Node::Example(Example { pos, children })))
    }

    // === Drawers ===

    fn parse_drawer(&mut self, i: usize, parent_stop: StopPred) -> (usize, Option<Node>) {
        let name = self.tokens[i].content.to_uppercase();
        if name == "PROPERTIES" {
            return self.parse_property_drawer(i, parent_stop);
        }
        let start = i;
        let pos = self.tokens[i].pos;
        let mut children = Vec::new();
        let stop = |tokens: &[Token], j: usize| {
            parent_stop(tokens, j)
                || matches!(
                    tokens[j].kind,
                    TokenKind::EndDrawer | TokenKind::BeginDrawer | TokenKind::Headline
                )
        };
        let mut i = i + 1;
        loop {
            let (consumed, nodes) = self.parse_many(i, &stop);
            i += consumed;
            children.extend(nodes);
            // A drawer cannot nest; an inner drawer start is literal text.
            if i < self.tokens.len() && self.tokens[i].kind == TokenKind::BeginDrawer {
                let t = &self.tokens[i];
                let content = format!(":{}:", t.content);
                let text = Text {
                    pos: t.pos,
                    end: compute_text_end(t.pos, &content),
                    content,
                    raw: false,
                };
                children.push(Node::Paragraph(Paragraph {
                    pos: t.pos,
                    children: vec![Node::Text(text)],
                }));
                i += 1;
            } else {
                break;
            }
        }
        let mut end = children.last().map_or(self.tokens[start].end_pos, |n| n.end());
        if i < self.tokens.len() {
            if self.tokens[i].kind == TokenKind::EndDrawer {
                end = self.tokens[i].end_pos;
                i += 1;
            } else if self.tokens[i].kind == TokenKind::Headline {
                end = self.tokens[i].pos;
            }
        }
        (
            i - start,
            Some(Node::Drawer(Drawer {
                pos,
                end,
                name,
                children,
            })),
        )
    }

    fn parse_property_drawer(&mut self, i: usize, parent_stop: StopPred) -> (usize, Option<Node>) {
        let start = i;
        let pos = self.tokens[i].pos;
        let mut properties = Vec::new();
        let stop = |tokens: &[Token], j: usize| {
            parent_stop(tokens, j)
                || !matches!(tokens[j].kind, TokenKind::Text | TokenKind::BeginDrawer)
        };
        let mut i = i + 1;
        while i < self.tokens.len() && !stop(&self.tokens, i) {
            let Some(m) = self.cfg.patterns.property.captures(&self.tokens[i].matches[0]) else {
                return (0, None);
            };
            let key = m.get(2).map_or("", |g| g.as_str()).to_uppercase();
            let value = m.get(4).map_or("", |g| g.as_str()).trim().to_string();
            properties.push((key, value));
            i += 1;
        }
        if i < self.tokens.len() && self.tokens[i].kind == TokenKind::EndDrawer {
            let end = self.tokens[i].end_pos;
            i += 1;
            return (
                i - start,
                Some(Node::PropertyDrawer(PropertyDrawer {
                    pos,
                    end,
                    properties,
                })),
            );
        }
        (0, None)
    }

    // === Keywords and their side effects ===

    fn keyword_from_token(&self, i: usize) -> Keyword {
        let t = &self.tokens[i];
        Keyword {
            pos: t.pos,
            end: t.end_pos,
            key: t.matches[2].to_uppercase(),
            value: t.matches[4].trim().to_string(),
        }
    }

    fn parse_keyword(&mut self, i: usize, stop: StopPred) -> (usize, Option<Node>) {
        let k = self.keyword_from_token(i);
        match k.key.as_str() {
            "NAME" => self.parse_node_with_name(k, i, stop),
            "SETUPFILE" => self.load_setup_file(k),
            "INCLUDE" => self.parse_include(k, i),
            "LINK" => {
                if let Some((protocol, template)) = k.value.split_once(' ') {
                    self.links
                        .insert(protocol.to_string(), template.to_string());
                }
                (1, Some(Node::Keyword(k)))
            }
            "MACRO" => {
                if let Some((name, template)) = k.value.split_once(' ') {
                    self.macros.insert(name.to_string(), template.to_string());
                }
                (1, Some(Node::Keyword(k)))
            }
            "CAPTION" | "ATTR_HTML" | "ATTR_LATEX" | "ENV" => {
                let (consumed, node) = self.parse_affiliated(i, stop);
                if consumed != 0 {
                    return (consumed, node);
                }
                (1, Some(Node::Keyword(k)))
            }
            "TBLFM" => self.parse_table_formula(k),
            _ => {
                self.buffer_settings
                    .entry(k.key.clone())
                    .and_modify(|v| {
                        v.push('\n');
                        v.push_str(&k.value);
                    })
                    .or_insert_with(|| k.value.clone());
                self.last_keywords.push(k.clone());
                (1, Some(Node::Keyword(k)))
            }
        }
    }

    fn parse_table_formula(&mut self, k: Keyword) -> (usize, Option<Node>) {
        let last_table = self.scopes.last().and_then(|s| s.tables.last().copied());
        match last_table {
            Some(id) => {
                self.pending_formulas.entry(id).or_default().push(k.clone());
            }
            None => self
                .cfg
                .warn(format!("#+TBLFM with no preceding table: {}", k.value)),
        }
        (1, Some(Node::Keyword(k)))
    }

    fn parse_node_with_name(
        &mut self,
        k: Keyword,
        i: usize,
        stop: StopPred,
    ) -> (usize, Option<Node>) {
        if i + 1 >= self.tokens.len() || stop(&self.tokens, i + 1) {
            return (0, None);
        }
        let (consumed, node) = self.parse_one(i + 1, stop);
        if consumed == 0 {
            return (0, None);
        }
        self.named_nodes.insert(k.value.clone(), node.clone());
        (
            consumed + 1,
            Some(Node::NodeWithName(NodeWithName {
                name: k.value,
                node: Box::new(node),
            })),
        )
    }

    /// `#+CAPTION`/`#+ATTR_HTML`/`#+ATTR_LATEX`/`#+ENV` accumulate as
    /// metadata onto the next node instead of becoming nodes themselves.
    fn parse_affiliated(&mut self, i: usize, stop: StopPred) -> (usize, Option<Node>) {
        let start = i;
        let start_pos = self.tokens[i].pos;
        let mut meta = Metadata::default();
        let mut i = i;
        while i < self.tokens.len()
            && !stop(&self.tokens, i)
            && self.tokens[i].kind == TokenKind::Keyword
        {
            let k = self.keyword_from_token(i);
            match k.key.as_str() {
                "CAPTION" => {
                    let nodes = self.parse_inline(&k.value, i);
                    meta.caption.push(nodes);
                }
                "ATTR_HTML" => meta.html_attributes.push(self.split_attributes(&k.value)),
                "ATTR_LATEX" => meta.latex_attributes.push(self.split_attributes(&k.value)),
                "ENV" => meta.latex_env = k.value.trim().to_string(),
                _ => return (0, None),
            }
            i += 1;
        }
        if i >= self.tokens.len() || stop(&self.tokens, i) {
            return (0, None);
        }
        let (consumed, node) = self.parse_one(i, stop);
        if consumed == 0 {
            return (0, None);
        }
        i += consumed;
        (
            i - start,
            Some(Node::NodeWithMeta(NodeWithMeta {
                pos: start_pos,
                node: Box::new(node),
                meta,
            })),
        )
    }

    fn split_attributes(&self, value: &str) -> Vec<String> {
        let re = &self.cfg.patterns.attribute;
        let mut attributes = Vec::new();
        let mut rest = value.to_string();
        while let Some(m) = re.captures(&rest.clone()) {
            attributes.push(m.get(1).unwrap().as_str().to_string());
            rest = m.get(2).map_or("", |g| g.as_str()).to_string();
            match re.find(&rest) {
                Some(next) => {
                    let v = rest[..next.start()].to_string();
                    rest = rest[next.start()..].to_string();
                    attributes.push(v);
                }
                None => {
                    attributes.push(rest.trim().to_string());
                    break;
                }
            }
        }
        attributes
    }

    /// `#+INCLUDE` defers file loading until render time; only the target
    /// description is captured here.
    fn parse_include(&mut self, k: Keyword, i: usize) -> (usize, Option<Node>) {
        let token_end = self.tokens[i].end_pos;
        let mut path = None;
        let mut block_kind = String::new();
        let mut lang = String::new();
        if let Some(m) = self.cfg.patterns.include_file.captures(&k.value) {
            let raw: &str = m.get(1).unwrap().as_str();
            let mut p = PathBuf::from(raw);
            if p.is_relative() {
                if let Some(dir) = self.path.parent() {
                    p = dir.join(p);
                }
            }
            path = Some(p);
            block_kind = m.get(2).unwrap().as_str().to_uppercase();
            lang = m.get(3).unwrap().as_str().to_string();
        }
        (
            1,
            Some(Node::Include(Include {
                pos: k.pos,
                end: token_end,
                keyword: k,
                path,
                block_kind,
                lang,
                keywords: std::mem::take(&mut self.last_keywords),
            })),
        )
    }

    /// `#+SETUPFILE` parses another file immediately and merges its buffer
    /// settings without overriding keys the including document already set.
    fn load_setup_file(&mut self, k: Keyword) -> (usize, Option<Node>) {
        let mut path = PathBuf::from(&k.value);
        if path.is_relative() {
            if let Some(dir) = self.path.parent() {
                path = dir.join(path);
            }
        }
        let bytes = match (self.cfg.read_file)(&path) {
            Ok(b) => b,
            Err(err) => {
                self.cfg
                    .warn(format!("bad setup file {}: {err}", k.value));
                return (1, Some(Node::Keyword(k)));
            }
        };
        let text = String::from_utf8_lossy(&bytes).to_string();
        let setup = self.cfg.parse_str(&text, &path);
        if let Some(err) = &setup.error {
            self.cfg.warn(format!("bad setup file {}: {err}", k.value));
            return (1, Some(Node::Keyword(k)));
        }
        for (key, value) in setup.buffer_settings {
            self.buffer_settings.entry(key).or_insert(value);
        }
        (1, Some(Node::Keyword(k)))
    }

    // === Paragraphs, comments, footnotes, rules ===

    fn parse_paragraph(&mut self, i: usize, parent_stop: StopPred) -> (usize, Option<Node>) {
        let start = i;
        let mut lines = vec![self.tokens[i].content.clone()];
        let stop = |tokens: &[Token], j: usize| {
            parent_stop(tokens, j)
                || tokens[j].kind != TokenKind::Text
                || tokens[j].content.is_empty()
        };
        let mut i = i + 1;
        while i < self.tokens.len() && !stop(&self.tokens, i) {
            let indent = self.tokens[i].lvl.saturating_sub(self.base_lvl);
            lines.push(format!("{}{}", " ".repeat(indent), self.tokens[i].content));
            i += 1;
        }
        let pos = self.tokens[start].pos;
        let joined = lines.join("\n");
        let children = self.parse_inline(&joined, start);
        (i - start, Some(Node::Paragraph(Paragraph { pos, children })))
    }

    fn parse_horizontal_rule(&mut self, i: usize, _stop: StopPred) -> (usize, Option<Node>) {
        let t = &self.tokens[i];
        (
            1,
            Some(Node::HorizontalRule(HorizontalRule {
                pos: t.pos,
                end: t.end_pos,
            })),
        )
    }

    fn parse_comment(&mut self, i: usize, _stop: StopPred) -> (usize, Option<Node>) {
        let t = &self.tokens[i];
        (
            1,
            Some(Node::Comment(Comment {
                pos: t.pos,
                end: t.end_pos,
                content: t.content.clone(),
            })),
        )
    }

    fn parse_footnote_definition(
        &mut self,
        i: usize,
        parent_stop: StopPred,
    ) -> (usize, Option<Node>) {
        let start = i;
        let name = self.tokens[i].content.clone();
        let row = self.tokens[i].pos.row;
        let rest = self.tokens[i].matches[2].clone();
        self.tokens[i] = self.cfg.patterns.tokenize(&rest, row);
        let stop = |tokens: &[Token], j: usize| {
            parent_stop(tokens, j)
                || (is_second_blank_line(tokens, j) && j > start + 1)
                || matches!(
                    tokens[j].kind,
                    TokenKind::Headline | TokenKind::FootnoteDefinition
                )
        };
        let pos = self.tokens[start].pos;
        let (consumed, children) = self.parse_many(i, &stop);
        (
            consumed,
            Some(Node::FootnoteDefinition(FootnoteDefinition {
                pos,
                name,
                children,
                inline: false,
            })),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Configuration;

    fn parse(source: &str) -> Vec<Node> {
        let cfg = Configuration::default().silent();
        let doc = cfg.parse_str(source, "test.org");
        assert!(doc.error.is_none(), "parse error: {:?}", doc.error);
        doc.nodes
    }

    #[test]
    fn empty_document() {
        assert!(parse("").is_empty());
    }

    #[test]
    fn headline_with_status_priority_tags() {
        let nodes = parse("* TODO [#A] Fix the thing [1/2] :urgent:work:\n");
        let Node::Headline(h) = &nodes[0] else {
            panic!("expected headline, got {:?}", nodes[0].kind_name());
        };
        assert_eq!(h.lvl, 1);
        assert_eq!(h.status.as_deref(), Some("TODO"));
        assert_eq!(h.priority.as_deref(), Some("A"));
        assert_eq!(h.progress.as_ref().unwrap().content, "1/2");
        assert_eq!(h.tags, vec!["urgent", "work"]);
        assert_eq!(h.index, 1);
    }

    #[test]
    fn headline_nesting_builds_outline() {
        let nodes = parse("* a\n** b\n** c\n* d\n");
        assert_eq!(nodes.len(), 2);
        let Node::Headline(a) = &nodes[0] else { panic!() };
        assert_eq!(a.children.len(), 2);
        let Node::Headline(d) = &nodes[1] else { panic!() };
        assert!(d.children.is_empty());
    }

    #[test]
    fn property_drawer_is_promoted() {
        let nodes = parse("* a\n:PROPERTIES:\n:CUSTOM_ID: my-anchor\n:END:\nbody\n");
        let Node::Headline(h) = &nodes[0] else { panic!() };
        let props = h.properties.as_ref().expect("drawer should be promoted");
        assert_eq!(props.get("CUSTOM_ID"), Some("my-anchor"));
        assert_eq!(h.id(), "my-anchor");
        // The drawer is no longer an ordinary child.
        assert!(matches!(h.children[0], Node::Paragraph(_)));
    }

    #[test]
    fn scheduling_entries_attach_to_headline() {
        let nodes = parse("* task\nSCHEDULED: <2004-12-25 Sat>\nDEADLINE: <2004-12-31 Fri>\n");
        let Node::Headline(h) = &nodes[0] else { panic!() };
        let scheduled = h.scheduled.as_ref().expect("scheduled entry");
        assert_eq!(
            scheduled.date.as_ref().unwrap().to_date_string(),
            "<2004-12-25 Sat>"
        );
        assert!(h.deadline.is_some());
        assert!(h.closed.is_none());
        // They also remain children for serialization.
        assert_eq!(h.children.len(), 2);
    }

    #[test]
    fn lists_group_and_nest() {
        let nodes = parse("- one\n- two\n  - nested\n- three\n");
        let Node::List(l) = &nodes[0] else { panic!() };
        assert_eq!(l.kind, ListKind::Unordered);
        assert_eq!(l.items.len(), 3);
        let Node::ListItem(second) = &l.items[1] else { panic!() };
        assert!(second
            .children
            .iter()
            .any(|n| matches!(n, Node::List(_))));
    }

    #[test]
    fn ordered_list_with_value_and_status() {
        let nodes = parse("1. [@4] [X] done item\n");
        let Node::List(l) = &nodes[0] else { panic!() };
        let Node::ListItem(item) = &l.items[0] else { panic!() };
        assert_eq!(item.value.as_deref(), Some("4"));
        assert_eq!(item.status.as_deref(), Some("X"));
    }

    #[test]
    fn descriptive_list_splits_term() {
        let nodes = parse("- term :: details here\n");
        let Node::List(l) = &nodes[0] else { panic!() };
        assert_eq!(l.kind, ListKind::Descriptive);
        let Node::DescriptiveListItem(item) = &l.items[0] else { panic!() };
        let term = OrgWriter::new().write_nodes_str(&item.term);
        assert_eq!(term, "term");
    }

    #[test]
    fn table_alignment_and_separators() {
        let nodes = parse("| name | n |\n|------+---|\n| a    | 1 |\n| bb   | 2 |\n");
        let Node::Table(t) = &nodes[0] else { panic!() };
        assert_eq!(t.height(), 4);
        assert_eq!(t.width(), 2);
        assert_eq!(t.separator_indices, vec![1]);
        assert_eq!(t.column_infos[1].align, Some(crate::table::Align::Right));
        assert_eq!(t.column_infos[0].len, 4);
    }

    #[test]
    fn tblfm_attaches_to_preceding_table() {
        let nodes = parse("| 1 | 2 |\n| 3 | 4 |\n#+TBLFM: @2$2=@1$1*2\n");
        let Node::Table(t) = &nodes[0] else { panic!() };
        let formulas = t.formulas.as_ref().expect("formulas attached");
        assert_eq!(formulas.formulas.len(), 1);
        assert!(formulas.formulas[0].valid);
        // The keyword also stays in the tree for round-tripping.
        assert!(matches!(nodes[1], Node::Keyword(_)));
    }

    #[test]
    fn unterminated_block_degrades_to_text() {
        let nodes = parse("#+BEGIN_SRC sh\necho hi\n");
        // No end marker: the opening line is demoted and everything becomes
        // paragraphs rather than a parse failure.
        assert!(nodes.iter().all(|n| matches!(n, Node::Paragraph(_))));
    }

    #[test]
    fn src_block_with_result() {
        let nodes = parse("#+BEGIN_SRC sh\necho hi\n#+END_SRC\n\n#+RESULTS:\n: hi\n");
        let Node::Block(b) = &nodes[0] else { panic!() };
        assert_eq!(b.name, "SRC");
        assert_eq!(b.parameters, vec!["sh"]);
        let result = b.result.as_ref().expect("attached result");
        assert!(matches!(**result, Node::Result(_)));
    }

    #[test]
    fn block_content_is_verbatim() {
        let nodes = parse("#+BEGIN_EXAMPLE\n*not bold*\n#+END_EXAMPLE\n");
        let Node::Block(b) = &nodes[0] else { panic!() };
        assert!(b
            .children
            .iter()
            .all(|n| matches!(n, Node::Text(Text { raw: true, .. }) | Node::LineBreak(_))));
    }

    #[test]
    fn generic_drawer_parses_contents() {
        let nodes = parse(":LOGBOOK:\nsome note\n:END:\n");
        let Node::Drawer(d) = &nodes[0] else { panic!() };
        assert_eq!(d.name, "LOGBOOK");
        assert!(matches!(d.children[0], Node::Paragraph(_)));
    }

    #[test]
    fn footnote_definition_owns_following_lines() {
        let nodes = parse("[fn:1] the definition\nmore of it\n\n\nafter\n");
        let Node::FootnoteDefinition(f) = &nodes[0] else { panic!() };
        assert_eq!(f.name, "1");
        assert!(!f.inline);
        // The double blank line terminated the definition body.
        assert!(nodes.len() > 1);
    }

    #[test]
    fn name_keyword_registers_node() {
        let cfg = Configuration::default().silent();
        let doc = cfg.parse_str("#+NAME: tbl\n| 1 |\n", "test.org");
        assert!(doc.named_nodes.contains_key("tbl"));
        assert!(matches!(doc.nodes[0], Node::NodeWithName(_)));
    }

    #[test]
    fn caption_becomes_metadata() {
        let nodes = parse("#+CAPTION: a caption\n#+ATTR_HTML: :width 100\n| 1 |\n");
        let Node::NodeWithMeta(m) = &nodes[0] else { panic!() };
        assert_eq!(m.meta.caption.len(), 1);
        assert_eq!(m.meta.html_attributes[0], vec![":width", "100"]);
        assert!(matches!(*m.node, Node::Table(_)));
    }

    #[test]
    fn link_and_macro_keywords_register() {
        let cfg = Configuration::default().silent();
        let doc = cfg.parse_str(
            "#+LINK: gh https://github.com/%s\n#+MACRO: hello Hello $1!\n",
            "test.org",
        );
        assert_eq!(
            doc.links.get("gh").map(String::as_str),
            Some("https://github.com/%s")
        );
        assert_eq!(
            doc.macros.get("hello").map(String::as_str),
            Some("Hello $1!")
        );
    }

    #[test]
    fn buffer_settings_accumulate() {
        let cfg = Configuration::default().silent();
        let doc = cfg.parse_str("#+TITLE: one\n#+AUTHOR: me\n#+TITLE: two\n", "test.org");
        assert_eq!(doc.get("TITLE"), "one\ntwo");
        assert_eq!(doc.get("AUTHOR"), "me");
        // Defaults shine through for unset keys.
        assert_eq!(doc.get("TODO"), "TODO | DONE");
    }

    #[test]
    fn position_invariants_hold() {
        let source = "* head\nsome *bold* text\n- a list\n  continued\n| a | b |\n";
        fn check(nodes: &[Node]) {
            for node in nodes {
                let (pos, end) = (node.pos(), node.end());
                assert!(
                    end.at_or_after(pos),
                    "{}: end {end:?} before start {pos:?}",
                    node.kind_name()
                );
                if let Some(last) = node.children().last() {
                    assert!(
                        end.at_or_after(last.end()),
                        "{}: container ends before last child",
                        node.kind_name()
                    );
                }
                check(node.children());
            }
        }
        check(&parse(source));
    }

    #[test]
    fn hash_is_stable_and_prefix_dependent() {
        let cfg = Configuration::default().silent();
        let a1 = cfg.parse_str("* one\n* two\n", "t.org");
        let a2 = cfg.parse_str("* one\n* two\n", "t.org");
        let hashes = |d: &crate::Document| -> Vec<String> {
            d.nodes
                .iter()
                .filter_map(|n| match n {
                    Node::Headline(h) => Some(h.hash.clone()),
                    _ => None,
                })
                .collect()
        };
        assert_eq!(hashes(&a1), hashes(&a2));
        // Changing a later sibling leaves the earlier hash alone.
        let b = cfg.parse_str("* one\n* two changed\n", "t.org");
        assert_eq!(hashes(&a1)[0], hashes(&b)[0]);
        assert_ne!(hashes(&a1)[1], hashes(&b)[1]);
    }
}

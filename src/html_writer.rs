use crate::ast::*;
use crate::date::TimestampType;
use crate::document::Document;
use crate::org_writer::OrgWriter;
use crate::writer::{write_nodes, Writer};
use regex::Regex;
use std::collections::HashMap;

pub type HighlightFn = Box<dyn Fn(&[Keyword], &str, &str, bool) -> String>;

/// Exports a document as HTML: TOC from the outline, anchors from headline
/// content hashes, footnote section, macro and link-abbreviation expansion.
/// Code blocks go through an injected highlight function.
pub struct HtmlWriter {
    pub highlight_code_block: HighlightFn,
    pub no_wrap_code_block: bool,
    pub pretty_relative_links: bool,
    out: String,
    html_escape: bool,
    footnote_mapping: HashMap<String, usize>,
    footnote_list: Vec<Option<FootnoteDefinition>>,
    nested_anchor: Regex,
    toc_headline_max_lvl: Regex,
}

pub fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('\'', "&#39;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&#34;")
}

/// A small org-entity pass for prose text: dashes, ellipsis, `\nbsp`.
fn replace_entities(s: &str) -> String {
    s.replace(r"\nbsp", "\u{00a0}")
        .replace("---", "\u{2014}")
        .replace("--", "\u{2013}")
        .replace("...", "\u{2026}")
}

fn query_escape(s: &str) -> String {
    let mut out = String::new();
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            b' ' => out.push('+'),
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

fn emphasis_tags(kind: &str) -> Option<(&'static str, &'static str)> {
    Some(match kind {
        "/" => ("<em>", "</em>"),
        "*" => ("<strong>", "</strong>"),
        "+" => ("<del>", "</del>"),
        "~" => ("<code>", "</code>"),
        "=" => (r#"<code class="verbatim">"#, "</code>"),
        "_" => (r#"<span style="text-decoration: underline;">"#, "</span>"),
        "_{}" => ("<sub>", "</sub>"),
        "^{}" => ("<sup>", "</sup>"),
        _ => return None,
    })
}

fn list_tags(kind: ListKind) -> (&'static str, &'static str) {
    match kind {
        ListKind::Unordered => ("<ul>", "</ul>"),
        ListKind::Ordered => ("<ol>", "</ol>"),
        ListKind::Descriptive => ("<dl>", "</dl>"),
    }
}

fn list_item_status_class(status: &str) -> &'static str {
    match status {
        "-" => "indeterminate",
        "X" => "checked",
        _ => "unchecked",
    }
}

impl HtmlWriter {
    pub fn new() -> Self {
        HtmlWriter {
            highlight_code_block: Box::new(|_keywords, source, _lang, inline| {
                if inline {
                    format!(
                        "<div class=\"highlight-inline\">\n<pre>\n{}\n</pre>\n</div>",
                        escape_html(source)
                    )
                } else {
                    format!(
                        "<div class=\"highlight\">\n<pre>\n{}\n</pre>\n</div>",
                        escape_html(source)
                    )
                }
            }),
            no_wrap_code_block: false,
            pretty_relative_links: false,
            out: String::new(),
            html_escape: true,
            footnote_mapping: HashMap::new(),
            footnote_list: Vec::new(),
            nested_anchor: Regex::new(r"</?a[^>]*>").expect("anchor pattern must compile"),
            toc_headline_max_lvl: Regex::new(r"headlines\s+(\d+)")
                .expect("toc pattern must compile"),
        }
    }

    fn push(&mut self, s: &str) {
        self.out.push_str(s);
    }

    fn nodes_as_string(&mut self, doc: &Document, nodes: &[Node]) -> String {
        let saved = std::mem::take(&mut self.out);
        write_nodes(self, doc, nodes);
        std::mem::replace(&mut self.out, saved)
    }

    fn block_content(&mut self, doc: &Document, name: &str, children: &[Node]) -> String {
        let raw = matches!(name, "SRC" | "EXAMPLE" | "EXPORT" | "VERSE" | "QUOTE" | "CUSTOM");
        if raw {
            let saved_escape = self.html_escape;
            self.html_escape = false;
            let out = self.nodes_as_string(doc, children);
            self.html_escape = saved_escape;
            out.trim_end().to_string()
        } else {
            self.nodes_as_string(doc, children)
        }
    }

    pub fn write_outline(&mut self, doc: &Document, max_lvl: usize) {
        if doc.outline.root_children().is_empty() {
            return;
        }
        self.push("<nav>\n<ul>\n");
        for &idx in &doc.outline.root_children().to_vec() {
            self.write_section(doc, idx, max_lvl);
        }
        self.push("</ul>\n</nav>\n");
    }

    fn write_section(&mut self, doc: &Document, idx: usize, max_lvl: usize) {
        let section = doc.outline.section(idx).clone();
        let Some(sh) = &section.headline else { return };
        if (max_lvl != 0 && sh.lvl > max_lvl)
            || sh
                .tags
                .iter()
                .any(|t| doc.get("EXCLUDE_TAGS").split_whitespace().any(|e| e == t))
        {
            return;
        }
        self.push("<li>");
        let rendered = self.nodes_as_string(doc, &sh.title);
        let title = self.nested_anchor.replace_all(&rendered, "").to_string();
        self.push(&format!("<a href=\"#{}\">{}</a>\n", sh.id, title));
        let has_children = section.children.iter().any(|&c| {
            doc.outline
                .section(c)
                .headline
                .as_ref()
                .is_some_and(|c| max_lvl == 0 || c.lvl <= max_lvl)
        });
        if has_children {
            self.push("<ul>\n");
            for &child in &section.children {
                self.write_section(doc, child, max_lvl);
            }
            self.push("</ul>\n");
        }
        self.push("</li>\n");
    }

    fn write_headline(&mut self, doc: &Document, h: &Headline) {
        if h.is_excluded(&doc.get("EXCLUDE_TAGS")) {
            return;
        }
        let id = h.id();
        self.push(&format!(
            "<div id=\"outline-container-{}\" class=\"outline-{}\">\n",
            id,
            h.lvl + 1
        ));
        self.push(&format!("<h{} id=\"{}\">\n", h.lvl + 1, id));
        if doc.get_option("todo") != "nil" {
            if let Some(status) = &h.status {
                self.push(&format!("<span class=\"todo\">{status}</span>\n"));
            }
        }
        if doc.get_option("pri") != "nil" {
            if let Some(priority) = &h.priority {
                self.push(&format!("<span class=\"priority\">[{priority}]</span>\n"));
            }
        }
        write_nodes(self, doc, &h.title);
        if let Some(progress) = &h.progress {
            self.push(&format!(
                "<code class=\"statistic\">[{}]</code>",
                progress.content
            ));
        }
        if doc.get_option("tags") != "nil" && !h.tags.is_empty() {
            let tags: Vec<String> = h
                .tags
                .iter()
                .map(|t| format!("<span>{t}</span>"))
                .collect();
            self.push("&#xa0;&#xa0;&#xa0;");
            self.push(&format!(
                "<span class=\"tags\">{}</span>",
                tags.join("&#xa0;")
            ));
        }
        self.push(&format!("\n</h{}>\n", h.lvl + 1));
        let content = self.nodes_as_string(doc, &h.children);
        if !content.is_empty() {
            self.push(&format!(
                "<div id=\"outline-text-{}\" class=\"outline-text-{}\">\n{}</div>\n",
                id,
                h.lvl + 1,
                content
            ));
        }
        self.push("</div>\n");
    }

    fn write_block(&mut self, doc: &Document, b: &Block) {
        let content = self.block_content(doc, &b.name, &b.children);
        let params = b.parameter_map();
        let exports = params.get(":exports").map(String::as_str);
        match b.name.as_str() {
            "SRC" => {
                if exports != Some("results") && exports != Some("none") {
                    let lang = b
                        .parameters
                        .first()
                        .map(|l| l.to_lowercase())
                        .unwrap_or_else(|| "text".to_string());
                    let highlighted =
                        (self.highlight_code_block)(&b.keywords, &content, &lang, false);
                    if self.no_wrap_code_block {
                        self.push(&format!("\n{highlighted}\n"));
                    } else {
                        self.push(&format!(
                            "<div class=\"src src-{lang}\">\n{highlighted}\n</div>\n"
                        ));
                    }
                }
            }
            "EXAMPLE" => {
                self.push(&format!(
                    "<pre class=\"example\">\n{}\n</pre>\n",
                    escape_html(&content)
                ));
            }
            "EXPORT" => {
                if b.parameters.first().map(|p| p.to_lowercase()).as_deref() == Some("html") {
                    self.push(&content);
                    self.push("\n");
                }
            }
            "QUOTE" => {
                self.push(&format!("<blockquote>\n{content}</blockquote>\n"));
            }
            "CENTER" => {
                self.push(
                    "<div class=\"center-block\" style=\"text-align: center; margin-left: auto; margin-right: auto;\">\n",
                );
                self.push(&format!("{content}</div>\n"));
            }
            _ => {
                self.push(&format!(
                    "<div class=\"{}-block\">\n",
                    b.name.to_lowercase()
                ));
                self.push(&format!("{content}</div>\n"));
            }
        }
        if let Some(result) = &b.result {
            if exports != Some("code") && exports != Some("none") {
                self.write_node(doc, result);
            }
        }
    }

    fn write_inline_block(&mut self, doc: &Document, b: &InlineBlock) {
        let content = self.block_content(doc, &b.name.to_uppercase(), &b.children);
        match b.name.as_str() {
            "src" => {
                let lang = b
                    .parameters
                    .first()
                    .map(|l| l.to_lowercase())
                    .unwrap_or_default();
                let highlighted = (self.highlight_code_block)(&b.keywords, &content, &lang, true);
                if self.no_wrap_code_block {
                    self.push(&format!("\n{highlighted}\n"));
                } else {
                    self.push(&format!(
                        "<div class=\"src src-inline src-{lang}\">\n{highlighted}\n</div>"
                    ));
                }
            }
            _ => {
                if b.parameters.first().map(|p| p.to_lowercase()).as_deref() == Some("html") {
                    self.push(&content);
                }
            }
        }
    }

    fn write_keyword(&mut self, doc: &Document, k: &Keyword) {
        if k.key == "HTML" {
            self.push(&k.value);
            self.push("\n");
        } else if k.key == "TOC" {
            if let Some(m) = self.toc_headline_max_lvl.captures(&k.value) {
                let max_lvl = m.get(1).unwrap().as_str().parse().unwrap_or(0);
                self.write_outline(doc, max_lvl);
            }
        }
    }

    fn write_footnotes(&mut self, doc: &Document) {
        if doc.get_option("f") == "nil" || self.footnote_list.is_empty() {
            return;
        }
        self.push("<div class=\"footnotes\">\n");
        self.push("<hr class=\"footnotes-separatator\">\n");
        self.push("<div class=\"footnote-definitions\">\n");
        for i in 0..self.footnote_list.len() {
            let id = i + 1;
            let Some(definition) = self.footnote_list[i].clone() else {
                let name = self
                    .footnote_mapping
                    .iter()
                    .find_map(|(k, &v)| (v == i).then(|| k.clone()))
                    .unwrap_or_default();
                doc.config()
                    .warn(format!("missing footnote definition for [fn:{name}] (#{id})"));
                continue;
            };
            self.push("<div class=\"footnote-definition\">\n");
            self.push(&format!(
                "<sup id=\"footnote-{id}\"><a href=\"#footnote-reference-{id}\">{id}</a></sup>\n"
            ));
            self.push("<div class=\"footnote-body\">\n");
            write_nodes(self, doc, &definition.children);
            self.push("</div>\n</div>\n");
        }
        self.push("</div>\n</div>\n");
    }

    fn add_footnote(&mut self, link: &FootnoteLink) -> usize {
        if !link.name.is_empty() {
            if let Some(&i) = self.footnote_mapping.get(&link.name) {
                return i;
            }
        }
        self.footnote_list
            .push(link.definition.as_deref().cloned());
        let i = self.footnote_list.len() - 1;
        if !link.name.is_empty() {
            self.footnote_mapping.insert(link.name.clone(), i);
        }
        i
    }

    fn write_footnote_link(&mut self, doc: &Document, l: &FootnoteLink) {
        if doc.get_option("f") == "nil" {
            return;
        }
        let id = self.add_footnote(l) + 1;
        self.push(&format!(
            "<sup class=\"footnote-reference\"><a id=\"footnote-reference-{id}\" href=\"#footnote-{id}\">{id}</a></sup>"
        ));
    }

    fn write_timestamp(&mut self, doc: &Document, t: &Timestamp) {
        if doc.get_option("<") == "nil" {
            return;
        }
        let (open, close) = match t.date.timestamp_type {
            TimestampType::Active => ("&lt;", "&gt;"),
            TimestampType::Inactive => ("&lsqb;", "&rsqb;"),
            TimestampType::NoBracket => ("", ""),
        };
        let mut bare = t.date.clone();
        bare.timestamp_type = TimestampType::NoBracket;
        self.push(&format!(
            "<span class=\"timestamp\">{open}{}{close}</span>",
            bare.to_full_string()
        ));
    }

    fn write_scheduling_entry(&mut self, doc: &Document, s: &SchedulingEntry) {
        if doc.get_option("<") == "nil" {
            return;
        }
        let name = match s.date_type {
            crate::date::DateType::Scheduled => "SCHEDULED",
            crate::date::DateType::Deadline => "DEADLINE",
            crate::date::DateType::Closed => "CLOSED",
            _ => "",
        };
        self.push(&format!("<span class=\"tags\">{name}</span>"));
        let Some(date) = &s.date else { return };
        let (open, close) = match date.timestamp_type {
            TimestampType::Active => ("&lt;", "&gt;"),
            TimestampType::Inactive => ("&lsqb;", "&rsqb;"),
            TimestampType::NoBracket => ("", ""),
        };
        let mut bare = date.clone();
        bare.timestamp_type = TimestampType::NoBracket;
        self.push(&format!(
            "<span class=\"timestamp\">{open}{}{close}</span>",
            bare.to_full_string()
        ));
    }

    fn write_regular_link(&mut self, doc: &Document, l: &RegularLink) {
        let mut url = escape_html(&l.url);
        if l.protocol == "file" {
            url = url["file:".len()..].to_string();
        }
        let is_relative = l.protocol == "file" || l.protocol.is_empty();
        if is_relative && self.pretty_relative_links {
            if !url.starts_with('/') {
                url = format!("../{url}");
            }
            if let Some(stripped) = url.strip_suffix(".org") {
                url = format!("{stripped}/");
            }
        } else if is_relative && url.ends_with(".org") {
            url = format!("{}.html", url.trim_end_matches(".org"));
        }
        if let Some(prefix) = doc.links.get(&l.protocol).filter(|p| !p.is_empty()) {
            let tag = l
                .url
                .strip_prefix(&format!("{}:", l.protocol))
                .unwrap_or(&l.url);
            if prefix.contains("%s") || prefix.contains("%h") {
                url = escape_html(
                    &prefix
                        .replace("%s", tag)
                        .replace("%h", &query_escape(tag)),
                );
            } else {
                url = format!("{}{}", escape_html(prefix), tag);
            }
        } else if let Some(prefix) = doc.links.get(&l.url).filter(|p| !p.is_empty()) {
            url = escape_html(&prefix.replace("%s", "").replace("%h", ""));
        }
        match l.kind {
            LinkKind::Image => match &l.description {
                None => self.push(&format!(
                    "<img src=\"{url}\" alt=\"{url}\" title=\"{url}\" />"
                )),
                Some(description) => {
                    let rendered = OrgWriter::new().write_nodes_str(description);
                    let description = rendered.trim_start_matches("file:");
                    self.push(&format!(
                        "<a href=\"{url}\"><img src=\"{description}\" alt=\"{description}\" /></a>"
                    ));
                }
            },
            LinkKind::Video => match &l.description {
                None => self.push(&format!(
                    "<video src=\"{url}\" title=\"{url}\">{url}</video>"
                )),
                Some(description) => {
                    let rendered = OrgWriter::new().write_nodes_str(description);
                    let description = rendered.trim_start_matches("file:");
                    self.push(&format!(
                        "<a href=\"{url}\"><video src=\"{description}\" title=\"{description}\"></video></a>"
                    ));
                }
            },
            LinkKind::Regular => {
                let description = match &l.description {
                    Some(nodes) => self.nodes_as_string(doc, nodes),
                    None => url.clone(),
                };
                self.push(&format!("<a href=\"{url}\">{description}</a>"));
            }
        }
    }

    fn write_macro(&mut self, doc: &Document, m: &Macro) {
        let Some(template) = doc.macros.get(&m.name).filter(|t| !t.is_empty()) else {
            doc.config().warn(format!("missing macro {}", m.name));
            return;
        };
        let mut expanded = template.clone();
        for (i, parameter) in m.parameters.iter().enumerate() {
            expanded = expanded.replace(&format!("${}", i + 1), parameter);
        }
        let macro_doc = doc.config().parse_str(&expanded, &doc.path);
        if let Some(err) = &macro_doc.error {
            doc.config()
                .warn(format!("bad macro: {} -> {expanded}: {err}", m.name));
            return;
        }
        write_nodes(self, &macro_doc, &macro_doc.nodes);
    }

    fn write_list_item_content(&mut self, doc: &Document, children: &[Node]) {
        let all_paragraphs = children.iter().all(|n| matches!(n, Node::Paragraph(_)));
        if all_paragraphs {
            for (i, child) in children.iter().enumerate() {
                let Node::Paragraph(p) = child else { continue };
                let out = self.nodes_as_string(doc, &p.children);
                if i != 0 && !out.is_empty() {
                    self.push("\n");
                }
                self.push(&out);
            }
        } else {
            self.push("\n");
            write_nodes(self, doc, children);
        }
    }

    fn write_table(&mut self, doc: &Document, t: &Table) {
        self.push("<table>\n");
        let rows = &t.rows;
        let seps = &t.separator_indices;
        let mut in_head = !seps.is_empty()
            && seps[0] != rows.len() - 1
            && (seps[0] != 0 || (seps.len() > 1 && seps[seps.len() - 1] != rows.len() - 1));
        if in_head {
            self.push("<thead>\n");
        } else {
            self.push("<tbody>\n");
        }
        for (i, row) in rows.iter().enumerate() {
            if row.columns.is_empty() && i != 0 && i != rows.len() - 1 {
                if in_head {
                    self.push("</thead>\n<tbody>\n");
                    in_head = false;
                } else {
                    self.push("</tbody>\n<tbody>\n");
                }
            }
            if row.is_special {
                continue;
            }
            if !row.columns.is_empty() {
                let tag = if in_head { "th" } else { "td" };
                self.push("<tr>\n");
                for (column, info) in row.columns.iter().zip(&t.column_infos) {
                    match info.align {
                        Some(align) => {
                            let class = match align {
                                crate::table::Align::Left => "left",
                                crate::table::Align::Center => "center",
                                crate::table::Align::Right => "right",
                            };
                            self.push(&format!("<{tag} class=\"align-{class}\">"));
                        }
                        None => self.push(&format!("<{tag}>")),
                    }
                    write_nodes(self, doc, &column.children);
                    self.push(&format!("</{tag}>\n"));
                }
                self.push("</tr>\n");
            }
        }
        self.push("</tbody>\n</table>\n");
    }

    /// Minimal attribute injection for `#+ATTR_HTML`: merges `class`/`style`
    /// and sets other attributes on the first tag; anything unexpected
    /// degrades to the unmodified input with a warning.
    fn with_html_attributes(&self, doc: &Document, input: &str, kvs: &[String]) -> String {
        if kvs.len() % 2 != 0 {
            doc.config()
                .warn(format!("uneven attribute list: {kvs:?}"));
            return input.to_string();
        }
        let trimmed = input.trim_start();
        let offset = input.len() - trimmed.len();
        if !trimmed.starts_with('<') {
            doc.config()
                .warn(format!("could not extend attributes of {input}"));
            return input.to_string();
        }
        let Some(tag_end) = trimmed.find('>') else {
            doc.config()
                .warn(format!("could not extend attributes of {input}"));
            return input.to_string();
        };
        let mut tag = trimmed[1..tag_end].trim_end_matches('/').to_string();
        let self_closing = trimmed[1..tag_end].trim_end().ends_with('/');
        for pair in kvs.chunks(2) {
            let key = pair[0].trim_start_matches(':');
            let value = &pair[1];
            let needle = format!("{key}=\"");
            if let Some(attr_start) = tag.find(&needle) {
                let value_start = attr_start + needle.len();
                let Some(value_len) = tag[value_start..].find('"') else {
                    continue;
                };
                match key {
                    "class" | "style" => {
                        tag.insert_str(value_start + value_len, &format!(" {value}"));
                    }
                    _ => {
                        tag.replace_range(value_start..value_start + value_len, value);
                    }
                }
            } else {
                tag.push_str(&format!(" {key}=\"{value}\""));
            }
        }
        let closing = if self_closing { " />" } else { ">" };
        format!(
            "{}<{}{}{}",
            &input[..offset],
            tag.trim_end(),
            closing,
            &trimmed[tag_end + 1..]
        )
    }

    fn write_node_with_meta(&mut self, doc: &Document, n: &NodeWithMeta) {
        let mut out = self.nodes_as_string(doc, std::slice::from_ref(n.node.as_ref()));
        if let Node::Paragraph(p) = n.node.as_ref() {
            if p.children.len() == 1
                && matches!(
                    &p.children[0],
                    Node::RegularLink(l) if matches!(l.kind, LinkKind::Image | LinkKind::Video)
                )
            {
                out = self.nodes_as_string(doc, std::slice::from_ref(&p.children[0]));
            }
        }
        for attributes in &n.meta.html_attributes {
            out = format!("{}\n", self.with_html_attributes(doc, &out, attributes));
        }
        if !n.meta.caption.is_empty() {
            let mut caption = String::new();
            for (i, nodes) in n.meta.caption.iter().enumerate() {
                if i != 0 {
                    caption.push(' ');
                }
                caption.push_str(&self.nodes_as_string(doc, nodes));
            }
            out = format!(
                "<figure>\n{out}<figcaption>\n{caption}\n</figcaption>\n</figure>\n"
            );
        }
        self.push(&out);
    }

    fn write_text(&mut self, doc: &Document, t: &Text) {
        if !self.html_escape {
            self.push(&t.content);
        } else if doc.get_option("e") == "nil" || t.raw {
            self.push(&escape_html(&t.content));
        } else {
            self.push(&escape_html(&replace_entities(&t.content)));
        }
    }
}

impl Default for HtmlWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl Writer for HtmlWriter {
    fn before(&mut self, doc: &Document) {
        let title = doc.get("TITLE");
        if !title.is_empty() && doc.get_option("title") != "nil" {
            let title_doc = doc.config().parse_str(&title, &doc.path);
            let rendered = if title_doc.error.is_none() {
                // A one-line title parses as a single paragraph; unwrap it so
                // the heading does not nest a <p>.
                match title_doc.nodes.as_slice() {
                    [Node::Paragraph(p)] => self.nodes_as_string(&title_doc, &p.children),
                    _ => self.nodes_as_string(&title_doc, &title_doc.nodes),
                }
            } else {
                title
            };
            self.push(&format!(
                "<h1 class=\"title\">{}</h1>\n",
                rendered.trim_end()
            ));
        }
        if doc.get_option("toc") != "nil" {
            let max_lvl = doc.get_option("toc").parse().unwrap_or(0);
            self.write_outline(doc, max_lvl);
        }
    }

    fn write_node(&mut self, doc: &Document, node: &Node) {
        match node {
            Node::Headline(h) => self.write_headline(doc, h),
            Node::Paragraph(p) => {
                if p.children.is_empty() {
                    return;
                }
                self.push("<p>");
                write_nodes(self, doc, &p.children);
                self.push("</p>\n");
            }
            Node::List(l) => {
                let (open, close) = list_tags(l.kind);
                self.push(open);
                self.push("\n");
                write_nodes(self, doc, &l.items);
                self.push(close);
                self.push("\n");
            }
            Node::ListItem(li) => {
                let mut attributes = String::new();
                if let Some(value) = &li.value {
                    attributes.push_str(&format!(" value=\"{value}\""));
                }
                if let Some(status) = &li.status {
                    attributes
                        .push_str(&format!(" class=\"{}\"", list_item_status_class(status)));
                }
                self.push(&format!("<li{attributes}>"));
                self.write_list_item_content(doc, &li.children);
                self.push("</li>\n");
            }
            Node::DescriptiveListItem(di) => {
                match &di.status {
                    Some(status) => self.push(&format!(
                        "<dt class=\"{}\">\n",
                        list_item_status_class(status)
                    )),
                    None => self.push("<dt>\n"),
                }
                if di.term.is_empty() {
                    self.push("?");
                } else {
                    write_nodes(self, doc, &di.term);
                }
                self.push("\n</dt>\n<dd>");
                self.write_list_item_content(doc, &di.details);
                self.push("</dd>\n");
            }
            Node::Table(t) => self.write_table(doc, t),
            Node::TableRow(r) => {
                self.push("<tr>\n");
                for column in &r.columns {
                    self.push("<td>");
                    write_nodes(self, doc, &column.children);
                    self.push("</td>\n");
                }
                self.push("</tr>\n");
            }
            Node::TableColumn(c) => write_nodes(self, doc, &c.children),
            Node::Block(b) => self.write_block(doc, b),
            Node::Result(r) => self.write_node(doc, &r.node),
            Node::Example(e) => {
                self.push("<pre class=\"example\">\n");
                for child in &e.children {
                    self.write_node(doc, child);
                    self.push("\n");
                }
                self.push("</pre>\n");
            }
            Node::Drawer(d) => write_nodes(self, doc, &d.children),
            Node::PropertyDrawer(_) => {}
            Node::Keyword(k) => self.write_keyword(doc, k),
            Node::Comment(_) => {}
            Node::FootnoteDefinition(f) => {
                if let Some(&i) = self.footnote_mapping.get(&f.name) {
                    self.footnote_list[i] = Some(f.clone());
                }
            }
            Node::FootnoteLink(l) => self.write_footnote_link(doc, l),
            Node::RegularLink(l) => self.write_regular_link(doc, l),
            Node::Macro(m) => self.write_macro(doc, m),
            Node::Emphasis(e) => match emphasis_tags(&e.kind) {
                Some((open, close)) => {
                    self.push(open);
                    write_nodes(self, doc, &e.content);
                    self.push(close);
                }
                None => write_nodes(self, doc, &e.content),
            },
            Node::InlineBlock(b) => self.write_inline_block(doc, b),
            Node::LatexFragment(l) => {
                self.push(&escape_html(&l.opening_pair));
                write_nodes(self, doc, &l.content);
                self.push(&escape_html(&l.closing_pair));
            }
            Node::StatisticToken(s) => {
                self.push(&format!("<code class=\"statistic\">[{}]</code>", s.content));
            }
            Node::LineBreak(l) => {
                if doc.get_option("ealb") == "nil" || !l.between_multibyte {
                    self.push(&"\n".repeat(l.count));
                }
            }
            Node::ExplicitLineBreak(_) => self.push("<br>\n"),
            Node::Text(t) => self.write_text(doc, t),
            Node::Timestamp(t) => self.write_timestamp(doc, t),
            Node::SchedulingEntry(s) => self.write_scheduling_entry(doc, s),
            Node::NodeWithName(n) => self.write_node(doc, &n.node),
            Node::NodeWithMeta(n) => self.write_node_with_meta(doc, n),
            Node::Include(i) => {
                let resolved = doc.resolve_include(i);
                self.write_node(doc, &resolved);
            }
            Node::HorizontalRule(_) => self.push("<hr>\n"),
        }
    }

    fn after(&mut self, doc: &Document) {
        self.write_footnotes(doc);
    }

    fn output(&mut self) -> String {
        std::mem::take(&mut self.out)
    }
}

use crate::ast::*;
use crate::lexer::{compute_text_end, Pos};
use crate::org_writer::OrgWriter;
use crate::parser::Parser;
use regex::Regex;

const VALID_URL_CHARS: &str =
    "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-._~:/?#[]@!$&'()*+,;=";

/// Compiled inline-construct patterns, built once per configuration.
#[derive(Debug, Clone)]
pub(crate) struct InlinePatterns {
    sub_superscript: Regex,
    footnote: Regex,
    statistics: Regex,
    latex_env: Regex,
    inline_block: Regex,
    inline_export: Regex,
    macro_call: Regex,
    autolink_protocol: Regex,
    image_ext: Regex,
    video_ext: Regex,
}

fn pattern(source: &str) -> Regex {
    Regex::new(source).expect("inline pattern must compile")
}

impl InlinePatterns {
    pub(crate) fn new() -> Self {
        InlinePatterns {
            sub_superscript: pattern(r"^([_^])\{([^{}]+?)\}"),
            footnote: pattern(r"^\[fn:([\w-]*?)(:(.*?))?\]"),
            statistics: pattern(r"^\[(\d+/\d+|\d+%)\]"),
            latex_env: pattern(r"(?s)^\\begin\{(\w+)\}(.*)\\end\{(\w+)\}"),
            inline_block: pattern(r"^src_(\w+)(\[(.*)\])?\{(.*)\}"),
            inline_export: pattern(r"^@@(\w+):(.*?)@@"),
            macro_call: pattern(r"^\{\{\{(.*)\((.*)\)\}\}\}"),
            autolink_protocol: pattern(r"^(https?|ftp|file)$"),
            image_ext: pattern(r"^[.](png|gif|jpe?g|svg|tiff?)$"),
            video_ext: pattern(r"^[.](webm|mp4)$"),
        }
    }
}

fn prev_char(input: &str, i: usize) -> Option<char> {
    input[..i].chars().next_back()
}

fn char_at(input: &str, i: usize) -> Option<char> {
    input[i..].chars().next()
}

// see org-emphasis-regexp-components

fn is_valid_pre_char(c: char) -> bool {
    c.is_whitespace() || "-({'\"".contains(c)
}

fn is_valid_post_char(c: char) -> bool {
    c.is_whitespace() || "-.,:!?;'\")}[".contains(c)
}

fn is_valid_border_char(c: char) -> bool {
    !c.is_whitespace()
}

fn has_valid_pre_and_border_chars(input: &str, i: usize) -> bool {
    (i + 1 >= input.len() || char_at(input, i + 1).is_some_and(is_valid_border_char))
        && (i == 0 || prev_char(input, i).is_some_and(is_valid_pre_char))
}

fn has_valid_post_and_border_chars(input: &str, i: usize) -> bool {
    (i == 0 || prev_char(input, i).is_some_and(is_valid_border_char))
        && (i + 1 >= input.len() || char_at(input, i + 1).is_some_and(is_valid_post_char))
}

/// Position of byte `offset` within an inline input that started at `base`.
/// Columns restart after each embedded newline.
fn inline_pos(base: Pos, offset: usize, newline_offset: usize, line_start: usize) -> Pos {
    if newline_offset == 0 {
        Pos::new(base.row, base.col + offset)
    } else {
        Pos::new(base.row + newline_offset, offset.saturating_sub(line_start))
    }
}

fn path_ext(s: &str) -> String {
    let segment = s.rsplit('/').next().unwrap_or(s);
    match segment.rfind('.') {
        Some(i) => segment[i..].to_string(),
        None => String::new(),
    }
}

pub(crate) fn classify_link(
    patterns: &InlinePatterns,
    protocol: &str,
    url: &str,
    description: Option<&str>,
) -> LinkKind {
    if let Some(desc) = description {
        let desc_protocol = desc.split(':').next().unwrap_or("");
        let desc_ext = path_ext(desc);
        let ok = matches!(desc_protocol, "file" | "http" | "https");
        if ok && patterns.image_ext.is_match(&desc_ext) {
            return LinkKind::Image;
        }
        if ok && patterns.video_ext.is_match(&desc_ext) {
            return LinkKind::Video;
        }
    }
    if description.is_some() || (!protocol.is_empty() && !matches!(protocol, "file" | "http" | "https"))
    {
        return LinkKind::Regular;
    }
    let ext = path_ext(url);
    if patterns.image_ext.is_match(&ext) {
        LinkKind::Image
    } else if patterns.video_ext.is_match(&ext) {
        LinkKind::Video
    } else {
        LinkKind::Regular
    }
}

impl<'a> Parser<'a> {
    /// Single-pass left-to-right scan over already-assembled multi-line
    /// text. Dispatches on the current character; unmatched characters
    /// accumulate into a pending text span flushed whenever a construct is
    /// recognized or at end of input.
    pub(crate) fn parse_inline(&mut self, input: &str, ni: usize) -> Vec<Node> {
        let base = self.token_pos(ni);
        let bytes = input.as_bytes();
        let mut nodes = Vec::new();
        let (mut previous, mut current) = (0usize, 0usize);
        let mut newline_offset = 0usize;
        let mut line_start = 0usize;
        while current < bytes.len() {
            let pos = inline_pos(base, current, newline_offset, line_start);
            let mut rewind = 0usize;
            let (consumed, node) = match bytes[current] {
                b'^' => self.parse_sub_or_superscript(input, current, pos),
                b'_' => {
                    let (r, c, n) =
                        self.parse_subscript_or_emphasis_or_inline_block(input, current, pos, ni);
                    rewind = r;
                    (c, n)
                }
                b'@' => self.parse_inline_export_block(input, current, pos, ni),
                b'*' | b'/' | b'+' => self.parse_emphasis(input, current, pos, false, ni),
                b'=' | b'~' => self.parse_emphasis(input, current, pos, true, ni),
                b'[' => self.parse_opening_bracket(input, current, pos, ni),
                b'{' => self.parse_macro(input, current, pos),
                b'<' => self.parse_timestamp(input, current, pos),
                b'\\' => self.parse_explicit_line_break_or_latex_fragment(input, current, pos, ni),
                b'$' => self.parse_latex_fragment(input, current, pos, 1, ni),
                b'\n' => {
                    let (c, n) = self.parse_line_break(input, current, pos);
                    (c, Some(n))
                }
                b':' => {
                    let (r, c, n) = self.parse_auto_link(input, current, pos);
                    rewind = r;
                    (c, n)
                }
                _ => (0, None),
            };
            current -= rewind;
            if consumed != 0 {
                if current > previous {
                    let content = &input[previous..current];
                    let text_pos = inline_pos(base, previous, newline_offset, line_start);
                    nodes.push(Node::Text(Text {
                        pos: text_pos,
                        end: compute_text_end(text_pos, content),
                        content: content.to_string(),
                        raw: false,
                    }));
                }
                if let Some(node) = node {
                    nodes.push(node);
                }
                let segment = &input[current..current + consumed];
                if let Some(last_nl) = segment.rfind('\n') {
                    newline_offset += segment.matches('\n').count();
                    line_start = current + last_nl + 1;
                }
                current += consumed;
                previous = current;
            } else {
                current += 1;
            }
        }
        if previous < input.len() {
            let content = &input[previous..];
            let text_pos = inline_pos(base, previous, newline_offset, line_start);
            nodes.push(Node::Text(Text {
                pos: text_pos,
                end: compute_text_end(text_pos, content),
                content: content.to_string(),
                raw: false,
            }));
        }
        nodes
    }

    /// Raw variant used inside verbatim contexts: only newlines are special,
    /// everything else stays opaque text so markup cannot inject there.
    pub(crate) fn parse_raw_inline(&mut self, input: &str, ni: usize) -> Vec<Node> {
        let base = self.token_pos(ni);
        let bytes = input.as_bytes();
        let mut nodes = Vec::new();
        let (mut previous, mut current) = (0usize, 0usize);
        let mut newline_offset = 0usize;
        let mut line_start = 0usize;
        while current < bytes.len() {
            if bytes[current] == b'\n' {
                let pos = inline_pos(base, current, newline_offset, line_start);
                let (consumed, node) = self.parse_line_break(input, current, pos);
                if current > previous {
                    let content = &input[previous..current];
                    let text_pos = inline_pos(base, previous, newline_offset, line_start);
                    nodes.push(Node::Text(Text {
                        pos: text_pos,
                        end: compute_text_end(text_pos, content),
                        content: content.to_string(),
                        raw: true,
                    }));
                }
                nodes.push(node);
                newline_offset += consumed;
                line_start = current + consumed;
                current += consumed;
                previous = current;
            } else {
                current += 1;
            }
        }
        if previous < input.len() {
            let content = &input[previous..];
            let text_pos = inline_pos(base, previous, newline_offset, line_start);
            nodes.push(Node::Text(Text {
                pos: text_pos,
                end: compute_text_end(text_pos, content),
                content: content.to_string(),
                raw: true,
            }));
        }
        nodes
    }

    fn token_pos(&self, ni: usize) -> Pos {
        self.tokens.get(ni).map_or(Pos::default(), |t| t.pos)
    }

    fn parse_line_break(&self, input: &str, start: usize, pos: Pos) -> (usize, Node) {
        let bytes = input.as_bytes();
        let mut i = start;
        while i < bytes.len() && bytes[i] == b'\n' {
            i += 1;
        }
        let before = prev_char(input, start).map_or(0, char::len_utf8);
        let after = char_at(input, i).map_or(0, char::len_utf8);
        (
            i - start,
            Node::LineBreak(LineBreak {
                pos,
                count: i - start,
                between_multibyte: before > 1 && after > 1,
            }),
        )
    }

    fn parse_sub_or_superscript(
        &mut self,
        input: &str,
        start: usize,
        pos: Pos,
    ) -> (usize, Option<Node>) {
        let Some(m) = self.cfg.inline.sub_superscript.captures(&input[start..]) else {
            return (0, None);
        };
        let marker = m.get(1).unwrap().as_str();
        let content = m.get(2).unwrap().as_str();
        let full_len = content.len() + 3;
        let text = Text {
            pos,
            end: compute_text_end(pos, content),
            content: content.to_string(),
            raw: false,
        };
        (
            full_len,
            Some(Node::Emphasis(Emphasis {
                pos,
                end: Pos::new(pos.row, pos.col + full_len),
                kind: format!("{marker}{{}}"),
                content: vec![Node::Text(text)],
            })),
        )
    }

    fn parse_subscript_or_emphasis_or_inline_block(
        &mut self,
        input: &str,
        start: usize,
        pos: Pos,
        ni: usize,
    ) -> (usize, usize, Option<Node>) {
        let (rewind, consumed, node) = self.parse_inline_block(input, start, pos, ni);
        if consumed != 0 {
            return (rewind, consumed, node);
        }
        let (consumed, node) = self.parse_sub_or_superscript(input, start, pos);
        if consumed != 0 {
            return (0, consumed, node);
        }
        let (consumed, node) = self.parse_emphasis(input, start, pos, false, ni);
        (0, consumed, node)
    }

    /// `src_lang[params]{body}`, recognized when the `_` is preceded by a
    /// standalone `src`.
    fn parse_inline_block(
        &mut self,
        input: &str,
        start: usize,
        pos: Pos,
        ni: usize,
    ) -> (usize, usize, Option<Node>) {
        if !(input[..start].ends_with("src")
            && (start < 4 || char_at(input, start - 4).is_some_and(char::is_whitespace)))
        {
            return (0, 0, None);
        }
        let Some(m) = self
            .cfg
            .inline
            .inline_block
            .captures(&input[start - 3..])
            .map(|m| {
                (
                    m.get(0).unwrap().len(),
                    m.get(1).map_or("", |g| g.as_str()).to_string(),
                    m.get(3).map_or("", |g| g.as_str()).to_string(),
                    m.get(4).map_or("", |g| g.as_str()).to_string(),
                )
            })
        else {
            return (0, 0, None);
        };
        let (full_len, lang, params, body) = m;
        let parameters: Vec<String> = format!("{lang} {params}")
            .split_whitespace()
            .map(str::to_string)
            .collect();
        let children = self.parse_raw_inline(&body, ni);
        let block_pos = Pos::new(pos.row, pos.col.saturating_sub(3));
        (
            3,
            full_len,
            Some(Node::InlineBlock(InlineBlock {
                pos: block_pos,
                end: Pos::new(block_pos.row, block_pos.col + full_len),
                name: "src".to_string(),
                parameters,
                children,
                keywords: std::mem::take(&mut self.last_keywords),
            })),
        )
    }

    /// `@@backend:content@@` inline export snippets.
    fn parse_inline_export_block(
        &mut self,
        input: &str,
        start: usize,
        pos: Pos,
        ni: usize,
    ) -> (usize, Option<Node>) {
        let Some((full_len, backend, body)) =
            self.cfg.inline.inline_export.captures(&input[start..]).map(|m| {
                (
                    m.get(0).unwrap().len(),
                    m.get(1).map_or("", |g| g.as_str()).to_string(),
                    m.get(2).map_or("", |g| g.as_str()).to_string(),
                )
            })
        else {
            return (0, None);
        };
        let children = self.parse_raw_inline(&body, ni);
        (
            full_len,
            Some(Node::InlineBlock(InlineBlock {
                pos,
                end: Pos::new(pos.row, pos.col + full_len),
                name: "export".to_string(),
                parameters: vec![backend],
                children,
                keywords: std::mem::take(&mut self.last_keywords),
            })),
        )
    }

    /// A marker opens emphasis only with a valid preceding character and a
    /// non-space border; it closes at the next marker with mirrored rules.
    /// More than the configured number of embedded newlines means the marker
    /// is literal text.
    fn parse_emphasis(
        &mut self,
        input: &str,
        start: usize,
        pos: Pos,
        is_raw: bool,
        ni: usize,
    ) -> (usize, Option<Node>) {
        let bytes = input.as_bytes();
        let marker = bytes[start];
        if !has_valid_pre_and_border_chars(input, start) {
            return (0, None);
        }
        let mut consumed_newlines = 0usize;
        let mut i = start + 1;
        while i < bytes.len() && consumed_newlines <= self.cfg.max_emphasis_newlines {
            if bytes[i] == b'\n' {
                consumed_newlines += 1;
            }
            if bytes[i] == marker && i != start + 1 && has_valid_post_and_border_chars(input, i) {
                let content = input[start + 1..i].to_string();
                let children = if is_raw {
                    self.parse_raw_inline(&content, ni)
                } else {
                    self.parse_inline(&content, ni)
                };
                return (
                    i + 1 - start,
                    Some(Node::Emphasis(Emphasis {
                        pos,
                        end: compute_text_end(pos, &input[start..=i]),
                        kind: (marker as char).to_string(),
                        content: children,
                    })),
                );
            }
            i += 1;
        }
        (0, None)
    }

    fn parse_opening_bracket(
        &mut self,
        input: &str,
        start: usize,
        pos: Pos,
        ni: usize,
    ) -> (usize, Option<Node>) {
        let rest = &input[start..];
        if rest.len() >= 2 && rest.starts_with("[[") {
            return self.parse_regular_link(input, start, pos, ni);
        }
        if self.cfg.inline.footnote.is_match(rest) {
            return self.parse_footnote_reference(input, start, pos, ni);
        }
        if self.cfg.inline.statistics.is_match(rest) {
            return self.parse_statistic_token(input, start, pos);
        }
        (0, None)
    }

    /// `[[target]]` or `[[target][description]]`; targets containing a
    /// newline fall through to literal text.
    fn parse_regular_link(
        &mut self,
        input: &str,
        start: usize,
        pos: Pos,
        ni: usize,
    ) -> (usize, Option<Node>) {
        let rest = &input[start..];
        if rest.len() < 3 || !rest.starts_with("[[") || rest.as_bytes()[2] == b'[' {
            return (0, None);
        }
        let Some(end) = rest.find("]]") else {
            return (0, None);
        };
        let inner = rest[2..end].to_string();
        let consumed = end + 2;
        let (link, description) = match inner.split_once("][") {
            Some((link, desc)) => (link.to_string(), Some(desc.to_string())),
            None => (inner, None),
        };
        if link.contains('\n') {
            return (0, None);
        }
        let description_nodes = description.map(|d| self.parse_inline(&d, ni));
        let protocol = match link.split_once(':') {
            Some((p, _)) => p.to_string(),
            None => String::new(),
        };
        let rendered_description = description_nodes
            .as_ref()
            .map(|nodes| OrgWriter::new().write_nodes_str(nodes));
        let kind = classify_link(
            &self.cfg.inline,
            &protocol,
            &link,
            rendered_description.as_deref(),
        );
        (
            consumed,
            Some(Node::RegularLink(RegularLink {
                pos,
                end: Pos::new(pos.row, pos.col + consumed),
                protocol,
                description: description_nodes,
                url: link,
                auto_link: false,
                kind,
            })),
        )
    }

    /// Bare `protocol://path` runs, scanning backward from the `://` to the
    /// start of the letter run.
    fn parse_auto_link(
        &mut self,
        input: &str,
        start: usize,
        pos: Pos,
    ) -> (usize, usize, Option<Node>) {
        if !self.cfg.auto_link
            || start == 0
            || input.len() < start + 3
            || &input[start..start + 3] != "://"
        {
            return (0, 0, None);
        }
        let bytes = input.as_bytes();
        let mut protocol_start = start;
        while protocol_start > 0 && bytes[protocol_start - 1].is_ascii_alphabetic() {
            protocol_start -= 1;
        }
        let protocol = &input[protocol_start..start];
        if !self.cfg.inline.autolink_protocol.is_match(protocol) {
            return (0, 0, None);
        }
        let mut end = start;
        while end < bytes.len() && VALID_URL_CHARS.contains(bytes[end] as char) {
            end += 1;
        }
        let path = &input[start..end];
        if path == "://" {
            return (0, 0, None);
        }
        let url = format!("{protocol}{path}");
        let link_pos = Pos::new(pos.row, pos.col.saturating_sub(protocol.len()));
        let kind = classify_link(&self.cfg.inline, protocol, &url, None);
        (
            protocol.len(),
            protocol.len() + path.len(),
            Some(Node::RegularLink(RegularLink {
                pos: link_pos,
                end: Pos::new(link_pos.row, link_pos.col + url.len()),
                protocol: protocol.to_string(),
                description: None,
                url,
                auto_link: true,
                kind,
            })),
        )
    }

    /// `[fn:name]`, `[fn:name:inline definition]`; a reference with neither
    /// name nor definition is rejected.
    fn parse_footnote_reference(
        &mut self,
        input: &str,
        start: usize,
        pos: Pos,
        ni: usize,
    ) -> (usize, Option<Node>) {
        let Some((full_len, name, definition)) =
            self.cfg.inline.footnote.captures(&input[start..]).map(|m| {
                (
                    m.get(0).unwrap().len(),
                    m.get(1).map_or("", |g| g.as_str()).to_string(),
                    m.get(3).map_or("", |g| g.as_str()).to_string(),
                )
            })
        else {
            return (0, None);
        };
        if name.is_empty() && definition.is_empty() {
            return (0, None);
        }
        let def = if definition.is_empty() {
            None
        } else {
            let children = self.parse_inline(&definition, ni);
            Some(Box::new(FootnoteDefinition {
                pos,
                name: name.clone(),
                children: vec![Node::Paragraph(Paragraph {
                    pos,
                    children,
                })],
                inline: true,
            }))
        };
        (
            full_len,
            Some(Node::FootnoteLink(FootnoteLink {
                pos,
                end: Pos::new(pos.row, pos.col + full_len),
                name,
                definition: def,
            })),
        )
    }

    fn parse_statistic_token(
        &mut self,
        input: &str,
        start: usize,
        pos: Pos,
    ) -> (usize, Option<Node>) {
        let Some(content) = self
            .cfg
            .inline
            .statistics
            .captures(&input[start..])
            .map(|m| m.get(1).unwrap().as_str().to_string())
        else {
            return (0, None);
        };
        let full_len = content.len() + 2;
        (
            full_len,
            Some(Node::StatisticToken(StatisticToken {
                pos,
                end: Pos::new(pos.row, pos.col + full_len),
                content,
            })),
        )
    }

    fn parse_macro(&mut self, input: &str, start: usize, pos: Pos) -> (usize, Option<Node>) {
        let Some((full_len, name, params)) =
            self.cfg.inline.macro_call.captures(&input[start..]).map(|m| {
                (
                    m.get(0).unwrap().len(),
                    m.get(1).map_or("", |g| g.as_str()).to_string(),
                    m.get(2).map_or("", |g| g.as_str()).to_string(),
                )
            })
        else {
            return (0, None);
        };
        (
            full_len,
            Some(Node::Macro(Macro {
                pos,
                end: Pos::new(pos.row, pos.col + full_len),
                name,
                parameters: params.split(',').map(str::to_string).collect(),
            })),
        )
    }

    fn parse_timestamp(&mut self, input: &str, start: usize, pos: Pos) -> (usize, Option<Node>) {
        let Some((date, _, len)) = self.cfg.dates.parse_timestamp(&input[start..]) else {
            return (0, None);
        };
        let timestamp = Timestamp {
            pos,
            end: Pos::new(pos.row, pos.col + len),
            date,
        };
        self.attach_timestamp(&timestamp);
        (len, Some(Node::Timestamp(timestamp)))
    }

    fn parse_explicit_line_break_or_latex_fragment(
        &mut self,
        input: &str,
        start: usize,
        pos: Pos,
        ni: usize,
    ) -> (usize, Option<Node>) {
        let bytes = input.as_bytes();
        if start + 2 >= bytes.len() {
            return (0, None);
        }
        if bytes[start + 1] == b'\\' && start != 0 && bytes[start - 1] != b'\n' {
            let mut i = start + 2;
            while i < bytes.len() && (bytes[i] as char).is_whitespace() {
                if bytes[i] == b'\n' {
                    return (
                        i + 1 - start,
                        Some(Node::ExplicitLineBreak(ExplicitLineBreak { pos })),
                    );
                }
                i += 1;
            }
            return (0, None);
        }
        if bytes[start + 1] == b'(' || bytes[start + 1] == b'[' {
            return self.parse_latex_fragment(input, start, pos, 2, ni);
        }
        if input[start..].starts_with(r"\begin{") {
            if let Some(m) = self.cfg.inline.latex_env.captures(&input[start..]) {
                let open = m.get(1).unwrap().as_str();
                let close = m.get(3).unwrap().as_str();
                if open == close {
                    let opening_pair = format!(r"\begin{{{open}}}");
                    let closing_pair = format!(r"\end{{{close}}}");
                    let rest = &input[start..];
                    let idx = rest.find(&closing_pair).expect("regex matched the pair");
                    let content = rest[opening_pair.len()..idx].to_string();
                    let consumed = idx + closing_pair.len();
                    let children = self.parse_raw_inline(&content, ni);
                    return (
                        consumed,
                        Some(Node::LatexFragment(LatexFragment {
                            pos,
                            end: compute_text_end(pos, &rest[..consumed]),
                            opening_pair,
                            closing_pair,
                            content: children,
                        })),
                    );
                }
            }
        }
        (0, None)
    }

    fn parse_latex_fragment(
        &mut self,
        input: &str,
        start: usize,
        pos: Pos,
        pair_length: usize,
        ni: usize,
    ) -> (usize, Option<Node>) {
        if start + 2 >= input.len() {
            return (0, None);
        }
        let mut pair_length = pair_length;
        if pair_length == 1 && input[start..].starts_with("$$") {
            pair_length = 2;
        }
        let opening_pair = input[start..start + pair_length].to_string();
        let closing_pair = match opening_pair.as_str() {
            r"\(" => r"\)",
            r"\[" => r"\]",
            "$$" => "$$",
            _ => "$",
        }
        .to_string();
        let Some(i) = input[start + pair_length..].find(&closing_pair) else {
            return (0, None);
        };
        let content = input[start + pair_length..start + pair_length + i].to_string();
        let children = self.parse_raw_inline(&content, ni);
        let consumed = i + pair_length + pair_length;
        (
            consumed,
            Some(Node::LatexFragment(LatexFragment {
                pos,
                end: compute_text_end(pos, &input[start..start + consumed]),
                opening_pair,
                closing_pair,
                content: children,
            })),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Configuration;
    use crate::org_writer::OrgWriter;

    fn inline(source: &str) -> Vec<Node> {
        let cfg = Configuration::default().silent();
        let doc = cfg.parse_str(&format!("{source}\n"), "test.org");
        match doc.nodes.into_iter().next() {
            Some(Node::Paragraph(p)) => p.children,
            other => panic!("expected a paragraph, got {other:?}"),
        }
    }

    fn kinds(nodes: &[Node]) -> Vec<&'static str> {
        nodes.iter().map(Node::kind_name).collect()
    }

    #[test]
    fn bold_at_line_start_matches() {
        let nodes = inline("*bold*");
        assert_eq!(kinds(&nodes), vec!["emphasis"]);
        let Node::Emphasis(e) = &nodes[0] else { panic!() };
        assert_eq!(e.kind, "*");
        assert_eq!(kinds(&e.content), vec!["text"]);
    }

    #[test]
    fn emphasis_without_border_whitespace_is_literal() {
        let nodes = inline("a*b*c");
        assert_eq!(kinds(&nodes), vec!["text"]);
    }

    #[test]
    fn unclosed_marker_is_literal() {
        let nodes = inline("*a");
        assert_eq!(kinds(&nodes), vec!["text"]);
    }

    #[test]
    fn emphasis_respects_newline_limit() {
        let cfg = Configuration::default().silent();
        // One embedded newline is within the default limit.
        let doc = cfg.parse_str("*a\nb* tail\n", "t.org");
        let Some(Node::Paragraph(p)) = doc.nodes.first() else { panic!() };
        assert!(matches!(p.children[0], Node::Emphasis(_)));
        // Two newlines exceed it... but two blank-separated lines are no
        // longer one paragraph anyway, so feed the text directly.
        let doc = cfg.parse_str("*a\nb\nc* tail\n", "t.org");
        let Some(Node::Paragraph(p)) = doc.nodes.first() else { panic!() };
        assert!(matches!(p.children[0], Node::Text(_)));
    }

    #[test]
    fn verbatim_content_is_not_reparsed() {
        let nodes = inline("~code *here*~");
        let Node::Emphasis(e) = &nodes[0] else { panic!() };
        assert_eq!(e.kind, "~");
        assert!(e
            .content
            .iter()
            .all(|n| matches!(n, Node::Text(Text { raw: true, .. }))));
    }

    #[test]
    fn subscript_and_superscript() {
        let nodes = inline("x_{down} y^{up}");
        let emphases: Vec<_> = nodes
            .iter()
            .filter_map(|n| match n {
                Node::Emphasis(e) => Some(e.kind.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(emphases, vec!["_{}", "^{}"]);
    }

    #[test]
    fn regular_link_with_description() {
        let nodes = inline("see [[https://example.com][the site]] now");
        let link = nodes
            .iter()
            .find_map(|n| match n {
                Node::RegularLink(l) => Some(l),
                _ => None,
            })
            .expect("a link");
        assert_eq!(link.url, "https://example.com");
        assert_eq!(link.protocol, "https");
        assert!(!link.auto_link);
        let desc = OrgWriter::new().write_nodes_str(link.description.as_ref().unwrap());
        assert_eq!(desc, "the site");
    }

    #[test]
    fn image_links_are_classified() {
        let nodes = inline("[[file:cat.png]]");
        let Node::RegularLink(l) = &nodes[0] else { panic!() };
        assert_eq!(l.kind, LinkKind::Image);
        let nodes = inline("[[https://example.com/clip.mp4]]");
        let Node::RegularLink(l) = &nodes[0] else { panic!() };
        assert_eq!(l.kind, LinkKind::Video);
    }

    #[test]
    fn link_target_with_newline_is_literal() {
        let cfg = Configuration::default().silent();
        let doc = cfg.parse_str("[[https://exam\nple.com]]\n", "t.org");
        let Some(Node::Paragraph(p)) = doc.nodes.first() else { panic!() };
        // No bracket link is produced; only the bare protocol run may still
        // auto-link.
        assert!(!p
            .children
            .iter()
            .any(|n| matches!(n, Node::RegularLink(l) if !l.auto_link)));
    }

    #[test]
    fn auto_link_detection() {
        let nodes = inline("go to https://example.com/x?q=1 please");
        let link = nodes
            .iter()
            .find_map(|n| match n {
                Node::RegularLink(l) => Some(l),
                _ => None,
            })
            .expect("an auto link");
        assert!(link.auto_link);
        assert_eq!(link.url, "https://example.com/x?q=1");
    }

    #[test]
    fn auto_link_respects_configuration() {
        let mut cfg = Configuration::default().silent();
        cfg.auto_link = false;
        let doc = cfg.parse_str("https://example.com\n", "t.org");
        let Some(Node::Paragraph(p)) = doc.nodes.first() else { panic!() };
        assert!(!p.children.iter().any(|n| matches!(n, Node::RegularLink(_))));
    }

    #[test]
    fn footnote_reference_forms() {
        let nodes = inline("a[fn:1] b[fn:note:with a definition] c[fn:]");
        let links: Vec<_> = nodes
            .iter()
            .filter_map(|n| match n {
                Node::FootnoteLink(l) => Some(l),
                _ => None,
            })
            .collect();
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].name, "1");
        assert!(links[0].definition.is_none());
        assert_eq!(links[1].name, "note");
        assert!(links[1].definition.is_some());
    }

    #[test]
    fn statistic_tokens() {
        let nodes = inline("[2/7] and [33%]");
        let tokens: Vec<_> = nodes
            .iter()
            .filter_map(|n| match n {
                Node::StatisticToken(t) => Some(t.content.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(tokens, vec!["2/7", "33%"]);
    }

    #[test]
    fn macros_parse_name_and_parameters() {
        let nodes = inline("{{{greet(world,loudly)}}}");
        let Node::Macro(m) = &nodes[0] else { panic!() };
        assert_eq!(m.name, "greet");
        assert_eq!(m.parameters, vec!["world", "loudly"]);
    }

    #[test]
    fn inline_timestamps() {
        let nodes = inline("meet at <2004-12-25 Sat 10:00>");
        let ts = nodes
            .iter()
            .find_map(|n| match n {
                Node::Timestamp(t) => Some(t),
                _ => None,
            })
            .expect("a timestamp");
        assert_eq!(ts.date.to_full_string(), "<2004-12-25 Sat 10:00>");
    }

    #[test]
    fn latex_fragments() {
        let nodes = inline(r"inline $x+y$ and \(a\) forms");
        let fragments: Vec<_> = nodes
            .iter()
            .filter_map(|n| match n {
                Node::LatexFragment(f) => Some(f.opening_pair.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(fragments, vec!["$", r"\("]);
    }

    #[test]
    fn latex_environment() {
        let nodes = inline(r"\begin{align}x &= y\end{align}");
        let Node::LatexFragment(f) = &nodes[0] else { panic!() };
        assert_eq!(f.opening_pair, r"\begin{align}");
        assert_eq!(f.closing_pair, r"\end{align}");
    }

    #[test]
    fn explicit_line_break() {
        let cfg = Configuration::default().silent();
        let doc = cfg.parse_str("first \\\\\nsecond\n", "t.org");
        let Some(Node::Paragraph(p)) = doc.nodes.first() else { panic!() };
        assert!(p
            .children
            .iter()
            .any(|n| matches!(n, Node::ExplicitLineBreak(_))));
    }

    #[test]
    fn inline_source_block() {
        let nodes = inline("run src_sh[:exports code]{echo hi} now");
        let block = nodes
            .iter()
            .find_map(|n| match n {
                Node::InlineBlock(b) => Some(b),
                _ => None,
            })
            .expect("an inline block");
        assert_eq!(block.name, "src");
        assert_eq!(block.parameters[0], "sh");
    }

    #[test]
    fn inline_export_block() {
        let nodes = inline("@@html:<b>raw</b>@@");
        let Node::InlineBlock(b) = &nodes[0] else { panic!() };
        assert_eq!(b.name, "export");
        assert_eq!(b.parameters, vec!["html"]);
    }

    #[test]
    fn pending_text_flushes_around_constructs() {
        let nodes = inline("pre *mid* post");
        assert_eq!(kinds(&nodes), vec!["text", "emphasis", "text"]);
        let Node::Text(t) = &nodes[0] else { panic!() };
        assert_eq!(t.content, "pre ");
        let Node::Text(t) = &nodes[2] else { panic!() };
        assert_eq!(t.content, " post");
    }
}

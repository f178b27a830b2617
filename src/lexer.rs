use crate::date::DateMatchers;
use regex::Regex;
use serde::Serialize;

/// A half-open (row, column) coordinate into the original input. Rows are
/// input lines, columns are byte offsets within the line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Pos {
    pub row: usize,
    pub col: usize,
}

impl Pos {
    pub fn new(row: usize, col: usize) -> Self {
        Pos { row, col }
    }

    /// Lexicographic ordering helper for the position invariants.
    pub fn at_or_after(&self, other: Pos) -> bool {
        self.row > other.row || (self.row == other.row && self.col >= other.col)
    }
}

/// End position of a text span starting at `pos`. Multi-line content advances
/// the row per embedded newline; the column is then relative to the last
/// line, otherwise it extends the starting column.
pub fn compute_text_end(pos: Pos, content: &str) -> Pos {
    let trimmed = content.trim_end_matches('\n');
    match trimmed.rsplit_once('\n') {
        Some((head, last)) => Pos {
            row: pos.row + head.matches('\n').count() + 1,
            col: last.len(),
        },
        None => Pos {
            row: pos.row,
            col: pos.col + trimmed.len(),
        },
    }
}

/// The classification a line receives from the lexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TokenKind {
    Headline,
    BeginBlock,
    EndBlock,
    Result,
    BeginDrawer,
    EndDrawer,
    UnorderedList,
    OrderedList,
    TableRow,
    TableSeparator,
    HorizontalRule,
    Keyword,
    Comment,
    FootnoteDefinition,
    Example,
    Scheduled,
    Deadline,
    Closed,
    Text,
}

/// One classified input line: kind, indent level, the content the matching
/// recognizer extracted, the raw capture groups (index 0 is the whole line)
/// and the source range.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Token {
    pub kind: TokenKind,
    pub lvl: usize,
    pub content: String,
    pub matches: Vec<String>,
    pub pos: Pos,
    pub end_pos: Pos,
}

fn captures_to_vec(re: &Regex, line: &str) -> Option<Vec<String>> {
    let caps = re.captures(line)?;
    Some(
        (0..caps.len())
            .map(|i| caps.get(i).map_or(String::new(), |m| m.as_str().to_string()))
            .collect(),
    )
}

/// The compiled line recognizers, tried in a fixed priority order. The final
/// plain-text pattern matches every line, so classification is total; not
/// matching anything is an internal bug and fails fast.
#[derive(Debug, Clone)]
pub struct LinePatterns {
    headline: Regex,
    begin_drawer: Regex,
    end_drawer: Regex,
    pub(crate) property: Regex,
    begin_block: Regex,
    end_block: Regex,
    result: Regex,
    unordered_list: Regex,
    ordered_list: Regex,
    table_separator: Regex,
    table_row: Regex,
    horizontal_rule: Regex,
    keyword: Regex,
    comment: Regex,
    footnote_definition: Regex,
    example: Regex,
    text: Regex,
    scheduled: crate::date::DateParser,
    deadline: crate::date::DateParser,
    closed: crate::date::DateParser,
    // Patterns the block parser applies to already-lexed tokens.
    pub(crate) tag: Regex,
    pub(crate) progress_suffix: Regex,
    pub(crate) descriptive_sep: Regex,
    pub(crate) list_value: Regex,
    pub(crate) list_status: Regex,
    pub(crate) example_escape: Regex,
    pub(crate) include_file: Regex,
    pub(crate) attribute: Regex,
}

fn pattern(source: &str) -> Regex {
    Regex::new(source).expect("line pattern must compile")
}

impl LinePatterns {
    pub fn new(dates: &DateMatchers) -> Self {
        LinePatterns {
            headline: pattern(r"^(\*+)\s+(.*)"),
            begin_drawer: pattern(r"^(\s*):(\S+):\s*$"),
            end_drawer: pattern(r"(?i)^(\s*):END:\s*$"),
            property: pattern(r"^(\s*):(\S+):(\s+(.*)$|$)"),
            begin_block: pattern(r"(?i)^(\s*)#\+BEGIN_(\w+)(.*)"),
            end_block: pattern(r"(?i)^(\s*)#\+END_(\w+)"),
            result: pattern(r"(?i)^(\s*)#\+RESULTS:"),
            unordered_list: pattern(r"^(\s*)([+*-])(\s+(.*)|$)"),
            ordered_list: pattern(r"^(\s*)(([0-9]+|[a-zA-Z])[.)])(\s+(.*)|$)"),
            table_separator: pattern(r"^(\s*)(\|[+|-]+)\s*$"),
            table_row: pattern(r"^(\s*)(\|.*)"),
            horizontal_rule: pattern(r"^(\s*)-{5,}\s*$"),
            keyword: pattern(r"^(\s*)#\+([a-zA-Z][^:]*):(\s*(.*)|$)"),
            comment: pattern(r"^(\s*)#\s(.*)"),
            footnote_definition: pattern(r"^\[fn:([\w-]+)\](\s+(.+)|\s*$)"),
            example: pattern(r"^(\s*):(\s(.*)|\s*$)"),
            text: pattern(r"^(\s*)(.*)"),
            scheduled: dates.scheduled.clone(),
            deadline: dates.deadline.clone(),
            closed: dates.closed.clone(),
            tag: pattern(r"(.*?)\s+(:[A-Za-z0-9_@#%:]+:\s*$)"),
            progress_suffix: pattern(r"\s*\[(\d+/\d+|\d+%)\]\s*$"),
            descriptive_sep: pattern(r"\s::(\s|$)"),
            list_value: pattern(r"^\[@(\d+)\]\s"),
            list_status: pattern(r"^\[( |X|-)\]\s"),
            example_escape: pattern(r"(^|\n)([ \t]*),([ \t]*)(\*|,\*|#\+|,#\+)"),
            include_file: pattern(r#"(?i)^"([^"]+)" (src|example|export) (\w+)$"#),
            attribute: pattern(r"(?:^|\s+)(:[-\w]+)\s+(.*)$"),
        }
    }

    /// Classifies one raw line into exactly one token. Recognizers run in a
    /// fixed priority order; the first match wins.
    pub fn tokenize(&self, line: &str, row: usize) -> Token {
        self.lex_headline(line, row)
            .or_else(|| self.lex_drawer(line, row))
            .or_else(|| self.lex_block(line, row))
            .or_else(|| self.lex_result(line, row))
            .or_else(|| self.lex_list(line, row))
            .or_else(|| self.lex_table(line, row))
            .or_else(|| self.lex_horizontal_rule(line, row))
            .or_else(|| self.lex_keyword_or_comment(line, row))
            .or_else(|| self.lex_footnote_definition(line, row))
            .or_else(|| self.lex_example(line, row))
            .or_else(|| self.lex_scheduling(line, row, TokenKind::Scheduled))
            .or_else(|| self.lex_scheduling(line, row, TokenKind::Deadline))
            .or_else(|| self.lex_scheduling(line, row, TokenKind::Closed))
            .or_else(|| self.lex_text(line, row))
            .unwrap_or_else(|| unreachable!("could not lex line: {line}"))
    }

    /// Re-lexes a line through the plain-text catch-all, used when a
    /// structural parse fails and the driver demotes the token.
    pub fn as_text(&self, line: &str, row: usize) -> Token {
        self.lex_text(line, row)
            .expect("the plain text pattern matches every line")
    }

    fn lex_headline(&self, line: &str, row: usize) -> Option<Token> {
        let m = captures_to_vec(&self.headline, line)?;
        Some(Token {
            kind: TokenKind::Headline,
            lvl: 0,
            content: m[2].clone(),
            end_pos: Pos::new(row, m[0].len()),
            pos: Pos::new(row, 0),
            matches: m,
        })
    }

    fn lex_drawer(&self, line: &str, row: usize) -> Option<Token> {
        if let Some(m) = captures_to_vec(&self.end_drawer, line) {
            let indent = m[1].len();
            return Some(Token {
                kind: TokenKind::EndDrawer,
                lvl: indent,
                content: String::new(),
                end_pos: Pos::new(row, m[0].len()),
                pos: Pos::new(row, indent),
                matches: m,
            });
        }
        let m = captures_to_vec(&self.begin_drawer, line)?;
        let indent = m[1].len();
        Some(Token {
            kind: TokenKind::BeginDrawer,
            lvl: indent,
            content: m[2].to_uppercase(),
            end_pos: Pos::new(row, m[0].len()),
            pos: Pos::new(row, indent),
            matches: m,
        })
    }

    fn lex_block(&self, line: &str, row: usize) -> Option<Token> {
        if let Some(m) = captures_to_vec(&self.begin_block, line) {
            let indent = m[1].len();
            return Some(Token {
                kind: TokenKind::BeginBlock,
                lvl: indent,
                content: m[2].to_uppercase(),
                end_pos: Pos::new(row, m[0].len()),
                pos: Pos::new(row, indent),
                matches: m,
            });
        }
        let m = captures_to_vec(&self.end_block, line)?;
        let indent = m[1].len();
        Some(Token {
            kind: TokenKind::EndBlock,
            lvl: indent,
            content: m[2].to_uppercase(),
            end_pos: Pos::new(row, m[0].len()),
            pos: Pos::new(row, indent),
            matches: m,
        })
    }

    fn lex_result(&self, line: &str, row: usize) -> Option<Token> {
        let m = captures_to_vec(&self.result, line)?;
        let indent = m[1].len();
        Some(Token {
            kind: TokenKind::Result,
            lvl: indent,
            content: String::new(),
            end_pos: Pos::new(row, m[0].len()),
            pos: Pos::new(row, indent),
            matches: m,
        })
    }

    fn lex_list(&self, line: &str, row: usize) -> Option<Token> {
        if let Some(m) = captures_to_vec(&self.unordered_list, line) {
            let indent = m[1].len();
            return Some(Token {
                kind: TokenKind::UnorderedList,
                lvl: indent,
                content: m[4].clone(),
                end_pos: Pos::new(row, m[0].len()),
                pos: Pos::new(row, indent),
                matches: m,
            });
        }
        let m = captures_to_vec(&self.ordered_list, line)?;
        let indent = m[1].len();
        Some(Token {
            kind: TokenKind::OrderedList,
            lvl: indent,
            content: m[5].clone(),
            end_pos: Pos::new(row, m[0].len()),
            pos: Pos::new(row, indent),
            matches: m,
        })
    }

    fn lex_table(&self, line: &str, row: usize) -> Option<Token> {
        if let Some(m) = captures_to_vec(&self.table_separator, line) {
            let indent = m[1].len();
            return Some(Token {
                kind: TokenKind::TableSeparator,
                lvl: indent,
                content: m[2].clone(),
                end_pos: Pos::new(row, m[0].len()),
                pos: Pos::new(row, indent),
                matches: m,
            });
        }
        let m = captures_to_vec(&self.table_row, line)?;
        let indent = m[1].len();
        Some(Token {
            kind: TokenKind::TableRow,
            lvl: indent,
            content: m[2].clone(),
            end_pos: Pos::new(row, m[0].len()),
            pos: Pos::new(row, indent),
            matches: m,
        })
    }

    fn lex_horizontal_rule(&self, line: &str, row: usize) -> Option<Token> {
        let m = captures_to_vec(&self.horizontal_rule, line)?;
        let indent = m[1].len();
        Some(Token {
            kind: TokenKind::HorizontalRule,
            lvl: indent,
            content: String::new(),
            end_pos: Pos::new(row, m[0].len()),
            pos: Pos::new(row, indent),
            matches: m,
        })
    }

    fn lex_keyword_or_comment(&self, line: &str, row: usize) -> Option<Token> {
        if let Some(m) = captures_to_vec(&self.keyword, line) {
            let indent = m[1].len();
            return Some(Token {
                kind: TokenKind::Keyword,
                lvl: indent,
                content: m[0].clone(),
                end_pos: Pos::new(row, m[0].len()),
                pos: Pos::new(row, indent),
                matches: m,
            });
        }
        let m = captures_to_vec(&self.comment, line)?;
        let indent = m[1].len();
        Some(Token {
            kind: TokenKind::Comment,
            lvl: indent,
            content: m[2].clone(),
            end_pos: Pos::new(row, m[0].len()),
            pos: Pos::new(row, indent),
            matches: m,
        })
    }

    fn lex_footnote_definition(&self, line: &str, row: usize) -> Option<Token> {
        let m = captures_to_vec(&self.footnote_definition, line)?;
        Some(Token {
            kind: TokenKind::FootnoteDefinition,
            lvl: 0,
            content: m[1].clone(),
            end_pos: Pos::new(row, m[0].len()),
            pos: Pos::new(row, 0),
            matches: m,
        })
    }

    fn lex_example(&self, line: &str, row: usize) -> Option<Token> {
        let m = captures_to_vec(&self.example, line)?;
        let indent = m[1].len();
        Some(Token {
            kind: TokenKind::Example,
            lvl: indent,
            content: m[3].clone(),
            end_pos: Pos::new(row, m[0].len()),
            pos: Pos::new(row, indent),
            matches: m,
        })
    }

    fn lex_scheduling(&self, line: &str, row: usize, kind: TokenKind) -> Option<Token> {
        let parser = match kind {
            TokenKind::Scheduled => &self.scheduled,
            TokenKind::Deadline => &self.deadline,
            _ => &self.closed,
        };
        if !parser.is_match(line) {
            return None;
        }
        Some(Token {
            kind,
            lvl: parser.leading_len(line),
            content: line.to_string(),
            matches: vec![line.to_string()],
            pos: Pos::new(row, 0),
            end_pos: Pos::new(row, line.len()),
        })
    }

    fn lex_text(&self, line: &str, row: usize) -> Option<Token> {
        let m = captures_to_vec(&self.text, line)?;
        let indent = m[1].len();
        Some(Token {
            kind: TokenKind::Text,
            lvl: indent,
            content: m[2].clone(),
            end_pos: Pos::new(row, m[0].len()),
            pos: Pos::new(row, 0),
            matches: m,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patterns() -> LinePatterns {
        LinePatterns::new(&DateMatchers::new())
    }

    fn kind_of(line: &str) -> TokenKind {
        patterns().tokenize(line, 0).kind
    }

    #[test]
    fn classifies_each_line_form() {
        assert_eq!(kind_of("* Headline"), TokenKind::Headline);
        assert_eq!(kind_of("*** TODO Deep"), TokenKind::Headline);
        assert_eq!(kind_of(":PROPERTIES:"), TokenKind::BeginDrawer);
        assert_eq!(kind_of("  :END:"), TokenKind::EndDrawer);
        assert_eq!(kind_of("#+BEGIN_SRC rust"), TokenKind::BeginBlock);
        assert_eq!(kind_of("#+end_src"), TokenKind::EndBlock);
        assert_eq!(kind_of("#+RESULTS:"), TokenKind::Result);
        assert_eq!(kind_of("- item"), TokenKind::UnorderedList);
        assert_eq!(kind_of("  3) item"), TokenKind::OrderedList);
        assert_eq!(kind_of("| a | b |"), TokenKind::TableRow);
        assert_eq!(kind_of("|---+---|"), TokenKind::TableSeparator);
        assert_eq!(kind_of("-----"), TokenKind::HorizontalRule);
        assert_eq!(kind_of("#+TITLE: Hello"), TokenKind::Keyword);
        assert_eq!(kind_of("# just a comment"), TokenKind::Comment);
        assert_eq!(kind_of("[fn:1] definition"), TokenKind::FootnoteDefinition);
        assert_eq!(kind_of(": example line"), TokenKind::Example);
        assert_eq!(
            kind_of("SCHEDULED: <2004-12-25 Sat>"),
            TokenKind::Scheduled
        );
        assert_eq!(kind_of("DEADLINE: <2004-12-25 Sat>"), TokenKind::Deadline);
        assert_eq!(
            kind_of("CLOSED: [2004-12-25 Sat 10:00]"),
            TokenKind::Closed
        );
        assert_eq!(kind_of("plain text"), TokenKind::Text);
        assert_eq!(kind_of(""), TokenKind::Text);
    }

    #[test]
    fn every_line_produces_exactly_one_token() {
        let p = patterns();
        let awkward = [
            "", " ", "*", "does not start anything special", "::",
            ":not-a-drawer: trailing", "|", "#+", "\t- indented tab bullet",
            "[fn:] empty name", "<2004-12-25 Sat>",
        ];
        for (row, line) in awkward.iter().enumerate() {
            let token = p.tokenize(line, row);
            assert_eq!(token.pos.row, row);
            assert!(token.end_pos.at_or_after(token.pos), "line {line:?}");
        }
    }

    #[test]
    fn a_starred_line_is_a_headline_not_a_list() {
        // At column zero a star opens a headline; indented it is a bullet.
        assert_eq!(kind_of("* item?"), TokenKind::Headline);
        assert_eq!(kind_of("  * item"), TokenKind::UnorderedList);
    }

    #[test]
    fn indent_level_is_captured() {
        let token = patterns().tokenize("   - padded", 0);
        assert_eq!(token.lvl, 3);
        assert_eq!(token.content, "padded");
        assert_eq!(token.pos.col, 3);
    }

    #[test]
    fn headline_token_keeps_star_run_in_captures() {
        let token = patterns().tokenize("** TODO Write tests", 4);
        assert_eq!(token.matches[1], "**");
        assert_eq!(token.content, "TODO Write tests");
    }

    #[test]
    fn compute_text_end_spans() {
        let start = Pos::new(2, 4);
        assert_eq!(compute_text_end(start, "abc"), Pos::new(2, 7));
        assert_eq!(compute_text_end(start, "ab\ncdef"), Pos::new(3, 4));
        assert_eq!(compute_text_end(start, "ab\ncd\n"), Pos::new(3, 2));
    }
}

use crate::ast::{Block, Include, LineBreak, Node, Outline, Text};
use crate::date::DateMatchers;
use crate::error::OrgError;
use crate::inline::InlinePatterns;
use crate::lexer::{compute_text_end, LinePatterns, Pos};
use crate::parser::Parser;
use crate::table::TablePatterns;
use crate::writer::{write_nodes, Writer};
use serde::Serialize;
use std::collections::HashMap;
use std::io::BufRead;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub type ReadFileFn = dyn Fn(&Path) -> std::io::Result<Vec<u8>> + Send + Sync;

/// Parser configuration: tunables, default buffer settings, the file-read
/// callback used by `#+INCLUDE`/`#+SETUPFILE`, and the explicitly
/// constructed pattern sets (no ambient singletons).
#[derive(Clone)]
pub struct Configuration {
    /// Maximum number of newlines inside an emphasis span.
    pub max_emphasis_newlines: usize,
    /// Convert bare `protocol://` runs into links.
    pub auto_link: bool,
    /// Fallbacks for settings not set by the document's own keywords.
    pub default_settings: HashMap<String, String>,
    pub read_file: Arc<ReadFileFn>,
    pub(crate) silent: bool,
    pub(crate) patterns: Arc<LinePatterns>,
    pub(crate) inline: Arc<InlinePatterns>,
    pub(crate) dates: Arc<DateMatchers>,
    pub(crate) table_patterns: Arc<TablePatterns>,
}

impl Default for Configuration {
    fn default() -> Self {
        let dates = DateMatchers::new();
        let default_settings = HashMap::from([
            ("TODO".to_string(), "TODO | DONE".to_string()),
            ("EXCLUDE_TAGS".to_string(), "noexport".to_string()),
            (
                "OPTIONS".to_string(),
                "toc:t <:t e:t f:t pri:t todo:t tags:t title:t ealb:nil".to_string(),
            ),
        ]);
        Configuration {
            max_emphasis_newlines: 1,
            auto_link: true,
            default_settings,
            read_file: Arc::new(|path: &Path| std::fs::read(path)),
            silent: false,
            patterns: Arc::new(LinePatterns::new(&dates)),
            inline: Arc::new(InlinePatterns::new()),
            dates: Arc::new(dates),
            table_patterns: Arc::new(TablePatterns::new()),
        }
    }
}

impl Configuration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Disables warning output during parsing.
    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }

    pub(crate) fn warn(&self, message: String) {
        if !self.silent {
            log::warn!("{message}");
        }
    }

    /// Parses the input into an AST plus outline. Errors are stored on the
    /// returned document rather than returned, so calls chain; writers check
    /// `Document::error` before producing output.
    pub fn parse<R: BufRead>(&self, input: R, path: impl AsRef<Path>) -> Document {
        let path = path.as_ref();
        let mut doc = Document {
            path: path.to_path_buf(),
            nodes: Vec::new(),
            outline: Outline::new(),
            buffer_settings: HashMap::new(),
            macros: HashMap::new(),
            links: HashMap::new(),
            named_nodes: HashMap::new(),
            error: None,
            parsed: false,
            config: self.clone(),
        };
        let mut lines = Vec::new();
        for line in input.lines() {
            match line {
                Ok(line) => lines.push(line),
                Err(err) => {
                    doc.error = Some(OrgError::Scan {
                        message: err.to_string(),
                    });
                    return doc;
                }
            }
        }
        // Any internal panic is converted into a document-level error; the
        // parser itself never fails on malformed input.
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            Parser::new(self, path, &lines).run()
        }));
        match outcome {
            Ok(output) => {
                doc.nodes = output.nodes;
                doc.outline = output.outline;
                doc.buffer_settings = output.buffer_settings;
                doc.macros = output.macros;
                doc.links = output.links;
                doc.named_nodes = output.named_nodes;
                doc.parsed = true;
            }
            Err(payload) => {
                doc.error = Some(OrgError::Parse {
                    message: OrgError::panic_message(payload),
                });
            }
        }
        doc
    }

    pub fn parse_str(&self, input: &str, path: impl AsRef<Path>) -> Document {
        self.parse(input.as_bytes(), path)
    }
}

/// The parsing result: the node tree, the outline, buffer settings and the
/// registries populated by keyword side effects. Owns its node tree
/// exclusively; writers receive read-only traversal access.
#[derive(Serialize)]
pub struct Document {
    pub path: PathBuf,
    pub nodes: Vec<Node>,
    pub outline: Outline,
    pub buffer_settings: HashMap<String, String>,
    pub macros: HashMap<String, String>,
    pub links: HashMap<String, String>,
    pub named_nodes: HashMap<String, Node>,
    #[serde(skip)]
    pub error: Option<OrgError>,
    #[serde(skip)]
    pub(crate) parsed: bool,
    #[serde(skip)]
    pub(crate) config: Configuration,
}

impl Document {
    pub fn config(&self) -> &Configuration {
        &self.config
    }

    /// Value for `key` from the buffer settings, falling back to the
    /// configured defaults.
    pub fn get(&self, key: &str) -> String {
        self.buffer_settings
            .get(key)
            .or_else(|| self.config.default_settings.get(key))
            .cloned()
            .unwrap_or_default()
    }

    /// Value of one export option from the `OPTIONS` setting, e.g.
    /// `get_option("toc")` for `toc:t`. Missing values degrade to `"nil"`
    /// with a warning.
    pub fn get_option(&self, key: &str) -> String {
        let lookup = |settings: &HashMap<String, String>| {
            settings.get("OPTIONS").and_then(|options| {
                options
                    .split_whitespace()
                    .find_map(|field| field.strip_prefix(&format!("{key}:")))
                    .map(str::to_string)
            })
        };
        let value = lookup(&self.buffer_settings)
            .or_else(|| lookup(&self.config.default_settings))
            .unwrap_or_default();
        if value.is_empty() {
            self.config
                .warn(format!("missing value for export option {key}"));
            return "nil".to_string();
        }
        value
    }

    /// Exports the document through a writer, checking the stored error
    /// first. A panic inside a writer is converted into a write error rather
    /// than unwinding into the caller.
    pub fn write<W: Writer>(&self, writer: &mut W) -> Result<String, OrgError> {
        if let Some(err) = &self.error {
            return Err(err.clone());
        }
        if !self.parsed {
            return Err(OrgError::WriteBeforeParse);
        }
        catch_unwind(AssertUnwindSafe(|| {
            writer.before(self);
            write_nodes(writer, self, &self.nodes);
            writer.after(self);
            writer.output()
        }))
        .map_err(|payload| OrgError::Write {
            message: OrgError::panic_message(payload),
        })
    }

    /// Serializes the node tree as pretty-printed JSON.
    ///
    /// # Errors
    /// Returns a `serde_json::Error` if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.nodes)
    }

    /// Serializes the node tree as YAML.
    ///
    /// # Errors
    /// Returns a `serde_yaml::Error` if serialization fails.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(&self.nodes)
    }

    /// Resolves an `#+INCLUDE` at render time through the configured
    /// file-read callback. Failures degrade to the raw keyword.
    pub fn resolve_include(&self, include: &Include) -> Node {
        let Some(path) = &include.path else {
            self.config
                .warn(format!("bad include {:?}", include.keyword.value));
            return Node::Keyword(include.keyword.clone());
        };
        match (self.config.read_file)(path) {
            Ok(bytes) => {
                let content = String::from_utf8_lossy(&bytes);
                Node::Block(Block {
                    pos: include.pos,
                    end: include.end,
                    name: include.block_kind.clone(),
                    parameters: vec![include.lang.clone()],
                    children: raw_text_nodes(&content, include.pos),
                    result: None,
                    keywords: include.keywords.clone(),
                })
            }
            Err(err) => {
                self.config
                    .warn(format!("bad include {:?}: {err}", include.keyword.value));
                Node::Keyword(include.keyword.clone())
            }
        }
    }
}

/// Splits file content into raw text and line-break nodes, the same shape the
/// raw inline parser produces for verbatim block interiors.
fn raw_text_nodes(content: &str, pos: Pos) -> Vec<Node> {
    let mut nodes = Vec::new();
    let mut row = pos.row;
    let mut first = true;
    for line in content.lines() {
        if !first {
            nodes.push(Node::LineBreak(LineBreak {
                pos: Pos::new(row, 0),
                count: 1,
                between_multibyte: false,
            }));
        }
        let p = if first { pos } else { Pos::new(row, 0) };
        nodes.push(Node::Text(Text {
            pos: p,
            end: compute_text_end(p, line),
            content: line.to_string(),
            raw: true,
        }));
        row += 1;
        first = false;
    }
    nodes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::org_writer::OrgWriter;

    #[test]
    fn empty_input_parses_to_empty_document() {
        let doc = Configuration::default().silent().parse_str("", "empty.org");
        assert!(doc.error.is_none());
        assert!(doc.nodes.is_empty());
        assert!(doc.outline.is_empty());
    }

    #[test]
    fn scan_errors_attach_to_the_document() {
        struct FailingReader;
        impl std::io::Read for FailingReader {
            fn read(&mut self, _: &mut [u8]) -> std::io::Result<usize> {
                Err(std::io::Error::other("stream broke"))
            }
        }
        let reader = std::io::BufReader::new(FailingReader);
        let doc = Configuration::default().silent().parse(reader, "broken.org");
        assert!(matches!(doc.error, Some(OrgError::Scan { .. })));
        let err = doc.write(&mut OrgWriter::new()).unwrap_err();
        assert!(matches!(err, OrgError::Scan { .. }));
    }

    #[test]
    fn to_json_carries_variant_tags() {
        let doc = Configuration::default()
            .silent()
            .parse_str("* hello\n", "t.org");
        let json = doc.to_json().unwrap();
        assert!(json.contains("\"Headline\""));
    }

    #[test]
    fn get_option_reads_the_options_string() {
        let doc = Configuration::default()
            .silent()
            .parse_str("#+OPTIONS: toc:2 f:nil\n", "t.org");
        assert_eq!(doc.get_option("toc"), "2");
        assert_eq!(doc.get_option("f"), "nil");
        // Unset keys fall through to the defaults.
        assert_eq!(doc.get_option("todo"), "t");
    }
}

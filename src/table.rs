use crate::ast::{Keyword, Node, Table, Text};
use crate::lexer::{compute_text_end, Pos};
use regex::Regex;
use serde::Serialize;

/// Column alignment, either from a `<l|c|r>` directive row or inferred from
/// majority-numeric content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Align {
    Left,
    Center,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ColumnInfo {
    pub align: Option<Align>,
    /// Widest rendered cell in the column, in characters.
    pub len: usize,
    /// Explicit `<r10>` display width, 0 when unset.
    pub display_len: usize,
}

/// Compiled patterns of the table sub-language, constructed explicitly and
/// carried by the configuration.
#[derive(Debug, Clone)]
pub struct TablePatterns {
    pub(crate) align_directive: Regex,
    target: Regex,
}

impl TablePatterns {
    pub fn new() -> Self {
        TablePatterns {
            align_directive: Regex::new(r"^<(l|c|r)?(\d+)?>$")
                .expect("align pattern must compile"),
            target: Regex::new(
                r"^\s*(?:@(?P<rowonly>[+-]?[0-9><]+|[IVXLCDMivxlcdm]+)\s*$|\$(?P<colonly>[+-]?[0-9><]+)\s*$|@(?P<row>[+-]?[0-9><]+|[IVXLCDMivxlcdm]+)\$(?P<col>[+-]?[0-9><]+)\s*$)",
            )
            .expect("target pattern must compile"),
        }
    }
}

impl Default for TablePatterns {
    fn default() -> Self {
        Self::new()
    }
}

/// True for alignment directive rows: every non-empty cell is a `<...>`
/// directive.
pub fn is_special_row(patterns: &TablePatterns, cells: &[String]) -> bool {
    cells
        .iter()
        .all(|c| c.is_empty() || patterns.align_directive.is_match(c))
}

/// Computes per-column alignment and width metadata across all data rows.
/// Directive rows win; otherwise majority-numeric columns right-align.
pub fn compute_column_infos(
    patterns: &TablePatterns,
    rows: &[Option<Vec<String>>],
) -> Vec<ColumnInfo> {
    let column_count = rows
        .iter()
        .flatten()
        .map(|cells| cells.len())
        .max()
        .unwrap_or(0);
    let mut infos = vec![ColumnInfo::default(); column_count];
    for (i, info) in infos.iter_mut().enumerate() {
        let mut numeric = 0usize;
        let mut non_numeric = 0usize;
        for cells in rows.iter().flatten() {
            let Some(cell) = cells.get(i) else { continue };
            info.len = info.len.max(cell.chars().count());
            if let Some(m) = patterns
                .align_directive
                .captures(cell)
                .filter(|_| is_special_row(patterns, cells))
            {
                info.align = match m.get(1).map(|a| a.as_str()) {
                    Some("l") => Some(Align::Left),
                    Some("c") => Some(Align::Center),
                    Some("r") => Some(Align::Right),
                    _ => info.align,
                };
                if let Some(l) = m.get(2) {
                    info.display_len = l.as_str().parse().unwrap_or(0);
                }
            } else if cell.parse::<f64>().is_ok() {
                numeric += 1;
            } else if !cell.trim().is_empty() {
                non_numeric += 1;
            }
        }
        if info.align.is_none() && numeric > 0 && numeric >= non_numeric {
            info.align = Some(Align::Right);
        }
    }
    infos
}

/// A single cell reference. `-1` in `row`/`col` is the whole-column /
/// whole-row sentinel; with a relative flag set the component is a signed
/// offset from the table cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RowColRef {
    pub row: i32,
    pub col: i32,
    pub rel_row: bool,
    pub rel_col: bool,
}

impl RowColRef {
    pub fn cell(row: i32, col: i32) -> Self {
        RowColRef {
            row,
            col,
            rel_row: false,
            rel_col: false,
        }
    }

    /// `@N` with no column part addresses the entire row.
    pub fn is_entire_row(&self) -> bool {
        self.col == -1
    }

    /// `$N` with no row part addresses the entire column.
    pub fn is_entire_col(&self) -> bool {
        self.row == -1
    }
}

impl Default for RowColRef {
    fn default() -> Self {
        RowColRef::cell(1, 1)
    }
}

fn clamp_to_min_max(v: i32, max: i32) -> i32 {
    if v <= 0 {
        1
    } else if v > max && max > 0 {
        max
    } else {
        v
    }
}

fn roman_to_int(input: &str) -> Option<i32> {
    const NUMERALS: [(i32, &str); 13] = [
        (1000, "M"),
        (900, "CM"),
        (500, "D"),
        (400, "CD"),
        (100, "C"),
        (90, "XC"),
        (50, "L"),
        (40, "XL"),
        (10, "X"),
        (9, "IX"),
        (5, "V"),
        (4, "IV"),
        (1, "I"),
    ];
    let mut rest = input.to_uppercase();
    let mut output = 0;
    for (val, sym) in NUMERALS {
        while let Some(stripped) = rest.strip_prefix(sym) {
            output += val;
            rest = stripped.to_string();
        }
    }
    if rest.is_empty() && output > 0 {
        Some(output)
    } else {
        None
    }
}

/// Resolves one row component: `<`/`>` runs count from the start/end of the
/// data rows, roman numerals index the separator rows, signed integers are
/// cursor-relative. Returns (value, relative).
fn parse_row_component(v: &str, table: Option<&Table>) -> (i32, bool) {
    let v = v.trim();
    if v.is_empty() {
        return (1, false);
    }
    let first = v.chars().next().unwrap();
    if first == '<' {
        let n = v.len() as i32;
        return (table.map_or(n, |t| t.clamp_row(n)), false);
    }
    if first == '>' {
        let n = v.len() as i32;
        if let Some(t) = table {
            let data_rows = t.height() as i32 - t.separator_indices.len() as i32;
            return (t.clamp_row(data_rows - (n - 1)), false);
        }
        return (1, false);
    }
    if matches!(
        first,
        'I' | 'V' | 'X' | 'L' | 'C' | 'D' | 'M' | 'i' | 'v' | 'x' | 'l' | 'c' | 'd' | 'm'
    ) {
        if let Some(r) = roman_to_int(v) {
            if let Some(t) = table {
                if r >= 1 && (r as usize) <= t.separator_indices.len() {
                    return (t.clamp_row(t.separator_indices[(r - 1) as usize] as i32), false);
                }
            }
            return (r, false);
        }
    }
    if let Ok(n) = v.parse::<i32>() {
        let relative = v.starts_with('+') || v.starts_with('-');
        return (n, relative);
    }
    (1, false)
}

fn parse_col_component(v: &str, table: Option<&Table>) -> (i32, bool) {
    let v = v.trim();
    if v.is_empty() {
        return (1, false);
    }
    let first = v.chars().next().unwrap();
    if first == '<' {
        let n = v.len() as i32;
        return (table.map_or(n, |t| t.clamp_col(n)), false);
    }
    if first == '>' {
        let n = v.len() as i32;
        if let Some(t) = table {
            return (t.clamp_col(t.width() as i32 - (n - 1)), false);
        }
        return (1, false);
    }
    if let Ok(n) = v.parse::<i32>() {
        let relative = v.starts_with('+') || v.starts_with('-');
        return (n, relative);
    }
    (1, false)
}

/// A parsed formula target: the raw reference text plus its resolved
/// start/end cell references (equal for single-cell targets).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormulaTarget {
    pub raw: String,
    pub start: RowColRef,
    pub end: RowColRef,
}

impl FormulaTarget {
    /// Parses a target like `@3$3`, `@2`, `$5`, `III`, `@-1$+2` or a range
    /// `A..B`. Returns `None` when neither side is a valid reference.
    pub fn parse(raw: &str, table: Option<&Table>) -> Option<FormulaTarget> {
        let patterns = TablePatterns::new();
        Self::parse_with(&patterns, raw, table)
    }

    pub fn parse_with(
        patterns: &TablePatterns,
        raw: &str,
        table: Option<&Table>,
    ) -> Option<FormulaTarget> {
        let (start, end) = match raw.split_once("..") {
            Some((a, b)) => (
                parse_single_ref(patterns, a, table)?,
                parse_single_ref(patterns, b, table)?,
            ),
            None => {
                let start = parse_single_ref(patterns, raw, table)?;
                (start, start)
            }
        };
        Some(FormulaTarget {
            raw: raw.to_string(),
            start,
            end,
        })
    }

    /// Row range: same column (or an entire-column reference) with rows
    /// varying.
    pub fn is_row_range(&self) -> bool {
        self.start.is_entire_col()
            || (self.start.row != self.end.row && self.start.col == self.end.col)
    }

    /// Column range: same row (or an entire-row reference) with columns
    /// varying.
    pub fn is_col_range(&self) -> bool {
        self.start.is_entire_row()
            || (self.start.row == self.end.row && self.start.col != self.end.col)
    }

    /// Lazily enumerates the referenced cells against a concrete table.
    /// Reconstructing the iterator restarts the walk.
    pub fn iter_cells(&self, table: &Table) -> CellRefIter {
        let max_rows = table.height() as i32;
        let max_cols = table.width() as i32;
        let start = table.resolve_ref(&self.start);
        let end = table.resolve_ref(&self.end);

        let (r0, r1, c0, c1) = if self.is_col_range() {
            let row = clamp_to_min_max(start.row, max_rows);
            let c0 = clamp_to_min_max(start.col, max_cols);
            let c1 = if self.start.is_entire_row() {
                if c0 <= max_cols { max_cols } else { 1 }
            } else {
                clamp_to_min_max(end.col, max_cols)
            };
            (row, row, c0, c1)
        } else if self.is_row_range() {
            let col = clamp_to_min_max(end.col.max(start.col), max_cols);
            let r0 = clamp_to_min_max(start.row, max_rows);
            let r1 = if self.start.is_entire_col() {
                if r0 <= max_rows { max_rows } else { 1 }
            } else {
                clamp_to_min_max(end.row, max_rows)
            };
            (r0, r1, col, col)
        } else {
            (
                clamp_to_min_max(start.row, max_rows),
                clamp_to_min_max(end.row, max_rows),
                clamp_to_min_max(start.col, max_cols),
                clamp_to_min_max(end.col, max_cols),
            )
        };
        CellRefIter::new(r0, r1, c0, c1, max_rows > 0 && max_cols > 0)
    }
}

fn parse_single_ref(
    patterns: &TablePatterns,
    raw: &str,
    table: Option<&Table>,
) -> Option<RowColRef> {
    let caps = patterns.target.captures(raw)?;
    let mut reference = RowColRef::cell(-1, -1);
    if let Some(row) = caps.name("rowonly") {
        let (row, rel) = parse_row_component(row.as_str(), table);
        reference.row = row;
        reference.rel_row = rel;
    } else if let Some(col) = caps.name("colonly") {
        let (col, rel) = parse_col_component(col.as_str(), table);
        reference.col = col;
        reference.rel_col = rel;
    } else {
        let (row, rel_row) = parse_row_component(caps.name("row")?.as_str(), table);
        let (col, rel_col) = parse_col_component(caps.name("col")?.as_str(), table);
        reference = RowColRef {
            row,
            col,
            rel_row,
            rel_col,
        };
    }
    Some(reference)
}

/// Lazy walk over a cell range: rows vary fastest within a column, each
/// dimension ascending or descending according to the range direction. Yields
/// one reference per call and terminates with `None`.
#[derive(Debug, Clone)]
pub struct CellRefIter {
    r0: i32,
    r1: i32,
    c1: i32,
    row_step: i32,
    col_step: i32,
    cur_row: i32,
    cur_col: i32,
    done: bool,
}

impl CellRefIter {
    fn new(r0: i32, r1: i32, c0: i32, c1: i32, non_empty: bool) -> Self {
        CellRefIter {
            r0,
            r1,
            c1,
            row_step: if r0 <= r1 { 1 } else { -1 },
            col_step: if c0 <= c1 { 1 } else { -1 },
            cur_row: r0,
            cur_col: c0,
            done: !non_empty,
        }
    }
}

impl Iterator for CellRefIter {
    type Item = RowColRef;

    fn next(&mut self) -> Option<RowColRef> {
        if self.done {
            return None;
        }
        let item = RowColRef::cell(self.cur_row, self.cur_col);
        if self.cur_row == self.r1 {
            if self.cur_col == self.c1 {
                self.done = true;
            } else {
                self.cur_col += self.col_step;
                self.cur_row = self.r0;
            }
        } else {
            self.cur_row += self.row_step;
        }
        Some(item)
    }
}

/// One formula from a `#+TBLFM:` keyword: `target=expression[;format]`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Formula {
    pub raw: String,
    /// Index of the owning keyword in `Formulas::keywords`.
    pub keyword_index: usize,
    /// Position among the `::`-separated formulas of that keyword.
    pub sub_index: usize,
    pub target: Option<FormulaTarget>,
    pub expr: String,
    pub format: String,
    pub valid: bool,
}

impl Formula {
    fn parse(
        patterns: &TablePatterns,
        raw: &str,
        keyword_index: usize,
        sub_index: usize,
        table: Option<&Table>,
    ) -> Formula {
        let mut formula = Formula {
            raw: raw.to_string(),
            keyword_index,
            sub_index,
            target: None,
            expr: String::new(),
            format: String::new(),
            valid: false,
        };
        if let Some((target, expr)) = raw.split_once('=') {
            formula.target = FormulaTarget::parse_with(patterns, target.trim(), table);
            formula.valid = formula.target.is_some();
            match expr.rsplit_once(';') {
                Some((e, fmt)) => {
                    formula.expr = e.to_string();
                    formula.format = fmt.to_string();
                }
                None => formula.expr = expr.to_string(),
            }
        }
        formula
    }
}

/// The formula set attached to a table: the `#+TBLFM:` keywords in document
/// order plus their parsed formulas.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct Formulas {
    pub keywords: Vec<Keyword>,
    pub formulas: Vec<Formula>,
}

impl Formulas {
    /// Parses every `::`-separated formula of every keyword against the
    /// table the set is attached to.
    pub fn process(patterns: &TablePatterns, keywords: Vec<Keyword>, table: &Table) -> Formulas {
        let mut formulas = Vec::new();
        for (ki, keyword) in keywords.iter().enumerate() {
            for (si, part) in keyword.value.split("::").enumerate() {
                let part = part.trim();
                if !part.is_empty() {
                    formulas.push(Formula::parse(patterns, part, ki, si, Some(table)));
                }
            }
        }
        Formulas { keywords, formulas }
    }
}

impl Table {
    pub fn height(&self) -> usize {
        self.rows.len()
    }

    pub fn width(&self) -> usize {
        self.column_infos.len()
    }

    pub fn clamp_row(&self, r: i32) -> i32 {
        clamp_to_min_max(r, self.height() as i32)
    }

    pub fn clamp_col(&self, c: i32) -> i32 {
        clamp_to_min_max(c, self.width() as i32)
    }

    pub fn is_separator_row(&self, row: usize) -> bool {
        self.separator_indices.contains(&row)
    }

    pub fn set_cursor(&mut self, row: i32, col: i32) {
        self.cur = RowColRef::cell(row, col);
    }

    /// Resolves cursor-relative components and whole-row/column sentinels
    /// are passed through untouched.
    pub fn resolve_ref(&self, r: &RowColRef) -> RowColRef {
        let mut out = *r;
        if r.rel_row {
            out.row = clamp_to_min_max(self.cur.row + r.row, self.height() as i32);
            out.rel_row = false;
        }
        if r.rel_col {
            out.col = clamp_to_min_max(self.cur.col + r.col, self.width() as i32);
            out.rel_col = false;
        }
        out
    }

    /// Maps a 1-based logical (data) row and column to physical indices,
    /// accounting for separator rows.
    pub fn real_row_col(&self, row: i32, col: i32) -> Option<(usize, usize)> {
        let mut separators = 0i32;
        for i in 0..self.rows.len() {
            if self.is_separator_row(i) {
                separators += 1;
            }
            if (i as i32 + 1) == row + separators {
                if col >= 1 {
                    return Some((i, (col - 1) as usize));
                }
                return None;
            }
        }
        None
    }

    /// The formula-evaluator mutation point: overwrites one cell's content.
    pub fn set_val(&mut self, row: i32, col: i32, val: &str) {
        let Some((r, c)) = self.real_row_col(row, col) else {
            return;
        };
        if let Some(column) = self.rows[r].columns.get_mut(c) {
            let end = compute_text_end(column.pos, val);
            column.children = vec![Node::Text(Text {
                pos: column.pos,
                end,
                content: val.to_string(),
                raw: false,
            })];
        }
    }

    pub fn set_val_ref(&mut self, r: &RowColRef, val: &str) {
        let resolved = self.resolve_ref(r);
        self.set_val(resolved.row, resolved.col, val);
    }

    pub fn get_val(&self, row: i32, col: i32) -> String {
        let Some((r, c)) = self.real_row_col(row, col) else {
            return String::new();
        };
        self.rows[r]
            .columns
            .get(c)
            .map(|column| crate::org_writer::OrgWriter::new().write_nodes_str(&column.children))
            .unwrap_or_default()
    }

    pub fn get_val_ref(&self, r: &RowColRef) -> String {
        let resolved = self.resolve_ref(r);
        self.get_val(resolved.row, resolved.col)
    }

    /// Re-derives column widths after cell mutation so the pretty printer
    /// pads correctly.
    pub fn recompute_column_infos(&mut self) {
        let mut writer = crate::org_writer::OrgWriter::new();
        for row in &self.rows {
            for (c, column) in row.columns.iter().enumerate() {
                let rendered = writer.write_nodes_str(&column.children);
                if let Some(info) = self.column_infos.get_mut(c) {
                    info.len = info.len.max(rendered.chars().count());
                }
            }
        }
    }
}

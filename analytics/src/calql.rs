//! Parser for the declarative query language
//!
//! A query is a sequence of clauses (`LET`, `SELECT`, `WHERE`,
//! `GROUP BY`, `ORDER BY`, `AGGREGATE`, `FORMAT`) in any order;
//! keywords are case-insensitive. Function names are validated
//! against the signatures advertised by the aggregator, the
//! preprocessor, and the formatters. Errors carry the source offset.

use crate::aggregator;
use crate::format;
use crate::preprocessor;
use crate::query_spec::{
    AggregationOp, AttributeSelection, CondOp, Condition, FormatSpec, FunctionSignature,
    PreprocessSpec, QuerySpec, SortOrder, SortSpec, find_signature,
};
use vernier_context::{Error, Result};

const BREAK_CHARS: &str = ",;=<>()\n";

struct Scanner {
    chars: Vec<char>,
    pos: usize,
}

impl Scanner {
    fn new(input: &str) -> Self {
        Self {
            chars: input.chars().collect(),
            pos: 0,
        }
    }

    fn skip_ws(&mut self) {
        while self
            .chars
            .get(self.pos)
            .map(|c| c.is_whitespace())
            .unwrap_or(false)
        {
            self.pos += 1;
        }
    }

    fn peek_char(&mut self) -> Option<char> {
        self.skip_ws();
        self.chars.get(self.pos).copied()
    }

    fn read_char(&mut self) -> Option<char> {
        let c = self.peek_char();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    /// Reads a word up to whitespace or punctuation; double-quoted
    /// strings with backslash escapes read as one word.
    fn read_word(&mut self) -> String {
        self.skip_ws();
        let mut out = String::new();
        if self.chars.get(self.pos) == Some(&'"') {
            self.pos += 1;
            while let Some(&c) = self.chars.get(self.pos) {
                self.pos += 1;
                match c {
                    '\\' => {
                        if let Some(&next) = self.chars.get(self.pos) {
                            out.push(next);
                            self.pos += 1;
                        }
                    }
                    '"' => break,
                    _ => out.push(c),
                }
            }
            return out;
        }
        while let Some(&c) = self.chars.get(self.pos) {
            if c.is_whitespace() || BREAK_CHARS.contains(c) {
                break;
            }
            out.push(c);
            self.pos += 1;
        }
        out
    }
}

/// Parse a query expression into a `QuerySpec`.
pub fn parse_query(input: &str) -> Result<QuerySpec> {
    Parser {
        scan: Scanner::new(input),
        spec: QuerySpec::default(),
    }
    .parse()
}

struct Parser {
    scan: Scanner,
    spec: QuerySpec,
}

impl Parser {
    fn error<T>(&self, msg: impl Into<String>) -> Result<T> {
        Err(Error::Parse {
            pos: self.scan.pos,
            msg: msg.into(),
        })
    }

    fn parse(mut self) -> Result<QuerySpec> {
        let mut pending: Option<String> = None;
        loop {
            let word = match pending.take() {
                Some(w) => w,
                None => self.scan.read_word(),
            };
            if word.is_empty() {
                break;
            }
            pending = self.parse_clause_from_word(&word)?;
        }
        if let Some(c) = self.scan.peek_char() {
            return self.error(format!("expected clause keyword, got \"{c}\""));
        }
        Ok(self.spec)
    }

    /// Dispatch on a clause keyword. Clause parsers that read one
    /// word too far hand it back for the next round.
    fn parse_clause_from_word(&mut self, word: &str) -> Result<Option<String>> {
        if word.eq_ignore_ascii_case("select") {
            self.parse_select()
        } else if word.eq_ignore_ascii_case("where") {
            self.parse_where().map(|()| None)
        } else if word.eq_ignore_ascii_case("aggregate") {
            self.parse_aggregate().map(|()| None)
        } else if word.eq_ignore_ascii_case("format") {
            self.parse_format().map(|()| None)
        } else if word.eq_ignore_ascii_case("let") {
            self.parse_let()
        } else if word.eq_ignore_ascii_case("group") {
            self.expect_by("GROUP BY")?;
            self.parse_groupby().map(|()| None)
        } else if word.eq_ignore_ascii_case("order") {
            self.expect_by("ORDER BY")?;
            self.parse_sort()
        } else {
            self.error(format!("expected clause keyword, got \"{word}\""))
        }
    }

    fn expect_by(&mut self, clause: &str) -> Result<()> {
        let by = self.scan.read_word();
        if by.eq_ignore_ascii_case("by") {
            Ok(())
        } else {
            self.error(format!("expected clause keyword, did you mean \"{clause}\"?"))
        }
    }

    /// Parse a `(arg1, arg2, ...)` list; absent parentheses yield an
    /// empty list.
    fn parse_arglist(&mut self) -> Result<Vec<String>> {
        if self.scan.peek_char() != Some('(') {
            return Ok(vec![]);
        }
        self.scan.read_char();
        let mut args = vec![];
        loop {
            let arg = self.scan.read_word();
            match self.scan.read_char() {
                Some(c @ (',' | ')')) => {
                    if !arg.is_empty() {
                        args.push(arg);
                    }
                    if c == ')' {
                        return Ok(args);
                    }
                }
                _ => return self.error("expected ')'"),
            }
        }
    }

    fn parse_call(&mut self, name: &str, defs: &[FunctionSignature]) -> Result<AggregationOp> {
        let Some(sig) = find_signature(defs, name) else {
            return self.error(format!("unknown function \"{name}\""));
        };
        let sig = *sig;
        let args = self.parse_arglist()?;
        if args.len() < sig.min_args || args.len() > sig.max_args {
            return self.error(format!("invalid number of arguments for {}", sig.name));
        }
        Ok(AggregationOp {
            op: sig.name.to_string(),
            args,
        })
    }

    fn select_list(&mut self) -> &mut Vec<String> {
        if !matches!(self.spec.select, AttributeSelection::List(_)) {
            self.spec.select = AttributeSelection::List(vec![]);
        }
        match &mut self.spec.select {
            AttributeSelection::List(list) => list,
            _ => unreachable!(),
        }
    }

    fn parse_select(&mut self) -> Result<Option<String>> {
        loop {
            let selection_name;
            if self.scan.peek_char() == Some('*') {
                self.scan.read_char();
                self.spec.select = AttributeSelection::All;
                selection_name = String::new();
            } else {
                let word = self.scan.read_word();
                if word.is_empty() {
                    return self.error("expected argument for SELECT");
                }
                if self.scan.peek_char() == Some('(') {
                    let op = self.parse_call(&word, aggregator::aggregation_defs())?;
                    let names = aggregator::output_attribute_names(&op);
                    selection_name = aggregator::output_attribute_name(&op);
                    if !matches!(self.spec.select, AttributeSelection::All) {
                        for name in names {
                            self.select_list().push(name);
                        }
                    }
                    self.spec.aggregation_ops.push(op);
                } else {
                    selection_name = word.clone();
                    self.select_list().push(word);
                }
            }

            // optional AS alias and UNIT unit
            let mut next = self.scan.read_word();
            if next.eq_ignore_ascii_case("as") {
                let alias = self.scan.read_word();
                if alias.is_empty() {
                    return self.error("expected alias at SELECT ... AS");
                }
                self.spec.aliases.insert(selection_name.clone(), alias);
                next = self.scan.read_word();
            }
            if next.eq_ignore_ascii_case("unit") {
                let unit = self.scan.read_word();
                if unit.is_empty() {
                    return self.error("expected unit at SELECT ... UNIT");
                }
                self.spec.units.insert(selection_name.clone(), unit);
                next = self.scan.read_word();
            }
            if !next.is_empty() {
                return Ok(Some(next));
            }
            if self.scan.peek_char() == Some(',') {
                self.scan.read_char();
                continue;
            }
            return Ok(None);
        }
    }

    fn parse_aggregate(&mut self) -> Result<()> {
        loop {
            let word = self.scan.read_word();
            if word.is_empty() {
                return self.error("expected aggregation function");
            }
            let op = self.parse_call(&word, aggregator::aggregation_defs())?;
            self.spec.aggregation_ops.push(op);
            if self.scan.peek_char() == Some(',') {
                self.scan.read_char();
            } else {
                return Ok(());
            }
        }
    }

    fn parse_groupby(&mut self) -> Result<()> {
        loop {
            let word = self.scan.read_word();
            if !word.is_empty() {
                self.spec
                    .aggregation_key
                    .get_or_insert_with(Vec::new)
                    .push(word);
            }
            if self.scan.peek_char() == Some(',') {
                self.scan.read_char();
            } else {
                return Ok(());
            }
        }
    }

    fn parse_sort(&mut self) -> Result<Option<String>> {
        loop {
            let attribute = self.scan.read_word();
            if attribute.is_empty() {
                return self.error("expected sort attribute");
            }
            let next = self.scan.read_word();
            let order = if next.eq_ignore_ascii_case("asc") {
                SortOrder::Ascending
            } else if next.eq_ignore_ascii_case("desc") {
                SortOrder::Descending
            } else {
                self.spec.sort.push(SortSpec {
                    attribute,
                    order: SortOrder::Ascending,
                });
                if !next.is_empty() {
                    return Ok(Some(next));
                }
                if self.scan.peek_char() == Some(',') {
                    self.scan.read_char();
                    continue;
                }
                return Ok(None);
            };
            self.spec.sort.push(SortSpec { attribute, order });
            if self.scan.peek_char() == Some(',') {
                self.scan.read_char();
            } else {
                return Ok(None);
            }
        }
    }

    fn parse_filter_clause(&mut self) -> Result<Condition> {
        let mut word = self.scan.read_word();
        let negate = word.eq_ignore_ascii_case("not");
        if negate {
            word = self.scan.read_word();
        }
        if word.is_empty() {
            return self.error("expected condition term");
        }

        let (op, needs_value) = match self.scan.peek_char() {
            Some('=') => {
                self.scan.read_char();
                (
                    if negate {
                        CondOp::NotEqual
                    } else {
                        CondOp::Equal
                    },
                    true,
                )
            }
            Some('<') => {
                self.scan.read_char();
                let or_equal = self.scan.peek_char() == Some('=');
                if or_equal {
                    self.scan.read_char();
                }
                (
                    match (negate, or_equal) {
                        (false, false) => CondOp::LessThan,
                        (false, true) => CondOp::LessOrEqual,
                        (true, false) => CondOp::GreaterOrEqual,
                        (true, true) => CondOp::GreaterThan,
                    },
                    true,
                )
            }
            Some('>') => {
                self.scan.read_char();
                let or_equal = self.scan.peek_char() == Some('=');
                if or_equal {
                    self.scan.read_char();
                }
                (
                    match (negate, or_equal) {
                        (false, false) => CondOp::GreaterThan,
                        (false, true) => CondOp::GreaterOrEqual,
                        (true, false) => CondOp::LessOrEqual,
                        (true, true) => CondOp::LessThan,
                    },
                    true,
                )
            }
            _ => (
                if negate {
                    CondOp::NotExist
                } else {
                    CondOp::Exist
                },
                false,
            ),
        };

        let value = if needs_value {
            let v = self.scan.read_word();
            if v.is_empty() {
                return self.error("expected comparison argument");
            }
            v
        } else {
            String::new()
        };

        Ok(Condition {
            op,
            attr_name: word,
            value,
        })
    }

    fn parse_where(&mut self) -> Result<()> {
        loop {
            let cond = self.parse_filter_clause()?;
            self.spec.filter.push(cond);
            if self.scan.peek_char() == Some(',') {
                self.scan.read_char();
            } else {
                return Ok(());
            }
        }
    }

    fn parse_format(&mut self) -> Result<()> {
        let name = self.scan.read_word().to_lowercase();
        let Some(sig) = find_signature(format::formatter_defs(), &name) else {
            return self.error(format!("unknown formatter \"{name}\""));
        };
        let sig = *sig;
        let args = self.parse_arglist()?;
        if args.len() < sig.min_args || args.len() > sig.max_args {
            return self.error(format!("invalid number of arguments for formatter {name}"));
        }
        self.spec.format = Some(FormatSpec {
            formatter: sig.name.to_string(),
            args,
        });
        Ok(())
    }

    fn parse_let(&mut self) -> Result<Option<String>> {
        loop {
            let target = self.scan.read_word();
            if target.is_empty() {
                return self.error("expected LET target");
            }
            if self.scan.read_char() != Some('=') {
                return self.error(format!("expected \"=\" after {target}"));
            }
            let opname = self.scan.read_word();
            let op = self.parse_call(&opname, preprocessor::preprocess_defs())?;
            if self.spec.let_ops.iter().any(|p| p.target == target) {
                return self.error(format!("{target} defined twice"));
            }

            let mut next = self.scan.read_word();
            let cond = if next.eq_ignore_ascii_case("if") {
                let c = self.parse_filter_clause()?;
                next = self.scan.read_word();
                Some(c)
            } else {
                None
            };
            self.spec.let_ops.push(PreprocessSpec { target, op, cond });

            if !next.is_empty() {
                return Ok(Some(next));
            }
            if self.scan.peek_char() == Some(',') {
                self.scan.read_char();
                continue;
            }
            return Ok(None);
        }
    }
}

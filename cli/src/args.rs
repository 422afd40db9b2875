//! Translation of command-line flags into a query spec
//!
//! `--query` parses a full CalQL expression first; the individual
//! flags then extend or override it. Flags that mirror a CalQL clause
//! are parsed through the same grammar.

use anyhow::{bail, Context, Result};
use vernier_analytics::calql::parse_query;
use vernier_analytics::query_spec::{
    AttributeSelection, CondOp, Condition, FormatSpec, QuerySpec,
};

use crate::Cli;

/// Parse a `[-]attr[(<>=)value]` filter flag.
fn parse_filter_flag(text: &str) -> Result<Condition> {
    let (negate, rest) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let split = rest.find(['=', '<', '>']);
    match split {
        None => {
            if rest.is_empty() {
                bail!("empty filter clause");
            }
            Ok(Condition {
                op: if negate {
                    CondOp::NotExist
                } else {
                    CondOp::Exist
                },
                attr_name: rest.to_string(),
                value: String::new(),
            })
        }
        Some(pos) => {
            let attr_name = &rest[..pos];
            let value = &rest[pos + 1..];
            if attr_name.is_empty() || value.is_empty() {
                bail!("bad filter clause \"{text}\"");
            }
            let op = match (rest.as_bytes()[pos], negate) {
                (b'=', false) => CondOp::Equal,
                (b'=', true) => CondOp::NotEqual,
                (b'<', false) => CondOp::LessThan,
                (b'<', true) => CondOp::GreaterOrEqual,
                (b'>', false) => CondOp::GreaterThan,
                (b'>', true) => CondOp::LessOrEqual,
                _ => unreachable!(),
            };
            Ok(Condition {
                op,
                attr_name: attr_name.to_string(),
                value: value.to_string(),
            })
        }
    }
}

fn merge_clause(spec: &mut QuerySpec, clause: &str) -> Result<()> {
    let parsed =
        parse_query(clause).with_context(|| format!("parsing \"{clause}\""))?;
    spec.let_ops.extend(parsed.let_ops);
    spec.aggregation_ops.extend(parsed.aggregation_ops);
    if let Some(keys) = parsed.aggregation_key {
        spec.aggregation_key.get_or_insert_with(Vec::new).extend(keys);
    }
    match parsed.select {
        AttributeSelection::Default => {}
        other => spec.select = other,
    }
    spec.filter.extend(parsed.filter);
    spec.sort.extend(parsed.sort);
    if parsed.format.is_some() {
        spec.format = parsed.format;
    }
    spec.aliases.extend(parsed.aliases);
    spec.units.extend(parsed.units);
    Ok(())
}

/// Compose the effective query spec from `--query` and the flags.
pub fn build_spec(cli: &Cli) -> Result<QuerySpec> {
    let mut spec = match &cli.query {
        Some(q) => parse_query(q).with_context(|| "parsing query")?,
        None => QuerySpec::default(),
    };

    for clause in &cli.select {
        spec.filter.push(parse_filter_flag(clause)?);
    }
    if let Some(ops) = &cli.aggregate {
        merge_clause(&mut spec, &format!("AGGREGATE {ops}"))?;
    }
    if let Some(keys) = &cli.aggregate_key {
        merge_clause(&mut spec, &format!("GROUP BY {keys}"))?;
    }
    if let Some(attrs) = &cli.attributes {
        merge_clause(&mut spec, &format!("SELECT {attrs}"))?;
    }
    if let Some(keys) = &cli.sort_by {
        merge_clause(&mut spec, &format!("ORDER BY {keys}"))?;
    }

    if let Some(template) = &cli.format {
        let mut args = vec![template.clone()];
        if let Some(title) = &cli.title {
            args.push(title.clone());
        }
        spec.format = Some(FormatSpec {
            formatter: "format".to_string(),
            args,
        });
    }
    if cli.table {
        spec.format = Some(FormatSpec {
            formatter: "table".to_string(),
            args: vec![],
        });
    }
    if cli.tree {
        let args = cli
            .path_attributes
            .as_ref()
            .map(|p| vec![p.clone()])
            .unwrap_or_default();
        spec.format = Some(FormatSpec {
            formatter: "tree".to_string(),
            args,
        });
    }
    if cli.json {
        spec.format = Some(FormatSpec {
            formatter: "json".to_string(),
            args: vec![],
        });
    }

    Ok(spec)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_flag_forms() {
        let c = parse_filter_flag("phase").unwrap();
        assert_eq!(c.op, CondOp::Exist);
        let c = parse_filter_flag("-phase").unwrap();
        assert_eq!(c.op, CondOp::NotExist);
        let c = parse_filter_flag("phase=init").unwrap();
        assert_eq!((c.op, c.value.as_str()), (CondOp::Equal, "init"));
        let c = parse_filter_flag("-n<4").unwrap();
        assert_eq!(c.op, CondOp::GreaterOrEqual);
        assert!(parse_filter_flag("n=").is_err());
    }
}

//! # Datalog Parser
//!
//! Lexes and parses Datalog source code into AST.
//! Handles rules, atoms, terms, negation, comparisons, aggregates,
//! arithmetic, function calls, and comments (% and /* */).

use datalog_ast::{Atom, BodyPredicate, Constraint, Program, Rule, Term};

/// Strip block comments (/* ... */) from source text
/// Handles nested block comments properly and respects string literals
pub fn strip_block_comments(source: &str) -> String {
    let mut result = String::with_capacity(source.len());
    let mut chars = source.chars().peekable();
    let mut depth = 0;
    let mut in_string = false;

    while let Some(c) = chars.next() {
        // Track string literals - don't strip comments inside strings
        if c == '"' && depth == 0 {
            in_string = !in_string;
            result.push(c);
        } else if in_string {
            // Inside a string, copy everything as-is
            result.push(c);
        } else if c == '/' && chars.peek() == Some(&'*') {
            chars.next(); // consume '*'
            depth += 1;
        } else if c == '*' && chars.peek() == Some(&'/') && depth > 0 {
            chars.next(); // consume '/'
            depth -= 1;
            if depth == 0 {
                result.push(' '); // Replace comment with space to preserve spacing
            }
        } else if depth == 0 {
            result.push(c);
        }
    }

    result
}

/// Parse a Datalog program (supports % and /* */ comments).
pub fn parse_program(source: &str) -> Result<Program, String> {
    let mut program = Program::new();

    // First strip block comments
    let source = strip_block_comments(source);

    // Split into lines and parse each rule
    for line in source.lines() {
        let line = line.trim();

        // Skip empty lines and line comments (% is the standard style)
        if line.is_empty() || line.starts_with('%') {
            continue;
        }

        // Strip inline % comments
        let line = if let Some(pos) = find_comment_start(line) {
            line[..pos].trim()
        } else {
            line
        };

        if line.is_empty() {
            continue;
        }

        // Parse rule
        let rule = parse_rule(line)?;
        program.add_rule(rule);
    }

    Ok(program)
}

/// Find the start position of a % comment, respecting string literals and modulo operator.
/// `%` is a modulo operator when preceded by an operand (alphanumeric, _, ), >)
/// and followed (possibly after spaces) by an operand start (digit, letter, _, (, -digit).
/// Otherwise it's a comment delimiter.
fn find_comment_start(line: &str) -> Option<usize> {
    let mut in_string = false;
    let chars: Vec<char> = line.chars().collect();
    let mut paren_depth: i32 = 0;

    for i in 0..chars.len() {
        let c = chars[i];
        if c == '"' && !in_string {
            in_string = true;
        } else if c == '"' && in_string {
            in_string = false;
        } else if !in_string {
            if c == '(' {
                paren_depth += 1;
            } else if c == ')' {
                paren_depth -= 1;
            } else if c == '%' {
                // Inside parenthesized expression, treat % as modulo
                if paren_depth > 0 {
                    continue;
                }
                // Check if this % is a modulo operator (between operands)
                let is_modulo = if i > 0 && i + 1 < chars.len() {
                    // Look at previous non-space char
                    let mut pi = i - 1;
                    while pi > 0 && chars[pi].is_whitespace() {
                        pi -= 1;
                    }
                    let prev = chars[pi];
                    // Look at next non-space char
                    let mut ni = i + 1;
                    while ni < chars.len() && chars[ni].is_whitespace() {
                        ni += 1;
                    }
                    let prev_is_operand = prev.is_alphanumeric() || prev == '_' || prev == ')';
                    let next_is_operand = ni < chars.len() && {
                        let next = chars[ni];
                        next.is_alphanumeric() || next == '_' || next == '('
                    };
                    prev_is_operand && next_is_operand
                } else {
                    false
                };

                if !is_modulo {
                    return Some(i);
                }
            }
        }
    }

    None
}

/// Parse a single rule of the form `head(args) :- body1, !body2, x < y.`
/// (a trailing `<-` separator is accepted too). Supports variable and
/// integer-constant terms and the standard comparison operators; richer
/// term kinds (arithmetic, aggregates, vectors) are produced further up
/// the pipeline by the IR builder, not by this surface parser.
pub fn parse_rule(line: &str) -> Result<Rule, String> {
    let line = line.trim().trim_end_matches('.').trim();
    let (head_part, body_part) = split_head_body(line)?;

    let head = parse_atom(head_part.trim())?;

    let mut body = Vec::new();
    let mut constraints = Vec::new();
    for clause in split_top_level(body_part.trim(), ',') {
        let clause = clause.trim();
        if clause.is_empty() {
            continue;
        }
        if let Some(constraint) = try_parse_constraint(clause) {
            constraints.push(constraint?);
            continue;
        }
        if let Some(rest) = clause.strip_prefix('!') {
            body.push(BodyPredicate::Negated(parse_atom(rest.trim())?));
        } else {
            body.push(BodyPredicate::Positive(parse_atom(clause)?));
        }
    }

    Ok(Rule::new(head, body, constraints))
}

fn split_head_body(line: &str) -> Result<(&str, &str), String> {
    if let Some(pos) = line.find(":-") {
        Ok((&line[..pos], &line[pos + 2..]))
    } else if let Some(pos) = line.find("<-") {
        Ok((&line[..pos], &line[pos + 2..]))
    } else {
        // Fact: no body.
        Ok((line, ""))
    }
}

fn parse_atom(text: &str) -> Result<Atom, String> {
    let open = text
        .find('(')
        .ok_or_else(|| format!("expected '(' in atom: {text}"))?;
    let close = text
        .rfind(')')
        .ok_or_else(|| format!("expected ')' in atom: {text}"))?;
    let relation = text[..open].trim().to_string();
    let args_text = &text[open + 1..close];

    let args = split_top_level(args_text, ',')
        .into_iter()
        .map(|a| parse_term(a.trim()))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Atom::new(relation, args))
}

fn parse_term(text: &str) -> Result<Term, String> {
    let text = text.trim();
    if text == "_" {
        return Ok(Term::Placeholder);
    }
    if let Ok(i) = text.parse::<i64>() {
        return Ok(Term::Constant(i));
    }
    if let Ok(f) = text.parse::<f64>() {
        return Ok(Term::FloatConstant(f));
    }
    if text.starts_with('"') && text.ends_with('"') && text.len() >= 2 {
        return Ok(Term::StringConstant(text[1..text.len() - 1].to_string()));
    }
    if text.starts_with('[') && text.ends_with(']') {
        let values = split_top_level(&text[1..text.len() - 1], ',')
            .into_iter()
            .map(|v| {
                v.trim()
                    .parse::<f64>()
                    .map_err(|e| format!("invalid vector element '{v}': {e}"))
            })
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(Term::VectorLiteral(values));
    }
    if !text.chars().all(|c| c.is_alphanumeric() || c == '_') || text.is_empty() {
        return Err(format!("invalid term: {text}"));
    }
    Ok(Term::Variable(text.to_string()))
}

fn try_parse_constraint(clause: &str) -> Option<Result<Constraint, String>> {
    const OPS: &[(&str, fn(Term, Term) -> Constraint)] = &[
        ("!=", Constraint::NotEqual),
        ("<=", Constraint::LessOrEqual),
        (">=", Constraint::GreaterOrEqual),
        ("<", Constraint::LessThan),
        (">", Constraint::GreaterThan),
        ("=", Constraint::Equal),
    ];
    for (op, build) in OPS {
        if let Some(pos) = clause.find(op) {
            // Don't treat ':-' leftovers or atom parens as comparisons.
            if clause.contains('(') && clause.find('(').unwrap() < pos {
                continue;
            }
            let left = &clause[..pos];
            let right = &clause[pos + op.len()..];
            return Some((|| {
                Ok(build(parse_term(left)?, parse_term(right)?))
            })());
        }
    }
    None
}

/// Split `text` on a top-level occurrence of `sep`, respecting parens and brackets.
fn split_top_level(text: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        match c {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            c if c == sep && depth == 0 => {
                parts.push(&text[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if start <= text.len() {
        parts.push(&text[start..]);
    }
    parts.into_iter().filter(|s| !s.trim().is_empty()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_rule() {
        let rule = parse_rule("path(x, y) :- edge(x, y).").unwrap();
        assert_eq!(rule.head.relation, "path");
        assert_eq!(rule.body.len(), 1);
    }

    #[test]
    fn parses_recursive_rule_with_negation() {
        let rule = parse_rule("tc(x, z) :- tc(x, y), edge(y, z), !blocked(x, z).").unwrap();
        assert_eq!(rule.body.len(), 3);
        assert!(rule.body[2].is_negated());
    }

    #[test]
    fn parses_fact() {
        let rule = parse_rule("edge(1, 2).").unwrap();
        assert!(rule.body.is_empty());
    }
}

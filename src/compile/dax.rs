//! DAX emission for resolved expression trees
//!
//! Operators map to their DAX spelling (`/` to `DIVIDE`, `%` to `MOD`, `^` to `POWER`,
//! `AND`/`OR` to `&&`/`||`). Child expressions are parenthesised only where DAX precedence
//! would otherwise regroup them.

use super::error::{CompileError, CompileResult};
use super::functions;
use crate::formula::{BinaryOp, Expr, LodKind, UnaryOp};
use crate::models::PowerBiType;

/// `'Table'` with embedded quotes doubled
pub fn quote_table(table: &str) -> String {
    format!("'{}'", table.replace('\'', "''"))
}

/// `'Table'[Column]`
pub fn column_ref(table: &str, column: &str) -> String {
    format!("{}[{}]", quote_table(table), column.replace(']', "]]"))
}

/// Naked `[Measure]`
pub fn measure_ref(name: &str) -> String {
    format!("[{}]", name.replace(']', "]]"))
}

/// Infix spelling and DAX precedence (higher binds tighter)
fn infix(op: BinaryOp) -> Option<(&'static str, u8)> {
    let spelled = match op {
        BinaryOp::Multiply => ("*", 5),
        BinaryOp::Add => ("+", 4),
        BinaryOp::Subtract => ("-", 4),
        BinaryOp::Concat => ("&", 3),
        BinaryOp::Equals => ("=", 2),
        BinaryOp::NotEquals => ("<>", 2),
        BinaryOp::Less => ("<", 2),
        BinaryOp::LessEquals => ("<=", 2),
        BinaryOp::Greater => (">", 2),
        BinaryOp::GreaterEquals => (">=", 2),
        BinaryOp::And => ("&&", 1),
        BinaryOp::Or => ("||", 0),
        BinaryOp::Divide | BinaryOp::Modulo | BinaryOp::Power => return None,
    };
    Some(spelled)
}

/// Functions whose result is always a string
const TEXT_FUNCTIONS: &[&str] = &[
    "STR", "UPPER", "LOWER", "LEFT", "RIGHT", "MID", "TRIM", "LTRIM", "RTRIM", "REPLACE",
    "DATENAME", "SPACE", "CHAR",
];

/// Whether `expr` evaluates to a string, so a Tableau `+` over it is concatenation
fn is_text(expr: &Expr) -> bool {
    match expr {
        Expr::Text(_) => true,
        Expr::Group(inner) => is_text(inner),
        Expr::Binary {
            op: BinaryOp::Concat,
            ..
        } => true,
        Expr::Binary {
            op: BinaryOp::Add,
            left,
            right,
        } => is_text(left) || is_text(right),
        Expr::Call { name, .. } => TEXT_FUNCTIONS.contains(&name.as_str()),
        Expr::If {
            branches,
            otherwise,
        } => branches.iter().any(|(_, v)| is_text(v)) || otherwise.as_deref().is_some_and(is_text),
        Expr::Case {
            arms, otherwise, ..
        } => arms.iter().any(|(_, v)| is_text(v)) || otherwise.as_deref().is_some_and(is_text),
        _ => false,
    }
}

/// Operator as emitted: `+` over a string becomes `&`
fn effective_op(op: BinaryOp, left: &Expr, right: &Expr) -> BinaryOp {
    if op == BinaryOp::Add && (is_text(left) || is_text(right)) {
        BinaryOp::Concat
    } else {
        op
    }
}

/// Precedence of an expression when emitted, `None` for anything that renders as one unit
fn precedence(expr: &Expr) -> Option<u8> {
    match expr {
        Expr::Binary { op, left, right } => infix(effective_op(*op, left, right)).map(|(_, p)| p),
        _ => None,
    }
}

/// Walks one field's resolved tree and collects review notes on the way
pub(crate) struct Emitter<'a> {
    home_table: &'a str,
    notes: Vec<String>,
}

impl<'a> Emitter<'a> {
    /// `home_table` is used when an iterator or LOD needs a table and the expression names
    /// no column
    pub fn new(home_table: &'a str) -> Self {
        Self {
            home_table,
            notes: Vec::new(),
        }
    }

    pub fn note(&mut self, note: impl Into<String>) {
        let note = note.into();
        if !self.notes.contains(&note) {
            self.notes.push(note);
        }
    }

    pub fn into_notes(self) -> Vec<String> {
        self.notes
    }

    /// Quoted table an expression iterates over
    pub fn table_for(&self, expr: &Expr) -> String {
        quote_table(expr.first_column_table().unwrap_or(self.home_table))
    }

    /// Emit a function argument or top-level expression; outer parentheses are dropped
    pub fn emit_arg(&mut self, expr: &Expr) -> CompileResult<String> {
        self.emit(expr.ungrouped())
    }

    pub fn emit(&mut self, expr: &Expr) -> CompileResult<String> {
        match expr {
            Expr::Number(n) => Ok(number(n)),
            Expr::Text(s) => Ok(text(s)),
            Expr::Boolean(true) => Ok("TRUE()".to_string()),
            Expr::Boolean(false) => Ok("FALSE()".to_string()),
            Expr::Null | Expr::Blank => Ok("BLANK()".to_string()),
            Expr::Date(d) => Ok(date_literal(d)),
            Expr::Column { table, column } => Ok(column_ref(table, column)),
            Expr::Measure(name) => Ok(measure_ref(name)),
            Expr::Parameter {
                table,
                name,
                binding,
            } => Ok(match binding {
                PowerBiType::Measure => measure_ref(name),
                PowerBiType::Column => format!("SELECTEDVALUE({})", column_ref(table, name)),
            }),
            Expr::Unresolved(name) | Expr::Reference { name, .. } => {
                self.note(format!(
                    "Unresolved reference [{}] left as written; map it manually",
                    name
                ));
                Ok(measure_ref(name))
            }
            Expr::Group(inner) => {
                let inner = inner.ungrouped();
                let body = self.emit(inner)?;
                if precedence(inner).is_some() || matches!(inner, Expr::Unary { .. }) {
                    Ok(format!("({})", body))
                } else {
                    Ok(body)
                }
            }
            Expr::Unary { op, expr } => match op {
                UnaryOp::Negate => {
                    let operand = self.emit(expr)?;
                    if precedence(expr).is_some() {
                        Ok(format!("-({})", operand))
                    } else {
                        Ok(format!("-{}", operand))
                    }
                }
                UnaryOp::Not => Ok(format!("NOT({})", self.emit_arg(expr)?)),
            },
            Expr::Binary { op, left, right } => self.emit_binary(*op, left, right),
            Expr::Call { name, args } => functions::emit_call(self, name, args),
            Expr::If {
                branches,
                otherwise,
            } => self.emit_if(branches, otherwise.as_deref()),
            Expr::Case {
                subject,
                arms,
                otherwise,
            } => {
                let mut parts = vec![self.emit_arg(subject)?];
                for (when, then) in arms {
                    parts.push(self.emit_arg(when)?);
                    parts.push(self.emit_arg(then)?);
                }
                if let Some(e) = otherwise {
                    parts.push(self.emit_arg(e)?);
                }
                Ok(format!("SWITCH({})", parts.join(", ")))
            }
            Expr::Lod {
                kind,
                dimensions,
                body,
            } => self.emit_lod(*kind, dimensions, body),
        }
    }

    fn emit_binary(&mut self, op: BinaryOp, left: &Expr, right: &Expr) -> CompileResult<String> {
        let function = match op {
            BinaryOp::Divide => Some("DIVIDE"),
            BinaryOp::Modulo => Some("MOD"),
            BinaryOp::Power => Some("POWER"),
            _ => None,
        };
        if let Some(function) = function {
            return Ok(format!(
                "{}({}, {})",
                function,
                self.emit_arg(left)?,
                self.emit_arg(right)?
            ));
        }

        let (symbol, prec) = infix(effective_op(op, left, right))
            .ok_or_else(|| CompileError::unsupported("operator"))?;
        let l = self.emit_operand(left, prec, false)?;
        let r = self.emit_operand(right, prec, true)?;
        Ok(format!("{} {} {}", l, symbol, r))
    }

    /// Emit `operand` of an infix operator with precedence `parent`, parenthesised if needed
    pub fn emit_operand(&mut self, operand: &Expr, parent: u8, right: bool) -> CompileResult<String> {
        let emitted = self.emit(operand)?;
        match precedence(operand) {
            Some(p) if p < parent || (right && p == parent) => Ok(format!("({})", emitted)),
            _ => Ok(emitted),
        }
    }

    fn emit_if(&mut self, branches: &[(Expr, Expr)], otherwise: Option<&Expr>) -> CompileResult<String> {
        let mut tail = match otherwise {
            Some(e) => Some(self.emit_arg(e)?),
            None => None,
        };
        for (cond, value) in branches.iter().rev() {
            let c = self.emit_arg(cond)?;
            let v = self.emit_arg(value)?;
            tail = Some(match tail {
                Some(rest) => format!("IF({}, {}, {})", c, v, rest),
                None => format!("IF({}, {})", c, v),
            });
        }
        tail.ok_or_else(|| CompileError::invalid("IF", "no branches"))
    }

    fn emit_lod(&mut self, kind: LodKind, dimensions: &[Expr], body: &Expr) -> CompileResult<String> {
        let body_dax = self.emit_arg(body)?;
        let mut dims = Vec::with_capacity(dimensions.len());
        for dim in dimensions {
            match dim.ungrouped() {
                Expr::Column { table, column } => dims.push((table.as_str(), column_ref(table, column))),
                Expr::Parameter {
                    table,
                    name,
                    binding: PowerBiType::Column,
                } => dims.push((table.as_str(), column_ref(table, name))),
                _ => {
                    return Err(CompileError::invalid(
                        kind.keyword(),
                        "level of detail dimensions must be columns",
                    ));
                }
            }
        }

        match kind {
            LodKind::Fixed => match dims.first() {
                None => Ok(format!(
                    "CALCULATE({}, ALL({}))",
                    body_dax,
                    self.table_for(body)
                )),
                Some((table, _)) => {
                    let columns: Vec<&str> = dims.iter().map(|(_, c)| c.as_str()).collect();
                    Ok(format!(
                        "CALCULATE({}, ALLEXCEPT({}, {}))",
                        body_dax,
                        quote_table(table),
                        columns.join(", ")
                    ))
                }
            },
            LodKind::Exclude => {
                if dims.is_empty() {
                    return Ok(body_dax);
                }
                let columns: Vec<&str> = dims.iter().map(|(_, c)| c.as_str()).collect();
                Ok(format!(
                    "CALCULATE({}, REMOVEFILTERS({}))",
                    body_dax,
                    columns.join(", ")
                ))
            }
            LodKind::Include => {
                self.note("INCLUDE expression approximated with SUMX; check the aggregation applied in visuals");
                match dims.as_slice() {
                    [] => Ok(body_dax),
                    [(_, column)] => Ok(format!("SUMX(VALUES({}), CALCULATE({}))", column, body_dax)),
                    [(table, _), ..] => {
                        let columns: Vec<&str> = dims.iter().map(|(_, c)| c.as_str()).collect();
                        Ok(format!(
                            "SUMX(SUMMARIZE({}, {}), CALCULATE({}))",
                            quote_table(table),
                            columns.join(", "),
                            body_dax
                        ))
                    }
                }
            }
        }
    }
}

fn number(literal: &str) -> String {
    if literal.starts_with('.') {
        format!("0{}", literal)
    } else {
        literal.to_string()
    }
}

fn text(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}

/// `#2024-03-01#` to `DATE(2024, 3, 1)`, with `+ TIME(h, m, s)` when a time is present
fn date_literal(literal: &str) -> String {
    let trimmed = literal.trim();
    let (date_part, time_part) = match trimmed.split_once([' ', 'T']) {
        Some((d, t)) => (d, Some(t)),
        None => (trimmed, None),
    };

    let date: Option<Vec<u32>> = date_part.split('-').map(|p| p.parse().ok()).collect();
    let time: Option<Vec<u32>> = match time_part {
        Some(t) => t.split(':').map(|p| p.parse().ok()).collect(),
        None => Some(Vec::new()),
    };

    match (date.as_deref(), time.as_deref()) {
        (Some([y, m, d]), Some([])) => format!("DATE({}, {}, {})", y, m, d),
        (Some([y, m, d]), Some([h, mi])) => {
            format!("DATE({}, {}, {}) + TIME({}, {}, 0)", y, m, d, h, mi)
        }
        (Some([y, m, d]), Some([h, mi, s])) => {
            format!("DATE({}, {}, {}) + TIME({}, {}, {})", y, m, d, h, mi, s)
        }
        _ => format!("DATEVALUE({})", text(trimmed)),
    }
}

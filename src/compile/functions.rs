//! Tableau function to DAX mappings
//!
//! Aggregations pick the scalar form over a column, the iterator form over an expression,
//! and are dropped entirely around a measure (which already aggregates). Table calculations
//! with a DAX counterpart are rewritten with `ALLSELECTED`; the rest fail to compile.

use std::ops::RangeInclusive;

use super::dax::{Emitter, measure_ref};
use super::error::{CompileError, CompileResult};
use crate::formula::{Expr, FunctionClass, classify_function};
use crate::models::PowerBiType;

/// Numeric functions with the same name and arguments in DAX
const SAME_NAME: &[&str] = &[
    "ABS", "ACOS", "ASIN", "ATAN", "COS", "COT", "DEGREES", "EXP", "LN", "PI", "POWER",
    "RADIANS", "SIGN", "SIN", "SQRT", "TAN", "LEFT", "RIGHT", "LEN", "LOWER", "UPPER", "TRIM",
    "DAY", "MONTH", "YEAR", "QUARTER", "TODAY", "NOW",
];

/// Emit a call to `name` (upper-cased) with `args`
pub(crate) fn emit_call(em: &mut Emitter<'_>, name: &str, args: &[Expr]) -> CompileResult<String> {
    match classify_function(name, args.len()) {
        FunctionClass::Aggregate => aggregate(em, name, args),
        FunctionClass::TableCalculation => table_calculation(em, name, args),
        FunctionClass::RowLevel => row_level(em, name, args),
        FunctionClass::Unknown => {
            em.note(format!(
                "Function {} has no known DAX mapping; emitted as written",
                name
            ));
            passthrough(em, name, args)
        }
    }
}

fn arity(name: &str, args: &[Expr], expected: RangeInclusive<usize>) -> CompileResult<()> {
    if expected.contains(&args.len()) {
        return Ok(());
    }
    let wanted = if expected.start() == expected.end() {
        format!("{}", expected.start())
    } else {
        format!("{} to {}", expected.start(), expected.end())
    };
    Err(CompileError::invalid(
        name,
        format!("expected {} arguments, got {}", wanted, args.len()),
    ))
}

fn emit_args(em: &mut Emitter<'_>, args: &[Expr]) -> CompileResult<Vec<String>> {
    args.iter().map(|a| em.emit_arg(a)).collect()
}

fn passthrough(em: &mut Emitter<'_>, name: &str, args: &[Expr]) -> CompileResult<String> {
    Ok(format!("{}({})", name, emit_args(em, args)?.join(", ")))
}

fn rename(em: &mut Emitter<'_>, dax: &str, args: &[Expr]) -> CompileResult<String> {
    passthrough(em, dax, args)
}

/// Name of a measure an aggregation would wrap, if the argument is one
fn wrapped_measure(arg: &Expr) -> Option<&str> {
    match arg.ungrouped() {
        Expr::Measure(name) => Some(name),
        Expr::Parameter {
            name,
            binding: PowerBiType::Measure,
            ..
        } => Some(name),
        _ => None,
    }
}

fn aggregate(em: &mut Emitter<'_>, name: &str, args: &[Expr]) -> CompileResult<String> {
    let (scalar, iterator) = match name {
        "SUM" => ("SUM", "SUMX"),
        "AVG" | "AVERAGE" => ("AVERAGE", "AVERAGEX"),
        "MIN" => ("MIN", "MINX"),
        "MAX" => ("MAX", "MAXX"),
        "COUNT" => ("COUNT", "COUNTX"),
        "MEDIAN" => ("MEDIAN", "MEDIANX"),
        "STDEV" => ("STDEV.S", "STDEVX.S"),
        "STDEVP" => ("STDEV.P", "STDEVX.P"),
        "VAR" => ("VAR.S", "VARX.S"),
        "VARP" => ("VAR.P", "VARX.P"),
        "COUNTD" | "DISTINCTCOUNT" => return distinct_count(em, name, args),
        "ATTR" => return attribute(em, args),
        "PERCENTILE" => return percentile(em, args),
        _ => return Err(CompileError::unsupported(name)),
    };
    arity(name, args, 1..=1)?;
    let arg = &args[0];

    if let Some(measure) = wrapped_measure(arg) {
        em.note(format!("Removed {} around measure {}", name, measure_ref(measure)));
        return Ok(measure_ref(measure));
    }
    match arg.ungrouped() {
        column @ Expr::Column { .. } => Ok(format!("{}({})", scalar, em.emit(column)?)),
        expr => {
            let table = em.table_for(expr);
            Ok(format!("{}({}, {})", iterator, table, em.emit(expr)?))
        }
    }
}

fn distinct_count(em: &mut Emitter<'_>, name: &str, args: &[Expr]) -> CompileResult<String> {
    arity(name, args, 1..=1)?;
    match args[0].ungrouped() {
        column @ Expr::Column { .. } => Ok(format!("DISTINCTCOUNT({})", em.emit(column)?)),
        expr => {
            let table = em.table_for(expr);
            Ok(format!(
                "COUNTROWS(DISTINCT(SELECTCOLUMNS({}, \"Value\", {})))",
                table,
                em.emit(expr)?
            ))
        }
    }
}

fn attribute(em: &mut Emitter<'_>, args: &[Expr]) -> CompileResult<String> {
    arity("ATTR", args, 1..=1)?;
    if let Some(measure) = wrapped_measure(&args[0]) {
        return Ok(measure_ref(measure));
    }
    match args[0].ungrouped() {
        column @ Expr::Column { .. } => Ok(format!("SELECTEDVALUE({})", em.emit(column)?)),
        _ => Err(CompileError::invalid("ATTR", "argument must be a column")),
    }
}

fn percentile(em: &mut Emitter<'_>, args: &[Expr]) -> CompileResult<String> {
    arity("PERCENTILE", args, 2..=2)?;
    let k = em.emit_arg(&args[1])?;
    match args[0].ungrouped() {
        column @ Expr::Column { .. } => Ok(format!("PERCENTILE.INC({}, {})", em.emit(column)?, k)),
        expr => {
            let table = em.table_for(expr);
            Ok(format!("PERCENTILEX.INC({}, {}, {})", table, em.emit(expr)?, k))
        }
    }
}

fn table_calculation(em: &mut Emitter<'_>, name: &str, args: &[Expr]) -> CompileResult<String> {
    match (name, args.len()) {
        ("TOTAL", _) | ("WINDOW_SUM", 1) => {
            arity(name, args, 1..=1)?;
            Ok(format!("CALCULATE({}, ALLSELECTED())", em.emit_arg(&args[0])?))
        }
        ("WINDOW_AVG", 1) | ("WINDOW_MIN", 1) | ("WINDOW_MAX", 1) | ("WINDOW_COUNT", 1) => {
            let iterator = match name {
                "WINDOW_AVG" => "AVERAGEX",
                "WINDOW_MIN" => "MINX",
                "WINDOW_MAX" => "MAXX",
                _ => "COUNTX",
            };
            let table = em.table_for(&args[0]);
            Ok(format!(
                "{}(ALLSELECTED({}), {})",
                iterator,
                table,
                em.emit_arg(&args[0])?
            ))
        }
        ("RANK", _) | ("RANK_DENSE", _) => {
            arity(name, args, 1..=2)?;
            let order = match args.get(1).map(Expr::ungrouped) {
                None => "DESC".to_string(),
                Some(Expr::Text(order)) if order.eq_ignore_ascii_case("asc") => "ASC".to_string(),
                Some(Expr::Text(order)) if order.eq_ignore_ascii_case("desc") => "DESC".to_string(),
                Some(_) => {
                    return Err(CompileError::invalid(name, "order must be 'asc' or 'desc'"));
                }
            };
            let table = em.table_for(&args[0]);
            let value = em.emit_arg(&args[0])?;
            let ties = if name == "RANK_DENSE" { ", DENSE" } else { "" };
            Ok(format!(
                "RANKX(ALLSELECTED({}), {}, , {}{})",
                table, value, order, ties
            ))
        }
        _ => Err(CompileError::unsupported(name)),
    }
}

fn row_level(em: &mut Emitter<'_>, name: &str, args: &[Expr]) -> CompileResult<String> {
    if SAME_NAME.contains(&name) {
        return passthrough(em, name, args);
    }
    match name {
        // MIN/MAX with two arguments compare scalars in both languages
        "MIN" | "MAX" => passthrough(em, name, args),

        "IIF" => {
            arity(name, args, 3..=4)?;
            if args.len() == 4 {
                em.note("IIF unknown-result argument dropped");
            }
            rename(em, "IF", &args[..3])
        }
        "IFNULL" => {
            arity(name, args, 2..=2)?;
            rename(em, "COALESCE", args)
        }
        "ISNULL" => {
            arity(name, args, 1..=1)?;
            rename(em, "ISBLANK", args)
        }
        "ZN" => {
            arity(name, args, 1..=1)?;
            Ok(format!("COALESCE({}, 0)", em.emit_arg(&args[0])?))
        }
        "ISDATE" => {
            arity(name, args, 1..=1)?;
            Ok(format!("NOT(ISERROR(DATEVALUE({})))", em.emit_arg(&args[0])?))
        }

        "LOG" => {
            arity(name, args, 1..=2)?;
            let x = em.emit_arg(&args[0])?;
            let base = match args.get(1) {
                Some(b) => em.emit_arg(b)?,
                None => "10".to_string(),
            };
            Ok(format!("LOG({}, {})", x, base))
        }
        "DIV" => {
            arity(name, args, 2..=2)?;
            rename(em, "QUOTIENT", args)
        }
        "SQUARE" => {
            arity(name, args, 1..=1)?;
            Ok(format!("POWER({}, 2)", em.emit_arg(&args[0])?))
        }
        "ROUND" => {
            arity(name, args, 1..=2)?;
            let x = em.emit_arg(&args[0])?;
            let digits = match args.get(1) {
                Some(d) => em.emit_arg(d)?,
                None => "0".to_string(),
            };
            Ok(format!("ROUND({}, {})", x, digits))
        }
        "CEILING" | "FLOOR" => {
            arity(name, args, 1..=1)?;
            Ok(format!("{}({}, 1)", name, em.emit_arg(&args[0])?))
        }

        "LTRIM" | "RTRIM" => {
            arity(name, args, 1..=1)?;
            em.note(format!("{} mapped to TRIM, which trims both ends", name));
            rename(em, "TRIM", args)
        }
        "MID" => {
            arity(name, args, 2..=3)?;
            let s = em.emit_arg(&args[0])?;
            let start = em.emit_arg(&args[1])?;
            let length = match args.get(2) {
                Some(l) => em.emit_arg(l)?,
                None => format!("LEN({})", s),
            };
            Ok(format!("MID({}, {}, {})", s, start, length))
        }
        "CONTAINS" => {
            arity(name, args, 2..=2)?;
            rename(em, "CONTAINSSTRING", args)
        }
        "STARTSWITH" | "ENDSWITH" => {
            arity(name, args, 2..=2)?;
            let side = if name == "STARTSWITH" { "LEFT" } else { "RIGHT" };
            let s = em.emit_arg(&args[0])?;
            let prefix = em.emit_arg(&args[1])?;
            Ok(format!("({}({}, LEN({})) = {})", side, s, prefix, prefix))
        }
        "FIND" => {
            arity(name, args, 2..=3)?;
            let s = em.emit_arg(&args[0])?;
            let sub = em.emit_arg(&args[1])?;
            let start = match args.get(2) {
                Some(st) => em.emit_arg(st)?,
                None => "1".to_string(),
            };
            Ok(format!("FIND({}, {}, {}, 0)", sub, s, start))
        }
        "REPLACE" => {
            arity(name, args, 3..=3)?;
            rename(em, "SUBSTITUTE", args)
        }
        "SPACE" => {
            arity(name, args, 1..=1)?;
            Ok(format!("REPT(\" \", {})", em.emit_arg(&args[0])?))
        }
        "ASCII" => {
            arity(name, args, 1..=1)?;
            rename(em, "UNICODE", args)
        }
        "CHAR" => {
            arity(name, args, 1..=1)?;
            rename(em, "UNICHAR", args)
        }

        "DATEDIFF" => {
            arity(name, args, 3..=4)?;
            let unit = interval(name, &args[0])?;
            let start = em.emit_arg(&args[1])?;
            let end = em.emit_arg(&args[2])?;
            if args.len() == 4 {
                em.note("DATEDIFF start-of-week argument dropped; DAX weeks start on Sunday");
            }
            Ok(format!("DATEDIFF({}, {}, {})", start, end, unit))
        }
        "DATEPART" => {
            arity(name, args, 2..=3)?;
            let unit = date_part(name, &args[0])?;
            let d = em.emit_arg(&args[1])?;
            if args.len() == 3 {
                em.note("DATEPART start-of-week argument dropped; DAX weeks start on Sunday");
            }
            match unit.as_str() {
                "year" => Ok(format!("YEAR({})", d)),
                "quarter" => Ok(format!("QUARTER({})", d)),
                "month" => Ok(format!("MONTH({})", d)),
                "week" => Ok(format!("WEEKNUM({})", d)),
                "day" => Ok(format!("DAY({})", d)),
                "weekday" => Ok(format!("WEEKDAY({})", d)),
                "hour" => Ok(format!("HOUR({})", d)),
                "minute" => Ok(format!("MINUTE({})", d)),
                "second" => Ok(format!("SECOND({})", d)),
                "dayofyear" => Ok(format!("DATEDIFF(DATE(YEAR({d}), 1, 1), {d}, DAY) + 1")),
                other => Err(CompileError::invalid(name, format!("unknown date part '{}'", other))),
            }
        }
        "DATENAME" => {
            arity(name, args, 2..=3)?;
            let unit = date_part(name, &args[0])?;
            let d = em.emit_arg(&args[1])?;
            let pattern = match unit.as_str() {
                "year" => "YYYY",
                "month" => "MMMM",
                "weekday" => "dddd",
                "day" => "d",
                other => {
                    return Err(CompileError::invalid(
                        name,
                        format!("date part '{}' has no FORMAT pattern", other),
                    ));
                }
            };
            Ok(format!("FORMAT({}, \"{}\")", d, pattern))
        }
        "DATETRUNC" => {
            arity(name, args, 2..=3)?;
            let unit = date_part(name, &args[0])?;
            let d = em.emit_arg(&args[1])?;
            match unit.as_str() {
                "year" => Ok(format!("DATE(YEAR({d}), 1, 1)")),
                "quarter" => Ok(format!("DATE(YEAR({d}), (QUARTER({d}) - 1) * 3 + 1, 1)")),
                "month" => Ok(format!("DATE(YEAR({d}), MONTH({d}), 1)")),
                "week" => Ok(format!("DATE(YEAR({d}), MONTH({d}), DAY({d}) - WEEKDAY({d}, 1) + 1)")),
                "day" => Ok(format!("DATE(YEAR({d}), MONTH({d}), DAY({d}))")),
                other => Err(CompileError::invalid(name, format!("cannot truncate to '{}'", other))),
            }
        }
        "DATEADD" => {
            arity(name, args, 3..=3)?;
            let unit = date_part(name, &args[0])?;
            let d = em.emit_operand(&args[2], 4, false)?;
            let n = em.emit_operand(&args[1], 5, false)?;
            match unit.as_str() {
                "year" => Ok(format!("EDATE({}, {} * 12)", d, n)),
                "quarter" => Ok(format!("EDATE({}, {} * 3)", d, n)),
                "month" => Ok(format!("EDATE({}, {})", d, em.emit_arg(&args[1])?)),
                "week" => Ok(format!("({} + {} * 7)", d, n)),
                "day" => Ok(format!("({} + {})", d, em.emit_operand(&args[1], 4, true)?)),
                "hour" => Ok(format!("({} + {} / 24)", d, n)),
                "minute" => Ok(format!("({} + {} / 1440)", d, n)),
                "second" => Ok(format!("({} + {} / 86400)", d, n)),
                other => Err(CompileError::invalid(name, format!("unknown date part '{}'", other))),
            }
        }
        "WEEK" => {
            arity(name, args, 1..=1)?;
            rename(em, "WEEKNUM", args)
        }
        "MAKEDATE" => {
            arity(name, args, 3..=3)?;
            rename(em, "DATE", args)
        }
        "DATE" => {
            arity(name, args, 1..=1)?;
            match args[0].ungrouped() {
                Expr::Text(_) => rename(em, "DATEVALUE", args),
                date @ Expr::Date(_) => em.emit(date),
                other => {
                    let d = em.emit(other)?;
                    Ok(format!("DATE(YEAR({d}), MONTH({d}), DAY({d}))"))
                }
            }
        }

        "STR" => {
            arity(name, args, 1..=1)?;
            Ok(format!("FORMAT({}, \"@\")", em.emit_arg(&args[0])?))
        }
        "FLOAT" => {
            arity(name, args, 1..=1)?;
            Ok(format!("CONVERT({}, DOUBLE)", em.emit_arg(&args[0])?))
        }
        "INT" => {
            arity(name, args, 1..=1)?;
            rename(em, "TRUNC", args)
        }

        "ATAN2" => Err(CompileError::unsupported(name)),
        _ => {
            em.note(format!(
                "Function {} has no known DAX mapping; emitted as written",
                name
            ));
            passthrough(em, name, args)
        }
    }
}

/// Lower-cased date part from a string literal argument
fn date_part(function: &str, arg: &Expr) -> CompileResult<String> {
    match arg.ungrouped() {
        Expr::Text(part) => Ok(part.to_lowercase()),
        _ => Err(CompileError::invalid(
            function,
            "date part must be a string literal",
        )),
    }
}

/// DAX interval keyword for a DATEDIFF date part
fn interval(function: &str, arg: &Expr) -> CompileResult<&'static str> {
    let interval = match date_part(function, arg)?.as_str() {
        "year" => "YEAR",
        "quarter" => "QUARTER",
        "month" => "MONTH",
        "week" => "WEEK",
        "day" => "DAY",
        "hour" => "HOUR",
        "minute" => "MINUTE",
        "second" => "SECOND",
        other => {
            return Err(CompileError::invalid(
                function,
                format!("unknown date part '{}'", other),
            ));
        }
    };
    Ok(interval)
}

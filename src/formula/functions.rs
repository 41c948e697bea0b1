//! Catalogue of Tableau functions by evaluation class
//!
//! The classifier uses it to spot measure signals; the compiler uses it to decide between
//! scalar and iterator forms.

/// How a Tableau function evaluates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionClass {
    /// Collapses rows to one value per filter context
    Aggregate,
    /// Computed over the rows of the visualisation (TOTAL, WINDOW_*, RANK, ...)
    TableCalculation,
    /// Evaluated per row
    RowLevel,
    Unknown,
}

const AGGREGATES: &[&str] = &[
    "SUM",
    "AVG",
    "AVERAGE",
    "MIN",
    "MAX",
    "COUNT",
    "COUNTD",
    "DISTINCTCOUNT",
    "MEDIAN",
    "ATTR",
    "STDEV",
    "STDEVP",
    "VAR",
    "VARP",
    "PERCENTILE",
    "COLLECT",
];

const TABLE_CALCULATION_PREFIXES: &[&str] = &["RUNNING_", "WINDOW_", "RANK"];

const TABLE_CALCULATIONS: &[&str] = &[
    "TOTAL",
    "LOOKUP",
    "INDEX",
    "FIRST",
    "LAST",
    "SIZE",
    "PREVIOUS_VALUE",
];

const ROW_LEVEL: &[&str] = &[
    // logic
    "IIF", "IFNULL", "ISNULL", "ZN", "ISDATE",
    // numbers
    "ABS", "ACOS", "ASIN", "ATAN", "ATAN2", "CEILING", "COS", "COT", "DEGREES", "DIV", "EXP",
    "FLOOR", "LN", "LOG", "PI", "POWER", "RADIANS", "ROUND", "SIGN", "SIN", "SQRT", "SQUARE",
    "TAN",
    // strings
    "ASCII", "CHAR", "CONTAINS", "ENDSWITH", "FIND", "LEFT", "LEN", "LOWER", "LTRIM", "MID",
    "REPLACE", "RIGHT", "RTRIM", "SPACE", "STARTSWITH", "TRIM", "UPPER",
    // dates
    "DATE", "DATEADD", "DATEDIFF", "DATENAME", "DATEPART", "DATETRUNC", "DAY", "MAKEDATE",
    "MONTH", "NOW", "QUARTER", "TODAY", "WEEK", "YEAR",
    // conversions
    "FLOAT", "INT", "STR",
];

/// Classify a function by its upper-cased name and argument count
///
/// `MIN` and `MAX` with two arguments compare two row values and are row-level.
pub fn classify_function(name: &str, arity: usize) -> FunctionClass {
    if matches!(name, "MIN" | "MAX") && arity == 2 {
        return FunctionClass::RowLevel;
    }
    if AGGREGATES.contains(&name) {
        FunctionClass::Aggregate
    } else if TABLE_CALCULATIONS.contains(&name)
        || TABLE_CALCULATION_PREFIXES
            .iter()
            .any(|prefix| name.starts_with(prefix))
    {
        FunctionClass::TableCalculation
    } else if ROW_LEVEL.contains(&name) {
        FunctionClass::RowLevel
    } else {
        FunctionClass::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_function() {
        assert_eq!(classify_function("SUM", 1), FunctionClass::Aggregate);
        assert_eq!(classify_function("COUNTD", 1), FunctionClass::Aggregate);
        assert_eq!(classify_function("MAX", 1), FunctionClass::Aggregate);
        assert_eq!(classify_function("MAX", 2), FunctionClass::RowLevel);
        assert_eq!(classify_function("RUNNING_SUM", 1), FunctionClass::TableCalculation);
        assert_eq!(classify_function("RANK_DENSE", 1), FunctionClass::TableCalculation);
        assert_eq!(classify_function("TOTAL", 1), FunctionClass::TableCalculation);
        assert_eq!(classify_function("DATEDIFF", 3), FunctionClass::RowLevel);
        assert_eq!(classify_function("REGEXP_MATCH", 2), FunctionClass::Unknown);
    }
}

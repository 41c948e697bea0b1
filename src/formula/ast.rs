//! Expression tree shared by the parser, resolver and compiler
//!
//! The parser only produces the Tableau-side variants. Resolution rewrites every
//! [`Expr::Reference`] into one of the resolved leaves (`Column`, `Measure`, `Parameter`,
//! `Unresolved`, `Blank`), so the compiler never has to look a caption up again.

use crate::models::PowerBiType;

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    /// Numeric literal exactly as written
    Number(String),
    Text(String),
    Boolean(bool),
    Null,
    /// Contents of a `#...#` literal
    Date(String),
    /// `[Name]` or `[Qualifier].[Name]` as written in the formula
    Reference {
        qualifier: Option<String>,
        name: String,
    },
    /// Source column (or a column the resolver decided to reference directly)
    Column { table: String, column: String },
    /// Naked measure reference
    Measure(String),
    Parameter {
        table: String,
        name: String,
        binding: PowerBiType,
    },
    /// Reference to a caption that is not in the metadata
    Unresolved(String),
    /// Empty value, used to break dependency cycles
    Blank,
    /// Parenthesised sub-expression
    Group(Box<Expr>),
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// Function call; `name` is upper-cased
    Call { name: String, args: Vec<Expr> },
    If {
        branches: Vec<(Expr, Expr)>,
        otherwise: Option<Box<Expr>>,
    },
    Case {
        subject: Box<Expr>,
        arms: Vec<(Expr, Expr)>,
        otherwise: Option<Box<Expr>>,
    },
    /// Level-of-detail expression
    Lod {
        kind: LodKind,
        dimensions: Vec<Expr>,
        body: Box<Expr>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Negate,
    Not,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Power,
    Concat,
    Equals,
    NotEquals,
    Less,
    LessEquals,
    Greater,
    GreaterEquals,
    And,
    Or,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LodKind {
    Fixed,
    Include,
    Exclude,
}

impl LodKind {
    pub fn keyword(self) -> &'static str {
        match self {
            LodKind::Fixed => "FIXED",
            LodKind::Include => "INCLUDE",
            LodKind::Exclude => "EXCLUDE",
        }
    }
}

impl Expr {
    pub fn reference(name: impl Into<String>) -> Self {
        Expr::Reference {
            qualifier: None,
            name: name.into(),
        }
    }

    pub fn call(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::Call {
            name: name.into().to_uppercase(),
            args,
        }
    }

    /// Whether the expression renders as a single token, so it can be embedded without
    /// parentheses
    pub fn is_atomic(&self) -> bool {
        matches!(
            self,
            Expr::Number(_)
                | Expr::Text(_)
                | Expr::Boolean(_)
                | Expr::Null
                | Expr::Date(_)
                | Expr::Reference { .. }
                | Expr::Column { .. }
                | Expr::Measure(_)
                | Expr::Parameter { .. }
                | Expr::Unresolved(_)
                | Expr::Blank
                | Expr::Group(_)
                | Expr::Call { .. }
                | Expr::If { .. }
                | Expr::Case { .. }
                | Expr::Lod { .. }
        )
    }

    /// Wrap in a [`Expr::Group`] unless already atomic
    pub fn grouped(self) -> Self {
        if self.is_atomic() {
            self
        } else {
            Expr::Group(Box::new(self))
        }
    }

    /// Visit this node and every descendant, parents first
    pub fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a Expr)) {
        visit(self);
        match self {
            Expr::Group(inner) => inner.walk(visit),
            Expr::Unary { expr, .. } => expr.walk(visit),
            Expr::Binary { left, right, .. } => {
                left.walk(visit);
                right.walk(visit);
            }
            Expr::Call { args, .. } => {
                for arg in args {
                    arg.walk(visit);
                }
            }
            Expr::If {
                branches,
                otherwise,
            } => {
                for (cond, value) in branches {
                    cond.walk(visit);
                    value.walk(visit);
                }
                if let Some(e) = otherwise {
                    e.walk(visit);
                }
            }
            Expr::Case {
                subject,
                arms,
                otherwise,
            } => {
                subject.walk(visit);
                for (when, then) in arms {
                    when.walk(visit);
                    then.walk(visit);
                }
                if let Some(e) = otherwise {
                    e.walk(visit);
                }
            }
            Expr::Lod {
                dimensions, body, ..
            } => {
                for dim in dimensions {
                    dim.walk(visit);
                }
                body.walk(visit);
            }
            _ => {}
        }
    }

    /// Rebuild the tree, letting `replace` substitute any node. When `replace` returns
    /// `Some`, that subtree is taken as-is and not descended into.
    pub fn transform(&self, replace: &mut dyn FnMut(&Expr) -> Option<Expr>) -> Expr {
        if let Some(substitute) = replace(self) {
            return substitute;
        }
        match self {
            Expr::Group(inner) => Expr::Group(Box::new(inner.transform(replace))),
            Expr::Unary { op, expr } => Expr::Unary {
                op: *op,
                expr: Box::new(expr.transform(replace)),
            },
            Expr::Binary { op, left, right } => Expr::Binary {
                op: *op,
                left: Box::new(left.transform(replace)),
                right: Box::new(right.transform(replace)),
            },
            Expr::Call { name, args } => Expr::Call {
                name: name.clone(),
                args: args.iter().map(|a| a.transform(replace)).collect(),
            },
            Expr::If {
                branches,
                otherwise,
            } => Expr::If {
                branches: branches
                    .iter()
                    .map(|(c, v)| (c.transform(replace), v.transform(replace)))
                    .collect(),
                otherwise: otherwise.as_ref().map(|e| Box::new(e.transform(replace))),
            },
            Expr::Case {
                subject,
                arms,
                otherwise,
            } => Expr::Case {
                subject: Box::new(subject.transform(replace)),
                arms: arms
                    .iter()
                    .map(|(w, t)| (w.transform(replace), t.transform(replace)))
                    .collect(),
                otherwise: otherwise.as_ref().map(|e| Box::new(e.transform(replace))),
            },
            Expr::Lod {
                kind,
                dimensions,
                body,
            } => Expr::Lod {
                kind: *kind,
                dimensions: dimensions.iter().map(|d| d.transform(replace)).collect(),
                body: Box::new(body.transform(replace)),
            },
            leaf => leaf.clone(),
        }
    }

    /// Upper-cased names of every function called anywhere in the tree
    pub fn function_names(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.walk(&mut |e| {
            if let Expr::Call { name, .. } = e {
                names.push(name.as_str());
            }
        });
        names
    }

    pub fn contains_lod(&self) -> bool {
        let mut found = false;
        self.walk(&mut |e| found |= matches!(e, Expr::Lod { .. }));
        found
    }

    /// Any unresolved `[Name]` reference left in the tree
    pub fn contains_reference(&self) -> bool {
        let mut found = false;
        self.walk(&mut |e| found |= matches!(e, Expr::Reference { .. }));
        found
    }

    /// Table of the first column leaf, in evaluation order
    pub fn first_column_table(&self) -> Option<&str> {
        let mut table = None;
        self.walk(&mut |e| {
            if table.is_none() {
                if let Expr::Column { table: t, .. } = e {
                    table = Some(t.as_str());
                }
            }
        });
        table
    }

    /// Strip redundant grouping
    pub fn ungrouped(&self) -> &Expr {
        match self {
            Expr::Group(inner) => inner.ungrouped(),
            other => other,
        }
    }
}

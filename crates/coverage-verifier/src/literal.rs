//! Literal Reconstructor.
//!
//! Converts literal expression subtrees into [`serde_json::Value`] without
//! evaluating anything. Nodes are classified into a closed set of
//! [`LiteralNode`] variants and dispatched exhaustively:
//!
//! - scalars (string, number, boolean, null) map to their JSON value
//! - object literals map to objects, keyed by identifier, string or numeric
//!   key, in declaration order
//! - array literals map to arrays; scalar elements are appended, while
//!   object and array elements keep their source index, padding skipped
//!   positions before them with `null`
//! - everything else is omitted
//!
//! Omission is never an error. Each omitted node is recorded as an
//! [`Omission`] and logged at debug level so callers can tell "absent" from
//! "not literal"; deciding whether an absent key is fatal is up to the
//! caller.

use serde_json::{Map, Number, Value};
use swc_core::common::{Span, Spanned};
use swc_core::ecma::ast::{ArrayLit, Expr, Lit, ObjectLit, Prop, PropName, PropOrSpread};

use crate::parse::ParsedSource;

// Largest integer an f64 holds exactly (2^53 - 1).
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// Deepest object/array nesting that is reconstructed; anything below is
/// omitted.
pub const MAX_LITERAL_DEPTH: usize = 32;

/// Classification of an initializer node.
#[derive(Debug, Clone, Copy)]
pub enum LiteralNode<'a> {
    /// String, number, boolean or null
    Scalar(&'a Lit),
    /// `{ ... }`
    Object(&'a ObjectLit),
    /// `[ ... ]`
    Array(&'a ArrayLit),
    /// Anything without a literal value
    Other(&'a Expr),
}

impl<'a> LiteralNode<'a> {
    /// Classify an expression, looking through parentheses
    pub fn classify(expr: &'a Expr) -> Self {
        match expr {
            Expr::Lit(lit) => Self::Scalar(lit),
            Expr::Object(object) => Self::Object(object),
            Expr::Array(array) => Self::Array(array),
            Expr::Paren(paren) => Self::classify(&paren.expr),
            _ => Self::Other(expr),
        }
    }
}

/// A node that contributed nothing to the reconstructed value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Omission {
    /// Dotted path of the omitted value from the reconstruction root
    pub path: String,
    /// What was found instead of a literal
    pub description: String,
    /// 1-based source line
    pub line: u32,
    /// 0-based source column
    pub column: u32,
}

/// Best-effort literal reconstructor that keeps a record of what it skipped.
#[derive(Debug)]
pub struct Reconstructor<'a> {
    source: &'a ParsedSource,
    omissions: Vec<Omission>,
}

impl<'a> Reconstructor<'a> {
    /// Create a reconstructor resolving positions against `source`
    pub fn new(source: &'a ParsedSource) -> Self {
        Self {
            source,
            omissions: Vec::new(),
        }
    }

    /// Reconstruct `expr`, using `root` as the first path segment of any
    /// omission recorded along the way.
    ///
    /// Returns `None` when `expr` itself has no literal value.
    pub fn reconstruct(&mut self, root: &str, expr: &Expr) -> Option<Value> {
        self.node(root, expr, 0)
    }

    /// Omissions recorded so far
    pub fn omissions(&self) -> &[Omission] {
        &self.omissions
    }

    /// Consume the reconstructor, returning its omissions
    pub fn into_omissions(self) -> Vec<Omission> {
        self.omissions
    }

    fn node(&mut self, path: &str, expr: &Expr, depth: usize) -> Option<Value> {
        match LiteralNode::classify(expr) {
            LiteralNode::Scalar(lit) => {
                let value = scalar_value(lit);
                if value.is_none() {
                    self.omit(path, expr.span(), &describe_lit(lit));
                }
                value
            }
            LiteralNode::Object(_) | LiteralNode::Array(_) if depth >= MAX_LITERAL_DEPTH => {
                self.omit(path, expr.span(), "nesting too deep");
                None
            }
            LiteralNode::Object(object) => Some(self.object(path, object, depth + 1)),
            LiteralNode::Array(array) => Some(self.array(path, array, depth + 1)),
            LiteralNode::Other(other) => {
                self.omit(path, other.span(), &describe(other));
                None
            }
        }
    }

    fn object(&mut self, path: &str, object: &ObjectLit, depth: usize) -> Value {
        let mut map = Map::new();
        for prop in &object.props {
            let prop = match prop {
                PropOrSpread::Spread(spread) => {
                    self.omit(path, spread.expr.span(), "spread property");
                    continue;
                }
                PropOrSpread::Prop(prop) => &**prop,
            };
            match prop {
                Prop::KeyValue(kv) => {
                    let Some(key) = literal_key(&kv.key) else {
                        self.omit(path, kv.key.span(), "computed property key");
                        continue;
                    };
                    let child_path = format!("{path}.{key}");
                    if let Some(value) = self.node(&child_path, &kv.value, depth) {
                        map.insert(key, value);
                    }
                }
                Prop::Shorthand(ident) => {
                    self.omit(&format!("{path}.{}", ident.sym), ident.span, "shorthand property");
                }
                Prop::Method(method) => {
                    self.omit_member(path, &method.key, method.function.span, "method");
                }
                Prop::Getter(getter) => self.omit_member(path, &getter.key, getter.span, "getter"),
                Prop::Setter(setter) => self.omit_member(path, &setter.key, setter.span, "setter"),
                Prop::Assign(assign) => self.omit(
                    &format!("{path}.{}", assign.key.sym),
                    assign.key.span,
                    "assignment property",
                ),
            }
        }
        Value::Object(map)
    }

    fn array(&mut self, path: &str, array: &ArrayLit, depth: usize) -> Value {
        let mut items = Vec::with_capacity(array.elems.len());
        for (index, elem) in array.elems.iter().enumerate() {
            let child_path = format!("{path}[{index}]");
            let Some(elem) = elem else {
                self.omit(&child_path, array.span, "array hole");
                continue;
            };
            if elem.spread.is_some() {
                self.omit(&child_path, elem.expr.span(), "spread element");
                continue;
            }
            let positional = matches!(
                LiteralNode::classify(&elem.expr),
                LiteralNode::Object(_) | LiteralNode::Array(_)
            );
            let Some(value) = self.node(&child_path, &elem.expr, depth) else {
                continue;
            };
            if positional && items.len() < index {
                items.resize(index, Value::Null);
            }
            items.push(value);
        }
        Value::Array(items)
    }

    fn omit_member(&mut self, path: &str, key: &PropName, span: Span, description: &str) {
        let name = literal_key(key).unwrap_or_default();
        self.omit(&format!("{path}.{name}"), span, description);
    }

    fn omit(&mut self, path: &str, span: Span, description: &str) {
        let (line, column) = self.source.position(span);
        tracing::debug!(
            path = %path,
            node = %description,
            line,
            column,
            "omitting non-literal node"
        );
        self.omissions.push(Omission {
            path: path.to_string(),
            description: description.to_string(),
            line,
            column,
        });
    }
}

/// Reconstruct `expr` from `source`, discarding omission diagnostics.
pub fn reconstruct(source: &ParsedSource, expr: &Expr) -> Option<Value> {
    Reconstructor::new(source).reconstruct("$", expr)
}

fn scalar_value(lit: &Lit) -> Option<Value> {
    match lit {
        Lit::Str(s) => Some(Value::String(s.value.to_string())),
        Lit::Num(n) => number_value(n.value),
        Lit::Bool(b) => Some(Value::Bool(b.value)),
        Lit::Null(_) => Some(Value::Null),
        Lit::BigInt(_) | Lit::Regex(_) | Lit::JSXText(_) => None,
    }
}

fn describe_lit(lit: &Lit) -> String {
    match lit {
        Lit::BigInt(_) => "bigint literal".to_string(),
        Lit::Regex(_) => "regular expression".to_string(),
        Lit::JSXText(_) => "JSX text".to_string(),
        Lit::Num(_) => "non-finite number".to_string(),
        Lit::Str(_) | Lit::Bool(_) | Lit::Null(_) => "literal".to_string(),
    }
}

fn describe(expr: &Expr) -> String {
    match expr {
        Expr::Ident(ident) => format!("identifier `{}`", ident.sym),
        Expr::Tpl(_) | Expr::TaggedTpl(_) => "template literal".to_string(),
        Expr::Fn(_) | Expr::Arrow(_) => "function".to_string(),
        Expr::Class(_) => "class".to_string(),
        Expr::Call(_) | Expr::New(_) => "call".to_string(),
        Expr::Unary(_) => "unary expression".to_string(),
        Expr::Member(_) | Expr::SuperProp(_) | Expr::OptChain(_) => "member access".to_string(),
        Expr::Bin(_) => "binary expression".to_string(),
        Expr::Assign(_) | Expr::Update(_) => "assignment".to_string(),
        Expr::This(_) => "`this`".to_string(),
        _ => "non-literal expression".to_string(),
    }
}

/// Integral numbers become JSON integers so they compare equal to counters
/// and ids deserialized elsewhere.
fn number_value(n: f64) -> Option<Value> {
    if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER {
        if n >= 0.0 {
            return Some(Value::from(n as u64));
        }
        return Some(Value::from(n as i64));
    }
    Number::from_f64(n).map(Value::Number)
}

fn literal_key(key: &PropName) -> Option<String> {
    match key {
        PropName::Ident(ident) => Some(ident.sym.to_string()),
        PropName::Str(s) => Some(s.value.to_string()),
        PropName::Num(n) if n.value.fract() == 0.0 && n.value.abs() < 1e21 => {
            Some(format!("{}", n.value as i64))
        }
        PropName::Num(n) => Some(n.value.to_string()),
        PropName::BigInt(b) => Some(b.value.to_string()),
        PropName::Computed(_) => None,
    }
}

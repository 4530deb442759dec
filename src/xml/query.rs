//! Structural queries over an [`XmlDocument`].
//!
//! Set rules compile to location paths such as
//! `descendant::lido:event[lido:eventType/lido:term="production"]/lido:eventActor`.
//! This module parses the XPath 1.0 subset those rules need and evaluates it:
//!
//! - axes: `child`, `descendant`, `descendant-or-self`, `attribute` (`@`),
//!   `self` (`.`), `parent` (`..`), plus the `//` abbreviation
//! - node tests: qualified names, `*`, `prefix:*`, `text()`, `node()`
//! - predicates with `and`, `or`, `=`, `!=`, `<`, `<=`, `>`, `>=`, `|`,
//!   numeric positions and the functions `not`, `contains`, `starts-with`,
//!   `normalize-space`, `string`, `count`, `position` and `last`
//!
//! Queries are parsed once ([`Query::parse`]) and evaluated many times
//! ([`Query::select`]); a parsed query is immutable and can be shared freely.

use std::collections::HashSet;
use std::fmt;

use crate::error::QueryError;

use super::{Namespaces, NodeId, NodeKind, QName, XmlDocument};

pub type QueryResult<T> = std::result::Result<T, QueryError>;

/// A node selected by a query: a tree node or one attribute of an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeRef {
    Node(NodeId),
    Attribute(NodeId, usize),
}

impl NodeRef {
    /// Sort key that orders nodes as they appear in the document; an
    /// element's attributes sort after it and before its children.
    fn order_key(self) -> (usize, usize) {
        match self {
            NodeRef::Node(id) => (id.index(), 0),
            NodeRef::Attribute(id, i) => (id.index(), i + 1),
        }
    }

    /// Text content for elements, value for attributes.
    pub fn string_value(self, doc: &XmlDocument) -> String {
        match self {
            NodeRef::Node(id) => doc.string_value(id),
            NodeRef::Attribute(id, i) => doc.attributes(id)[i].value.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Syntax tree
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    Child,
    Descendant,
    DescendantOrSelf,
    Attribute,
    SelfNode,
    Parent,
}

#[derive(Debug, Clone, PartialEq)]
enum NodeTest {
    Name { prefix: Option<String>, local: String },
    AnyName { prefix: Option<String> },
    Text,
    Node,
}

#[derive(Debug, Clone, PartialEq)]
struct Step {
    axis: Axis,
    test: NodeTest,
    predicates: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
struct LocationPath {
    absolute: bool,
    steps: Vec<Step>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Function {
    Not,
    Contains,
    StartsWith,
    NormalizeSpace,
    String,
    Count,
    Position,
    Last,
}

impl Function {
    fn lookup(name: &str) -> Option<Self> {
        Some(match name {
            "not" => Function::Not,
            "contains" => Function::Contains,
            "starts-with" => Function::StartsWith,
            "normalize-space" => Function::NormalizeSpace,
            "string" => Function::String,
            "count" => Function::Count,
            "position" => Function::Position,
            "last" => Function::Last,
            _ => return None,
        })
    }

    /// Accepted argument counts, inclusive.
    fn arity(self) -> (usize, usize) {
        match self {
            Function::Not | Function::Count => (1, 1),
            Function::Contains | Function::StartsWith => (2, 2),
            Function::NormalizeSpace | Function::String => (0, 1),
            Function::Position | Function::Last => (0, 0),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Path(LocationPath),
    Literal(String),
    Number(f64),
    Or(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Compare(Box<Expr>, CmpOp, Box<Expr>),
    Union(Box<Expr>, Box<Expr>),
    Call(Function, Vec<Expr>),
}

// ---------------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Slash,
    DoubleSlash,
    LBracket,
    RBracket,
    LParen,
    RParen,
    At,
    Comma,
    Dot,
    DotDot,
    Star,
    Pipe,
    Op(CmpOp),
    Literal(String),
    Number(f64),
    /// An NCName or QName, including `prefix:*`.
    Name(String),
    /// An axis name (the `::` has been consumed).
    Axis(String),
}

fn is_name_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '.')
}

fn tokenize(query: &str) -> QueryResult<Vec<(usize, Tok)>> {
    let chars: Vec<(usize, char)> = query.char_indices().collect();
    let at = |i: usize| chars.get(i).map(|&(_, c)| c);
    let syntax = |offset: usize, message: &str| QueryError::Syntax {
        query: query.to_string(),
        offset,
        message: message.to_string(),
    };

    let mut tokens = Vec::new();
    let mut i = 0;
    while let Some(&(offset, c)) = chars.get(i) {
        let tok = match c {
            c if c.is_whitespace() => {
                i += 1;
                continue;
            }
            '/' if at(i + 1) == Some('/') => {
                i += 2;
                Tok::DoubleSlash
            }
            '/' => {
                i += 1;
                Tok::Slash
            }
            '[' => {
                i += 1;
                Tok::LBracket
            }
            ']' => {
                i += 1;
                Tok::RBracket
            }
            '(' => {
                i += 1;
                Tok::LParen
            }
            ')' => {
                i += 1;
                Tok::RParen
            }
            '@' => {
                i += 1;
                Tok::At
            }
            ',' => {
                i += 1;
                Tok::Comma
            }
            '|' => {
                i += 1;
                Tok::Pipe
            }
            '*' => {
                i += 1;
                Tok::Star
            }
            '=' => {
                i += 1;
                Tok::Op(CmpOp::Eq)
            }
            '!' if at(i + 1) == Some('=') => {
                i += 2;
                Tok::Op(CmpOp::Ne)
            }
            '<' | '>' => {
                let or_equal = at(i + 1) == Some('=');
                i += if or_equal { 2 } else { 1 };
                Tok::Op(match (c, or_equal) {
                    ('<', false) => CmpOp::Lt,
                    ('<', true) => CmpOp::Le,
                    ('>', false) => CmpOp::Gt,
                    _ => CmpOp::Ge,
                })
            }
            '"' | '\'' => {
                let start = i + 1;
                let mut end = start;
                while at(end).is_some_and(|ch| ch != c) {
                    end += 1;
                }
                if at(end).is_none() {
                    return Err(syntax(offset, "unterminated string literal"));
                }
                let text: String = chars[start..end].iter().map(|&(_, ch)| ch).collect();
                i = end + 1;
                Tok::Literal(text)
            }
            '.' if at(i + 1) == Some('.') => {
                i += 2;
                Tok::DotDot
            }
            '.' if !at(i + 1).is_some_and(|ch| ch.is_ascii_digit()) => {
                i += 1;
                Tok::Dot
            }
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while at(i).is_some_and(|ch| ch.is_ascii_digit() || ch == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().map(|&(_, ch)| ch).collect();
                let value = text
                    .parse::<f64>()
                    .map_err(|_| syntax(offset, "invalid number"))?;
                Tok::Number(value)
            }
            c if is_name_start(c) => {
                let start = i;
                while at(i).is_some_and(is_name_char) {
                    i += 1;
                }
                let mut name: String = chars[start..i].iter().map(|&(_, ch)| ch).collect();
                if at(i) == Some(':') && at(i + 1) == Some(':') {
                    i += 2;
                    Tok::Axis(name)
                } else if at(i) == Some(':') && at(i + 1) == Some('*') {
                    i += 2;
                    name.push_str(":*");
                    Tok::Name(name)
                } else if at(i) == Some(':') && at(i + 1).is_some_and(is_name_start) {
                    i += 1;
                    let local_start = i;
                    while at(i).is_some_and(is_name_char) {
                        i += 1;
                    }
                    name.push(':');
                    name.extend(chars[local_start..i].iter().map(|&(_, ch)| ch));
                    Tok::Name(name)
                } else {
                    Tok::Name(name)
                }
            }
            _ => return Err(syntax(offset, &format!("unexpected character '{c}'"))),
        };
        tokens.push((offset, tok));
    }
    Ok(tokens)
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

struct Parser<'q> {
    query: &'q str,
    tokens: Vec<(usize, Tok)>,
    pos: usize,
}

impl<'q> Parser<'q> {
    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn peek_at(&self, n: usize) -> Option<&Tok> {
        self.tokens.get(self.pos + n).map(|(_, t)| t)
    }

    fn bump(&mut self) -> Option<Tok> {
        let tok = self.tokens.get(self.pos).map(|(_, t)| t.clone());
        self.pos += 1;
        tok
    }

    fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|&(o, _)| o)
            .unwrap_or(self.query.len())
    }

    fn error(&self, message: impl Into<String>) -> QueryError {
        QueryError::Syntax {
            query: self.query.to_string(),
            offset: self.offset(),
            message: message.into(),
        }
    }

    fn expect(&mut self, expected: Tok, what: &str) -> QueryResult<()> {
        if self.peek() == Some(&expected) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(format!("expected {what}")))
        }
    }

    fn is_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Tok::Name(n)) if n == keyword)
    }

    fn parse_or(&mut self) -> QueryResult<Expr> {
        let mut left = self.parse_and()?;
        while self.is_keyword("or") {
            self.pos += 1;
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> QueryResult<Expr> {
        let mut left = self.parse_equality()?;
        while self.is_keyword("and") {
            self.pos += 1;
            let right = self.parse_equality()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> QueryResult<Expr> {
        let mut left = self.parse_relational()?;
        while let Some(Tok::Op(op @ (CmpOp::Eq | CmpOp::Ne))) = self.peek() {
            let op = *op;
            self.pos += 1;
            let right = self.parse_relational()?;
            left = Expr::Compare(Box::new(left), op, Box::new(right));
        }
        Ok(left)
    }

    fn parse_relational(&mut self) -> QueryResult<Expr> {
        let mut left = self.parse_union()?;
        while let Some(Tok::Op(op @ (CmpOp::Lt | CmpOp::Le | CmpOp::Gt | CmpOp::Ge))) = self.peek()
        {
            let op = *op;
            self.pos += 1;
            let right = self.parse_union()?;
            left = Expr::Compare(Box::new(left), op, Box::new(right));
        }
        Ok(left)
    }

    fn parse_union(&mut self) -> QueryResult<Expr> {
        let mut left = self.parse_primary()?;
        while self.peek() == Some(&Tok::Pipe) {
            self.pos += 1;
            let right = self.parse_primary()?;
            left = Expr::Union(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_primary(&mut self) -> QueryResult<Expr> {
        match self.peek() {
            Some(Tok::Literal(s)) => {
                let s = s.clone();
                self.pos += 1;
                Ok(Expr::Literal(s))
            }
            Some(Tok::Number(n)) => {
                let n = *n;
                self.pos += 1;
                Ok(Expr::Number(n))
            }
            Some(Tok::LParen) => {
                self.pos += 1;
                let inner = self.parse_or()?;
                self.expect(Tok::RParen, "')'")?;
                Ok(inner)
            }
            Some(Tok::Name(name))
                if self.peek_at(1) == Some(&Tok::LParen) && !is_node_type(name) =>
            {
                let name = name.clone();
                self.parse_call(&name)
            }
            Some(_) => Ok(Expr::Path(self.parse_path()?)),
            None => Err(self.error("unexpected end of query")),
        }
    }

    fn parse_call(&mut self, name: &str) -> QueryResult<Expr> {
        let function = Function::lookup(name).ok_or_else(|| QueryError::UnknownFunction {
            name: name.to_string(),
        })?;
        self.pos += 2; // name and '('
        let mut args = Vec::new();
        if self.peek() != Some(&Tok::RParen) {
            args.push(self.parse_or()?);
            while self.peek() == Some(&Tok::Comma) {
                self.pos += 1;
                args.push(self.parse_or()?);
            }
        }
        self.expect(Tok::RParen, "')' after function arguments")?;

        let (min, max) = function.arity();
        if args.len() < min || args.len() > max {
            return Err(QueryError::Arity {
                name: name.to_string(),
                min,
                max,
                actual: args.len(),
            });
        }
        Ok(Expr::Call(function, args))
    }

    fn parse_path(&mut self) -> QueryResult<LocationPath> {
        let mut steps = Vec::new();
        let absolute = match self.peek() {
            Some(Tok::Slash) => {
                self.pos += 1;
                if !self.at_step_start() {
                    return Ok(LocationPath {
                        absolute: true,
                        steps,
                    });
                }
                true
            }
            Some(Tok::DoubleSlash) => {
                self.pos += 1;
                steps.push(descendant_or_self());
                true
            }
            _ => false,
        };

        steps.push(self.parse_step()?);
        loop {
            match self.peek() {
                Some(Tok::Slash) => {
                    self.pos += 1;
                }
                Some(Tok::DoubleSlash) => {
                    self.pos += 1;
                    steps.push(descendant_or_self());
                }
                _ => break,
            }
            steps.push(self.parse_step()?);
        }
        Ok(LocationPath { absolute, steps })
    }

    fn at_step_start(&self) -> bool {
        matches!(
            self.peek(),
            Some(Tok::Name(_) | Tok::Axis(_) | Tok::At | Tok::Star | Tok::Dot | Tok::DotDot)
        )
    }

    fn parse_step(&mut self) -> QueryResult<Step> {
        match self.peek() {
            Some(Tok::Dot) => {
                self.pos += 1;
                return Ok(Step {
                    axis: Axis::SelfNode,
                    test: NodeTest::Node,
                    predicates: Vec::new(),
                });
            }
            Some(Tok::DotDot) => {
                self.pos += 1;
                return Ok(Step {
                    axis: Axis::Parent,
                    test: NodeTest::Node,
                    predicates: Vec::new(),
                });
            }
            _ => {}
        }

        let axis = match self.peek() {
            Some(Tok::At) => {
                self.pos += 1;
                Axis::Attribute
            }
            Some(Tok::Axis(name)) => {
                let axis = match name.as_str() {
                    "child" => Axis::Child,
                    "descendant" => Axis::Descendant,
                    "descendant-or-self" => Axis::DescendantOrSelf,
                    "attribute" => Axis::Attribute,
                    "self" => Axis::SelfNode,
                    "parent" => Axis::Parent,
                    other => return Err(self.error(format!("unsupported axis '{other}'"))),
                };
                self.pos += 1;
                axis
            }
            _ => Axis::Child,
        };

        let test = match self.bump() {
            Some(Tok::Star) => NodeTest::AnyName { prefix: None },
            Some(Tok::Name(name)) => {
                if is_node_type(&name) && self.peek() == Some(&Tok::LParen) {
                    self.pos += 1;
                    self.expect(Tok::RParen, "')' after node type")?;
                    if name == "text" {
                        NodeTest::Text
                    } else {
                        NodeTest::Node
                    }
                } else if let Some(prefix) = name.strip_suffix(":*") {
                    NodeTest::AnyName {
                        prefix: Some(prefix.to_string()),
                    }
                } else {
                    let (prefix, local) = super::split_qname(&name);
                    NodeTest::Name { prefix, local }
                }
            }
            _ => {
                self.pos -= 1;
                return Err(self.error("expected a node test"));
            }
        };

        let mut predicates = Vec::new();
        while self.peek() == Some(&Tok::LBracket) {
            self.pos += 1;
            predicates.push(self.parse_or()?);
            self.expect(Tok::RBracket, "']'")?;
        }

        Ok(Step {
            axis,
            test,
            predicates,
        })
    }
}

fn is_node_type(name: &str) -> bool {
    matches!(name, "text" | "node")
}

fn descendant_or_self() -> Step {
    Step {
        axis: Axis::DescendantOrSelf,
        test: NodeTest::Node,
        predicates: Vec::new(),
    }
}

// ---------------------------------------------------------------------------
// Query
// ---------------------------------------------------------------------------

/// A parsed structural query that selects nodes.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    source: String,
    expr: Expr,
}

impl Query {
    /// Parse a query. The top-level expression must select nodes.
    pub fn parse(source: &str) -> QueryResult<Self> {
        let tokens = tokenize(source)?;
        let mut parser = Parser {
            query: source,
            tokens,
            pos: 0,
        };
        let expr = parser.parse_or()?;
        if parser.pos < parser.tokens.len() {
            return Err(parser.error("unexpected trailing input"));
        }
        if !matches!(expr, Expr::Path(_) | Expr::Union(..)) {
            return Err(QueryError::Syntax {
                query: source.to_string(),
                offset: 0,
                message: "query must select nodes".into(),
            });
        }
        Ok(Self {
            source: source.to_string(),
            expr,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Evaluate against `doc` with the document node as context, returning
    /// the selected nodes in document order.
    pub fn select(&self, doc: &XmlDocument, namespaces: &Namespaces) -> QueryResult<Vec<NodeRef>> {
        let eval = Evaluator { doc, namespaces };
        let ctx = Context {
            node: NodeRef::Node(NodeId::DOCUMENT),
            position: 1,
            size: 1,
        };
        match eval.eval(&self.expr, &ctx)? {
            Value::Nodes(nodes) => Ok(nodes),
            _ => Err(QueryError::Syntax {
                query: self.source.clone(),
                offset: 0,
                message: "query must select nodes".into(),
            }),
        }
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Value {
    Nodes(Vec<NodeRef>),
    String(String),
    Number(f64),
    Boolean(bool),
}

#[derive(Debug, Clone, Copy)]
struct Context {
    node: NodeRef,
    position: usize,
    size: usize,
}

/// A node test with its prefix resolved to a namespace URI.
enum ResolvedTest<'t> {
    Name {
        namespace: Option<String>,
        local: &'t str,
    },
    AnyName {
        namespace: Option<Option<String>>,
    },
    Text,
    Node,
}

struct Evaluator<'a> {
    doc: &'a XmlDocument,
    namespaces: &'a Namespaces,
}

impl<'a> Evaluator<'a> {
    fn eval(&self, expr: &Expr, ctx: &Context) -> QueryResult<Value> {
        Ok(match expr {
            Expr::Path(path) => Value::Nodes(self.eval_path(path, ctx.node)?),
            Expr::Literal(s) => Value::String(s.clone()),
            Expr::Number(n) => Value::Number(*n),
            Expr::Or(l, r) => {
                Value::Boolean(self.eval(l, ctx)?.boolean() || self.eval(r, ctx)?.boolean())
            }
            Expr::And(l, r) => {
                Value::Boolean(self.eval(l, ctx)?.boolean() && self.eval(r, ctx)?.boolean())
            }
            Expr::Compare(l, op, r) => {
                let left = self.eval(l, ctx)?;
                let right = self.eval(r, ctx)?;
                Value::Boolean(self.compare(&left, *op, &right))
            }
            Expr::Union(l, r) => {
                let (Value::Nodes(mut left), Value::Nodes(right)) =
                    (self.eval(l, ctx)?, self.eval(r, ctx)?)
                else {
                    return Err(QueryError::Syntax {
                        query: String::new(),
                        offset: 0,
                        message: "'|' requires node-sets on both sides".into(),
                    });
                };
                let seen: HashSet<NodeRef> = left.iter().copied().collect();
                left.extend(right.into_iter().filter(|n| !seen.contains(n)));
                left.sort_by_key(|n| n.order_key());
                Value::Nodes(left)
            }
            Expr::Call(function, args) => self.call(*function, args, ctx)?,
        })
    }

    fn call(&self, function: Function, args: &[Expr], ctx: &Context) -> QueryResult<Value> {
        let arg_string = |i: usize| -> QueryResult<String> {
            match args.get(i) {
                Some(arg) => Ok(self.string(&self.eval(arg, ctx)?)),
                None => Ok(ctx.node.string_value(self.doc)),
            }
        };
        Ok(match function {
            Function::Not => Value::Boolean(!self.eval(&args[0], ctx)?.boolean()),
            Function::Contains => Value::Boolean(arg_string(0)?.contains(&arg_string(1)?)),
            Function::StartsWith => Value::Boolean(arg_string(0)?.starts_with(&arg_string(1)?)),
            Function::NormalizeSpace => Value::String(
                arg_string(0)?
                    .split_whitespace()
                    .collect::<Vec<_>>()
                    .join(" "),
            ),
            Function::String => Value::String(arg_string(0)?),
            Function::Count => match self.eval(&args[0], ctx)? {
                Value::Nodes(nodes) => Value::Number(nodes.len() as f64),
                _ => {
                    return Err(QueryError::Syntax {
                        query: String::new(),
                        offset: 0,
                        message: "count() requires a node-set".into(),
                    });
                }
            },
            Function::Position => Value::Number(ctx.position as f64),
            Function::Last => Value::Number(ctx.size as f64),
        })
    }

    fn eval_path(&self, path: &LocationPath, context: NodeRef) -> QueryResult<Vec<NodeRef>> {
        let mut current = if path.absolute {
            vec![NodeRef::Node(NodeId::DOCUMENT)]
        } else {
            vec![context]
        };

        for step in &path.steps {
            let test = self.resolve_test(&step.test)?;
            let mut seen = HashSet::new();
            let mut next = Vec::new();
            for &node in &current {
                let mut candidates: Vec<NodeRef> = self
                    .axis(step.axis, node)
                    .into_iter()
                    .filter(|&n| self.matches(&test, n))
                    .collect();
                for predicate in &step.predicates {
                    candidates = self.filter(predicate, candidates)?;
                }
                next.extend(candidates.into_iter().filter(|n| seen.insert(*n)));
            }
            next.sort_by_key(|n| n.order_key());
            current = next;
        }
        Ok(current)
    }

    fn filter(&self, predicate: &Expr, nodes: Vec<NodeRef>) -> QueryResult<Vec<NodeRef>> {
        let size = nodes.len();
        let mut kept = Vec::with_capacity(size);
        for (i, node) in nodes.into_iter().enumerate() {
            let ctx = Context {
                node,
                position: i + 1,
                size,
            };
            let keep = match self.eval(predicate, &ctx)? {
                Value::Number(n) => n == (i + 1) as f64,
                other => other.boolean(),
            };
            if keep {
                kept.push(node);
            }
        }
        Ok(kept)
    }

    fn axis(&self, axis: Axis, node: NodeRef) -> Vec<NodeRef> {
        let doc = self.doc;
        match (axis, node) {
            (Axis::SelfNode, n) => vec![n],
            (Axis::Parent, NodeRef::Node(id)) => doc.parent(id).map(NodeRef::Node).into_iter().collect(),
            (Axis::Parent, NodeRef::Attribute(owner, _)) => vec![NodeRef::Node(owner)],
            (Axis::Child, NodeRef::Node(id)) => doc.children(id).iter().map(|&c| NodeRef::Node(c)).collect(),
            (Axis::Descendant, NodeRef::Node(id)) => doc.descendants(id).map(NodeRef::Node).collect(),
            (Axis::DescendantOrSelf, NodeRef::Node(id)) => std::iter::once(NodeRef::Node(id))
                .chain(doc.descendants(id).map(NodeRef::Node))
                .collect(),
            (Axis::DescendantOrSelf, n @ NodeRef::Attribute(..)) => vec![n],
            (Axis::Attribute, NodeRef::Node(id)) => (0..doc.attributes(id).len())
                .map(|i| NodeRef::Attribute(id, i))
                .collect(),
            (Axis::Child | Axis::Descendant | Axis::Attribute, NodeRef::Attribute(..)) => Vec::new(),
        }
    }

    fn resolve_test<'t>(&self, test: &'t NodeTest) -> QueryResult<ResolvedTest<'t>> {
        let resolve = |prefix: &str| -> QueryResult<String> {
            self.namespaces
                .resolve(prefix)
                .map(str::to_string)
                .ok_or_else(|| QueryError::UnboundPrefix {
                    prefix: prefix.to_string(),
                })
        };
        Ok(match test {
            NodeTest::Name { prefix, local } => ResolvedTest::Name {
                namespace: prefix.as_deref().map(resolve).transpose()?,
                local,
            },
            NodeTest::AnyName { prefix } => ResolvedTest::AnyName {
                namespace: prefix.as_deref().map(resolve).transpose()?.map(Some),
            },
            NodeTest::Text => ResolvedTest::Text,
            NodeTest::Node => ResolvedTest::Node,
        })
    }

    fn matches(&self, test: &ResolvedTest<'_>, node: NodeRef) -> bool {
        let name_matches = |name: &QName| match test {
            ResolvedTest::Name { namespace, local } => {
                name.local == *local && name.namespace.as_deref() == namespace.as_deref()
            }
            ResolvedTest::AnyName { namespace } => match namespace {
                Some(ns) => name.namespace.as_deref() == ns.as_deref(),
                None => true,
            },
            ResolvedTest::Node => true,
            ResolvedTest::Text => false,
        };
        match node {
            NodeRef::Attribute(owner, i) => name_matches(&self.doc.attributes(owner)[i].name),
            NodeRef::Node(id) => match self.doc.kind(id) {
                NodeKind::Element { name, .. } => name_matches(name),
                NodeKind::Text(_) => matches!(test, ResolvedTest::Text | ResolvedTest::Node),
                NodeKind::Document => matches!(test, ResolvedTest::Node),
            },
        }
    }

    fn string(&self, value: &Value) -> String {
        match value {
            Value::Nodes(nodes) => nodes
                .first()
                .map(|n| n.string_value(self.doc))
                .unwrap_or_default(),
            Value::String(s) => s.clone(),
            Value::Number(n) => format_number(*n),
            Value::Boolean(b) => b.to_string(),
        }
    }

    fn number(&self, value: &Value) -> f64 {
        match value {
            Value::Number(n) => *n,
            Value::Boolean(b) => f64::from(u8::from(*b)),
            other => parse_number(&self.string(other)),
        }
    }

    fn compare(&self, left: &Value, op: CmpOp, right: &Value) -> bool {
        match (left, right) {
            (Value::Nodes(a), Value::Boolean(_)) => {
                self.compare_atomic(&Value::Boolean(!a.is_empty()), op, right)
            }
            (Value::Boolean(_), Value::Nodes(b)) => {
                self.compare_atomic(left, op, &Value::Boolean(!b.is_empty()))
            }
            (Value::Nodes(a), Value::Nodes(b)) => {
                let right_strings: Vec<Value> = b
                    .iter()
                    .map(|n| Value::String(n.string_value(self.doc)))
                    .collect();
                a.iter().any(|n| {
                    let l = Value::String(n.string_value(self.doc));
                    right_strings.iter().any(|r| self.compare_atomic(&l, op, r))
                })
            }
            (Value::Nodes(a), other) => a.iter().any(|n| {
                self.compare_atomic(&Value::String(n.string_value(self.doc)), op, other)
            }),
            (other, Value::Nodes(b)) => b.iter().any(|n| {
                self.compare_atomic(other, op, &Value::String(n.string_value(self.doc)))
            }),
            _ => self.compare_atomic(left, op, right),
        }
    }

    fn compare_atomic(&self, left: &Value, op: CmpOp, right: &Value) -> bool {
        match op {
            CmpOp::Eq | CmpOp::Ne => {
                let equal = match (left, right) {
                    (Value::Boolean(_), _) | (_, Value::Boolean(_)) => left.boolean() == right.boolean(),
                    (Value::Number(_), _) | (_, Value::Number(_)) => {
                        self.number(left) == self.number(right)
                    }
                    _ => self.string(left) == self.string(right),
                };
                equal == (op == CmpOp::Eq)
            }
            CmpOp::Lt => self.number(left) < self.number(right),
            CmpOp::Le => self.number(left) <= self.number(right),
            CmpOp::Gt => self.number(left) > self.number(right),
            CmpOp::Ge => self.number(left) >= self.number(right),
        }
    }
}

impl Value {
    fn boolean(&self) -> bool {
        match self {
            Value::Nodes(nodes) => !nodes.is_empty(),
            Value::String(s) => !s.is_empty(),
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Boolean(b) => *b,
        }
    }
}

fn parse_number(s: &str) -> f64 {
    s.trim().parse::<f64>().unwrap_or(f64::NAN)
}

fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_finite() && n.fract() == 0.0 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

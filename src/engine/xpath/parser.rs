//! XPath expression parser
//!
//! Recursive descent over the token list, producing the tree that `eval`
//! walks. Precedence from loosest to tightest: or, and, equality,
//! relational, additive, multiplicative, unary minus, union, path.

use super::lexer::{tokenize, Token};

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Literal(String),
    Variable(String),
    Call(String, Vec<Expr>),
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Negate(Box<Expr>),
    Path(LocationPath),
    /// A primary expression filtered by predicates and optionally continued
    /// with location steps, e.g. `(//a)[1]/b`.
    Filter {
        base: Box<Expr>,
        predicates: Vec<Expr>,
        steps: Vec<Step>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Union,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LocationPath {
    pub absolute: bool,
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub axis: Axis,
    pub test: NodeTest,
    pub predicates: Vec<Expr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Ancestor,
    AncestorOrSelf,
    Attribute,
    Child,
    Descendant,
    DescendantOrSelf,
    Following,
    FollowingSibling,
    Namespace,
    Parent,
    Preceding,
    PrecedingSibling,
    SelfAxis,
}

impl Axis {
    /// Reverse axes walk away from the document start; predicate positions
    /// count along that direction.
    pub fn is_reverse(self) -> bool {
        matches!(
            self,
            Axis::Ancestor | Axis::AncestorOrSelf | Axis::Preceding | Axis::PrecedingSibling
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeTest {
    /// `*`
    Any,
    /// Unprefixed name; matches only nodes without a namespace
    Name(String),
    /// `prefix:local`, resolved against the registered namespaces
    QName(String, String),
    /// `prefix:*`
    NsWildcard(String),
    Node,
    Text,
    Comment,
    Pi(Option<String>),
}

/// Parse a complete expression.
pub fn parse(query: &str) -> Result<Expr, String> {
    let tokens = tokenize(query)?;
    if tokens.is_empty() {
        return Err("Invalid expression".to_string());
    }
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_or()?;
    if parser.pos != parser.tokens.len() {
        return Err("Invalid expression".to_string());
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset)
    }

    fn bump(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token) -> Result<(), String> {
        if self.eat(token) {
            Ok(())
        } else {
            Err("Invalid expression".to_string())
        }
    }

    // ------------------------------------------------------------------
    // Expression levels
    // ------------------------------------------------------------------

    fn parse_or(&mut self) -> Result<Expr, String> {
        let mut lhs = self.parse_and()?;
        while self.eat(&Token::Or) {
            let rhs = self.parse_and()?;
            lhs = binary(BinaryOp::Or, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, String> {
        let mut lhs = self.parse_equality()?;
        while self.eat(&Token::And) {
            let rhs = self.parse_equality()?;
            lhs = binary(BinaryOp::And, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_equality(&mut self) -> Result<Expr, String> {
        let mut lhs = self.parse_relational()?;
        loop {
            let op = match self.peek() {
                Some(Token::Eq) => BinaryOp::Eq,
                Some(Token::NotEq) => BinaryOp::NotEq,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.parse_relational()?;
            lhs = binary(op, lhs, rhs);
        }
    }

    fn parse_relational(&mut self) -> Result<Expr, String> {
        let mut lhs = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                Some(Token::Lt) => BinaryOp::Lt,
                Some(Token::LtEq) => BinaryOp::LtEq,
                Some(Token::Gt) => BinaryOp::Gt,
                Some(Token::GtEq) => BinaryOp::GtEq,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.parse_additive()?;
            lhs = binary(op, lhs, rhs);
        }
    }

    fn parse_additive(&mut self) -> Result<Expr, String> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.parse_multiplicative()?;
            lhs = binary(op, lhs, rhs);
        }
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, String> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Div) => BinaryOp::Div,
                Some(Token::Mod) => BinaryOp::Mod,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.parse_unary()?;
            lhs = binary(op, lhs, rhs);
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, String> {
        if self.eat(&Token::Minus) {
            let operand = self.parse_unary()?;
            return Ok(Expr::Negate(Box::new(operand)));
        }
        self.parse_union()
    }

    fn parse_union(&mut self) -> Result<Expr, String> {
        let mut lhs = self.parse_path()?;
        while self.eat(&Token::Pipe) {
            let rhs = self.parse_path()?;
            lhs = binary(BinaryOp::Union, lhs, rhs);
        }
        Ok(lhs)
    }

    // ------------------------------------------------------------------
    // Paths
    // ------------------------------------------------------------------

    fn parse_path(&mut self) -> Result<Expr, String> {
        match self.peek() {
            Some(Token::Slash) => {
                self.pos += 1;
                let mut steps = Vec::new();
                if self.starts_step() {
                    self.parse_steps(&mut steps)?;
                }
                Ok(Expr::Path(LocationPath { absolute: true, steps }))
            }
            Some(Token::DoubleSlash) => {
                self.pos += 1;
                let mut steps = vec![descendant_or_self_step()];
                if !self.starts_step() {
                    return Err("Invalid expression".to_string());
                }
                self.parse_steps(&mut steps)?;
                Ok(Expr::Path(LocationPath { absolute: true, steps }))
            }
            Some(Token::Name(_) | Token::QName(..))
                if !matches!(self.peek_at(1), Some(Token::LeftParen)) =>
            {
                self.parse_relative_path()
            }
            Some(
                Token::NsWildcard(_)
                | Token::Star
                | Token::At
                | Token::Dot
                | Token::DoubleDot
                | Token::Axis(_)
                | Token::NodeType(_),
            ) => self.parse_relative_path(),
            _ => self.parse_filter(),
        }
    }

    fn parse_relative_path(&mut self) -> Result<Expr, String> {
        let mut steps = Vec::new();
        self.parse_steps(&mut steps)?;
        Ok(Expr::Path(LocationPath {
            absolute: false,
            steps,
        }))
    }

    fn parse_steps(&mut self, steps: &mut Vec<Step>) -> Result<(), String> {
        loop {
            steps.push(self.parse_step()?);
            if self.eat(&Token::Slash) {
            } else if self.eat(&Token::DoubleSlash) {
                steps.push(descendant_or_self_step());
            } else {
                return Ok(());
            }
            if !self.starts_step() {
                return Err("Invalid expression".to_string());
            }
        }
    }

    fn starts_step(&self) -> bool {
        matches!(
            self.peek(),
            Some(
                Token::Name(_)
                    | Token::QName(..)
                    | Token::NsWildcard(_)
                    | Token::Star
                    | Token::At
                    | Token::Dot
                    | Token::DoubleDot
                    | Token::Axis(_)
                    | Token::NodeType(_)
            )
        )
    }

    fn parse_step(&mut self) -> Result<Step, String> {
        match self.peek() {
            Some(Token::Dot) => {
                self.pos += 1;
                Ok(Step {
                    axis: Axis::SelfAxis,
                    test: NodeTest::Node,
                    predicates: Vec::new(),
                })
            }
            Some(Token::DoubleDot) => {
                self.pos += 1;
                Ok(Step {
                    axis: Axis::Parent,
                    test: NodeTest::Node,
                    predicates: Vec::new(),
                })
            }
            Some(Token::At) => {
                self.pos += 1;
                let test = self.parse_node_test()?;
                let predicates = self.parse_predicates()?;
                Ok(Step {
                    axis: Axis::Attribute,
                    test,
                    predicates,
                })
            }
            Some(Token::Axis(_)) => {
                let Some(Token::Axis(name)) = self.bump() else {
                    return Err("Invalid expression".to_string());
                };
                let axis = axis_from_name(&name)?;
                let test = self.parse_node_test()?;
                let predicates = self.parse_predicates()?;
                Ok(Step {
                    axis,
                    test,
                    predicates,
                })
            }
            _ => {
                let test = self.parse_node_test()?;
                let predicates = self.parse_predicates()?;
                Ok(Step {
                    axis: Axis::Child,
                    test,
                    predicates,
                })
            }
        }
    }

    fn parse_node_test(&mut self) -> Result<NodeTest, String> {
        match self.bump() {
            Some(Token::Star) => Ok(NodeTest::Any),
            Some(Token::Name(name)) => Ok(NodeTest::Name(name)),
            Some(Token::QName(prefix, local)) => Ok(NodeTest::QName(prefix, local)),
            Some(Token::NsWildcard(prefix)) => Ok(NodeTest::NsWildcard(prefix)),
            Some(Token::NodeType(kind)) => {
                self.expect(&Token::LeftParen)?;
                let test = match kind.as_str() {
                    "node" => NodeTest::Node,
                    "text" => NodeTest::Text,
                    "comment" => NodeTest::Comment,
                    _ => {
                        let target = match self.peek() {
                            Some(Token::Literal(_)) => {
                                let Some(Token::Literal(s)) = self.bump() else {
                                    return Err("Invalid expression".to_string());
                                };
                                Some(s)
                            }
                            _ => None,
                        };
                        NodeTest::Pi(target)
                    }
                };
                self.expect(&Token::RightParen)?;
                Ok(test)
            }
            _ => Err("Invalid expression".to_string()),
        }
    }

    fn parse_predicates(&mut self) -> Result<Vec<Expr>, String> {
        let mut predicates = Vec::new();
        while self.eat(&Token::LeftBracket) {
            let expr = self
                .parse_or()
                .map_err(|_| "Invalid predicate".to_string())?;
            if !self.eat(&Token::RightBracket) {
                return Err("Invalid predicate".to_string());
            }
            predicates.push(expr);
        }
        Ok(predicates)
    }

    // ------------------------------------------------------------------
    // Primaries
    // ------------------------------------------------------------------

    /// Primary expression plus its predicates and any trailing steps.
    fn parse_filter(&mut self) -> Result<Expr, String> {
        let base = self.parse_primary()?;
        let predicates = self.parse_predicates()?;
        let mut steps = Vec::new();
        let continued = if self.eat(&Token::Slash) {
            true
        } else if self.eat(&Token::DoubleSlash) {
            steps.push(descendant_or_self_step());
            true
        } else {
            false
        };
        if continued {
            if !self.starts_step() {
                return Err("Invalid expression".to_string());
            }
            self.parse_steps(&mut steps)?;
        }
        if predicates.is_empty() && steps.is_empty() {
            Ok(base)
        } else {
            Ok(Expr::Filter {
                base: Box::new(base),
                predicates,
                steps,
            })
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, String> {
        match self.bump() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Literal(s)) => Ok(Expr::Literal(s)),
            Some(Token::Dollar) => match self.bump() {
                Some(Token::Name(name)) => Ok(Expr::Variable(name)),
                Some(Token::QName(prefix, local)) => Ok(Expr::Variable(format!("{prefix}:{local}"))),
                _ => Err("Invalid expression".to_string()),
            },
            Some(Token::LeftParen) => {
                let inner = self.parse_or()?;
                self.expect(&Token::RightParen)?;
                Ok(inner)
            }
            Some(Token::Name(name)) => {
                self.expect(&Token::LeftParen)?;
                let args = self.parse_args()?;
                Ok(Expr::Call(name, args))
            }
            Some(Token::QName(prefix, local)) => {
                self.expect(&Token::LeftParen)?;
                let args = self.parse_args()?;
                Ok(Expr::Call(format!("{prefix}:{local}"), args))
            }
            _ => Err("Invalid expression".to_string()),
        }
    }

    fn parse_args(&mut self) -> Result<Vec<Expr>, String> {
        let mut args = Vec::new();
        if self.eat(&Token::RightParen) {
            return Ok(args);
        }
        loop {
            args.push(self.parse_or()?);
            if self.eat(&Token::Comma) {
                continue;
            }
            self.expect(&Token::RightParen)?;
            return Ok(args);
        }
    }
}

fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    }
}

fn descendant_or_self_step() -> Step {
    Step {
        axis: Axis::DescendantOrSelf,
        test: NodeTest::Node,
        predicates: Vec::new(),
    }
}

fn axis_from_name(name: &str) -> Result<Axis, String> {
    match name {
        "ancestor" => Ok(Axis::Ancestor),
        "ancestor-or-self" => Ok(Axis::AncestorOrSelf),
        "attribute" => Ok(Axis::Attribute),
        "child" => Ok(Axis::Child),
        "descendant" => Ok(Axis::Descendant),
        "descendant-or-self" => Ok(Axis::DescendantOrSelf),
        "following" => Ok(Axis::Following),
        "following-sibling" => Ok(Axis::FollowingSibling),
        "namespace" => Ok(Axis::Namespace),
        "parent" => Ok(Axis::Parent),
        "preceding" => Ok(Axis::Preceding),
        "preceding-sibling" => Ok(Axis::PrecedingSibling),
        "self" => Ok(Axis::SelfAxis),
        _ => Err("Invalid expression".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(axis: Axis, test: NodeTest) -> Step {
        Step {
            axis,
            test,
            predicates: Vec::new(),
        }
    }

    #[test]
    fn test_absolute_path_with_predicate() {
        let expr = parse("/a/b[2]").expect("parse");
        let Expr::Path(path) = expr else {
            panic!("expected a path");
        };
        assert!(path.absolute);
        assert_eq!(path.steps.len(), 2);
        assert_eq!(path.steps[0], step(Axis::Child, NodeTest::Name("a".to_string())));
        assert_eq!(path.steps[1].test, NodeTest::Name("b".to_string()));
        assert_eq!(path.steps[1].predicates, vec![Expr::Number(2.0)]);
    }

    #[test]
    fn test_double_slash_inserts_descendant_step() {
        let expr = parse("//b").expect("parse");
        let Expr::Path(path) = expr else {
            panic!("expected a path");
        };
        assert!(path.absolute);
        assert_eq!(
            path.steps,
            vec![
                step(Axis::DescendantOrSelf, NodeTest::Node),
                step(Axis::Child, NodeTest::Name("b".to_string())),
            ]
        );
    }

    #[test]
    fn test_attribute_abbreviation() {
        let expr = parse("@id").expect("parse");
        assert_eq!(
            expr,
            Expr::Path(LocationPath {
                absolute: false,
                steps: vec![step(Axis::Attribute, NodeTest::Name("id".to_string()))],
            })
        );
    }

    #[test]
    fn test_explicit_axes_and_qualified_tests() {
        let expr = parse("ancestor-or-self::p:*/self::node()").expect("parse");
        let Expr::Path(path) = expr else {
            panic!("expected a path");
        };
        assert_eq!(
            path.steps,
            vec![
                step(Axis::AncestorOrSelf, NodeTest::NsWildcard("p".to_string())),
                step(Axis::SelfAxis, NodeTest::Node),
            ]
        );
    }

    #[test]
    fn test_arithmetic_precedence() {
        let expr = parse("1 + 2 * 3").expect("parse");
        assert_eq!(
            expr,
            Expr::Binary {
                op: BinaryOp::Add,
                lhs: Box::new(Expr::Number(1.0)),
                rhs: Box::new(Expr::Binary {
                    op: BinaryOp::Mul,
                    lhs: Box::new(Expr::Number(2.0)),
                    rhs: Box::new(Expr::Number(3.0)),
                }),
            }
        );
    }

    #[test]
    fn test_unary_minus_binds_looser_than_union() {
        let expr = parse("-a | b").expect("parse");
        let Expr::Negate(inner) = expr else {
            panic!("expected a negation");
        };
        assert!(matches!(
            *inner,
            Expr::Binary {
                op: BinaryOp::Union,
                ..
            }
        ));
    }

    #[test]
    fn test_function_call() {
        let expr = parse("contains(., 'x')").expect("parse");
        let Expr::Call(name, args) = expr else {
            panic!("expected a call");
        };
        assert_eq!(name, "contains");
        assert_eq!(args.len(), 2);
        assert_eq!(args[1], Expr::Literal("x".to_string()));
    }

    #[test]
    fn test_filtered_primary_with_trailing_steps() {
        let expr = parse("(//a)[1]/b").expect("parse");
        let Expr::Filter {
            base,
            predicates,
            steps,
        } = expr
        else {
            panic!("expected a filter");
        };
        assert!(matches!(*base, Expr::Path(_)));
        assert_eq!(predicates, vec![Expr::Number(1.0)]);
        assert_eq!(steps, vec![step(Axis::Child, NodeTest::Name("b".to_string()))]);
    }

    #[test]
    fn test_variable_reference() {
        assert_eq!(parse("$x").expect("parse"), Expr::Variable("x".to_string()));
    }

    #[test]
    fn test_processing_instruction_target() {
        let expr = parse("processing-instruction('style')").expect("parse");
        let Expr::Path(path) = expr else {
            panic!("expected a path");
        };
        assert_eq!(path.steps[0].test, NodeTest::Pi(Some("style".to_string())));
    }

    #[test]
    fn test_errors() {
        assert_eq!(parse(""), Err("Invalid expression".to_string()));
        assert_eq!(parse("a[1"), Err("Invalid predicate".to_string()));
        assert_eq!(parse("/a b"), Err("Invalid expression".to_string()));
        assert_eq!(parse("unknown-axis::a"), Err("Invalid expression".to_string()));
        assert_eq!(parse("'open"), Err("Unfinished literal".to_string()));
    }
}

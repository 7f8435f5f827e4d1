//! XPath lexer
//!
//! Tokenizes a whole expression up front. Qualified names carry their
//! prefix split out; `and`, `or`, `div` and `mod` are operators only where
//! an operator may appear, which is how the language disambiguates them
//! from element names.

/// XPath token types
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Operators
    Slash,       // /
    DoubleSlash, // //
    Dot,         // .
    DoubleDot,   // ..
    At,          // @
    Pipe,        // |
    Plus,        // +
    Minus,       // -
    Star,        // *
    Eq,          // =
    NotEq,       // !=
    Lt,          // <
    LtEq,        // <=
    Gt,          // >
    GtEq,        // >=
    And,         // and
    Or,          // or
    Mod,         // mod
    Div,         // div

    // Brackets
    LeftParen,    // (
    RightParen,   // )
    LeftBracket,  // [
    RightBracket, // ]

    // Literals
    Number(f64),
    Literal(String),

    // Names
    Name(String),             // NCName
    QName(String, String),    // prefix:local
    NsWildcard(String),       // prefix:*
    NodeType(String),         // node(), text(), comment(), processing-instruction()
    Axis(String),             // child::, descendant::, ... with the :: consumed

    // Special
    Comma,  // ,
    Dollar, // $
}

/// Tokenize a complete expression.
pub fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    Lexer { input, pos: 0 }.run()
}

struct Lexer<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn remaining(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.remaining().chars().next()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.remaining().chars().nth(offset)
    }

    fn advance(&mut self, n: usize) {
        self.pos = (self.pos + n).min(self.input.len());
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.advance(c.len_utf8());
            } else {
                break;
            }
        }
    }

    fn run(mut self) -> Result<Vec<Token>, String> {
        let mut tokens: Vec<Token> = Vec::new();
        loop {
            self.skip_whitespace();
            let Some(c) = self.peek() else {
                return Ok(tokens);
            };
            let token = self.next_token(c, tokens.last())?;
            tokens.push(token);
        }
    }

    fn next_token(&mut self, c: char, prev: Option<&Token>) -> Result<Token, String> {
        match c {
            '/' => {
                self.advance(1);
                if self.peek() == Some('/') {
                    self.advance(1);
                    Ok(Token::DoubleSlash)
                } else {
                    Ok(Token::Slash)
                }
            }
            '.' => {
                if self.peek_at(1).is_some_and(|n| n.is_ascii_digit()) {
                    return Ok(self.read_number());
                }
                self.advance(1);
                if self.peek() == Some('.') {
                    self.advance(1);
                    Ok(Token::DoubleDot)
                } else {
                    Ok(Token::Dot)
                }
            }
            '@' => {
                self.advance(1);
                Ok(Token::At)
            }
            '|' => {
                self.advance(1);
                Ok(Token::Pipe)
            }
            '+' => {
                self.advance(1);
                Ok(Token::Plus)
            }
            '-' => {
                self.advance(1);
                Ok(Token::Minus)
            }
            '*' => {
                self.advance(1);
                Ok(Token::Star)
            }
            '=' => {
                self.advance(1);
                Ok(Token::Eq)
            }
            '!' => {
                self.advance(1);
                if self.peek() == Some('=') {
                    self.advance(1);
                    Ok(Token::NotEq)
                } else {
                    Err("Invalid expression".to_string())
                }
            }
            '<' => {
                self.advance(1);
                if self.peek() == Some('=') {
                    self.advance(1);
                    Ok(Token::LtEq)
                } else {
                    Ok(Token::Lt)
                }
            }
            '>' => {
                self.advance(1);
                if self.peek() == Some('=') {
                    self.advance(1);
                    Ok(Token::GtEq)
                } else {
                    Ok(Token::Gt)
                }
            }
            '(' => {
                self.advance(1);
                Ok(Token::LeftParen)
            }
            ')' => {
                self.advance(1);
                Ok(Token::RightParen)
            }
            '[' => {
                self.advance(1);
                Ok(Token::LeftBracket)
            }
            ']' => {
                self.advance(1);
                Ok(Token::RightBracket)
            }
            ',' => {
                self.advance(1);
                Ok(Token::Comma)
            }
            '$' => {
                self.advance(1);
                Ok(Token::Dollar)
            }
            '"' | '\'' => self.read_literal(c),
            '0'..='9' => Ok(self.read_number()),
            _ if is_name_start_char(c) => Ok(self.read_name_or_keyword(prev)),
            _ => Err("Invalid expression".to_string()),
        }
    }

    fn read_number(&mut self) -> Token {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.advance(1);
        }
        if self.peek() == Some('.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
            self.advance(1);
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.advance(1);
            }
        }
        let value = self.input[start..self.pos].parse().unwrap_or(f64::NAN);
        Token::Number(value)
    }

    fn read_literal(&mut self, quote: char) -> Result<Token, String> {
        self.advance(1);
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c == quote {
                let value = self.input[start..self.pos].to_string();
                self.advance(1);
                return Ok(Token::Literal(value));
            }
            self.advance(c.len_utf8());
        }
        Err("Unfinished literal".to_string())
    }

    fn read_ncname(&mut self) -> &'a str {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if is_name_char(c) {
                self.advance(c.len_utf8());
            } else {
                break;
            }
        }
        &self.input[start..self.pos]
    }

    fn read_name_or_keyword(&mut self, prev: Option<&Token>) -> Token {
        let name = self.read_ncname();

        if operand_done(prev) {
            match name {
                "and" => return Token::And,
                "or" => return Token::Or,
                "mod" => return Token::Mod,
                "div" => return Token::Div,
                _ => {}
            }
        }

        // A colon directly after the name makes it an axis or a QName.
        if self.peek() == Some(':') {
            match self.peek_at(1) {
                Some(':') => {
                    self.advance(2);
                    return Token::Axis(name.to_string());
                }
                Some('*') => {
                    self.advance(2);
                    return Token::NsWildcard(name.to_string());
                }
                Some(c) if is_name_start_char(c) => {
                    self.advance(1);
                    let local = self.read_ncname();
                    return Token::QName(name.to_string(), local.to_string());
                }
                _ => {}
            }
        }

        self.skip_whitespace();
        if self.remaining().starts_with("::") {
            self.advance(2);
            return Token::Axis(name.to_string());
        }
        if self.peek() == Some('(') {
            if let "node" | "text" | "comment" | "processing-instruction" = name {
                return Token::NodeType(name.to_string());
            }
        }
        Token::Name(name.to_string())
    }
}

/// True when the previous token completes an operand, which is the rule
/// that turns the following `and`/`or`/`div`/`mod` into an operator.
fn operand_done(prev: Option<&Token>) -> bool {
    !matches!(
        prev,
        None | Some(
            Token::At
                | Token::Axis(_)
                | Token::LeftParen
                | Token::LeftBracket
                | Token::Comma
                | Token::Dollar
                | Token::Slash
                | Token::DoubleSlash
                | Token::Pipe
                | Token::Plus
                | Token::Minus
                | Token::Star
                | Token::Eq
                | Token::NotEq
                | Token::Lt
                | Token::LtEq
                | Token::Gt
                | Token::GtEq
                | Token::And
                | Token::Or
                | Token::Mod
                | Token::Div
        )
    )
}

fn is_name_start_char(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-' || c == '.'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(input: &str) -> Vec<Token> {
        tokenize(input).expect("tokenize failed")
    }

    #[test]
    fn test_simple_path() {
        assert_eq!(
            lex("/root/child"),
            vec![
                Token::Slash,
                Token::Name("root".to_string()),
                Token::Slash,
                Token::Name("child".to_string()),
            ]
        );
    }

    #[test]
    fn test_qualified_names() {
        assert_eq!(
            lex("/p:a//q:*"),
            vec![
                Token::Slash,
                Token::QName("p".to_string(), "a".to_string()),
                Token::DoubleSlash,
                Token::NsWildcard("q".to_string()),
            ]
        );
    }

    #[test]
    fn test_axis_and_node_type() {
        assert_eq!(
            lex("ancestor-or-self::node()"),
            vec![
                Token::Axis("ancestor-or-self".to_string()),
                Token::NodeType("node".to_string()),
                Token::LeftParen,
                Token::RightParen,
            ]
        );
    }

    #[test]
    fn test_predicate() {
        assert_eq!(
            lex("item[@id='test']"),
            vec![
                Token::Name("item".to_string()),
                Token::LeftBracket,
                Token::At,
                Token::Name("id".to_string()),
                Token::Eq,
                Token::Literal("test".to_string()),
                Token::RightBracket,
            ]
        );
    }

    #[test]
    fn test_operator_disambiguation() {
        // An element really named "div", divided by another one.
        assert_eq!(
            lex("div div div"),
            vec![
                Token::Name("div".to_string()),
                Token::Div,
                Token::Name("div".to_string()),
            ]
        );
    }

    #[test]
    fn test_numbers() {
        assert_eq!(
            lex("1.5 + .5"),
            vec![Token::Number(1.5), Token::Plus, Token::Number(0.5)]
        );
    }

    #[test]
    fn test_unfinished_literal() {
        assert_eq!(tokenize("'abc"), Err("Unfinished literal".to_string()));
    }

    #[test]
    fn test_invalid_character() {
        assert_eq!(tokenize("a # b"), Err("Invalid expression".to_string()));
    }
}

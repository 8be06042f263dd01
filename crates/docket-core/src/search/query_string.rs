//! Free-text query syntax.
//!
//! Supported: bare terms (default operator OR), `AND` / `OR` / `NOT` (and `&&`,
//! `||`, `!`), `+term` / `-term`, parentheses, quoted phrases, `term~N` fuzzy
//! terms, `"a phrase"~N` sloppy phrases, `prefix*` and `*`.

use std::iter::Peekable;
use std::str::Chars;

/// Groups and negations nested deeper than this are rejected.
pub const MAX_NESTING_DEPTH: usize = 64;

/// Parsed free-text query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextQuery {
    All,
    Term { text: String, fuzziness: Option<u32> },
    Prefix(String),
    Phrase { text: String, slop: u32 },
    And(Vec<TextQuery>),
    Or(Vec<TextQuery>),
    Not(Box<TextQuery>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Word(String),
    Quoted(String),
    Tilde(Option<u32>),
    LParen,
    RParen,
    And,
    Or,
    Not,
    Plus,
    Minus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Occur {
    Must,
    Should,
    MustNot,
}

/// Parse `input`. The error is the parser detail, without the query itself.
pub fn parse(input: &str) -> Result<TextQuery, String> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err("empty query".to_string());
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let query = parser.parse_or()?;
    match parser.peek() {
        None => Ok(query),
        Some(token) => Err(format!("unexpected {} at position {}", describe(token), parser.pos)),
    }
}

fn describe(token: &Token) -> String {
    match token {
        Token::Word(w) => format!("term [{w}]"),
        Token::Quoted(q) => format!("phrase [\"{q}\"]"),
        Token::Tilde(_) => "'~'".to_string(),
        Token::LParen => "'('".to_string(),
        Token::RParen => "')'".to_string(),
        Token::And => "operator AND".to_string(),
        Token::Or => "operator OR".to_string(),
        Token::Not => "operator NOT".to_string(),
        Token::Plus => "'+'".to_string(),
        Token::Minus => "'-'".to_string(),
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();
    // `+` / `-` are modifiers only at the start of a clause.
    let mut at_clause_start = true;

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
                at_clause_start = true;
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
                at_clause_start = true;
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
                at_clause_start = false;
            }
            '"' => {
                chars.next();
                let mut phrase = String::new();
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => {
                            if let Some(escaped) = chars.next() {
                                phrase.push(escaped);
                            }
                        }
                        Some(other) => phrase.push(other),
                        None => return Err("Unexpected char: unterminated phrase, missing '\"'".to_string()),
                    }
                }
                tokens.push(Token::Quoted(phrase));
                at_clause_start = false;
            }
            '~' => {
                chars.next();
                tokens.push(Token::Tilde(read_number(&mut chars)?));
                at_clause_start = false;
            }
            '+' | '-' | '!' if at_clause_start => {
                chars.next();
                tokens.push(match c {
                    '+' => Token::Plus,
                    '-' => Token::Minus,
                    _ => Token::Not,
                });
            }
            _ => {
                let word = read_word(&mut chars);
                tokens.push(match word.as_str() {
                    "AND" | "&&" => Token::And,
                    "OR" | "||" => Token::Or,
                    "NOT" => Token::Not,
                    _ => Token::Word(word),
                });
                at_clause_start = false;
            }
        }
    }
    Ok(tokens)
}

fn read_word(chars: &mut Peekable<Chars<'_>>) -> String {
    let mut word = String::new();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() || matches!(c, '(' | ')' | '"' | '~') {
            break;
        }
        if c == '\\' {
            chars.next();
            if let Some(escaped) = chars.next() {
                word.push(escaped);
            }
            continue;
        }
        word.push(c);
        chars.next();
    }
    word
}

fn read_number(chars: &mut Peekable<Chars<'_>>) -> Result<Option<u32>, String> {
    let mut digits = String::new();
    while let Some(&c) = chars.peek() {
        if !c.is_ascii_digit() {
            break;
        }
        digits.push(c);
        chars.next();
    }
    if digits.is_empty() {
        return Ok(None);
    }
    digits
        .parse()
        .map(Some)
        .map_err(|_| format!("invalid distance [{digits}] after '~'"))
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn descend(&mut self) -> Result<(), String> {
        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH {
            return Err(format!("query nested too deeply, more than {MAX_NESTING_DEPTH} levels"));
        }
        Ok(())
    }

    fn starts_clause(token: &Token) -> bool {
        matches!(
            token,
            Token::Word(_) | Token::Quoted(_) | Token::LParen | Token::Not | Token::Plus | Token::Minus
        )
    }

    /// Clauses joined by OR or juxtaposition.
    fn parse_or(&mut self) -> Result<TextQuery, String> {
        let mut clauses = vec![self.parse_and()?];
        loop {
            match self.peek() {
                Some(Token::Or) => {
                    self.next();
                    match self.peek() {
                        Some(token) if Self::starts_clause(token) => clauses.push(self.parse_and()?),
                        Some(token) => return Err(format!("unexpected {} after OR", describe(token))),
                        None => return Err("unexpected end of query after OR".to_string()),
                    }
                }
                Some(token) if Self::starts_clause(token) => clauses.push(self.parse_and()?),
                _ => break,
            }
        }
        Ok(combine(clauses))
    }

    /// Clauses joined by AND.
    fn parse_and(&mut self) -> Result<(Occur, TextQuery), String> {
        let first = self.parse_unary()?;
        if self.peek() != Some(&Token::And) {
            return Ok(first);
        }
        let mut operands = vec![as_operand(first)];
        while self.peek() == Some(&Token::And) {
            self.next();
            match self.peek() {
                Some(token) if Self::starts_clause(token) => operands.push(as_operand(self.parse_unary()?)),
                Some(token) => return Err(format!("unexpected {} after AND", describe(token))),
                None => return Err("unexpected end of query after AND".to_string()),
            }
        }
        Ok((Occur::Should, TextQuery::And(operands)))
    }

    fn parse_unary(&mut self) -> Result<(Occur, TextQuery), String> {
        match self.peek() {
            Some(Token::Not) | Some(Token::Minus) => {
                self.next();
                self.descend()?;
                let (_, inner) = self.parse_unary()?;
                self.depth -= 1;
                Ok((Occur::MustNot, inner))
            }
            Some(Token::Plus) => {
                self.next();
                Ok((Occur::Must, self.parse_primary()?))
            }
            _ => Ok((Occur::Should, self.parse_primary()?)),
        }
    }

    fn parse_primary(&mut self) -> Result<TextQuery, String> {
        match self.next() {
            Some(Token::LParen) => {
                if self.peek() == Some(&Token::RParen) {
                    return Err("empty group '()'".to_string());
                }
                self.descend()?;
                let inner = self.parse_or()?;
                self.depth -= 1;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err("Unexpected char: missing ')'".to_string()),
                }
            }
            Some(Token::Quoted(text)) => {
                let slop = self.take_tilde().unwrap_or(0);
                Ok(TextQuery::Phrase { text, slop })
            }
            Some(Token::Word(word)) => {
                let fuzziness = self.take_tilde();
                if word == "*" {
                    Ok(TextQuery::All)
                } else if let Some(prefix) = word.strip_suffix('*') {
                    Ok(TextQuery::Prefix(prefix.to_string()))
                } else {
                    Ok(TextQuery::Term {
                        text: word,
                        fuzziness,
                    })
                }
            }
            Some(token) => Err(format!("unexpected {}", describe(&token))),
            None => Err("unexpected end of query".to_string()),
        }
    }

    /// `~` / `~N` after a term or phrase. Bare `~` means distance 2.
    fn take_tilde(&mut self) -> Option<u32> {
        match self.peek() {
            Some(Token::Tilde(n)) => {
                let n = n.unwrap_or(2);
                self.pos += 1;
                Some(n)
            }
            _ => None,
        }
    }
}

fn as_operand((occur, query): (Occur, TextQuery)) -> TextQuery {
    match occur {
        Occur::MustNot => TextQuery::Not(Box::new(query)),
        _ => query,
    }
}

/// Required clauses must all match; optional ones only matter when nothing is
/// required; prohibited ones must not match.
fn combine(clauses: Vec<(Occur, TextQuery)>) -> TextQuery {
    if clauses.len() == 1 && clauses[0].0 == Occur::Should {
        return clauses.into_iter().next().map(|(_, q)| q).unwrap_or(TextQuery::All);
    }
    let mut required = Vec::new();
    let mut optional = Vec::new();
    let mut prohibited = Vec::new();
    for (occur, query) in clauses {
        match occur {
            Occur::Must => required.push(query),
            Occur::Should => optional.push(query),
            Occur::MustNot => prohibited.push(TextQuery::Not(Box::new(query))),
        }
    }
    if required.is_empty() && !optional.is_empty() {
        required.push(if optional.len() == 1 {
            optional.remove(0)
        } else {
            TextQuery::Or(optional)
        });
    }
    required.extend(prohibited);
    if required.len() == 1 {
        required.remove(0)
    } else {
        TextQuery::And(required)
    }
}

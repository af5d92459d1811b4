// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

//! Tokenizer for the rule expression dialect.

use crate::errors::ScannerError;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Ident(String),
    Int(i64),
    Str(String),
    Bytes(Vec<u8>),
    True,
    False,
    Null,

    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Dot,

    Not,
    And,
    Or,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
}

pub fn tokenize(input: &str) -> Result<Vec<Token>, ScannerError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            '%' => {
                tokens.push(Token::Percent);
                i += 1;
            }
            '!' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Ne);
                    i += 2;
                } else {
                    tokens.push(Token::Not);
                    i += 1;
                }
            }
            '=' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Eq);
                    i += 2;
                } else {
                    return Err(err(input, i, "single '=' is not an operator"));
                }
            }
            '<' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Le);
                    i += 2;
                } else {
                    tokens.push(Token::Lt);
                    i += 1;
                }
            }
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Ge);
                    i += 2;
                } else {
                    tokens.push(Token::Gt);
                    i += 1;
                }
            }
            '&' => {
                if chars.get(i + 1) == Some(&'&') {
                    tokens.push(Token::And);
                    i += 2;
                } else {
                    return Err(err(input, i, "single '&' is not an operator"));
                }
            }
            '|' => {
                if chars.get(i + 1) == Some(&'|') {
                    tokens.push(Token::Or);
                    i += 2;
                } else {
                    return Err(err(input, i, "single '|' is not an operator"));
                }
            }
            '"' | '\'' => {
                let (s, next) = lex_string(&chars, i, input)?;
                tokens.push(Token::Str(s));
                i = next;
            }
            'b' if matches!(chars.get(i + 1), Some('"') | Some('\'')) => {
                let (s, next) = lex_string(&chars, i + 1, input)?;
                tokens.push(Token::Bytes(s.into_bytes()));
                i = next;
            }
            c if c.is_ascii_digit() => {
                let (n, next) = lex_int(&chars, i, input)?;
                tokens.push(Token::Int(n));
                i = next;
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let ident: String = chars[start..i].iter().collect();
                tokens.push(match ident.as_str() {
                    "true" => Token::True,
                    "false" => Token::False,
                    "null" => Token::Null,
                    _ => Token::Ident(ident),
                });
            }
            _ => return Err(err(input, i, &format!("unexpected character {:?}", c))),
        }
    }

    Ok(tokens)
}

fn lex_string(chars: &[char], start: usize, input: &str) -> Result<(String, usize), ScannerError> {
    let quote = chars[start];
    let mut out = String::new();
    let mut i = start + 1;
    while i < chars.len() {
        let c = chars[i];
        if c == quote {
            return Ok((out, i + 1));
        }
        if c == '\\' {
            let esc = chars
                .get(i + 1)
                .ok_or_else(|| err(input, i, "dangling escape"))?;
            out.push(match esc {
                'n' => '\n',
                'r' => '\r',
                't' => '\t',
                '0' => '\0',
                '\\' => '\\',
                '"' => '"',
                '\'' => '\'',
                other => return Err(err(input, i, &format!("unknown escape \\{}", other))),
            });
            i += 2;
        } else {
            out.push(c);
            i += 1;
        }
    }
    Err(err(input, start, "unterminated string literal"))
}

fn lex_int(chars: &[char], start: usize, input: &str) -> Result<(i64, usize), ScannerError> {
    let mut i = start;
    // Hex literal
    if chars[i] == '0' && matches!(chars.get(i + 1), Some('x') | Some('X')) {
        i += 2;
        let hex_start = i;
        while i < chars.len() && chars[i].is_ascii_hexdigit() {
            i += 1;
        }
        let digits: String = chars[hex_start..i].iter().collect();
        let n = i64::from_str_radix(&digits, 16)
            .map_err(|e| err(input, start, &format!("bad hex literal: {}", e)))?;
        return Ok((n, i));
    }
    while i < chars.len() && chars[i].is_ascii_digit() {
        i += 1;
    }
    let digits: String = chars[start..i].iter().collect();
    let n = digits
        .parse::<i64>()
        .map_err(|e| err(input, start, &format!("bad int literal: {}", e)))?;
    Ok((n, i))
}

fn err(input: &str, pos: usize, msg: &str) -> ScannerError {
    ScannerError::Evaluation(format!("lex error at offset {} in {:?}: {}", pos, input, msg))
}

use std::collections::HashMap;
use std::path::PathBuf;
use std::str::Chars;

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum TokenType {
    Chip,
    In,
    Out,
    Parts,
    True,
    False,
    Identifier,
    Number,
    LeftCurly,
    RightCurly,
    LeftBracket,
    RightBracket,
    LeftParen,
    RightParen,
    Semicolon,
    Colon,
    Comma,
    Equal,
    Dot,
    Invalid,
    Eof,
}

impl std::fmt::Display for TokenType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TokenType::Chip => "`CHIP`",
            TokenType::In => "`IN`",
            TokenType::Out => "`OUT`",
            TokenType::Parts => "`PARTS`",
            TokenType::True => "`true`",
            TokenType::False => "`false`",
            TokenType::Identifier => "an identifier",
            TokenType::Number => "a number",
            TokenType::LeftCurly => "`{`",
            TokenType::RightCurly => "`}`",
            TokenType::LeftBracket => "`[`",
            TokenType::RightBracket => "`]`",
            TokenType::LeftParen => "`(`",
            TokenType::RightParen => "`)`",
            TokenType::Semicolon => "`;`",
            TokenType::Colon => "`:`",
            TokenType::Comma => "`,`",
            TokenType::Equal => "`=`",
            TokenType::Dot => "`.`",
            TokenType::Invalid => "an invalid token",
            TokenType::Eof => "end of file",
        };
        write!(f, "{}", s)
    }
}

#[derive(Clone, Debug)]
pub struct Token {
    pub token_type: TokenType,
    pub lexeme: String,
    /// 1-based line of the first character.
    pub line: u32,
    /// 1-based column of the first character.
    pub col: usize,
    pub path: PathBuf,
}

pub struct Scanner<'a> {
    source_chars: std::iter::Peekable<Chars<'a>>,
    source_lines: Vec<String>,
    pub line: u32,
    pub col: usize,
    keywords: HashMap<&'a str, TokenType>,
    peeked: Option<Token>,
    pub path: PathBuf,
}

impl<'a> Scanner<'a> {
    pub fn new(source_code: &str, source_path: PathBuf) -> Scanner {
        let source_chars = source_code.chars().peekable();

        // Keywords are reserved and case-sensitive.
        let keywords = HashMap::from([
            ("CHIP", TokenType::Chip),
            ("IN", TokenType::In),
            ("OUT", TokenType::Out),
            ("PARTS", TokenType::Parts),
            ("true", TokenType::True),
            ("false", TokenType::False),
        ]);

        Scanner {
            source_chars,
            source_lines: source_code.lines().map(String::from).collect(),
            line: 1,
            col: 0,
            keywords,
            peeked: None,
            path: source_path,
        }
    }

    /// Source text of a 1-based line, for error rendering.
    pub fn line_text(&self, line: u32) -> &str {
        self.source_lines
            .get(line as usize - 1)
            .map(|s| s.as_str())
            .unwrap_or("")
    }

    pub fn peek(&mut self) -> Option<Token> {
        let token = self.scan_token();

        match token {
            None => None,
            Some(t) => {
                self.peeked = Some(t);
                self.peeked.clone()
            }
        }
    }

    fn token(&self, token_type: TokenType, lexeme: String, col: usize) -> Token {
        Token {
            token_type,
            lexeme,
            line: self.line,
            col,
            path: self.path.clone(),
        }
    }

    pub fn scan_token(&mut self) -> Option<Token> {
        if let Some(t) = self.peeked.take() {
            return Some(t);
        }

        while let Some(c) = self.source_chars.next() {
            self.col += 1;
            let punct = match c {
                '{' => Some(TokenType::LeftCurly),
                '}' => Some(TokenType::RightCurly),
                '(' => Some(TokenType::LeftParen),
                ')' => Some(TokenType::RightParen),
                '[' => Some(TokenType::LeftBracket),
                ']' => Some(TokenType::RightBracket),
                ';' => Some(TokenType::Semicolon),
                ':' => Some(TokenType::Colon),
                ',' => Some(TokenType::Comma),
                '=' => Some(TokenType::Equal),
                '.' => Some(TokenType::Dot),
                _ => None,
            };
            if let Some(tt) = punct {
                return Some(self.token(tt, c.to_string(), self.col));
            }

            match c {
                '\n' => {
                    self.line += 1;
                    self.col = 0;
                }
                ' ' | '\t' | '\r' => {}
                '/' => match self.source_chars.peek() {
                    Some('/') => self.finish_single_comment(),
                    Some('*') => self.finish_multi_comment(),
                    _ => {
                        return Some(self.token(TokenType::Invalid, c.to_string(), self.col));
                    }
                },
                _ => {
                    if c.is_alphabetic() || c == '_' {
                        return Some(self.finish_identifier(c));
                    } else if c.is_numeric() {
                        return Some(self.finish_number(c));
                    } else {
                        return Some(self.token(TokenType::Invalid, c.to_string(), self.col));
                    }
                }
            }
        }
        None
    }

    fn finish_single_comment(&mut self) {
        loop {
            match self.source_chars.next() {
                None => break,
                Some('\n') => {
                    self.line += 1;
                    self.col = 0;
                    break;
                }
                _ => self.col += 1,
            }
        }
    }

    // Block comments do not nest.
    fn finish_multi_comment(&mut self) {
        loop {
            match self.source_chars.next() {
                None => break,
                Some('\n') => {
                    self.line += 1;
                    self.col = 0;
                }
                Some('*') => {
                    self.col += 1;
                    if let Some('/') = self.source_chars.peek() {
                        self.source_chars.next();
                        self.col += 1;
                        break;
                    }
                }
                _ => self.col += 1,
            }
        }
    }

    fn finish_number(&mut self, start: char) -> Token {
        let start_col = self.col;
        let mut lexeme = start.to_string();

        while let Some(c) = self.source_chars.peek() {
            if c.is_numeric() {
                lexeme.push(*c);
                self.source_chars.next();
                self.col += 1;
            } else {
                break;
            }
        }

        self.token(TokenType::Number, lexeme, start_col)
    }

    fn finish_identifier(&mut self, start: char) -> Token {
        let start_col = self.col;
        let mut lexeme = start.to_string();

        while let Some(c) = self.source_chars.peek() {
            if c.is_alphanumeric() || c == &'_' {
                lexeme.push(*c);
                self.source_chars.next();
                self.col += 1;
            } else {
                break;
            }
        }

        let token_type = match self.keywords.get(lexeme.as_str()) {
            None => TokenType::Identifier,
            Some(t) => *t,
        };
        self.token(token_type, lexeme, start_col)
    }
}

impl<'a> Iterator for Scanner<'a> {
    type Item = Token;

    fn next(&mut self) -> Option<Self::Item> {
        self.scan_token()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use std::env;
    use std::fs;
    use std::path::Path;

    fn scan(source: &str) -> Vec<Token> {
        Scanner::new(source, PathBuf::from("")).collect()
    }

    #[test]
    fn test_and_fixture_tokens() {
        let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
        let test_file = manifest_dir.join("resources").join("chips").join("And.hdl");
        let contents = fs::read_to_string(test_file).expect("Unable to read test file.");

        let scanner = Scanner::new(contents.as_str(), PathBuf::from(""));
        let actual_types: Vec<_> = scanner.map(|t| t.token_type).collect();

        let header = vec![
            TokenType::Chip,
            TokenType::Identifier,
            TokenType::LeftCurly,
            TokenType::In,
            TokenType::Identifier,
            TokenType::Comma,
            TokenType::Identifier,
            TokenType::Semicolon,
            TokenType::Out,
            TokenType::Identifier,
            TokenType::Semicolon,
            TokenType::Parts,
            TokenType::Colon,
        ];
        assert_eq!(&actual_types[..header.len()], &header[..]);
        assert_eq!(*actual_types.last().unwrap(), TokenType::RightCurly);
    }

    #[test]
    fn test_bus_declaration_tokens() {
        let types: Vec<_> = scan("IN a[16];").iter().map(|t| t.token_type).collect();
        assert_eq!(
            types,
            vec![
                TokenType::In,
                TokenType::Identifier,
                TokenType::LeftBracket,
                TokenType::Number,
                TokenType::RightBracket,
                TokenType::Semicolon,
            ]
        );
    }

    #[test]
    fn test_range_and_literal_tokens() {
        let types: Vec<_> = scan("a=in[0..7], b=true")
            .iter()
            .map(|t| t.token_type)
            .collect();
        assert_eq!(
            types,
            vec![
                TokenType::Identifier,
                TokenType::Equal,
                TokenType::Identifier,
                TokenType::LeftBracket,
                TokenType::Number,
                TokenType::Dot,
                TokenType::Dot,
                TokenType::Number,
                TokenType::RightBracket,
                TokenType::Comma,
                TokenType::Identifier,
                TokenType::Equal,
                TokenType::True,
            ]
        );
    }

    #[test]
    fn test_keywords_are_case_sensitive() {
        let tokens = scan("CHIP chip In in");
        let types: Vec<_> = tokens.iter().map(|t| t.token_type).collect();
        assert_eq!(
            types,
            vec![
                TokenType::Chip,
                TokenType::Identifier,
                TokenType::Identifier,
                TokenType::Identifier,
            ]
        );
    }

    #[test]
    fn test_comments_are_skipped() {
        let source = "// header\nCHIP /* inline\nspanning */ Foo";
        let tokens = scan(source);
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[0].token_type, TokenType::Chip);
        assert_eq!(tokens[1].token_type, TokenType::Identifier);
        assert_eq!(tokens[1].lexeme, "Foo");
        assert_eq!(tokens[1].line, 3);
    }

    #[test]
    fn test_token_positions() {
        let tokens = scan("CHIP Foo { IN a IN b; }");
        // The second IN keyword starts at column 17 of line 1.
        let second_in = &tokens[5];
        assert_eq!(second_in.token_type, TokenType::In);
        assert_eq!(second_in.line, 1);
        assert_eq!(second_in.col, 17);
    }

    #[test]
    fn test_line_text() {
        let scanner = Scanner::new("CHIP Foo {\n  IN a;\n}", PathBuf::from(""));
        assert_eq!(scanner.line_text(2), "  IN a;");
        assert_eq!(scanner.line_text(9), "");
    }
}

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use rust_embed::RustEmbed;
use serde::Serialize;

use crate::error::{ErrorKind, HdlError, Location};
use crate::pin::{PinRef, PinSpec};
use crate::scanner::{Scanner, Token, TokenType};

/// The parse tree for an HDL chip. Built fresh by every `parse` call.
#[derive(Clone, Debug, Serialize)]
pub struct ChipAst {
    pub name: String,
    pub inputs: Vec<PinSpec>,
    pub outputs: Vec<PinSpec>,
    pub parts: Vec<ChipCall>,
    #[serde(skip)]
    pub path: Option<PathBuf>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ChipCall {
    pub name: String,
    pub arguments: Vec<Argument>,
    #[serde(skip)]
    pub line: u32,
}

//  Not(in=sel, out=notSel); has two arguments:
//  { name: "in", value: sel } and { name: "out", value: notSel }.
#[derive(Clone, Debug, Serialize)]
pub struct Argument {
    pub name: String,
    pub value: PinRef,
    #[serde(skip)]
    pub line: u32,
}

/// Canonical printer. `parse` of the printed text reproduces the AST
/// modulo comments and whitespace.
impl fmt::Display for ChipAst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn decls(f: &mut fmt::Formatter<'_>, pins: &[PinSpec]) -> fmt::Result {
            for (i, p) in pins.iter().enumerate() {
                if i != 0 {
                    write!(f, ", ")?;
                }
                if p.size == 1 {
                    write!(f, "{}", p.name)?;
                } else {
                    write!(f, "{}[{}]", p.name, p.size)?;
                }
            }
            writeln!(f, ";")
        }

        writeln!(f, "CHIP {} {{", self.name)?;
        if !self.inputs.is_empty() {
            write!(f, "    IN ")?;
            decls(f, &self.inputs)?;
        }
        if !self.outputs.is_empty() {
            write!(f, "    OUT ")?;
            decls(f, &self.outputs)?;
        }
        if !self.parts.is_empty() {
            writeln!(f, "\n    PARTS:")?;
            for part in &self.parts {
                write!(f, "    {}(", part.name)?;
                for (i, arg) in part.arguments.iter().enumerate() {
                    if i != 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}={}", arg.name, arg.value)?;
                }
                writeln!(f, ");")?;
            }
        }
        writeln!(f, "}}")
    }
}

/// Supplies HDL source text for chips referenced by name.
pub trait HdlProvider {
    fn get_hdl(&self, file_name: &str) -> Result<String, std::io::Error>;
    fn get_path(&self, file_name: &str) -> PathBuf;
}

#[derive(Clone)]
pub struct FileReader {
    base_path: PathBuf,
}

impl FileReader {
    pub fn new(base_path: &Path) -> FileReader {
        FileReader {
            base_path: base_path.to_path_buf(),
        }
    }
}

impl HdlProvider for FileReader {
    fn get_hdl(&self, file_name: &str) -> Result<String, std::io::Error> {
        let path = self.base_path.join(file_name);
        fs::read_to_string(&path).map_err(|e| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("Unable to get HDL for {:?}. {}", path, e),
            )
        })
    }

    fn get_path(&self, file_name: &str) -> PathBuf {
        self.base_path.join(file_name)
    }
}

#[derive(RustEmbed)]
#[folder = "resources/chips"]
struct ChipAsset;

/// Serves the sample chips compiled into the binary.
pub struct EmbedReader;

impl HdlProvider for EmbedReader {
    fn get_hdl(&self, file_name: &str) -> Result<String, std::io::Error> {
        match ChipAsset::get(file_name) {
            None => Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("Unable to get HDL for {}", file_name),
            )),
            Some(asset) => String::from_utf8(asset.data.into_owned()).map_err(|_| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("HDL for {} is not UTF-8", file_name),
                )
            }),
        }
    }

    fn get_path(&self, file_name: &str) -> PathBuf {
        PathBuf::from(file_name)
    }
}

/// Parses an on-disk HDL file, returning the AST and a FileReader
/// rooted at the file's directory.
pub fn parse_hdl_path(hdl_path: &Path) -> Result<(ChipAst, FileReader), HdlError> {
    let base_path = hdl_path.parent().unwrap_or_else(|| Path::new("."));
    let hdl_file = hdl_path
        .file_name()
        .and_then(|f| f.to_str())
        .ok_or_else(|| HdlError::other(format!("Not an HDL file path: {:?}", hdl_path)))?;
    let provider = FileReader::new(base_path);
    let contents = provider.get_hdl(hdl_file)?;
    let mut scanner = Scanner::new(contents.as_str(), provider.get_path(hdl_file));
    let ast = Parser::new(&mut scanner).parse()?;
    Ok((ast, provider))
}

pub struct Parser<'a, 'b> {
    pub scanner: &'a mut Scanner<'b>,
}

impl<'a, 'b> Parser<'a, 'b> {
    pub fn new(scanner: &'a mut Scanner<'b>) -> Parser<'a, 'b> {
        Parser { scanner }
    }

    pub fn parse(&mut self) -> Result<ChipAst, HdlError> {
        self.chip()
    }

    fn location(&self, t: &Token) -> Location {
        Location {
            path: if t.path.as_os_str().is_empty() {
                None
            } else {
                Some(t.path.clone())
            },
            line: t.line,
            column: t.col,
            source_line: String::from(self.scanner.line_text(t.line)),
            span: t.lexeme.len(),
        }
    }

    fn error(&self, msg: String, t: &Token) -> HdlError {
        HdlError {
            msg,
            kind: ErrorKind::Parse(self.location(t)),
        }
    }

    fn eof_error(&self, expected: &str) -> HdlError {
        let t = Token {
            token_type: TokenType::Eof,
            lexeme: String::new(),
            line: self.scanner.line,
            col: self.scanner.col + 1,
            path: self.scanner.path.clone(),
        };
        self.error(format!("Early end of file, expected {}.", expected), &t)
    }

    fn next_token(&mut self, expected: &str) -> Result<Token, HdlError> {
        self.scanner.scan_token().ok_or_else(|| self.eof_error(expected))
    }

    fn consume(&mut self, tt: TokenType) -> Result<Token, HdlError> {
        let t = self.next_token(&tt.to_string())?;
        if t.token_type == tt {
            Ok(t)
        } else {
            Err(self.error(
                format!(
                    "I did not expect to see `{}`. I expected to see {}.",
                    t.lexeme, tt
                ),
                &t,
            ))
        }
    }

    fn number(&mut self) -> Result<(usize, Token), HdlError> {
        let t = self.consume(TokenType::Number)?;
        let n = t
            .lexeme
            .parse::<usize>()
            .map_err(|_| self.error(format!("Number `{}` is too large.", t.lexeme), &t))?;
        Ok((n, t))
    }

    fn chip(&mut self) -> Result<ChipAst, HdlError> {
        self.consume(TokenType::Chip)?;
        let chip_name = self.consume(TokenType::Identifier)?;
        self.consume(TokenType::LeftCurly)?;

        let mut inputs = Vec::new();
        let mut outputs = Vec::new();
        let mut parts = Vec::new();

        // Sections may appear in any order and repeat; declarations
        // accumulate.
        loop {
            let t = self.next_token("`IN`, `OUT`, `PARTS`, or `}`")?;
            match t.token_type {
                TokenType::In => inputs.append(&mut self.pin_decls()?),
                TokenType::Out => outputs.append(&mut self.pin_decls()?),
                TokenType::Parts => {
                    self.consume(TokenType::Colon)?;
                    parts.append(&mut self.parts()?);
                }
                TokenType::RightCurly => break,
                _ => {
                    return Err(self.error(
                        format!(
                            "I did not expect to see `{}`. I expected `IN`, `OUT`, `PARTS`, or `}}`.",
                            t.lexeme
                        ),
                        &t,
                    ));
                }
            }
        }

        let path = self.scanner.path.clone();
        Ok(ChipAst {
            name: chip_name.lexeme,
            inputs,
            outputs,
            parts,
            path: if path.as_os_str().is_empty() {
                None
            } else {
                Some(path)
            },
        })
    }

    // PinDecls := PinDecl (',' PinDecl)* ';'
    fn pin_decls(&mut self) -> Result<Vec<PinSpec>, HdlError> {
        let mut res = Vec::new();

        loop {
            let name = self.consume(TokenType::Identifier)?;
            let size = self.pin_width(&name)?;
            res.push(PinSpec::new(name.lexeme, size));

            let t = self.next_token("`,` or `;`")?;
            match t.token_type {
                TokenType::Comma => continue,
                TokenType::Semicolon => return Ok(res),
                _ => {
                    return Err(self.error(
                        format!(
                            "I did not expect to see `{}`. I expected `,` or `;`.",
                            t.lexeme
                        ),
                        &t,
                    ));
                }
            }
        }
    }

    // Width defaults to 1 when the `[n]` suffix is omitted.
    fn pin_width(&mut self, name: &Token) -> Result<usize, HdlError> {
        match self.scanner.peek() {
            Some(t) if t.token_type == TokenType::LeftBracket => {}
            _ => return Ok(1),
        }

        self.consume(TokenType::LeftBracket)?;
        let (width, wt) = self.number()?;
        self.consume(TokenType::RightBracket)?;

        if width == 0 || width > 16 {
            return Err(self.error(
                format!(
                    "Pin `{}` declares width {}, but widths must be 1..16.",
                    name.lexeme, width
                ),
                &wt,
            ));
        }
        Ok(width)
    }

    fn parts(&mut self) -> Result<Vec<ChipCall>, HdlError> {
        let mut parts = Vec::new();
        loop {
            match self.scanner.peek() {
                Some(t) if t.token_type == TokenType::Identifier => {
                    parts.push(self.chip_call()?);
                }
                Some(_) => return Ok(parts),
                None => return Ok(parts),
            }
        }
    }

    // Part := ID '(' Args ')' ';'
    fn chip_call(&mut self) -> Result<ChipCall, HdlError> {
        let name = self.consume(TokenType::Identifier)?;
        self.consume(TokenType::LeftParen)?;

        let mut arguments = Vec::new();
        loop {
            let pin = self.consume(TokenType::Identifier)?;
            self.consume(TokenType::Equal)?;
            let value = self.pin_ref()?;
            arguments.push(Argument {
                name: pin.lexeme,
                value,
                line: pin.line,
            });

            let t = self.next_token("`,` or `)`")?;
            match t.token_type {
                TokenType::Comma => continue,
                TokenType::RightParen => break,
                _ => {
                    return Err(self.error(
                        format!(
                            "I did not expect to see `{}`. I expected `,` or `)`.",
                            t.lexeme
                        ),
                        &t,
                    ));
                }
            }
        }

        self.consume(TokenType::Semicolon)?;
        Ok(ChipCall {
            name: name.lexeme,
            arguments,
            line: name.line,
        })
    }

    // PinRef := ID ('[' Index ']')? | 'true' | 'false'
    // Index  := Number | Number '..' Number
    fn pin_ref(&mut self) -> Result<PinRef, HdlError> {
        let t = self.next_token("a pin reference")?;
        match t.token_type {
            TokenType::True => Ok(PinRef::Const(true)),
            TokenType::False => Ok(PinRef::Const(false)),
            TokenType::Identifier => {
                match self.scanner.peek() {
                    Some(p) if p.token_type == TokenType::LeftBracket => {}
                    _ => return Ok(PinRef::Simple(t.lexeme)),
                }

                self.consume(TokenType::LeftBracket)?;
                let (from, _) = self.number()?;
                let to = match self.scanner.peek() {
                    Some(p) if p.token_type == TokenType::Dot => {
                        self.consume(TokenType::Dot)?;
                        self.consume(TokenType::Dot)?;
                        let (to, tt) = self.number()?;
                        if to < from {
                            return Err(self.error(
                                format!("Bit range [{}..{}] is reversed.", from, to),
                                &tt,
                            ));
                        }
                        to
                    }
                    _ => from,
                };
                self.consume(TokenType::RightBracket)?;
                Ok(PinRef::Slice(t.lexeme, from, to))
            }
            _ => Err(self.error(
                format!(
                    "I did not expect to see `{}`. I expected a pin name, `true`, or `false`.",
                    t.lexeme
                ),
                &t,
            )),
        }
    }
}

/// Parses HDL source text with no backing file.
pub fn parse_source(source: &str) -> Result<ChipAst, HdlError> {
    let mut scanner = Scanner::new(source, PathBuf::new());
    Parser::new(&mut scanner).parse()
}

#[cfg(test)]
mod test {
    use super::*;

    use std::env;

    fn read_chip(name: &str) -> String {
        let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
        let test_file = manifest_dir.join("resources").join("chips").join(name);
        fs::read_to_string(test_file).expect("Unable to read test file.")
    }

    #[test]
    fn test_parse_mux_fixture() {
        let ast = parse_source(&read_chip("Mux.hdl")).expect("Parse error");
        assert_eq!(ast.name, "Mux");
        let input_names: Vec<_> = ast.inputs.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(input_names, vec!["a", "b", "sel"]);
        assert_eq!(ast.outputs.len(), 1);
        assert_eq!(ast.parts.len(), 4);
        assert_eq!(ast.parts[0].name, "Not");
    }

    #[test]
    fn test_parse_bus_widths() {
        let ast = parse_source(
            "CHIP Add3 { IN a[16], b[16], carry; OUT out[16]; PARTS: }",
        )
        .unwrap();
        assert_eq!(ast.inputs[0].size, 16);
        assert_eq!(ast.inputs[2].size, 1);
        assert_eq!(ast.outputs[0].size, 16);
    }

    #[test]
    fn test_parse_pin_refs() {
        let ast = parse_source(
            "CHIP Probe { IN in[8]; OUT out; PARTS: Or8Way(in=in[0..7], out=out); And(a=in[3], b=true, out=x); }",
        )
        .unwrap();
        let or_args = &ast.parts[0].arguments;
        assert_eq!(or_args[0].value, PinRef::Slice(String::from("in"), 0, 7));
        let and_args = &ast.parts[1].arguments;
        assert_eq!(and_args[0].value, PinRef::Slice(String::from("in"), 3, 3));
        assert_eq!(and_args[1].value, PinRef::Const(true));
        assert_eq!(and_args[2].value, PinRef::Simple(String::from("x")));
    }

    #[test]
    fn test_sections_in_any_order() {
        let ast = parse_source("CHIP Weird { OUT out; IN a; IN b; PARTS: }").unwrap();
        assert_eq!(ast.inputs.len(), 2);
        assert_eq!(ast.outputs.len(), 1);
    }

    #[test]
    fn test_parse_error_location() {
        let e = parse_source("CHIP Foo { IN a IN b; }").unwrap_err();
        match &e.kind {
            ErrorKind::Parse(loc) => {
                assert_eq!(loc.line, 1);
                assert_eq!(loc.column, 17);
                assert_eq!(loc.source_line, "CHIP Foo { IN a IN b; }");
                assert_eq!(loc.span, 2);
            }
            k => panic!("expected parse error, got {:?}", k),
        }
    }

    #[test]
    fn test_parse_error_on_bad_width() {
        assert!(parse_source("CHIP Foo { IN a[17]; OUT o; PARTS: }").is_err());
        assert!(parse_source("CHIP Foo { IN a[0]; OUT o; PARTS: }").is_err());
    }

    #[test]
    fn test_parse_error_on_reversed_range() {
        let e = parse_source(
            "CHIP Foo { IN a[8]; OUT o; PARTS: Or8Way(in=a[7..0], out=o); }",
        )
        .unwrap_err();
        assert!(matches!(e.kind, ErrorKind::Parse(_)));
    }

    #[test]
    fn test_early_end_of_file() {
        let e = parse_source("CHIP Foo { IN a, ").unwrap_err();
        assert!(e.msg.contains("Early end of file"));
    }

    #[test]
    fn test_printer_round_trip() {
        let source = read_chip("Mux.hdl");
        let ast = parse_source(&source).unwrap();
        let printed = ast.to_string();
        let reparsed = parse_source(&printed).expect("printed HDL must parse");
        assert_eq!(printed, reparsed.to_string());
    }

    #[test]
    fn test_printer_round_trip_with_slices_and_constants() {
        let source = "CHIP Probe { IN in[8]; OUT out; PARTS: Or8Way(in=in[0..7], out=out); And(a=in[3], b=true, out=x); }";
        let ast = parse_source(source).unwrap();
        let printed = ast.to_string();
        let reparsed = parse_source(&printed).unwrap();
        assert_eq!(printed, reparsed.to_string());
    }

    #[test]
    fn test_embed_reader_serves_chips() {
        let contents = EmbedReader.get_hdl("Mux.hdl").expect("embedded Mux.hdl");
        assert!(contents.contains("CHIP Mux"));
        assert!(EmbedReader.get_hdl("NoSuchChip.hdl").is_err());
    }
}

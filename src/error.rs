use std::fmt;
use std::path::PathBuf;

/// A position in an HDL source file, captured at the point where the
/// error was discovered. `source_line` is the offending line of text so
/// errors can be rendered without re-reading the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub path: Option<PathBuf>,
    pub line: u32,
    pub column: usize,
    pub source_line: String,
    pub span: usize,
}

impl Location {
    /// A location with a known line but no captured source text.
    /// Used by the linker, which works on the AST after the scanner
    /// is gone.
    pub fn bare(path: Option<PathBuf>, line: u32) -> Location {
        Location {
            path,
            line,
            column: 0,
            source_line: String::new(),
            span: 0,
        }
    }
}

// Error type enum
#[derive(Debug, Clone)]
pub enum ErrorKind {
    Parse(Location),
    UnknownGate(Option<Location>),
    PinNotDeclared(Option<Location>),
    WidthMismatch(Option<Location>),
    SliceOutOfRange(Option<Location>),
    CombinationalLoop(Option<Location>),
    ClockPhaseViolation,
    InvalidLiteral,
    Io,
    Other,
}

#[derive(Clone)]
pub struct HdlError {
    pub msg: String,
    pub kind: ErrorKind,
}

impl HdlError {
    pub fn other(msg: impl Into<String>) -> HdlError {
        HdlError {
            msg: msg.into(),
            kind: ErrorKind::Other,
        }
    }

    /// Location carried by this error, if any.
    pub fn location(&self) -> Option<&Location> {
        match &self.kind {
            ErrorKind::Parse(loc) => Some(loc),
            ErrorKind::UnknownGate(loc)
            | ErrorKind::PinNotDeclared(loc)
            | ErrorKind::WidthMismatch(loc)
            | ErrorKind::SliceOutOfRange(loc)
            | ErrorKind::CombinationalLoop(loc) => loc.as_ref(),
            _ => None,
        }
    }
}

impl fmt::Debug for HdlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.msg)
    }
}

fn write_source_line(f: &mut fmt::Formatter<'_>, loc: &Location) -> fmt::Result {
    if loc.source_line.is_empty() {
        return Ok(());
    }
    let gutter = format!("{}| ", loc.line);
    writeln!(f, "{}{}", gutter, loc.source_line)?;
    for _ in 0..(gutter.len() + loc.column.saturating_sub(1)) {
        write!(f, " ")?;
    }
    for _ in 0..loc.span.max(1) {
        write!(f, "^")?;
    }
    writeln!(f)
}

impl fmt::Display for HdlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ErrorKind::Parse(loc) => {
                match &loc.path {
                    Some(p) => writeln!(f, "-- PARSE ERROR ----------- {}", p.display())?,
                    None => writeln!(f, "-- PARSE ERROR -----------")?,
                }
                write_source_line(f, loc)?;
                writeln!(f, "\n{}", self.msg)
            }
            ErrorKind::UnknownGate(loc)
            | ErrorKind::PinNotDeclared(loc)
            | ErrorKind::WidthMismatch(loc)
            | ErrorKind::SliceOutOfRange(loc)
            | ErrorKind::CombinationalLoop(loc) => {
                match loc {
                    Some(l) => {
                        match &l.path {
                            Some(p) => {
                                writeln!(
                                    f,
                                    "-- LINK ERROR ------------ {} (line {})",
                                    p.display(),
                                    l.line
                                )?;
                            }
                            None => writeln!(f, "-- LINK ERROR ------------ line {}", l.line)?,
                        }
                        write_source_line(f, l)?;
                    }
                    None => writeln!(f, "-- LINK ERROR ------------")?,
                }
                writeln!(f, "{}", self.msg)
            }
            _ => {
                writeln!(f, "Error: {}", self.msg)
            }
        }
    }
}

impl std::error::Error for HdlError {}

impl From<std::io::Error> for HdlError {
    fn from(e: std::io::Error) -> Self {
        HdlError {
            msg: format!("IO Error: {}", e),
            kind: ErrorKind::Io,
        }
    }
}

impl From<String> for HdlError {
    fn from(e: String) -> Self {
        HdlError {
            msg: e,
            kind: ErrorKind::Other,
        }
    }
}

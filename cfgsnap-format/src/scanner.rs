//! Token-level scanner that streams the elements of one top-level array
//!
//! The scanner walks a JSON document byte by byte without building values.
//! Everything outside the target array is validated and skipped; each element
//! of the target array is captured as raw bytes and handed out as an
//! [`ElementBoundary`]. Only a member of the top-level object whose key equals
//! the configured target key is treated as the target; same-named fields at
//! any other depth are skipped like every other value.

use crate::config::{ElementFormat, TranscodeConfig, DEFAULT_TARGET_KEY};
use crate::error::{MalformedReason, Result, SnapError};
use crate::limits::ScanLimits;
use std::io::{self, Read};
use tracing::debug;

const READ_CHUNK_BYTES: usize = 64 * 1024;

/// Top-level object, then the target array
const TARGET_ARRAY_DEPTH: usize = 2;

/// Longest raw form of one decoded byte: a `\uXXXX` escape
const MAX_ESCAPED_BYTE_LEN: usize = 6;

/// Options controlling which field is extracted and how
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Top-level key whose array value is streamed
    pub target_key: String,
    /// How element bytes are captured
    pub element_format: ElementFormat,
    /// Resource limits
    pub limits: ScanLimits,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            target_key: DEFAULT_TARGET_KEY.to_string(),
            element_format: ElementFormat::Original,
            limits: ScanLimits::default(),
        }
    }
}

impl ScanOptions {
    /// Scanner options for a transcoder configuration
    pub fn from_config(config: &TranscodeConfig) -> Self {
        Self {
            target_key: config.target_key.clone(),
            element_format: config.element_format,
            limits: config.limits.clone(),
        }
    }
}

/// Raw byte span of one target array element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementBoundary<'a> {
    index: u64,
    start: u64,
    end: u64,
    bytes: &'a [u8],
}

impl<'a> ElementBoundary<'a> {
    /// Zero-based position of the element in the target array
    pub fn index(&self) -> u64 {
        self.index
    }

    /// Absolute offset of the element's first byte in the decoded stream
    pub fn start(&self) -> u64 {
        self.start
    }

    /// Absolute offset one past the element's last byte
    pub fn end(&self) -> u64 {
        self.end
    }

    /// Captured element bytes
    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Start,
    FirstMember,
    NextMember,
    Elements { first: bool },
    Trailing,
    Done,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Capture {
    Off,
    Key,
    Element,
}

enum Step {
    Continue,
    Element,
    Finished,
}

/// Streaming scanner over a decoded snapshot document
pub struct ArrayScanner<R> {
    reader: R,
    buf: Box<[u8]>,
    pos: usize,
    filled: usize,
    base: u64,
    eof: bool,
    options: ScanOptions,
    phase: Phase,
    capture: Capture,
    key: Vec<u8>,
    key_truncated: bool,
    element: Vec<u8>,
    element_start: u64,
    element_end: u64,
    emitted: u64,
    targets_found: u64,
}

impl<R: Read> ArrayScanner<R> {
    /// Create a scanner reading from `reader`
    pub fn new(reader: R, options: ScanOptions) -> Self {
        Self {
            reader,
            buf: vec![0u8; READ_CHUNK_BYTES].into_boxed_slice(),
            pos: 0,
            filled: 0,
            base: 0,
            eof: false,
            options,
            phase: Phase::Start,
            capture: Capture::Off,
            key: Vec::new(),
            key_truncated: false,
            element: Vec::new(),
            element_start: 0,
            element_end: 0,
            emitted: 0,
            targets_found: 0,
        }
    }

    /// Number of elements handed out so far
    pub fn elements_emitted(&self) -> u64 {
        self.emitted
    }

    /// Number of top-level target arrays entered so far
    pub fn targets_found(&self) -> u64 {
        self.targets_found
    }

    /// Absolute offset of the next unread byte of the decoded stream
    pub fn offset(&self) -> u64 {
        self.base + self.pos as u64
    }

    /// Advance to the next target array element.
    ///
    /// Returns `Ok(None)` once the whole document has been walked. After an
    /// error the scanner is poisoned and every later call fails.
    pub fn next_element(&mut self) -> Result<Option<ElementBoundary<'_>>> {
        loop {
            let step = match self.step() {
                Ok(step) => step,
                Err(err) => {
                    self.phase = Phase::Failed;
                    self.capture = Capture::Off;
                    return Err(err);
                }
            };
            match step {
                Step::Continue => continue,
                Step::Finished => return Ok(None),
                Step::Element => break,
            }
        }

        Ok(Some(ElementBoundary {
            index: self.emitted - 1,
            start: self.element_start,
            end: self.element_end,
            bytes: &self.element,
        }))
    }

    /// Convert into an owning iterator of element bytes
    pub fn into_elements(self) -> Elements<R> {
        Elements { scanner: self }
    }

    fn step(&mut self) -> Result<Step> {
        match self.phase {
            Phase::Start => {
                self.skip_bom()?;
                match self.skip_ws()? {
                    Some(b'{') => {
                        self.advance()?;
                        self.phase = Phase::FirstMember;
                        Ok(Step::Continue)
                    }
                    Some(_) => Err(self.malformed(MalformedReason::NotAnObject)),
                    None => Err(self.malformed(MalformedReason::UnexpectedEof)),
                }
            }
            Phase::FirstMember => match self.skip_ws()? {
                Some(b'}') => {
                    self.advance()?;
                    self.phase = Phase::Trailing;
                    Ok(Step::Continue)
                }
                Some(b'"') => {
                    self.scan_member()?;
                    Ok(Step::Continue)
                }
                Some(found) => Err(self.unexpected(found, "an object key or '}'")),
                None => Err(self.malformed(MalformedReason::UnexpectedEof)),
            },
            Phase::NextMember => match self.skip_ws()? {
                Some(b',') => {
                    self.advance()?;
                    match self.skip_ws()? {
                        Some(b'"') => {
                            self.scan_member()?;
                            Ok(Step::Continue)
                        }
                        Some(found) => Err(self.unexpected(found, "an object key")),
                        None => Err(self.malformed(MalformedReason::UnexpectedEof)),
                    }
                }
                Some(b'}') => {
                    self.advance()?;
                    self.phase = Phase::Trailing;
                    Ok(Step::Continue)
                }
                Some(found) => Err(self.unexpected(found, "',' or '}'")),
                None => Err(self.malformed(MalformedReason::UnexpectedEof)),
            },
            Phase::Elements { first } => match self.skip_ws()? {
                Some(b']') => {
                    self.advance()?;
                    debug!(
                        key = %self.options.target_key,
                        elements = self.emitted,
                        offset = self.offset(),
                        "target array closed"
                    );
                    self.phase = Phase::NextMember;
                    Ok(Step::Continue)
                }
                Some(b',') if !first => {
                    self.advance()?;
                    self.capture_element()?;
                    Ok(Step::Element)
                }
                Some(_) if first => {
                    self.capture_element()?;
                    Ok(Step::Element)
                }
                Some(found) => Err(self.unexpected(found, "',' or ']'")),
                None => Err(self.malformed(MalformedReason::UnexpectedEof)),
            },
            Phase::Trailing => match self.skip_ws()? {
                Some(_) => Err(self.malformed(MalformedReason::TrailingData)),
                None => {
                    self.phase = Phase::Done;
                    Ok(Step::Finished)
                }
            },
            Phase::Done => Ok(Step::Finished),
            Phase::Failed => Err(SnapError::Internal(
                "scanner used after a previous failure".to_string(),
            )),
        }
    }

    /// Scan one top-level member. The cursor sits on the key's opening quote.
    fn scan_member(&mut self) -> Result<()> {
        self.key.clear();
        self.key_truncated = false;
        self.capture = Capture::Key;
        let scanned = self.scan_string();
        self.capture = Capture::Off;
        scanned?;

        // Keys too long to spell the target, or that do not decode to a
        // Rust string (lone surrogate escapes), never match.
        let key = if self.key_truncated {
            None
        } else {
            serde_json::from_slice::<String>(&self.key).ok()
        };

        match self.skip_ws()? {
            Some(b':') => self.advance()?,
            Some(found) => return Err(self.unexpected(found, "':'")),
            None => return Err(self.malformed(MalformedReason::UnexpectedEof)),
        }

        let Some(key) = key.filter(|key| *key == self.options.target_key) else {
            self.scan_value(1)?;
            self.phase = Phase::NextMember;
            return Ok(());
        };

        match self.skip_ws()? {
            Some(b'[') => {
                self.advance()?;
                self.targets_found += 1;
                debug!(
                    key = %self.options.target_key,
                    offset = self.offset(),
                    "entered target array"
                );
                self.phase = Phase::Elements { first: true };
                Ok(())
            }
            Some(_) => Err(self.malformed(MalformedReason::TargetNotArray { key })),
            None => Err(self.malformed(MalformedReason::UnexpectedEof)),
        }
    }

    fn capture_element(&mut self) -> Result<()> {
        self.skip_ws()?;
        self.element.clear();
        self.element_start = self.offset();
        self.capture = Capture::Element;
        let scanned = self.scan_value(TARGET_ARRAY_DEPTH);
        self.capture = Capture::Off;
        scanned?;
        self.element_end = self.offset();
        self.emitted += 1;
        self.phase = Phase::Elements { first: false };
        Ok(())
    }

    /// Scan one value whose enclosing container sits at `depth`.
    fn scan_value(&mut self, depth: usize) -> Result<()> {
        let byte = match self.skip_ws()? {
            Some(byte) => byte,
            None => return Err(self.malformed(MalformedReason::UnexpectedEof)),
        };
        match byte {
            b'{' => self.scan_object(depth + 1),
            b'[' => self.scan_array(depth + 1),
            b'"' => self.scan_string(),
            b't' => self.scan_literal(b"true"),
            b'f' => self.scan_literal(b"false"),
            b'n' => self.scan_literal(b"null"),
            b'-' | b'0'..=b'9' => self.scan_number(),
            found => Err(self.unexpected(found, "a JSON value")),
        }
    }

    fn scan_object(&mut self, depth: usize) -> Result<()> {
        self.check_depth(depth)?;
        self.advance()?;

        match self.skip_ws()? {
            Some(b'}') => return self.advance(),
            Some(b'"') => {}
            Some(found) => return Err(self.unexpected(found, "an object key or '}'")),
            None => return Err(self.malformed(MalformedReason::UnexpectedEof)),
        }

        loop {
            self.scan_string()?;
            match self.skip_ws()? {
                Some(b':') => self.advance()?,
                Some(found) => return Err(self.unexpected(found, "':'")),
                None => return Err(self.malformed(MalformedReason::UnexpectedEof)),
            }
            self.scan_value(depth)?;
            match self.skip_ws()? {
                Some(b',') => {
                    self.advance()?;
                    match self.skip_ws()? {
                        Some(b'"') => {}
                        Some(found) => return Err(self.unexpected(found, "an object key")),
                        None => return Err(self.malformed(MalformedReason::UnexpectedEof)),
                    }
                }
                Some(b'}') => return self.advance(),
                Some(found) => return Err(self.unexpected(found, "',' or '}'")),
                None => return Err(self.malformed(MalformedReason::UnexpectedEof)),
            }
        }
    }

    fn scan_array(&mut self, depth: usize) -> Result<()> {
        self.check_depth(depth)?;
        self.advance()?;

        match self.skip_ws()? {
            Some(b']') => return self.advance(),
            Some(_) => {}
            None => return Err(self.malformed(MalformedReason::UnexpectedEof)),
        }

        loop {
            self.scan_value(depth)?;
            match self.skip_ws()? {
                Some(b',') => self.advance()?,
                Some(b']') => return self.advance(),
                Some(found) => return Err(self.unexpected(found, "',' or ']'")),
                None => return Err(self.malformed(MalformedReason::UnexpectedEof)),
            }
        }
    }

    /// Scan a string. The cursor sits on the opening quote.
    fn scan_string(&mut self) -> Result<()> {
        self.advance()?;
        loop {
            if !self.fill()? {
                return Err(self.malformed(MalformedReason::UnexpectedEof));
            }
            let run = self.buf[self.pos..self.filled]
                .iter()
                .position(|&b| b == b'"' || b == b'\\' || b < 0x20);
            let Some(run) = run else {
                let rest = self.filled - self.pos;
                self.take(rest)?;
                continue;
            };
            self.take(run)?;

            match self.buf[self.pos] {
                b'"' => return self.advance(),
                b'\\' => {
                    self.advance()?;
                    self.scan_escape()?;
                }
                _ => {
                    return Err(self.malformed(MalformedReason::InvalidString(
                        "unescaped control character",
                    )))
                }
            }
        }
    }

    fn scan_escape(&mut self) -> Result<()> {
        match self.peek()? {
            Some(b'"' | b'\\' | b'/' | b'b' | b'f' | b'n' | b'r' | b't') => self.advance(),
            Some(b'u') => {
                self.advance()?;
                for _ in 0..4 {
                    match self.peek()? {
                        Some(b) if b.is_ascii_hexdigit() => self.advance()?,
                        Some(_) => {
                            return Err(self.malformed(MalformedReason::InvalidString(
                                "invalid unicode escape",
                            )))
                        }
                        None => return Err(self.malformed(MalformedReason::UnexpectedEof)),
                    }
                }
                Ok(())
            }
            Some(_) => Err(self.malformed(MalformedReason::InvalidString("invalid escape"))),
            None => Err(self.malformed(MalformedReason::UnexpectedEof)),
        }
    }

    fn scan_number(&mut self) -> Result<()> {
        if self.peek()? == Some(b'-') {
            self.advance()?;
        }

        match self.peek()? {
            Some(b'0') => self.advance()?,
            Some(b'1'..=b'9') => {
                self.advance()?;
                self.scan_digits()?;
            }
            _ => return Err(self.malformed(MalformedReason::InvalidNumber)),
        }

        if self.peek()? == Some(b'.') {
            self.advance()?;
            if self.scan_digits()? == 0 {
                return Err(self.malformed(MalformedReason::InvalidNumber));
            }
        }

        if let Some(b'e' | b'E') = self.peek()? {
            self.advance()?;
            if let Some(b'+' | b'-') = self.peek()? {
                self.advance()?;
            }
            if self.scan_digits()? == 0 {
                return Err(self.malformed(MalformedReason::InvalidNumber));
            }
        }

        Ok(())
    }

    fn scan_digits(&mut self) -> Result<usize> {
        let mut count = 0;
        while let Some(b'0'..=b'9') = self.peek()? {
            self.advance()?;
            count += 1;
        }
        Ok(count)
    }

    fn scan_literal(&mut self, literal: &'static [u8]) -> Result<()> {
        for &expected in literal {
            match self.peek()? {
                Some(b) if b == expected => self.advance()?,
                Some(_) => return Err(self.malformed(MalformedReason::InvalidLiteral)),
                None => return Err(self.malformed(MalformedReason::UnexpectedEof)),
            }
        }
        Ok(())
    }

    fn skip_bom(&mut self) -> Result<()> {
        if self.peek()? != Some(0xEF) {
            return Ok(());
        }
        self.advance()?;
        for expected in [0xBB, 0xBF] {
            if self.peek()? != Some(expected) {
                return Err(self.malformed(MalformedReason::NotAnObject));
            }
            self.advance()?;
        }
        Ok(())
    }

    /// Skip whitespace and peek at the next significant byte.
    fn skip_ws(&mut self) -> Result<Option<u8>> {
        let keep = self.capture == Capture::Element
            && self.options.element_format == ElementFormat::Original;
        loop {
            match self.peek()? {
                Some(b' ' | b'\t' | b'\n' | b'\r') => {
                    if keep {
                        self.advance()?;
                    } else {
                        self.pos += 1;
                    }
                }
                other => return Ok(other),
            }
        }
    }

    fn check_depth(&self, depth: usize) -> Result<()> {
        if depth > self.options.limits.max_nesting_depth {
            return Err(SnapError::LimitExceeded(format!(
                "nesting depth {} exceeds limit {} at byte {}",
                depth,
                self.options.limits.max_nesting_depth,
                self.offset()
            )));
        }
        Ok(())
    }

    fn peek(&mut self) -> Result<Option<u8>> {
        if self.fill()? {
            Ok(Some(self.buf[self.pos]))
        } else {
            Ok(None)
        }
    }

    /// Consume the byte under the cursor. Callers must have peeked it.
    fn advance(&mut self) -> Result<()> {
        self.take(1)
    }

    /// Consume `n` buffered bytes, copying them into the active capture.
    fn take(&mut self, n: usize) -> Result<()> {
        let end = self.pos + n;
        match self.capture {
            Capture::Off => {}
            Capture::Key if self.key_truncated => {}
            Capture::Key => {
                let limit = self.options.target_key.len() * MAX_ESCAPED_BYTE_LEN + 2;
                if self.key.len() + n > limit {
                    self.key_truncated = true;
                    self.key.clear();
                } else {
                    self.key.extend_from_slice(&self.buf[self.pos..end]);
                }
            }
            Capture::Element => {
                let limit = self.options.limits.max_element_bytes;
                if self.element.len() + n > limit {
                    return Err(SnapError::LimitExceeded(format!(
                        "element {} exceeds {} bytes",
                        self.emitted, limit
                    )));
                }
                self.element.extend_from_slice(&self.buf[self.pos..end]);
            }
        }
        self.pos = end;
        Ok(())
    }

    /// Make sure at least one unread byte is buffered. Returns `false` at end of input.
    fn fill(&mut self) -> Result<bool> {
        if self.pos < self.filled {
            return Ok(true);
        }
        if self.eof {
            return Ok(false);
        }

        self.base += self.filled as u64;
        self.pos = 0;
        self.filled = 0;
        loop {
            match self.reader.read(&mut self.buf) {
                Ok(0) => {
                    self.eof = true;
                    return Ok(false);
                }
                Ok(n) => {
                    self.filled = n;
                    return Ok(true);
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn malformed(&self, reason: MalformedReason) -> SnapError {
        SnapError::malformed(self.offset(), reason)
    }

    fn unexpected(&self, found: u8, expected: &'static str) -> SnapError {
        self.malformed(MalformedReason::UnexpectedByte { found, expected })
    }
}

/// Owning iterator over element bytes, see [`ArrayScanner::into_elements`]
pub struct Elements<R> {
    scanner: ArrayScanner<R>,
}

impl<R: Read> Iterator for Elements<R> {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.scanner.phase == Phase::Failed {
            return None;
        }
        match self.scanner.next_element() {
            Ok(Some(element)) => Some(Ok(element.bytes().to_vec())),
            Ok(None) => None,
            Err(err) => Some(Err(err)),
        }
    }
}

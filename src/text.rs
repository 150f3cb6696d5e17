use std::collections::VecDeque;
use std::fmt;

use bitreader::{BitReader, BitReaderError};
use log::trace;

lazy_static! {
    /// The three alphabet rows for Z-string decoding. Row 2 slot 0 is the
    /// reserved 10-bit escape and never looked up directly; slot 1 is newline.
    static ref ALPHABETS: [Vec<char>; 3] = [
        "abcdefghijklmnopqrstuvwxyz".chars().collect(),
        "ABCDEFGHIJKLMNOPQRSTUVWXYZ".chars().collect(),
        " \n0123456789.,!?_#'\"/\\-:()".chars().collect(),
    ];
}

/// Errors surfaced while decoding or encoding Z-strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextError {
    /// The z-character stream ended inside a word or mid-sequence.
    UnexpectedEof,
    /// A ZSCII code point outside the supported set.
    ZsciiDecode(u16),
    /// An abbreviation z-character appeared where no expander is available
    /// (inside an abbreviation, or in a context that forbids them).
    AbbreviationNotAllowed,
    /// A string or abbreviation address points outside the memory image.
    BadAddress(usize),
}

impl fmt::Display for TextError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TextError::UnexpectedEof => write!(f, "unexpected end of z-character stream"),
            TextError::ZsciiDecode(code) => write!(f, "invalid ZSCII code point {code:#05x}"),
            TextError::AbbreviationNotAllowed => {
                write!(f, "abbreviation not allowed in this string")
            }
            TextError::BadAddress(addr) => write!(f, "string address {addr:#06x} out of range"),
        }
    }
}

impl std::error::Error for TextError {}

impl From<BitReaderError> for TextError {
    fn from(_: BitReaderError) -> TextError {
        TextError::UnexpectedEof
    }
}

/// Expands abbreviation entries into already-decoded text.
///
/// Abbreviations cannot contain further abbreviations, so an expander
/// decodes its entry without one.
pub trait Expander {
    fn expand(&self, entry: usize) -> Result<String, TextError>;
}

/// The standard expander: reads the abbreviation table in the memory image.
/// Table entries are z-word addresses (doubled to get the byte address).
pub struct Abbreviations<'a> {
    memory: &'a [u8],
    table_addr: usize,
}

impl<'a> Abbreviations<'a> {
    pub fn new(memory: &'a [u8], table_addr: usize) -> Abbreviations<'a> {
        Abbreviations { memory, table_addr }
    }
}

impl Expander for Abbreviations<'_> {
    fn expand(&self, entry: usize) -> Result<String, TextError> {
        let slot = self.table_addr + 2 * entry;
        if slot + 1 >= self.memory.len() {
            return Err(TextError::BadAddress(slot));
        }
        let word = ((self.memory[slot] as usize) << 8) | self.memory[slot + 1] as usize;
        let addr = word * 2;
        if addr >= self.memory.len() {
            return Err(TextError::BadAddress(addr));
        }
        trace!("abbreviation {} at {:#06x}", entry, addr);
        let (text, _) = decode_string(&self.memory[addr..], true, None)?;
        Ok(text)
    }
}

fn unpack_word(pair: &[u8; 2]) -> Result<(bool, [u8; 3]), TextError> {
    let mut br = BitReader::new(pair);
    let last = br.read_u8(1)? == 1;
    let mut chars = [0u8; 3];
    for c in chars.iter_mut() {
        *c = br.read_u8(5)?;
    }
    Ok((last, chars))
}

/// Streams 5-bit z-characters out of a big-endian word sequence.
///
/// A word with its top bit set terminates the stream after its third
/// character; that termination is a clean end, not an error. Running off
/// the end of the bytes mid-word is `UnexpectedEof`.
pub struct ZcharReader<'a> {
    bytes: &'a [u8],
    pos: usize,
    chars: [u8; 3],
    idx: usize,
    last: bool,
    finished: bool,
}

impl<'a> ZcharReader<'a> {
    pub fn new(bytes: &'a [u8]) -> ZcharReader<'a> {
        ZcharReader {
            bytes,
            pos: 0,
            chars: [0; 3],
            idx: 3,
            last: false,
            finished: false,
        }
    }

    /// Bytes consumed so far (always a multiple of two).
    pub fn bytes_read(&self) -> usize {
        self.pos
    }
}

impl Iterator for ZcharReader<'_> {
    type Item = Result<u8, TextError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        if self.idx == 3 {
            if self.last {
                self.finished = true;
                return None;
            }
            if self.pos + 2 > self.bytes.len() {
                self.finished = true;
                return Some(Err(TextError::UnexpectedEof));
            }
            let pair = [self.bytes[self.pos], self.bytes[self.pos + 1]];
            self.pos += 2;
            match unpack_word(&pair) {
                Ok((last, chars)) => {
                    self.last = last;
                    self.chars = chars;
                    self.idx = 0;
                }
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e));
                }
            }
        }
        let c = self.chars[self.idx];
        self.idx += 1;
        Some(Ok(c))
    }
}

/// Turns z-characters into text: shift alphabets, abbreviations, and
/// 10-bit ZSCII escapes.
///
/// `output` selects output-context ZSCII (code 0 decodes to nothing);
/// without an `expander`, abbreviation codes are a hard error.
pub struct ZsciiDecoder<'a, I> {
    zchars: I,
    expander: Option<&'a dyn Expander>,
    output: bool,
    pending: VecDeque<char>,
}

impl<'a, I> ZsciiDecoder<'a, I>
where
    I: Iterator<Item = Result<u8, TextError>>,
{
    pub fn new(zchars: I, output: bool, expander: Option<&'a dyn Expander>) -> Self {
        ZsciiDecoder {
            zchars,
            expander,
            output,
            pending: VecDeque::new(),
        }
    }

    fn next_zchar(&mut self) -> Result<u8, TextError> {
        match self.zchars.next() {
            Some(Ok(z)) => Ok(z),
            Some(Err(e)) => Err(e),
            None => Err(TextError::UnexpectedEof),
        }
    }
}

impl<I> Iterator for ZsciiDecoder<'_, I>
where
    I: Iterator<Item = Result<u8, TextError>>,
{
    type Item = Result<char, TextError>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(c) = self.pending.pop_front() {
            return Some(Ok(c));
        }

        // Shifts select an alphabet for exactly one following character.
        // Chained shifts are tolerated; the last one wins.
        let mut shift = 0usize;
        loop {
            let z = match self.zchars.next() {
                Some(Ok(z)) => z,
                Some(Err(e)) => return Some(Err(e)),
                None => return None,
            };
            match z {
                0 => return Some(Ok(' ')),
                1..=3 => {
                    let expander = match self.expander {
                        Some(e) => e,
                        None => return Some(Err(TextError::AbbreviationNotAllowed)),
                    };
                    let x = match self.next_zchar() {
                        Ok(x) => x,
                        Err(e) => return Some(Err(e)),
                    };
                    let entry = 32 * (z as usize - 1) + x as usize;
                    match expander.expand(entry) {
                        Ok(text) => self.pending.extend(text.chars()),
                        Err(e) => return Some(Err(e)),
                    }
                    if let Some(c) = self.pending.pop_front() {
                        return Some(Ok(c));
                    }
                    shift = 0;
                }
                4 => shift = 1,
                5 => shift = 2,
                6 if shift == 2 => {
                    let x1 = match self.next_zchar() {
                        Ok(x) => x,
                        Err(e) => return Some(Err(e)),
                    };
                    let x2 = match self.next_zchar() {
                        Ok(x) => x,
                        Err(e) => return Some(Err(e)),
                    };
                    let code = ((x1 as u16) << 5) | x2 as u16;
                    match zscii_to_char(code, self.output) {
                        Ok(Some(c)) => return Some(Ok(c)),
                        Ok(None) => shift = 0,
                        Err(e) => return Some(Err(e)),
                    }
                }
                _ => {
                    let row = shift;
                    return Some(Ok(ALPHABETS[row][(z - 6) as usize]));
                }
            }
        }
    }
}

/// Decode a Z-string from the start of `bytes`.
/// Returns the text and the number of bytes consumed.
pub fn decode_string(
    bytes: &[u8],
    output: bool,
    expander: Option<&dyn Expander>,
) -> Result<(String, usize), TextError> {
    let mut reader = ZcharReader::new(bytes);
    let mut text = String::new();
    {
        let decoder = ZsciiDecoder::new(&mut reader, output, expander);
        for c in decoder {
            text.push(c?);
        }
    }
    Ok((text, reader.bytes_read()))
}

/// Map a ZSCII code point to a character. Code 0 decodes to nothing in
/// output context; anything outside newline and printable ASCII fails.
pub fn zscii_to_char(code: u16, output: bool) -> Result<Option<char>, TextError> {
    match code {
        0 if output => Ok(None),
        13 => Ok(Some('\n')),
        32..=126 => Ok(Some(code as u8 as char)),
        _ => Err(TextError::ZsciiDecode(code)),
    }
}

/// Map a character to its ZSCII code, if it has one.
pub fn char_to_zscii(c: char) -> Option<u8> {
    match c {
        '\n' => Some(13),
        ' '..='~' => Some(c as u8),
        _ => None,
    }
}

/// Dictionary key width in z-characters: 6 (v1-3) or 9 (v4+).
pub fn resolution(version: u8) -> usize {
    if version <= 3 {
        6
    } else {
        9
    }
}

fn zchars_for(c: char, out: &mut Vec<u8>) {
    if let Some(i) = ALPHABETS[0].iter().position(|&a| a == c) {
        out.push(6 + i as u8);
        return;
    }
    // A2 slots 0 and 1 are the escape and newline, not direct members.
    if let Some(i) = ALPHABETS[2].iter().skip(2).position(|&a| a == c) {
        out.push(5);
        out.push(8 + i as u8);
        return;
    }
    match char_to_zscii(c) {
        Some(code) => {
            out.push(5);
            out.push(6);
            out.push(code >> 5);
            out.push(code & 0x1f);
        }
        None => {
            // Unencodable characters become z-char padding.
            out.push(5);
        }
    }
}

/// Encode text into the fixed-width z-character form used for dictionary
/// keys: lowercased input, truncated to the resolution, padded with 5s,
/// packed three to a word with the top bit set on the final word.
pub fn encode(text: &str, version: u8) -> Vec<u8> {
    let width = resolution(version);
    let mut zchars = Vec::with_capacity(width + 3);
    for c in text.chars() {
        if zchars.len() >= width {
            break;
        }
        if c == ' ' {
            zchars.push(0);
        } else {
            zchars_for(c, &mut zchars);
        }
    }
    zchars.truncate(width);
    while zchars.len() < width {
        zchars.push(5);
    }

    let mut bytes = Vec::with_capacity(width / 3 * 2);
    for (i, chunk) in zchars.chunks(3).enumerate() {
        let mut word = ((chunk[0] as u16) << 10) | ((chunk[1] as u16) << 5) | chunk[2] as u16;
        if (i + 1) * 3 >= width {
            word |= 0x8000;
        }
        bytes.push((word >> 8) as u8);
        bytes.push((word & 0xff) as u8);
    }
    bytes
}

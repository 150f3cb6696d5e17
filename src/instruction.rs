use std::fmt;
use std::io;

use bitreader::BitReader;

use crate::opcode_tables::instruction_name;
use crate::text::{decode_string, Expander, TextError};

/// Decoder failures: truncated bytecode is an I/O error; a bad inline
/// string is a text error.
#[derive(Debug)]
pub enum DecodeError {
    Io(io::Error),
    Text(TextError),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Io(e) => write!(f, "instruction stream: {e}"),
            DecodeError::Text(e) => write!(f, "inline text: {e}"),
        }
    }
}

impl std::error::Error for DecodeError {}

impl From<io::Error> for DecodeError {
    fn from(e: io::Error) -> DecodeError {
        DecodeError::Io(e)
    }
}

impl From<TextError> for DecodeError {
    fn from(e: TextError) -> DecodeError {
        DecodeError::Text(e)
    }
}

fn eof() -> io::Error {
    io::Error::new(io::ErrorKind::UnexpectedEof, "bytecode ends inside instruction")
}

/// Bounds-checked sequential reader over the memory image.
struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8], pos: usize) -> Reader<'a> {
        Reader { bytes, pos }
    }

    fn byte(&mut self) -> io::Result<u8> {
        let b = *self.bytes.get(self.pos).ok_or_else(eof)?;
        self.pos += 1;
        Ok(b)
    }

    fn word(&mut self) -> io::Result<u16> {
        let high = self.byte()? as u16;
        let low = self.byte()? as u16;
        Ok((high << 8) | low)
    }
}

/// One decoded operand. Constants carry their literal value; variable
/// operands carry the variable number and resolve at execution time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    Large(u16),
    Small(u8),
    Variable(u8),
}

impl Operand {
    /// The raw encoded value, before any variable resolution.
    pub fn raw(&self) -> u16 {
        match *self {
            Operand::Large(v) => v,
            Operand::Small(v) => v as u16,
            Operand::Variable(v) => v as u16,
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Operand::Large(v) => write!(f, "#{v:04x}"),
            Operand::Small(v) => write!(f, "#{v:02x}"),
            Operand::Variable(0) => write!(f, "sp"),
            Operand::Variable(v) if v < 0x10 => write!(f, "local{v}"),
            Operand::Variable(v) => write!(f, "g{:02x}", v - 0x10),
        }
    }
}

/// A decoded branch suffix: the sense bit and a signed offset. Offsets 0
/// and 1 are reserved for "return false"/"return true"; any other offset
/// moves the PC to (address after the suffix) + offset - 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BranchInfo {
    pub on_true: bool,
    pub offset: i16,
}

impl BranchInfo {
    fn parse(r: &mut Reader<'_>) -> io::Result<BranchInfo> {
        let first = r.byte()?;
        let on_true = first & 0x80 != 0;
        let offset = if first & 0x40 != 0 {
            // Single byte: unsigned 6-bit offset.
            (first & 0x3f) as i16
        } else {
            // Two bytes: signed 14-bit offset.
            let second = r.byte()?;
            let raw = (((first & 0x3f) as u16) << 8) | second as u16;
            ((raw << 2) as i16) >> 2
        };
        Ok(BranchInfo { on_true, offset })
    }

    /// Serialize back to the 1- or 2-byte wire form.
    pub fn encode(&self) -> Vec<u8> {
        let sense = if self.on_true { 0x80u8 } else { 0 };
        if (0..=63).contains(&self.offset) {
            vec![sense | 0x40 | self.offset as u8]
        } else {
            let raw = self.offset as u16 & 0x3fff;
            vec![sense | (raw >> 8) as u8, (raw & 0xff) as u8]
        }
    }
}

impl fmt::Display for BranchInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sense = if self.on_true { "" } else { "~" };
        match self.offset {
            0 => write!(f, "?{sense}rfalse"),
            1 => write!(f, "?{sense}rtrue"),
            o => write!(f, "?{sense}{o:+}"),
        }
    }
}

/// A decoded instruction, tagged by encoding form. Each variant carries
/// its operands and any store/branch/text suffix; `len` is the exact
/// number of bytes the instruction occupies.
#[derive(Debug, Clone)]
pub enum Instruction {
    Long {
        opcode: u8,
        operands: Vec<Operand>,
        store: Option<u8>,
        branch: Option<BranchInfo>,
        len: usize,
    },
    Short {
        opcode: u8,
        operands: Vec<Operand>,
        store: Option<u8>,
        branch: Option<BranchInfo>,
        text: Option<String>,
        len: usize,
    },
    Variable {
        opcode: u8,
        /// True when the opcode number selects from the 2OP set.
        two_op: bool,
        operands: Vec<Operand>,
        store: Option<u8>,
        branch: Option<BranchInfo>,
        len: usize,
    },
    Extended {
        opcode: u8,
        operands: Vec<Operand>,
        store: Option<u8>,
        branch: Option<BranchInfo>,
        len: usize,
    },
}

/// Operand-count class an opcode number belongs to, used for the
/// store/branch tables and name lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpcodeSet {
    Op0,
    Op1,
    Op2,
    Var,
    Ext,
}

impl Instruction {
    pub fn opcode_number(&self) -> u8 {
        match self {
            Instruction::Long { opcode, .. }
            | Instruction::Short { opcode, .. }
            | Instruction::Variable { opcode, .. }
            | Instruction::Extended { opcode, .. } => *opcode,
        }
    }

    pub fn operands(&self) -> &[Operand] {
        match self {
            Instruction::Long { operands, .. }
            | Instruction::Short { operands, .. }
            | Instruction::Variable { operands, .. }
            | Instruction::Extended { operands, .. } => operands,
        }
    }

    pub fn store_variable(&self) -> Option<u8> {
        match self {
            Instruction::Long { store, .. }
            | Instruction::Short { store, .. }
            | Instruction::Variable { store, .. }
            | Instruction::Extended { store, .. } => *store,
        }
    }

    pub fn branch(&self) -> Option<BranchInfo> {
        match self {
            Instruction::Long { branch, .. }
            | Instruction::Short { branch, .. }
            | Instruction::Variable { branch, .. }
            | Instruction::Extended { branch, .. } => *branch,
        }
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            Instruction::Short { text, .. } => text.as_deref(),
            _ => None,
        }
    }

    /// Total encoded size in bytes, including all suffixes.
    pub fn size(&self) -> usize {
        match self {
            Instruction::Long { len, .. }
            | Instruction::Short { len, .. }
            | Instruction::Variable { len, .. }
            | Instruction::Extended { len, .. } => *len,
        }
    }

    /// Which opcode set this instruction dispatches into.
    pub fn opcode_set(&self) -> OpcodeSet {
        match self {
            Instruction::Long { .. } => OpcodeSet::Op2,
            Instruction::Short { operands, .. } => {
                if operands.is_empty() {
                    OpcodeSet::Op0
                } else {
                    OpcodeSet::Op1
                }
            }
            Instruction::Variable { two_op, .. } => {
                if *two_op {
                    OpcodeSet::Op2
                } else {
                    OpcodeSet::Var
                }
            }
            Instruction::Extended { .. } => OpcodeSet::Ext,
        }
    }

    pub fn name(&self, version: u8) -> &'static str {
        instruction_name(self.opcode_set(), self.opcode_number(), version)
    }
}

/// Store-kind: does (set, opcode) write a result variable?
pub fn is_store(set: OpcodeSet, opcode: u8, version: u8) -> bool {
    match set {
        OpcodeSet::Op0 => match opcode {
            0x05 | 0x06 => version == 4, // save/restore store in v4 only
            0x09 => version >= 5,        // catch
            _ => false,
        },
        OpcodeSet::Op1 => match opcode {
            0x01..=0x04 | 0x08 | 0x0e => true, // get_sibling..get_prop_len, call_1s, load
            0x0f => version <= 4,              // not; call_1n in v5+
            _ => false,
        },
        OpcodeSet::Op2 => matches!(opcode, 0x08 | 0x09 | 0x0f..=0x19),
        OpcodeSet::Var => match opcode {
            0x00 | 0x07 | 0x0c | 0x16 | 0x17 => true, // call_vs, random, call_vs2, read_char, scan_table
            0x04 => version >= 5,                     // aread stores the terminator
            0x18 => true,                             // not (v5+)
            _ => false,
        },
        OpcodeSet::Ext => matches!(opcode, 0x00..=0x04 | 0x09 | 0x0a | 0x0c),
    }
}

/// Branch-kind: does (set, opcode) carry a branch suffix?
pub fn is_branch(set: OpcodeSet, opcode: u8, version: u8) -> bool {
    match set {
        OpcodeSet::Op0 => match opcode {
            0x05 | 0x06 => version <= 3, // save/restore branch in v1-3
            0x0d | 0x0f => true,         // verify, piracy
            _ => false,
        },
        OpcodeSet::Op1 => matches!(opcode, 0x00..=0x02), // jz, get_sibling, get_child
        OpcodeSet::Op2 => matches!(opcode, 0x01..=0x07 | 0x0a),
        OpcodeSet::Var => matches!(opcode, 0x17 | 0x1f), // scan_table, check_arg_count
        OpcodeSet::Ext => false,
    }
}

fn operand_types(type_byte: u8, count: usize) -> io::Result<Vec<u8>> {
    let buf = [type_byte];
    let mut br = BitReader::new(&buf);
    let mut types = Vec::with_capacity(count);
    for _ in 0..count {
        types.push(br.read_u8(2).map_err(|_| eof())?);
    }
    Ok(types)
}

fn read_operands(r: &mut Reader<'_>, types: &[u8]) -> io::Result<Vec<Operand>> {
    let mut operands = Vec::new();
    for t in types {
        let operand = match t {
            0b00 => Operand::Large(r.word()?),
            0b01 => Operand::Small(r.byte()?),
            0b10 => Operand::Variable(r.byte()?),
            _ => break, // omitted: no further operands follow
        };
        operands.push(operand);
    }
    Ok(operands)
}

/// Decode the instruction at `pc`. `expander` resolves abbreviations in
/// inline strings. The returned instruction's `len` equals the exact byte
/// count consumed, so `pc + len` is the next instruction.
pub fn decode(
    memory: &[u8],
    pc: usize,
    version: u8,
    expander: Option<&dyn Expander>,
) -> Result<Instruction, DecodeError> {
    let mut r = Reader::new(memory, pc);
    let first = r.byte()?;

    if version >= 5 && first == 0xbe {
        let opcode = r.byte()?;
        let types = operand_types(r.byte()?, 4)?;
        let operands = read_operands(&mut r, &types)?;
        let store = read_store(&mut r, OpcodeSet::Ext, opcode, version)?;
        let branch = read_branch(&mut r, OpcodeSet::Ext, opcode, version)?;
        return Ok(Instruction::Extended {
            opcode,
            operands,
            store,
            branch,
            len: r.pos - pc,
        });
    }

    match first & 0xc0 {
        0xc0 => {
            // Variable form; bit 5 selects the VAR or 2OP opcode set.
            let opcode = first & 0x1f;
            let two_op = first & 0x20 == 0;
            // call_vs2/call_vn2 carry a second type byte for up to eight operands.
            let mut types = if first == 0xec || first == 0xfa {
                let mut t = operand_types(r.byte()?, 4)?;
                t.extend(operand_types(r.byte()?, 4)?);
                t
            } else {
                operand_types(r.byte()?, 4)?
            };
            // Once a slot reads omitted the rest must be too.
            if let Some(end) = types.iter().position(|t| *t == 0b11) {
                types.truncate(end);
            }
            let operands = read_operands(&mut r, &types)?;
            let set = if two_op { OpcodeSet::Op2 } else { OpcodeSet::Var };
            let store = read_store(&mut r, set, opcode, version)?;
            let branch = read_branch(&mut r, set, opcode, version)?;
            Ok(Instruction::Variable {
                opcode,
                two_op,
                operands,
                store,
                branch,
                len: r.pos - pc,
            })
        }
        0x80 => {
            // Short form; operand type in bits 5-4, 0b11 meaning 0OP.
            let opcode = first & 0x0f;
            let operand_type = (first >> 4) & 0x03;
            let operands = read_operands(&mut r, &[operand_type])?;
            let set = if operands.is_empty() {
                OpcodeSet::Op0
            } else {
                OpcodeSet::Op1
            };
            let store = read_store(&mut r, set, opcode, version)?;
            let branch = read_branch(&mut r, set, opcode, version)?;
            // print and print_ret carry their text inline.
            let text = if set == OpcodeSet::Op0 && (opcode == 0x02 || opcode == 0x03) {
                let (text, consumed) = decode_string(&memory[r.pos..], true, expander)?;
                r.pos += consumed;
                Some(text)
            } else {
                None
            };
            Ok(Instruction::Short {
                opcode,
                operands,
                store,
                branch,
                text,
                len: r.pos - pc,
            })
        }
        _ => {
            // Long form: always two operands, types in bits 6 and 5.
            let opcode = first & 0x1f;
            let op = |bit: bool, value: u8| {
                if bit {
                    Operand::Variable(value)
                } else {
                    Operand::Small(value)
                }
            };
            let v1 = r.byte()?;
            let v2 = r.byte()?;
            let operands = vec![op(first & 0x40 != 0, v1), op(first & 0x20 != 0, v2)];
            let store = read_store(&mut r, OpcodeSet::Op2, opcode, version)?;
            let branch = read_branch(&mut r, OpcodeSet::Op2, opcode, version)?;
            Ok(Instruction::Long {
                opcode,
                operands,
                store,
                branch,
                len: r.pos - pc,
            })
        }
    }
}

fn read_store(
    r: &mut Reader<'_>,
    set: OpcodeSet,
    opcode: u8,
    version: u8,
) -> io::Result<Option<u8>> {
    if is_store(set, opcode, version) {
        Ok(Some(r.byte()?))
    } else {
        Ok(None)
    }
}

fn read_branch(
    r: &mut Reader<'_>,
    set: OpcodeSet,
    opcode: u8,
    version: u8,
) -> io::Result<Option<BranchInfo>> {
    if is_branch(set, opcode, version) {
        Ok(Some(BranchInfo::parse(r)?))
    } else {
        Ok(None)
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The name table needs a version; v5 covers every set for display.
        write!(f, "{}", self.name(5))?;
        for operand in self.operands() {
            write!(f, " {operand}")?;
        }
        if let Some(store) = self.store_variable() {
            write!(f, " -> {}", Operand::Variable(store))?;
        }
        if let Some(branch) = self.branch() {
            write!(f, " {branch}")?;
        }
        if let Some(text) = self.text() {
            let excerpt: String = text.chars().take(20).collect();
            write!(f, " \"{excerpt}\"")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_v3(bytes: &[u8]) -> Instruction {
        decode(bytes, 0, 3, None).unwrap()
    }

    #[test]
    fn test_long_form_add() {
        // add small 3, variable 2 -> stack
        let inst = decode_v3(&[0x54, 0x03, 0x02, 0x00]);
        assert!(matches!(inst, Instruction::Long { .. }));
        assert_eq!(inst.opcode_number(), 0x14);
        assert_eq!(
            inst.operands(),
            &[Operand::Small(3), Operand::Variable(2)]
        );
        assert_eq!(inst.store_variable(), Some(0));
        assert_eq!(inst.size(), 4);
    }

    #[test]
    fn test_long_form_branch() {
        // je small small, branch on true, single-byte offset 11
        let inst = decode_v3(&[0x01, 0x05, 0x05, 0xc0 | 11]);
        assert_eq!(inst.opcode_number(), 0x01);
        let branch = inst.branch().unwrap();
        assert!(branch.on_true);
        assert_eq!(branch.offset, 11);
        assert_eq!(inst.size(), 4);
    }

    #[test]
    fn test_short_form_1op() {
        // jz large constant with branch
        let inst = decode_v3(&[0x80, 0x12, 0x34, 0x40 | 5]);
        assert_eq!(inst.opcode_set(), OpcodeSet::Op1);
        assert_eq!(inst.opcode_number(), 0x00);
        assert_eq!(inst.operands(), &[Operand::Large(0x1234)]);
        assert_eq!(inst.branch().unwrap().offset, 5);
        assert!(!inst.branch().unwrap().on_true);
    }

    #[test]
    fn test_short_form_0op() {
        let inst = decode_v3(&[0xb0]); // rtrue
        assert_eq!(inst.opcode_set(), OpcodeSet::Op0);
        assert_eq!(inst.opcode_number(), 0x00);
        assert!(inst.operands().is_empty());
        assert_eq!(inst.size(), 1);
    }

    #[test]
    fn test_print_consumes_inline_text() {
        // print "hi": h=13, i=14 packed with a pad into one end-marked word.
        let word = 0x8000u16 | (13 << 10) | (14 << 5) | 5;
        let inst = decode_v3(&[0xb2, (word >> 8) as u8, (word & 0xff) as u8]);
        assert_eq!(inst.text(), Some("hi"));
        assert_eq!(inst.size(), 3);
    }

    #[test]
    fn test_variable_form_call() {
        // call packed-addr, two args
        let inst = decode_v3(&[0xe0, 0x17, 0x12, 0x34, 0x01, 0x02, 0x00]);
        assert!(matches!(
            inst,
            Instruction::Variable { two_op: false, .. }
        ));
        assert_eq!(inst.opcode_number(), 0x00);
        assert_eq!(
            inst.operands(),
            &[
                Operand::Large(0x1234),
                Operand::Small(1),
                Operand::Small(2)
            ]
        );
        assert_eq!(inst.store_variable(), Some(0));
        assert_eq!(inst.size(), 7);
    }

    #[test]
    fn test_variable_form_2op_je_three_operands() {
        // je encoded in variable form with three small constants
        let inst = decode_v3(&[0xc1, 0x57, 0x01, 0x02, 0x03, 0x80 | 0x40 | 2]);
        assert!(matches!(inst, Instruction::Variable { two_op: true, .. }));
        assert_eq!(inst.opcode_set(), OpcodeSet::Op2);
        assert_eq!(inst.operands().len(), 3);
        assert!(inst.branch().unwrap().on_true);
    }

    #[test]
    fn test_double_type_byte_call_vs2() {
        // 0xec reads two type bytes: five small-constant operands here.
        let inst = decode(
            &[0xec, 0x55, 0x7f, 0x0a, 0x0b, 0x0c, 0x0d, 0x0e, 0x00],
            0,
            5,
            None,
        )
        .unwrap();
        assert_eq!(inst.operands().len(), 5);
        assert_eq!(inst.store_variable(), Some(0));
        assert_eq!(inst.size(), 9);
    }

    #[test]
    fn test_extended_form() {
        let inst = decode(&[0xbe, 0x05, 0x57, 0x01, 0x02, 0x03], 0, 5, None).unwrap();
        match &inst {
            Instruction::Extended { opcode, operands, .. } => {
                assert_eq!(*opcode, 0x05);
                assert_eq!(
                    operands.as_slice(),
                    &[
                        Operand::Small(1),
                        Operand::Small(2),
                        Operand::Small(3)
                    ]
                );
            }
            other => panic!("expected extended instruction, got {other:?}"),
        }
    }

    #[test]
    fn test_extended_is_short_before_v5() {
        let inst = decode(&[0xbe, 0x05], 0, 3, None).unwrap();
        assert!(matches!(inst, Instruction::Short { .. }));
    }

    #[test]
    fn test_truncated_input_is_io_error() {
        match decode(&[0x54, 0x03], 0, 3, None) {
            Err(DecodeError::Io(e)) => {
                assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof);
            }
            other => panic!("expected io error, got {other:?}"),
        }
    }

    #[test]
    fn test_branch_parse_single_byte() {
        // First byte 0x7f: condition false, single byte, offset 63.
        let inst = decode_v3(&[0x01, 0x00, 0x00, 0x7f]);
        let branch = inst.branch().unwrap();
        assert!(!branch.on_true);
        assert_eq!(branch.offset, 63);
    }

    #[test]
    fn test_branch_parse_two_byte_negative() {
        // Word 0x3fff: two-byte form, offset -1.
        let inst = decode_v3(&[0x01, 0x00, 0x00, 0x3f, 0xff]);
        let branch = inst.branch().unwrap();
        assert!(!branch.on_true);
        assert_eq!(branch.offset, -1);
    }

    #[test]
    fn test_branch_round_trip() {
        for on_true in [false, true] {
            for offset in (-8192i16..8192).step_by(37).chain([0, 1, 63, -1, 8191, -8192]) {
                let branch = BranchInfo { on_true, offset };
                let encoded = branch.encode();
                let mut bytes = encoded.clone();
                bytes.push(0xaa); // trailing noise
                let mut r = Reader::new(&bytes, 0);
                let parsed = BranchInfo::parse(&mut r).unwrap();
                assert_eq!(parsed, branch);
                assert_eq!(r.pos, encoded.len());
            }
        }
    }

    #[test]
    fn test_decoded_length_matches_consumption() {
        let cases: Vec<Vec<u8>> = vec![
            vec![0x54, 0x03, 0x02, 0x00],
            vec![0xb0],
            vec![0x80, 0x12, 0x34, 0x45],
            vec![0xe0, 0x2b, 0x12, 0x34, 0x01, 0x02, 0x00],
            vec![0x01, 0x00, 0x00, 0x3f, 0xff],
        ];
        for bytes in cases {
            let inst = decode(&bytes, 0, 3, None).unwrap();
            assert_eq!(inst.size(), bytes.len(), "length of {bytes:02x?}");
        }
    }
}

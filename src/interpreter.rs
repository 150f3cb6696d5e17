use std::fmt;
use std::io;

use log::{debug, trace};

use crate::dictionary::{self, Dictionary};
use crate::header::{
    OFF_FLAGS1, OFF_FLAGS2, OFF_SCREEN_HEIGHT, OFF_SCREEN_WIDTH, OFF_STANDARD_REVISION,
};
use crate::instruction::{self, DecodeError, Instruction, OpcodeSet, Operand};
use crate::presenter::{Presenter, SoundAction};
use crate::text::{self, Abbreviations, TextError};
use crate::vm::{CallFrame, MAX_LOCALS, VM};
use crate::zrand::ZRand;

/// Errors surfaced from [`Interpreter::step`]. `Quit` and `Restart` are
/// control-flow sentinels for the driver, not faults; everything else
/// leaves the PC rolled back to the failing instruction's start.
#[derive(Debug)]
pub enum ExecutionError {
    /// Text decoding failed inside an opcode.
    Text(TextError),
    /// An opcode failed; carries the instruction's address and display form.
    Instruction {
        pc: u32,
        instruction: String,
        source: Box<ExecutionError>,
    },
    /// A structural limit was exceeded (routine locals, bootstrap return).
    LimitExceeded(String),
    /// get_prop/put_prop on a property larger than a word.
    PropertySize(usize),
    /// The opcode decoded but this interpreter cannot execute it.
    Unimplemented(String),
    /// Presenter or bytecode-stream I/O failure.
    Io(io::Error),
    /// Opaque runtime fault (stack underflow, bad object, zero divisor...).
    Fault(String),
    /// The story executed `quit`.
    Quit,
    /// The story executed `restart`; the driver reloads the image.
    Restart,
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionError::Text(e) => write!(f, "text decode: {e}"),
            ExecutionError::Instruction {
                pc,
                instruction,
                source,
            } => write!(f, "at {pc:#07x} `{instruction}`: {source}"),
            ExecutionError::LimitExceeded(what) => write!(f, "limit exceeded: {what}"),
            ExecutionError::PropertySize(size) => {
                write!(f, "property of size {size} cannot be read or written as a value")
            }
            ExecutionError::Unimplemented(what) => write!(f, "unimplemented: {what}"),
            ExecutionError::Io(e) => write!(f, "i/o: {e}"),
            ExecutionError::Fault(what) => write!(f, "{what}"),
            ExecutionError::Quit => write!(f, "story quit"),
            ExecutionError::Restart => write!(f, "story restart"),
        }
    }
}

impl std::error::Error for ExecutionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ExecutionError::Instruction { source, .. } => Some(source),
            ExecutionError::Text(e) => Some(e),
            ExecutionError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl ExecutionError {
    /// True for the Quit/Restart sentinels the driver acts on.
    pub fn is_control_flow(&self) -> bool {
        matches!(self, ExecutionError::Quit | ExecutionError::Restart)
    }
}

impl From<TextError> for ExecutionError {
    fn from(e: TextError) -> ExecutionError {
        ExecutionError::Text(e)
    }
}

impl From<io::Error> for ExecutionError {
    fn from(e: io::Error) -> ExecutionError {
        ExecutionError::Io(e)
    }
}

impl From<String> for ExecutionError {
    fn from(s: String) -> ExecutionError {
        ExecutionError::Fault(s)
    }
}

impl From<DecodeError> for ExecutionError {
    fn from(e: DecodeError) -> ExecutionError {
        match e {
            DecodeError::Io(e) => ExecutionError::Io(e),
            DecodeError::Text(e) => ExecutionError::Text(e),
        }
    }
}

/// Which sinks output currently reaches. While any memory table is
/// selected it captures everything and the other streams go quiet.
struct OutputStreams {
    screen: bool,
    transcript: bool,
    echo: bool,
    /// Stack of (table start, write cursor) for stream 3.
    tables: Vec<(u32, u32)>,
}

impl Default for OutputStreams {
    fn default() -> OutputStreams {
        OutputStreams {
            screen: true,
            transcript: true,
            echo: false,
            tables: Vec::new(),
        }
    }
}

/// The execution engine: dispatches decoded instructions against the VM,
/// routing all side effects through the presenter.
pub struct Interpreter<P: Presenter> {
    pub vm: VM,
    pub presenter: P,
    rng: ZRand,
    streams: OutputStreams,
    window: u16,
    instruction_count: u64,
}

impl<P: Presenter> Interpreter<P> {
    pub fn new(vm: VM, presenter: P) -> Interpreter<P> {
        let mut interp = Interpreter {
            vm,
            presenter,
            rng: ZRand::new_uniform(),
            streams: OutputStreams::default(),
            window: 0,
            instruction_count: 0,
        };
        interp.prepare_header();
        interp
    }

    /// Replace the RNG (the driver uses this for `--seed`).
    pub fn set_rng(&mut self, rng: ZRand) {
        self.rng = rng;
    }

    pub fn instruction_count(&self) -> u64 {
        self.instruction_count
    }

    /// Publish interpreter capabilities into the header: status-line and
    /// sound availability bits, default screen size, and a zeroed
    /// standard-revision word. Runs on load and again after a restore.
    fn prepare_header(&mut self) {
        let memory = &mut self.vm.game.memory;
        memory[OFF_SCREEN_WIDTH] = 255;
        memory[OFF_SCREEN_HEIGHT] = 255;
        memory[OFF_STANDARD_REVISION] = 0;
        memory[OFF_STANDARD_REVISION + 1] = 0;

        let version = memory[0];
        if version < 4 {
            // Bit 4 of flags1 means "status line NOT available".
            if self.presenter.has_status_line() {
                memory[OFF_FLAGS1] &= !0x10;
            } else {
                memory[OFF_FLAGS1] |= 0x10;
            }
        } else if self.presenter.has_sound() {
            memory[OFF_FLAGS1] |= 0x20;
        } else {
            memory[OFF_FLAGS1] &= !0x20;
        }
        if !self.presenter.has_sound() {
            // Flags2 bit 7 advertises sound-effect support.
            memory[OFF_FLAGS2 + 1] &= !0x80;
        }
    }

    /// Run until the story quits, restarts, or faults.
    pub fn run(&mut self) -> Result<(), ExecutionError> {
        loop {
            self.step()?;
        }
    }

    /// Run at most `limit` instructions (test and debugger harness).
    pub fn run_with_limit(&mut self, limit: u64) -> Result<(), ExecutionError> {
        for _ in 0..limit {
            self.step()?;
        }
        Ok(())
    }

    /// Decode and execute one instruction. On failure the PC is restored
    /// to the instruction's start and the error wrapped with its address.
    pub fn step(&mut self) -> Result<(), ExecutionError> {
        let start_pc = self.vm.pc;
        let version = self.vm.version();
        let inst = {
            let memory = &self.vm.game.memory;
            let abbrevs =
                Abbreviations::new(memory, self.vm.game.header.abbrev_table as usize);
            instruction::decode(memory, start_pc as usize, version, Some(&abbrevs))?
        };
        trace!("{start_pc:05x}: {inst}");

        self.vm.pc = start_pc + inst.size() as u32;
        self.instruction_count += 1;

        match self.execute(&inst) {
            Ok(()) => Ok(()),
            Err(e) if e.is_control_flow() => Err(e),
            Err(e) => {
                self.vm.pc = start_pc;
                Err(ExecutionError::Instruction {
                    pc: start_pc,
                    instruction: inst.to_string(),
                    source: Box::new(e),
                })
            }
        }
    }

    fn execute(&mut self, inst: &Instruction) -> Result<(), ExecutionError> {
        let operands = self.resolve_operands(inst)?;
        match inst.opcode_set() {
            OpcodeSet::Op0 => self.execute_0op(inst),
            OpcodeSet::Op1 => self.execute_1op(inst, &operands),
            OpcodeSet::Op2 => self.execute_2op(inst, &operands),
            OpcodeSet::Var => self.execute_var(inst, &operands),
            OpcodeSet::Ext => self.execute_ext(inst, &operands),
        }
    }

    /// Fetch operand values; variable operands read (and for the stack,
    /// pop) at this point.
    fn resolve_operands(&mut self, inst: &Instruction) -> Result<Vec<u16>, ExecutionError> {
        let mut values = Vec::with_capacity(inst.operands().len());
        for operand in inst.operands() {
            let value = match *operand {
                Operand::Large(v) => v,
                Operand::Small(v) => v as u16,
                Operand::Variable(v) => self.vm.read_variable(v)?,
            };
            values.push(value);
        }
        Ok(values)
    }

    /// Store `value` into the instruction's result variable, if it has one.
    fn store_result(&mut self, inst: &Instruction, value: u16) -> Result<(), ExecutionError> {
        if let Some(var) = inst.store_variable() {
            self.vm.write_variable(var, value)?;
        }
        Ok(())
    }

    /// Evaluate a branch suffix against `test`. Reserved offsets 0 and 1
    /// return false/true from the current routine; otherwise the PC (which
    /// already sits just past the suffix) moves by offset - 2.
    fn conditional(&mut self, inst: &Instruction, test: bool) -> Result<(), ExecutionError> {
        let branch = inst
            .branch()
            .ok_or_else(|| ExecutionError::Fault("branch suffix missing".to_string()))?;
        if test != branch.on_true {
            return Ok(());
        }
        match branch.offset {
            0 => self.return_from_routine(0),
            1 => self.return_from_routine(1),
            offset => {
                self.vm.pc = (self.vm.pc as i64 + offset as i64 - 2) as u32;
                Ok(())
            }
        }
    }

    /// Call the routine at packed address `packed`. Calling address 0
    /// just stores 0. v1-4 routines carry initial local values after the
    /// count byte; v5+ locals start at zero. Arguments overwrite the
    /// leading locals.
    fn call_routine(
        &mut self,
        packed: u16,
        args: &[u16],
        store: Option<u8>,
    ) -> Result<(), ExecutionError> {
        if packed == 0 {
            if let Some(var) = store {
                self.vm.write_variable(var, 0)?;
            }
            return Ok(());
        }
        let addr = self.vm.unpack_address(packed)?;
        let nlocals = self.vm.read_byte(addr);
        if nlocals as usize > MAX_LOCALS {
            return Err(ExecutionError::LimitExceeded(format!(
                "routine at {addr:#06x} declares {nlocals} locals"
            )));
        }

        let mut locals = vec![0u16; nlocals as usize];
        let body = if self.vm.version() <= 4 {
            for (i, local) in locals.iter_mut().enumerate() {
                *local = self.vm.read_word(addr + 1 + 2 * i as u32);
            }
            addr + 1 + 2 * nlocals as u32
        } else {
            addr + 1
        };
        for (i, arg) in args.iter().take(locals.len()).enumerate() {
            locals[i] = *arg;
        }

        trace!(
            "call {addr:#06x} ({nlocals} locals, {} args) -> {store:?}",
            args.len()
        );
        self.vm.call_stack.push(CallFrame {
            return_pc: self.vm.pc,
            store,
            locals,
            stack: Vec::new(),
            arg_count: args.len().min(255) as u8,
        });
        self.vm.pc = body;
        Ok(())
    }

    /// Pop the current frame and hand `value` to the caller's store
    /// variable. Returning from the bootstrap frame is fatal.
    fn return_from_routine(&mut self, value: u16) -> Result<(), ExecutionError> {
        if self.vm.call_stack.len() == 1 {
            return Err(ExecutionError::LimitExceeded(
                "return from the bootstrap frame".to_string(),
            ));
        }
        let frame = self
            .vm
            .call_stack
            .pop()
            .ok_or_else(|| ExecutionError::Fault("empty call stack".to_string()))?;
        self.vm.pc = frame.return_pc;
        if let Some(var) = frame.store {
            self.vm.write_variable(var, value)?;
        }
        trace!("return {value:#06x} to {:#06x}", frame.return_pc);
        Ok(())
    }

    /// Deliver text to the enabled output sinks. A selected memory table
    /// captures everything as ZSCII bytes and keeps its running length
    /// word current; otherwise the screen stream hands the text to the
    /// presenter with the active window id.
    fn print(&mut self, text: &str) -> Result<(), ExecutionError> {
        if let Some(&(start, mut cursor)) = self.streams.tables.last() {
            for c in text.chars() {
                let code = text::char_to_zscii(c).unwrap_or(b'?');
                self.vm.write_byte(cursor, code)?;
                cursor += 1;
            }
            self.vm.write_word(start, (cursor - start - 2) as u16)?;
            if let Some(top) = self.streams.tables.last_mut() {
                top.1 = cursor;
            }
            return Ok(());
        }
        if self.streams.screen {
            self.presenter.output(self.window, text)?;
        }
        Ok(())
    }

    /// Recompute and redraw the v1-3 status line: the short name of the
    /// object in global 0 on the left; a clock or score/turns pair from
    /// globals 1 and 2 on the right.
    fn refresh_status(&mut self) -> Result<(), ExecutionError> {
        if self.vm.version() > 3 || !self.presenter.has_status_line() {
            return Ok(());
        }
        let location = self.vm.read_global(0x10)?;
        let left = match self.vm.object_name(location) {
            Ok(name) => name,
            Err(e) => {
                debug!("status line object name: {e}");
                String::new()
            }
        };
        let g1 = self.vm.read_global(0x11)?;
        let g2 = self.vm.read_global(0x12)?;
        let right = if self.vm.read_byte(OFF_FLAGS1 as u32) & 0x02 != 0 {
            let hours = g1 % 24;
            let display = match hours % 12 {
                0 => 12,
                h => h,
            };
            let half = if hours < 12 { "AM" } else { "PM" };
            format!("{display}:{:02} {half}", g2 % 60)
        } else {
            format!("{}/{}", g1 as i16, g2)
        };
        self.presenter.status_line(&left, &right)?;
        Ok(())
    }

    fn execute_0op(&mut self, inst: &Instruction) -> Result<(), ExecutionError> {
        match inst.opcode_number() {
            0x00 => {
                // rtrue
                self.return_from_routine(1)
            }
            0x01 => {
                // rfalse
                self.return_from_routine(0)
            }
            0x02 => {
                // print
                let text = inst.text().unwrap_or("").to_string();
                self.print(&text)
            }
            0x03 => {
                // print_ret
                let mut text = inst.text().unwrap_or("").to_string();
                text.push('\n');
                self.print(&text)?;
                self.return_from_routine(1)
            }
            0x04 => {
                // nop
                Ok(())
            }
            0x05 => {
                // save (v1-3 branch form, v4 store form)
                match self.vm.version() {
                    1..=3 => self.save_branching(inst),
                    4 => self.save_storing(inst),
                    _ => Err(ExecutionError::Unimplemented(
                        "0OP save in v5+".to_string(),
                    )),
                }
            }
            0x06 => {
                // restore
                match self.vm.version() {
                    1..=3 => self.restore_branching(inst),
                    4 => self.restore_storing(inst),
                    _ => Err(ExecutionError::Unimplemented(
                        "0OP restore in v5+".to_string(),
                    )),
                }
            }
            0x07 => {
                // restart
                Err(ExecutionError::Restart)
            }
            0x08 => {
                // ret_popped
                let value = self.vm.pop()?;
                self.return_from_routine(value)
            }
            0x09 => {
                // pop (v1-4) / catch (v5+)
                if self.vm.version() <= 4 {
                    self.vm.pop()?;
                    Ok(())
                } else {
                    let depth = self.vm.call_depth() as u16;
                    self.store_result(inst, depth)
                }
            }
            0x0a => {
                // quit
                Err(ExecutionError::Quit)
            }
            0x0b => {
                // new_line
                self.print("\n")
            }
            0x0c => {
                // show_status
                self.refresh_status()
            }
            0x0d => {
                // verify: checksum the image past the header
                let len = self.vm.game.header.len_file.min(self.vm.game.memory.len());
                let sum: u32 = self.vm.game.memory[0x40..len]
                    .iter()
                    .fold(0u32, |acc, b| acc.wrapping_add(*b as u32));
                let matches = (sum & 0xffff) as u16 == self.vm.game.header.checksum_file;
                self.conditional(inst, matches)
            }
            0x0f => {
                // piracy: this copy is always genuine
                self.conditional(inst, true)
            }
            opcode => Err(ExecutionError::Unimplemented(format!(
                "0OP opcode {opcode:#04x}"
            ))),
        }
    }

    fn execute_1op(&mut self, inst: &Instruction, ops: &[u16]) -> Result<(), ExecutionError> {
        match inst.opcode_number() {
            0x00 => {
                // jz
                self.conditional(inst, ops[0] == 0)
            }
            0x01 => {
                // get_sibling
                let sibling = self.vm.object_sibling(ops[0])?;
                self.store_result(inst, sibling)?;
                self.conditional(inst, sibling != 0)
            }
            0x02 => {
                // get_child
                let child = self.vm.object_child(ops[0])?;
                self.store_result(inst, child)?;
                self.conditional(inst, child != 0)
            }
            0x03 => {
                // get_parent
                let parent = self.vm.object_parent(ops[0])?;
                self.store_result(inst, parent)
            }
            0x04 => {
                // get_prop_len
                let len = self.vm.property_len_at(ops[0] as u32);
                self.store_result(inst, len as u16)
            }
            0x05 => {
                // inc
                let var = ops[0] as u8;
                let value = self.vm.read_variable(var)?.wrapping_add(1);
                self.vm.write_variable(var, value)?;
                Ok(())
            }
            0x06 => {
                // dec
                let var = ops[0] as u8;
                let value = self.vm.read_variable(var)?.wrapping_sub(1);
                self.vm.write_variable(var, value)?;
                Ok(())
            }
            0x07 => {
                // print_addr
                let (text, _) = self.decode_at(ops[0] as u32)?;
                self.print(&text)
            }
            0x08 => {
                // call_1s
                self.call_routine(ops[0], &[], inst.store_variable())
            }
            0x09 => {
                // remove_obj
                self.vm.remove_object(ops[0])?;
                Ok(())
            }
            0x0a => {
                // print_obj
                let name = self.vm.object_name(ops[0])?;
                self.print(&name)
            }
            0x0b => {
                // ret
                self.return_from_routine(ops[0])
            }
            0x0c => {
                // jump: a direct signed displacement, not a branch suffix
                self.vm.pc = (self.vm.pc as i64 + (ops[0] as i16) as i64 - 2) as u32;
                Ok(())
            }
            0x0d => {
                // print_paddr
                let addr = self.vm.unpack_address(ops[0])?;
                let (text, _) = self.decode_at(addr)?;
                self.print(&text)
            }
            0x0e => {
                // load
                let value = self.vm.read_variable(ops[0] as u8)?;
                self.store_result(inst, value)
            }
            0x0f => {
                if self.vm.version() <= 4 {
                    // not
                    self.store_result(inst, !ops[0])
                } else {
                    // call_1n
                    self.call_routine(ops[0], &[], None)
                }
            }
            opcode => Err(ExecutionError::Unimplemented(format!(
                "1OP opcode {opcode:#04x}"
            ))),
        }
    }

    fn execute_2op(&mut self, inst: &Instruction, ops: &[u16]) -> Result<(), ExecutionError> {
        if ops.len() < 2 && inst.opcode_number() != 0x01 {
            return Err(ExecutionError::Fault(format!(
                "2OP instruction with {} operands",
                ops.len()
            )));
        }
        match inst.opcode_number() {
            0x01 => {
                // je: true when the first operand equals any other
                let test = ops[1..].iter().any(|other| *other == ops[0]);
                self.conditional(inst, test)
            }
            0x02 => {
                // jl
                self.conditional(inst, (ops[0] as i16) < (ops[1] as i16))
            }
            0x03 => {
                // jg
                self.conditional(inst, (ops[0] as i16) > (ops[1] as i16))
            }
            0x04 => {
                // dec_chk
                let var = ops[0] as u8;
                let value = self.vm.read_variable(var)?.wrapping_sub(1);
                self.vm.write_variable(var, value)?;
                self.conditional(inst, (value as i16) < (ops[1] as i16))
            }
            0x05 => {
                // inc_chk
                let var = ops[0] as u8;
                let value = self.vm.read_variable(var)?.wrapping_add(1);
                self.vm.write_variable(var, value)?;
                self.conditional(inst, (value as i16) > (ops[1] as i16))
            }
            0x06 => {
                // jin
                let parent = self.vm.object_parent(ops[0])?;
                self.conditional(inst, parent == ops[1])
            }
            0x07 => {
                // test: all bits of the mask set
                self.conditional(inst, ops[0] & ops[1] == ops[1])
            }
            0x08 => {
                // or
                self.store_result(inst, ops[0] | ops[1])
            }
            0x09 => {
                // and
                self.store_result(inst, ops[0] & ops[1])
            }
            0x0a => {
                // test_attr
                let set = self.vm.test_attribute(ops[0], ops[1])?;
                self.conditional(inst, set)
            }
            0x0b => {
                // set_attr
                self.vm.set_attribute(ops[0], ops[1], true)?;
                Ok(())
            }
            0x0c => {
                // clear_attr
                self.vm.set_attribute(ops[0], ops[1], false)?;
                Ok(())
            }
            0x0d => {
                // store
                self.vm.write_variable(ops[0] as u8, ops[1])?;
                Ok(())
            }
            0x0e => {
                // insert_obj
                self.vm.insert_object(ops[0], ops[1])?;
                Ok(())
            }
            0x0f => {
                // loadw
                let addr = ops[0].wrapping_add(ops[1].wrapping_mul(2)) as u32;
                let value = self.vm.read_word(addr);
                self.store_result(inst, value)
            }
            0x10 => {
                // loadb
                let addr = ops[0].wrapping_add(ops[1]) as u32;
                let value = self.vm.read_byte(addr) as u16;
                self.store_result(inst, value)
            }
            0x11 => {
                // get_prop
                let value = match self.vm.property_slice(ops[0], ops[1] as u8)? {
                    Some((addr, 1)) => self.vm.read_byte(addr) as u16,
                    Some((addr, 2)) => self.vm.read_word(addr),
                    Some((_, size)) => return Err(ExecutionError::PropertySize(size)),
                    None => self.vm.default_property_value(ops[1] as u8)?,
                };
                self.store_result(inst, value)
            }
            0x12 => {
                // get_prop_addr
                let addr = match self.vm.property_slice(ops[0], ops[1] as u8)? {
                    Some((addr, _)) => addr as u16,
                    None => 0,
                };
                self.store_result(inst, addr)
            }
            0x13 => {
                // get_next_prop
                let next = self.vm.next_property(ops[0], ops[1] as u8)?;
                self.store_result(inst, next as u16)
            }
            0x14 => {
                // add
                let value = (ops[0] as i16).wrapping_add(ops[1] as i16);
                self.store_result(inst, value as u16)
            }
            0x15 => {
                // sub
                let value = (ops[0] as i16).wrapping_sub(ops[1] as i16);
                self.store_result(inst, value as u16)
            }
            0x16 => {
                // mul
                let value = (ops[0] as i16).wrapping_mul(ops[1] as i16);
                self.store_result(inst, value as u16)
            }
            0x17 => {
                // div
                if ops[1] == 0 {
                    return Err(ExecutionError::Fault("division by zero".to_string()));
                }
                let value = (ops[0] as i16).wrapping_div(ops[1] as i16);
                self.store_result(inst, value as u16)
            }
            0x18 => {
                // mod
                if ops[1] == 0 {
                    return Err(ExecutionError::Fault("remainder by zero".to_string()));
                }
                let value = (ops[0] as i16).wrapping_rem(ops[1] as i16);
                self.store_result(inst, value as u16)
            }
            0x19 => {
                // call_2s
                self.call_routine(ops[0], &ops[1..], inst.store_variable())
            }
            0x1a => {
                // call_2n
                self.call_routine(ops[0], &ops[1..], None)
            }
            0x1b => {
                // set_colour: colors are out of scope
                Ok(())
            }
            0x1c => {
                // throw: unwind to the frame depth caught earlier
                let depth = ops[1] as usize;
                if depth == 0 || depth > self.vm.call_depth() {
                    return Err(ExecutionError::Fault(format!(
                        "throw to invalid frame depth {depth}"
                    )));
                }
                self.vm.call_stack.truncate(depth);
                self.return_from_routine(ops[0])
            }
            opcode => Err(ExecutionError::Unimplemented(format!(
                "2OP opcode {opcode:#04x}"
            ))),
        }
    }

    fn execute_var(&mut self, inst: &Instruction, ops: &[u16]) -> Result<(), ExecutionError> {
        match inst.opcode_number() {
            0x00 => {
                // call / call_vs
                self.call_routine(ops[0], &ops[1..], inst.store_variable())
            }
            0x01 => {
                // storew
                let addr = ops[0].wrapping_add(ops[1].wrapping_mul(2)) as u32;
                self.vm.write_word(addr, ops[2])?;
                Ok(())
            }
            0x02 => {
                // storeb
                let addr = ops[0].wrapping_add(ops[1]) as u32;
                self.vm.write_byte(addr, ops[2] as u8)?;
                Ok(())
            }
            0x03 => {
                // put_prop: writes through the property's memory in place
                match self.vm.property_slice(ops[0], ops[1] as u8)? {
                    Some((addr, 1)) => self.vm.write_byte(addr, ops[2] as u8)?,
                    Some((addr, 2)) => self.vm.write_word(addr, ops[2])?,
                    Some((_, size)) => return Err(ExecutionError::PropertySize(size)),
                    None => {
                        return Err(ExecutionError::Fault(format!(
                            "object {} has no property {}",
                            ops[0], ops[1]
                        )))
                    }
                }
                Ok(())
            }
            0x04 => {
                // sread / aread
                self.do_read(inst, ops)
            }
            0x05 => {
                // print_char
                if let Some(c) = text::zscii_to_char(ops[0], true)? {
                    self.print(&c.to_string())?;
                }
                Ok(())
            }
            0x06 => {
                // print_num
                self.print(&(ops[0] as i16).to_string())
            }
            0x07 => {
                // random
                let arg = ops[0] as i16;
                let value = if arg > 0 {
                    self.rng.next_in_range(arg as u16)
                } else {
                    if arg == 0 || arg <= -1000 {
                        self.rng.reseed();
                    } else {
                        // Small negative seeds put the story in control.
                        self.rng.seed((-arg) as u64);
                    }
                    0
                };
                self.store_result(inst, value)
            }
            0x08 => {
                // push
                self.vm.push(ops[0]);
                Ok(())
            }
            0x09 => {
                // pull
                let value = self.vm.pop()?;
                self.vm.write_variable(ops[0] as u8, value)?;
                Ok(())
            }
            0x0a | 0x0d | 0x0e | 0x0f | 0x11 | 0x12 | 0x14 => {
                // split_window, erase_window, erase_line, set_cursor,
                // set_text_style, buffer_mode, input_stream: screen model
                // details are out of scope and accepted silently.
                Ok(())
            }
            0x0b => {
                // set_window: remembered and passed along with output
                self.window = ops[0];
                Ok(())
            }
            0x0c => {
                // call_vs2
                self.call_routine(ops[0], &ops[1..], inst.store_variable())
            }
            0x10 => {
                // get_cursor: no cursor model; report home
                let addr = ops[0] as u32;
                self.vm.write_word(addr, 1)?;
                self.vm.write_word(addr + 2, 1)?;
                Ok(())
            }
            0x13 => {
                // output_stream
                self.select_output_stream(ops)
            }
            0x15 => {
                // sound_effect
                self.do_sound_effect(ops)
            }
            0x16 => {
                // read_char
                let c = self.presenter.read_rune()?;
                let code = text::char_to_zscii(c).unwrap_or(0);
                self.store_result(inst, code as u16)
            }
            0x17 => {
                // scan_table
                let form = ops.get(3).copied().unwrap_or(0x82);
                let field = (form & 0x7f) as u32;
                if field == 0 {
                    return Err(ExecutionError::Fault("scan_table with zero field length".to_string()));
                }
                let mut found = 0u16;
                for i in 0..ops[2] {
                    let addr = ops[1] as u32 + i as u32 * field;
                    let value = if form & 0x80 != 0 {
                        self.vm.read_word(addr)
                    } else {
                        self.vm.read_byte(addr) as u16
                    };
                    if value == ops[0] {
                        found = addr as u16;
                        break;
                    }
                }
                self.store_result(inst, found)?;
                self.conditional(inst, found != 0)
            }
            0x18 => {
                // not
                self.store_result(inst, !ops[0])
            }
            0x19 | 0x1a => {
                // call_vn / call_vn2
                self.call_routine(ops[0], &ops[1..], None)
            }
            0x1b => {
                // tokenise
                let text_addr = ops[0] as u32;
                let parse_addr = ops[1] as u32;
                let dict_addr = ops.get(2).copied().unwrap_or(0);
                let skip_unknown = ops.get(3).copied().unwrap_or(0) != 0;
                let line = self.read_text_buffer(text_addr);
                let dict_addr = if dict_addr == 0 {
                    self.vm.game.header.dictionary as usize
                } else {
                    dict_addr as usize
                };
                let dict =
                    Dictionary::parse(&self.vm.game.memory, dict_addr, self.vm.version())?;
                dictionary::write_parse_buffer(
                    &mut self.vm,
                    &dict,
                    &line,
                    parse_addr,
                    !skip_unknown,
                )?;
                Ok(())
            }
            0x1c => {
                // encode_text
                let text_addr = ops[0] as u32;
                let length = ops[1] as u32;
                let from = ops[2] as u32;
                let coded_addr = ops[3] as u32;
                let mut raw = String::with_capacity(length as usize);
                for i in 0..length {
                    raw.push(self.vm.read_byte(text_addr + from + i) as char);
                }
                let encoded = text::encode(&raw.to_lowercase(), self.vm.version());
                for (i, byte) in encoded.iter().enumerate() {
                    self.vm.write_byte(coded_addr + i as u32, *byte)?;
                }
                Ok(())
            }
            0x1d => {
                // copy_table
                self.do_copy_table(ops)
            }
            0x1e => {
                // print_table
                let mut addr = ops[0] as u32;
                let width = ops[1] as u32;
                let height = ops.get(2).copied().unwrap_or(1);
                let skip = ops.get(3).copied().unwrap_or(0) as u32;
                for row in 0..height {
                    if row > 0 {
                        self.print("\n")?;
                    }
                    let mut line = String::with_capacity(width as usize);
                    for i in 0..width {
                        let code = self.vm.read_byte(addr + i) as u16;
                        if let Some(c) = text::zscii_to_char(code, true)? {
                            line.push(c);
                        }
                    }
                    self.print(&line)?;
                    addr += width + skip;
                }
                Ok(())
            }
            0x1f => {
                // check_arg_count
                let supplied = self.vm.current_frame().arg_count as u16;
                self.conditional(inst, supplied >= ops[0])
            }
            opcode => Err(ExecutionError::Unimplemented(format!(
                "VAR opcode {opcode:#04x}"
            ))),
        }
    }

    fn execute_ext(&mut self, inst: &Instruction, ops: &[u16]) -> Result<(), ExecutionError> {
        match inst.opcode_number() {
            0x00 | 0x01 => Err(ExecutionError::Unimplemented(
                "extended save/restore".to_string(),
            )),
            0x02 => {
                // log_shift
                let places = ops[1] as i16;
                let value = if places >= 0 {
                    ops[0].wrapping_shl(places as u32)
                } else {
                    ops[0].wrapping_shr((-places) as u32)
                };
                self.store_result(inst, value)
            }
            0x03 => {
                // art_shift: right shifts preserve the sign
                let places = ops[1] as i16;
                let value = if places >= 0 {
                    ops[0].wrapping_shl(places as u32)
                } else {
                    ((ops[0] as i16).wrapping_shr((-places) as u32)) as u16
                };
                self.store_result(inst, value)
            }
            0x04 => {
                // set_font: no font model, report failure
                self.store_result(inst, 0)
            }
            0x09 | 0x0a => {
                // save_undo / restore_undo: no undo support
                self.store_result(inst, 0)
            }
            0x0b => {
                // print_unicode
                if let Some(c) = char::from_u32(ops[0] as u32) {
                    self.print(&c.to_string())?;
                }
                Ok(())
            }
            0x0c => {
                // check_unicode: 3 = can print, per our ZSCII coverage
                let can = match char::from_u32(ops[0] as u32) {
                    Some(c) => text::char_to_zscii(c).is_some(),
                    None => false,
                };
                self.store_result(inst, if can { 3 } else { 0 })
            }
            opcode => Err(ExecutionError::Unimplemented(format!(
                "EXT opcode {opcode:#04x}"
            ))),
        }
    }

    /// Decode the Z-string at `addr` with the story's abbreviations.
    fn decode_at(&self, addr: u32) -> Result<(String, usize), ExecutionError> {
        let memory = &self.vm.game.memory;
        if addr as usize >= memory.len() {
            return Err(ExecutionError::Text(TextError::BadAddress(addr as usize)));
        }
        let abbrevs = Abbreviations::new(memory, self.vm.game.header.abbrev_table as usize);
        let (text, len) = text::decode_string(&memory[addr as usize..], true, Some(&abbrevs))?;
        Ok((text, len))
    }

    /// The `read` opcode. Refreshes the status line (v1-3), asks the
    /// presenter for a line, lowercases it into the text buffer, and
    /// tokenizes into the parse buffer. v5 stores the terminator.
    fn do_read(&mut self, inst: &Instruction, ops: &[u16]) -> Result<(), ExecutionError> {
        let text_addr = ops[0] as u32;
        let parse_addr = ops.get(1).copied().unwrap_or(0) as u32;
        let version = self.vm.version();

        if version <= 3 {
            self.refresh_status()?;
        }

        let max_len = self.vm.read_byte(text_addr) as usize;
        let line = self.presenter.input(max_len)?;
        let line: String = line.to_lowercase().chars().take(max_len).collect();
        debug!("read: {line:?}");

        if version <= 3 {
            // Zero-terminated text at +1.
            let mut addr = text_addr + 1;
            for c in line.chars() {
                if let Some(code) = text::char_to_zscii(c) {
                    self.vm.write_byte(addr, code)?;
                    addr += 1;
                }
            }
            self.vm.write_byte(addr, 0)?;
        } else {
            // Counted text at +2, running length byte at +1.
            let mut count = 0u8;
            for c in line.chars() {
                if let Some(code) = text::char_to_zscii(c) {
                    self.vm.write_byte(text_addr + 2 + count as u32, code)?;
                    count += 1;
                }
            }
            self.vm.write_byte(text_addr + 1, count)?;
        }

        // v1-4 always tokenize; v5 only when a parse buffer is supplied.
        if parse_addr != 0 {
            let dict = Dictionary::parse(
                &self.vm.game.memory,
                self.vm.game.header.dictionary as usize,
                version,
            )?;
            dictionary::write_parse_buffer(&mut self.vm, &dict, &line, parse_addr, true)?;
        }

        if version >= 5 {
            // The default terminator is the newline that ended the input.
            self.store_result(inst, 13)?;
        }
        Ok(())
    }

    /// The `output_stream` opcode: positive selects, negative deselects.
    /// Stream 3 pushes a memory table that captures all output until
    /// deselected.
    fn select_output_stream(&mut self, ops: &[u16]) -> Result<(), ExecutionError> {
        match ops[0] as i16 {
            0 => Ok(()),
            1 => {
                self.streams.screen = true;
                Ok(())
            }
            -1 => {
                self.streams.screen = false;
                Ok(())
            }
            2 => {
                self.streams.transcript = true;
                Ok(())
            }
            -2 => {
                self.streams.transcript = false;
                Ok(())
            }
            3 => {
                let table = *ops.get(1).ok_or_else(|| {
                    ExecutionError::Fault("output_stream 3 needs a table".to_string())
                })? as u32;
                self.vm.write_word(table, 0)?;
                self.streams.tables.push((table, table + 2));
                Ok(())
            }
            -3 => {
                if self.streams.tables.pop().is_none() {
                    debug!("output_stream -3 with no table selected");
                }
                Ok(())
            }
            4 => {
                self.streams.echo = true;
                Ok(())
            }
            -4 => {
                self.streams.echo = false;
                Ok(())
            }
            n => Err(ExecutionError::Fault(format!("unknown output stream {n}"))),
        }
    }

    /// Route `sound_effect` to the presenter's sound capability; without
    /// one the opcode is accepted and dropped.
    fn do_sound_effect(&mut self, ops: &[u16]) -> Result<(), ExecutionError> {
        if !self.presenter.has_sound() {
            debug!("sound_effect without a sound capability: {ops:?}");
            return Ok(());
        }
        let number = ops.first().copied().unwrap_or(1);
        let action = match ops.get(1).copied().unwrap_or(2) {
            1 => SoundAction::Prepare,
            2 => {
                let encoded = ops.get(2).copied().unwrap_or(0x00ff);
                SoundAction::Play {
                    volume: (encoded & 0xff) as u8,
                    repeats: (encoded >> 8) as u8,
                }
            }
            3 => SoundAction::Stop,
            4 => SoundAction::Finish,
            other => {
                debug!("unknown sound effect action {other}");
                return Ok(());
            }
        };
        self.presenter.sound(number, action)?;
        Ok(())
    }

    /// `copy_table`: zero the source when the target is 0; copy through a
    /// scratch buffer for non-negative sizes (overlap-safe); a negative
    /// size forces a forward byte-by-byte copy.
    fn do_copy_table(&mut self, ops: &[u16]) -> Result<(), ExecutionError> {
        let first = ops[0] as u32;
        let second = ops[1] as u32;
        let size = ops[2] as i16;
        if second == 0 {
            for i in 0..size.unsigned_abs() as u32 {
                self.vm.write_byte(first + i, 0)?;
            }
            return Ok(());
        }
        if size >= 0 {
            let buf: Vec<u8> = (0..size as u32)
                .map(|i| self.vm.read_byte(first + i))
                .collect();
            for (i, byte) in buf.iter().enumerate() {
                self.vm.write_byte(second + i as u32, *byte)?;
            }
        } else {
            for i in 0..(-size) as u32 {
                let byte = self.vm.read_byte(first + i);
                self.vm.write_byte(second + i, byte)?;
            }
        }
        Ok(())
    }

    /// Reconstruct the current contents of a text buffer as a string.
    fn read_text_buffer(&self, text_addr: u32) -> String {
        let mut line = String::new();
        if self.vm.version() <= 3 {
            let mut addr = text_addr + 1;
            loop {
                let byte = self.vm.read_byte(addr);
                if byte == 0 {
                    break;
                }
                line.push(byte as char);
                addr += 1;
            }
        } else {
            let count = self.vm.read_byte(text_addr + 1) as u32;
            for i in 0..count {
                line.push(self.vm.read_byte(text_addr + 2 + i) as char);
            }
        }
        line.to_lowercase()
    }

    /// v1-3 `save`: branch on success. The success branch is applied
    /// before the snapshot so a restored game resumes on the success path.
    fn save_branching(&mut self, inst: &Instruction) -> Result<(), ExecutionError> {
        let branch = inst
            .branch()
            .ok_or_else(|| ExecutionError::Fault("save without branch suffix".to_string()))?;
        if matches!(branch.offset, 0 | 1) {
            let snap = self.vm.snapshot();
            let ok = self.presenter.save(&snap).is_ok();
            return self.conditional(inst, ok);
        }
        let here = self.vm.pc;
        self.conditional(inst, true)?;
        let snap = self.vm.snapshot();
        match self.presenter.save(&snap) {
            Ok(()) => Ok(()),
            Err(e) => {
                debug!("save failed: {e}");
                self.vm.pc = here;
                self.conditional(inst, false)
            }
        }
    }

    /// v4 `save`: store 1 on success, 0 on failure; a restored game sees 2.
    fn save_storing(&mut self, inst: &Instruction) -> Result<(), ExecutionError> {
        let store = inst
            .store_variable()
            .ok_or_else(|| ExecutionError::Fault("save without store variable".to_string()))?;
        if store != 0 {
            self.vm.write_variable(store, 2)?;
        }
        let snap = self.vm.snapshot();
        let ok = self.presenter.save(&snap).is_ok();
        self.vm.write_variable(store, ok as u16)?;
        Ok(())
    }

    fn restore_branching(&mut self, inst: &Instruction) -> Result<(), ExecutionError> {
        match self.try_restore() {
            Ok(()) => Ok(()),
            Err(e) => {
                debug!("restore failed: {e}");
                self.conditional(inst, false)
            }
        }
    }

    fn restore_storing(&mut self, inst: &Instruction) -> Result<(), ExecutionError> {
        match self.try_restore() {
            Ok(()) => Ok(()),
            Err(e) => {
                debug!("restore failed: {e}");
                self.store_result(inst, 0)
            }
        }
    }

    /// Fetch and apply a snapshot. On success the PC and stack are the
    /// saved ones, so the caller must not touch this instruction's
    /// suffixes afterwards.
    fn try_restore(&mut self) -> Result<(), ExecutionError> {
        let data = self.presenter.restore()?;
        self.vm.restore_snapshot(&data)?;
        // Capability bits live in the restored dynamic memory; refresh them.
        self.prepare_header();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presenter_headless::HeadlessPresenter;
    use crate::vm::tests::test_game;

    /// Place `code` at the initial PC of a minimal v3 story.
    pub fn interp_with_code(code: &[u8]) -> Interpreter<HeadlessPresenter> {
        let game = test_game(3);
        let mut memory = game.memory;
        memory[0x2000..0x2000 + code.len()].copy_from_slice(code);
        let vm = VM::new(crate::vm::Game::from_memory(memory).unwrap());
        Interpreter::new(vm, HeadlessPresenter::new())
    }

    #[test]
    fn test_add_signed_wrapping() {
        let mut interp = interp_with_code(&[
            0xd4, 0x0f, 0x7f, 0xff, 0x00, 0x01, 0x00, // add #7fff #0001 -> sp
            0xba, // quit
        ]);
        interp.step().unwrap();
        assert_eq!(interp.vm.current_frame().stack, vec![0x8000]);
        assert!(matches!(interp.step(), Err(ExecutionError::Quit)));
    }

    #[test]
    fn test_div_by_zero_is_fault() {
        let mut interp = interp_with_code(&[
            0x17, 0x0a, 0x00, 0x00, // div #0a #00 -> sp
        ]);
        let err = interp.step().unwrap_err();
        match err {
            ExecutionError::Instruction { pc, source, .. } => {
                assert_eq!(pc, 0x2000);
                assert!(matches!(*source, ExecutionError::Fault(_)));
            }
            other => panic!("expected wrapped fault, got {other}"),
        }
        // PC rolled back to the failing instruction.
        assert_eq!(interp.vm.pc, 0x2000);
    }

    #[test]
    fn test_je_branch_taken() {
        let mut interp = interp_with_code(&[
            0x01, 0x05, 0x05, 0xc0 | 0x04, // je #05 #05 ?+4
            0xb4, // nop (skipped)
            0xb4, // nop (skipped)
            0xba, // quit (branch target)
        ]);
        interp.step().unwrap();
        // Branch: pc = 0x2004 + 4 - 2 = 0x2006.
        assert_eq!(interp.vm.pc, 0x2006);
    }

    #[test]
    fn test_je_branch_not_taken() {
        let mut interp = interp_with_code(&[
            0x01, 0x05, 0x06, 0xc0 | 0x04, // je #05 #06 ?+4
        ]);
        interp.step().unwrap();
        assert_eq!(interp.vm.pc, 0x2004);
    }

    #[test]
    fn test_jump_is_direct() {
        let mut interp = interp_with_code(&[
            0x8c, 0x00, 0x10, // jump +0x10
        ]);
        interp.step().unwrap();
        assert_eq!(interp.vm.pc, 0x2003 + 0x10 - 2);
    }

    #[test]
    fn test_call_and_ret() {
        // Routine at 0x3000 (packed 0x1800): 2 locals preset to 0x1111 and
        // 0x2222, body returns local2.
        let mut interp = interp_with_code(&[
            0xe0, 0x1f, 0x18, 0x00, 0x63, 0x00, // call #1800 #63 -> sp
            0xba, // quit
        ]);
        let routine = [
            0x02, 0x11, 0x11, 0x22, 0x22, // 2 locals
            0xab, 0x02, // ret local2
        ];
        interp.vm.game.memory[0x3000..0x3000 + routine.len()].copy_from_slice(&routine);

        interp.step().unwrap();
        assert_eq!(interp.vm.call_depth(), 2);
        // First local overwritten by the argument, second keeps its preset.
        assert_eq!(interp.vm.current_frame().locals, vec![0x63, 0x2222]);
        assert_eq!(interp.vm.current_frame().arg_count, 1);

        interp.step().unwrap();
        assert_eq!(interp.vm.call_depth(), 1);
        assert_eq!(interp.vm.current_frame().stack, vec![0x2222]);
        assert_eq!(interp.vm.pc, 0x2006);
    }

    #[test]
    fn test_call_address_zero_stores_zero() {
        let mut interp = interp_with_code(&[
            0xe0, 0x1f, 0x00, 0x00, 0x07, 0x00, // call #0000 #07 -> sp
        ]);
        interp.step().unwrap();
        assert_eq!(interp.vm.current_frame().stack, vec![0]);
        assert_eq!(interp.vm.call_depth(), 1);
    }

    #[test]
    fn test_return_from_bootstrap_is_fatal() {
        let mut interp = interp_with_code(&[0xb0]); // rtrue
        let err = interp.step().unwrap_err();
        match err {
            ExecutionError::Instruction { source, .. } => {
                assert!(matches!(*source, ExecutionError::LimitExceeded(_)));
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn test_print_inline_text() {
        // print "hi" then quit
        let word = 0x8000u16 | (13 << 10) | (14 << 5) | 5;
        let mut interp = interp_with_code(&[
            0xb2,
            (word >> 8) as u8,
            (word & 0xff) as u8,
            0xba,
        ]);
        interp.step().unwrap();
        assert_eq!(interp.presenter.output_text(), "hi");
    }

    #[test]
    fn test_store_and_load_globals() {
        let mut interp = interp_with_code(&[
            0x0d, 0x10, 0x2a, // store g00 #2a
            0x9e, 0x10, 0x00, // load g00 -> sp
        ]);
        interp.step().unwrap();
        interp.step().unwrap();
        assert_eq!(interp.vm.current_frame().stack, vec![0x2a]);
    }

    #[test]
    fn test_loadw_storew() {
        let mut interp = interp_with_code(&[
            0xe1, 0x13, 0x03, 0x00, 0x02, 0xbe, 0xef, // storew #0300 #02 #beef
            0xcf, 0x1f, 0x03, 0x00, 0x02, 0x00, // loadw #0300 #02 -> sp
        ]);
        interp.step().unwrap();
        assert_eq!(interp.vm.read_word(0x304), 0xbeef);
        interp.step().unwrap();
        assert_eq!(interp.vm.current_frame().stack, vec![0xbeef]);
    }

    #[test]
    fn test_random_seeded_is_deterministic() {
        // random #-7 (seed), then random #100 twice
        let mut interp = interp_with_code(&[
            0xe7, 0x3f, 0xff, 0xf9, 0x00, // random #fff9 -> sp  (seed -7)
            0xe7, 0x7f, 0x64, 0x00, // random #64 -> sp
            0xe7, 0x7f, 0x64, 0x00, // random #64 -> sp
        ]);
        interp.run_with_limit(3).unwrap();
        let stack = interp.vm.current_frame().stack.clone();
        assert_eq!(stack[0], 0);
        assert!((1..=100).contains(&stack[1]));

        let mut again = interp_with_code(&[
            0xe7, 0x3f, 0xff, 0xf9, 0x00,
            0xe7, 0x7f, 0x64, 0x00,
            0xe7, 0x7f, 0x64, 0x00,
        ]);
        again.run_with_limit(3).unwrap();
        assert_eq!(again.vm.current_frame().stack, stack);
    }

    #[test]
    fn test_output_stream_redirect() {
        let table = 0x0700u16;
        let mut interp = interp_with_code(&[
            0xf3, 0x4f, 0x03, 0x07, 0x00, // output_stream #3 #0700
            0xb2, 0xb5, 0xc5, // print "hi" (end-marked word)
            0xf3, 0x3f, 0xff, 0xfd, // output_stream #-3
            0xb2, 0xb5, 0xc5, // print "hi" to the screen again
        ]);
        interp.run_with_limit(4).unwrap();
        // Redirected text went to the table, not the presenter.
        assert_eq!(interp.vm.read_word(table as u32), 2);
        assert_eq!(interp.vm.read_byte(table as u32 + 2), b'h');
        assert_eq!(interp.vm.read_byte(table as u32 + 3), b'i');
        assert_eq!(interp.presenter.output_text(), "hi");
    }

    #[test]
    fn test_inc_dec_chk() {
        let mut interp = interp_with_code(&[
            0x0d, 0x10, 0x05, // store g00 #05
            0x05, 0x10, 0x05, 0xc0 | 0x04, // inc_chk g00 #05 ?+4  (6 > 5: branch)
        ]);
        interp.step().unwrap();
        interp.step().unwrap();
        assert_eq!(interp.vm.read_global(0x10).unwrap(), 6);
        assert_eq!(interp.vm.pc, 0x2007 + 2);
    }

    #[test]
    fn test_catch_stores_depth() {
        // catch in a v5 story: build a v5 interpreter.
        let game = test_game(5);
        let mut memory = game.memory;
        let code = [
            0xb9, 0x00, // catch -> sp
        ];
        memory[0x2000..0x2000 + code.len()].copy_from_slice(&code);
        let vm = VM::new(crate::vm::Game::from_memory(memory).unwrap());
        let mut interp = Interpreter::new(vm, HeadlessPresenter::new());
        interp.step().unwrap();
        assert_eq!(interp.vm.current_frame().stack, vec![1]);
    }

    #[test]
    fn test_check_arg_count() {
        let mut interp = interp_with_code(&[
            0xe0, 0x1f, 0x18, 0x00, 0x63, 0x00, // call #1800 #63 -> sp
        ]);
        let routine = [
            0x01, 0x00, 0x00, // 1 local
            0xff, 0x7f, 0x01, 0xc0 | 0x04, // check_arg_count #01 ?+4
            0xff, 0x7f, 0x02, 0xc0 | 0x04, // check_arg_count #02 ?+4
        ];
        interp.vm.game.memory[0x3000..0x3000 + routine.len()].copy_from_slice(&routine);
        interp.step().unwrap();
        interp.step().unwrap();
        // One argument supplied: the first check branches from 0x3007.
        assert_eq!(interp.vm.pc, 0x3007 + 2);
        interp.vm.pc = 0x3007; // run the second check
        interp.step().unwrap();
        assert_eq!(interp.vm.pc, 0x300b);
    }

    #[test]
    fn test_save_restore_round_trip() {
        let mut interp = interp_with_code(&[
            0x0d, 0x10, 0x2a, // store g00 #2a
            0xb5, 0xc0 | 0x04, // save ?+4
            0xb4, // nop (failure path)
            0xb4, // nop
            0x0d, 0x10, 0x63, // store g00 #63  (success path target... )
        ]);
        interp.run_with_limit(2).unwrap();
        // Save succeeded: branch from 0x2005 by +4-2.
        assert_eq!(interp.vm.pc, 0x2007);
        assert_eq!(interp.vm.read_global(0x10).unwrap(), 0x2a);

        // Wreck the global, then restore.
        interp.vm.write_global(0x10, 0).unwrap();
        let restore = [0xb6, 0xc0 | 0x02]; // restore ?+2
        interp.vm.game.memory[0x2007..0x2009].copy_from_slice(&restore);
        interp.vm.pc = 0x2007;
        interp.step().unwrap();
        // Back on the post-save success path with the global restored.
        assert_eq!(interp.vm.pc, 0x2007);
        assert_eq!(interp.vm.read_global(0x10).unwrap(), 0x2a);
    }

    #[test]
    fn test_status_line_score_mode() {
        let mut interp = interp_with_code(&[0xbc]); // show_status
        interp.presenter.with_status_line = true;
        interp.vm.write_global(0x11, 0xfffb).unwrap(); // score -5
        interp.vm.write_global(0x12, 12).unwrap(); // turns
        interp.step().unwrap();
        let (left, right) = interp.presenter.status.clone().unwrap();
        assert_eq!(left, ""); // global 0 holds no object
        assert_eq!(right, "-5/12");
    }

    #[test]
    fn test_scan_table_finds_word() {
        let mut interp = interp_with_code(&[
            0xf7, 0x07, 0xbe, 0xef, 0x03, 0x00, 0x04, 0x00, 0xc0 | 0x06,
            // scan_table #beef #0300 #04 -> sp ?+6
        ]);
        interp.vm.write_word(0x304, 0xbeef).unwrap();
        interp.step().unwrap();
        assert_eq!(interp.vm.current_frame().stack, vec![0x304]);
        assert_eq!(interp.vm.pc, 0x2009 + 4);
    }

    #[test]
    fn test_scan_table_missing_stores_zero() {
        let mut interp = interp_with_code(&[
            0xf7, 0x07, 0xbe, 0xef, 0x03, 0x00, 0x04, 0x00, 0xc0 | 0x06,
        ]);
        interp.step().unwrap();
        assert_eq!(interp.vm.current_frame().stack, vec![0]);
        assert_eq!(interp.vm.pc, 0x2009);
    }
}

//! A small prompt-driven debugger wrapped around the interpreter:
//! single-step, hex breakpoints, and variable/memory/string inspection.

use std::io::{self, BufRead, Write};

use crate::interpreter::{ExecutionError, Interpreter};
use crate::presenter::Presenter;
use crate::text::{self, Abbreviations};

pub struct Debugger<P: Presenter> {
    pub interp: Interpreter<P>,
    breakpoints: Vec<u32>,
}

impl<P: Presenter> Debugger<P> {
    pub fn new(interp: Interpreter<P>) -> Debugger<P> {
        Debugger {
            interp,
            breakpoints: Vec::new(),
        }
    }

    /// Run the prompt until the user quits or the story ends. Quit and
    /// Restart sentinels propagate so the driver can act on them.
    pub fn run(&mut self) -> Result<(), ExecutionError> {
        let stdin = io::stdin();
        let mut line = String::new();
        loop {
            print!("dbg[{:#07x}]> ", self.interp.vm.pc);
            io::stdout().flush()?;
            line.clear();
            if stdin.lock().read_line(&mut line)? == 0 {
                return Ok(());
            }
            let mut parts = line.split_whitespace();
            let command = match parts.next() {
                Some(c) => c,
                None => continue,
            };
            match command {
                "n" | "next" => {
                    let _ = self.step_reporting()?;
                }
                "b" | "break" => match parse_hex(parts.next()) {
                    Some(addr) => {
                        self.breakpoints.push(addr);
                        println!("breakpoint at {addr:#07x}");
                    }
                    None => println!("usage: break ADDR"),
                },
                "c" | "cont" | "continue" => loop {
                    if self.step_reporting()?.is_err() {
                        break;
                    }
                    if self.breakpoints.contains(&self.interp.vm.pc) {
                        println!("breakpoint at {:#07x}", self.interp.vm.pc);
                        break;
                    }
                },
                "p" | "print" => print!("{}", self.interp.vm),
                "v" | "var" => match parse_hex(parts.next()) {
                    Some(var) => self.show_variable(var as u8),
                    None => println!("usage: var NUMBER"),
                },
                "w" | "word" => match parse_hex(parts.next()) {
                    Some(addr) => println!("{:#06x}", self.interp.vm.read_word(addr)),
                    None => println!("usage: word ADDR"),
                },
                "s" | "string" => match parse_hex(parts.next()) {
                    Some(addr) => self.show_string(addr),
                    None => println!("usage: string ADDR"),
                },
                "q" | "quit" | "exit" => return Ok(()),
                other => println!("unknown command: {other}"),
            }
        }
    }

    /// Step once; report faults to the prompt, pass sentinels upward.
    fn step_reporting(&mut self) -> Result<Result<(), ()>, ExecutionError> {
        match self.interp.step() {
            Ok(()) => Ok(Ok(())),
            Err(e) if e.is_control_flow() => Err(e),
            Err(e) => {
                println!("** {e}");
                Ok(Err(()))
            }
        }
    }

    /// Display a variable without disturbing the evaluation stack.
    fn show_variable(&self, var: u8) {
        let vm = &self.interp.vm;
        let value = match var {
            0x00 => vm.current_frame().stack.last().copied(),
            0x01..=0x0f => vm.current_frame().locals.get(var as usize - 1).copied(),
            _ => vm.read_global(var).ok(),
        };
        match value {
            Some(v) => println!("${var:02x}: {v:#06x} ({})", v as i16),
            None => println!("${var:02x} is not readable here"),
        }
    }

    fn show_string(&self, addr: u32) {
        let memory = &self.interp.vm.game.memory;
        if addr as usize >= memory.len() {
            println!("address {addr:#07x} out of range");
            return;
        }
        let abbrevs =
            Abbreviations::new(memory, self.interp.vm.game.header.abbrev_table as usize);
        match text::decode_string(&memory[addr as usize..], true, Some(&abbrevs)) {
            Ok((s, _)) => println!("{addr:#07x}: {s:?}"),
            Err(e) => println!("decode error: {e}"),
        }
    }
}

fn parse_hex(arg: Option<&str>) -> Option<u32> {
    let arg = arg?;
    let trimmed = arg.trim_start_matches("0x");
    u32::from_str_radix(trimmed, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex() {
        assert_eq!(parse_hex(Some("2a")), Some(0x2a));
        assert_eq!(parse_hex(Some("0x2a")), Some(0x2a));
        assert_eq!(parse_hex(Some("zz")), None);
        assert_eq!(parse_hex(None), None);
    }
}

//! Buffered presenter for tests and non-interactive runs: output is
//! collected, input comes from a pre-loaded script.

use std::collections::VecDeque;
use std::io;

use log::debug;

use crate::presenter::{Presenter, SoundAction};

#[derive(Default)]
pub struct HeadlessPresenter {
    output: String,
    input_lines: VecDeque<String>,
    runes: VecDeque<char>,
    saved: Option<Vec<u8>>,
    pub status: Option<(String, String)>,
    pub with_status_line: bool,
    pub sounds: Vec<(u16, SoundAction)>,
    pub with_sound: bool,
}

impl HeadlessPresenter {
    pub fn new() -> HeadlessPresenter {
        HeadlessPresenter::default()
    }

    /// Queue a line for a later `input` call.
    pub fn push_input(&mut self, line: &str) {
        self.input_lines.push_back(line.to_string());
    }

    /// Queue a keystroke for a later `read_rune` call.
    pub fn push_rune(&mut self, c: char) {
        self.runes.push_back(c);
    }

    /// Everything printed so far.
    pub fn output_text(&self) -> &str {
        &self.output
    }

    pub fn take_output(&mut self) -> String {
        std::mem::take(&mut self.output)
    }
}

impl Presenter for HeadlessPresenter {
    fn output(&mut self, window: u16, text: &str) -> io::Result<()> {
        debug!("headless output (window {window}): {text:?}");
        self.output.push_str(text);
        Ok(())
    }

    fn input(&mut self, max_len: usize) -> io::Result<String> {
        match self.input_lines.pop_front() {
            Some(line) => {
                let mut line = line;
                line.truncate(max_len);
                Ok(line)
            }
            None => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "no scripted input left",
            )),
        }
    }

    fn read_rune(&mut self) -> io::Result<char> {
        self.runes.pop_front().ok_or_else(|| {
            io::Error::new(io::ErrorKind::UnexpectedEof, "no scripted keystrokes left")
        })
    }

    fn save(&mut self, data: &[u8]) -> io::Result<()> {
        self.saved = Some(data.to_vec());
        Ok(())
    }

    fn restore(&mut self) -> io::Result<Vec<u8>> {
        self.saved
            .clone()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "nothing saved"))
    }

    fn has_status_line(&self) -> bool {
        self.with_status_line
    }

    fn status_line(&mut self, left: &str, right: &str) -> io::Result<()> {
        self.status = Some((left.to_string(), right.to_string()));
        Ok(())
    }

    fn has_sound(&self) -> bool {
        self.with_sound
    }

    fn sound(&mut self, number: u16, action: SoundAction) -> io::Result<()> {
        self.sounds.push((number, action));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripted_input() {
        let mut p = HeadlessPresenter::new();
        p.push_input("go north");
        assert_eq!(p.input(80).unwrap(), "go north");
        assert!(p.input(80).is_err());
    }

    #[test]
    fn test_input_respects_max_len() {
        let mut p = HeadlessPresenter::new();
        p.push_input("abcdefgh");
        assert_eq!(p.input(4).unwrap(), "abcd");
    }

    #[test]
    fn test_save_round_trip() {
        let mut p = HeadlessPresenter::new();
        assert!(p.restore().is_err());
        p.save(&[1, 2, 3]).unwrap();
        assert_eq!(p.restore().unwrap(), vec![1, 2, 3]);
    }
}

//! Terminal presenter: stdout text, stdin lines, raw-mode keystrokes via
//! crossterm, a reverse-video status line, and snapshot files on disk.

use std::fs;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use crossterm::cursor;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::style::{Attribute, Print, SetAttribute};
use crossterm::terminal;
use log::debug;

use crate::presenter::{Presenter, SoundAction};

pub struct TerminalPresenter {
    /// Default path for save snapshots, next to the story file.
    save_path: PathBuf,
}

impl TerminalPresenter {
    pub fn new(save_path: PathBuf) -> TerminalPresenter {
        TerminalPresenter { save_path }
    }

    /// Ask for a save filename, offering the current default.
    fn prompt_filename(&mut self) -> io::Result<PathBuf> {
        print!("File name [{}]: ", self.save_path.display());
        io::stdout().flush()?;
        let mut line = String::new();
        io::stdin().lock().read_line(&mut line)?;
        let trimmed = line.trim();
        if !trimmed.is_empty() {
            self.save_path = PathBuf::from(trimmed);
        }
        Ok(self.save_path.clone())
    }
}

impl Presenter for TerminalPresenter {
    fn output(&mut self, window: u16, text: &str) -> io::Result<()> {
        // The upper window is not modeled; its text goes to the same stream.
        if window != 0 {
            debug!("output to window {window} routed to main stream");
        }
        let mut stdout = io::stdout();
        stdout.write_all(text.as_bytes())?;
        stdout.flush()
    }

    fn input(&mut self, max_len: usize) -> io::Result<String> {
        let mut line = String::new();
        let n = io::stdin().lock().read_line(&mut line)?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "end of input",
            ));
        }
        let mut line = line.trim_end_matches(['\n', '\r']).to_string();
        line.truncate(max_len);
        Ok(line)
    }

    fn read_rune(&mut self) -> io::Result<char> {
        terminal::enable_raw_mode()?;
        let result = loop {
            match event::read()? {
                Event::Key(key) if key.kind != KeyEventKind::Release => match key.code {
                    KeyCode::Char(c) => break Ok(c),
                    KeyCode::Enter => break Ok('\n'),
                    KeyCode::Esc => break Ok('\x1b'),
                    _ => continue,
                },
                _ => continue,
            }
        };
        terminal::disable_raw_mode()?;
        result
    }

    fn save(&mut self, data: &[u8]) -> io::Result<()> {
        let path = self.prompt_filename()?;
        fs::write(&path, data)?;
        debug!("saved {} bytes to {}", data.len(), path.display());
        Ok(())
    }

    fn restore(&mut self) -> io::Result<Vec<u8>> {
        let path = self.prompt_filename()?;
        fs::read(&path)
    }

    fn has_status_line(&self) -> bool {
        true
    }

    fn status_line(&mut self, left: &str, right: &str) -> io::Result<()> {
        let (cols, _) = terminal::size()?;
        let width = cols as usize;
        // " left ... right " padded to the full terminal width.
        let gap = width
            .saturating_sub(left.chars().count() + right.chars().count() + 3);
        let line = format!(" {left}{}{right} ", " ".repeat(gap.max(1)));
        crossterm::execute!(
            io::stdout(),
            cursor::SavePosition,
            cursor::MoveTo(0, 0),
            SetAttribute(Attribute::Reverse),
            Print(line),
            SetAttribute(Attribute::Reset),
            cursor::RestorePosition,
        )
    }

    fn has_sound(&self) -> bool {
        false
    }

    fn sound(&mut self, number: u16, action: SoundAction) -> io::Result<()> {
        // No audio device; beep for effect 1 per convention, log the rest.
        if number == 1 {
            let mut stdout = io::stdout();
            stdout.write_all(b"\x07")?;
            stdout.flush()
        } else {
            debug!("sound effect {number}: {action:?}");
            Ok(())
        }
    }
}

//! The presenter seam: everything the machine shows to or asks from the
//! player goes through this trait. The engine owns no terminal state of
//! its own, which keeps it runnable headless under test.

use std::io;

/// Sound effect actions routed from the `sound_effect` opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoundAction {
    Prepare,
    /// Start playback with the encoded volume/repeats word.
    Play { volume: u8, repeats: u8 },
    Stop,
    Finish,
}

/// External collaborator realizing output, input, persistence, and the
/// optional status-line and sound capabilities.
///
/// `save`/`restore` deal in opaque snapshot bytes produced by the core;
/// the presenter only decides where they live. The optional capabilities
/// default to absent; the machine publishes their availability into the
/// header flags on load.
pub trait Presenter {
    /// Print `text` to the window `window` (0 = lower/main, 1 = upper).
    fn output(&mut self, window: u16, text: &str) -> io::Result<()>;

    /// Read one line of input, at most `max_len` characters.
    fn input(&mut self, max_len: usize) -> io::Result<String>;

    /// Read a single keystroke.
    fn read_rune(&mut self) -> io::Result<char>;

    /// Persist a save snapshot.
    fn save(&mut self, data: &[u8]) -> io::Result<()>;

    /// Retrieve a previously saved snapshot.
    fn restore(&mut self) -> io::Result<Vec<u8>>;

    /// Whether the status-line capability is present.
    fn has_status_line(&self) -> bool {
        false
    }

    /// Redraw the status line (v1-3 games only).
    fn status_line(&mut self, _left: &str, _right: &str) -> io::Result<()> {
        Ok(())
    }

    /// Whether the sound capability is present.
    fn has_sound(&self) -> bool {
        false
    }

    /// Handle a sound effect request for effect number `number`.
    fn sound(&mut self, _number: u16, _action: SoundAction) -> io::Result<()> {
        Ok(())
    }
}

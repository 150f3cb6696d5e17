use std::env;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::process::exit;

use lantern::debugger::Debugger;
use lantern::interpreter::{ExecutionError, Interpreter};
use lantern::presenter_terminal::TerminalPresenter;
use lantern::vm::{Game, VM};
use lantern::zrand::ZRand;

fn usage() -> ! {
    eprintln!("usage: lantern [--debug] [--seed N] STORY-FILE");
    exit(2);
}

fn main() -> io::Result<()> {
    env_logger::init();

    let mut debug = false;
    let mut seed: Option<u64> = None;
    let mut story: Option<PathBuf> = None;

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--debug" => debug = true,
            "--seed" => match args.next().and_then(|s| s.parse().ok()) {
                Some(n) => seed = Some(n),
                None => usage(),
            },
            _ if story.is_none() => story = Some(PathBuf::from(arg)),
            _ => usage(),
        }
    }
    let path = match story {
        Some(p) => p,
        None => usage(),
    };
    if !path.exists() {
        eprintln!("story file not found: {}", path.display());
        exit(1);
    }

    // The restart opcode surfaces as a sentinel; reload and go again.
    loop {
        let bytes = fs::read(&path)?;
        let game = match Game::from_memory(bytes) {
            Ok(g) => g,
            Err(e) => {
                eprintln!("{}: {e}", path.display());
                exit(1);
            }
        };
        let vm = VM::new(game);
        let presenter = TerminalPresenter::new(path.with_extension("sav"));
        let mut interp = Interpreter::new(vm, presenter);
        if let Some(seed) = seed {
            interp.set_rng(ZRand::new_predictable(seed));
        }

        let result = if debug {
            println!("{}", interp.vm.game.header);
            Debugger::new(interp).run()
        } else {
            interp.run()
        };

        match result {
            Ok(()) => return Ok(()),
            Err(ExecutionError::Quit) => return Ok(()),
            Err(ExecutionError::Restart) => continue,
            Err(e) => {
                eprintln!("** internal error: {e}");
                exit(1);
            }
        }
    }
}

//! Interactive confirmation
//!
//! The coordinator asks yes/no questions at resume points and after a pass
//! leaves failures behind. The capability is a trait so automated runs (and
//! tests) can swap in a non-interactive answer.

use std::io::{self, Write};

pub trait Confirmer: Send + Sync {
    /// Ask a yes/no question. Implementations must not guess: an
    /// unparseable answer is re-asked, never defaulted.
    fn confirm(&self, prompt: &str) -> bool;
}

/// Reads `y`/`n` from standard input, re-prompting on anything else.
pub struct TerminalConfirmer;

impl Confirmer for TerminalConfirmer {
    fn confirm(&self, prompt: &str) -> bool {
        let mut input = String::new();
        loop {
            print!("{prompt} (y/n): ");
            if io::stdout().flush().is_err() {
                return false;
            }

            input.clear();
            match io::stdin().read_line(&mut input) {
                Ok(0) | Err(_) => return false,
                Ok(_) => {}
            }

            match input.trim().to_lowercase().as_str() {
                "y" => return true,
                "n" => return false,
                _ => println!("Invalid input. Type 'y' or 'n'."),
            }
        }
    }
}

/// Answers every question affirmatively (`--yes` / unattended runs).
pub struct AssumeYes;

impl Confirmer for AssumeYes {
    fn confirm(&self, _prompt: &str) -> bool {
        true
    }
}

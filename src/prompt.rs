use std::io::{self, BufRead, Write};

use crate::db::setup::OperatorPrompt;

/// Asks on the terminal. With `assume_yes` every question is answered yes
/// without reading input, for unattended starts.
pub struct StdinPrompt {
    assume_yes: bool,
}

impl StdinPrompt {
    pub fn new(assume_yes: bool) -> Self {
        Self { assume_yes }
    }
}

pub fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

impl OperatorPrompt for StdinPrompt {
    fn confirm(&self, question: &str) -> bool {
        if self.assume_yes {
            println!("{question} [y/N] y");
            return true;
        }

        print!("{question} [y/N] ");
        let _ = io::stdout().flush();
        let mut answer = String::new();
        match io::stdin().lock().read_line(&mut answer) {
            Ok(_) => is_yes(&answer),
            Err(_) => false,
        }
    }

    fn warn(&self, message: &str) {
        eprintln!("Warning: {message}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_explicit_yes_confirms() {
        assert!(is_yes("y\n"));
        assert!(is_yes(" YES "));
        assert!(!is_yes(""));
        assert!(!is_yes("n"));
        assert!(!is_yes("yep"));
        assert!(StdinPrompt::new(true).confirm("Create it?"));
    }
}

use crate::session::Human;
use anyhow::Result;
use std::io::{self, BufRead, Write};

/// Prompts on stdout, answers from stdin
#[derive(Debug, Default)]
pub struct Terminal;

impl Terminal {
    /// Next line of input, without its line ending; `None` at end of input
    pub fn read_line(&mut self, prompt: &str) -> Result<Option<String>> {
        let mut stdout = io::stdout().lock();
        write!(stdout, "{}", prompt)?;
        stdout.flush()?;

        let mut line = String::new();
        if io::stdin().lock().read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
    }
}

impl Human for Terminal {
    fn ask(&mut self, prompt: &str) -> Result<Option<String>> {
        println!("\n{}", prompt);
        self.read_line("> ")
    }
}

//! Interactive input.
//!
//! Commands that need a pick from a list go through the [`Selector`]
//! trait, so the flow can be driven from a terminal menu or from a
//! scripted answer queue without touching the command logic.

#[cfg(test)]
use std::collections::VecDeque;
use std::io::{self, BufRead, Write};

use colored::*;
use rpassword::read_password;

use crate::error::Result;

/// Picks one entry out of a list, or `None` to cancel.
pub trait Selector {
    fn select(&mut self, title: &str, items: &[String]) -> Result<Option<usize>>;
}

/// Numbered menu on the terminal. Empty input or `q` cancels.
pub struct TermSelect;

impl Selector for TermSelect {
    fn select(&mut self, title: &str, items: &[String]) -> Result<Option<usize>> {
        println!("{} {}", "?".cyan().bold(), title.cyan());
        for (i, item) in items.iter().enumerate() {
            println!("  {}) {}", i + 1, item);
        }
        let stdin = io::stdin();
        loop {
            print!("Enter a number (blank to cancel): ");
            io::stdout().flush()?;
            let mut line = String::new();
            stdin.lock().read_line(&mut line)?;
            match parse_choice(&line, items.len()) {
                Choice::Picked(index) => return Ok(Some(index)),
                Choice::Cancelled => return Ok(None),
                Choice::Invalid => {
                    eprintln!(
                        "{} {}",
                        "!".yellow().bold(),
                        format!("enter a number between 1 and {}", items.len()).yellow()
                    );
                }
            }
        }
    }
}

/// Canned answers for tests.
#[cfg(test)]
pub struct ScriptedSelect {
    answers: VecDeque<Option<usize>>,
}

#[cfg(test)]
impl ScriptedSelect {
    pub fn new(answers: impl IntoIterator<Item = Option<usize>>) -> Self {
        Self {
            answers: answers.into_iter().collect(),
        }
    }
}

#[cfg(test)]
impl Selector for ScriptedSelect {
    fn select(&mut self, _title: &str, _items: &[String]) -> Result<Option<usize>> {
        Ok(self.answers.pop_front().flatten())
    }
}

#[derive(Debug, PartialEq)]
enum Choice {
    Picked(usize),
    Cancelled,
    Invalid,
}

fn parse_choice(input: &str, len: usize) -> Choice {
    let input = input.trim();
    if input.is_empty() || input.eq_ignore_ascii_case("q") {
        return Choice::Cancelled;
    }
    match input.parse::<usize>() {
        Ok(n) if (1..=len).contains(&n) => Choice::Picked(n - 1),
        _ => Choice::Invalid,
    }
}

pub fn confirm(message: &str) -> Result<bool> {
    print!("{} {}", "?".cyan().bold(), message.cyan());
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    let ans = input.trim().to_lowercase();
    Ok(ans == "y" || ans == "yes")
}

pub fn input(message: &str) -> Result<String> {
    print!("{} {}", "?".cyan().bold(), message.cyan());
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

/// Prompts with a default shown in brackets; empty input takes the default.
pub fn input_default(message: &str, default: &str) -> Result<String> {
    let answer = input(&format!("{message} [{default}]: "))?;
    if answer.is_empty() {
        Ok(default.to_string())
    } else {
        Ok(answer)
    }
}

pub fn password(message: &str) -> Result<String> {
    print!("{} {}", "?".cyan().bold(), message.cyan());
    io::stdout().flush()?;
    let password = read_password()?; // input hidden
    Ok(password)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_map_to_zero_based_indices() {
        assert_eq!(parse_choice("1\n", 3), Choice::Picked(0));
        assert_eq!(parse_choice(" 3 ", 3), Choice::Picked(2));
    }

    #[test]
    fn blank_and_q_cancel() {
        assert_eq!(parse_choice("\n", 3), Choice::Cancelled);
        assert_eq!(parse_choice("  ", 3), Choice::Cancelled);
        assert_eq!(parse_choice("q", 3), Choice::Cancelled);
        assert_eq!(parse_choice("Q\n", 3), Choice::Cancelled);
    }

    #[test]
    fn out_of_range_and_garbage_are_invalid() {
        assert_eq!(parse_choice("0", 3), Choice::Invalid);
        assert_eq!(parse_choice("4", 3), Choice::Invalid);
        assert_eq!(parse_choice("two", 3), Choice::Invalid);
        assert_eq!(parse_choice("-1", 3), Choice::Invalid);
    }

    #[test]
    fn scripted_answers_come_back_in_order() {
        let mut sel = ScriptedSelect::new([Some(2), None, Some(0)]);
        let items = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        assert_eq!(sel.select("pick", &items).unwrap(), Some(2));
        assert_eq!(sel.select("pick", &items).unwrap(), None);
        assert_eq!(sel.select("pick", &items).unwrap(), Some(0));
        // exhausted queue behaves like a cancel
        assert_eq!(sel.select("pick", &items).unwrap(), None);
    }
}

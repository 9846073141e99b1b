//! Interactive choices
//!
//! Every prompt returns `None` when the user aborts (`q` or end of input);
//! callers treat that as "cancel the current operation" without side effects.

use std::io::{self, BufRead, Write};

pub trait Chooser {
    /// Pick one option; `default` is used on an empty answer
    fn select(&mut self, message: &str, options: &[String], default: usize) -> Option<usize>;

    /// Pick any number of options; `checked` marks the pre-selected ones
    fn multi_select(&mut self, message: &str, options: &[String], checked: &[bool]) -> Option<Vec<usize>>;

    fn confirm(&mut self, message: &str, default: bool) -> Option<bool>;

    /// Free text; `default` is used on an empty answer
    fn input(&mut self, message: &str, default: &str) -> Option<String>;

    /// Show a message that needs no answer
    fn notify(&mut self, message: &str) {
        println!("{}", message);
    }
}

/// Line-oriented prompts over a reader and writer (stdin/stdout in the binary)
pub struct TerminalChooser<R, W> {
    input: R,
    output: W,
}

impl TerminalChooser<io::StdinLock<'static>, io::Stdout> {
    pub fn stdio() -> Self {
        TerminalChooser::new(io::stdin().lock(), io::stdout())
    }
}

impl<R: BufRead, W: Write> TerminalChooser<R, W> {
    pub fn new(input: R, output: W) -> Self {
        TerminalChooser { input, output }
    }

    /// Read one trimmed line; None on end of input, read error, or `q`
    fn read_answer(&mut self, prompt: &str) -> Option<String> {
        let _ = write!(self.output, "{} ", prompt);
        let _ = self.output.flush();

        let mut line = String::new();
        match self.input.read_line(&mut line) {
            Ok(0) => None,
            Ok(_) => {
                let answer = line.trim().to_string();
                if answer.eq_ignore_ascii_case("q") {
                    None
                } else {
                    Some(answer)
                }
            }
            Err(e) => {
                tracing::warn!("Failed to read answer: {}", e);
                None
            }
        }
    }

    fn print_options(&mut self, options: &[String], marks: impl Fn(usize) -> &'static str) {
        for (i, option) in options.iter().enumerate() {
            let _ = writeln!(self.output, "  {:>2}) {} {}", i + 1, marks(i), option);
        }
    }
}

impl<R: BufRead, W: Write> Chooser for TerminalChooser<R, W> {
    fn select(&mut self, message: &str, options: &[String], default: usize) -> Option<usize> {
        let _ = writeln!(self.output, "{}", message);
        self.print_options(options, |i| if i == default { ">" } else { " " });
        loop {
            let answer = self.read_answer(&format!("Choice [{}]:", default + 1))?;
            if answer.is_empty() && default < options.len() {
                return Some(default);
            }
            match answer.parse::<usize>() {
                Ok(n) if n >= 1 && n <= options.len() => return Some(n - 1),
                _ => {
                    let _ = writeln!(self.output, "Enter a number between 1 and {} (q to cancel)", options.len());
                }
            }
        }
    }

    fn multi_select(&mut self, message: &str, options: &[String], checked: &[bool]) -> Option<Vec<usize>> {
        let _ = writeln!(self.output, "{}", message);
        self.print_options(options, |i| if checked.get(i).copied().unwrap_or(false) { "[x]" } else { "[ ]" });
        'prompt: loop {
            let answer = self.read_answer("Numbers separated by spaces, empty keeps [x]:")?;
            if answer.is_empty() {
                return Some((0..options.len()).filter(|&i| checked.get(i).copied().unwrap_or(false)).collect());
            }
            let mut picked = Vec::new();
            for part in answer.split(|c: char| c == ',' || c.is_whitespace()).filter(|p| !p.is_empty()) {
                match part.parse::<usize>() {
                    Ok(n) if n >= 1 && n <= options.len() => {
                        if !picked.contains(&(n - 1)) {
                            picked.push(n - 1);
                        }
                    }
                    _ => {
                        let _ = writeln!(self.output, "'{}' is not an option", part);
                        continue 'prompt;
                    }
                }
            }
            picked.sort_unstable();
            return Some(picked);
        }
    }

    fn confirm(&mut self, message: &str, default: bool) -> Option<bool> {
        let hint = if default { "[Y/n]" } else { "[y/N]" };
        loop {
            let answer = self.read_answer(&format!("{} {}", message, hint))?;
            match answer.to_lowercase().as_str() {
                "" => return Some(default),
                "y" | "yes" => return Some(true),
                "n" | "no" => return Some(false),
                _ => {
                    let _ = writeln!(self.output, "Please answer y or n");
                }
            }
        }
    }

    fn input(&mut self, message: &str, default: &str) -> Option<String> {
        let prompt = if default.is_empty() {
            message.to_string()
        } else {
            format!("{} [{}]", message, default)
        };
        let answer = self.read_answer(&prompt)?;
        Some(if answer.is_empty() { default.to_string() } else { answer })
    }

    fn notify(&mut self, message: &str) {
        let _ = writeln!(self.output, "{}", message);
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn chooser(script: &str) -> TerminalChooser<Cursor<Vec<u8>>, Vec<u8>> {
        TerminalChooser::new(Cursor::new(script.as_bytes().to_vec()), Vec::new())
    }

    fn options(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_select_default_and_retry() {
        let opts = options(&["Refine", "Invert", "Discard"]);
        assert_eq!(chooser("\n").select("What?", &opts, 0), Some(0));
        assert_eq!(chooser("7\n3\n").select("What?", &opts, 0), Some(2));
        assert_eq!(chooser("q\n").select("What?", &opts, 0), None);
        assert_eq!(chooser("").select("What?", &opts, 0), None);
    }

    #[test]
    fn test_multi_select_parses_numbers() {
        let opts = options(&["Ha", "OIII", "SII"]);
        let checked = [true, false, false];
        assert_eq!(chooser("\n").multi_select("FILTER", &opts, &checked), Some(vec![0]));
        assert_eq!(chooser("3, 2 3\n").multi_select("FILTER", &opts, &checked), Some(vec![1, 2]));
        assert_eq!(chooser("x\n1\n").multi_select("FILTER", &opts, &checked), Some(vec![0]));
    }

    #[test]
    fn test_confirm_and_input() {
        assert_eq!(chooser("\n").confirm("Sure?", false), Some(false));
        assert_eq!(chooser("maybe\nYES\n").confirm("Sure?", false), Some(true));
        assert_eq!(chooser("\n").input("Dir", "/tmp"), Some("/tmp".to_string()));
        assert_eq!(chooser("M 31\n").input("Value", ""), Some("M 31".to_string()));
    }
}

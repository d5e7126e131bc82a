//! Human input
//!
//! Everything codexctl needs from the operator goes through [`Prompter`]:
//! a version number the file name did not reveal, confirmations and the
//! address a device should connect back to.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use crate::device::SshAuth;

pub trait Prompter {
    /// Version of `file_name`, typed by the operator
    fn ask_version(&mut self, file_name: &str) -> Option<String>;

    /// Yes/no question, defaulting to no
    fn confirm(&mut self, message: &str) -> bool;

    /// Host address the device should reach this machine at
    fn ask_host(&mut self, suggestion: Option<&str>) -> Option<String>;

    /// SSH credentials when none were given on the command line
    fn ask_auth(&mut self) -> Option<SshAuth>;
}

/// Prompter reading from stdin
pub struct ConsolePrompter<R> {
    input: R,
}

impl ConsolePrompter<io::StdinLock<'static>> {
    pub fn stdin() -> Self {
        Self::new(io::stdin().lock())
    }
}

impl<R: BufRead> ConsolePrompter<R> {
    pub fn new(input: R) -> Self {
        Self { input }
    }

    fn read_line(&mut self, prompt: &str) -> Option<String> {
        print!("{}", prompt);
        let _ = io::stdout().flush();

        let mut line = String::new();
        match self.input.read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line.trim().to_string()),
        }
    }
}

impl<R: BufRead> Prompter for ConsolePrompter<R> {
    fn ask_version(&mut self, file_name: &str) -> Option<String> {
        self.read_line(&format!(
            "Failed to get the version number from {}, please enter it: ",
            file_name
        ))
    }

    fn confirm(&mut self, message: &str) -> bool {
        self.read_line(&format!("{} (y/N): ", message))
            .map(|answer| matches!(answer.to_lowercase().as_str(), "y" | "yes"))
            .unwrap_or(false)
    }

    fn ask_host(&mut self, suggestion: Option<&str>) -> Option<String> {
        if let Some(address) = suggestion {
            let answer = self.read_line(&format!(
                "Device will download the update from {} (Y/n): ",
                address
            ))?;
            if !answer.to_lowercase().starts_with('n') {
                return Some(address.to_string());
            }
        }

        loop {
            let address =
                self.read_line("Please enter your host IP for the network the device is connected to: ")?;
            if address.parse::<std::net::IpAddr>().is_err() {
                println!("Error: Invalid IP given");
                continue;
            }
            let sure = self.read_line("Are you sure? (Y/n): ")?;
            if sure.to_lowercase().starts_with('n') {
                continue;
            }
            return Some(address);
        }
    }

    fn ask_auth(&mut self) -> Option<SshAuth> {
        let answer = self.read_line("Would you like to use a password to connect? (Y/n): ")?;
        if !answer.to_lowercase().starts_with('n') {
            let password = self.read_line("Enter RM SSH password: ")?;
            return Some(SshAuth::from_arg(&password));
        }

        loop {
            let key = self.read_line("Enter path to SSH key: ")?;
            let path = PathBuf::from(&key);
            if path.is_file() {
                return Some(SshAuth::KeyFile(path));
            }
            println!("Invalid path given");
        }
    }
}

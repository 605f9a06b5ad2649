//! Interactive prompts on the controlling terminal

use std::io::{self, BufRead, Write};
use termios::{tcsetattr, Termios, ECHO, ECHONL, TCSANOW};

const STDIN_FD: i32 = 0;

/// RAII guard that turns off input echo on stdin.
/// Restores the previous settings on drop.
pub struct EchoGuard {
	original: Termios,
}

impl EchoGuard {
	/// Returns None if stdin is not a terminal
	pub fn new() -> Option<Self> {
		let original = Termios::from_fd(STDIN_FD).ok()?;
		let mut hidden = original;
		hidden.c_lflag &= !ECHO;
		// still echo the newline so the next output starts on a fresh line
		hidden.c_lflag |= ECHONL;
		tcsetattr(STDIN_FD, TCSANOW, &hidden).ok()?;
		Some(EchoGuard { original })
	}
}

impl Drop for EchoGuard {
	fn drop(&mut self) {
		let _ = tcsetattr(STDIN_FD, TCSANOW, &self.original);
	}
}

/// Turn echo back on; used before exiting on a signal
pub fn restore_terminal_state() {
	let _ = io::stderr().flush();
	if let Ok(mut term) = Termios::from_fd(STDIN_FD) {
		term.c_lflag |= ECHO;
		let _ = tcsetattr(STDIN_FD, TCSANOW, &term);
	}
}

fn read_answer(input: &mut impl BufRead) -> io::Result<String> {
	let mut line = String::new();
	if input.read_line(&mut line)? == 0 {
		return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "no input"));
	}
	Ok(line.trim().to_string())
}

/// Ask for a line of input
pub fn prompt(question: &str) -> io::Result<String> {
	eprint!("{}: ", question);
	io::stderr().flush()?;
	read_answer(&mut io::stdin().lock())
}

/// Ask for a line of input without echoing it
pub fn prompt_hidden(question: &str) -> io::Result<String> {
	eprint!("{} (input will be hidden): ", question);
	io::stderr().flush()?;
	let _guard = EchoGuard::new();
	read_answer(&mut io::stdin().lock())
}

/// Interpret a yes/no answer; anything but an explicit yes is a no
pub fn parse_confirmation(answer: &str) -> bool {
	matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

/// Ask a yes/no question, defaulting to no
pub fn confirm(question: &str) -> io::Result<bool> {
	eprint!("{} [y/N]: ", question);
	io::stderr().flush()?;
	match read_answer(&mut io::stdin().lock()) {
		Ok(answer) => Ok(parse_confirmation(&answer)),
		Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
		Err(e) => Err(e),
	}
}


// vim: ts=4

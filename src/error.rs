//! Error types for chalsync commands

use std::error::Error;
use std::fmt;
use std::io;

use crate::reconcile::ReconcileError;
use crate::remote::RemoteError;
use crate::validation::ValidationFailed;

/// Main error type for the validate and deploy commands
#[derive(Debug)]
pub enum DeployError {
	/// Local sources have error-level issues; details are in the validation book
	Validation,

	/// Remote state could not be read or written
	Reconcile(ReconcileError),

	/// The remote client could not be set up
	Remote(RemoteError),

	/// Some challenges failed to apply
	Incomplete { failed: usize, skipped: usize },

	/// Reading from the terminal failed
	Io(io::Error),

	/// Operation aborted by user
	Aborted,
}

impl DeployError {
	/// Process exit code for this error
	pub fn exit_code(&self) -> i32 {
		match self {
			DeployError::Aborted => 130,
			_ => 1,
		}
	}
}

impl fmt::Display for DeployError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			DeployError::Validation => {
				write!(f, "Errors have occurred during validation; deployment cannot continue")
			}
			DeployError::Reconcile(e) => write!(f, "{}", e),
			DeployError::Remote(e) => write!(f, "{}", e),
			DeployError::Incomplete { failed, skipped } => {
				write!(f, "Deployment incomplete: {} failed, {} skipped", failed, skipped)
			}
			DeployError::Io(e) => write!(f, "I/O error: {}", e),
			DeployError::Aborted => write!(f, "Operation aborted by user"),
		}
	}
}

impl Error for DeployError {
	fn source(&self) -> Option<&(dyn Error + 'static)> {
		match self {
			DeployError::Reconcile(e) => Some(e),
			DeployError::Remote(e) => Some(e),
			DeployError::Io(e) => Some(e),
			_ => None,
		}
	}
}

impl From<ValidationFailed> for DeployError {
	fn from(_: ValidationFailed) -> Self {
		DeployError::Validation
	}
}

impl From<ReconcileError> for DeployError {
	fn from(e: ReconcileError) -> Self {
		match e {
			ReconcileError::Stopped => DeployError::Aborted,
			e => DeployError::Reconcile(e),
		}
	}
}

impl From<RemoteError> for DeployError {
	fn from(e: RemoteError) -> Self {
		DeployError::Remote(e)
	}
}

impl From<io::Error> for DeployError {
	fn from(e: io::Error) -> Self {
		DeployError::Io(e)
	}
}


// vim: ts=4

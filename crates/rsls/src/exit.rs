use std::process::ExitCode;

/// How a command finished, and what to tell the user about it.
#[derive(Debug, PartialEq, Eq)]
pub struct Exit {
    code: u8,
    message: Option<String>,
}

impl Exit {
    #[must_use]
    pub fn success() -> Self {
        Self {
            code: 0,
            message: None,
        }
    }

    #[must_use]
    pub fn error() -> Self {
        Self {
            code: 1,
            message: None,
        }
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.code == 0
    }

    /// Print the message, if any, and turn this into a process exit code.
    pub fn report(self) -> ExitCode {
        if let Some(message) = &self.message {
            if self.is_success() {
                println!("{message}");
            } else {
                eprintln!("{message}");
            }
        }
        ExitCode::from(self.code)
    }
}

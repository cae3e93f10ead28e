//! Run mode detection from `TRANSPORT_ENV`.
//!
//! Test modes keep the transport away from user state: the config lives
//! in a scratch directory and secrets go to a file instead of the OS
//! keyring.
//!
//! | `TRANSPORT_ENV`      | mode         |
//! |----------------------|--------------|
//! | `test`               | `Test`       |
//! | `system_test`        | `SystemTest` |
//! | anything else, unset | `Normal`     |

/// Variable that selects the run mode.
pub const ENV_VAR: &str = "TRANSPORT_ENV";

/// How the process was launched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    /// Regular operation against the configured backend.
    #[default]
    Normal,
    /// Automated tests: scratch config dir, file secret store.
    Test,
    /// End-to-end runs against a real backend, still without the keyring.
    SystemTest,
}

impl RunMode {
    /// Mode selected by the current process environment.
    #[must_use]
    pub fn current() -> Self {
        std::env::var(ENV_VAR)
            .map(|value| Self::from_value(&value))
            .unwrap_or_default()
    }

    fn from_value(value: &str) -> Self {
        match value.trim() {
            "test" => Self::Test,
            "system_test" => Self::SystemTest,
            _ => Self::Normal,
        }
    }

    /// Either test mode.
    #[must_use]
    pub fn is_test(self) -> bool {
        self != Self::Normal
    }
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Normal => "normal",
            Self::Test => "test",
            Self::SystemTest => "system_test",
        })
    }
}

/// Shorthand for `RunMode::current().is_test()`.
#[must_use]
pub fn is_any_test() -> bool {
    RunMode::current().is_test()
}

/// Secrets go to the file store instead of the OS keyring.
#[must_use]
pub fn should_skip_keyring() -> bool {
    is_any_test()
}

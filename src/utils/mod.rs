use std::env;

/// Macro to format an error message, to be displayed on the terminal.
///
/// # Examples
/// ```rust
/// # use release_ledger::format_error;
/// let msg = format_error!("Invalid value");
/// let msg = format_error!("Invalid value: {}", 42);
/// ```
#[macro_export]
macro_rules! format_error {
    ($($arg:tt)*) => {
        format!(
            "{}{}",
            color_eyre::owo_colors::style().bright_red().bold().style("[Error] "),
            format!($($arg)*)
        )
    }
}

/// Macro to format an information message, to be displayed on the terminal.
///
/// # Examples
/// ```rust
/// # use release_ledger::format_msg;
/// let msg = format_msg!("Succesful operation");
/// ```
#[macro_export]
macro_rules! format_msg {
    ($($arg:tt)*) => {
        format!("{}{}", color_eyre::owo_colors::style().cyan().style("-> "), format!($($arg)*))
    }
}

/// Reads a secret from the given environment variable, ignoring blank values
pub fn read_env_token(name: &str) -> Option<String> {
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    env::var(name)
        .ok()
        .map(|token| token.trim().to_owned())
        .filter(|token| !token.is_empty())
}

mod clear;
mod config;
mod index;
mod repos;
mod search;
mod status;

pub use clear::ClearArgs;
pub use config::ConfigCommand;
pub use index::IndexArgs;
pub use repos::ReposCommand;
pub use search::SearchArgs;

pub use clear::handle_clear;
pub use config::handle_config;
pub use index::handle_index;
pub use repos::handle_repos;
pub use search::handle_search;
pub use status::handle_status;

use std::io::Write;

/// Ask a yes/no question on stderr. Anything but `y` or `yes` is a no.
pub(crate) fn confirm(prompt: &str) -> anyhow::Result<bool> {
    eprint!("{} [y/N] ", prompt);
    std::io::stderr().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(is_yes(&input))
}

fn is_yes(input: &str) -> bool {
    matches!(input.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_yes() {
        assert!(is_yes("y\n"));
        assert!(is_yes(" YES "));
        assert!(!is_yes("\n"));
        assert!(!is_yes("no"));
        assert!(!is_yes("yep"));
    }
}

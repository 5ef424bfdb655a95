use pty_host::LaunchCommand;
use std::path::Path;

pub fn shell_name(shell_path: &str) -> String {
    let name = Path::new(shell_path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("sh")
        .to_ascii_lowercase();
    name.strip_suffix(".exe").unwrap_or(&name).to_string()
}

/// Runs `script` through a login invocation of `shell`.
pub fn login_script(shell: &str, script: &str) -> LaunchCommand {
    match shell_name(shell).as_str() {
        // These reject the combined `-lc` flag.
        "fish" | "nu" => LaunchCommand::new(shell).args(["-l", "-c", script]),
        _ => LaunchCommand::new(shell).args(["-lc", script]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shell_name_extracts_basename() {
        assert_eq!(shell_name("/usr/local/bin/ZSH"), "zsh");
        assert_eq!(shell_name("C:/Program Files/bash.exe"), "bash");
        assert_eq!(shell_name(""), "sh");
    }

    #[test]
    fn login_script_splits_flags_for_fish() {
        let fish = login_script("/opt/homebrew/bin/fish", "make dev");
        assert_eq!(fish.args, vec!["-l", "-c", "make dev"]);

        let bash = login_script("/bin/bash", "make dev");
        assert_eq!(bash.program, "/bin/bash");
        assert_eq!(bash.args, vec!["-lc", "make dev"]);
    }
}

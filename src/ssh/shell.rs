//! Hand-offs to the system `ssh` and `rsync` binaries for the interactive
//! paths, where a real terminal matters more than an in-process client.

use std::path::Path;
use tokio::process::Command;
use tracing::debug;

use crate::ssh::errors::SshError;

pub const RSYNC_EXCLUDES: [&str; 4] = [".git", ".tox", ".vagrant", "venv"];

/// Wraps `s` in single quotes so `sh` passes it through untouched.
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Host key checks are off because every new box has a new host key.
pub fn ssh_options(key_file: &Path) -> Vec<String> {
    vec![
        "-i".to_string(),
        key_file.display().to_string(),
        "-o".to_string(),
        "StrictHostKeyChecking=no".to_string(),
        "-o".to_string(),
        "UserKnownHostsFile=/dev/null".to_string(),
    ]
}

pub fn ssh_args(key_file: &Path, user: &str, host: &str) -> Vec<String> {
    let mut args = vec!["-t".to_string()];
    args.extend(ssh_options(key_file));
    args.push(format!("{}@{}", user, host));
    args
}

/// Arguments syncing the contents of `source` into the remote user's home
/// directory
pub fn rsync_args(key_file: &Path, user: &str, host: &str, source: &Path) -> Vec<String> {
    let mut args = vec!["-a".to_string(), "--info=progress2".to_string()];
    for exclude in RSYNC_EXCLUDES {
        args.push(format!("--exclude={}", exclude));
    }

    let remote_shell = std::iter::once("ssh".to_string())
        .chain(std::iter::once("-C".to_string()))
        .chain(ssh_options(key_file).iter().map(|opt| match opt.starts_with('-') {
            true => opt.clone(),
            false => shell_quote(opt),
        }))
        .collect::<Vec<String>>()
        .join(" ");
    args.push("-e".to_string());
    args.push(remote_shell);

    // trailing slash copies the directory's contents rather than the directory
    let mut source = source.display().to_string();
    if !source.ends_with('/') {
        source.push('/');
    }
    args.push(source);
    args.push(format!("{}@{}:", user, host));
    args
}

/// Runs `program` attached to this terminal and returns its exit code. A
/// child killed by a signal reports 255, the way `ssh` does.
pub async fn run_attached(program: &str, args: &[String]) -> Result<i32, SshError> {
    debug!(program, ?args, "spawning");
    let status = Command::new(program).args(args).status().await?;
    Ok(status.code().unwrap_or(255))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("ls -l"), "'ls -l'");
        assert_eq!(shell_quote("echo 'hi'"), r"'echo '\''hi'\'''");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn test_ssh_args_for_interactive_shell() {
        let args = ssh_args(Path::new("/keys/ops.pem"), "centos", "54.1.2.3");
        assert_eq!(
            args,
            vec![
                "-t",
                "-i",
                "/keys/ops.pem",
                "-o",
                "StrictHostKeyChecking=no",
                "-o",
                "UserKnownHostsFile=/dev/null",
                "centos@54.1.2.3",
            ]
        );
    }

    #[test]
    fn test_rsync_args() {
        let args = rsync_args(
            Path::new("/keys/ops.pem"),
            "centos",
            "54.1.2.3",
            Path::new("/src/project"),
        );

        assert_eq!(&args[..2], &["-a", "--info=progress2"]);
        assert!(args.contains(&"--exclude=.git".to_string()));
        assert!(args.contains(&"--exclude=venv".to_string()));

        let e = args.iter().position(|a| a == "-e").unwrap();
        assert_eq!(
            args[e + 1],
            "ssh -C -i '/keys/ops.pem' -o 'StrictHostKeyChecking=no' -o 'UserKnownHostsFile=/dev/null'"
        );
        assert_eq!(args[args.len() - 2], "/src/project/");
        assert_eq!(args[args.len() - 1], "centos@54.1.2.3:");
    }

    #[test]
    fn test_rsync_source_slash_is_not_doubled() {
        let args = rsync_args(
            Path::new("/keys/ops.pem"),
            "centos",
            "54.1.2.3",
            Path::new("/src/project/"),
        );
        assert_eq!(args[args.len() - 2], "/src/project/");
    }

    #[tokio::test]
    async fn test_run_attached_reports_exit_code() {
        let code = run_attached("sh", &["-c".to_string(), "exit 3".to_string()])
            .await
            .unwrap();
        assert_eq!(code, 3);
    }
}

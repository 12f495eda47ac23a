use std::path::Path;
use thiserror::Error;
use winnow::Result as PResult;
use winnow::prelude::*;
use winnow::{
    ascii::space0,
    combinator::{alt, opt, preceded},
    token::{take_until, take_while},
};

use crate::ssh::shell::shell_quote;

#[derive(Debug, PartialEq)]
pub enum ParsedAction {
    Execute { command: String },
    Sudo { command: String },
    Upload { source: String, destination: String },
    Download { source: String, destination: String },
}

impl ParsedAction {
    /// The shell line to run remotely, for actions that run one
    pub fn remote_command(&self) -> Option<String> {
        match self {
            ParsedAction::Execute { command } => Some(command.clone()),
            ParsedAction::Sudo { command } => Some(format!("sudo -n sh -c {}", shell_quote(command))),
            _ => None,
        }
    }
}

impl std::fmt::Display for ParsedAction {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ParsedAction::Execute { command } => write!(f, "execute: {}", command),
            ParsedAction::Sudo { command } => write!(f, "sudo: {}", command),
            ParsedAction::Upload {
                source,
                destination,
            } => write!(f, "upload: {} -> {}", source, destination),
            ParsedAction::Download {
                source,
                destination,
            } => write!(f, "download: {} -> {}", source, destination),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum PlanError {
    #[error("line {line}: expected execute:, sudo:, upload: or download: followed by a value, found `{content}`")]
    Syntax { line: usize, content: String },

    #[error("plan has no actions")]
    Empty,
}

fn rest_of_line<'s>(input: &mut &'s str) -> PResult<&'s str> {
    take_while(1.., |_: char| true)
        .verify(|s: &str| !s.trim().is_empty())
        .parse_next(input)
}

/// `source [-> destination]`, destination defaulting to the source's file name
fn transfer(input: &mut &str) -> PResult<(String, String)> {
    let source = alt((take_until(1.., "->"), rest_of_line))
        .verify(|s: &str| !s.trim().is_empty() && !s.starts_with("->"))
        .parse_next(input)?;
    let destination = opt(preceded("->", rest_of_line)).parse_next(input)?;

    let source = source.trim().to_string();
    let destination = match destination {
        Some(d) => d.trim().to_string(),
        None => Path::new(&source)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| source.clone()),
    };
    Ok((source, destination))
}

fn parse_execute(input: &mut &str) -> PResult<ParsedAction> {
    ("execute:", space0).parse_next(input)?;
    let command = rest_of_line.parse_next(input)?;

    Ok(ParsedAction::Execute {
        command: command.trim().to_string(),
    })
}

fn parse_sudo(input: &mut &str) -> PResult<ParsedAction> {
    ("sudo:", space0).parse_next(input)?;
    let command = rest_of_line.parse_next(input)?;

    Ok(ParsedAction::Sudo {
        command: command.trim().to_string(),
    })
}

fn parse_upload(input: &mut &str) -> PResult<ParsedAction> {
    ("upload:", space0).parse_next(input)?;
    let (source, destination) = transfer.parse_next(input)?;

    Ok(ParsedAction::Upload {
        source,
        destination,
    })
}

fn parse_download(input: &mut &str) -> PResult<ParsedAction> {
    ("download:", space0).parse_next(input)?;
    let (source, destination) = transfer.parse_next(input)?;

    Ok(ParsedAction::Download {
        source,
        destination,
    })
}

fn parse_action(input: &mut &str) -> PResult<ParsedAction> {
    alt((parse_execute, parse_sudo, parse_upload, parse_download)).parse_next(input)
}

/// Parses a whole plan. Blank lines and `#` comment lines are skipped and the
/// first malformed line is reported by its 1-based number.
pub fn parse_plan(input: &str) -> Result<Vec<ParsedAction>, PlanError> {
    let mut actions = Vec::new();

    for (idx, raw) in input.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let action = parse_action.parse(line).map_err(|_| PlanError::Syntax {
            line: idx + 1,
            content: line.to_string(),
        })?;
        actions.push(action);
    }

    match actions.is_empty() {
        true => Err(PlanError::Empty),
        false => Ok(actions),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_execute_command() {
        let mut input = "execute: echo \"take five\"";
        let result = parse_execute(&mut input).unwrap();
        assert_eq!(
            result,
            ParsedAction::Execute {
                command: "echo \"take five\"".to_string()
            }
        );
    }

    #[test]
    fn test_parse_single_upload_command() {
        let mut input = "upload: scripts/myscript.sh";
        let result = parse_upload(&mut input).unwrap();
        assert_eq!(
            result,
            ParsedAction::Upload {
                source: "scripts/myscript.sh".to_string(),
                destination: "myscript.sh".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_upload_with_destination() {
        let mut input = "upload: local-build.tar.gz -> /tmp/build.tar.gz";
        let result = parse_upload(&mut input).unwrap();
        assert_eq!(
            result,
            ParsedAction::Upload {
                source: "local-build.tar.gz".to_string(),
                destination: "/tmp/build.tar.gz".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_single_download_command() {
        let mut input = "download: /tmp/all-the-output.tar.gz";
        let result = parse_download(&mut input).unwrap();
        assert_eq!(
            result,
            ParsedAction::Download {
                source: "/tmp/all-the-output.tar.gz".to_string(),
                destination: "all-the-output.tar.gz".to_string(),
            }
        );
    }

    #[test]
    fn test_sudo_runs_through_quoted_shell() {
        let action = ParsedAction::Sudo {
            command: "echo 'hi' > /etc/motd".to_string(),
        };
        assert_eq!(
            action.remote_command().unwrap(),
            r"sudo -n sh -c 'echo '\''hi'\'' > /etc/motd'"
        );
        let upload = ParsedAction::Upload {
            source: "a".to_string(),
            destination: "a".to_string(),
        };
        assert_eq!(upload.remote_command(), None);
    }

    #[test]
    fn test_parse_example_plan() {
        let input = r#"
# get the box ready
execute: echo "Take Five!"
upload: my_init.sh

  sudo: yum install -y epel-release
execute: chmod 755 my_init.sh && ./my_init.sh
download: takefive.tar.gz -> ./out/takefive.tar.gz
"#;
        let result = parse_plan(input).unwrap();
        assert_eq!(
            result,
            vec![
                ParsedAction::Execute {
                    command: "echo \"Take Five!\"".to_string()
                },
                ParsedAction::Upload {
                    source: "my_init.sh".to_string(),
                    destination: "my_init.sh".to_string(),
                },
                ParsedAction::Sudo {
                    command: "yum install -y epel-release".to_string()
                },
                ParsedAction::Execute {
                    command: "chmod 755 my_init.sh && ./my_init.sh".to_string()
                },
                ParsedAction::Download {
                    source: "takefive.tar.gz".to_string(),
                    destination: "./out/takefive.tar.gz".to_string(),
                },
            ]
        );
    }

    #[test]
    fn test_malformed_line_is_reported_by_number() {
        let input = "execute: uptime\n# fine\nreboot: now\n";
        assert_eq!(
            parse_plan(input),
            Err(PlanError::Syntax {
                line: 3,
                content: "reboot: now".to_string()
            })
        );
    }

    #[test]
    fn test_missing_values_are_rejected() {
        assert!(matches!(
            parse_plan("execute:   "),
            Err(PlanError::Syntax { line: 1, .. })
        ));
        assert!(matches!(
            parse_plan("upload: -> /tmp/x"),
            Err(PlanError::Syntax { line: 1, .. })
        ));
        assert!(matches!(
            parse_plan("download: /tmp/x ->"),
            Err(PlanError::Syntax { line: 1, .. })
        ));
    }

    #[test]
    fn test_plan_of_only_comments_is_empty() {
        assert_eq!(parse_plan("# nothing\n\n"), Err(PlanError::Empty));
    }

    #[test]
    fn test_bundled_plan_parses() {
        let plan = include_str!("../../plans/data-platform.plan");
        let actions = parse_plan(plan).unwrap();
        assert!(actions.len() > 5);
        assert!(
            actions
                .iter()
                .any(|a| matches!(a, ParsedAction::Sudo { command } if command.contains("docker")))
        );
    }
}

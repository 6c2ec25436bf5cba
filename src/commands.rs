//! Command loading.
//!
//! Turns positional arguments into `CommandDescriptor`s. A lone word such as
//! `npm:build.*` is a shorthand that expands to one command per matching
//! script in the manifest's `scripts` table.

use crate::error::ConfigError;
use crate::model::CommandDescriptor;
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Default, Deserialize)]
struct Manifest {
    #[serde(default)]
    scripts: BTreeMap<String, String>,
}

/// Package runners understood by the shorthand syntax.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Runner {
    Npm,
    Pnpm,
    Yarn,
    Bun,
}

impl Runner {
    fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "npm" => Some(Runner::Npm),
            "pnpm" => Some(Runner::Pnpm),
            "yarn" => Some(Runner::Yarn),
            "bun" => Some(Runner::Bun),
            _ => None,
        }
    }

    /// Words that precede the script name.
    fn words(self) -> Vec<String> {
        let words: &[&str] = match self {
            Runner::Npm => &["npm", "run"],
            Runner::Pnpm => &["pnpm"],
            Runner::Yarn => &["yarn"],
            Runner::Bun => &["bun", "run"],
        };
        words.iter().map(|w| w.to_string()).collect()
    }
}

/// Build the ordered command list.
///
/// `names` override display names by position; the manifest is read only if a
/// shorthand is present.
pub fn load_commands(
    raw: &[String],
    manifest: &Path,
    names: &[String],
) -> Result<Vec<CommandDescriptor>, ConfigError> {
    let mut scripts: Option<Vec<String>> = None;
    let mut commands = Vec::new();

    for arg in raw {
        let words = split_words(arg)?;
        if let [single] = words.as_slice() {
            if let Some((runner, pattern)) = parse_shorthand(single) {
                if scripts.is_none() {
                    scripts = Some(read_scripts(manifest)?);
                }
                let available = scripts.as_deref().unwrap_or(&[]);
                let matched = filter_scripts(available, pattern)?;
                if matched.is_empty() {
                    tracing::warn!(shorthand = %single, "no scripts matched");
                }
                for script in matched {
                    let mut words = runner.words();
                    words.push(script.clone());
                    push_command(&mut commands, words, Some(script));
                }
                continue;
            }
        }
        if !words.is_empty() {
            push_command(&mut commands, words, None);
        }
    }

    if commands.is_empty() {
        return Err(ConfigError::NoCommands);
    }

    for (command, name) in commands.iter_mut().zip(names) {
        let name = name.trim();
        if !name.is_empty() {
            command.display_name = name.to_string();
        }
    }

    Ok(commands)
}

fn push_command(commands: &mut Vec<CommandDescriptor>, mut words: Vec<String>, name: Option<String>) {
    let executable = words.remove(0);
    let display_name = name.unwrap_or_else(|| executable.clone());
    commands.push(CommandDescriptor {
        id: commands.len(),
        executable,
        arguments: words,
        display_name,
    });
}

fn parse_shorthand(word: &str) -> Option<(Runner, &str)> {
    let (prefix, pattern) = word.split_once(':')?;
    let runner = Runner::from_prefix(prefix)?;
    if pattern.is_empty() {
        return None;
    }
    Some((runner, pattern))
}

fn read_scripts(path: &Path) -> Result<Vec<String>, ConfigError> {
    let data = std::fs::read_to_string(path).map_err(|source| ConfigError::ManifestRead {
        path: path.to_path_buf(),
        source,
    })?;
    let manifest: Manifest =
        serde_json::from_str(&data).map_err(|source| ConfigError::ManifestParse {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(manifest.scripts.into_keys().collect())
}

fn filter_scripts(scripts: &[String], pattern: &str) -> Result<Vec<String>, ConfigError> {
    if pattern == "*" {
        return Ok(scripts.to_vec());
    }
    let re = Regex::new(pattern).map_err(|source| ConfigError::ScriptPattern {
        pattern: pattern.to_string(),
        source,
    })?;
    Ok(scripts.iter().filter(|s| re.is_match(s)).cloned().collect())
}

/// Split a command string into words, honouring single quotes, double quotes
/// and backslash escapes the way a POSIX shell would for plain words.
fn split_words(input: &str) -> Result<Vec<String>, ConfigError> {
    let unterminated = || ConfigError::UnterminatedQuote(input.to_string());
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = input.chars();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(ch) => current.push(ch),
                        None => return Err(unterminated()),
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(ch @ ('"' | '\\' | '$' | '`')) => current.push(ch),
                            Some(ch) => {
                                current.push('\\');
                                current.push(ch);
                            }
                            None => return Err(unterminated()),
                        },
                        Some(ch) => current.push(ch),
                        None => return Err(unterminated()),
                    }
                }
            }
            '\\' => {
                in_word = true;
                if let Some(ch) = chars.next() {
                    current.push(ch);
                }
            }
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            c => {
                in_word = true;
                current.push(c);
            }
        }
    }
    if in_word {
        words.push(current);
    }
    Ok(words)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    fn manifest(scripts: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"name": "demo", "scripts": {scripts}}}"#).unwrap();
        file
    }

    #[test]
    fn splits_plain_and_quoted_words() {
        assert_eq!(split_words("echo  hello world").unwrap(), args(&["echo", "hello", "world"]));
        assert_eq!(
            split_words(r#"sh -c 'echo "hi there"; exit 2'"#).unwrap(),
            args(&["sh", "-c", r#"echo "hi there"; exit 2"#])
        );
        assert_eq!(split_words(r#"echo "a \"b\"" c\ d"#).unwrap(), args(&["echo", r#"a "b""#, "c d"]));
        assert_eq!(split_words("echo ''").unwrap(), args(&["echo", ""]));
        assert!(split_words("   ").unwrap().is_empty());
    }

    #[test]
    fn unterminated_quote_is_rejected() {
        assert!(matches!(
            split_words("echo 'oops"),
            Err(ConfigError::UnterminatedQuote(_))
        ));
    }

    #[test]
    fn plain_commands_get_dense_ids_and_executable_names() {
        let cmds = load_commands(&args(&["ls -la", "pwd", "foo:bar"]), Path::new("missing.json"), &[])
            .unwrap();
        assert_eq!(cmds.len(), 3);
        assert_eq!(cmds[0].id, 0);
        assert_eq!(cmds[0].executable, "ls");
        assert_eq!(cmds[0].arguments, args(&["-la"]));
        assert_eq!(cmds[0].display_name, "ls");
        assert_eq!(cmds[1].id, 1);
        assert_eq!(cmds[1].executable, "pwd");
        // Unknown runner prefixes are ordinary commands.
        assert_eq!(cmds[2].executable, "foo:bar");
    }

    #[test]
    fn names_override_display_names_by_position() {
        let names = args(&["first", "", "ignored"]);
        let cmds = load_commands(&args(&["echo a", "echo b"]), Path::new("missing.json"), &names)
            .unwrap();
        assert_eq!(cmds[0].display_name, "first");
        assert_eq!(cmds[1].display_name, "echo");
    }

    #[test]
    fn shorthand_expands_matching_scripts() {
        let file = manifest(r#"{"build:web": "x", "build:api": "y", "test": "z"}"#);
        let cmds = load_commands(&args(&["npm:build", "pnpm:^test$"]), file.path(), &[]).unwrap();

        let lines: Vec<String> = cmds.iter().map(|c| c.command_line()).collect();
        assert_eq!(lines, args(&["npm run build:api", "npm run build:web", "pnpm test"]));
        assert_eq!(cmds[0].display_name, "build:api");
        assert_eq!(cmds[2].id, 2);
    }

    #[test]
    fn shorthand_star_selects_every_script() {
        let file = manifest(r#"{"a": "x", "b": "y"}"#);
        let cmds = load_commands(&args(&["yarn:*"]), file.path(), &[]).unwrap();
        assert_eq!(cmds.len(), 2);
        assert_eq!(cmds[1].command_line(), "yarn b");
    }

    #[test]
    fn shorthand_errors_are_reported() {
        let missing = PathBuf::from("/definitely/not/here/package.json");
        assert!(matches!(
            load_commands(&args(&["npm:x"]), &missing, &[]),
            Err(ConfigError::ManifestRead { .. })
        ));

        let file = manifest(r#"{"a": "x"}"#);
        assert!(matches!(
            load_commands(&args(&["npm:("]), file.path(), &[]),
            Err(ConfigError::ScriptPattern { .. })
        ));

        let mut broken = tempfile::NamedTempFile::new().unwrap();
        write!(broken, "not json").unwrap();
        assert!(matches!(
            load_commands(&args(&["npm:a"]), broken.path(), &[]),
            Err(ConfigError::ManifestParse { .. })
        ));
    }

    #[test]
    fn nothing_to_run_is_an_error() {
        let file = manifest(r#"{"a": "x"}"#);
        assert!(matches!(
            load_commands(&args(&["npm:zzz", "  "]), file.path(), &[]),
            Err(ConfigError::NoCommands)
        ));
    }
}

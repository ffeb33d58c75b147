use crate::platform::Scope;
use crate::{LaunchCommand, ServiceDefinition};
use anyhow::{anyhow, bail, Result};
use std::path::PathBuf;

/// Comment added to generated unit files to indicate they are managed by svcinstall
pub const MANAGED_BY_COMMENT: &str = "# Managed by svcinstall";

/// The fields of a unit file that svcinstall writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitDetails {
    pub description: String,
    pub launch: LaunchCommand,
    pub wanted_by: Option<String>,
}

pub fn wanted_by(scope: Scope) -> &'static str {
    match scope {
        Scope::System => "multi-user.target",
        Scope::User => "default.target",
    }
}

pub fn generate_file(definition: &ServiceDefinition, scope: Scope) -> Result<String> {
    let launch = &definition.launch;
    check_single_line(&definition.description)?;
    check_single_line(&launch.program.to_string_lossy())?;
    for arg in &launch.arguments {
        check_single_line(arg)?;
    }
    if let Some(wd) = &launch.working_directory {
        check_single_line(&wd.to_string_lossy())?;
    }
    for (key, value) in &launch.env_vars {
        check_single_line(key)?;
        check_single_line(value)?;
    }

    let mut unit_content = String::new();
    unit_content.push_str(MANAGED_BY_COMMENT);
    unit_content.push('\n');
    unit_content.push_str("[Unit]\n");
    unit_content.push_str(&format!("Description={}\n", escape_specifiers(&definition.description)));
    unit_content.push_str("After=network.target\n");
    unit_content.push_str("\n[Service]\n");

    unit_content.push_str("ExecStart=");
    unit_content.push_str(&exec_word(&launch.program.to_string_lossy()));
    for arg in &launch.arguments {
        unit_content.push(' ');
        unit_content.push_str(&exec_word(arg));
    }
    unit_content.push('\n');

    if let Some(ref wd) = launch.working_directory {
        unit_content.push_str(&format!(
            "WorkingDirectory={}\n",
            escape_specifiers(&wd.to_string_lossy())
        ));
    }
    for (key, value) in &launch.env_vars {
        let assignment = escape_specifiers(&format!("{key}={value}"));
        unit_content.push_str(&format!("Environment={}\n", quote(&assignment)));
    }

    unit_content.push_str("\n[Install]\n");
    unit_content.push_str(&format!("WantedBy={}\n", wanted_by(scope)));

    Ok(unit_content)
}

pub fn parse_systemd(contents: &str) -> Result<UnitDetails> {
    let mut description = None;
    let mut command = None;
    let mut working_directory = None;
    let mut env_vars = Vec::new();
    let mut wanted_by = None;

    for line in contents.lines() {
        let line = line.trim();
        if let Some(value) = line.strip_prefix("Description=") {
            description = Some(unescape_specifiers(value));
        } else if let Some(value) = line.strip_prefix("ExecStart=") {
            let parts: Vec<String> = split_quoted(value)?
                .iter()
                .map(|word| unescape_specifiers(word).replace("$$", "$"))
                .collect();
            if parts.is_empty() {
                bail!("ExecStart line is empty in service file");
            }
            command = Some(parts);
        } else if let Some(value) = line.strip_prefix("WorkingDirectory=") {
            working_directory = Some(PathBuf::from(unescape_specifiers(value)));
        } else if let Some(value) = line.strip_prefix("Environment=") {
            for assignment in split_quoted(value)? {
                let assignment = unescape_specifiers(&assignment);
                let Some((a, b)) = assignment.split_once('=') else {
                    bail!("Malformed Environment line in service file: {}", line);
                };
                env_vars.push((a.to_string(), b.to_string()));
            }
        } else if let Some(value) = line.strip_prefix("WantedBy=") {
            wanted_by = Some(value.to_string());
        }
    }

    let mut command = command.ok_or_else(|| anyhow!("No ExecStart for service"))?;
    let program = PathBuf::from(command.remove(0));
    Ok(UnitDetails {
        description: description.unwrap_or_default(),
        launch: LaunchCommand {
            program,
            arguments: command,
            working_directory,
            env_vars,
        },
        wanted_by,
    })
}

fn check_single_line(value: &str) -> Result<()> {
    if value.contains(char::is_control) {
        bail!("Control characters cannot be written to a unit file: {:?}", value);
    }
    Ok(())
}

/// systemd expands `%` specifiers in most settings.
fn escape_specifiers(value: &str) -> String {
    value.replace('%', "%%")
}

fn unescape_specifiers(value: &str) -> String {
    value.replace("%%", "%")
}

/// An ExecStart word: specifiers and `$VAR` expansion disabled, quoted if needed.
fn exec_word(word: &str) -> String {
    quote(&escape_specifiers(word).replace('$', "$$"))
}

/// Quote a word for ExecStart/Environment if it contains whitespace or quotes.
fn quote(word: &str) -> String {
    if !word.is_empty() && !word.contains(|c: char| c.is_whitespace() || c == '"' || c == '\\') {
        return word.to_string();
    }
    let mut quoted = String::with_capacity(word.len() + 2);
    quoted.push('"');
    for c in word.chars() {
        if c == '"' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

fn split_quoted(line: &str) -> Result<Vec<String>> {
    let mut words = Vec::new();
    let mut chars = line.chars();
    let mut current = String::new();
    let mut in_word = false;
    let mut in_quotes = false;

    while let Some(c) = chars.next() {
        match c {
            '\\' if in_quotes => {
                let escaped = chars
                    .next()
                    .ok_or_else(|| anyhow!("Trailing backslash in: {}", line))?;
                current.push(escaped);
            }
            '"' => {
                in_quotes = !in_quotes;
                in_word = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            c => {
                current.push(c);
                in_word = true;
            }
        }
    }
    if in_quotes {
        bail!("Unterminated quote in: {}", line);
    }
    if in_word {
        words.push(current);
    }
    Ok(words)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition() -> ServiceDefinition {
        ServiceDefinition {
            id: "n8nservice".into(),
            display_name: "n8n-service".into(),
            description: "n8n automation service".into(),
            launch: LaunchCommand {
                program: PathBuf::from("/usr/bin/node"),
                arguments: vec![
                    "--harmony".into(),
                    "--max_old_space_size=4096".into(),
                    "/srv/my app/node_modules/.bin/n8n".into(),
                ],
                working_directory: Some(PathBuf::from("/srv/my app")),
                env_vars: vec![("GREETING".into(), "hello world".into())],
            },
            log_dir: PathBuf::from("/srv/my app/daemon"),
        }
    }

    #[test]
    fn test_generate_file() {
        let content = generate_file(&definition(), Scope::System).unwrap();
        assert!(content.starts_with(MANAGED_BY_COMMENT));
        assert!(content.contains("Description=n8n automation service\n"));
        assert!(content.contains(
            "ExecStart=/usr/bin/node --harmony --max_old_space_size=4096 \"/srv/my app/node_modules/.bin/n8n\"\n"
        ));
        assert!(content.contains("WorkingDirectory=/srv/my app\n"));
        assert!(content.contains("Environment=\"GREETING=hello world\"\n"));
        assert!(content.contains("WantedBy=multi-user.target\n"));
        assert!(!content.contains("Restart="));
    }

    #[test]
    fn test_user_scope_wants_default_target() {
        let content = generate_file(&definition(), Scope::User).unwrap();
        assert!(content.contains("WantedBy=default.target\n"));
    }

    #[test]
    fn test_parse_reads_back_generated_unit() {
        let definition = definition();
        let content = generate_file(&definition, Scope::System).unwrap();
        let details = parse_systemd(&content).unwrap();
        assert_eq!(details.description, definition.description);
        assert_eq!(details.launch, definition.launch);
        assert_eq!(details.wanted_by.as_deref(), Some("multi-user.target"));
    }

    #[test]
    fn test_parse_requires_exec_start() {
        let err = parse_systemd("[Unit]\nDescription=x\n").unwrap_err();
        assert!(err.to_string().contains("No ExecStart"));
    }

    #[test]
    fn test_split_quoted_handles_escapes() {
        assert_eq!(
            split_quoted(r#"a "b c" "d\"e" """#).unwrap(),
            vec!["a", "b c", "d\"e", ""]
        );
        assert!(split_quoted("\"open").is_err());
    }

    #[test]
    fn test_control_characters_rejected() {
        let mut definition = definition();
        definition.description = "one\ntwo".into();
        assert!(generate_file(&definition, Scope::System).is_err());

        let mut definition = self::definition();
        definition.launch.arguments.push("a\nUser=root".into());
        let err = generate_file(&definition, Scope::System).unwrap_err();
        assert!(err.to_string().contains("Control characters"));

        let mut definition = self::definition();
        definition.launch.env_vars.push(("TZ".into(), "UTC\nUser=root".into()));
        assert!(generate_file(&definition, Scope::System).is_err());
    }

    #[test]
    fn test_specifiers_and_variables_are_escaped() {
        let mut definition = definition();
        definition.description = "n8n at 100%".into();
        definition.launch.arguments = vec!["--title=50%n".into(), "--x=$HOME".into(), "${PATH}".into()];
        definition.launch.working_directory = Some(PathBuf::from("/srv/100%"));
        definition.launch.env_vars = vec![("RATIO".into(), "10%h".into())];

        let content = generate_file(&definition, Scope::System).unwrap();
        assert!(content.contains("Description=n8n at 100%%\n"));
        assert!(content.contains(
            "ExecStart=/usr/bin/node --title=50%%n --x=$$HOME $${PATH}\n"
        ));
        assert!(content.contains("WorkingDirectory=/srv/100%%\n"));
        assert!(content.contains("Environment=RATIO=10%%h\n"));

        let details = parse_systemd(&content).unwrap();
        assert_eq!(details.description, definition.description);
        assert_eq!(details.launch, definition.launch);
    }
}

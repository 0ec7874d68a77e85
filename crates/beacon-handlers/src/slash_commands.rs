//! `listSlashCommands`: enumerate built-in, user-defined, and (Claude-only)
//! plugin slash commands available to an agent.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::HandlerError;

/// Params for `listSlashCommands`.
#[derive(Debug, Deserialize)]
pub struct ListSlashCommandsArgs {
    /// Agent flavor (`"claude"`, `"codex"`, `"gemini"`, ...).
    pub agent: String,
}

/// Result of `listSlashCommands`.
#[derive(Debug, Serialize)]
pub struct ListSlashCommandsResult {
    /// Commands available to the agent, built-ins first.
    pub commands: Vec<SlashCommand>,
}

/// Where a slash command came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandSource {
    /// Shipped with the agent itself.
    Builtin,
    /// Defined by the user under their per-agent commands directory.
    User,
    /// Contributed by an installed plugin (Claude only).
    Plugin,
}

/// One enumerated slash command.
#[derive(Debug, Clone, Serialize)]
pub struct SlashCommand {
    /// Command name, without the leading `/`.
    pub name: String,
    /// One-line description, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Where this command came from.
    pub source: CommandSource,
    /// Full command body, for user/plugin commands backed by a file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Owning plugin name, for `source: plugin`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plugin_name: Option<String>,
}

/// Optional YAML frontmatter on a user/plugin command markdown file.
#[derive(Debug, Deserialize, Default)]
struct Frontmatter {
    #[serde(default)]
    description: Option<String>,
}

/// Static built-in command table per agent flavor.
fn builtin_commands(agent: &str) -> &'static [(&'static str, &'static str)] {
    match agent {
        "claude" => &[
            ("compact", "Summarize the conversation to free up context"),
            ("clear", "Clear conversation history"),
            ("review", "Review the current diff"),
        ],
        "codex" => &[
            ("diff", "Show the working tree diff"),
            ("clear", "Clear conversation history"),
        ],
        "gemini" => &[("clear", "Clear conversation history")],
        _ => &[],
    }
}

/// `listSlashCommands {agent}` → built-ins, then user-defined commands read
/// from `home/.{agent}/commands/*.md`, then (Claude only) plugin commands
/// enumerated from the plugin registry file.
///
/// # Errors
///
/// This handler never fails outright: unreadable user/plugin directories
/// are treated as "no commands found" rather than surfaced as errors, since
/// a missing commands directory is the common case, not a fault.
pub fn list_slash_commands(
    args: ListSlashCommandsArgs,
    home: &Path,
) -> Result<ListSlashCommandsResult, HandlerError> {
    let mut commands: Vec<SlashCommand> = builtin_commands(&args.agent)
        .iter()
        .map(|(name, description)| SlashCommand {
            name: (*name).to_string(),
            description: Some((*description).to_string()),
            source: CommandSource::Builtin,
            content: None,
            plugin_name: None,
        })
        .collect();

    commands.extend(user_commands(&args.agent, home));

    if args.agent == "claude" {
        commands.extend(plugin_commands(home));
    }

    Ok(ListSlashCommandsResult { commands })
}

fn user_commands(agent: &str, home: &Path) -> Vec<SlashCommand> {
    let dir = home.join(format!(".{agent}")).join("commands");
    read_markdown_commands(&dir, CommandSource::User, None)
}

fn plugin_commands(home: &Path) -> Vec<SlashCommand> {
    let registry_path = home.join(".claude").join("plugins").join("registry.json");
    let Ok(raw) = std::fs::read_to_string(&registry_path) else {
        return Vec::new();
    };
    let Ok(registry) = serde_json::from_str::<Vec<PluginEntry>>(&raw) else {
        return Vec::new();
    };

    registry
        .into_iter()
        .flat_map(|plugin| {
            read_markdown_commands(
                &PathBuf::from(&plugin.commands_dir),
                CommandSource::Plugin,
                Some(plugin.name),
            )
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct PluginEntry {
    name: String,
    #[serde(rename = "commandsDir")]
    commands_dir: String,
}

fn read_markdown_commands(
    dir: &Path,
    source: CommandSource,
    plugin_name: Option<String>,
) -> Vec<SlashCommand> {
    let Ok(read_dir) = std::fs::read_dir(dir) else {
        return Vec::new();
    };

    let mut out = Vec::new();
    for entry in read_dir.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("md") {
            continue;
        }
        let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let Ok(raw) = std::fs::read_to_string(&path) else {
            continue;
        };
        let (description, content) = split_frontmatter(&raw);
        out.push(SlashCommand {
            name: name.to_string(),
            description,
            source,
            content: Some(content),
            plugin_name: plugin_name.clone(),
        });
    }
    out.sort_by(|a, b| a.name.cmp(&b.name));
    out
}

/// Split a `---\n...yaml...\n---\nbody` file into `(description, body)`.
/// Files with no frontmatter are returned whole, with no description.
fn split_frontmatter(raw: &str) -> (Option<String>, String) {
    let Some(rest) = raw.strip_prefix("---\n") else {
        return (None, raw.to_string());
    };
    let Some(end) = rest.find("\n---\n") else {
        return (None, raw.to_string());
    };
    let (yaml, body) = rest.split_at(end);
    let body = body.trim_start_matches("\n---\n");
    let frontmatter: Frontmatter = serde_yaml::from_str(yaml).unwrap_or_default();
    (frontmatter.description, body.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn builtins_always_present_for_known_agent() {
        let home = TempDir::new().unwrap();
        let result = list_slash_commands(
            ListSlashCommandsArgs {
                agent: "claude".into(),
            },
            home.path(),
        )
        .unwrap();
        assert!(result
            .commands
            .iter()
            .any(|c| c.name == "compact" && c.source == CommandSource::Builtin));
    }

    #[test]
    fn user_commands_parsed_with_frontmatter() {
        let home = TempDir::new().unwrap();
        let commands_dir = home.path().join(".claude").join("commands");
        std::fs::create_dir_all(&commands_dir).unwrap();
        std::fs::write(
            commands_dir.join("deploy.md"),
            "---\ndescription: Deploy the app\n---\nRun the deploy script.",
        )
        .unwrap();

        let result = list_slash_commands(
            ListSlashCommandsArgs {
                agent: "claude".into(),
            },
            home.path(),
        )
        .unwrap();

        let deploy = result
            .commands
            .iter()
            .find(|c| c.name == "deploy")
            .expect("deploy command found");
        assert_eq!(deploy.description.as_deref(), Some("Deploy the app"));
        assert_eq!(deploy.source, CommandSource::User);
        assert!(deploy.content.as_ref().unwrap().contains("Run the deploy script"));
    }

    #[test]
    fn user_command_without_frontmatter_has_no_description() {
        let home = TempDir::new().unwrap();
        let commands_dir = home.path().join(".codex").join("commands");
        std::fs::create_dir_all(&commands_dir).unwrap();
        std::fs::write(commands_dir.join("plain.md"), "Just a body.").unwrap();

        let result = list_slash_commands(
            ListSlashCommandsArgs {
                agent: "codex".into(),
            },
            home.path(),
        )
        .unwrap();
        let plain = result.commands.iter().find(|c| c.name == "plain").unwrap();
        assert!(plain.description.is_none());
    }

    #[test]
    fn missing_commands_directory_is_not_an_error() {
        let home = TempDir::new().unwrap();
        let result = list_slash_commands(
            ListSlashCommandsArgs {
                agent: "gemini".into(),
            },
            home.path(),
        )
        .unwrap();
        assert!(result.commands.iter().all(|c| c.source != CommandSource::User));
    }

    #[test]
    fn unknown_agent_has_no_builtins() {
        let home = TempDir::new().unwrap();
        let result = list_slash_commands(
            ListSlashCommandsArgs {
                agent: "some-other-agent".into(),
            },
            home.path(),
        )
        .unwrap();
        assert!(result.commands.is_empty());
    }
}

//! `listSkills`: enumerate skills available under the working root.
//!
//! No particular listing format is mandated, so this reuses the same
//! `SKILL.md` + YAML-frontmatter convention already used for slash commands,
//! since no other convention appears anywhere in the corpus.

use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use beacon_sandbox::WorkingRoot;

use crate::error::HandlerError;

/// Result of `listSkills`.
#[derive(Debug, Serialize)]
pub struct ListSkillsResult {
    /// Skills discovered under `<working_root>/skills/`.
    pub skills: Vec<Skill>,
}

/// One discovered skill.
#[derive(Debug, Clone, Serialize)]
pub struct Skill {
    /// Skill name, from frontmatter if present, else the containing
    /// directory name.
    pub name: String,
    /// One-line description, if present in frontmatter.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Path to the skill's `SKILL.md`, relative to the working root.
    pub path: String,
}

#[derive(Debug, Deserialize, Default)]
struct SkillFrontmatter {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

/// `listSkills {}` → skills found by walking `<working_root>/skills/` for
/// `SKILL.md` files. A missing `skills/` directory yields an empty list
/// rather than an error.
///
/// # Errors
///
/// Returns [`HandlerError::Sandbox`] only if `working_root` itself somehow
/// fails validation (it never does in practice, since it's the root).
pub fn list_skills(root: &WorkingRoot) -> Result<ListSkillsResult, HandlerError> {
    let skills_dir = root.path().join("skills");
    if !skills_dir.is_dir() {
        return Ok(ListSkillsResult { skills: Vec::new() });
    }

    let mut skills = Vec::new();
    for entry in WalkDir::new(&skills_dir)
        .follow_links(false)
        .into_iter()
        .filter_map(Result::ok)
    {
        if entry.file_name() != "SKILL.md" {
            continue;
        }
        let Ok(raw) = std::fs::read_to_string(entry.path()) else {
            continue;
        };
        let frontmatter = parse_frontmatter(&raw);
        let dir_name = entry
            .path()
            .parent()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let relative = entry
            .path()
            .strip_prefix(root.path())
            .unwrap_or(entry.path())
            .to_string_lossy()
            .into_owned();

        skills.push(Skill {
            name: frontmatter.name.unwrap_or(dir_name),
            description: frontmatter.description,
            path: relative,
        });
    }

    skills.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(ListSkillsResult { skills })
}

fn parse_frontmatter(raw: &str) -> SkillFrontmatter {
    let Some(rest) = raw.strip_prefix("---\n") else {
        return SkillFrontmatter::default();
    };
    let Some(end) = rest.find("\n---\n") else {
        return SkillFrontmatter::default();
    };
    let (yaml, _body) = rest.split_at(end);
    serde_yaml::from_str(yaml).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn root(dir: &TempDir) -> WorkingRoot {
        WorkingRoot::new(dir.path().canonicalize().unwrap()).unwrap()
    }

    #[test]
    fn missing_skills_directory_yields_empty_list() {
        let dir = TempDir::new().unwrap();
        let result = list_skills(&root(&dir)).unwrap();
        assert!(result.skills.is_empty());
    }

    #[test]
    fn discovers_skill_with_frontmatter() {
        let dir = TempDir::new().unwrap();
        let skill_dir = dir.path().join("skills").join("pdf-tools");
        std::fs::create_dir_all(&skill_dir).unwrap();
        std::fs::write(
            skill_dir.join("SKILL.md"),
            "---\nname: pdf-tools\ndescription: Work with PDFs\n---\nBody.",
        )
        .unwrap();

        let result = list_skills(&root(&dir)).unwrap();
        assert_eq!(result.skills.len(), 1);
        assert_eq!(result.skills[0].name, "pdf-tools");
        assert_eq!(result.skills[0].description.as_deref(), Some("Work with PDFs"));
    }

    #[test]
    fn falls_back_to_directory_name_without_frontmatter() {
        let dir = TempDir::new().unwrap();
        let skill_dir = dir.path().join("skills").join("raw-skill");
        std::fs::create_dir_all(&skill_dir).unwrap();
        std::fs::write(skill_dir.join("SKILL.md"), "just a body").unwrap();

        let result = list_skills(&root(&dir)).unwrap();
        assert_eq!(result.skills[0].name, "raw-skill");
        assert!(result.skills[0].description.is_none());
    }
}

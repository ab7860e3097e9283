//! Scaffolding for `courier init`.
//!
//! Writes the config and phrase matrix templates into `~/.courier/` without
//! touching files that already exist.

use anyhow::Result;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default)]
pub struct InitReport {
    pub root: PathBuf,
    pub created: Vec<PathBuf>,
    pub skipped: Vec<PathBuf>,
}

#[derive(Debug, Clone, Copy)]
struct TemplateFile {
    relative_path: &'static str,
    contents: &'static str,
}

const TEMPLATE_FILES: &[TemplateFile] = &[
    TemplateFile {
        relative_path: "config.toml",
        contents: include_str!("../../config-templates/config.toml"),
    },
    TemplateFile {
        relative_path: "phrases.json",
        contents: include_str!("../../config-templates/phrases.json"),
    },
];

pub async fn initialize_default() -> Result<InitReport> {
    let root = crate::config::default_root_dir()?;
    initialize_at_root(&root).await
}

pub async fn initialize_at_root(root: &Path) -> Result<InitReport> {
    tokio::fs::create_dir_all(root)
        .await
        .map_err(|e| anyhow::anyhow!("create config root {}: {e}", root.display()))?;

    let mut report = InitReport {
        root: root.to_path_buf(),
        ..InitReport::default()
    };

    for template in TEMPLATE_FILES {
        let target = root.join(template.relative_path);
        match tokio::fs::metadata(&target).await {
            Ok(_) => report.skipped.push(target),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tokio::fs::write(&target, template.contents)
                    .await
                    .map_err(|e| anyhow::anyhow!("write template {}: {e}", target.display()))?;
                tracing::debug!(path = %target.display(), "template written");
                report.created.push(target);
            }
            Err(err) => {
                return Err(anyhow::anyhow!("inspect {}: {err}", target.display()));
            }
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::{TEMPLATE_FILES, initialize_at_root};
    use crate::config::CourierConfig;
    use courier_core::PhraseMatrix;

    #[tokio::test]
    async fn init_writes_every_template() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().join(".courier");
        let report = initialize_at_root(&root).await.expect("init succeeds");

        assert_eq!(report.created.len(), TEMPLATE_FILES.len());
        assert!(report.skipped.is_empty());
        for template in TEMPLATE_FILES {
            assert!(root.join(template.relative_path).exists());
        }
    }

    #[tokio::test]
    async fn init_never_overwrites_local_edits() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path();
        std::fs::write(root.join("phrases.json"), "{}").expect("local edit");

        let report = initialize_at_root(root).await.expect("init succeeds");
        assert_eq!(report.created.len(), 1);
        assert_eq!(report.skipped, vec![root.join("phrases.json")]);
        assert_eq!(
            std::fs::read_to_string(root.join("phrases.json")).expect("read"),
            "{}"
        );

        let again = initialize_at_root(root).await.expect("second init");
        assert!(again.created.is_empty());
    }

    #[test]
    fn shipped_templates_parse() {
        for template in TEMPLATE_FILES {
            match template.relative_path {
                "config.toml" => {
                    let cfg = CourierConfig::from_toml_str(template.contents).expect("config");
                    assert_eq!(cfg.engine.max_retries, 3);
                }
                "phrases.json" => {
                    let matrix = PhraseMatrix::from_json(template.contents).expect("matrix");
                    assert!(matrix.status_keys().any(|k| k == "saiu_entrega"));
                }
                other => panic!("untested template {other}"),
            }
        }
    }
}

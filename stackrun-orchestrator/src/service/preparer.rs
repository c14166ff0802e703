//! Run Preparer
//!
//! Turns a stored resource into everything the engine needs for one run: the
//! stack coordinate, a module workspace whose project file names the right
//! project, the provider configuration and the environment carrying it.

use std::path::{Path, PathBuf};

use serde::Serialize;
use stackrun_core::domain::credential::Provider;
use stackrun_core::domain::manifest::{Manifest, ManifestError};
use stackrun_core::domain::resource::CloudResource;
use tempfile::{NamedTempFile, TempDir};
use walkdir::WalkDir;

use crate::config::Config;
use crate::repository::Stores;
use crate::service::credential::{self, ProviderConfig};
use crate::service::error::{Result, ServiceError};

pub const LABEL_STACK_FQDN: &str = "pulumi.project-planton.org/stack.fqdn";
pub const LABEL_ORGANIZATION: &str = "pulumi.project-planton.org/organization";
pub const LABEL_PROJECT: &str = "pulumi.project-planton.org/project";
pub const LABEL_STACK_NAME: &str = "pulumi.project-planton.org/stack.name";

/// Engine project file inside a module directory
pub const PROJECT_FILE: &str = "Pulumi.yaml";

pub const ENV_STACK_INPUT: &str = "STACK_INPUT_YAML";
pub const ENV_MANIFEST: &str = "PROJECT_PLANTON_MANIFEST";
pub const ENV_MANIFEST_PATH: &str = "PROJECT_PLANTON_MANIFEST_PATH";

// =============================================================================
// Stack Coordinate
// =============================================================================

/// Organization, project and stack name scoping a run's engine state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackCoordinate {
    pub organization: String,
    pub project: String,
    pub stack: String,
}

impl StackCoordinate {
    /// Read the coordinate from manifest labels
    ///
    /// The fully-qualified label wins; otherwise the three separate labels
    /// must all be present.
    pub fn from_manifest(manifest: &Manifest) -> Result<Self> {
        if manifest.metadata.labels.is_empty() {
            return Err(ServiceError::InvalidArgument(format!(
                "no labels found in manifest; set '{}' or the '{}', '{}' and '{}' labels",
                LABEL_STACK_FQDN, LABEL_ORGANIZATION, LABEL_PROJECT, LABEL_STACK_NAME
            )));
        }

        if let Some(fqdn) = manifest.label(LABEL_STACK_FQDN) {
            return Self::parse_fqdn(fqdn);
        }

        let organization = manifest.label(LABEL_ORGANIZATION);
        let project = manifest.label(LABEL_PROJECT);
        let stack = manifest.label(LABEL_STACK_NAME);

        match (organization, project, stack) {
            (Some(organization), Some(project), Some(stack)) => Self::new(organization, project, stack),
            _ => {
                let missing: Vec<&str> = [
                    (LABEL_ORGANIZATION, organization),
                    (LABEL_PROJECT, project),
                    (LABEL_STACK_NAME, stack),
                ]
                .into_iter()
                .filter(|(_, value)| value.is_none())
                .map(|(key, _)| key)
                .collect();

                Err(ServiceError::InvalidArgument(format!(
                    "missing required Pulumi backend labels: '{}' is not set and {} missing",
                    LABEL_STACK_FQDN,
                    missing.join(", ")
                )))
            }
        }
    }

    /// Parse `<organization>/<project>/<stack>`
    pub fn parse_fqdn(fqdn: &str) -> Result<Self> {
        let parts: Vec<&str> = fqdn.split('/').collect();
        if parts.len() != 3 {
            return Err(ServiceError::InvalidArgument(format!(
                "invalid stack.fqdn format: expected <organization>/<project>/<stack>, got '{}'",
                fqdn
            )));
        }
        Self::new(parts[0], parts[1], parts[2])
    }

    fn new(organization: &str, project: &str, stack: &str) -> Result<Self> {
        let (organization, project, stack) = (organization.trim(), project.trim(), stack.trim());
        if organization.is_empty() || project.is_empty() || stack.is_empty() {
            return Err(ServiceError::InvalidArgument(
                "stack FQDN components cannot be empty".to_string(),
            ));
        }

        Ok(Self {
            organization: organization.to_string(),
            project: project.to_string(),
            stack: stack.to_string(),
        })
    }

    pub fn fqdn(&self) -> String {
        format!("{}/{}/{}", self.organization, self.project, self.stack)
    }
}

impl std::fmt::Display for StackCoordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.organization, self.project, self.stack)
    }
}

// =============================================================================
// Module Workspace
// =============================================================================

/// Directory the engine runs in
///
/// A private copy of the module, so concurrent runs never share a project
/// file. Removed when the workspace is dropped.
#[derive(Debug)]
pub struct ModuleWorkspace {
    scratch: TempDir,
}

impl ModuleWorkspace {
    pub fn path(&self) -> &Path {
        self.scratch.path()
    }

    /// Copy the module for a resource kind into a fresh workspace
    ///
    /// The configured module directory wins when it holds a project file;
    /// otherwise the kind's staged module is used.
    pub async fn locate(config: &Config, provider: Provider, kind: &str) -> Result<Self> {
        let source = if config.module_dir.join(PROJECT_FILE).is_file() {
            config.module_dir.clone()
        } else {
            staged_module_path(&config.modules_root, provider, kind)
        };

        if !source.join(PROJECT_FILE).is_file() {
            return Err(ServiceError::Internal(format!(
                "no module found for kind '{}': expected {} in {}",
                kind,
                PROJECT_FILE,
                source.display()
            )));
        }

        let scratch = tempfile::Builder::new()
            .prefix("stackrun-module-")
            .tempdir()
            .map_err(|e| ServiceError::Internal(format!("failed to create module workspace: {}", e)))?;

        let destination = scratch.path().to_path_buf();
        let from = source.clone();
        tokio::task::spawn_blocking(move || copy_tree(&from, &destination))
            .await
            .map_err(|e| ServiceError::Internal(format!("module copy task failed: {}", e)))?
            .map_err(|e| {
                ServiceError::Internal(format!(
                    "failed to copy module from {}: {}",
                    source.display(),
                    e
                ))
            })?;

        tracing::debug!(
            "Materialized module {} into {}",
            source.display(),
            scratch.path().display()
        );

        Ok(Self { scratch })
    }
}

/// `<root>/<provider>/<kind lowercase>/v1/iac/pulumi`
pub fn staged_module_path(root: &Path, provider: Provider, kind: &str) -> PathBuf {
    root.join(provider.module_dir_name())
        .join(kind.to_lowercase())
        .join("v1")
        .join("iac")
        .join("pulumi")
}

fn copy_tree(source: &Path, destination: &Path) -> std::io::Result<()> {
    for entry in WalkDir::new(source) {
        let entry = entry?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(std::io::Error::other)?;
        let target = destination.join(relative);

        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Point the module's project file at `project`
///
/// Only the top-level `name:` entry changes; everything else in the file is
/// kept byte for byte. A file without one gets it prepended.
pub async fn rewrite_project_name(module_dir: &Path, project: &str) -> Result<()> {
    let path = module_dir.join(PROJECT_FILE);
    let current = tokio::fs::read_to_string(&path)
        .await
        .map_err(|e| ServiceError::Internal(format!("failed to read {}: {}", path.display(), e)))?;

    let rewritten = replace_project_name(&current, project);
    if rewritten != current {
        tokio::fs::write(&path, rewritten).await.map_err(|e| {
            ServiceError::Internal(format!("failed to write {}: {}", path.display(), e))
        })?;
        tracing::debug!("Set project name '{}' in {}", project, path.display());
    }

    Ok(())
}

fn replace_project_name(contents: &str, project: &str) -> String {
    let mut replaced = false;
    let mut lines: Vec<String> = contents
        .lines()
        .map(|line| {
            if !replaced && line.starts_with("name:") {
                replaced = true;
                format!("name: {}", project)
            } else {
                line.to_string()
            }
        })
        .collect();

    if !replaced {
        lines.insert(0, format!("name: {}", project));
    }

    let mut out = lines.join("\n");
    if contents.ends_with('\n') || !replaced {
        out.push('\n');
    }
    out
}

// =============================================================================
// Engine Input
// =============================================================================

#[derive(Serialize)]
struct StackInput<'a> {
    target: &'a serde_yaml::Value,
    provider_config: &'a ProviderConfig,
}

/// Configuration payload read by modules from `STACK_INPUT_YAML`
pub fn build_stack_input(manifest_yaml: &str, provider_config: &ProviderConfig) -> Result<String> {
    let target: serde_yaml::Value = serde_yaml::from_str(manifest_yaml)
        .map_err(|e| ServiceError::InvalidArgument(format!("manifest is not valid YAML: {}", e)))?;

    serde_yaml::to_string(&StackInput {
        target: &target,
        provider_config,
    })
    .map_err(|e| ServiceError::Internal(format!("failed to build stack input: {}", e)))
}

/// A run ready to hand to the engine
///
/// Owns the module workspace and the manifest file; both are cleaned up when
/// this is dropped, whichever way the run ends.
#[derive(Debug)]
pub struct PreparedRun {
    pub coordinate: StackCoordinate,
    pub kind: String,
    pub workspace: ModuleWorkspace,
    env: Vec<(String, String)>,
    _manifest_file: NamedTempFile,
}

impl PreparedRun {
    pub fn stack_fqdn(&self) -> String {
        self.coordinate.fqdn()
    }

    /// An engine command running inside the workspace with the run's
    /// environment
    pub fn command(&self, binary: &str, args: &[&str]) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(binary);
        cmd.args(args)
            .current_dir(self.workspace.path())
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(std::process::Stdio::null())
            .kill_on_drop(true);
        cmd
    }
}

/// Prepare a stored resource for deployment
///
/// Steps run in order and the first failure aborts: manifest parsing, stack
/// coordinate, credential resolution, module workspace, project name, engine
/// input.
pub async fn prepare(config: &Config, stores: &Stores, resource: &CloudResource) -> Result<PreparedRun> {
    let manifest = Manifest::from_yaml(&resource.manifest).map_err(|e| match e {
        ManifestError::Empty => ServiceError::InvalidArgument("manifest cannot be empty".to_string()),
        other => ServiceError::InvalidArgument(other.to_string()),
    })?;

    let coordinate = StackCoordinate::from_manifest(&manifest)?;

    let provider_config = credential::resolve(stores, &manifest.kind).await?;

    let workspace = ModuleWorkspace::locate(config, provider_config.provider(), &manifest.kind).await?;

    rewrite_project_name(workspace.path(), &coordinate.project).await?;

    let stack_input = build_stack_input(&resource.manifest, &provider_config)?;

    let manifest_file = write_manifest_file(&resource.manifest)?;

    let env = vec![
        (ENV_STACK_INPUT.to_string(), stack_input),
        (ENV_MANIFEST.to_string(), resource.manifest.clone()),
        (
            ENV_MANIFEST_PATH.to_string(),
            manifest_file.path().display().to_string(),
        ),
    ];

    Ok(PreparedRun {
        coordinate,
        kind: manifest.kind,
        workspace,
        env,
        _manifest_file: manifest_file,
    })
}

fn write_manifest_file(manifest_yaml: &str) -> Result<NamedTempFile> {
    use std::io::Write;

    let mut file = tempfile::Builder::new()
        .prefix("stackrun-manifest-")
        .suffix(".yaml")
        .tempfile()
        .map_err(|e| ServiceError::Internal(format!("failed to create manifest file: {}", e)))?;

    file.write_all(manifest_yaml.as_bytes())
        .and_then(|_| file.flush())
        .map_err(|e| ServiceError::Internal(format!("failed to write manifest file: {}", e)))?;

    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use stackrun_core::domain::credential::GcpCredential;

    fn manifest_with_labels(labels: &[(&str, &str)]) -> Manifest {
        let mut yaml = String::from("kind: AwsVpc\nmetadata:\n  name: main\n");
        if !labels.is_empty() {
            yaml.push_str("  labels:\n");
            for (key, value) in labels {
                yaml.push_str(&format!("    {}: \"{}\"\n", key, value));
            }
        }
        Manifest::from_yaml(&yaml).unwrap()
    }

    #[test]
    fn test_coordinate_from_fqdn_label() {
        let manifest = manifest_with_labels(&[
            (LABEL_STACK_FQDN, "acme/network/prod"),
            (LABEL_PROJECT, "ignored"),
        ]);
        let coordinate = StackCoordinate::from_manifest(&manifest).unwrap();
        assert_eq!(coordinate.organization, "acme");
        assert_eq!(coordinate.project, "network");
        assert_eq!(coordinate.stack, "prod");
        assert_eq!(coordinate.fqdn(), "acme/network/prod");
    }

    #[test]
    fn test_coordinate_from_separate_labels() {
        let manifest = manifest_with_labels(&[
            (LABEL_ORGANIZATION, "acme"),
            (LABEL_PROJECT, "network"),
            (LABEL_STACK_NAME, "dev"),
        ]);
        let coordinate = StackCoordinate::from_manifest(&manifest).unwrap();
        assert_eq!(coordinate.to_string(), "acme/network/dev");
    }

    #[test]
    fn test_coordinate_errors() {
        let err = StackCoordinate::from_manifest(&manifest_with_labels(&[])).unwrap_err();
        assert!(matches!(err, ServiceError::InvalidArgument(ref m) if m.contains("no labels")));

        let err = StackCoordinate::from_manifest(&manifest_with_labels(&[(
            LABEL_ORGANIZATION,
            "acme",
        )]))
        .unwrap_err();
        assert!(
            matches!(err, ServiceError::InvalidArgument(ref m) if m.contains(LABEL_PROJECT) && m.contains(LABEL_STACK_NAME))
        );

        let err = StackCoordinate::parse_fqdn("acme/network").unwrap_err();
        assert!(matches!(err, ServiceError::InvalidArgument(ref m) if m.contains("invalid stack.fqdn")));

        let err = StackCoordinate::parse_fqdn("acme//prod").unwrap_err();
        assert!(matches!(err, ServiceError::InvalidArgument(ref m) if m.contains("cannot be empty")));
    }

    #[test]
    fn test_replace_project_name() {
        let original = "name: old\nruntime: go\ndescription: name: not this\n";
        assert_eq!(
            replace_project_name(original, "network"),
            "name: network\nruntime: go\ndescription: name: not this\n"
        );

        assert_eq!(
            replace_project_name("runtime: go\n", "network"),
            "name: network\nruntime: go\n"
        );

        assert_eq!(replace_project_name("name: x", "y"), "name: y");
    }

    #[test]
    fn test_staged_module_path() {
        let path = staged_module_path(Path::new("/m"), Provider::DigitalOcean, "DigitalOceanVpc");
        assert_eq!(path, PathBuf::from("/m/digitalocean/digitaloceanvpc/v1/iac/pulumi"));
    }

    #[test]
    fn test_build_stack_input() {
        let config = ProviderConfig::Gcp(GcpCredential {
            service_account_key_base64: "e30=".to_string(),
        });
        let yaml = build_stack_input("kind: GcpVpc\nspec:\n  a: 1\n", &config).unwrap();
        let value: serde_yaml::Value = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(value["target"]["kind"], serde_yaml::Value::from("GcpVpc"));
        assert_eq!(
            value["provider_config"]["service_account_key_base64"],
            serde_yaml::Value::from("e30=")
        );
    }

    #[tokio::test]
    async fn test_locate_materializes_staged_module() {
        let root = tempfile::tempdir().unwrap();
        let staged = staged_module_path(root.path(), Provider::Aws, "AwsVpc");
        std::fs::create_dir_all(staged.join("module")).unwrap();
        std::fs::write(staged.join(PROJECT_FILE), "name: template\nruntime: go\n").unwrap();
        std::fs::write(staged.join("module").join("main.go"), "package module\n").unwrap();

        let config = Config {
            module_dir: root.path().join("does-not-exist"),
            modules_root: root.path().to_path_buf(),
            ..Config::default()
        };

        let workspace = ModuleWorkspace::locate(&config, Provider::Aws, "AwsVpc")
            .await
            .unwrap();
        assert_ne!(workspace.path(), staged.as_path());
        assert!(workspace.path().join("module").join("main.go").is_file());

        rewrite_project_name(workspace.path(), "network").await.unwrap();
        let rewritten = std::fs::read_to_string(workspace.path().join(PROJECT_FILE)).unwrap();
        assert!(rewritten.starts_with("name: network\n"));

        // The staged template is untouched
        let template = std::fs::read_to_string(staged.join(PROJECT_FILE)).unwrap();
        assert!(template.starts_with("name: template\n"));

        let path = workspace.path().to_path_buf();
        drop(workspace);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_locate_copies_module_dir_per_run() {
        let root = tempfile::tempdir().unwrap();
        let module_dir = root.path().join("module");
        std::fs::create_dir_all(&module_dir).unwrap();
        std::fs::write(module_dir.join(PROJECT_FILE), "name: template\nruntime: go\n").unwrap();

        let config = Config {
            module_dir: module_dir.clone(),
            modules_root: root.path().join("staging"),
            ..Config::default()
        };

        let first = ModuleWorkspace::locate(&config, Provider::Aws, "AwsVpc").await.unwrap();
        let second = ModuleWorkspace::locate(&config, Provider::Aws, "AwsVpc").await.unwrap();
        assert_ne!(first.path(), module_dir.as_path());
        assert_ne!(first.path(), second.path());

        rewrite_project_name(first.path(), "network").await.unwrap();
        rewrite_project_name(second.path(), "billing").await.unwrap();

        let read = |dir: &Path| std::fs::read_to_string(dir.join(PROJECT_FILE)).unwrap();
        assert!(read(first.path()).starts_with("name: network\n"));
        assert!(read(second.path()).starts_with("name: billing\n"));
        assert!(read(&module_dir).starts_with("name: template\n"));
    }

    #[tokio::test]
    async fn test_locate_missing_module() {
        let root = tempfile::tempdir().unwrap();
        let config = Config {
            module_dir: root.path().join("nope"),
            modules_root: root.path().to_path_buf(),
            ..Config::default()
        };

        let result = ModuleWorkspace::locate(&config, Provider::Gcp, "GcpVpc").await;
        assert!(matches!(result, Err(ServiceError::Internal(_))));
    }
}

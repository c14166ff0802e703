//! Shared fixtures for service tests
//!
//! Runs execute against a throwaway shell script standing in for the engine
//! and in-memory stores.

use std::path::Path;
use std::time::Duration;

use stackrun_core::domain::credential::{AwsCredential, CredentialData};
use stackrun_core::domain::resource::CloudResource;
use stackrun_core::domain::run::Run;
use stackrun_core::dto::credential::CreateCredential;
use uuid::Uuid;

use crate::config::Config;
use crate::repository::Stores;
use crate::service::preparer::PROJECT_FILE;
use crate::service::{credential, run};

pub const MANIFEST: &str = "apiVersion: aws.project-planton.org/v1\n\
                            kind: AwsVpc\n\
                            metadata:\n  \
                              name: main\n  \
                              labels:\n    \
                                pulumi.project-planton.org/stack.fqdn: acme/network/prod\n\
                            spec:\n  \
                              cidrBlock: 10.0.0.0/16\n";

pub struct Harness {
    pub stores: Stores,
    pub config: Config,
    _dir: tempfile::TempDir,
}

/// Write an executable engine stand-in that runs `up_body` for `up` and
/// succeeds for every other subcommand
#[cfg(unix)]
fn fake_engine(dir: &Path, up_body: &str) -> String {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("engine.sh");
    let script = format!(
        "#!/bin/sh\ncase \"$1\" in\n  up)\n{}\n    ;;\n  *)\n    exit 0\n    ;;\nesac\n",
        up_body
    );
    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path.display().to_string()
}

/// In-memory stores holding an AWS credential, and a config pointing at a
/// module directory and a fake engine
#[cfg(unix)]
pub async fn harness(up_body: &str) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let module_dir = dir.path().join("module");
    std::fs::create_dir_all(&module_dir).unwrap();
    std::fs::write(module_dir.join(PROJECT_FILE), "name: template\nruntime: go\n").unwrap();

    let config = Config {
        engine_binary: fake_engine(dir.path(), up_body),
        module_dir,
        modules_root: dir.path().join("staging"),
        deploy_timeout: Duration::from_secs(10),
        refresh_timeout: Duration::from_secs(10),
        stream_poll_interval: Duration::from_millis(10),
        output_drain_grace: Duration::from_millis(200),
        ..Config::default()
    };

    let stores = Stores::in_memory();
    credential::create_credential(
        &stores,
        CreateCredential {
            name: "default".to_string(),
            data: CredentialData::Aws(AwsCredential {
                account_id: "123456789012".to_string(),
                access_key_id: "AKIA".to_string(),
                secret_access_key: "secret".to_string(),
                region: None,
                session_token: None,
            }),
        },
    )
    .await
    .unwrap();

    Harness {
        stores,
        config,
        _dir: dir,
    }
}

pub async fn store_resource(stores: &Stores, manifest: &str) -> CloudResource {
    let now = chrono::Utc::now();
    let resource = CloudResource {
        id: Uuid::new_v4(),
        name: "main".to_string(),
        kind: "AwsVpc".to_string(),
        manifest: manifest.to_string(),
        created_at: now,
        updated_at: now,
    };
    stores.resources.create(&resource).await.unwrap();
    resource
}

pub async fn wait_terminal(stores: &Stores, id: Uuid) -> Run {
    for _ in 0..500 {
        let run = run::get_run(stores, id).await.unwrap();
        if run.status.is_terminal() {
            return run;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("run {} did not finish", id);
}

//! 🏗️ Bootstrap — lay the foundations before the honey starts flowing.
//!
//! One index per honeypot app, all created from the same mapping file. With
//! `override_existing`, each index is deleted first, data and all, so maybe
//! don't point this at production on a Friday. 🦆

use std::path::Path;

use anyhow::{Context, Result, bail};
use tracing::{info, warn};

use crate::app_config::{BootstrapConfig, ProvisionErrorPolicy};
use crate::backends::IndexAdmin;
use crate::pipeline::route::IndexRouter;

/// 📋 What the bootstrap step got up to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvisionReport {
    pub deleted: Vec<String>,
    pub created: Vec<String>,
    /// `(index, error)` for every step that failed and was skipped.
    pub skipped: Vec<(String, String)>,
}

/// 📄 Read the mapping file and make sure it is a JSON object before anyone sends it anywhere.
pub async fn load_mapping(path: &Path) -> Result<String> {
    let mapping = tokio::fs::read_to_string(path).await.with_context(|| {
        format!(
            "💀 Could not read the index mapping file '{}'. Use --mapping-file or bootstrap.mapping_file to point elsewhere.",
            path.display()
        )
    })?;
    let parsed: serde_json::Value = serde_json::from_str(&mapping)
        .with_context(|| format!("💀 Mapping file '{}' is not valid JSON", path.display()))?;
    if !parsed.is_object() {
        bail!("💀 Mapping file '{}' must contain a JSON object", path.display());
    }
    Ok(mapping)
}

/// 🚀 Delete (optionally) and create `<prefix><app>` for every configured app.
pub async fn provision_indexes<A: IndexAdmin + ?Sized>(
    admin: &A,
    config: &BootstrapConfig,
    router: &IndexRouter,
) -> Result<ProvisionReport> {
    let mapping = load_mapping(&config.mapping_file).await?;
    let mut report = ProvisionReport::default();

    for app in &config.apps {
        let index = router.route(app);

        if config.override_existing {
            match admin.delete_index(&index).await {
                Ok(()) => {
                    info!(index = %index, "🗑️ Deleted index");
                    report.deleted.push(index.clone());
                }
                Err(err) => handle_failure(config.on_error, &index, err, &mut report)?,
            }
        }

        match admin.create_index(&index, &mapping).await {
            Ok(()) => {
                info!(index = %index, "✅ Created index");
                report.created.push(index);
            }
            Err(err) => handle_failure(config.on_error, &index, err, &mut report)?,
        }
    }

    info!(
        created = report.created.len(),
        deleted = report.deleted.len(),
        skipped = report.skipped.len(),
        "🏗️ Bootstrap finished"
    );
    Ok(report)
}

fn handle_failure(
    policy: ProvisionErrorPolicy,
    index: &str,
    err: anyhow::Error,
    report: &mut ProvisionReport,
) -> Result<()> {
    match policy {
        ProvisionErrorPolicy::Abort => {
            Err(err.context(format!("💀 Bootstrap aborted at index '{index}'")))
        }
        ProvisionErrorPolicy::Skip => {
            warn!(index = %index, "⚠️ Skipping: {err:#}");
            report.skipped.push((index.to_string(), format!("{err:#}")));
            Ok(())
        }
    }
}

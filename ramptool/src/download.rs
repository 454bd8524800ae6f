use crate::error::{self, Result};
use clap::Parser;
use rampart::{
    ExpirationEnforcement, Mirror, Repository, RepositoryLoader, TargetStatus,
};
use snafu::{ensure, ResultExt};
use std::path::{Path, PathBuf};
use url::Url;

#[derive(Debug, Parser)]
pub(crate) struct DownloadArgs {
    /// Path to root.json file for the repository
    #[arg(short = 'r', long = "root")]
    root: PathBuf,

    /// Repository metadata base URL; may be repeated to list fallback mirrors
    #[arg(short = 'm', long = "metadata-url", required = true)]
    metadata_base_urls: Vec<Url>,

    /// Repository targets base URL; repeated in the same order as --metadata-url
    #[arg(short = 't', long = "targets-url", required = true)]
    targets_base_urls: Vec<Url>,

    /// Directory to keep the fetch state in; defaults to a temporary directory
    #[arg(long = "datastore")]
    datastore: Option<PathBuf>,

    /// Number of targets to download concurrently
    #[arg(short = 'j', long = "jobs", default_value = "4")]
    jobs: usize,

    /// Output directory for targets
    outdir: PathBuf,

    /// Allow repo download for expired metadata (unsafe)
    #[arg(long)]
    allow_expired_repo: bool,
}

fn expired_repo_warning<P: AsRef<Path>>(path: P) {
    #[rustfmt::skip]
    eprintln!("\
=================================================================
Downloading repo to {}
WARNING: `--allow-expired-repo` was passed; this is unsafe and will not establish trust, use only for testing!
=================================================================",
              path.as_ref().display());
}

impl DownloadArgs {
    pub(crate) fn run(&self) -> Result<()> {
        ensure!(
            self.metadata_base_urls.len() == self.targets_base_urls.len(),
            error::MirrorArgMismatchSnafu {
                metadata: self.metadata_base_urls.len(),
                targets: self.targets_base_urls.len(),
            }
        );
        let mirrors: Vec<Mirror> = self
            .metadata_base_urls
            .iter()
            .zip(&self.targets_base_urls)
            .map(|(metadata, targets)| Mirror::new(metadata.clone(), targets.clone()))
            .collect();

        let expiration_enforcement = if self.allow_expired_repo {
            expired_repo_warning(&self.outdir);
            ExpirationEnforcement::Unsafe
        } else {
            ExpirationEnforcement::Safe
        };

        let root = std::fs::read(&self.root).context(error::FileOpenSnafu { path: &self.root })?;
        let mut loader = RepositoryLoader::new(root, mirrors)
            .expiration_enforcement(expiration_enforcement);
        if let Some(datastore) = &self.datastore {
            loader = loader.datastore(datastore);
        }

        let runtime = tokio::runtime::Runtime::new().context(error::RuntimeSnafu)?;
        runtime.block_on(async {
            let repository = loader.load().await.context(error::RepoLoadSnafu)?;
            handle_download(&repository, &self.outdir, self.jobs).await
        })
    }
}

async fn handle_download(repository: &Repository, outdir: &Path, jobs: usize) -> Result<()> {
    println!("Downloading targets to {outdir:?}");
    let outcomes = repository
        .sync_targets(outdir, jobs)
        .await
        .context(error::TargetSyncSnafu)?;

    let mut failed = 0;
    for outcome in &outcomes {
        match &outcome.status {
            TargetStatus::Updated => println!("\t-> {} (updated)", outcome.name.raw()),
            TargetStatus::UpToDate => println!("\t-> {} (up to date)", outcome.name.raw()),
            TargetStatus::Failed(err) => {
                failed += 1;
                eprintln!("\t-> {} FAILED: {err}", outcome.name.raw());
            }
        }
    }
    if failed > 0 {
        eprintln!("{failed} of {} targets failed to download", outcomes.len());
    }
    Ok(())
}

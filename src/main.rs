//! letter-release CLI
//!
//! Entry point for the `letter-release` command-line tool.

use chrono::Utc;
use clap::{ArgAction, Parser, Subcommand};
use letter_release::config::{repo_root, SiteLayout};
use letter_release::finalize::{
    append_outputs, determine_branch, evaluate, render_outputs, HttpFetcher, RemoteSite,
    TriggerEvent,
};
use letter_release::pipeline::{
    run_manifest_stage, run_metadata_stage, run_release, run_sync_stage, ReleaseOptions,
};
use letter_release::signature::GpgVerifier;
use std::path::PathBuf;
use std::process;

#[derive(Parser)]
#[command(name = "letter-release")]
#[command(about = "Release manifest and finality verification for the signed letter", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Regenerate the release manifest
    Manifest {
        /// Only check whether the published manifest is current; exit
        /// nonzero if an update is required
        #[arg(long)]
        check: bool,

        /// Override the manifest destination
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Copy the newest signed document into the publish directory
    Sync {
        /// Only check whether syncing is needed; exit nonzero if so
        #[arg(long)]
        check: bool,

        /// Override the directory containing release documents
        #[arg(long)]
        letter_dir: Option<PathBuf>,

        /// Override the publish directory
        #[arg(long)]
        docs_dir: Option<PathBuf>,
    },

    /// Update version markers in rendered assets
    Metadata {
        /// Only check for pending updates; exit nonzero if changes are needed
        #[arg(long)]
        check: bool,

        /// Path to the manifest (default: the configured location)
        #[arg(long)]
        manifest: Option<PathBuf>,

        /// Files to rewrite (default: the rendered page)
        targets: Vec<PathBuf>,
    },

    /// Run all release stages in order
    Release {
        /// Run each stage in validation mode without writing changes
        #[arg(long)]
        check: bool,

        /// Alias for --check to match common tooling expectations
        #[arg(long)]
        dry_run: bool,

        /// Skip syncing the publish directory
        #[arg(long)]
        skip_sync: bool,

        /// Skip regenerating the manifest
        #[arg(long)]
        skip_manifest: bool,

        /// Skip updating version metadata
        #[arg(long)]
        skip_metadata: bool,
    },

    /// Decide whether recurring finality verification should run
    FinalizeCheck {
        /// CI event name that triggered the workflow
        #[arg(long, default_value = "")]
        event_name: String,

        /// owner/repo slug of the published repository
        #[arg(long)]
        repository: String,

        /// Git ref name
        #[arg(long, default_value = "")]
        ref_name: String,

        /// Full git ref
        #[arg(long = "ref", default_value = "")]
        git_ref: String,

        /// Default branch name
        #[arg(long, default_value = "")]
        default_branch: String,

        /// Override the finalization guard
        #[arg(long, action = ArgAction::Set, default_value_t = false)]
        force: bool,

        /// File to append the key=value outputs to
        #[arg(long)]
        github_output: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();

    let cwd = match std::env::current_dir() {
        Ok(dir) => dir,
        Err(err) => {
            eprintln!("Error resolving working directory: {}", err);
            process::exit(1);
        }
    };
    let base = repo_root(&cwd);
    let layout = match SiteLayout::load(&base) {
        Ok(layout) => layout,
        Err(err) => {
            eprintln!("Configuration error: {}", err);
            process::exit(1);
        }
    };

    let code = match cli.command {
        Commands::Manifest { check, output } => {
            let verifier = GpgVerifier::new();
            match run_manifest_stage(&base, &layout, &verifier, Utc::now(), check, output.as_deref())
            {
                Ok(changed) => {
                    if check && changed {
                        1
                    } else {
                        0
                    }
                }
                Err(err) => {
                    eprintln!("Error: {}", err);
                    1
                }
            }
        }

        Commands::Sync {
            check,
            letter_dir,
            docs_dir,
        } => match run_sync_stage(
            &base,
            &layout,
            check,
            letter_dir.as_deref(),
            docs_dir.as_deref(),
        ) {
            Ok(changed) => {
                if check && changed {
                    1
                } else {
                    0
                }
            }
            Err(err) => {
                eprintln!("Error: {}", err);
                1
            }
        },

        Commands::Metadata {
            check,
            manifest,
            targets,
        } => match run_metadata_stage(&base, &layout, check, manifest.as_deref(), &targets) {
            Ok(changed) => {
                if check && changed {
                    1
                } else {
                    0
                }
            }
            Err(err) => {
                eprintln!("Error: {}", err);
                1
            }
        },

        Commands::Release {
            check,
            dry_run,
            skip_sync,
            skip_manifest,
            skip_metadata,
        } => {
            let verifier = GpgVerifier::new();
            let options = ReleaseOptions {
                check: check || dry_run,
                skip_sync,
                skip_manifest,
                skip_metadata,
            };
            run_release(&base, &layout, &verifier, Utc::now(), &options)
        }

        Commands::FinalizeCheck {
            event_name,
            repository,
            ref_name,
            git_ref,
            default_branch,
            force,
            github_output,
        } => {
            let branch = determine_branch(&ref_name, &git_ref, &default_branch);
            let site = RemoteSite::for_repository(&repository, &branch);
            let trigger = TriggerEvent::from_event_name(&event_name);
            let fetcher = HttpFetcher::new();

            let decision = evaluate(trigger, &site, &fetcher, force);

            print!("{}", render_outputs(&decision));
            if let Some(path) = github_output {
                if let Err(err) = append_outputs(&path, &decision) {
                    eprintln!("Failed to write outputs to {}: {}", path.display(), err);
                }
            }
            // The gate communicates purely through its outputs.
            0
        }
    };

    process::exit(code);
}

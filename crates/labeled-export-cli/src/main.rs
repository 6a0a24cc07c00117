// SPDX-License-Identifier: Apache-2.0
// Copyright © 2025 Au-Zone Technologies. All Rights Reserved.

use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use labeled_export::{
    Client, Error, ExportConfig, OutputArtifact, ProgressReporter, ProjectID, ProjectMeta, TaskID,
    TeamFiles,
    config::{Overrides, load_env_files},
};
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file layered under the environment
    #[clap(long, env = "EXPORT_CONFIG")]
    config: Option<PathBuf>,

    /// Hide progress bars
    #[clap(long, short)]
    quiet: bool,

    /// Export Command
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, PartialEq, Clone, Debug)]
enum Command {
    /// Export the labeled items of a project and upload the result to team
    /// files.
    Export {
        /// Project ID, defaults to the PROJECT_ID setting
        #[clap(long)]
        project_id: Option<ProjectID>,

        /// Task ID the result is registered to, defaults to TASK_ID
        #[clap(long)]
        task_id: Option<TaskID>,

        /// Download item media along with the annotations
        #[clap(long, conflicts_with = "no_items")]
        items: bool,

        /// Export annotations only
        #[clap(long)]
        no_items: bool,

        /// Local working directory, defaults to EXPORT_DATA_DIR or ./data
        #[clap(long)]
        data_dir: Option<PathBuf>,
    },
    /// Show project information and a summary of its meta.
    Project {
        /// Project ID
        project_id: ProjectID,
    },
    /// List the datasets of a project as a tree with their item counts.
    Datasets {
        /// Project ID
        project_id: ProjectID,
    },
}

/// Terminal progress bar fed by the export pipeline.
struct BarProgress {
    bar: ProgressBar,
}

impl BarProgress {
    fn new(quiet: bool) -> Self {
        let bar = if quiet {
            ProgressBar::hidden()
        } else {
            ProgressBar::new(0)
        };
        let style = ProgressStyle::with_template(
            "[{elapsed_precise} ETA: {eta}] {msg}: {wide_bar:.yellow} {human_pos}/{human_len}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▇▆▅▄▃▂▁  ");
        bar.set_style(style);
        BarProgress { bar }
    }
}

impl ProgressReporter for BarProgress {
    fn begin(&self, message: &str, total: u64) {
        self.bar.set_message(message.to_owned());
        self.bar.set_length(total);
        self.bar.set_position(0);
    }

    fn report(&self, done: u64) {
        self.bar.inc(done);
    }
}

impl Drop for BarProgress {
    fn drop(&mut self) {
        self.bar.finish_and_clear();
    }
}

fn load_config(file: Option<&PathBuf>, overrides: &Overrides) -> Result<ExportConfig, Error> {
    ExportConfig::load(file.map(PathBuf::as_path), overrides)
}

async fn handle_export(
    args: &Args,
    project_id: Option<ProjectID>,
    task_id: Option<TaskID>,
    download_items: Option<bool>,
    data_dir: Option<PathBuf>,
) -> Result<(), Error> {
    let overrides = Overrides {
        project_id,
        task_id,
        download_items,
        data_dir,
    };
    let config = load_config(args.config.as_ref(), &overrides)?;
    let team_id = config
        .team_id()
        .ok_or_else(|| Error::MissingConfig("TEAM_ID".to_string()))?;
    let client = Client::from_config(&config)?;
    let sink = TeamFiles::new(client.clone(), team_id, config.task_id());

    log::info!(
        "Exporting project {} with {} fetch strategy",
        config.project_id(),
        config.fetch_strategy()
    );
    let progress = BarProgress::new(args.quiet);
    let (summary, artifact) = labeled_export::run(&client, &sink, &config, &progress).await?;
    drop(progress);

    for dataset in &summary.datasets {
        let name = dataset
            .parents
            .iter()
            .chain(std::iter::once(&dataset.name))
            .cloned()
            .collect::<Vec<_>>()
            .join("/");
        if dataset.skipped {
            println!("{}: skipped", name);
        } else {
            println!(
                "{}: {}/{} labeled, {} failed",
                name,
                dataset.labeled(),
                dataset.total,
                dataset.failed
            );
        }
    }

    match &artifact {
        OutputArtifact::Directory { remote_dir, file } => {
            println!("Uploaded {} [{}]", remote_dir, file.id());
        }
        OutputArtifact::Archive {
            remote_dir,
            parts,
            file,
        } => {
            println!(
                "Uploaded {} in {} part(s) to {} [{}]",
                file.name(),
                parts.len(),
                remote_dir,
                file.id()
            );
        }
    }
    Ok(())
}

async fn handle_project(args: &Args, project_id: ProjectID) -> Result<(), Error> {
    let overrides = Overrides {
        project_id: Some(project_id),
        ..Default::default()
    };
    let config = load_config(args.config.as_ref(), &overrides)?;
    let client = Client::from_config(&config)?;
    let project = client
        .project_info(project_id)
        .await?
        .ok_or(Error::ProjectNotFound(project_id))?;
    println!(
        "[{}] {}: {} ({} items)",
        project.id(),
        project.name(),
        project.project_type(),
        project
            .items_count()
            .map(|n| n.to_string())
            .unwrap_or_else(|| "?".to_string())
    );

    let meta = ProjectMeta::from_json(&client.project_meta(project_id).await?)?;
    println!(
        "{} classes, {} tags",
        meta.classes().len(),
        meta.tag_metas().len()
    );
    Ok(())
}

async fn handle_datasets(args: &Args, project_id: ProjectID) -> Result<(), Error> {
    let overrides = Overrides {
        project_id: Some(project_id),
        ..Default::default()
    };
    let config = load_config(args.config.as_ref(), &overrides)?;
    let client = Client::from_config(&config)?;
    for (parents, dataset) in client.dataset_tree(project_id).await? {
        println!(
            "{}[{}] {} ({} items)",
            "  ".repeat(parents.len()),
            dataset.id(),
            dataset.name(),
            dataset
                .items_count()
                .map(|n| n.to_string())
                .unwrap_or_else(|| "?".to_string())
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    load_env_files();

    let args = Args::parse();
    match args.cmd.clone() {
        Command::Export {
            project_id,
            task_id,
            items,
            no_items,
            data_dir,
        } => {
            let download_items = match (items, no_items) {
                (_, true) => Some(false),
                (true, false) => Some(true),
                (false, false) => None,
            };
            handle_export(&args, project_id, task_id, download_items, data_dir).await
        }
        Command::Project { project_id } => handle_project(&args, project_id).await,
        Command::Datasets { project_id } => handle_datasets(&args, project_id).await,
    }
}

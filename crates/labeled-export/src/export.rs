// SPDX-License-Identifier: Apache-2.0
// Copyright © 2025 Au-Zone Technologies. All Rights Reserved.

use crate::{
    Error, ExportConfig, KeyIdMap, OutputArtifact, OutputSink, ProgressReporter, ProjectInfo,
    ProjectMeta, ProjectWriter, Remote,
    modality::{LabeledItem, MaterializeContext, for_item_type},
    package::{package, timestamp},
};
use log::{info, warn};
use std::path::{Path, PathBuf};

/// Counters of one dataset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatasetReport {
    /// Dataset name.
    pub name: String,
    /// Names of the ancestors, outermost first.
    pub parents: Vec<String>,
    /// Items listed in the dataset.
    pub total: usize,
    /// Items classified as not labeled, including those whose annotation
    /// failed to decode.
    pub not_labeled: usize,
    /// Labeled items that could not be written.
    pub failed: usize,
    /// The dataset was skipped because its items or annotations could not
    /// be fetched.
    pub skipped: bool,
}

impl DatasetReport {
    fn new(name: &str, parents: &[String]) -> Self {
        DatasetReport {
            name: name.to_owned(),
            parents: parents.to_vec(),
            ..Default::default()
        }
    }

    /// Items classified as labeled.
    pub fn labeled(&self) -> usize {
        self.total - self.not_labeled
    }

    /// Labeled items present in the local project.
    pub fn written(&self) -> usize {
        self.labeled() - self.failed
    }
}

/// Result of walking a project.
#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub project: ProjectInfo,
    pub project_dir: PathBuf,
    pub datasets: Vec<DatasetReport>,
}

impl ExportSummary {
    pub fn total(&self) -> usize {
        self.datasets.iter().map(|d| d.total).sum()
    }

    pub fn labeled(&self) -> usize {
        self.datasets.iter().map(|d| d.labeled()).sum()
    }

    pub fn failed(&self) -> usize {
        self.datasets.iter().map(|d| d.failed).sum()
    }

    pub fn skipped(&self) -> usize {
        self.datasets.iter().filter(|d| d.skipped).count()
    }
}

async fn reset_dir(dir: &Path) -> Result<(), Error> {
    if tokio::fs::try_exists(dir).await? {
        tokio::fs::remove_dir_all(dir).await?;
    }
    tokio::fs::create_dir_all(dir).await?;
    Ok(())
}

/// Writes the labeled items of a project into the local result directory.
///
/// Datasets are processed one at a time in tree order. A dataset whose
/// items or annotations cannot be fetched is skipped; an item that cannot be
/// decoded counts as not labeled; a labeled item that cannot be written is
/// counted as failed. None of these abort the walk. A missing project does.
pub async fn export_project(
    remote: &dyn Remote,
    config: &ExportConfig,
    progress: &dyn ProgressReporter,
) -> Result<ExportSummary, Error> {
    let project_id = config.project_id();
    let project = remote
        .project_info(project_id)
        .await?
        .ok_or(Error::ProjectNotFound(project_id))?;
    if let Some(task) = config.task_id()
        && let Err(err) = remote.register_workflow_input(task, project.id()).await
    {
        warn!("Failed to add project {} to the workflow: {}", project.id(), err);
    }
    let item_type = project.item_type()?;
    info!("Exporting {} project {}", item_type, project);

    let meta_json = remote.project_meta(project_id).await?;
    let meta = ProjectMeta::from_json(&meta_json)?;
    if meta.is_empty() {
        warn!("Project {} have no labeled items", project.name());
    }

    reset_dir(&config.result_dir()).await?;
    let project_dir = config.project_dir(project.name());
    let writer = ProjectWriter::create(&project_dir, item_type).await?;
    writer.set_meta(meta.to_json()).await?;
    info!("Export folder has been created");

    let modality = for_item_type(item_type);
    let mut key_id_map = KeyIdMap::new();
    let ctx = MaterializeContext {
        remote,
        strategy: config.fetch_strategy(),
        download_items: config.download_items(),
        progress,
    };

    let mut reports = Vec::new();
    for (parents, dataset) in remote.dataset_tree(project_id).await? {
        info!("Processing dataset {}...", dataset.name());
        let mut report = DatasetReport::new(dataset.name(), &parents);
        let mut dataset_writer = writer.create_dataset(dataset.name(), &parents).await?;

        let items = match modality.list_items(remote, &dataset).await {
            Ok(items) => items,
            Err(err) => {
                warn!(
                    "Can not list items of dataset {}: {}. Skipping.",
                    dataset.name(),
                    err
                );
                report.skipped = true;
                reports.push(report);
                continue;
            }
        };

        progress.begin("Downloading annotations", items.len() as u64);
        let annotations = match modality
            .fetch_annotations(remote, &dataset, &items, config.fetch_strategy(), progress)
            .await
        {
            Ok(annotations) => annotations,
            Err(err) => {
                warn!(
                    "Can not download {} annotations from dataset {}: {}. Skipping.",
                    items.len(),
                    dataset.name(),
                    err
                );
                report.skipped = true;
                reports.push(report);
                continue;
            }
        };

        report.total = items.len();
        let mut labeled = Vec::new();
        for (info, raw) in items.into_iter().zip(annotations) {
            match modality.classify(&info, &raw, &meta, &mut key_id_map) {
                Ok(Some(annotation)) => labeled.push(LabeledItem {
                    info,
                    raw,
                    annotation,
                }),
                Ok(None) => report.not_labeled += 1,
                Err(err) => {
                    warn!(
                        "Annotation of item {} in dataset {} is invalid: {}. Skipping.",
                        info.name(),
                        dataset.name(),
                        err
                    );
                    report.not_labeled += 1;
                }
            }
        }
        info!("Labeled items to download: {}", labeled.len());

        if !labeled.is_empty() {
            progress.begin("Processing dataset items", labeled.len() as u64);
            let materialized = modality.materialize(&ctx, &mut dataset_writer, &labeled).await;
            report.failed = materialized.failed;
        }

        if report.not_labeled == report.total {
            info!("There are no labeled items in dataset {}", dataset.name());
        } else {
            info!(
                "Dataset {} has {}/{} items labeled",
                dataset.name(),
                report.labeled(),
                report.total
            );
        }
        reports.push(report);
    }

    if item_type.uses_key_id_map() {
        writer.set_key_id_map(&key_id_map).await?;
    }

    Ok(ExportSummary {
        project,
        project_dir,
        datasets: reports,
    })
}

/// Exports the project and hands the result off to `sink`.
pub async fn run(
    remote: &dyn Remote,
    sink: &dyn OutputSink,
    config: &ExportConfig,
    progress: &dyn ProgressReporter,
) -> Result<(ExportSummary, OutputArtifact), Error> {
    let timestamp = timestamp();
    let summary = export_project(remote, config, progress).await?;
    info!(
        "{} of {} items labeled in {} datasets ({} skipped, {} failed)",
        summary.labeled(),
        summary.total(),
        summary.datasets.len(),
        summary.skipped(),
        summary.failed()
    );
    let artifact = package(&summary.project, config, sink, &timestamp, progress).await?;
    Ok((summary, artifact))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_counters() {
        let report = DatasetReport {
            total: 5,
            not_labeled: 2,
            failed: 1,
            ..DatasetReport::new("ds", &[])
        };
        assert_eq!(report.labeled(), 3);
        assert_eq!(report.written(), 2);
        assert_eq!(report.labeled() + report.not_labeled, report.total);
    }

    #[test]
    fn test_summary_totals() {
        let summary = ExportSummary {
            project: ProjectInfo::new(1.into(), "p", "images"),
            project_dir: PathBuf::from("data/p"),
            datasets: vec![
                DatasetReport {
                    total: 3,
                    not_labeled: 1,
                    ..DatasetReport::new("a", &[])
                },
                DatasetReport {
                    skipped: true,
                    ..DatasetReport::new("b", &["a".to_string()])
                },
            ],
        };
        assert_eq!(summary.total(), 3);
        assert_eq!(summary.labeled(), 2);
        assert_eq!(summary.skipped(), 1);
        assert_eq!(summary.failed(), 0);
    }
}

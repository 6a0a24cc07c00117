// SPDX-License-Identifier: Apache-2.0
// Copyright © 2025 Au-Zone Technologies. All Rights Reserved.

use crate::{
    DatasetID, DatasetInfo, Error, ExportConfig, FileInfo, ItemId, ItemInfo, ItemType,
    ProgressReporter, ProjectID, ProjectInfo, RelatedImageId, RelatedImageInfo, TaskID, TeamID,
    api::{Page, dataset_tree},
    bulk::max_tasks,
    remote::{OutputSink, Remote},
    retry::{create_retry_policy, log_retry_configuration},
};
use async_trait::async_trait;
use futures::{StreamExt as _, TryStreamExt as _};
use log::{Level, debug, error, log_enabled, trace};
use reqwest::{
    Body, StatusCode,
    multipart::{Form, Part},
};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Value, json};
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    time::Duration,
};
use tokio::{fs::File, io::AsyncWriteExt as _};
use tokio_util::codec::{BytesCodec, FramedRead};
use walkdir::WalkDir;

const PER_PAGE: usize = 500;

/// Request parameters and response layout of the annotation bulk method of
/// an item type.
struct AnnotationMethod {
    method: &'static str,
    ids_param: &'static str,
    id_field: &'static str,
}

fn annotation_method(kind: ItemType) -> AnnotationMethod {
    match kind {
        ItemType::Image => AnnotationMethod {
            method: "annotations.bulk.info",
            ids_param: "imageIds",
            id_field: "imageId",
        },
        ItemType::Video => AnnotationMethod {
            method: "videos.annotations.bulk.info",
            ids_param: "videoIds",
            id_field: "videoId",
        },
        ItemType::Pointcloud => AnnotationMethod {
            method: "point-clouds.annotations.bulk.info",
            ids_param: "entityIds",
            id_field: "entityId",
        },
    }
}

/// Client for the annotation platform HTTP API.
///
/// Every call is a `POST {server}/public/api/v3/{method}` with a JSON body and
/// the API token in the `x-api-key` header. Requests are retried according to
/// [`create_retry_policy`].
///
/// ```rust,no_run
/// use labeled_export::{Client, Error, ProjectID};
///
/// # async fn example() -> Result<(), Error> {
/// let client = Client::new("https://app.supervisely.com", "token")?;
/// if let Some(project) = client.project_info(ProjectID::from(42)).await? {
///     println!("{}", project);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    http: reqwest::Client,
    url: String,
    token: String,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client").field("url", &self.url).finish()
    }
}

impl Client {
    /// Creates a client for `server` authenticated with `token`.
    ///
    /// The request timeout is read from `SLY_TIMEOUT` (seconds, default 60)
    /// and the retry count from `SLY_MAX_RETRIES` (default 3).
    pub fn new(server: &str, token: &str) -> Result<Self, Error> {
        if token.trim().is_empty() {
            return Err(Error::EmptyToken);
        }
        let url = url::Url::parse(server)?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(Error::InvalidParameters(format!(
                "unsupported server address {}",
                server
            )));
        }

        log_retry_configuration();

        let timeout_secs = std::env::var("SLY_TIMEOUT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(60);

        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(timeout_secs))
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .retry(create_retry_policy())
            .build()?;

        Ok(Client {
            http,
            url: server.trim_end_matches('/').to_owned(),
            token: token.trim().to_owned(),
        })
    }

    pub fn from_config(config: &ExportConfig) -> Result<Self, Error> {
        Self::new(config.server_address(), config.api_token())
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/public/api/v3/{}", self.url, method)
    }

    /// Project info, or `None` when the platform does not know the project.
    pub async fn project_info(&self, id: ProjectID) -> Result<Option<ProjectInfo>, Error> {
        match self
            .rpc::<_, Option<ProjectInfo>>("projects.info", &json!({ "id": id }))
            .await
        {
            Err(Error::ApiError(404, _)) => Ok(None),
            other => other,
        }
    }

    pub async fn project_meta(&self, id: ProjectID) -> Result<Value, Error> {
        self.rpc("projects.meta", &json!({ "id": id })).await
    }

    /// Flat list of every dataset of the project, nested ones included.
    pub async fn datasets(&self, id: ProjectID) -> Result<Vec<DatasetInfo>, Error> {
        self.paginate("datasets.list", json!({ "projectId": id, "recursive": true }))
            .await
    }

    pub async fn dataset_tree(
        &self,
        id: ProjectID,
    ) -> Result<Vec<(Vec<String>, DatasetInfo)>, Error> {
        Ok(dataset_tree(self.datasets(id).await?))
    }

    pub async fn items(&self, kind: ItemType, dataset: DatasetID) -> Result<Vec<ItemInfo>, Error> {
        let method = format!("{}.list", kind.api_namespace());
        self.paginate(&method, json!({ "datasetId": dataset })).await
    }

    /// Raw annotations of `ids`, in the order of `ids`.
    ///
    /// The platform answers with one record per item in no guaranteed order;
    /// records are matched back by item id. A missing record is an
    /// [`Error::InvalidResponse`].
    pub async fn annotations(
        &self,
        kind: ItemType,
        dataset: DatasetID,
        ids: &[ItemId],
    ) -> Result<Vec<Value>, Error> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let AnnotationMethod {
            method,
            ids_param,
            id_field,
        } = annotation_method(kind);
        let mut params = serde_json::Map::new();
        params.insert("datasetId".to_owned(), json!(dataset));
        params.insert(ids_param.to_owned(), json!(ids));

        let records: Vec<Value> = self.rpc(method, &params).await?;
        let mut by_id: HashMap<u64, Value> = HashMap::with_capacity(records.len());
        for mut record in records {
            let id = record
                .get(id_field)
                .and_then(Value::as_u64)
                .ok_or(Error::InvalidResponse)?;
            // Image records wrap the annotation, the other types are the
            // annotation itself.
            let annotation = if record.get("annotation").is_some_and(Value::is_object) {
                record["annotation"].take()
            } else {
                record
            };
            by_id.insert(id, annotation);
        }

        ids.iter()
            .map(|id| {
                by_id.get(&id.value()).cloned().ok_or_else(|| {
                    error!("annotation for item {} missing from {} response", id, method);
                    Error::InvalidResponse
                })
            })
            .collect()
    }

    pub async fn item_bytes(&self, kind: ItemType, id: ItemId) -> Result<Vec<u8>, Error> {
        let method = format!("{}.download", kind.api_namespace());
        let resp = self.post(&method, &json!({ "id": id })).await?;
        Ok(resp.bytes().await?.to_vec())
    }

    /// Streams an item download into `path`.
    pub async fn download_item(&self, kind: ItemType, id: ItemId, path: &Path) -> Result<(), Error> {
        let method = format!("{}.download", kind.api_namespace());
        self.download_to_path(&method, &json!({ "id": id }), path).await
    }

    pub async fn related_images(&self, pointcloud: ItemId) -> Result<Vec<RelatedImageInfo>, Error> {
        let records: Vec<Value> = self
            .rpc("point-clouds.images.list", &json!({ "id": pointcloud }))
            .await?;
        records
            .into_iter()
            .map(RelatedImageInfo::from_record)
            .collect()
    }

    pub async fn download_related_image(
        &self,
        id: RelatedImageId,
        path: &Path,
    ) -> Result<(), Error> {
        self.download_to_path("point-clouds.images.download", &json!({ "id": id }), path)
            .await
    }

    /// File info of a team file, or `None` when nothing is stored at `path`.
    pub async fn team_file_info(
        &self,
        team_id: TeamID,
        path: &str,
    ) -> Result<Option<FileInfo>, Error> {
        match self
            .rpc::<_, Option<FileInfo>>("file-storage.info", &json!({ "teamId": team_id, "path": path }))
            .await
        {
            Err(Error::ApiError(404, _)) => Ok(None),
            other => other,
        }
    }

    /// Uploads one local file to the team files `remote_path`.
    pub async fn upload_team_file(
        &self,
        team_id: TeamID,
        local: &Path,
        remote_path: &str,
    ) -> Result<u64, Error> {
        let file = File::open(local).await?;
        let size = file.metadata().await?.len();
        let name = local
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());

        let stream = FramedRead::new(file, BytesCodec::new());
        let part = Part::stream_with_length(Body::wrap_stream(stream), size).file_name(name);
        let form = Form::new()
            .text("path", remote_path.to_owned())
            .part("file", part);

        let resp = self
            .http
            .post(format!(
                "{}?teamId={}",
                self.method_url("file-storage.bulk.upload"),
                team_id
            ))
            .header("x-api-key", &self.token)
            .multipart(form)
            .send()
            .await?;
        let body = check_status(resp).await?.bytes().await?;

        if log_enabled!(Level::Trace) {
            trace!("Upload Response: {}", String::from_utf8_lossy(&body));
        }
        debug!("uploaded {:?} to {} ({} bytes)", local, remote_path, size);
        Ok(size)
    }

    /// Uploads every file below `local` to `remote_dir`, `max_tasks()` files
    /// at a time. Progress is reported in bytes as files complete.
    pub async fn upload_team_directory(
        &self,
        team_id: TeamID,
        local: &Path,
        remote_dir: &str,
        progress: &dyn ProgressReporter,
    ) -> Result<String, Error> {
        let remote_dir = remote_dir.trim_end_matches('/').to_owned();
        let mut files: Vec<(PathBuf, String)> = Vec::new();
        let mut total = 0;
        for entry in WalkDir::new(local).sort_by_file_name() {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            total += entry.metadata()?.len();
            let relative = entry.path().strip_prefix(local)?;
            let relative = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            files.push((entry.path().to_path_buf(), format!("{}/{}", remote_dir, relative)));
        }

        progress.begin("Uploading to Team Files", total);
        futures::stream::iter(files)
            .map(|(path, remote)| async move {
                self.upload_team_file(team_id, &path, &remote).await
            })
            .buffer_unordered(max_tasks())
            .try_for_each(|size| async move {
                progress.report(size);
                Ok::<(), Error>(())
            })
            .await?;

        Ok(remote_dir)
    }

    /// Adds `project` to the inputs of the workflow of `task`.
    pub async fn add_workflow_input(&self, task: TaskID, project: ProjectID) -> Result<(), Error> {
        self.add_workflow_node("input", task, json!({"type": "project", "id": project}))
            .await
    }

    /// Adds a team file to the outputs of the workflow of `task`.
    pub async fn add_workflow_output(&self, task: TaskID, file: &FileInfo) -> Result<(), Error> {
        self.add_workflow_node("output", task, json!({"type": "file", "id": file.id()}))
            .await
    }

    async fn add_workflow_node(
        &self,
        direction: &str,
        task: TaskID,
        data: Value,
    ) -> Result<(), Error> {
        let params = json!({
            "taskId": task,
            "node": {"type": "task", "id": task},
            "data": data,
        });
        let method = format!("workflow.node.add-{}", direction);
        let _: Value = self.rpc(&method, &params).await?;
        Ok(())
    }

    /// Registers a team file as the output of a task.
    pub async fn set_task_output(
        &self,
        task_id: TaskID,
        file: &FileInfo,
        directory: &str,
    ) -> Result<(), Error> {
        let title = directory
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or(directory);
        let params = json!({
            "taskId": task_id,
            "output": {
                "general": {
                    "type": "directory",
                    "id": file.id(),
                    "title": title,
                    "path": directory,
                    "description": "Directory",
                }
            }
        });
        let _: Value = self.rpc("tasks.output.set", &params).await?;
        Ok(())
    }

    async fn paginate<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<Vec<T>, Error> {
        let mut entities = Vec::new();
        let mut page = 1;
        loop {
            let mut params = params.clone();
            if let Some(map) = params.as_object_mut() {
                map.insert("page".to_owned(), json!(page));
                map.insert("per_page".to_owned(), json!(PER_PAGE));
            }
            let result: Page<T> = self.rpc(method, &params).await?;
            let received = result.entities.len();
            entities.extend(result.entities);
            if received == 0 || page >= result.pages_count || entities.len() as u64 >= result.total
            {
                break;
            }
            page += 1;
        }
        Ok(entities)
    }

    async fn download_to_path<Params: Serialize + ?Sized>(
        &self,
        method: &str,
        params: &Params,
        path: &Path,
    ) -> Result<(), Error> {
        let resp = self.post(method, params).await?;
        let mut file = File::create(path).await?;
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            file.write_all(&chunk?).await?;
        }
        file.flush().await?;
        Ok(())
    }

    async fn post<Params: Serialize + ?Sized>(
        &self,
        method: &str,
        params: &Params,
    ) -> Result<reqwest::Response, Error> {
        if log_enabled!(Level::Trace) {
            trace!(
                "API Request {}: {}",
                method,
                serde_json::to_string_pretty(params)?
            );
        }

        let resp = self
            .http
            .post(self.method_url(method))
            .header("Accept", "application/json")
            .header("x-api-key", &self.token)
            .json(params)
            .send()
            .await?;
        check_status(resp).await
    }

    /// Sends an API request and decodes the JSON response.
    ///
    /// NOTE: This API would generally not be called directly and instead
    /// users should use the higher-level methods provided by the client.
    pub async fn rpc<Params, R>(&self, method: &str, params: &Params) -> Result<R, Error>
    where
        Params: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let resp = self.post(method, params).await?;
        let body = resp.bytes().await?;

        if log_enabled!(Level::Trace) {
            trace!("API Response {}: {}", method, String::from_utf8_lossy(&body));
        }

        match serde_json::from_slice(&body) {
            Ok(result) => Ok(result),
            Err(err) => {
                error!("Invalid JSON Response: {}", String::from_utf8_lossy(&body));
                Err(err.into())
            }
        }
    }
}

/// Turns an error status into an [`Error::ApiError`] carrying the message of
/// the platform error body when there is one.
async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, Error> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let body = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| {
            v.pointer("/details/message")
                .or_else(|| v.get("error"))
                .or_else(|| v.get("message"))
                .and_then(Value::as_str)
                .map(str::to_owned)
        })
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_owned()
        });
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        error!("API token rejected by the server: {}", message);
    }
    Err(Error::ApiError(status.as_u16(), message))
}

#[async_trait]
impl Remote for Client {
    async fn project_info(&self, id: ProjectID) -> Result<Option<ProjectInfo>, Error> {
        Client::project_info(self, id).await
    }

    async fn project_meta(&self, id: ProjectID) -> Result<Value, Error> {
        Client::project_meta(self, id).await
    }

    async fn dataset_tree(&self, id: ProjectID) -> Result<Vec<(Vec<String>, DatasetInfo)>, Error> {
        Client::dataset_tree(self, id).await
    }

    async fn list_items(&self, kind: ItemType, dataset: DatasetID) -> Result<Vec<ItemInfo>, Error> {
        self.items(kind, dataset).await
    }

    async fn download_annotations(
        &self,
        kind: ItemType,
        dataset: DatasetID,
        ids: &[ItemId],
    ) -> Result<Vec<Value>, Error> {
        self.annotations(kind, dataset, ids).await
    }

    async fn download_item_bytes(&self, kind: ItemType, id: ItemId) -> Result<Vec<u8>, Error> {
        self.item_bytes(kind, id).await
    }

    async fn download_item_to_path(
        &self,
        kind: ItemType,
        id: ItemId,
        path: &Path,
    ) -> Result<(), Error> {
        self.download_item(kind, id, path).await
    }

    async fn related_images(&self, pointcloud: ItemId) -> Result<Vec<RelatedImageInfo>, Error> {
        Client::related_images(self, pointcloud).await
    }

    async fn download_related_image(&self, id: RelatedImageId, path: &Path) -> Result<(), Error> {
        Client::download_related_image(self, id, path).await
    }

    async fn register_workflow_input(
        &self,
        task: TaskID,
        project: ProjectID,
    ) -> Result<(), Error> {
        self.add_workflow_input(task, project).await
    }
}

/// Team files of one team, optionally bound to the running task.
#[derive(Debug, Clone)]
pub struct TeamFiles {
    client: Client,
    team_id: TeamID,
    task_id: Option<TaskID>,
}

impl TeamFiles {
    pub fn new(client: Client, team_id: TeamID, task_id: Option<TaskID>) -> Self {
        TeamFiles {
            client,
            team_id,
            task_id,
        }
    }

    pub fn team_id(&self) -> TeamID {
        self.team_id
    }

    pub fn task_id(&self) -> Option<TaskID> {
        self.task_id
    }
}

#[async_trait]
impl OutputSink for TeamFiles {
    async fn upload_directory(
        &self,
        local: &Path,
        remote_dir: &str,
        progress: &dyn ProgressReporter,
    ) -> Result<String, Error> {
        self.client
            .upload_team_directory(self.team_id, local, remote_dir, progress)
            .await
    }

    async fn file_info(&self, remote_path: &str) -> Result<Option<FileInfo>, Error> {
        self.client.team_file_info(self.team_id, remote_path).await
    }

    async fn register_output(&self, file: &FileInfo, directory: &str) -> Result<(), Error> {
        match self.task_id {
            Some(task_id) => self.client.set_task_output(task_id, file, directory).await,
            None => {
                debug!("Task ID is not set, output {} is not registered", directory);
                Ok(())
            }
        }
    }

    async fn register_workflow_output(&self, file: &FileInfo) -> Result<(), Error> {
        match self.task_id {
            Some(task_id) => self.client.add_workflow_output(task_id, file).await,
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use tempfile::TempDir;

    fn client(server: &Server) -> Client {
        Client::new(&server.url(), "secret").unwrap()
    }

    #[test]
    fn test_new_rejects_bad_input() {
        assert!(matches!(
            Client::new("https://app.supervisely.com", "  "),
            Err(Error::EmptyToken)
        ));
        assert!(matches!(
            Client::new("not a url", "token"),
            Err(Error::UrlParseError(_))
        ));
        assert!(Client::new("ftp://host", "token").is_err());
    }

    #[tokio::test]
    async fn test_project_info_sends_token() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/public/api/v3/projects.info")
            .match_header("x-api-key", "secret")
            .match_body(Matcher::PartialJson(json!({"id": 5})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id": 5, "name": "Cars", "type": "images", "teamId": 1}"#)
            .create_async()
            .await;

        let info = client(&server)
            .project_info(5.into())
            .await
            .unwrap()
            .unwrap();
        mock.assert_async().await;
        assert_eq!(info.name(), "Cars");
        assert_eq!(info.item_type().unwrap(), ItemType::Image);
    }

    #[tokio::test]
    async fn test_project_info_not_found() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/public/api/v3/projects.info")
            .with_status(404)
            .with_body(r#"{"error": "Project not found"}"#)
            .create_async()
            .await;
        assert!(client(&server).project_info(5.into()).await.unwrap().is_none());

        server
            .mock("POST", "/public/api/v3/projects.meta")
            .with_status(403)
            .with_body(r#"{"error": "Forbidden", "details": {"message": "no access"}}"#)
            .create_async()
            .await;
        match client(&server).project_meta(5.into()).await {
            Err(Error::ApiError(403, msg)) => assert_eq!(msg, "no access"),
            other => panic!("Expected ApiError, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_datasets_paginate_and_tree() {
        let mut server = Server::new_async().await;
        let first = server
            .mock("POST", "/public/api/v3/datasets.list")
            .match_body(Matcher::PartialJson(json!({"projectId": 3, "page": 1})))
            .with_status(200)
            .with_body(
                r#"{"total": 3, "pagesCount": 2, "entities": [
                    {"id": 1, "name": "root", "parentId": null},
                    {"id": 2, "name": "child", "parentId": 1}]}"#,
            )
            .create_async()
            .await;
        let second = server
            .mock("POST", "/public/api/v3/datasets.list")
            .match_body(Matcher::PartialJson(json!({"projectId": 3, "page": 2})))
            .with_status(200)
            .with_body(
                r#"{"total": 3, "pagesCount": 2, "entities": [
                    {"id": 4, "name": "other"}]}"#,
            )
            .create_async()
            .await;

        let tree = client(&server).dataset_tree(3.into()).await.unwrap();
        first.assert_async().await;
        second.assert_async().await;
        let names: Vec<&str> = tree.iter().map(|(_, d)| d.name()).collect();
        assert_eq!(names, vec!["root", "child", "other"]);
        assert_eq!(tree[1].0, vec!["root".to_string()]);
    }

    #[tokio::test]
    async fn test_annotations_rekeyed_by_item_id() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/public/api/v3/annotations.bulk.info")
            .match_body(Matcher::PartialJson(json!({"datasetId": 8, "imageIds": [1, 2]})))
            .with_status(200)
            .with_body(
                r#"[
                    {"imageId": 2, "annotation": {"objects": [], "tags": [{"name": "b"}]}},
                    {"imageId": 1, "annotation": {"objects": [], "tags": []}}
                ]"#,
            )
            .create_async()
            .await;

        let anns = client(&server)
            .annotations(ItemType::Image, 8.into(), &[1.into(), 2.into()])
            .await
            .unwrap();
        assert_eq!(anns[0], json!({"objects": [], "tags": []}));
        assert_eq!(anns[1]["tags"][0]["name"], "b");
    }

    #[tokio::test]
    async fn test_annotations_missing_record() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/public/api/v3/videos.annotations.bulk.info")
            .with_status(200)
            .with_body(r#"[{"videoId": 1, "objects": [], "tags": [], "frames": []}]"#)
            .create_async()
            .await;

        let result = client(&server)
            .annotations(ItemType::Video, 8.into(), &[1.into(), 2.into()])
            .await;
        assert!(matches!(result, Err(Error::InvalidResponse)));
    }

    #[tokio::test]
    async fn test_download_item_to_path() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/public/api/v3/point-clouds.download")
            .match_body(Matcher::PartialJson(json!({"id": 77})))
            .with_status(200)
            .with_body(b"pcd-bytes")
            .create_async()
            .await;

        let temp = TempDir::new().unwrap();
        let path = temp.path().join("scan.pcd");
        client(&server)
            .download_item(ItemType::Pointcloud, 77.into(), &path)
            .await
            .unwrap();
        assert_eq!(std::fs::read(path).unwrap(), b"pcd-bytes");
    }

    #[tokio::test]
    async fn test_related_images() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/public/api/v3/point-clouds.images.list")
            .with_status(200)
            .with_body(r#"[{"id": 5, "name": "cam0.png", "meta": {"deviceId": "cam0"}}]"#)
            .create_async()
            .await;

        let images = client(&server).related_images(1.into()).await.unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].name(), "cam0.png");
        assert_eq!(images[0].record()["meta"]["deviceId"], "cam0");
    }

    #[tokio::test]
    async fn test_team_files_upload_and_register() {
        let mut server = Server::new_async().await;
        let upload = server
            .mock("POST", "/public/api/v3/file-storage.bulk.upload")
            .match_query(Matcher::UrlEncoded("teamId".into(), "4".into()))
            .match_header("x-api-key", "secret")
            .with_status(200)
            .with_body("[]")
            .expect(2)
            .create_async()
            .await;
        server
            .mock("POST", "/public/api/v3/file-storage.info")
            .match_body(Matcher::PartialJson(json!({"teamId": 4, "path": "/out/meta.json"})))
            .with_status(200)
            .with_body(r#"{"id": 90, "name": "meta.json", "path": "/out/meta.json"}"#)
            .create_async()
            .await;
        let output = server
            .mock("POST", "/public/api/v3/tasks.output.set")
            .match_body(Matcher::PartialJson(json!({"taskId": 11})))
            .with_status(200)
            .with_body(r#"{"success": true}"#)
            .create_async()
            .await;

        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("meta.json"), b"{}").unwrap();
        std::fs::create_dir(temp.path().join("ds")).unwrap();
        std::fs::write(temp.path().join("ds/a.json"), b"[1]").unwrap();

        let sink = TeamFiles::new(client(&server), 4.into(), Some(11.into()));
        let progress = crate::LogProgress::new();
        let dir = sink
            .upload_directory(temp.path(), "/out/", &progress)
            .await
            .unwrap();
        assert_eq!(dir, "/out");
        assert_eq!(progress.current(), 5);
        upload.assert_async().await;

        let info = sink.file_info("/out/meta.json").await.unwrap().unwrap();
        assert_eq!(info.id().value(), 90);
        sink.register_output(&info, "/out").await.unwrap();
        output.assert_async().await;
    }

    #[tokio::test]
    async fn test_register_output_without_task_is_noop() {
        let mut server = Server::new_async().await;
        let output = server
            .mock("POST", "/public/api/v3/tasks.output.set")
            .expect(0)
            .create_async()
            .await;

        let sink = TeamFiles::new(client(&server), 4.into(), None);
        let info = FileInfo::new(1.into(), "/out/meta.json");
        sink.register_output(&info, "/out").await.unwrap();
        output.assert_async().await;
    }

    #[tokio::test]
    async fn test_workflow_input_and_output() {
        let mut server = Server::new_async().await;
        let input = server
            .mock("POST", "/public/api/v3/workflow.node.add-input")
            .match_header("x-api-key", "secret")
            .match_body(Matcher::PartialJson(json!({
                "taskId": 11,
                "node": {"type": "task", "id": 11},
                "data": {"type": "project", "id": 42}
            })))
            .with_status(200)
            .with_body(r#"{"success": true}"#)
            .create_async()
            .await;
        let output = server
            .mock("POST", "/public/api/v3/workflow.node.add-output")
            .match_body(Matcher::PartialJson(json!({
                "taskId": 11,
                "data": {"type": "file", "id": 90}
            })))
            .with_status(200)
            .with_body(r#"{"success": true}"#)
            .create_async()
            .await;

        let client = client(&server);
        client
            .register_workflow_input(11.into(), 42.into())
            .await
            .unwrap();
        input.assert_async().await;

        let sink = TeamFiles::new(client, 4.into(), Some(11.into()));
        let info = FileInfo::new(90.into(), "/out/meta.json");
        sink.register_workflow_output(&info).await.unwrap();
        output.assert_async().await;
    }

    #[tokio::test]
    async fn test_workflow_output_without_task_is_noop() {
        let mut server = Server::new_async().await;
        let output = server
            .mock("POST", "/public/api/v3/workflow.node.add-output")
            .expect(0)
            .create_async()
            .await;

        let sink = TeamFiles::new(client(&server), 4.into(), None);
        let info = FileInfo::new(1.into(), "/out/meta.json");
        sink.register_workflow_output(&info).await.unwrap();
        output.assert_async().await;
    }
}

//! Pass A (§4.4): page through the remote's project listing and upsert
//! Repository rows.

use review_core::entities::Repository;
use review_core::ids::RepoId;
use review_platform::RemotePlatform;
use review_store::Store;

use crate::Result;

#[tracing::instrument(skip_all)]
pub async fn run(store: &dyn Store, platform: &dyn RemotePlatform) -> Result<Vec<Repository>> {
    let projects = platform.list_projects().await?;
    let mut repositories = Vec::with_capacity(projects.len());
    for project in projects {
        let repository = store
            .upsert_repository(RepoId(project.id), &project.name, &project.path_with_namespace, &project.web_url)
            .await?;
        repositories.push(repository);
    }
    Ok(repositories)
}

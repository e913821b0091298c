//! Version resolution against the content registry.

use std::collections::{HashSet, VecDeque};
use tracing::debug;

use crate::error::{ServiceError, ServiceResult};
use crate::registry::{ContentRegistry, DependencyType, ModVersion};

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// The exact version when one is named, else the registry's first match for
/// the project under the given filters.
pub(crate) async fn resolve_version(
    registry: &dyn ContentRegistry,
    project_id: &str,
    version_id: Option<&str>,
    loader: Option<&str>,
    game_version: Option<&str>,
) -> ServiceResult<ModVersion> {
    if let Some(version_id) = non_blank(version_id) {
        return Ok(registry.get_version(version_id).await?);
    }
    let project_id = project_id.trim();
    if project_id.is_empty() {
        return Err(ServiceError::invalid("project_id is required"));
    }
    registry
        .list_versions(project_id, loader, game_version)
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| ServiceError::not_found("No compatible versions found"))
}

/// `root` followed by every version it transitively requires.
///
/// Dependencies naming a version are fetched as-is; those naming only a
/// project take that project's first compatible version. A version or project
/// is resolved at most once, so cycles and diamonds terminate.
pub(crate) async fn dependency_closure(
    registry: &dyn ContentRegistry,
    root: ModVersion,
    loader: Option<&str>,
    game_version: Option<&str>,
) -> ServiceResult<Vec<ModVersion>> {
    let mut seen_versions = HashSet::from([root.id.clone()]);
    let mut seen_projects = HashSet::new();
    if !root.project_id.is_empty() {
        seen_projects.insert(root.project_id.clone());
    }

    let mut resolved = vec![root.clone()];
    let mut pending = VecDeque::from([root]);
    while let Some(current) = pending.pop_front() {
        for dep in &current.dependencies {
            if dep.dependency_type != DependencyType::Required {
                continue;
            }
            let version = if let Some(version_id) = non_blank(dep.version_id.as_deref()) {
                if !seen_versions.insert(version_id.to_string()) {
                    continue;
                }
                registry.get_version(version_id).await?
            } else if let Some(project_id) = non_blank(dep.project_id.as_deref()) {
                if !seen_projects.insert(project_id.to_string()) {
                    continue;
                }
                let first = registry
                    .list_versions(project_id, loader, game_version)
                    .await?
                    .into_iter()
                    .next()
                    .ok_or_else(|| {
                        ServiceError::not_found(format!(
                            "No compatible versions found for required dependency: {project_id}"
                        ))
                    })?;
                if !seen_versions.insert(first.id.clone()) {
                    continue;
                }
                first
            } else {
                continue;
            };

            if !version.project_id.is_empty() {
                seen_projects.insert(version.project_id.clone());
            }
            debug!(from = %current.id, to = %version.id, "Resolved required dependency.");
            resolved.push(version.clone());
            pending.push_back(version);
        }
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::VersionDependency;
    use crate::testing::FakeRegistry;

    fn version(id: &str, project: &str, deps: Vec<VersionDependency>) -> ModVersion {
        ModVersion {
            id: id.into(),
            project_id: project.into(),
            dependencies: deps,
            ..Default::default()
        }
    }

    fn requires_version(id: &str) -> VersionDependency {
        VersionDependency {
            version_id: Some(id.into()),
            dependency_type: DependencyType::Required,
            ..Default::default()
        }
    }

    fn requires_project(id: &str) -> VersionDependency {
        VersionDependency {
            project_id: Some(id.into()),
            dependency_type: DependencyType::Required,
            ..Default::default()
        }
    }

    fn ids(versions: &[ModVersion]) -> Vec<&str> {
        versions.iter().map(|v| v.id.as_str()).collect()
    }

    #[tokio::test]
    async fn explicit_version_wins_over_project_lookup() {
        let registry = FakeRegistry::default();
        registry.add_version(version("a-old", "a", vec![]));
        registry.add_version(version("a-new", "a", vec![]));

        let latest = resolve_version(&registry, "a", None, None, None).await.unwrap();
        assert_eq!(latest.id, "a-new");
        let pinned = resolve_version(&registry, "a", Some("a-old"), None, None)
            .await
            .unwrap();
        assert_eq!(pinned.id, "a-old");
        assert!(matches!(
            resolve_version(&registry, "missing", None, None, None).await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn cycle_terminates_with_each_version_once() {
        let registry = FakeRegistry::default();
        let a = version("a1", "a", vec![requires_version("b1")]);
        registry.add_version(a.clone());
        registry.add_version(version("b1", "b", vec![requires_version("a1")]));

        let closure = dependency_closure(&registry, a, None, None).await.unwrap();
        assert_eq!(ids(&closure), vec!["a1", "b1"]);
    }

    #[tokio::test]
    async fn diamond_resolves_shared_dependency_once() {
        let registry = FakeRegistry::default();
        let root = version(
            "root1",
            "root",
            vec![requires_project("left"), requires_project("right")],
        );
        registry.add_version(version("left1", "left", vec![requires_project("lib")]));
        registry.add_version(version("right1", "right", vec![requires_version("lib1")]));
        registry.add_version(version("lib1", "lib", vec![]));

        let closure = dependency_closure(&registry, root, None, None).await.unwrap();
        assert_eq!(ids(&closure), vec!["root1", "left1", "right1", "lib1"]);
    }

    #[tokio::test]
    async fn optional_dependencies_are_ignored() {
        let registry = FakeRegistry::default();
        let root = version(
            "root1",
            "root",
            vec![VersionDependency {
                project_id: Some("extra".into()),
                dependency_type: DependencyType::Optional,
                ..Default::default()
            }],
        );
        let closure = dependency_closure(&registry, root, None, None).await.unwrap();
        assert_eq!(ids(&closure), vec!["root1"]);
        assert_eq!(registry.version_lookups(), 0);
    }

    #[tokio::test]
    async fn unresolvable_required_project_is_not_found() {
        let registry = FakeRegistry::default();
        let root = version("root1", "root", vec![requires_project("ghost")]);
        assert!(matches!(
            dependency_closure(&registry, root, None, None).await,
            Err(ServiceError::NotFound(_))
        ));
    }
}

//! Spec validation.
//!
//! Every operation entry point runs its specs through `validate` first. The
//! returned list is a deep copy, so caller-held specs are never mutated.

use std::collections::HashSet;

use super::OpError;
use crate::types::{PackageSpec, Project, Tracking};

/// Operation the specs are validated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Add,
    Develop,
    Rm,
    Up,
    Pin,
    Free,
    Test,
    Build,
    Status,
    Instantiate,
}

pub fn validate(
    op: Op,
    specs: &[PackageSpec],
    project: &Project,
) -> Result<Vec<PackageSpec>, OpError> {
    let specs: Vec<PackageSpec> = specs.to_vec();

    match op {
        Op::Add => validate_add(&specs, project, false)?,
        Op::Develop => validate_add(&specs, project, true)?,
        Op::Rm | Op::Free => validate_name_or_uuid_only(&specs)?,
        Op::Pin => validate_pin(&specs)?,
        Op::Up | Op::Test | Op::Build | Op::Status | Op::Instantiate => {}
    }

    Ok(specs)
}

fn validate_add(
    specs: &[PackageSpec],
    project: &Project,
    develop: bool,
) -> Result<(), OpError> {
    let mut names = HashSet::new();
    let mut uuids = HashSet::new();

    for spec in specs {
        if spec.name.as_deref() == Some("julia") {
            return Err(OpError::InvalidSpec(
                "julia is not a valid package name".into(),
            ));
        }

        let has_repo = matches!(spec.tracking, Tracking::Repo { .. });
        if spec.name.is_none() && spec.uuid.is_none() && !has_repo {
            return Err(OpError::InvalidSpec(
                "specs must carry a name, a UUID, or a repository URL".into(),
            ));
        }

        if let Tracking::Repo { rev, .. } = &spec.tracking {
            if !spec.version.is_any() {
                return Err(OpError::InvalidSpec(format!(
                    "version specification invalid when tracking a repository: {}",
                    spec.display_name()
                )));
            }
            if develop && rev.is_some() {
                return Err(OpError::InvalidSpec(
                    "rev argument not supported by develop".into(),
                ));
            }
        }

        if let Some(name) = &spec.name {
            if project.name.as_deref() == Some(name.as_str()) {
                return Err(OpError::InvalidSpec(format!(
                    "cannot add the project {name} to its own dependencies"
                )));
            }
            if !names.insert(name.clone()) {
                return Err(OpError::InvalidSpec(format!(
                    "{name} given more than once"
                )));
            }
        }
        if let Some(uuid) = spec.uuid {
            if !uuids.insert(uuid) {
                return Err(OpError::InvalidSpec(format!(
                    "{uuid} given more than once"
                )));
            }
        }
    }
    Ok(())
}

fn validate_name_or_uuid_only(specs: &[PackageSpec]) -> Result<(), OpError> {
    for spec in specs {
        if spec.name.is_none() && spec.uuid.is_none() {
            return Err(OpError::InvalidSpec(
                "specs must carry a name or a UUID".into(),
            ));
        }
        let extra_field = !spec.version.is_any()
            || spec.tree_hash.is_some()
            || spec.pinned
            || !spec.tracking.is_registry();
        if extra_field {
            return Err(OpError::InvalidSpec(
                "packages may only be specified by name or UUID".into(),
            ));
        }
    }
    Ok(())
}

fn validate_pin(specs: &[PackageSpec]) -> Result<(), OpError> {
    for spec in specs {
        if !spec.tracking.is_registry() {
            return Err(OpError::InvalidSpec(format!(
                "repository or path tracking invalid when pinning: {}",
                spec.display_name()
            )));
        }
        if !spec.version.is_any() && spec.version.as_exact().is_none() {
            return Err(OpError::InvalidSpec(format!(
                "pinning requires a single version, not a range: {}",
                spec.display_name()
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::VersionSpec;
    use semver::Version;
    use uuid::Uuid;

    fn repo_spec(name: &str, rev: Option<&str>) -> PackageSpec {
        PackageSpec {
            name: Some(name.into()),
            tracking: Tracking::Repo {
                source: "https://example.com/repo.git".into(),
                rev: rev.map(str::to_string),
                subdir: None,
            },
            ..PackageSpec::default()
        }
    }

    fn message(err: OpError) -> String {
        err.to_string()
    }

    #[test]
    fn julia_is_reserved_for_add_and_develop() {
        for op in [Op::Add, Op::Develop] {
            let err = validate(op, &[PackageSpec::by_name("julia")], &Project::default())
                .unwrap_err();
            assert!(message(err).contains("julia is not a valid package name"));
        }

        // The reservation only guards additions; other operations resolve the
        // name against the environment and fail there instead.
        for op in [Op::Rm, Op::Free, Op::Pin, Op::Up] {
            assert!(validate(op, &[PackageSpec::by_name("julia")], &Project::default()).is_ok());
        }
    }

    #[test]
    fn develop_rejects_rev() {
        let err = validate(
            Op::Develop,
            &[repo_spec("Foo", Some("main"))],
            &Project::default(),
        )
        .unwrap_err();
        assert!(message(err).contains("rev argument not supported by develop"));
    }

    #[test]
    fn rm_rejects_extra_fields() {
        let mut spec = PackageSpec::by_name("Foo");
        spec.version = VersionSpec::Exact(Version::new(1, 0, 0));
        let err = validate(Op::Rm, &[spec], &Project::default()).unwrap_err();
        assert!(message(err).contains("packages may only be specified by name or UUID"));
    }

    #[test]
    fn add_rejects_versioned_repo_spec() {
        let mut spec = repo_spec("Foo", None);
        spec.version = VersionSpec::Exact(Version::new(1, 0, 0));
        assert!(validate(Op::Add, &[spec], &Project::default()).is_err());
    }

    #[test]
    fn add_rejects_duplicates_and_self() {
        let duplicate = vec![PackageSpec::by_name("Foo"), PackageSpec::by_name("Foo")];
        assert!(validate(Op::Add, &duplicate, &Project::default()).is_err());

        let uuid = Uuid::new_v4();
        let dup_uuid = vec![PackageSpec::by_uuid(uuid), PackageSpec::by_uuid(uuid)];
        assert!(validate(Op::Add, &dup_uuid, &Project::default()).is_err());

        let project = Project {
            name: Some("Mine".into()),
            uuid: Some(Uuid::new_v4()),
            ..Project::default()
        };
        assert!(validate(Op::Add, &[PackageSpec::by_name("Mine")], &project).is_err());
    }

    #[test]
    fn pin_rejects_ranges_but_takes_degenerate_ones() {
        let mut range = PackageSpec::by_name("Foo");
        range.version = VersionSpec::Range {
            lower: Version::new(1, 0, 0),
            upper: Version::new(1, 4, 0),
        };
        assert!(validate(Op::Pin, &[range], &Project::default()).is_err());

        let mut degenerate = PackageSpec::by_name("Foo");
        degenerate.version = VersionSpec::Range {
            lower: Version::new(1, 2, 0),
            upper: Version::new(1, 2, 0),
        };
        assert!(validate(Op::Pin, &[degenerate], &Project::default()).is_ok());
    }

    #[test]
    fn caller_specs_are_untouched() {
        let original = vec![PackageSpec::by_name("Foo")];
        let validated = validate(Op::Add, &original, &Project::default()).unwrap();
        assert_eq!(original, validated);
        // Mutating the returned list cannot affect the caller's copy.
        let mut validated = validated;
        validated[0].uuid = Some(Uuid::new_v4());
        assert!(original[0].uuid.is_none());
    }
}

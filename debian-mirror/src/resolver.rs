// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Dependency closure resolution.

The closure of a package is every package reachable by following relationship groups
that aren't already satisfied. Traversal is depth-first with an explicit stack and an
identity-keyed visited set, so cyclic graphs terminate and deep chains don't exhaust the
call stack.

Resolution is best effort. A group no source can satisfy is logged and skipped.
*/

use {
    crate::{
        catalog::{PackageId, PackageRecord},
        dependency::{DependencyVariants, PackageRequest},
        sources::SourceCollection,
    },
    log::{debug, warn},
    std::{collections::BTreeMap, sync::Arc},
};

/// A set of packages keyed by identity.
pub type PackageSet = BTreeMap<PackageId, Arc<PackageRecord>>;

struct Frame {
    record: Arc<PackageRecord>,
    /// Index of the next relationship group to examine.
    group: usize,
    /// Candidates for the group being descended.
    candidates: Vec<Arc<PackageRecord>>,
    candidate: usize,
}

impl Frame {
    fn new(record: Arc<PackageRecord>) -> Self {
        Self {
            record,
            group: 0,
            candidates: vec![],
            candidate: 0,
        }
    }
}

/// Computes dependency closures against a [SourceCollection].
#[derive(Clone, Copy)]
pub struct DependencyResolver<'a> {
    sources: &'a SourceCollection,
    follow_recommends: bool,
}

impl<'a> DependencyResolver<'a> {
    pub fn new(sources: &'a SourceCollection) -> Self {
        Self {
            sources,
            follow_recommends: false,
        }
    }

    /// Whether `Recommends` groups are followed in addition to `Depends` and `Pre-Depends`.
    #[must_use]
    pub fn follow_recommends(mut self, value: bool) -> Self {
        self.follow_recommends = value;
        self
    }

    /// Whether any package already in `visited` satisfies a group.
    fn satisfied(&self, group: &DependencyVariants, visited: &PackageSet) -> bool {
        group.iter().any(|dependency| {
            self.sources
                .packages_fulfilling(dependency)
                .any(|p| visited.contains_key(p.id()))
        })
    }

    /// Compute the closure of a package, including the package itself.
    pub fn resolve(&self, root: &Arc<PackageRecord>) -> PackageSet {
        let mut visited = PackageSet::new();
        self.resolve_into(root, &mut visited);

        visited
    }

    /// Extend `visited` with the closure of a package.
    ///
    /// Packages already in `visited` are not descended again and groups they satisfy
    /// are skipped.
    pub fn resolve_into(&self, root: &Arc<PackageRecord>, visited: &mut PackageSet) {
        if visited.contains_key(root.id()) {
            return;
        }

        visited.insert(root.id().clone(), root.clone());
        let mut stack = vec![Frame::new(root.clone())];

        while let Some(frame) = stack.last_mut() {
            if let Some(candidate) = frame.candidates.get(frame.candidate).cloned() {
                frame.candidate += 1;

                if !visited.contains_key(candidate.id()) {
                    debug!("{} pulls in {}", frame.record.id(), candidate.id());
                    visited.insert(candidate.id().clone(), candidate.clone());
                    stack.push(Frame::new(candidate));
                }

                continue;
            }

            let record = frame.record.clone();
            let group = match record
                .relationship_groups(self.follow_recommends)
                .nth(frame.group)
            {
                Some(group) => group,
                None => {
                    stack.pop();
                    continue;
                }
            };

            frame.group += 1;
            frame.candidates.clear();
            frame.candidate = 0;

            if self.satisfied(group, visited) {
                continue;
            }

            let candidates = self.sources.packages_fulfilling_variants(group);
            if candidates.is_empty() {
                warn!(
                    "no package satisfies `{}` required by {}",
                    group,
                    record.id()
                );
                continue;
            }

            frame.candidates = candidates;
        }
    }

    /// Compute the union of the closures of every package matching a request.
    ///
    /// Each matching package is resolved with its own visited set, as if requested alone.
    pub fn resolve_request(&self, request: &PackageRequest) -> PackageSet {
        let mut res = PackageSet::new();

        let roots = self.sources.packages_matching(request);
        if roots.is_empty() {
            warn!("no package matches `{}`", request);
        }

        for root in roots {
            res.extend(self.resolve(&root));
        }

        res
    }
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::{
            error::Result,
            testutil::{collection, record, record_with},
        },
    };

    fn names(set: &PackageSet) -> Vec<String> {
        set.keys()
            .map(|id| format!("{}={}", id.name, id.version))
            .collect()
    }

    #[test]
    fn cycle_terminates() -> Result<()> {
        let sources = collection(vec![vec![
            record_with("a", "1.0", &[("Depends", "b")]),
            record_with("b", "1.0", &[("Depends", "a")]),
        ]]);

        let root = sources.get_package("a", "1.0")?;
        let closure = DependencyResolver::new(&sources).resolve(root);

        assert_eq!(names(&closure), vec!["a=1.0", "b=1.0"]);

        Ok(())
    }

    #[test]
    fn version_constraint_selects_satisfying_candidate() -> Result<()> {
        let sources = collection(vec![vec![
            record_with("a", "1.0", &[("Depends", "b (>= 2.0)")]),
            record("b", "1.0", &[]),
            record("b", "2.0", &[]),
        ]]);

        let closure = DependencyResolver::new(&sources).resolve(sources.get_package("a", "1.0")?);

        assert_eq!(names(&closure), vec!["a=1.0", "b=2.0"]);

        Ok(())
    }

    #[test]
    fn alternatives_only_use_existing_packages() -> Result<()> {
        let sources = collection(vec![vec![
            record_with("a", "1.0", &[("Depends", "x | y")]),
            record("y", "1.0", &[]),
        ]]);

        let closure = DependencyResolver::new(&sources).resolve(sources.get_package("a", "1.0")?);

        assert_eq!(names(&closure), vec!["a=1.0", "y=1.0"]);

        Ok(())
    }

    #[test]
    fn virtual_packages() -> Result<()> {
        let sources = collection(vec![
            vec![record_with("mutt", "2.0", &[("Depends", "mail-transport-agent")])],
            vec![record("postfix", "3.5", &["mail-transport-agent"])],
        ]);

        let closure =
            DependencyResolver::new(&sources).resolve(sources.get_package("mutt", "2.0")?);

        assert_eq!(names(&closure), vec!["mutt=2.0", "postfix=3.5"]);

        Ok(())
    }

    #[test]
    fn unsatisfiable_group_is_skipped() -> Result<()> {
        let sources = collection(vec![vec![
            record_with("a", "1.0", &[("Depends", "missing (>= 1), b")]),
            record("b", "1.0", &[]),
        ]]);

        let closure = DependencyResolver::new(&sources).resolve(sources.get_package("a", "1.0")?);

        assert_eq!(names(&closure), vec!["a=1.0", "b=1.0"]);

        Ok(())
    }

    #[test]
    fn satisfied_group_not_expanded() -> Result<()> {
        // c satisfies `b | c` via the earlier group, so b is never pulled in.
        let sources = collection(vec![vec![
            record_with("a", "1.0", &[("Depends", "c, b | c")]),
            record("b", "1.0", &[]),
            record("c", "1.0", &[]),
        ]]);

        let closure = DependencyResolver::new(&sources).resolve(sources.get_package("a", "1.0")?);

        assert_eq!(names(&closure), vec!["a=1.0", "c=1.0"]);

        Ok(())
    }

    #[test]
    fn pre_depends_and_recommends() -> Result<()> {
        let sources = collection(vec![vec![
            record_with(
                "a",
                "1.0",
                &[("Pre-Depends", "p"), ("Recommends", "r")],
            ),
            record("p", "1.0", &[]),
            record_with("r", "1.0", &[("Depends", "rr")]),
            record("rr", "1.0", &[]),
        ]]);

        let root = sources.get_package("a", "1.0")?;

        let closure = DependencyResolver::new(&sources).resolve(root);
        assert_eq!(names(&closure), vec!["a=1.0", "p=1.0"]);

        let closure = DependencyResolver::new(&sources)
            .follow_recommends(true)
            .resolve(root);
        assert_eq!(names(&closure), vec!["a=1.0", "p=1.0", "r=1.0", "rr=1.0"]);

        Ok(())
    }

    #[test]
    fn all_candidates_are_descended() -> Result<()> {
        let sources = collection(vec![vec![
            record_with("a", "1.0", &[("Depends", "b (>= 1.0)")]),
            record_with("b", "1.0", &[("Depends", "c")]),
            record_with("b", "2.0", &[("Depends", "d")]),
            record("c", "1.0", &[]),
            record("d", "1.0", &[]),
        ]]);

        let closure = DependencyResolver::new(&sources).resolve(sources.get_package("a", "1.0")?);

        assert_eq!(
            names(&closure),
            vec!["a=1.0", "b=1.0", "b=2.0", "c=1.0", "d=1.0"]
        );

        Ok(())
    }

    #[test]
    fn deep_chain() -> Result<()> {
        let depth = 20_000;

        let mut records = (0..depth)
            .map(|i| {
                let dep = format!("p{}", i + 1);
                record_with(&format!("p{}", i), "1.0", &[("Depends", dep.as_str())])
            })
            .collect::<Vec<_>>();
        records.push(record(&format!("p{}", depth), "1.0", &[]));

        let sources = collection(vec![records]);
        let closure = DependencyResolver::new(&sources).resolve(sources.get_package("p0", "1.0")?);

        assert_eq!(closure.len(), depth + 1);

        Ok(())
    }

    #[test]
    fn request_resolution() -> Result<()> {
        let sources = collection(vec![vec![
            record_with("wine", "3.0", &[("Depends", "libwine")]),
            record_with("wine", "4.0", &[("Depends", "libwine (>= 4.0)")]),
            record("libwine", "3.0", &[]),
            record("libwine", "4.0", &[]),
        ]]);

        let resolver = DependencyResolver::new(&sources);

        let closure = resolver.resolve_request(&PackageRequest::parse("wine (>= 4.0)")?);
        assert_eq!(names(&closure), vec!["libwine=4.0", "wine=4.0"]);

        let closure = resolver.resolve_request(&PackageRequest::parse("wine")?);
        assert_eq!(
            names(&closure),
            vec!["libwine=3.0", "libwine=4.0", "wine=3.0", "wine=4.0"]
        );

        assert!(resolver
            .resolve_request(&PackageRequest::parse("nothing")?)
            .is_empty());

        Ok(())
    }
}

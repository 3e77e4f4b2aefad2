//! Container name and index allocation.

use crate::error::Result;
use crate::labels::{container_number, service_filter};
use crate::runtime::RuntimeClient;
use std::collections::BTreeSet;

/// Mints `(name, index)` pairs for new containers of a service.
pub trait Namer: Send {
    fn next(&mut self) -> (String, u32);
}

/// Allocates the lowest index not used by an existing container.
///
/// Scaled instances are named `<project>_<service>_<n>`, one-off instances
/// `<project>_<service>_run_<n>`. The two kinds are numbered independently.
#[derive(Debug, Clone)]
pub struct DefaultNamer {
    prefix: String,
    used: BTreeSet<u32>,
    current: u32,
}

impl DefaultNamer {
    /// Scan the runtime for containers of `service` and start allocating
    /// above the gaps they leave.
    pub async fn new(
        client: &dyn RuntimeClient,
        project: &str,
        service: &str,
        one_off: bool,
    ) -> Result<Self> {
        let existing = client
            .list_containers(&service_filter(project, service, one_off))
            .await?;
        let used = existing
            .iter()
            .map(container_number)
            .collect::<Result<BTreeSet<_>>>()?;

        Ok(Self::with_used(project, service, one_off, used))
    }

    /// A namer that treats `used` as already allocated.
    pub fn with_used(
        project: &str,
        service: &str,
        one_off: bool,
        used: impl IntoIterator<Item = u32>,
    ) -> Self {
        let prefix = if one_off {
            format!("{}_{}_run_", project, service)
        } else {
            format!("{}_{}_", project, service)
        };
        Self {
            prefix,
            used: used.into_iter().collect(),
            current: 1,
        }
    }
}

impl Namer for DefaultNamer {
    fn next(&mut self) -> (String, u32) {
        while self.used.contains(&self.current) {
            self.current += 1;
        }
        let number = self.current;
        self.used.insert(number);
        (format!("{}{}", self.prefix, number), number)
    }
}

/// Always hands out the same custom name with index 1.
#[derive(Debug, Clone)]
pub struct SingleNamer {
    name: String,
}

impl SingleNamer {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Namer for SingleNamer {
    fn next(&mut self) -> (String, u32) {
        (self.name.clone(), 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::labels::{one_off_value, Label};
    use crate::runtime::{ContainerDetails, InMemoryRuntime};
    use proptest::prelude::*;

    fn labelled(name: &str, number: &str, one_off: bool) -> ContainerDetails {
        let mut details = ContainerDetails {
            id: format!("{:064}", name.len()),
            name: name.to_string(),
            ..Default::default()
        };
        for (label, value) in [
            (Label::Project, "app"),
            (Label::Service, "web"),
            (Label::Number, number),
            (Label::OneOff, one_off_value(one_off)),
        ] {
            details
                .labels
                .insert(label.as_str().to_string(), value.to_string());
        }
        details
    }

    #[test]
    fn fills_gaps_from_one() {
        let mut namer = DefaultNamer::with_used("app", "web", false, [1, 3]);
        assert_eq!(namer.next(), ("app_web_2".to_string(), 2));
        assert_eq!(namer.next(), ("app_web_4".to_string(), 4));
        assert_eq!(namer.next(), ("app_web_5".to_string(), 5));
    }

    #[test]
    fn one_off_names_use_run_infix() {
        let mut namer = DefaultNamer::with_used("app", "web", true, []);
        assert_eq!(namer.next(), ("app_web_run_1".to_string(), 1));
    }

    #[test]
    fn single_namer_repeats() {
        let mut namer = SingleNamer::new("custom");
        assert_eq!(namer.next(), ("custom".to_string(), 1));
        assert_eq!(namer.next(), ("custom".to_string(), 1));
    }

    #[tokio::test]
    async fn scan_ignores_the_other_numbering_space() {
        let runtime = InMemoryRuntime::new();
        runtime.insert_container(labelled("app_web_1", "1", false));
        runtime.insert_container(labelled("app_web_run_1", "1", true));

        let mut scaled = DefaultNamer::new(&runtime, "app", "web", false).await.unwrap();
        assert_eq!(scaled.next().1, 2);

        let mut one_off = DefaultNamer::new(&runtime, "app", "web", true).await.unwrap();
        assert_eq!(one_off.next().1, 2);
    }

    #[tokio::test]
    async fn scan_rejects_non_numeric_labels() {
        let runtime = InMemoryRuntime::new();
        runtime.insert_container(labelled("app_web_x", "x", false));

        let err = DefaultNamer::new(&runtime, "app", "web", false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidLabel { .. }));
    }

    proptest! {
        #[test]
        fn allocated_indices_are_fresh_and_minimal(
            used in proptest::collection::btree_set(1u32..40, 0..20),
            count in 1usize..10,
        ) {
            let mut namer = DefaultNamer::with_used("p", "s", false, used.clone());
            let mut taken = used.clone();
            for _ in 0..count {
                let (name, number) = namer.next();
                prop_assert!(!taken.contains(&number));
                prop_assert!(number >= 1);
                let lowest_free = (1..).find(|n| !taken.contains(n)).unwrap();
                prop_assert_eq!(number, lowest_free);
                prop_assert_eq!(name, format!("p_s_{}", number));
                taken.insert(number);
            }
        }
    }
}

//! Retry eligibility for a selection of publish jobs

use super::publishing::{PublishJob, PublishStatus};

/// Anything carrying a publish status
pub trait HasPublishStatus {
    fn publish_status(&self) -> PublishStatus;
}

impl HasPublishStatus for PublishJob {
    fn publish_status(&self) -> PublishStatus {
        self.status
    }
}

impl HasPublishStatus for PublishStatus {
    fn publish_status(&self) -> PublishStatus {
        *self
    }
}

/// Result of partitioning a selection
#[derive(Debug)]
pub struct RetryPlan<'a, J> {
    pub retriable: Vec<&'a J>,
    /// Selected jobs that cannot be retried
    pub conflicts: usize,
}

impl<J> RetryPlan<'_, J> {
    pub fn can_retry(&self) -> bool {
        !self.retriable.is_empty()
    }
}

/// Keep `failed`/`cancelled` jobs; everything else counts as a conflict.
pub fn partition_retriable<J: HasPublishStatus>(selected: &[J]) -> RetryPlan<'_, J> {
    let retriable: Vec<&J> = selected
        .iter()
        .filter(|job| job.publish_status().is_retriable())
        .collect();
    let conflicts = selected.len() - retriable.len();

    RetryPlan {
        retriable,
        conflicts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use PublishStatus::*;

    #[test]
    fn mixed_selection_reports_conflicts() {
        let selected = [Failed, Queued, Cancelled];
        let plan = partition_retriable(&selected);
        assert_eq!(plan.retriable, vec![&Failed, &Cancelled]);
        assert_eq!(plan.conflicts, 1);
        assert!(plan.can_retry());
    }

    #[test]
    fn nothing_retriable_disables_retry() {
        let selected = [Queued, Processing, Published];
        let plan = partition_retriable(&selected);
        assert!(plan.retriable.is_empty());
        assert_eq!(plan.conflicts, 3);
        assert!(!plan.can_retry());
    }

    #[test]
    fn empty_selection_has_no_conflicts() {
        let plan = partition_retriable::<PublishStatus>(&[]);
        assert_eq!(plan.conflicts, 0);
        assert!(!plan.can_retry());
    }

    #[test]
    fn conflicts_plus_retriable_equals_selection() {
        for a in PublishStatus::ALL {
            for b in PublishStatus::ALL {
                let selected = [a, b, Failed];
                let plan = partition_retriable(&selected);
                assert_eq!(plan.retriable.len() + plan.conflicts, selected.len());
                assert!(plan.retriable.iter().all(|s| s.is_retriable()));
            }
        }
    }
}

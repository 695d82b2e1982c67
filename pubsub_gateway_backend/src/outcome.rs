use crate::{error::BackendError, model::MessageId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullOutcome {
    /// Nothing was pulled, so nothing was acknowledged.
    Empty,
    /// This many distinct messages were pulled and acknowledged.
    Acked(usize),
    AckFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeOutcome {
    Subscribed,
    AlreadySubscribed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnsubscribeOutcome {
    Unsubscribed,
    NotSubscribed,
}

/// Tally of a batched publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishSummary {
    pub requested: usize,
    pub published: usize,
    pub first_error: Option<BackendError>,
}

impl PublishSummary {
    pub fn from_results(results: &[Result<MessageId, BackendError>]) -> Self {
        Self {
            requested: results.len(),
            published: results.iter().filter(|r| r.is_ok()).count(),
            first_error: results.iter().find_map(|r| r.as_ref().err().cloned()),
        }
    }

    pub fn failed(&self) -> usize {
        self.requested - self.published
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_counts_failures() {
        let results = vec![
            Ok("1".to_string()),
            Err(BackendError::NotFound("Topic t".to_string())),
            Ok("2".to_string()),
            Err(BackendError::Rpc {
                code: "Unavailable".to_string(),
                message: "try again".to_string(),
            }),
        ];

        let summary = PublishSummary::from_results(&results);
        assert_eq!(summary.requested, 4);
        assert_eq!(summary.published, 2);
        assert_eq!(summary.failed(), 2);
        assert_eq!(
            summary.first_error,
            Some(BackendError::NotFound("Topic t".to_string()))
        );
    }

    #[test]
    fn empty_summary() {
        let summary = PublishSummary::from_results(&[]);
        assert_eq!(summary.requested, 0);
        assert_eq!(summary.failed(), 0);
        assert!(summary.first_error.is_none());
    }
}

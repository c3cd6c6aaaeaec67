use crate::config::ConfigError;

/// How many snapshots a store keeps. Each store applies it independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    keep_last: usize,
}

impl RetentionPolicy {
    pub fn new(keep_last: usize) -> Result<Self, ConfigError> {
        if keep_last == 0 {
            return Err(ConfigError::Invalid(
                "keep_last must be at least 1".to_owned(),
            ));
        }
        Ok(Self { keep_last })
    }

    pub fn keep_last(&self) -> usize {
        self.keep_last
    }

    /// Splits newest-first items into `(kept, discarded)`.
    pub fn split<T>(&self, mut newest_first: Vec<T>) -> (Vec<T>, Vec<T>) {
        if newest_first.len() <= self.keep_last {
            return (newest_first, Vec::new());
        }
        let discarded = newest_first.split_off(self.keep_last);
        (newest_first, discarded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_is_rejected() {
        assert!(RetentionPolicy::new(0).is_err());
        assert_eq!(RetentionPolicy::new(1).unwrap().keep_last(), 1);
    }

    #[test]
    fn split_keeps_the_newest() {
        let policy = RetentionPolicy::new(4).unwrap();
        let (kept, discarded) = policy.split(vec![6, 5, 4, 3, 2, 1]);
        assert_eq!(kept, vec![6, 5, 4, 3]);
        assert_eq!(discarded, vec![2, 1]);
    }

    #[test]
    fn split_at_or_below_limit_discards_nothing() {
        let policy = RetentionPolicy::new(3).unwrap();
        assert_eq!(policy.split(vec![3, 2, 1]), (vec![3, 2, 1], vec![]));
        assert_eq!(policy.split(vec![1]), (vec![1], vec![]));
        assert_eq!(policy.split(Vec::<u8>::new()), (vec![], vec![]));
    }
}

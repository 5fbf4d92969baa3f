//! Classification of reaction errors as recoverable or not.

use std::error::Error as StdError;

use crate::retry::RecoverableType;

type Classifier = Box<dyn Fn(&(dyn StdError + 'static)) -> Option<RecoverableType> + Send + Sync>;

/// Maps error types to a [`RecoverableType`].
///
/// Classification walks the `anyhow` cause chain from the outermost error
/// inwards and returns the first match. Later registrations take precedence
/// over earlier ones. Errors nobody registered are `Unknown`.
pub struct RecoverableRegistry {
    classifiers: Vec<Classifier>,
}

impl RecoverableRegistry {
    /// A registry without any classifier.
    pub fn empty() -> Self {
        Self {
            classifiers: Vec::new(),
        }
    }

    /// Classifies every error of type `E`.
    pub fn register<E>(&mut self, recoverable: RecoverableType) -> &mut Self
    where
        E: StdError + 'static,
    {
        self.register_with(move |error| error.downcast_ref::<E>().map(|_| recoverable))
    }

    /// Classifies errors with a custom predicate.
    pub fn register_with<F>(&mut self, classifier: F) -> &mut Self
    where
        F: Fn(&(dyn StdError + 'static)) -> Option<RecoverableType> + Send + Sync + 'static,
    {
        self.classifiers.push(Box::new(classifier));
        self
    }

    pub fn classify(&self, error: &anyhow::Error) -> RecoverableType {
        error
            .chain()
            .find_map(|cause| self.classifiers.iter().rev().find_map(|c| c(cause)))
            .unwrap_or_default()
    }
}

impl Default for RecoverableRegistry {
    /// Timeouts are recoverable.
    fn default() -> Self {
        let mut registry = Self::empty();
        registry
            .register::<tokio::time::error::Elapsed>(RecoverableType::Recoverable)
            .register_with(|error| {
                error
                    .downcast_ref::<std::io::Error>()
                    .filter(|e| e.kind() == std::io::ErrorKind::TimedOut)
                    .map(|_| RecoverableType::Recoverable)
            });
        registry
    }
}

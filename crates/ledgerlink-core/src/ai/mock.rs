//! Mock classifier backend for testing

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::{Error, Result};

use super::{Classification, ClassificationRequest, ClassifierBackend};

#[derive(Default)]
struct MockState {
    responses: HashMap<String, Classification>,
    calls: u64,
    last_example_count: usize,
    fail: bool,
}

/// Programmable in-process classifier
#[derive(Clone, Default)]
pub struct MockClassifier {
    state: Arc<Mutex<MockState>>,
}

impl MockClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Program the verdict for a merchant (matched case-insensitively)
    pub fn set_response(
        &self,
        merchant: &str,
        category: &str,
        subcategory: Option<&str>,
        confidence: f64,
    ) {
        self.state.lock().unwrap().responses.insert(
            merchant.to_lowercase(),
            Classification {
                category: category.to_string(),
                subcategory: subcategory.map(|s| s.to_string()),
                confidence,
            },
        );
    }

    /// Make every classify call fail, to exercise fallback paths
    pub fn set_failing(&self, fail: bool) {
        self.state.lock().unwrap().fail = fail;
    }

    /// Number of classify calls observed
    pub fn calls(&self) -> u64 {
        self.state.lock().unwrap().calls
    }

    /// Example count of the most recent classify call
    pub fn last_example_count(&self) -> usize {
        self.state.lock().unwrap().last_example_count
    }
}

#[async_trait]
impl ClassifierBackend for MockClassifier {
    async fn classify(&self, request: &ClassificationRequest) -> Result<Classification> {
        let mut state = self.state.lock().unwrap();
        state.calls += 1;
        state.last_example_count = request.examples.len();

        if state.fail {
            return Err(Error::Upstream("classifier unavailable".to_string()));
        }

        let key = request
            .merchant
            .as_deref()
            .unwrap_or(&request.description)
            .to_lowercase();

        Ok(state.responses.get(&key).cloned().unwrap_or(Classification {
            category: "other".to_string(),
            subcategory: None,
            confidence: 0.3,
        }))
    }

    async fn health_check(&self) -> bool {
        !self.state.lock().unwrap().fail
    }
}

//! Transaction categorization
//!
//! Three sources, in order of authority:
//! 1. User corrections. Authoritative, never overwritten by the pipeline.
//! 2. The classification service, when its confidence clears the gate.
//! 3. The regex rule table, which always produces something.
//!
//! The classifier receives up to five of the user's previously categorized
//! transactions as examples, picked by merchant/amount/description
//! similarity.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use tracing::{debug, warn};

use crate::ai::{
    ClassificationExample, ClassificationRequest, ClassifierBackend, ClassifierClient,
};
use crate::db::Database;
use crate::error::Result;
use crate::models::{CategorizedBy, Transaction};

/// Minimum classifier confidence to accept its verdict
pub const CONFIDENCE_GATE: f64 = 0.7;

/// Maximum examples sent with a classification request
const MAX_EXAMPLES: usize = 5;

/// Category assigned when nothing else matches
const FALLBACK_CATEGORY: &str = "other";
const FALLBACK_CONFIDENCE: f64 = 0.6;

struct Rule {
    pattern: Regex,
    category: &'static str,
    subcategory: Option<&'static str>,
    business: bool,
    confidence: f64,
}

fn rule(pattern: &str, category: &'static str, subcategory: Option<&'static str>, confidence: f64) -> Rule {
    Rule {
        pattern: Regex::new(pattern).expect("static rule pattern"),
        category,
        subcategory,
        business: false,
        confidence,
    }
}

fn business_rule(
    pattern: &str,
    category: &'static str,
    subcategory: Option<&'static str>,
    confidence: f64,
) -> Rule {
    Rule {
        business: true,
        ..rule(pattern, category, subcategory, confidence)
    }
}

/// Built once; matched against lowercased merchant + description
fn rule_table() -> &'static [Rule] {
    static RULES: OnceLock<Vec<Rule>> = OnceLock::new();
    RULES.get_or_init(|| {
        vec![
            rule(
                r"netflix|spotify|disney\+?|hbo|prime video|youtube premium|audible",
                "entertainment",
                Some("streaming"),
                0.95,
            ),
            rule(r"steam|playstation|nintendo|xbox", "entertainment", Some("gaming"), 0.9),
            rule(
                r"lidl|aldi|rewe|edeka|tesco|carrefour|albert heijn|grocer|supermarkt|supermarket",
                "groceries",
                None,
                0.9,
            ),
            rule(
                r"restaurant|pizzeria|pizza|burger|sushi|cafe|coffee|starbucks|mcdonald|kfc|subway|deliveroo|lieferando|doordash",
                "dining",
                None,
                0.85,
            ),
            rule(r"uber|lyft|bolt\.eu|taxi|free now", "transport", Some("rideshare"), 0.9),
            rule(r"shell|aral|esso|total energies|petrol|tankstelle|\bfuel\b", "transport", Some("fuel"), 0.9),
            rule(r"bahn|railway|metro|transit|bvg|mvv|\btram\b", "transport", Some("public"), 0.85),
            rule(r"amazon|ebay|zalando|etsy|ikea|mediamarkt", "shopping", None, 0.85),
            rule(
                r"apotheke|pharmacy|drogerie|\bdm\b|rossmann|doctor|praxis|dental|clinic|hospital",
                "health",
                None,
                0.9,
            ),
            rule(r"gym|fitness|mcfit|urban sports", "health", Some("fitness"), 0.9),
            rule(r"\brent\b|\bmiete\b|landlord|immobilien", "housing", Some("rent"), 0.9),
            rule(
                r"stadtwerke|electricit|strom|gas\b|wasser|vodafone|telekom|\bo2\b|internet|broadband",
                "utilities",
                None,
                0.85,
            ),
            rule(r"versicherung|insurance|allianz|\baxa\b|huk", "insurance", None, 0.9),
            rule(r"salary|payroll|gehalt|lohn", "income", Some("salary"), 0.95),
            rule(r"udemy|coursera|university|tuition|schule", "education", None, 0.85),
            business_rule(
                r"aws|amazon web services|hetzner|digitalocean|google cloud|github|gitlab",
                "software",
                Some("hosting"),
                0.9,
            ),
            business_rule(r"slack|notion|atlassian|zoom\.us|figma", "software", Some("saas"), 0.85),
        ]
    })
}

struct RuleMatch {
    category: &'static str,
    subcategory: Option<&'static str>,
    business: bool,
    confidence: f64,
}

/// Match a transaction against the rule table. First match wins.
fn match_rules(tx: &Transaction) -> RuleMatch {
    let haystack = format!(
        "{} {}",
        tx.merchant.as_deref().unwrap_or(""),
        tx.description
    )
    .to_lowercase();

    for rule in rule_table() {
        if rule.pattern.is_match(&haystack) {
            return RuleMatch {
                category: rule.category,
                subcategory: rule.subcategory,
                business: rule.business,
                confidence: rule.confidence,
            };
        }
    }
    RuleMatch {
        category: FALLBACK_CATEGORY,
        subcategory: None,
        business: false,
        confidence: FALLBACK_CONFIDENCE,
    }
}

fn tokens(s: &str) -> HashSet<String> {
    s.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}

/// Whether a candidate example is similar enough to offer as context:
/// overlapping merchant tokens, an amount within 10%, or shared long
/// description words.
fn is_similar(tx: &Transaction, candidate: &Transaction) -> bool {
    if let (Some(a), Some(b)) = (tx.merchant.as_deref(), candidate.merchant.as_deref()) {
        let ta = tokens(a);
        let tb = tokens(b);
        let intersection = ta.intersection(&tb).count();
        let union = ta.union(&tb).count();
        if union > 0 && (intersection as f64 / union as f64) >= 0.5 {
            return true;
        }
    }

    if tx.amount > 0.0 && (tx.amount - candidate.amount).abs() / tx.amount <= 0.10 {
        return true;
    }

    let desc_a: HashSet<String> = tokens(&tx.description)
        .into_iter()
        .filter(|t| t.len() > 3)
        .collect();
    let desc_b: HashSet<String> = tokens(&candidate.description)
        .into_iter()
        .filter(|t| t.len() > 3)
        .collect();
    desc_a.intersection(&desc_b).next().is_some()
}

/// One item of a bulk correction
#[derive(Debug, Clone, serde::Deserialize)]
pub struct CategoryUpdate {
    pub transaction_id: i64,
    pub category: String,
    #[serde(default)]
    pub subcategory: Option<String>,
}

/// Categorizes transactions with the classifier + rule fallback
pub struct CategorizationEngine<'a> {
    db: &'a Database,
    classifier: Option<&'a ClassifierClient>,
}

impl<'a> CategorizationEngine<'a> {
    pub fn new(db: &'a Database, classifier: Option<&'a ClassifierClient>) -> Self {
        Self { db, classifier }
    }

    /// Categorize one transaction through the machine path.
    ///
    /// No-op when the user has already categorized it. Classifier verdicts
    /// below the gate, and classifier failures, fall back to the rule table;
    /// a transaction never leaves here uncategorized.
    pub async fn auto_categorize(&self, tx: &Transaction) -> Result<()> {
        if tx.categorized_by == Some(CategorizedBy::User) {
            return Ok(());
        }

        if let Some(classifier) = self.classifier {
            let examples = self.select_examples(tx)?;
            let request = ClassificationRequest {
                description: tx.description.clone(),
                merchant: tx.merchant.clone(),
                amount: tx.amount,
                direction: tx.direction.to_string(),
                examples,
            };

            match classifier.classify(&request).await {
                Ok(verdict) if verdict.confidence >= CONFIDENCE_GATE => {
                    self.db.update_categorization(
                        tx.id,
                        &verdict.category,
                        verdict.subcategory.as_deref(),
                        verdict.confidence,
                        CategorizedBy::Ml,
                    )?;
                    return Ok(());
                }
                Ok(verdict) => {
                    debug!(
                        transaction_id = tx.id,
                        confidence = verdict.confidence,
                        "Classifier below gate, using rules"
                    );
                }
                Err(e) => {
                    warn!(transaction_id = tx.id, error = %e, "Classifier failed, using rules");
                }
            }
        }

        let matched = match_rules(tx);
        self.db.update_categorization(
            tx.id,
            matched.category,
            matched.subcategory,
            matched.confidence,
            CategorizedBy::Auto,
        )?;
        if matched.business {
            self.db.set_transaction_business(tx.id, true)?;
        }
        Ok(())
    }

    /// Apply a user correction. Records the correction in the feedback log,
    /// marks the transaction user-categorized with full confidence, and
    /// optionally relabels the merchant's other machine-categorized rows.
    /// Returns the updated transaction and the number of relabeled rows.
    pub async fn apply_user_correction(
        &self,
        user_id: &str,
        transaction_id: i64,
        category: &str,
        subcategory: Option<&str>,
        apply_to_similar: bool,
    ) -> Result<(Transaction, usize)> {
        let tx = self.db.get_owned_transaction(transaction_id, user_id)?;

        self.db.insert_category_feedback(
            user_id,
            transaction_id,
            tx.merchant.as_deref(),
            &tx.description,
            tx.amount,
            tx.category.as_deref(),
            category,
            subcategory,
        )?;

        self.db.update_categorization(
            transaction_id,
            category,
            subcategory,
            1.0,
            CategorizedBy::User,
        )?;

        let mut relabeled = 0;
        if apply_to_similar {
            if let Some(merchant) = tx.merchant.as_deref() {
                relabeled = self.db.relabel_merchant_transactions(
                    user_id,
                    merchant,
                    category,
                    subcategory,
                    transaction_id,
                )?;
            }
        }

        let updated = self.db.get_owned_transaction(transaction_id, user_id)?;
        Ok((updated, relabeled))
    }

    /// Apply a batch of corrections. Failures on individual items abort the
    /// batch; callers get the total relabel count on success.
    pub async fn bulk_categorize(
        &self,
        user_id: &str,
        updates: &[CategoryUpdate],
        apply_to_similar: bool,
    ) -> Result<usize> {
        let mut relabeled = 0;
        for update in updates {
            let (_, n) = self
                .apply_user_correction(
                    user_id,
                    update.transaction_id,
                    &update.category,
                    update.subcategory.as_deref(),
                    apply_to_similar,
                )
                .await?;
            relabeled += n;
        }
        Ok(relabeled)
    }

    /// Pick up to five similar categorized transactions as examples
    fn select_examples(&self, tx: &Transaction) -> Result<Vec<ClassificationExample>> {
        let candidates = self.db.list_categorized_examples(&tx.user_id, 200)?;
        Ok(candidates
            .iter()
            .filter(|c| c.id != tx.id && is_similar(tx, c))
            .take(MAX_EXAMPLES)
            .map(|c| ClassificationExample {
                merchant: c.merchant.clone(),
                description: c.description.clone(),
                amount: c.amount,
                category: c.category.clone().unwrap_or_default(),
                subcategory: c.subcategory.clone(),
            })
            .collect())
    }
}

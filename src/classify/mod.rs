// Keyword-based financial document classification
//
// A pure lookup over per-language regex tables: detect the language by
// keyword, then tag invoice/expense words, dates, and monetary amounts.
// Deliberately fail-open: an internal failure yields a neutral result,
// never an error.

use regex::Regex;
use std::collections::BTreeSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::warn;

use crate::core::errors::ConfigError;

/// Classification tags, serialized in this order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Tag {
    InvoiceExpense,
    Date,
    MonetaryAmount,
}

impl Tag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tag::InvoiceExpense => "Invoice/Expense",
            Tag::Date => "Date",
            Tag::MonetaryAmount => "Monetary Amount",
        }
    }
}

/// Result of classifying one document's text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub is_financial: bool,
    /// Detected language code, "unknown" when no keyword table matches,
    /// empty when classification itself failed
    pub language: String,
    pub tags: BTreeSet<Tag>,
}

impl Classification {
    fn unknown() -> Self {
        Self {
            is_financial: false,
            language: "unknown".to_string(),
            tags: BTreeSet::new(),
        }
    }

    fn neutral() -> Self {
        Self {
            is_financial: false,
            language: String::new(),
            tags: BTreeSet::new(),
        }
    }

    pub fn keywords(&self) -> Vec<String> {
        self.tags.iter().map(|t| t.as_str().to_string()).collect()
    }
}

/// Financial keyword tables per language, plus date and currency patterns.
/// Language detection order follows table order.
pub struct FinancialDocumentClassifier {
    keywords: Vec<(&'static str, Vec<Regex>)>,
    date_pattern: Regex,
    currency_pattern: Regex,
}

impl FinancialDocumentClassifier {
    pub fn new() -> Result<Self, ConfigError> {
        let tables: [(&'static str, &[&str]); 6] = [
            (
                "he",
                &[
                    r"(?i)\b(חשבונית|הוצאה|סכום לתשלום|החזר|תשלום|חשבונית מס|קבלה)\b",
                    r"(?i)\b(מעמ|מע״מ|מס ערך מוסף|שיעור מע״מ|לא כולל מע״מ)\b",
                ],
            ),
            ("en", &[r"(?i)\b(invoice|receipt|payment|total|amount|tax|vat)\b"]),
            ("es", &[r"(?i)\b(factura|recibo|pago|total|cantidad|impuesto|iva)\b"]),
            ("fr", &[r"(?i)\b(facture|reçu|paiement|total|montant|taxe|tva)\b"]),
            ("de", &[r"(?i)\b(Rechnung|Quittung|Zahlung|Gesamt|Betrag|Steuer|MwSt)\b"]),
            ("it", &[r"(?i)\b(fattura|ricevuta|pagamento|totale|importo|tassa|iva)\b"]),
        ];

        let mut keywords = Vec::with_capacity(tables.len());
        for (lang, patterns) in tables {
            let compiled = patterns
                .iter()
                .map(|p| Regex::new(p))
                .collect::<Result<Vec<_>, _>>()?;
            keywords.push((lang, compiled));
        }

        // dd/mm/yyyy, dd-mm-yyyy, yyyy-mm-dd, yyyy/mm/dd
        let date_pattern = Regex::new(r"\b(\d{2}[/-]\d{2}[/-]\d{4}|\d{4}[-/]\d{2}[-/]\d{2})\b")?;
        // Optional currency symbol followed by a grouped amount
        let currency_pattern =
            Regex::new(r"\b(?:₪|\$|€|£)?\s?\d{1,3}(?:,\d{3})*(?:\.\d{2})?\b")?;

        Ok(Self {
            keywords,
            date_pattern,
            currency_pattern,
        })
    }

    /// First keyword table with a match wins
    fn detect_language(&self, text: &str) -> Option<&'static str> {
        for (lang, patterns) in &self.keywords {
            if patterns.iter().any(|p| p.is_match(text)) {
                return Some(lang);
            }
        }
        None
    }

    /// Classify a document's text. Never fails: an internal panic is
    /// swallowed and reported as a neutral result for compatibility with
    /// callers that treat classification as advisory.
    pub fn classify(&self, text: &str) -> Classification {
        catch_unwind(AssertUnwindSafe(|| self.classify_impl(text))).unwrap_or_else(|_| {
            warn!("Classifier failure swallowed; returning neutral result");
            Classification::neutral()
        })
    }

    fn classify_impl(&self, text: &str) -> Classification {
        let Some(lang) = self.detect_language(text) else {
            return Classification::unknown();
        };

        let mut tags = BTreeSet::new();

        let table = self
            .keywords
            .iter()
            .find(|(l, _)| *l == lang)
            .map(|(_, patterns)| patterns);
        if let Some(patterns) = table {
            if patterns.iter().any(|p| p.is_match(text)) {
                tags.insert(Tag::InvoiceExpense);
            }
        }

        // Dates and amounts only count once a keyword language is detected
        if self.date_pattern.is_match(text) {
            tags.insert(Tag::Date);
        }
        if self.currency_pattern.is_match(text) {
            tags.insert(Tag::MonetaryAmount);
        }

        Classification {
            is_financial: !tags.is_empty(),
            language: lang.to_string(),
            tags,
        }
    }
}

//! Shape and structure checks for the stored document.
//!
//! Parsing rejects anything that does not match the record types exactly (missing fields,
//! wrong types, unknown fields). `validate` then checks what the types cannot express.

use std::collections::HashSet;
use std::ops::RangeInclusive;
use std::path::Path;

use crate::error::{SchemaError, SchemaViolation, StoreError};
use crate::model::Document;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaRules {
    pub track_range: RangeInclusive<u32>,
}

impl Default for SchemaRules {
    fn default() -> Self {
        Self { track_range: 1..=99 }
    }
}

pub fn parse_document(path: &Path, bytes: &[u8]) -> Result<Document, StoreError> {
    serde_json::from_slice::<Document>(bytes).map_err(|source| StoreError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

pub fn validate(doc: &Document, rules: &SchemaRules) -> Result<(), SchemaError> {
    let mut violations: Vec<SchemaViolation> = Vec::new();
    let mut push = |path: String, message: String| violations.push(SchemaViolation { path, message });

    let mut ids = HashSet::new();
    let mut customer_numbers = HashSet::new();
    let mut invoice_numbers = HashSet::new();
    let mut highest_invoice: u32 = 0;

    for (ci, c) in doc.customers.iter().enumerate() {
        let at = format!("customers[{ci}]");

        if c.id.is_nil() {
            push(format!("{at}.id"), "must not be the nil id".to_string());
        }
        if !ids.insert(c.id) {
            push(format!("{at}.id"), format!("duplicate id {}", c.id));
        }
        if c.customer_number == 0 {
            push(format!("{at}.customerNumber"), "must be positive".to_string());
        } else if !customer_numbers.insert(c.customer_number) {
            push(
                format!("{at}.customerNumber"),
                format!("duplicate customer number {}", c.customer_number),
            );
        }

        for (si, s) in c.subscriptions.iter().enumerate() {
            if !rules.track_range.contains(&s.track_number) {
                push(
                    format!("{at}.subscriptions[{si}].trackNumber"),
                    format!(
                        "{} outside {}..={}",
                        s.track_number,
                        rules.track_range.start(),
                        rules.track_range.end()
                    ),
                );
            }
        }

        for (ii, inv) in c.invoices.iter().enumerate() {
            let inv_at = format!("{at}.invoices[{ii}]");
            if inv.invoice_number == 0 {
                push(format!("{inv_at}.invoiceNumber"), "must be positive".to_string());
            } else if !invoice_numbers.insert(inv.invoice_number) {
                push(
                    format!("{inv_at}.invoiceNumber"),
                    format!("duplicate invoice number {}", inv.invoice_number),
                );
            }
            highest_invoice = highest_invoice.max(inv.invoice_number);
            if inv.due_date < inv.created_date {
                push(format!("{inv_at}.dueDate"), "before createdDate".to_string());
            }
            if inv.relative_file_path.trim().is_empty() {
                push(format!("{inv_at}.relativeFilePath"), "must not be empty".to_string());
            }
        }
    }

    if doc.current_invoice_number < highest_invoice {
        push(
            "currentInvoiceNumber".to_string(),
            format!(
                "{} is below highest invoice number {}",
                doc.current_invoice_number, highest_invoice
            ),
        );
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(SchemaError { violations })
    }
}

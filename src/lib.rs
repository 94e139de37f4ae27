//! Customer, subscription and invoice records for a small club.
//!
//! The dataset lives in one JSON document on local disk, is backed up on every load and
//! rewritten atomically on every save. See [`repository`] for the single-process
//! constraint.

pub mod backup;
pub mod config;
pub mod error;
pub mod invoice_pdf;
pub mod model;
pub mod period;
pub mod repository;
pub mod schema;

pub use config::{Config, StorePaths};
pub use error::{SchemaError, SchemaViolation, StoreError};
pub use invoice_pdf::PdfInvoiceBuilder;
pub use model::{
    Counters, Customer, CustomerInfo, Document, Invoice, InvoiceStatus, Subscription, Weekday,
};
pub use period::{compute_period, BillingPeriod, PeriodError};
pub use repository::{
    generate_invoices_in_background, GenerationReport, InvoiceBuilder, Repository,
    RepositorySettings,
};
pub use schema::SchemaRules;

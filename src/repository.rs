//! The record store.
//!
//! One `Repository` is built at process start and shared (`Arc<Repository>`) with every
//! collaborator that needs records. It owns the whole document behind a single mutex and
//! rewrites the complete file on every save.
//!
//! Constraint: exactly one process may use a data directory at a time. No OS-level file
//! locking is taken; two processes on the same directory will overwrite each other and
//! can hand out the same numbers.

use std::fs::{self, File};
use std::io::Write as _;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use time::{OffsetDateTime, Time};
use uuid::Uuid;

use crate::backup;
use crate::config::{Config, StorePaths};
use crate::error::StoreError;
use crate::model::{Counters, Customer, Document, Invoice, InvoiceStatus, Subscription, Weekday};
use crate::schema::{self, SchemaRules};

/// Produces one invoice (and its external artifact) for a customer.
///
/// Implementations get invoice numbers from `Repository::new_invoice_number`. They run
/// while the repository holds its generation lock, so they must not call record-edit
/// operations such as `save_customer`.
pub trait InvoiceBuilder: Send + Sync {
    fn build(
        &self,
        repo: &Repository,
        customer: &Customer,
        due_days: u32,
        use_next_period: bool,
    ) -> Result<Invoice, StoreError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerationReport {
    /// Artifact paths relative to the data directory, in customer order.
    pub files: Vec<String>,
    /// Customers whose invoice covered no subscription.
    pub empty_invoice_customers: Vec<Customer>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositorySettings {
    pub initial_number: u32,
    pub rules: SchemaRules,
}

impl From<&Config> for RepositorySettings {
    fn from(config: &Config) -> Self {
        Self {
            initial_number: config.initial_number,
            rules: config.schema_rules(),
        }
    }
}

pub struct Repository {
    paths: StorePaths,
    settings: RepositorySettings,
    doc: Mutex<Document>,
    /// Held by record edits and for the whole of an invoice generation run.
    /// Lock order: `write_lock`, then `doc`.
    write_lock: Mutex<()>,
}

impl Repository {
    pub fn load(config: &Config) -> Result<Self, StoreError> {
        let paths = config.resolve_paths()?;
        Self::open(paths, RepositorySettings::from(config))
    }

    /// Open the store at `paths`. An existing data file is backed up, parsed and
    /// validated; any parse or validation failure is fatal. A missing file is an empty
    /// dataset with both counters at `initial_number`.
    pub fn open(paths: StorePaths, settings: RepositorySettings) -> Result<Self, StoreError> {
        fs::create_dir_all(&paths.data_dir).map_err(|source| StoreError::DataDir {
            path: paths.data_dir.clone(),
            source,
        })?;

        let doc = if paths.data_file.exists() {
            if let Err(e) = backup::backup_data_file(&paths.data_file, &paths.backup_dir, now()) {
                log::warn!("[backup] skipped: {e}");
            }
            let bytes = fs::read(&paths.data_file).map_err(|e| StoreError::io(&paths.data_file, e))?;
            let doc = schema::parse_document(&paths.data_file, &bytes)?;
            schema::validate(&doc, &settings.rules)?;
            log::info!(
                "Loaded {} customer(s) from {} (customer #{}, invoice #{})",
                doc.customers.len(),
                paths.data_file.display(),
                doc.current_customer_number,
                doc.current_invoice_number
            );
            doc
        } else {
            log::info!(
                "No data file at {}, starting empty at {}",
                paths.data_file.display(),
                settings.initial_number
            );
            Document::empty(settings.initial_number)
        };

        Ok(Self {
            paths,
            settings,
            doc: Mutex::new(doc),
            write_lock: Mutex::new(()),
        })
    }

    pub fn paths(&self) -> &StorePaths {
        &self.paths
    }

    pub fn settings(&self) -> &RepositorySettings {
        &self.settings
    }

    pub fn counters(&self) -> Result<Counters, StoreError> {
        Ok(self.doc()?.counters())
    }

    /// Snapshot of all customers in stored order.
    pub fn customers(&self) -> Result<Vec<Customer>, StoreError> {
        Ok(self.doc()?.customers.clone())
    }

    /// Live access to the customer list. Changes stay in memory until `save` is called.
    pub fn with_customers_mut<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Vec<Customer>) -> T,
    {
        let _wg = self.write_lock.lock()?;
        let mut doc = self.doc()?;
        Ok(f(&mut doc.customers))
    }

    pub fn get_customer(&self, id: &Uuid) -> Result<Option<Customer>, StoreError> {
        Ok(self.doc()?.customers.iter().find(|c| c.id == *id).cloned())
    }

    /// Advance the customer counter past any number already taken and return it.
    /// Durable only after the next save.
    pub fn new_customer_number(&self) -> Result<u32, StoreError> {
        let mut doc = self.doc()?;
        let mut number = doc.current_customer_number;
        loop {
            number = number
                .checked_add(1)
                .ok_or(StoreError::CounterExhausted("customer"))?;
            if !doc.customers.iter().any(|c| c.customer_number == number) {
                break;
            }
        }
        doc.current_customer_number = number;
        log::debug!("Allocated customer number {number}");
        Ok(number)
    }

    /// Increment the invoice counter and persist the whole document before returning,
    /// so the number survives a crash before the invoice itself is saved.
    ///
    /// An empty dataset has no file to hold the counter, so a number is only handed
    /// out while at least one customer exists.
    pub fn new_invoice_number(&self) -> Result<u32, StoreError> {
        let mut doc = self.doc()?;
        if doc.customers.is_empty() {
            return Err(StoreError::NoCustomers);
        }
        let previous = doc.current_invoice_number;
        let number = previous
            .checked_add(1)
            .ok_or(StoreError::CounterExhausted("invoice"))?;
        doc.current_invoice_number = number;
        if let Err(e) = self.save_locked(&doc) {
            doc.current_invoice_number = previous;
            return Err(e);
        }
        log::debug!("Allocated invoice number {number}");
        Ok(number)
    }

    /// Blank customer with a fresh id. The customer number is left at 0 for the caller
    /// to fill, typically from `new_customer_number`.
    pub fn create_customer(&self) -> Customer {
        Customer::new(0)
    }

    pub fn create_subscription(&self) -> Subscription {
        Subscription {
            track_number: *self.settings.rules.track_range.start(),
            weekday: Weekday::Monday,
            start_time: Time::MIDNIGHT,
        }
    }

    /// Blank invoice dated today. Always consumes (and persists) an invoice number, so it
    /// fails on an empty dataset like `new_invoice_number`.
    pub fn create_invoice(&self) -> Result<Invoice, StoreError> {
        let invoice_number = self.new_invoice_number()?;
        let today = now().date();
        Ok(Invoice {
            invoice_number,
            status: InvoiceStatus::New,
            created_date: today,
            due_date: today,
            period_start_date: None,
            relative_file_path: String::new(),
        })
    }

    /// Insert a new customer or replace the stored record with the same id, then save.
    pub fn save_customer(&self, customer: Customer) -> Result<(), StoreError> {
        let _wg = self.write_lock.lock()?;
        let mut doc = self.doc()?;

        if doc
            .customers
            .iter()
            .any(|c| c.id != customer.id && c.customer_number == customer.customer_number)
        {
            return Err(StoreError::DuplicateCustomerNumber(customer.customer_number));
        }

        // Validate and write a candidate first so a rejected record never lingers in memory.
        let mut next = doc.clone();
        next.current_customer_number = next.current_customer_number.max(customer.customer_number);
        match next.customers.iter_mut().find(|c| c.id == customer.id) {
            Some(existing) => *existing = customer,
            None => {
                log::info!("Adding customer #{} ({})", customer.customer_number, customer.id);
                next.customers.push(customer);
            }
        }
        self.save_locked(&next)?;
        *doc = next;
        Ok(())
    }

    /// Remove the customer with `id` and everything it owns, then save. Returns whether
    /// a customer was removed; an unknown id is not an error.
    pub fn delete_customer(&self, id: &Uuid) -> Result<bool, StoreError> {
        let _wg = self.write_lock.lock()?;
        let mut doc = self.doc()?;

        let mut next = doc.clone();
        let removed = match next.customers.iter().position(|c| c.id == *id) {
            Some(idx) => {
                let c = next.customers.remove(idx);
                log::info!("Deleted customer #{} ({})", c.customer_number, c.id);
                true
            }
            None => false,
        };
        self.save_locked(&next)?;
        *doc = next;
        Ok(removed)
    }

    /// Attach an invoice without saving. Returns false when the customer is unknown.
    pub fn add_invoice_to_customer(&self, id: &Uuid, invoice: Invoice) -> Result<bool, StoreError> {
        let mut doc = self.doc()?;
        Ok(attach_invoice(&mut doc, id, invoice))
    }

    pub fn set_invoice_status(
        &self,
        id: &Uuid,
        invoice_number: u32,
        status: InvoiceStatus,
    ) -> Result<bool, StoreError> {
        let _wg = self.write_lock.lock()?;
        let mut doc = self.doc()?;

        let mut next = doc.clone();
        let Some(invoice) = next
            .customers
            .iter_mut()
            .find(|c| c.id == *id)
            .and_then(|c| c.invoices.iter_mut().find(|i| i.invoice_number == invoice_number))
        else {
            return Ok(false);
        };
        invoice.status = status;
        self.save_locked(&next)?;
        *doc = next;
        Ok(true)
    }

    /// Build one invoice per customer, attach each to its customer and save once.
    ///
    /// Record edits wait until the run finishes. If the builder fails, invoices already
    /// attached are saved (their artifacts exist) and the builder's error is returned.
    pub fn generate_invoices_for_all_customers(
        &self,
        builder: &dyn InvoiceBuilder,
        due_days: u32,
        use_next_period: bool,
    ) -> Result<GenerationReport, StoreError> {
        let _generation = self.write_lock.lock()?;
        let customers = self.doc()?.customers.clone();
        log::info!(
            "Generating invoices for {} customer(s), due in {} day(s), {} period",
            customers.len(),
            due_days,
            if use_next_period { "next" } else { "current" }
        );

        let mut report = GenerationReport::default();
        for customer in &customers {
            let invoice = match builder.build(self, customer, due_days, use_next_period) {
                Ok(invoice) => invoice,
                Err(e) => {
                    log::error!("Invoice for customer #{} failed: {e}", customer.customer_number);
                    if !report.files.is_empty() {
                        let doc = self.doc()?;
                        if let Err(save_err) = self.save_locked(&doc) {
                            log::error!("Saving partial generation failed: {save_err}");
                        }
                    }
                    return Err(e);
                }
            };

            if customer.subscriptions.is_empty() {
                log::warn!(
                    "Invoice {} for customer #{} covers no subscriptions",
                    invoice.invoice_number,
                    customer.customer_number
                );
                report.empty_invoice_customers.push(customer.clone());
            }
            report.files.push(invoice.relative_file_path.clone());

            let mut doc = self.doc()?;
            attach_invoice(&mut doc, &customer.id, invoice);
        }

        let doc = self.doc()?;
        self.save_locked(&doc)?;
        log::info!("Generated {} invoice(s)", report.files.len());
        Ok(report)
    }

    /// Validate and write the whole document. An empty customer list removes the file.
    pub fn save(&self) -> Result<(), StoreError> {
        let doc = self.doc()?;
        self.save_locked(&doc)
    }

    fn doc(&self) -> Result<MutexGuard<'_, Document>, StoreError> {
        Ok(self.doc.lock()?)
    }

    fn save_locked(&self, doc: &Document) -> Result<(), StoreError> {
        let path = &self.paths.data_file;

        if doc.customers.is_empty() {
            match fs::remove_file(path) {
                Ok(()) => log::info!("No customers left, removed {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(StoreError::io(path, e)),
            }
            return Ok(());
        }

        schema::validate(doc, &self.settings.rules)?;
        let payload = serde_json::to_vec_pretty(doc).map_err(|e| StoreError::Write {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        fs::create_dir_all(&self.paths.data_dir).map_err(|source| StoreError::DataDir {
            path: self.paths.data_dir.clone(),
            source,
        })?;
        write_atomic(path, &payload)
    }
}

/// Run a generation off the calling thread.
pub async fn generate_invoices_in_background(
    repo: Arc<Repository>,
    builder: Arc<dyn InvoiceBuilder>,
    due_days: u32,
    use_next_period: bool,
) -> Result<GenerationReport, StoreError> {
    tokio::task::spawn_blocking(move || {
        repo.generate_invoices_for_all_customers(builder.as_ref(), due_days, use_next_period)
    })
    .await
    .map_err(|e| StoreError::Task(e.to_string()))?
}

fn attach_invoice(doc: &mut Document, id: &Uuid, invoice: Invoice) -> bool {
    match doc.customers.iter_mut().find(|c| c.id == *id) {
        Some(c) => {
            c.invoices.push(invoice);
            true
        }
        None => false,
    }
}

fn write_atomic(path: &Path, payload: &[u8]) -> Result<(), StoreError> {
    let mut temp_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    temp_name.push(".tmp");
    let temp_path = path.with_file_name(temp_name);

    let write_err = |p: &Path, e: std::io::Error| StoreError::Write {
        path: p.to_path_buf(),
        reason: e.to_string(),
    };

    let written = File::create(&temp_path).and_then(|mut file| {
        file.write_all(payload)?;
        file.sync_all()
    });
    if let Err(e) = written {
        let _ = fs::remove_file(&temp_path);
        return Err(write_err(&temp_path, e));
    }
    if let Err(e) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(write_err(path, e));
    }
    Ok(())
}

fn now() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::period::compute_period;
    use time::macros::{date, time};
    use time::{Date, Duration};

    fn open_in(dir: &Path) -> Repository {
        let config = Config::default();
        Repository::open(StorePaths::in_dir(dir, &config), RepositorySettings::from(&config))
            .expect("open repository")
    }

    fn add_customer(repo: &Repository, name: &str, with_subscription: bool) -> Customer {
        let mut c = repo.create_customer();
        c.customer_number = repo.new_customer_number().unwrap();
        c.info.name = name.to_string();
        if with_subscription {
            let mut s = repo.create_subscription();
            s.track_number = 5;
            s.weekday = Weekday::Thursday;
            s.start_time = time!(20:15);
            c.subscriptions.push(s);
        }
        repo.save_customer(c.clone()).unwrap();
        c
    }

    struct StubBuilder {
        issue: Date,
        fail_for: Option<u32>,
    }

    impl InvoiceBuilder for StubBuilder {
        fn build(
            &self,
            repo: &Repository,
            customer: &Customer,
            due_days: u32,
            use_next_period: bool,
        ) -> Result<Invoice, StoreError> {
            if self.fail_for == Some(customer.customer_number) {
                return Err(StoreError::Render("printer on fire".to_string()));
            }
            let number = repo.new_invoice_number()?;
            let period_start_date = if customer.subscriptions.is_empty() {
                None
            } else {
                Some(compute_period(self.issue, 6, use_next_period)?.start_day)
            };
            Ok(Invoice {
                invoice_number: number,
                status: InvoiceStatus::New,
                created_date: self.issue,
                due_date: self.issue + Duration::days(i64::from(due_days)),
                period_start_date,
                relative_file_path: format!("invoices/invoice-{number}.pdf"),
            })
        }
    }

    #[test]
    fn missing_file_starts_empty_at_initial_number() {
        let dir = tempfile::tempdir().expect("tempdir");
        let repo = open_in(dir.path());
        assert!(repo.customers().unwrap().is_empty());
        assert_eq!(
            repo.counters().unwrap(),
            Counters {
                customer_number: 3000,
                invoice_number: 3000
            }
        );
        assert!(!repo.paths().data_file.exists());
    }

    #[test]
    fn round_trip_preserves_records_and_counters() {
        let dir = tempfile::tempdir().expect("tempdir");
        let repo = open_in(dir.path());
        add_customer(&repo, "Ana", true);
        let b = add_customer(&repo, "Boris", false);
        let mut invoice = repo.create_invoice().unwrap();
        invoice.relative_file_path = "invoices/manual.pdf".to_string();
        invoice.due_date = invoice.created_date + Duration::days(14);
        assert!(repo.add_invoice_to_customer(&b.id, invoice).unwrap());
        repo.save().unwrap();

        let reopened = open_in(dir.path());
        assert_eq!(reopened.customers().unwrap(), repo.customers().unwrap());
        assert_eq!(reopened.counters().unwrap(), repo.counters().unwrap());
        assert_eq!(
            reopened.counters().unwrap(),
            Counters {
                customer_number: 3002,
                invoice_number: 3001
            }
        );
    }

    #[test]
    fn saving_twice_is_byte_identical() {
        let dir = tempfile::tempdir().expect("tempdir");
        let repo = open_in(dir.path());
        add_customer(&repo, "Ana", true);

        repo.save().unwrap();
        let first = fs::read(&repo.paths().data_file).unwrap();
        repo.save().unwrap();
        let second = fs::read(&repo.paths().data_file).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn deleting_unknown_id_is_a_noop() {
        let dir = tempfile::tempdir().expect("tempdir");
        let repo = open_in(dir.path());
        add_customer(&repo, "Ana", true);
        let before = fs::read(&repo.paths().data_file).unwrap();
        let counters = repo.counters().unwrap();

        assert!(!repo.delete_customer(&Uuid::new_v4()).unwrap());
        assert_eq!(repo.counters().unwrap(), counters);
        assert_eq!(repo.customers().unwrap().len(), 1);
        assert_eq!(fs::read(&repo.paths().data_file).unwrap(), before);
    }

    #[test]
    fn deleting_last_customer_removes_file_and_resets_on_reload() {
        let dir = tempfile::tempdir().expect("tempdir");
        let repo = open_in(dir.path());
        let a = add_customer(&repo, "Ana", true);
        assert!(repo.paths().data_file.exists());

        assert!(repo.delete_customer(&a.id).unwrap());
        assert!(!repo.paths().data_file.exists());

        let reopened = open_in(dir.path());
        assert_eq!(
            reopened.counters().unwrap(),
            Counters {
                customer_number: 3000,
                invoice_number: 3000
            }
        );
    }

    #[test]
    fn corrupt_file_is_fatal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = Config::default();
        let paths = StorePaths::in_dir(dir.path(), &config);
        fs::write(&paths.data_file, b"{ not json").unwrap();

        let err = Repository::open(paths, RepositorySettings::from(&config))
            .err()
            .expect("must fail");
        assert!(matches!(err, StoreError::Parse { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn schema_violation_on_disk_is_fatal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let repo = open_in(dir.path());
        add_customer(&repo, "Ana", true);
        add_customer(&repo, "Boris", true);

        let raw = fs::read_to_string(&repo.paths().data_file).unwrap();
        let mut value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        value["customers"][1]["customerNumber"] = value["customers"][0]["customerNumber"].clone();
        fs::write(&repo.paths().data_file, serde_json::to_vec(&value).unwrap()).unwrap();

        let config = Config::default();
        let err = Repository::open(
            StorePaths::in_dir(dir.path(), &config),
            RepositorySettings::from(&config),
        )
        .err()
        .expect("must fail");
        assert!(matches!(err, StoreError::Schema(_)));
    }

    #[test]
    fn load_backs_up_existing_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let repo = open_in(dir.path());
        add_customer(&repo, "Ana", true);
        assert!(backup::list_backups(&repo.paths().backup_dir).unwrap().is_empty());

        let reopened = open_in(dir.path());
        let backups = backup::list_backups(&reopened.paths().backup_dir).unwrap();
        assert_eq!(backups.len(), 1);
        assert_eq!(
            fs::read(&backups[0]).unwrap(),
            fs::read(&reopened.paths().data_file).unwrap()
        );
    }

    #[test]
    fn invoice_number_survives_crash_before_save() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let repo = open_in(dir.path());
            add_customer(&repo, "Ana", true);
            assert_eq!(repo.new_invoice_number().unwrap(), 3001);
            // dropped here without saving anything else
        }
        let repo = open_in(dir.path());
        assert_eq!(repo.counters().unwrap().invoice_number, 3001);
        assert_eq!(repo.new_invoice_number().unwrap(), 3002);
    }

    #[test]
    fn numbers_are_monotonic_and_unique() {
        let dir = tempfile::tempdir().expect("tempdir");
        let repo = open_in(dir.path());
        let mut last = repo.counters().unwrap();
        let mut seen_customers = std::collections::HashSet::new();

        for i in 0..5 {
            let c = add_customer(&repo, &format!("Member {i}"), i % 2 == 0);
            assert!(seen_customers.insert(c.customer_number));
            if i == 2 {
                repo.delete_customer(&c.id).unwrap();
            }
            repo.create_invoice().unwrap();
            let now = repo.counters().unwrap();
            assert!(now.customer_number > last.customer_number);
            assert!(now.invoice_number > last.invoice_number);
            last = now;
        }
    }

    #[test]
    fn duplicate_customer_number_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let repo = open_in(dir.path());
        let a = add_customer(&repo, "Ana", true);

        let mut dup = repo.create_customer();
        dup.customer_number = a.customer_number;
        let err = repo.save_customer(dup).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateCustomerNumber(n) if n == a.customer_number));
        assert_eq!(repo.customers().unwrap().len(), 1);

        // Re-saving the same customer with its own number is fine.
        repo.save_customer(a).unwrap();
    }

    #[test]
    fn track_number_out_of_range_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let repo = open_in(dir.path());
        let mut c = repo.create_customer();
        c.customer_number = repo.new_customer_number().unwrap();
        let mut s = repo.create_subscription();
        s.track_number = 500;
        c.subscriptions.push(s);

        assert!(matches!(repo.save_customer(c), Err(StoreError::Schema(_))));
        assert!(repo.customers().unwrap().is_empty());
    }

    #[test]
    fn save_customer_replaces_full_record() {
        let dir = tempfile::tempdir().expect("tempdir");
        let repo = open_in(dir.path());
        let mut a = add_customer(&repo, "Ana", true);

        a.info.city = "Novi Sad".to_string();
        a.customer_number = 1234;
        a.subscriptions.clear();
        repo.save_customer(a.clone()).unwrap();

        let stored = repo.get_customer(&a.id).unwrap().unwrap();
        assert_eq!(stored, a);
        assert_eq!(repo.customers().unwrap().len(), 1);
        assert!(repo.get_customer(&Uuid::new_v4()).unwrap().is_none());
    }

    #[test]
    fn live_edits_are_dirty_until_saved() {
        let dir = tempfile::tempdir().expect("tempdir");
        let repo = open_in(dir.path());
        add_customer(&repo, "Ana", true);

        repo.with_customers_mut(|customers| customers[0].info.phone = "064 111".to_string())
            .unwrap();
        assert_eq!(open_in(dir.path()).customers().unwrap()[0].info.phone, "");

        repo.save().unwrap();
        assert_eq!(open_in(dir.path()).customers().unwrap()[0].info.phone, "064 111");
    }

    #[test]
    fn generation_reports_empty_customers_and_continues() {
        let dir = tempfile::tempdir().expect("tempdir");
        let repo = open_in(dir.path());
        let a = add_customer(&repo, "Ana", true);
        let b = add_customer(&repo, "Boris", false);
        let c = add_customer(&repo, "Cveta", true);

        let builder = StubBuilder {
            issue: date!(2016 - 10 - 22),
            fail_for: None,
        };
        let report = repo.generate_invoices_for_all_customers(&builder, 10, true).unwrap();

        assert_eq!(
            report.files,
            vec![
                "invoices/invoice-3001.pdf".to_string(),
                "invoices/invoice-3002.pdf".to_string(),
                "invoices/invoice-3003.pdf".to_string(),
            ]
        );
        assert_eq!(report.empty_invoice_customers.len(), 1);
        assert_eq!(report.empty_invoice_customers[0].id, b.id);

        let reopened = open_in(dir.path());
        let stored_a = reopened.get_customer(&a.id).unwrap().unwrap();
        assert_eq!(stored_a.invoices.len(), 1);
        assert_eq!(stored_a.invoices[0].period_start_date, Some(date!(2017 - 01 - 01)));
        assert_eq!(stored_a.invoices[0].due_date, date!(2016 - 11 - 01));
        let stored_b = reopened.get_customer(&b.id).unwrap().unwrap();
        assert_eq!(stored_b.invoices[0].period_start_date, None);
        assert_eq!(reopened.get_customer(&c.id).unwrap().unwrap().invoices.len(), 1);
        assert_eq!(reopened.counters().unwrap().invoice_number, 3003);
    }

    #[test]
    fn generation_failure_keeps_numbers_and_attached_invoices() {
        let dir = tempfile::tempdir().expect("tempdir");
        let repo = open_in(dir.path());
        let a = add_customer(&repo, "Ana", true);
        let b = add_customer(&repo, "Boris", true);

        let builder = StubBuilder {
            issue: date!(2016 - 10 - 22),
            fail_for: Some(b.customer_number),
        };
        let err = repo
            .generate_invoices_for_all_customers(&builder, 14, false)
            .unwrap_err();
        assert!(matches!(err, StoreError::Render(_)));

        let reopened = open_in(dir.path());
        assert_eq!(reopened.get_customer(&a.id).unwrap().unwrap().invoices.len(), 1);
        assert!(reopened.get_customer(&b.id).unwrap().unwrap().invoices.is_empty());
        assert_eq!(reopened.counters().unwrap().invoice_number, 3001);
    }

    #[test]
    fn invoice_status_transition_is_saved() {
        let dir = tempfile::tempdir().expect("tempdir");
        let repo = open_in(dir.path());
        let a = add_customer(&repo, "Ana", true);
        let builder = StubBuilder {
            issue: date!(2016 - 10 - 22),
            fail_for: None,
        };
        repo.generate_invoices_for_all_customers(&builder, 14, false).unwrap();

        assert!(repo.set_invoice_status(&a.id, 3001, InvoiceStatus::Paid).unwrap());
        assert!(!repo.set_invoice_status(&a.id, 9999, InvoiceStatus::Paid).unwrap());

        let reopened = open_in(dir.path());
        assert_eq!(
            reopened.get_customer(&a.id).unwrap().unwrap().invoices[0].status,
            InvoiceStatus::Paid
        );
    }

    /// Swap the data file for a directory so every later write fails at the rename.
    fn block_data_file(repo: &Repository) {
        let path = &repo.paths().data_file;
        fs::remove_file(path).unwrap();
        fs::create_dir(path).unwrap();
    }

    #[test]
    fn hand_assigned_customer_number_advances_counter() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let repo = open_in(dir.path());
            let mut c = repo.create_customer();
            c.customer_number = 3001;
            repo.save_customer(c).unwrap();
            assert_eq!(repo.counters().unwrap().customer_number, 3001);
        }

        for expected in [3002, 3003] {
            let repo = open_in(dir.path());
            let mut c = repo.create_customer();
            c.customer_number = repo.new_customer_number().unwrap();
            assert_eq!(c.customer_number, expected);
            repo.save_customer(c).unwrap();
        }
        assert_eq!(open_in(dir.path()).customers().unwrap().len(), 3);
    }

    #[test]
    fn new_customer_number_skips_numbers_in_use() {
        let dir = tempfile::tempdir().expect("tempdir");
        let repo = open_in(dir.path());
        add_customer(&repo, "Ana", true);
        repo.with_customers_mut(|customers| customers[0].customer_number = 3002)
            .unwrap();
        repo.save().unwrap();

        let reopened = open_in(dir.path());
        assert_eq!(reopened.counters().unwrap().customer_number, 3001);
        assert_eq!(reopened.new_customer_number().unwrap(), 3003);
    }

    #[test]
    fn exhausted_counters_are_errors() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = Config::default();
        let repo = Repository::open(
            StorePaths::in_dir(dir.path(), &config),
            RepositorySettings {
                initial_number: u32::MAX,
                rules: config.schema_rules(),
            },
        )
        .unwrap();

        let err = repo.new_customer_number().unwrap_err();
        assert!(matches!(err, StoreError::CounterExhausted("customer")));

        let mut c = repo.create_customer();
        c.customer_number = 1;
        repo.save_customer(c).unwrap();
        let err = repo.new_invoice_number().unwrap_err();
        assert!(matches!(err, StoreError::CounterExhausted("invoice")));
        assert_eq!(
            repo.counters().unwrap(),
            Counters {
                customer_number: u32::MAX,
                invoice_number: u32::MAX
            }
        );
    }

    #[test]
    fn invoice_number_needs_a_customer() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let repo = open_in(dir.path());
            assert!(matches!(repo.new_invoice_number(), Err(StoreError::NoCustomers)));
            assert!(matches!(repo.create_invoice(), Err(StoreError::NoCustomers)));
            assert_eq!(repo.counters().unwrap().invoice_number, 3000);
        }
        let repo = open_in(dir.path());
        add_customer(&repo, "Ana", true);
        assert_eq!(repo.new_invoice_number().unwrap(), 3001);
    }

    #[test]
    fn backup_failure_does_not_block_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        let repo = open_in(dir.path());
        let a = add_customer(&repo, "Ana", true);
        fs::write(&repo.paths().backup_dir, b"not a directory").unwrap();

        let reopened = open_in(dir.path());
        assert_eq!(reopened.customers().unwrap(), vec![a]);
        assert!(reopened.paths().backup_dir.is_file());
    }

    #[test]
    fn write_failures_propagate_and_leave_memory_untouched() {
        let dir = tempfile::tempdir().expect("tempdir");
        let repo = open_in(dir.path());
        let a = add_customer(&repo, "Ana", true);
        add_customer(&repo, "Boris", true);
        let builder = StubBuilder {
            issue: date!(2016 - 10 - 22),
            fail_for: None,
        };
        repo.generate_invoices_for_all_customers(&builder, 14, false).unwrap();
        let customers = repo.customers().unwrap();
        let counters = repo.counters().unwrap();
        block_data_file(&repo);

        let err = repo.save().unwrap_err();
        assert!(matches!(err, StoreError::Write { .. }));
        assert!(err.is_fatal());

        let mut c = repo.create_customer();
        c.customer_number = 4000;
        assert!(matches!(repo.save_customer(c), Err(StoreError::Write { .. })));
        assert!(matches!(repo.new_invoice_number(), Err(StoreError::Write { .. })));
        assert!(matches!(repo.delete_customer(&a.id), Err(StoreError::Write { .. })));
        assert!(matches!(
            repo.set_invoice_status(&a.id, 3001, InvoiceStatus::Paid),
            Err(StoreError::Write { .. })
        ));

        assert_eq!(repo.customers().unwrap(), customers);
        assert_eq!(repo.counters().unwrap(), counters);
    }

    #[test]
    fn failed_write_removes_temp_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let repo = open_in(dir.path());
        add_customer(&repo, "Ana", true);
        block_data_file(&repo);

        assert!(repo.save().is_err());
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty(), "{leftovers:?}");
    }

    #[test]
    fn concurrent_invoice_numbers_are_distinct() {
        let dir = tempfile::tempdir().expect("tempdir");
        let repo = open_in(dir.path());
        add_customer(&repo, "Ana", true);

        let numbers: Vec<u32> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(|| {
                        (0..10)
                            .map(|_| repo.new_invoice_number().unwrap())
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            handles
                .into_iter()
                .flat_map(|h| h.join().unwrap())
                .collect()
        });

        let distinct: std::collections::HashSet<u32> = numbers.iter().copied().collect();
        assert_eq!(distinct.len(), 80);
        assert_eq!(repo.counters().unwrap().invoice_number, 3080);
        assert_eq!(open_in(dir.path()).counters().unwrap().invoice_number, 3080);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn background_generation_runs_off_thread() {
        let dir = tempfile::tempdir().expect("tempdir");
        let repo = Arc::new(open_in(dir.path()));
        add_customer(&repo, "Ana", true);
        add_customer(&repo, "Boris", true);

        let builder: Arc<dyn InvoiceBuilder> = Arc::new(StubBuilder {
            issue: date!(2016 - 01 - 01),
            fail_for: None,
        });
        let report = generate_invoices_in_background(repo.clone(), builder, 7, false)
            .await
            .unwrap();
        assert_eq!(report.files.len(), 2);
        assert!(report.empty_invoice_customers.is_empty());
        assert_eq!(repo.counters().unwrap().invoice_number, 3002);
    }
}

use serde::{Deserialize, Serialize};
use time::{Date, Time};
use uuid::Uuid;

time::serde::format_description!(ymd, Date, "[year]-[month]-[day]");
time::serde::format_description!(hm, Time, "[hour]:[minute]");

/// The whole dataset. Held in memory and rewritten as one file on every save.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Document {
    pub customers: Vec<Customer>,
    pub current_customer_number: u32,
    pub current_invoice_number: u32,
}

impl Document {
    pub fn empty(initial_number: u32) -> Self {
        Self {
            customers: Vec::new(),
            current_customer_number: initial_number,
            current_invoice_number: initial_number,
        }
    }

    pub fn counters(&self) -> Counters {
        Counters {
            customer_number: self.current_customer_number,
            invoice_number: self.current_invoice_number,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Counters {
    pub customer_number: u32,
    pub invoice_number: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Customer {
    pub id: Uuid,
    pub customer_number: u32,
    pub info: CustomerInfo,
    #[serde(default)]
    pub subscriptions: Vec<Subscription>,
    #[serde(default)]
    pub invoices: Vec<Invoice>,
}

impl Customer {
    pub fn new(customer_number: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            customer_number,
            info: CustomerInfo::default(),
            subscriptions: Vec::new(),
            invoices: Vec::new(),
        }
    }

    pub fn display_name(&self) -> &str {
        let name = self.info.name.trim();
        if name.is_empty() {
            "customer"
        } else {
            name
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CustomerInfo {
    pub name: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub postal_code: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub is_company: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Weekday {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl Weekday {
    pub fn as_str(&self) -> &'static str {
        match self {
            Weekday::Monday => "MONDAY",
            Weekday::Tuesday => "TUESDAY",
            Weekday::Wednesday => "WEDNESDAY",
            Weekday::Thursday => "THURSDAY",
            Weekday::Friday => "FRIDAY",
            Weekday::Saturday => "SATURDAY",
            Weekday::Sunday => "SUNDAY",
        }
    }

    pub fn parse(v: &str) -> Option<Weekday> {
        let s = v.trim();
        [
            Weekday::Monday,
            Weekday::Tuesday,
            Weekday::Wednesday,
            Weekday::Thursday,
            Weekday::Friday,
            Weekday::Saturday,
            Weekday::Sunday,
        ]
        .into_iter()
        .find(|d| d.as_str().eq_ignore_ascii_case(s) || d.as_str()[..3].eq_ignore_ascii_case(s))
    }
}

impl From<Weekday> for time::Weekday {
    fn from(d: Weekday) -> Self {
        match d {
            Weekday::Monday => time::Weekday::Monday,
            Weekday::Tuesday => time::Weekday::Tuesday,
            Weekday::Wednesday => time::Weekday::Wednesday,
            Weekday::Thursday => time::Weekday::Thursday,
            Weekday::Friday => time::Weekday::Friday,
            Weekday::Saturday => time::Weekday::Saturday,
            Weekday::Sunday => time::Weekday::Sunday,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Subscription {
    pub track_number: u32,
    pub weekday: Weekday,
    #[serde(with = "hm")]
    pub start_time: Time,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceStatus {
    New,
    Sent,
    Paid,
    Cancelled,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::New => "NEW",
            InvoiceStatus::Sent => "SENT",
            InvoiceStatus::Paid => "PAID",
            InvoiceStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(v: &str) -> Option<InvoiceStatus> {
        let s = v.trim();
        [
            InvoiceStatus::New,
            InvoiceStatus::Sent,
            InvoiceStatus::Paid,
            InvoiceStatus::Cancelled,
        ]
        .into_iter()
        .find(|st| st.as_str().eq_ignore_ascii_case(s))
    }
}

fn default_invoice_status() -> InvoiceStatus {
    InvoiceStatus::New
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Invoice {
    pub invoice_number: u32,
    #[serde(default = "default_invoice_status")]
    pub status: InvoiceStatus,
    #[serde(with = "ymd")]
    pub created_date: Date,
    #[serde(with = "ymd")]
    pub due_date: Date,
    #[serde(default, with = "ymd::option", skip_serializing_if = "Option::is_none")]
    pub period_start_date: Option<Date>,
    pub relative_file_path: String,
}
